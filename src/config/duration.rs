//! Duration serialization helpers for configuration files

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Serde helper for durations expressed in whole seconds.
///
/// TOML configs specify the coarse intervals (timeouts, scrape interval,
/// TTLs) in seconds.
pub mod duration_secs {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper for durations expressed in milliseconds.
///
/// Used for sub-second thresholds (max clock offset, drift threshold).
pub mod duration_millis {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "duration_secs")]
        secs: Duration,
        #[serde(with = "duration_millis")]
        millis: Duration,
    }

    #[test]
    fn roundtrip_through_toml() {
        let wrapper = Wrapper {
            secs: Duration::from_secs(30),
            millis: Duration::from_millis(100),
        };
        let text = toml::to_string(&wrapper).unwrap();
        assert!(text.contains("secs = 30"));
        assert!(text.contains("millis = 100"));

        let parsed: Wrapper = toml::from_str(&text).unwrap();
        assert_eq!(parsed.secs, Duration::from_secs(30));
        assert_eq!(parsed.millis, Duration::from_millis(100));
    }
}

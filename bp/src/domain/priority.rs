//! Priority levels for task scheduling

use serde::{Deserialize, Deserializer, Serialize};

/// Priority of a scheduled task
///
/// Any integer is a valid priority; larger values start first. The named
/// levels cover the common cases and are what the config file and CLI accept
/// by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Default)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const LOW: Self = Self(-10);
    pub const NORMAL: Self = Self(0);
    pub const HIGH: Self = Self(10);
    pub const CRITICAL: Self = Self(100);

    /// Raw integer value
    pub fn value(self) -> i32 {
        self.0
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

// Accepts either an integer or one of the level names
impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Value(i32),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Value(value) => Ok(Self(value)),
            Repr::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::LOW => write!(f, "low"),
            Self::NORMAL => write!(f, "normal"),
            Self::HIGH => write!(f, "high"),
            Self::CRITICAL => write!(f, "critical"),
            Self(other) => write!(f, "{}", other),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::LOW),
            "normal" => Ok(Self::NORMAL),
            "high" => Ok(Self::HIGH),
            "critical" => Ok(Self::CRITICAL),
            other => other
                .parse::<i32>()
                .map(Self)
                .map_err(|_| format!("Unknown priority: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::LOW < Priority::NORMAL);
        assert!(Priority::NORMAL < Priority::HIGH);
        assert!(Priority::HIGH < Priority::CRITICAL);
        assert!(Priority(3) > Priority(2));
    }

    #[test]
    fn test_priority_display() {
        assert_eq!(Priority::LOW.to_string(), "low");
        assert_eq!(Priority::NORMAL.to_string(), "normal");
        assert_eq!(Priority::HIGH.to_string(), "high");
        assert_eq!(Priority::CRITICAL.to_string(), "critical");
        assert_eq!(Priority(7).to_string(), "7");
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("low".parse::<Priority>().unwrap(), Priority::LOW);
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::HIGH);
        assert_eq!("-3".parse::<Priority>().unwrap(), Priority(-3));
        assert!("invalid".parse::<Priority>().is_err());
    }

    #[test]
    fn test_priority_serde() {
        let json = serde_json::to_string(&Priority::HIGH).unwrap();
        assert_eq!(json, "10");

        let priority: Priority = serde_json::from_str("5").unwrap();
        assert_eq!(priority, Priority(5));

        let priority: Priority = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(priority, Priority::CRITICAL);
    }
}

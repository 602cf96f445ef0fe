use crate::{VertexError, VertexResult};
use serde::{Deserialize, Serialize};

/// Opaque value passed into and produced by algorithms.
pub type Payload = serde_json::Value;

/// Declared input or output type of an algorithm, e.g. `series` or `forecast`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTag(String);

impl TypeTag {
    /// Wildcard tag, compatible with every other tag.
    pub const ANY: &'static str = "any";

    /// Create a tag from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The wildcard tag.
    pub fn any() -> Self {
        Self(Self::ANY.to_string())
    }

    /// Tag name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a value tagged `self` may be fed into an input tagged `input`.
    pub fn feeds(&self, input: &TypeTag) -> bool {
        self.0 == input.0 || self.0 == Self::ANY || input.0 == Self::ANY
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeTag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TypeTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Task priority in `1..=5`, where 1 is the highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    /// Highest priority.
    pub const CRITICAL: Priority = Priority(1);
    /// High priority.
    pub const HIGH: Priority = Priority(2);
    /// Default priority.
    pub const MEDIUM: Priority = Priority(3);
    /// Low priority, throttled under resource pressure.
    pub const LOW: Priority = Priority(4);
    /// Lowest priority, throttled under resource pressure.
    pub const BACKGROUND: Priority = Priority(5);

    /// Validate and wrap a raw priority value.
    pub fn new(value: u8) -> VertexResult<Self> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(VertexError::Validation(format!(
                "priority must be within 1..=5, got {value}"
            )))
        }
    }

    /// Raw value.
    pub fn value(self) -> u8 {
        self.0
    }

    /// Priorities 4 and 5 are shed first under resource pressure.
    pub fn is_non_critical(self) -> bool {
        self.0 >= 4
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::MEDIUM
    }
}

impl TryFrom<u8> for Priority {
    type Error = VertexError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.0
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_compatibility() {
        let series = TypeTag::new("series");
        let forecast = TypeTag::new("forecast");
        assert!(series.feeds(&series));
        assert!(!series.feeds(&forecast));
        assert!(series.feeds(&TypeTag::any()));
        assert!(TypeTag::any().feeds(&forecast));
    }

    #[test]
    fn test_priority_bounds() {
        assert!(Priority::new(0).is_err());
        assert!(Priority::new(6).is_err());
        assert_eq!(Priority::new(1).unwrap(), Priority::CRITICAL);
        assert!(Priority::LOW.is_non_critical());
        assert!(!Priority::MEDIUM.is_non_critical());
    }

    #[test]
    fn test_priority_serde_rejects_out_of_range() {
        let ok: Priority = serde_json::from_str("2").unwrap();
        assert_eq!(ok, Priority::HIGH);
        assert!(serde_json::from_str::<Priority>("9").is_err());
        assert_eq!(serde_json::to_string(&Priority::BACKGROUND).unwrap(), "5");
    }
}

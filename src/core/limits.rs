//! Operational limits.
//!
//! Derived reads over the element set are full scans, so the element count
//! per board is capped rather than indexed.

use serde::{Deserialize, Serialize};

use super::error::CoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum live elements per board.
    pub max_elements: usize,
    /// Bound on the retained log of received events.
    pub event_log_cap: usize,
    /// Maximum encoded size of a single field payload.
    pub max_field_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_elements: 5_000,
            event_log_cap: 200,
            max_field_bytes: 64 * 1024,
        }
    }
}

impl Limits {
    pub fn check_element_count(&self, live_count: usize) -> Result<(), CoreError> {
        if live_count >= self.max_elements {
            Err(CoreError::ElementLimitExceeded {
                count: live_count,
                max: self.max_elements,
            })
        } else {
            Ok(())
        }
    }

    pub fn check_field(&self, name: &str, encoded_len: usize) -> Result<(), CoreError> {
        if encoded_len > self.max_field_bytes {
            Err(CoreError::FieldTooLarge {
                field: name.to_string(),
                size: encoded_len,
                max: self.max_field_bytes,
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_cap_is_inclusive() {
        let limits = Limits {
            max_elements: 2,
            ..Limits::default()
        };
        assert!(limits.check_element_count(1).is_ok());
        assert!(limits.check_element_count(2).is_err());
    }

    #[test]
    fn field_cap() {
        let limits = Limits::default();
        assert!(limits.check_field("text", 100).is_ok());
        assert!(limits.check_field("text", limits.max_field_bytes + 1).is_err());
    }
}

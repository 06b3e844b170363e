//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from an existing string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a new random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Get the inner string reference.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Unique identifier for a registered worker ("agent").
    WorkerId
);

string_id!(
    /// Unique identifier for a task queued on a worker runtime.
    TaskId
);

string_id!(
    /// Unique identifier for a workflow.
    WorkflowId
);

string_id!(
    /// Identifier of a step, unique within its workflow.
    StepId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_generate() {
        let id1 = TaskId::generate();
        let id2 = TaskId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_id_display() {
        let id = WorkerId::new("pricing-agent");
        assert_eq!(format!("{}", id), "pricing-agent");
    }

    #[test]
    fn test_step_id_serializes_as_plain_string() {
        let id = StepId::from("step_1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"step_1\"");
        let back: StepId = serde_json::from_str("\"step_2\"").unwrap();
        assert_eq!(back.as_str(), "step_2");
    }
}

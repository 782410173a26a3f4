//! Unique identifiers for queue instances.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a queue instance.
///
/// Every queue, nested ones included, gets its own id so log lines from a
/// parent and its sub-queues can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId(Ulid);

impl QueueId {
    /// Generate a new QueueId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for QueueId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for QueueId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_ids_are_unique() {
        assert_ne!(QueueId::new(), QueueId::new());
    }

    #[test]
    fn test_queue_id_parses_its_display_form() {
        let id = QueueId::new();
        let parsed: QueueId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}

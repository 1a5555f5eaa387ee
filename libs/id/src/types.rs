//! Typed ID definitions for generated hub entities.
//!
//! Each ID type has a unique prefix that identifies the entity kind.
//! Caller-supplied identifiers (agent names, resource paths, zone ids,
//! claim keys) are intentionally not typed here.

use crate::define_id;

// =============================================================================
// Coordinator entities
// =============================================================================

define_id!(TaskId, "task");
define_id!(MessageId, "msg");
define_id!(HandoffId, "ho");

// =============================================================================
// Agent state
// =============================================================================

define_id!(MemoryId, "mem");

// =============================================================================
// Soul/body lifecycle
// =============================================================================

define_id!(SoulId, "soul");
define_id!(BodyId, "body");
define_id!(TransferId, "xfer");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdError;

    #[test]
    fn roundtrip() {
        let id = TaskId::new();
        let parsed = TaskId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_wrong_prefix() {
        let soul = SoulId::new();
        let err = BodyId::parse(&soul.to_string()).unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn rejects_empty_and_separatorless() {
        assert_eq!(TaskId::parse(""), Err(IdError::Empty));
        assert_eq!(TaskId::parse("task"), Err(IdError::MissingSeparator));
    }

    #[test]
    fn rejects_bad_ulid() {
        assert!(matches!(
            TransferId::parse("xfer_not-a-ulid"),
            Err(IdError::InvalidUlid(_))
        ));
    }

    #[test]
    fn serde_roundtrip() {
        let id = HandoffId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: HandoffId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn ids_are_time_ordered() {
        let a = MessageId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = MessageId::new();
        assert!(a < b);
    }
}

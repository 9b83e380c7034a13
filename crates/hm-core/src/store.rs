//! Persistence facility abstraction
//!
//! The record lives in a key-value store owned by the host. Reads and writes
//! are asynchronous; writes are announced to every context as
//! [`StorageChange`] events.

use serde_json::Value;

/// Error type for persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Host rejected operation: {0}")]
    Host(String),
}

/// Key-value persistence facility.
#[allow(async_fn_in_trait)]
pub trait ConfigStore {
    /// Read the value under `key`, `None` when nothing is stored.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the value under `key`. Last writer wins.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

// =============================================================================
// Change Notifications
// =============================================================================

/// Storage scope an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    Local,
    Sync,
    Managed,
    Session,
}

impl StorageArea {
    /// Parse from the host's area name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "sync" => Some(Self::Sync),
            "managed" => Some(Self::Managed),
            "session" => Some(Self::Session),
            _ => None,
        }
    }
}

/// One changed key, as delivered by the host's change channel.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub area: StorageArea,
}

impl StorageChange {
    /// Whether this event concerns `key` in local storage.
    pub fn concerns(&self, key: &str) -> bool {
        self.area == StorageArea::Local && self.key == key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_parse() {
        assert_eq!(StorageArea::parse("local"), Some(StorageArea::Local));
        assert_eq!(StorageArea::parse("sync"), Some(StorageArea::Sync));
        assert_eq!(StorageArea::parse("session"), Some(StorageArea::Session));
        assert_eq!(StorageArea::parse("LOCAL"), None);
        assert_eq!(StorageArea::parse("managed"), Some(StorageArea::Managed));
    }

    #[test]
    fn test_change_concerns() {
        let change = StorageChange {
            key: "headerModifierState".to_string(),
            old_value: None,
            new_value: None,
            area: StorageArea::Local,
        };
        assert!(change.concerns("headerModifierState"));
        assert!(!change.concerns("other"));

        let sync = StorageChange {
            area: StorageArea::Sync,
            ..change
        };
        assert!(!sync.concerns("headerModifierState"));
    }
}

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Cached presence state for one user, stored as JSON under a TTL key so a
/// crashed node's "online" records age out on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub online: bool,
    pub last_seen: i64,
    pub connection_id: Option<Uuid>,
}

impl PresenceRecord {
    #[must_use]
    pub fn online(connection_id: Uuid) -> Self {
        Self {
            online: true,
            last_seen: OffsetDateTime::now_utc().unix_timestamp(),
            connection_id: Some(connection_id),
        }
    }

    #[must_use]
    pub fn offline() -> Self {
        Self {
            online: false,
            last_seen: OffsetDateTime::now_utc().unix_timestamp(),
            connection_id: None,
        }
    }

    /// Whether a disconnect for `connection_id` may flip this record
    /// offline. A record owned by a newer connection stays untouched, so a
    /// reconnect racing its predecessor's teardown is not clobbered.
    #[must_use]
    pub fn owned_by(&self, connection_id: Uuid) -> bool {
        self.connection_id == Some(connection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_ownership() {
        let conn = Uuid::new_v4();
        let record = PresenceRecord::online(conn);

        assert!(record.owned_by(conn));
        assert!(!record.owned_by(Uuid::new_v4()));
        assert!(!PresenceRecord::offline().owned_by(conn));
    }
}

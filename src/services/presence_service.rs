use crate::domain::presence::PresenceRecord;
use crate::error::Result;
use crate::protocol::{ServerEvent, UserStatusDto};
use crate::services::fanout::EventFanout;
use crate::stores::{PresenceStore, TypingStore};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    transitions_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            transitions_total: meter
                .u64_counter("presence_transitions_total")
                .with_description("Presence records flipped online or offline")
                .build(),
        }
    }
}

/// Presence and typing state. Everything here lives under a TTL: a node
/// that dies without running disconnects leaves records that simply age
/// out, and typing flags clear themselves when the client goes quiet.
#[derive(Clone, Debug)]
pub struct PresenceService {
    presence: Arc<dyn PresenceStore>,
    typing: Arc<dyn TypingStore>,
    fanout: Arc<dyn EventFanout>,
    presence_ttl: Duration,
    typing_ttl: Duration,
    metrics: Metrics,
}

impl PresenceService {
    #[must_use]
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        typing: Arc<dyn TypingStore>,
        fanout: Arc<dyn EventFanout>,
        presence_ttl: Duration,
        typing_ttl: Duration,
    ) -> Self {
        Self { presence, typing, fanout, presence_ttl, typing_ttl, metrics: Metrics::new() }
    }

    /// Marks the user online under this connection and announces it.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn connect(&self, user_id: Uuid, connection_id: Uuid) -> Result<()> {
        let record = PresenceRecord::online(connection_id);
        self.presence.put(user_id, &record, self.presence_ttl).await?;
        self.metrics.transitions_total.add(1, &[KeyValue::new("state", "online")]);

        self.fanout
            .publish_presence(user_id, ServerEvent::UserOnline { user_id, last_seen: record.last_seen })
            .await;
        Ok(())
    }

    /// Flips the user offline, but only if `connection_id` still owns the
    /// record. A disconnect arriving after the user already reconnected
    /// elsewhere must not clobber the newer session's state.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn disconnect(&self, user_id: Uuid, connection_id: Uuid) -> Result<()> {
        match self.presence.get(user_id).await? {
            Some(record) if record.owned_by(connection_id) => {
                let offline = PresenceRecord::offline();
                self.presence.put(user_id, &offline, self.presence_ttl).await?;
                self.metrics.transitions_total.add(1, &[KeyValue::new("state", "offline")]);

                self.fanout
                    .publish_presence(
                        user_id,
                        ServerEvent::UserOffline { user_id, last_seen: offline.last_seen },
                    )
                    .await;
            }
            Some(_) => {
                tracing::debug!("Disconnect from superseded connection ignored");
            }
            None => {}
        }
        Ok(())
    }

    /// Refreshes the TTL of an online record. An expired or offline record
    /// is left alone: coming back requires a reconnect, not a heartbeat.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn heartbeat(&self, user_id: Uuid) -> Result<()> {
        if let Some(mut record) = self.presence.get(user_id).await?
            && record.online
        {
            record.last_seen = OffsetDateTime::now_utc().unix_timestamp();
            self.presence.put(user_id, &record, self.presence_ttl).await?;
        }
        Ok(())
    }

    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn status_of(&self, user_id: Uuid) -> Result<UserStatusDto> {
        let record = self.presence.get(user_id).await?;
        Ok(UserStatusDto::from_record(user_id, record.as_ref()))
    }

    /// Statuses in input order; users without a record read as offline.
    #[tracing::instrument(err(level = "warn"), skip(self, user_ids), fields(count = user_ids.len()))]
    pub async fn statuses(&self, user_ids: &[Uuid]) -> Result<Vec<UserStatusDto>> {
        let records = self.presence.get_many(user_ids).await?;
        Ok(user_ids.iter().map(|id| UserStatusDto::from_record(*id, records.get(id))).collect())
    }

    /// Flags the typist and tells the other participant. The flag expires
    /// on its own if no stop or refresh follows.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn typing_start(
        &self,
        conversation_id: Uuid,
        typist_id: Uuid,
        receiver_id: Uuid,
    ) -> Result<()> {
        self.typing.set(conversation_id, typist_id, self.typing_ttl).await?;
        self.fanout
            .push_to_user(receiver_id, ServerEvent::UserTyping { conversation_id, user_id: typist_id })
            .await;
        Ok(())
    }

    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn typing_stop(
        &self,
        conversation_id: Uuid,
        typist_id: Uuid,
        receiver_id: Uuid,
    ) -> Result<()> {
        self.typing.clear(conversation_id, typist_id).await?;
        self.fanout
            .push_to_user(
                receiver_id,
                ServerEvent::UserStoppedTyping { conversation_id, user_id: typist_id },
            )
            .await;
        Ok(())
    }

    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn is_typing(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.typing.is_typing(conversation_id, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryPresenceStore, MemoryTypingStore};
    use crate::services::fanout::testing::RecordingFanout;

    struct Harness {
        presence: PresenceService,
        fanout: Arc<RecordingFanout>,
    }

    fn harness(presence_ttl: Duration, typing_ttl: Duration) -> Harness {
        let fanout = Arc::new(RecordingFanout::default());
        let presence = PresenceService::new(
            Arc::new(MemoryPresenceStore::new()),
            Arc::new(MemoryTypingStore::new()),
            Arc::clone(&fanout) as Arc<dyn EventFanout>,
            presence_ttl,
            typing_ttl,
        );
        Harness { presence, fanout }
    }

    #[tokio::test]
    async fn test_connect_publishes_and_reports_online() {
        let h = harness(Duration::from_secs(300), Duration::from_secs(5));
        let user = Uuid::new_v4();

        h.presence.connect(user, Uuid::new_v4()).await.unwrap();

        let status = h.presence.status_of(user).await.unwrap();
        assert!(status.online);
        assert!(status.last_seen.is_some());
        assert!(matches!(
            h.fanout.presence_events_for(user)[..],
            [ServerEvent::UserOnline { .. }]
        ));
    }

    #[tokio::test]
    async fn test_disconnect_flips_offline_and_keeps_last_seen() {
        let h = harness(Duration::from_secs(300), Duration::from_secs(5));
        let user = Uuid::new_v4();
        let connection = Uuid::new_v4();

        h.presence.connect(user, connection).await.unwrap();
        h.presence.disconnect(user, connection).await.unwrap();

        let status = h.presence.status_of(user).await.unwrap();
        assert!(!status.online);
        assert!(status.last_seen.is_some());
        assert!(matches!(
            h.fanout.presence_events_for(user)[..],
            [ServerEvent::UserOnline { .. }, ServerEvent::UserOffline { .. }]
        ));
    }

    #[tokio::test]
    async fn test_stale_disconnect_does_not_clobber_reconnect() {
        let h = harness(Duration::from_secs(300), Duration::from_secs(5));
        let user = Uuid::new_v4();
        let old_connection = Uuid::new_v4();
        let new_connection = Uuid::new_v4();

        h.presence.connect(user, old_connection).await.unwrap();
        h.presence.connect(user, new_connection).await.unwrap();
        // The old socket's teardown fires after the reconnect.
        h.presence.disconnect(user, old_connection).await.unwrap();

        assert!(h.presence.status_of(user).await.unwrap().online);
        let events = h.fanout.presence_events_for(user);
        assert!(!events.iter().any(|e| matches!(e, ServerEvent::UserOffline { .. })));
    }

    #[tokio::test]
    async fn test_presence_expires_without_heartbeat() {
        let h = harness(Duration::from_millis(60), Duration::from_secs(5));
        let user = Uuid::new_v4();

        h.presence.connect(user, Uuid::new_v4()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = h.presence.status_of(user).await.unwrap();
        assert!(!status.online);
        assert_eq!(status.last_seen, None);
    }

    #[tokio::test]
    async fn test_heartbeat_extends_online_but_never_resurrects() {
        let h = harness(Duration::from_millis(120), Duration::from_secs(5));
        let user = Uuid::new_v4();

        h.presence.connect(user, Uuid::new_v4()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        h.presence.heartbeat(user).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        // 160ms after connect the original TTL is long gone; the refresh
        // carried it.
        assert!(h.presence.status_of(user).await.unwrap().online);

        tokio::time::sleep(Duration::from_millis(130)).await;
        h.presence.heartbeat(user).await.unwrap();
        assert!(!h.presence.status_of(user).await.unwrap().online);
    }

    #[tokio::test]
    async fn test_typing_flag_expires_on_its_own() {
        let h = harness(Duration::from_secs(300), Duration::from_millis(60));
        let conversation = Uuid::new_v4();
        let typist = Uuid::new_v4();
        let receiver = Uuid::new_v4();

        h.presence.typing_start(conversation, typist, receiver).await.unwrap();
        assert!(h.presence.is_typing(conversation, typist).await.unwrap());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!h.presence.is_typing(conversation, typist).await.unwrap());
    }

    #[tokio::test]
    async fn test_typing_events_reach_the_other_participant() {
        let h = harness(Duration::from_secs(300), Duration::from_secs(5));
        let conversation = Uuid::new_v4();
        let typist = Uuid::new_v4();
        let receiver = Uuid::new_v4();

        h.presence.typing_start(conversation, typist, receiver).await.unwrap();
        h.presence.typing_stop(conversation, typist, receiver).await.unwrap();

        assert!(!h.presence.is_typing(conversation, typist).await.unwrap());
        assert!(matches!(
            h.fanout.user_events_for(receiver)[..],
            [ServerEvent::UserTyping { .. }, ServerEvent::UserStoppedTyping { .. }]
        ));
        assert!(h.fanout.user_events_for(typist).is_empty());
    }

    #[tokio::test]
    async fn test_statuses_follow_input_order() {
        let h = harness(Duration::from_secs(300), Duration::from_secs(5));
        let online = Uuid::new_v4();
        let offline = Uuid::new_v4();
        h.presence.connect(online, Uuid::new_v4()).await.unwrap();

        let statuses = h.presence.statuses(&[offline, online]).await.unwrap();

        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].user_id, offline);
        assert!(!statuses[0].online);
        assert_eq!(statuses[1].user_id, online);
        assert!(statuses[1].online);
    }
}

//! Local cache synchronizer (stale-while-revalidate).
//!
//! Opening a conversation renders straight from the durable cache for a
//! zero-latency first paint while a full authoritative fetch runs in the
//! background; when the fetch completes, its list replaces the rendered
//! one and the cache is rewritten. Replacement never merges. This is also
//! how a client that was offline during a send discovers what it missed,
//! since push delivery has no replay backlog.

use tracing::debug;

use courant_shared::message::Message;
use courant_shared::types::UserId;
use courant_store::Database;

use crate::error::Result;

pub struct CacheSynchronizer {
    viewer: UserId,
    db: Database,
}

impl CacheSynchronizer {
    pub fn new(viewer: UserId, db: Database) -> Self {
        Self { viewer, db }
    }

    /// Step (a): the cached list, possibly stale, possibly empty.
    pub fn render(&self, counterpart: UserId) -> Result<Vec<Message>> {
        let cached = self.db.load_conversation(self.viewer, counterpart)?;
        debug!(
            counterpart = %counterpart.short(),
            cached = cached.len(),
            "rendering conversation from cache"
        );
        Ok(cached)
    }

    /// Step (c): the authoritative fetch finished; rewrite the cache with
    /// the list that just replaced the rendered one.
    pub fn commit(&mut self, counterpart: UserId, messages: &[Message]) -> Result<()> {
        self.db
            .replace_conversation(self.viewer, counterpart, messages)?;
        debug!(
            counterpart = %counterpart.short(),
            messages = messages.len(),
            "cache rewritten from authoritative fetch"
        );
        Ok(())
    }

    /// Explicit clear-conversation operation; the only physical removal.
    pub fn clear(&mut self, counterpart: UserId) -> Result<usize> {
        Ok(self.db.clear_conversation(self.viewer, counterpart)?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use courant_shared::message::{MessageContent, MessageStatus};
    use courant_shared::types::{CorrelationId, MessageId};

    use super::*;

    fn message(sender: UserId, receiver: UserId, body: &str) -> Message {
        Message {
            id: MessageId::new(),
            correlation_id: CorrelationId::new(),
            sender,
            receiver,
            content: MessageContent::Text(body.into()),
            reply_to: None,
            reactions: BTreeMap::new(),
            is_deleted: false,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            delivered_at: None,
            read_at: None,
        }
    }

    #[test]
    fn test_commit_then_render_round_trips() {
        let viewer = UserId::new();
        let counterpart = UserId::new();
        let mut sync =
            CacheSynchronizer::new(viewer, Database::open_in_memory().unwrap());

        let fetched = vec![
            message(viewer, counterpart, "un"),
            message(counterpart, viewer, "deux"),
        ];
        sync.commit(counterpart, &fetched).unwrap();

        let rendered = sync.render(counterpart).unwrap();
        assert_eq!(
            rendered.iter().map(|m| m.id).collect::<Vec<_>>(),
            fetched.iter().map(|m| m.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_fresh_fetch_replaces_stale_cache() {
        let viewer = UserId::new();
        let counterpart = UserId::new();
        let mut sync =
            CacheSynchronizer::new(viewer, Database::open_in_memory().unwrap());

        sync.commit(counterpart, &[message(viewer, counterpart, "périmé")])
            .unwrap();
        let fresh = vec![message(counterpart, viewer, "frais")];
        sync.commit(counterpart, &fresh).unwrap();

        let rendered = sync.render(counterpart).unwrap();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].id, fresh[0].id);
    }

    #[test]
    fn test_clear_empties_the_thread() {
        let viewer = UserId::new();
        let counterpart = UserId::new();
        let mut sync =
            CacheSynchronizer::new(viewer, Database::open_in_memory().unwrap());

        sync.commit(counterpart, &[message(viewer, counterpart, "x")])
            .unwrap();
        assert_eq!(sync.clear(counterpart).unwrap(), 1);
        assert!(sync.render(counterpart).unwrap().is_empty());
    }
}

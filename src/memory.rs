//! Session storage: conversation history that outlives a single run.
//!
//! A runner configured with a session prepends the stored items to each run's
//! input and, when the run succeeds, appends the input and every new item.
//! Failed runs store nothing.

use async_trait::async_trait;
use std::fmt::Debug;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::items::ConversationItem;

/// Defines the interface for session storage implementations.
#[async_trait]
pub trait Session: Send + Sync + Debug {
    /// Returns the unique identifier for the session.
    fn session_id(&self) -> &str;

    /// Stored items in order; with a limit, only the most recent `limit` items.
    async fn get_items(&self, limit: Option<usize>) -> Result<Vec<ConversationItem>>;

    /// Appends items in order.
    async fn add_items(&self, items: Vec<ConversationItem>) -> Result<()>;

    /// Removes and returns the most recent item.
    async fn pop_item(&self) -> Result<Option<ConversationItem>>;

    /// Clears all items from the session, effectively resetting the conversation.
    async fn clear_session(&self) -> Result<()>;
}

/// Session kept in process memory.
#[derive(Debug)]
pub struct MemorySession {
    session_id: String,
    items: Mutex<Vec<ConversationItem>>,
}

impl MemorySession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            items: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn get_items(&self, limit: Option<usize>) -> Result<Vec<ConversationItem>> {
        let items = self.items.lock().await;
        let skip = limit.map(|n| items.len().saturating_sub(n)).unwrap_or(0);
        Ok(items[skip..].to_vec())
    }

    async fn add_items(&self, items: Vec<ConversationItem>) -> Result<()> {
        self.items.lock().await.extend(items);
        Ok(())
    }

    async fn pop_item(&self) -> Result<Option<ConversationItem>> {
        Ok(self.items.lock().await.pop())
    }

    async fn clear_session(&self) -> Result<()> {
        self.items.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_session_roundtrip() {
        let session = MemorySession::new("chat");
        session
            .add_items(vec![
                ConversationItem::user("one"),
                ConversationItem::agent_text("bot", "two"),
                ConversationItem::user("three"),
            ])
            .await
            .unwrap();

        assert_eq!(session.get_items(None).await.unwrap().len(), 3);
        assert_eq!(
            session.get_items(Some(2)).await.unwrap()[0],
            ConversationItem::agent_text("bot", "two")
        );
        assert_eq!(session.get_items(Some(10)).await.unwrap().len(), 3);

        assert_eq!(
            session.pop_item().await.unwrap(),
            Some(ConversationItem::user("three"))
        );
        session.clear_session().await.unwrap();
        assert!(session.get_items(None).await.unwrap().is_empty());
        assert_eq!(session.pop_item().await.unwrap(), None);
    }
}

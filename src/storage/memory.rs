//! In-process conversation store. Contents live as long as the server.

use crate::storage::{
    Conversation, ConversationStore, Message, MonotonicClock, NewMessage, StorageError,
    DEFAULT_TITLE,
};
use ahash::AHashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: RwLock<AHashMap<String, Conversation>>,
    messages: RwLock<AHashMap<String, Vec<Message>>>,
    clock: MonotonicClock,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for MemoryStore {
    fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, StorageError> {
        let now = self.clock.now()?;
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.unwrap_or(DEFAULT_TITLE).to_string(),
            created_at: now,
            updated_at: now,
        };

        self.conversations
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .insert(conversation.id.clone(), conversation.clone());

        Ok(conversation)
    }

    fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StorageError> {
        let conversations = self.conversations.read().map_err(|_| StorageError::Poisoned)?;

        let mut owned: Vec<Conversation> = conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        Ok(owned)
    }

    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StorageError> {
        let conversations = self.conversations.read().map_err(|_| StorageError::Poisoned)?;
        Ok(conversations.get(id).cloned())
    }

    fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation, StorageError> {
        let mut conversations = self.conversations.write().map_err(|_| StorageError::Poisoned)?;
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| StorageError::ConversationNotFound(id.to_string()))?;

        conversation.title = title.to_string();
        conversation.updated_at = self.clock.now()?;

        Ok(conversation.clone())
    }

    fn delete_conversation(&self, id: &str) -> Result<(), StorageError> {
        let mut conversations = self.conversations.write().map_err(|_| StorageError::Poisoned)?;
        if conversations.remove(id).is_none() {
            return Err(StorageError::ConversationNotFound(id.to_string()));
        }

        self.messages
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .remove(id);

        Ok(())
    }

    fn append_message(&self, message: NewMessage) -> Result<Message, StorageError> {
        let mut conversations = self.conversations.write().map_err(|_| StorageError::Poisoned)?;
        let now = self.clock.now()?;

        let stored = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: message.conversation_id,
            user_id: message.user_id,
            question: message.question,
            answer: message.answer,
            confidence: message.confidence,
            created_at: now,
        };

        self.messages
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .entry(stored.conversation_id.clone())
            .or_default()
            .push(stored.clone());

        if let Some(conversation) = conversations.get_mut(&stored.conversation_id) {
            conversation.updated_at = now;
        }

        Ok(stored)
    }

    fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StorageError> {
        let messages = self.messages.read().map_err(|_| StorageError::Poisoned)?;
        Ok(messages.get(conversation_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(conversation_id: &str, question: &str) -> NewMessage {
        NewMessage {
            conversation_id: conversation_id.to_string(),
            user_id: "alice".to_string(),
            question: question.to_string(),
            answer: "Paris".to_string(),
            confidence: Some(12.5),
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = MemoryStore::new();
        let conversation = store.create_conversation("alice", None).unwrap();

        assert_eq!(conversation.title, DEFAULT_TITLE);
        assert_eq!(conversation.created_at, conversation.updated_at);
        assert_eq!(
            store.get_conversation(&conversation.id).unwrap(),
            Some(conversation)
        );
        assert_eq!(store.get_conversation("missing").unwrap(), None);
    }

    #[test]
    fn test_list_is_per_user_and_newest_first() {
        let store = MemoryStore::new();
        let first = store.create_conversation("alice", Some("first")).unwrap();
        let second = store.create_conversation("alice", Some("second")).unwrap();
        store.create_conversation("bob", Some("other")).unwrap();

        let titles: Vec<String> = store
            .list_conversations("alice")
            .unwrap()
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["second", "first"]);

        // A new message moves the older conversation back to the top
        store.append_message(message(&first.id, "q")).unwrap();
        let listed = store.list_conversations("alice").unwrap();
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }

    #[test]
    fn test_rename_bumps_updated_at() {
        let store = MemoryStore::new();
        let conversation = store.create_conversation("alice", None).unwrap();

        let renamed = store.rename_conversation(&conversation.id, "Capitals").unwrap();
        assert_eq!(renamed.title, "Capitals");
        assert!(renamed.updated_at > conversation.updated_at);
        assert_eq!(renamed.created_at, conversation.created_at);

        assert!(matches!(
            store.rename_conversation("missing", "x"),
            Err(StorageError::ConversationNotFound(_))
        ));
    }

    #[test]
    fn test_delete_removes_messages() {
        let store = MemoryStore::new();
        let conversation = store.create_conversation("alice", None).unwrap();
        store.append_message(message(&conversation.id, "q1")).unwrap();

        store.delete_conversation(&conversation.id).unwrap();

        assert!(store.list_messages(&conversation.id).unwrap().is_empty());
        assert!(store.list_conversations("alice").unwrap().is_empty());
        assert!(matches!(
            store.delete_conversation(&conversation.id),
            Err(StorageError::ConversationNotFound(_))
        ));
    }

    #[test]
    fn test_messages_oldest_first() {
        let store = MemoryStore::new();
        let conversation = store.create_conversation("alice", None).unwrap();

        store.append_message(message(&conversation.id, "q1")).unwrap();
        store.append_message(message(&conversation.id, "q2")).unwrap();

        let questions: Vec<String> = store
            .list_messages(&conversation.id)
            .unwrap()
            .into_iter()
            .map(|m| m.question)
            .collect();
        assert_eq!(questions, vec!["q1", "q2"]);
    }

    #[test]
    fn test_message_for_unknown_conversation_is_kept() {
        let store = MemoryStore::new();
        let stored = store.append_message(message("detached", "q")).unwrap();

        assert_eq!(store.list_messages("detached").unwrap(), vec![stored]);
        assert!(store.list_messages("never-used").unwrap().is_empty());
    }
}

//! Short-term conversation memory.
//!
//! A sliding window of recent turns per session that feeds the
//! conversational prompt. The durable message log lives in the Session
//! Store; a missing buffer is rebuilt from it.

use crate::llm::ChatMessage;
use crate::session::StoredMessage;
use dashmap::DashMap;
use std::collections::VecDeque;

/// Type of memory item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryItemType {
    UserMessage,
    AgentResponse,
}

impl MemoryItemType {
    fn role(&self) -> &'static str {
        match self {
            MemoryItemType::UserMessage => "user",
            MemoryItemType::AgentResponse => "assistant",
        }
    }
}

/// A single item in the memory buffer
#[derive(Debug, Clone)]
pub struct MemoryItem {
    pub item_type: MemoryItemType,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl MemoryItem {
    pub fn new(item_type: MemoryItemType, content: impl Into<String>) -> Self {
        Self {
            item_type,
            content: content.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Sliding window of recent items
#[derive(Debug, Clone)]
pub struct MemoryBuffer {
    max_items: usize,
    items: VecDeque<MemoryItem>,
}

impl Default for MemoryBuffer {
    fn default() -> Self {
        Self::new(20)
    }
}

impl MemoryBuffer {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items,
            items: VecDeque::with_capacity(max_items),
        }
    }

    /// Rebuild from the tail of a durable log
    pub fn from_log(messages: &[StoredMessage], max_items: usize) -> Self {
        let mut buffer = Self::new(max_items);
        for m in messages {
            match m.role.as_str() {
                "user" => buffer.add_user_message(&m.content),
                "assistant" => buffer.add_agent_response(&m.content),
                _ => {}
            }
        }
        buffer
    }

    pub fn add_user_message(&mut self, content: &str) {
        self.add(MemoryItem::new(MemoryItemType::UserMessage, content));
    }

    pub fn add_agent_response(&mut self, content: &str) {
        self.add(MemoryItem::new(MemoryItemType::AgentResponse, content));
    }

    fn add(&mut self, item: MemoryItem) {
        if self.max_items == 0 {
            return;
        }
        if self.items.len() >= self.max_items {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Most recent `n` items, oldest first, as chat history
    pub fn history(&self, n: usize) -> Vec<ChatMessage> {
        let skip = self.items.len().saturating_sub(n);
        self.items
            .iter()
            .skip(skip)
            .map(|item| ChatMessage::new(item.item_type.role(), item.content.clone()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Per-session buffers
#[derive(Debug)]
pub struct ConversationMemory {
    buffers: DashMap<String, MemoryBuffer>,
    max_items: usize,
}

impl ConversationMemory {
    /// `exchanges` user/assistant pairs are kept per session
    pub fn new(exchanges: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            max_items: exchanges * 2,
        }
    }

    /// History for the prompt, rebuilding from `log` if this session has no buffer
    pub fn history(&self, session_id: &str, log: &[StoredMessage]) -> Vec<ChatMessage> {
        let buffer = self
            .buffers
            .entry(session_id.to_string())
            .or_insert_with(|| MemoryBuffer::from_log(log, self.max_items));
        buffer.history(self.max_items)
    }

    pub fn add_user_message(&self, session_id: &str, content: &str) {
        self.buffers
            .entry(session_id.to_string())
            .or_insert_with(|| MemoryBuffer::new(self.max_items))
            .add_user_message(content);
    }

    pub fn add_agent_response(&self, session_id: &str, content: &str) {
        self.buffers
            .entry(session_id.to_string())
            .or_insert_with(|| MemoryBuffer::new(self.max_items))
            .add_agent_response(content);
    }

    /// Replace the buffer with the tail of `log`
    pub fn refresh(&self, session_id: &str, log: &[StoredMessage]) {
        self.buffers.insert(
            session_id.to_string(),
            MemoryBuffer::from_log(log, self.max_items),
        );
    }

    pub fn remove(&self, session_id: &str) {
        self.buffers.remove(session_id);
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.buffers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_buffer_overflow() {
        let mut buffer = MemoryBuffer::new(3);
        buffer.add_user_message("1");
        buffer.add_agent_response("2");
        buffer.add_user_message("3");
        buffer.add_agent_response("4");

        assert_eq!(buffer.len(), 3);
        let history = buffer.history(10);
        assert_eq!(history[0].content, "2");
        assert_eq!(history[2].role, "assistant");
    }

    #[test]
    fn test_history_tail() {
        let mut buffer = MemoryBuffer::new(10);
        for i in 0..6 {
            buffer.add_user_message(&i.to_string());
        }
        let history = buffer.history(2);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "4");
        assert_eq!(history[1].content, "5");
    }

    #[test]
    fn test_rebuild_from_log() {
        let memory = ConversationMemory::new(10);
        let log = vec![
            StoredMessage::user("Hello"),
            StoredMessage::assistant("Habari! How can I help?"),
        ];
        let history = memory.history("s1", &log);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, "assistant");

        // Existing buffer wins over the log
        assert_eq!(memory.history("s1", &[]).len(), 2);
        memory.remove("s1");
        assert!(memory.history("s1", &[]).is_empty());
    }
}

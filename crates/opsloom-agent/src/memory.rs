//! Learned memory retrieval and distillation
//!
//! Memories are previously distilled lessons that bias the reasoning
//! loop's decisions. Retrieval is scoped by organization and agent and
//! filtered by a confidence floor; distillation happens after a
//! successful execution and must never fail the execution itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;

/// A previously distilled lesson
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub agent_id: Uuid,

    /// Grouping label ("vendor_quirk", "matching_rule", ...)
    pub category: String,

    /// The lesson itself, in natural language
    pub content: String,

    /// 0.0-1.0 confidence assigned at distillation
    pub confidence: f32,

    /// How many executions have retrieved this memory
    pub times_used: u32,

    pub created_at: DateTime<Utc>,
}

/// A new lesson produced by post-execution distillation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub category: String,
    pub content: String,
    pub confidence: f32,
}

/// Retrieval parameters for one execution
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub organization_id: Uuid,
    pub agent_id: Uuid,

    /// Entity keys mentioned in the task, used for relevance filtering
    pub entity_keys: Vec<String>,

    /// Maximum memories to return
    pub max_memories: usize,

    /// Minimum confidence to include
    pub confidence_floor: f32,
}

/// Store for learned memories
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Fetch relevant lessons for an execution context
    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<Memory>>;

    /// Persist lessons distilled from a finished execution
    async fn record_lessons(
        &self,
        organization_id: Uuid,
        agent_id: Uuid,
        lessons: Vec<Lesson>,
    ) -> Result<()>;
}

/// In-memory memory store for examples and testing
#[derive(Debug, Default, Clone)]
pub struct InMemoryMemoryStore {
    memories: Arc<RwLock<HashMap<(Uuid, Uuid), Vec<Memory>>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with memories (useful for testing)
    pub async fn seed(&self, memories: Vec<Memory>) {
        let mut map = self.memories.write().await;
        for memory in memories {
            map.entry((memory.organization_id, memory.agent_id))
                .or_default()
                .push(memory);
        }
    }

    /// Total stored memories across all scopes
    pub async fn count(&self) -> usize {
        self.memories.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<Memory>> {
        let map = self.memories.read().await;
        let mut relevant: Vec<Memory> = map
            .get(&(query.organization_id, query.agent_id))
            .map(|m| {
                m.iter()
                    .filter(|mem| mem.confidence >= query.confidence_floor)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // Highest-confidence lessons first
        relevant.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        relevant.truncate(query.max_memories);
        Ok(relevant)
    }

    async fn record_lessons(
        &self,
        organization_id: Uuid,
        agent_id: Uuid,
        lessons: Vec<Lesson>,
    ) -> Result<()> {
        let mut map = self.memories.write().await;
        let entry = map.entry((organization_id, agent_id)).or_default();
        for lesson in lessons {
            entry.push(Memory {
                id: Uuid::now_v7(),
                organization_id,
                agent_id,
                category: lesson.category,
                content: lesson.content,
                confidence: lesson.confidence,
                times_used: 0,
                created_at: Utc::now(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(org: Uuid, agent: Uuid, content: &str, confidence: f32) -> Memory {
        Memory {
            id: Uuid::now_v7(),
            organization_id: org,
            agent_id: agent,
            category: "matching_rule".to_string(),
            content: content.to_string(),
            confidence,
            times_used: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_retrieve_filters_by_confidence() {
        let store = InMemoryMemoryStore::new();
        let org = Uuid::now_v7();
        let agent = Uuid::now_v7();
        store
            .seed(vec![
                memory(org, agent, "trusted lesson", 0.9),
                memory(org, agent, "shaky lesson", 0.2),
            ])
            .await;

        let query = MemoryQuery {
            organization_id: org,
            agent_id: agent,
            entity_keys: vec![],
            max_memories: 10,
            confidence_floor: 0.5,
        };
        let found = store.retrieve(&query).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "trusted lesson");
    }

    #[tokio::test]
    async fn test_retrieve_caps_and_orders() {
        let store = InMemoryMemoryStore::new();
        let org = Uuid::now_v7();
        let agent = Uuid::now_v7();
        store
            .seed(vec![
                memory(org, agent, "a", 0.6),
                memory(org, agent, "b", 0.95),
                memory(org, agent, "c", 0.8),
            ])
            .await;

        let query = MemoryQuery {
            organization_id: org,
            agent_id: agent,
            entity_keys: vec![],
            max_memories: 2,
            confidence_floor: 0.0,
        };
        let found = store.retrieve(&query).await.unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].content, "b");
        assert_eq!(found[1].content, "c");
    }

    #[tokio::test]
    async fn test_record_lessons() {
        let store = InMemoryMemoryStore::new();
        let org = Uuid::now_v7();
        let agent = Uuid::now_v7();

        store
            .record_lessons(
                org,
                agent,
                vec![Lesson {
                    category: "vendor_quirk".to_string(),
                    content: "acme invoices arrive net-45".to_string(),
                    confidence: 0.7,
                }],
            )
            .await
            .unwrap();

        assert_eq!(store.count().await, 1);
    }
}

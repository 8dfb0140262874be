//! Per-contact conversation memory and cross-contact similarity search.

use crate::{format_ts, parse_ts, StoreError};
use parley_types::{normalize_phone, ConversationMemory, SimilarMemory};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Cosine similarity of two vectors. Mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn map_row_to_memory(row: &Row) -> rusqlite::Result<MemoryRow> {
    Ok(MemoryRow {
        tenant_id: row.get(0)?,
        contact_phone: row.get(1)?,
        config_id: row.get(2)?,
        contact_name: row.get(3)?,
        summary: row.get(4)?,
        topics_json: row.get(5)?,
        interaction_count: row.get(6)?,
        embedding_json: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

struct MemoryRow {
    tenant_id: String,
    contact_phone: String,
    config_id: String,
    contact_name: Option<String>,
    summary: Option<String>,
    topics_json: String,
    interaction_count: u32,
    embedding_json: Option<String>,
    updated_at: String,
}

impl MemoryRow {
    fn into_memory(self) -> Result<ConversationMemory, StoreError> {
        Ok(ConversationMemory {
            tenant_id: self.tenant_id,
            contact_phone: self.contact_phone,
            config_id: self.config_id,
            contact_name: self.contact_name,
            summary: self.summary,
            topics: serde_json::from_str(&self.topics_json)?,
            interaction_count: self.interaction_count,
            embedding: self
                .embedding_json
                .map(|e| serde_json::from_str(&e))
                .transpose()?,
            updated_at: parse_ts("conversation_memories.updated_at", &self.updated_at)?,
        })
    }
}

const MEMORY_COLUMNS: &str = "tenant_id, contact_phone, config_id, contact_name, summary, \
     topics_json, interaction_count, embedding_json, updated_at";

pub fn conversation_memory(
    conn: &Connection,
    tenant_id: &str,
    contact_phone: &str,
    config_id: &str,
) -> Result<Option<ConversationMemory>, StoreError> {
    conn.query_row(
        &format!(
            "SELECT {MEMORY_COLUMNS} FROM conversation_memories
             WHERE tenant_id = ?1 AND contact_phone = ?2 AND config_id = ?3"
        ),
        params![tenant_id, normalize_phone(contact_phone), config_id],
        map_row_to_memory,
    )
    .optional()?
    .map(MemoryRow::into_memory)
    .transpose()
}

/// Inserts or replaces the memory keyed by tenant, phone and configuration.
pub fn save_conversation_memory(
    conn: &Connection,
    memory: &ConversationMemory,
) -> Result<(), StoreError> {
    let embedding = memory
        .embedding
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO conversation_memories (
            tenant_id, contact_phone, config_id, contact_name, summary,
            topics_json, interaction_count, embedding_json, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(tenant_id, contact_phone, config_id) DO UPDATE SET
            contact_name = excluded.contact_name,
            summary = excluded.summary,
            topics_json = excluded.topics_json,
            interaction_count = excluded.interaction_count,
            embedding_json = excluded.embedding_json,
            updated_at = excluded.updated_at",
        params![
            memory.tenant_id,
            normalize_phone(&memory.contact_phone),
            memory.config_id,
            memory.contact_name,
            memory.summary,
            serde_json::to_string(&memory.topics)?,
            memory.interaction_count,
            embedding,
            format_ts(memory.updated_at),
        ],
    )?;
    Ok(())
}

/// Other contacts of the same configuration whose embedding scores at least
/// `threshold` against `embedding`, best first.
pub fn similar_memories(
    conn: &Connection,
    tenant_id: &str,
    config_id: &str,
    embedding: &[f32],
    exclude_phone: &str,
    threshold: f32,
    limit: usize,
) -> Result<Vec<SimilarMemory>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMORY_COLUMNS} FROM conversation_memories
         WHERE tenant_id = ?1 AND config_id = ?2 AND contact_phone != ?3
           AND embedding_json IS NOT NULL"
    ))?;
    let rows = stmt.query_map(
        params![tenant_id, config_id, normalize_phone(exclude_phone)],
        map_row_to_memory,
    )?;

    let mut scored = Vec::new();
    for row in rows {
        let memory = row?.into_memory()?;
        let Some(stored) = memory.embedding.as_deref() else {
            continue;
        };
        let similarity = cosine_similarity(embedding, stored);
        if similarity >= threshold {
            scored.push(SimilarMemory {
                contact_name: memory.contact_name,
                contact_phone: memory.contact_phone,
                summary: memory.summary,
                topics: memory.topics,
                similarity: similarity.clamp(0.0, 1.0),
            });
        }
    }

    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(limit);
    Ok(scored)
}

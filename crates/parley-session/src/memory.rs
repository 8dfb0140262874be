//! Long-term memory of a counterpart: loading it into a call and merging a
//! finished call into it.

use crate::settings::SessionSettings;
use crate::tasks;
use crate::Services;
use chrono::{DateTime, Utc};
use parley_types::{normalize_phone, ConversationMemory, PortError, SimilarMemory, TenantConfig};

/// Merges topic lists, keeping first occurrences, capped at `max`.
pub fn merge_topics(existing: &[String], new: &[String], max: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for topic in existing.iter().chain(new) {
        let topic = topic.trim();
        if topic.is_empty() || merged.iter().any(|t| t.eq_ignore_ascii_case(topic)) {
            continue;
        }
        merged.push(topic.to_string());
        if merged.len() == max {
            break;
        }
    }
    merged
}

fn embedding_text(summary: &str, topics: &[String]) -> String {
    if topics.is_empty() {
        summary.to_string()
    } else {
        format!("{summary}\nTopics: {}", topics.join(", "))
    }
}

/// Memory context injected into the instructions of a call.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub memory: Option<ConversationMemory>,
    pub similar: Vec<SimilarMemory>,
}

/// Loads the counterpart's memory and, with semantic memory on, memories of
/// other counterparts similar to it. Failures leave the context empty.
pub async fn load_context(
    services: &Services,
    config: &TenantConfig,
    counterpart_phone: Option<&str>,
) -> MemoryContext {
    let mut ctx = MemoryContext::default();
    if !config.memory.enabled && !config.semantic_memory.enabled {
        return ctx;
    }
    let Some(phone) = counterpart_phone.map(normalize_phone) else {
        return ctx;
    };

    match services
        .store
        .conversation_memory(&config.tenant_id, &phone, &config.id)
        .await
    {
        Ok(memory) => ctx.memory = memory,
        Err(e) => {
            tracing::warn!(tenant_id = %config.tenant_id, error = %e, "memory lookup failed");
            return ctx;
        }
    }

    if !config.semantic_memory.enabled {
        return ctx;
    }
    let Some(current) = ctx.memory.as_ref() else {
        return ctx;
    };
    let Some(summary) = current.summary.as_deref().filter(|s| !s.is_empty()) else {
        return ctx;
    };

    let embedding = match current.embedding.clone() {
        Some(v) if !v.is_empty() => v,
        _ => match services
            .engine
            .embed(&embedding_text(summary, &current.topics))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embedding for similarity search failed");
                return ctx;
            }
        },
    };

    match services
        .store
        .similar_memories(
            &config.tenant_id,
            &config.id,
            &embedding,
            &phone,
            config.semantic_memory.similarity_threshold,
            config.semantic_memory.max_results,
        )
        .await
    {
        Ok(similar) => {
            ctx.similar = similar
                .into_iter()
                .filter(|m| normalize_phone(&m.contact_phone) != phone)
                .collect();
        }
        Err(e) => tracing::warn!(error = %e, "similar memory lookup failed"),
    }
    ctx
}

/// Folds a finished call's summary into the counterpart's memory.
pub async fn update(
    services: &Services,
    settings: &SessionSettings,
    config: &TenantConfig,
    counterpart_phone: &str,
    summary: &str,
    now: DateTime<Utc>,
) -> Result<ConversationMemory, PortError> {
    let phone = normalize_phone(counterpart_phone);
    let existing = services
        .store
        .conversation_memory(&config.tenant_id, &phone, &config.id)
        .await?;

    let new_topics = match tasks::topics(services.engine.as_ref(), summary).await {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "topic extraction failed");
            Vec::new()
        }
    };

    let mut memory = existing.unwrap_or_else(|| ConversationMemory {
        tenant_id: config.tenant_id.clone(),
        contact_phone: phone.clone(),
        config_id: config.id.clone(),
        contact_name: None,
        summary: None,
        topics: Vec::new(),
        interaction_count: 0,
        embedding: None,
        updated_at: now,
    });

    memory.topics = merge_topics(&memory.topics, &new_topics, settings.max_topics);
    memory.summary = Some(match memory.summary.as_deref().filter(|s| !s.is_empty()) {
        Some(previous) => {
            match tasks::merge_summaries(services.engine.as_ref(), previous, summary).await {
                Ok(merged) => merged,
                Err(e) => {
                    tracing::warn!(error = %e, "summary merge failed, keeping latest");
                    summary.to_string()
                }
            }
        }
        None => summary.to_string(),
    });
    memory.interaction_count += 1;
    memory.updated_at = now;

    if config.semantic_memory.enabled {
        let text = embedding_text(memory.summary.as_deref().unwrap_or(summary), &memory.topics);
        match services.engine.embed(&text).await {
            Ok(v) => memory.embedding = Some(v),
            Err(e) => tracing::warn!(error = %e, "embedding refresh failed"),
        }
    }

    services.store.save_conversation_memory(&memory).await?;
    Ok(memory)
}

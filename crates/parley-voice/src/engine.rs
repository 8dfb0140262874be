//! Conversation engine adapter.
//!
//! Live sessions run in an external media pipeline that joins the room as
//! the agent and streams speech through recognition, the language model and
//! synthesis. This adapter drives it over its HTTP control API. Transcript
//! and speech events come back through the worker's event endpoint, not
//! through this adapter.
//!
//! One-shot generation (summaries, redaction, extraction) and embeddings go
//! straight to an OpenAI-compatible API.

use crate::config::{EngineConfig, LiveKitConfig};
use crate::error::VoiceError;
use crate::room::agent_token;
use crate::check_status;
use async_trait::async_trait;
use parley_types::{ConversationEngine, EngineSession, PortError};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Serialize)]
struct StartRequest<'a> {
    #[serde(flatten)]
    session: &'a EngineSession,
    livekit_url: &'a str,
    token: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct PipelineEngine {
    config: EngineConfig,
    livekit: LiveKitConfig,
    client: Client,
}

impl PipelineEngine {
    pub fn new(config: EngineConfig, livekit: LiveKitConfig) -> Result<Self, VoiceError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            config,
            livekit,
            client,
        })
    }

    fn endpoint(base: &str, segments: &[&str]) -> Result<Url, VoiceError> {
        let mut url = Url::parse(base)
            .map_err(|e| VoiceError::Config(format!("invalid base url {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| VoiceError::Config(format!("base url cannot carry a path: {base}")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn control(&self, segments: &[&str]) -> Result<Url, VoiceError> {
        Self::endpoint(&self.config.control_url, segments)
    }

    async fn post_control(
        &self,
        segments: &[&str],
        body: &serde_json::Value,
    ) -> Result<(), VoiceError> {
        let response = self
            .client
            .post(self.control(segments)?)
            .json(body)
            .send()
            .await?;
        check_status("media pipeline", response).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationEngine for PipelineEngine {
    async fn start_session(&self, session: &EngineSession) -> Result<(), PortError> {
        let request = StartRequest {
            session,
            livekit_url: &self.livekit.url,
            token: agent_token(&self.livekit, &session.room_name)?,
        };
        let response = self
            .client
            .post(self.control(&["sessions"])?)
            .json(&request)
            .send()
            .await
            .map_err(VoiceError::from)?;
        check_status("media pipeline", response).await?;
        tracing::info!(
            room = %session.room_name,
            capabilities = session.capabilities.len(),
            auto_reply = session.auto_reply,
            "engine session started"
        );
        Ok(())
    }

    async fn update_instructions(&self, room: &str, instructions: &str) -> Result<(), PortError> {
        self.post_control(
            &["sessions", room, "instructions"],
            &json!({ "instructions": instructions }),
        )
        .await?;
        Ok(())
    }

    async fn set_auto_reply(&self, room: &str, enabled: bool) -> Result<(), PortError> {
        self.post_control(
            &["sessions", room, "auto-reply"],
            &json!({ "enabled": enabled }),
        )
        .await?;
        Ok(())
    }

    async fn stop_session(&self, room: &str) -> Result<(), PortError> {
        let response = self
            .client
            .delete(self.control(&["sessions", room])?)
            .send()
            .await
            .map_err(VoiceError::from)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(room, "engine session already gone");
            return Ok(());
        }
        check_status("media pipeline", response).await?;
        Ok(())
    }

    async fn prewarm(&self) -> Result<(), PortError> {
        self.post_control(&["prewarm"], &json!({})).await?;
        Ok(())
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, PortError> {
        let body = json!({
            "model": self.config.text_model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.2,
        });
        let response = self
            .client
            .post(Self::endpoint(&self.config.api_base, &["chat", "completions"])?)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(VoiceError::from)?;
        let parsed: ChatResponse = check_status("language model", response)
            .await?
            .json()
            .await
            .map_err(VoiceError::from)?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                VoiceError::Decode {
                    service: "language model",
                    detail: "no completion content".to_string(),
                }
                .into()
            })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PortError> {
        let body = json!({ "model": self.config.embedding_model, "input": text });
        let response = self
            .client
            .post(Self::endpoint(&self.config.api_base, &["embeddings"])?)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(VoiceError::from)?;
        let parsed: EmbeddingResponse = check_status("embeddings", response)
            .await?
            .json()
            .await
            .map_err(VoiceError::from)?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                VoiceError::Decode {
                    service: "embeddings",
                    detail: "no embedding returned".to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_escapes_room_names() {
        let url = PipelineEngine::endpoint("http://127.0.0.1:8081/", &["sessions", "room a/b"])
            .unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8081/sessions/room%20a%2Fb");

        let api = PipelineEngine::endpoint("https://api.openai.com/v1", &["embeddings"]).unwrap();
        assert_eq!(api.as_str(), "https://api.openai.com/v1/embeddings");
    }

    #[test]
    fn bad_base_url_is_a_config_error() {
        let err = PipelineEngine::endpoint("not a url", &["x"]).unwrap_err();
        assert!(matches!(err, VoiceError::Config(_)));
    }
}

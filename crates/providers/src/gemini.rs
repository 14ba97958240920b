//! Gemini backend over the Generative Language REST API.
//!
//! Streaming replies use `streamGenerateContent?alt=sse`; enrichment calls
//! use the one-shot `generateContent` endpoint, optionally constrained to a
//! JSON `responseSchema`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{GroundingChunk, HistoryEntry, Role};
use std::env;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::sse::SseParser;
use crate::{BackendError, GenerateRequest, ModelBackend, StreamEvent, ToolConfig};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const STREAM_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Serialize)]
struct WirePart {
    text: String,
}

#[derive(Debug, Serialize)]
struct WireContent {
    role: String,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool {
    google_search: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
}

#[derive(Debug, Deserialize)]
struct WireCandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCandidateContent {
    #[serde(default)]
    parts: Vec<WireCandidatePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireWebSource {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireGroundingChunk {
    #[serde(default)]
    web: Option<WireWebSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<WireGroundingChunk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireCandidateContent>,
    #[serde(default)]
    grounding_metadata: Option<WireGroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
}

pub struct GeminiClient {
    http: Client,
    auth_token: String,
    model: String,
}

impl GeminiClient {
    /// Build from the `GEMINI_API_KEY` environment variable.
    pub fn new(model: &str) -> Result<Self, BackendError> {
        let key = env::var("GEMINI_API_KEY")
            .map_err(|_| BackendError::SessionInit("GEMINI_API_KEY not set".to_string()))?;
        Self::from_key(model, &key)
    }

    pub fn from_key(model: &str, key: &str) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(45))
            .build()
            .map_err(|e| BackendError::SessionInit(e.to_string()))?;
        Ok(Self {
            http,
            auth_token: key.to_string(),
            model: model.to_string(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!(
            "{API_BASE}/{}:{method}?key={}",
            self.model, self.auth_token
        )
    }

    fn stream_url(&self) -> String {
        format!(
            "{API_BASE}/{}:streamGenerateContent?alt=sse&key={}",
            self.model, self.auth_token
        )
    }

    async fn post_oneshot(&self, request: &WireRequest) -> Result<WireResponse, BackendError> {
        let resp = self
            .http
            .post(self.url("generateContent"))
            .json(request)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BackendError::Stream(error_body(resp).await));
        }
        Ok(resp.json().await?)
    }
}

/// Map a conversation replay to the wire format. Error markers are local
/// bookkeeping and must not be replayed into the model's context.
fn wire_contents(history: &[HistoryEntry]) -> Vec<WireContent> {
    history
        .iter()
        .filter(|e| !e.is_error)
        .map(|e| WireContent {
            role: match e.role {
                Role::User => "user".to_string(),
                Role::Model => "model".to_string(),
            },
            parts: vec![WirePart {
                text: e.text.clone(),
            }],
        })
        .collect()
}

fn wire_tools(tools: ToolConfig) -> Option<Vec<WireTool>> {
    if tools.web_search {
        Some(vec![WireTool {
            google_search: Value::Object(Default::default()),
        }])
    } else {
        None
    }
}

fn wire_system_instruction(instruction: &Option<String>) -> Option<WireContent> {
    instruction
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| WireContent {
            role: "system".to_string(),
            parts: vec![WirePart {
                text: s.to_string(),
            }],
        })
}

fn user_prompt(prompt: &str) -> Vec<WireContent> {
    vec![WireContent {
        role: "user".to_string(),
        parts: vec![WirePart {
            text: prompt.to_string(),
        }],
    }]
}

/// Extract the text delta and the cumulative grounding set from one SSE
/// payload. Either may be absent.
fn parse_stream_payload(payload: &str) -> Result<(Option<String>, Vec<GroundingChunk>), BackendError> {
    let resp: WireResponse = serde_json::from_str(payload)
        .map_err(|e| BackendError::Stream(format!("bad stream payload: {e}")))?;
    let Some(candidate) = resp.candidates.into_iter().next() else {
        return Ok((None, Vec::new()));
    };
    let text = candidate.content.and_then(|c| {
        let joined: String = c.parts.into_iter().filter_map(|p| p.text).collect();
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    });
    let grounding = candidate
        .grounding_metadata
        .map(|m| {
            m.grounding_chunks
                .into_iter()
                .filter_map(|c| c.web)
                .map(|w| GroundingChunk {
                    uri: w.uri,
                    title: w.title,
                })
                .collect()
        })
        .unwrap_or_default();
    Ok((text, grounding))
}

async fn error_body(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        return format!("gemini error: {status}");
    }
    let mut body = body.to_string();
    if body.len() > 800 {
        let cut = (0..=800).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        body.truncate(cut);
        body.push_str("...");
    }
    format!("gemini error: {status}\n{body}")
}

fn first_candidate_text(resp: WireResponse) -> Option<String> {
    resp.candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
}

#[async_trait]
impl ModelBackend for GeminiClient {
    async fn open_stream(
        &self,
        request: GenerateRequest,
    ) -> Result<mpsc::Receiver<Result<StreamEvent, BackendError>>, BackendError> {
        let wire = WireRequest {
            contents: wire_contents(&request.history),
            system_instruction: wire_system_instruction(&request.system_instruction),
            tools: wire_tools(request.tools),
            generation_config: None,
        };
        tracing::debug!(model = %self.model, turns = wire.contents.len(), "opening reply stream");
        let resp = self.http.post(self.stream_url()).json(&wire).send().await?;
        if !resp.status().is_success() {
            return Err(BackendError::Stream(error_body(resp).await));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut body = resp.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(BackendError::Stream(e.to_string()))).await;
                        return;
                    }
                };
                for payload in parser.feed(&chunk) {
                    match parse_stream_payload(&payload) {
                        Ok((text, grounding)) => {
                            if let Some(delta) = text {
                                if tx.send(Ok(StreamEvent::TextDelta(delta))).await.is_err() {
                                    return;
                                }
                            }
                            if !grounding.is_empty()
                                && tx.send(Ok(StreamEvent::Grounding(grounding))).await.is_err()
                            {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, BackendError> {
        let wire = WireRequest {
            contents: user_prompt(prompt),
            system_instruction: None,
            tools: None,
            generation_config: None,
        };
        let resp = self.post_oneshot(&wire).await?;
        first_candidate_text(resp)
            .ok_or_else(|| BackendError::Stream("empty response".to_string()))
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: Value,
    ) -> Result<Value, BackendError> {
        let wire = WireRequest {
            contents: user_prompt(prompt),
            system_instruction: None,
            tools: None,
            generation_config: Some(WireGenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(schema),
            }),
        };
        let resp = self.post_oneshot(&wire).await?;
        let text = first_candidate_text(resp)
            .ok_or_else(|| BackendError::StructuredDecode("empty response".to_string()))?;
        serde_json::from_str(&text).map_err(|e| BackendError::StructuredDecode(e.to_string()))
    }
}

//! OpenAI-compatible adapter, shared by OpenAI and DeepSeek.

use assistant_protocol::chat::{ChatCompletionChunk, ChatCompletionRequest};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    initial_status, streaming::decode_upstream, ChatAdapter, ChunkDecoder, EventStream, Signal,
};
use crate::{
    history::{self, PreparedChat},
    routers::{
        error::{upstream_error_message, GatewayError},
        models::{Feature, ProviderFamily, ProviderModel},
        upstream,
    },
};

const DONE_SENTINEL: &str = "[DONE]";

pub struct OpenAiAdapter {
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub(crate) fn build_request(
        model: &ProviderModel,
        prepared: &PreparedChat,
    ) -> Result<ChatCompletionRequest, GatewayError> {
        Ok(ChatCompletionRequest {
            model: model.wire_model_name.clone(),
            messages: history::to_openai(prepared, model)?,
            stream: true,
            temperature: None,
        })
    }
}

#[async_trait]
impl ChatAdapter for OpenAiAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAiCompatible
    }

    fn supports_feature(&self, model: &ProviderModel, feature: Feature) -> bool {
        match feature {
            Feature::WebSearch => false,
            other => model.supports(other),
        }
    }

    async fn stream_chat(
        &self,
        model: &ProviderModel,
        prepared: &PreparedChat,
    ) -> Result<EventStream, GatewayError> {
        let request = Self::build_request(model, prepared)?;
        let url = format!("{}/chat/completions", model.base_url);
        debug!(
            provider = %model.provider,
            model = %model.wire_model_name,
            messages = request.messages.len(),
            "Opening OpenAI-compatible stream"
        );

        let builder = self
            .client
            .post(url)
            .bearer_auth(&model.api_key)
            .json(&request);
        let provider = model.provider.as_str();
        let response = upstream::send(builder, provider).await?;
        let response = upstream::ensure_success(response, provider).await?;

        Ok(decode_upstream(
            response,
            OpenAiDecoder,
            initial_status(prepared),
        ))
    }
}

/// Decodes `chat.completion.chunk` payloads up to the `[DONE]` sentinel.
pub(crate) struct OpenAiDecoder;

impl ChunkDecoder for OpenAiDecoder {
    fn decode(&mut self, data: &str) -> Result<Vec<Signal>, GatewayError> {
        if data.trim() == DONE_SENTINEL {
            return Ok(vec![Signal::Done]);
        }

        let value: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Dropping malformed stream line");
                return Ok(Vec::new());
            }
        };
        if value.get("error").is_some_and(|e| !e.is_null()) {
            return Err(GatewayError::upstream(format!(
                "Upstream stream error: {}",
                upstream_error_message(data)
            )));
        }

        let chunk: ChatCompletionChunk = match serde_json::from_value(value) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Dropping chunk with unexpected shape");
                return Ok(Vec::new());
            }
        };

        let mut signals = Vec::new();
        if let Some(delta) = chunk.first_delta() {
            if delta
                .reasoning_content
                .as_deref()
                .is_some_and(|r| !r.is_empty())
            {
                signals.push(Signal::Thinking);
            }
            if let Some(content) = &delta.content {
                signals.push(Signal::Text(content.clone()));
            }
        }
        Ok(signals)
    }
}

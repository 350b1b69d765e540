//! Native multimodal adapter (Gemini `streamGenerateContent`).

use assistant_protocol::google::{
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, ThinkingConfig, Tool,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{
    initial_status, streaming::decode_upstream, ChatAdapter, ChunkDecoder, EventStream, Signal,
};
use crate::{
    history::{self, PreparedChat},
    routers::{
        error::GatewayError,
        models::{Feature, ProviderFamily, ProviderModel},
        upstream,
    },
};

pub struct NativeAdapter {
    client: reqwest::Client,
}

impl NativeAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub(crate) fn build_request(model: &ProviderModel, prepared: &PreparedChat) -> GenerateContentRequest {
        let (contents, system_instruction) = history::to_native(prepared, model);
        let tools = if prepared.use_web_search {
            vec![Tool::google_search()]
        } else {
            Vec::new()
        };
        let generation_config = model.supports_thinking.then(|| GenerationConfig {
            thinking_config: Some(ThinkingConfig {
                include_thoughts: true,
            }),
            ..Default::default()
        });

        GenerateContentRequest {
            contents,
            system_instruction,
            tools,
            generation_config,
        }
    }
}

#[async_trait]
impl ChatAdapter for NativeAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::NativeMultimodal
    }

    fn supports_feature(&self, model: &ProviderModel, feature: Feature) -> bool {
        model.supports(feature)
    }

    async fn stream_chat(
        &self,
        model: &ProviderModel,
        prepared: &PreparedChat,
    ) -> Result<EventStream, GatewayError> {
        let request = Self::build_request(model, prepared);
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            model.base_url, model.wire_model_name
        );
        debug!(model = %model.wire_model_name, turns = request.contents.len(), "Opening native stream");

        let builder = self
            .client
            .post(url)
            .header("x-goog-api-key", &model.api_key)
            .json(&request);
        let provider = model.provider.as_str();
        let response = upstream::send(builder, provider).await?;
        let response = upstream::ensure_success(response, provider).await?;

        Ok(decode_upstream(
            response,
            NativeDecoder,
            initial_status(prepared),
        ))
    }
}

/// Decodes `GenerateContentResponse` chunks.
pub(crate) struct NativeDecoder;

impl ChunkDecoder for NativeDecoder {
    fn decode(&mut self, data: &str) -> Result<Vec<Signal>, GatewayError> {
        let chunk: GenerateContentResponse = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable native chunk");
                return Ok(Vec::new());
            }
        };

        let mut signals = Vec::new();
        for part in chunk.parts() {
            if part.is_thought() {
                signals.push(Signal::Thinking);
            } else if let Some(text) = &part.text {
                signals.push(Signal::Text(text.clone()));
            }
        }

        if let Some(candidate) = chunk.first_candidate() {
            if let Some(metadata) = candidate
                .grounding_metadata
                .as_ref()
                .or(candidate.citation_metadata.as_ref())
            {
                signals.push(Signal::Grounding(metadata.clone()));
            }
        }

        if let Some(reason) = chunk.block_reason() {
            return Err(GatewayError::ContentBlocked(format!(
                "The response was blocked by the provider ({reason})"
            )));
        }

        Ok(signals)
    }
}

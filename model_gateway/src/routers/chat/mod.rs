//! Streaming chat adapters
//!
//! One adapter per provider family. Each issues exactly one upstream request
//! and turns the provider's framing into upstream signals, which
//! [`streaming::EventNormalizer`] folds into the client event stream.

pub mod native;
pub mod openai;
pub mod streaming;

use std::{pin::Pin, sync::Arc};

use assistant_protocol::assistant::StreamEvent;
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use super::{
    error::GatewayError,
    models::{Feature, ProviderFamily, ProviderModel},
};
use crate::history::PreparedChat;

pub const STATUS_SEARCHING: &str = "Searching the web...";
pub const STATUS_ANALYZING: &str = "Analyzing attachments...";
pub const STATUS_THINKING: &str = "Thinking...";

/// Normalized events, ending early with an error if the upstream breaks.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, GatewayError>> + Send>>;

/// What a decoded upstream frame means, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Signal {
    Text(String),
    Thinking,
    Grounding(Value),
    Done,
}

/// Provider-specific decoding of one SSE `data:` payload.
pub(crate) trait ChunkDecoder: Send + 'static {
    fn decode(&mut self, data: &str) -> Result<Vec<Signal>, GatewayError>;
}

#[async_trait]
pub trait ChatAdapter: Send + Sync {
    fn family(&self) -> ProviderFamily;

    /// Whether this adapter can honor `feature` for `model`.
    fn supports_feature(&self, model: &ProviderModel, feature: Feature) -> bool;

    /// Issue the upstream request. Non-success statuses are returned as
    /// errors before any event is produced.
    async fn stream_chat(
        &self,
        model: &ProviderModel,
        prepared: &PreparedChat,
    ) -> Result<EventStream, GatewayError>;
}

pub fn adapter_for(family: ProviderFamily, client: reqwest::Client) -> Arc<dyn ChatAdapter> {
    match family {
        ProviderFamily::NativeMultimodal => Arc::new(native::NativeAdapter::new(client)),
        ProviderFamily::OpenAiCompatible => Arc::new(openai::OpenAiAdapter::new(client)),
    }
}

/// Reject requested features the adapter cannot honor, before any upstream call.
pub fn check_request(
    adapter: &dyn ChatAdapter,
    model: &ProviderModel,
    prepared: &PreparedChat,
) -> Result<(), GatewayError> {
    if prepared.use_web_search && !adapter.supports_feature(model, Feature::WebSearch) {
        return Err(GatewayError::validation(format!(
            "Web search is only available for Gemini models, not {}",
            model.requested_name
        )));
    }
    if prepared.attachments.has_images() && !adapter.supports_feature(model, Feature::ImageInput) {
        return Err(GatewayError::validation(format!(
            "Model {} does not accept image attachments",
            model.requested_name
        )));
    }
    Ok(())
}

/// Status announced before any upstream byte, if the request warrants one.
pub(crate) fn initial_status(prepared: &PreparedChat) -> Option<&'static str> {
    if prepared.use_web_search {
        Some(STATUS_SEARCHING)
    } else if !prepared.attachments.is_empty() {
        Some(STATUS_ANALYZING)
    } else {
        None
    }
}

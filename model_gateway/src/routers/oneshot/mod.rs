//! Non-streaming adapters: image generation and editing, speech synthesis
//! and translation. Each is one upstream request and one JSON response.

pub mod images;
pub mod speech;
pub mod translate;

use assistant_protocol::google::{GenerateContentRequest, GenerateContentResponse};

use super::{error::GatewayError, upstream};
use crate::config::ProviderEndpoint;

const NATIVE_PROVIDER: &str = "gemini";

/// API key of an endpoint, or a `ConfigurationError` naming the service.
pub(crate) fn require_key<'a>(endpoint: &'a ProviderEndpoint, service: &str) -> Result<&'a str, GatewayError> {
    endpoint
        .api_key
        .as_deref()
        .ok_or_else(|| GatewayError::configuration(format!("{service} API key is not configured")))
}

/// One native `generateContent` call, with safety blocks surfaced as
/// `ContentBlocked`.
pub(crate) async fn generate_content(
    http: &reqwest::Client,
    endpoint: &ProviderEndpoint,
    model: &str,
    request: &GenerateContentRequest,
) -> Result<GenerateContentResponse, GatewayError> {
    let key = require_key(endpoint, "Gemini")?;
    let url = format!("{}/v1beta/models/{model}:generateContent", endpoint.base_url);
    let builder = http.post(url).header("x-goog-api-key", key).json(request);

    let response: GenerateContentResponse = upstream::execute_json(builder, NATIVE_PROVIDER).await?;
    if let Some(reason) = response.block_reason() {
        return Err(GatewayError::ContentBlocked(format!(
            "The request was blocked by the provider's safety filters ({reason})"
        )));
    }
    Ok(response)
}

/// Concatenated non-thought text of the first candidate.
pub(crate) fn response_text(response: &GenerateContentResponse) -> String {
    response
        .parts()
        .iter()
        .filter(|p| !p.is_thought())
        .filter_map(|p| p.text.as_deref())
        .collect()
}

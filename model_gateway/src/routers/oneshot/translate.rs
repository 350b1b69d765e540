use assistant_protocol::{
    assistant::{TranslatePayload, TranslationResponse},
    google::{Content, GenerateContentRequest, GenerationConfig, Part},
};

use super::{generate_content, response_text};
use crate::{
    config::{ModelsConfig, ProvidersConfig},
    routers::error::GatewayError,
};

pub(crate) fn instruction(target: &str, source: Option<&str>) -> String {
    let from = match source.map(str::trim).filter(|s| !s.is_empty()) {
        Some(source) => format!(" from {source}"),
        None => String::new(),
    };
    format!(
        "Translate the user's text{from} into {}. Reply with the translation only, \
         without explanations, notes or quotation marks.",
        target.trim()
    )
}

pub async fn translate(
    http: &reqwest::Client,
    providers: &ProvidersConfig,
    models: &ModelsConfig,
    payload: &TranslatePayload,
) -> Result<TranslationResponse, GatewayError> {
    let request = GenerateContentRequest {
        contents: vec![Content::new("user", vec![Part::text(payload.text.as_str())])],
        system_instruction: Some(Content::instruction(instruction(
            &payload.target_language,
            payload.source_language.as_deref(),
        ))),
        generation_config: Some(GenerationConfig {
            temperature: Some(0.2),
            ..Default::default()
        }),
        ..Default::default()
    };

    let response =
        generate_content(http, &providers.gemini, &models.translation_model, &request).await?;
    let translated_text = response_text(&response).trim().to_string();
    if translated_text.is_empty() {
        return Err(GatewayError::upstream("gemini returned an empty translation"));
    }
    Ok(TranslationResponse { translated_text })
}

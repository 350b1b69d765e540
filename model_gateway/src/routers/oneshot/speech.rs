use assistant_protocol::{
    assistant::{SpeechPayload, SpeechResponse},
    google::{
        AudioConfig, SynthesisInput, SynthesizeSpeechRequest, SynthesizeSpeechResponse,
        VoiceSelection,
    },
};
use tracing::debug;

use super::require_key;
use crate::{
    config::{ModelsConfig, ProvidersConfig},
    routers::{error::GatewayError, upstream},
};

/// Input limit of the synthesis endpoint, in bytes.
const MAX_INPUT_BYTES: usize = 5000;

const MIN_RATE: f32 = 0.25;
const MAX_RATE: f32 = 4.0;

pub(crate) fn speaking_rate(speed: Option<f32>) -> f32 {
    match speed {
        Some(s) if s.is_finite() => s.clamp(MIN_RATE, MAX_RATE),
        _ => 1.0,
    }
}

pub async fn synthesize_speech(
    http: &reqwest::Client,
    providers: &ProvidersConfig,
    models: &ModelsConfig,
    payload: &SpeechPayload,
) -> Result<SpeechResponse, GatewayError> {
    let text = payload.text.trim();
    if text.len() > MAX_INPUT_BYTES {
        return Err(GatewayError::validation(format!(
            "text is too long for speech synthesis ({} bytes, limit {MAX_INPUT_BYTES})",
            text.len()
        )));
    }

    let endpoint = &providers.tts;
    let key = require_key(endpoint, "Text-to-speech")?;
    let request = SynthesizeSpeechRequest {
        input: SynthesisInput {
            text: text.to_string(),
        },
        voice: VoiceSelection {
            language_code: payload
                .language_code
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| models.tts_language_code.clone()),
            name: payload
                .voice
                .clone()
                .filter(|v| !v.trim().is_empty())
                .or_else(|| models.tts_voice.clone()),
        },
        audio_config: AudioConfig {
            audio_encoding: "MP3".to_string(),
            speaking_rate: speaking_rate(payload.speed),
        },
    };

    let builder = http
        .post(format!("{}/v1/text:synthesize", endpoint.base_url))
        .header("x-goog-api-key", key)
        .json(&request);
    let response: SynthesizeSpeechResponse = upstream::execute_json(builder, "tts").await?;
    if response.audio_content.is_empty() {
        return Err(GatewayError::upstream("tts returned no audio content"));
    }

    debug!(chars = text.chars().count(), "Synthesized speech");
    Ok(SpeechResponse {
        audio_content: response.audio_content,
    })
}

//! Image generation (Imagen or OpenAI) and image editing.

use std::future::Future;

use assistant_protocol::{
    assistant::{
        AspectRatio, Attachment, EditImagePayload, EditImageResponse, GenerateImagesPayload,
        GeneratedImagesResponse, ImageProvider, ImageQuality, ImageStyle,
    },
    chat::{ImageGenerationRequest, ImageGenerationResponse},
    google::{
        Content, GenerateContentRequest, GenerationConfig, Part, PredictInstance,
        PredictParameters, PredictRequest, PredictResponse,
    },
};
use tracing::{debug, info, warn};

use super::{generate_content, require_key, response_text};
use crate::{
    attachments::{decode_base64, strip_data_url},
    config::{ModelsConfig, ProvidersConfig},
    routers::{error::GatewayError, upstream},
};

const MAX_IMAGES: u8 = 4;

/// OpenAI size string for an aspect ratio.
pub(crate) fn openai_size(ratio: AspectRatio) -> &'static str {
    match ratio {
        AspectRatio::Square => "1024x1024",
        AspectRatio::Landscape | AspectRatio::Standard => "1792x1024",
        AspectRatio::Portrait | AspectRatio::StandardPortrait => "1024x1792",
    }
}

fn quality_str(quality: ImageQuality) -> &'static str {
    match quality {
        ImageQuality::Standard => "standard",
        ImageQuality::Hd => "hd",
    }
}

fn style_str(style: ImageStyle) -> &'static str {
    match style {
        ImageStyle::Vivid => "vivid",
        ImageStyle::Natural => "natural",
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

/// Provider calls for one generation request, checked against the
/// configuration before any credits are taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePlan {
    batches: Vec<u8>,
}

impl ImagePlan {
    pub fn new(
        providers: &ProvidersConfig,
        models: &ModelsConfig,
        payload: &GenerateImagesPayload,
    ) -> Result<Self, GatewayError> {
        let count = payload.config.number_of_images.clamp(1, MAX_IMAGES);
        let batches = match payload.provider {
            ImageProvider::Imagen => {
                require_key(&providers.gemini, "Gemini")?;
                vec![count]
            }
            ImageProvider::Openai => {
                require_key(&providers.openai, "OpenAI")?;
                // dall-e-3 only accepts n=1; larger batches are issued one at a time.
                if models.openai_image_model.starts_with("dall-e-3") {
                    vec![1; usize::from(count)]
                } else {
                    vec![count]
                }
            }
        };
        Ok(Self { batches })
    }

    /// Images requested by the first provider call.
    pub fn first_batch(&self) -> u8 {
        self.batches.first().copied().unwrap_or(1)
    }
}

/// Run the planned calls in order.
///
/// The first call is paid for before this runs. `charge_batch` pays for each
/// later one just before it is sent. When a later call cannot be paid for or
/// fails, the images already produced are returned.
pub async fn generate_images<F, Fut>(
    http: &reqwest::Client,
    providers: &ProvidersConfig,
    models: &ModelsConfig,
    payload: &GenerateImagesPayload,
    plan: &ImagePlan,
    mut charge_batch: F,
) -> Result<GeneratedImagesResponse, GatewayError>
where
    F: FnMut(u8) -> Fut,
    Fut: Future<Output = Result<(), GatewayError>>,
{
    let mut generated_images: Vec<Attachment> = Vec::new();
    for (i, &count) in plan.batches.iter().enumerate() {
        if i > 0 {
            if let Err(e) = charge_batch(count).await {
                warn!(error = %e, generated = generated_images.len(), "Stopping image generation early");
                break;
            }
        }
        let batch = match payload.provider {
            ImageProvider::Imagen => imagen(http, providers, models, payload, count).await,
            ImageProvider::Openai => {
                openai(http, providers, models, payload, count, generated_images.len()).await
            }
        };
        match batch {
            Ok(images) => generated_images.extend(images),
            Err(e) if !generated_images.is_empty() => {
                warn!(error = %e, generated = generated_images.len(), "Image batch failed, returning partial result");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    info!(provider = ?payload.provider, count = generated_images.len(), "Generated images");
    Ok(GeneratedImagesResponse { generated_images })
}

async fn imagen(
    http: &reqwest::Client,
    providers: &ProvidersConfig,
    models: &ModelsConfig,
    payload: &GenerateImagesPayload,
    count: u8,
) -> Result<Vec<Attachment>, GatewayError> {
    let endpoint = &providers.gemini;
    let key = require_key(endpoint, "Gemini")?;
    let request = PredictRequest {
        instances: vec![PredictInstance {
            prompt: payload.prompt.trim().to_string(),
        }],
        parameters: PredictParameters {
            sample_count: count,
            aspect_ratio: payload.config.aspect_ratio.as_str().to_string(),
            person_generation: None,
        },
    };
    let url = format!(
        "{}/v1beta/models/{}:predict",
        endpoint.base_url, models.imagen_model
    );
    let builder = http.post(url).header("x-goog-api-key", key).json(&request);
    let response: PredictResponse = upstream::execute_json(builder, "imagen").await?;

    let images: Vec<Attachment> = response
        .predictions
        .iter()
        .filter_map(|p| {
            let data = p.bytes_base64_encoded.as_ref()?;
            let mime = p.mime_type.clone().unwrap_or_else(|| "image/png".to_string());
            Some((data.clone(), mime))
        })
        .enumerate()
        .map(|(i, (data, mime))| {
            let name = format!("generated_image_{}.{}", i + 1, extension_for(&mime));
            Attachment::new(data, mime, name)
        })
        .collect();

    if images.is_empty() {
        let reason = response
            .predictions
            .iter()
            .find_map(|p| p.rai_filtered_reason.clone())
            .unwrap_or_else(|| "no images were returned".to_string());
        return Err(GatewayError::ContentBlocked(format!(
            "The image request was blocked by safety filters: {reason}"
        )));
    }
    Ok(images)
}

/// One `/images/generations` call for `count` images, numbered after `offset`.
async fn openai(
    http: &reqwest::Client,
    providers: &ProvidersConfig,
    models: &ModelsConfig,
    payload: &GenerateImagesPayload,
    count: u8,
    offset: usize,
) -> Result<Vec<Attachment>, GatewayError> {
    let endpoint = &providers.openai;
    let key = require_key(endpoint, "OpenAI")?;
    let request = ImageGenerationRequest {
        model: models.openai_image_model.clone(),
        prompt: payload.prompt.trim().to_string(),
        n: count,
        size: openai_size(payload.config.aspect_ratio).to_string(),
        quality: Some(quality_str(payload.config.quality).to_string()),
        style: payload.config.style.map(|s| style_str(s).to_string()),
        response_format: "b64_json".to_string(),
    };
    let builder = http
        .post(format!("{}/images/generations", endpoint.base_url))
        .bearer_auth(key)
        .json(&request);
    let response: ImageGenerationResponse = upstream::execute_json(builder, "openai").await?;

    let images: Vec<Attachment> = response
        .data
        .into_iter()
        .filter_map(|image| image.b64_json)
        .enumerate()
        .map(|(i, data)| {
            let name = format!("generated_image_{}.png", offset + i + 1);
            Attachment::new(data, "image/png", name)
        })
        .collect();

    if images.is_empty() {
        return Err(GatewayError::upstream("openai returned no images"));
    }
    Ok(images)
}

/// Local checks for an edit: the native key is set and every image decodes.
pub fn check_edit(providers: &ProvidersConfig, payload: &EditImagePayload) -> Result<(), GatewayError> {
    require_key(&providers.gemini, "Gemini")?;
    for image in &payload.images {
        decode_base64(&image.data)
            .map_err(|e| GatewayError::validation(format!("{}: {e}", image.file_name)))?;
    }
    Ok(())
}

/// Edit with the native image model. The resulting image is optional; a
/// text-only answer is a valid result.
pub async fn edit_image(
    http: &reqwest::Client,
    providers: &ProvidersConfig,
    models: &ModelsConfig,
    payload: &EditImagePayload,
) -> Result<EditImageResponse, GatewayError> {
    let mut parts: Vec<Part> = payload
        .images
        .iter()
        .map(|image| {
            let mime = if image.mime_type.is_empty() {
                "image/png"
            } else {
                image.mime_type.as_str()
            };
            Part::inline(mime, strip_data_url(&image.data).trim())
        })
        .collect();
    parts.push(Part::text(payload.prompt.trim()));

    let request = GenerateContentRequest {
        contents: vec![Content::new("user", parts)],
        generation_config: Some(GenerationConfig {
            response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    };

    let response =
        generate_content(http, &providers.gemini, &models.image_edit_model, &request).await?;

    let attachments: Vec<Attachment> = response
        .parts()
        .iter()
        .find_map(|p| p.inline_data.as_ref())
        .map(|inline| {
            Attachment::new(
                inline.data.clone(),
                inline.mime_type.clone(),
                format!("edited_image.{}", extension_for(&inline.mime_type)),
            )
        })
        .into_iter()
        .collect();
    let text = response_text(&response);
    debug!(has_image = !attachments.is_empty(), text_len = text.len(), "Image edit finished");

    Ok(EditImageResponse { text, attachments })
}

#[cfg(test)]
mod tests {
    use assistant_protocol::assistant::ImageGenerationConfig;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::config::{GatewayConfig, ProviderEndpoint};

    async fn generate(
        config: &GatewayConfig,
        payload: &GenerateImagesPayload,
    ) -> Result<GeneratedImagesResponse, GatewayError> {
        let plan = ImagePlan::new(&config.providers, &config.models, payload)?;
        generate_images(
            &reqwest::Client::new(),
            &config.providers,
            &config.models,
            payload,
            &plan,
            |_| async { Ok(()) },
        )
        .await
    }

    fn dalle3_payload(count: u8) -> GenerateImagesPayload {
        GenerateImagesPayload {
            prompt: "a fox".into(),
            provider: ImageProvider::Openai,
            config: ImageGenerationConfig {
                number_of_images: count,
                ..Default::default()
            },
        }
    }

    fn config_for(server: &MockServer) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.providers.gemini = ProviderEndpoint::new(server.uri(), Some("g-key".into()));
        config.providers.openai = ProviderEndpoint::new(server.uri(), Some("o-key".into()));
        config
    }

    #[test]
    fn test_openai_size_map() {
        assert_eq!(openai_size(AspectRatio::Square), "1024x1024");
        assert_eq!(openai_size(AspectRatio::Landscape), "1792x1024");
        assert_eq!(openai_size(AspectRatio::Standard), "1792x1024");
        assert_eq!(openai_size(AspectRatio::Portrait), "1024x1792");
        assert_eq!(openai_size(AspectRatio::StandardPortrait), "1024x1792");
    }

    #[tokio::test]
    async fn test_imagen_maps_count_and_ratio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/imagen-3.0-generate-002:predict"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_partial_json(json!({
                "parameters": {"sampleCount": 2, "aspectRatio": "16:9"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "predictions": [
                    {"bytesBase64Encoded": "AAA=", "mimeType": "image/png"},
                    {"bytesBase64Encoded": "BBB=", "mimeType": "image/jpeg"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = config_for(&server);
        let payload = GenerateImagesPayload {
            prompt: "a lighthouse".into(),
            provider: ImageProvider::Imagen,
            config: ImageGenerationConfig {
                aspect_ratio: AspectRatio::Landscape,
                number_of_images: 2,
                ..Default::default()
            },
        };
        let out = generate(&config, &payload).await
            .unwrap();
        assert_eq!(out.generated_images.len(), 2);
        assert_eq!(out.generated_images[1].file_name, "generated_image_2.jpg");
    }

    #[tokio::test]
    async fn test_imagen_empty_predictions_are_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "predictions": [{"raiFilteredReason": "Prompt contains sensitive words"}]
            })))
            .mount(&server)
            .await;

        let config = config_for(&server);
        let payload = GenerateImagesPayload {
            prompt: "something".into(),
            provider: ImageProvider::Imagen,
            config: ImageGenerationConfig::default(),
        };
        let err = generate(&config, &payload).await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ContentBlocked(ref m) if m.contains("sensitive words")));
    }

    #[tokio::test]
    async fn test_openai_dalle3_issues_one_request_per_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .and(header("authorization", "Bearer o-key"))
            .and(body_partial_json(json!({
                "model": "dall-e-3", "n": 1, "size": "1024x1792",
                "quality": "hd", "style": "natural", "response_format": "b64_json"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"b64_json": "QUJD", "revised_prompt": "x"}]
            })))
            .expect(3)
            .mount(&server)
            .await;

        let config = config_for(&server);
        let payload = GenerateImagesPayload {
            prompt: "a fox".into(),
            provider: ImageProvider::Openai,
            config: ImageGenerationConfig {
                aspect_ratio: AspectRatio::Portrait,
                quality: ImageQuality::Hd,
                style: Some(ImageStyle::Natural),
                number_of_images: 3,
            },
        };
        let out = generate(&config, &payload).await
            .unwrap();
        assert_eq!(out.generated_images.len(), 3);
        assert_eq!(out.generated_images[2].file_name, "generated_image_3.png");
    }

    #[tokio::test]
    async fn test_openai_policy_violation_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "content_policy_violation", "message": "Your request was rejected by the safety system."}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = config_for(&server);
        let payload = GenerateImagesPayload {
            prompt: "bad".into(),
            provider: ImageProvider::Openai,
            config: ImageGenerationConfig::default(),
        };
        let err = generate(&config, &payload).await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::ContentBlocked("Your request was rejected by the safety system.".into())
        );
    }

    #[tokio::test]
    async fn test_edit_returns_text_and_optional_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/v1beta/models/gemini-2.0-flash-preview-image-generation:generateContent",
            ))
            .and(body_partial_json(json!({
                "contents": [{"role": "user", "parts": [
                    {"inlineData": {"mimeType": "image/png", "data": "QUJD"}},
                    {"text": "make it blue"}
                ]}],
                "generationConfig": {"responseModalities": ["TEXT", "IMAGE"]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "I could not edit this image."}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = config_for(&server);
        let payload = EditImagePayload {
            images: vec![Attachment::new("data:image/png;base64,QUJD", "image/png", "a.png")],
            prompt: "make it blue".into(),
        };
        let out = edit_image(&reqwest::Client::new(), &config.providers, &config.models, &payload)
            .await
            .unwrap();
        assert_eq!(out.text, "I could not edit this image.");
        assert!(out.attachments.is_empty());
    }

    #[tokio::test]
    async fn test_dalle3_later_failure_keeps_earlier_images() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"b64_json": "QUJD"}]
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .expect(1)
            .mount(&server)
            .await;

        let config = config_for(&server);
        let out = generate(&config, &dalle3_payload(3)).await.unwrap();
        assert_eq!(out.generated_images.len(), 1);
        assert_eq!(out.generated_images[0].file_name, "generated_image_1.png");
    }

    #[tokio::test]
    async fn test_dalle3_charges_each_later_batch_and_stops_when_refused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"b64_json": "QUJD"}]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let config = config_for(&server);
        let payload = dalle3_payload(4);
        let plan = ImagePlan::new(&config.providers, &config.models, &payload).unwrap();
        assert_eq!(plan.first_batch(), 1);

        let mut charges = Vec::new();
        let out = generate_images(
            &reqwest::Client::new(),
            &config.providers,
            &config.models,
            &payload,
            &plan,
            |n| {
                charges.push(n);
                let paid = charges.len() < 2;
                async move {
                    if paid {
                        Ok(())
                    } else {
                        Err(GatewayError::denied("Insufficient credits"))
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(out.generated_images.len(), 2);
        assert_eq!(charges, vec![1, 1]);
    }

    #[test]
    fn test_plan_batches() {
        let mut config = GatewayConfig::default();
        config.providers.openai = ProviderEndpoint::new("http://unused", Some("o-key".into()));
        config.models.openai_image_model = "gpt-image-1".into();
        let plan = ImagePlan::new(&config.providers, &config.models, &dalle3_payload(9)).unwrap();
        assert_eq!(plan.first_batch(), 4);
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let config = GatewayConfig::default();
        let imagen = GenerateImagesPayload {
            prompt: "a fox".into(),
            provider: ImageProvider::Imagen,
            config: ImageGenerationConfig::default(),
        };
        let err = ImagePlan::new(&config.providers, &config.models, &imagen).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));

        let err = ImagePlan::new(&config.providers, &config.models, &dalle3_payload(1)).unwrap_err();
        assert_eq!(err, GatewayError::configuration("OpenAI API key is not configured"));
    }

    #[test]
    fn test_check_edit_rejects_undecodable_image() {
        let mut config = GatewayConfig::default();
        config.providers.gemini = ProviderEndpoint::new("http://unused", Some("g-key".into()));
        let payload = EditImagePayload {
            images: vec![Attachment::new("%%%", "image/png", "a.png")],
            prompt: "blue".into(),
        };
        assert!(matches!(
            check_edit(&config.providers, &payload),
            Err(GatewayError::Validation(_))
        ));
        assert!(matches!(
            check_edit(&GatewayConfig::default().providers, &payload),
            Err(GatewayError::Configuration(_))
        ));
    }
}

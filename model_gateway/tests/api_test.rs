//! End-to-end tests of the `/api/assistant` endpoint against mocked upstreams.

mod common;

use std::sync::atomic::Ordering;

use axum::http::StatusCode;
use common::{
    action_request, body_json, sse_body, stream_events, TestContext, ADMIN,
    PREMIUM_MODEL,
};
use data_connector::AccountStanding;
use serde_json::json;
use tower::ServiceExt;
use wiremock::{
    matchers::{body_partial_json, header, method, path, path_regex},
    Mock, ResponseTemplate,
};

const USER: &str = "user@example.com";

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

mod chat_stream {
    use super::*;

    #[tokio::test]
    async fn test_native_stream_with_search_emits_status_text_and_grounding_once() {
        let ctx = TestContext::new(vec![]).await;
        let grounding = json!({"webSearchQueries": ["rust async"], "groundingChunks": []});
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:streamGenerateContent"))
            .and(header("x-goog-api-key", "gemini-key"))
            .and(body_partial_json(json!({"tools": [{"google_search": {}}]})))
            .respond_with(sse_response(sse_body(&[
                json!({"candidates": [{"content": {"parts": [{"text": "Tokio is "}]}}]}),
                json!({"candidates": [{"content": {"parts": [{"text": "a runtime."}]}, "groundingMetadata": grounding}]}),
                json!({"candidates": [{"content": {"parts": []}, "groundingMetadata": {"webSearchQueries": ["again"]}, "finishReason": "STOP"}]}),
            ])))
            .expect(1)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "generateContentStream",
                json!({"model": "gemini-2.0-flash", "newMessage": "What is tokio?", "useWebSearch": true}),
                Some(USER),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        let events = stream_events(response).await;
        assert_eq!(
            events,
            vec![
                json!({"status": "Searching the web..."}),
                json!({"text": "Tokio is "}),
                json!({"text": "a runtime."}),
                json!({"groundingMetadata": grounding}),
            ]
        );
    }

    #[tokio::test]
    async fn test_openai_stream_drops_malformed_lines_and_stops_at_done() {
        let ctx = TestContext::new(vec![]).await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {not json\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer openai-key"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "stream": true,
                "messages": [
                    {"role": "system", "content": "Be terse."},
                    {"role": "user", "content": "hi"}
                ]
            })))
            .respond_with(sse_response(body.to_string()))
            .expect(1)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "generateContentStream",
                json!({"model": "gpt-4o", "newMessage": "hi", "systemInstruction": "Be terse."}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let events = stream_events(response).await;
        assert_eq!(events, vec![json!({"text": "Hel"}), json!({"text": "lo"})]);
    }

    #[tokio::test]
    async fn test_deepseek_alias_and_trailing_duplicate_dropped() {
        let ctx = TestContext::new(vec![]).await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer deepseek-key"))
            .and(body_partial_json(json!({
                "model": "deepseek-chat",
                "messages": [
                    {"role": "user", "content": "first"},
                    {"role": "assistant", "content": "answer"},
                    {"role": "user", "content": "again"}
                ]
            })))
            .respond_with(sse_response(
                "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n".into(),
            ))
            .expect(1)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "generateContentStream",
                json!({
                    "model": "deepseek-v3",
                    "history": [
                        {"role": "user", "text": "first"},
                        {"role": "assistant", "text": "answer"},
                        {"role": "user", "text": "again"}
                    ],
                    "newMessage": "again"
                }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(stream_events(response).await, vec![json!({"text": "ok"})]);
    }

    #[tokio::test]
    async fn test_unsupported_model_fails_before_any_stream_byte() {
        let ctx = TestContext::new(vec![]).await;
        Mock::given(path_regex(".*"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "generateContentStream",
                json!({"model": "unsupported-model-x", "newMessage": "hello"}),
                Some(USER),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        assert_eq!(
            response.headers().get("x-assistant-error-code").unwrap(),
            "ValidationError"
        );
        let body = body_json(response).await;
        assert_eq!(body["error"], "ValidationError");
        assert!(body["details"]
            .as_str()
            .unwrap()
            .contains("unsupported-model-x"));
    }

    #[tokio::test]
    async fn test_web_search_rejected_for_openai_family() {
        let ctx = TestContext::new(vec![]).await;
        Mock::given(path_regex(".*"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "generateContentStream",
                json!({"model": "gpt-4o", "newMessage": "news?", "useWebSearch": true}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["details"].as_str().unwrap().contains("Web search"));
    }

    #[tokio::test]
    async fn test_upstream_error_status_is_json_not_stream() {
        let ctx = TestContext::new(vec![]).await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Rate limit reached for org-abc123 on requests"}
            })))
            .expect(1)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "generateContentStream",
                json!({"model": "gpt-4o-mini", "newMessage": "hi"}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "UpstreamError");
        let details = body["details"].as_str().unwrap();
        assert!(details.starts_with("openai returned 429"));
        assert!(!details.contains("org-abc123"));
    }

    #[tokio::test]
    async fn test_premium_model_denied_without_upstream_call() {
        let ctx = TestContext::new(vec![AccountStanding::new(USER, 0)]).await;
        Mock::given(path_regex(".*"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "generateContentStream",
                json!({"model": PREMIUM_MODEL, "newMessage": "hello"}),
                Some(USER),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["error"], "CapabilityDenied");
        assert!(body["details"].as_str().unwrap().contains(PREMIUM_MODEL));
    }

    #[tokio::test]
    async fn test_premium_model_allowed_for_admin() {
        let ctx = TestContext::new(vec![]).await;
        Mock::given(method("POST"))
            .and(path(format!(
                "/v1beta/models/{PREMIUM_MODEL}:streamGenerateContent"
            )))
            .respond_with(sse_response(sse_body(&[json!({
                "candidates": [{"content": {"parts": [{"text": "hi"}]}}]
            })])))
            .expect(1)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "generateContentStream",
                json!({"model": PREMIUM_MODEL, "newMessage": "hello"}),
                Some("  ADMIN@example.com "),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(stream_events(response).await, vec![json!({"text": "hi"})]);
    }
}

mod metered {
    use super::*;

    fn edited_image_response() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
            ]}}]
        }))
    }

    fn edit_payload() -> serde_json::Value {
        json!({
            "images": [{"data": "aGVsbG8=", "mimeType": "image/png", "fileName": "cat.png"}],
            "prompt": "add a hat"
        })
    }

    #[tokio::test]
    async fn test_edit_returns_single_image_and_charges_once() {
        let ctx = TestContext::new(vec![AccountStanding::new(USER, 5)]).await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/v1beta/models/.+:generateContent$"))
            .respond_with(edited_image_response())
            .expect(1)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request("editImage", edit_payload(), Some(USER)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["text"], "");
        let attachments = body["attachments"].as_array().unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0]["mimeType"], "image/png");
        assert_eq!(attachments[0]["fileName"], "edited_image.png");
        assert_eq!(ctx.accounts.credits(USER), Some(4));
    }

    #[tokio::test]
    async fn test_concurrent_edits_with_balance_for_one() {
        let ctx = TestContext::new(vec![AccountStanding::new(USER, 1)]).await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/v1beta/models/.+:generateContent$"))
            .respond_with(edited_image_response())
            .expect(1)
            .mount(&ctx.upstream)
            .await;

        let first = ctx
            .app
            .clone()
            .oneshot(action_request("editImage", edit_payload(), Some(USER)));
        let second = ctx
            .app
            .clone()
            .oneshot(action_request("editImage", edit_payload(), Some(USER)));
        let (a, b) = tokio::join!(first, second);

        let mut statuses = vec![a.unwrap().status(), b.unwrap().status()];
        statuses.sort();
        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::FORBIDDEN]);
        assert_eq!(ctx.accounts.credits(USER), Some(0));
    }

    #[tokio::test]
    async fn test_image_generation_without_identity_is_denied() {
        let ctx = TestContext::new(vec![]).await;
        Mock::given(path_regex(".*"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "generateImages",
                json!({"prompt": "a fox"}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_image_generation_charges_per_image() {
        let ctx = TestContext::new(vec![AccountStanding::new(USER, 3)]).await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/imagen-3.0-generate-002:predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "predictions": [
                    {"bytesBase64Encoded": "QQ==", "mimeType": "image/png"},
                    {"bytesBase64Encoded": "Qg==", "mimeType": "image/png"}
                ]
            })))
            .expect(1)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "generateImages",
                json!({"prompt": "a fox", "config": {"numberOfImages": 2, "aspectRatio": "16:9"}}),
                Some(USER),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["generatedImages"].as_array().unwrap().len(), 2);
        assert_eq!(ctx.accounts.credits(USER), Some(1));

        let log = ctx.cache.log_entries(&format!("activity:{USER}"));
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("generateImages"));
    }

    #[tokio::test]
    async fn test_face_swap_times_out_after_budget() {
        let ctx = TestContext::new(vec![AccountStanding::new(USER, 10)]).await;
        Mock::given(method("POST"))
            .and(path("/gradio_api/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(["/tmp/x.png"]))
            .expect(2)
            .mount(&ctx.upstream)
            .await;
        Mock::given(method("POST"))
            .and(path("/gradio_api/queue/join"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event_id": "e"})))
            .expect(1)
            .mount(&ctx.upstream)
            .await;
        Mock::given(method("GET"))
            .and(path("/gradio_api/queue/data"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("data: {\"msg\":\"estimation\"}\n\n"),
            )
            .expect(3)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "faceSwap",
                json!({
                    "sourceImage": {"data": "aGVsbG8=", "mimeType": "image/png", "fileName": "a.png"},
                    "targetImage": {"data": "d29ybGQ=", "mimeType": "image/png", "fileName": "b.png"}
                }),
                Some(USER),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "PollingTimeout");
        assert_eq!(ctx.pause.calls.load(Ordering::SeqCst), 2);
    }

    fn face_swap_payload(source_data: &str) -> serde_json::Value {
        json!({
            "sourceImage": {"data": source_data, "mimeType": "image/png", "fileName": "a.png"},
            "targetImage": {"data": "d29ybGQ=", "mimeType": "image/png", "fileName": "b.png"}
        })
    }

    async fn mount_no_upstream_calls(ctx: &TestContext) {
        Mock::given(path_regex(".*"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&ctx.upstream)
            .await;
    }

    #[tokio::test]
    async fn test_unconfigured_face_swap_costs_nothing() {
        let ctx = TestContext::with_config(vec![AccountStanding::new(USER, 10)], |config| {
            config.faceswap.base_url = None;
        })
        .await;
        mount_no_upstream_calls(&ctx).await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request("faceSwap", face_swap_payload("aGVsbG8="), Some(USER)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ctx.accounts.credits(USER), Some(10));
    }

    #[tokio::test]
    async fn test_undecodable_face_swap_image_costs_nothing() {
        let ctx = TestContext::new(vec![AccountStanding::new(USER, 10)]).await;
        mount_no_upstream_calls(&ctx).await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request("faceSwap", face_swap_payload("!!!not-base64!!!"), Some(USER)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "ValidationError");
        assert_eq!(ctx.accounts.credits(USER), Some(10));
    }

    #[tokio::test]
    async fn test_missing_image_key_costs_nothing() {
        let ctx = TestContext::with_config(vec![AccountStanding::new(USER, 10)], |config| {
            config.providers.openai.api_key = None;
        })
        .await;
        mount_no_upstream_calls(&ctx).await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "generateImages",
                json!({"prompt": "a fox", "provider": "openai", "config": {"numberOfImages": 2}}),
                Some(USER),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"], "ConfigurationError");
        assert_eq!(ctx.accounts.credits(USER), Some(10));
    }

    #[tokio::test]
    async fn test_sequential_images_stop_when_credits_run_out() {
        let ctx = TestContext::new(vec![AccountStanding::new(USER, 2)]).await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .and(body_partial_json(json!({"model": "dall-e-3", "n": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"b64_json": "QUJD"}]
            })))
            .expect(2)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "generateImages",
                json!({"prompt": "a fox", "provider": "openai", "config": {"numberOfImages": 3}}),
                Some(USER),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["generatedImages"].as_array().unwrap().len(), 2);
        assert_eq!(ctx.accounts.credits(USER), Some(0));
    }
}

mod one_shot {
    use super::*;

    #[tokio::test]
    async fn test_translate_is_ungated() {
        let ctx = TestContext::new(vec![]).await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Hola"}]}}]
            })))
            .expect(1)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "translate",
                json!({"text": "Hello", "targetLanguage": "Spanish"}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"translatedText": "Hola"}));
    }

    #[tokio::test]
    async fn test_empty_speech_text_rejected_before_upstream() {
        let ctx = TestContext::new(vec![]).await;
        Mock::given(path_regex(".*"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&ctx.upstream)
            .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "synthesizeSpeech",
                json!({"text": "   "}),
                Some(ADMIN),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let ctx = TestContext::new(vec![]).await;
        let response = ctx
            .app
            .clone()
            .oneshot(action_request("launchRockets", json!({}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["details"], "Unknown action: launchRockets");
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_service_unavailable() {
        let ctx = TestContext::with_config(vec![], |config| {
            config.providers.gemini.api_key = None;
        })
        .await;

        let response = ctx
            .app
            .clone()
            .oneshot(action_request(
                "translate",
                json!({"text": "Hello", "targetLanguage": "Spanish"}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"], "ConfigurationError");
    }
}

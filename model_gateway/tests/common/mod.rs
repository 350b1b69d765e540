//! Shared harness: one wiremock server standing in for every upstream, memory
//! stores, and the gateway router driven in-process.

#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use assistant_gateway::{
    app_context::AppContext,
    config::{GatewayConfig, ProviderEndpoint},
    routers::faceswap::Pause,
    server::{build_app, HEADER_USER_EMAIL},
};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Request,
    http::{header::CONTENT_TYPE, Response},
    Router,
};
use data_connector::{AccountStanding, MemoryAccountStorage, MemoryCacheStorage};
use http_body_util::BodyExt;
use serde_json::Value;
use wiremock::MockServer;

pub const ADMIN: &str = "admin@example.com";
pub const PREMIUM_MODEL: &str = "gemini-2.5-pro";

/// Counts pauses without sleeping.
#[derive(Default)]
pub struct CountingPause {
    pub calls: AtomicU32,
}

#[async_trait]
impl Pause for CountingPause {
    async fn pause(&self, _duration: Duration) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct TestContext {
    pub upstream: MockServer,
    pub accounts: Arc<MemoryAccountStorage>,
    pub cache: Arc<MemoryCacheStorage>,
    pub pause: Arc<CountingPause>,
    pub app: Router,
}

impl TestContext {
    pub async fn new(accounts: Vec<AccountStanding>) -> Self {
        Self::with_config(accounts, |_| {}).await
    }

    pub async fn with_config(
        accounts: Vec<AccountStanding>,
        customize: impl FnOnce(&mut GatewayConfig),
    ) -> Self {
        let upstream = MockServer::start().await;
        let uri = upstream.uri();

        let mut config = GatewayConfig::default();
        config.providers.gemini = ProviderEndpoint::new(uri.clone(), Some("gemini-key".into()));
        config.providers.openai = ProviderEndpoint::new(uri.clone(), Some("openai-key".into()));
        config.providers.deepseek = ProviderEndpoint::new(uri.clone(), Some("deepseek-key".into()));
        config.providers.tts = ProviderEndpoint::new(uri.clone(), Some("tts-key".into()));
        config.faceswap.base_url = Some(uri);
        config.faceswap.max_attempts = 3;
        config.gate.admin_email = Some(ADMIN.to_string());
        config.gate.premium_models = vec![PREMIUM_MODEL.to_string()];
        customize(&mut config);

        let accounts = Arc::new(MemoryAccountStorage::with_accounts(accounts));
        let cache = Arc::new(MemoryCacheStorage::new());
        let pause = Arc::new(CountingPause::default());

        let ctx = AppContext::from_config(config)
            .expect("context")
            .with_stores(accounts.clone(), cache.clone())
            .with_pause(pause.clone());
        let app = build_app(Arc::new(ctx));

        Self {
            upstream,
            accounts,
            cache,
            pause,
            app,
        }
    }
}

pub fn action_request(action: &str, payload: Value, caller: Option<&str>) -> Request {
    let body = serde_json::json!({"action": action, "payload": payload});
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/assistant")
        .header(CONTENT_TYPE, "application/json");
    if let Some(caller) = caller {
        builder = builder.header(HEADER_USER_EMAIL, caller);
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

/// Parse `event: <json>` frames from a streamed body.
pub async fn stream_events(response: Response<Body>) -> Vec<Value> {
    let bytes = body_bytes(response).await;
    String::from_utf8(bytes)
        .expect("utf-8 stream")
        .split("\n\n")
        .filter_map(|frame| frame.strip_prefix("event: "))
        .map(|json| serde_json::from_str(json).expect("event json"))
        .collect()
}

/// An SSE body with one `data:` line per chunk.
pub fn sse_body(chunks: &[Value]) -> String {
    chunks
        .iter()
        .map(|c| format!("data: {c}\r\n\r\n"))
        .collect()
}

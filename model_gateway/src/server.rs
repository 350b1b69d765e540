use std::{sync::Arc, time::Instant};

use anyhow::Context;
use assistant_protocol::{
    assistant::{
        Action, ActionRequest, ChatStreamPayload, EditImagePayload, FaceSwapPayload,
        GenerateImagesPayload, SpeechPayload, TranslatePayload,
    },
    validated::ValidatedJson,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    app_context::AppContext,
    attachments,
    gate::CapabilityGate,
    history::{dedupe_trailing_turn, PreparedChat},
    observability::metrics::{metrics_labels, Metrics},
    routers::{
        chat::{check_request, streaming::relay},
        error::GatewayError,
        faceswap::{run_face_swap, PreparedFaceSwap},
        oneshot::{
            images::{self, ImagePlan},
            speech, translate,
        },
    },
    version,
};

/// Header carrying the caller's identity, set by the authenticating front end.
pub const HEADER_USER_EMAIL: &str = "x-user-email";

pub fn build_app(ctx: Arc<AppContext>) -> Router {
    let server = &ctx.config.server;
    let cors = create_cors_layer(&server.cors_allowed_origins);

    Router::new()
        .route("/api/assistant", post(assistant))
        .route("/health", get(health))
        .route("/version", get(version_info))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(server.max_payload_size))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            server.request_timeout,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(ctx)
}

fn create_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allowed_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Caller identity from the request headers: trimmed, lower-cased, non-empty.
pub fn caller_identity(headers: &HeaderMap) -> Option<String> {
    headers
        .get(HEADER_USER_EMAIL)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

async fn health() -> Response {
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

async fn version_info(State(ctx): State<Arc<AppContext>>) -> Response {
    Json(json!({
        "name": version::PROJECT_NAME,
        "version": version::get_version(),
        "providers": ctx.config.providers.configured(),
        "faceSwap": ctx.config.faceswap.base_url.is_some(),
    }))
    .into_response()
}

async fn assistant(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<ActionRequest>,
) -> Response {
    let Some(action) = Action::parse(&request.action) else {
        return GatewayError::validation(format!("Unknown action: {}", request.action))
            .into_response();
    };
    let caller = caller_identity(&headers);
    let start = Instant::now();
    Metrics::record_request(action.as_str());

    match dispatch(&ctx, action, caller.as_deref(), request.payload).await {
        Ok(response) => {
            Metrics::record_request_duration(
                action.as_str(),
                metrics_labels::RESULT_SUCCESS,
                start.elapsed(),
            );
            response
        }
        Err(e) => {
            Metrics::record_request_error(action.as_str(), e.category());
            Metrics::record_request_duration(
                action.as_str(),
                metrics_labels::RESULT_ERROR,
                start.elapsed(),
            );
            warn!(action = %action, category = e.category(), error = %e, "Request failed");
            e.into_response()
        }
    }
}

fn parse_payload<T: DeserializeOwned + Validate>(action: Action, payload: Value) -> Result<T, GatewayError> {
    let payload: T = serde_json::from_value(payload)
        .map_err(|e| GatewayError::validation(format!("Invalid {action} payload: {e}")))?;
    payload.validate()?;
    Ok(payload)
}

fn json_response<T: Serialize>(body: T) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

async fn dispatch(
    ctx: &AppContext,
    action: Action,
    caller: Option<&str>,
    payload: Value,
) -> Result<Response, GatewayError> {
    let providers = &ctx.config.providers;
    let models = &ctx.config.models;

    match action {
        Action::GenerateContentStream => {
            let payload: ChatStreamPayload = parse_payload(action, payload)?;
            stream_chat(ctx, caller, payload).await
        }
        Action::GenerateImages => {
            let payload: GenerateImagesPayload = parse_payload(action, payload)?;
            let plan = ImagePlan::new(providers, models, &payload)?;
            let gate = admit(ctx, caller, action, None, plan.first_batch()).await?;
            let charger: &CapabilityGate = &gate;
            let charge_batch = move |units| {
                let gate = charger;
                gate.charge(caller, action, gate.cost(action, units))
            };
            let result =
                images::generate_images(&ctx.http, providers, models, &payload, &plan, charge_batch)
                    .await;
            finish(&gate, caller, action, None, result).await.map(json_response)
        }
        Action::EditImage => {
            let payload: EditImagePayload = parse_payload(action, payload)?;
            images::check_edit(providers, &payload)?;
            let gate = admit(ctx, caller, action, None, 1).await?;
            let result = images::edit_image(&ctx.http, providers, models, &payload).await;
            finish(&gate, caller, action, None, result).await.map(json_response)
        }
        Action::FaceSwap => {
            let payload: FaceSwapPayload = parse_payload(action, payload)?;
            let request = PreparedFaceSwap::new(&ctx.config.faceswap, &payload)?;
            let gate = admit(ctx, caller, action, None, 1).await?;

            // Dropping this handler (client gone, timeout) cancels the poll loop.
            let cancel = ctx.shutdown.child_token();
            let _guard = cancel.clone().drop_guard();
            let result = run_face_swap(
                &ctx.http,
                &ctx.config.faceswap,
                ctx.pause.as_ref(),
                cancel,
                &request,
            )
            .await;
            finish(&gate, caller, action, None, result).await.map(json_response)
        }
        Action::SynthesizeSpeech => {
            let payload: SpeechPayload = parse_payload(action, payload)?;
            let gate = admit(ctx, caller, action, None, 1).await?;
            let result = speech::synthesize_speech(&ctx.http, providers, models, &payload).await;
            finish(&gate, caller, action, None, result).await.map(json_response)
        }
        Action::Translate => {
            let payload: TranslatePayload = parse_payload(action, payload)?;
            let result = translate::translate(&ctx.http, providers, models, &payload).await?;
            Ok(json_response(result))
        }
    }
}

/// Evaluate the gate and, for metered actions, take the credits. Runs after
/// every local check and before any upstream call.
async fn admit(
    ctx: &AppContext,
    caller: Option<&str>,
    action: Action,
    model: Option<&str>,
    units: u8,
) -> Result<Arc<CapabilityGate>, GatewayError> {
    let gate = ctx.gate().await?;
    if let Err(e) = gate.evaluate(caller, action, model).await.into_result() {
        gate.record_activity(caller, action, model, "denied").await;
        return Err(e);
    }
    let cost = gate.cost(action, units);
    if let Err(e) = gate.charge(caller, action, cost).await {
        gate.record_activity(caller, action, model, "denied").await;
        return Err(e);
    }
    Ok(gate)
}

async fn finish<T>(
    gate: &CapabilityGate,
    caller: Option<&str>,
    action: Action,
    model: Option<&str>,
    result: Result<T, GatewayError>,
) -> Result<T, GatewayError> {
    let outcome = match &result {
        Ok(_) => metrics_labels::RESULT_SUCCESS,
        Err(e) => e.category(),
    };
    gate.record_activity(caller, action, model, outcome).await;
    result
}

async fn stream_chat(
    ctx: &AppContext,
    caller: Option<&str>,
    payload: ChatStreamPayload,
) -> Result<Response, GatewayError> {
    let requested = payload.model.trim();
    let model = ctx.models.resolve(requested)?;
    let adapter = ctx.adapter(model.family);

    let gate = admit(ctx, caller, Action::GenerateContentStream, Some(requested), 1).await?;

    let classified = attachments::classify(&payload.attachments, ctx.config.attachments).await;
    let history = dedupe_trailing_turn(&payload.history, &payload.new_message, ctx.config.history);
    let prepared = PreparedChat {
        history,
        new_message: payload.new_message,
        attachments: classified,
        system_instruction: payload.system_instruction.filter(|s| !s.trim().is_empty()),
        use_web_search: payload.use_web_search,
    };
    check_request(adapter.as_ref(), &model, &prepared)?;

    debug!(
        model = %model.requested_name,
        provider = %model.provider,
        turns = prepared.history.len(),
        images = prepared.attachments.images().count(),
        text_blocks = prepared.attachments.text_blocks.len(),
        "Dispatching chat stream"
    );

    let events = adapter.stream_chat(&model, &prepared).await;
    let outcome = match &events {
        Ok(_) => "started",
        Err(e) => e.category(),
    };
    gate.record_activity(caller, Action::GenerateContentStream, Some(requested), outcome)
        .await;

    Ok(relay(events?, model.requested_name))
}

/// Bind, serve until Ctrl-C or SIGTERM, then cancel in-flight jobs.
pub async fn startup(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "Assistant gateway listening");

    let shutdown = ctx.shutdown.clone();
    let app = build_app(ctx);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server error")?;

    info!("Assistant gateway stopped");
    Ok(())
}

async fn shutdown_signal(token: tokio_util::sync::CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    token.cancel();
}

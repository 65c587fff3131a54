//! Maps HTTP requests to envelopes, runs auth policy and middleware, and
//! emits streaming or unary responses, following the grounding API crate's
//! `Router`/`State`/`Json` idiom.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{instrument, warn};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::engine::{AnyFlow, Engine};
use crate::flow::definition::AuthContext;
use crate::flow::envelope::Envelope;
use crate::flow::error::EngineError;
use crate::flow::state::{BlockedStep, CacheEntry, ExecutionRecord, FlowState, Operation, OperationResult, TraceContext};
use crate::http::config::HttpSurfaceConfig;

/// OpenAPI documentation for the flow HTTP surface
#[derive(OpenApi)]
#[openapi(
    paths(post_flow, get_flow_state),
    components(schemas(
        Operation, OperationResult,
        FlowState, CacheEntry, BlockedStep, ExecutionRecord, TraceContext,
    )),
    tags((name = "flows", description = "Durable and non-durable flow dispatch"))
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: HttpSurfaceConfig,
}

/// Build the router: `POST /{flowName}`, `GET /{flowName}/state/{flowId}`,
/// nested under `config.path_prefix` if set.
pub fn routes(state: AppState) -> Router {
    let prefix = state.config.path_prefix.clone();
    let cors = cors_layer(state.config.cors_allowed_origins.as_deref());

    let mut inner = Router::new()
        .route("/:flow_name", post(post_flow))
        .route("/:flow_name/state/:flow_id", get(get_flow_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    if let Some(limit) = state.config.body_size_limit_bytes {
        inner = inner.layer(RequestBodyLimitLayer::new(limit));
    }

    let inner = inner.with_state(state);

    if prefix.is_empty() || prefix == "/" {
        inner
    } else {
        Router::new().nest(&prefix, inner)
    }
}

/// Builds a permissive CORS layer by default, or an origin allowlist when
/// `cors_allowed_origins` is configured — mirrors the grounding control-plane
/// crate's "CORS layer only if origins are configured" idiom.
fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    match origins {
        Some(origins) if !origins.is_empty() => {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect();
            CorsLayer::new().allow_origin(AllowOrigin::list(parsed))
        }
        _ => CorsLayer::permissive(),
    }
}

fn auth_context_from_headers(headers: &HeaderMap) -> AuthContext {
    let map = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    AuthContext {
        headers: map,
        claims: None,
    }
}

fn error_body(status: &str, message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({"error": {"status": status, "message": message.into(), "details": null}})
}

async fn run_middleware(flow: &Arc<dyn AnyFlow>, ctx: &AuthContext) -> Result<(), String> {
    for mw in flow.middleware() {
        mw.handle(ctx).await.map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Dispatches a `start` (and, for durable flows, any other envelope) against
/// a registered flow. Non-durable flows may additionally set `?stream=true`
/// to receive newline-delimited chunks followed by the final [`Operation`].
#[utoipa::path(
    post,
    path = "/{flow_name}",
    params(
        ("flow_name" = String, Path, description = "Registered flow name"),
        ("stream" = Option<bool>, Query, description = "Stream chunks for non-durable flows")
    ),
    responses(
        (status = 200, description = "Flow dispatched", body = Operation),
        (status = 400, description = "Malformed envelope or unsupported streaming request"),
        (status = 403, description = "Auth policy or middleware rejected the request"),
        (status = 404, description = "Unknown flow name"),
        (status = 500, description = "Flow execution or dispatch error")
    ),
    tag = "flows"
)]
#[instrument(skip(state, headers, body))]
async fn post_flow(
    State(state): State<AppState>,
    Path(flow_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let flow = match state.engine.registry().get(&flow_name) {
        Ok(flow) => flow,
        Err(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(error_body("NOT_FOUND", format!("unknown flow: {flow_name}"))),
            )
                .into_response()
        }
    };

    let auth_ctx = auth_context_from_headers(&headers);
    if let Err(message) = run_middleware(&flow, &auth_ctx).await {
        return (StatusCode::FORBIDDEN, Json(error_body("PERMISSION_DENIED", message))).into_response();
    }

    let stream_requested = params.get("stream").map(String::as_str) == Some("true");

    if flow.durable() {
        durable_flow(state, flow_name, body, stream_requested, auth_ctx).await
    } else {
        non_durable_flow(state, flow_name, body, stream_requested, auth_ctx).await
    }
}

async fn non_durable_flow(
    state: AppState,
    flow_name: String,
    body: serde_json::Value,
    stream_requested: bool,
    auth_ctx: AuthContext,
) -> Response {
    let input = body.get("data").cloned().unwrap_or(serde_json::Value::Null);

    if stream_requested {
        let (sender, mut chunk_stream) = crate::streaming::channel::<serde_json::Value>(None);
        let engine = state.engine.clone();
        let envelope = Envelope::start(input);
        let handle = tokio::spawn(async move {
            engine
                .dispatch(&flow_name, envelope, Some(sender), Some(&auth_ctx))
                .await
        });

        // Mirrors the grounding API crate's `stream::unfold` pattern for its
        // SSE handler, adapted to plain chunked `text/plain` framing: drain
        // chunks as the body produces them, then emit the final Operation
        // once the drive task completes.
        let body_stream = futures::stream::unfold(
            (chunk_stream, Some(handle)),
            |(mut chunk_stream, handle_opt)| async move {
                if let Some(chunk) = chunk_stream.next().await {
                    let mut line = serde_json::to_string(&chunk).unwrap_or_default();
                    line.push('\n');
                    return Some((
                        Ok::<_, std::io::Error>(axum::body::Bytes::from(line)),
                        (chunk_stream, handle_opt),
                    ));
                }
                let handle = handle_opt?;
                let final_json = match handle.await {
                    Ok(Ok(final_state)) => serde_json::to_vec(&final_state.operation).unwrap_or_default(),
                    Ok(Err(err)) => {
                        serde_json::to_vec(&error_body("INTERNAL", err.to_string())).unwrap_or_default()
                    }
                    Err(join_err) => {
                        warn!(error = %join_err, "streaming drive task panicked");
                        serde_json::to_vec(&error_body("INTERNAL", "flow drive failed")).unwrap_or_default()
                    }
                };
                Some((
                    Ok::<_, std::io::Error>(axum::body::Bytes::from(final_json)),
                    (chunk_stream, None),
                ))
            },
        );

        return Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain")
            .header("Transfer-Encoding", "chunked")
            .body(Body::from_stream(body_stream))
            .unwrap();
    }

    let envelope = Envelope::start(input);
    match state.engine.dispatch(&flow_name, envelope, None, Some(&auth_ctx)).await {
        Ok(final_state) => match final_state.operation.result {
            Some(crate::flow::state::OperationResult::Response { response }) => {
                (StatusCode::OK, Json(serde_json::json!({"result": response}))).into_response()
            }
            Some(crate::flow::state::OperationResult::Error { error, .. }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_body("INTERNAL", error)),
            )
                .into_response(),
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_body("INTERNAL", "flow did not complete")),
            )
                .into_response(),
        },
        Err(EngineError::PermissionDenied(message)) => {
            (StatusCode::FORBIDDEN, Json(error_body("PERMISSION_DENIED", message))).into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(error_body("INTERNAL", err.to_string())),
        )
            .into_response(),
    }
}

async fn durable_flow(
    state: AppState,
    flow_name: String,
    body: serde_json::Value,
    stream_requested: bool,
    auth_ctx: AuthContext,
) -> Response {
    if stream_requested {
        return (
            StatusCode::BAD_REQUEST,
            Json(error_body(
                "INVALID_ARGUMENT",
                "streaming is not supported for durable flows",
            )),
        )
            .into_response();
    }

    let envelope: Envelope = if let Some(wrapped) = body.get("data") {
        serde_json::from_value(wrapped.clone()).unwrap_or_default()
    } else {
        serde_json::from_value(body).unwrap_or_default()
    };

    match state.engine.dispatch(&flow_name, envelope, None, Some(&auth_ctx)).await {
        Ok(final_state) => (StatusCode::OK, Json(final_state.operation)).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "done": true,
                "result": {"error": err.to_string(), "stacktrace": null}
            })),
        )
            .into_response(),
    }
}

/// Reads the current `Operation` projection of a durable flow instance.
#[utoipa::path(
    get,
    path = "/{flow_name}/state/{flow_id}",
    params(
        ("flow_name" = String, Path, description = "Registered flow name"),
        ("flow_id" = Uuid, Path, description = "Flow instance id")
    ),
    responses(
        (status = 200, description = "Current operation projection", body = Operation),
        (status = 500, description = "Unknown flow instance or dispatch error")
    ),
    tag = "flows"
)]
#[instrument(skip(state, headers))]
async fn get_flow_state(
    State(state): State<AppState>,
    Path((flow_name, flow_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> Response {
    let flow = match state.engine.registry().get(&flow_name) {
        Ok(flow) => flow,
        Err(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(error_body("NOT_FOUND", format!("unknown flow: {flow_name}"))),
            )
                .into_response()
        }
    };

    let auth_ctx = auth_context_from_headers(&headers);
    if let Err(message) = run_middleware(&flow, &auth_ctx).await {
        return (StatusCode::FORBIDDEN, Json(error_body("PERMISSION_DENIED", message))).into_response();
    }

    match state
        .engine
        .dispatch(&flow_name, Envelope::state(flow_id), None, Some(&auth_ctx))
        .await
    {
        Ok(final_state) => (StatusCode::OK, Json(final_state.operation)).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "done": true,
                "result": {"error": err.to_string(), "stacktrace": null}
            })),
        )
            .into_response(),
    }
}

//! HTTP routes for the JSON-RPC endpoint.

use std::any::Any;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use uuid::Uuid;

use scriptlink_core::ExecutionController;

use crate::error::ServerResult;
use crate::protocol::{
    CallToolResult, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, SESSION_HEADER,
};
use crate::tools::{self, EXECUTE_TOOL};

/// The only path requests are served on.
pub const MCP_PATH: &str = "/mcp";

/// Application state shared across handlers.
pub struct AppState {
    /// Runs `execute` calls, one at a time.
    pub controller: Arc<ExecutionController>,
    /// Token minted by the latest `initialize`.
    pub session_token: RwLock<Option<String>>,
}

impl AppState {
    pub fn new(controller: Arc<ExecutionController>) -> Self {
        Self {
            controller,
            session_token: RwLock::new(None),
        }
    }

    pub async fn session_token(&self) -> Option<String> {
        self.session_token.read().await.clone()
    }
}

/// What a method produced.
enum Reply {
    Result(Value),
    Error(JsonRpcError),
    /// Notification: no body.
    Accepted,
}

/// Create the router with all routes and layers.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(MCP_PATH, post(rpc_handler))
        .fallback(not_found_handler)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ))
        .layer(cors_layer())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::map_response_with_state(
            Arc::clone(&state),
            attach_session_header,
        ))
        .with_state(state)
}

/// Answers `OPTIONS` on every path with an empty pre-flight response.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("mcp-protocol-version"),
            HeaderName::from_static(SESSION_HEADER),
        ])
        .expose_headers([HeaderName::from_static(SESSION_HEADER)])
}

async fn not_found_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Panics inside a handler become an internal-error envelope.
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "handler panicked".to_string()
    };
    tracing::error!("request handler panicked: {}", message);

    let envelope = JsonRpcResponse::error(Value::Null, JsonRpcError::internal_error(message));
    let mut response = Json(envelope).into_response();
    *response.status_mut() = StatusCode::OK;
    response
}

/// JSON-RPC entry point.
async fn rpc_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = match JsonRpcRequest::parse(&body) {
        Ok(request) => request,
        Err(response) => {
            tracing::debug!("rejected request envelope");
            return Json(response).into_response();
        }
    };

    tracing::debug!(method = %request.method, "rpc request");

    let envelope = match dispatch(&state, &request).await {
        Ok(Reply::Result(result)) => JsonRpcResponse::success(request.response_id(), result),
        Ok(Reply::Error(error)) => JsonRpcResponse::error(request.response_id(), error),
        Ok(Reply::Accepted) => return StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            tracing::error!(method = %request.method, "request failed: {}", e);
            JsonRpcResponse::error(Value::Null, JsonRpcError::internal_error(e.to_string()))
        }
    };

    Json(envelope).into_response()
}

/// Stamp the current session token on every JSON-RPC envelope, including
/// rejected envelopes and panic responses.
async fn attach_session_header(State(state): State<Arc<AppState>>, mut response: Response) -> Response {
    let is_envelope = response.status() == StatusCode::OK
        && response
            .headers()
            .get(header::CONTENT_TYPE)
            .is_some_and(|v| v.as_bytes().starts_with(b"application/json"));
    if !is_envelope {
        return response;
    }

    if let Some(token) = state.session_token().await {
        if let Ok(value) = HeaderValue::from_str(&token) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(SESSION_HEADER), value);
        }
    }
    response
}

async fn dispatch(state: &AppState, request: &JsonRpcRequest) -> ServerResult<Reply> {
    let method = request.method.as_str();
    if request.is_notification() || matches!(method, "initialized" | "notifications/initialized")
    {
        tracing::debug!(method, "notification acknowledged");
        return Ok(Reply::Accepted);
    }

    let reply = match method {
        "initialize" => {
            let token = Uuid::new_v4().simple().to_string();
            tracing::info!(session = %token, "client initialized");
            *state.session_token.write().await = Some(token);
            Reply::Result(serde_json::to_value(InitializeResult::default())?)
        }
        "tools/list" => Reply::Result(json!({ "tools": [tools::execute_tool()] })),
        "tools/call" => Reply::Result(call_tool(state, request.params.as_ref()).await?),
        "ping" => Reply::Result(json!({})),
        other => Reply::Error(JsonRpcError::method_not_found(other)),
    };
    Ok(reply)
}

async fn call_tool(state: &AppState, params: Option<&Value>) -> ServerResult<Value> {
    let name = params
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let arguments = params
        .and_then(|p| p.get("arguments"))
        .and_then(Value::as_object);

    let result = if name == EXECUTE_TOOL {
        match tools::parse_execute_args(arguments) {
            Ok(args) => {
                let outcome = state.controller.execute(&args.code, args.timeout).await;
                tracing::info!(
                    session = ?outcome.session_id().map(|id| id.as_str()),
                    success = outcome.is_success(),
                    "execute finished"
                );
                tools::format_execute_result(&outcome)
            }
            Err(message) => CallToolResult::text(message, true),
        }
    } else {
        tracing::debug!(tool = name, "unknown tool requested");
        tools::unknown_tool(name)
    };

    Ok(serde_json::to_value(result)?)
}

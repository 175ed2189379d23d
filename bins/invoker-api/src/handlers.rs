// HTTP route handlers for the Invoker API

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use invoker_common::types::{ImageReference, InvocationMode, InvocationRequest};
use invoker_engine::{FramedResponse, InvocationContext};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub alive: bool,
    pub since: String,
    pub uptime_secs: i64,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: bool,
    pub msg: String,
}

/// GET /api/status - Liveness probe
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = chrono::Utc::now() - state.started_at;

    (
        StatusCode::OK,
        Json(HealthResponse {
            alive: true,
            since: state.started_at.to_rfc3339(),
            uptime_secs: uptime.num_seconds(),
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

/// GET /api/exec/:image_name/:tag - Run the image with the query string as its argument
pub async fn exec_get(
    State(state): State<Arc<AppState>>,
    Path((image_name, tag)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Response {
    let mode = InvocationMode::from_query(query.as_deref().unwrap_or_default());
    run_invocation(&state, image_name, tag, mode).await
}

/// POST /api/exec/:image_name/:tag - Run the image with the body as POST_DATA
pub async fn exec_post(
    State(state): State<Arc<AppState>>,
    Path((image_name, tag)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let mode = InvocationMode::from_post_body(&String::from_utf8_lossy(&body));
    run_invocation(&state, image_name, tag, mode).await
}

async fn run_invocation(
    state: &AppState,
    image_name: String,
    tag: String,
    mode: InvocationMode,
) -> Response {
    let mut image = ImageReference::new(state.config.registry.clone(), image_name, tag);

    if image.is_latest_alias() {
        match state.tags.resolve_latest(&image).await {
            Ok(resolved) => {
                info!(image = %image, tag = %resolved, "resolved latest tag");
                image = image.with_tag(resolved);
            }
            Err(e) => {
                warn!(image = %image, error = %e, "could not resolve latest tag");
                return error_response(
                    StatusCode::NOT_FOUND,
                    format!("could not resolve tag latest for {}: {}", image.name, e),
                );
            }
        }
    }

    let request = InvocationRequest::new(image, mode);
    let ctx = InvocationContext::with_timeout(state.config.invocation_timeout);

    match state.service.invoke(&request, &ctx).await {
        Ok(framed) => framed_response(framed),
        Err(e) => {
            let status = if e.is_not_found() {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            error_response(status, e.to_string())
        }
    }
}

/// Framing headers that would conflict with the body hyper writes
fn is_connection_managed(name: &HeaderName) -> bool {
    name == header::CONTENT_LENGTH || name == header::TRANSFER_ENCODING || name == header::CONNECTION
}

fn framed_response(framed: FramedResponse) -> Response {
    let (headers, body) = framed.into_parts();
    let mut map = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        let parsed = (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(&value),
        );
        match parsed {
            (Ok(name), Ok(_)) if is_connection_managed(&name) => {}
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(header = %name, "skipping invalid response header"),
        }
    }

    (StatusCode::OK, map, body).into_response()
}

fn error_response(status: StatusCode, msg: String) -> Response {
    (status, Json(ErrorResponse { error: true, msg })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use axum::Router;
    use chrono::Utc;
    use invoker_common::config::Config;
    use invoker_common::registry::{RegistryError, TagResolver};
    use invoker_engine::testing::{GatewayCall, RecordingAuditSink, ScriptedGateway};
    use invoker_engine::{AuditRecorder, ContainerSpec, ExecutionPipeline, InvocationService};
    use tower::ServiceExt;

    struct StaticTags(Vec<&'static str>);

    #[async_trait]
    impl TagResolver for StaticTags {
        async fn list_tags(&self, _image: &ImageReference) -> Result<Vec<String>, RegistryError> {
            Ok(self.0.iter().map(|t| t.to_string()).collect())
        }
    }

    fn app(gateway: Arc<ScriptedGateway>, tags: Vec<&'static str>) -> Router {
        let service = InvocationService::new(
            ExecutionPipeline::new(gateway),
            AuditRecorder::new(Arc::new(RecordingAuditSink::default()), 100),
        );
        let state = Arc::new(AppState {
            service,
            tags: Arc::new(StaticTags(tags)),
            config: Arc::new(Config::default()),
            started_at: Utc::now(),
        });
        Router::new().merge(routes::routes()).with_state(state)
    }

    async fn send(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, HeaderMap, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn created_spec(gateway: &ScriptedGateway) -> ContainerSpec {
        gateway
            .calls()
            .into_iter()
            .find_map(|call| match call {
                GatewayCall::Create(spec) => Some(spec),
                _ => None,
            })
            .expect("container was created")
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = app(Arc::new(ScriptedGateway::new()), vec![]);

        let (status, _, body) = send(app, Method::GET, "/api/status", "").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["alive"], true);
        assert!(json["since"].is_string());
    }

    #[tokio::test]
    async fn test_get_returns_framed_headers_and_body() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .with_stdout("Content-Type: application/json\nX-Count: 3\n\n{\"count\": 3}"),
        );
        let app = app(gateway.clone(), vec![]);

        let (status, headers, body) =
            send(app, Method::GET, "/api/exec/counter/1.0?limit=3", "").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["x-count"], "3");
        assert_eq!(body, "{\"count\": 3}");

        let spec = created_spec(&gateway);
        assert_eq!(spec.image, "counter:1.0");
        assert_eq!(spec.mode, InvocationMode::Args(vec!["limit=3".to_string()]));
    }

    #[tokio::test]
    async fn test_post_body_becomes_env() {
        let gateway = Arc::new(ScriptedGateway::new().with_stdout("Content-Type: text/plain\n\nok"));
        let app = app(gateway.clone(), vec![]);

        let (status, _, body) = send(app, Method::POST, "/api/exec/echo/2.1", "name=gopher").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        assert_eq!(
            created_spec(&gateway).mode,
            InvocationMode::Env(vec!["POST_DATA=name=gopher".to_string()])
        );
    }

    #[tokio::test]
    async fn test_stale_content_length_is_not_forwarded() {
        let gateway = Arc::new(
            ScriptedGateway::new().with_stdout("Content-Type: text/html\nContent-Length: 149\n\n<p>hi</p>"),
        );
        let app = app(gateway, vec![]);

        let (status, headers, body) = send(app, Method::GET, "/api/exec/page/1", "").await;

        assert_eq!(status, StatusCode::OK);
        assert_ne!(headers.get("content-length").map(|v| v.as_bytes()), Some(&b"149"[..]));
        assert_eq!(body, "<p>hi</p>");
    }

    #[tokio::test]
    async fn test_pull_failure_is_not_found() {
        let gateway = Arc::new(ScriptedGateway::new().fail_pull("manifest unknown"));
        let app = app(gateway.clone(), vec![]);

        let (status, _, body) = send(app, Method::GET, "/api/exec/missing/9.9", "").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"], true);
        assert_eq!(json["msg"], "image not found, manifest unknown");
        assert_eq!(gateway.create_count(), 0);
    }

    #[tokio::test]
    async fn test_create_failure_is_internal_error() {
        let gateway = Arc::new(ScriptedGateway::new().fail_create("no space left on device"));
        let app = app(gateway, vec![]);

        let (status, _, body) = send(app, Method::GET, "/api/exec/alpine/3.19", "").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            json["msg"],
            "could not create a new container for image alpine:3.19 because: no space left on device"
        );
    }

    #[tokio::test]
    async fn test_missing_content_type_is_internal_error() {
        let gateway = Arc::new(ScriptedGateway::new().with_stdout("X-Only: 1\n\nbody"));
        let app = app(gateway.clone(), vec![]);

        let (status, _, body) = send(app, Method::GET, "/api/exec/raw/1", "").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("does not contain content type in logs"));
        assert_eq!(gateway.remove_count(), 1);
    }

    #[tokio::test]
    async fn test_latest_resolves_to_second_highest_tag() {
        let gateway = Arc::new(ScriptedGateway::new().with_stdout("Content-Type: text/plain\n\n"));
        let app = app(gateway.clone(), vec!["1.0", "latest", "1.2", "1.1"]);

        let (status, _, _) = send(app, Method::GET, "/api/exec/tool/latest", "").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(created_spec(&gateway).image, "tool:1.2");
    }

    #[tokio::test]
    async fn test_latest_without_enough_tags_is_not_found() {
        let gateway = Arc::new(ScriptedGateway::new());
        let app = app(gateway.clone(), vec!["latest"]);

        let (status, _, body) = send(app, Method::GET, "/api/exec/tool/latest", "").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("could not resolve tag latest for tool"));
        assert!(gateway.calls().is_empty());
    }
}

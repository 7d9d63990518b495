use std::{collections::HashMap, env, net::SocketAddr, sync::Arc, time::Duration};

use crate::controller::{AdminSink, Controller};
use crate::execution::QueryEngine;
use crate::identity;
use crate::middleware::rate_limit::{rate_limit_layer, RateLimitConfig};
use crate::router::{DynamicRouter, RouterError};
use crate::shaper::{ShaperError, TrafficShaper};
use crate::subscriptions::SubscriptionManager;
use anyhow::{Context, Result};
use avaast_orchestrator::manifest::EndpointKind;
use avaast_store::Database;
use avaast_watcher::{default_watched_collections, PdsResolver, Watcher, WatcherConfig};
use axum::{
    extract::{Path, Query as QueryExtractor, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::{Modify, OpenApi, ToSchema};

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    let db = Arc::new(
        Database::connect(&config.db_url)
            .await
            .context("failed to open database")?,
    );

    let http = reqwest::Client::new();
    let resolver = Arc::new(PdsResolver::new(http));

    let router = Arc::new(DynamicRouter::new());
    let shaper = Arc::new(TrafficShaper::new());
    let subscriptions = Arc::new(SubscriptionManager::new());
    let admin = Arc::new(AdminSink {
        router: router.clone(),
        shaper: shaper.clone(),
        subscriptions: subscriptions.clone(),
    });

    let controller = Arc::new(Controller::new(
        config.authority_id.clone(),
        resolver.clone(),
        db.clone(),
        admin,
        config.max_active_deploys,
        config.drain_grace,
    ));

    let engine = Arc::new(QueryEngine::new(
        resolver.clone(),
        db.clone(),
        config.authority_id.clone(),
    ));

    let watcher_config = match &config.relay_url {
        Some(url) => WatcherConfig::new(
            config.authority_id.clone(),
            default_watched_collections(std::iter::empty::<String>()),
        )
        .with_relay_url(url.clone()),
        None => WatcherConfig::new(
            config.authority_id.clone(),
            default_watched_collections(std::iter::empty::<String>()),
        ),
    };
    let (_watcher, events) = Watcher::start(watcher_config, resolver.clone(), Some(db.clone())).await;

    tokio::spawn(controller.clone().run(events));

    let state = Arc::new(AppState {
        router,
        shaper,
        subscriptions,
        controller,
        engine,
    });

    let app = build_router(state)
        .layer(rate_limit_layer(RateLimitConfig::default()))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen socket")?;

    info!(addr = %config.listen_addr, "avaast-gateway listening");
    axum::serve(listener, app)
        .await
        .context("HTTP server exited")?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/xrpc/:name", get(xrpc_get).post(xrpc_post))
        .route("/admin/endpoints", post(admin_endpoints))
        .route("/admin/traffic", post(admin_traffic))
        .route("/admin/status", get(admin_status))
        .route("/internal/health", get(internal_health))
        .route("/internal/deploy/status", get(internal_deploy_status))
        .with_state(state)
}

struct AppState {
    router: Arc<DynamicRouter>,
    shaper: Arc<TrafficShaper>,
    subscriptions: Arc<SubscriptionManager>,
    controller: Arc<Controller>,
    engine: Arc<QueryEngine>,
}

#[derive(Debug, Clone)]
struct AppConfig {
    listen_addr: SocketAddr,
    db_url: String,
    authority_id: String,
    relay_url: Option<String>,
    max_active_deploys: usize,
    drain_grace: Duration,
}

impl AppConfig {
    fn from_env() -> Result<Self> {
        let listen_addr = env::var("AVAAST_GATEWAY_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid AVAAST_GATEWAY_ADDR")?;

        let db_url = env::var("AVAAST_DB_DSN")
            .or_else(|_| env::var("DATABASE_URL"))
            .context("AVAAST_DB_DSN or DATABASE_URL must be configured")?;

        let authority_id =
            env::var("AVAAST_AUTHORITY_ID").context("AVAAST_AUTHORITY_ID must be configured")?;

        let relay_url = env::var("AVAAST_RELAY_URL").ok().filter(|v| !v.is_empty());

        let max_active_deploys = env::var("AVAAST_MAX_ACTIVE_DEPLOYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        let drain_grace = env::var("AVAAST_DRAIN_GRACE_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(5));

        Ok(Self {
            listen_addr,
            db_url,
            authority_id,
            relay_url,
            max_active_deploys,
            drain_grace,
        })
    }
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Service is healthy"))
)]
async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[utoipa::path(
    get,
    path = "/metrics",
    responses((status = 200, description = "Prometheus metrics", content_type = "text/plain"))
)]
async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let endpoints = state.router.len();
    let rules = state.shaper.rule_count();
    (
        StatusCode::OK,
        format!(
            "# metrics\navaast_gateway_up 1\navaast_gateway_endpoints {endpoints}\navaast_gateway_traffic_rules {rules}\n"
        ),
    )
}

fn parse_xrpc_params(headers: &HeaderMap, query: HashMap<String, String>) -> HashMap<String, Value> {
    let mut params: HashMap<String, Value> = query
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    if let Some(token) = bearer_optional(headers) {
        if let Ok(key) = identity::sticky_key(token) {
            params.insert("authorityId".to_string(), Value::String(key));
        }
    }
    params
}

#[utoipa::path(
    get,
    path = "/xrpc/{name}",
    params(("name" = String, Path, description = "XRPC method name")),
    responses(
        (status = 200, description = "Computed, search index, or subscription result"),
        (status = 404, description = "Unknown method", body = ErrorBody),
        (status = 405, description = "Method kind mismatch", body = ErrorBody),
        (status = 503, description = "No deploy available", body = ErrorBody)
    )
)]
async fn xrpc_get(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    QueryExtractor(query): QueryExtractor<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let endpoint = state.router.get_endpoint(&name)?;

    let wants_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if wants_websocket {
        return Err(ApiError::new(
            StatusCode::NOT_IMPLEMENTED,
            "websocket upgrades are not supported; use Server-Sent Events",
        ));
    }

    match endpoint.kind {
        EndpointKind::Computed | EndpointKind::SearchIndex => {
            let params = parse_xrpc_params(&headers, query);
            run_read_endpoint(&state, &endpoint, params).await
        }
        EndpointKind::Subscription => {
            let accepts_sse = headers
                .get(header::ACCEPT)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.contains("text/event-stream"))
                .unwrap_or(false);
            if !accepts_sse {
                return Err(ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "subscription endpoints require Accept: text/event-stream",
                ));
            }
            let params = parse_xrpc_params(&headers, query);
            subscribe_sse(&state, &name, params)
        }
        EndpointKind::Function => Err(ApiError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("{name} is a function endpoint; call it with POST"),
        )),
    }
}

#[utoipa::path(
    post,
    path = "/xrpc/{name}",
    params(("name" = String, Path, description = "XRPC method name")),
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Function result"),
        (status = 404, description = "Unknown method", body = ErrorBody),
        (status = 405, description = "Method kind mismatch", body = ErrorBody),
        (status = 503, description = "No deploy available", body = ErrorBody)
    )
)]
async fn xrpc_post(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let endpoint = state.router.get_endpoint(&name)?;

    if endpoint.kind != EndpointKind::Function {
        return Err(ApiError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("{name} is not a function endpoint; call it with GET"),
        ));
    }

    let mut params: HashMap<String, Value> = match body {
        Value::Object(map) => map.into_iter().collect(),
        Value::Null => HashMap::new(),
        other => {
            let mut map = HashMap::new();
            map.insert("body".to_string(), other);
            map
        }
    };
    if let Some(token) = bearer_optional(&headers) {
        if let Ok(key) = identity::sticky_key(token) {
            params.insert("authorityId".to_string(), Value::String(key));
        }
    }

    run_read_endpoint(&state, &endpoint, params).await
}

async fn run_read_endpoint(
    state: &Arc<AppState>,
    endpoint: &avaast_orchestrator::DeployedEndpoint,
    params: HashMap<String, Value>,
) -> Result<Response, ApiError> {
    let sticky_key = params.get("authorityId").and_then(Value::as_str);
    let rule = state
        .shaper
        .select_deploy(sticky_key)
        .ok_or_else(|| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "no deploy is available to serve this call"))?;

    let body = state
        .controller
        .record_store()
        .get_body(&endpoint.resource_ref)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "endpoint definition is not yet resolved"))?;
    let query = crate::controller::parse_computed_query(&body)
        .map_err(|err| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string()))?;

    let canonical_text = serde_json::to_string(&query).unwrap_or_default();
    let outcome = state
        .engine
        .run(&query, &canonical_text, &params)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(json!({
        "results": outcome.results,
        "cached": outcome.cached,
        "durationMs": outcome.duration.as_millis(),
        "deploy": rule.deploy.ref_key(),
    }))
    .into_response())
}

fn subscribe_sse(
    state: &Arc<AppState>,
    name: &str,
    params: HashMap<String, Value>,
) -> Result<Response, ApiError> {
    let (_id, rx) = state
        .subscriptions
        .subscribe(name, params)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("no subscription registered as {name}")))?;

    let frames = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    });
    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<SseEvent, std::convert::Infallible>> + Send>> =
        Box::pin(frames.map(|frame| Ok(SseEvent::default().json_data(frame).unwrap_or_default())));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}

#[derive(Debug, Deserialize, ToSchema)]
struct AdminEndpointsBody {
    endpoints: Vec<Value>,
}

#[utoipa::path(
    post,
    path = "/admin/endpoints",
    request_body = AdminEndpointsBody,
    responses((status = 200, description = "Replaced the endpoint registry"))
)]
async fn admin_endpoints(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AdminEndpointsBody>,
) -> Result<StatusCode, ApiError> {
    let endpoints: Vec<avaast_orchestrator::DeployedEndpoint> = body
        .endpoints
        .iter()
        .filter_map(parse_deployed_endpoint)
        .collect();
    state.router.replace_all(endpoints);
    Ok(StatusCode::OK)
}

fn parse_deployed_endpoint(entry: &Value) -> Option<avaast_orchestrator::DeployedEndpoint> {
    let name = entry.get("name")?.as_str()?.to_string();
    let kind = match entry.get("kind")?.as_str()? {
        "computed" => EndpointKind::Computed,
        "function" => EndpointKind::Function,
        "searchIndex" => EndpointKind::SearchIndex,
        "subscription" => EndpointKind::Subscription,
        _ => return None,
    };
    let reference = entry.get("ref")?;
    let resource_ref = avaast_orchestrator::graph::ResourceRef::new(
        reference.get("authorityId")?.as_str()?.to_string(),
        reference.get("contentHash")?.as_str()?.to_string(),
    );
    Some(avaast_orchestrator::DeployedEndpoint {
        name,
        kind,
        resource_ref,
    })
}

#[derive(Debug, Deserialize, ToSchema)]
struct AdminTrafficBody {
    rules: Vec<AdminTrafficRule>,
}

#[derive(Debug, Deserialize, ToSchema)]
struct AdminTrafficRule {
    #[serde(rename = "authorityId")]
    authority_id: String,
    #[serde(rename = "contentHash")]
    content_hash: String,
    #[serde(rename = "weightBP")]
    weight_bp: u32,
}

#[utoipa::path(
    post,
    path = "/admin/traffic",
    request_body = AdminTrafficBody,
    responses(
        (status = 200, description = "Replaced the traffic rule set"),
        (status = 400, description = "Weights did not sum to 10000 basis points", body = ErrorBody)
    )
)]
async fn admin_traffic(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AdminTrafficBody>,
) -> Result<StatusCode, ApiError> {
    let rules: Vec<avaast_orchestrator::TrafficRule> = body
        .rules
        .into_iter()
        .map(|rule| avaast_orchestrator::TrafficRule {
            deploy: avaast_orchestrator::graph::ResourceRef::new(rule.authority_id, rule.content_hash),
            weight_bp: rule.weight_bp,
        })
        .collect();
    state.shaper.update_rules(rules).map_err(ApiError::from)?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    get,
    path = "/admin/status",
    responses((status = 200, description = "Current endpoint and traffic rule snapshot"))
)]
async fn admin_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "endpoints": state.router.get_endpoint_names(),
        "trafficRules": state.shaper.rules().iter().map(|r| json!({
            "deploy": r.deploy.ref_key(),
            "weightBP": r.weight_bp,
        })).collect::<Vec<_>>(),
    }))
}

#[utoipa::path(
    get,
    path = "/internal/health",
    responses((status = 200, description = "Gateway process liveness"))
)]
async fn internal_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[utoipa::path(
    get,
    path = "/internal/deploy/status",
    responses((status = 200, description = "Deploy states known to the orchestrator"))
)]
async fn internal_deploy_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let deploys = state
        .controller
        .orchestrator()
        .active_deploys()
        .into_iter()
        .map(|status| {
            json!({
                "ref": status.deploy_ref.ref_key(),
                "state": format!("{:?}", status.state),
                "activatedAt": status.activated_at,
            })
        })
        .collect::<Vec<_>>();
    Json(json!({ "deploys": deploys }))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<RouterError> for ApiError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::MethodNotFound(name) => {
                ApiError::new(StatusCode::NOT_FOUND, format!("method not found: {name}"))
            }
        }
    }
}

impl From<ShaperError> for ApiError {
    fn from(err: ShaperError) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, err.to_string())
    }
}

impl From<crate::execution::ExecutionError> for ApiError {
    fn from(err: crate::execution::ExecutionError) -> Self {
        use crate::execution::ExecutionError as E;
        match err {
            E::UnsupportedExpression(msg) => {
                ApiError::new(StatusCode::BAD_REQUEST, format!("unsupported expression: {msg}"))
            }
            E::DeployValidationError(msg) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, format!("deploy validation error: {msg}"))
            }
            E::UpstreamFailure(msg) => {
                ApiError::new(StatusCode::BAD_GATEWAY, format!("upstream failure: {msg}"))
            }
            E::Storage(err) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(status = %self.status, message = %self.message, "xrpc error");
        let error_name = match self.status {
            StatusCode::NOT_FOUND => "MethodNotFound",
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::BAD_REQUEST => "InvalidRequest",
            StatusCode::SERVICE_UNAVAILABLE => "ServiceUnavailable",
            StatusCode::BAD_GATEWAY => "UpstreamFailure",
            StatusCode::GATEWAY_TIMEOUT => "UpstreamTimeout",
            StatusCode::UNPROCESSABLE_ENTITY => "DeployValidationError",
            StatusCode::NOT_IMPLEMENTED => "InvalidRequest",
            _ => "InternalServerError",
        };
        let body = Json(ErrorBody {
            error: error_name.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize, ToSchema)]
struct ErrorBody {
    error: String,
    message: String,
}

fn bearer_optional(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

pub mod docs {
    use super::*;
    use utoipa::openapi::security::SecurityRequirement;

    #[derive(OpenApi)]
    #[openapi(
        info(title = "Avaast Gateway API", version = "0.1.0"),
        paths(
            healthz, metrics, xrpc_get, xrpc_post, admin_endpoints, admin_traffic, admin_status,
            internal_health, internal_deploy_status
        ),
        components(schemas(
            ErrorBody,
            AdminEndpointsBody,
            AdminTrafficBody,
            AdminTrafficRule
        )),
        security_schemes(
            bearerAuth = (
                type = "http",
                scheme = "bearer",
                bearer_format = "unverified identity token",
                description = "Bearer token whose payload's `iss`/`sub` claim seeds sticky routing"
            )
        ),
        modifiers(&SecurityAddon)
    )]
    pub struct ApiDoc;

    struct SecurityAddon;

    impl Modify for SecurityAddon {
        fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
            openapi
                .security
                .get_or_insert_with(Default::default)
                .push(SecurityRequirement::new("bearerAuth", Vec::<String>::new()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avaast_orchestrator::graph::ResourceRef;
    use avaast_orchestrator::DeployedEndpoint;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::Service;

    async fn setup_test_app() -> (Arc<AppState>, Router) {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let resolver = Arc::new(PdsResolver::new(reqwest::Client::new()));
        let router = Arc::new(DynamicRouter::new());
        let shaper = Arc::new(TrafficShaper::new());
        let subscriptions = Arc::new(SubscriptionManager::new());
        let admin = Arc::new(AdminSink {
            router: router.clone(),
            shaper: shaper.clone(),
            subscriptions: subscriptions.clone(),
        });
        let controller = Arc::new(Controller::new(
            "did:plc:alice".into(),
            resolver.clone(),
            db.clone(),
            admin,
            2,
            Duration::from_millis(0),
        ));
        let engine = Arc::new(QueryEngine::new(resolver, db, "did:plc:alice".into()));
        let state = Arc::new(AppState {
            router,
            shaper,
            subscriptions,
            controller,
            engine,
        });
        let app = build_router(state.clone());
        (state, app)
    }

    #[tokio::test]
    async fn unknown_endpoint_is_method_not_found_over_http() {
        let (_state, mut app) = setup_test_app().await;
        let request = Request::builder()
            .method("GET")
            .uri("/xrpc/chat.pirate.doesNotExist")
            .body(Body::empty())
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "MethodNotFound");
    }

    #[tokio::test]
    async fn computed_endpoint_with_no_traffic_rules_is_service_unavailable() {
        let (state, mut app) = setup_test_app().await;
        state.router.replace_all(vec![DeployedEndpoint {
            name: "chat.pirate.getAvasts".into(),
            kind: EndpointKind::Computed,
            resource_ref: ResourceRef::new("did:plc:alice", "c1"),
        }]);

        let request = Request::builder()
            .method("GET")
            .uri("/xrpc/chat.pirate.getAvasts")
            .body(Body::empty())
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn calling_a_function_endpoint_with_get_is_invalid_request() {
        let (state, mut app) = setup_test_app().await;
        state.router.replace_all(vec![DeployedEndpoint {
            name: "chat.pirate.postAvast".into(),
            kind: EndpointKind::Function,
            resource_ref: ResourceRef::new("did:plc:alice", "f1"),
        }]);

        let request = Request::builder()
            .method("GET")
            .uri("/xrpc/chat.pirate.postAvast")
            .body(Body::empty())
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn admin_traffic_rejects_malformed_weights() {
        let (_state, mut app) = setup_test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/admin/traffic")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({"rules": [
                    {"authorityId": "did:plc:a", "contentHash": "d1", "weightBP": 5000}
                ]}))
                .unwrap(),
            ))
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admin_status_reports_registered_endpoints_and_rules() {
        let (state, mut app) = setup_test_app().await;
        state.router.replace_all(vec![DeployedEndpoint {
            name: "chat.pirate.getAvasts".into(),
            kind: EndpointKind::Computed,
            resource_ref: ResourceRef::new("did:plc:alice", "c1"),
        }]);

        let request = Request::builder()
            .method("GET")
            .uri("/admin/status")
            .body(Body::empty())
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["endpoints"], serde_json::json!(["chat.pirate.getAvasts"]));
    }
}

//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers and route guards
//! - Wire up middleware (panic capture, request ID, tracing, timeout,
//!   rate limiting, authentication)
//! - Bind server to listener and run until shutdown
//! - Stop the limiter sweep and drain background work on the way out

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, MatchedPath};
use axum::handler::Handler;
use axum::http::{Method, Request};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info_span, Span};

use crate::auth::activation::ActivationTokenStore;
use crate::auth::password::CredentialVerifier;
use crate::auth::pipeline::{self, AuthPipeline};
use crate::auth::token::TokenCodec;
use crate::config::GateConfig;
use crate::http::error::{panic_response, ApiError};
use crate::http::handlers::{health, movies, users};
use crate::lifecycle::{BackgroundTasks, Shutdown};
use crate::notify::Notifier;
use crate::security::access_control::{require_activated, require_permission, PermissionGate, RequirePermission};
use crate::security::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::store::Backend;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1_048_576;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub backend: Backend,
    pub codec: Arc<TokenCodec>,
    pub verifier: CredentialVerifier,
    pub activation: ActivationTokenStore,
    pub activation_ttl: chrono::Duration,
    pub notifier: Arc<dyn Notifier>,
    pub background: BackgroundTasks,
}

/// HTTP server for the admission service.
pub struct HttpServer {
    router: Router,
    config: GateConfig,
    limiter: Arc<RateLimiter>,
    background: BackgroundTasks,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GateConfig, backend: Backend, notifier: Arc<dyn Notifier>) -> Self {
        let codec = Arc::new(TokenCodec::from_config(&config.auth));
        let background = BackgroundTasks::new();
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let ttl_secs = i64::try_from(config.activation.ttl_secs).unwrap_or(i64::MAX);

        let state = AppState {
            codec: codec.clone(),
            verifier: CredentialVerifier::new(config.password.bcrypt_cost),
            activation: ActivationTokenStore::new(backend.tokens.clone()),
            activation_ttl: chrono::Duration::try_seconds(ttl_secs).unwrap_or_else(|| chrono::Duration::days(3)),
            notifier,
            background: background.clone(),
            backend,
        };
        let pipeline = AuthPipeline::new(codec, state.backend.directory.clone());
        let gate = PermissionGate::new(state.backend.directory.clone());

        let router = Self::build_router(&config, state, pipeline, gate, limiter.clone());
        Self {
            router,
            config,
            limiter,
            background,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(
        config: &GateConfig,
        state: AppState,
        pipeline: AuthPipeline,
        gate: PermissionGate,
        limiter: Arc<RateLimiter>,
    ) -> Router {
        let read = RequirePermission {
            gate: gate.clone(),
            capability: "movies:read",
        };
        let write = RequirePermission {
            gate: gate.clone(),
            capability: "movies:write",
        };

        let mut router = Router::new()
            .route(
                "/v1/healthcheck",
                get(health::healthcheck.layer(from_fn_with_state(gate, require_activated))),
            )
            .route("/v1/users", post(users::register_user))
            .route("/v1/users/activate", put(users::activate_user))
            .route("/v1/users/auth", put(users::authenticate_user))
            .route(
                "/v1/movies",
                post(movies::create_movie.layer(from_fn_with_state(write.clone(), require_permission))),
            )
            .route(
                "/v1/movies/{id}",
                get(movies::show_movie.layer(from_fn_with_state(read, require_permission)))
                    .patch(movies::update_movie.layer(from_fn_with_state(write.clone(), require_permission)))
                    .delete(movies::delete_movie.layer(from_fn_with_state(write, require_permission))),
            )
            .fallback(not_found)
            .method_not_allowed_fallback(method_not_allowed)
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(from_fn_with_state(pipeline, pipeline::authenticate));

        if config.rate_limit.enabled {
            router = router.layer(from_fn_with_state(limiter, rate_limit_middleware));
        }

        router.with_state(state).layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(panic_response))
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(config.timeouts.request())),
        )
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    pub fn background(&self) -> BackgroundTasks {
        self.background.clone()
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires, then drain background work.
    pub async fn run(self, listener: TcpListener, shutdown: Arc<Shutdown>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let sweeper = self.config.rate_limit.enabled.then(|| {
            self.limiter.spawn_sweeper(
                Duration::from_secs(self.config.rate_limit.sweep_interval_secs),
                shutdown.subscribe(),
            )
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let mut stop = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("Gracefully shutting down");
            })
            .await?;

        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }
        let drain = Duration::from_secs(self.config.shutdown.drain_timeout_secs);
        if self.background.drain(drain).await {
            tracing::info!("Background tasks drained");
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

async fn method_not_allowed(method: Method) -> ApiError {
    ApiError::MethodNotAllowed(method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    use axum::body::to_bytes;
    use axum::extract::ConnectInfo;
    use axum::http::{header, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::auth::principal::PrincipalId;
    use crate::notify::MemoryOutbox;
    use crate::store::{MemoryStore, PrincipalDirectory};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    struct Harness {
        server: HttpServer,
        store: Arc<MemoryStore>,
        outbox: Arc<MemoryOutbox>,
    }

    fn harness_with(mut config: GateConfig) -> Harness {
        config.auth.jwt_secret = SECRET.into();
        config.password.bcrypt_cost = 4;
        let store = Arc::new(MemoryStore::new());
        let outbox = Arc::new(MemoryOutbox::new());
        let server = HttpServer::new(config, Backend::memory(store.clone()), outbox.clone());
        Harness { server, store, outbox }
    }

    fn harness() -> Harness {
        let mut config = GateConfig::default();
        config.rate_limit.enabled = false;
        harness_with(config)
    }

    fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let mut req = builder.body(body).unwrap();
        req.extensions_mut().insert(ConnectInfo(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)),
            40000,
        )));
        req
    }

    async fn send(h: &Harness, req: Request<Body>) -> Response {
        h.server.router().oneshot(req).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Registers, activates and logs in; returns (id, bearer token).
    async fn activated_principal(h: &Harness, email: &str) -> (PrincipalId, String) {
        let response = send(
            h,
            request(
                Method::POST,
                "/v1/users",
                None,
                Some(json!({"name": "Ada", "email": email, "password": "pa55word"})),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let id = json_body(response).await["user"]["id"].as_i64().unwrap();

        h.server.background().drain(Duration::from_secs(2)).await;
        let token = h.outbox.token_for(email).unwrap();
        let response = send(
            h,
            request(Method::PUT, "/v1/users/activate", None, Some(json!({"token": token}))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(
            h,
            request(
                Method::PUT,
                "/v1/users/auth",
                None,
                Some(json!({"email": email, "password": "pa55word"})),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        (id, body["authentication_token"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_register_activate_authenticate() {
        let h = harness();
        let (id, token) = activated_principal(&h, "ada@example.com").await;

        let stored = h.store.principal_by_id(id).await.unwrap();
        assert!(stored.activated);
        assert_eq!(stored.version, 2);
        assert_eq!(h.store.token_count(), 0);

        let response = send(&h, request(Method::GET, "/v1/healthcheck", Some(&token), None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "available");
    }

    #[tokio::test]
    async fn test_register_response_hides_secrets() {
        let h = harness();
        let response = send(
            &h,
            request(
                Method::POST,
                "/v1/users",
                None,
                Some(json!({"name": "Ada", "email": "ada@example.com", "password": "pa55word"})),
            ),
        )
        .await;
        let body = json_body(response).await;
        assert_eq!(body["user"]["activated"], false);
        assert!(body["user"].get("password_hash").is_none());
        h.server.background().drain(Duration::from_secs(2)).await;
        let token = h.outbox.token_for("ada@example.com").unwrap();
        assert!(!body.to_string().contains(&token));
    }

    #[tokio::test]
    async fn test_register_validation_errors() {
        let h = harness();
        let response = send(
            &h,
            request(
                Method::POST,
                "/v1/users",
                None,
                Some(json!({"name": "", "email": "nope", "password": "123"})),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        let fields: Vec<&str> = body["error"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["name", "email", "password"]);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_field_error() {
        let h = harness();
        let body = json!({"name": "Ada", "email": "ada@example.com", "password": "pa55word"});
        send(&h, request(Method::POST, "/v1/users", None, Some(body.clone()))).await;
        let response = send(&h, request(Method::POST, "/v1/users", None, Some(body))).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["error"][0]["field"], "email");
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let h = harness();
        let mut req = request(Method::POST, "/v1/users", None, None);
        *req.body_mut() = Body::from("{not json");
        req.headers_mut()
            .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let response = send(&h, req).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_invalid_activation_token_names_token_field() {
        let h = harness();
        let bogus = "A".repeat(43);
        let response = send(
            &h,
            request(Method::PUT, "/v1/users/activate", None, Some(json!({"token": bogus}))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["error"][0]["field"], "token");
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let h = harness();
        activated_principal(&h, "ada@example.com").await;
        for (email, password) in [("ada@example.com", "wrong-pass"), ("bob@example.com", "pa55word")] {
            let response = send(
                &h,
                request(
                    Method::PUT,
                    "/v1/users/auth",
                    None,
                    Some(json!({"email": email, "password": password})),
                ),
            )
            .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(json_body(response).await["error"], "invalid authentication credentials");
        }
    }

    #[tokio::test]
    async fn test_anonymous_and_inactive_guards() {
        let h = harness();
        let response = send(&h, request(Method::GET, "/v1/healthcheck", None, None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(
            &h,
            request(
                Method::POST,
                "/v1/users",
                None,
                Some(json!({"name": "Bo", "email": "bo@example.com", "password": "pa55word"})),
            ),
        )
        .await;
        let id = json_body(response).await["user"]["id"].as_i64().unwrap();
        let codec = TokenCodec::new(SECRET, "gatekeeper", "gatekeeper", Duration::from_secs(60));
        let bearer = codec.issue(id).unwrap().token;
        let response = send(&h, request(Method::GET, "/v1/healthcheck", Some(&bearer), None)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_bad_bearer_token_is_unauthorized() {
        let h = harness();
        let response = send(&h, request(Method::GET, "/v1/healthcheck", Some("abc.def.ghi"), None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    #[tokio::test]
    async fn test_movie_write_requires_capability_then_conflicts() {
        let h = harness();
        let (id, token) = activated_principal(&h, "ada@example.com").await;
        let movie = json!({"title": "Heat", "year": 1995, "runtime": "170 mins", "genres": ["crime"]});

        let response = send(&h, request(Method::POST, "/v1/movies", Some(&token), Some(movie.clone()))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        h.store.grant_permissions(id, &["movies:write"]).await.unwrap();
        let response = send(&h, request(Method::POST, "/v1/movies", Some(&token), Some(movie))).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        let movie_id = created["movie"]["id"].as_i64().unwrap();
        assert_eq!(created["movie"]["version"], 1);

        let uri = format!("/v1/movies/{movie_id}");
        let patch = json!({"version": 1, "title": "Heat (1995)"});
        let response = send(&h, request(Method::PATCH, &uri, Some(&token), Some(patch.clone()))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["movie"]["version"], 2);

        let response = send(&h, request(Method::PATCH, &uri, Some(&token), Some(patch))).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = send(&h, request(Method::GET, &uri, Some(&token), None)).await;
        assert_eq!(json_body(response).await["movie"]["title"], "Heat (1995)");
    }

    #[tokio::test]
    async fn test_delete_is_unconditional_then_not_found() {
        let h = harness();
        let (id, token) = activated_principal(&h, "ada@example.com").await;
        h.store.grant_permissions(id, &["movies:write"]).await.unwrap();
        let movie = json!({"title": "Heat", "year": 1995, "runtime": "170 mins", "genres": ["crime"]});
        let response = send(&h, request(Method::POST, "/v1/movies", Some(&token), Some(movie))).await;
        let movie_id = json_body(response).await["movie"]["id"].as_i64().unwrap();

        let uri = format!("/v1/movies/{movie_id}");
        let response = send(&h, request(Method::DELETE, &uri, Some(&token), None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = send(&h, request(Method::DELETE, &uri, Some(&token), None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_route_and_method() {
        let h = harness();
        let response = send(&h, request(Method::GET, "/v1/nothing", None, None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "the requested resource could not be found");

        let response = send(&h, request(Method::DELETE, "/v1/users", None, None)).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_request_id_is_returned() {
        let h = harness();
        let response = send(&h, request(Method::GET, "/v1/nothing", None, None)).await;
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_rate_limit_throttles_fifth_request() {
        let h = harness_with(GateConfig::default());
        for _ in 0..4 {
            let response = send(&h, request(Method::GET, "/v1/nothing", None, None)).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
        let response = send(&h, request(Method::GET, "/v1/nothing", None, None)).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(h.server.rate_limiter().tracked_clients(), 1);
    }

    #[tokio::test]
    async fn test_missing_peer_address_is_server_error() {
        let h = harness_with(GateConfig::default());
        let req = Request::builder().uri("/v1/nothing").body(Body::empty()).unwrap();
        let response = send(&h, req).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gatekeeper::config::GateConfig;
use gatekeeper::http::HttpServer;
use gatekeeper::lifecycle::{BackgroundTasks, Shutdown};
use gatekeeper::notify::MemoryOutbox;
use gatekeeper::store::{Backend, MemoryStore};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const SECRET: &str = "integration-secret-0123456789abcdef";
pub const PASSWORD: &str = "pa55word";

/// A server running on an ephemeral port with in-memory collaborators.
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub outbox: Arc<MemoryOutbox>,
    pub background: BackgroundTasks,
    pub shutdown: Arc<Shutdown>,
    pub client: reqwest::Client,
    pub handle: tokio::task::JoinHandle<std::io::Result<()>>,
}

pub fn test_config() -> GateConfig {
    let mut config = GateConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.auth.jwt_secret = SECRET.into();
    config.password.bcrypt_cost = 4;
    config.rate_limit.enabled = false;
    config
}

pub async fn start_server(config: GateConfig) -> TestServer {
    let store = Arc::new(MemoryStore::new());
    let outbox = Arc::new(MemoryOutbox::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = HttpServer::new(config, Backend::memory(store.clone()), outbox.clone());
    let background = server.background();
    let shutdown = Arc::new(Shutdown::new());
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();

    TestServer {
        addr,
        store,
        outbox,
        background,
        shutdown,
        client,
        handle,
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn register(&self, name: &str, email: &str) -> reqwest::Response {
        self.client
            .post(self.url("/v1/users"))
            .json(&json!({ "name": name, "email": email, "password": PASSWORD }))
            .send()
            .await
            .unwrap()
    }

    /// The activation plaintext delivered to `email`, once background delivery settles.
    pub async fn delivered_token(&self, email: &str) -> String {
        assert!(self.background.drain(Duration::from_secs(5)).await);
        self.outbox.token_for(email).expect("no activation message delivered")
    }

    pub async fn activate(&self, token: &str) -> reqwest::Response {
        self.client
            .put(self.url("/v1/users/activate"))
            .json(&json!({ "token": token }))
            .send()
            .await
            .unwrap()
    }

    pub async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.client
            .put(self.url("/v1/users/auth"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .unwrap()
    }

    /// Register, activate and log in; returns the principal id and bearer token.
    pub async fn onboard(&self, name: &str, email: &str) -> (i64, String) {
        let body: Value = self.register(name, email).await.json().await.unwrap();
        let id = body["user"]["id"].as_i64().unwrap();
        let token = self.delivered_token(email).await;
        assert_eq!(self.activate(&token).await.status(), 204);
        let body: Value = self.login(email, PASSWORD).await.json().await.unwrap();
        (id, body["authentication_token"].as_str().unwrap().to_string())
    }
}

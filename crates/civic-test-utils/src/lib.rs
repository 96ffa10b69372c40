//! Testing utilities for the civic portal workspace
//!
//! Shared test helpers, fixtures, and a scripted in-memory backend.

#![allow(missing_docs)]

use async_trait::async_trait;
use civic_client::storage::{self, MemoryStore};
use civic_client::{
    AuthenticatedHttpClient, ClientConfig, ClientError, HttpRequest, HttpResponse, Method,
    Navigator, Role, Session, Transport,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const BASE_URL: &str = "http://portal.test";

/// What the refresh endpoint does
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshBehavior {
    /// 200 with a new access token and optionally a rotated refresh token
    Issue {
        access_token: String,
        refresh_token: Option<String>,
    },
    /// Non-2xx with a message
    Reject { status: u16, message: String },
    /// Transport failure
    Unreachable,
}

impl RefreshBehavior {
    pub fn issue(access_token: &str) -> Self {
        Self::Issue {
            access_token: access_token.to_string(),
            refresh_token: None,
        }
    }

    pub fn reject(status: u16, message: &str) -> Self {
        Self::Reject {
            status,
            message: message.to_string(),
        }
    }
}

/// One request seen by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug)]
struct BackendState {
    valid_tokens: HashSet<String>,
    refresh: RefreshBehavior,
    users: HashMap<String, (String, Role)>,
    routes: HashMap<String, Value>,
    logout_status: u16,
    register_reply: Option<HttpResponse>,
    calls: Vec<RecordedCall>,
}

/// Scripted portal backend
///
/// - `/auth/refresh-token` follows the configured [`RefreshBehavior`] and can
///   be held closed to keep a refresh in flight
/// - `/auth/login` checks registered users
/// - `/auth/register` issues a session unless a reply is scripted
/// - `/auth/logout` answers with the configured status
/// - every other path needs a valid bearer token, else 401; POST and PUT echo
///   the request body
#[derive(Debug)]
pub struct MockBackend {
    state: Mutex<BackendState>,
    gate: watch::Sender<bool>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(BackendState {
                valid_tokens: HashSet::new(),
                refresh: RefreshBehavior::issue("T2"),
                users: HashMap::new(),
                routes: HashMap::new(),
                logout_status: 200,
                register_reply: None,
                calls: Vec::new(),
            }),
            gate,
        }
    }

    pub fn with_valid_token(self, token: &str) -> Self {
        self.state.lock().valid_tokens.insert(token.to_string());
        self
    }

    pub fn with_refresh(self, behavior: RefreshBehavior) -> Self {
        self.state.lock().refresh = behavior;
        self
    }

    pub fn with_user(self, username: &str, password: &str, role: Role) -> Self {
        self.state
            .lock()
            .users
            .insert(username.to_string(), (password.to_string(), role));
        self
    }

    pub fn with_route(self, path: &str, body: Value) -> Self {
        self.state.lock().routes.insert(path.to_string(), body);
        self
    }

    pub fn with_logout_status(self, status: u16) -> Self {
        self.state.lock().logout_status = status;
        self
    }

    /// Answer `/auth/register` with `reply` instead of issuing a session
    pub fn with_register_reply(self, reply: HttpResponse) -> Self {
        self.state.lock().register_reply = Some(reply);
        self
    }

    /// Stop answering refresh calls until [`release_refresh`](Self::release_refresh)
    pub fn hold_refresh(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_refresh(&self) {
        self.gate.send_replace(true);
    }

    pub fn revoke_token(&self, token: &str) {
        self.state.lock().valid_tokens.remove(token);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect()
    }

    pub fn refresh_calls(&self) -> usize {
        self.calls_to("/auth/refresh-token").len()
    }

    fn record(&self, request: &HttpRequest) -> String {
        let path = request
            .url
            .strip_prefix(BASE_URL)
            .unwrap_or(&request.url)
            .to_string();
        self.state.lock().calls.push(RecordedCall {
            method: request.method,
            path: path.clone(),
            bearer: request.bearer_token().map(str::to_string),
            body: request.body.clone(),
        });
        path
    }

    async fn refresh(&self, request: &HttpRequest) -> Result<HttpResponse, ClientError> {
        let mut gate = self.gate.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = gate.wait_for(|open| *open).await;

        let presented = request
            .body
            .as_ref()
            .and_then(|b| b.get("refreshToken"))
            .and_then(Value::as_str)
            .is_some();
        if !presented {
            return Ok(HttpResponse::json(400, &json!({"message": "refreshToken is required"})));
        }

        let mut state = self.state.lock();
        match state.refresh.clone() {
            RefreshBehavior::Issue {
                access_token,
                refresh_token,
            } => {
                state.valid_tokens.insert(access_token.clone());
                let mut body = json!({ "accessToken": access_token });
                if let Some(rotated) = refresh_token {
                    body["refreshToken"] = json!(rotated);
                }
                Ok(HttpResponse::json(200, &body))
            }
            RefreshBehavior::Reject { status, message } => {
                Ok(HttpResponse::json(status, &json!({ "message": message })))
            }
            RefreshBehavior::Unreachable => Err(ClientError::Network("connection reset".into())),
        }
    }

    fn login(&self, request: &HttpRequest) -> HttpResponse {
        let body = request.body.clone().unwrap_or(Value::Null);
        let username = body.get("username").and_then(Value::as_str).unwrap_or_default();
        let password = body.get("password").and_then(Value::as_str).unwrap_or_default();

        let mut state = self.state.lock();
        match state.users.get(username).cloned() {
            Some((expected, role)) if expected == password => {
                let token = format!("access-{username}");
                state.valid_tokens.insert(token.clone());
                HttpResponse::json(
                    200,
                    &json!({
                        "token": token,
                        "refreshToken": format!("refresh-{username}"),
                        "role": role,
                        "username": username,
                    }),
                )
            }
            _ => HttpResponse::json(
                401,
                &json!({"error": "Login failed", "message": "Invalid username or password"}),
            ),
        }
    }

    fn register(&self, request: &HttpRequest) -> HttpResponse {
        let body = request.body.clone().unwrap_or(Value::Null);
        let username = body.get("username").and_then(Value::as_str).unwrap_or_default();
        let role = body.get("role").cloned().unwrap_or_else(|| json!("TOURIST"));

        let mut state = self.state.lock();
        if let Some(reply) = state.register_reply.clone() {
            return reply;
        }
        let token = format!("access-{username}");
        state.valid_tokens.insert(token.clone());
        HttpResponse::json(
            201,
            &json!({
                "accessToken": token,
                "refreshToken": format!("refresh-{username}"),
                "role": role,
                "username": username,
            }),
        )
    }

    fn resource(&self, request: &HttpRequest, path: &str) -> HttpResponse {
        let state = self.state.lock();
        let authorized = request
            .bearer_token()
            .is_some_and(|t| state.valid_tokens.contains(t));
        if !authorized {
            return HttpResponse::json(401, &json!({"message": "Unauthorized"}));
        }
        let echoed = match request.method {
            Method::Post | Method::Put => request.body.clone(),
            _ => None,
        };
        let body = echoed
            .or_else(|| state.routes.get(path).cloned())
            .unwrap_or_else(|| json!({ "path": path }));
        HttpResponse::json(200, &body)
    }
}

#[async_trait]
impl Transport for MockBackend {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let path = self.record(&request);
        match (request.method, path.as_str()) {
            (Method::Post, "/auth/refresh-token") => self.refresh(&request).await,
            (Method::Post, "/auth/login") => Ok(self.login(&request)),
            (Method::Post, "/auth/register") => Ok(self.register(&request)),
            (Method::Post, "/auth/logout") => {
                let status = self.state.lock().logout_status;
                Ok(HttpResponse::text(status, ""))
            }
            _ => Ok(self.resource(&request, &path)),
        }
    }
}

/// Navigator that remembers every redirect
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    redirects: Mutex<Vec<String>>,
    login_redirects: Mutex<usize>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login_redirects(&self) -> usize {
        *self.login_redirects.lock()
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn redirect_to_login(&self, login_route: &str) {
        *self.login_redirects.lock() += 1;
        self.redirects.lock().push(login_route.to_string());
    }

    fn redirect_to(&self, route: &str) {
        self.redirects.lock().push(route.to_string());
    }
}

/// Client, backend, store and navigator wired together
#[derive(Debug, Clone)]
pub struct Harness {
    pub client: Arc<AuthenticatedHttpClient>,
    pub backend: Arc<MockBackend>,
    pub store: Arc<MemoryStore>,
    pub navigator: Arc<RecordingNavigator>,
}

impl Harness {
    pub fn new(backend: MockBackend) -> Self {
        let backend = Arc::new(backend);
        let store = Arc::new(MemoryStore::new());
        let navigator = Arc::new(RecordingNavigator::new());

        let client = AuthenticatedHttpClient::builder(test_config())
            .transport(backend.clone())
            .store(store.clone())
            .navigator(navigator.clone())
            .build()
            .expect("test config is valid");

        Self {
            client: Arc::new(client),
            backend,
            store,
            navigator,
        }
    }

    /// Persist a session with the given tokens
    pub fn seed_session(&self, access_token: &str, refresh_token: Option<&str>) {
        let mut session = Session::new(access_token, Role::Tourist, "ana");
        session.refresh_token = refresh_token.map(str::to_string);
        storage::save_session(self.store.as_ref(), &session).expect("memory store never fails");
    }

    pub fn stored_token(&self) -> Option<String> {
        storage::access_token(self.store.as_ref()).expect("memory store never fails")
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig::new().with_base_url(BASE_URL)
}

/// Poll `condition` until it holds; panics after `timeout`
pub async fn wait_until<F>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let polled = tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not met within {timeout:?}");
}

/// Run `future` with a timeout so a hung refresh fails the test instead of stalling it
pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future)
        .await
        .expect("future did not complete in time")
}

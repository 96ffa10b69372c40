//! Authenticated HTTP client
//!
//! Wraps every backend call with:
//! - Bearer token attachment from the session store
//! - 401 detection and single-flight token refresh
//! - Replay of the failed request with the new token
//! - Session teardown and redirect when the refresh cannot succeed

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::navigator::{Navigator, TracingNavigator};
use crate::refresh::{RefreshCoordinator, RefreshLeader, RefreshOutcome, RefreshStats, Ticket};
use crate::storage::{self, MemoryStore, SessionStore};
use crate::transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
use crate::types::{
    ApiBody, AuthResponse, Credentials, RefreshRequest, RefreshResponse, RegisterRequest, Role,
    Session,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Login endpoint
pub const LOGIN_ENDPOINT: &str = "/auth/login";
/// Registration endpoint
pub const REGISTER_ENDPOINT: &str = "/auth/register";
/// Token refresh endpoint
pub const REFRESH_ENDPOINT: &str = "/auth/refresh-token";
/// Logout endpoint
pub const LOGOUT_ENDPOINT: &str = "/auth/logout";

/// Endpoints under `/auth/` never trigger refresh recovery
#[inline]
#[must_use]
pub fn is_auth_endpoint(endpoint: &str) -> bool {
    endpoint.contains("/auth/")
}

/// Per-call request options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Method
    pub method: Method,
    /// Extra headers, applied over the defaults
    pub headers: BTreeMap<String, String>,
    /// JSON body
    pub body: Option<serde_json::Value>,
}

impl RequestOptions {
    /// GET without body
    #[inline]
    #[must_use]
    pub fn get() -> Self {
        Self::default()
    }

    /// POST with JSON body
    #[inline]
    #[must_use]
    pub fn post(body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
            ..Self::default()
        }
    }

    /// PUT with JSON body
    #[inline]
    #[must_use]
    pub fn put(body: serde_json::Value) -> Self {
        Self {
            method: Method::Put,
            body: Some(body),
            ..Self::default()
        }
    }

    /// DELETE without body
    #[inline]
    #[must_use]
    pub fn delete() -> Self {
        Self {
            method: Method::Delete,
            ..Self::default()
        }
    }

    /// With method
    #[inline]
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// With extra header
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Builder for [`AuthenticatedHttpClient`]
#[derive(Debug)]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn SessionStore>>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl ClientBuilder {
    /// With transport (defaults to `reqwest`)
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// With session store (defaults to in-memory)
    #[inline]
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// With navigator (defaults to logging only)
    #[inline]
    #[must_use]
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Validate the configuration and build the client
    pub fn build(self) -> Result<AuthenticatedHttpClient, ClientError> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.config.request_timeout())?),
        };

        Ok(AuthenticatedHttpClient {
            config: self.config,
            transport,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            navigator: self.navigator.unwrap_or_else(|| Arc::new(TracingNavigator)),
            refresh: RefreshCoordinator::new(),
        })
    }
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Transport")
    }
}

/// REST client with bearer auth and transparent token refresh
///
/// One instance per application session; share it behind an `Arc`.
#[derive(Debug)]
pub struct AuthenticatedHttpClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn SessionStore>,
    navigator: Arc<dyn Navigator>,
    refresh: RefreshCoordinator,
}

impl AuthenticatedHttpClient {
    /// Start building a client
    #[inline]
    #[must_use]
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            store: None,
            navigator: None,
        }
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Session store in use
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Refresh coordinator snapshot
    #[inline]
    #[must_use]
    pub fn refresh_stats(&self) -> RefreshStats {
        self.refresh.stats()
    }

    /// Perform a request, recovering once from an expired access token
    ///
    /// # Errors
    /// - `ClientError::Network` if the transport fails
    /// - `ClientError::Http` for non-2xx responses
    /// - `ClientError::SessionExpired` if a 401 cannot be recovered
    pub async fn request(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiBody, ClientError> {
        let token = storage::access_token(self.store.as_ref())?;
        let response = self.send(endpoint, &options, token.as_deref()).await?;

        if response.status == 401 && !is_auth_endpoint(endpoint) {
            tracing::debug!("{} {} returned 401, attempting recovery", options.method, endpoint);
            return self.recover(endpoint, &options, token.as_deref()).await;
        }

        into_body(endpoint, response)
    }

    /// GET
    pub async fn get(&self, endpoint: &str) -> Result<ApiBody, ClientError> {
        self.request(endpoint, RequestOptions::get()).await
    }

    /// POST with a serializable body
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<ApiBody, ClientError> {
        self.request(endpoint, RequestOptions::post(serde_json::to_value(body)?))
            .await
    }

    /// PUT with a serializable body
    pub async fn put<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<ApiBody, ClientError> {
        self.request(endpoint, RequestOptions::put(serde_json::to_value(body)?))
            .await
    }

    /// DELETE
    pub async fn delete(&self, endpoint: &str) -> Result<ApiBody, ClientError> {
        self.request(endpoint, RequestOptions::delete()).await
    }

    /// GET and deserialize the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ClientError> {
        self.get(endpoint).await?.json()
    }

    /// POST and deserialize the JSON body
    pub async fn post_json<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.post(endpoint, body).await?.json()
    }

    /// Log in and persist the session
    ///
    /// # Errors
    /// - `ClientError::Http` if the server rejects the credentials
    /// - `ClientError::InvalidResponse` if the response lacks a token or role
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, ClientError> {
        tracing::info!("Login attempt for username: {}", credentials.username);

        let body = self.post(LOGIN_ENDPOINT, credentials).await?;
        let session = body
            .json::<AuthResponse>()?
            .into_session(&credentials.username)?;
        storage::save_session(self.store.as_ref(), &session)?;

        tracing::info!("Login successful for {} (role {})", session.username, session.role);
        Ok(session)
    }

    /// Register; persists a session when the server returns one
    pub async fn register(&self, request: &RegisterRequest) -> Result<Option<Session>, ClientError> {
        tracing::info!("Registration attempt for username: {}", request.username);

        let body = self.post(REGISTER_ENDPOINT, request).await?;
        let Some(value) = body.as_json() else {
            tracing::info!("Registration accepted without a session");
            return Ok(None);
        };

        let response: AuthResponse = serde_json::from_value(value.clone())?;
        if response.access_token().is_none() || response.role.is_none() {
            return Ok(None);
        }

        let session = response.into_session(&request.username)?;
        storage::save_session(self.store.as_ref(), &session)?;
        tracing::info!("Registered {} as {}", session.username, session.role);
        Ok(Some(session))
    }

    /// Notify the server (best effort), clear local state, redirect to login
    ///
    /// # Errors
    /// Only local storage failures are reported; the server call never fails
    /// this method.
    pub async fn logout(&self) -> Result<(), ClientError> {
        if let Err(e) = self
            .request(LOGOUT_ENDPOINT, RequestOptions::default().with_method(Method::Post))
            .await
        {
            tracing::warn!("Logout notification failed: {}", e);
        }

        let cleared = storage::clear_session(self.store.as_ref());
        self.navigator.redirect_to_login(&self.config.login_route);
        cleared.map_err(Into::into)
    }

    /// Stored session, if any
    pub fn session(&self) -> Result<Option<Session>, ClientError> {
        Ok(storage::load_session(self.store.as_ref())?)
    }

    /// Check if an access token is stored
    pub fn is_authenticated(&self) -> Result<bool, ClientError> {
        Ok(storage::access_token(self.store.as_ref())?.is_some())
    }

    /// Stored role, if any
    pub fn role(&self) -> Result<Option<Role>, ClientError> {
        Ok(self
            .store
            .get(storage::KEY_ROLE)?
            .and_then(|r| r.parse().ok()))
    }

    async fn recover(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        sent_token: Option<&str>,
    ) -> Result<ApiBody, ClientError> {
        let token = loop {
            let current = storage::access_token(self.store.as_ref())?;
            match (sent_token, current) {
                (Some(_), None) => {
                    tracing::debug!("Session ended while {} was in flight", endpoint);
                    return Err(ClientError::SessionExpired(
                        "session ended while the request was in flight".into(),
                    ));
                }
                (sent, Some(current)) if sent != Some(current.as_str()) => {
                    tracing::debug!("Token changed while {} was in flight", endpoint);
                    break current;
                }
                _ => {}
            }

            let refresh_token = storage::refresh_token(self.store.as_ref())?;
            match (self.refresh.join(refresh_token.is_some())?, refresh_token) {
                (Ticket::Leader(leader), Some(refresh_token)) => {
                    break self.lead_refresh(leader, &refresh_token).await?;
                }
                (Ticket::Waiter(pending), _) => match pending.wait().await {
                    RefreshOutcome::Refreshed(token) => break token,
                    RefreshOutcome::Failed(e) => return Err(e),
                    RefreshOutcome::Abandoned => {
                        tracing::debug!("Refresh leader went away, rejoining");
                    }
                },
                (Ticket::Expired | Ticket::Leader(_), _) => {
                    tracing::warn!("No refresh token available, ending session");
                    self.expire_session();
                    return Err(ClientError::SessionExpired(
                        "no refresh token available".into(),
                    ));
                }
            }
        };

        tracing::debug!("Replaying {} {} with refreshed token", options.method, endpoint);
        let response = self.send(endpoint, options, Some(&token)).await?;
        into_body(endpoint, response)
    }

    async fn lead_refresh(
        &self,
        leader: RefreshLeader<'_>,
        refresh_token: &str,
    ) -> Result<String, ClientError> {
        match self.refresh_tokens(refresh_token).await {
            Ok(access_token) => {
                let released = leader.succeed(&access_token);
                tracing::info!("Access token refreshed, releasing {} queued request(s)", released);
                Ok(access_token)
            }
            Err(e) => {
                tracing::error!("Token refresh failed: {}", e);
                let error = ClientError::SessionExpired(format!("token refresh failed: {e}"));
                let rejected = leader.fail(error.clone());
                if rejected > 0 {
                    tracing::warn!("Rejected {} queued request(s)", rejected);
                }
                self.expire_session();
                Err(error)
            }
        }
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<String, ClientError> {
        let body = serde_json::to_value(RefreshRequest { refresh_token })?;
        let response = self
            .send(REFRESH_ENDPOINT, &RequestOptions::post(body), None)
            .await?;
        let tokens: RefreshResponse = into_body(REFRESH_ENDPOINT, response)?.json()?;

        storage::save_tokens(
            self.store.as_ref(),
            &tokens.access_token,
            tokens.refresh_token.as_deref(),
        )?;
        Ok(tokens.access_token)
    }

    fn expire_session(&self) {
        if let Err(e) = storage::clear_session(self.store.as_ref()) {
            tracing::error!("Failed to clear session: {}", e);
        }
        self.navigator.redirect_to_login(&self.config.login_route);
    }

    async fn send(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<HttpResponse, ClientError> {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        if let Some(token) = token {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        for (name, value) in &options.headers {
            headers.retain(|k: &String, _| !k.eq_ignore_ascii_case(name));
            headers.insert(name.clone(), value.clone());
        }

        let request = HttpRequest {
            method: options.method,
            url: self.config.url_for(endpoint),
            headers,
            body: options.body.clone(),
        };

        self.transport.send(request).await.map_err(|e| {
            tracing::error!("API request failed: {} {}: {}", options.method, endpoint, e);
            e
        })
    }
}

fn into_body(endpoint: &str, response: HttpResponse) -> Result<ApiBody, ClientError> {
    let status = response.status;
    let parsed = ApiBody::parse(response.content_type.as_deref(), &response.body);

    if response.is_success() {
        return parsed;
    }

    let body = parsed
        .unwrap_or_else(|_| ApiBody::Text(String::from_utf8_lossy(&response.body).into_owned()));
    let message = body.error_message(status);
    tracing::debug!("{} failed with {}: {}", endpoint, status, message);
    Err(ClientError::Http { status, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingNavigator(AtomicUsize);

    impl Navigator for CountingNavigator {
        fn redirect_to_login(&self, _login_route: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn redirect_to(&self, _route: &str) {}
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.set(storage::KEY_TOKEN, "T1").unwrap();
        store.set(storage::KEY_REFRESH_TOKEN, "R1").unwrap();
        store
    }

    fn client_with(transport: MockTransport) -> AuthenticatedHttpClient {
        AuthenticatedHttpClient::builder(ClientConfig::new())
            .transport(Arc::new(transport))
            .build()
            .unwrap()
    }

    #[test]
    fn auth_endpoints_are_exempt() {
        assert!(is_auth_endpoint("/auth/login"));
        assert!(is_auth_endpoint("/auth/refresh-token"));
        assert!(is_auth_endpoint("/auth/logout"));
        assert!(!is_auth_endpoint("/api/hotels"));
        assert!(!is_auth_endpoint("/api/authors"));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let result = AuthenticatedHttpClient::builder(ClientConfig::new().with_timeout_secs(0))
            .transport(Arc::new(MockTransport::new()))
            .build();
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn attaches_bearer_and_merges_headers() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| {
                req.url == "http://localhost:8080/api/hotels"
                    && req.bearer_token() == Some("T1")
                    && req.header("Accept-Language") == Some("fr")
                    && req.header("Content-Type") == Some("application/json")
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::json(200, &json!([{"id": 1}]))));

        let client = client_with(transport);
        client.store().set(storage::KEY_TOKEN, "T1").unwrap();

        let body = client
            .request("/api/hotels", RequestOptions::get().with_header("Accept-Language", "fr"))
            .await
            .unwrap();
        assert_eq!(body, ApiBody::Json(json!([{"id": 1}])));
    }

    #[tokio::test]
    async fn no_authorization_header_without_token() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| req.header("Authorization").is_none())
            .returning(|_| Ok(HttpResponse::text(200, "pong")));

        let client = client_with(transport);
        assert_eq!(
            client.get("/api/ping").await.unwrap(),
            ApiBody::Text("pong".into())
        );
    }

    #[tokio::test]
    async fn non_2xx_carries_server_message() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .returning(|_| Ok(HttpResponse::json(404, &json!({"message": "Hotel not found"}))));

        let client = client_with(transport);
        let err = client.get("/api/hotels/9").await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Http {
                status: 404,
                message: "Hotel not found".into()
            }
        );
    }

    #[tokio::test]
    async fn network_errors_propagate() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .returning(|_| Err(ClientError::Network("connection refused".into())));

        let client = client_with(transport);
        assert_eq!(
            client.get("/api/hotels").await.unwrap_err(),
            ClientError::Network("connection refused".into())
        );
    }

    #[tokio::test]
    async fn malformed_error_body_falls_back_to_text() {
        let mut transport = MockTransport::new();
        transport.expect_send().returning(|_| {
            Ok(HttpResponse {
                status: 500,
                content_type: Some("application/json".into()),
                body: b"<html>oops</html>".to_vec(),
            })
        });

        let client = client_with(transport);
        let err = client.get("/api/hotels").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.to_string(), "HTTP 500: <html>oops</html>");
    }

    #[tokio::test]
    async fn replay_401_is_not_retried_again() {
        let mut transport = MockTransport::new();
        transport.expect_send().returning(|req| {
            if req.url.ends_with(REFRESH_ENDPOINT) {
                Ok(HttpResponse::json(200, &json!({"accessToken": "T2"})))
            } else {
                Ok(HttpResponse::json(401, &json!({"message": "Unauthorized"})))
            }
        });

        let client = client_with(transport);
        client.store().set(storage::KEY_TOKEN, "T1").unwrap();
        client.store().set(storage::KEY_REFRESH_TOKEN, "R1").unwrap();

        let err = client.get("/api/hotels").await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(client.refresh_stats().cycles, 1);
    }

    #[tokio::test]
    async fn validation_error_field_is_surfaced() {
        let mut transport = MockTransport::new();
        transport.expect_send().returning(|_| {
            Ok(HttpResponse::json(
                400,
                &json!({"error": "Validation failed", "fields": {"email": "must be valid"}}),
            ))
        });

        let client = client_with(transport);
        let err = client.post("/auth/register", &json!({"email": "x"})).await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP 400: Validation failed");
    }

    #[tokio::test]
    async fn stale_401_replays_with_newer_token() {
        let store = seeded_store();
        let rotated = store.clone();

        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(move |req| match req.bearer_token() {
                Some("T2") => Ok(HttpResponse::json(200, &json!({"ok": true}))),
                _ => {
                    // Another request finished a refresh while this one was in flight
                    rotated.set(storage::KEY_TOKEN, "T2").unwrap();
                    Ok(HttpResponse::json(401, &json!({"message": "Unauthorized"})))
                }
            });

        let client = AuthenticatedHttpClient::builder(ClientConfig::new())
            .transport(Arc::new(transport))
            .store(store)
            .build()
            .unwrap();

        let body = client.get("/api/hotels").await.unwrap();
        assert_eq!(body, ApiBody::Json(json!({"ok": true})));
        assert_eq!(client.refresh_stats().cycles, 0);
    }

    #[tokio::test]
    async fn stale_401_after_session_ended_does_not_redirect_again() {
        let store = seeded_store();
        let cleared = store.clone();
        let navigator = Arc::new(CountingNavigator::default());

        let mut transport = MockTransport::new();
        transport.expect_send().times(1).returning(move |_| {
            storage::clear_session(cleared.as_ref()).unwrap();
            Ok(HttpResponse::json(401, &json!({"message": "Unauthorized"})))
        });

        let client = AuthenticatedHttpClient::builder(ClientConfig::new())
            .transport(Arc::new(transport))
            .store(store)
            .navigator(navigator.clone())
            .build()
            .unwrap();

        let err = client.get("/api/hotels").await.unwrap_err();
        assert!(err.requires_login());
        assert_eq!(navigator.0.load(Ordering::SeqCst), 0);
        assert_eq!(client.refresh_stats().cycles, 0);
    }
}

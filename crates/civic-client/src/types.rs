//! Core types for the civic portal client
//!
//! Defines:
//! - User roles and the persisted session
//! - Auth endpoint payloads (login, register, refresh)
//! - Parsed response bodies

use crate::error::ClientError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Portal user role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Portal administrator
    Admin,
    /// Tourism module user
    Tourist,
    /// Student module user
    Student,
    /// Job module user
    JobApplicant,
    /// Business module user
    BusinessUser,
}

impl Role {
    /// All roles, in declaration order
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::Tourist,
        Role::Student,
        Role::JobApplicant,
        Role::BusinessUser,
    ];

    /// Wire name, as stored under the `role` key
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Tourist => "TOURIST",
            Self::Student => "STUDENT",
            Self::JobApplicant => "JOB_APPLICANT",
            Self::BusinessUser => "BUSINESS_USER",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Authenticated session, as persisted in the session store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Short-lived bearer credential
    pub access_token: String,
    /// Longer-lived credential exchanged for new access tokens
    pub refresh_token: Option<String>,
    /// User role
    pub role: Role,
    /// Login name
    pub username: String,
    /// Opaque user profile returned by the server
    pub user: Option<serde_json::Value>,
}

impl Session {
    /// Create a session without refresh token or profile
    #[inline]
    #[must_use]
    pub fn new(access_token: impl Into<String>, role: Role, username: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            role,
            username: username.into(),
            user: None,
        }
    }

    /// With refresh token
    #[inline]
    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// With user profile
    #[inline]
    #[must_use]
    pub fn with_user(mut self, user: serde_json::Value) -> Self {
        self.user = Some(user);
        self
    }
}

/// Login form payload
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Login name
    pub username: String,
    /// Plain-text password
    pub password: String,
}

impl Credentials {
    /// Create credentials
    #[inline]
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Registration form payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Login name
    pub username: String,
    /// Contact email
    pub email: String,
    /// Plain-text password
    pub password: String,
    /// Requested role; the server picks one when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Response of `/auth/login` and `/auth/register`
///
/// Older backends send `token`, newer ones `accessToken`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Access token (legacy field name)
    #[serde(default)]
    pub token: Option<String>,
    /// Access token
    #[serde(default)]
    pub access_token: Option<String>,
    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// User role
    #[serde(default)]
    pub role: Option<Role>,
    /// Login name
    #[serde(default)]
    pub username: Option<String>,
    /// User profile
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}

impl AuthResponse {
    /// Access token under either field name
    #[inline]
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref().or(self.token.as_deref())
    }

    /// Validate into a session; `fallback_username` fills a missing `username`
    pub fn into_session(self, fallback_username: &str) -> Result<Session, ClientError> {
        let access_token = self
            .access_token()
            .map(str::to_string)
            .ok_or_else(|| ClientError::InvalidResponse("missing access token".into()))?;
        let role = self
            .role
            .ok_or_else(|| ClientError::InvalidResponse("missing role".into()))?;

        Ok(Session {
            access_token,
            refresh_token: self.refresh_token,
            role,
            username: self.username.unwrap_or_else(|| fallback_username.to_string()),
            user: self.user,
        })
    }
}

/// Body of `POST /auth/refresh-token`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    /// Stored refresh token
    pub refresh_token: &'a str,
}

/// Response of `POST /auth/refresh-token`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    /// New access token
    pub access_token: String,
    /// Rotated refresh token, if the server rotates
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Parsed response body
#[derive(Debug, Clone, PartialEq)]
pub enum ApiBody {
    /// `application/json` body
    Json(serde_json::Value),
    /// Any other body, as text
    Text(String),
}

impl ApiBody {
    /// Parse raw bytes according to the response content type
    pub fn parse(content_type: Option<&str>, bytes: &[u8]) -> Result<Self, ClientError> {
        let is_json = content_type.is_some_and(|ct| ct.contains("application/json"));
        if is_json && !bytes.is_empty() {
            Ok(Self::Json(serde_json::from_slice(bytes)?))
        } else {
            Ok(Self::Text(String::from_utf8_lossy(bytes).into_owned()))
        }
    }

    /// Message to surface for a failed request with this body
    #[must_use]
    pub fn error_message(&self, status: u16) -> String {
        match self {
            Self::Json(value) => ["message", "error"]
                .iter()
                .find_map(|field| value.get(field).and_then(serde_json::Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| format!("Error {status}")),
            Self::Text(text) if !text.trim().is_empty() => text.clone(),
            Self::Text(_) => format!("Error {status}"),
        }
    }

    /// Deserialize a JSON body into `T`
    pub fn json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        match self {
            Self::Json(value) => Ok(serde_json::from_value(value)?),
            Self::Text(text) => Err(ClientError::Decode(format!(
                "expected JSON body, got text ({} bytes)",
                text.len()
            ))),
        }
    }

    /// JSON value, if any
    #[inline]
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

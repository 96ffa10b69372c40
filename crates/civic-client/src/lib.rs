//! Civic Client - authenticated access to the civic portal backend
//!
//! Provides:
//! - Bearer-token requests against the portal REST API
//! - Single-flight access-token refresh with replay of queued requests
//! - Session persistence in a flat key-value store
//! - Role routing and page access decisions
//! - Typed CRUD over the portal's resource collections
//!
//! # Example
//!
//! ```rust,ignore
//! use civic_client::{AuthenticatedHttpClient, ClientConfig, Credentials};
//!
//! # async fn example() -> Result<(), civic_client::ClientError> {
//! let client = AuthenticatedHttpClient::builder(ClientConfig::new()).build()?;
//!
//! let session = client.login(&Credentials::new("ana", "secret")).await?;
//! println!("Logged in as {}", session.role);
//!
//! let hotels = client.get("/api/hotels").await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod navigator;
pub mod refresh;
pub mod resources;
pub mod routing;
pub mod storage;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{is_auth_endpoint, AuthenticatedHttpClient, ClientBuilder, RequestOptions};
pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use guard::{AuthGuard, GuardDecision};
pub use navigator::{Navigator, TracingNavigator};
pub use refresh::{RefreshCoordinator, RefreshOutcome, RefreshState, RefreshStats};
pub use resources::{Collection, Listing, ResourceClient};
pub use routing::RoleRouter;
pub use storage::{FileStore, MemoryStore, SessionStore, StorageError};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
pub use types::{ApiBody, AuthResponse, Credentials, RegisterRequest, Role, Session};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the civic client
    pub use crate::{
        ApiBody, AuthenticatedHttpClient, ClientConfig, ClientError, Collection, Credentials,
        RequestOptions, Role, Session, SessionStore,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

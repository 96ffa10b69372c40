//! Page access guard
//!
//! Decides, from the current page path and the stored session, whether a page
//! may be shown. Public pages are always allowed; every other page needs a
//! token, and admin pages need the `ADMIN` role.

use crate::error::ClientError;
use crate::routing::RoleRouter;
use crate::storage::{self, SessionStore};
use crate::types::Role;

/// Pages reachable without a session
pub const PUBLIC_PAGES: [&str; 5] = [
    "/index.html",
    "/auth/login.html",
    "/auth/register.html",
    "/about.html",
    "/contact.html",
];

/// Outcome of a guard check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Show the page
    Allow,
    /// No session; go to login
    RedirectToLogin,
    /// Logged in, but the page is not for this role
    RedirectToDashboard(Option<Role>),
}

impl GuardDecision {
    /// Route to navigate to, if any
    #[must_use]
    pub fn redirect_route(&self, login_route: &str) -> Option<String> {
        match self {
            Self::Allow => None,
            Self::RedirectToLogin => Some(login_route.to_string()),
            Self::RedirectToDashboard(role) => Some(RoleRouter::dashboard_for(*role).to_string()),
        }
    }
}

/// Stateless access guard
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthGuard;

impl AuthGuard {
    /// Check if the path is a public page
    #[must_use]
    pub fn is_public(path: &str) -> bool {
        PUBLIC_PAGES.iter().any(|page| path.ends_with(page))
    }

    /// Check if the path is an admin-only page
    #[must_use]
    pub fn is_admin_page(path: &str) -> bool {
        path.contains("admin-") || path.ends_with("users.html")
    }

    /// Decide from explicit token presence and role
    #[must_use]
    pub fn check(path: &str, has_token: bool, role: Option<Role>) -> GuardDecision {
        if Self::is_public(path) {
            return GuardDecision::Allow;
        }
        if !has_token {
            tracing::warn!("No token found for {}, redirecting to login", path);
            return GuardDecision::RedirectToLogin;
        }
        if Self::is_admin_page(path) && role != Some(Role::Admin) {
            tracing::warn!("Unauthorized access to admin page {} by {:?}", path, role);
            return GuardDecision::RedirectToDashboard(role);
        }
        GuardDecision::Allow
    }

    /// Decide from the session store
    pub fn check_store(path: &str, store: &dyn SessionStore) -> Result<GuardDecision, ClientError> {
        let has_token = storage::access_token(store)?.is_some();
        let role = store
            .get(storage::KEY_ROLE)?
            .and_then(|r| r.parse::<Role>().ok());
        Ok(Self::check(path, has_token, role))
    }
}

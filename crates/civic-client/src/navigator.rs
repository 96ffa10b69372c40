//! Navigation side effects
//!
//! The portal pages react to session loss by moving the user to the login
//! page. The client only decides *when*; a [`Navigator`] decides *how*.

/// Receives redirect requests from the client
pub trait Navigator: Send + Sync + std::fmt::Debug {
    /// Session ended; send the user to the login entry point
    fn redirect_to_login(&self, login_route: &str);

    /// Send the user to an arbitrary route
    fn redirect_to(&self, route: &str);
}

/// Navigator that only logs, for headless hosts
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn redirect_to_login(&self, login_route: &str) {
        tracing::warn!("Session ended, login required at {}", login_route);
    }

    fn redirect_to(&self, route: &str) {
        tracing::info!("Redirecting to {}", route);
    }
}

//! Role-based landing routes

use crate::config::DEFAULT_LOGIN_ROUTE;
use crate::types::Role;

/// Maps roles to their dashboard routes
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleRouter;

impl RoleRouter {
    /// Dashboard route for a role; login route when the role is unknown
    #[must_use]
    pub fn dashboard_for(role: Option<Role>) -> &'static str {
        match role {
            Some(Role::Admin) => "/dashboards/admin-dashboard.html",
            Some(Role::Tourist) => "/dashboards/tourism-dashboard.html",
            Some(Role::Student) => "/dashboards/student-dashboard.html",
            Some(Role::JobApplicant) => "/dashboards/job-dashboard.html",
            Some(Role::BusinessUser) => "/dashboards/business-dashboard.html",
            None => DEFAULT_LOGIN_ROUTE,
        }
    }

    /// Dashboard route for a raw role name, as read from storage
    #[must_use]
    pub fn dashboard_for_name(role: Option<&str>) -> &'static str {
        let parsed = role.and_then(|r| r.parse::<Role>().ok());
        if parsed.is_none() {
            tracing::warn!("Unknown role: {:?}", role);
        }
        Self::dashboard_for(parsed)
    }
}

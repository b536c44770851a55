pub mod console_auth;
pub mod maintenance;
pub mod s2s;
pub mod tenant;

pub use console_auth::{console_auth_middleware, console_token, ConsoleUser, ACCESS_TOKEN_COOKIE};
pub use maintenance::maintenance_middleware;
pub use s2s::{require_s2s_scope, s2s_auth_middleware, S2sContext, S2sRequest};
pub use tenant::{
    require_console_scope, require_permission, require_role, require_super_admin,
    tenant_middleware, CurrentTenant,
};

//! Services layer for basaltpass-auth.
//!
//! Business logic for the authorization server, the console session
//! lifecycle and the tenant guard. Handlers and middleware stay thin.

pub mod audit;
pub mod client_registry;
pub mod console_token;
pub mod email;
pub mod error;
pub mod keys;
pub mod oauth;
pub mod session;
pub mod settings;
pub mod tenant_guard;

pub use audit::AuditService;
pub use client_registry::ClientRegistry;
pub use console_token::{ConsoleClaims, ConsoleScope, ConsoleTokenIssuer};
pub use email::{EmailProvider, LogEmailService, MockEmailService, SmtpEmailService};
pub use error::ServiceError;
pub use keys::KeyManager;
pub use oauth::OAuthServer;
pub use session::SessionService;
pub use settings::SettingsCache;
pub use tenant_guard::{TenantContext, TenantGuard};

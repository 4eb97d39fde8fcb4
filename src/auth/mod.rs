//! Authentication Module
//! Mission: Decide who the caller is, with revocable sessions behind stateless tokens

pub mod api;
pub mod classic;
pub mod guard;
pub mod jwt;
pub mod mailer;
pub mod middleware;
pub mod models;
pub mod password;
pub mod session;

pub use api::{router, AuthState};
pub use classic::ClassicAuth;
pub use guard::{RequestGuard, Resolution};
pub use jwt::TokenService;
pub use middleware::{api_auth_middleware, privilege_gate, site_auth_middleware, PrivilegeGate};
pub use session::SessionLedger;

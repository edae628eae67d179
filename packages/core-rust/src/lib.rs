//! `TenantGate` core: tenant, identity, role, and error-code types shared by
//! the server and its clients.

pub mod error;
pub mod types;

pub use error::{ErrorBody, ErrorCode};
pub use types::{Principal, Role, Session, TenantId, UserId};

pub mod internal_auth;

pub use internal_auth::{InternalAuthState, internal_auth_middleware};

mod auth_middleware;

pub use auth_middleware::{BasicAuthState, basic_auth};

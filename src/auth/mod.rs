//! Authentication: JWT issuance/validation and request guarding.

pub mod jwt;
pub mod middleware;
pub mod models;

pub use jwt::JwtHandler;
pub use middleware::{auth_middleware, AuthError};
pub use models::{AccountView, AuthResponse, Claims, LoginRequest, RegisterRequest};

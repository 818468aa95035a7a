//! Client-side session layer for the campus student-management API.
//!
//! Every screen issues its calls through one [`SessionGateway`]. The gateway
//! attaches the stored access token and, when the backend answers 401,
//! exchanges the refresh token exactly once for all concurrently failing
//! requests before replaying them. An unrecoverable refresh ends the session
//! and notifies subscribers through [`SessionEvent`].

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod request;
pub mod store;
pub mod types;

pub use auth::RememberedLogin;
pub use config::GatewayConfig;
pub use error::{GatewayError, RefreshError};
pub use events::{ListenerId, SessionEvent};
pub use gateway::{ApiResponse, AuthState, GatewayBuilder, SessionGateway};
pub use request::ApiRequest;
pub use store::{CredentialStore, FileStore, MemoryStore, StoreError};
pub use types::{ApiEnvelope, Role, TokenPair};

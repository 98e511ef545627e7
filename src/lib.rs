//! PDK access-control client: login emulation, token caching and
//! authenticated resource calls.

// Configuration and account credentials
pub mod config;

// Token persistence
pub mod credentials;

// Login flow and token exchanges
pub mod auth;

// Tiered credential refresh
pub mod lifecycle;

// Authenticated HTTP client
pub mod client;

pub use auth::{AuthError, AuthFlow, FlowState, Outcome, TokenExchange};
pub use client::{AuthenticatedClient, RequestError};
pub use config::{load_config, AccountCredentials, PdkConfig, Platform};
pub use credentials::{CredentialSet, StoreError, TokenStore};
pub use lifecycle::TokenLifecycleManager;

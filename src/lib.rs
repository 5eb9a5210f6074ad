// src/lib.rs

pub mod client;
pub mod config;
pub mod error;
pub mod flow;
pub mod guard;
pub mod json;
pub mod model;
pub mod pkce;
pub mod resource;
pub mod server;
pub mod session;
pub mod validator;

/// The public prelude for the `feide-oidc` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::client::OidcClient;
    pub use crate::config::{
        ClientConfig, ConfigBuilder, LoginSettings, ResourceServerSettings, ValidationDetails,
    };
    pub use crate::error::{AntiForgeryReason, FeideOidcError, ValidationError};
    pub use crate::flow::{LoginFlow, LogoutOutcome, UserSession};
    pub use crate::resource::{DataSource, MeResponse};
    pub use crate::session::{MemorySessions, SessionStore};
    pub use crate::validator::{Claims, ScopeSet};
    pub use jsonwebtoken::Algorithm;
}

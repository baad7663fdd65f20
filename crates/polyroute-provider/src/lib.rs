//! Upstream side of the pipeline: auth material, outbound HTTP, and the
//! per-provider adapter that ties them together.

pub mod adapter;
pub mod auth;
mod error;
mod snapshot;
pub mod transport;

pub use adapter::{AdapterConfig, ProviderAdapter, ProviderFailure, ProviderResponse};
pub use auth::{ApiKeyAuth, AuthError, AuthFileAuth, AuthProvider, OAuthAuth, OAuthConfig};
pub use auth::store::{TokenFile, TokenStore};
pub use error::{Disposition, UpstreamErrorKind, classify_status, disposition, is_daily_quota};
pub use snapshot::SnapshotWriter;
pub use transport::{
    HttpTransport, OutboundBody, OutboundRequest, OutboundResponse, TransportError,
    TransportErrorKind,
};

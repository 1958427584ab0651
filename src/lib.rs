//! Session-authentication core for API-backed client applications.
//!
//! The crate owns authentication state, decides when access credentials are
//! due for renewal, serializes renewal so concurrent callers never race,
//! and gates navigation and API calls on authentication and authorization
//! state. Views and navigation live in the embedding application, which
//! talks to this core through [`AuthService`], [`RequestAuthorizer`], and
//! [`Guards`].

pub mod api;
pub mod authorizer;
pub mod claims;
pub mod config;
pub mod error;
pub mod guards;
pub mod http;
pub mod permissions;
pub mod refresh;
pub mod service;
pub mod session;
pub mod store;

pub use api::{LoginRequest, TokenResponse};
pub use authorizer::RequestAuthorizer;
pub use claims::{decode_token, Identity};
pub use config::{AuthConfig, DEFAULT_REFRESH_BUFFER_SECS};
pub use error::{AuthError, AuthResult};
pub use guards::{GuardDecision, Guards, Redirect};
pub use http::{HttpClient, MockHttpClient, ReqwestHttpClient, SimpleHttpResponse};
pub use permissions::PermissionCache;
pub use refresh::{RefreshCoordinator, TokenPair};
pub use service::AuthService;
pub use session::{AuthState, SessionState};
pub use store::{BlobStore, FileBlobStore, MemoryBlobStore, StoredTokens, TokenStore};

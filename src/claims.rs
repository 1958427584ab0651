//! Credential decoding.
//!
//! Extracts the user identity from an access token without any network call
//! or signature verification; the server remains the authority on validity,
//! the client only reads claims for display and authorization hints.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{malformed_token, AuthResult};

/// Decoded user identity, derived from the access token.
///
/// Recomputed whenever a new token is installed; never persisted on its own,
/// so a stale identity cannot outlive the token it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub second_last_name: Option<String>,
    /// Role markers carried by the token. Coarse-grained deployments carry a
    /// single entry, fine-grained ones a list; both decode into this field.
    pub roles: Vec<String>,
}

impl Identity {
    /// Whether the identity holds the given role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Whether the identity holds at least one of the given roles
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|role| self.has_role(role))
    }

    /// Name suitable for display
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Role claim: a single role string or a list, depending on deployment
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RoleClaim {
    One(String),
    Many(Vec<String>),
}

impl From<RoleClaim> for Vec<String> {
    fn from(claim: RoleClaim) -> Self {
        match claim {
            RoleClaim::One(role) => vec![role],
            RoleClaim::Many(roles) => roles,
        }
    }
}

/// Claims payload of the access token
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JwtClaims {
    id: i64,
    email: String,
    username: String,
    first_name: String,
    last_name: String,
    #[serde(default)]
    second_last_name: Option<String>,
    role: RoleClaim,
}

/// Decode the claims segment of an access token into an [`Identity`].
///
/// Fails with [`AuthError::MalformedToken`](crate::AuthError::MalformedToken)
/// for any structurally invalid token; no other error kind escapes.
pub fn decode_token(token: &str) -> AuthResult<Identity> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(malformed_token(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1])
        .map_err(|e| malformed_token(format!("payload is not base64url: {}", e)))?;

    let claims: JwtClaims = serde_json::from_slice(&payload)
        .map_err(|e| malformed_token(format!("claims do not parse: {}", e)))?;

    Ok(Identity {
        id: claims.id,
        email: claims.email,
        username: claims.username,
        first_name: claims.first_name,
        last_name: claims.last_name,
        second_last_name: claims.second_last_name,
        roles: claims.role.into(),
    })
}

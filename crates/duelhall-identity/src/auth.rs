//! The authentication hook.
//!
//! Duelhall doesn't verify identities itself — the caller's auth
//! provider does. The [`Authenticator`] trait is the seam: one async
//! method that turns a presented token into an [`Identity`] or an
//! [`AuthError`]. The live server calls it during the handshake and the
//! surrounding API layer calls it per request.

use std::collections::HashMap;

use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::{AuthError, Claims, Identity};

/// Validates a presented token and returns the caller's identity.
///
/// `Send + Sync + 'static` because one authenticator is shared by every
/// connection task for the lifetime of the server. The returned future
/// is `Send` so handlers generic over `A: Authenticator` can be spawned.
///
/// # Example
///
/// ```rust
/// use duelhall_identity::{AuthError, Authenticator, Identity};
/// use duelhall_protocol::UserId;
///
/// /// Treats the token as a numeric user id. Development only.
/// struct NumericAuthenticator;
///
/// impl Authenticator for NumericAuthenticator {
///     async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
///         let id: u64 = token
///             .parse()
///             .map_err(|_| AuthError::Invalid("token must be a number".into()))?;
///         Ok(Identity::new(UserId(id)))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates `token` and returns who presented it.
    fn authenticate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Identity, AuthError>> + Send;
}

// ---------------------------------------------------------------------------
// JwtAuthenticator
// ---------------------------------------------------------------------------

/// Decodes HS256 tokens signed with a shared secret.
///
/// Expiry (`exp`) is mandatory and checked with `jsonwebtoken`'s default
/// leeway.
#[derive(Clone)]
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// Creates an authenticator for tokens signed with `secret`.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Decodes and verifies a token synchronously.
    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        // Accept both a bare token and an `Authorization` header value.
        let token = token.strip_prefix("Bearer ").unwrap_or(token);

        jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                JwtErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })
    }
}

impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.decode(token)?;
        tracing::trace!(user_id = claims.user_id, "identity token verified");
        Ok(claims.into_identity())
    }
}

// ---------------------------------------------------------------------------
// StaticAuthenticator
// ---------------------------------------------------------------------------

/// Maps fixed token strings to identities. Never use in production.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthenticator {
    identities: HashMap<String, Identity>,
}

impl StaticAuthenticator {
    /// An authenticator that knows no tokens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` as proof of `identity`.
    pub fn with(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.identities.insert(token.into(), identity);
        self
    }
}

impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.identities
            .get(token)
            .copied()
            .ok_or_else(|| AuthError::Invalid("unknown token".into()))
    }
}

//! Verified identity for Duelhall.
//!
//! Duelhall never issues or designs tokens. It consumes an already
//! verified identity through the [`Authenticator`] trait and works with
//! the typed [`Identity`] record from then on.
//!
//! Two implementations ship with the crate:
//!
//! - [`JwtAuthenticator`] decodes HS256 tokens carrying [`Claims`]
//!   (`userid`, `subscriptionStatus`, `exp`).
//! - [`StaticAuthenticator`] maps fixed strings to identities, for tests
//!   and local development.

#![allow(async_fn_in_trait)]

mod auth;
mod claims;
mod error;

pub use auth::{Authenticator, JwtAuthenticator, StaticAuthenticator};
pub use claims::{Claims, Identity, SubscriptionTier};
pub use error::AuthError;

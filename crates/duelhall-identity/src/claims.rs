//! Token claims and the typed identity record derived from them.

use std::fmt;

use duelhall_protocol::UserId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SubscriptionTier
// ---------------------------------------------------------------------------

/// The caller's subscription level, as asserted by the token issuer.
///
/// Unknown values decode to [`SubscriptionTier::Other`] instead of
/// failing, so a new tier on the issuing side never locks users out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Premium,
    #[serde(other)]
    Other,
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Premium => write!(f, "premium"),
            Self::Other => write!(f, "other"),
        }
    }
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// The JSON claims carried by an identity token.
///
/// Field names follow the issuer's wire format (`userid`,
/// `subscriptionStatus`), hence the renames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userid")]
    pub user_id: u64,

    #[serde(rename = "subscriptionStatus", default)]
    pub subscription_status: SubscriptionTier,

    /// Expiry, seconds since the unix epoch.
    pub exp: u64,
}

impl Claims {
    /// Drops the registered claims and keeps what the lobby needs.
    pub fn into_identity(self) -> Identity {
        Identity {
            user_id: UserId(self.user_id),
            tier: self.subscription_status,
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A verified caller. Everything downstream trusts this unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub tier: SubscriptionTier,
}

impl Identity {
    /// An identity on the free tier.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            tier: SubscriptionTier::Free,
        }
    }
}

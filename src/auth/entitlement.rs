//! Account capability derived from the provider's profile document.

// self
use crate::{_prelude::*, auth::ProfileId};

/// Capability tier reported for the authenticated account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementTier {
	/// Account without the paid capability set.
	Standard,
	/// Paid account.
	Premium,
	/// Tier could not be determined (lookup failed or the provider omitted it).
	#[default]
	Unknown,
}
impl EntitlementTier {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Standard => "standard",
			Self::Premium => "premium",
			Self::Unknown => "unknown",
		}
	}
}

/// Derived, read-only entitlement cache published by the session manager.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
	/// Classified tier.
	pub tier: EntitlementTier,
	/// Provider account identifier, when the lookup succeeded.
	pub profile_id: Option<ProfileId>,
}
impl Entitlement {
	/// Entitlement recorded when the profile lookup fails.
	pub fn unknown() -> Self {
		Self::default()
	}

	/// Returns `true` for premium accounts.
	pub fn is_premium(&self) -> bool {
		matches!(self.tier, EntitlementTier::Premium)
	}
}

/// Subset of the provider profile document used for classification.
///
/// Unrecognized fields are kept in `extra` so custom strategies can inspect them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileDocument {
	/// Provider account identifier.
	#[serde(default)]
	pub id: Option<String>,
	/// Subscription product label (`premium`, `free`, `open`, ...).
	#[serde(default)]
	pub product: Option<String>,
	/// Remaining fields of the document.
	#[serde(flatten)]
	pub extra: BTreeMap<String, serde_json::Value>,
}

// self
use crate::_prelude::*;

/// Provider-specific quirks that influence request construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderQuirks {
	/// Character used to join scopes when constructing `scope` parameters.
	pub scope_delimiter: char,
	/// Whether the token endpoint needs `client_id` in the form even when HTTP Basic is used.
	pub client_id_in_form: bool,
}
impl Default for ProviderQuirks {
	fn default() -> Self {
		Self { scope_delimiter: ' ', client_id_in_form: true }
	}
}

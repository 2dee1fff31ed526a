//! Auth-domain models: PKCE material, scopes, token records, and entitlements.

pub mod entitlement;
pub mod id;
pub mod pkce;
pub mod scope;
pub mod token;

pub use entitlement::*;
pub use id::*;
pub use pkce::*;
pub use scope::*;
pub use token::{record::*, secret::*};

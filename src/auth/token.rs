//! Token record and secret wrappers owned by the session token store.

pub mod record;
pub mod secret;

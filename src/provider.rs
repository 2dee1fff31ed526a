//! Provider-facing descriptors (data) and strategies (behavior).
//!
//! `descriptor` exposes validated metadata (`ProviderDescriptor`) covering HTTPS-only
//! authorization/token/profile endpoints, client authentication preferences, and provider
//! quirks. `strategy` defines [`ProviderStrategy`], an HTTP-client-agnostic hook used by the
//! session to decorate outgoing requests, map token errors into the session taxonomy, and
//! classify account entitlements.

pub mod descriptor;
pub mod strategy;

pub use descriptor::*;
pub use strategy::*;

//! `bulkscreen-screening` — client for the external screening service.
//!
//! The rest of the system treats the provider as an opaque collaborator
//! behind one narrow seam: build a [`ScreeningRequest`], call
//! [`ScreeningClient::screen`] through a [`RetryPolicy`], and read back a
//! [`ScreeningVerdict`]. Nothing outside this crate knows the wire shape.

pub mod client;
pub mod error;
pub mod request;
pub mod retry;

pub use client::{HttpScreeningClient, ScreeningClient, ScreeningServiceConfig};
pub use error::CallError;
pub use request::{EntityType, ScreeningRequest};
pub use retry::RetryPolicy;

pub use client::ScreeningVerdict;

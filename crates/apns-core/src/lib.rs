//! Shared types for the APNs provider client: the error/verdict taxonomy,
//! the notification payload model, and a small atomic-state utility.

pub mod arc;
pub mod error;
pub mod payload;

pub use error::{DispatchError, ErrorReason, Verdict};
pub use payload::{Alert, MAX_PAYLOAD_SIZE, Payload, PayloadAlert};

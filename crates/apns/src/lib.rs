//! A provider client for Apple's HTTP/2 Push Notification service: opens
//! and maintains one multiplexed connection, pipelines notifications as
//! concurrent streams under the server's advertised concurrency limit, and
//! authenticates requests via either a client certificate or a signed JWT.

pub mod connection;
pub mod credentials;
pub mod dispatcher;
mod jwt;

#[cfg(feature = "team-pool")]
pub mod pool;

pub use connection::Connection;
pub use credentials::{CertificateCredentials, Credentials, TokenCredentials};
pub use dispatcher::{Dispatcher, DispatcherConfig, Notification, Priority, PushType, SendParams};

pub use apns_core::{DispatchError, ErrorReason, Payload, PayloadAlert, Verdict};

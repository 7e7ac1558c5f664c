//! Event delivery for mobile analytics clients
//!
//! This crate provides the transport core that sits beneath an event queue:
//!
//! - [`Dispatcher`] issues one authenticated request per call against the
//!   batch, transform and source-config endpoints, and reports the outcome as
//!   a [`NetworkResponse`] instead of an error.
//! - [`Coordinator`] ties flushing to the host's lifecycle: when the app goes
//!   to the background it obtains extended execution, runs a flush, and gives
//!   the time back exactly once.
//!
//! ```rust,no_run
//! use ingest_transport::{Config, Credentials, Dispatcher, Endpoint, RequestMethod};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> ingest_transport::Result<()> {
//! let config = Arc::new(
//!     Config::builder()
//!         .data_plane_url("https://dataplane.example.com")
//!         .build()?,
//! );
//! let credentials = Credentials::from_write_key("write-key", "anonymous-id");
//! let dispatcher = Dispatcher::new(
//!     config,
//!     credentials.auth_token,
//!     credentials.anonymous_id_token,
//! )?;
//!
//! let response = dispatcher
//!     .send(r#"{"batch":[]}"#, Endpoint::Batch, RequestMethod::Post)
//!     .await;
//! println!("{:?}", response.status());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

pub use backend::types::{BackendRequest, BackendResponse, Transport};
pub use backend::{Backend, BackendConfig};
pub use config::{Config, ConfigBuilder, DataResidencyServer};
pub use credentials::{CredentialStore, Credentials};
pub use dispatcher::Dispatcher;
pub use endpoint::{Endpoint, RequestMethod};
pub use error::{Error, ErrorKind, GrantError, Result};
pub use lifecycle::{
    BackgroundTaskApi, Coordinator, CoordinatorBuilder, CoordinatorState, CoordinatorStats,
    ExpirationHandler, ExtendedExecution, GrantId, LifecycleEvent, LifecycleObserver,
    NotificationCenter, ReleaseReason,
};
pub use response::{NetworkResponse, RESPONSE, ResponseState, STATUS};

/// Backend implementations
pub mod backend;
mod config;
mod credentials;
mod dispatcher;
mod endpoint;
mod error;
/// Lifecycle coordination
pub mod lifecycle;
mod response;

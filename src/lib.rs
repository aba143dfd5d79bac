//! A demo HTTP server for A/B tests and feature flags, backed by a hot-reloaded datafile.
//!
//! # Overview
//!
//! A [`PollerThread`] fetches the remote datafile on a fixed interval. Whenever the fetched document
//! differs from the one currently in use, a [`ClientFactory`] builds a new evaluation [`Client`]
//! and publishes it into a [`ClientHandle`]. HTTP handlers read whichever client is published when
//! the request comes in, so a datafile change never interrupts in-flight requests.
//!
//! User assignments are kept in a [`UserProfileService`] shared by every client the factory builds,
//! which keeps users in the same variation across datafile updates.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! No error reaches an HTTP caller. Fetch and client construction errors are logged by the poller
//! and the previous client keeps serving. Evaluation errors are passed to an [`ErrorHandler`] and
//! the caller gets a fallback value.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with structured key-values,
//! under the `abserve` target. The `abserve` binary installs `env_logger`.

#![warn(rustdoc::missing_crate_level_docs)]

mod attributes;
mod audience;
mod bucketer;
mod client;
mod config;
mod datafile;
mod decision;
mod error;
mod error_handler;
mod events;
mod factory;
mod handle;
mod notification;
mod server;
mod user_profile;

pub mod fetcher;
pub mod http;
pub mod identity;
pub mod poller;
pub mod refresh;
pub mod session;

pub use attributes::{AttributeValue, UserAttributes, BUCKETING_ID_ATTRIBUTE};
pub use client::{Client, ClientOptions};
pub use config::ServerConfig;
pub use error::{
    ClientConstructionError, Error, EvaluationError, FetchError, Result,
};
pub use error_handler::{ErrorHandler, LoggingErrorHandler};
pub use events::{EventDispatcher, HttpEventDispatcher, LogEvent, LoggingEventRelay};
pub use factory::ClientFactory;
pub use handle::ClientHandle;
pub use notification::{
    DecisionListener, DecisionNotification, DecisionType, ListenerId, LoggingDecisionListener,
    NotificationCenter,
};
pub use poller::PollerThread;
pub use server::Server;
pub use user_profile::{
    Decision, ExperimentBucketMap, InMemoryUserProfileService, UserProfileService,
};

// crates/client/src/lib.rs
//! Client side of the chatshell migration API: a reqwest wrapper, a
//! retry policy, and a poller that follows a job to its end.

pub mod cli;
pub mod client;
pub mod error;
pub mod poller;
pub mod progress;
pub mod retry;

pub use client::{Health, HostClient, DEFAULT_SERVER};
pub use error::ClientError;
pub use poller::{Narration, Poller, PollerConfig, ProgressSink};
pub use retry::RetryPolicy;

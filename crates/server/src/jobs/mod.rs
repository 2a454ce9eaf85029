// crates/server/src/jobs/mod.rs
//! Migration jobs: export and import of the application data directory.
//!
//! Provides:
//! - `MigrationService` — submit / status / cancel / cleanup / artifact
//! - `JobRunner` — drives one job to a terminal state on the blocking pool
//! - `JobContext` — progress reporting and cancellation checkpoints
//! - `SnapshotWriter` — optional persistence of the job table

pub mod context;
pub mod export;
pub mod import;
pub mod persist;
pub mod runner;
pub mod service;

pub use context::{JobContext, JobError};
pub use persist::SnapshotWriter;
pub use runner::{JobOutput, JobRunner};
pub use service::{Artifact, MigrationService};

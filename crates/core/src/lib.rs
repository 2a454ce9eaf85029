// crates/core/src/lib.rs
pub mod api;
pub mod archive;
pub mod data_dir;
pub mod error;
pub mod paths;
pub mod snapshot;
pub mod store;
pub mod types;

pub use error::*;
pub use store::JobStore;
pub use types::*;

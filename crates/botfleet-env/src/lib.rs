//! botfleet-env: the shared, versioned runtime environment
//!
//! Every agent instance in a fleet runs against one runtime tree built from
//! a dependency specification. This crate decides when that tree is stale
//! (by fingerprint), rebuilds it through an external build collaborator,
//! and rolls back to a snapshot when a rebuild fails.
//!
//! ## Layout
//!
//! - `fingerprint`: SHA256 change detection over the dependency spec
//! - `builder`: the build collaborator seam and its command-line implementation
//! - `store`: `EnvironmentStore` with transactional `update()`
//! - `lock`: advisory file locks for shared fleet state

pub mod atomic;
pub mod builder;
pub mod copy;
pub mod error;
pub mod fakes;
pub mod fingerprint;
pub mod lock;
pub mod store;

pub use atomic::write_atomic;
pub use builder::{ArtifactBuilder, CommandBuilder};
pub use copy::copy_tree;
pub use error::EnvError;
pub use fingerprint::{fingerprint_file, Fingerprint};
pub use lock::LockGuard;
pub use store::{EnvironmentLayout, EnvironmentStore, EnvironmentVersion, UpdateOutcome};

/// Result type for environment operations
pub type Result<T> = std::result::Result<T, EnvError>;

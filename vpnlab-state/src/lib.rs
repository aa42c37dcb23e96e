//! vpnlab State Management
//!
//! This crate records what `apply` created so later runs can plan against it.
//! State is stored in a local JSON file with a lock file next to it for
//! safe concurrent access.
//!
//! # Overview
//!
//! - **StateFile**: The main state structure containing all managed resources
//! - **StateBackend**: A trait for state storage backends
//! - **LockInfo**: Information about state locks for concurrent access control
//!
//! # Example
//!
//! ```ignore
//! use vpnlab_state::{create_backend, BackendConfig};
//!
//! let config = BackendConfig::local("state/lab.tfstate.json");
//! let backend = create_backend(&config).await?;
//!
//! // Acquire lock before modifying state
//! let lock = backend.acquire_lock("apply").await?;
//!
//! let mut state = backend.read_state().await?.unwrap_or_default();
//! // ... apply the plan, upsert resources ...
//! state.increment_serial();
//! backend.write_state(&state).await?;
//!
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

// Re-export main types for convenience
pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::LockInfo;
pub use state::{ResourceState, StateFile, json_to_value, value_to_json};

mod utils;

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod copy;
pub mod error;
pub mod sampler;
pub mod store;
pub mod task;
pub mod types;
pub mod walker;

pub use checkpoint::{Checkpoint, CheckpointKey, CheckpointStore};
pub use config::EngineConfig;
pub use coordinator::{TaskHandle, TransferCoordinator, TransferOutcome};
pub use error::{Result, TransferError};
pub use store::{Entry, EntryKind, LocalStore, Store, StoreError};
pub use types::*;
pub use utils::{file_name, format_bytes};

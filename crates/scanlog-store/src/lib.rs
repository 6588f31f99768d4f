mod capacity;
mod state;
mod storage;
mod store;

pub use capacity::{admit_within_capacity, enforce_capacity, eviction_candidates};
pub use state::{
    AppState, ResolvedToken, TokenSource, clear_token, load_app_state, load_token,
    resolve_token, save_app_state, save_token,
};
pub use storage::{MemoryStorage, SqliteStorage, Storage, storage_key};
pub use store::{Batch, RecordStore, StateCounts};

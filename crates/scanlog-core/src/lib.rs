mod error;
mod record;

pub use error::{ErrorKind, ExitCode, ScanError, ScanResult};
pub use record::{Category, Record, SyncState, now_millis};

mod engine;
pub mod machine;
mod reconcile;

pub use engine::{
    PromoteReport, PushOutcome, PushReport, SharedStore, SyncAttempt, SyncEngine, SyncReport,
    shared_store,
};
pub use machine::Transition;
pub use reconcile::{MergeReport, merge_cloud};

mod config;
mod doctor;
mod lock;
mod workspace;

pub use config::{
    DEFAULT_CAPACITY, DEFAULT_PROFILE, ProfileConfig, ProfileView, PushMode,
    ResolvedProfile, WorkspaceConfig, list_profiles, load_config, resolve_profile, save_config,
    set_active_profile, set_profile_endpoint,
};
pub use doctor::{DoctorCheck, DoctorReport, run_doctor};
pub use lock::WorkspaceLock;
pub use workspace::{
    STATE_DIR_NAME, WorkspaceInitResult, WorkspacePaths, init_workspace, resolve_workspace,
};

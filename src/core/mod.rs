pub mod bin_scorer;
pub mod config;
pub mod email;
pub mod errors;
pub mod file_watch;
pub mod form;
pub mod historial;
pub mod host;
pub mod local_host;
pub mod paths;
pub mod reconcile;
pub mod reply_monitor;
pub mod tokens;
pub mod version_locator;
pub mod version_patcher;

pub use errors::FlowError;
pub use form::VersionFormData;
pub use host::HostApi;
pub use reconcile::{FlowGate, ReconcileState, ReconciliationRun, RunOptions, RunOutcome};

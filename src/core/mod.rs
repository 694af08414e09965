pub mod meter;
pub mod pattern;
pub mod planner;
pub mod scheduler;
pub mod status;
pub mod uploader;
pub mod worker;

pub use meter::{average_speed, MeteredReader, TransferMeter};
pub use pattern::{is_directory_ignored, is_file_ignored, PatternSet};
pub use planner::{PlanStats, SyncPlanner, TransferTask};
pub use scheduler::Scheduler;
pub use status::{NetworkStats, StatusStore, SyncProgress, SyncStatusSnapshot};
pub use uploader::{UploadConfig, UploadStrategy, Uploader};
pub use worker::{RunContext, RunOutcome, RunReport, RunRequest, SyncWorker, Trigger};

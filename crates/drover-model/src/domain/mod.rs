mod job_id;
pub use job_id::JobId;

mod job_state;
pub use job_state::JobState;

mod meta;
pub use meta::JobMeta;

mod stage;
pub use stage::StageRecord;

mod job_info;
pub use job_info::JobInfo;

mod estimate;
pub use estimate::{CapacitySnapshot, QueueEstimate};

mod receipt;
pub use receipt::SubmitReceipt;

mod settings;
pub use settings::{SchedulerSettings, SettingsPatch};

mod status;
pub use status::{EngineStatus, LoginLockStatus};

pub(crate) mod time_serde;

/// Job kind tag.
///
/// Identifies which automation task a job runs. Opaque to the engine;
/// used only for routing and duration history.
pub type JobKind = String;

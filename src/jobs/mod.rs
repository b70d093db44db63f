//! Periodic jobs registered with the job scheduler service.
//!
//! - `batch_formation_job` - recovery pass followed by batch formation
//! - `queue_monitor_job` - logs queue depths and active-task duration

pub mod batch_formation_job;
pub mod queue_monitor_job;

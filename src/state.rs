use std::sync::Arc;

use crate::services::scheduler_context::SchedulerContext;

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<SchedulerContext>,
}

pub mod analysis_runner;
pub mod artifact_archive;
pub mod batch_scanner;
pub mod job_scheduler_service;
pub mod llm_service;
pub mod output_parser;
pub mod rate_limiter;
pub mod recovery_service;
pub mod scheduler_context;
pub mod task_queue;
pub mod verdict_scoring;
pub mod worker;

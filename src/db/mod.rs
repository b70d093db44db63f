pub mod batch_queries;
pub mod candidate_queries;

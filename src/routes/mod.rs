pub(crate) mod batches;
pub(crate) mod candidates;
pub(crate) mod health;
pub(crate) mod scheduler;

//! Rate-limited scheduler that runs stock candidates through a slow external
//! analysis service, either one at a time or as same-day comparison batches.

pub mod app;
pub mod config;
pub mod db;
pub mod errors;
pub mod external;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;

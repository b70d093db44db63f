pub mod analysis_client;
pub mod http_analysis_client;

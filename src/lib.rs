pub mod config;
pub mod domain;
pub mod intervals;
pub mod progress_api;
pub mod progress_client;
pub mod storage;

pub mod analytics;
pub mod api;
pub mod config;
pub mod dashboard;
pub mod enforcement;
pub mod error;
pub mod models;
pub mod prevention;
pub mod retry;
pub mod storage;
pub mod timestamp;

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod model;
pub mod notify;
pub mod query;
pub mod service;
pub mod storage;

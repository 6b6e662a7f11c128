pub mod config;
pub mod error;
pub mod session_gateway;
pub mod session_history;
pub mod snapshot_store;
pub mod storage;

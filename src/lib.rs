pub mod api;
pub mod cli;
pub mod errors;
pub mod models;
pub mod stats;
pub mod storage;
pub mod sync;

pub mod config;
pub mod files;
pub mod log;
pub mod sync;

pub mod config;
pub mod console;
pub mod device;
pub mod error;
pub mod flash;
pub mod logging;
pub mod models;
pub mod session_log;
pub mod state;
pub mod tools;

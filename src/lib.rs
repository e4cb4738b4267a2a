pub mod config;
pub mod devserver;
pub mod errors;
pub mod generate;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod patch;
pub mod server;
pub mod shell;
pub mod source;
pub mod tracker;
pub mod validate;

pub mod assistant;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod providers;
pub mod search;
pub mod server;
pub mod store;
pub mod transcribe;
pub mod transcript;

pub mod config;
pub mod poller;

pub mod config;
pub mod executor;
pub mod orchestration;
pub mod provider;
pub mod resolve;
pub mod secrets;
pub mod server;
pub mod shared;
pub mod store;
pub mod tools;
pub mod workflow;

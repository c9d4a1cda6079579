pub mod broker;
pub mod config;
pub mod errors;
pub mod queue;
pub mod results;
pub mod task;

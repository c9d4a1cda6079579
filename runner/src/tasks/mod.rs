pub(crate) mod log_sink;
pub(crate) mod runner;
pub(crate) mod staging;

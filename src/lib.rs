pub mod app;
pub mod approval;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod queue;
pub mod runtime;
pub mod shared;

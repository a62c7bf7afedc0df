pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod lifecycle;
pub mod prompts;
pub mod rate_limiter;
pub mod server;
pub mod telegram;
pub mod tools;

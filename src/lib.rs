pub mod channel;
pub mod engine;
pub mod error;
pub mod expand;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod resolve;
pub mod retry;
pub mod spec;
pub mod types;
pub mod validate;

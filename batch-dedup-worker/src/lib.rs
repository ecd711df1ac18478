pub mod config;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod sink;
pub mod source;
pub mod validate;
pub mod worker;

pub mod bank;
pub mod config;
pub mod error;
pub mod record;
pub mod report;
pub mod sampler;
pub mod session;
pub mod store;
pub mod types;

pub use error::{Error, Result};

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod rules;
pub mod spec;
pub mod util;

pub use config::Config;
pub use error::{Error, Result};

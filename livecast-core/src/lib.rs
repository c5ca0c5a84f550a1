pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::Config;
pub use error::{Error, Result};
pub use validation::{StreamKeyValidator, ValidationError};

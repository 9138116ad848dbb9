//! Core types: status codes, dynamic values, tracing setup

pub mod status;
pub mod tracing;
pub mod value;

pub use status::{CUSTOM_MAX, CUSTOM_MIN, CustomStatus, Status, StatusError};
pub use self::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
pub use value::{Keys, Value, into_keys};

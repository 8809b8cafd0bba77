pub mod error;
pub mod record;

pub use error::{Error, Result};
pub use record::{DataType, Record, Value};

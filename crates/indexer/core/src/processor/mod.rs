//! Message state machine driver.

mod consume;
pub use consume::Processor;

mod error;
pub use error::ProcessorError;

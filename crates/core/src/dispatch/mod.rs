//! Stage routing: turns dispatch orders into work tickets on the right
//! broker queue.

mod config;
mod envelope;
mod error;
mod router;

pub use config::{DispatcherConfig, RetryConfig};
pub use envelope::{JobRef, WorkTicket};
pub use error::DispatchError;
pub use router::Dispatcher;

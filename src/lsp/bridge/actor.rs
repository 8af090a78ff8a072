//! Background tasks serving one bridge connection.
//!
//! # Components
//!
//! - `ResponseRouter`: Routes responses to pending requests via oneshot channels
//! - `Reader`: Background task that reads backend output and dispatches it

mod reader;
mod response_router;

pub use reader::BridgeEvent;
pub(crate) use reader::{ReaderTaskHandle, spawn_reader_task};
pub(crate) use response_router::ResponseRouter;

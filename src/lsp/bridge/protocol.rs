//! Wire-level message shapes for backend communication.
//!
//! ## Module Structure
//!
//! - `request_id` - RequestId type for type-safe request ID handling
//! - `lifecycle` - initialize/shutdown builders and version checks
//! - `request` - request, notification and response builders
//! - `suggestion` - backend suggestion records

mod lifecycle;
mod request;
mod request_id;
mod suggestion;

pub use lifecycle::{MINIMUM_BACKEND_VERSION, is_older_than};
pub(crate) use lifecycle::{
    build_exit_notification, build_initialize_request, build_initialized_notification,
    build_shutdown_request, server_version, validate_initialize_response,
};
pub(crate) use request::*;
pub use request::PositionParams;
pub(crate) use request_id::RequestId;
pub use suggestion::{Documentation, Suggestion};
pub(crate) use suggestion::parse_suggestions;

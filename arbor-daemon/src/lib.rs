//! Host process for the sync coordinator: socket server and live sessions.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{request, request_status, request_stop, send_request, DaemonRequest, DaemonResponse};
pub use runtime::{run, start_blocking, Daemon};

//! # Runbook Execution
//!
//! Everything between a resolved action and a delivered result: running the
//! action as a child process, collecting its callback context, routing its output,
//! and reporting the result back to the calling service.

pub mod callback;
pub mod delivery;
pub mod executor;
pub mod result;
pub mod sender;
pub mod sinks;

pub use callback::CallbackChannel;
pub use delivery::{DeliveryStats, ResultDelivery};
pub use executor::{ActionExecutor, ExecutionError, ExecutionRequest, ProcessExecutor};
pub use result::{ActionResultPayload, HttpResponse};
pub use sender::{DeliveryError, HttpResultSender, ResultSender};
pub use sinks::{ActionSinks, CaptureBuffer, FileSink, OutputSink, TeeSink};

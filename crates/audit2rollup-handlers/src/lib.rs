//! Invocation handlers for audit2rollup
//!
//! Transport-agnostic: the Lambda adapter turns runtime events into
//! [`ObjectRef`] lists or [`UploadedObject`]s and hands them to the
//! [`RollupPipeline`] or [`ObjectForwarder`].

pub mod error;
pub mod forward;
pub mod message;
pub mod pipeline;
pub mod report;

pub use error::{Result, RollupError};
pub use forward::{ForwardSettings, ObjectForwarder, UploadedObject};
pub use message::{collect_objects, parse_messages, InboundMessage, ObjectRef, SourceObject};
pub use pipeline::{PipelineSettings, RollupPipeline};
pub use report::{ForwardReport, InvocationReport, InvocationStatus, QuarantinedObject};

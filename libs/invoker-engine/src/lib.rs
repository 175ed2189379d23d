//! Container-as-a-function execution core.
//!
//! **Layers:**
//! - `gateway`: capability trait over the container engine (bollard in production)
//! - `pipeline`: pull → create → start → wait → logs → remove for one container
//! - `framing`: turns container stdout into headers + body
//! - `audit`: one structured record per invocation
//! - `service`: composition of the above, consumed by the HTTP layer

pub mod audit;
pub mod context;
pub mod error;
pub mod framing;
pub mod gateway;
pub mod pipeline;
pub mod service;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


pub use audit::{AuditEvent, AuditRecorder, AuditSink, PendingAudit, TracingAuditSink};
pub use context::{CancelHandle, ContextError, InvocationContext};
pub use error::{ErrorKind, ExecError, GatewayError};
pub use framing::{frame_response, FramedResponse, Headers};
pub use gateway::{ContainerGateway, ContainerHandle, ContainerSpec, DockerGateway, ExitStatus, LogFrame};
pub use pipeline::{DemuxedOutput, ExecutionPipeline};
pub use service::InvocationService;

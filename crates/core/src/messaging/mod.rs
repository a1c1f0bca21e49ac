//! Message types and the channel plumbing between coordinators.
//!
//! Three channels connect the control plane:
//! - **operations**: deposit-level actions and job outcomes, consumed by the
//!   `DepositCoordinator`
//! - **jobs**: one message per job to execute, consumed by the `JobCoordinator`
//! - **pipeline**: QUIET/UNQUIET/STOP, consumed by the `PipelineCoordinator`
//!
//! Payloads are JSON. The transport is abstracted behind [`MessageSender`] and
//! [`MessageSource`]. [`SqliteQueue`] keeps messages in the database until they
//! are acknowledged; [`MemoryQueue`] is the in-process implementation.

mod container;
mod memory;
mod messages;
mod sqlite;
mod transport;

pub use container::{ListenerContainer, MessageListener, QueueListenerContainer};
pub use memory::MemoryQueue;
pub use messages::{
    DepositAction, DepositOperation, JobFailureInfo, JobMessage, OperationMessage,
    PipelineAction, PipelineMessage,
};
pub use sqlite::SqliteQueue;
pub use transport::{
    publish, publish_delayed, Acknowledger, Delivery, MessageSender, MessageSource,
    TransportError,
};

pub mod active;
pub mod audit;
pub mod config;
pub mod coordinator;
pub mod deposit;
pub mod handler;
pub mod job;
pub mod messaging;
pub mod metrics;
pub mod notify;
pub mod status;
pub mod testing;

pub use active::ActiveDepositsService;
pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditFilter, AuditHandle, AuditRecord,
    AuditStore, AuditWriter, SqliteAuditStore,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use coordinator::{
    CoordinatorConfig, CoordinatorError, DepositCoordinator, JobCoordinator,
    PipelineCoordinator, PipelineStatus, PipelineTransition, Promotion,
};
pub use deposit::{Deposit, DepositField, DepositState};
pub use handler::{DepositHandlers, HandlerContext, HandlerError, HandlerOutcome};
pub use job::{
    CommandJob, DepositJob, JobDefinition, JobError, JobRegistry, JobResolver, JobSequencer,
    JobsConfig, OrderedJobSequencer,
};
pub use messaging::{
    DepositAction, JobMessage, ListenerContainer, MemoryQueue, MessageListener, MessageSender,
    MessageSource, OperationMessage, PipelineAction, PipelineMessage, QueueListenerContainer,
    SqliteQueue, TransportError,
};
pub use notify::{AuditNotifier, DepositNotifier};
pub use status::{
    DepositStore, JobRunState, JobStatus, JobStatusStore, PipelineState, PipelineStateStore,
    SqliteStatusStore, StoreError, SupervisorLock,
};

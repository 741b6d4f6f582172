//! 核心层：数据模型、转移表、历史账本、重试策略、步骤调度、协调引擎、卡死巡检、关闭

pub mod builder;
pub mod clock;
pub mod engine;
pub mod error;
pub mod history;
pub mod monitor;
pub mod pipeline;
pub mod recovery;
pub mod shutdown;
pub mod stage;
pub mod state;
pub mod table;
pub mod task_scheduler;

pub use builder::EngineBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::CoordinationEngine;
pub use error::{
    CollaboratorError, EngineError, ProcessingError, AGENT_PANICKED, AGENT_TIMEOUT,
    COLLABORATOR_FAILED, INVALID_DOCUMENT, NO_AGENT, STUCK_TIMEOUT,
};
pub use history::{ProcessingHistory, ProcessingHistoryEntry, StepOutcome};
pub use monitor::StuckMonitor;
pub use pipeline::{StagePolicy, StageRule};
pub use recovery::{RetryPolicy, StepDecision};
pub use shutdown::{
    run_with_graceful_shutdown, EngineCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
pub use stage::{AgentType, Priority, ProcessingStage};
pub use state::{Document, DocumentId, DocumentProcessingState, DocumentSource};
pub use table::DocumentTable;
pub use task_scheduler::{AdmissionQueue, PendingSet};

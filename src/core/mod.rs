//! 核心编排层：错误与恢复、状态、状态监管、对外门面

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod state;
pub mod supervisor;

pub use builder::{create_llm_from_config, OrchestratorBuilder};
pub use error::{AgentError, ErrorContext, ErrorKind, ErrorRecord, RecoveryAction};
pub use orchestrator::{AgentOrchestrator, RunOptions, RunOutcome};
pub use recovery::RecoveryEngine;
pub use state::{
    AgentPhase, AgentState, AgentStats, CallContext, ConversationContext, HistoryEntry,
    HistoryKind, LoopLimits, PhaseTimeouts,
};
pub use supervisor::{AgentSupervisor, ErrorHandler, StateListener, SubscriptionId};

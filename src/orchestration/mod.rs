pub mod access;
pub mod conversation;
pub mod error;
pub mod hooks;
pub mod prompt;

pub use access::{check_access, domain_allowed, origin_host, CallerInfo};
pub use conversation::{
    sanitize_history, ChatOrchestrator, ChatOutcome, ChatRequest, ChatSettings, HistoryTurn,
    LOOP_EXHAUSTED_REPLY, MAX_HISTORY_TURNS, MAX_TOOL_ITERATIONS,
};
pub use error::ChatError;
pub use hooks::{spawn_hooks, HookDispatch};
pub use prompt::build_system_prompt;

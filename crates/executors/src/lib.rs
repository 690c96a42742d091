pub mod claude;

pub use claude::{AgentOutcome, ClaudeExecutor, ExecutorError};

//! 核心编排层：错误、凭证库、对话状态、进度事件与发射器、编排循环、组装

pub mod builder;
pub mod credentials;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod state;
pub mod stream;

pub use builder::{build_orchestrator, create_llm_from_config};
pub use credentials::{Credential, CredentialError, CredentialStore};
pub use error::{ActionError, ErrorClass, RelayError};
pub use events::{ProgressEvent, ProgressKind};
pub use orchestrator::{Orchestrator, Outcome, ProcessResult, TurnRequest};
pub use state::{ConversationTurn, LoopPhase};
pub use stream::{spawn_stream, ProgressEmitter};

pub mod error;
pub mod providers;
pub mod types;
pub mod template;
pub mod agents;
pub mod tasks;
pub mod crew;
pub mod run_state;
pub mod sequential;
pub mod export;
pub mod config;
pub mod api;

pub use error::LLMError;
pub use providers::LLMProvider;
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole, TokenUsage};
pub use template::{Placeholder, RunInputs, Template, TemplateError};
pub use agents::{Agent, AgentError, AgentSpec, Persona};
pub use tasks::{RenderedTask, TaskOutput, TaskSpec};
pub use crew::{Crew, CrewDocument};
pub use run_state::RunState;
pub use sequential::{
    OutputMode,
    PipelineResult,
    SequentialEvent,
    SequentialOrchestrator,
};
pub use export::{render_pdf, save_as_pdf, ExportError, PdfLayout, DEFAULT_EXPORT_FILENAME};
pub use config::{AppConfig, ConfigError};

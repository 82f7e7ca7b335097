use serde::Serialize;
use tracing::debug;

use crate::{
    template::{RunInputs, Template, TemplateError},
    types::{ChatMessage, CompletionRequest},
    LLMError, LLMProvider,
};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("no tasks registered")]
    NoTasks,
    #[error("provider call timed out")]
    ProviderTimeout,
    #[error("agent {0} returned an empty response")]
    EmptyResponse(String),
    #[error("run cancelled")]
    Cancelled,
    #[error(transparent)]
    Provider(#[from] LLMError),
}

/// A persona: role name plus goal and backstory templates.
///
/// Identity is the role name. Specs are built once and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSpec {
    role: String,
    goal: Template,
    backstory: Template,
}

impl AgentSpec {
    pub fn new(
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> Result<Self, TemplateError> {
        Ok(Self {
            role: role.into(),
            goal: Template::parse(goal)?,
            backstory: Template::parse(backstory)?,
        })
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn goal(&self) -> &Template {
        &self.goal
    }

    pub fn backstory(&self) -> &Template {
        &self.backstory
    }

    pub fn persona(&self, inputs: &RunInputs) -> Result<Persona, TemplateError> {
        Ok(Persona {
            role: self.role.clone(),
            goal: self.goal.render(inputs)?,
            backstory: self.backstory.render(inputs)?,
        })
    }
}

/// An [`AgentSpec`] rendered against one run's inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Persona {
    pub role: String,
    pub goal: String,
    pub backstory: String,
}

impl Persona {
    pub fn system_prompt(&self) -> String {
        format!(
            "You are {}. {}\nYour personal goal is: {}",
            self.role, self.backstory, self.goal
        )
    }
}

/// A persona ready to answer prompts for one run.
#[derive(Debug, Clone)]
pub struct Agent {
    name: String,
    instructions: String,
    temperature: Option<f32>,
}

impl Agent {
    pub fn from_string(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            temperature: None,
        }
    }

    pub fn from_spec(spec: &AgentSpec, inputs: &RunInputs) -> Result<Self, TemplateError> {
        let persona = spec.persona(inputs)?;
        Ok(Self::from_string(persona.role.clone(), persona.system_prompt()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sends the persona as the system message and `context` as the user
    /// message, returning the trimmed completion text.
    pub async fn respond(
        &self,
        provider: &dyn LLMProvider,
        model: &str,
        context: &str,
    ) -> Result<String, AgentError> {
        let messages = vec![
            ChatMessage::system(self.instructions.clone()),
            ChatMessage::user(context.to_string()),
        ];

        let mut request = CompletionRequest::new(model.to_string(), messages);
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }

        debug!(agent = %self.name, provider = provider.name(), model, "agent responding");

        let response = provider.complete(request).await?;
        let content = response.message.text().unwrap_or_default().trim();
        if content.is_empty() {
            return Err(AgentError::EmptyResponse(self.name.clone()));
        }

        Ok(content.to_string())
    }
}

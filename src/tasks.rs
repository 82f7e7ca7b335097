use serde::{Deserialize, Serialize};

use crate::template::{RunInputs, Template, TemplateError};

/// One unit of pipeline work, bound to the agent whose role it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    name: String,
    description: Template,
    expected_output: Template,
    agent: String,
}

impl TaskSpec {
    pub fn new(
        name: impl Into<String>,
        agent: impl Into<String>,
        description: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Result<Self, TemplateError> {
        Ok(Self {
            name: name.into(),
            description: Template::parse(description)?,
            expected_output: Template::parse(expected_output)?,
            agent: agent.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role of the agent this task is bound to.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn description(&self) -> &Template {
        &self.description
    }

    pub fn expected_output(&self) -> &Template {
        &self.expected_output
    }

    pub fn render(&self, inputs: &RunInputs) -> Result<RenderedTask, TemplateError> {
        Ok(RenderedTask {
            name: self.name.clone(),
            agent: self.agent.clone(),
            description: self.description.render(inputs)?,
            expected_output: self.expected_output.render(inputs)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedTask {
    pub name: String,
    pub agent: String,
    pub description: String,
    pub expected_output: String,
}

impl RenderedTask {
    /// The user message for this task: the instruction, the expected-output
    /// criteria and, when earlier tasks ran, their outputs as context.
    pub fn prompt(&self, prior: &[TaskOutput]) -> String {
        let mut prompt = format!(
            "{}\n\nThis is the expected criteria for your final answer: {}\nYou MUST return the actual complete content as the final answer, not a summary.",
            self.description, self.expected_output
        );

        if !prior.is_empty() {
            prompt.push_str("\n\nThis is the context you're working with:\n");
            let context = prior
                .iter()
                .map(|output| format!("### {}\n{}", output.role, output.output))
                .collect::<Vec<_>>()
                .join("\n\n");
            prompt.push_str(&context);
        }

        prompt
    }
}

/// What one task produced during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub task: String,
    pub role: String,
    pub output: String,
}

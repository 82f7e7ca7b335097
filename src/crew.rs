use std::{collections::HashSet, fs, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    agents::AgentSpec,
    config::ConfigError,
    tasks::TaskSpec,
    template::TemplateError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDocument {
    pub role: String,
    pub goal: String,
    pub backstory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDocument {
    pub name: String,
    pub agent: String,
    pub description: String,
    pub expected_output: String,
}

/// Serialized form of a crew, as read from or written to YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewDocument {
    pub agents: Vec<AgentDocument>,
    pub tasks: Vec<TaskDocument>,
}

/// A validated, ordered set of agents and the tasks they run.
#[derive(Debug, Clone)]
pub struct Crew {
    agents: Vec<Arc<AgentSpec>>,
    descriptions: Vec<Option<String>>,
    tasks: Vec<TaskSpec>,
}

impl Crew {
    pub fn new(agents: Vec<AgentSpec>, tasks: Vec<TaskSpec>) -> Result<Self, ConfigError> {
        let descriptions = vec![None; agents.len()];
        Self::assemble(agents, descriptions, tasks)
    }

    fn assemble(
        agents: Vec<AgentSpec>,
        descriptions: Vec<Option<String>>,
        tasks: Vec<TaskSpec>,
    ) -> Result<Self, ConfigError> {
        if tasks.is_empty() {
            return Err(ConfigError::EmptyCrew);
        }

        let mut roles = HashSet::new();
        for agent in &agents {
            if !roles.insert(agent.role()) {
                return Err(ConfigError::DuplicateRole(agent.role().to_string()));
            }
        }

        for task in &tasks {
            if !roles.contains(task.agent()) {
                return Err(ConfigError::UnknownAgent {
                    task: task.name().to_string(),
                    agent: task.agent().to_string(),
                });
            }
        }

        Ok(Self {
            agents: agents.into_iter().map(Arc::new).collect(),
            descriptions,
            tasks,
        })
    }

    /// The five-agent movie re-imagining crew, in pipeline order.
    pub fn movie_summary() -> Self {
        Self::from_document(builtin_document()).unwrap_or_else(|err| {
            unreachable!("built-in crew failed validation: {err}")
        })
    }

    pub fn from_document(document: CrewDocument) -> Result<Self, ConfigError> {
        let mut agents = Vec::with_capacity(document.agents.len());
        let mut descriptions = Vec::with_capacity(document.agents.len());
        for agent in document.agents {
            let spec = AgentSpec::new(&agent.role, agent.goal, agent.backstory)
                .map_err(|source| template_error(format!("agent {}", agent.role), source))?;
            agents.push(spec);
            descriptions.push(agent.description);
        }

        let mut tasks = Vec::with_capacity(document.tasks.len());
        for task in document.tasks {
            let spec = TaskSpec::new(&task.name, task.agent, task.description, task.expected_output)
                .map_err(|source| template_error(format!("task {}", task.name), source))?;
            tasks.push(spec);
        }

        Self::assemble(agents, descriptions, tasks)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let document: CrewDocument = serde_yaml::from_str(yaml)?;
        Self::from_document(document)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_document(&self) -> CrewDocument {
        CrewDocument {
            agents: self
                .agents
                .iter()
                .zip(&self.descriptions)
                .map(|(agent, description)| AgentDocument {
                    role: agent.role().to_string(),
                    goal: agent.goal().source().to_string(),
                    backstory: agent.backstory().source().to_string(),
                    description: description.clone(),
                })
                .collect(),
            tasks: self
                .tasks
                .iter()
                .map(|task| TaskDocument {
                    name: task.name().to_string(),
                    agent: task.agent().to_string(),
                    description: task.description().source().to_string(),
                    expected_output: task.expected_output().source().to_string(),
                })
                .collect(),
        }
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(&self.to_document())?)
    }

    pub fn agents(&self) -> &[Arc<AgentSpec>] {
        &self.agents
    }

    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    pub fn agent(&self, role: &str) -> Option<&Arc<AgentSpec>> {
        self.agents.iter().find(|agent| agent.role() == role)
    }

    pub fn description(&self, role: &str) -> Option<&str> {
        self.agents
            .iter()
            .position(|agent| agent.role() == role)
            .and_then(|index| self.descriptions[index].as_deref())
    }
}

fn template_error(context: String, source: TemplateError) -> ConfigError {
    ConfigError::Template { context, source }
}

fn builtin_document() -> CrewDocument {
    let agents = vec![
        AgentDocument {
            role: "Plot Designer".into(),
            goal: "Design an engaging and cohesive plot for the movie {movie_name} with the new ending: {desired_ending}".into(),
            backstory: "You are tasked with altering the plot of the movie: {movie_name}. The user wants a new ending: {desired_ending}. You need to create a structured plot outline, leading logically to the new ending while staying true to the original movie.".into(),
            description: Some("Plans an engaging and altered plot structure for the movie, seamlessly integrating the new ending while preserving key elements from the original storyline.".into()),
        },
        AgentDocument {
            role: "Character Analyst".into(),
            goal: "Analyze the main character arcs in {movie_name} and how they evolve with the new ending: {desired_ending}".into(),
            backstory: "You are responsible for analyzing the character arcs in {movie_name} and explaining how their journey evolves in light of the new ending: {desired_ending}. Focus on how each main character is impacted by the new plot and their final resolution.".into(),
            description: Some("Analyzes the evolution of the main characters, focusing on how they adapt and change within the context of the new storyline and conclusion.".into()),
        },
        AgentDocument {
            role: "Setting Designer".into(),
            goal: "Describe key settings in the movie {movie_name} and how they are influenced by the new ending: {desired_ending}".into(),
            backstory: "You are responsible for describing the primary settings of {movie_name}, focusing on how the atmosphere and locations evolve as the plot shifts toward the new ending: {desired_ending}.".into(),
            description: Some("Describes how the settings and locations are influenced by the story's shift, merging old and new elements to create a dynamic atmosphere.".into()),
        },
        AgentDocument {
            role: "Theme Analyst".into(),
            goal: "Analyze the themes in {movie_name} and how the new ending: {desired_ending} impacts these themes.".into(),
            backstory: "Your task is to analyze the themes and motifs of the movie {movie_name}. You must explain how the original themes are influenced by the new plot and ending, and describe any new themes that arise due to the altered storyline.".into(),
            description: Some("Evaluates the core themes of the movie, identifying how the new ending reshapes or introduces concepts such as power, control, and the intersection of past and future.".into()),
        },
        AgentDocument {
            role: "Script Summarizer".into(),
            goal: "Compile a detailed summary of the movie {movie_name} with the new ending: {desired_ending}".into(),
            backstory: "You are tasked with writing a complete story summary for the movie {movie_name}, using the altered plot and ending: {desired_ending}. Your goal is to ensure that the summary is cohesive, well-structured, and engaging, covering all the main events and the character arcs.".into(),
            description: Some("Compiles a comprehensive story summary, ensuring all plot, character, setting, and thematic changes are cohesively presented.".into()),
        },
    ];

    let tasks = vec![
        TaskDocument {
            name: "plan_plot".into(),
            agent: "Plot Designer".into(),
            description: "1. Create a plot summary of {movie_name}, leading logically to the new ending: {desired_ending}.\n2. Focus on the core story elements, ensuring that the new ending feels like a natural progression of the story.\n3. Provide a clear plot structure with key events.".into(),
            expected_output: "A comprehensive plot summary leading to the new ending.".into(),
        },
        TaskDocument {
            name: "analyze_characters".into(),
            agent: "Character Analyst".into(),
            description: "1. Analyze the main character arcs in {movie_name}.\n2. Explain how each character evolves with the new ending: {desired_ending}.\n3. Focus on the motivations, conflicts, and resolutions of key characters.".into(),
            expected_output: "A summary of the character arcs, showing how they evolve with the new plot and ending.".into(),
        },
        TaskDocument {
            name: "describe_settings".into(),
            agent: "Setting Designer".into(),
            description: "1. Describe the key settings of {movie_name} and their influence on the story.\n2. Focus on how the atmosphere and locations evolve in the new ending: {desired_ending}.".into(),
            expected_output: "A summary of the primary settings and their impact on the story and new ending.".into(),
        },
        TaskDocument {
            name: "analyze_themes".into(),
            agent: "Theme Analyst".into(),
            description: "1. Identify the key themes in {movie_name}.\n2. Explain how the new ending: {desired_ending} reshapes or reinforces these themes.\n3. Identify any new themes introduced by the altered ending.".into(),
            expected_output: "A summary of the themes and motifs in the story, focusing on the impact of the new ending.".into(),
        },
        TaskDocument {
            name: "summarize_script".into(),
            agent: "Script Summarizer".into(),
            description: "1. Compile a detailed summary of the entire movie {movie_name}, including the original plot and the new ending: {desired_ending}.\n2. Ensure the summary is cohesive and covers all major events, character arcs, and themes.".into(),
            expected_output: "A detailed movie script summary with the new ending.".into(),
        },
    ];

    CrewDocument { agents, tasks }
}

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    agents::{Agent, AgentError},
    crew::Crew,
    run_state::RunState,
    tasks::{RenderedTask, TaskOutput},
    template::RunInputs,
    LLMProvider,
};

#[derive(Debug, Clone)]
pub enum SequentialEvent {
    Started {
        task: String,
        role: String,
        index: usize,
        total: usize,
    },
    Step {
        task: String,
        role: String,
        output: String,
    },
    Completed {
        role: String,
        output: String,
    },
    Failed {
        role: String,
        error: String,
    },
}

/// Which part of a run is treated as the visible result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Only the last task's output.
    #[default]
    Final,
    /// Every task's output, in order, each headed by its role.
    Transcript,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "final" => Ok(OutputMode::Final),
            "transcript" => Ok(OutputMode::Transcript),
            other => Err(format!("expected `final` or `transcript`, got `{other}`")),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Final => f.write_str("final"),
            OutputMode::Transcript => f.write_str("transcript"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub movie_name: String,
    pub steps: Vec<TaskOutput>,
    pub final_output: String,
    pub output_mode: OutputMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineResult {
    /// The externally visible result, according to `output_mode`.
    pub fn text(&self) -> String {
        match self.output_mode {
            OutputMode::Final => self.final_output.clone(),
            OutputMode::Transcript => self.transcript(),
        }
    }

    pub fn transcript(&self) -> String {
        self.steps
            .iter()
            .map(|step| format!("## {}\n{}", step.role, step.output))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

pub struct SequentialOrchestrator {
    provider: Arc<dyn LLMProvider>,
    model: String,
    crew: Arc<Crew>,
    temperature: Option<f32>,
    llm_timeout_ms: u64,
    output_mode: OutputMode,
    event_callback: Option<Arc<dyn Fn(&SequentialEvent) + Send + Sync>>,
}

impl SequentialOrchestrator {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>, crew: Arc<Crew>) -> Self {
        Self {
            provider,
            model: model.into(),
            crew,
            temperature: None,
            llm_timeout_ms: 60_000,
            output_mode: OutputMode::Final,
            event_callback: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_llm_timeout_ms(mut self, ms: u64) -> Self {
        self.llm_timeout_ms = ms;
        self
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn with_event_callback(
        mut self,
        callback: impl Fn(&SequentialEvent) + Send + Sync + 'static,
    ) -> Self {
        self.event_callback = Some(Arc::new(callback));
        self
    }

    pub fn crew(&self) -> &Crew {
        &self.crew
    }

    fn emit_event(&self, event: &SequentialEvent) {
        if let Some(callback) = &self.event_callback {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (callback)(event)));
        }
    }

    /// Renders every task and persona up front, so bad inputs fail before
    /// any provider call is made.
    fn prepare(&self, inputs: &RunInputs) -> Result<Vec<(RenderedTask, Agent)>, AgentError> {
        let tasks = self.crew.tasks();
        if tasks.is_empty() {
            return Err(AgentError::NoTasks);
        }

        tasks
            .iter()
            .map(|task| -> Result<(RenderedTask, Agent), AgentError> {
                let spec = self
                    .crew
                    .agent(task.agent())
                    .ok_or_else(|| AgentError::UnknownAgent(task.agent().to_string()))?;
                let mut agent = Agent::from_spec(spec, inputs)?;
                if let Some(temperature) = self.temperature {
                    agent = agent.with_temperature(temperature);
                }
                Ok((task.render(inputs)?, agent))
            })
            .collect()
    }

    pub async fn run(&self, inputs: &RunInputs) -> Result<PipelineResult, AgentError> {
        self.run_with_cancel(inputs, CancellationToken::new()).await
    }

    /// Runs every task in order, feeding each one the outputs of the tasks
    /// before it. The first failure aborts the run; later tasks never start.
    #[instrument(skip_all, fields(movie = %inputs.movie_name, model = %self.model))]
    pub async fn run_with_cancel(
        &self,
        inputs: &RunInputs,
        cancel: CancellationToken,
    ) -> Result<PipelineResult, AgentError> {
        let prepared = self.prepare(inputs)?;
        let total = prepared.len();
        let started_at = Utc::now();
        let mut steps: Vec<TaskOutput> = Vec::with_capacity(total);

        info!(tasks = total, "pipeline started");

        for (index, (task, agent)) in prepared.iter().enumerate() {
            self.emit_event(&SequentialEvent::Started {
                task: task.name.clone(),
                role: agent.name().to_string(),
                index,
                total,
            });
            info!(task = %task.name, agent = agent.name(), step = index + 1, total, "task started");

            let prompt = task.prompt(&steps);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
                outcome = time::timeout(
                    Duration::from_millis(self.llm_timeout_ms),
                    agent.respond(self.provider.as_ref(), &self.model, &prompt),
                ) => match outcome {
                    Ok(response) => response,
                    Err(_) => Err(AgentError::ProviderTimeout),
                },
            };

            let output = match result {
                Ok(output) => output,
                Err(err) => {
                    warn!(task = %task.name, agent = agent.name(), error = %err, "task failed, aborting run");
                    self.emit_event(&SequentialEvent::Failed {
                        role: agent.name().to_string(),
                        error: err.to_string(),
                    });
                    return Err(err);
                }
            };

            info!(task = %task.name, agent = agent.name(), chars = output.len(), "task completed");
            self.emit_event(&SequentialEvent::Step {
                task: task.name.clone(),
                role: agent.name().to_string(),
                output: output.clone(),
            });
            steps.push(TaskOutput {
                task: task.name.clone(),
                role: agent.name().to_string(),
                output,
            });
        }

        let last = steps
            .last()
            .cloned()
            .ok_or(AgentError::NoTasks)?;

        self.emit_event(&SequentialEvent::Completed {
            role: last.role.clone(),
            output: last.output.clone(),
        });
        info!(steps = steps.len(), "pipeline completed");

        Ok(PipelineResult {
            movie_name: inputs.movie_name.clone(),
            steps,
            final_output: last.output,
            output_mode: self.output_mode,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Drives a caller-owned [`RunState`] through one run.
    ///
    /// A state that is already `Running` is handed back untouched.
    pub async fn execute(&self, state: RunState, inputs: &RunInputs) -> RunState {
        self.execute_with_cancel(state, inputs, CancellationToken::new())
            .await
    }

    pub async fn execute_with_cancel(
        &self,
        state: RunState,
        inputs: &RunInputs,
        cancel: CancellationToken,
    ) -> RunState {
        let state = match state.start(self.crew.tasks().len()) {
            Ok(state) => state,
            Err(state) => {
                warn!("run requested while another run is in progress");
                return state;
            }
        };

        match self.run_with_cancel(inputs, cancel).await {
            Ok(result) => state.complete(result),
            Err(err) => state.fail(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::{
        agents::{AgentError, AgentSpec},
        crew::Crew,
        providers::{scripted::ScriptedProvider, LLMProvider},
        run_state::RunState,
        tasks::TaskSpec,
        template::{Placeholder, RunInputs, TemplateError},
        types::{CompletionRequest, CompletionResponse},
        LLMError,
    };

    use super::{OutputMode, SequentialEvent, SequentialOrchestrator};

    struct TestProvider {
        responses: Mutex<Vec<String>>,
    }

    impl TestProvider {
        fn new(responses: Vec<String>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for TestProvider {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
            let mut guard = self.responses.lock().unwrap();
            let content = guard.remove(0);
            drop(guard);

            Ok(CompletionResponse::from_text(content))
        }

        fn name(&self) -> &'static str {
            "test"
        }
    }

    fn three_step_crew() -> Arc<Crew> {
        let agents = vec![
            AgentSpec::new("Analyst", "Study {movie_name}", "You analyse.").unwrap(),
            AgentSpec::new("Writer", "Rewrite {movie_name}", "You write.").unwrap(),
            AgentSpec::new("Editor", "Polish {movie_name}", "You edit.").unwrap(),
        ];
        let tasks = vec![
            TaskSpec::new("analyse", "Analyst", "Analyse {movie_name}", "Notes.").unwrap(),
            TaskSpec::new("write", "Writer", "Write toward {desired_ending}", "Draft.").unwrap(),
            TaskSpec::new("edit", "Editor", "Edit the draft of {movie_name}", "Final.").unwrap(),
        ];
        Arc::new(Crew::new(agents, tasks).unwrap())
    }

    fn inputs() -> RunInputs {
        RunInputs::new("Heat", "Neil gets away")
    }

    #[tokio::test]
    async fn runs_tasks_in_sequence() {
        let provider: Arc<dyn LLMProvider> = Arc::new(TestProvider::new(vec![
            "notes".to_string(),
            "draft".to_string(),
            "final: polished".to_string(),
        ]));

        let orchestrator = SequentialOrchestrator::new(provider, "model", three_step_crew());
        let run = orchestrator.run(&inputs()).await.expect("run should succeed");

        assert_eq!(run.final_output, "final: polished");
        assert_eq!(run.text(), "final: polished");
        let roles: Vec<&str> = run.steps.iter().map(|s| s.role.as_str()).collect();
        assert_eq!(roles, vec!["Analyst", "Writer", "Editor"]);
        assert_eq!(run.movie_name, "Heat");
        assert!(run.finished_at >= run.started_at);
    }

    #[tokio::test]
    async fn later_tasks_see_earlier_outputs() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            "notes".into(),
            "draft".into(),
            "final".into(),
        ]));
        let orchestrator =
            SequentialOrchestrator::new(provider.clone(), "model", three_step_crew())
                .with_temperature(0.0);

        orchestrator.run(&inputs()).await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert!(!requests[0].last_user_text().unwrap().contains("### Analyst"));
        let last = requests[2].last_user_text().unwrap();
        assert!(last.contains("### Analyst\nnotes"));
        assert!(last.contains("### Writer\ndraft"));
        assert!(requests.iter().all(|r| r.temperature == Some(0.0)));
    }

    #[tokio::test]
    async fn transcript_mode_returns_every_step() {
        let provider: Arc<dyn LLMProvider> = Arc::new(TestProvider::new(vec![
            "notes".to_string(),
            "draft".to_string(),
            "final".to_string(),
        ]));
        let orchestrator = SequentialOrchestrator::new(provider, "model", three_step_crew())
            .with_output_mode(OutputMode::Transcript);

        let text = orchestrator.run(&inputs()).await.unwrap().text();
        assert_eq!(
            text,
            "## Analyst\nnotes\n\n## Writer\ndraft\n\n## Editor\nfinal"
        );
    }

    #[tokio::test]
    async fn aborts_on_first_failure() {
        let provider = Arc::new(ScriptedProvider::from_fn(|index, _| {
            if index == 1 {
                Err(LLMError::Status {
                    status: 401,
                    message: "Invalid API Key".into(),
                })
            } else {
                Ok("ok".into())
            }
        }));
        let orchestrator = SequentialOrchestrator::new(provider.clone(), "model", three_step_crew());

        let err = orchestrator.run(&inputs()).await.unwrap_err();
        assert!(matches!(err, AgentError::Provider(LLMError::Status { status: 401, .. })));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn blank_inputs_fail_before_any_call() {
        let provider = Arc::new(ScriptedProvider::echo());
        let orchestrator = SequentialOrchestrator::new(provider.clone(), "model", three_step_crew());

        let err = orchestrator
            .run(&RunInputs::new("Heat", ""))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Template(TemplateError::MissingValue(Placeholder::DesiredEnding))
        ));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn fires_event_callback() {
        let provider: Arc<dyn LLMProvider> = Arc::new(TestProvider::new(vec![
            "one".to_string(),
            "two".to_string(),
            "three".to_string(),
        ]));

        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);

        let orchestrator = SequentialOrchestrator::new(provider, "model", three_step_crew())
            .with_event_callback(move |event| {
                let label = match event {
                    SequentialEvent::Started { role, .. } => format!("start:{role}"),
                    SequentialEvent::Step { role, .. } => format!("step:{role}"),
                    SequentialEvent::Completed { role, .. } => format!("done:{role}"),
                    SequentialEvent::Failed { role, .. } => format!("fail:{role}"),
                };
                events_clone.lock().unwrap().push(label);
            });

        orchestrator.run(&inputs()).await.unwrap();
        let recorded = events.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![
                "start:Analyst",
                "step:Analyst",
                "start:Writer",
                "step:Writer",
                "start:Editor",
                "step:Editor",
                "done:Editor",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        struct Stalled;

        #[async_trait]
        impl LLMProvider for Stalled {
            async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(CompletionResponse::from_text("late"))
            }

            fn name(&self) -> &'static str {
                "stalled"
            }
        }

        let orchestrator = SequentialOrchestrator::new(Arc::new(Stalled), "model", three_step_crew())
            .with_llm_timeout_ms(50);
        let err = orchestrator.run(&inputs()).await.unwrap_err();
        assert!(matches!(err, AgentError::ProviderTimeout));
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_run() {
        let token = tokio_util::sync::CancellationToken::new();
        let trigger = token.clone();
        let provider = Arc::new(ScriptedProvider::from_fn(move |_, _| {
            trigger.cancel();
            Ok("first".into())
        }));
        let orchestrator = SequentialOrchestrator::new(provider.clone(), "model", three_step_crew());

        let err = orchestrator
            .run_with_cancel(&inputs(), token)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn execute_threads_run_state() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            "a".into(),
            "b".into(),
            "c".into(),
        ]));
        let orchestrator = SequentialOrchestrator::new(provider.clone(), "model", three_step_crew());

        let state = orchestrator.execute(RunState::Idle, &inputs()).await;
        match &state {
            RunState::Completed(result) => assert_eq!(result.final_output, "c"),
            other => panic!("unexpected state: {other:?}"),
        }

        let busy = RunState::Running { total: 3 };
        let unchanged = orchestrator.execute(busy.clone(), &inputs()).await;
        assert_eq!(unchanged, busy);
        assert_eq!(provider.call_count(), 3);

        let failed = orchestrator.execute(state, &inputs()).await;
        assert!(matches!(failed, RunState::Failed(message) if message.contains("no more scripted")));
    }
}

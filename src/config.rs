use std::{
    env,
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use thiserror::Error;

use crate::{
    crew::Crew,
    export::DEFAULT_EXPORT_FILENAME,
    providers::{
        groq::{self, Groq, GroqConfig},
        retry::{RetryPolicy, RetryingProvider},
        LLMProvider,
    },
    sequential::{OutputMode, SequentialOrchestrator},
    template::TemplateError,
    LLMError,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid crew document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{context}: {source}")]
    Template {
        context: String,
        #[source]
        source: TemplateError,
    },

    #[error("duplicate agent role: {0}")]
    DuplicateRole(String),

    #[error("task {task} references unknown agent {agent}")]
    UnknownAgent { task: String, agent: String },

    #[error("crew has no tasks")]
    EmptyCrew,

    #[error("failed to build provider: {0}")]
    Provider(#[from] LLMError),
}

/// Runtime settings, read from the environment and overridable from the CLI.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout: Duration,
    pub llm_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub output_mode: OutputMode,
    pub export_path: PathBuf,
    pub crew_path: Option<PathBuf>,
    pub bind_addr: SocketAddr,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: groq::DEFAULT_BASE_URL.to_string(),
            model: groq::DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            request_timeout: Duration::from_secs(60),
            llm_timeout_ms: 60_000,
            retry: RetryPolicy::default(),
            output_mode: OutputMode::Final,
            export_path: PathBuf::from(DEFAULT_EXPORT_FILENAME),
            crew_path: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3002)),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key/value source; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.api_key = lookup("GROQ_API_KEY").filter(|key| !key.trim().is_empty());
        if let Some(base_url) = lookup("GROQ_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(model) = lookup("PLOTTWIST_MODEL") {
            config.model = model;
        }
        if let Some(value) = lookup("PLOTTWIST_TEMPERATURE") {
            config.temperature = parse("PLOTTWIST_TEMPERATURE", &value)?;
        }
        if let Some(value) = lookup("GROQ_REQUEST_TIMEOUT_MS") {
            config.request_timeout =
                Duration::from_millis(parse("GROQ_REQUEST_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("PLOTTWIST_LLM_TIMEOUT_MS") {
            config.llm_timeout_ms = parse("PLOTTWIST_LLM_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("PLOTTWIST_MAX_RETRIES") {
            config.retry.max_retries = parse("PLOTTWIST_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("PLOTTWIST_OUTPUT") {
            config.output_mode = parse("PLOTTWIST_OUTPUT", &value)?;
        }
        if let Some(path) = lookup("PLOTTWIST_CREW").filter(|path| !path.trim().is_empty()) {
            config.crew_path = Some(PathBuf::from(path));
        }
        if let Some(value) = lookup("PLOTTWIST_BIND") {
            config.bind_addr = parse("PLOTTWIST_BIND", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "temperature",
                value: self.temperature.to_string(),
                reason: "must be between 0 and 2".to_string(),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "model",
                value: self.model.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// The crew from `crew_path`, or the built-in movie crew.
    pub fn crew(&self) -> Result<Crew, ConfigError> {
        match &self.crew_path {
            Some(path) => Crew::from_yaml_file(path),
            None => Ok(Crew::movie_summary()),
        }
    }

    /// The Groq client wrapped in the configured retry policy.
    pub fn provider(&self) -> Result<Arc<dyn LLMProvider>, ConfigError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or(ConfigError::MissingApiKey("GROQ_API_KEY"))?;
        let groq = Groq::from_config(
            GroqConfig::new(api_key)
                .with_base_url(self.base_url.clone())
                .with_timeout(self.request_timeout),
        )?;

        Ok(self.with_retries(groq))
    }

    /// Wraps `inner` in the retry policy, with `llm_timeout_ms` applied to
    /// each attempt.
    pub fn with_retries<P: LLMProvider + 'static>(&self, inner: P) -> Arc<dyn LLMProvider> {
        let policy = self
            .retry
            .clone()
            .with_attempt_timeout_ms(self.llm_timeout_ms);
        Arc::new(RetryingProvider::new(inner, policy))
    }

    /// Upper bound on one task: every attempt plus the full backoff between
    /// them.
    pub fn task_budget(&self) -> Duration {
        self.retry.budget(Duration::from_millis(self.llm_timeout_ms))
    }

    pub fn orchestrator(
        &self,
        provider: Arc<dyn LLMProvider>,
        crew: Arc<Crew>,
    ) -> SequentialOrchestrator {
        let budget_ms = u64::try_from(self.task_budget().as_millis()).unwrap_or(u64::MAX);
        SequentialOrchestrator::new(provider, self.model.clone(), crew)
            .with_temperature(self.temperature)
            .with_llm_timeout_ms(budget_ms)
            .with_output_mode(self.output_mode)
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use async_trait::async_trait;

    use super::{AppConfig, ConfigError};
    use crate::{
        agents::AgentSpec,
        crew::Crew,
        providers::LLMProvider,
        sequential::OutputMode,
        tasks::TaskSpec,
        template::RunInputs,
        types::{CompletionRequest, CompletionResponse},
        LLMError,
    };

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_target_groq_llama3() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.model, "llama3-70b-8192");
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.output_mode, OutputMode::Final);
        assert_eq!(
            config.export_path.to_str(),
            Some("Generated_Movie_Script_Summary.pdf")
        );
        assert!(config.api_key.is_none());
        assert!(config.crew_path.is_none());
        assert_eq!(config.crew().unwrap().tasks().len(), 5);
    }

    #[test]
    fn reads_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("GROQ_API_KEY", "secret"),
            ("PLOTTWIST_MODEL", "llama-3.1-70b-versatile"),
            ("PLOTTWIST_MAX_RETRIES", "1"),
            ("PLOTTWIST_OUTPUT", "transcript"),
            ("PLOTTWIST_BIND", "0.0.0.0:8080"),
        ]))
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.model, "llama-3.1-70b-versatile");
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.output_mode, OutputMode::Transcript);
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn invalid_values_are_reported_not_defaulted() {
        let err = AppConfig::from_lookup(lookup(&[("PLOTTWIST_TEMPERATURE", "hot")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "PLOTTWIST_TEMPERATURE", .. }));

        let err = AppConfig::from_lookup(lookup(&[("PLOTTWIST_TEMPERATURE", "3.5")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "temperature", .. }));
    }

    #[test]
    fn missing_crew_file_is_an_io_error() {
        let config =
            AppConfig::from_lookup(lookup(&[("PLOTTWIST_CREW", "/nonexistent/crew.yaml")])).unwrap();
        assert!(matches!(config.crew(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn provider_requires_api_key() {
        let config = AppConfig::from_lookup(lookup(&[("GROQ_API_KEY", "  ")])).unwrap();
        assert!(matches!(
            config.provider(),
            Err(ConfigError::MissingApiKey("GROQ_API_KEY"))
        ));
    }

    /// First call stalls for 60 s and then reports a timeout; the second
    /// answers after 35 s.
    struct SlowThenRecovers {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLMProvider for SlowThenRecovers {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
                return Err(LLMError::Timeout);
            }
            tokio::time::sleep(Duration::from_secs(35)).await;
            Ok(CompletionResponse::from_text("second attempt"))
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn default_timeouts_leave_room_for_a_retry() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.llm_timeout_ms, 60_000);
        assert!(config.task_budget() > Duration::from_secs(60 + 35));

        let stub = Arc::new(SlowThenRecovers {
            calls: AtomicUsize::new(0),
        });
        let crew = Crew::new(
            vec![AgentSpec::new("Writer", "Rewrite {movie_name}", "You write.").unwrap()],
            vec![TaskSpec::new("write", "Writer", "Write toward {desired_ending}", "Draft.").unwrap()],
        )
        .unwrap();
        let orchestrator = config.orchestrator(config.with_retries(Arc::clone(&stub)), Arc::new(crew));

        let result = orchestrator
            .run(&RunInputs::new("Stree", "a twist"))
            .await
            .expect("retry should recover within the task budget");
        assert_eq!(result.final_output, "second attempt");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    }
}

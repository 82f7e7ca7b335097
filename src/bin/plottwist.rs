use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use colored::Colorize;
use plottwist::{
    providers::scripted::ScriptedProvider,
    save_as_pdf, AppConfig, LLMProvider, OutputMode, RunInputs, RunState, SequentialEvent,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_MOVIE: &str = "Stree";
const DEFAULT_ENDING: &str =
    "Stree was ghost herself. She wanted to use the people of chanderi and create her own demonic empire.";

#[derive(Parser)]
#[command(name = "plottwist")]
#[command(about = "Re-imagine a movie with a new ending using a crew of LLM agents")]
struct Args {
    /// Title of the movie to rework
    #[arg(long, default_value = DEFAULT_MOVIE)]
    movie: String,

    /// The ending the new script should arrive at
    #[arg(long, default_value = DEFAULT_ENDING)]
    ending: String,

    /// Write the result to a PDF (default filename when no path is given)
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    export: Option<Option<PathBuf>>,

    /// YAML crew document to use instead of the built-in crew
    #[arg(long, value_name = "PATH")]
    crew: Option<PathBuf>,

    /// Model id (overrides PLOTTWIST_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Sampling temperature (overrides PLOTTWIST_TEMPERATURE)
    #[arg(long)]
    temperature: Option<f32>,

    /// Show only the final summary, or every agent's output
    #[arg(long, value_name = "final|transcript")]
    output: Option<OutputMode>,

    /// Timeout for each model call attempt, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Retries for transient upstream errors
    #[arg(long)]
    max_retries: Option<usize>,

    /// Use an offline echo provider instead of Groq
    #[arg(long)]
    dry_run: bool,

    /// Print the agent roster and exit
    #[arg(long)]
    list_agents: bool,
}

fn colorize_role(role: &str, index: usize) -> colored::ColoredString {
    match index % 5 {
        0 => role.bright_blue().bold(),
        1 => role.bright_green().bold(),
        2 => role.bright_magenta().bold(),
        3 => role.bright_yellow().bold(),
        _ => role.bright_cyan().bold(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(temperature) = args.temperature {
        config.temperature = temperature;
    }
    if let Some(mode) = args.output {
        config.output_mode = mode;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.llm_timeout_ms = timeout_ms;
    }
    if let Some(max_retries) = args.max_retries {
        config.retry.max_retries = max_retries;
    }
    if let Some(path) = args.crew {
        config.crew_path = Some(path);
    }
    config.validate()?;

    let crew = Arc::new(config.crew()?);

    if args.list_agents {
        for (index, agent) in crew.agents().iter().enumerate() {
            println!("{}", colorize_role(agent.role(), index));
            println!("  goal: {}", agent.goal().source());
            if let Some(description) = crew.description(agent.role()) {
                println!("  {}", description.dimmed());
            }
        }
        println!();
        for task in crew.tasks() {
            println!("{} -> {}", task.name().bold(), task.agent());
        }
        return Ok(());
    }

    let provider: Arc<dyn LLMProvider> = if args.dry_run {
        config.with_retries(ScriptedProvider::echo())
    } else {
        config.provider()?
    };

    let orchestrator = config
        .orchestrator(provider, crew)
        .with_event_callback(|event| match event {
            SequentialEvent::Started {
                task,
                role,
                index,
                total,
            } => {
                println!(
                    "{} {} is working on {}",
                    format!("[{}/{}]", index + 1, total).dimmed(),
                    colorize_role(role, *index),
                    task.italic()
                );
            }
            SequentialEvent::Step { role, output, .. } => {
                println!("  {} {} ({} chars)", "done".green(), role, output.len());
            }
            SequentialEvent::Completed { role, .. } => {
                println!("{}", format!("Run finished with {role}").green().bold());
            }
            SequentialEvent::Failed { role, error } => {
                eprintln!("{}", format!("{role} failed: {error}").red().bold());
            }
        });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let inputs = RunInputs::new(args.movie, args.ending);
    let state = orchestrator
        .execute_with_cancel(RunState::Idle, &inputs, cancel)
        .await;

    let result = match state {
        RunState::Completed(result) => result,
        RunState::Failed(message) => {
            eprintln!("{} {}", "Error:".red().bold(), message);
            std::process::exit(1);
        }
        other => {
            eprintln!("{} run ended in state {:?}", "Error:".red().bold(), other);
            std::process::exit(1);
        }
    };

    println!();
    println!("{}", "Generated Movie Script Summary".bold().underline());
    println!("{}", result.text());

    if let Some(path) = args.export {
        let target = path.unwrap_or_else(|| config.export_path.clone());
        let written = save_as_pdf(&result.text(), Some(&target))?;
        println!();
        println!("{} {}", "PDF written to".green(), written.display());
    }

    Ok(())
}

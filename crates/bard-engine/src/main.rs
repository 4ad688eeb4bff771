use anyhow::{bail, Context};
use bard_core::{BatchSpec, BatchStatus, InMemoryStore, LogFormat, RunnerConfig, StudyStore};
use bard_engine::{telemetry, JobQueue, Orchestrator, SessionExecutor, WorkerPool};
use bard_llm::HttpGateway;
use bard_plugin::twine::library::load_file;
use bard_plugin::{HttpStoryService, PluginRegistry, StoryLibrary};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const STORY_SERVICE_TIMEOUT: Duration = Duration::from_secs(30);

fn cli() -> Command {
    Command::new("bard-runner")
        .version(bard_engine::VERSION)
        .about("Run synthetic participants through interactive-fiction studies")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Runner configuration (TOML)"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .value_parser(["pretty", "json"])
                .help("Log output format"),
        )
        .subcommand(
            Command::new("run")
                .about("Run one batch to completion and print a JSON report")
                .arg(
                    Arg::new("batch")
                        .long("batch")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Batch specification (JSON or TOML)"),
                )
                .arg(
                    Arg::new("stories")
                        .long("stories")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory of Twine story JSON files"),
                )
                .arg(
                    Arg::new("story-service-url")
                        .long("story-service-url")
                        .default_value("http://127.0.0.1:8700")
                        .help("Base URL of the generative story service"),
                )
                .arg(
                    Arg::new("workers")
                        .long("workers")
                        .value_parser(value_parser!(usize))
                        .help("Override the configured worker count"),
                ),
        )
        .subcommand(
            Command::new("validate-story")
                .about("Check a Twine story file for missing passages and dangling links")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("print-config")
                .about("Print the effective configuration as TOML")
                .arg(
                    Arg::new("defaults")
                        .long("defaults")
                        .action(ArgAction::SetTrue)
                        .help("Ignore the config file and environment"),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<RunnerConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => RunnerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RunnerConfig::new(),
    };
    let mut config = config.with_env_overrides()?;
    match matches.get_one::<String>("log-format").map(String::as_str) {
        Some("json") => config.logging.format = LogFormat::Json,
        Some("pretty") => config.logging.format = LogFormat::Pretty,
        _ => {}
    }
    Ok(config)
}

fn load_batch(path: &Path) -> anyhow::Result<BatchSpec> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading batch {}", path.display()))?;
    let spec = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&text).with_context(|| format!("parsing batch {}", path.display()))?
    } else {
        serde_json::from_str(&text).with_context(|| format!("parsing batch {}", path.display()))?
    };
    Ok(spec)
}

async fn run(config: RunnerConfig, args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let Some(batch_path) = args.get_one::<PathBuf>("batch") else {
        bail!("--batch is required");
    };
    let spec = load_batch(batch_path)?;
    let config = match args.get_one::<usize>("workers") {
        Some(workers) => config.with_workers(*workers),
        None => config,
    };

    let mut library = StoryLibrary::default();
    if let Some(dir) = args.get_one::<PathBuf>("stories") {
        library = library.with_directory(dir);
        let loaded = library.preload().await?;
        tracing::info!(dir = %dir.display(), loaded, "stories preloaded");
    }
    let service_url = args
        .get_one::<String>("story-service-url")
        .map_or("http://127.0.0.1:8700", String::as_str);
    let service = Arc::new(HttpStoryService::new(service_url, STORY_SERVICE_TIMEOUT));
    let plugins = Arc::new(PluginRegistry::with_defaults(library, service));

    let store: Arc<dyn StudyStore> = Arc::new(InMemoryStore::new());
    let gateway = Arc::new(HttpGateway::new(config.llm.clone()));
    let executor = Arc::new(SessionExecutor::new(
        store.clone(),
        gateway,
        plugins,
        config.executor.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        Arc::new(JobQueue::new()),
        executor,
        config.queue.clone(),
    ));

    let batch = orchestrator.submit_batch(spec).await?;
    let counts = WorkerPool::new(orchestrator.clone()).run_until_idle().await;
    let report = orchestrator.report(batch.id).await?;
    let failed = orchestrator.queue().failed_jobs();

    let summary = serde_json::json!({
        "report": report,
        "failedJobs": failed,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    tracing::info!(batch_id = %batch.id, ?counts, "run finished");

    Ok(if report.batch.status == BatchStatus::Complete && failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn validate_story(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let Some(path) = args.get_one::<PathBuf>("file") else {
        bail!("story file is required");
    };
    let story = load_file(path).await?;
    let issues = story.validate();
    if issues.is_empty() {
        println!(
            "{}: {} passages, start '{}', ok",
            story.id,
            story.passages.len(),
            story.start
        );
        return Ok(ExitCode::SUCCESS);
    }
    for issue in &issues {
        println!("{}: {issue}", story.id);
    }
    Ok(ExitCode::FAILURE)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("run", args)) => {
            let config = load_config(args)?;
            telemetry::init(&config.logging)?;
            run(config, args).await
        }
        Some(("validate-story", args)) => validate_story(args).await,
        Some(("print-config", args)) => {
            let config = if args.get_flag("defaults") {
                RunnerConfig::new()
            } else {
                load_config(args)?
            };
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::SUCCESS),
    }
}

use blog_adapters::{create_capabilities, create_llm_adapter, AdapterError, WordPressClient};
use blog_core::{
    BlogRequest, ConfigStore, LanguageModelError, LengthCategory, LogFacadeSink, LogLevel,
    LogRecord, LogSink, ModelRequest, PipelineError, PipelineOrchestrator, PostStatus,
    PromptError, PromptRegistry, SharedLogSink, SiteId,
};
use blog_server::{AppState, ServerError};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let Cli { config, command } = Cli::parse();
    let runtime = tokio::runtime::Runtime::new().map_err(CliError::Runtime)?;
    let sink: SharedLogSink = Arc::new(LogFacadeSink::new());

    runtime.block_on(async move {
        match command {
            Command::Post(args) => run_post(&config, args, sink).await,
            Command::Serve(args) => run_serve(&config, args, sink).await,
            Command::Config(ConfigCommand::TestLlm(args)) => {
                run_test_llm(&config, args, sink.as_ref()).await
            }
            Command::Config(ConfigCommand::TestSite(args)) => {
                run_test_site(&config, args, sink.as_ref()).await
            }
        }
    })
}

fn open_store(config_path: &Path) -> Result<ConfigStore, CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();
    Ok(store)
}

fn build_orchestrator(
    store: &ConfigStore,
    sink: SharedLogSink,
) -> Result<PipelineOrchestrator, CliError> {
    let config = store.config();
    config.validate()?;
    let capabilities = create_capabilities(config)?;
    let prompts = PromptRegistry::from_prompt_config(&config.prompts)?;
    Ok(PipelineOrchestrator::from_capabilities(
        capabilities,
        Arc::new(prompts),
        config.pipeline.settings(),
        sink,
    ))
}

/// Cancels `token` on the first ctrl-c.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, cancelling");
            token.cancel();
        }
    });
}

async fn run_post(
    config_path: &Path,
    args: PostArgs,
    sink: SharedLogSink,
) -> Result<(), CliError> {
    let mut store = open_store(config_path)?;
    if let Some(attempts) = args.max_attempts {
        store.config_mut().pipeline.max_attempts = attempts.max(1);
    }

    let site = select_site(&store, args.site)?;
    let length = args.length.parse::<LengthCategory>()?;
    let mut request = BlogRequest::new(args.genre, length, site.as_str());
    if let Some(style) = normalize_preference(args.style) {
        request = request.with_writing_style(style);
    }
    if let Some(status) = normalize_preference(args.status) {
        request = request.with_post_status(status.parse::<PostStatus>()?);
    }
    if let Some(key) = normalize_preference(args.idempotency_key) {
        request = request.with_idempotency_key(key);
    }

    let orchestrator = build_orchestrator(&store, sink)?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let post = orchestrator.run(request, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&post)?);

    let writer = store.config().writer_interface().ok().map(str::to_string);
    if let Some(writer) = writer {
        store.touch_llm_interface(writer);
    }
    store.touch_site(site);
    store.save()?;
    Ok(())
}

async fn run_serve(
    config_path: &Path,
    args: ServeArgs,
    sink: SharedLogSink,
) -> Result<(), CliError> {
    let store = open_store(config_path)?;
    let mut server_config = store.config().server.clone();
    if let Some(bind) = normalize_preference(args.bind) {
        server_config.bind = bind;
    }

    let orchestrator = build_orchestrator(&store, sink)?;
    let sites = store.config().sites.keys().cloned().collect();
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let state = AppState::new(Arc::new(orchestrator), sites, shutdown);
    blog_server::serve(&server_config, state).await?;
    Ok(())
}

async fn run_test_llm(
    config_path: &Path,
    args: TestLlmArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let mut store = open_store(config_path)?;
    let selected = select_llm_interface(&store, args.interface)?;
    let profile = store
        .config()
        .get_llm_profile(&selected)
        .cloned()
        .ok_or_else(|| CliError::UnknownInterface(selected.clone()))?;

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("testing LLM profile `{selected}`"),
    ));
    sink.log(LogRecord::new(
        LogLevel::Debug,
        format!(
            "model: {} | interface: {} | base url: {}",
            profile.model_name, profile.interface_format, profile.base_url
        ),
    ));

    let adapter = create_llm_adapter(store.config(), &selected)?;
    let response = adapter
        .invoke(&ModelRequest::new("Please reply 'OK'").with_max_tokens(16))
        .await
        .inspect_err(|err| {
            sink.log(LogRecord::new(LogLevel::Error, format!("LLM test failed: {err}")))
        })?;
    if response.trim().is_empty() {
        return Err(CliError::TestFailed(
            "LLM test failed: the model returned nothing".to_string(),
        ));
    }
    sink.log(LogRecord::new(LogLevel::Info, "LLM profile works"));
    sink.log(LogRecord::new(LogLevel::Debug, format!("reply: {response}")));

    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

async fn run_test_site(
    config_path: &Path,
    args: TestSiteArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let mut store = open_store(config_path)?;
    let site = select_site(&store, args.site)?;
    let client = WordPressClient::new(&store.config().sites)?;

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("checking credentials for site `{site}`"),
    ));
    let account = client.verify(&SiteId::new(site.as_str())).await?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("site `{site}` accepted the credentials of {account}"),
    ));

    store.touch_site(site);
    store.save()?;
    Ok(())
}

fn select_llm_interface(
    store: &ConfigStore,
    preferred: Option<String>,
) -> Result<String, CliError> {
    if let Some(name) = normalize_preference(preferred) {
        if store.config().llm_profiles.contains_key(&name) {
            return Ok(name);
        }
        return Err(CliError::UnknownInterface(name));
    }
    if let Ok(name) = store.config().writer_interface() {
        return Ok(name.to_string());
    }
    if let Some(name) = store.last_llm_interface() {
        return Ok(name.to_string());
    }
    Err(CliError::MissingLlmProfile)
}

fn select_site(store: &ConfigStore, preferred: Option<String>) -> Result<String, CliError> {
    if let Some(name) = normalize_preference(preferred) {
        if store.config().sites.contains_key(&name) {
            return Ok(name);
        }
        return Err(CliError::UnknownSite(name));
    }
    store
        .last_site()
        .map(str::to_string)
        .ok_or(CliError::MissingSite)
}

fn normalize_preference(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] blog_core::ConfigError),
    #[error("no LLM profile is configured")]
    MissingLlmProfile,
    #[error("no site is configured")]
    MissingSite,
    #[error("no LLM profile named `{0}`")]
    UnknownInterface(String),
    #[error("no site named `{0}`")]
    UnknownSite(String),
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("LLM call failed: {0}")]
    Model(#[from] LanguageModelError),
    #[error("failed to load prompts: {0}")]
    Prompt(#[from] PromptError),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("server error: {0}")]
    Server(#[from] ServerError),
    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("{0}")]
    TestFailed(String),
}

#[derive(Parser)]
#[command(
    name = "blog-cli",
    version,
    about = "Generate, review, illustrate and publish blog posts"
)]
struct Cli {
    /// Path of the JSON config file
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline for one post and print it as JSON
    Post(PostArgs),
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Probe configured credentials
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Send a short prompt to an LLM profile
    TestLlm(TestLlmArgs),
    /// Authenticate against a WordPress site
    TestSite(TestSiteArgs),
}

#[derive(Args)]
struct PostArgs {
    /// Topic of the post
    #[arg(long)]
    genre: String,
    /// short, medium or long
    #[arg(long, default_value = "medium")]
    length: String,
    /// Target site; defaults to the most recently used one
    #[arg(long)]
    site: Option<String>,
    #[arg(long, value_name = "TEXT")]
    style: Option<String>,
    /// publish or draft; defaults to the site setting
    #[arg(long)]
    status: Option<String>,
    /// Reuse the token reported by an earlier ambiguous run
    #[arg(long, value_name = "TOKEN")]
    idempotency_key: Option<String>,
    #[arg(long, value_name = "N")]
    max_attempts: Option<u32>,
}

#[derive(Args)]
struct ServeArgs {
    /// Overrides `server.bind` from the config file
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

#[derive(Args)]
struct TestLlmArgs {
    /// Profile to test; defaults to the writer profile
    #[arg(long)]
    interface: Option<String>,
}

#[derive(Args)]
struct TestSiteArgs {
    #[arg(long)]
    site: Option<String>,
}

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gce_startup::compute::{ComputeClient, ComputeError, PollPolicy};
use gce_startup::config::Config;
use gce_startup::demo::{self, AutoConfirm, Prompt, StdinPrompt};
use gce_startup::gcp::auth::{self, Authenticator, GcpCredentials, COMPUTE_SCOPE};
use gce_startup::gcp::http::{format_gcp_error, GcpHttpClient};
use gce_startup::gcp::oauth::{ClientSecrets, CredentialStore, InstalledAppCredentials};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Boot a Compute Engine VM with a startup script, list instances, then shut it down
#[derive(Parser, Debug)]
#[command(name = "gce-startup", version = gce_startup::VERSION, about, long_about = None)]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// GCP project to use
    #[arg(short, long)]
    project: Option<String>,

    /// GCP zone to use
    #[arg(short, long)]
    zone: Option<String>,

    /// Name of the instance to create
    #[arg(long)]
    instance_name: Option<String>,

    /// Script run by the instance at boot
    #[arg(long)]
    startup_script: Option<PathBuf>,

    /// Image the startup script downloads
    #[arg(long)]
    image_url: Option<String>,

    /// Text drawn onto the image
    #[arg(long)]
    image_text: Option<String>,

    /// Cloud Storage bucket receiving output.png
    #[arg(long)]
    bucket: Option<String>,

    /// OAuth client secrets JSON; enables the browser sign-in flow
    #[arg(long)]
    client_secrets: Option<PathBuf>,

    /// Where OAuth credentials are cached
    #[arg(long)]
    credential_store: Option<PathBuf>,

    /// Use this access token instead of signing in
    #[arg(long)]
    access_token: Option<String>,

    /// Seconds between the first operation polls
    #[arg(long, default_value_t = 1)]
    poll_interval_secs: u64,

    /// Give up waiting on an operation after this many seconds (0 waits forever)
    #[arg(long, default_value_t = 600)]
    poll_timeout_secs: u64,

    /// Do not wait for Enter before shutting the instance down
    #[arg(short, long)]
    yes: bool,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    // RUST_LOG wins when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gce_startup={}", tracing_level.as_str().to_lowercase())));

    let Some(log_path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
        return Ok(None);
    };

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("gce-startup {} logging to {:?}", gce_startup::VERSION, log_path);

    Ok(Some(guard))
}

impl Args {
    /// Flag values as a config layer
    fn overrides(&self) -> Config {
        Config {
            project_id: self.project.clone(),
            zone: self.zone.clone(),
            instance_name: self.instance_name.clone(),
            startup_script: self.startup_script.clone(),
            image_url: self.image_url.clone(),
            image_text: self.image_text.clone(),
            gcs_bucket: self.bucket.clone(),
            client_secrets: self.client_secrets.clone(),
            credential_store: self.credential_store.clone(),
            ..Default::default()
        }
    }

    fn poll_policy(&self) -> PollPolicy {
        let timeout = match self.poll_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let defaults = PollPolicy::default();
        let initial_interval = Duration::from_secs(self.poll_interval_secs.max(1));
        PollPolicy {
            initial_interval,
            // The cap is never below the first interval
            max_interval: defaults.max_interval.max(initial_interval),
            ..defaults
        }
        .with_timeout(timeout)
    }
}

/// Pick the credential source: explicit token, installed-app flow, or ADC
async fn authenticate(config: &Config, access_token: Option<&str>) -> Result<Authenticator> {
    if let Some(token) = access_token {
        return Ok(Authenticator::Static(token.to_string()));
    }

    if let Some(secrets_path) = &config.client_secrets {
        let secrets = ClientSecrets::from_file(secrets_path)?;
        let store = CredentialStore::new(config.credential_store_path());
        let http = GcpHttpClient::new()?.inner().clone();
        let creds = InstalledAppCredentials::authorize(secrets, store, COMPUTE_SCOPE, http)
            .await
            .context("OAuth authorization failed")?;
        return Ok(Authenticator::InstalledApp(Arc::new(creds)));
    }

    let creds = GcpCredentials::new(&[COMPUTE_SCOPE]).await?;
    Ok(Authenticator::ApplicationDefault(creds))
}

/// Console message for a failure that ended the run
fn describe_failure(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ComputeError>() {
        Some(ComputeError::Transport(inner)) => format_gcp_error(inner),
        _ => format_gcp_error(err),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level, args.log_file.as_deref())?;

    let file_config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = file_config.overlay(args.overrides());

    let project = config.effective_project().context(
        "No GCP project configured. Set GOOGLE_CLOUD_PROJECT, project_id or use --project",
    )?;
    if !auth::validate_project_id(&project) {
        tracing::warn!("Project ID {} does not look like a GCP project ID", project);
    }
    let zone = config.effective_zone();
    let plan = config.demo_plan()?;

    tracing::info!("Using project: {}, zone: {}", project, zone);

    let authenticator = authenticate(&config, args.access_token.as_deref()).await?;
    let client = ComputeClient::new(config.compute_config(&project, &zone), authenticator)?
        .with_poll_policy(args.poll_policy());
    tracing::debug!(
        "Instance defaults: {} from {}",
        client.config().machine_type,
        client.config().source_image
    );

    let mut prompt: Box<dyn Prompt> = if args.yes {
        Box::new(AutoConfirm)
    } else {
        Box::new(StdinPrompt)
    };

    let mut stdout = std::io::stdout();
    match demo::run(&client, &plan, prompt.as_mut(), &mut stdout).await {
        Ok(outcome) if outcome.is_success() => Ok(ExitCode::SUCCESS),
        Ok(_) => Ok(ExitCode::FAILURE),
        Err(err) => {
            tracing::error!("Demo aborted: {:#}", err);
            eprintln!("Error: {}", describe_failure(&err));
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        Args::parse_from(std::iter::once("gce-startup").chain(extra.iter().copied()))
    }

    #[test]
    fn test_default_poll_policy() {
        let policy = parse(&[]).poll_policy();
        assert_eq!(policy.first_interval(), Duration::from_secs(1));
        assert_eq!(policy.max_interval, Duration::from_secs(10));
        assert_eq!(policy.timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_long_poll_interval_raises_cap() {
        let policy = parse(&["--poll-interval-secs", "30"]).poll_policy();

        assert_eq!(policy.first_interval(), Duration::from_secs(30));
        assert_eq!(policy.max_interval, Duration::from_secs(30));
        assert_eq!(policy.next_interval(policy.first_interval()), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_timeout_waits_forever() {
        let policy = parse(&["--poll-timeout-secs", "0"]).poll_policy();
        assert_eq!(policy.timeout, None);
    }
}

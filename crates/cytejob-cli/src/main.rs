mod output;
mod progress;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cytejob_client::{HttpTransport, TransportConfig};
use cytejob_core::error::{ApiError, ErrorKind};
use cytejob_core::job::{JobId, PollConfig};
use cytejob_core::normalize::AnnotationTable;
use cytejob_core::poller::{JobPoller, TracingPollReporter};
use cytejob_core::resolver::resolve;
use cytejob_core::submit::submit_job;

use crate::progress::{LineBreakingWriter, OpenLine, TerminalProgress};

#[derive(Parser)]
#[command(
    name = "cytejob",
    version,
    about = "Submit and track remote cell-type annotation jobs"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Base URL of the annotation service
    #[arg(long, env = "CYTEJOB_BASE_URL")]
    base_url: String,

    /// Bearer token (reads from CYTEJOB_AUTH_TOKEN if not provided)
    #[arg(long, env = "CYTEJOB_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Per-request timeout for status/results calls, in seconds
    #[arg(long, env = "CYTEJOB_READ_TIMEOUT_SECS", default_value_t = 30)]
    read_timeout: u64,

    /// Per-request timeout for job submission, in seconds
    #[arg(long, env = "CYTEJOB_SUBMIT_TIMEOUT_SECS", default_value_t = 60)]
    submit_timeout: u64,
}

#[derive(Args)]
struct PollArgs {
    /// Seconds between status checks
    #[arg(
        long,
        env = "CYTEJOB_POLL_INTERVAL_SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_interval: u64,

    /// Overall polling budget in seconds
    #[arg(
        long,
        env = "CYTEJOB_TIMEOUT_SECS",
        default_value_t = 7200,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    timeout: u64,

    /// JSON object mapping server cluster ids to original labels
    #[arg(short, long)]
    labels: Option<PathBuf>,

    /// Write the CSV table here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl PollArgs {
    fn poll_config(&self) -> PollConfig {
        PollConfig::default()
            .with_poll_interval(Duration::from_secs(self.poll_interval))
            .with_timeout(Duration::from_secs(self.timeout))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an annotation request and print its job id
    Submit {
        /// Path to the JSON request payload
        #[arg(short, long)]
        payload: PathBuf,
    },

    /// Submit a request, wait for it to finish and write the annotations
    Run {
        /// Path to the JSON request payload
        #[arg(short, long)]
        payload: PathBuf,

        #[command(flatten)]
        poll: PollArgs,
    },

    /// Wait for an existing job and write its annotations
    Results {
        /// Job id returned by `submit`
        job_id: String,

        #[command(flatten)]
        poll: PollArgs,
    },

    /// Show the current state of a job without waiting
    Status {
        job_id: String,
    },

    /// Print the browser report URL for a job
    ReportUrl {
        job_id: String,
    },
}

/// Context attached to submission failures so they get their own exit code.
#[derive(Debug)]
struct SubmissionFailed;

impl fmt::Display for SubmissionFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job submission failed")
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let line = OpenLine::default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cytejob=info")),
        )
        .with_target(false)
        .with_writer(LineBreakingWriter::new(std::io::stderr, line.clone()))
        .init();

    let cli = Cli::parse();

    match execute(cli, line).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let failure = Failure::classify(&err);
            match failure.marker() {
                Some(marker) => eprintln!("Error [{marker}]: {err:#}"),
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::from(failure.exit_code())
        }
    }
}

async fn execute(cli: Cli, line: OpenLine) -> Result<()> {
    let transport = build_transport(&cli.connection)?;
    let token = cli.connection.auth_token.as_deref();

    match cli.command {
        Commands::Submit { payload } => cmd_submit(&transport, &payload, token).await,
        Commands::Run { payload, poll } => {
            let job_id = submit(&transport, &payload, token).await?;
            eprintln!("Submitted job {job_id}");
            eprintln!("Report: {}", transport.report_url(&job_id));
            cmd_wait(transport, &job_id, &poll, token, line).await
        }
        Commands::Results { job_id, poll } => {
            cmd_wait(transport, &JobId::new(job_id), &poll, token, line).await
        }
        Commands::Status { job_id } => cmd_status(&transport, &JobId::new(job_id), token).await,
        Commands::ReportUrl { job_id } => {
            println!("{}", transport.report_url(&JobId::new(job_id)));
            Ok(())
        }
    }
}

fn build_transport(args: &ConnectionArgs) -> Result<HttpTransport> {
    let config = TransportConfig::new(args.base_url.as_str())
        .with_read_timeout(Duration::from_secs(args.read_timeout))
        .with_submit_timeout(Duration::from_secs(args.submit_timeout));
    HttpTransport::new(config).context("Invalid transport configuration")
}

async fn submit(transport: &HttpTransport, payload: &Path, token: Option<&str>) -> Result<JobId> {
    let payload = output::load_payload(payload)?;
    let job_id = submit_job(transport, &payload, token)
        .await
        .context(SubmissionFailed)?;
    Ok(job_id)
}

async fn cmd_submit(transport: &HttpTransport, payload: &Path, token: Option<&str>) -> Result<()> {
    let job_id = submit(transport, payload, token).await?;
    println!("{job_id}");
    eprintln!("Report: {}", transport.report_url(&job_id));
    Ok(())
}

async fn cmd_wait(
    transport: HttpTransport,
    job_id: &JobId,
    args: &PollArgs,
    token: Option<&str>,
    line: OpenLine,
) -> Result<()> {
    let mut poller = JobPoller::new(transport, args.poll_config());
    if let Some(path) = &args.labels {
        poller = poller.with_cluster_labels(output::load_labels(path)?);
    }

    let cancel = cancel_on_ctrl_c();
    let progress = TerminalProgress::stderr(line);
    let outcome = poller
        .run(job_id, token, Some(&progress), &TracingPollReporter, &cancel)
        .await;
    progress.finish();
    let table = outcome?;

    tracing::info!(%job_id, clusters = table.len(), "Annotations received");
    write_table(&table, args.output.as_deref())
}

async fn cmd_status(transport: &HttpTransport, job_id: &JobId, token: Option<&str>) -> Result<()> {
    let snapshot = resolve(transport, job_id, token).await?;

    let report = json!({
        "jobId": job_id,
        "state": snapshot.state().as_str(),
        "message": snapshot.message(),
        "observedAt": snapshot.observed_at().to_rfc3339(),
        "clusterStatus": snapshot.cluster_status(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn write_table(table: &AnnotationTable, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            output::write_csv(table, file)?;
            tracing::info!(path = %path.display(), "Annotations written");
        }
        None => output::write_csv(table, std::io::stdout().lock())?,
    }
    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping");
            trigger.cancel();
        }
    });
    cancel
}

/// How a failed command is reported to the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Auth,
    Timeout,
    Cancelled,
    Submission,
    Other,
}

impl Failure {
    fn classify(err: &anyhow::Error) -> Self {
        let kind = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<ApiError>())
            .map(|api| api.kind);

        match kind {
            Some(ErrorKind::Auth) => Failure::Auth,
            Some(ErrorKind::Timeout) => Failure::Timeout,
            Some(ErrorKind::Cancelled) => Failure::Cancelled,
            _ if err.downcast_ref::<SubmissionFailed>().is_some() => Failure::Submission,
            _ => Failure::Other,
        }
    }

    fn marker(self) -> Option<&'static str> {
        match self {
            Failure::Auth => Some("authentication/authorization"),
            Failure::Timeout => Some("timeout"),
            _ => None,
        }
    }

    fn exit_code(self) -> u8 {
        match self {
            Failure::Other => 1,
            Failure::Submission => 2,
            Failure::Auth => 3,
            Failure::Timeout => 4,
            Failure::Cancelled => 130,
        }
    }
}

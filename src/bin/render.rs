use clap::{ArgAction, Parser};
use futures::TryStreamExt;
use prompt_to_video::{
    config::AppConfig,
    flows::{create::create_video, open_media, Backend},
    models::request::{CreateVideoRequest, ReferenceImage, Resolution, VideoModel},
    services::{
        openai::OpenAiVideosClient,
        poller::{CancelToken, PollObserver, PollOutcome, PollState, ProgressUpdate},
        videos::ApiError,
    },
    session::SessionStore,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "render", version, about = "Render one prompt to an MP4")]
struct Args {
    /// Verbose mode [default: "warn", -v "info", -vv "debug", -vvv "trace"]
    #[arg(short = 'v', action = ArgAction::Count, default_value_t = 0)]
    verbose: u8,
    /// Text prompt describing the clip
    #[arg(short, long, required_unless_present = "resume", conflicts_with = "resume")]
    prompt: Option<String>,
    /// Keep watching an existing job instead of creating one
    #[arg(long)]
    resume: Option<String>,
    #[arg(short, long, default_value_t = VideoModel::Sora2)]
    model: VideoModel,
    /// Clip length in seconds (2-25)
    #[arg(short, long, default_value_t = 8)]
    seconds: u32,
    #[arg(long, default_value_t = Resolution::Landscape720)]
    size: Resolution,
    /// PNG or JPEG used to steer the first frame
    #[arg(short, long)]
    reference: Option<PathBuf>,
    /// Where to save the MP4 [default: <job id>.mp4]
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Local polling budget in seconds, overrides POLL_TIMEOUT_SECS
    #[arg(long)]
    timeout: Option<u64>,
}

/// Prints progress lines to stderr.
struct ConsoleObserver;

impl PollObserver for ConsoleObserver {
    fn on_progress(&mut self, update: &ProgressUpdate) {
        eprintln!(
            "[{:>5.1}s] {} {}",
            update.elapsed_ms as f64 / 1000.0,
            update.job_id,
            update.label
        );
    }

    fn on_transition(&mut self, job_id: &str, _from: PollState, to: PollState) {
        tracing::debug!(job_id = %job_id, state = %to, "Poll state");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
    .as_str()
    .to_lowercase();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("prompt_to_video={level},render={level}"))),
        )
        .compact()
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, ApiError> {
    let config = AppConfig::from_env()
        .map_err(|e| ApiError::Validation(format!("invalid configuration: {e}")))?;
    let client = OpenAiVideosClient::from_config(&config)?;
    let mut backend = Backend::from_config(Arc::new(client), &config);
    if let Some(secs) = args.timeout {
        backend.poll.timeout = Duration::from_secs(secs.max(1));
    }

    let mut store = SessionStore::new(config.session_cache_capacity);
    let cancel = CancelToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping; the job keeps rendering remotely.");
            on_ctrl_c.cancel();
        }
    });

    let mut observer = ConsoleObserver;
    let outcome = match &args.resume {
        Some(job_id) => {
            backend
                .poller()
                .run(backend.api.as_ref(), job_id, &mut store, &mut observer, &cancel)
                .await
        }
        None => {
            let request = build_request(&args).await?;
            let created = create_video(&backend, &mut store, &request, &mut observer, &cancel).await?;
            eprintln!("Submitted {}", created.submitted.summary());
            created.outcome
        }
    };

    eprintln!("{}", outcome.summary());
    match &outcome {
        PollOutcome::Completed { job, .. } => {
            let path = args
                .out
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("{}.mp4", job.id)));
            let written = save_media(&backend, &mut store, &job.id, &path).await?;
            eprintln!("Saved {written} bytes to {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        PollOutcome::Failed { .. } => Ok(ExitCode::from(1)),
        PollOutcome::TimedOut { job_id, .. } => {
            eprintln!("Resume later with: render --resume {job_id}");
            Ok(ExitCode::from(3))
        }
        PollOutcome::Cancelled { .. } => Ok(ExitCode::from(130)),
    }
}

async fn build_request(args: &Args) -> Result<CreateVideoRequest, ApiError> {
    let mut request = CreateVideoRequest::new(args.prompt.clone().unwrap_or_default());
    request.model = args.model;
    request.seconds = args.seconds;
    request.resolution = args.size;

    if let Some(path) = &args.reference {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ApiError::Validation(format!("cannot read {}: {e}", path.display()))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "reference".to_string());
        request.reference_image = Some(ReferenceImage { file_name, bytes });
    }
    Ok(request)
}

async fn save_media(
    backend: &Backend,
    store: &mut SessionStore,
    job_id: &str,
    path: &Path,
) -> Result<u64, ApiError> {
    let write_err = |e: std::io::Error| {
        ApiError::UnexpectedResponse(format!("cannot write {}: {e}", path.display()))
    };

    let mut stream = open_media(backend, store, job_id).await?;
    let mut file = tokio::fs::File::create(path).await.map_err(write_err)?;
    let mut written = 0u64;
    while let Some(chunk) = stream.try_next().await? {
        file.write_all(&chunk).await.map_err(write_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_err)?;
    tracing::info!(job_id = %job_id, bytes = written, "Saved rendered video");
    Ok(written)
}

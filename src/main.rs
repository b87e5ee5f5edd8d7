use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use invoice_scan_jobs::{config::AppConfig, Job, JobClient, PollOptions, SubmitRequest};

#[derive(Debug, Parser)]
#[command(name = "invoice-scan", version, about = "Submit invoice images for OCR and follow the jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload an image and create a pending OCR job
    Submit {
        path: PathBuf,
        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
        /// Keep polling until the job finishes
        #[arg(long)]
        watch: bool,
    },
    /// Print the current state of a job
    Status { job_id: Uuid },
    /// Poll a job until it finishes
    Watch {
        job_id: Uuid,
        /// Override the configured poll interval
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// List the most recent jobs
    List {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let client = JobClient::from_config(&config).expect("Failed to initialize job client");

    if let Err(e) = run(&client, cli.command).await {
        tracing::error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}

async fn run(client: &JobClient, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Submit { path, name, watch } => {
            let bytes = tokio::fs::read(&path).await?;
            let name = name.or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            });

            let mut request = SubmitRequest::new(bytes);
            request.image_name = name;

            let job = client.submit(request).await?;
            print_job(&job)?;

            if watch {
                follow(client, job.id, client.settings().poll).await?;
            }
        }
        Commands::Status { job_id } => {
            let job = client.fetch(job_id).await?;
            print_job(&job)?;
        }
        Commands::Watch {
            job_id,
            interval_ms,
        } => {
            let mut options = client.settings().poll;
            if let Some(ms) = interval_ms {
                options.interval = Duration::from_millis(ms);
            }
            follow(client, job_id, options).await?;
        }
        Commands::List { limit } => {
            for job in client.list_recent(limit).await? {
                print_job(&job)?;
            }
        }
    }

    Ok(())
}

/// Print every snapshot until the job finishes or Ctrl-C is pressed.
async fn follow(
    client: &JobClient,
    job_id: Uuid,
    options: PollOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut handle = client.poll(job_id, options)?;
    let cancel = handle.cancellation_token();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(job_id = %job_id, "Interrupted, stopping poll");
            cancel.cancel();
        }
    });

    while let Some(item) = handle.next().await {
        print_job(&item?)?;
    }

    Ok(())
}

fn print_job(job: &Job) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(job)?);
    Ok(())
}

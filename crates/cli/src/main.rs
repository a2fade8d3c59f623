mod logging;

use clap::{ArgAction, Parser, Subcommand};
use derive_more::{Display, Error};
use exn::ResultExt;
use filer_client::{Entry, Filer, HttpTransport, QueryParams, UploadOptions};
use filer_config::Config;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("unable to set up logging")]
    Logging,
    #[display("unable to load configuration")]
    Config,
    #[display("unable to set up the Filer client")]
    Connect,
    #[display("upload failed")]
    Upload,
    #[display("listing failed")]
    List,
    #[display("download failed")]
    Download,
    #[display("delete failed")]
    Delete,
    #[display("unable to write {}", _0.display())]
    Output(#[error(not(source))] PathBuf),
}

#[derive(Debug, Parser)]
#[command(name = "filer", version, about = "Upload, list, download and delete files on a Filer")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true, env = "FILER_CONFIG")]
    config: Option<PathBuf>,
    /// Filer endpoint, overriding the configuration
    #[arg(long, global = true)]
    endpoint: Option<String>,
    /// Increase log output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a file, or every file beneath a directory
    Upload {
        local: PathBuf,
        remote: String,
        #[arg(long)]
        collection: Option<String>,
        #[arg(long)]
        ttl: Option<String>,
    },
    /// List a remote directory
    Ls {
        #[arg(default_value = "/")]
        remote: String,
        /// Expand every subdirectory
        #[arg(short, long)]
        recursive: bool,
    },
    /// Download a remote file to a local file or stdout
    Get {
        remote: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a remote file, or a directory and its contents
    Rm {
        remote: String,
        #[arg(short, long)]
        recursive: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = logging::init(cli.verbose) {
        eprintln!("Warning: {err:?}");
    }
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
        config.validate().or_raise(|| ErrorKind::Config)?;
    }
    let filer = connect(&config)?;
    execute(&filer, &config, cli.command).await
}

fn connect(config: &Config) -> Result<Filer> {
    let transport = match config.timeout() {
        Some(timeout) => HttpTransport::with_timeout(timeout),
        None => HttpTransport::new(),
    }
    .or_raise(|| ErrorKind::Connect)?;
    let filer = Filer::new(&config.endpoint, Arc::new(transport)).or_raise(|| ErrorKind::Connect)?;
    Ok(filer.with_concurrency(config.concurrency).with_max_depth(config.max_depth))
}

async fn execute(filer: &Filer, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Upload { local, remote, collection, ttl } => {
            let mut options = config.upload_options();
            if let Some(collection) = collection {
                options = options.collection(collection);
            }
            if let Some(ttl) = ttl {
                options = options.ttl(ttl);
            }
            upload(filer, &local, &remote, &options).await.or_raise(|| ErrorKind::Upload)
        },
        Command::Ls { remote, recursive } => {
            let entries = match recursive {
                true => filer.list_folder_recursive(&remote).await,
                false => filer.list_folder(&remote).await,
            }
            .or_raise(|| ErrorKind::List)?;
            for line in render(&entries) {
                println!("{line}");
            }
            Ok(())
        },
        Command::Get { remote, output: Some(path) } => {
            let mut file = tokio::fs::File::create(&path).await.or_raise(|| ErrorKind::Output(path.clone()))?;
            let result = filer.download_to(&remote, &QueryParams::new(), &mut file).await;
            drop(file);
            match result {
                Ok(bytes) => {
                    tracing::info!(remote = %remote, output = %path.display(), bytes, "Downloaded");
                    Ok(())
                },
                Err(err) => {
                    // Leave nothing half-written behind.
                    let _ = tokio::fs::remove_file(&path).await;
                    Err(err).or_raise(|| ErrorKind::Download)
                },
            }
        },
        Command::Get { remote, output: None } => {
            let mut stdout = tokio::io::stdout();
            filer.download_to(&remote, &QueryParams::new(), &mut stdout).await.or_raise(|| ErrorKind::Download)?;
            Ok(())
        },
        Command::Rm { remote, recursive: true } => filer.delete_folder(&remote).await.or_raise(|| ErrorKind::Delete),
        Command::Rm { remote, recursive: false } => filer.delete_file(&remote).await.or_raise(|| ErrorKind::Delete),
    }
}

async fn upload(filer: &Filer, local: &Path, remote: &str, options: &UploadOptions) -> filer_client::error::Result<()> {
    if !local.is_dir() {
        let result = filer.upload_file(local, remote, options).await?;
        println!("{}\t{}\t{}", result.file_id, result.size, result.name);
        return Ok(());
    }
    let outcome = filer.upload_folder(local, remote, options).await;
    for result in &outcome.completed {
        println!("{}\t{}\t{}", result.file_id, result.size, result.name);
    }
    if !outcome.is_complete() {
        eprintln!("Stopped after {} uploaded files", outcome.completed.len());
    }
    outcome.into_result().map(|_| ())
}

/// One line per entry, children indented beneath their directory.
fn render(entries: &[Entry]) -> Vec<String> {
    fn visit(entries: &[Entry], depth: usize, lines: &mut Vec<String>) {
        let indent = "  ".repeat(depth);
        for entry in entries {
            match entry.size() {
                _ if entry.is_directory() => lines.push(format!("{indent}{}/", entry.name)),
                Some(size) => lines.push(format!("{indent}{} ({size} bytes)", entry.name)),
                None => lines.push(format!("{indent}{}", entry.name)),
            }
            if let Some(children) = entry.children() {
                visit(children, depth + 1, lines);
            }
        }
    }
    let mut lines = Vec::new();
    visit(entries, 0, &mut lines);
    lines
}

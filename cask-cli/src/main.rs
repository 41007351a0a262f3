use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memmap2::Mmap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use uuid::Uuid;

use cask_core::config::Config;
use cask_core::identity::Subject;
use cask_core::service::CaskService;
use cask_core::CaskError;

#[derive(Parser)]
#[command(name = "cask", version, about = "Deduplicating chunk store")]
struct Cli {
    /// Store root (objects, metadata, scratch downloads)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// TOML config file; defaults to <data-dir>/cask.toml when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the configured chunk size (bytes)
    #[arg(long, global = true)]
    chunk_size: Option<usize>,
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,
    /// Authenticated subject id
    #[arg(long, global = true, env = "CASK_USER")]
    user: Option<String>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Chunk, deduplicate and store a file
    Upload {
        path: PathBuf,
        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// List your files
    List,
    /// Reassemble a file and copy it to --output
    Download {
        file_id: String,
        #[arg(long)]
        output: PathBuf,
        /// Owner of a file shared with you
        #[arg(long)]
        owner: Option<String>,
    },
    /// Grant another user read access to one of your files
    Share { file_id: String, target: String },
    /// Print a file's manifest as JSON
    Inspect { file_id: String },
    /// Storage totals and dedup savings across all users (admins only)
    Usage,
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<CaskError>() {
                Some(ce) => eprintln!("error[{}]: {}", ce.kind(), ce),
                None => eprintln!("error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut cfg = Config::discover(cli.config.as_deref(), cli.data_dir.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        cfg.data_dir = dir.clone();
    }
    if let Some(cs) = cli.chunk_size {
        cfg.chunk_size = cs;
    }
    cfg.validate()?;
    tracing::debug!(?cfg, "effective config");
    Ok(cfg)
}

fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli)?;
    if let Cmd::Config = cli.cmd {
        print!("{}", cfg.to_toml_string()?);
        return Ok(());
    }
    let svc = CaskService::open_dir(cfg)?;
    let subject = Subject::from_claim(cli.user.as_deref())?;

    match cli.cmd {
        Cmd::Upload { path, name } => upload(&svc, &subject, &path, name)?,
        Cmd::List => {
            for m in svc.list(&subject)? {
                println!(
                    "{}  {:>12}  {:>4} chunks  {}  {}",
                    m.file_id,
                    m.original_size,
                    m.chunk_ids.len(),
                    m.created_utc,
                    m.file_name
                );
            }
        }
        Cmd::Download { file_id, output, owner } => {
            let file_id = parse_file_id(&file_id)?;
            let handle = match owner {
                Some(o) => svc.download_shared(&subject, &o, &file_id)?,
                None => svc.download(&subject, &file_id)?,
            };
            let mut src = handle.open()?;
            let mut dst =
                File::create(&output).with_context(|| format!("create {}", output.display()))?;
            let n = std::io::copy(&mut src, &mut dst)?;
            drop(src);
            handle.discard()?;
            println!("OK {} bytes -> {}", n, output.display());
        }
        Cmd::Share { file_id, target } => {
            let file_id = parse_file_id(&file_id)?;
            if svc.share(&subject, &file_id, &target)? {
                println!("OK shared {} with {}", file_id, target);
            } else {
                println!("OK {} already shared with {}", file_id, target);
            }
        }
        Cmd::Inspect { file_id } => {
            let m = svc.manifest(&subject, &parse_file_id(&file_id)?)?;
            println!("{}", serde_json::to_string_pretty(&m)?);
        }
        Cmd::Usage => println!("{}", serde_json::to_string_pretty(&svc.usage(&subject)?)?),
        Cmd::Config => unreachable!("handled above"),
    }
    Ok(())
}

fn upload(svc: &CaskService, subject: &Subject, path: &Path, name: Option<String>) -> Result<()> {
    let name = match name {
        Some(n) => n,
        None => path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .with_context(|| format!("no file name in {}", path.display()))?,
    };
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = fs::metadata(path)?.len();
    // Zero-length files cannot be mapped.
    let report = if len == 0 {
        svc.upload(subject, &name, &[])?
    } else {
        let map = unsafe { Mmap::map(&f) }.with_context(|| format!("mmap {}", path.display()))?;
        svc.upload(subject, &name, &map[..])?
    };
    println!("{}", report.file_id);
    Ok(())
}

fn parse_file_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s.trim())
        .map_err(|_| CaskError::InvalidInput(format!("bad file id {s:?}")).into())
}

//! kvexpress CLI
//!
//! - `out`:    fetch `<prefix>/<key>/{data,checksum}` and apply it to a file
//! - `lock`:   freeze a file so `out` leaves it alone
//! - `unlock`: lift that freeze
//! - `status`: show lock, checksum and snapshot state for a file
//!
//! Expected outcomes (unchanged, locked, bad checksum, too short) exit 0.
//! Environment failures exit non-zero.

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use kvexpress_core::config::{DEFAULT_MIN_LENGTH, DEFAULT_MODE};
use kvexpress_core::source::DEFAULT_PREFIX;
use kvexpress_core::{
    ApplyConfig, ApplyOutcome, AtomicFileWriter, ChownPolicy, HookStatus, KeyPaths, KvFetch,
    LockGuard, LockRequest, OwnerResolver, SafeApplyEngine, TargetSpec,
};

mod kv;
mod settings;

use settings::FileConfig;

#[derive(Parser)]
#[command(name = "kvexpress")]
#[command(
    author,
    version,
    about = "kvexpress: apply files from a key/value store, safely"
)]
struct Cli {
    /// JSON config file with defaults for `out`/`lock` flags.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (e.g. `debug`, `kvexpress_core=debug`). `RUST_LOG` wins.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a file based on key data.
    Out(OutArgs),

    /// Lock a file so `out` will not write to it.
    Lock {
        /// File to lock (absolute path).
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Why it is locked; written into the lock marker.
        #[arg(short, long)]
        reason: String,
        /// Permissions for the lock marker (octal).
        #[arg(short = 'c', long)]
        chmod: Option<String>,
        /// Owner of the lock marker.
        #[arg(long)]
        owner: Option<String>,
    },

    /// Unlock a file so `out` can write to it again.
    Unlock {
        /// File to unlock (absolute path).
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },

    /// Show lock, checksum and snapshot state of a file.
    Status {
        /// File to inspect (absolute path).
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
}

#[derive(Args)]
struct OutArgs {
    /// Key to pull data from (under `--prefix`).
    #[arg(short, long)]
    key: String,
    /// Where to write the data (absolute path).
    #[arg(short = 'f', long = "file")]
    file: PathBuf,
    /// Permissions for the file (octal, default 0640).
    #[arg(short = 'c', long)]
    chmod: Option<String>,
    /// Minimum content length in bytes (default 10).
    #[arg(short = 'l', long = "length")]
    min_length: Option<usize>,
    /// Command to run after the file is written.
    #[arg(short = 'e', long = "exec")]
    post_exec: Option<String>,
    /// Owner of the file (default: the user running kvexpress).
    #[arg(long)]
    owner: Option<String>,
    /// Key prefix (default `kvexpress`).
    #[arg(long)]
    prefix: Option<String>,
    /// Consul server `host:port` (default `localhost:8500`).
    #[arg(short = 's', long)]
    server: Option<String>,
    /// Consul ACL token.
    #[arg(short = 't', long)]
    token: Option<String>,
    /// Read keys from this directory instead of Consul.
    #[arg(long)]
    kv_dir: Option<PathBuf>,
    /// What to do if ownership cannot be applied.
    #[arg(long, value_enum)]
    chown: Option<ChownArg>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ChownArg {
    Required,
    BestEffort,
}

impl From<ChownArg> for ChownPolicy {
    fn from(arg: ChownArg) -> Self {
        match arg {
            ChownArg::Required => ChownPolicy::Required,
            ChownArg::BestEffort => ChownPolicy::BestEffort,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let file_config = FileConfig::load_optional(cli.config.as_deref())?;

    // A failure is printed once, by the `Err` returned from `main`.
    match cli.command {
        Commands::Out(args) => cmd_out(args, &file_config),
        Commands::Lock {
            file,
            reason,
            chmod,
            owner,
        } => cmd_lock(&file, reason, chmod, owner, &file_config),
        Commands::Unlock { file } => cmd_unlock(&file),
        Commands::Status { file } => cmd_status(&file),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(unix)]
fn system_owners() -> Arc<dyn OwnerResolver> {
    Arc::new(kvexpress_core::SystemOwners)
}

#[cfg(not(unix))]
fn system_owners() -> Arc<dyn OwnerResolver> {
    Arc::new(kvexpress_core::FixedOwners(kvexpress_core::OwnerIds { uid: 0, gid: 0 }))
}

fn resolve_mode(flag: Option<String>, file: Option<&String>) -> Result<u32> {
    match flag.as_ref().or(file) {
        Some(s) => settings::parse_mode(s),
        None => Ok(DEFAULT_MODE),
    }
}

fn cmd_out(args: OutArgs, file_config: &FileConfig) -> Result<()> {
    if args.key.trim_matches('/').is_empty() {
        return Err(anyhow!("need a key location in -k"));
    }

    let mode = resolve_mode(args.chmod, file_config.chmod.as_ref())?;
    let owner = args.owner.or_else(|| file_config.owner.clone());
    let target = TargetSpec::new(&args.file, mode, owner)?;

    let chown_policy = match (args.chown, file_config.chown.as_deref()) {
        (Some(arg), _) => arg.into(),
        (None, Some(s)) => settings::parse_chown_policy(s)?,
        (None, None) => ChownPolicy::default(),
    };
    let config = ApplyConfig {
        min_length: args
            .min_length
            .or(file_config.min_length)
            .unwrap_or(DEFAULT_MIN_LENGTH),
        chown_policy,
        post_exec: args
            .post_exec
            .or_else(|| file_config.post_exec.clone())
            .filter(|c| !c.trim().is_empty()),
    };

    let prefix = args
        .prefix
        .or_else(|| file_config.prefix.clone())
        .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
    let paths = KeyPaths::new(&prefix, &args.key);

    let store: Box<dyn KvFetch> = match args.kv_dir.or_else(|| file_config.kv_dir.clone()) {
        Some(dir) => {
            tracing::debug!(kv_dir = %dir.display(), "reading keys from directory");
            Box::new(kv::DirKv::new(dir))
        }
        None => {
            let server = args
                .server
                .or_else(|| file_config.consul_server.clone())
                .unwrap_or_else(|| kv::DEFAULT_CONSUL_SERVER.to_string());
            let token = args.token.or_else(|| file_config.token.clone());
            tracing::debug!(server = %server, "reading keys from Consul");
            Box::new(kv::ConsulKv::new(&server, token)?)
        }
    };

    let engine = SafeApplyEngine::new(config, system_owners());
    let outcome = engine.fetch_and_apply(store.as_ref(), &paths, &target)?;
    report_outcome(&outcome, &target);
    Ok(())
}

fn report_outcome(outcome: &ApplyOutcome, target: &TargetSpec) {
    let path = target.path().display();
    match outcome {
        ApplyOutcome::Committed { hook } => {
            eprintln!("{} wrote {} ({:o})", "ok".green().bold(), path, target.mode);
            match hook {
                Some(HookStatus::Succeeded) | None => {}
                Some(HookStatus::Failed { code }) => eprintln!(
                    "{} post-exec command exited with {}",
                    "warn:".yellow().bold(),
                    code.map(|c| c.to_string())
                        .unwrap_or_else(|| "a signal".to_string())
                ),
                Some(HookStatus::SpawnFailed) => eprintln!(
                    "{} post-exec command could not be started",
                    "warn:".yellow().bold()
                ),
            }
        }
        ApplyOutcome::NoChange => {
            eprintln!("{} {} has the same checksum; not writing", "ok".green().bold(), path);
        }
        ApplyOutcome::RejectedTooShort { length, min_length } => eprintln!(
            "{} not writing {}: data is {} bytes, minimum is {}",
            "skip:".yellow().bold(),
            path,
            length,
            min_length
        ),
        ApplyOutcome::RejectedChecksumMismatch { expected, actual } => eprintln!(
            "{} not writing {}: checksum mismatch (expected {}, got {})",
            "skip:".yellow().bold(),
            path,
            if expected.is_empty() { "(none)" } else { expected.as_str() },
            actual
        ),
        ApplyOutcome::RejectedLocked => eprintln!(
            "{} not writing {}: locked (see {}.locked)",
            "skip:".yellow().bold(),
            path,
            path
        ),
    }
}

fn cmd_lock(
    file: &Path,
    reason: String,
    chmod: Option<String>,
    owner: Option<String>,
    file_config: &FileConfig,
) -> Result<()> {
    let mode = resolve_mode(chmod, file_config.chmod.as_ref())?;
    let owner = owner.or_else(|| file_config.owner.clone());
    let target = TargetSpec::new(file, mode, owner)?;
    let chown_policy = match file_config.chown.as_deref() {
        Some(s) => settings::parse_chown_policy(s)?,
        None => ChownPolicy::default(),
    };

    let guard = LockGuard::new(AtomicFileWriter::new(system_owners(), chown_policy));
    if guard.lock(&target, &LockRequest { reason })? {
        eprintln!("{} locked {}", "ok".green().bold(), file.display());
    } else {
        eprintln!("{} {} was already locked", "ok".green().bold(), file.display());
    }
    Ok(())
}

fn cmd_unlock(file: &Path) -> Result<()> {
    let target = TargetSpec::new(file, DEFAULT_MODE, None)?;
    if LockGuard::unlock(target.path())? {
        eprintln!("{} unlocked {}", "ok".green().bold(), file.display());
    } else {
        eprintln!("{} {} was not locked", "ok".green().bold(), file.display());
    }
    Ok(())
}

fn cmd_status(file: &Path) -> Result<()> {
    let target = TargetSpec::new(file, DEFAULT_MODE, None)?;
    let status = kvexpress_core::status(target.path());

    let show = |c: &Option<String>| c.clone().unwrap_or_else(|| "(none)".to_string());
    println!("target:");
    println!("  path: {}", status.path.display());
    println!("  exists: {}", status.exists);
    println!("  locked: {}", status.locked);
    println!("  checksum: {}", show(&status.target_checksum));
    println!("snapshot:");
    println!("  checksum: {}", show(&status.snapshot_checksum));
    println!("  in_sync: {}", status.snapshot_in_sync());
    Ok(())
}

//! CLI entry point (§6): parses arguments, installs logging, opens the
//! native store, and runs one heuristic GC pass.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use nix_heuristic_gc::error::{ConfigError, GcError};
use nix_heuristic_gc::node::{ClassFilter, ClassFilters, Penalties};
use nix_heuristic_gc::orchestrate::{self, Config};
use nix_heuristic_gc::quantity::Quantity;
use nix_heuristic_gc::store::NativeStore;
use nix_heuristic_gc::weights::{
    FriendlyWeight, DEFAULT_DRV, DEFAULT_EXCEEDING_LIMIT, DEFAULT_INODES, DEFAULT_INVALID,
    DEFAULT_SIZE, DEFAULT_SUBSTITUTABLE,
};

/// A heuristic garbage collector for a content-addressed Nix store: given a
/// reclamation budget, selects which dead store paths to delete so as to
/// best preserve paths likely to be reused soon, while preferring to evict
/// paths that are cheap to recreate.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// How much to reclaim: a byte size (`100MiB`, `2G`, a bare integer) or
    /// an inode count (`12I`).
    limit: String,

    /// Exclude invalid (parseable but store-info-less) paths from eviction.
    #[arg(long, conflicts_with = "only_invalid")]
    no_invalid: bool,
    /// Only consider invalid paths for eviction.
    #[arg(long)]
    only_invalid: bool,

    /// Exclude derivations from eviction.
    #[arg(long, conflicts_with = "only_drvs")]
    no_drvs: bool,
    /// Only consider derivations for eviction.
    #[arg(long)]
    only_drvs: bool,

    /// Exclude substitutable paths from eviction.
    #[arg(long, conflicts_with = "only_substitutable")]
    no_substitutable: bool,
    /// Only consider substitutable paths for eviction.
    #[arg(long)]
    only_substitutable: bool,

    /// Propagate a removed referrer's atime to its direct dependencies.
    #[arg(long, overrides_with = "no_inherit_atime")]
    inherit_atime: bool,
    #[arg(long, overrides_with = "inherit_atime", hide = true)]
    no_inherit_atime: bool,

    /// Print the selection instead of deleting anything.
    #[arg(long, overrides_with = "no_dry_run")]
    dry_run: bool,
    #[arg(long, overrides_with = "dry_run", hide = true)]
    no_dry_run: bool,

    /// Worker threads for parallel scoring. 0 runs inline; unset is automatic.
    #[arg(long, short = 't')]
    threads: Option<i64>,

    #[arg(long, short = 'v', conflicts_with = "quiet")]
    verbose: bool,
    #[arg(long, short = 'q', conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> ExitCode {
    let raw_args: Vec<String> = std::env::args().collect();
    run(raw_args)
}

/// Split out from `main` for readability; `clap` derive can't easily express
/// the `--<flag>` / `--no-<flag>` / `--<flag>-weight N` grammar per penalty
/// with `#[command(flatten)]` structs sharing the same field names, so the
/// six penalty flags are parsed by hand from the raw argument list below,
/// alongside the rest via `Cli`.
fn run(raw_args: Vec<String>) -> ExitCode {
    let penalty_names = [
        ("invalid", DEFAULT_INVALID, true),
        ("drvs", DEFAULT_DRV, false),
        ("substitutable", DEFAULT_SUBSTITUTABLE, true),
        ("inodes", DEFAULT_INODES, false),
        ("size", DEFAULT_SIZE, false),
        ("exceeding-limit", DEFAULT_EXCEEDING_LIMIT, false),
    ];

    let mut remaining = Vec::with_capacity(raw_args.len());
    let mut friendly: std::collections::HashMap<&'static str, FriendlyWeight> = penalty_names
        .iter()
        .map(|&(name, _, default_on)| {
            (
                name,
                if default_on {
                    FriendlyWeight::new(5).unwrap()
                } else {
                    FriendlyWeight::DISABLED
                },
            )
        })
        .collect();

    let mut set_weight = |name: &'static str, raw: &str| -> Result<(), ExitCode> {
        let parsed: u8 = raw.parse().map_err(|_| {
            eprintln!("error: invalid weight {raw:?} for --penalize-{name}-weight");
            ExitCode::from(2)
        })?;
        let fw = FriendlyWeight::new(parsed).map_err(|e| {
            eprintln!("error: {e}");
            ExitCode::from(2)
        })?;
        friendly.insert(name, fw);
        Ok(())
    };

    let mut iter = raw_args.into_iter().peekable();
    while let Some(arg) = iter.next() {
        let mut matched = false;
        for &(name, _, _) in &penalty_names {
            let on_flag = format!("--penalize-{name}");
            let off_flag = format!("--no-penalize-{name}");
            let weight_flag = format!("--penalize-{name}-weight");
            let weight_prefix = format!("{weight_flag}=");

            if arg == on_flag {
                friendly.insert(name, FriendlyWeight::new(5).unwrap());
                matched = true;
            } else if arg == off_flag {
                friendly.insert(name, FriendlyWeight::DISABLED);
                matched = true;
            } else if let Some(value) = arg.strip_prefix(&weight_prefix) {
                if let Err(code) = set_weight(name, value) {
                    return code;
                }
                matched = true;
            } else if arg == weight_flag {
                let Some(value) = iter.next() else {
                    eprintln!("error: {weight_flag} requires a value");
                    return ExitCode::from(2);
                };
                if let Err(code) = set_weight(name, &value) {
                    return code;
                }
                matched = true;
            }
            if matched {
                break;
            }
        }
        if !matched {
            remaining.push(arg);
        }
    }

    let cli = Cli::parse_from(remaining);

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: a global tracing subscriber was already installed");
    }

    match build_config(&cli, &friendly) {
        Ok(config) => match open_store_and_run(config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(GcError::Config(e)) => {
                error!("{e}");
                ExitCode::from(2)
            }
            Err(GcError::Store(e)) => {
                error!("{e}");
                ExitCode::from(3)
            }
            Err(GcError::Internal(e)) => {
                error!("{e}");
                ExitCode::from(70)
            }
        },
        Err(e) => {
            error!("{e}");
            ExitCode::from(2)
        }
    }
}

fn class_filter(no: bool, only: bool) -> ClassFilter {
    if only {
        ClassFilter::Only
    } else if no {
        ClassFilter::Exclude
    } else {
        ClassFilter::Include
    }
}

fn build_config(
    cli: &Cli,
    friendly: &std::collections::HashMap<&'static str, FriendlyWeight>,
) -> Result<Config, ConfigError> {
    let limit: Quantity = cli.limit.parse()?;

    let threads = match cli.threads {
        None => None,
        Some(n) if n >= 0 => Some(n as usize),
        Some(n) => return Err(ConfigError::NegativeThreads(n)),
    };

    let penalties = Penalties {
        invalid: friendly["invalid"].to_internal(DEFAULT_INVALID),
        drv: friendly["drvs"].to_internal(DEFAULT_DRV),
        substitutable: friendly["substitutable"].to_internal(DEFAULT_SUBSTITUTABLE),
        inodes: friendly["inodes"].to_internal(DEFAULT_INODES),
        size: friendly["size"].to_internal(DEFAULT_SIZE),
    };
    let w_exceeding_limit = friendly["exceeding-limit"].to_internal(DEFAULT_EXCEEDING_LIMIT);

    let filters = ClassFilters {
        invalid: class_filter(cli.no_invalid, cli.only_invalid),
        drvs: class_filter(cli.no_drvs, cli.only_drvs),
        substitutable: class_filter(cli.no_substitutable, cli.only_substitutable),
    };

    let config = Config {
        limit,
        threads,
        dry_run: cli.dry_run,
        inherit_atime: cli.inherit_atime,
        penalties,
        w_exceeding_limit,
        filters,
    };
    config.validate()?;
    Ok(config)
}

fn open_store_and_run(config: Config) -> Result<(), GcError> {
    let store = Arc::new(NativeStore::open()?);
    let summary = orchestrate::run(store, &config)?;

    if !summary.very_invalid_paths.is_empty() {
        tracing::warn!(
            count = summary.very_invalid_paths.len(),
            "some dead-set entries could not be parsed as store paths"
        );
    }

    Ok(())
}

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pxd_audit::VerifyResult;
use pxd_config::{report_unused_keys, ConfigMode, UnusedKeyPolicy};
use pxd_runtime::{service_from_desk, Clock, ManualClock};
use uuid::Uuid;

mod commands;

use commands::{load_config, parse_config_mode, simulate};

#[derive(Parser)]
#[command(name = "pxd")]
#[command(about = "P2P exchange desk CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> local overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Validate config for a mode and report keys that mode never reads
    ConfigCheck {
        /// DAEMON | SIMULATE
        #[arg(long, default_value = "DAEMON")]
        mode: String,

        /// Treat unused keys as an error
        #[arg(long, default_value_t = false)]
        fail_unused: bool,

        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },

    /// Run a scripted sequence of desk operations on a manual clock
    Simulate {
        /// YAML script
        #[arg(long)]
        script: String,

        /// Layered config paths in merge order (defaults when omitted)
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Write the run's audit log here (overrides audit.path)
        #[arg(long)]
        audit: Option<String>,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chain of a JSONL audit log
    Verify {
        #[arg(long)]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let loaded = pxd_config::load_layered_yaml(paths.as_slice())?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::ConfigCheck {
            mode,
            fail_unused,
            paths,
        } => {
            let mode = parse_config_mode(&mode)?;
            let loaded = load_config(&paths)?;
            let desk = loaded.desk()?;
            let policy = if fail_unused {
                UnusedKeyPolicy::Fail
            } else {
                UnusedKeyPolicy::Warn
            };
            let report = report_unused_keys(mode, &loaded.config_json, policy)?;

            println!("config_hash={}", loaded.config_hash);
            println!("mode={}", mode.as_str());
            println!("commission_bps={}", desk.ledger.commission_bps);
            println!("trade_timeout_secs={}", desk.ledger.trade_timeout_secs);
            println!("cancel_limit={}", desk.ledger.cancel_limit);
            println!("suspension_secs={}", desk.ledger.suspension_secs);
            println!("unused_keys={}", report.unused_leaf_pointers.len());
            for p in &report.unused_leaf_pointers {
                println!("unused={p}");
            }
        }

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { path } => match pxd_audit::verify_hash_chain(&path)? {
                VerifyResult::Valid { lines } => {
                    println!("audit_chain=valid lines={lines}");
                }
                VerifyResult::Broken { line, reason } => {
                    println!("audit_chain=broken line={line}");
                    bail!("AUDIT_CHAIN_BROKEN at line {line}: {reason}");
                }
            },
        },

        Commands::Simulate {
            script,
            config_paths,
            audit,
        } => {
            let raw = std::fs::read_to_string(&script)
                .with_context(|| format!("read script failed: {script}"))?;
            let script = simulate::parse_script(&raw)?;

            let loaded = load_config(&config_paths)?;
            let report =
                report_unused_keys(ConfigMode::Simulate, &loaded.config_json, UnusedKeyPolicy::Warn)?;
            if !report.is_clean() {
                tracing::warn!(
                    keys = ?report.unused_leaf_pointers,
                    "config keys not read by simulate"
                );
            }
            let mut desk = loaded.desk()?;
            if audit.is_some() {
                desk.audit.path = audit;
            }

            let clock = Arc::new(ManualClock::new(script.start));
            let service = service_from_desk(&desk, clock.clone() as Arc<dyn Clock>)?
                .with_stream_id(Uuid::new_v5(
                    &Uuid::NAMESPACE_OID,
                    loaded.config_hash.as_bytes(),
                ));

            println!("config_hash={}", loaded.config_hash);
            println!("start={}", script.start.to_rfc3339());
            let mut out = std::io::stdout().lock();
            simulate::run_script(&script, &service, &clock, &mut out).await?;
            out.flush()?;
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

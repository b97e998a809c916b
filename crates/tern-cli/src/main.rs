mod logging;
mod output;
mod schema;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tern_config::{AppConfig, ConfigLoader};
use tern_db::connection;
use tern_db::lock::new_holder_id;
use tern_db::{DownTarget, MigrationEvent, MigrationRunner, RunnerOptions, UpTarget};
use tracing::debug;

#[derive(Parser)]
#[command(name = "tern", version, about = "Versioned, reversible schema migrations")]
struct Cli {
    /// Config file (YAML or TOML). Defaults to ~/.tern/config.yml when present.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Database file, overriding config and TERN_DATABASE.
    #[arg(long, global = true, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Print machine-readable JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations in version order
    Up {
        /// Print the statements that would run, change nothing
        #[arg(long)]
        dry_run: bool,

        /// Stop after this version
        #[arg(long, value_name = "VERSION")]
        to: Option<u32>,
    },
    /// Revert applied migrations, newest first
    Down {
        /// Number of migrations to revert
        #[arg(long, default_value_t = 1, conflicts_with = "to")]
        steps: usize,

        /// Revert everything above this version (0 reverts all)
        #[arg(long, value_name = "VERSION")]
        to: Option<u32>,

        /// Print the statements that would run, change nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Show applied and pending migrations
    Status,
    /// Clear a migration lock left behind by a crashed run
    Unlock {
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
}

fn main() -> ExitCode {
    // .env is optional
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            if err
                .downcast_ref::<tern_common::Error>()
                .is_some_and(tern_common::Error::needs_intervention)
            {
                eprintln!(
                    "the database may be partially migrated; inspect it with `tern status` before running again"
                );
            }
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<tern_common::Error>()
        .map(tern_common::Error::exit_code)
        .unwrap_or(1)
}

fn run(cli: Cli) -> Result<()> {
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(path) = cli.database {
        config.database.path = path;
    }
    logging::init(&config.logging);

    let registry = schema::registry()?;
    let conn = connection::open(
        &config.database.path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )?;
    debug!(
        "opened {} with {} registered migrations",
        config.database.path.display(),
        registry.len()
    );

    let json = cli.json;
    let runner = MigrationRunner::new(&registry)
        .with_options(runner_options(&config))
        .with_observer(move |event: &MigrationEvent| {
            if json {
                return;
            }
            if let Some(line) = output::render_event(event) {
                println!("{line}");
            }
        });

    match cli.command {
        Commands::Up { dry_run: true, to } => {
            let plan = runner.planner().plan_up(&conn, up_target(to))?;
            emit(json, &plan, || output::render_plan(&plan))
        }
        Commands::Up { dry_run: false, to } => {
            let report = runner.up(&conn, up_target(to))?;
            emit(json, &report, || output::render_report(&report))
        }
        Commands::Down {
            steps,
            to,
            dry_run: true,
        } => {
            let plan = runner.planner().plan_down(&conn, down_target(steps, to))?;
            emit(json, &plan, || output::render_plan(&plan))
        }
        Commands::Down {
            steps,
            to,
            dry_run: false,
        } => {
            let report = runner.down(&conn, down_target(steps, to))?;
            emit(json, &report, || output::render_report(&report))
        }
        Commands::Status => {
            let report = runner.status(&conn)?;
            let lock = runner.lock_holder(&conn)?;
            let view = output::StatusView {
                database: &config.database.path,
                lock: lock.as_ref(),
                report: &report,
            };
            emit(json, &view, || {
                output::render_status(&report, lock.as_ref(), &config.database.path)
            })
        }
        Commands::Unlock { yes } => {
            let Some(held) = runner.lock_holder(&conn)? else {
                println!("No migration lock is held.");
                return Ok(());
            };
            if !yes && !confirm_unlock(&held.holder)? {
                println!("Lock left in place.");
                return Ok(());
            }
            if runner.force_unlock(&conn)? {
                println!("Cleared lock held by {}.", held.holder);
            } else {
                println!("Lock was released before it could be cleared.");
            }
            Ok(())
        }
    }
}

fn runner_options(config: &AppConfig) -> RunnerOptions {
    RunnerOptions {
        ledger_table: config.migrations.ledger_table.clone(),
        lock_table: config.migrations.lock_table.clone(),
        lock_ttl: config
            .migrations
            .lock_ttl_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds),
        holder: new_holder_id(),
    }
}

fn up_target(to: Option<u32>) -> UpTarget {
    to.map(UpTarget::To).unwrap_or_default()
}

fn down_target(steps: usize, to: Option<u32>) -> DownTarget {
    to.map(DownTarget::To).unwrap_or(DownTarget::Steps(steps))
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", human());
    }
    Ok(())
}

/// Ask before deleting someone else's lock. Without a terminal there is
/// nobody to ask, so `--yes` is required.
fn confirm_unlock(holder: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        bail!("refusing to clear the lock held by {holder} without --yes (not a terminal)");
    }
    dialoguer::Confirm::new()
        .with_prompt(format!(
            "Clear the migration lock held by {holder}? Only do this if that run is gone"
        ))
        .default(false)
        .interact()
        .context("confirmation cancelled")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_down_with_steps() {
        let cli = Cli::try_parse_from(["tern", "down", "--steps=2", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Down { steps, to, dry_run } => {
                assert_eq!(steps, 2);
                assert_eq!(to, None);
                assert!(dry_run);
            }
            _ => panic!("expected down"),
        }
    }

    #[test]
    fn down_steps_and_to_conflict() {
        assert!(Cli::try_parse_from(["tern", "down", "--steps", "2", "--to", "1"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["tern", "status", "--json", "--database", "/tmp/x.db"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/x.db")));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn targets_default_to_all_and_one_step() {
        assert_eq!(up_target(None), UpTarget::All);
        assert_eq!(up_target(Some(3)), UpTarget::To(3));
        assert_eq!(down_target(1, None), DownTarget::Steps(1));
        assert_eq!(down_target(1, Some(0)), DownTarget::To(0));
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        let lock = anyhow::Error::from(tern_common::Error::Lock("held".into()));
        assert_eq!(exit_code(&lock), 3);

        let wrapped = anyhow::Error::from(tern_common::Error::Config("bad".into()))
            .context("loading config");
        assert_eq!(exit_code(&wrapped), 2);

        assert_eq!(exit_code(&anyhow::anyhow!("plain")), 1);
    }

    #[test]
    fn runner_options_carry_config_tables_and_ttl() {
        let mut config = AppConfig::default();
        config.migrations.ledger_table = "history".into();
        config.migrations.lock_ttl_secs = Some(90);
        let options = runner_options(&config);
        assert_eq!(options.ledger_table, "history");
        assert_eq!(options.lock_table, "_schema_lock");
        assert_eq!(options.lock_ttl, Some(chrono::Duration::seconds(90)));
        assert!(options.holder.starts_with("pid-"));
    }
}

//! ringrelay: recipe runs and catalog promotion
//!
//! ## Usage
//! ```text
//! ringrelay [--config FILE] run [--json] [--dry-run|-n] [--fail-fast] [RECIPE_ID ...]
//! ringrelay [--config FILE] promote [--json]
//! ringrelay [--config FILE] pending
//! ringrelay [--config FILE] approve NAME VERSION RING ACTOR
//! ringrelay [--config FILE] history NAME [VERSION]
//! ringrelay [--config FILE] release NAME VERSION ACTOR
//! ringrelay [--config FILE] rollback NAME VERSION ACTOR REASON...
//! ringrelay [--config FILE] force-promote NAME VERSION RING ACTOR
//! ringrelay [--config FILE] update-trust RECIPE_ID
//! ```
//!
//! `run --dry-run` prints the resolved execution order and runs nothing.
//! `run --fail-fast` stops launching recipes after the first failure; the
//! rest are reported blocked as cancelled.
//!
//! ## Exit codes
//! - 0: everything succeeded
//! - 1: partial failure (a recipe, import, evaluation or requested action failed)
//! - 2: fatal (bad usage, configuration, resolution, or catalog store)
//!
//! ## Configuration
//! - `ringrelay.yaml` in the working directory, `--config`, or `RINGRELAY_CONFIG`
//! - `RINGRELAY__*` environment overrides, `__` separating sections
//! - `RINGRELAY_LOG`: tracing filter (default: info)

use std::collections::BTreeMap;
use std::process::ExitCode;

use tokio::sync::watch;
use tracing::{error, info, warn};

use ringrelay::config::Config;
use ringrelay::model::{PackageVersion, RecipeId};
use ringrelay::orchestration::{self, RunReport, EXIT_FATAL, EXIT_PARTIAL, EXIT_SUCCESS};
use ringrelay::promotion::PromotionError;
use ringrelay::utils::bootstrap::{init_tracing, parse_config_path};
use ringrelay::Runtime;

const USAGE: &str = "usage: ringrelay [--config FILE] \
<run|promote|pending|approve|history|release|rollback|force-promote|update-trust> [ARGS...]";

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let (config_path, args) = parse_config_path(std::env::args().skip(1).collect());
    let code = match dispatch(config_path.as_deref(), &args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "ringrelay failed");
            eprintln!("error: {e}");
            EXIT_FATAL
        }
    };
    ExitCode::from(code as u8)
}

async fn dispatch(config_path: Option<&str>, args: &[String]) -> Result<i32, BoxError> {
    let Some((command, rest)) = args.split_first() else {
        eprintln!("{USAGE}");
        return Ok(EXIT_FATAL);
    };

    let config = Config::load(config_path)?;
    let runtime = Runtime::new(config).await?;

    match (command.as_str(), rest) {
        ("run", rest) => {
            let (json, rest) = take_flag(rest, &["--json"]);
            let (dry_run, rest) = take_flag(&rest, &["--dry-run", "-n"]);
            let (fail_fast, ids) = take_flag(&rest, &["--fail-fast"]);
            if dry_run {
                return dry_run_plan(&runtime, &ids);
            }
            run(&runtime, &ids, json, fail_fast).await
        }
        ("promote", rest) => {
            let (json, _) = take_flag(rest, &["--json"]);
            let orchestrator = runtime.orchestrator().await?;
            let report = orchestrator.promote_only().await;
            print_report(&report, json)?;
            Ok(report.exit_code())
        }
        ("pending", []) => pending(&runtime).await,
        ("approve", [name, version, ring, actor]) => {
            let result = runtime.query().approve(name, version, ring, actor).await;
            action("approved", result)
        }
        ("history", [name]) => {
            let versions = runtime.query().versions(name).await?;
            println!("{}", serde_yaml::to_string(&versions)?);
            Ok(EXIT_SUCCESS)
        }
        ("history", [name, version]) => match runtime.query().history(name, version).await {
            Ok(history) => {
                println!("{}", serde_yaml::to_string(&history)?);
                Ok(EXIT_SUCCESS)
            }
            Err(e) => action_failed(e),
        },
        ("release", [name, version, actor]) => {
            let result = runtime.query().release(name, version, actor).await;
            action("released", result)
        }
        ("rollback", [name, version, actor, reason @ ..]) if !reason.is_empty() => {
            let result = runtime
                .query()
                .rollback(name, version, actor, &reason.join(" "))
                .await;
            action("rolled back", result)
        }
        ("force-promote", [name, version, ring, actor]) => {
            let result = runtime.query().force_promote(name, version, ring, actor).await;
            action("promoted", result)
        }
        ("update-trust", [id]) => {
            let recipes = runtime.recipes()?;
            let trust = runtime.update_trust(&RecipeId::from(id.as_str()), &recipes)?;
            let mut doc = BTreeMap::new();
            doc.insert("TrustInfo", trust);
            print!("{}", serde_yaml::to_string(&doc)?);
            Ok(EXIT_SUCCESS)
        }
        _ => {
            eprintln!("{USAGE}");
            Ok(EXIT_FATAL)
        }
    }
}

/// Whether any of `names` is present, and the arguments without them.
fn take_flag(args: &[String], names: &[&str]) -> (bool, Vec<String>) {
    let is_flag = |a: &String| names.contains(&a.as_str());
    let found = args.iter().any(is_flag);
    let rest = args.iter().filter(|a| !is_flag(a)).cloned().collect();
    (found, rest)
}

fn dry_run_plan(runtime: &Runtime, ids: &[String]) -> Result<i32, BoxError> {
    let recipes = runtime.recipes()?;
    let requested = runtime.requested(ids, &recipes)?;
    let plan = orchestration::plan(&requested, &recipes)?;
    println!("Would run {} recipes:", plan.len());
    for id in &plan.order {
        println!("  - {id}");
    }
    Ok(EXIT_SUCCESS)
}

async fn run(runtime: &Runtime, ids: &[String], json: bool, fail_fast: bool) -> Result<i32, BoxError> {
    let recipes = runtime.recipes()?;
    let requested = runtime.requested(ids, &recipes)?;
    if requested.is_empty() {
        warn!("No recipes to run");
    }
    let mut orchestrator = runtime.orchestrator().await?;
    if fail_fast {
        orchestrator = orchestrator.with_fail_fast();
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted; finishing running recipes");
            let _ = cancel_tx.send(true);
        }
    });

    let report = orchestrator.run(&requested, &recipes, cancel_rx).await?;
    print_report(&report, json)?;
    Ok(report.exit_code())
}

fn print_report(report: &RunReport, json: bool) -> Result<(), BoxError> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

async fn pending(runtime: &Runtime) -> Result<i32, BoxError> {
    let entries = match runtime.query().list_pending().await {
        Ok(entries) => entries,
        Err(PromotionError::Store(e)) => return Err(e.into()),
        Err(e) => return action_failed(e),
    };
    let mut code = EXIT_SUCCESS;
    for entry in entries {
        match (&entry.outlook, &entry.error) {
            (Some(outlook), _) => println!(
                "{:<40} {:<12} -> {:<12} {:?}",
                entry.key.to_string(),
                outlook.current_ring.as_deref().unwrap_or("-"),
                outlook.target_ring.as_deref().unwrap_or("-"),
                outlook.decision
            ),
            (None, error) => {
                code = EXIT_PARTIAL;
                println!(
                    "{:<40} error: {}",
                    entry.key.to_string(),
                    error.as_deref().unwrap_or("unknown")
                );
            }
        }
    }
    Ok(code)
}

fn action(verb: &str, result: Result<PackageVersion, PromotionError>) -> Result<i32, BoxError> {
    match result {
        Ok(version) => {
            println!("{} {verb} (sequence {})", version.key, version.sequence());
            Ok(EXIT_SUCCESS)
        }
        Err(PromotionError::Store(e)) => Err(e.into()),
        Err(e) => action_failed(e),
    }
}

fn action_failed(err: PromotionError) -> Result<i32, BoxError> {
    eprintln!("error: {err}");
    Ok(EXIT_PARTIAL)
}

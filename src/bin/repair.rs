//! Repairs the clinic database in place: backup first, then integrity
//! fixes. `repair --check` runs the read-only diagnostic pass instead.
//!
//! An explicit database path may be given as the first non-flag argument;
//! otherwise the standard candidate locations are searched.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use dentara::config;
use dentara::maintenance;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    if let Err(error) = run() {
        tracing::error!(%error, "repair failed");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let check_only = args.iter().any(|a| a == "--check");
    let db_path: PathBuf = match args.iter().find(|a| !a.starts_with("--")) {
        Some(path) => path.into(),
        None => maintenance::locate_database()?,
    };
    tracing::info!(path = %db_path.display(), version = config::APP_VERSION, "clinic database located");

    if check_only {
        let conn = rusqlite::Connection::open(&db_path)?;
        let report = maintenance::diagnose(&conn)?;
        if report.is_clean() {
            tracing::info!("no issues found");
        } else {
            tracing::warn!(
                orphaned = report.orphaned,
                invalid_teeth = report.invalid_tooth,
                non_dense_teeth = report.non_dense_teeth,
                missing_indexes = report.missing_indexes.len(),
                "issues found; run without --check to repair"
            );
        }
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let backup = maintenance::backup_database(&db_path)?;
    tracing::info!(backup = %backup.display(), "restore from this file if anything looks wrong");

    let mut conn = rusqlite::Connection::open(&db_path)?;
    let report = maintenance::run_repair(&mut conn)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

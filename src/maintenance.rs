//! One-shot repair and diagnostics for the clinic database file.
//!
//! Runs outside the live application, directly against the SQLite store:
//! locate the file, copy it to a timestamped backup, delete corrupt rows
//! (treatments without a patient, tooth numbers outside every dentition
//! range), rebuild dense per-tooth priorities, recreate the required
//! indexes, and compact storage. Every step is safe to re-run.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::config;
use crate::dentition;

/// Indexes the treatment queries depend on.
const REQUIRED_INDEXES: [(&str, &str); 5] = [
    (
        "idx_tooth_treatments_patient",
        "CREATE INDEX IF NOT EXISTS idx_tooth_treatments_patient ON tooth_treatments(patient_id)",
    ),
    (
        "idx_tooth_treatments_tooth_number",
        "CREATE INDEX IF NOT EXISTS idx_tooth_treatments_tooth_number ON tooth_treatments(tooth_number)",
    ),
    (
        "idx_tooth_treatments_patient_tooth",
        "CREATE INDEX IF NOT EXISTS idx_tooth_treatments_patient_tooth ON tooth_treatments(patient_id, tooth_number)",
    ),
    (
        "idx_tooth_treatments_status",
        "CREATE INDEX IF NOT EXISTS idx_tooth_treatments_status ON tooth_treatments(treatment_status)",
    ),
    (
        "idx_tooth_treatments_priority",
        "CREATE INDEX IF NOT EXISTS idx_tooth_treatments_priority ON tooth_treatments(priority)",
    ),
];

/// Errors from maintenance operations.
#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database not found; searched {0:?}")]
    DatabaseNotFound(Vec<PathBuf>),

    #[error("backup failed: {0}")]
    Backup(#[from] std::io::Error),
}

/// Counts of what a repair pass changed.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RepairReport {
    pub orphaned_deleted: usize,
    pub invalid_tooth_deleted: usize,
    pub teeth_renumbered: usize,
    pub indexes_created: usize,
}

/// Issue counts from a read-only diagnostic pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DiagnosisReport {
    pub orphaned: usize,
    pub invalid_tooth: usize,
    pub non_dense_teeth: usize,
    pub missing_indexes: Vec<String>,
}

impl DiagnosisReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned == 0
            && self.invalid_tooth == 0
            && self.non_dense_teeth == 0
            && self.missing_indexes.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════
// Locate and backup
// ═══════════════════════════════════════════════════════════

/// Find the database file by trying each candidate location in order.
pub fn locate_database() -> Result<PathBuf, MaintenanceError> {
    let candidates = config::database_candidates();
    candidates
        .iter()
        .find(|p| p.exists())
        .cloned()
        .ok_or(MaintenanceError::DatabaseNotFound(candidates))
}

/// Copy the database aside before mutating it. Returns the backup path.
pub fn backup_database(db_path: &Path) -> Result<PathBuf, MaintenanceError> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let backup = PathBuf::from(format!("{}.backup.{stamp}", db_path.display()));
    std::fs::copy(db_path, &backup)?;
    tracing::info!(backup = %backup.display(), "database backed up");
    Ok(backup)
}

// ═══════════════════════════════════════════════════════════
// Repair
// ═══════════════════════════════════════════════════════════

/// Run the full corrective pass. The caller is responsible for taking a
/// backup first; every step after this one mutates in place.
pub fn run_repair(conn: &mut Connection) -> Result<RepairReport, MaintenanceError> {
    let report = RepairReport {
        orphaned_deleted: delete_orphaned_treatments(conn)?,
        invalid_tooth_deleted: delete_invalid_tooth_numbers(conn)?,
        teeth_renumbered: rebuild_priorities(conn)?,
        indexes_created: ensure_indexes(conn)?,
    };
    compact(conn)?;
    tracing::info!(
        orphaned = report.orphaned_deleted,
        invalid_teeth = report.invalid_tooth_deleted,
        teeth_renumbered = report.teeth_renumbered,
        indexes = report.indexes_created,
        "repair pass complete"
    );
    Ok(report)
}

/// Read-only integrity check; counts what a repair pass would change.
pub fn diagnose(conn: &Connection) -> Result<DiagnosisReport, MaintenanceError> {
    let orphaned: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tooth_treatments
         WHERE patient_id NOT IN (SELECT id FROM patients)",
        [],
        |row| row.get(0),
    )?;

    let invalid_tooth: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM tooth_treatments WHERE NOT ({})",
            valid_tooth_predicate()
        ),
        [],
        |row| row.get(0),
    )?;

    // Dense means priorities 1..n with no gaps or duplicates per tooth.
    let non_dense_teeth: i64 = conn.query_row(
        "SELECT COUNT(*) FROM (
             SELECT patient_id, tooth_number FROM tooth_treatments
             GROUP BY patient_id, tooth_number
             HAVING MIN(priority) <> 1
                 OR MAX(priority) <> COUNT(*)
                 OR COUNT(DISTINCT priority) <> COUNT(*)
         )",
        [],
        |row| row.get(0),
    )?;

    let existing = existing_index_names(conn)?;
    let missing_indexes = REQUIRED_INDEXES
        .iter()
        .map(|(name, _)| (*name).to_string())
        .filter(|name| !existing.contains(name))
        .collect();

    Ok(DiagnosisReport {
        orphaned: orphaned as usize,
        invalid_tooth: invalid_tooth as usize,
        non_dense_teeth: non_dense_teeth as usize,
        missing_indexes,
    })
}

/// Treatments whose patient no longer exists are corrupt and removed.
fn delete_orphaned_treatments(conn: &Connection) -> Result<usize, MaintenanceError> {
    let deleted = conn.execute(
        "DELETE FROM tooth_treatments
         WHERE patient_id NOT IN (SELECT id FROM patients)",
        [],
    )?;
    if deleted > 0 {
        tracing::warn!(deleted, "orphaned treatments removed");
    }
    Ok(deleted)
}

fn delete_invalid_tooth_numbers(conn: &Connection) -> Result<usize, MaintenanceError> {
    let deleted = conn.execute(
        &format!(
            "DELETE FROM tooth_treatments WHERE NOT ({})",
            valid_tooth_predicate()
        ),
        [],
    )?;
    if deleted > 0 {
        tracing::warn!(deleted, "treatments with invalid tooth numbers removed");
    }
    Ok(deleted)
}

/// Reassign priorities 1..n per (patient, tooth) group, ordered by creation
/// time. Returns the number of groups processed.
fn rebuild_priorities(conn: &mut Connection) -> Result<usize, MaintenanceError> {
    let groups: Vec<(String, i64)> = {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT patient_id, tooth_number FROM tooth_treatments
             ORDER BY patient_id, tooth_number",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>()?
    };

    let tx = conn.transaction()?;
    for (patient_id, tooth_number) in &groups {
        let ids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM tooth_treatments
                 WHERE patient_id = ?1 AND tooth_number = ?2
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![patient_id, tooth_number], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for (index, id) in ids.iter().enumerate() {
            tx.execute(
                "UPDATE tooth_treatments SET priority = ?1 WHERE id = ?2",
                params![index as i64 + 1, id],
            )?;
        }
    }
    tx.commit()?;
    Ok(groups.len())
}

fn ensure_indexes(conn: &Connection) -> Result<usize, MaintenanceError> {
    let existing = existing_index_names(conn)?;
    let mut created = 0;
    for (name, sql) in REQUIRED_INDEXES {
        if !existing.contains(&name.to_string()) {
            conn.execute(sql, [])?;
            tracing::info!(index = name, "index created");
            created += 1;
        }
    }
    Ok(created)
}

fn compact(conn: &Connection) -> Result<(), MaintenanceError> {
    conn.execute_batch("VACUUM; ANALYZE;")?;
    Ok(())
}

fn existing_index_names(conn: &Connection) -> Result<Vec<String>, MaintenanceError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'index' AND tbl_name = 'tooth_treatments'",
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn valid_tooth_predicate() -> String {
    dentition::PERMANENT_RANGES
        .iter()
        .chain(dentition::PRIMARY_RANGES.iter())
        .map(|&(lo, hi)| format!("(tooth_number BETWEEN {lo} AND {hi})"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

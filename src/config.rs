use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Dentara";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// File name of the clinic database, shared with the maintenance tooling.
pub const DB_FILE_NAME: &str = "dental-clinic.db";

/// Default log filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    format!("{}=info", env!("CARGO_PKG_NAME"))
}

/// Candidate database locations, in search order: working directory, the
/// `database/` subdirectory, the platform app-data directory, and a home
/// dot-directory.
pub fn database_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![
        PathBuf::from(DB_FILE_NAME),
        PathBuf::from("database").join(DB_FILE_NAME),
    ];
    if let Some(data) = dirs::data_dir() {
        candidates.push(data.join("dental-clinic").join(DB_FILE_NAME));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".dental-clinic").join(DB_FILE_NAME));
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_start_with_working_directory() {
        let candidates = database_candidates();
        assert_eq!(candidates[0], PathBuf::from(DB_FILE_NAME));
        assert_eq!(candidates[1], PathBuf::from("database").join(DB_FILE_NAME));
    }

    #[test]
    fn every_candidate_ends_with_db_file_name() {
        for candidate in database_candidates() {
            assert!(candidate.ends_with(DB_FILE_NAME));
        }
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
        assert_eq!(APP_NAME, "Dentara");
    }
}

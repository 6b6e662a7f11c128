use crate::infrastructure::config::{ensure_default_configs, load_configs, read_app_name};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};

const DATABASE_FILE: &str = "focusblock.sqlite";

#[derive(Debug)]
pub struct BootstrapResult {
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
    pub app_name: String,
}

/// Creates `config/`, `state/` and `logs/` under `workspace_root`, writes any
/// missing default config and migrates the timer database.
pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join(DATABASE_FILE);

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let _ = load_configs(&config_dir)?;
    initialize_database(&database_path)?;
    let app_name = read_app_name(&config_dir)?;

    Ok(BootstrapResult {
        config_dir,
        logs_dir,
        database_path,
        app_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_ROOT: AtomicUsize = AtomicUsize::new(0);

    struct TempRoot {
        path: PathBuf,
    }

    impl TempRoot {
        fn new() -> Self {
            let sequence = NEXT_TEMP_ROOT.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "focusblock-bootstrap-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            Self { path }
        }
    }

    impl Drop for TempRoot {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn bootstrap_creates_layout_and_is_repeatable() {
        let root = TempRoot::new();
        let first = bootstrap_workspace(&root.path).expect("first bootstrap");
        assert!(first.config_dir.join("timer.json").exists());
        assert!(first.logs_dir.is_dir());
        assert!(first.database_path.exists());
        assert_eq!(first.app_name, "FocusBlock");

        let second = bootstrap_workspace(&root.path).expect("second bootstrap");
        assert_eq!(second.database_path, first.database_path);
    }
}

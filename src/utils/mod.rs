use std::path::PathBuf;
use which::which;

use crate::errors::{AppError, Result, Stage};

/// Resolves the dump tool through `PATH` (or checks it directly when a path is given).
pub fn find_dump_executable(database: &str, command: &str) -> Result<PathBuf> {
    which(command).map_err(|e| {
        AppError::backup(
            database,
            Stage::Dump,
            format!(
                "{} executable not found ({}). Please ensure MySQL client tools are installed and in your PATH.",
                command, e
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_executable_is_a_dump_failure() {
        let err = find_dump_executable("orders", "definitely-not-a-real-mysqldump").unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Dump));
        assert!(err.to_string().contains("definitely-not-a-real-mysqldump"));
    }

    #[cfg(unix)]
    #[test]
    fn test_finds_shell_on_path() -> anyhow::Result<()> {
        let path = find_dump_executable("orders", "sh")?;
        assert!(path.is_absolute());
        Ok(())
    }
}

//! Resolved runtime paths.

use std::path::{Path, PathBuf};

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "persona.db";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside `data_dir`.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    /// Set via DATABASE_URL env var or config.
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        // Falls back gracefully: data dir -> home dir -> current dir
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("persona");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
        }
    }
}

impl Settings {
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }

    /// Point at a data directory or a database file directly.
    pub fn use_data_path(&mut self, path: &Path) {
        let is_db_file = path
            .extension()
            .is_some_and(|ext| ext == "db" || ext == "sqlite" || ext == "sqlite3");
        if is_db_file {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                self.database_filename = name.to_string();
            }
            self.data_dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."))
                .to_path_buf();
        } else {
            self.data_dir = path.to_path_buf();
        }
        self.database_url = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_url_from_data_dir() {
        let mut settings = Settings::with_data_dir(PathBuf::from("/tmp/persona-test"));
        settings.database_url = None;
        assert_eq!(
            settings.database_url(),
            "sqlite:/tmp/persona-test/persona.db"
        );
    }

    #[test]
    fn test_use_data_path_accepts_db_file() {
        let mut settings = Settings::with_data_dir(PathBuf::from("/tmp"));
        settings.use_data_path(Path::new("/var/lib/persona/jobs.sqlite"));
        assert_eq!(settings.data_dir, PathBuf::from("/var/lib/persona"));
        assert_eq!(settings.database_filename, "jobs.sqlite");

        settings.use_data_path(Path::new("/srv/persona"));
        assert_eq!(settings.data_dir, PathBuf::from("/srv/persona"));
        assert_eq!(
            settings.database_path(),
            PathBuf::from("/srv/persona/jobs.sqlite")
        );
    }
}

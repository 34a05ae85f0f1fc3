// ⚙️ Configuration
// Defaults <- driving_exams.toml <- EXAMS_* environment variables

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// File looked up in the working directory unless `EXAMS_CONFIG` points elsewhere
pub const DEFAULT_CONFIG_FILE: &str = "driving_exams.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite file holding exam_results and imported_periods
    pub db_path: PathBuf,

    /// Where the TUI drops exported PDFs
    pub export_dir: PathBuf,

    /// Row cap for filtered queries when the caller gives none
    pub default_limit: usize,

    /// Maximum data rows written to a table PDF
    pub table_pdf_rows: usize,

    /// Fallback tracing filter when RUST_LOG is unset
    pub log_filter: String,

    /// Log file used by the TUI (stderr would draw over the screen)
    pub log_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from("data/driving_exams.db"),
            export_dir: PathBuf::from("exports"),
            default_limit: crate::db::DEFAULT_LIMIT,
            table_pdf_rows: crate::report::DEFAULT_MAX_ROWS,
            log_filter: "info".to_string(),
            log_file: PathBuf::from("data/driving_exams.log"),
        }
    }
}

impl Config {
    /// Layered provider: defaults, optional TOML file, then environment
    pub fn figment() -> Figment {
        let file = std::env::var("EXAMS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("EXAMS_"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load `.env` (if any) and resolve the full configuration
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_figment(Self::figment())
    }

    fn validate(&self) -> Result<()> {
        if self.default_limit == 0 {
            anyhow::bail!("default_limit must be positive");
        }
        if self.table_pdf_rows == 0 {
            anyhow::bail!("table_pdf_rows must be positive");
        }
        Ok(())
    }
}

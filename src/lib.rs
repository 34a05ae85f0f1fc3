// Driving Exams Analyzer - Core Library
// Exposes the store, importer and report builders for the CLI, the TUI and tests

pub mod config;
pub mod db;
pub mod importer;
pub mod chart;
pub mod report;

#[cfg(feature = "tui")]
pub mod ui;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    ExamResult, ProvinceTotals, ImportedPeriod, ResultFilter, Store,
    setup_database, DEFAULT_LIMIT,
};
pub use importer::{
    Importer, ImportOutcome, ImportError, ColumnMap,
    period_from_filename, REQUIRED_COLUMNS,
};
pub use chart::{ChartData, ChartBar};
pub use report::{TableReport, export_table_pdf, export_chart_pdf, filter_caption};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

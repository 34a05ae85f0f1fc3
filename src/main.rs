use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use driving_exams::{
    export_chart_pdf, export_table_pdf, filter_caption, period_from_filename, ChartData, Config,
    ImportOutcome, Importer, ResultFilter, Store,
};

#[derive(Debug, Parser)]
#[command(version, about = "Import and analyse regional driving-exam results")]
struct Cli {
    /// Override the configured database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import one monthly export (skipped if the period is already recorded)
    Import {
        file: PathBuf,
        /// Defaults to the year in the export_auto_YYYYMMDD_YYYYMMDD file name
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<u32>,
    },
    /// Print filtered rows
    List {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        json: bool,
    },
    /// Print per-province totals
    Summary {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        json: bool,
    },
    /// List imported periods
    Periods,
    /// Write the filtered rows to a table PDF
    ExportTable {
        out: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Write the per-province chart to a PDF
    ExportChart {
        out: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Interactive browser (default)
    Ui,
}

#[derive(Debug, Args)]
struct FilterArgs {
    #[arg(long)]
    province: Option<String>,
    #[arg(long)]
    year: Option<i32>,
    #[arg(long)]
    limit: Option<usize>,
}

impl FilterArgs {
    fn to_filter(&self, config: &Config) -> ResultFilter {
        ResultFilter {
            province: self.province.clone(),
            year: self.year,
            limit: Some(self.limit.unwrap_or(config.default_limit)),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let command = cli.command.unwrap_or(Command::Ui);
    init_logging(&config, matches!(command, Command::Ui))?;

    // Storage problems are fatal before anything else runs
    let store = Store::open(&config.db_path)?;
    info!(db = %config.db_path.display(), "store opened");

    match command {
        Command::Import { file, year, month } => run_import(&store, &file, year, month),
        Command::List { filter, json } => run_list(&store, &filter.to_filter(&config), json),
        Command::Summary { filter, json } => run_summary(&store, &filter.to_filter(&config), json),
        Command::Periods => run_periods(&store),
        Command::ExportTable { out, filter } => {
            let filter = filter.to_filter(&config);
            let rows = store.filtered_results(&filter)?;
            let title = format!("Exam results ({})", filter_caption(&filter));
            let pages = export_table_pdf(&out, &title, &rows, config.table_pdf_rows)?;
            println!("✓ Wrote {} ({} page(s))", out.display(), pages);
            Ok(())
        }
        Command::ExportChart { out, filter } => {
            let filter = filter.to_filter(&config);
            let chart = ChartData::from_totals(&store.grouped_results(&filter)?);
            export_chart_pdf(&out, &chart, &filter_caption(&filter))?;
            println!("✓ Wrote {}", out.display());
            Ok(())
        }
        Command::Ui => run_ui_mode(&store, &config),
    }
}

/// The TUI owns the terminal, so its logs go to a file
fn init_logging(config: &Config, to_file: bool) -> Result<()> {
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    if to_file {
        if let Some(parent) = config.log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file)
            .with_context(|| format!("Failed to open log file: {}", config.log_file.display()))?;

        fmt::Subscriber::builder()
            .with_env_filter(env)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(env)
            .with_writer(std::io::stderr)
            .init();
    }

    Ok(())
}

fn run_import(store: &Store, file: &Path, year: Option<i32>, month: Option<u32>) -> Result<()> {
    let (year, month) = match (year, month) {
        (Some(year), Some(month)) => (year, month),
        (year, month) => {
            let (file_year, file_month) = period_from_filename(file).with_context(|| {
                format!(
                    "No --year/--month given and no period in file name: {}",
                    file.display()
                )
            })?;
            (year.unwrap_or(file_year), month.unwrap_or(file_month))
        }
    };

    println!("📂 Importing {} as {}-{:02}", file.display(), year, month);

    match Importer::new(store).import_period(file, year, month)? {
        ImportOutcome::Imported { rows_inserted } => {
            println!("✓ Import completed: {} rows", rows_inserted);
        }
        ImportOutcome::Skipped => {
            println!("⏭  Data already imported for {}-{:02}", year, month);
        }
    }

    Ok(())
}

fn run_list(store: &Store, filter: &ResultFilter, json: bool) -> Result<()> {
    let rows = store.filtered_results(filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!(
        "{:<18} {:<24} {:<10} {:<8} {:>5} {:>5} {:<10} {:<8} {:>6} {:>6}",
        "PROVINCE", "EXAM CENTER", "SCHOOL", "SECTION", "MONTH", "YEAR", "TYPE", "PERMIT", "PASS", "FAIL"
    );
    for r in &rows {
        println!(
            "{:<18} {:<24} {:<10} {:<8} {:>5} {:>5} {:<10} {:<8} {:>6} {:>6}",
            r.province,
            r.exam_center,
            r.school_code,
            r.section_code,
            r.month,
            r.year,
            r.exam_type,
            r.permit_name,
            r.pass_count,
            r.fail_count
        );
    }

    let total = store.count_results(filter)?;
    println!("\n{} of {} matching rows ({})", rows.len(), total, filter_caption(filter));
    Ok(())
}

fn run_summary(store: &Store, filter: &ResultFilter, json: bool) -> Result<()> {
    let totals = store.grouped_results(filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&totals)?);
        return Ok(());
    }

    println!("{:<24} {:>10} {:>10} {:>10}", "PROVINCE", "PASS", "FAIL", "ATTEMPTS");
    for t in &totals {
        println!(
            "{:<24} {:>10} {:>10} {:>10}",
            t.province, t.total_pass, t.total_fail, t.total_attempts
        );
    }
    Ok(())
}

fn run_periods(store: &Store) -> Result<()> {
    let periods = store.imported_periods()?;
    if periods.is_empty() {
        println!("No periods imported yet");
    }
    for p in periods {
        println!("{}-{:02}  imported {}", p.year, p.month, p.imported_at);
    }
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(store: &Store, config: &Config) -> Result<()> {
    let mut app = driving_exams::ui::App::new(store, config)?;
    driving_exams::ui::run_ui(&mut app)
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_store: &Store, _config: &Config) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the subcommands: import, list, summary, export-table, export-chart");
    std::process::exit(1);
}

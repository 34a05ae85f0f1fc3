use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Row cap applied when a filter carries no explicit limit
pub const DEFAULT_LIMIT: usize = 100;

/// One reported line of a monthly exam export
/// Never updated after import; duplicates inside a file are kept as-is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamResult {
    pub province: String,
    pub exam_center: String,
    pub school_code: String,
    pub section_code: String,
    pub month: u32,
    pub year: i32,
    pub exam_type: String,
    pub permit_name: String,
    pub pass_count: u32,
    pub fail_count: u32,
}

impl ExamResult {
    pub fn attempts(&self) -> u64 {
        self.pass_count as u64 + self.fail_count as u64
    }
}

/// Per-province sums used by the chart and the summary command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvinceTotals {
    pub province: String,
    pub total_pass: i64,
    pub total_fail: i64,
    pub total_attempts: i64,
}

/// Control record: this (year, month) has already been absorbed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedPeriod {
    pub year: i32,
    pub month: u32,
    pub imported_at: String,
}

/// Optional province/year filters, AND-combined, plus a row cap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultFilter {
    pub province: Option<String>,
    pub year: Option<i32>,
    pub limit: Option<usize>,
}

impl ResultFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn province(mut self, province: impl Into<String>) -> Self {
        self.province = Some(province.into());
        self
    }

    pub fn year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// WHERE clause plus its positional parameters.
    /// An empty province string counts as "no province filter".
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut values = Vec::new();

        if let Some(province) = self.province.as_deref().filter(|p| !p.is_empty()) {
            conditions.push("desc_provincia = ?");
            values.push(Value::Text(province.to_string()));
        }

        if let Some(year) = self.year {
            conditions.push("anyo = ?");
            values.push(Value::Integer(year as i64));
        }

        if conditions.is_empty() {
            (String::new(), values)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), values)
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // ==========================================================================
    // Exam results (one flat row per reported line)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            desc_provincia TEXT,
            centro_examen TEXT,
            codigo_autoescuela TEXT,
            codigo_seccion TEXT,
            mes INTEGER,
            anyo INTEGER,
            tipo_examen TEXT,
            nombre_permiso TEXT,
            num_aptos INTEGER,
            num_no_aptos INTEGER
        )",
        [],
    )?;

    // ==========================================================================
    // Imported periods (dedup control, unique per year/month)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS imported_periods (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            anyo INTEGER,
            mes INTEGER,
            imported_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(anyo, mes)
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_province ON exam_results(desc_provincia)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_year ON exam_results(anyo)",
        [],
    )?;

    Ok(())
}

const RESULT_COLUMNS: &str = "desc_provincia, centro_examen, codigo_autoescuela, codigo_seccion,
     mes, anyo, tipo_examen, nombre_permiso, num_aptos, num_no_aptos";

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<ExamResult> {
    Ok(ExamResult {
        province: row.get(0)?,
        exam_center: row.get(1)?,
        school_code: row.get(2)?,
        section_code: row.get(3)?,
        month: row.get(4)?,
        year: row.get(5)?,
        exam_type: row.get(6)?,
        permit_name: row.get(7)?,
        pass_count: row.get(8)?,
        fail_count: row.get(9)?,
    })
}

/// Handle over the single SQLite connection.
/// Owned by the top-level application and lent by reference to the
/// importer and every read path.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the store file. Failure here is fatal for the caller.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // WAL for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::from_connection(conn)
            .with_context(|| format!("Failed to initialise schema in {}", path.display()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(Store { conn })
    }

    /// Start the transaction an import runs in; dropped without commit = rollback
    pub fn begin(&self) -> Result<rusqlite::Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // ==========================================================================
    // IMPORT CONTROL
    // ==========================================================================

    pub fn period_is_imported(&self, year: i32, month: u32) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM imported_periods WHERE anyo = ?1 AND mes = ?2")?;

        Ok(stmt.exists(params![year, month])?)
    }

    /// Recording an already-present period is a no-op
    pub fn mark_period_imported(&self, year: i32, month: u32) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO imported_periods (anyo, mes) VALUES (?1, ?2)",
            params![year, month],
        )?;

        Ok(())
    }

    pub fn imported_periods(&self) -> Result<Vec<ImportedPeriod>> {
        let mut stmt = self.conn.prepare(
            "SELECT anyo, mes, COALESCE(imported_at, '')
             FROM imported_periods
             ORDER BY anyo DESC, mes DESC",
        )?;

        let periods = stmt
            .query_map([], |row| {
                Ok(ImportedPeriod {
                    year: row.get(0)?,
                    month: row.get(1)?,
                    imported_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(periods)
    }

    pub fn insert_result(&self, record: &ExamResult) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO exam_results (
                desc_provincia, centro_examen, codigo_autoescuela, codigo_seccion,
                mes, anyo, tipo_examen, nombre_permiso, num_aptos, num_no_aptos
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;

        stmt.execute(params![
            record.province,
            record.exam_center,
            record.school_code,
            record.section_code,
            record.month,
            record.year,
            record.exam_type,
            record.permit_name,
            record.pass_count,
            record.fail_count,
        ])?;

        Ok(())
    }

    // ==========================================================================
    // READ PATHS
    // ==========================================================================

    /// Rows matching the filter, ordered by province then exam center
    pub fn filtered_results(&self, filter: &ResultFilter) -> Result<Vec<ExamResult>> {
        let (where_sql, mut values) = filter.where_clause();
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT);
        values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

        let sql = format!(
            "SELECT {RESULT_COLUMNS}
             FROM exam_results
             {where_sql}
             ORDER BY desc_provincia, centro_examen, id
             LIMIT ?"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let results = stmt
            .query_map(params_from_iter(values), result_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(results)
    }

    /// Per-province totals, highest pass count first (ties by province name)
    pub fn grouped_results(&self, filter: &ResultFilter) -> Result<Vec<ProvinceTotals>> {
        let (where_sql, values) = filter.where_clause();

        let sql = format!(
            "SELECT
                desc_provincia,
                COALESCE(SUM(num_aptos), 0) AS total_aptos,
                COALESCE(SUM(num_no_aptos), 0) AS total_no_aptos,
                COALESCE(SUM(num_aptos + num_no_aptos), 0) AS total_presentados
             FROM exam_results
             {where_sql}
             GROUP BY desc_provincia
             ORDER BY total_aptos DESC, desc_provincia ASC"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let totals = stmt
            .query_map(params_from_iter(values), |row| {
                Ok(ProvinceTotals {
                    province: row.get(0)?,
                    total_pass: row.get(1)?,
                    total_fail: row.get(2)?,
                    total_attempts: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(totals)
    }

    /// Matching rows regardless of the filter's limit
    pub fn count_results(&self, filter: &ResultFilter) -> Result<i64> {
        let (where_sql, values) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM exam_results {where_sql}");

        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))?;

        Ok(count)
    }

    pub fn provinces(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT desc_provincia FROM exam_results
             WHERE desc_provincia IS NOT NULL
             ORDER BY desc_provincia",
        )?;

        let provinces = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(provinces)
    }

    pub fn years(&self) -> Result<Vec<i32>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT anyo FROM exam_results WHERE anyo IS NOT NULL ORDER BY anyo",
        )?;

        let years = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i32>, _>>()?;

        Ok(years)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Helper to build a result row with fixed codes
    pub(crate) fn create_test_result(
        province: &str,
        center: &str,
        year: i32,
        month: u32,
        pass: u32,
        fail: u32,
    ) -> ExamResult {
        ExamResult {
            province: province.to_string(),
            exam_center: center.to_string(),
            school_code: "S1".to_string(),
            section_code: "SEC1".to_string(),
            month,
            year,
            exam_type: "PRACTICO".to_string(),
            permit_name: "B".to_string(),
            pass_count: pass,
            fail_count: fail,
        }
    }

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        let rows = vec![
            create_test_result("Madrid", "C2", 2025, 12, 8, 2),
            create_test_result("Madrid", "C1", 2024, 11, 5, 5),
            create_test_result("Sevilla", "S1", 2025, 12, 20, 4),
            create_test_result("Álava", "A1", 2025, 1, 3, 1),
            create_test_result("Sevilla", "S2", 2024, 6, 1, 9),
        ];
        for row in &rows {
            store.insert_result(row).unwrap();
        }
        store
    }

    #[test]
    fn test_mark_period_is_idempotent() {
        let store = Store::open_in_memory().unwrap();

        assert!(!store.period_is_imported(2025, 12).unwrap());

        store.mark_period_imported(2025, 12).unwrap();
        store.mark_period_imported(2025, 12).unwrap();

        assert!(store.period_is_imported(2025, 12).unwrap());
        assert!(!store.period_is_imported(2025, 11).unwrap());
        assert_eq!(store.imported_periods().unwrap().len(), 1);
    }

    #[test]
    fn test_filter_by_province() {
        let store = seeded_store();

        let rows = store
            .filtered_results(&ResultFilter::new().province("Madrid"))
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.province == "Madrid"));
        // Ordered by exam center within the province
        assert_eq!(rows[0].exam_center, "C1");
        assert_eq!(rows[1].exam_center, "C2");
    }

    #[test]
    fn test_filter_by_year_and_intersection() {
        let store = seeded_store();

        let by_year = store
            .filtered_results(&ResultFilter::new().year(2025))
            .unwrap();
        assert_eq!(by_year.len(), 3);
        assert!(by_year.iter().all(|r| r.year == 2025));

        let both = store
            .filtered_results(&ResultFilter::new().province("Sevilla").year(2025))
            .unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].exam_center, "S1");
    }

    #[test]
    fn test_default_ordering_and_limit() {
        let store = seeded_store();

        let all = store.filtered_results(&ResultFilter::new()).unwrap();
        let provinces: Vec<&str> = all.iter().map(|r| r.province.as_str()).collect();
        // Plain byte ordering in SQLite: "Á" sorts after ASCII letters
        assert_eq!(provinces, vec!["Madrid", "Madrid", "Sevilla", "Sevilla", "Álava"]);

        let capped = store.filtered_results(&ResultFilter::new().limit(2)).unwrap();
        assert_eq!(capped.len(), 2);

        let none = store.filtered_results(&ResultFilter::new().limit(0)).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_empty_province_means_no_filter() {
        let store = seeded_store();

        let rows = store
            .filtered_results(&ResultFilter::new().province(""))
            .unwrap();

        assert_eq!(rows.len(), 5);
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let store = seeded_store();

        let rows = store
            .filtered_results(&ResultFilter::new().province("Cádiz"))
            .unwrap();
        assert!(rows.is_empty());

        let totals = store
            .grouped_results(&ResultFilter::new().year(1999))
            .unwrap();
        assert!(totals.is_empty());
    }

    #[test]
    fn test_grouped_totals_match_raw_rows() {
        let store = seeded_store();
        let filter = ResultFilter::new().year(2025);

        let totals = store.grouped_results(&filter).unwrap();
        let raw = store.filtered_results(&filter.clone().limit(1000)).unwrap();

        let pass: i64 = totals.iter().map(|t| t.total_pass).sum();
        let fail: i64 = totals.iter().map(|t| t.total_fail).sum();
        let attempts: i64 = totals.iter().map(|t| t.total_attempts).sum();

        assert_eq!(pass, raw.iter().map(|r| r.pass_count as i64).sum::<i64>());
        assert_eq!(fail, raw.iter().map(|r| r.fail_count as i64).sum::<i64>());
        assert_eq!(attempts, raw.iter().map(|r| r.attempts() as i64).sum::<i64>());

        for t in &totals {
            assert_eq!(t.total_attempts, t.total_pass + t.total_fail);
        }
    }

    #[test]
    fn test_grouped_sorted_by_pass_desc() {
        let store = seeded_store();

        let totals = store.grouped_results(&ResultFilter::new()).unwrap();
        let provinces: Vec<&str> = totals.iter().map(|t| t.province.as_str()).collect();

        assert_eq!(provinces, vec!["Sevilla", "Madrid", "Álava"]);
        assert_eq!(totals[0].total_pass, 21);
        assert_eq!(totals[0].total_fail, 13);
        assert!(totals.windows(2).all(|w| w[0].total_pass >= w[1].total_pass));
    }

    #[test]
    fn test_grouped_ties_broken_by_province() {
        let store = Store::open_in_memory().unwrap();
        store.insert_result(&create_test_result("Zamora", "Z1", 2025, 1, 4, 0)).unwrap();
        store.insert_result(&create_test_result("Burgos", "B1", 2025, 1, 4, 3)).unwrap();

        let totals = store.grouped_results(&ResultFilter::new()).unwrap();

        assert_eq!(totals[0].province, "Burgos");
        assert_eq!(totals[1].province, "Zamora");
    }

    #[test]
    fn test_count_and_distinct_values() {
        let store = seeded_store();

        assert_eq!(store.count_results(&ResultFilter::new()).unwrap(), 5);
        assert_eq!(
            store.count_results(&ResultFilter::new().province("Madrid").limit(1)).unwrap(),
            2
        );
        assert_eq!(store.provinces().unwrap(), vec!["Madrid", "Sevilla", "Álava"]);
        assert_eq!(store.years().unwrap(), vec![2024, 2025]);
    }

    #[test]
    fn test_uncommitted_transaction_rolls_back() {
        let store = Store::open_in_memory().unwrap();

        {
            let _tx = store.begin().unwrap();
            store.insert_result(&create_test_result("Madrid", "C1", 2025, 12, 1, 1)).unwrap();
            store.mark_period_imported(2025, 12).unwrap();
            // dropped without commit
        }

        assert_eq!(store.count_results(&ResultFilter::new()).unwrap(), 0);
        assert!(!store.period_is_imported(2025, 12).unwrap());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("exams.db");

        let store = Store::open(&path).unwrap();
        store.mark_period_imported(2025, 1).unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert!(reopened.period_is_imported(2025, 1).unwrap());
    }
}

use crate::chart::ChartData;
use crate::config::Config;
use crate::db::{ExamResult, ProvinceTotals, ResultFilter, Store};
use crate::report;
use anyhow::{Context, Result};
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Bar, BarChart, BarGroup, Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Table,
    Chart,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Table => Page::Chart,
            Page::Chart => Page::Table,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Table => "Exam Results",
            Page::Chart => "Statistics Overview",
        }
    }
}

pub struct App<'a> {
    store: &'a Store,
    config: &'a Config,
    pub rows: Vec<ExamResult>,
    pub totals: Vec<ProvinceTotals>,
    pub matching_count: i64,
    pub provinces: Vec<String>,
    pub years: Vec<i32>,
    /// 0 = all provinces, n = provinces[n - 1]
    pub province_choice: usize,
    /// 0 = all years, n = years[n - 1]
    pub year_choice: usize,
    pub applied: ResultFilter,
    pub state: TableState,
    pub current_page: Page,
    pub status: Option<String>,
}

impl<'a> App<'a> {
    pub fn new(store: &'a Store, config: &'a Config) -> Result<Self> {
        let mut app = Self {
            store,
            config,
            rows: Vec::new(),
            totals: Vec::new(),
            matching_count: 0,
            provinces: store.provinces()?,
            years: store.years()?,
            province_choice: 0,
            year_choice: 0,
            applied: ResultFilter::new().limit(config.default_limit),
            state: TableState::default(),
            current_page: Page::Table,
            status: None,
        };
        app.reload()?;
        Ok(app)
    }

    // ==========================================================================
    // FILTERS
    // ==========================================================================

    pub fn selected_province(&self) -> Option<&str> {
        self.province_choice
            .checked_sub(1)
            .and_then(|i| self.provinces.get(i))
            .map(String::as_str)
    }

    pub fn selected_year(&self) -> Option<i32> {
        self.year_choice
            .checked_sub(1)
            .and_then(|i| self.years.get(i))
            .copied()
    }

    /// Filter built from the selectors; becomes active on apply
    pub fn pending_filter(&self) -> ResultFilter {
        ResultFilter {
            province: self.selected_province().map(str::to_string),
            year: self.selected_year(),
            limit: Some(self.config.default_limit),
        }
    }

    pub fn next_province(&mut self) {
        self.province_choice = (self.province_choice + 1) % (self.provinces.len() + 1);
    }

    pub fn previous_province(&mut self) {
        let choices = self.provinces.len() + 1;
        self.province_choice = (self.province_choice + choices - 1) % choices;
    }

    pub fn next_year(&mut self) {
        self.year_choice = (self.year_choice + 1) % (self.years.len() + 1);
    }

    pub fn previous_year(&mut self) {
        let choices = self.years.len() + 1;
        self.year_choice = (self.year_choice + choices - 1) % choices;
    }

    pub fn apply_filters(&mut self) -> Result<()> {
        self.applied = self.pending_filter();
        self.reload()?;
        self.status = Some(format!(
            "Showing {} of {} rows ({})",
            self.rows.len(),
            self.matching_count,
            report::filter_caption(&self.applied)
        ));
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        self.rows = self.store.filtered_results(&self.applied)?;
        self.totals = self.store.grouped_results(&self.applied)?;
        self.matching_count = self.store.count_results(&self.applied)?;

        if self.rows.is_empty() {
            self.state.select(None);
        } else {
            self.state.select(Some(0));
        }
        Ok(())
    }

    // ==========================================================================
    // EXPORTS
    // ==========================================================================

    fn export_path(&self, prefix: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.config.export_dir).with_context(|| {
            format!("Failed to create export directory: {}", self.config.export_dir.display())
        })?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        Ok(self.config.export_dir.join(format!("{}_{}.pdf", prefix, stamp)))
    }

    /// Table PDF of the applied selection
    pub fn export_table(&mut self) -> Result<PathBuf> {
        let path = self.export_path("exam_table")?;
        let title = format!("Exam results ({})", report::filter_caption(&self.applied));
        report::export_table_pdf(&path, &title, &self.rows, self.config.table_pdf_rows)?;
        info!(path = %path.display(), "table exported");
        Ok(path)
    }

    /// Chart PDF of the applied selection's per-province totals
    pub fn export_chart(&mut self) -> Result<PathBuf> {
        let path = self.export_path("exam_chart")?;
        let chart = ChartData::from_totals(&self.totals);
        report::export_chart_pdf(&path, &chart, &report::filter_caption(&self.applied))?;
        info!(path = %path.display(), "chart exported");
        Ok(path)
    }

    fn report_export(&mut self, result: Result<PathBuf>) {
        self.status = Some(match result {
            Ok(path) => format!("Saved {}", path.display()),
            Err(e) => {
                error!("export failed: {:#}", e);
                format!("Export failed: {:#}", e)
            }
        });
    }

    // ==========================================================================
    // NAVIGATION
    // ==========================================================================

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn selected_result(&self) -> Option<&ExamResult> {
        self.state.selected().and_then(|i| self.rows.get(i))
    }

    pub fn next(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = self.state.selected().map(|i| (i + 20).min(len - 1)).unwrap_or(0);
        self.state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let i = self.state.selected().map(|i| i.saturating_sub(20)).unwrap_or(0);
        self.state.select(Some(i));
    }

    pub fn first(&mut self) {
        if !self.rows.is_empty() {
            self.state.select(Some(0));
        }
    }

    pub fn last(&mut self) {
        if !self.rows.is_empty() {
            self.state.select(Some(self.rows.len() - 1));
        }
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Tab | KeyCode::BackTab => app.next_page(),
                KeyCode::Char('p') => app.next_province(),
                KeyCode::Char('P') => app.previous_province(),
                KeyCode::Char('y') => app.next_year(),
                KeyCode::Char('Y') => app.previous_year(),
                KeyCode::Enter | KeyCode::Char('a') => {
                    if let Err(e) = app.apply_filters() {
                        error!("filter failed: {:#}", e);
                        app.status = Some(format!("Filter failed: {:#}", e));
                    }
                }
                KeyCode::Char('e') => {
                    let result = app.export_table();
                    app.report_export(result);
                }
                KeyCode::Char('x') => {
                    let result = app.export_chart();
                    app.report_export(result);
                }
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.first(),
                KeyCode::End => app.last(),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Page tabs
            Constraint::Length(3), // Filter panel
            Constraint::Min(0),    // Content
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);
    render_filters(f, chunks[1], app);

    match app.current_page {
        Page::Table => render_table(f, chunks[2], app),
        Page::Chart => render_chart(f, chunks[2], app),
    }

    render_status_bar(f, chunks[3], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![];
    for (i, page) in [Page::Table, Page::Chart].iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title(), style));
    }

    let pass: i64 = app.totals.iter().map(|t| t.total_pass).sum();
    let fail: i64 = app.totals.iter().map(|t| t.total_fail).sum();

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Matching: {}", app.matching_count),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(format!("✓ {}", pass), Style::default().fg(Color::Green)));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(format!("✗ {}", fail), Style::default().fg(Color::Red)));

    let header = Paragraph::new(vec![Line::from(tab_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" Driving Exams Analyzer "),
    );

    f.render_widget(header, area);
}

fn render_filters(f: &mut Frame, area: Rect, app: &App) {
    let pending = app.pending_filter();
    let dirty = pending != app.applied;

    let province = app.selected_province().unwrap_or("All Provinces").to_string();
    let year = app
        .selected_year()
        .map(|y| y.to_string())
        .unwrap_or_else(|| "All Years".to_string());

    let mut spans = vec![
        Span::styled("Province: ", Style::default().fg(Color::Gray)),
        Span::styled(province, Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
        Span::raw("   "),
        Span::styled("Year: ", Style::default().fg(Color::Gray)),
        Span::styled(year, Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
    ];

    if dirty {
        spans.push(Span::raw("   "));
        spans.push(Span::styled("(Enter to apply)", Style::default().fg(Color::Yellow)));
    }

    let panel = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Filters "),
    );

    f.render_widget(panel, area);
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = [
        "Province", "Exam Center", "School", "Section", "Month", "Year", "Exam Type", "Permit",
        "Pass", "Fail",
    ]
    .iter()
    .map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.rows.iter().map(|r| {
        let cells = vec![
            Cell::from(truncate(&r.province, 18)),
            Cell::from(truncate(&r.exam_center, 22)),
            Cell::from(r.school_code.clone()),
            Cell::from(r.section_code.clone()),
            Cell::from(r.month.to_string()),
            Cell::from(r.year.to_string()),
            Cell::from(truncate(&r.exam_type, 12)),
            Cell::from(truncate(&r.permit_name, 10)),
            Cell::from(r.pass_count.to_string()).style(Style::default().fg(Color::Green)),
            Cell::from(r.fail_count.to_string()).style(Style::default().fg(Color::Red)),
        ];

        Row::new(cells).height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(18),
            Constraint::Length(22),
            Constraint::Length(10),
            Constraint::Length(8),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Length(12),
            Constraint::Length(10),
            Constraint::Length(7),
            Constraint::Length(7),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(format!(" {} ", Page::Table.title())),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_chart(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White))
        .title(format!(" {} - pass (green) vs fail (red) ", Page::Chart.title()));

    if app.totals.is_empty() {
        let empty = Paragraph::new("No data for the current filter").block(block);
        f.render_widget(empty, area);
        return;
    }

    let mut chart = BarChart::default()
        .block(block)
        .bar_width(5)
        .bar_gap(1)
        .group_gap(3)
        .value_style(Style::default().fg(Color::Black).add_modifier(Modifier::BOLD));

    for totals in &app.totals {
        let bars = [
            Bar::default()
                .value(totals.total_pass.max(0) as u64)
                .style(Style::default().fg(Color::Green)),
            Bar::default()
                .value(totals.total_fail.max(0) as u64)
                .style(Style::default().fg(Color::Red)),
        ];
        let group = BarGroup::default()
            .label(Line::from(truncate(&totals.province, 11)))
            .bars(&bars);
        chart = chart.data(group);
    }

    f.render_widget(chart, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);

    let mut status_spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected, app.rows.len()),
        Style::default().fg(Color::Cyan),
    )];

    if let Some(status) = &app.status {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(status.clone(), Style::default().fg(Color::Green)));
    }

    for (key, label, color) in [
        ("p/y", " Filter", Color::Yellow),
        ("Enter", " Apply", Color::Yellow),
        ("Tab", " Page", Color::Yellow),
        ("e/x", " Export", Color::Yellow),
        ("q", " Quit", Color::Red),
    ] {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(key, Style::default().fg(color)));
        status_spans.push(Span::raw(label));
    }

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::create_test_result;

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        for row in [
            create_test_result("Madrid", "C1", 2025, 12, 8, 2),
            create_test_result("Madrid", "C2", 2024, 12, 3, 3),
            create_test_result("Sevilla", "S1", 2025, 12, 20, 4),
        ] {
            store.insert_result(&row).unwrap();
        }
        store
    }

    fn test_config(export_dir: PathBuf) -> Config {
        Config {
            export_dir,
            ..Config::default()
        }
    }

    #[test]
    fn test_app_starts_unfiltered() {
        let store = seeded_store();
        let config = Config::default();
        let app = App::new(&store, &config).unwrap();

        assert_eq!(app.rows.len(), 3);
        assert_eq!(app.totals.len(), 2);
        assert_eq!(app.provinces, vec!["Madrid", "Sevilla"]);
        assert_eq!(app.years, vec![2024, 2025]);
        assert_eq!(app.state.selected(), Some(0));
    }

    #[test]
    fn test_selectors_cycle_through_all() {
        let store = seeded_store();
        let config = Config::default();
        let mut app = App::new(&store, &config).unwrap();

        assert_eq!(app.selected_province(), None);
        app.next_province();
        assert_eq!(app.selected_province(), Some("Madrid"));
        app.next_province();
        app.next_province();
        assert_eq!(app.selected_province(), None);

        app.previous_year();
        assert_eq!(app.selected_year(), Some(2025));
    }

    #[test]
    fn test_apply_filters_requeries_store() {
        let store = seeded_store();
        let config = Config::default();
        let mut app = App::new(&store, &config).unwrap();

        app.next_province(); // Madrid
        app.next_year(); // 2024
        // Selection alone changes nothing
        assert_eq!(app.rows.len(), 3);

        app.apply_filters().unwrap();

        assert_eq!(app.rows.len(), 1);
        assert_eq!(app.rows[0].exam_center, "C2");
        assert_eq!(app.totals.len(), 1);
        assert_eq!(app.totals[0].total_attempts, 6);
        assert_eq!(app.matching_count, 1);
        assert!(app.status.is_some());
    }

    #[test]
    fn test_navigation_wraps() {
        let store = seeded_store();
        let config = Config::default();
        let mut app = App::new(&store, &config).unwrap();

        app.previous();
        assert_eq!(app.state.selected(), Some(2));
        app.next();
        assert_eq!(app.state.selected(), Some(0));
        app.page_down();
        assert_eq!(app.state.selected(), Some(2));
        app.page_up();
        assert_eq!(app.selected_result().map(|r| r.exam_center.as_str()), Some("C1"));
    }

    #[test]
    fn test_exports_use_applied_selection() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let config = test_config(dir.path().join("exports"));
        let mut app = App::new(&store, &config).unwrap();

        app.next_province();
        app.next_province(); // Sevilla
        app.apply_filters().unwrap();

        let table = app.export_table().unwrap();
        let chart = app.export_chart().unwrap();

        assert!(table.exists());
        assert!(chart.exists());
        assert!(table.starts_with(dir.path().join("exports")));
        assert_eq!(app.rows.len(), 1);
    }
}

// 🧾 PDF reports
// Table export (bounded rows, header repeated per page) and chart export

use crate::chart::ChartData;
use crate::db::{ExamResult, ResultFilter};
use anyhow::{Context, Result};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;

// A4 in points
pub const PAGE_WIDTH: i64 = 595;
pub const PAGE_HEIGHT: i64 = 842;

/// Data rows written to a table PDF unless configured otherwise
pub const DEFAULT_MAX_ROWS: usize = 40;

pub const TABLE_ROWS_PER_PAGE: usize = 60;

const LEFT: i64 = 40;
const TOP: i64 = PAGE_HEIGHT - 40;
const FONT_SIZE: i64 = 7;
const LINE_HEIGHT: i64 = 12;

pub const TABLE_HEADERS: [&str; 10] = [
    "Province", "Exam center", "School", "Section", "Month", "Year", "Exam type", "Permit", "Pass",
    "Fail",
];

/// Column widths in points, parallel to TABLE_HEADERS
const COLUMN_WIDTHS: [i64; 10] = [80, 90, 55, 45, 28, 30, 60, 50, 32, 32];

/// Human-readable description of the active filter
pub fn filter_caption(filter: &ResultFilter) -> String {
    let province = filter
        .province
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or("all provinces");
    let year = filter
        .year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "all years".to_string());

    format!("{}, {}", province, year)
}

// ============================================================================
// TABLE REPORT
// ============================================================================

#[derive(Debug, Clone)]
pub struct TableReport {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableReport {
    /// Header plus at most `max_rows` rows, in the order given
    pub fn from_results(title: &str, results: &[ExamResult], max_rows: usize) -> Self {
        let rows = results
            .iter()
            .take(max_rows)
            .map(|r| {
                vec![
                    r.province.clone(),
                    r.exam_center.clone(),
                    r.school_code.clone(),
                    r.section_code.clone(),
                    r.month.to_string(),
                    r.year.to_string(),
                    r.exam_type.clone(),
                    r.permit_name.clone(),
                    r.pass_count.to_string(),
                    r.fail_count.to_string(),
                ]
            })
            .collect();

        TableReport {
            title: title.to_string(),
            headers: TABLE_HEADERS.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }

    /// Row slices per page; an empty report still has one (header-only) page
    pub fn pages(&self, rows_per_page: usize) -> Vec<&[Vec<String>]> {
        if self.rows.is_empty() {
            return vec![&self.rows[..]];
        }
        self.rows.chunks(rows_per_page.max(1)).collect()
    }

    /// Returns the number of pages written
    pub fn write_pdf(&self, path: &Path) -> Result<usize> {
        let pages = self.pages(TABLE_ROWS_PER_PAGE);
        let page_count = pages.len();
        let mut pdf = PdfWriter::new();

        for (i, rows) in pages.into_iter().enumerate() {
            let mut ops = Vec::new();
            ops.extend(text_at(
                LEFT,
                TOP,
                11,
                &format!("{} - page {}/{}", self.title, i + 1, page_count),
            ));

            let mut y = TOP - 22;
            ops.extend(table_line(y, &self.headers));
            y -= 4;
            ops.extend(horizontal_rule(y));
            y -= LINE_HEIGHT;

            for row in rows {
                ops.extend(table_line(y, row));
                y -= LINE_HEIGHT;
            }

            pdf.add_page(ops, None)?;
        }

        pdf.save(path)?;
        Ok(page_count)
    }
}

pub fn export_table_pdf(path: &Path, title: &str, results: &[ExamResult], max_rows: usize) -> Result<usize> {
    TableReport::from_results(title, results, max_rows).write_pdf(path)
}

// ============================================================================
// CHART REPORT
// ============================================================================

const CHART_IMAGE_WIDTH: u32 = 1000;
const CHART_IMAGE_HEIGHT: u32 = 600;

pub fn export_chart_pdf(path: &Path, chart: &ChartData, caption: &str) -> Result<()> {
    let image = chart.render_image(CHART_IMAGE_WIDTH, CHART_IMAGE_HEIGHT);
    let (width, height) = image.dimensions();

    let image_stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        image.into_raw(),
    );

    let mut pdf = PdfWriter::new();
    let image_id = pdf.doc.add_object(image_stream);

    let draw_width: i64 = 500;
    let draw_height: i64 = 300;
    let draw_y = TOP - 40 - draw_height;

    let mut ops = Vec::new();
    ops.extend(text_at(LEFT, TOP, 14, &chart.title));
    ops.extend(text_at(LEFT, TOP - 18, 9, caption));
    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new(
        "cm",
        vec![
            draw_width.into(),
            0.into(),
            0.into(),
            draw_height.into(),
            LEFT.into(),
            draw_y.into(),
        ],
    ));
    ops.push(Operation::new("Do", vec!["Im1".into()]));
    ops.push(Operation::new("Q", vec![]));

    let mut y = draw_y - 20;
    ops.extend(text_at(LEFT, y, 9, "Blue: pass   Orange: fail"));
    y -= LINE_HEIGHT + 4;

    let capacity = ((y - 40) / LINE_HEIGHT + 1).max(0) as usize;
    for line in legend_lines(chart, capacity) {
        ops.extend(text_at(LEFT, y, 8, &line));
        y -= LINE_HEIGHT;
    }

    pdf.add_page(ops, Some(dictionary! { "Im1" => image_id }))?;
    pdf.save(path)
}

/// One line per province; the last slot names how many did not fit
pub fn legend_lines(chart: &ChartData, capacity: usize) -> Vec<String> {
    let shown = if chart.bars.len() <= capacity {
        chart.bars.len()
    } else {
        capacity.saturating_sub(1)
    };

    let mut lines: Vec<String> = chart
        .bars
        .iter()
        .take(shown)
        .enumerate()
        .map(|(i, bar)| {
            format!(
                "{}. {}: {} pass / {} fail ({} attempts)",
                i + 1,
                bar.label,
                bar.pass,
                bar.fail,
                bar.total()
            )
        })
        .collect();

    let hidden = chart.bars.len() - shown;
    if hidden > 0 && capacity > 0 {
        lines.push(format!("... and {} more", hidden));
    }
    lines
}

// ============================================================================
// LOW-LEVEL PDF ASSEMBLY
// ============================================================================

struct PdfWriter {
    doc: Document,
    pages_id: ObjectId,
    font_id: ObjectId,
    page_ids: Vec<ObjectId>,
}

impl PdfWriter {
    fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });

        PdfWriter {
            doc,
            pages_id,
            font_id,
            page_ids: Vec::new(),
        }
    }

    fn add_page(&mut self, operations: Vec<Operation>, xobjects: Option<Dictionary>) -> Result<()> {
        let content = Content { operations };
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.encode().context("Failed to encode page")?));

        let mut resources = dictionary! {
            "Font" => dictionary! { "F1" => self.font_id },
        };
        if let Some(xobjects) = xobjects {
            resources.set("XObject", xobjects);
        }

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "Resources" => resources,
        });
        self.page_ids.push(page_id);

        Ok(())
    }

    fn save(mut self, path: &Path) -> Result<()> {
        let kids: Vec<Object> = self.page_ids.iter().map(|id| (*id).into()).collect();
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => self.page_ids.len() as i64,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        };
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();

        self.doc
            .save(path)
            .with_context(|| format!("Failed to write PDF: {}", path.display()))?;

        Ok(())
    }
}

/// Helvetica with WinAnsiEncoding expects Windows-1252 bytes
fn pdf_string(text: &str) -> Object {
    let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode(text);
    Object::string_literal(bytes.into_owned())
}

fn text_at(x: i64, y: i64, size: i64, text: &str) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), size.into()]),
        Operation::new("Td", vec![x.into(), y.into()]),
        Operation::new("Tj", vec![pdf_string(text)]),
        Operation::new("ET", vec![]),
    ]
}

fn table_line(y: i64, cells: &[String]) -> Vec<Operation> {
    let mut ops = Vec::new();
    let mut x = LEFT;
    for (cell, width) in cells.iter().zip(COLUMN_WIDTHS) {
        // Helvetica averages roughly half the font size per glyph
        let max_chars = (width * 2 / FONT_SIZE) as usize;
        ops.extend(text_at(x, y, FONT_SIZE, &truncate(cell, max_chars)));
        x += width;
    }
    ops
}

fn horizontal_rule(y: i64) -> Vec<Operation> {
    let right: i64 = LEFT + COLUMN_WIDTHS.iter().sum::<i64>();
    vec![
        Operation::new("m", vec![LEFT.into(), y.into()]),
        Operation::new("l", vec![right.into(), y.into()]),
        Operation::new("S", vec![]),
    ]
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(2)).collect();
        format!("{}..", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::create_test_result;
    use crate::db::ProvinceTotals;

    fn results(n: usize) -> Vec<ExamResult> {
        (0..n)
            .map(|i| create_test_result("Madrid", &format!("C{:03}", i), 2025, 12, i as u32, 1))
            .collect()
    }

    #[test]
    fn test_table_report_caps_rows() {
        let report = TableReport::from_results("Exam results", &results(100), DEFAULT_MAX_ROWS);

        assert_eq!(report.headers.len(), 10);
        assert_eq!(report.rows.len(), 40);
        assert_eq!(report.rows[0][1], "C000");
        assert_eq!(report.rows[39][1], "C039");
    }

    #[test]
    fn test_pages_split_rows() {
        let report = TableReport::from_results("Exam results", &results(25), 100);

        let pages = report.pages(10);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[2].len(), 5);
    }

    #[test]
    fn test_empty_report_has_one_page() {
        let report = TableReport::from_results("Exam results", &[], DEFAULT_MAX_ROWS);

        let pages = report.pages(TABLE_ROWS_PER_PAGE);
        assert_eq!(pages.len(), 1);
        assert!(pages[0].is_empty());
    }

    #[test]
    fn test_write_table_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.pdf");

        let pages = export_table_pdf(&path, "Exam results", &results(100), 100).unwrap();
        assert_eq!(pages, 2);

        let doc = Document::load(&path).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[test]
    fn test_write_chart_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.pdf");
        let chart = ChartData::from_totals(&[ProvinceTotals {
            province: "Cádiz".to_string(),
            total_pass: 8,
            total_fail: 2,
            total_attempts: 10,
        }]);

        export_chart_pdf(&path, &chart, "all provinces, 2025").unwrap();

        let doc = Document::load(&path).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_legend_reports_hidden_provinces() {
        let many: Vec<ProvinceTotals> = (0..50)
            .map(|i| ProvinceTotals {
                province: format!("P{:02}", i),
                total_pass: 5,
                total_fail: 1,
                total_attempts: 6,
            })
            .collect();
        let chart = ChartData::from_totals(&many);

        let lines = legend_lines(&chart, 10);
        assert_eq!(lines.len(), 10);
        assert!(lines[8].starts_with("9. P08:"));
        assert_eq!(lines[9], "... and 41 more");

        let all = legend_lines(&chart, 50);
        assert_eq!(all.len(), 50);
        assert!(all.iter().all(|l| !l.contains("more")));
    }

    #[test]
    fn test_write_chart_pdf_with_many_provinces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.pdf");
        let many: Vec<ProvinceTotals> = (0..1200)
            .map(|i| ProvinceTotals {
                province: format!("P{:04}", i),
                total_pass: 2,
                total_fail: 1,
                total_attempts: 3,
            })
            .collect();

        export_chart_pdf(&path, &ChartData::from_totals(&many), "all provinces, all years").unwrap();

        assert_eq!(Document::load(&path).unwrap().get_pages().len(), 1);
    }

    #[test]
    fn test_bad_export_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("table.pdf");

        assert!(export_table_pdf(&path, "Exam results", &results(1), 10).is_err());
    }

    #[test]
    fn test_filter_caption() {
        assert_eq!(filter_caption(&ResultFilter::new()), "all provinces, all years");
        assert_eq!(
            filter_caption(&ResultFilter::new().province("Madrid").year(2025)),
            "Madrid, 2025"
        );
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("Álava", 10), "Álava");
        assert_eq!(truncate("Ávila de los Caballeros", 6), "Ávil..");
    }
}

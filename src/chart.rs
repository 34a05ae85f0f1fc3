// 📊 Pass/fail chart
// Stacked bars per province, fed by Store::grouped_results

use crate::db::ProvinceTotals;
use image::{Rgb, RgbImage};

pub const PASS_COLOR: Rgb<u8> = Rgb([59, 130, 246]);
pub const FAIL_COLOR: Rgb<u8> = Rgb([249, 115, 22]);
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS_COLOR: Rgb<u8> = Rgb([60, 60, 60]);

/// Padding around the plot area, in pixels
const MARGIN: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartBar {
    pub label: String,
    pub pass: u64,
    pub fail: u64,
}

impl ChartBar {
    pub fn total(&self) -> u64 {
        self.pass + self.fail
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartData {
    pub title: String,
    pub bars: Vec<ChartBar>,
}

impl ChartData {
    /// Keeps the grouped order (highest pass count first)
    pub fn from_totals(totals: &[ProvinceTotals]) -> Self {
        let bars = totals
            .iter()
            .map(|t| ChartBar {
                label: t.province.clone(),
                pass: t.total_pass.max(0) as u64,
                fail: t.total_fail.max(0) as u64,
            })
            .collect();

        ChartData {
            title: "Exam Results (Pass vs Fail)".to_string(),
            bars,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn max_total(&self) -> u64 {
        self.bars.iter().map(ChartBar::total).max().unwrap_or(0)
    }

    /// Rasterise: pass at the bottom of each bar, fail stacked on top
    pub fn render_image(&self, width: u32, height: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(width, height, BACKGROUND);
        if width <= MARGIN * 2 || height <= MARGIN * 2 {
            return img;
        }

        let plot_left = MARGIN;
        let plot_bottom = height - MARGIN;
        let plot_width = width - MARGIN * 2;
        let plot_height = height - MARGIN * 2;

        // Axes
        fill_rect(&mut img, plot_left, MARGIN, 1, plot_height, AXIS_COLOR);
        fill_rect(&mut img, plot_left, plot_bottom, plot_width, 1, AXIS_COLOR);

        let max = self.max_total();
        if self.bars.is_empty() || max == 0 {
            return img;
        }

        // More bars than pixels: slot is 0 and neighbouring bars share columns
        let count = self.bars.len() as u64;
        let slot = plot_width / self.bars.len() as u32;
        let bar_width = (slot * 3 / 4).max(1);
        let scale = |value: u64| -> u32 { ((value * (plot_height - 1) as u64) / max) as u32 };

        for (i, bar) in self.bars.iter().enumerate() {
            let slot_start = (i as u64 * plot_width as u64 / count) as u32;
            let x = plot_left + 1 + slot_start + slot.saturating_sub(bar_width) / 2;
            let pass_h = scale(bar.pass);
            let total_h = scale(bar.total());

            fill_rect(&mut img, x, plot_bottom - pass_h, bar_width, pass_h, PASS_COLOR);
            fill_rect(
                &mut img,
                x,
                plot_bottom - total_h,
                bar_width,
                total_h - pass_h,
                FAIL_COLOR,
            );
        }

        img
    }
}

fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = (x + w).min(img.width());
    let y_end = (y + h).min(img.height());
    for px in x..x_end {
        for py in y..y_end {
            img.put_pixel(px, py, color);
        }
    }
}

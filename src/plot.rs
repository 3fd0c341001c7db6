use eframe::egui;
use egui_plot::{Legend, Line, Plot, PlotPoints};
use log::{debug, info};

use crate::utils::PLOT_Y_MAX;

/// Where a refresh tick draws its single line.
pub trait PlotSurface {
    fn clear(&mut self);

    /// Draws `values` at x = `x_start + i * x_step`.
    fn plot_line(&mut self, x_start: f64, x_step: f64, values: &[f64]);

    fn set_range(&mut self, _x_min: f64, _x_max: f64, _y_min: f64, _y_max: f64) {}
}

/// Visible bounds of the plot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotRange {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Default for PlotRange {
    fn default() -> Self {
        Self {
            x_min: 0.0,
            x_max: 1.0,
            y_min: 0.0,
            y_max: PLOT_Y_MAX,
        }
    }
}

/// egui-backed coherence plot. Holds the last line handed to it and redraws
/// it every frame.
pub struct CoherencePlot {
    title: String,
    points: Vec<[f64; 2]>,
    range: PlotRange,
}

impl CoherencePlot {
    pub fn new(title: &str) -> Self {
        CoherencePlot {
            title: title.to_string(),
            points: Vec::new(),
            range: PlotRange::default(),
        }
    }

    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }

    pub fn range(&self) -> PlotRange {
        self.range
    }

    pub fn show(&self, ui: &mut egui::Ui) {
        ui.label(&self.title);

        Plot::new("coherence_plot")
            .legend(Legend::default())
            .include_x(self.range.x_min)
            .include_x(self.range.x_max)
            .include_y(self.range.y_min)
            .include_y(self.range.y_max)
            .x_axis_label("Hz")
            .y_axis_label("Coherence (%)")
            .show(ui, |plot_ui| {
                if !self.points.is_empty() {
                    let line = Line::new(PlotPoints::from(self.points.clone()))
                        .color(egui::Color32::YELLOW)
                        .name("Coherence");
                    plot_ui.line(line);
                }
            });
    }
}

impl PlotSurface for CoherencePlot {
    fn clear(&mut self) {
        self.points.clear();
    }

    fn plot_line(&mut self, x_start: f64, x_step: f64, values: &[f64]) {
        self.points.extend(
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| [x_start + i as f64 * x_step, v]),
        );
    }

    fn set_range(&mut self, x_min: f64, x_max: f64, y_min: f64, y_max: f64) {
        debug!("Plot range set to {}..{} Hz", x_min, x_max);
        self.range = PlotRange { x_min, x_max, y_min, y_max };
    }
}

/// Headless surface: logs where the plotted line peaks.
#[derive(Default)]
pub struct LogPlot {
    pub lines_plotted: usize,
}

impl PlotSurface for LogPlot {
    fn clear(&mut self) {}

    fn plot_line(&mut self, x_start: f64, x_step: f64, values: &[f64]) {
        self.lines_plotted += 1;
        let peak = values
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((i, v)),
            });
        if let Some((i, v)) = peak {
            info!(
                "Coherence peak {:.1}% at {:.1} Hz ({} bins)",
                v,
                x_start + i as f64 * x_step,
                values.len()
            );
        }
    }

    fn set_range(&mut self, x_min: f64, x_max: f64, _y_min: f64, _y_max: f64) {
        info!("Frequency band now {}..{} Hz", x_min, x_max);
    }
}

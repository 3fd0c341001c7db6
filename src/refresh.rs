use log::{debug, warn};

use crate::backend::FrequencyAxis;
use crate::combinations::{resolve_selection, Selection};
use crate::plot::PlotSurface;
use crate::snapshot::{CoherenceMatrix, SnapshotReader};
use crate::utils::PERCENT_SCALE;

/// What a refresh tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A line was drawn for this selection.
    Plotted(Selection),
    /// Nothing has been received yet, or the matrix is empty.
    NoData,
    /// The held matrix does not have one row per current combination.
    ShapeMismatch { expected: usize, actual: usize },
    /// The held matrix does not have one column per bin of the current axis.
    BinMismatch { expected: usize, actual: usize },
    /// The selected values were not finite.
    Malformed,
}

/// UI-side consumer of coherence snapshots. Keeps the last received matrix,
/// scaled to percent, and turns it into the single line the plot shows.
#[derive(Default)]
pub struct RefreshController {
    display: CoherenceMatrix,
    has_display: bool,
    line: Vec<f64>,
    ticks: u64,
}

impl RefreshController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The display matrix (percent), once one has been received.
    pub fn display(&self) -> Option<&CoherenceMatrix> {
        self.has_display.then_some(&self.display)
    }

    /// Drops the held matrix, e.g. after the frequency band changed.
    pub fn invalidate(&mut self) {
        self.has_display = false;
    }

    /// One refresh tick.
    ///
    /// # Arguments
    ///
    /// * `reader` - Consumer half of the snapshot channel.
    /// * `selection_id` - Stored 1-based selection; left untouched even when it
    ///   no longer resolves.
    /// * `expected_rows` - Current combination count.
    /// * `axis` - Frequency axis for the x values.
    /// * `plot` - Surface the resulting line is drawn on.
    pub fn tick(
        &mut self,
        reader: &mut SnapshotReader,
        selection_id: usize,
        expected_rows: usize,
        axis: FrequencyAxis,
        plot: &mut dyn PlotSurface,
    ) -> TickOutcome {
        self.ticks += 1;

        if reader.has_update() {
            self.display.copy_from(reader.pull());
            self.display.scale(PERCENT_SCALE);
            self.has_display = true;
            debug!(
                "Tick {}: pulled {}x{} coherence matrix",
                self.ticks,
                self.display.rows(),
                self.display.bins()
            );
        }

        if !self.has_display || self.display.is_empty() {
            return TickOutcome::NoData;
        }

        if self.display.rows() != expected_rows {
            warn!(
                "Coherence matrix has {} rows but {} combinations are selected; skipping plot",
                self.display.rows(),
                expected_rows
            );
            return TickOutcome::ShapeMismatch {
                expected: expected_rows,
                actual: self.display.rows(),
            };
        }

        if self.display.bins() != axis.bins() {
            warn!(
                "Coherence matrix has {} bins but the axis has {}; skipping plot",
                self.display.bins(),
                axis.bins()
            );
            return TickOutcome::BinMismatch {
                expected: axis.bins(),
                actual: self.display.bins(),
            };
        }

        let selection = match resolve_selection(selection_id, self.display.rows()) {
            Ok(selection) => selection,
            Err(e) => {
                debug!("{}; plotting the average this tick", e);
                Selection::Average
            }
        };

        let filled = match selection {
            Selection::Average => average_rows(&self.display, &mut self.line),
            Selection::Combination(index) => match self.display.row(index) {
                Some(row) => {
                    self.line.clear();
                    self.line.extend_from_slice(row);
                    true
                }
                None => false,
            },
        };

        if !filled {
            return TickOutcome::NoData;
        }
        if self.line.iter().any(|v| !v.is_finite()) {
            return TickOutcome::Malformed;
        }

        plot.clear();
        plot.plot_line(axis.start, axis.step, &self.line);
        TickOutcome::Plotted(selection)
    }
}

/// Elementwise mean of all rows into `out`. Returns false for a matrix with
/// no rows, leaving `out` empty.
pub fn average_rows(matrix: &CoherenceMatrix, out: &mut Vec<f64>) -> bool {
    out.clear();
    if matrix.rows() == 0 {
        return false;
    }
    out.resize(matrix.bins(), 0.0);
    for row in matrix.iter_rows() {
        for (acc, &v) in out.iter_mut().zip(row) {
            *acc += v;
        }
    }
    let count = matrix.rows() as f64;
    for acc in out.iter_mut() {
        *acc /= count;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::snapshot_channel;

    #[derive(Default)]
    struct RecordingPlot {
        clears: usize,
        lines: Vec<(f64, f64, Vec<f64>)>,
    }

    impl PlotSurface for RecordingPlot {
        fn clear(&mut self) {
            self.clears += 1;
        }

        fn plot_line(&mut self, x_start: f64, x_step: f64, values: &[f64]) {
            self.lines.push((x_start, x_step, values.to_vec()));
        }
    }

    const AXIS: FrequencyAxis = FrequencyAxis { start: 4.0, end: 5.0, step: 1.0 };

    fn two_combinations() -> CoherenceMatrix {
        CoherenceMatrix::from_rows(&[vec![0.02, 0.04], vec![0.04, 0.08]]).unwrap()
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn average_of_two_rows() {
        let m = CoherenceMatrix::from_rows(&[vec![2.0, 4.0], vec![4.0, 8.0]]).unwrap();
        let mut out = Vec::new();
        assert!(average_rows(&m, &mut out));
        assert_eq!(out, vec![3.0, 6.0]);
    }

    #[test]
    fn average_of_no_rows_reports_no_data() {
        let mut out = vec![1.0];
        assert!(!average_rows(&CoherenceMatrix::zeros(0, 4), &mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn nothing_published_means_no_plot() {
        let (_writer, mut reader) = snapshot_channel(2, 2);
        let mut controller = RefreshController::new();
        let mut plot = RecordingPlot::default();
        assert_eq!(controller.tick(&mut reader, 1, 2, AXIS, &mut plot), TickOutcome::NoData);
        assert_eq!(plot.clears, 0);
        assert!(controller.display().is_none());
    }

    #[test]
    fn average_selection_scales_to_percent() {
        let (mut writer, mut reader) = snapshot_channel(2, 2);
        writer.publish(&two_combinations());
        let mut controller = RefreshController::new();
        let mut plot = RecordingPlot::default();

        let outcome = controller.tick(&mut reader, 1, 2, AXIS, &mut plot);
        assert_eq!(outcome, TickOutcome::Plotted(Selection::Average));
        assert_eq!(plot.clears, 1);
        let (x_start, x_step, values) = &plot.lines[0];
        assert_eq!((*x_start, *x_step), (4.0, 1.0));
        assert_close(values, &[3.0, 6.0]);
    }

    #[test]
    fn combination_selection_extracts_row() {
        let (mut writer, mut reader) = snapshot_channel(2, 2);
        writer.publish(&two_combinations());
        let mut controller = RefreshController::new();
        let mut plot = RecordingPlot::default();

        let outcome = controller.tick(&mut reader, 3, 2, AXIS, &mut plot);
        assert_eq!(outcome, TickOutcome::Plotted(Selection::Combination(1)));
        assert_close(&plot.lines[0].2, &[4.0, 8.0]);
    }

    #[test]
    fn stale_selection_degrades_to_average() {
        let (mut writer, mut reader) = snapshot_channel(2, 2);
        writer.publish(&two_combinations());
        let mut controller = RefreshController::new();
        let mut plot = RecordingPlot::default();

        let outcome = controller.tick(&mut reader, 7, 2, AXIS, &mut plot);
        assert_eq!(outcome, TickOutcome::Plotted(Selection::Average));
        assert_close(&plot.lines[0].2, &[3.0, 6.0]);
    }

    #[test]
    fn shape_mismatch_keeps_previous_plot() {
        let (mut writer, mut reader) = snapshot_channel(2, 2);
        writer.publish(&two_combinations());
        let mut controller = RefreshController::new();
        let mut plot = RecordingPlot::default();
        controller.tick(&mut reader, 1, 2, AXIS, &mut plot);

        // Grouping changed to three combinations before a new matrix arrived.
        let outcome = controller.tick(&mut reader, 1, 3, AXIS, &mut plot);
        assert_eq!(outcome, TickOutcome::ShapeMismatch { expected: 3, actual: 2 });
        assert_eq!(plot.clears, 1);
        assert_eq!(plot.lines.len(), 1);
        assert!(controller.display().is_some());
    }

    #[test]
    fn previous_display_reused_without_update() {
        let (mut writer, mut reader) = snapshot_channel(2, 2);
        writer.publish(&two_combinations());
        let mut controller = RefreshController::new();
        let mut plot = RecordingPlot::default();
        controller.tick(&mut reader, 2, 2, AXIS, &mut plot);
        controller.tick(&mut reader, 2, 2, AXIS, &mut plot);
        assert_eq!(plot.lines.len(), 2);
        // Scaling happens once per pulled matrix, not once per tick.
        assert_close(&plot.lines[1].2, &[2.0, 4.0]);
    }

    #[test]
    fn matrix_for_another_band_is_not_plotted() {
        let (mut writer, mut reader) = snapshot_channel(1, 40);
        writer.publish(&CoherenceMatrix::zeros(1, 40));
        let mut controller = RefreshController::new();
        let mut plot = RecordingPlot::default();

        let narrow = FrequencyAxis { start: 1.0, end: 10.0, step: 1.0 };
        let outcome = controller.tick(&mut reader, 1, 1, narrow, &mut plot);
        assert_eq!(outcome, TickOutcome::BinMismatch { expected: 10, actual: 40 });
        assert_eq!(plot.clears, 0);
        assert!(plot.lines.is_empty());
    }

    #[test]
    fn invalidated_display_waits_for_next_matrix() {
        let (mut writer, mut reader) = snapshot_channel(2, 2);
        writer.publish(&two_combinations());
        let mut controller = RefreshController::new();
        let mut plot = RecordingPlot::default();
        controller.tick(&mut reader, 1, 2, AXIS, &mut plot);

        controller.invalidate();
        assert!(controller.display().is_none());
        assert_eq!(controller.tick(&mut reader, 1, 2, AXIS, &mut plot), TickOutcome::NoData);
        assert_eq!(plot.lines.len(), 1);

        writer.publish(&two_combinations());
        assert_eq!(
            controller.tick(&mut reader, 1, 2, AXIS, &mut plot),
            TickOutcome::Plotted(Selection::Average)
        );
    }

    #[test]
    fn non_finite_values_are_not_plotted() {
        let (mut writer, mut reader) = snapshot_channel(1, 2);
        writer.publish(&CoherenceMatrix::from_rows(&[vec![f64::NAN, 0.5]]).unwrap());
        let mut controller = RefreshController::new();
        let mut plot = RecordingPlot::default();
        assert_eq!(controller.tick(&mut reader, 2, 1, AXIS, &mut plot), TickOutcome::Malformed);
        assert!(plot.lines.is_empty());
    }
}

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::backend::{FrequencyAxis, Parameter, ProcessingBackend};
use crate::channel_groups::{ChannelSet, Group};
use crate::combinations::{CombinationList, SelectionEntry, AVERAGE_SELECTION_ID};
use crate::numeric_field::NumericField;
use crate::plot::PlotSurface;
use crate::presets::PanelPreset;
use crate::refresh::{RefreshController, TickOutcome};
use crate::snapshot::SnapshotReader;
use crate::utils::{
    DEFAULT_ALPHA, DEFAULT_ARTIFACT_THRESHOLD, DEFAULT_FREQ_END, DEFAULT_FREQ_START,
    FREQ_FALLBACK_HZ, PLOT_Y_MAX,
};

/// How successive trials are weighted into the coherence estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weighting {
    Linear,
    Exponential,
}

/// Read-only indicators for the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelStatus {
    pub ready: bool,
    pub trials_processed: usize,
    pub artifacts_discarded: usize,
    /// Show the "UPDATE IF ARTIFACTS" notice.
    pub show_artifact_notice: bool,
    pub locked: bool,
}

/// Handler logic of the coherence panel.
///
/// Owns the grouping, the derived combination list, the stored selection and
/// the numeric fields, and drives the backend and the refresh controller in
/// response to user actions and UI ticks. Handlers return whether they
/// changed anything; while an acquisition is running the grouping, reset and
/// weighting handlers reject every change.
pub struct CoherencePanel<B: ProcessingBackend> {
    backend: B,
    reader: SnapshotReader,
    channels: ChannelSet,
    active: Vec<usize>,
    combinations: CombinationList,
    selection_id: usize,
    weighting: Weighting,
    alpha: NumericField<f32>,
    artifact_threshold: NumericField<f32>,
    freq_start: NumericField<i32>,
    freq_end: NumericField<i32>,
    locked: bool,
    refresh: RefreshController,
    plotted_band: Option<(f64, f64)>,
}

impl<B: ProcessingBackend> CoherencePanel<B> {
    pub fn new(backend: B, reader: SnapshotReader) -> Self {
        let active = backend.active_channels();
        let (group1, group2) = backend.group_channels();
        let mut channels = ChannelSet::from_groups(group1, group2);
        let pruned = channels.reconcile(&active);
        let weighting = if backend.alpha() != 0.0 {
            Weighting::Exponential
        } else {
            Weighting::Linear
        };

        let mut panel = CoherencePanel {
            backend,
            reader,
            combinations: CombinationList::from_channels(&channels),
            channels,
            active,
            selection_id: AVERAGE_SELECTION_ID,
            weighting,
            alpha: NumericField::new(DEFAULT_ALPHA, DEFAULT_ALPHA, 0.0, f32::MAX),
            artifact_threshold: NumericField::new(
                DEFAULT_ARTIFACT_THRESHOLD,
                DEFAULT_ARTIFACT_THRESHOLD,
                0.0,
                f32::MAX,
            ),
            freq_start: NumericField::new(DEFAULT_FREQ_START, FREQ_FALLBACK_HZ, 0, i32::MAX),
            freq_end: NumericField::new(DEFAULT_FREQ_END, FREQ_FALLBACK_HZ, 0, i32::MAX),
            locked: false,
            refresh: RefreshController::new(),
            plotted_band: None,
        };
        if weighting == Weighting::Exponential {
            let alpha = panel.backend.alpha();
            panel.alpha.set_value(alpha);
        }
        if pruned {
            panel.groups_changed();
        }
        panel
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn active_channels(&self) -> &[usize] {
        &self.active
    }

    pub fn combinations(&self) -> &CombinationList {
        &self.combinations
    }

    pub fn selection_entries(&self) -> Vec<SelectionEntry> {
        self.combinations.entries()
    }

    pub fn selection_id(&self) -> usize {
        self.selection_id
    }

    pub fn weighting(&self) -> Weighting {
        self.weighting
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn alpha_field(&self) -> &NumericField<f32> {
        &self.alpha
    }

    pub fn alpha_field_mut(&mut self) -> &mut NumericField<f32> {
        &mut self.alpha
    }

    pub fn artifact_field(&self) -> &NumericField<f32> {
        &self.artifact_threshold
    }

    pub fn artifact_field_mut(&mut self) -> &mut NumericField<f32> {
        &mut self.artifact_threshold
    }

    pub fn freq_start_field(&self) -> &NumericField<i32> {
        &self.freq_start
    }

    pub fn freq_start_field_mut(&mut self) -> &mut NumericField<i32> {
        &mut self.freq_start
    }

    pub fn freq_end_field(&self) -> &NumericField<i32> {
        &self.freq_end
    }

    pub fn freq_end_field_mut(&mut self) -> &mut NumericField<i32> {
        &mut self.freq_end
    }

    // ------- Grouping ------- //

    pub fn toggle_channel(&mut self, channel: usize, group: Group) -> bool {
        if self.locked || !self.active.contains(&channel) {
            return false;
        }
        self.channels.toggle(channel, group);
        self.groups_changed();
        true
    }

    pub fn clear_groups(&mut self) -> bool {
        if self.locked {
            return false;
        }
        self.channels.clear();
        self.groups_changed();
        true
    }

    pub fn default_groups(&mut self) -> bool {
        if self.locked {
            return false;
        }
        self.channels.default_split(&self.active);
        self.groups_changed();
        true
    }

    /// Host "update": picks up channel additions/removals and the backend's
    /// weighting and alpha.
    pub fn sync_from_backend(&mut self) -> bool {
        let changed = self.channels_changed();
        let alpha = self.backend.alpha();
        if alpha != 0.0 {
            self.weighting = Weighting::Exponential;
            self.alpha.set_value(alpha);
        }
        changed
    }

    /// Reconciles the groups with the backend's active channels. Membership
    /// changes are pushed to the backend; the combination list is rebuilt
    /// either way.
    pub fn channels_changed(&mut self) -> bool {
        self.active = self.backend.active_channels();
        let changed = self.channels.reconcile(&self.active);
        if changed {
            self.groups_changed();
        } else {
            self.rebuild_combinations();
        }
        changed
    }

    fn groups_changed(&mut self) {
        self.backend.update_ready(false);
        self.backend
            .update_groups(self.channels.group1(), self.channels.group2());
        self.rebuild_combinations();
    }

    fn rebuild_combinations(&mut self) {
        self.combinations.rebuild(&self.channels);
        self.selection_id = AVERAGE_SELECTION_ID;
        debug!("{} combinations after regrouping", self.combinations.len());
    }

    // ------- Selection ------- //

    /// Stores the picked id as-is; ids that do not resolve are plotted as the
    /// average until they do.
    pub fn select_combination(&mut self, id: usize) -> bool {
        if id == self.selection_id {
            return false;
        }
        self.selection_id = id;
        true
    }

    // ------- Weighting, thresholds, band ------- //

    pub fn set_weighting(&mut self, weighting: Weighting) -> bool {
        if self.locked {
            return false;
        }
        self.backend.update_ready(false);
        self.weighting = weighting;
        match weighting {
            Weighting::Linear => self.backend.update_alpha(0.0),
            Weighting::Exponential => self.backend.update_alpha(self.alpha.value()),
        }
        true
    }

    pub fn edit_alpha(&mut self, text: &str) -> bool {
        if self.locked {
            self.alpha.revert_text();
            return false;
        }
        self.backend.update_ready(false);
        match self.alpha.commit(text) {
            Some(alpha) if self.weighting == Weighting::Exponential => {
                self.backend.update_alpha(alpha);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn edit_artifact_threshold(&mut self, text: &str) -> bool {
        match self.artifact_threshold.commit(text) {
            Some(threshold) => {
                self.backend
                    .set_parameter(Parameter::ArtifactThreshold, threshold);
                true
            }
            None => false,
        }
    }

    pub fn edit_freq_start(&mut self, text: &str) -> bool {
        self.backend.update_ready(false);
        match self.freq_start.commit(text) {
            Some(freq) => {
                self.backend.set_parameter(Parameter::StartFreq, freq as f32);
                true
            }
            None => false,
        }
    }

    pub fn edit_freq_end(&mut self, text: &str) -> bool {
        self.backend.update_ready(false);
        match self.freq_end.commit(text) {
            Some(freq) => {
                self.backend.set_parameter(Parameter::EndFreq, freq as f32);
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) -> bool {
        if self.locked {
            return false;
        }
        info!("Resetting coherence algorithm");
        self.backend.reset_algorithm();
        true
    }

    // ------- Acquisition lock ------- //

    pub fn on_animation_start(&mut self) {
        debug!("Acquisition started; grouping controls locked");
        self.locked = true;
    }

    pub fn on_animation_end(&mut self) {
        debug!("Acquisition ended; grouping controls unlocked");
        self.locked = false;
    }

    // ------- Refresh ------- //

    /// One UI tick: follows band changes on the plot range, then plots the
    /// selected combination (or the average) from the newest snapshot. A
    /// band change drops the held matrix, since its bins belong to the old
    /// axis.
    pub fn refresh(&mut self, plot: &mut dyn PlotSurface) -> TickOutcome {
        let axis: FrequencyAxis = self.backend.frequency_axis();
        let band = Some((axis.start, axis.end));
        if self.plotted_band != band {
            if self.plotted_band.is_some() {
                self.refresh.invalidate();
            }
            plot.set_range(axis.start, axis.end, 0.0, PLOT_Y_MAX);
            self.plotted_band = band;
        }
        self.refresh.tick(
            &mut self.reader,
            self.selection_id,
            self.combinations.len(),
            axis,
            plot,
        )
    }

    pub fn status(&self) -> PanelStatus {
        let artifacts = self.backend.artifacts_discarded();
        PanelStatus {
            ready: self.backend.is_ready(),
            trials_processed: self.backend.trials_processed(),
            artifacts_discarded: artifacts,
            show_artifact_notice: artifacts > 0,
            locked: self.locked,
        }
    }

    // ------- Presets ------- //

    pub fn preset(&self) -> PanelPreset {
        PanelPreset {
            weighting: self.weighting,
            alpha: self.alpha.value(),
            artifact_threshold: self.artifact_threshold.value(),
            freq_start: self.freq_start.value(),
            freq_end: self.freq_end.value(),
            group1: self.channels.group1().to_vec(),
            group2: self.channels.group2().to_vec(),
        }
    }

    /// Applies a saved preset. Channels the input no longer provides are
    /// dropped from its groups. The backend still needs a reset afterwards.
    pub fn apply_preset(&mut self, preset: &PanelPreset) -> bool {
        if self.locked {
            return false;
        }
        let alpha = self.alpha.set_value(preset.alpha);
        let threshold = self.artifact_threshold.set_value(preset.artifact_threshold);
        let start = self.freq_start.set_value(preset.freq_start);
        let end = self.freq_end.set_value(preset.freq_end);

        self.weighting = preset.weighting;
        self.backend.update_alpha(match preset.weighting {
            Weighting::Linear => 0.0,
            Weighting::Exponential => alpha,
        });
        self.backend
            .set_parameter(Parameter::ArtifactThreshold, threshold);
        self.backend.set_parameter(Parameter::StartFreq, start as f32);
        self.backend.set_parameter(Parameter::EndFreq, end as f32);

        self.channels = ChannelSet::from_groups(preset.group1.iter().copied(), preset.group2.iter().copied());
        self.channels.reconcile(&self.active);
        self.groups_changed();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{snapshot_channel, CoherenceMatrix, SnapshotWriter};
    use crate::combinations::Selection;

    #[derive(Default)]
    struct MockBackend {
        active: Vec<usize>,
        group1: Vec<usize>,
        group2: Vec<usize>,
        alpha: f32,
        ready: bool,
        resets: usize,
        group_updates: usize,
        parameters: Vec<(Parameter, f32)>,
        artifacts: usize,
        axis: FrequencyAxis,
    }

    impl ProcessingBackend for MockBackend {
        fn active_channels(&self) -> Vec<usize> {
            self.active.clone()
        }
        fn group_channels(&self) -> (Vec<usize>, Vec<usize>) {
            (self.group1.clone(), self.group2.clone())
        }
        fn update_groups(&mut self, group1: &[usize], group2: &[usize]) {
            self.group1 = group1.to_vec();
            self.group2 = group2.to_vec();
            self.group_updates += 1;
        }
        fn update_alpha(&mut self, alpha: f32) {
            self.alpha = alpha;
        }
        fn alpha(&self) -> f32 {
            self.alpha
        }
        fn set_parameter(&mut self, parameter: Parameter, value: f32) {
            self.parameters.push((parameter, value));
        }
        fn reset_algorithm(&mut self) {
            self.resets += 1;
            self.ready = true;
        }
        fn update_ready(&mut self, ready: bool) {
            self.ready = ready;
        }
        fn is_ready(&self) -> bool {
            self.ready
        }
        fn trials_processed(&self) -> usize {
            0
        }
        fn artifacts_discarded(&self) -> usize {
            self.artifacts
        }
        fn frequency_axis(&self) -> FrequencyAxis {
            self.axis
        }
    }

    #[derive(Default)]
    struct RecordingPlot {
        ranges: Vec<(f64, f64)>,
        lines: Vec<Vec<f64>>,
    }

    impl PlotSurface for RecordingPlot {
        fn clear(&mut self) {}
        fn plot_line(&mut self, _x_start: f64, _x_step: f64, values: &[f64]) {
            self.lines.push(values.to_vec());
        }
        fn set_range(&mut self, x_min: f64, x_max: f64, _y_min: f64, _y_max: f64) {
            self.ranges.push((x_min, x_max));
        }
    }

    fn panel(active: usize, group1: Vec<usize>, group2: Vec<usize>) -> (CoherencePanel<MockBackend>, SnapshotWriter) {
        let backend = MockBackend {
            active: (0..active).collect(),
            group1,
            group2,
            ready: true,
            axis: FrequencyAxis { start: 1.0, end: 2.0, step: 1.0 },
            ..MockBackend::default()
        };
        let (writer, reader) = snapshot_channel(0, 2);
        (CoherencePanel::new(backend, reader), writer)
    }

    #[test]
    fn starts_from_backend_groups() {
        let (panel, _writer) = panel(4, vec![0, 1], vec![2, 3]);
        assert_eq!(panel.channels().group1(), &[0, 1]);
        assert_eq!(panel.combinations().len(), 4);
        assert_eq!(panel.selection_id(), AVERAGE_SELECTION_ID);
        assert_eq!(panel.weighting(), Weighting::Linear);
        assert!(panel.status().ready);
    }

    #[test]
    fn toggle_pushes_groups_and_clears_ready() {
        let (mut panel, _writer) = panel(4, vec![], vec![]);
        assert!(panel.toggle_channel(1, Group::One));
        assert!(panel.toggle_channel(3, Group::Two));
        assert_eq!(panel.backend().group1, vec![1]);
        assert_eq!(panel.backend().group2, vec![3]);
        assert!(!panel.status().ready);
        assert_eq!(panel.selection_entries()[1].label, "2 x 4");

        // Channels the input does not provide have no buttons.
        assert!(!panel.toggle_channel(9, Group::One));
    }

    #[test]
    fn removing_an_active_channel_prunes_groups() {
        let (mut panel, _writer) = panel(4, vec![1, 3], vec![2]);
        panel.select_combination(3);
        panel.backend_mut().active = vec![0, 1, 2];
        assert!(panel.channels_changed());
        assert_eq!(panel.channels().group1(), &[1]);
        assert_eq!(panel.channels().group2(), &[2]);
        assert_eq!(panel.combinations().len(), 1);
        assert_eq!(panel.selection_id(), AVERAGE_SELECTION_ID);
        assert_eq!(panel.backend().group1, vec![1]);
    }

    #[test]
    fn clear_and_default_groups() {
        let (mut panel, _writer) = panel(5, vec![0], vec![1]);
        assert!(panel.clear_groups());
        assert!(panel.combinations().is_empty());
        assert!(panel.default_groups());
        assert_eq!(panel.channels().group1(), &[0, 1]);
        assert_eq!(panel.channels().group2(), &[2, 3, 4]);
        assert_eq!(panel.combinations().len(), 6);
    }

    #[test]
    fn acquisition_lock_rejects_grouping_and_reset() {
        let (mut panel, _writer) = panel(4, vec![0], vec![1]);
        panel.on_animation_start();
        assert!(!panel.toggle_channel(2, Group::One));
        assert!(!panel.clear_groups());
        assert!(!panel.default_groups());
        assert!(!panel.reset());
        assert!(!panel.set_weighting(Weighting::Exponential));
        assert!(!panel.edit_alpha("0.9"));
        assert_eq!(panel.alpha_field().value(), DEFAULT_ALPHA);
        assert_eq!(panel.backend().resets, 0);
        assert!(panel.status().locked);

        panel.on_animation_end();
        assert!(panel.toggle_channel(2, Group::One));
        assert!(panel.reset());
        assert_eq!(panel.backend().resets, 1);
    }

    #[test]
    fn weighting_switches_alpha() {
        let (mut panel, _writer) = panel(2, vec![0], vec![1]);
        assert!(panel.edit_alpha("0.5"));
        assert_eq!(panel.backend().alpha, 0.0); // still linear
        panel.set_weighting(Weighting::Exponential);
        assert_eq!(panel.backend().alpha, 0.5);
        assert!(panel.edit_alpha("0.7"));
        assert_eq!(panel.backend().alpha, 0.7);
        panel.set_weighting(Weighting::Linear);
        assert_eq!(panel.backend().alpha, 0.0);
    }

    #[test]
    fn sync_picks_up_exponential_backend() {
        let (mut panel, _writer) = panel(2, vec![0], vec![1]);
        panel.backend_mut().alpha = 0.4;
        panel.sync_from_backend();
        assert_eq!(panel.weighting(), Weighting::Exponential);
        assert_eq!(panel.alpha_field().value(), 0.4);
        assert_eq!(panel.alpha_field().text(), "0.4");
    }

    #[test]
    fn malformed_artifact_threshold_is_reverted() {
        let (mut panel, _writer) = panel(2, vec![0], vec![1]);
        assert!(!panel.edit_artifact_threshold("abc"));
        assert_eq!(panel.artifact_field().value(), 3000.0);
        assert_eq!(panel.artifact_field().text(), "3000");
        assert!(panel.backend().parameters.is_empty());

        assert!(panel.edit_artifact_threshold("1500"));
        assert_eq!(panel.backend().parameters, vec![(Parameter::ArtifactThreshold, 1500.0)]);
        // Threshold edits do not invalidate the estimate.
        assert!(panel.status().ready);
    }

    #[test]
    fn band_edits_clear_ready() {
        let (mut panel, _writer) = panel(2, vec![0], vec![1]);
        assert!(!panel.edit_freq_start("x"));
        assert_eq!(panel.freq_start_field().text(), "8");
        assert!(!panel.status().ready);
        assert!(panel.edit_freq_end("30"));
        assert_eq!(panel.backend().parameters, vec![(Parameter::EndFreq, 30.0)]);
    }

    #[test]
    fn refresh_plots_selected_combination() {
        let (mut panel, mut writer) = panel(4, vec![0], vec![1, 2]);
        let mut plot = RecordingPlot::default();
        assert_eq!(panel.refresh(&mut plot), TickOutcome::NoData);
        assert_eq!(plot.ranges, vec![(1.0, 2.0)]);

        writer.publish(&CoherenceMatrix::from_rows(&[vec![0.5, 0.5], vec![0.25, 0.75]]).unwrap());
        panel.select_combination(3);
        assert_eq!(panel.refresh(&mut plot), TickOutcome::Plotted(Selection::Combination(1)));
        assert_eq!(plot.lines.last().unwrap(), &vec![25.0, 75.0]);
        assert_eq!(plot.ranges.len(), 1);

        // Regrouping before the next snapshot: rows no longer match.
        panel.toggle_channel(3, Group::Two);
        assert_eq!(
            panel.refresh(&mut plot),
            TickOutcome::ShapeMismatch { expected: 3, actual: 2 }
        );
        assert_eq!(plot.lines.len(), 1);
    }

    #[test]
    fn band_change_drops_matrix_for_old_axis() {
        let (mut panel, mut writer) = panel(2, vec![0], vec![1]);
        panel.backend_mut().axis = FrequencyAxis { start: 1.0, end: 40.0, step: 1.0 };
        let mut plot = RecordingPlot::default();
        writer.publish(&CoherenceMatrix::zeros(1, 40));
        assert_eq!(panel.refresh(&mut plot), TickOutcome::Plotted(Selection::Average));

        // Reset narrows the band before the processing side catches up.
        assert!(panel.edit_freq_end("10"));
        panel.reset();
        panel.backend_mut().axis = FrequencyAxis { start: 1.0, end: 10.0, step: 1.0 };
        assert_eq!(panel.refresh(&mut plot), TickOutcome::NoData);
        assert_eq!(plot.ranges.last(), Some(&(1.0, 10.0)));
        assert_eq!(plot.lines.len(), 1);

        // A late matrix for the old band is still refused.
        writer.publish(&CoherenceMatrix::zeros(1, 40));
        assert_eq!(
            panel.refresh(&mut plot),
            TickOutcome::BinMismatch { expected: 10, actual: 40 }
        );
        assert_eq!(plot.lines.len(), 1);

        writer.publish(&CoherenceMatrix::zeros(1, 10));
        assert_eq!(panel.refresh(&mut plot), TickOutcome::Plotted(Selection::Average));
        assert_eq!(plot.lines.last().map(Vec::len), Some(10));
    }

    #[test]
    fn default_groups_only_use_active_channels() {
        let (mut panel, _writer) = panel(5, vec![], vec![]);
        panel.backend_mut().active = vec![0, 1, 3, 4];
        panel.channels_changed();
        assert!(panel.default_groups());
        assert_eq!(panel.channels().group1(), &[0, 1]);
        assert_eq!(panel.channels().group2(), &[3, 4]);
        assert_eq!(panel.backend().group2, vec![3, 4]);
    }

    #[test]
    fn artifact_notice_follows_backend_counter() {
        let (mut panel, _writer) = panel(2, vec![0], vec![1]);
        assert!(!panel.status().show_artifact_notice);
        panel.backend_mut().artifacts = 2;
        assert!(panel.status().show_artifact_notice);
    }

    #[test]
    fn preset_round_trip_through_panel() {
        let (mut panel, _writer) = panel(6, vec![0], vec![1]);
        let preset = PanelPreset {
            weighting: Weighting::Exponential,
            alpha: 0.6,
            artifact_threshold: 2500.0,
            freq_start: 4,
            freq_end: 12,
            group1: vec![0, 2],
            group2: vec![4, 9],
        };
        assert!(panel.apply_preset(&preset));
        assert_eq!(panel.backend().alpha, 0.6);
        assert_eq!(panel.channels().group2(), &[4]);

        let captured = panel.preset();
        assert_eq!(captured.group2, vec![4]);
        assert_eq!(captured.freq_end, 12);
        assert_eq!(captured.weighting, Weighting::Exponential);
    }
}

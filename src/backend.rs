use serde::{Deserialize, Serialize};

/// Named parameters the processing backend accepts through
/// [`ProcessingBackend::set_parameter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parameter {
    ArtifactThreshold,
    StartFreq,
    EndFreq,
}

/// Frequency axis of the coherence rows currently being produced.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrequencyAxis {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl FrequencyAxis {
    pub fn bins(&self) -> usize {
        if self.step <= 0.0 || self.end < self.start {
            return 0;
        }
        ((self.end - self.start) / self.step).round() as usize + 1
    }
}

/// The processing side the panel drives. Grouping, weighting and band
/// changes go through here; the coherence rows themselves arrive over a
/// [`crate::snapshot::SnapshotReader`].
pub trait ProcessingBackend {
    /// Indices of the channels the input currently provides.
    fn active_channels(&self) -> Vec<usize>;

    /// Groups the backend was last told about.
    fn group_channels(&self) -> (Vec<usize>, Vec<usize>);

    fn update_groups(&mut self, group1: &[usize], group2: &[usize]);

    /// 0 selects linear weighting; anything else exponential weighting.
    fn update_alpha(&mut self, alpha: f32);

    fn alpha(&self) -> f32;

    fn set_parameter(&mut self, parameter: Parameter, value: f32);

    /// Clears accumulated state and applies staged settings.
    fn reset_algorithm(&mut self);

    fn update_ready(&mut self, ready: bool);

    fn is_ready(&self) -> bool;

    fn trials_processed(&self) -> usize;

    fn artifacts_discarded(&self) -> usize;

    fn frequency_axis(&self) -> FrequencyAxis;
}

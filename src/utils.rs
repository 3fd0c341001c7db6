use log::debug;

pub const DEFAULT_SAMPLE_RATE: f32 = 1000.0;  // Hz, matches typical acquisition boards
pub const DEFAULT_NUM_CHANNELS: usize = 8;
pub const MAX_CHANNELS: usize = 64;
pub const DEFAULT_REFRESH_MS: u64 = 50;  // UI tick period
pub const BLOCKS_PER_SECOND: usize = 50;  // Producer delivers 20 ms blocks

// Defaults the numeric fields revert to when their text does not parse.
pub const DEFAULT_ALPHA: f32 = 0.3;
pub const DEFAULT_ARTIFACT_THRESHOLD: f32 = 3000.0;
pub const FREQ_FALLBACK_HZ: i32 = 8;

pub const DEFAULT_FREQ_START: i32 = 1;
pub const DEFAULT_FREQ_END: i32 = 40;

/// Coherence is stored in [0, 1] and displayed as a percentage.
pub const PERCENT_SCALE: f64 = 100.0;
pub const PLOT_Y_MAX: f64 = 100.0;

/// Number of samples in one trial, the unit the coherence estimate is
/// accumulated over. One second of data gives a 1 Hz bin spacing.
pub fn trial_length_for(sample_rate: f32) -> usize {
    let length = (sample_rate.max(1.0).round() as usize).max(BLOCKS_PER_SECOND);
    debug!("Trial length for {} Hz: {} samples", sample_rate, length);
    length
}

/// Frames delivered per producer block at the given sample rate.
pub fn block_frames_for(sample_rate: f32) -> usize {
    (sample_rate.max(1.0) as usize / BLOCKS_PER_SECOND).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_length_gives_one_hertz_bins() {
        assert_eq!(trial_length_for(1000.0), 1000);
        assert_eq!(trial_length_for(0.0), BLOCKS_PER_SECOND);
    }

    #[test]
    fn block_frames_never_zero() {
        assert_eq!(block_frames_for(1000.0), 20);
        assert_eq!(block_frames_for(10.0), 1);
    }
}

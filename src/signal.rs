use std::f64::consts::PI;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::utils::{DEFAULT_NUM_CHANNELS, DEFAULT_SAMPLE_RATE};

/// Size of an injected artifact step, well above the default threshold.
pub const ARTIFACT_AMPLITUDE: f32 = 5000.0;

/// A sinusoid shared across channels, in input units (microvolts).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Component {
    pub freq: f64,
    pub amplitude: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalConfig {
    pub sample_rate: f32,
    pub num_channels: usize,
    pub components: Vec<Component>,
    pub noise_amplitude: f64,
    /// Chance per block and channel of a step artifact.
    pub artifact_rate: f64,
    pub seed: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            num_channels: DEFAULT_NUM_CHANNELS,
            components: vec![
                Component { freq: 6.0, amplitude: 40.0 },   // theta
                Component { freq: 10.0, amplitude: 60.0 },  // alpha
                Component { freq: 22.0, amplitude: 25.0 },  // beta
            ],
            noise_amplitude: 30.0,
            artifact_rate: 0.0,
            seed: 0x5eed,
        }
    }
}

/// Synthetic multichannel source. Every channel mixes the shared components
/// with its own gain and phase per component and adds independent noise, so
/// channel pairs are coherent at the component frequencies to differing
/// degrees.
pub struct SignalGenerator {
    config: SignalConfig,
    gains: Vec<Vec<f64>>,   // [channel][component]
    phases: Vec<Vec<f64>>,  // [channel][component]
    sample_index: u64,
    rng: StdRng,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig) -> Self {
        let num_components = config.components.len();
        let gains = (0..config.num_channels)
            .map(|ch| {
                (0..num_components)
                    .map(|i| ((ch + i) % 3 + 1) as f64 / 3.0)
                    .collect()
            })
            .collect();
        let phases = (0..config.num_channels)
            .map(|ch| {
                (0..num_components)
                    .map(|i| (ch * (i + 1)) as f64 * PI / 7.0)
                    .collect()
            })
            .collect();
        let rng = StdRng::seed_from_u64(config.seed);

        debug!(
            "Signal generator: {} channels, {} components at {} Hz",
            config.num_channels, num_components, config.sample_rate
        );

        Self {
            config,
            gains,
            phases,
            sample_index: 0,
            rng,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.config.num_channels
    }

    pub fn sample_rate(&self) -> f32 {
        self.config.sample_rate
    }

    /// Writes the next `frames` samples of every channel into `out`, one
    /// vector per channel. Vectors are cleared and refilled in place.
    pub fn fill_block(&mut self, out: &mut Vec<Vec<f32>>, frames: usize) {
        out.resize_with(self.config.num_channels, Vec::new);
        let sample_rate = self.config.sample_rate as f64;

        for (ch, samples) in out.iter_mut().enumerate() {
            samples.clear();
            for frame in 0..frames {
                let time = (self.sample_index + frame as u64) as f64 / sample_rate;
                let mut value = 0.0;
                for (i, component) in self.config.components.iter().enumerate() {
                    let phase = 2.0 * PI * component.freq * time + self.phases[ch][i];
                    value += self.gains[ch][i] * component.amplitude * phase.sin();
                }
                if self.config.noise_amplitude > 0.0 {
                    value += self.rng.gen_range(-1.0..1.0) * self.config.noise_amplitude;
                }
                samples.push(value as f32);
            }

            if frames > 0 && self.config.artifact_rate > 0.0 && self.rng.gen::<f64>() < self.config.artifact_rate {
                let at = self.rng.gen_range(0..frames);
                for sample in samples[at..].iter_mut() {
                    *sample += ARTIFACT_AMPLITUDE;
                }
                debug!("Injected artifact on channel {} at frame {}", ch, at);
            }
        }

        self.sample_index += frames as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_every_channel() {
        let mut generator = SignalGenerator::new(SignalConfig {
            num_channels: 3,
            ..SignalConfig::default()
        });
        let mut block = Vec::new();
        generator.fill_block(&mut block, 20);
        assert_eq!(block.len(), 3);
        assert!(block.iter().all(|ch| ch.len() == 20));
        assert!(block.iter().all(|ch| ch.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn noise_free_signal_is_deterministic_and_bounded() {
        let config = SignalConfig {
            num_channels: 2,
            noise_amplitude: 0.0,
            ..SignalConfig::default()
        };
        let bound: f64 = config.components.iter().map(|c| c.amplitude).sum();
        let mut a = SignalGenerator::new(config.clone());
        let mut b = SignalGenerator::new(config);
        let (mut block_a, mut block_b) = (Vec::new(), Vec::new());
        a.fill_block(&mut block_a, 100);
        b.fill_block(&mut block_b, 100);
        assert_eq!(block_a, block_b);
        assert!(block_a.iter().flatten().all(|&v| (v as f64).abs() <= bound + 1e-3));
    }

    #[test]
    fn artifacts_produce_large_steps() {
        let mut generator = SignalGenerator::new(SignalConfig {
            num_channels: 1,
            noise_amplitude: 0.0,
            artifact_rate: 1.0,
            ..SignalConfig::default()
        });
        let mut block = Vec::new();
        generator.fill_block(&mut block, 50);
        let max_step = block[0]
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        // A step at frame 0 shows up as an offset rather than a jump.
        assert!(max_step >= ARTIFACT_AMPLITUDE - 200.0 || block[0][0].abs() >= ARTIFACT_AMPLITUDE - 200.0);
    }
}

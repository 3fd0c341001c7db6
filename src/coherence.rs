use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use crate::backend::{FrequencyAxis, Parameter, ProcessingBackend};
use crate::combinations::derive_combinations;
use crate::signal::{SignalConfig, SignalGenerator};
use crate::snapshot::{snapshot_channel, SnapshotReader, SnapshotWriter};
use crate::utils::{
    block_frames_for, trial_length_for, DEFAULT_ARTIFACT_THRESHOLD, DEFAULT_FREQ_END,
    DEFAULT_FREQ_START,
};

const POWER_FLOOR: f64 = 1e-20;

/// Settings that only take effect on reset.
#[derive(Debug, Clone, PartialEq)]
pub struct CoherenceSettings {
    pub group1: Vec<usize>,
    pub group2: Vec<usize>,
    /// 0 for linear weighting, otherwise the exponential weighting rate.
    pub alpha: f32,
    pub freq_start: i32,
    pub freq_end: i32,
}

impl Default for CoherenceSettings {
    fn default() -> Self {
        Self {
            group1: Vec::new(),
            group2: Vec::new(),
            alpha: 0.0,
            freq_start: DEFAULT_FREQ_START,
            freq_end: DEFAULT_FREQ_END,
        }
    }
}

/// Inclusive FFT bin range covering the requested band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub first_bin: usize,
    pub last_bin: usize,
}

impl Band {
    /// Snaps `[freq_start, freq_end]` Hz onto the bins of a `trial_length`
    /// point FFT, staying within Nyquist and never ending before it starts.
    pub fn new(freq_start: i32, freq_end: i32, sample_rate: f32, trial_length: usize) -> Self {
        let step = bin_step(sample_rate, trial_length);
        let nyquist_bin = trial_length / 2;
        let first_bin = ((freq_start.max(0) as f64 / step).ceil() as usize).min(nyquist_bin);
        let last_bin = ((freq_end.max(0) as f64 / step).floor() as usize)
            .min(nyquist_bin)
            .max(first_bin);
        Self { first_bin, last_bin }
    }

    pub fn bins(&self) -> usize {
        self.last_bin - self.first_bin + 1
    }

    pub fn axis(&self, sample_rate: f32, trial_length: usize) -> FrequencyAxis {
        let step = bin_step(sample_rate, trial_length);
        FrequencyAxis {
            start: self.first_bin as f64 * step,
            end: self.last_bin as f64 * step,
            step,
        }
    }
}

fn bin_step(sample_rate: f32, trial_length: usize) -> f64 {
    sample_rate as f64 / trial_length.max(1) as f64
}

/// Weight given to the newest trial. Linear weighting is a running mean;
/// exponential weighting never drops below the running-mean weight so the
/// first trials still average.
pub fn trial_weight(trials: usize, alpha: f32) -> f64 {
    let mean_weight = 1.0 / trials.max(1) as f64;
    if alpha <= 0.0 {
        mean_weight
    } else {
        mean_weight.max(1.0 - (-(alpha as f64)).exp())
    }
}

fn hann_window(len: usize) -> Vec<f32> {
    if len < 2 {
        return vec![1.0; len];
    }
    (0..len).map(|i| {
        let x = 2.0 * PI * i as f32 / (len - 1) as f32;
        0.5 * (1.0 - x.cos())
    }).collect()
}

/// Fixed-capacity sample store for one channel's current trial.
pub struct TrialBuffer {
    buffer: Vec<f32>,
    len: usize,
}

impl TrialBuffer {
    pub fn new(size: usize) -> Self {
        TrialBuffer {
            buffer: vec![0.0; size],
            len: 0,
        }
    }

    /// Appends a sample. Returns true once the buffer is full.
    pub fn push(&mut self, value: f32) -> bool {
        if self.len < self.buffer.len() {
            self.buffer[self.len] = value;
            self.len += 1;
        }
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn get(&self) -> &[f32] {
        &self.buffer[..self.len]
    }

    /// True if any two consecutive samples differ by at least `threshold`.
    pub fn has_artifact(&self, threshold: f32) -> bool {
        self.get().windows(2).any(|w| (w[1] - w[0]).abs() >= threshold)
    }
}

/// Result of completing a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    Accepted,
    Artifact,
}

/// Counters the processing thread publishes to the UI handle.
#[derive(Default)]
pub struct ProcessingStats {
    pub trials: AtomicUsize,
    pub artifacts: AtomicUsize,
}

impl ProcessingStats {
    fn reset(&self) {
        self.trials.store(0, Ordering::Relaxed);
        self.artifacts.store(0, Ordering::Relaxed);
    }
}

/// Estimates magnitude-squared coherence between every group 1 / group 2
/// channel pair, trial by trial, and publishes one row per combination.
pub struct CoherenceProcessor {
    settings: CoherenceSettings,
    sample_rate: f32,
    trial_length: usize,
    artifact_threshold: f32,
    band: Band,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    fft_input: Vec<f32>,
    fft_output: Vec<Complex<f32>>,
    // Grouped channels, ascending.
    tracked: Vec<usize>,
    // Per tracked channel; spectra hold band bins only.
    buffers: Vec<TrialBuffer>,
    spectra: Vec<Vec<Complex<f64>>>,
    auto_power: Vec<Vec<f64>>,
    // Per combination; pairs index into `tracked`.
    cross_power: Vec<Vec<Complex<f64>>>,
    pairs: Vec<(usize, usize)>,
    accepted: usize,
    stats: Arc<ProcessingStats>,
}

impl CoherenceProcessor {
    pub fn new(
        settings: CoherenceSettings,
        sample_rate: f32,
        trial_length: usize,
        artifact_threshold: f32,
        stats: Arc<ProcessingStats>,
    ) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(trial_length);
        let fft_input = fft.make_input_vec();
        let fft_output = fft.make_output_vec();

        let mut processor = CoherenceProcessor {
            settings: CoherenceSettings::default(),
            sample_rate,
            trial_length,
            artifact_threshold,
            band: Band::new(DEFAULT_FREQ_START, DEFAULT_FREQ_END, sample_rate, trial_length),
            fft,
            window: hann_window(trial_length),
            fft_input,
            fft_output,
            tracked: Vec::new(),
            buffers: Vec::new(),
            spectra: Vec::new(),
            auto_power: Vec::new(),
            cross_power: Vec::new(),
            pairs: Vec::new(),
            accepted: 0,
            stats,
        };
        processor.reset(settings);
        processor
    }

    pub fn band(&self) -> Band {
        self.band
    }

    pub fn combination_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn set_artifact_threshold(&mut self, threshold: f32) {
        self.artifact_threshold = threshold;
    }

    /// Applies `settings` and clears every accumulator and counter.
    pub fn reset(&mut self, settings: CoherenceSettings) {
        let mut tracked: Vec<usize> = settings.group1.iter().chain(&settings.group2).copied().collect();
        tracked.sort_unstable();
        tracked.dedup();

        self.band = Band::new(settings.freq_start, settings.freq_end, self.sample_rate, self.trial_length);
        let bins = self.band.bins();

        self.pairs = derive_combinations(&settings.group1, &settings.group2)
            .iter()
            .filter_map(|comb| {
                let a = tracked.binary_search(&comb.group1).ok()?;
                let b = tracked.binary_search(&comb.group2).ok()?;
                Some((a, b))
            })
            .collect();

        self.buffers = tracked.iter().map(|_| TrialBuffer::new(self.trial_length)).collect();
        self.spectra = vec![vec![Complex::new(0.0, 0.0); bins]; tracked.len()];
        self.auto_power = vec![vec![0.0; bins]; tracked.len()];
        self.cross_power = vec![vec![Complex::new(0.0, 0.0); bins]; self.pairs.len()];
        self.accepted = 0;
        self.stats.reset();

        info!(
            target: "processing",
            "Reset: {} x {} channels, {} combinations, bins {}..={}, alpha {}",
            settings.group1.len(),
            settings.group2.len(),
            self.pairs.len(),
            self.band.first_bin,
            self.band.last_bin,
            settings.alpha
        );
        self.tracked = tracked;
        self.settings = settings;
    }

    /// Feeds one block (one sample vector per input channel). Completed
    /// trials are evaluated and, when accepted, published to `writer`.
    pub fn process_block(&mut self, block: &[Vec<f32>], writer: &mut SnapshotWriter) -> Vec<TrialOutcome> {
        let mut outcomes = Vec::new();
        if self.tracked.is_empty() {
            return outcomes;
        }
        let frames = self
            .tracked
            .iter()
            .map(|&ch| block.get(ch).map_or(0, Vec::len))
            .min()
            .unwrap_or(0);

        for frame in 0..frames {
            let mut full = false;
            for (buffer, &ch) in self.buffers.iter_mut().zip(&self.tracked) {
                full = buffer.push(block[ch][frame]);
            }
            if full {
                outcomes.push(self.complete_trial(writer));
            }
        }
        outcomes
    }

    fn complete_trial(&mut self, writer: &mut SnapshotWriter) -> TrialOutcome {
        let threshold = self.artifact_threshold;
        if self.buffers.iter().any(|b| b.has_artifact(threshold)) {
            let discarded = self.stats.artifacts.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(target: "processing", "Trial discarded as artifact ({} so far)", discarded);
            self.buffers.iter_mut().for_each(TrialBuffer::clear);
            return TrialOutcome::Artifact;
        }

        for i in 0..self.tracked.len() {
            if let Err(e) = self.compute_spectrum(i) {
                error!(target: "processing", "FFT computation error: {:?}", e);
                self.buffers.iter_mut().for_each(TrialBuffer::clear);
                return TrialOutcome::Artifact;
            }
        }
        self.buffers.iter_mut().for_each(TrialBuffer::clear);

        self.accepted += 1;
        let w = trial_weight(self.accepted, self.settings.alpha);
        for (power, spectrum) in self.auto_power.iter_mut().zip(&self.spectra) {
            for (p, x) in power.iter_mut().zip(spectrum) {
                *p = (1.0 - w) * *p + w * x.norm_sqr();
            }
        }
        for (cross, &(a, b)) in self.cross_power.iter_mut().zip(&self.pairs) {
            for ((c, x), y) in cross.iter_mut().zip(&self.spectra[a]).zip(&self.spectra[b]) {
                *c = *c * (1.0 - w) + x * y.conj() * w;
            }
        }

        self.publish(writer);
        let trials = self.stats.trials.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(target: "processing", "Trial {} accepted (weight {:.3})", trials, w);
        TrialOutcome::Accepted
    }

    fn compute_spectrum(&mut self, index: usize) -> Result<()> {
        let samples = self.buffers[index].get();
        let mean = samples.iter().sum::<f32>() / samples.len().max(1) as f32;
        for ((dst, &s), &w) in self.fft_input.iter_mut().zip(samples).zip(&self.window) {
            *dst = (s - mean) * w;
        }
        self.fft
            .process(&mut self.fft_input, &mut self.fft_output)
            .map_err(|e| anyhow!("{}", e))?;

        let band = self.band;
        for (dst, src) in self.spectra[index]
            .iter_mut()
            .zip(&self.fft_output[band.first_bin..=band.last_bin])
        {
            *dst = Complex::new(src.re as f64, src.im as f64);
        }
        Ok(())
    }

    fn publish(&self, writer: &mut SnapshotWriter) {
        let bins = self.band.bins();
        let rows = self.pairs.len();
        let (auto_power, cross_power, pairs) = (&self.auto_power, &self.cross_power, &self.pairs);

        writer.publish_with(|slot| {
            slot.reshape(rows, bins);
            slot.as_mut_slice()
                .par_chunks_mut(bins)
                .zip(cross_power.par_iter().zip(pairs.par_iter()))
                .for_each(|(row, (cross, &(a, b)))| {
                    for (k, value) in row.iter_mut().enumerate() {
                        let denom = auto_power[a][k] * auto_power[b][k];
                        *value = if denom > POWER_FLOOR {
                            (cross[k].norm_sqr() / denom).clamp(0.0, 1.0)
                        } else {
                            0.0
                        };
                    }
                });
        });
    }
}

enum ProcessorCommand {
    Reset(CoherenceSettings),
    ArtifactThreshold(f32),
}

/// Start-up configuration of a [`CoherenceNode`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub signal: SignalConfig,
    pub settings: CoherenceSettings,
    pub artifact_threshold: f32,
}

impl NodeConfig {
    /// Default settings over `signal`, with channels split evenly between
    /// the groups.
    pub fn new(signal: SignalConfig) -> Self {
        let half = signal.num_channels / 2;
        let settings = CoherenceSettings {
            group1: (0..half).collect(),
            group2: (half..signal.num_channels).collect(),
            ..CoherenceSettings::default()
        };
        Self {
            signal,
            settings,
            artifact_threshold: DEFAULT_ARTIFACT_THRESHOLD,
        }
    }
}

/// UI-side handle of the coherence processing thread.
///
/// Group, weighting and band changes are staged here and handed to the
/// thread on [`reset_algorithm`](ProcessingBackend::reset_algorithm); the
/// artifact threshold is forwarded immediately.
pub struct CoherenceNode {
    commands: Sender<ProcessorCommand>,
    stats: Arc<ProcessingStats>,
    shutdown_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    staged: CoherenceSettings,
    active: Vec<usize>,
    axis: FrequencyAxis,
    ready: bool,
    sample_rate: f32,
    trial_length: usize,
}

impl CoherenceNode {
    /// Spawns the processing thread and returns its handle together with the
    /// consumer half of the snapshot channel.
    pub fn start(config: NodeConfig) -> Result<(Self, SnapshotReader)> {
        let sample_rate = config.signal.sample_rate;
        let trial_length = trial_length_for(sample_rate);
        let band = Band::new(config.settings.freq_start, config.settings.freq_end, sample_rate, trial_length);
        let rows = config.settings.group1.len() * config.settings.group2.len();
        let (writer, reader) = snapshot_channel(rows, band.bins());

        let stats = Arc::new(ProcessingStats::default());
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = crossbeam_channel::unbounded();

        let processor = CoherenceProcessor::new(
            config.settings.clone(),
            sample_rate,
            trial_length,
            config.artifact_threshold,
            Arc::clone(&stats),
        );
        let generator = SignalGenerator::new(config.signal.clone());
        let active = (0..generator.num_channels()).collect();

        let handle = thread::Builder::new()
            .name("coherence-processing".to_string())
            .spawn({
                let shutdown_flag = Arc::clone(&shutdown_flag);
                move || run_processing(processor, generator, writer, command_rx, shutdown_flag)
            })?;

        info!("Coherence processing started: {} channels at {} Hz", config.signal.num_channels, sample_rate);

        let node = CoherenceNode {
            commands,
            stats,
            shutdown_flag,
            handle: Some(handle),
            staged: config.settings,
            active,
            axis: band.axis(sample_rate, trial_length),
            ready: true,
            sample_rate,
            trial_length,
        };
        Ok((node, reader))
    }

    /// Replaces the set of channels the input reports as active.
    pub fn set_active_channels(&mut self, active: Vec<usize>) {
        self.active = active;
    }

    pub fn shutdown(&mut self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_ok() {
                info!("Processing thread terminated successfully");
            } else {
                warn!("Processing thread may not have terminated cleanly");
            }
        }
    }

    fn send(&self, command: ProcessorCommand) {
        if self.commands.send(command).is_err() {
            warn!("Processing thread is gone; command dropped");
        }
    }
}

impl Drop for CoherenceNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ProcessingBackend for CoherenceNode {
    fn active_channels(&self) -> Vec<usize> {
        self.active.clone()
    }

    fn group_channels(&self) -> (Vec<usize>, Vec<usize>) {
        (self.staged.group1.clone(), self.staged.group2.clone())
    }

    fn update_groups(&mut self, group1: &[usize], group2: &[usize]) {
        debug!("Staged groups {:?} / {:?}", group1, group2);
        self.staged.group1 = group1.to_vec();
        self.staged.group2 = group2.to_vec();
    }

    fn update_alpha(&mut self, alpha: f32) {
        self.staged.alpha = alpha.max(0.0);
    }

    fn alpha(&self) -> f32 {
        self.staged.alpha
    }

    fn set_parameter(&mut self, parameter: Parameter, value: f32) {
        match parameter {
            Parameter::ArtifactThreshold => self.send(ProcessorCommand::ArtifactThreshold(value)),
            Parameter::StartFreq => self.staged.freq_start = value as i32,
            Parameter::EndFreq => self.staged.freq_end = value as i32,
        }
    }

    fn reset_algorithm(&mut self) {
        let band = Band::new(self.staged.freq_start, self.staged.freq_end, self.sample_rate, self.trial_length);
        self.axis = band.axis(self.sample_rate, self.trial_length);
        self.stats.reset();
        self.send(ProcessorCommand::Reset(self.staged.clone()));
        self.ready = true;
        info!("Algorithm reset requested; band {:.1}..{:.1} Hz", self.axis.start, self.axis.end);
    }

    fn update_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn trials_processed(&self) -> usize {
        self.stats.trials.load(Ordering::Relaxed)
    }

    fn artifacts_discarded(&self) -> usize {
        self.stats.artifacts.load(Ordering::Relaxed)
    }

    fn frequency_axis(&self) -> FrequencyAxis {
        self.axis
    }
}

fn run_processing(
    mut processor: CoherenceProcessor,
    mut generator: SignalGenerator,
    mut writer: SnapshotWriter,
    commands: Receiver<ProcessorCommand>,
    shutdown_flag: Arc<AtomicBool>,
) {
    let frames = block_frames_for(generator.sample_rate());
    let block_period = Duration::from_secs_f64(frames as f64 / generator.sample_rate() as f64);
    let mut block = Vec::new();
    let mut last_log_time = Instant::now();

    info!(target: "processing", "Processing thread started ({} frames per block)", frames);

    while !shutdown_flag.load(Ordering::SeqCst) {
        let started = Instant::now();

        loop {
            match commands.try_recv() {
                Ok(ProcessorCommand::Reset(settings)) => processor.reset(settings),
                Ok(ProcessorCommand::ArtifactThreshold(threshold)) => {
                    debug!(target: "processing", "Artifact threshold now {}", threshold);
                    processor.set_artifact_threshold(threshold);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!(target: "processing", "Command channel closed; stopping");
                    return;
                }
            }
        }

        generator.fill_block(&mut block, frames);
        processor.process_block(&block, &mut writer);

        if last_log_time.elapsed() >= Duration::from_secs(5) {
            debug!(target: "processing", "{} snapshots published so far", writer.published());
            last_log_time = Instant::now();
        }

        if let Some(remaining) = block_period.checked_sub(started.elapsed()) {
            thread::sleep(remaining);
        }
    }

    info!(target: "processing", "Processing thread shutting down");
}

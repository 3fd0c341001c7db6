use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use clap::Parser;
use log::{error, info};

use coherence_viewer::coherence::{CoherenceNode, NodeConfig};
use coherence_viewer::panel::CoherencePanel;
use coherence_viewer::plot::LogPlot;
use coherence_viewer::presets::{PanelPreset, PresetManager};
use coherence_viewer::signal::SignalConfig;
use coherence_viewer::utils::{DEFAULT_NUM_CHANNELS, DEFAULT_REFRESH_MS, DEFAULT_SAMPLE_RATE, MAX_CHANNELS};
use coherence_viewer::viewer;

#[derive(Parser, Debug)]
#[command(name = "coherence_viewer", about = "Live inter-channel coherence viewer")]
struct Args {
    /// Number of input channels
    #[arg(long, default_value_t = DEFAULT_NUM_CHANNELS)]
    channels: usize,

    /// Input sample rate in Hz
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: f32,

    /// Plot refresh period in milliseconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_MS)]
    refresh_ms: u64,

    /// YAML file holding named presets
    #[arg(long)]
    presets: Option<PathBuf>,

    /// Preset to apply at start-up (needs --presets)
    #[arg(long)]
    preset: Option<String>,

    /// Run without a window and log the plotted line instead
    #[arg(long)]
    headless: bool,

    /// Turn on logging (RUST_LOG still decides the level)
    #[arg(long)]
    enable_logs: bool,

    /// Chance per block and channel of an injected artifact
    #[arg(long, default_value_t = 0.0)]
    artifact_rate: f64,
}

fn main() {
    let args = Args::parse();

    // Headless mode reports only through the log.
    let logging = args.enable_logs || args.headless;
    if logging {
        // Don't override RUST_LOG if it's already set
        if std::env::var("RUST_LOG").is_err() {
            std::env::set_var("RUST_LOG", "coherence_viewer=info");
        }
        env_logger::init();
    }

    if let Err(e) = run(args) {
        if logging {
            error!("Application encountered an error: {:?}", e);
        } else {
            eprintln!("Error: {:?}", e);
        }
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    if args.channels == 0 || args.channels > MAX_CHANNELS {
        return Err(anyhow!("--channels must be between 1 and {}", MAX_CHANNELS));
    }
    if !(args.sample_rate.is_finite() && args.sample_rate > 0.0) {
        return Err(anyhow!("--sample-rate must be a positive number of Hz"));
    }
    if !(0.0..=1.0).contains(&args.artifact_rate) {
        return Err(anyhow!("--artifact-rate must be between 0 and 1"));
    }

    let presets = match &args.presets {
        Some(path) => Some(PresetManager::new(path, PanelPreset::for_channels(args.channels))?),
        None => None,
    };
    let startup_preset = match (&args.preset, &presets) {
        (Some(name), Some(manager)) => Some(
            manager
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow!("No preset named '{}'", name))?,
        ),
        (Some(_), None) => return Err(anyhow!("--preset needs --presets <file>")),
        (None, _) => None,
    };

    let signal = SignalConfig {
        sample_rate: args.sample_rate,
        num_channels: args.channels,
        artifact_rate: args.artifact_rate,
        ..SignalConfig::default()
    };
    let (node, reader) = CoherenceNode::start(NodeConfig::new(signal))?;
    let mut panel = CoherencePanel::new(node, reader);

    if let Some(preset) = startup_preset {
        panel.apply_preset(&preset);
        panel.reset();
        info!("Applied start-up preset");
    }

    let refresh = Duration::from_millis(args.refresh_ms.max(1));
    if args.headless {
        run_headless(panel, refresh)
    } else {
        viewer::run_viewer(panel, presets, refresh)
    }
}

fn run_headless(mut panel: CoherencePanel<CoherenceNode>, refresh: Duration) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    ctrlc::set_handler({
        let running = Arc::clone(&running);
        move || running.store(false, Ordering::SeqCst)
    })?;

    info!("Running headless; press Ctrl-C to stop");
    let mut plot = LogPlot::default();
    let mut last_status = Instant::now();

    while running.load(Ordering::SeqCst) {
        panel.refresh(&mut plot);

        if last_status.elapsed() >= Duration::from_secs(1) {
            let status = panel.status();
            info!(
                "Trials: {}, artifacts: {}, ready: {}",
                status.trials_processed, status.artifacts_discarded, status.ready
            );
            last_status = Instant::now();
        }
        thread::sleep(refresh);
    }

    info!("Stopping after {} plotted lines", plot.lines_plotted);
    panel.backend_mut().shutdown();
    Ok(())
}

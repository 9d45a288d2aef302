use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;

use ecg_stream::clock::Clock;
use ecg_stream::config::{Cli, Input, StreamConfig};
use ecg_stream::error::ConfigError;
use ecg_stream::producer::{Producer, ProducerExit, ProducerStats};
use ecg_stream::publish::{OutletInfo, Publisher};
use ecg_stream::ring::RingBuffer;
use ecg_stream::shutdown::{self, ShutdownReason, ShutdownWaiter};
use ecg_stream::simulate::SimulatedSource;
use ecg_stream::source::{self, SampleSource};
use ecg_stream::ui::MonitorApp;

// Extra time the producer gets, past one read timeout, to notice shutdown.
const STOP_GRACE: Duration = Duration::from_millis(500);

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match StreamConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(err) => return config_failure(err),
    };
    let ring = match RingBuffer::new(config.capacity()) {
        Ok(ring) => Arc::new(ring),
        Err(err) => return config_failure(err),
    };
    let source = match open_source(&config) {
        Ok(source) => source,
        Err(err) => return config_failure(err),
    };

    match run(config, ring, source) {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn config_failure(err: ConfigError) -> ExitCode {
    log::error!("{err}");
    ExitCode::from(2)
}

fn open_source(config: &StreamConfig) -> Result<Box<dyn SampleSource>, ConfigError> {
    Ok(match &config.input {
        Input::Serial(port) => Box::new(source::open_serial(
            port,
            config.baud_rate,
            config.read_timeout,
        )?),
        Input::Stdin => Box::new(source::open_stdin()),
        Input::Simulated => Box::new(SimulatedSource::new(config.sample_rate_hz)),
    })
}

#[cfg(feature = "lsl")]
fn open_outlet(info: &OutletInfo) -> anyhow::Result<(Box<dyn Publisher>, Box<dyn Clock>)> {
    let publisher = ecg_stream::publish::LslPublisher::new(info)?;
    Ok((Box::new(publisher), Box::new(ecg_stream::clock::LslClock)))
}

#[cfg(not(feature = "lsl"))]
fn open_outlet(info: &OutletInfo) -> anyhow::Result<(Box<dyn Publisher>, Box<dyn Clock>)> {
    let publisher = ecg_stream::publish::LogPublisher::new(info);
    Ok((
        Box::new(publisher),
        Box::new(ecg_stream::clock::MonotonicClock::new()),
    ))
}

fn run(
    config: StreamConfig,
    ring: Arc<RingBuffer>,
    source: Box<dyn SampleSource>,
) -> anyhow::Result<ExitCode> {
    log::info!(
        "Buffering {} s at {} Hz ({} samples)",
        config.window_seconds,
        config.sample_rate_hz,
        ring.capacity()
    );

    let info = OutletInfo::ecg(&config.stream_name, &config.source_id, config.sample_rate_hz);
    let (publisher, clock) = open_outlet(&info)?;

    let (shutdown, waiter) = shutdown::channel();
    shutdown
        .install_interrupt_handler()
        .context("failed to install interrupt handler")?;

    let producer = Producer::new(source, publisher, clock, Arc::clone(&ring), shutdown.clone());
    let stats = producer.stats();
    let handle = producer.spawn().context("failed to start producer thread")?;

    if config.plot {
        log::info!("Streaming with real-time display. Close the window or press Ctrl+C to stop.");
        let result = run_plot(&config, Arc::clone(&ring), Arc::clone(&stats), waiter.clone());
        shutdown.request(ShutdownReason::WindowClosed);
        result?;
    } else {
        log::info!("Streaming {}. Press Ctrl+C to stop.", info.name);
        let reason = waiter.wait();
        if !matches!(reason, ShutdownReason::ProducerStopped(_)) {
            shutdown.request(reason);
        }
    }

    let limit = config.read_timeout + STOP_GRACE;
    if wait_for_producer(&waiter, &stats, limit) {
        if let Err(panic) = handle.join() {
            log::error!("Producer thread panicked: {}", panic_message(&*panic));
            return Ok(ExitCode::FAILURE);
        }
    } else {
        log::warn!("Producer still blocked after {limit:?}, exiting without it");
    }

    Ok(match stats.snapshot().exit {
        Some(ProducerExit::DeviceError(message)) => {
            log::error!("Stopped after device error: {message}");
            ExitCode::FAILURE
        }
        Some(ProducerExit::Panicked) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn run_plot(
    config: &StreamConfig,
    ring: Arc<RingBuffer>,
    stats: Arc<ProducerStats>,
    waiter: ShutdownWaiter,
) -> anyhow::Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(format!("{} - {}", config.stream_name, config.input_label()))
            .with_inner_size([960.0, 480.0]),
        ..Default::default()
    };
    let app_config = config.clone();
    eframe::run_native(
        "ECG Monitor",
        options,
        Box::new(move |cc| Box::new(MonitorApp::new(cc, &app_config, ring, stats, waiter))),
    )
    .map_err(|err| anyhow::anyhow!("plot window failed: {err}"))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload")
}

/// Returns once the producer has recorded its exit, or false after `limit`.
fn wait_for_producer(waiter: &ShutdownWaiter, stats: &ProducerStats, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while stats.snapshot().exit.is_none() {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return false;
        }
        waiter.wait_timeout(left);
    }
    true
}

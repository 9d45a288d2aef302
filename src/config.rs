use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::error::ConfigError;
use crate::ring::window_capacity;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 1000;
pub const DEFAULT_WINDOW_SECONDS: u32 = 5;
/// The plot shows a longer window than headless buffering needs.
pub const DEFAULT_PLOT_WINDOW_SECONDS: u32 = 10;
pub const DEFAULT_STREAM_NAME: &str = "ECG_Stream";
pub const DEFAULT_SOURCE_ID: &str = "ecg_serial_001";
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_REFRESH_MS: u64 = 30;
// Raw 12-bit ADC counts.
pub const DEFAULT_Y_RANGE: (f32, f32) = (0.0, 4095.0);

#[derive(Parser, Debug, Default)]
#[command(
    name = "ecg-stream",
    version,
    about = "Stream ECG samples from a serial device to a real-time outlet",
    long_about = "Reads one decimal sample per line from a serial device, keeps a rolling \
                  window in memory and republishes every sample with a timestamp.\n\
                  Options not given on the command line are taken from the settings file."
)]
pub struct Cli {
    /// Serial device (e.g. /dev/ttyUSB0, COM5), or '-' for stdin
    #[arg(short, long)]
    pub port: Option<String>,

    #[arg(short, long)]
    pub baud_rate: Option<u32>,

    /// Nominal device sample rate
    #[arg(short = 'r', long)]
    pub sample_rate_hz: Option<u32>,

    /// Seconds of signal kept in memory [default: 5, or 10 with --plot]
    #[arg(short, long)]
    pub window_seconds: Option<u32>,

    /// Show a live scrolling plot of the window
    #[arg(long)]
    pub plot: bool,

    /// Generate a synthetic ECG instead of reading a device
    #[arg(long, conflicts_with = "port")]
    pub simulate: bool,

    #[arg(long)]
    pub stream_name: Option<String>,

    #[arg(long)]
    pub source_id: Option<String>,

    /// Longest a single serial read may block
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Plot redraw period
    #[arg(long)]
    pub refresh_ms: Option<u64>,

    #[arg(long, allow_hyphen_values = true)]
    pub y_min: Option<f32>,

    #[arg(long, allow_hyphen_values = true)]
    pub y_max: Option<f32>,

    /// Fit the plot's vertical range to the visible samples
    #[arg(long)]
    pub auto_scale: bool,

    /// Settings file [default: ./ecg-stream.cfg, then <config dir>/ecg-stream/settings.cfg]
    #[arg(short, long, env = "ECG_STREAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Input {
    Serial(String),
    Stdin,
    Simulated,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum YRange {
    Fixed { min: f32, max: f32 },
    Auto,
}

/// Validated runtime configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamConfig {
    pub input: Input,
    pub baud_rate: u32,
    pub sample_rate_hz: u32,
    pub window_seconds: u32,
    pub plot: bool,
    pub stream_name: String,
    pub source_id: String,
    pub read_timeout: Duration,
    pub refresh: Duration,
    pub y_range: YRange,
}

impl StreamConfig {
    /// Command line over settings file over built-in defaults.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let settings = match cli.config.clone().or_else(find_settings_file) {
            Some(path) => {
                log::debug!("Loading settings from {}", path.display());
                Settings::load(&path)?
            }
            None => Settings::default(),
        };
        Self::resolve(cli, &settings)
    }

    pub fn resolve(cli: &Cli, settings: &Settings) -> Result<Self, ConfigError> {
        let plot = cli.plot || settings.plot.unwrap_or(false);
        let input = if cli.simulate {
            Input::Simulated
        } else {
            match cli.port.as_deref().or(settings.port.as_deref()) {
                Some("-") => Input::Stdin,
                Some(port) if !port.trim().is_empty() => Input::Serial(port.trim().to_string()),
                _ => return Err(ConfigError::MissingPort),
            }
        };

        let y_range = if cli.auto_scale || settings.auto_scale.unwrap_or(false) {
            YRange::Auto
        } else {
            YRange::Fixed {
                min: cli.y_min.or(settings.y_min).unwrap_or(DEFAULT_Y_RANGE.0),
                max: cli.y_max.or(settings.y_max).unwrap_or(DEFAULT_Y_RANGE.1),
            }
        };

        let default_window = if plot {
            DEFAULT_PLOT_WINDOW_SECONDS
        } else {
            DEFAULT_WINDOW_SECONDS
        };

        let config = Self {
            input,
            baud_rate: cli.baud_rate.or(settings.baud_rate).unwrap_or(DEFAULT_BAUD_RATE),
            sample_rate_hz: cli
                .sample_rate_hz
                .or(settings.sample_rate_hz)
                .unwrap_or(DEFAULT_SAMPLE_RATE_HZ),
            window_seconds: cli
                .window_seconds
                .or(settings.window_seconds)
                .unwrap_or(default_window),
            plot,
            stream_name: cli
                .stream_name
                .clone()
                .or_else(|| settings.stream_name.clone())
                .unwrap_or_else(|| DEFAULT_STREAM_NAME.to_string()),
            source_id: cli
                .source_id
                .clone()
                .or_else(|| settings.source_id.clone())
                .unwrap_or_else(|| DEFAULT_SOURCE_ID.to_string()),
            read_timeout: Duration::from_millis(
                cli.read_timeout_ms
                    .or(settings.read_timeout_ms)
                    .unwrap_or(DEFAULT_READ_TIMEOUT_MS),
            ),
            refresh: Duration::from_millis(
                cli.refresh_ms
                    .or(settings.refresh_ms)
                    .unwrap_or(DEFAULT_REFRESH_MS),
            ),
            y_range,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("baud rate", self.baud_rate as u64),
            ("sample rate", self.sample_rate_hz as u64),
            ("window seconds", self.window_seconds as u64),
            ("read timeout", self.read_timeout.as_millis() as u64),
            ("refresh period", self.refresh.as_millis() as u64),
        ];
        if let Some(&(field, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero { field });
        }
        if self.stream_name.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "stream name",
            });
        }
        if let YRange::Fixed { min, max } = self.y_range {
            if !(min.is_finite() && max.is_finite() && min < max) {
                return Err(ConfigError::PlotRange {
                    y_min: min,
                    y_max: max,
                });
            }
        }
        window_capacity(self.window_seconds, self.sample_rate_hz)?;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        // Checked by validate().
        window_capacity(self.window_seconds, self.sample_rate_hz).unwrap_or(1)
    }

    pub fn input_label(&self) -> String {
        match &self.input {
            Input::Serial(port) => format!("{port} @ {} baud", self.baud_rate),
            Input::Stdin => "stdin".to_string(),
            Input::Simulated => "simulated".to_string(),
        }
    }
}

/// Optional values read from the `key=value` settings file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settings {
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub sample_rate_hz: Option<u32>,
    pub window_seconds: Option<u32>,
    pub plot: Option<bool>,
    pub stream_name: Option<String>,
    pub source_id: Option<String>,
    pub read_timeout_ms: Option<u64>,
    pub refresh_ms: Option<u64>,
    pub y_min: Option<f32>,
    pub y_max: Option<f32>,
    pub auto_scale: Option<bool>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|err| ConfigError::Settings {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::parse(&raw).map_err(|message| ConfigError::Settings {
            path: path.display().to_string(),
            message,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut settings = Settings::default();
        for (number, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(format!("line {}: expected key=value", number + 1));
            };
            apply_kv(key.trim(), value.trim(), &mut settings)
                .map_err(|err| format!("line {}: {err}", number + 1))?;
        }
        Ok(settings)
    }
}

fn apply_kv(key: &str, value: &str, settings: &mut Settings) -> Result<(), String> {
    match key {
        "port" => settings.port = non_empty(value),
        "baud_rate" => settings.baud_rate = Some(parse(key, value)?),
        "sample_rate_hz" => settings.sample_rate_hz = Some(parse(key, value)?),
        "window_seconds" => settings.window_seconds = Some(parse(key, value)?),
        "plot" => settings.plot = Some(parse(key, value)?),
        "stream_name" => settings.stream_name = non_empty(value),
        "source_id" => settings.source_id = non_empty(value),
        "read_timeout_ms" => settings.read_timeout_ms = Some(parse(key, value)?),
        "refresh_ms" => settings.refresh_ms = Some(parse(key, value)?),
        "y_min" => settings.y_min = Some(parse(key, value)?),
        "y_max" => settings.y_max = Some(parse(key, value)?),
        "auto_scale" => settings.auto_scale = Some(parse(key, value)?),
        _ => log::warn!("Ignoring unknown setting '{key}'"),
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse::<T>()
        .map_err(|_| format!("invalid value '{value}' for {key}"))
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Settings file looked for in the working directory.
pub const LOCAL_SETTINGS_FILE: &str = "ecg-stream.cfg";

/// Where a settings file is looked for when `--config` is not given, in
/// order. `env` reads an environment variable.
pub fn settings_candidates(env: impl Fn(&str) -> Option<String>) -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(LOCAL_SETTINGS_FILE)];
    let per_user = if cfg!(target_os = "windows") {
        env("APPDATA").map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        env("HOME").map(|home| Path::new(&home).join("Library/Application Support"))
    } else {
        env("XDG_CONFIG_HOME")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or_else(|| env("HOME").map(|home| Path::new(&home).join(".config")))
    };
    if let Some(dir) = per_user {
        candidates.push(dir.join("ecg-stream").join("settings.cfg"));
    }
    candidates
}

fn find_settings_file() -> Option<PathBuf> {
    settings_candidates(|key| std::env::var(key).ok())
        .into_iter()
        .find(|path| path.is_file())
}

//! stderr logger for pipeline runs, installed as the `log` backend.
//!
//! Lines go to stderr so stdout stays free for the final artifact path. A profile picks
//! the base layout (colored console, verbose development, JSON-lines production) and the
//! CLI can override level, JSON output and the log file on top of it.
//!
//! The run tag set by [`set_run_id`] is process-wide: two orchestrators running at the
//! same time in one process tag each other's lines.

use chrono::{DateTime, Utc};
use colored::*;
use log::{Level, Metadata, Record};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::PipelineConfig;

static PIPELINE_LOGGER: Lazy<PipelineLogger> = Lazy::new(PipelineLogger::default);

/// Install the pipeline logger. Fails if another logger is already set or the log file
/// cannot be opened.
pub fn init_with_config(config: LoggerConfig) -> Result<(), String> {
    let level = config.min_level;
    PIPELINE_LOGGER
        .configure(config)
        .map_err(|e| format!("Failed to open log file: {}", e))?;

    if let Err(e) = log::set_logger(&*PIPELINE_LOGGER) {
        return Err(format!("Failed to set logger: {:?}", e));
    }

    log::set_max_level(level.to_log_level().to_level_filter());
    Ok(())
}

/// Tag every following line with `run_id`, or clear the tag.
pub fn set_run_id(run_id: Option<&str>) {
    PIPELINE_LOGGER.set_run_id(run_id);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl LogLevel {
    pub fn color(&self) -> Color {
        match self {
            LogLevel::Trace => Color::Cyan,
            LogLevel::Debug => Color::Blue,
            LogLevel::Info => Color::Green,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Error => Color::Red,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            LogLevel::Trace => "🔍",
            LogLevel::Debug => "🐛",
            LogLevel::Info => "💡",
            LogLevel::Warn => "⚠️",
            LogLevel::Error => "❌",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn to_log_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::Trace,
            LogLevel::Debug => Level::Debug,
            LogLevel::Info => Level::Info,
            LogLevel::Warn => Level::Warn,
            LogLevel::Error => Level::Error,
        }
    }

    pub fn from_log_level(level: Level) -> Self {
        match level {
            Level::Trace => LogLevel::Trace,
            Level::Debug => LogLevel::Debug,
            Level::Info => LogLevel::Info,
            Level::Warn => LogLevel::Warn,
            Level::Error => LogLevel::Error,
        }
    }

    /// Parses `trace`..`error`, case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::parse(s).ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

/// Base logger layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogProfile {
    /// Colored console lines at info.
    #[default]
    Console,
    /// Colored console lines at debug, with source locations.
    Development,
    /// JSON lines at info, mirrored to `alphagen.log`.
    Production,
}

impl FromStr for LogProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(LogProfile::Console),
            "dev" | "development" => Ok(LogProfile::Development),
            "prod" | "production" => Ok(LogProfile::Production),
            other => Err(format!("unknown log profile '{}'", other)),
        }
    }
}

/// One log line. This is also the JSON record written in JSON mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub target: String,
    pub location: Option<String>,
    pub run_id: Option<String>,
    pub message: String,
}

impl LogEntry {
    fn from_record(record: &Record, run_id: Option<String>) -> Self {
        let location = match (record.file(), record.line()) {
            (Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
            _ => None,
        };
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level: LogLevel::from_log_level(record.level()),
            target: record.target().to_string(),
            location,
            run_id,
            message: record.args().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub colors: bool,
    pub emojis: bool,
    pub show_location: bool,
    /// `None` leaves timestamps off console lines.
    pub timestamp_format: Option<String>,
    pub json: bool,
    /// Every line is also appended here, without colors.
    pub file: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::for_profile(LogProfile::Console)
    }
}

impl LoggerConfig {
    pub fn for_profile(profile: LogProfile) -> Self {
        let console = Self {
            min_level: LogLevel::Info,
            colors: true,
            emojis: true,
            show_location: false,
            timestamp_format: Some("%Y-%m-%d %H:%M:%S%.3f".to_string()),
            json: false,
            file: None,
        };
        match profile {
            LogProfile::Console => console,
            LogProfile::Development => Self {
                min_level: LogLevel::Debug,
                show_location: true,
                ..console
            },
            LogProfile::Production => Self {
                colors: false,
                emojis: false,
                json: true,
                file: Some(PathBuf::from("alphagen.log")),
                ..console
            },
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_colors(mut self, enabled: bool) -> Self {
        self.colors = enabled;
        self
    }

    pub fn with_json(mut self, enabled: bool) -> Self {
        self.json = enabled;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Applies command-line overrides on top of a profile. `json` only ever switches
    /// JSON output on.
    pub fn with_overrides(
        mut self,
        level: Option<LogLevel>,
        json: bool,
        file: Option<PathBuf>,
    ) -> Self {
        if let Some(level) = level {
            self.min_level = level;
        }
        self.json |= json;
        if let Some(file) = file {
            self.file = Some(file);
        }
        self
    }
}

#[derive(Default)]
pub struct PipelineLogger {
    config: Mutex<LoggerConfig>,
    file: Mutex<Option<File>>,
    run_id: Mutex<Option<String>>,
}

impl PipelineLogger {
    /// Swap in `config`, opening its log file (and parent directories) for append.
    pub fn configure(&self, config: LoggerConfig) -> io::Result<()> {
        let file = config.file.as_deref().map(open_log_file).transpose()?;
        if let Ok(mut current) = self.file.lock() {
            *current = file;
        }
        if let Ok(mut current) = self.config.lock() {
            *current = config;
        }
        Ok(())
    }

    pub fn set_run_id(&self, run_id: Option<&str>) {
        if let Ok(mut current) = self.run_id.lock() {
            *current = run_id.map(str::to_string);
        }
    }

    fn render(&self, entry: &LogEntry, config: &LoggerConfig) -> String {
        if config.json {
            return serde_json::to_string(entry).unwrap_or_default();
        }

        let paint = |text: String, color: Color| {
            if config.colors {
                text.color(color).to_string()
            } else {
                text
            }
        };

        let mut line = String::new();
        if let Some(format) = &config.timestamp_format {
            line.push_str(&paint(entry.timestamp.format(format).to_string(), Color::BrightBlack));
            line.push(' ');
        }

        let level = if config.emojis {
            format!("{} {}", entry.level.emoji(), entry.level.as_str())
        } else {
            entry.level.as_str().to_string()
        };
        if config.colors {
            line.push_str(&format!("[{}] ", level.color(entry.level.color()).bold()));
        } else {
            line.push_str(&format!("[{}] ", level));
        }

        if let Some(run_id) = &entry.run_id {
            line.push_str(&format!("[run:{}] ", paint(run_id.clone(), Color::BrightYellow)));
        }
        if !entry.target.is_empty() {
            line.push_str(&paint(entry.target.clone(), Color::BrightBlue));
            line.push_str(": ");
        }
        line.push_str(&entry.message);

        if config.show_location {
            if let Some(location) = &entry.location {
                line.push_str(&format!(" ({})", paint(location.clone(), Color::BrightBlack)));
            }
        }
        line
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

impl log::Log for PipelineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        match self.config.lock() {
            Ok(config) => metadata.level() <= config.min_level.to_log_level(),
            Err(_) => true,
        }
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let run_id = self.run_id.lock().ok().and_then(|run_id| run_id.clone());
        let entry = LogEntry::from_record(record, run_id);

        let Ok(config) = self.config.lock() else {
            return;
        };
        eprintln!("{}", self.render(&entry, &config));

        if let Ok(mut file) = self.file.lock() {
            if let Some(file) = file.as_mut() {
                let plain = config.clone().with_colors(false);
                let _ = writeln!(file, "{}", self.render(&entry, &plain));
            }
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
        if let Ok(mut file) = self.file.lock() {
            if let Some(file) = file.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

/// Logs how long a pipeline stage took when dropped.
pub struct StageTimer {
    start: Instant,
    stage: String,
}

impl StageTimer {
    pub fn new(stage: &str) -> Self {
        log::debug!("⏱️  Stage '{}' started", stage);
        Self {
            start: Instant::now(),
            stage: stage.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        log::info!(
            "⏱️  Stage '{}' finished in {}ms",
            self.stage,
            self.elapsed().as_millis()
        );
    }
}

pub fn stage_timer(stage: &str) -> StageTimer {
    StageTimer::new(stage)
}

pub fn log_startup_info(app_name: &str, version: &str) {
    log::info!("🚀 Starting {} v{}", app_name, version);
}

pub fn log_config_info(config: &PipelineConfig) {
    let on_off = |enabled: bool| if enabled { "✅" } else { "❌" };
    log::info!("⚙️  Configuration loaded:");
    log::info!(
        "   Output directory: {}",
        config
            .output_root
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(unset)".to_string())
    );
    log::info!("   Prefix: {}", config.prefix);
    log::info!("   Scratch directory: {}", config.scratch_dir.display());
    log::info!(
        "   Default size/ratio: {} / {}",
        config.default_size_hint.as_deref().unwrap_or("-"),
        config.default_ratio_hint.as_deref().unwrap_or("-")
    );
    log::info!(
        "   Sampled backdrops: {}",
        on_off(matches!(
            config.alpha.backdrop,
            crate::alpha::BackdropModel::Sampled { .. }
        ))
    );
    log::info!(
        "   Threshold cleanup: {}",
        on_off(config.alpha.thresholds.is_some())
    );
}

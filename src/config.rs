//! Monitor configuration.
//!
//! Read once at startup from environment-style variables and handed to the
//! constructors that need it. Malformed values never abort startup: each one
//! falls back to its documented default and logs a warning.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;
pub const DEFAULT_LIVE_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_AI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_AI_MODEL: &str = "gpt-4o-mini";

/// Everything the monitoring subsystem reads from its environment.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Global on/off switch for recording.
    pub enabled: bool,
    /// Probability in `[0, 1]` that a request is recorded.
    pub sample_rate: f64,
    /// Ring buffer size, fixed for the life of the process.
    pub buffer_capacity: usize,
    /// Per-observer queue depth on the live channel.
    pub live_queue_capacity: usize,
    /// Shared secret for `/metrics/*`. `None` denies every request.
    pub api_key: Option<String>,
    /// Mount the sample instrumented routes.
    pub demo_routes: bool,
    pub bind_addr: String,
    pub alerts: AlertConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub interval: Duration,
    /// Trailing window the periodic detector summarises.
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub enabled: bool,
    pub period: Duration,
    pub interval: Duration,
    pub log_path: PathBuf,
    pub reports_dir: PathBuf,
    pub ai_api_key: Option<String>,
    pub ai_endpoint: String,
    pub ai_model: String,
    /// How many of the slowest routes go into the report and the prompt.
    pub top_n: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: 1.0,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            live_queue_capacity: DEFAULT_LIVE_QUEUE_CAPACITY,
            api_key: None,
            demo_routes: true,
            bind_addr: "0.0.0.0:3000".into(),
            alerts: AlertConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            interval: Duration::from_secs(300),
            window: Duration::from_secs(3600),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period: Duration::from_secs(24 * 3600),
            interval: Duration::from_secs(24 * 3600),
            log_path: PathBuf::from("logs/performance.log"),
            reports_dir: PathBuf::from("reports"),
            ai_api_key: None,
            ai_endpoint: DEFAULT_AI_ENDPOINT.into(),
            ai_model: DEFAULT_AI_MODEL.into(),
            top_n: 5,
        }
    }
}

impl MonitorConfig {
    /// Build from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Tests pass a map here instead of
    /// touching process-wide state.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let alerts = AlertConfig {
            enabled: parse_flag(get("PERF_ALERTS_ENABLED"), false),
            webhook_url: get("PERF_ALERT_WEBHOOK_URL"),
            interval: Duration::from_secs(parse_positive(
                "PERF_ALERT_INTERVAL_SECS",
                get("PERF_ALERT_INTERVAL_SECS"),
                defaults.alerts.interval.as_secs(),
            )),
            window: defaults.alerts.window,
        };

        let analysis = AnalysisConfig {
            enabled: parse_flag(get("PERF_ANALYSIS_ENABLED"), false),
            period: hours(parse_positive(
                "PERF_ANALYSIS_PERIOD_HOURS",
                get("PERF_ANALYSIS_PERIOD_HOURS"),
                24,
            )),
            interval: hours(parse_positive(
                "PERF_ANALYSIS_INTERVAL_HOURS",
                get("PERF_ANALYSIS_INTERVAL_HOURS"),
                24,
            )),
            log_path: get("PERF_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.analysis.log_path),
            reports_dir: get("PERF_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.analysis.reports_dir),
            ai_api_key: get("PERF_AI_API_KEY"),
            ai_endpoint: get("PERF_AI_ENDPOINT").unwrap_or(defaults.analysis.ai_endpoint),
            ai_model: get("PERF_AI_MODEL").unwrap_or(defaults.analysis.ai_model),
            top_n: defaults.analysis.top_n,
        };

        Self {
            enabled: parse_flag(get("PERF_MONITORING_ENABLED"), false),
            sample_rate: parse_sample_rate(get("PERF_SAMPLE_RATE")),
            buffer_capacity: parse_positive(
                "PERF_BUFFER_CAPACITY",
                get("PERF_BUFFER_CAPACITY"),
                DEFAULT_BUFFER_CAPACITY as u64,
            ) as usize,
            live_queue_capacity: parse_positive(
                "PERF_LIVE_QUEUE_CAPACITY",
                get("PERF_LIVE_QUEUE_CAPACITY"),
                DEFAULT_LIVE_QUEUE_CAPACITY as u64,
            ) as usize,
            api_key: get("PERF_METRICS_API_KEY"),
            demo_routes: parse_flag(get("PERF_DEMO_ROUTES"), true),
            bind_addr: get("PERF_BIND_ADDR").unwrap_or(defaults.bind_addr),
            alerts,
            analysis,
        }
    }
}

// ─── Parsing helpers ─────────────────────────────────────────────

fn hours(h: u64) -> Duration {
    Duration::from_secs(h.saturating_mul(3600))
}

fn parse_flag(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

fn parse_positive(name: &str, raw: Option<String>, default: u64) -> u64 {
    let Some(raw) = raw else { return default };
    match raw.parse::<u64>() {
        Ok(v) if v > 0 => v,
        _ => {
            tracing::warn!(variable = name, value = %raw, default, "invalid value, using default");
            default
        }
    }
}

/// Out-of-range or unparsable rates clamp to 1.0 (record everything).
/// Fail-open is deliberate; see DESIGN.md before changing it.
pub fn parse_sample_rate(raw: Option<String>) -> f64 {
    let Some(raw) = raw else { return 1.0 };
    match raw.parse::<f64>() {
        Ok(rate) if rate.is_finite() && (0.0..=1.0).contains(&rate) => rate,
        _ => {
            tracing::warn!(value = %raw, "PERF_SAMPLE_RATE must be within [0, 1]; using 1.0");
            1.0
        }
    }
}

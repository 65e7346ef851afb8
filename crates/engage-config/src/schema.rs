use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, mapped to `engage.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngageConfig {
    pub agent: AgentConfig,
    pub cycle: CycleConfig,
    pub stream: StreamConfig,
    pub confidence: ConfidenceConfig,
    pub retry: RetryConfig,
    pub memory: MemoryConfig,
    pub adapters: AdaptersConfig,
    pub logging: LoggingConfig,
}

fn engage_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".engage")
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Display name of the persona, passed to the response generator.
    pub name: String,
    /// Free-form persona description forwarded with every compose request.
    pub persona: Option<String>,
    /// Topics the persona cares about. Used for live-room relevance.
    pub interests: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "engage".into(),
            persona: None,
            interests: vec![
                "construction and building".into(),
                "DIY projects".into(),
                "technology and coding".into(),
                "helping others learn".into(),
                "problem-solving".into(),
            ],
        }
    }
}

// ── Cycle ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Idle sleep between clean cycles, in seconds.
    pub interval_secs: u64,
    /// Random extra idle time, up to this many seconds.
    pub jitter_secs: u64,
    /// Pause between phases inside one cycle.
    pub phase_pause_secs: u64,
    /// Sleep after the first failed cycle. Doubles per consecutive failure.
    pub error_backoff_min_secs: u64,
    /// Ceiling for the failed-cycle sleep.
    pub error_backoff_max_secs: u64,
    /// Conversation entries handed to the response generator as history.
    pub history_limit: usize,
    /// Minimum seconds between queued posts. 0 disables the post phase.
    pub post_interval_secs: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            jitter_secs: 3,
            phase_pause_secs: 2,
            error_backoff_min_secs: 30,
            error_backoff_max_secs: 300,
            history_limit: 5,
            post_interval_secs: 0,
        }
    }
}

// ── Stream ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Live room handle used when none is given on the command line.
    pub space: Option<String>,
    /// Listening poll interval; also the bound on stop latency.
    pub poll_interval_ms: u64,
    /// Analyses scoring above this are forwarded to the speaking stage.
    pub relevance_threshold: f64,
    /// Ring buffer capacity for recent analyses.
    pub buffer_capacity: usize,
    /// Consolidate once the buffer holds more than this many analyses.
    pub consolidation_threshold: usize,
    pub memory_tick_ms: u64,
    pub attention_tick_ms: u64,
    /// Minimum seconds between two utterances.
    pub speak_cooldown_secs: u64,
    /// Bound of each inter-stage queue.
    pub queue_capacity: usize,
    /// How many recent analyses the attention stage looks at.
    pub attention_window: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            space: None,
            poll_interval_ms: 100,
            relevance_threshold: 0.7,
            buffer_capacity: 100,
            consolidation_threshold: 50,
            memory_tick_ms: 1000,
            attention_tick_ms: 500,
            speak_cooldown_secs: 30,
            queue_capacity: 64,
            attention_window: 5,
        }
    }
}

// ── Confidence ─────────────────────────────────────────────────

/// Engagement gate for one context kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Never engage below this score.
    pub min_confidence: f64,
    /// Never engage below this score when the topic is not relevant.
    pub irrelevant_min_confidence: f64,
    /// Above the thresholds, engage with probability proportional to the score.
    pub probabilistic: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            irrelevant_min_confidence: 0.0,
            probabilistic: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub dm_increment: f64,
    pub mention_increment: f64,
    pub space_increment: f64,
    /// Score multiplier applied to the engagement probability for relevant topics.
    pub relevance_multiplier: f64,
    pub dm: GateConfig,
    pub mention: GateConfig,
    pub space: GateConfig,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            dm_increment: 0.15,
            mention_increment: 0.10,
            space_increment: 0.05,
            relevance_multiplier: 1.5,
            dm: GateConfig::default(),
            mention: GateConfig::default(),
            space: GateConfig {
                min_confidence: 0.3,
                irrelevant_min_confidence: 0.5,
                probabilistic: true,
            },
        }
    }
}

// ── Retry ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_secs: 30,
        }
    }
}

// ── Memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// SQLite database holding conversations, the reply ledger, and queued posts.
    pub db_path: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: engage_home().join("engage.db"),
        }
    }
}

// ── Adapters ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptersConfig {
    /// Directory the platform bridge writes `requests.json`, `threads.json`, `mentions.json` into.
    pub inbox_dir: PathBuf,
    /// Base URL of the response generation service.
    pub generator_url: Option<String>,
    pub generator_api_key: Option<String>,
    pub generator_timeout_secs: u64,
    /// JSONL transcript of the live room, appended by the audio pipeline.
    pub transcript_path: PathBuf,
    /// JSONL file our utterances are written to for the audio pipeline.
    pub speech_outbox: PathBuf,
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        let home = engage_home();
        Self {
            inbox_dir: home.join("inbox"),
            generator_url: None,
            generator_api_key: None,
            generator_timeout_secs: 30,
            transcript_path: home.join("space").join("transcript.jsonl"),
            speech_outbox: home.join("space").join("spoken.jsonl"),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "❌",
            WarningSeverity::Warning => "⚠️ ",
            WarningSeverity::Info => "💡",
        };
        write!(f, "{} {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl EngageConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Interests ───
        if self.agent.interests.is_empty() {
            warnings.push(ConfigWarning {
                field: "agent.interests".into(),
                message: "no interests configured: live rooms will never look relevant".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Add a few topics, e.g. interests = [\"technology and coding\"]".into()),
            });
        }

        // ── Cycle backoff ───
        if self.cycle.error_backoff_min_secs > self.cycle.error_backoff_max_secs {
            warnings.push(ConfigWarning {
                field: "cycle.error_backoff_min_secs".into(),
                message: format!(
                    "minimum backoff {}s exceeds maximum {}s",
                    self.cycle.error_backoff_min_secs, self.cycle.error_backoff_max_secs
                ),
                severity: WarningSeverity::Error,
                hint: Some("Defaults are 30 and 300".into()),
            });
        }
        if self.cycle.interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "cycle.interval_secs".into(),
                message: "interval is 0: cycles will run back to back".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 10".into()),
            });
        }

        // ── Retry ───
        if self.retry.max_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "retry.max_attempts".into(),
                message: "max_attempts is 0: no operation would ever run".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 3".into()),
            });
        }

        // ── Stream ───
        if !(0.0..=1.0).contains(&self.stream.relevance_threshold) {
            warnings.push(ConfigWarning {
                field: "stream.relevance_threshold".into(),
                message: format!("threshold {} is out of range", self.stream.relevance_threshold),
                severity: WarningSeverity::Error,
                hint: Some("Relevance scores range 0.0-1.0".into()),
            });
        }
        if self.stream.consolidation_threshold >= self.stream.buffer_capacity {
            warnings.push(ConfigWarning {
                field: "stream.consolidation_threshold".into(),
                message: format!(
                    "threshold {} is not below buffer capacity {}: memory would never consolidate",
                    self.stream.consolidation_threshold, self.stream.buffer_capacity
                ),
                severity: WarningSeverity::Error,
                hint: Some("Defaults are 50 and 100".into()),
            });
        }
        if self.stream.queue_capacity == 0 {
            warnings.push(ConfigWarning {
                field: "stream.queue_capacity".into(),
                message: "queue capacity must be at least 1".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        // ── Confidence gates ───
        for (name, gate) in [
            ("dm", &self.confidence.dm),
            ("mention", &self.confidence.mention),
            ("space", &self.confidence.space),
        ] {
            for (field, value) in [
                ("min_confidence", gate.min_confidence),
                ("irrelevant_min_confidence", gate.irrelevant_min_confidence),
            ] {
                if !(0.0..=1.0).contains(&value) {
                    warnings.push(ConfigWarning {
                        field: format!("confidence.{}.{}", name, field),
                        message: format!("{} is out of range", value),
                        severity: WarningSeverity::Error,
                        hint: Some("Confidence scores range 0.0-1.0".into()),
                    });
                }
            }
        }
        if self.confidence.relevance_multiplier < 1.0 {
            warnings.push(ConfigWarning {
                field: "confidence.relevance_multiplier".into(),
                message: "multiplier below 1.0 makes relevant topics less likely to be engaged".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Default is 1.5".into()),
            });
        }

        // ── Generator ───
        if self.adapters.generator_url.is_none() {
            warnings.push(ConfigWarning {
                field: "adapters.generator_url".into(),
                message: "no response generator configured".into(),
                severity: WarningSeverity::Info,
                hint: Some("Set adapters.generator_url or ENGAGE_GENERATOR_URL to compose replies".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use warden_geofence::{DetectionConfig, IndexConfig, Region, ViolationConfig};
use warden_throttle::RateLimitPolicy;

use crate::error::{WardenError, WardenResult};

/// Denial history settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViolationsConfig {
    /// Trailing window a denial stays on record, in seconds.
    #[serde(default = "default_violation_window")]
    pub window_secs: u64,

    /// Denials within the window at which severity becomes high.
    #[serde(default = "default_high_severity_threshold")]
    pub high_severity_threshold: usize,
}

fn default_violation_window() -> u64 {
    3600
}

fn default_high_severity_threshold() -> usize {
    3
}

impl Default for ViolationsConfig {
    fn default() -> Self {
        Self {
            window_secs: default_violation_window(),
            high_severity_threshold: default_high_severity_threshold(),
        }
    }
}

impl ViolationsConfig {
    pub fn to_tracker_config(&self) -> ViolationConfig {
        ViolationConfig {
            window_ms: self.window_secs.saturating_mul(1000),
            high_severity_threshold: self.high_severity_threshold,
        }
    }
}

/// Throttling settings shared by every action type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThrottleConfig {
    /// Failed records per (actor, action type) before threshold events fire.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u64,

    /// Load samples kept per adaptive policy.
    #[serde(default = "default_load_history")]
    pub load_history: usize,
}

fn default_escalation_threshold() -> u64 {
    5
}

fn default_load_history() -> usize {
    10
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: default_escalation_threshold(),
            load_history: default_load_history(),
        }
    }
}

/// Orchestration pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Bound on each consent or anonymizer call. Elapsed means deny.
    #[serde(default = "default_collaborator_timeout")]
    pub collaborator_timeout_ms: u64,

    /// Append every pipeline outcome to the decision log.
    #[serde(default = "default_audit_enabled")]
    pub audit_enabled: bool,
}

fn default_collaborator_timeout() -> u64 {
    2000
}

fn default_audit_enabled() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout_ms: default_collaborator_timeout(),
            audit_enabled: default_audit_enabled(),
        }
    }
}

/// Building-cluster detection, in config units (seconds). Defaults follow
/// [`DetectionConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_events")]
    pub min_events: usize,
    #[serde(default = "default_radius")]
    pub radius: f64,
    #[serde(default = "default_detection_window")]
    pub window_secs: u64,
    #[serde(default = "default_margin")]
    pub margin: f64,
}

fn default_min_events() -> usize {
    DetectionSection::default().min_events
}

fn default_radius() -> f64 {
    DetectionSection::default().radius
}

fn default_detection_window() -> u64 {
    DetectionSection::default().window_secs
}

fn default_margin() -> f64 {
    DetectionSection::default().margin
}

impl Default for DetectionSection {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

impl From<&DetectionConfig> for DetectionSection {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            enabled: config.enabled,
            min_events: config.min_events,
            radius: config.radius,
            window_secs: config.window_ms / 1000,
            margin: config.margin,
        }
    }
}

impl DetectionSection {
    pub fn to_detection_config(&self) -> DetectionConfig {
        DetectionConfig {
            enabled: self.enabled,
            min_events: self.min_events,
            radius: self.radius,
            window_ms: self.window_secs.saturating_mul(1000),
            margin: self.margin,
        }
    }
}

/// Top-level configuration for the warden engine and binary.
///
/// Loaded from a TOML file (typically `~/.warden/config.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WardenConfig {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub violations: ViolationsConfig,

    #[serde(default)]
    pub throttle: ThrottleConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub detection: DetectionSection,

    /// Regions registered at startup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<Region>,

    /// Rate limit policies configured at startup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rate_limits: Vec<RateLimitPolicy>,
}

/// Returns `$HOME/<suffix>` if HOME is available, otherwise `./<suffix>`.
fn dirs_or_default(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(suffix))
        .unwrap_or_else(|_| PathBuf::from(suffix))
}

impl WardenConfig {
    /// Load configuration from a TOML file. If the file does not exist,
    /// returns a default configuration.
    pub fn load(path: &Path) -> WardenResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(WardenError::Io)?;
        let config: WardenConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> WardenResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| WardenError::Config(format!("TOML serialize error: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(WardenError::Io)?;
        }
        std::fs::write(path, contents).map_err(WardenError::Io)?;
        Ok(())
    }

    /// Validate configuration values, including bootstrap regions and
    /// policies.
    pub fn validate(&self) -> WardenResult<()> {
        self.index
            .validate()
            .map_err(|e| WardenError::Config(format!("[index] {e}")))?;
        if self.violations.window_secs == 0 {
            return Err(WardenError::Config(
                "violations.window_secs must be > 0".into(),
            ));
        }
        if self.violations.high_severity_threshold == 0 {
            return Err(WardenError::Config(
                "violations.high_severity_threshold must be > 0".into(),
            ));
        }
        if self.throttle.escalation_threshold == 0 {
            return Err(WardenError::Config(
                "throttle.escalation_threshold must be > 0".into(),
            ));
        }
        if self.throttle.load_history == 0 {
            return Err(WardenError::Config(
                "throttle.load_history must be > 0".into(),
            ));
        }
        if self.pipeline.collaborator_timeout_ms == 0 {
            return Err(WardenError::Config(
                "pipeline.collaborator_timeout_ms must be > 0".into(),
            ));
        }
        self.detection
            .to_detection_config()
            .validate()
            .map_err(|e| WardenError::Config(format!("[detection] {e}")))?;

        for region in &self.regions {
            region
                .validate()
                .map_err(|e| WardenError::Config(format!("region '{}': {e}", region.id)))?;
        }
        for policy in &self.rate_limits {
            policy
                .validate()
                .map_err(|e| WardenError::Config(format!("rate limit: {e}")))?;
        }
        Ok(())
    }

    /// Return the path to the default config file location.
    pub fn default_config_path() -> PathBuf {
        dirs_or_default(".warden/config.toml")
    }
}

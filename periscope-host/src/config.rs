//! Configuration for the host service.

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use periscope_core::AccessPolicy;
use periscope_core::CaptureConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Authentication and access control.
    pub security: SecurityConfig,
    /// Screen streaming settings.
    pub screen: ScreenConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port for the control channel. Also the base for
    /// per-session data port probing.
    pub port: u16,
}

/// Authentication and access control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Session password. Overridable with --password.
    pub password: String,
    /// If non-empty, only these addresses may connect.
    pub allowed_ips: Vec<String>,
    /// Addresses always refused.
    pub banned_ips: Vec<String>,
    /// Maximum concurrent sessions.
    pub max_sessions: usize,
    /// Failed attempts inside the window before lockout.
    pub max_failed_attempts: usize,
    /// Lockout sliding window in seconds.
    pub lockout_seconds: u64,
}

/// Screen streaming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Target frames per second.
    pub target_fps: u32,
    /// Fraction of changed pixels required to transmit a frame.
    pub change_threshold: f64,
    /// Initial JPEG quality.
    pub initial_quality: u8,
    /// Quality floor.
    pub min_quality: u8,
    /// Quality ceiling.
    pub max_quality: u8,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            security: SecurityConfig::default(),
            screen: ScreenConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { port: 5000 }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            allowed_ips: Vec::new(),
            banned_ips: Vec::new(),
            max_sessions: 5,
            max_failed_attempts: 5,
            lockout_seconds: 300,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            target_fps: 20,
            change_threshold: 0.05,
            initial_quality: 70,
            min_quality: 20,
            max_quality: 95,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading and conversion ───────────────────────────────────────

impl HostConfig {
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Build the core access policy. Unparseable addresses are
    /// skipped with a warning rather than refusing to start.
    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy {
            allowed: parse_ips(&self.security.allowed_ips, "allowed_ips"),
            banned: parse_ips(&self.security.banned_ips, "banned_ips"),
            max_sessions: self.security.max_sessions,
            max_failed_attempts: self.security.max_failed_attempts,
            lockout: std::time::Duration::from_secs(self.security.lockout_seconds),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            target_fps: self.screen.target_fps.max(1),
            change_threshold: self.screen.change_threshold.clamp(0.0, 1.0),
            initial_quality: self.screen.initial_quality,
            min_quality: self.screen.min_quality,
            max_quality: self.screen.max_quality,
        }
    }
}

fn parse_ips(entries: &[String], field: &str) -> Vec<IpAddr> {
    entries
        .iter()
        .filter_map(|s| match s.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!("ignoring unparseable address {s:?} in {field}");
                None
            }
        })
        .collect()
}

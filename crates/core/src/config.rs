use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Source of raw config values: the process environment, or a map in tests.
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Read a profiled key: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_opt(lookup: Lookup<'_>, profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = lookup(&prefixed).filter(|s| !s.is_empty()) {
            return Some(v);
        }
    }
    lookup(key).filter(|s| !s.is_empty())
}

fn profiled_or(lookup: Lookup<'_>, profile: &str, key: &str, default: &str) -> String {
    profiled_opt(lookup, profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_u16(lookup: Lookup<'_>, profile: &str, key: &str, default: u16) -> u16 {
    profiled_opt(lookup, profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_u64(lookup: Lookup<'_>, profile: &str, key: &str, default: u64) -> u64 {
    profiled_opt(lookup, profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_bool(lookup: Lookup<'_>, profile: &str, key: &str, default: bool) -> bool {
    match profiled_opt(lookup, profile, key).map(|v| v.to_ascii_lowercase()) {
        Some(v) if v == "true" || v == "1" || v == "yes" => true,
        Some(v) if v == "false" || v == "0" || v == "no" => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub realtime: RealtimeConfig,
    pub notify: NotifyConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `FARMKONNECT_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = process_env("FARMKONNECT_PROFILE")
            .unwrap_or_default()
            .to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        Self::from_lookup(profile, &process_env)
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(profile: &str, lookup: Lookup<'_>) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_lookup(lookup, p),
            scheduler: SchedulerConfig::from_lookup(lookup, p),
            realtime: RealtimeConfig::from_lookup(lookup, p),
            notify: NotifyConfig::from_lookup(lookup, p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject values the scheduler and aggregator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.budget_check_interval_ms == 0 {
            return Err(ConfigError::invalid("BUDGET_CHECK_INTERVAL_MS", "must be positive"));
        }
        if self.scheduler.digest_interval_ms == 0 {
            return Err(ConfigError::invalid("DIGEST_INTERVAL_MS", "must be positive"));
        }
        if self.realtime.debounce_ms == 0 {
            return Err(ConfigError::invalid("DEBOUNCE_MS", "must be positive"));
        }
        if let Some(max_wait) = self.realtime.max_wait_ms {
            if max_wait < self.realtime.debounce_ms {
                return Err(ConfigError::invalid(
                    "MAX_WAIT_MS",
                    format!("must be at least DEBOUNCE_MS ({})", self.realtime.debounce_ms),
                ));
            }
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:     {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  scheduler:  budget-check every {}ms (enabled={}), digest every {}ms (enabled={})",
            self.scheduler.budget_check_interval_ms,
            self.scheduler.budget_check_enabled,
            self.scheduler.digest_interval_ms,
            self.scheduler.digest_enabled
        );
        tracing::info!(
            "  realtime:   debounce={}ms, max_wait={}, grace={}ms",
            self.realtime.debounce_ms,
            self.realtime
                .max_wait_ms
                .map(|ms| format!("{ms}ms"))
                .unwrap_or_else(|| "(unbounded)".to_string()),
            self.realtime.reconnect_grace_ms
        );
        tracing::info!(
            "  notify:     webhook={}",
            if self.notify.webhook_url.is_some() { "configured" } else { "(none)" }
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "scheduler": {
                "budget_check_interval_ms": self.scheduler.budget_check_interval_ms,
                "budget_check_enabled": self.scheduler.budget_check_enabled,
                "budget_threshold_pct": self.scheduler.budget_threshold_pct,
                "digest_interval_ms": self.scheduler.digest_interval_ms,
                "digest_enabled": self.scheduler.digest_enabled,
                "state_persisted": self.scheduler.job_state_file.is_some(),
            },
            "realtime": {
                "debounce_ms": self.realtime.debounce_ms,
                "max_wait_ms": self.realtime.max_wait_ms,
                "reconnect_grace_ms": self.realtime.reconnect_grace_ms,
            },
            "notify": {
                "webhook_configured": self.notify.webhook_url.is_some(),
                "webhook_method": self.notify.webhook_method,
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup("", &|_: &str| None)
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_lookup(l: Lookup<'_>, p: &str) -> Self {
        Self {
            host: profiled_or(l, p, "HOST", "0.0.0.0"),
            port: profiled_u16(l, p, "PORT", 3001),
            cors_origin: profiled_or(l, p, "CORS_ORIGIN", "*"),
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub budget_check_interval_ms: u64,
    pub budget_check_enabled: bool,
    /// Percentage of a budget line's allocation at which an alert is raised.
    pub budget_threshold_pct: u64,
    pub digest_interval_ms: u64,
    pub digest_enabled: bool,
    /// Where job enable flags and last results are persisted. `None` keeps
    /// state in memory only, so it resets on restart.
    pub job_state_file: Option<PathBuf>,
    /// JSON file with budget lines for the budget check.
    pub budgets_file: Option<PathBuf>,
}

impl SchedulerConfig {
    fn from_lookup(l: Lookup<'_>, p: &str) -> Self {
        Self {
            budget_check_interval_ms: profiled_u64(l, p, "BUDGET_CHECK_INTERVAL_MS", 3_600_000),
            budget_check_enabled: profiled_bool(l, p, "BUDGET_CHECK_ENABLED", true),
            budget_threshold_pct: profiled_u64(l, p, "BUDGET_THRESHOLD_PCT", 80),
            digest_interval_ms: profiled_u64(l, p, "DIGEST_INTERVAL_MS", 86_400_000),
            digest_enabled: profiled_bool(l, p, "DIGEST_ENABLED", true),
            job_state_file: profiled_opt(l, p, "JOB_STATE_FILE").map(PathBuf::from),
            budgets_file: profiled_opt(l, p, "BUDGETS_FILE").map(PathBuf::from),
        }
    }
}

// ── Realtime ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Quiet period after the last update before a batch is flushed.
    pub debounce_ms: u64,
    /// Upper bound on how long the first queued update may wait. `None`
    /// means a continuous stream postpones delivery indefinitely.
    pub max_wait_ms: Option<u64>,
    /// How long the "connection restored" notice stays up.
    pub reconnect_grace_ms: u64,
}

impl RealtimeConfig {
    fn from_lookup(l: Lookup<'_>, p: &str) -> Self {
        Self {
            debounce_ms: profiled_u64(l, p, "DEBOUNCE_MS", 500),
            max_wait_ms: profiled_opt(l, p, "MAX_WAIT_MS").and_then(|v| v.parse().ok()),
            reconnect_grace_ms: profiled_u64(l, p, "RECONNECT_GRACE_MS", 3000),
        }
    }
}

// ── Notify ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub webhook_method: String,
}

impl NotifyConfig {
    fn from_lookup(l: Lookup<'_>, p: &str) -> Self {
        Self {
            webhook_url: profiled_opt(l, p, "NOTIFY_WEBHOOK_URL"),
            webhook_method: profiled_or(l, p, "NOTIFY_WEBHOOK_METHOD", "POST"),
        }
    }
}

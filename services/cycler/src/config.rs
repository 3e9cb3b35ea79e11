//! Configuration for the cycler.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use vmcycle_rotation::SuccessCriterion;

use crate::control::ControllerConfig;
use crate::poller::PollerConfig;
use crate::scheduler::SchedulerConfig;

/// Which worker control backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackendKind {
    /// The worker manager's own command-line tool.
    #[default]
    Manager,
    /// An external automation driver program.
    Scripted,
    /// In-memory workers, for dry runs.
    Mock,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manager" => Ok(Self::Manager),
            "scripted" => Ok(Self::Scripted),
            "mock" => Ok(Self::Mock),
            other => Err(format!(
                "unknown backend '{other}' (expected manager, scripted or mock)"
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Manager => write!(f, "manager"),
            BackendKind::Scripted => write!(f, "scripted"),
            BackendKind::Mock => write!(f, "mock"),
        }
    }
}

/// Cycler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Control backend.
    pub backend: BackendKind,

    /// Path to the worker manager's CLI.
    pub manager_path: PathBuf,

    /// Path to the automation driver, for the scripted backend.
    pub driver_path: Option<PathBuf>,

    /// Slot polling.
    pub poller: PollerConfig,

    /// Per-call control limits.
    pub controller: ControllerConfig,

    /// Decision loop timings and success threshold.
    pub scheduler: SchedulerConfig,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            manager_path: PathBuf::from("MuMuManager.exe"),
            driver_path: None,
            poller: PollerConfig::default(),
            controller: ControllerConfig::default(),
            scheduler: SchedulerConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(backend) = parse(&lookup, "VMCYCLE_BACKEND")? {
            config.backend = backend;
        }
        if let Some(path) = lookup("VMCYCLE_MANAGER_PATH") {
            config.manager_path = PathBuf::from(path);
        }
        config.driver_path = lookup("VMCYCLE_DRIVER").map(PathBuf::from);

        let poller = &mut config.poller;
        if let Some(slots) = parse(&lookup, "VMCYCLE_SLOT_COUNT")? {
            poller.slot_count = slots;
        }
        if let Some(n) = parse(&lookup, "VMCYCLE_QUERY_CONCURRENCY")? {
            poller.query_concurrency = n;
        }
        if let Some(ms) = parse(&lookup, "VMCYCLE_QUERY_TIMEOUT_MS")? {
            poller.query_timeout = Duration::from_millis(ms);
        }

        let controller = &mut config.controller;
        if let Some(secs) = parse(&lookup, "VMCYCLE_CONTROL_TIMEOUT_SECS")? {
            controller.call_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse(&lookup, "VMCYCLE_CONTROL_SETTLE_MS")? {
            controller.settle = Duration::from_millis(ms);
        }

        let scheduler = &mut config.scheduler;
        if let Some(secs) = parse(&lookup, "VMCYCLE_VERIFY_WINDOW_SECS")? {
            scheduler.verification_window = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "VMCYCLE_VERIFY_POLL_SECS")? {
            scheduler.verification_poll = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "VMCYCLE_START_SETTLE_SECS")? {
            scheduler.start_settle = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "VMCYCLE_CYCLE_SETTLE_SECS")? {
            scheduler.cycle_settle = Duration::from_secs(secs);
        }
        if let Some(criterion) = parse::<SuccessCriterion>(&lookup, "VMCYCLE_SUCCESS_CRITERION")? {
            scheduler.success_criterion = criterion;
        }

        if let Some(level) = lookup("VMCYCLE_LOG_LEVEL") {
            config.log_level = level;
        }

        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{e}"))
                .with_context(|| format!("invalid value for {key}: '{raw}'"))
        })
        .transpose()
}

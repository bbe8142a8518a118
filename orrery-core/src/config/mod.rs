//! Guardrail policy configuration.
//!
//! Every bound the loop enforces is a policy constant, not a hard-coded
//! literal: the conflict-resolution and target-preference rules in
//! particular are empirically tuned product defaults, so deployments can
//! adjust them from a TOML file without touching the loop.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_CONFIG_PATH: &str = "config/policy.toml";

const DEFAULT_MAX_ITERATIONS: u32 = 6;
const DEFAULT_MAX_MALFORMED_RETRIES: u32 = 2;
const DEFAULT_MAX_PROSE_RETRIES: u32 = 1;
const DEFAULT_MAX_ROUTE_CHECKS: u32 = 1;
const DEFAULT_MAX_CONSECUTIVE_FOLLOWUPS: u32 = 3;
const DEFAULT_SEARCH_LATENCY_FLOOR_MS: u64 = 3000;
const DEFAULT_LATENCY_BUDGET_MS: u64 = 10_000;
const DEFAULT_TOOL_MAX_RETRIES: u32 = 2;
const DEFAULT_STALL_FAILURE_THRESHOLD: u32 = 2;

fn default_critical_domains() -> BTreeSet<String> {
    ["lock", "alarm_control_panel", "garage_door", "gate"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Tunable guardrail bounds for the agent loop and tool layer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentPolicy {
    /// Default model-call bound per turn when the caller supplies none.
    pub max_iterations: u32,
    /// Corrective retries for malformed tool-call arguments.
    pub max_malformed_retries: u32,
    /// Corrective retries when the model writes a tool call as prose.
    pub max_prose_retries: u32,
    /// Missing-route classifier consultations per turn.
    pub max_route_checks: u32,
    /// Consecutive clarification requests before the turn aborts.
    pub max_consecutive_followups: u32,
    /// Minimum latency budget granted to search-class tools.
    pub search_latency_floor_ms: u64,
    /// Latency budget handed to tools when the caller supplies none.
    pub default_latency_budget_ms: u64,
    /// Retry count handed to tools when the caller supplies none.
    pub default_tool_max_retries: u32,
    /// Entity domains whose control actions require explicit confirmation.
    #[serde(default = "default_critical_domains")]
    pub critical_domains: BTreeSet<String>,
    /// Consecutive missing-query iterations before search stalls force an
    /// evidence-only answer.
    pub stall_failure_threshold: u32,
}

impl Default for AgentPolicy {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_malformed_retries: DEFAULT_MAX_MALFORMED_RETRIES,
            max_prose_retries: DEFAULT_MAX_PROSE_RETRIES,
            max_route_checks: DEFAULT_MAX_ROUTE_CHECKS,
            max_consecutive_followups: DEFAULT_MAX_CONSECUTIVE_FOLLOWUPS,
            search_latency_floor_ms: DEFAULT_SEARCH_LATENCY_FLOOR_MS,
            default_latency_budget_ms: DEFAULT_LATENCY_BUDGET_MS,
            default_tool_max_retries: DEFAULT_TOOL_MAX_RETRIES,
            critical_domains: default_critical_domains(),
            stall_failure_threshold: DEFAULT_STALL_FAILURE_THRESHOLD,
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse policy from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl AgentPolicy {
    /// Loads the policy from `path`, or from the default location when
    /// `None`. A missing default file yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, PolicyError> {
        if let Some(path) = path {
            return read_policy(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        match read_policy(default_path) {
            Ok(policy) => Ok(policy),
            Err(PolicyError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!("Policy file not found; using defaults");
                Ok(Self::default())
            }
            Err(other) => Err(other),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn is_critical_domain(&self, domain: &str) -> bool {
        self.critical_domains.contains(domain)
    }
}

fn read_policy(path: &Path) -> Result<AgentPolicy, PolicyError> {
    debug!(path = %path.display(), "Reading agent policy file");
    let content = fs::read_to_string(path).map_err(|source| PolicyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    AgentPolicy::from_toml_str(&content).map_err(|source| PolicyError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

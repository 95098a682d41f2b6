// Runtime configuration, environment-driven

use std::time::Duration;

/// Job engine settings
#[derive(Debug, Clone)]
pub struct JobEngineConfig {
    pub poll_interval: Duration,
    pub job_timeout_minutes: i64,
    pub max_workers: usize,
}

impl Default for JobEngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            job_timeout_minutes: 30,
            max_workers: 5,
        }
    }
}

impl JobEngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: env_secs("JOB_POLL_INTERVAL", defaults.poll_interval),
            job_timeout_minutes: env_parse("JOB_TIMEOUT_MINUTES", defaults.job_timeout_minutes),
            max_workers: env_parse("JOB_MAX_WORKERS", defaults.max_workers),
        }
    }
}

/// Instance completion poller settings
#[derive(Debug, Clone)]
pub struct InstancePollerConfig {
    pub poll_interval: Duration,
    pub max_workers: usize,
    pub batch_limit: i64,
}

impl Default for InstancePollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_workers: 3,
            batch_limit: 100,
        }
    }
}

impl InstancePollerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: env_secs("INSTANCE_POLL_INTERVAL", defaults.poll_interval),
            max_workers: env_parse("INSTANCE_POLL_WORKERS", defaults.max_workers),
            batch_limit: defaults.batch_limit,
        }
    }
}

/// Instance sync settings
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bigram-Jaccard threshold for duplicate job titles
    pub duplicate_title_threshold: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            duplicate_title_threshold:
                ambit_core::similarity::DEFAULT_TITLE_SIMILARITY_THRESHOLD,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            duplicate_title_threshold: env_parse(
                "DUPLICATE_TITLE_THRESHOLD",
                defaults.duplicate_title_threshold,
            ),
        }
    }
}

/// Agent runtime settings
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub model: String,
    pub max_loop_iterations: usize,
    pub llm_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_loop_iterations: 12,
            llm_timeout_secs: 60,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model: std::env::var("AGENT_MODEL").unwrap_or(defaults.model),
            max_loop_iterations: env_parse("AGENT_MAX_ITERATIONS", defaults.max_loop_iterations),
            llm_timeout_secs: env_parse("AGENT_LLM_TIMEOUT", defaults.llm_timeout_secs),
        }
    }
}

/// Memory service settings
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1995".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl MemoryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("MEMORY_BASE_URL").unwrap_or(defaults.base_url),
            timeout: env_secs("MEMORY_TIMEOUT", defaults.timeout),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

// puc-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};

use directories::UserDirs;
use tracing::debug;

use super::error::{PucError, Result};

const DEFAULT_EVENT_CAPACITY: usize = 256;
const MAX_DEFAULT_WORKERS: usize = 6;
const STATE_DIR_NAME: &str = ".puc";

#[derive(Debug, Clone)]
pub struct Config {
    /// Root for logs and other local state.
    pub puc_root: PathBuf,
    /// Provider name used when none of a module's units names one.
    pub default_provider: Option<String>,
    /// Threads draining work item lanes.
    pub worker_threads: usize,
    /// Capacity of the broadcast channel carrying container events.
    pub event_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading puc configuration");

        let puc_root = env::var("PUC_ROOT")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let fallback = default_root();
                debug!(
                    "PUC_ROOT environment variable not set or empty, falling back to default: {}",
                    fallback.display()
                );
                fallback
            });

        let default_provider = env::var("PUC_DEFAULT_PROVIDER")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let worker_threads = match env::var("PUC_WORKER_THREADS") {
            Ok(raw) => parse_positive("PUC_WORKER_THREADS", &raw)?,
            Err(_) => default_worker_threads(),
        };

        let event_capacity = match env::var("PUC_EVENT_CAPACITY") {
            Ok(raw) => parse_positive("PUC_EVENT_CAPACITY", &raw)?,
            Err(_) => DEFAULT_EVENT_CAPACITY,
        };

        debug!(
            "Configuration loaded: root={}, default_provider={:?}, workers={}",
            puc_root.display(),
            default_provider,
            worker_threads
        );
        Ok(Self {
            puc_root,
            default_provider,
            worker_threads,
            event_capacity,
        })
    }

    pub fn puc_root(&self) -> &Path {
        &self.puc_root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.puc_root.join("logs")
    }

    pub fn with_default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = Some(provider.into());
        self
    }

    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers.max(1);
        self
    }
}

impl Default for Config {
    /// Built-in defaults, ignoring the environment.
    fn default() -> Self {
        Self {
            puc_root: default_root(),
            default_provider: None,
            worker_threads: default_worker_threads(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

pub fn load_config() -> Result<Config> {
    Config::load()
}

fn default_root() -> PathBuf {
    UserDirs::new()
        .map_or_else(|| PathBuf::from("/tmp"), |ud| ud.home_dir().to_path_buf())
        .join(STATE_DIR_NAME)
}

fn default_worker_threads() -> usize {
    std::cmp::max(1, num_cpus::get_physical().saturating_sub(1)).min(MAX_DEFAULT_WORKERS)
}

fn parse_positive(name: &str, raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(PucError::Config(format!(
            "{name} must be a positive integer, got '{raw}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable() {
        let config = Config::default();
        assert!(config.worker_threads >= 1 && config.worker_threads <= MAX_DEFAULT_WORKERS);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert!(config.logs_dir().ends_with(".puc/logs"));
    }

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive("X", " 4 ").unwrap(), 4);
        assert!(parse_positive("X", "0").is_err());
        assert!(parse_positive("X", "four").is_err());
    }

    #[test]
    fn test_builders_override() {
        let config = Config::default()
            .with_default_provider("org.eclipse.persistence.jpa.PersistenceProvider")
            .with_worker_threads(0);
        assert_eq!(config.worker_threads, 1);
        assert_eq!(
            config.default_provider.as_deref(),
            Some("org.eclipse.persistence.jpa.PersistenceProvider")
        );
    }
}

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Redis connection URL (cache and event stream)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Port of the event collector service
    #[serde(default = "default_collector_port")]
    pub collector_port: u16,

    /// Port of the recommendations service
    #[serde(default = "default_recs_port")]
    pub recs_port: u16,

    /// Origin allowed to post interactions from the browser
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,

    /// Exchange the interaction events are published to
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Routing key binding the interaction queue to the exchange
    #[serde(default = "default_routing_key")]
    pub routing_key: String,

    /// Queue holding interaction events
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Max deliveries taken from the queue in advance
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: usize,

    /// Append-only interaction log
    #[serde(default = "default_interactions_path")]
    pub interactions_path: PathBuf,

    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    #[serde(default = "default_top_items_interval_secs")]
    pub top_items_interval_secs: u64,

    /// Number of items kept in the `top_items` list
    #[serde(default = "default_top_items_limit")]
    pub top_items_limit: usize,

    #[serde(default = "default_retrain_interval_secs")]
    pub retrain_interval_secs: u64,

    /// Hyperparameter candidates evaluated per retrain
    #[serde(default = "default_tuning_trials")]
    pub tuning_trials: usize,

    /// Length of personalized lists and cutoff of the evaluation metrics
    #[serde(default = "default_model_top_k")]
    pub model_top_k: usize,

    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    /// Length of the `/recs` response
    #[serde(default = "default_recs_size")]
    pub recs_size: usize,

    /// Probability of answering `/recs` with a purely random sample
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_collector_port() -> u16 {
    5001
}

fn default_recs_port() -> u16 {
    5002
}

fn default_cors_origin() -> String {
    "http://localhost:8000".to_string()
}

fn default_exchange() -> String {
    "user.interact".to_string()
}

fn default_routing_key() -> String {
    "user.interact.message".to_string()
}

fn default_queue_name() -> String {
    "user_interactions".to_string()
}

fn default_prefetch_count() -> usize {
    10
}

fn default_interactions_path() -> PathBuf {
    PathBuf::from("./data/interactions.csv")
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_top_items_interval_secs() -> u64 {
    10
}

fn default_top_items_limit() -> usize {
    500
}

fn default_retrain_interval_secs() -> u64 {
    600
}

fn default_tuning_trials() -> usize {
    100
}

fn default_model_top_k() -> usize {
    20
}

fn default_random_seed() -> u64 {
    42
}

fn default_recs_size() -> usize {
    20
}

fn default_epsilon() -> f64 {
    0.05
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            host: default_host(),
            collector_port: default_collector_port(),
            recs_port: default_recs_port(),
            cors_origin: default_cors_origin(),
            exchange: default_exchange(),
            routing_key: default_routing_key(),
            queue_name: default_queue_name(),
            prefetch_count: default_prefetch_count(),
            interactions_path: default_interactions_path(),
            flush_interval_secs: default_flush_interval_secs(),
            top_items_interval_secs: default_top_items_interval_secs(),
            top_items_limit: default_top_items_limit(),
            retrain_interval_secs: default_retrain_interval_secs(),
            tuning_trials: default_tuning_trials(),
            model_top_k: default_model_top_k(),
            random_seed: default_random_seed(),
            recs_size: default_recs_size(),
            epsilon: default_epsilon(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the services cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.epsilon) {
            anyhow::bail!("EPSILON must be within [0, 1], got {}", self.epsilon);
        }
        if self.prefetch_count == 0 {
            anyhow::bail!("PREFETCH_COUNT must be positive");
        }
        if self.recs_size == 0 {
            anyhow::bail!("RECS_SIZE must be positive");
        }
        if self.flush_interval_secs == 0
            || self.top_items_interval_secs == 0
            || self.retrain_interval_secs == 0
        {
            anyhow::bail!("pipeline intervals must be positive");
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn top_items_interval(&self) -> Duration {
        Duration::from_secs(self.top_items_interval_secs)
    }

    pub fn retrain_interval(&self) -> Duration {
        Duration::from_secs(self.retrain_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_name, "user_interactions");
        assert_eq!(config.routing_key, "user.interact.message");
        assert_eq!(config.top_items_limit, 500);
    }

    #[test]
    fn test_envy_fills_defaults() {
        let vars = vec![
            ("RECS_SIZE".to_string(), "12".to_string()),
            ("EPSILON".to_string(), "0.2".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();
        assert_eq!(config.recs_size, 12);
        assert_eq!(config.epsilon, 0.2);
        assert_eq!(config.prefetch_count, 10);
        assert_eq!(config.interactions_path, PathBuf::from("./data/interactions.csv"));
    }

    #[test]
    fn test_rejects_out_of_range_epsilon() {
        let config = Config {
            epsilon: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let config = Config {
            flush_interval_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::Error;

pub const ENV_PREFIX: &str = "ENRICH_";

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Endpoint of the SQS-compatible broker.
    pub queue_endpoint: Url,
    pub input_queue: String,
    pub output_queue: String,
    pub dead_letter_queue: String,
    /// Admission limit: how many messages may be processed at once.
    pub concurrency: usize,
    pub max_retries: u32,

    pub db_path: Option<String>,
    pub region: Option<String>,
    pub drain_timeout_secs: Option<u64>,
    pub wait_time_secs: Option<u64>,
    pub retry_delay_secs: Option<u64>,
    pub min_latency_ms: Option<u64>,
    pub max_latency_ms: Option<u64>,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        let config = envy::prefixed(ENV_PREFIX).from_env::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::prefixed(ENV_PREFIX).from_iter::<_, Self>(vars)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.concurrency == 0 {
            return Err(Error::invalid_config("concurrency must be at least 1"));
        }

        if self.min_latency() > self.max_latency() {
            return Err(Error::invalid_config(
                "min_latency_ms must not exceed max_latency_ms",
            ));
        }

        for (name, value) in [
            ("input_queue", &self.input_queue),
            ("output_queue", &self.output_queue),
            ("dead_letter_queue", &self.dead_letter_queue),
        ] {
            if value.trim().is_empty() {
                return Err(Error::invalid_config(format!("{name} must not be empty")));
            }
        }

        if self.input_queue == self.dead_letter_queue {
            return Err(Error::invalid_config(
                "dead_letter_queue must differ from input_queue",
            ));
        }

        Ok(())
    }

    pub fn db_path(&self) -> Option<&str> {
        self.db_path.as_deref()
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or("us-east-1")
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs.unwrap_or(30))
    }

    /// Long-poll duration for a single receive call. SQS caps this at 20 seconds.
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs.unwrap_or(10).min(20))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs.unwrap_or(0))
    }

    pub fn min_latency(&self) -> Duration {
        Duration::from_millis(self.min_latency_ms.unwrap_or(2_000))
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency_ms.unwrap_or(15_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("QUEUE_ENDPOINT", "http://localhost:8080/sqs"),
            ("INPUT_QUEUE", "texts"),
            ("OUTPUT_QUEUE", "results"),
            ("DEAD_LETTER_QUEUE", "texts-dlq"),
            ("CONCURRENCY", "4"),
            ("MAX_RETRIES", "3"),
        ]
    }

    #[test]
    fn test_load_with_defaults() {
        let config = Config::from_iter(vars(&required())).unwrap();

        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.input_queue, "texts");
        assert_eq!(config.db_path(), None);
        assert_eq!(config.region(), "us-east-1");
        assert_eq!(config.drain_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_delay(), Duration::ZERO);
        assert_eq!(config.min_latency(), Duration::from_secs(2));
        assert_eq!(config.max_latency(), Duration::from_secs(15));
    }

    #[test]
    fn test_missing_required_field_is_fatal() {
        for skipped in ["INPUT_QUEUE", "CONCURRENCY", "MAX_RETRIES", "QUEUE_ENDPOINT"] {
            let pairs: Vec<_> = required()
                .into_iter()
                .filter(|(k, _)| *k != skipped)
                .collect();

            let result = Config::from_iter(vars(&pairs));
            assert!(
                matches!(result, Err(Error::Env { .. })),
                "expected env error when {skipped} is missing"
            );
        }
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut pairs = required();
        pairs.retain(|(k, _)| *k != "CONCURRENCY");
        pairs.push(("CONCURRENCY", "0"));
        assert!(matches!(
            Config::from_iter(vars(&pairs)),
            Err(Error::InvalidConfig { .. })
        ));

        let mut pairs = required();
        pairs.push(("MIN_LATENCY_MS", "500"));
        pairs.push(("MAX_LATENCY_MS", "100"));
        assert!(matches!(
            Config::from_iter(vars(&pairs)),
            Err(Error::InvalidConfig { .. })
        ));

        let mut pairs = required();
        pairs.retain(|(k, _)| *k != "QUEUE_ENDPOINT");
        pairs.push(("QUEUE_ENDPOINT", "not a url"));
        assert!(Config::from_iter(vars(&pairs)).is_err());
    }

    #[test]
    fn test_wait_time_is_capped() {
        let mut pairs = required();
        pairs.push(("WAIT_TIME_SECS", "60"));
        let config = Config::from_iter(vars(&pairs)).unwrap();
        assert_eq!(config.wait_time(), Duration::from_secs(20));
    }
}

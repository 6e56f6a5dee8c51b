//! The enrichment step applied to `update` records.
//!
//! Enrichment is treated as an opaque, blocking function. The consumer runs
//! each invocation on tokio's blocking pool so a slow or panicking call never
//! stalls the receive loop or any sibling message.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::{
    error::Error,
    record::{EnrichedResult, Record, Status},
};

/// Turns a record into an [`EnrichedResult`].
///
/// Implementations may block for a long time; they are always called from a
/// blocking thread.
pub trait Enrichment: Send + Sync + 'static {
    fn enrich(&self, record: Record) -> Result<EnrichedResult, Error>;
}

impl<F> Enrichment for F
where
    F: Fn(Record) -> Result<EnrichedResult, Error> + Send + Sync + 'static,
{
    fn enrich(&self, record: Record) -> Result<EnrichedResult, Error> {
        self(record)
    }
}

/// Stable score in `0..100` derived from the text content.
pub fn score_text(text: &str) -> u8 {
    let digest = Sha256::digest(text.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % 100) as u8
}

/// Reference enrichment: sleeps for a random duration in a configured range,
/// burns a little CPU, then scores the text.
#[derive(Debug, Clone)]
pub struct LatencyEnrichment {
    min: Duration,
    max: Duration,
}

impl LatencyEnrichment {
    pub fn new(min: Duration, max: Duration) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self { min, max }
    }

    /// No artificial latency at all.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    fn pick_latency(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

impl Enrichment for LatencyEnrichment {
    fn enrich(&self, record: Record) -> Result<EnrichedResult, Error> {
        let latency = self.pick_latency();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let checksum = (0..10_000u64).fold(0u64, |acc, i| acc.wrapping_add(i * i));
        tracing::trace!(msg_id = %record.msg_id, checksum, "cpu pass complete");

        let score = record.scoring_text().map(|text| score_text(&text));

        Ok(EnrichedResult {
            record,
            status: Status::Done,
            duration: latency,
            score,
        })
    }
}

/// Runs one enrichment on the blocking pool.
///
/// A panic inside the enrichment is reported as an error for this record only.
pub async fn run_isolated(
    enrichment: Arc<dyn Enrichment>,
    record: Record,
) -> Result<EnrichedResult, Error> {
    let msg_id = record.msg_id.clone();

    tokio::task::spawn_blocking(move || enrichment.enrich(record))
        .await
        .map_err(|e| Error::enrichment(msg_id, format!("enrichment task aborted: {e}")))?
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::record::MessageType;

    fn update(msg_id: &str, text: Option<&str>) -> Record {
        let mut record = Record::new(msg_id, MessageType::Update);
        record.text = text.map(Value::from);
        record
    }

    #[test]
    fn test_score_is_stable_and_bounded() {
        let a = score_text("hello world");
        assert_eq!(a, score_text("hello world"));
        assert!(a < 100);
        assert!(score_text("") < 100);
    }

    #[test]
    fn test_enrich_with_text() {
        let result = LatencyEnrichment::immediate()
            .enrich(update("msg_001", Some("test")))
            .unwrap();

        assert_eq!(result.record.msg_id, "msg_001");
        assert_eq!(result.status, Status::Done);
        assert_eq!(result.score, Some(score_text("test")));
    }

    #[test]
    fn test_enrich_without_text() {
        let result = LatencyEnrichment::immediate()
            .enrich(update("msg_003", None))
            .unwrap();

        assert_eq!(result.score, None);
        assert_eq!(result.record.text, None);
    }

    #[test]
    fn test_latency_stays_in_range() {
        let enrichment =
            LatencyEnrichment::new(Duration::from_millis(5), Duration::from_millis(1));
        let result = enrichment.enrich(update("msg", Some("x"))).unwrap();

        assert!(result.duration >= Duration::from_millis(1));
        assert!(result.duration <= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let enrichment: Arc<dyn Enrichment> =
            Arc::new(|_record: Record| -> Result<EnrichedResult, Error> { panic!("boom") });

        let err = run_isolated(enrichment, update("msg_p", None))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Enrichment { ref msg_id, .. } if msg_id == "msg_p"));
    }
}

//! Probabilistic admission of records before batching

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::debug;

use crate::domain::{Record, RecordKind};

/// Keeps a fraction of creates and exactly the updates that follow them
///
/// A create is admitted with probability `rate` and its id remembered. An
/// update is admitted only when its id is remembered; the id is forgotten
/// once that update is admitted. Without a rate every record passes.
#[derive(Debug, Default)]
pub struct SamplingFilter {
    rate: Option<f64>,
    accepted: Mutex<HashSet<String>>,
}

impl SamplingFilter {
    pub fn new(rate: Option<f64>) -> Self {
        debug!(?rate, "SamplingFilter::new: called");
        Self {
            rate: rate.map(|r| r.clamp(0.0, 1.0)),
            accepted: Mutex::new(HashSet::new()),
        }
    }

    /// Filter that admits everything
    pub fn pass_through() -> Self {
        Self::new(None)
    }

    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    /// Decide whether `record` continues into the batch buffer
    pub fn admit(&self, record: &Record) -> bool {
        let Some(rate) = self.rate else {
            return true;
        };

        let mut accepted = self.accepted.lock().expect("sampling lock poisoned");
        match record.kind {
            RecordKind::Create => {
                if rand::random::<f64>() < rate {
                    accepted.insert(record.id.clone());
                    true
                } else {
                    debug!(id = %record.id, "SamplingFilter::admit: create sampled out");
                    false
                }
            }
            RecordKind::Update => {
                let kept = accepted.remove(&record.id);
                if !kept {
                    debug!(id = %record.id, "SamplingFilter::admit: update for unsampled id dropped");
                }
                kept
            }
        }
    }

    /// Number of sampled-in ids still awaiting their update
    pub fn tracked(&self) -> usize {
        self.accepted.lock().expect("sampling lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create(id: &str) -> Record {
        Record::create(id, json!({"name": id}))
    }

    fn update(id: &str) -> Record {
        Record::update(id, json!({"status": "done"}))
    }

    #[test]
    fn test_no_rate_admits_everything() {
        let filter = SamplingFilter::pass_through();
        assert!(filter.admit(&create("a")));
        assert!(filter.admit(&update("a")));
        assert!(filter.admit(&update("never-created")));
        assert_eq!(filter.tracked(), 0);
    }

    #[test]
    fn test_rate_zero_drops_creates_and_their_updates() {
        let filter = SamplingFilter::new(Some(0.0));
        assert!(!filter.admit(&create("a")));
        assert!(!filter.admit(&update("a")));
    }

    #[test]
    fn test_rate_one_keeps_pairs() {
        let filter = SamplingFilter::new(Some(1.0));
        assert!(filter.admit(&create("a")));
        assert_eq!(filter.tracked(), 1);
        assert!(filter.admit(&update("a")));
        assert_eq!(filter.tracked(), 0);
    }

    #[test]
    fn test_update_for_unsampled_id_dropped() {
        let filter = SamplingFilter::new(Some(1.0));
        assert!(!filter.admit(&update("stranger")));
    }

    #[test]
    fn test_id_forgotten_after_first_update() {
        let filter = SamplingFilter::new(Some(1.0));
        assert!(filter.admit(&create("a")));
        assert!(filter.admit(&update("a")));
        assert!(!filter.admit(&update("a")));
    }

    #[test]
    fn test_partial_rate_keeps_updates_consistent() {
        let filter = SamplingFilter::new(Some(0.5));
        let mut kept_creates = HashSet::new();
        for i in 0..200 {
            let id = format!("r{i}");
            if filter.admit(&create(&id)) {
                kept_creates.insert(id);
            }
        }
        for i in 0..200 {
            let id = format!("r{i}");
            assert_eq!(filter.admit(&update(&id)), kept_creates.contains(&id));
        }
        assert_eq!(filter.tracked(), 0);
    }

    #[test]
    fn test_rate_clamped() {
        assert_eq!(SamplingFilter::new(Some(1.5)).rate(), Some(1.0));
        assert_eq!(SamplingFilter::new(Some(-0.2)).rate(), Some(0.0));
    }
}

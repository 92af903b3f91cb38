//! Admission control over the inbound event stream: deduplication, rate
//! limiting, staleness and re-entry filtering.
//!
//! Rejection is silent filtering, never an error. The gate owns the dedup
//! ledger and the in-flight set; nothing else touches them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use crate::config::AdmissionConfig;
use crate::transport::InboundMessage;

pub struct AdmissionGate {
    config: AdmissionConfig,
    ledger: VecDeque<String>,
    ledger_index: HashSet<String>,
    in_flight: HashMap<String, Instant>,
    last_admitted: Option<Instant>,
}

fn fingerprint(msg: &InboundMessage) -> String {
    format!("{}:{}:{}", msg.conversation_id, msg.message_id, msg.timestamp)
}

impl AdmissionGate {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            ledger: VecDeque::new(),
            ledger_index: HashSet::new(),
            in_flight: HashMap::new(),
            last_admitted: None,
        }
    }

    /// Decide whether `msg` enters the pipeline. On admission the
    /// fingerprint is recorded, the message id is marked in-flight and the
    /// rate-limit clock restarts; a rejected message leaves no trace.
    pub fn admit(&mut self, msg: &InboundMessage, now_epoch: i64) -> bool {
        if msg.from_self {
            return false;
        }
        if msg.text.trim().is_empty() {
            return false;
        }

        let fp = fingerprint(msg);
        if self.ledger_index.contains(&fp) {
            tracing::debug!("skip duplicate message {}", msg.message_id);
            return false;
        }

        if now_epoch - msg.timestamp > self.config.max_message_age_secs {
            tracing::debug!("skip stale message {}", msg.message_id);
            return false;
        }

        if self.in_flight.contains_key(&msg.message_id) {
            tracing::debug!("skip in-flight message {}", msg.message_id);
            return false;
        }

        let now = Instant::now();
        if let Some(last) = self.last_admitted {
            if now.duration_since(last) < self.config.min_message_interval() {
                tracing::debug!("rate limited message {}", msg.message_id);
                return false;
            }
        }

        if self.ledger.len() >= self.config.max_tracked_messages {
            if let Some(oldest) = self.ledger.pop_front() {
                self.ledger_index.remove(&oldest);
            }
        }
        self.ledger.push_back(fp.clone());
        self.ledger_index.insert(fp);
        self.in_flight.insert(msg.message_id.clone(), now);
        self.last_admitted = Some(now);
        true
    }

    /// Clear the in-flight entry once downstream processing finished,
    /// whether it succeeded or not.
    pub fn finish(&mut self, message_id: &str) {
        self.in_flight.remove(message_id);
    }

    /// Drop in-flight entries older than the queue timeout. Guards against
    /// processing that never signals completion.
    pub fn sweep_stale(&mut self) {
        let timeout = self.config.queue_timeout();
        let before = self.in_flight.len();
        self.in_flight.retain(|_, started| started.elapsed() < timeout);
        let swept = before - self.in_flight.len();
        if swept > 0 {
            tracing::warn!("swept {} abandoned in-flight entries", swept);
        }
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, timestamp: i64) -> InboundMessage {
        InboundMessage {
            conversation_id: "group-1".to_string(),
            sender_id: "42".to_string(),
            text: "*غوكو*".to_string(),
            timestamp,
            message_id: id.to_string(),
            from_self: false,
        }
    }

    fn gate_with(config: AdmissionConfig) -> AdmissionGate {
        AdmissionGate::new(config)
    }

    fn open_gate() -> AdmissionGate {
        gate_with(AdmissionConfig {
            min_message_interval_ms: 0,
            ..AdmissionConfig::default()
        })
    }

    #[test]
    fn same_fingerprint_is_admitted_once() {
        let mut gate = open_gate();
        let m = msg("m1", 1000);
        assert!(gate.admit(&m, 1001));
        gate.finish("m1");
        assert!(!gate.admit(&m, 1002));
    }

    #[test]
    fn rejects_own_and_empty_messages() {
        let mut gate = open_gate();
        let mut own = msg("m1", 1000);
        own.from_self = true;
        assert!(!gate.admit(&own, 1001));

        let mut blank = msg("m2", 1000);
        blank.text = "   ".to_string();
        assert!(!gate.admit(&blank, 1001));
    }

    #[test]
    fn rejects_messages_past_max_age() {
        let mut gate = open_gate();
        assert!(!gate.admit(&msg("m1", 1000), 1000 + 31));
        assert!(gate.admit(&msg("m2", 1000), 1000 + 30));
    }

    #[test]
    fn rejects_while_in_flight_and_readmits_new_fingerprint_after_finish() {
        let mut gate = open_gate();
        assert!(gate.admit(&msg("m1", 1000), 1001));
        // Same id, different timestamp: new fingerprint, but still in-flight.
        assert!(!gate.admit(&msg("m1", 1001), 1002));
        gate.finish("m1");
        assert!(gate.admit(&msg("m1", 1001), 1002));
    }

    #[test]
    fn enforces_minimum_interval() {
        let mut gate = gate_with(AdmissionConfig {
            min_message_interval_ms: 60_000,
            ..AdmissionConfig::default()
        });
        assert!(gate.admit(&msg("m1", 1000), 1001));
        assert!(!gate.admit(&msg("m2", 1000), 1001));
    }

    #[test]
    fn ledger_evicts_oldest_at_capacity() {
        let mut gate = gate_with(AdmissionConfig {
            min_message_interval_ms: 0,
            max_tracked_messages: 2,
            ..AdmissionConfig::default()
        });
        assert!(gate.admit(&msg("m1", 1000), 1001));
        assert!(gate.admit(&msg("m2", 1000), 1001));
        assert!(gate.admit(&msg("m3", 1000), 1001)); // evicts m1's fingerprint
        gate.finish("m1");
        assert!(gate.admit(&msg("m1", 1000), 1001));
    }

    #[test]
    fn sweep_clears_only_expired_entries() {
        let mut gate = gate_with(AdmissionConfig {
            min_message_interval_ms: 0,
            queue_timeout_ms: 60_000,
            ..AdmissionConfig::default()
        });
        assert!(gate.admit(&msg("m1", 1000), 1001));
        gate.sweep_stale();
        assert_eq!(gate.in_flight_len(), 1);

        let mut expiring = gate_with(AdmissionConfig {
            min_message_interval_ms: 0,
            queue_timeout_ms: 0,
            ..AdmissionConfig::default()
        });
        assert!(expiring.admit(&msg("m1", 1000), 1001));
        expiring.sweep_stale();
        assert_eq!(expiring.in_flight_len(), 0);
    }
}

//! Device fingerprint issuance, header composition, jitter, and timing
//! self-inspection (a crude client-side check for robotic regularity).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;

use bc_common::types::{DeviceDescriptor, FingerprintRecord, TimingEntry, TimingOp, TimingRing};

const DEVICE_POOL: &[(&str, &str, &str, &str, &str)] = &[
    ("Samsung", "Galaxy S21", "Android 13", "Mozilla/5.0 (Linux; Android 13; SM-G991B)", "3.2.1"),
    ("Samsung", "Galaxy A54", "Android 14", "Mozilla/5.0 (Linux; Android 14; SM-A546B)", "3.2.3"),
    ("Google", "Pixel 7", "Android 14", "Mozilla/5.0 (Linux; Android 14; Pixel 7)", "3.2.3"),
    ("Xiaomi", "Redmi Note 12", "Android 13", "Mozilla/5.0 (Linux; Android 13; 22111317I)", "3.2.1"),
    ("Apple", "iPhone 13", "iOS 17.1", "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X)", "3.2.2"),
    ("Apple", "iPhone 14 Pro", "iOS 17.4", "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X)", "3.2.3"),
    ("OnePlus", "11", "Android 14", "Mozilla/5.0 (Linux; Android 14; CPH2449)", "3.2.3"),
    ("Motorola", "Edge 40", "Android 13", "Mozilla/5.0 (Linux; Android 13; XT2303-2)", "3.2.1"),
];

const DEVICE_ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const DEVICE_ID_LEN: usize = 16;

fn random_device_id(rng: &mut impl Rng) -> String {
    (0..DEVICE_ID_LEN).map(|_| DEVICE_ID_CHARS[rng.gen_range(0..DEVICE_ID_CHARS.len())] as char).collect()
}

fn random_device(rng: &mut impl Rng) -> DeviceDescriptor {
    let (manufacturer, model, os_version, user_agent, app_version) = *DEVICE_POOL.choose(rng).expect("device pool is non-empty");
    DeviceDescriptor {
        manufacturer: manufacturer.to_string(),
        model: model.to_string(),
        os_version: os_version.to_string(),
        user_agent: user_agent.to_string(),
        app_version: app_version.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueSeverity {
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct SelfInspectIssue {
    pub severity: IssueSeverity,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct SelfInspectReport {
    pub issues: Vec<SelfInspectIssue>,
    pub confidence: f64,
    pub max_repetition: u32,
    pub coefficient_of_variation: f64,
    pub perfect_triples: u32,
}

impl SelfInspectReport {
    pub fn has_high_severity(&self) -> bool {
        self.issues.iter().any(|i| i.severity == IssueSeverity::High)
    }
}

/// Issues and tracks per-campaign device fingerprints, header sets, and
/// timing rings. One instance is shared across a process; state is keyed
/// by campaign id.
pub struct AntiDetectionEngine {
    fingerprints: DashMap<String, FingerprintRecord>,
    timings: DashMap<String, Mutex<TimingRing>>,
}

impl Default for AntiDetectionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AntiDetectionEngine {
    pub fn new() -> Self {
        Self { fingerprints: DashMap::new(), timings: DashMap::new() }
    }

    /// Idempotent issuance: the first call for a campaign selects a device
    /// and device id; subsequent calls return the same record.
    pub fn fingerprint_for(&self, campaign_id: &str) -> FingerprintRecord {
        if let Some(existing) = self.fingerprints.get(campaign_id) {
            return existing.clone();
        }

        let mut rng = rand::thread_rng();
        let record = FingerprintRecord {
            campaign_id: campaign_id.to_string(),
            device: random_device(&mut rng),
            device_id: random_device_id(&mut rng),
            generation: 1,
        };
        self.fingerprints.insert(campaign_id.to_string(), record.clone());
        record
    }

    /// Replaces a campaign's fingerprint with a freshly-drawn one.
    pub fn rotate(&self, campaign_id: &str) -> FingerprintRecord {
        let mut rng = rand::thread_rng();
        let generation = self.fingerprints.get(campaign_id).map(|r| r.generation + 1).unwrap_or(1);
        let record = FingerprintRecord {
            campaign_id: campaign_id.to_string(),
            device: random_device(&mut rng),
            device_id: random_device_id(&mut rng),
            generation,
        };
        self.fingerprints.insert(campaign_id.to_string(), record.clone());
        record
    }

    /// Required UA/device headers plus randomly-present optional headers
    /// (timestamp, encoding) at 50% each.
    pub fn headers_for(&self, campaign_id: &str) -> HashMap<String, String> {
        let fp = self.fingerprint_for(campaign_id);
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), fp.device.user_agent.clone());
        headers.insert("X-Device-Id".to_string(), fp.device_id.clone());
        headers.insert("X-Device-Model".to_string(), fp.device.model.clone());
        headers.insert("X-App-Version".to_string(), fp.device.app_version.clone());

        let mut rng = rand::thread_rng();
        if rng.gen_bool(0.5) {
            headers.insert("X-Timestamp".to_string(), Utc::now().to_rfc3339());
        }
        if rng.gen_bool(0.5) {
            headers.insert("Accept-Encoding".to_string(), "gzip, deflate, br".to_string());
        }

        headers
    }

    /// `max(0, d + d*pct*uniform(-1,+1))`.
    pub fn jitter(&self, d: std::time::Duration, pct: f64) -> std::time::Duration {
        let mut rng = rand::thread_rng();
        let factor = rng.gen_range(-1.0..=1.0);
        let delta = d.as_secs_f64() * pct * factor;
        let jittered = (d.as_secs_f64() + delta).max(0.0);
        std::time::Duration::from_secs_f64(jittered)
    }

    pub fn jitter_default(&self, d: std::time::Duration) -> std::time::Duration {
        self.jitter(d, 0.20)
    }

    pub fn record_timing(&self, campaign_id: &str, op: TimingOp, t_ms: u64) {
        let ring = self.timings.entry(campaign_id.to_string()).or_insert_with(|| Mutex::new(TimingRing::default()));
        ring.lock().push(TimingEntry { op, t_ms, ts_real: Utc::now() });
    }

    /// Computes the three regularity signals over the last ≥10 recorded
    /// timings for a campaign. Returns `None` if fewer than 10 timings have
    /// been recorded yet.
    pub fn self_inspect(&self, campaign_id: &str) -> Option<SelfInspectReport> {
        let ring = self.timings.get(campaign_id)?;
        let ring = ring.lock();
        if ring.len() < 10 {
            return None;
        }

        let timestamps: Vec<DateTime<Utc>> = ring.iter().map(|e| e.ts_real).collect();
        drop(ring);

        let intervals_ms: Vec<i64> = timestamps.windows(2).map(|w| (w[1] - w[0]).num_milliseconds()).collect();

        let max_repetition = max_repetition_count(&intervals_ms);
        let cov = coefficient_of_variation(&intervals_ms);
        let perfect_triples = count_perfect_triples(&intervals_ms);

        let mut issues = Vec::new();
        if max_repetition > 3 {
            issues.push(SelfInspectIssue {
                severity: IssueSeverity::High,
                description: format!("interval repetition count {} exceeds 3", max_repetition),
            });
        }
        if perfect_triples > 5 {
            issues.push(SelfInspectIssue {
                severity: IssueSeverity::High,
                description: format!("{} near-identical consecutive triples", perfect_triples),
            });
        }
        if cov < 0.15 {
            issues.push(SelfInspectIssue {
                severity: IssueSeverity::Medium,
                description: format!("coefficient of variation {:.3} below 0.15", cov),
            });
        }

        let confidence = (issues.len() as f64 / 3.0).min(1.0);

        Some(SelfInspectReport { issues, confidence, max_repetition, coefficient_of_variation: cov, perfect_triples })
    }
}

fn max_repetition_count(intervals_ms: &[i64]) -> u32 {
    let mut buckets: HashMap<i64, u32> = HashMap::new();
    for &ms in intervals_ms {
        let bucket = (ms as f64 / 1000.0).round() as i64;
        *buckets.entry(bucket).or_insert(0) += 1;
    }
    buckets.values().copied().max().unwrap_or(0)
}

fn coefficient_of_variation(intervals_ms: &[i64]) -> f64 {
    if intervals_ms.is_empty() {
        return 0.0;
    }
    let n = intervals_ms.len() as f64;
    let mean = intervals_ms.iter().sum::<i64>() as f64 / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = intervals_ms.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

fn count_perfect_triples(intervals_ms: &[i64]) -> u32 {
    let mut count = 0;
    for w in intervals_ms.windows(3) {
        let d1 = (w[1] - w[0]).abs();
        let d2 = (w[2] - w[1]).abs();
        if d1 < 100 && d2 < 100 {
            count += 1;
        }
    }
    count
}

//! Analyzer registry with smooth weighted round-robin selection.
//!
//! This module owns the analyzer table and provides thread-safe selection,
//! weight renormalization, failure-driven health transitions, and the admin
//! operations (add/remove/enable/disable). All mutations go through a single
//! mutex; the critical sections are purely in-memory so the lock is never
//! held across a suspension point.

use crate::config::AnalyzerConfig;
use crate::error::{FanoutError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Grace period before a newly added analyzer receives its first probe.
const PROBE_GRACE: Duration = Duration::from_secs(5);

/// One downstream analyzer and its routing state.
#[derive(Debug, Clone)]
pub struct Analyzer {
    /// Stable identifier, unique within the registry.
    pub id: String,
    /// Ingest endpoint URL.
    pub url: String,
    /// Configured baseline weight.
    pub weight: f64,
    /// Post-normalization weight actually used in selection.
    pub effective_weight: f64,
    /// Accumulator for smooth weighted round-robin.
    pub current_weight: f64,
    /// Whether the analyzer is currently considered live.
    pub healthy: bool,
    /// Admin on/off switch.
    pub admin_enabled: bool,
    /// Consecutive failure count.
    pub failures: u32,
    /// Earliest time the prober may next probe this analyzer.
    pub next_probe_at: Instant,
}

impl Analyzer {
    fn from_config(config: AnalyzerConfig, next_probe_at: Instant) -> Self {
        Self {
            id: config.id,
            url: config.url,
            weight: config.weight,
            effective_weight: 0.0,
            current_weight: 0.0,
            healthy: true,
            admin_enabled: true,
            failures: 0,
            next_probe_at,
        }
    }

    fn eligible(&self) -> bool {
        self.healthy && self.admin_enabled && self.effective_weight > 0.0
    }
}

/// A selected forwarding target. Owned copy so no lock outlives selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Analyzer id, for result bookkeeping.
    pub id: String,
    /// Ingest URL to POST the packet to.
    pub url: String,
}

/// Serializable view of one analyzer, for the admin and metrics surfaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzerSnapshot {
    /// Analyzer id.
    pub id: String,
    /// Ingest URL.
    pub url: String,
    /// Configured baseline weight.
    pub weight: f64,
    /// Current normalized weight.
    pub effective_weight: f64,
    /// Health flag.
    pub healthy: bool,
    /// Admin flag.
    pub admin_enabled: bool,
    /// Consecutive failures so far.
    pub failures: u32,
}

/// Thread-safe registry of downstream analyzers.
#[derive(Debug)]
pub struct AnalyzerRegistry {
    analyzers: Mutex<Vec<Analyzer>>,
    max_fail: u32,
}

impl AnalyzerRegistry {
    /// Create a registry from startup configuration.
    ///
    /// Ids are assumed unique (enforced by [`crate::config::Config::validate`]).
    pub fn new(configs: Vec<AnalyzerConfig>, max_fail: u32) -> Self {
        let now = Instant::now();
        let mut analyzers: Vec<Analyzer> = configs
            .into_iter()
            .map(|c| Analyzer::from_config(c, now))
            .collect();
        renormalize(&mut analyzers);

        Self {
            analyzers: Mutex::new(analyzers),
            max_fail,
        }
    }

    /// Select the next forwarding target using smooth weighted round-robin.
    ///
    /// For each eligible analyzer the effective weight is added into its
    /// accumulator; the analyzer with the largest accumulator wins (ties go
    /// to the earliest-inserted) and pays the eligible total back. Over long
    /// runs the pick distribution converges to the effective weight ratios.
    ///
    /// Returns `None` iff no analyzer is eligible.
    pub fn choose(&self) -> Option<Target> {
        let mut analyzers = self.analyzers.lock();

        let mut total = 0.0;
        let mut best: Option<usize> = None;
        for i in 0..analyzers.len() {
            if !analyzers[i].eligible() {
                continue;
            }
            analyzers[i].current_weight += analyzers[i].effective_weight;
            total += analyzers[i].effective_weight;
            match best {
                Some(b) if analyzers[i].current_weight <= analyzers[b].current_weight => {}
                _ => best = Some(i),
            }
        }

        let chosen = &mut analyzers[best?];
        chosen.current_weight -= total;
        Some(Target {
            id: chosen.id.clone(),
            url: chosen.url.clone(),
        })
    }

    /// Record a failed forward or probe for `id`.
    ///
    /// After `max_fail` consecutive failures the analyzer is taken out of
    /// rotation until a probe or forward succeeds again. Unknown ids are
    /// ignored: the analyzer may have been removed while a request to it
    /// was in flight.
    pub fn mark_failure(&self, id: &str) {
        let mut analyzers = self.analyzers.lock();
        let Some(analyzer) = analyzers.iter_mut().find(|a| a.id == id) else {
            return;
        };
        analyzer.failures += 1;
        if analyzer.failures >= self.max_fail && analyzer.healthy {
            analyzer.healthy = false;
            analyzer.current_weight = 0.0;
            warn!(
                analyzer = id,
                failures = analyzer.failures,
                "analyzer marked unhealthy"
            );
            renormalize(&mut analyzers);
        }
    }

    /// Record a successful forward or probe for `id`.
    ///
    /// Resets the failure count and restores eligibility if the analyzer
    /// was unhealthy. Unknown ids are ignored.
    pub fn mark_success(&self, id: &str) {
        let mut analyzers = self.analyzers.lock();
        let Some(analyzer) = analyzers.iter_mut().find(|a| a.id == id) else {
            return;
        };
        analyzer.failures = 0;
        if !analyzer.healthy {
            info!(analyzer = id, "analyzer marked healthy");
            analyzer.current_weight = 0.0;
            analyzer.healthy = true;
        }
        renormalize(&mut analyzers);
    }

    /// Flip the admin switch for `id`.
    ///
    /// Disabling also clears the health flag so a re-enabled analyzer must
    /// pass a probe (or forward) before it is trusted again; enabling marks
    /// it healthy optimistically and lets the prober correct within one tick.
    pub fn set_admin(&self, id: &str, enable: bool) -> Result<()> {
        let mut analyzers = self.analyzers.lock();
        let analyzer = analyzers
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| FanoutError::UnknownAnalyzer(id.to_string()))?;

        if analyzer.admin_enabled != enable {
            analyzer.admin_enabled = enable;
            analyzer.healthy = enable;
            analyzer.current_weight = 0.0;
            info!(
                analyzer = id,
                enabled = enable,
                "analyzer admin state changed"
            );
            renormalize(&mut analyzers);
        }
        Ok(())
    }

    /// Register a new analyzer at runtime.
    ///
    /// The first probe is deferred by a short grace period so a freshly
    /// started backend is not immediately marked down.
    pub fn add(&self, config: AnalyzerConfig) -> Result<()> {
        if !config.weight.is_finite() || config.weight < 0.0 {
            return Err(FanoutError::InvalidWeight(config.weight));
        }

        let mut analyzers = self.analyzers.lock();
        if analyzers.iter().any(|a| a.id == config.id) {
            return Err(FanoutError::DuplicateAnalyzer(config.id));
        }

        info!(analyzer = %config.id, url = %config.url, weight = config.weight, "analyzer added");
        analyzers.push(Analyzer::from_config(config, Instant::now() + PROBE_GRACE));
        renormalize(&mut analyzers);
        Ok(())
    }

    /// Remove an analyzer. Idempotent; returns whether anything was removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut analyzers = self.analyzers.lock();
        let before = analyzers.len();
        analyzers.retain(|a| a.id != id);
        let removed = analyzers.len() < before;
        if removed {
            info!(analyzer = id, "analyzer removed");
            renormalize(&mut analyzers);
        }
        removed
    }

    /// Copy out the current analyzer table for admin and metrics surfaces.
    pub fn snapshot(&self) -> Vec<AnalyzerSnapshot> {
        self.analyzers
            .lock()
            .iter()
            .map(|a| AnalyzerSnapshot {
                id: a.id.clone(),
                url: a.url.clone(),
                weight: a.weight,
                effective_weight: a.effective_weight,
                healthy: a.healthy,
                admin_enabled: a.admin_enabled,
                failures: a.failures,
            })
            .collect()
    }

    /// Analyzers due for a health probe at `now`, with their health URLs.
    pub fn due_probes(&self, now: Instant) -> Vec<(String, String)> {
        self.analyzers
            .lock()
            .iter()
            .filter(|a| a.next_probe_at <= now)
            .map(|a| (a.id.clone(), health_url(&a.url)))
            .collect()
    }
}

/// Recompute effective weights after any structural or status change.
///
/// Baseline weights are a declared preference; renormalization keeps the
/// eligible weights summing to exactly 1 no matter how many backends are
/// currently usable. A weight deficit is spread evenly, a surplus is scaled
/// down proportionally, and an all-zero eligible set splits equally.
fn renormalize(analyzers: &mut [Analyzer]) {
    let eligible_count = analyzers
        .iter()
        .filter(|a| a.healthy && a.admin_enabled)
        .count();

    if eligible_count == 0 {
        for a in analyzers.iter_mut() {
            a.effective_weight = 0.0;
        }
        return;
    }

    let total: f64 = analyzers
        .iter()
        .filter(|a| a.healthy && a.admin_enabled)
        .map(|a| a.weight)
        .sum();

    for a in analyzers.iter_mut() {
        if !(a.healthy && a.admin_enabled) {
            a.effective_weight = 0.0;
        } else if total == 0.0 {
            a.effective_weight = 1.0 / eligible_count as f64;
        } else if total < 1.0 {
            a.effective_weight = a.weight + (1.0 - total) / eligible_count as f64;
        } else {
            a.effective_weight = a.weight / total;
        }
    }
}

/// Derive an analyzer's health URL from its ingest URL.
///
/// A trailing `/ingest` is substituted with `/health`; any other shape gets
/// `/health` appended.
pub fn health_url(ingest_url: &str) -> String {
    match ingest_url.strip_suffix("/ingest") {
        Some(base) => format!("{base}/health"),
        None => format!("{}/health", ingest_url.trim_end_matches('/')),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer(id: &str, weight: f64) -> AnalyzerConfig {
        AnalyzerConfig {
            id: id.to_string(),
            url: format!("http://{id}.test/ingest"),
            weight,
        }
    }

    fn eligible_weight_sum(registry: &AnalyzerRegistry) -> f64 {
        registry
            .snapshot()
            .iter()
            .filter(|a| a.healthy && a.admin_enabled)
            .map(|a| a.effective_weight)
            .sum()
    }

    fn assert_normalized(registry: &AnalyzerRegistry) {
        let snapshot = registry.snapshot();
        let any_eligible = snapshot.iter().any(|a| a.healthy && a.admin_enabled);
        let sum = eligible_weight_sum(registry);
        if any_eligible {
            assert!((sum - 1.0).abs() < 1e-9, "eligible weights sum to {sum}");
        } else {
            assert_eq!(sum, 0.0);
        }
        for a in snapshot.iter().filter(|a| !(a.healthy && a.admin_enabled)) {
            assert_eq!(a.effective_weight, 0.0, "ineligible {} has weight", a.id);
        }
    }

    #[test]
    fn test_normalization_scales_surplus() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 2.0), analyzer("a2", 2.0)], 3);
        let snapshot = registry.snapshot();
        assert!((snapshot[0].effective_weight - 0.5).abs() < 1e-9);
        assert!((snapshot[1].effective_weight - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_normalization_spreads_deficit() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 0.3), analyzer("a2", 0.3)], 3);
        let snapshot = registry.snapshot();
        assert!((snapshot[0].effective_weight - 0.5).abs() < 1e-9);
        assert!((snapshot[1].effective_weight - 0.5).abs() < 1e-9);
        assert_normalized(&registry);
    }

    #[test]
    fn test_normalization_equal_split_for_zero_weights() {
        let registry = AnalyzerRegistry::new(
            vec![analyzer("a1", 0.0), analyzer("a2", 0.0), analyzer("a3", 0.0)],
            3,
        );
        for a in registry.snapshot() {
            assert!((a.effective_weight - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_normalization_invariant_across_transitions() {
        let registry = AnalyzerRegistry::new(
            vec![analyzer("a1", 0.6), analyzer("a2", 0.4), analyzer("a3", 1.2)],
            3,
        );
        assert_normalized(&registry);

        for _ in 0..3 {
            registry.mark_failure("a2");
        }
        assert_normalized(&registry);

        registry.set_admin("a1", false).unwrap();
        assert_normalized(&registry);

        registry.mark_success("a2");
        assert_normalized(&registry);

        registry.add(analyzer("a4", 0.5)).unwrap();
        assert_normalized(&registry);

        registry.remove("a3");
        assert_normalized(&registry);

        registry.set_admin("a1", true).unwrap();
        assert_normalized(&registry);

        // Everything down: the sum must collapse to zero.
        for id in ["a1", "a2", "a4"] {
            for _ in 0..3 {
                registry.mark_failure(id);
            }
        }
        assert_normalized(&registry);
        assert_eq!(eligible_weight_sum(&registry), 0.0);
    }

    #[test]
    fn test_choose_follows_weight_ratios() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 0.6), analyzer("a2", 0.4)], 3);

        let k = 1000;
        let mut a1_picks = 0;
        for _ in 0..k {
            let target = registry.choose().expect("both analyzers eligible");
            if target.id == "a1" {
                a1_picks += 1;
            }
        }

        assert!((a1_picks as i64 - 600).abs() <= 1, "a1 picked {a1_picks}");
    }

    #[test]
    fn test_choose_alternates_with_equal_weights() {
        let registry = AnalyzerRegistry::new(
            vec![analyzer("a1", 1.0), analyzer("a2", 1.0), analyzer("a3", 1.0)],
            3,
        );

        let mut previous = String::new();
        for _ in 0..30 {
            let target = registry.choose().unwrap();
            assert_ne!(target.id, previous, "consecutive picks of the same analyzer");
            previous = target.id;
        }
    }

    #[test]
    fn test_choose_is_deterministic() {
        let make = || AnalyzerRegistry::new(vec![analyzer("a1", 0.7), analyzer("a2", 0.3)], 3);
        let left = make();
        let right = make();
        for _ in 0..50 {
            assert_eq!(left.choose(), right.choose());
        }
    }

    #[test]
    fn test_choose_none_when_no_eligible() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 1.0)], 3);
        registry.set_admin("a1", false).unwrap();
        assert!(registry.choose().is_none());
    }

    #[test]
    fn test_unhealthy_after_max_fail_and_never_chosen() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 0.5), analyzer("a2", 0.5)], 3);

        registry.mark_failure("a2");
        registry.mark_failure("a2");
        assert!(registry.snapshot()[1].healthy, "two failures keep it healthy");

        registry.mark_failure("a2");
        let snapshot = registry.snapshot();
        assert!(!snapshot[1].healthy);
        assert_eq!(snapshot[1].effective_weight, 0.0);
        assert!((snapshot[0].effective_weight - 1.0).abs() < 1e-9);

        for _ in 0..20 {
            assert_eq!(registry.choose().unwrap().id, "a1");
        }
    }

    #[test]
    fn test_single_success_restores_eligibility() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 0.5), analyzer("a2", 0.5)], 3);
        for _ in 0..5 {
            registry.mark_failure("a2");
        }
        assert!(!registry.snapshot()[1].healthy);

        registry.mark_success("a2");
        let snapshot = registry.snapshot();
        assert!(snapshot[1].healthy);
        assert_eq!(snapshot[1].failures, 0);
        assert!((snapshot[1].effective_weight - 0.5).abs() < 1e-9);

        let picked_a2 = (0..10).any(|_| registry.choose().unwrap().id == "a2");
        assert!(picked_a2);
    }

    #[test]
    fn test_recovery_renormalizes_remaining_peers() {
        // Three analyzers at 1/3 each; one fails out and the survivors split 50/50.
        let registry = AnalyzerRegistry::new(
            vec![
                analyzer("a1", 1.0 / 3.0),
                analyzer("a2", 1.0 / 3.0),
                analyzer("a3", 1.0 / 3.0),
            ],
            3,
        );
        for _ in 0..3 {
            registry.mark_failure("a2");
        }
        let snapshot = registry.snapshot();
        assert!((snapshot[0].effective_weight - 0.5).abs() < 1e-9);
        assert!((snapshot[2].effective_weight - 0.5).abs() < 1e-9);

        registry.mark_success("a2");
        for a in registry.snapshot() {
            assert!((a.effective_weight - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_disable_hides_immediately_enable_restores() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 0.5), analyzer("a2", 0.5)], 3);

        registry.set_admin("a2", false).unwrap();
        let snapshot = registry.snapshot();
        assert!(!snapshot[1].admin_enabled);
        assert!(!snapshot[1].healthy, "disable clears the health flag");
        for _ in 0..10 {
            assert_eq!(registry.choose().unwrap().id, "a1");
        }

        registry.set_admin("a2", true).unwrap();
        let snapshot = registry.snapshot();
        assert!(snapshot[1].admin_enabled);
        assert!(snapshot[1].healthy, "enable is optimistic");
        assert!((snapshot[1].effective_weight - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_set_admin_unknown_id() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 1.0)], 3);
        assert!(matches!(
            registry.set_admin("nope", true),
            Err(FanoutError::UnknownAnalyzer(_))
        ));
    }

    #[test]
    fn test_add_renormalizes_weights() {
        // S5: 0.6 + 0.4 running, add 0.5 -> 0.4 / 0.2666 / 0.3333.
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 0.6), analyzer("a2", 0.4)], 3);
        registry
            .add(AnalyzerConfig {
                id: "a3".to_string(),
                url: "http://a3.test/ingest".to_string(),
                weight: 0.5,
            })
            .unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!((snapshot[0].effective_weight - 0.4).abs() < 1e-9);
        assert!((snapshot[1].effective_weight - 0.4 / 1.5).abs() < 1e-9);
        assert!((snapshot[2].effective_weight - 0.5 / 1.5).abs() < 1e-9);
        assert_normalized(&registry);
    }

    #[test]
    fn test_add_duplicate_leaves_state_unchanged() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 0.6), analyzer("a2", 0.4)], 3);
        let before = registry.snapshot();

        let result = registry.add(analyzer("a1", 9.0));
        assert!(matches!(result, Err(FanoutError::DuplicateAnalyzer(id)) if id == "a1"));
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn test_add_rejects_bad_weight() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 1.0)], 3);
        assert!(matches!(
            registry.add(analyzer("a2", f64::NAN)),
            Err(FanoutError::InvalidWeight(_))
        ));
        assert!(matches!(
            registry.add(analyzer("a2", -1.0)),
            Err(FanoutError::InvalidWeight(_))
        ));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 0.5), analyzer("a2", 0.5)], 3);
        assert!(registry.remove("a1"));
        assert!(!registry.remove("a1"));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!((snapshot[0].effective_weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_added_analyzer_gets_probe_grace() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 1.0)], 3);
        registry.add(analyzer("a2", 1.0)).unwrap();

        let now = Instant::now();
        let due: Vec<String> = registry.due_probes(now).into_iter().map(|(id, _)| id).collect();
        assert_eq!(due, vec!["a1".to_string()]);

        let later = now + PROBE_GRACE + Duration::from_secs(1);
        assert_eq!(registry.due_probes(later).len(), 2);
    }

    #[test]
    fn test_health_url_derivation() {
        assert_eq!(
            health_url("http://a1.test:9000/ingest"),
            "http://a1.test:9000/health"
        );
        assert_eq!(health_url("http://a1.test:9000"), "http://a1.test:9000/health");
        assert_eq!(health_url("http://a1.test:9000/"), "http://a1.test:9000/health");
    }

    #[test]
    fn test_failure_counter_resets_on_success() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 1.0)], 3);
        registry.mark_failure("a1");
        registry.mark_failure("a1");
        registry.mark_success("a1");
        registry.mark_failure("a1");
        registry.mark_failure("a1");
        assert!(registry.snapshot()[0].healthy, "counter restarted after success");
        registry.mark_failure("a1");
        assert!(!registry.snapshot()[0].healthy);
    }

    #[test]
    fn test_marks_for_unknown_ids_are_ignored() {
        let registry = AnalyzerRegistry::new(vec![analyzer("a1", 1.0)], 3);
        registry.mark_failure("ghost");
        registry.mark_success("ghost");
        assert_eq!(registry.snapshot().len(), 1);
    }
}

//! Prometheus metrics for proctored sessions
//!
//! - `exam_proctor_violations_total` (counter) by category
//! - `exam_proctor_warnings_total` (counter) by warning kind
//! - `exam_proctor_submissions_total` (counter) by trigger and outcome
//! - `exam_proctor_deadline_recomputations_total` (counter)
//! - `exam_proctor_active_sessions` (gauge)

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

use crate::integrity::WarningKind;
use crate::submission::SubmitTrigger;
use crate::violation::ViolationCategory;

const NAMESPACE: &str = "exam_proctor";

/// Session metrics registered on a shared registry
#[derive(Clone)]
pub struct ProctorMetrics {
    registry: Arc<Registry>,
    violations_total: IntCounterVec,
    warnings_total: IntCounterVec,
    submissions_total: IntCounterVec,
    deadline_recomputations_total: IntCounter,
    active_sessions: IntGauge,
}

impl ProctorMetrics {
    /// Create metrics on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Create metrics and register them with `registry`
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        let violations_total = IntCounterVec::new(
            Opts::new("violations_total", "Recorded proctoring violations").namespace(NAMESPACE),
            &["category"],
        )?;
        let warnings_total = IntCounterVec::new(
            Opts::new("warnings_total", "Integrity warnings shown to candidates")
                .namespace(NAMESPACE),
            &["kind"],
        )?;
        let submissions_total = IntCounterVec::new(
            Opts::new("submissions_total", "Attempt submissions by trigger and outcome")
                .namespace(NAMESPACE),
            &["trigger", "outcome"],
        )?;
        let deadline_recomputations_total = IntCounter::with_opts(
            Opts::new(
                "deadline_recomputations_total",
                "Persisted deadlines discarded as stale",
            )
            .namespace(NAMESPACE),
        )?;
        let active_sessions = IntGauge::with_opts(
            Opts::new("active_sessions", "Sessions currently monitoring").namespace(NAMESPACE),
        )?;

        registry.register(Box::new(violations_total.clone()))?;
        registry.register(Box::new(warnings_total.clone()))?;
        registry.register(Box::new(submissions_total.clone()))?;
        registry.register(Box::new(deadline_recomputations_total.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;

        Ok(Self {
            registry,
            violations_total,
            warnings_total,
            submissions_total,
            deadline_recomputations_total,
            active_sessions,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn record_violation(&self, category: ViolationCategory) {
        self.violations_total
            .with_label_values(&[category.as_str()])
            .inc();
    }

    pub fn record_warning(&self, kind: WarningKind) {
        self.warnings_total.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn record_submission(&self, trigger: SubmitTrigger, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.submissions_total
            .with_label_values(&[trigger.as_str(), outcome])
            .inc();
    }

    pub fn record_deadline_recomputed(&self) {
        self.deadline_recomputations_total.inc();
    }

    pub fn session_started(&self) {
        self.active_sessions.inc();
    }

    pub fn session_ended(&self) {
        self.active_sessions.dec();
    }

    pub fn violations(&self, category: ViolationCategory) -> u64 {
        self.violations_total
            .with_label_values(&[category.as_str()])
            .get()
    }

    pub fn submissions(&self, trigger: SubmitTrigger, success: bool) -> u64 {
        let outcome = if success { "success" } else { "failure" };
        self.submissions_total
            .with_label_values(&[trigger.as_str(), outcome])
            .get()
    }

    pub fn active_sessions(&self) -> i64 {
        self.active_sessions.get()
    }

    /// Encode all metrics in the text exposition format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ProctorMetrics::new().unwrap();
        metrics.record_violation(ViolationCategory::PhoneDetected);
        metrics.record_violation(ViolationCategory::PhoneDetected);
        metrics.record_submission(SubmitTrigger::AutoTimeout, false);

        assert_eq!(metrics.violations(ViolationCategory::PhoneDetected), 2);
        assert_eq!(metrics.violations(ViolationCategory::LookingAway), 0);
        assert_eq!(metrics.submissions(SubmitTrigger::AutoTimeout, false), 1);
    }

    #[test]
    fn test_encode_text() {
        let metrics = ProctorMetrics::new().unwrap();
        metrics.record_warning(WarningKind::TabSwitch);
        metrics.session_started();

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("exam_proctor_warnings_total"));
        assert!(text.contains("exam_proctor_active_sessions 1"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Arc::new(Registry::new());
        ProctorMetrics::with_registry(Arc::clone(&registry)).unwrap();
        assert!(ProctorMetrics::with_registry(registry).is_err());
    }
}

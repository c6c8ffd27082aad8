use crate::Error;
use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec, Registry};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub isolation_transitions: IntCounterVec,
    /// Outcome of each OperandConfig publication
    pub publications: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "common_service_operator_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["kind"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "common_service_operator_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["kind", "namespace", "error"],
        )
        .unwrap();
        let reconciliations = IntCounterVec::new(
            opts!(
                "common_service_operator_reconciliations_total",
                "reconciliations",
            ),
            &["kind"],
        )
        .unwrap();
        let isolation_transitions = IntCounterVec::new(
            opts!(
                "common_service_operator_isolation_transitions_total",
                "scope isolation phases entered",
            ),
            &["phase"],
        )
        .unwrap();
        let publications = IntCounterVec::new(
            opts!(
                "common_service_operator_operandconfig_publications_total",
                "aggregated OperandConfig publications",
            ),
            &["outcome"],
        )
        .unwrap();
        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            isolation_transitions,
            publications,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.isolation_transitions.clone()))?;
        registry.register(Box::new(self.publications.clone()))?;
        Ok(self)
    }

    /// Failures are keyed by the tenant namespace: every tenant names its CommonService alike
    pub fn reconcile_failure<T: kube::Resource<DynamicType = ()>>(&self, rc: &T, e: &Error) {
        self.failures
            .with_label_values(&[
                T::kind(&()).as_ref(),
                rc.namespace().unwrap_or_default().as_ref(),
                e.metric_label(),
            ])
            .inc()
    }

    pub fn isolation_transition(&self, phase: &str) {
        self.isolation_transitions.with_label_values(&[phase]).inc()
    }

    pub fn operandconfig_published(&self, changed: bool) {
        let outcome = if changed { "written" } else { "unchanged" };
        self.publications.with_label_values(&[outcome]).inc()
    }

    pub fn count_and_measure<T: kube::Resource<DynamicType = ()>>(&self) -> ReconcileMeasurer<T> {
        self.reconciliations
            .with_label_values(&[T::kind(&()).as_ref()])
            .inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            _resource_type: std::marker::PhantomData,
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer<T: kube::Resource<DynamicType = ()>> {
    start: Instant,
    metric: HistogramVec,
    _resource_type: std::marker::PhantomData<T>,
}

impl<T: kube::Resource<DynamicType = ()>> Drop for ReconcileMeasurer<T> {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[T::kind(&()).as_ref()])
            .observe(duration);
    }
}

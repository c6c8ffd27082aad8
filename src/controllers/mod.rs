use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::client::Client;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::error;

use crate::engine::Engine;
use crate::Metrics;

pub mod commonservice;
pub mod scopeisolation;

/// Name of the master tenant, the aggregated OperandConfig and the scope NamespaceScope
pub const COMMON_SERVICE_NAME: &str = "common-service";

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
        }
    }
}

/// Process-wide settings resolved from flags and environment
#[derive(Clone, Debug)]
pub struct Settings {
    /// Namespace the operator and the master CommonService live in
    pub operator_namespace: String,
    /// Namespace the aggregated OperandConfig is published to
    pub services_namespace: String,
    pub scope_mapping_namespace: String,
    pub scope_mapping_name: String,
    /// Where cluster-scoped state is moved to when a scope shrinks
    pub control_namespace: String,
    /// Deployment of the fleet-management controller, scaled down during isolation
    pub fleet_controller: String,
    /// OLM Subscription of the fleet-management controller
    pub fleet_subscription: String,
}

impl Settings {
    pub fn new(operator_namespace: impl Into<String>) -> Self {
        let operator_namespace = operator_namespace.into();
        Self {
            services_namespace: operator_namespace.clone(),
            operator_namespace,
            scope_mapping_namespace: "kube-public".into(),
            scope_mapping_name: "common-service-maps".into(),
            control_namespace: "cs-control".into(),
            fleet_controller: "operand-deployment-lifecycle-manager".into(),
            fleet_subscription: "ibm-odlm".into(),
        }
    }
}

/// State shared between the controllers and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the reconcilers
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    pub registry: prometheus::Registry,
    pub settings: Settings,
    /// Rule table and size templates, loaded once at start
    pub engine: Arc<Engine>,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(settings: Settings, engine: Engine) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::default(),
            settings,
            engine: Arc::new(engine),
        }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}

/// Initialize the controllers (given the CRDs are installed) and run them until shutdown
pub async fn run(state: State) {
    let client = Client::try_default()
        .await
        .expect("failed to create kube Client");
    let metrics = match Metrics::default().register(&state.registry) {
        Ok(metrics) => metrics,
        Err(e) => {
            error!("Failed to register metrics: {e:?}");
            std::process::exit(1);
        }
    };

    tokio::join!(
        commonservice::run(client.clone(), metrics.clone(), state.clone()),
        scopeisolation::run(client, metrics, state),
    );
}

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    api::{Api, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
};
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use crate::controllers::{Diagnostics, Settings, State, COMMON_SERVICE_NAME};
use crate::resources::commonservices::CommonService;
use crate::resources::fleet::NamespaceScope;
use crate::resources::scopemapping::ScopeMapping;
use crate::{telemetry, Error, Metrics, Result};

use super::machine::{isolate, IsolationPlan};
use super::reconcilers::KubeScopeOperations;

// Context for our reconciler
pub(super) struct Context {
    /// Kubernetes client
    pub client: Client,
    pub settings: Settings,
    /// Cluster side effects of each isolation step
    pub operations: KubeScopeOperations,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
}

impl Context {
    pub fn new(client: Client, metrics: Metrics, state: State) -> Arc<Context> {
        Arc::new(Context {
            operations: KubeScopeOperations::new(
                client.clone(),
                state.settings.clone(),
                metrics.clone(),
            ),
            client,
            settings: state.settings,
            diagnostics: state.diagnostics,
            metrics,
        })
    }
}

async fn current_members(ctx: &Context) -> Result<Vec<String>> {
    let scopes: Api<NamespaceScope> =
        Api::namespaced(ctx.client.clone(), &ctx.settings.services_namespace);
    Ok(scopes
        .get_opt(COMMON_SERVICE_NAME)
        .await?
        .map(|scope| scope.spec.namespace_members)
        .unwrap_or_default())
}

#[instrument(skip(ctx, cm), fields(trace_id))]
async fn reconcile(cm: Arc<ConfigMap>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure::<ConfigMap>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    info!(
        "Reconciling scope mapping \"{}/{}\"",
        cm.namespace().unwrap_or_default(),
        cm.name_any()
    );

    match reconcile_scope(&cm, &ctx).await {
        Ok(()) => Ok(Action::requeue(Duration::from_secs(5 * 60))),
        Err(err) => {
            warn!("scope isolation failed: {:?}", err);
            ctx.metrics.reconcile_failure(cm.as_ref(), &err);
            Err(err)
        }
    }
}

async fn reconcile_scope(cm: &ConfigMap, ctx: &Context) -> Result<()> {
    let settings = &ctx.settings;
    let mapping = ScopeMapping::from_config_map(cm)?;

    let css: Api<CommonService> = Api::namespaced(ctx.client.clone(), &settings.operator_namespace);
    let master = css.get_opt(COMMON_SERVICE_NAME).await?.ok_or_else(|| {
        Error::CommonServiceNotFound(format!(
            "{}/{COMMON_SERVICE_NAME}",
            settings.operator_namespace
        ))
    })?;

    let current = current_members(ctx).await?;
    let plan = IsolationPlan::compute(&mapping, &current, settings);
    debug!("Isolation plan {plan:?}");

    let phase = isolate(&ctx.operations, master.isolation_phase(), &plan).await?;
    debug!("Scope settled in phase {phase}");
    Ok(())
}

fn error_policy<K, C>(_cm: Arc<K>, _error: &Error, _ctx: C) -> Action {
    Action::requeue(Duration::from_secs(30))
}

/// Run the scope isolation controller over the scope mapping ConfigMap
pub async fn run(client: Client, metrics: Metrics, state: State) {
    let cms: Api<ConfigMap> =
        Api::namespaced(client.clone(), &state.settings.scope_mapping_namespace);
    let cfg = Config::default().fields(&format!(
        "metadata.name={}",
        state.settings.scope_mapping_name
    ));

    Controller::new(cms, cfg)
        .shutdown_on_signal()
        .run(reconcile, error_policy, Context::new(client, metrics, state))
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

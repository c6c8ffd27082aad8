use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Recorder},
        finalizer::{finalizer, Event as Finalizer},
        watcher::Config,
    },
    Resource,
};
use serde_json::json;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use crate::controllers::{Diagnostics, Settings, State, COMMON_SERVICE_NAME};
use crate::engine::{Engine, Extreme, ProfileControllers, TenantView};
use crate::engine::profile::TenantContext;
use crate::resources::commonservices::{
    CommonService, CommonServiceCondition, ServicePhase, COMMON_SERVICE_FINALIZER,
};
use crate::resources::operandconfigs::OperandConfig;
use crate::resources::scopemapping::ScopeMapping;
use crate::{telemetry, Error, Metrics, Result};

// Context for our reconciler
pub(super) struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Kubernetes event recorder
    pub recorder: Recorder,
    pub settings: Settings,
    /// Rule table and size templates
    pub engine: Arc<Engine>,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
}

impl Context {
    pub fn new(client: Client, metrics: Metrics, state: State) -> Arc<Context> {
        Arc::new(Context {
            client: client.clone(),
            recorder: Recorder::new(client, "common-service-operator".into()),
            settings: state.settings,
            engine: state.engine,
            diagnostics: state.diagnostics,
            metrics,
        })
    }
}

#[instrument(skip(ctx, cs), fields(trace_id))]
async fn reconcile(cs: Arc<CommonService>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure::<CommonService>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let namespace = cs.namespace().unwrap_or_default();
    let css: Api<CommonService> = Api::namespaced(ctx.client.clone(), &namespace);

    info!("Reconciling CommonService \"{}/{}\"", namespace, cs.name_any());
    match finalizer(&css, COMMON_SERVICE_FINALIZER, cs.clone(), |event| async {
        match event {
            Finalizer::Apply(cs) => cs.reconcile_status(ctx.clone()).await,
            Finalizer::Cleanup(cs) => cs.cleanup(ctx.clone()).await,
        }
    })
    .await
    {
        Ok(action) => Ok(action),
        Err(err) => {
            warn!("reconcile failed: {:?}", err);

            ctx.recorder
                .publish(
                    &Event {
                        type_: EventType::Warning,
                        reason: "FailedReconcile".into(),
                        note: Some(err.to_string()),
                        action: "Reconcile".into(),
                        secondary: None,
                    },
                    &cs.object_ref(&()),
                )
                .await?;

            let err = Error::FinalizerError(Box::new(err));
            ctx.metrics.reconcile_failure(cs.as_ref(), &err);
            Err(err)
        }
    }
}

fn error_policy<K, C>(_cs: Arc<K>, _error: &Error, _ctx: C) -> Action {
    Action::requeue(Duration::from_secs(30))
}

/// Reads the scope mapping; a missing ConfigMap means every tenant is in scope
async fn scope_mapping(ctx: &Context) -> Result<ScopeMapping> {
    let cms: Api<ConfigMap> =
        Api::namespaced(ctx.client.clone(), &ctx.settings.scope_mapping_namespace);
    match cms.get_opt(&ctx.settings.scope_mapping_name).await? {
        Some(cm) => ScopeMapping::from_config_map(&cm),
        None => Ok(ScopeMapping::default()),
    }
}

impl CommonService {
    fn is_master(&self, settings: &Settings) -> bool {
        self.name_any() == COMMON_SERVICE_NAME
            && self.namespace().as_deref() == Some(settings.operator_namespace.as_str())
    }

    /// Aggregates every tenant and publishes the result. Returns whether the OperandConfig
    /// was left unchanged, and the resolved profile controllers.
    async fn aggregate(&self, ctx: &Context, extreme: Extreme) -> Result<(bool, ProfileControllers)> {
        let settings = &ctx.settings;
        let tenants = Api::<CommonService>::all(ctx.client.clone())
            .list(&ListParams::default())
            .await?
            .items;
        let mapping = scope_mapping(ctx).await?;

        let views = tenants.iter().map(|tenant| TenantView {
            tenant,
            context: TenantContext {
                in_scope: mapping.is_in_scope(
                    &tenant.namespace().unwrap_or_default(),
                    &settings.services_namespace,
                ),
                is_master: tenant.is_master(settings),
            },
        });
        let summary = ctx.engine.aggregate(views)?;

        let opcons: Api<OperandConfig> =
            Api::namespaced(ctx.client.clone(), &settings.services_namespace);
        let no_change = ctx
            .engine
            .publish(&opcons, COMMON_SERVICE_NAME, &summary, extreme)
            .await?;
        ctx.metrics.operandconfig_published(!no_change);
        Ok((no_change, summary.profile_controllers))
    }

    async fn reconcile_status(&self, ctx: Arc<Context>) -> Result<Action> {
        let name = self.name_any();
        let namespace = self.namespace().unwrap_or_default();

        if self.is_master(&ctx.settings) && self.isolation_phase().in_maintenance() {
            info!(
                "CommonService \"{namespace}/{name}\" is in maintenance ({}), skipping",
                self.isolation_phase()
            );
            return Ok(Action::requeue(Duration::from_secs(30)));
        }

        let generation = self.metadata.generation;
        let observed = self.status.as_ref().and_then(|s| s.observed_generation);
        let previous_controllers = self
            .status
            .as_ref()
            .and_then(|s| s.profile_controllers.clone());

        let (result, message, reason, status, phase, profile_controllers) =
            match self.aggregate(&ctx, Extreme::Max).await {
                Ok((no_change, controllers)) => {
                    if no_change && generation != observed {
                        ctx.recorder
                            .publish(
                                &Event {
                                    type_: EventType::Normal,
                                    reason: "NoEffect".into(),
                                    note: Some(
                                        "The change did not alter the aggregated OperandConfig"
                                            .into(),
                                    ),
                                    action: "Aggregate".into(),
                                    secondary: None,
                                },
                                &self.object_ref(&()),
                            )
                            .await?;
                    }
                    (
                        // If no events were received, check back every 5 minutes
                        Ok(Action::requeue(Duration::from_secs(5 * 60))),
                        "Configuration aggregated into the OperandConfig".to_string(),
                        "Aggregated".to_string(),
                        "True".to_string(),
                        ServicePhase::Succeeded,
                        Some(controllers.as_map().clone()),
                    )
                }
                Err(err) => {
                    let message = err.to_string();
                    (
                        Err(err),
                        message,
                        "FailedReconcile".into(),
                        "False".into(),
                        ServicePhase::Failed,
                        previous_controllers,
                    )
                }
            };

        let existing_ready = self
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|c| c.iter().find(|cond| cond.r#type == "Ready"));
        let now = Time(Utc::now());

        let mut ready = CommonServiceCondition {
            last_transition_time: Some(
                existing_ready
                    .and_then(|r| r.last_transition_time.clone())
                    .unwrap_or_else(|| now.clone()),
            ),
            message: Some(message),
            reason: Some(reason),
            status,
            r#type: "Ready".into(),
        };

        if existing_ready.map(|r| &r.status) != Some(&ready.status) {
            // update transition time if the status has at all changed
            ready.last_transition_time = Some(now)
        }

        // isolationPhase is owned by the scope isolation controller and left out of this apply
        let new_status = Patch::Apply(json!({
            "apiVersion": CommonService::api_version(&()),
            "kind": CommonService::kind(&()),
            "status": {
                "phase": phase,
                "conditions": [ready],
                "observedGeneration": generation,
                "profileControllers": profile_controllers.unwrap_or_else(BTreeMap::new),
            }
        }));
        let css: Api<CommonService> = Api::namespaced(ctx.client.clone(), &namespace);
        let ps = PatchParams::apply("common-service-operator").force();
        let _o = css.patch_status(&name, &ps, &new_status).await?;

        result
    }

    // Finalizer cleanup: the tenant's contribution is withdrawn from the OperandConfig
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        ctx.recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: "DeleteRequested".into(),
                    note: Some(format!("Delete `{}`", self.name_any())),
                    action: "Deleting".into(),
                    secondary: None,
                },
                &self.object_ref(&()),
            )
            .await?;

        let (no_change, _) = self.aggregate(&ctx, Extreme::Min).await?;
        debug!(
            "Withdrew CommonService \"{}\" (OperandConfig changed: {})",
            self.name_any(),
            !no_change
        );
        Ok(Action::await_change())
    }
}

/// Run the CommonService controller
pub async fn run(client: Client, metrics: Metrics, state: State) {
    let css: Api<CommonService> = Api::all(client.clone());

    if let Err(e) = css.list(&ListParams::default().limit(1)).await {
        error!("CommonService is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    Controller::new(css, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, Context::new(client, metrics, state))
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

//! Infrastructure reconciler
//!
//! Plans the difference between the cloud and the wanted wiring, then applies
//! it. A failed operation is reported for its own target only; everything
//! else in the change set still runs.

use crate::api::{CloudApi, FunctionConfiguration, LayerVersion, PublishLayerRequest};
use crate::error::ReconcileError;
use crate::plan::{ApplyReport, FunctionChange, InfraChangeSet, LayerPlan, Target, TargetFailure};
use crate::wiring::{
    attach_update, detach_update, is_wired, layer_description, policy_document, policy_matches,
    role_name, WiringSettings, ARCHITECTURES, LAYER_NAME, POLICY_NAME,
};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tether_core::{DebuggerSession, FunctionCatalog, FunctionDescriptor, NameFilter, TetherConfig};

/// Reconciler settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Session-wide wiring inputs
    pub wiring: WiringSettings,
    /// Functions to wire
    pub filter: NameFilter,
    /// Apply function mutations concurrently
    pub parallel: bool,
    /// Zip archive of the bridge layer
    pub layer_archive: PathBuf,
    /// Bridge version the layer must match
    pub version: String,
}

impl ReconcileSettings {
    /// Settings for a session
    #[must_use]
    pub fn from_config(config: &TetherConfig, session: &DebuggerSession) -> Self {
        Self {
            wiring: WiringSettings {
                session_id: session.session_id.clone(),
                mirror: session.mirror,
                mirror_interval: session.mirror_interval,
                fallback_timeout: config.fallback_timeout(),
                verbose: config.verbose,
                timeout_floor_secs: config.timeout_floor_secs,
            },
            filter: config.name_filter(),
            parallel: config.parallel_deploy,
            layer_archive: config.resolved_layer_archive(),
            version: tether_core::VERSION.to_string(),
        }
    }

    /// With bridge version
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Attach,
    Detach,
    Grant,
    Revoke,
}

struct Outcome {
    target: Target,
    action: Action,
    result: Result<(), ReconcileError>,
}

/// Plans and applies the bridge wiring of discovered functions
pub struct Reconciler {
    api: Arc<dyn CloudApi>,
    catalog: FunctionCatalog,
    settings: ReconcileSettings,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("functions", &self.catalog.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Reconciler over the discovered catalog
    #[must_use]
    pub fn new(api: Arc<dyn CloudApi>, catalog: FunctionCatalog, settings: ReconcileSettings) -> Self {
        Self {
            api,
            catalog,
            settings,
        }
    }

    /// Settings in use
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Plan attaching the bridge to every in-scope function
    ///
    /// Wired functions outside the name filter are planned for detaching.
    ///
    /// # Errors
    /// - any error of the layer version lookup
    pub async fn plan_add(&self) -> Result<InfraChangeSet, ReconcileError> {
        let layer = self.plan_layer().await?;
        let mut change_set = InfraChangeSet::empty();
        change_set.layer = layer.clone();

        let (in_scope, out_of_scope): (Vec<FunctionDescriptor>, Vec<FunctionDescriptor>) = self
            .catalog
            .all()
            .into_iter()
            .partition(|f| self.settings.filter.matches(&f.function_name));

        let wanted = self.read_configurations(&in_scope, &mut change_set.unreadable).await;
        let stale: Vec<FunctionConfiguration> = self
            .read_configurations(&out_of_scope, &mut change_set.unreadable)
            .await
            .into_iter()
            .filter(is_wired)
            .collect();

        for current in &wanted {
            let needed = match &layer {
                LayerPlan::Reuse(arn) => attach_update(current, arn, &self.settings.wiring).is_some(),
                LayerPlan::Publish | LayerPlan::Unchanged => true,
            };
            if needed {
                change_set.attach.push(FunctionChange {
                    current: current.clone(),
                });
            }
        }

        let wanted_roles = roles_of(&wanted, &mut change_set.unreadable);
        let stale_roles: BTreeSet<String> = roles_of(&stale, &mut change_set.unreadable)
            .difference(&wanted_roles)
            .cloned()
            .collect();

        for (role, policy) in self.read_policies(&wanted_roles).await {
            match policy {
                Ok(Some(document)) if policy_matches(&document) => {}
                Ok(_) => change_set.grant_roles.push(role),
                Err(e) => change_set.unreadable.push(unreadable(Target::Role(role), &e)),
            }
        }
        self.plan_revocations(&stale_roles, &mut change_set).await;

        change_set.detach = stale.into_iter().map(|current| FunctionChange { current }).collect();
        log_plan("add", &change_set);
        Ok(change_set)
    }

    /// Plan removing every trace of the bridge from all discovered functions
    ///
    /// # Errors
    /// Never fails as a whole; unreadable targets are listed in the change set.
    pub async fn plan_remove(&self) -> Result<InfraChangeSet, ReconcileError> {
        let mut change_set = InfraChangeSet::empty();

        let configurations = self
            .read_configurations(&self.catalog.all(), &mut change_set.unreadable)
            .await;
        let roles = roles_of(&configurations, &mut change_set.unreadable);
        self.plan_revocations(&roles, &mut change_set).await;

        change_set.detach = configurations
            .into_iter()
            .filter(is_wired)
            .map(|current| FunctionChange { current })
            .collect();
        log_plan("remove", &change_set);
        Ok(change_set)
    }

    /// Apply a change set
    ///
    /// Function mutations run concurrently unless serial deploy is configured.
    /// Role mutations run one after another, alongside the function mutations.
    pub async fn apply(&self, change_set: &InfraChangeSet) -> ApplyReport {
        let mut report = ApplyReport::default();

        let layer_arn = match &change_set.layer {
            LayerPlan::Reuse(arn) => Some(arn.clone()),
            LayerPlan::Publish => match self.publish_layer().await {
                Ok(version) => {
                    report.layer_published = true;
                    Some(version.layer_version_arn)
                }
                Err(e) => {
                    report.fail(Target::Layer, &e);
                    None
                }
            },
            LayerPlan::Unchanged => None,
        };
        report.layer_arn.clone_from(&layer_arn);

        let mut function_ops: Vec<BoxFuture<'_, Outcome>> = Vec::new();
        for change in &change_set.attach {
            match &layer_arn {
                Some(arn) => function_ops.push(self.attach(change, arn.clone()).boxed()),
                None => report.fail(
                    Target::Function(change.function_name().to_string()),
                    &ReconcileError::LayerUnavailable,
                ),
            }
        }
        for change in &change_set.detach {
            function_ops.push(self.detach(change).boxed());
        }
        let role_ops = self.apply_roles(change_set);

        let (function_outcomes, role_outcomes) = if self.settings.parallel {
            futures::join!(join_all(function_ops), role_ops)
        } else {
            let mut outcomes = Vec::with_capacity(function_ops.len());
            for op in function_ops {
                outcomes.push(op.await);
            }
            (outcomes, role_ops.await)
        };

        for outcome in function_outcomes.into_iter().chain(role_outcomes) {
            record(&mut report, outcome);
        }

        tracing::info!(
            attached = report.attached.len(),
            detached = report.detached.len(),
            granted = report.granted.len(),
            revoked = report.revoked.len(),
            failed = report.failures.len(),
            "Infrastructure reconciled"
        );
        report
    }

    /// Delete every version of the bridge layer
    ///
    /// # Errors
    /// - any error of the layer listing or of a version deletion
    pub async fn purge_layer(&self) -> Result<usize, ReconcileError> {
        let mut marker = None;
        let mut found = false;
        loop {
            let page = self.api.list_layers(marker).await?;
            found |= page.layer_names.iter().any(|name| name == LAYER_NAME);
            marker = page.next_marker;
            if found || marker.is_none() {
                break;
            }
        }
        if !found {
            tracing::info!("No bridge layer to delete");
            return Ok(0);
        }

        let versions = self.api.list_layer_versions(LAYER_NAME).await?;
        for version in &versions {
            tracing::debug!(version = version.version, "Deleting bridge layer version");
            self.api.delete_layer_version(LAYER_NAME, version.version).await?;
        }
        tracing::info!(count = versions.len(), "Bridge layer deleted");
        Ok(versions.len())
    }

    async fn plan_layer(&self) -> Result<LayerPlan, ReconcileError> {
        let description = layer_description(&self.settings.version);
        let latest = self
            .api
            .list_layer_versions(LAYER_NAME)
            .await?
            .into_iter()
            .max_by_key(|v| v.version);

        Ok(match latest {
            Some(version) if version.description.as_deref() == Some(description.as_str()) => {
                tracing::debug!(arn = %version.layer_version_arn, "Bridge layer is up to date");
                LayerPlan::Reuse(version.layer_version_arn)
            }
            _ => LayerPlan::Publish,
        })
    }

    async fn publish_layer(&self) -> Result<LayerVersion, ReconcileError> {
        let path = &self.settings.layer_archive;
        let content = tokio::fs::read(path)
            .await
            .map_err(|source| ReconcileError::LayerArchive {
                path: path.clone(),
                source,
            })?;

        let version = self
            .api
            .publish_layer_version(PublishLayerRequest {
                layer_name: LAYER_NAME.to_string(),
                description: layer_description(&self.settings.version),
                content,
                compatible_architectures: ARCHITECTURES.iter().map(ToString::to_string).collect(),
            })
            .await?;
        tracing::info!(arn = %version.layer_version_arn, "Published bridge layer");
        Ok(version)
    }

    async fn read_configurations(
        &self,
        functions: &[FunctionDescriptor],
        unreadable_targets: &mut Vec<TargetFailure>,
    ) -> Vec<FunctionConfiguration> {
        let reads = functions.iter().map(|f| async move {
            (
                f.function_name.clone(),
                self.api.get_function_configuration(&f.function_name).await,
            )
        });

        let mut configurations = Vec::with_capacity(functions.len());
        for (name, result) in join_all(reads).await {
            match result {
                Ok(configuration) => configurations.push(configuration),
                Err(e) => unreadable_targets.push(unreadable(Target::Function(name), &e)),
            }
        }
        configurations
    }

    async fn read_policies(
        &self,
        roles: &BTreeSet<String>,
    ) -> Vec<(String, Result<Option<String>, ReconcileError>)> {
        join_all(roles.iter().map(|role| async move {
            (role.clone(), self.api.get_role_policy(role, POLICY_NAME).await)
        }))
        .await
    }

    async fn plan_revocations(&self, roles: &BTreeSet<String>, change_set: &mut InfraChangeSet) {
        for (role, policy) in self.read_policies(roles).await {
            match policy {
                Ok(Some(_)) => change_set.revoke_roles.push(role),
                Ok(None) => {}
                Err(e) => change_set.unreadable.push(unreadable(Target::Role(role), &e)),
            }
        }
    }

    async fn attach(&self, change: &FunctionChange, layer_arn: String) -> Outcome {
        let name = change.function_name().to_string();
        let result = match attach_update(&change.current, &layer_arn, &self.settings.wiring) {
            Some(update) => {
                tracing::info!(function = %name, "Attaching bridge");
                self.api.update_function_configuration(update).await
            }
            None => Ok(()),
        };
        Outcome {
            target: Target::Function(name),
            action: Action::Attach,
            result,
        }
    }

    async fn detach(&self, change: &FunctionChange) -> Outcome {
        let name = change.function_name().to_string();
        let result = match detach_update(&change.current) {
            Some(update) => {
                tracing::info!(function = %name, "Detaching bridge");
                self.api.update_function_configuration(update).await
            }
            None => Ok(()),
        };
        Outcome {
            target: Target::Function(name),
            action: Action::Detach,
            result,
        }
    }

    async fn apply_roles(&self, change_set: &InfraChangeSet) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        for role in &change_set.grant_roles {
            tracing::info!(%role, "Granting broker access");
            let result = self
                .api
                .put_role_policy(role, POLICY_NAME, policy_document().to_string())
                .await;
            outcomes.push(Outcome {
                target: Target::Role(role.clone()),
                action: Action::Grant,
                result,
            });
        }
        for role in &change_set.revoke_roles {
            tracing::info!(%role, "Revoking broker access");
            let result = self.api.delete_role_policy(role, POLICY_NAME).await;
            outcomes.push(Outcome {
                target: Target::Role(role.clone()),
                action: Action::Revoke,
                result,
            });
        }
        outcomes
    }
}

fn roles_of(
    configurations: &[FunctionConfiguration],
    unreadable_targets: &mut Vec<TargetFailure>,
) -> BTreeSet<String> {
    let mut roles = BTreeSet::new();
    for configuration in configurations {
        match configuration.role.as_deref().and_then(role_name) {
            Some(role) => {
                roles.insert(role.to_string());
            }
            None => unreadable_targets.push(unreadable(
                Target::Function(configuration.function_name.clone()),
                &ReconcileError::RoleUnresolved(configuration.function_name.clone()),
            )),
        }
    }
    roles
}

fn unreadable(target: Target, error: &ReconcileError) -> TargetFailure {
    tracing::warn!(object = %target, %error, "Could not inspect target");
    TargetFailure {
        target,
        message: error.to_string(),
    }
}

fn record(report: &mut ApplyReport, outcome: Outcome) {
    let name = match &outcome.target {
        Target::Function(name) | Target::Role(name) => name.clone(),
        Target::Layer => LAYER_NAME.to_string(),
    };
    match outcome.result {
        Ok(()) => match outcome.action {
            Action::Attach => report.attached.push(name),
            Action::Detach => report.detached.push(name),
            Action::Grant => report.granted.push(name),
            Action::Revoke => report.revoked.push(name),
        },
        Err(e) => report.fail(outcome.target, &e),
    }
}

fn log_plan(kind: &str, change_set: &InfraChangeSet) {
    tracing::info!(
        plan = kind,
        layer = ?change_set.layer,
        attach = ?change_set.attach_names(),
        detach = ?change_set.detach_names(),
        grant = ?change_set.grant_roles,
        revoke = ?change_set.revoke_roles,
        "Infrastructure plan"
    );
}

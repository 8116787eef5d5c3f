//! Resource lifecycle controller.
//!
//! Drives one object through Create/Read/Update/Delete against the store,
//! translating between the caller's declared configuration and the store's
//! canonical representation, and enforcing wait conditions. Each operation is
//! self-contained and runs to completion on the calling task; the store is
//! the sole arbiter of conflicting writes via field ownership.

use kube::core::TypeMeta;
use stopper::Stopper;

use crate::{
    catalog::{self, KindSpec, API_VERSION},
    config::Config,
    error::Error,
    object::{ManagedObject, ObjectId},
    store::{ApplyParams, DeleteOptions, ObjectStore, Propagation},
    validate::validate_metadata,
    wait::{wait_for_delete, wait_for_upsert, WaitCondition},
};

/// Per-call override of the provider-wide field management defaults.
#[derive(Clone, Debug, Default)]
pub struct FieldPolicy {
    pub field_manager: Option<String>,
    pub force_conflicts: Option<bool>,
}

pub struct LifecycleController<S> {
    config: Config,
    store: Option<S>,
    stopper: Stopper,
}

impl<S: ObjectStore> LifecycleController<S> {
    pub fn new(config: Config, store: S) -> Self {
        LifecycleController {
            config,
            store: Some(store),
            stopper: Stopper::new(),
        }
    }

    /// A controller with no cluster connection. Only [`render`] works; every
    /// store-touching operation fails fast with [`Error::Offline`].
    ///
    /// [`render`]: LifecycleController::render
    pub fn offline(config: Config) -> Self {
        LifecycleController {
            config,
            store: None,
            stopper: Stopper::new(),
        }
    }

    /// Stopping the given stopper aborts in-flight store calls and pending
    /// poll sleeps with [`Error::Cancelled`].
    pub fn with_stopper(mut self, stopper: Stopper) -> Self {
        self.stopper = stopper;
        self
    }

    fn store(&self) -> Result<&S, Error> {
        self.store.as_ref().ok_or(Error::Offline)
    }

    fn resolve_policy(&self, policy: &FieldPolicy) -> ApplyParams {
        ApplyParams {
            field_manager: policy
                .field_manager
                .clone()
                .unwrap_or_else(|| self.config.field_manager.clone()),
            force_conflicts: policy
                .force_conflicts
                .unwrap_or(self.config.force_conflicts),
            field_validation: self.config.field_validation,
        }
    }

    /// Validate the declared object and fill in the discriminators.
    fn prepare(
        &self,
        desired: &ManagedObject,
    ) -> Result<(&'static KindSpec, ObjectId, ManagedObject), Error> {
        let kind = desired
            .kind()
            .ok_or_else(|| Error::Configuration("kind is required".to_string()))?;
        let kind_spec = catalog::lookup(kind).ok_or_else(|| {
            Error::Configuration(format!("`{kind}` is not a known chaos-mesh.org kind"))
        })?;
        if let Some(types) = &desired.types {
            if !types.api_version.is_empty() && types.api_version != API_VERSION {
                return Err(Error::Configuration(format!(
                    "apiVersion `{}` is not supported, expected `{API_VERSION}`",
                    types.api_version
                )));
            }
        }

        validate_metadata(&desired.metadata)?;
        let spec = desired
            .spec()
            .ok_or_else(|| Error::Configuration("spec is required".to_string()))?;
        kind_spec.spec_schema.validate(spec, "spec")?;

        let id = desired.object_id()?;

        let mut prepared = desired.clone();
        prepared.types = Some(TypeMeta {
            api_version: API_VERSION.to_string(),
            kind: kind_spec.kind.to_string(),
        });
        // Applying an object that carries managedFields is rejected by the
        // server.
        prepared.metadata.managed_fields = None;
        Ok((kind_spec, id, prepared))
    }

    /// Upsert the declared object via server-side apply and run the given
    /// wait conditions against the result.
    ///
    /// The returned object is whatever the store echoed back; fields the
    /// store computes overwrite the caller's copy. A wait timeout is reported
    /// as an error but does not undo the apply.
    pub async fn create(
        &self,
        desired: &ManagedObject,
        policy: &FieldPolicy,
        wait_conditions: &[WaitCondition],
    ) -> Result<ManagedObject, Error> {
        let store = self.store()?;
        let (kind_spec, id, prepared) = self.prepare(desired)?;
        let ar = kind_spec.api_resource();
        let params = self.resolve_policy(policy);

        let canonical = store.apply(&ar, &id, &prepared, &params).await?;
        tracing::info!(%id, kind = kind_spec.kind, "applied object");

        if wait_conditions.is_empty() {
            return Ok(canonical);
        }
        for condition in wait_conditions {
            wait_for_upsert(store, &ar, &id, condition, &self.stopper).await?;
        }
        // The object may have moved on while we were waiting.
        store.get(&ar, &id).await
    }

    /// Fetch the canonical state of the object at `id`.
    ///
    /// [`Error::NotFound`] signals that the caller should drop the object
    /// from its tracked state.
    pub async fn read(&self, kind: &str, id: &ObjectId) -> Result<ManagedObject, Error> {
        let store = self.store()?;
        let kind_spec = catalog::lookup(kind).ok_or_else(|| {
            Error::Configuration(format!("`{kind}` is not a known chaos-mesh.org kind"))
        })?;
        store.get(&kind_spec.api_resource(), id).await
    }

    /// Same apply mechanics as [`create`], but namespace and name are
    /// immutable; a changed identity addresses a different object and must be
    /// handled upstream as a replacement.
    ///
    /// [`create`]: LifecycleController::create
    pub async fn update(
        &self,
        desired: &ManagedObject,
        policy: &FieldPolicy,
    ) -> Result<ManagedObject, Error> {
        let store = self.store()?;
        let (kind_spec, id, prepared) = self.prepare(desired)?;
        let params = self.resolve_policy(policy);

        let canonical = store
            .apply(&kind_spec.api_resource(), &id, &prepared, &params)
            .await?;
        tracing::info!(%id, kind = kind_spec.kind, "updated object");
        Ok(canonical)
    }

    /// Delete the object at `id`. An object that is already gone counts as
    /// success. With a wait condition, polls until the store reports
    /// not-found or the timeout elapses.
    pub async fn delete(
        &self,
        kind: &str,
        id: &ObjectId,
        propagation: Option<Propagation>,
        wait_condition: Option<&WaitCondition>,
    ) -> Result<(), Error> {
        let store = self.store()?;
        let kind_spec = catalog::lookup(kind).ok_or_else(|| {
            Error::Configuration(format!("`{kind}` is not a known chaos-mesh.org kind"))
        })?;
        let ar = kind_spec.api_resource();

        match store.delete(&ar, id, &DeleteOptions { propagation }).await {
            Ok(()) => tracing::info!(%id, kind, "deleted object"),
            Err(Error::NotFound { .. }) => {
                tracing::debug!(%id, kind, "object was already gone");
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        if let Some(condition) = wait_condition {
            wait_for_delete(store, &ar, id, condition, &self.stopper).await?;
        }
        Ok(())
    }

    /// Manifest variant: validate the declared object, fill in the
    /// discriminators and render it as YAML. No store interaction.
    pub fn render(&self, desired: &ManagedObject) -> Result<String, Error> {
        let (_, _, prepared) = self.prepare(desired)?;
        prepared.to_yaml()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::store::MemoryStore;
    use crate::store::FieldValidation;

    fn controller() -> (Arc<MemoryStore>, LifecycleController<Arc<MemoryStore>>) {
        let store = Arc::new(MemoryStore::new());
        let controller = LifecycleController::new(Config::default(), store.clone());
        (store, controller)
    }

    fn network_chaos() -> ManagedObject {
        serde_yaml::from_str(
            r#"
            apiVersion: chaos-mesh.org/v1alpha1
            kind: NetworkChaos
            metadata:
              namespace: chaos
              name: web-delay
              labels:
                app.kubernetes.io/part-of: chaos-test
            spec:
              action: delay
              mode: one
              selector:
                namespaces: ["web"]
                labelSelectors:
                  app: nginx
              delay:
                latency: 50ms
              duration: 5m
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_derives_id_and_round_trips_spec() {
        let (_store, controller) = controller();
        let canonical = controller
            .create(&network_chaos(), &FieldPolicy::default(), &[])
            .await
            .unwrap();

        assert_eq!(canonical.object_id().unwrap().to_string(), "chaos/web-delay");
        assert_eq!(
            canonical.types.as_ref().unwrap().api_version,
            "chaos-mesh.org/v1alpha1"
        );
        let spec = canonical.spec().unwrap();
        assert_eq!(spec["action"], "delay");
        assert_eq!(spec["delay"]["latency"], "50ms");
        assert_eq!(spec["selector"]["labelSelectors"]["app"], "nginx");
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_input() {
        let (store, controller) = controller();

        let mut unknown_kind = network_chaos();
        unknown_kind.types.as_mut().unwrap().kind = "VolcanoChaos".to_string();

        let mut missing_namespace = network_chaos();
        missing_namespace.metadata.namespace = None;

        let mut bad_spec = network_chaos();
        bad_spec.data["spec"]
            .as_object_mut()
            .unwrap()
            .remove("action");

        for desired in [unknown_kind, missing_namespace, bad_spec] {
            let err = controller
                .create(&desired, &FieldPolicy::default(), &[])
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "got {err}");
        }
        // Nothing was written.
        assert_eq!(store.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_read_not_found_is_distinguished() {
        let (_store, controller) = controller();
        let id = ObjectId::parse("chaos/absent").unwrap();
        let err = controller.read("NetworkChaos", &id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_store, controller) = controller();
        controller
            .create(&network_chaos(), &FieldPolicy::default(), &[])
            .await
            .unwrap();

        let id = ObjectId::parse("chaos/web-delay").unwrap();
        controller
            .delete("NetworkChaos", &id, None, None)
            .await
            .unwrap();
        // Second delete sees not-found and still succeeds.
        controller
            .delete("NetworkChaos", &id, Some(Propagation::Background), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_with_wait() {
        let (_store, controller) = controller();
        controller
            .create(&network_chaos(), &FieldPolicy::default(), &[])
            .await
            .unwrap();

        let id = ObjectId::parse("chaos/web-delay").unwrap();
        let condition = WaitCondition::deleted().with_timeout(Duration::ZERO);
        controller
            .delete("NetworkChaos", &id, None, Some(&condition))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_forced_apply_transfers_ownership() {
        let (store, controller) = controller();
        let ar = catalog::lookup("NetworkChaos").unwrap().api_resource();
        let id = ObjectId::parse("chaos/web-delay").unwrap();

        // Seed the object under a different manager.
        store
            .apply(
                &ar,
                &id,
                &network_chaos(),
                &ApplyParams {
                    field_manager: "someone-else".to_string(),
                    force_conflicts: false,
                    field_validation: FieldValidation::default(),
                },
            )
            .await
            .unwrap();

        // Default policy (no force): conflict surfaces.
        let err = controller
            .create(&network_chaos(), &FieldPolicy::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        // Forcing succeeds and takes ownership.
        let policy = FieldPolicy {
            field_manager: None,
            force_conflicts: Some(true),
        };
        controller
            .create(&network_chaos(), &policy, &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_wait_timeout_does_not_roll_back() {
        let (store, controller) = controller();
        let condition = WaitCondition::new("status.experiment.phase")
            .expecting("Running")
            .with_timeout(Duration::ZERO);

        let err = controller
            .create(&network_chaos(), &FieldPolicy::default(), &[condition])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WaitTimeout { .. }));

        // The apply itself stuck.
        let ar = catalog::lookup("NetworkChaos").unwrap().api_resource();
        let id = ObjectId::parse("chaos/web-delay").unwrap();
        assert!(store.contains(&ar, &id));
    }

    #[tokio::test]
    async fn test_create_with_satisfied_wait_rereads_canonical_state() {
        let (store, controller) = controller();
        let condition = WaitCondition::new("metadata.name")
            .expecting("web-delay")
            .with_timeout(Duration::ZERO);

        let before = store.get_calls();
        controller
            .create(&network_chaos(), &FieldPolicy::default(), &[condition])
            .await
            .unwrap();
        // One get for the wait evaluation, one final refresh.
        assert_eq!(store.get_calls() - before, 2);
    }

    #[tokio::test]
    async fn test_offline_controller_fails_fast() {
        let controller =
            LifecycleController::<Arc<MemoryStore>>::offline(Config::default());
        let id = ObjectId::parse("chaos/web-delay").unwrap();

        let err = controller
            .create(&network_chaos(), &FieldPolicy::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Offline));
        assert!(matches!(
            controller.read("NetworkChaos", &id).await.unwrap_err(),
            Error::Offline
        ));
        assert!(matches!(
            controller
                .update(&network_chaos(), &FieldPolicy::default())
                .await
                .unwrap_err(),
            Error::Offline
        ));
        assert!(matches!(
            controller
                .delete("NetworkChaos", &id, None, None)
                .await
                .unwrap_err(),
            Error::Offline
        ));
    }

    #[tokio::test]
    async fn test_render_works_offline() {
        let controller =
            LifecycleController::<Arc<MemoryStore>>::offline(Config::default());
        let yaml = controller.render(&network_chaos()).unwrap();
        assert!(yaml.contains("apiVersion: chaos-mesh.org/v1alpha1"));
        assert!(yaml.contains("kind: NetworkChaos"));
        assert!(yaml.contains("latency: 50ms"));

        // Discriminators are filled in even when the manifest omits them.
        let mut bare = network_chaos();
        bare.types.as_mut().unwrap().api_version = String::new();
        let yaml = controller.render(&bare).unwrap();
        assert!(yaml.contains("apiVersion: chaos-mesh.org/v1alpha1"));
    }
}

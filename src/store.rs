//! Object store seam between the lifecycle controller and the cluster.
//!
//! [`ObjectStore`] is the capability the controller needs: get, apply-patch
//! and delete, addressed by an [`ApiResource`] plus namespace/name.
//! [`KubeStore`] backs it with the Kubernetes dynamic API; [`MemoryStore`] is
//! an in-process fake with server-side-apply ownership semantics for tests
//! and dry runs.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PropagationPolicy, ValidationDirective},
    discovery::ApiResource,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    object::{ManagedObject, ObjectId},
};

/// Resolved field management policy for one apply call.
#[derive(Clone, Debug)]
pub struct ApplyParams {
    /// Writer attributed as owner of the applied fields.
    pub field_manager: String,
    /// Override fields owned by other managers instead of failing.
    pub force_conflicts: bool,
    pub field_validation: FieldValidation,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum FieldValidation {
    Ignore,
    Warn,
    #[default]
    Strict,
}

/// Deletion semantics for dependent objects. `None` leaves the choice to the
/// store.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Propagation {
    Orphan,
    Background,
    Foreground,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DeleteOptions {
    pub propagation: Option<Propagation>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, ar: &ApiResource, id: &ObjectId) -> Result<ManagedObject, Error>;

    async fn apply(
        &self,
        ar: &ApiResource,
        id: &ObjectId,
        desired: &ManagedObject,
        params: &ApplyParams,
    ) -> Result<ManagedObject, Error>;

    async fn delete(
        &self,
        ar: &ApiResource,
        id: &ObjectId,
        options: &DeleteOptions,
    ) -> Result<(), Error>;
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<S> {
    async fn get(&self, ar: &ApiResource, id: &ObjectId) -> Result<ManagedObject, Error> {
        (**self).get(ar, id).await
    }

    async fn apply(
        &self,
        ar: &ApiResource,
        id: &ObjectId,
        desired: &ManagedObject,
        params: &ApplyParams,
    ) -> Result<ManagedObject, Error> {
        (**self).apply(ar, id, desired, params).await
    }

    async fn delete(
        &self,
        ar: &ApiResource,
        id: &ObjectId,
        options: &DeleteOptions,
    ) -> Result<(), Error> {
        (**self).delete(ar, id, options).await
    }
}

/// Store backed by the Kubernetes dynamic API.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        KubeStore { client }
    }

    fn api(&self, ar: &ApiResource, namespace: &str) -> Api<ManagedObject> {
        Api::namespaced_with(self.client.clone(), namespace, ar)
    }
}

fn classify(err: kube::Error, verb: &'static str, ar: &ApiResource, id: &ObjectId) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound {
            kind: ar.kind.clone(),
            id: id.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "Conflict" => Error::Conflict {
            kind: ar.kind.clone(),
            id: id.to_string(),
            message: ae.message,
        },
        other => Error::Transport {
            verb,
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
            id: id.to_string(),
            source: other,
        },
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, ar: &ApiResource, id: &ObjectId) -> Result<ManagedObject, Error> {
        let object = self
            .api(ar, &id.namespace)
            .get_opt(&id.name)
            .await
            .map_err(|err| classify(err, "get", ar, id))?;
        object.ok_or_else(|| Error::NotFound {
            kind: ar.kind.clone(),
            id: id.to_string(),
        })
    }

    async fn apply(
        &self,
        ar: &ApiResource,
        id: &ObjectId,
        desired: &ManagedObject,
        params: &ApplyParams,
    ) -> Result<ManagedObject, Error> {
        let mut patch_params = PatchParams::apply(&params.field_manager);
        if params.force_conflicts {
            patch_params = patch_params.force();
        }
        patch_params.field_validation = Some(match params.field_validation {
            FieldValidation::Ignore => ValidationDirective::Ignore,
            FieldValidation::Warn => ValidationDirective::Warn,
            FieldValidation::Strict => ValidationDirective::Strict,
        });

        self.api(ar, &id.namespace)
            .patch(&id.name, &patch_params, &Patch::Apply(desired))
            .await
            .map_err(|err| classify(err, "apply", ar, id))
    }

    async fn delete(
        &self,
        ar: &ApiResource,
        id: &ObjectId,
        options: &DeleteOptions,
    ) -> Result<(), Error> {
        let delete_params = DeleteParams {
            propagation_policy: options.propagation.map(|p| match p {
                Propagation::Orphan => PropagationPolicy::Orphan,
                Propagation::Background => PropagationPolicy::Background,
                Propagation::Foreground => PropagationPolicy::Foreground,
            }),
            ..Default::default()
        };

        self.api(ar, &id.namespace)
            .delete(&id.name, &delete_params)
            .await
            .map_err(|err| classify(err, "delete", ar, id))?;
        Ok(())
    }
}

/// In-memory store with per-object field manager tracking.
///
/// Apply behaves like server-side apply at whole-object granularity: an
/// object applied by one manager conflicts with a later apply by another
/// manager unless `force_conflicts` is set, which transfers ownership.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    objects: HashMap<(String, String), Entry>,
    revision: u64,
    get_calls: u64,
}

struct Entry {
    manager: String,
    object: ManagedObject,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls served so far.
    pub fn get_calls(&self) -> u64 {
        self.state.lock().unwrap().get_calls
    }

    pub fn contains(&self, ar: &ApiResource, id: &ObjectId) -> bool {
        self.state
            .lock()
            .unwrap()
            .objects
            .contains_key(&(ar.plural.clone(), id.to_string()))
    }

    /// Mutate a stored object in place, e.g. to simulate a controller filling
    /// in status.
    pub fn patch_stored(
        &self,
        ar: &ApiResource,
        id: &ObjectId,
        patch: impl FnOnce(&mut ManagedObject),
    ) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.objects.get_mut(&(ar.plural.clone(), id.to_string())) {
            patch(&mut entry.object);
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, ar: &ApiResource, id: &ObjectId) -> Result<ManagedObject, Error> {
        let mut state = self.state.lock().unwrap();
        state.get_calls += 1;
        state
            .objects
            .get(&(ar.plural.clone(), id.to_string()))
            .map(|entry| entry.object.clone())
            .ok_or_else(|| Error::NotFound {
                kind: ar.kind.clone(),
                id: id.to_string(),
            })
    }

    async fn apply(
        &self,
        ar: &ApiResource,
        id: &ObjectId,
        desired: &ManagedObject,
        params: &ApplyParams,
    ) -> Result<ManagedObject, Error> {
        let mut state = self.state.lock().unwrap();
        let key = (ar.plural.clone(), id.to_string());

        if let Some(existing) = state.objects.get(&key) {
            if existing.manager != params.field_manager && !params.force_conflicts {
                return Err(Error::Conflict {
                    kind: ar.kind.clone(),
                    id: id.to_string(),
                    message: format!(
                        "field is owned by manager `{}`",
                        existing.manager
                    ),
                });
            }
        }

        state.revision += 1;
        let revision = state.revision;

        // Echo the desired document back with the fields a real server
        // computes.
        let mut canonical = desired.clone();
        canonical.metadata.resource_version = Some(revision.to_string());
        if canonical.metadata.uid.is_none() {
            canonical.metadata.uid = Some(format!("mem-uid-{revision}"));
        }
        canonical.metadata.generation =
            Some(canonical.metadata.generation.unwrap_or(0) + 1);

        state.objects.insert(
            key,
            Entry {
                manager: params.field_manager.clone(),
                object: canonical.clone(),
            },
        );
        Ok(canonical)
    }

    async fn delete(
        &self,
        ar: &ApiResource,
        id: &ObjectId,
        _options: &DeleteOptions,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state
            .objects
            .remove(&(ar.plural.clone(), id.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound {
                kind: ar.kind.clone(),
                id: id.to_string(),
            })
    }
}

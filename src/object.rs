use std::{borrow::Cow, fmt};

use kube::{
    core::{DynamicResourceScope, ObjectMeta, TypeMeta},
    discovery::ApiResource,
    Resource,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Schema-less resource instance driven through the lifecycle controller.
///
/// The `kube` crate expects every resource to carry `metadata`, but the type
/// fields may be absent in caller-supplied manifests, so they are optional and
/// filled in from the kind catalog before anything is sent to the store.
/// Everything besides the metadata (`spec`, `status`, ...) is kept as an
/// opaque JSON value; the controller never interprets it.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ManagedObject {
    /// The type fields, not always present in caller input
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// All other keys
    #[serde(flatten)]
    pub data: serde_json::Value,
}

impl ManagedObject {
    /// Identity of this object, requiring both namespace and name to be set.
    pub fn object_id(&self) -> Result<ObjectId, Error> {
        let namespace = self
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::Configuration("metadata.namespace is required".to_string()))?;
        let name = self
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::Configuration("metadata.name is required".to_string()))?;
        ObjectId::new(namespace, name)
    }

    /// Kind discriminator, if the type fields are present.
    pub fn kind(&self) -> Option<&str> {
        self.types.as_ref().map(|t| t.kind.as_str())
    }

    pub fn spec(&self) -> Option<&serde_json::Value> {
        self.data.get("spec")
    }

    /// The full JSON document, as it would go over the wire.
    pub fn to_document(&self) -> Result<serde_json::Value, Error> {
        serde_json::to_value(self).map_err(Error::SerializeJson)
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(Error::SerializeYaml)
    }
}

impl Resource for ManagedObject {
    type DynamicType = ApiResource;
    type Scope = DynamicResourceScope;

    fn group(dt: &ApiResource) -> Cow<'_, str> {
        dt.group.as_str().into()
    }

    fn version(dt: &ApiResource) -> Cow<'_, str> {
        dt.version.as_str().into()
    }

    fn kind(dt: &ApiResource) -> Cow<'_, str> {
        dt.kind.as_str().into()
    }

    fn api_version(dt: &ApiResource) -> Cow<'_, str> {
        dt.api_version.as_str().into()
    }

    fn plural(dt: &ApiResource) -> Cow<'_, str> {
        dt.plural.as_str().into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// `(namespace, name)` pair addressing one object within a resource kind.
///
/// The string form `namespace/name` is a derived, read-only external
/// identifier; lookups always go through the two segments directly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub namespace: String,
    pub name: String,
}

impl ObjectId {
    pub fn new(namespace: &str, name: &str) -> Result<Self, Error> {
        if namespace.is_empty() {
            return Err(Error::Configuration(
                "metadata.namespace must not be empty".to_string(),
            ));
        }
        if name.is_empty() {
            return Err(Error::Configuration(
                "metadata.name must not be empty".to_string(),
            ));
        }
        Ok(ObjectId {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// Parse an import identifier of the form `<namespace>/<name>`.
    ///
    /// Exactly two non-empty slash-separated segments are accepted; anything
    /// else is a configuration error.
    pub fn parse(id: &str) -> Result<Self, Error> {
        let mut segments = id.split('/');
        match (segments.next(), segments.next(), segments.next()) {
            (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => {
                Ok(ObjectId {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(Error::Configuration(format!(
                "import id `{id}` is not of the form `<namespace>/<name>`"
            ))),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

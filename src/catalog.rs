//! Static registry of chaos-mesh.org/v1alpha1 resource kinds.
//!
//! One [`KindSpec`] per custom resource kind, carrying the plural used to
//! address the dynamic API and the declarative spec schema consumed by the
//! generic validator.

use kube::{core::GroupVersionKind, discovery::ApiResource};
use once_cell::sync::Lazy;

use crate::schema::{Field, Schema};

pub const GROUP: &str = "chaos-mesh.org";
pub const VERSION: &str = "v1alpha1";
pub const API_VERSION: &str = "chaos-mesh.org/v1alpha1";

pub struct KindSpec {
    pub kind: &'static str,
    pub plural: &'static str,
    pub spec_schema: Schema,
}

impl KindSpec {
    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(GROUP, VERSION, self.kind);
        ApiResource::from_gvk_with_plural(&gvk, self.plural)
    }
}

pub fn lookup(kind: &str) -> Option<&'static KindSpec> {
    KINDS.iter().find(|k| k.kind == kind)
}

pub fn kinds() -> impl Iterator<Item = &'static KindSpec> {
    KINDS.iter()
}

fn string_list() -> Schema {
    Schema::List(Box::new(Schema::String))
}

/// Pod selector shared by every chaos kind.
fn selector() -> Schema {
    Schema::Object(vec![
        Field::optional("namespaces", string_list()),
        Field::optional("labelSelectors", Schema::Map(Box::new(Schema::String))),
        Field::optional("annotationSelectors", Schema::Map(Box::new(Schema::String))),
        Field::optional("fieldSelectors", Schema::Map(Box::new(Schema::String))),
        Field::optional("pods", Schema::Map(Box::new(string_list()))),
        Field::optional("nodes", string_list()),
        Field::optional("nodeSelectors", Schema::Map(Box::new(Schema::String))),
        Field::optional("podPhaseSelectors", string_list()),
    ])
}

static KINDS: Lazy<Vec<KindSpec>> = Lazy::new(|| {
    vec![
        KindSpec {
            kind: "PodChaos",
            plural: "podchaos",
            spec_schema: Schema::Object(vec![
                Field::required("action", Schema::String),
                Field::required("selector", selector()),
                Field::required("mode", Schema::String),
                Field::optional("value", Schema::String),
                Field::optional("duration", Schema::String),
                Field::optional("gracePeriod", Schema::Integer),
                Field::optional("containerNames", string_list()),
            ]),
        },
        KindSpec {
            kind: "NetworkChaos",
            plural: "networkchaos",
            spec_schema: Schema::Object(vec![
                Field::required("action", Schema::String),
                Field::required("selector", selector()),
                Field::required("mode", Schema::String),
                Field::optional("value", Schema::String),
                Field::optional("duration", Schema::String),
                Field::optional("direction", Schema::String),
                Field::optional("externalTargets", string_list()),
                Field::optional("device", Schema::String),
                Field::optional(
                    "delay",
                    Schema::Object(vec![
                        Field::required("latency", Schema::String),
                        Field::optional("correlation", Schema::String),
                        Field::optional("jitter", Schema::String),
                    ]),
                ),
                Field::optional(
                    "loss",
                    Schema::Object(vec![
                        Field::required("loss", Schema::String),
                        Field::optional("correlation", Schema::String),
                    ]),
                ),
                Field::optional(
                    "duplicate",
                    Schema::Object(vec![
                        Field::required("duplicate", Schema::String),
                        Field::optional("correlation", Schema::String),
                    ]),
                ),
                Field::optional(
                    "corrupt",
                    Schema::Object(vec![
                        Field::required("corrupt", Schema::String),
                        Field::optional("correlation", Schema::String),
                    ]),
                ),
                Field::optional(
                    "bandwidth",
                    Schema::Object(vec![
                        Field::required("rate", Schema::String),
                        Field::required("limit", Schema::Integer),
                        Field::required("buffer", Schema::Integer),
                        Field::optional("peakrate", Schema::Integer),
                        Field::optional("minburst", Schema::Integer),
                    ]),
                ),
                Field::optional(
                    "target",
                    Schema::Object(vec![
                        Field::required("selector", selector()),
                        Field::required("mode", Schema::String),
                        Field::optional("value", Schema::String),
                    ]),
                ),
            ]),
        },
        KindSpec {
            kind: "StressChaos",
            plural: "stresschaos",
            spec_schema: Schema::Object(vec![
                Field::required("selector", selector()),
                Field::required("mode", Schema::String),
                Field::optional("value", Schema::String),
                Field::optional("duration", Schema::String),
                Field::optional("containerNames", string_list()),
                Field::optional("stressngStressors", Schema::String),
                Field::optional(
                    "stressors",
                    Schema::Object(vec![
                        Field::optional(
                            "cpu",
                            Schema::Object(vec![
                                Field::required("workers", Schema::Integer),
                                Field::optional("load", Schema::Integer),
                                Field::optional("options", string_list()),
                            ]),
                        ),
                        Field::optional(
                            "memory",
                            Schema::Object(vec![
                                Field::required("workers", Schema::Integer),
                                Field::optional("size", Schema::String),
                                Field::optional("options", string_list()),
                            ]),
                        ),
                    ]),
                ),
            ]),
        },
        KindSpec {
            kind: "IOChaos",
            plural: "iochaos",
            spec_schema: Schema::Object(vec![
                Field::required("action", Schema::String),
                Field::required("selector", selector()),
                Field::required("mode", Schema::String),
                Field::required("volumePath", Schema::String),
                Field::optional("value", Schema::String),
                Field::optional("path", Schema::String),
                Field::optional("delay", Schema::String),
                Field::optional("errno", Schema::Integer),
                Field::optional("percent", Schema::Integer),
                Field::optional("methods", string_list()),
                Field::optional("containerNames", string_list()),
                Field::optional("duration", Schema::String),
            ]),
        },
        KindSpec {
            kind: "TimeChaos",
            plural: "timechaos",
            spec_schema: Schema::Object(vec![
                Field::required("selector", selector()),
                Field::required("mode", Schema::String),
                Field::required("timeOffset", Schema::String),
                Field::optional("value", Schema::String),
                Field::optional("clockIds", string_list()),
                Field::optional("containerNames", string_list()),
                Field::optional("duration", Schema::String),
            ]),
        },
        KindSpec {
            kind: "DNSChaos",
            plural: "dnschaos",
            spec_schema: Schema::Object(vec![
                Field::required("action", Schema::String),
                Field::required("selector", selector()),
                Field::required("mode", Schema::String),
                Field::optional("value", Schema::String),
                Field::optional("patterns", string_list()),
                Field::optional("containerNames", string_list()),
                Field::optional("duration", Schema::String),
            ]),
        },
        KindSpec {
            kind: "HTTPChaos",
            plural: "httpchaos",
            spec_schema: Schema::Object(vec![
                Field::required("selector", selector()),
                Field::required("mode", Schema::String),
                Field::required("target", Schema::String),
                Field::required("port", Schema::Integer),
                Field::optional("value", Schema::String),
                Field::optional("method", Schema::String),
                Field::optional("path", Schema::String),
                Field::optional("code", Schema::Integer),
                Field::optional("abort", Schema::Boolean),
                Field::optional("delay", Schema::String),
                Field::optional("duration", Schema::String),
            ]),
        },
        KindSpec {
            kind: "KernelChaos",
            plural: "kernelchaos",
            spec_schema: Schema::Object(vec![
                Field::required("selector", selector()),
                Field::required("mode", Schema::String),
                Field::optional("value", Schema::String),
                Field::required(
                    "failKernRequest",
                    Schema::Object(vec![
                        Field::required("failtype", Schema::Integer),
                        Field::optional(
                            "callchain",
                            Schema::List(Box::new(Schema::Object(vec![
                                Field::required("funcname", Schema::String),
                                Field::optional("parameters", Schema::String),
                                Field::optional("predicate", Schema::String),
                            ]))),
                        ),
                        Field::optional("headers", string_list()),
                        Field::optional("probability", Schema::Integer),
                        Field::optional("times", Schema::Integer),
                    ]),
                ),
                Field::optional("duration", Schema::String),
            ]),
        },
    ]
});

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_lookup() {
        assert!(lookup("NetworkChaos").is_some());
        assert!(lookup("PodChaos").is_some());
        assert!(lookup("FooChaos").is_none());
        assert!(kinds().count() >= 8);
    }

    #[test]
    fn test_api_resource() {
        let ar = lookup("NetworkChaos").unwrap().api_resource();
        assert_eq!(ar.group, GROUP);
        assert_eq!(ar.version, VERSION);
        assert_eq!(ar.api_version, API_VERSION);
        assert_eq!(ar.plural, "networkchaos");
    }

    #[test]
    fn test_network_chaos_spec_validates() {
        let spec = json!({
            "action": "delay",
            "mode": "one",
            "selector": {"namespaces": ["web"], "labelSelectors": {"app": "nginx"}},
            "delay": {"latency": "50ms", "jitter": "5ms"},
            "duration": "5m",
        });
        lookup("NetworkChaos")
            .unwrap()
            .spec_schema
            .validate(&spec, "spec")
            .unwrap();
    }
}

//! Post-operation wait conditions.
//!
//! A condition names a path into the object document and optionally a value
//! the path must resolve to. The evaluator re-fetches the object on a fixed
//! interval until the condition is satisfied, the timeout elapses, or the
//! caller's stopper fires. A wait timeout never rolls back the mutation that
//! preceded it.

use std::time::Duration;

use serde_json::Value;
use stopper::Stopper;
use tokio::time::{sleep, Instant};

use crate::{
    error::Error,
    object::ObjectId,
    store::ObjectStore,
};

use kube::discovery::ApiResource;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Waits longer than this are capped.
const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Debug, PartialEq)]
pub struct WaitCondition {
    /// Dotted path into the object document, with optional `[index]`
    /// suffixes; a leading `$` or `.` is accepted and ignored.
    pub path: String,
    /// If set, the path must resolve to this value (string form); if unset,
    /// existence of a non-null value satisfies the condition.
    pub expected_value: Option<String>,
    /// Zero means evaluate exactly once, with no sleep.
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitCondition {
    pub fn new(path: impl Into<String>) -> Self {
        WaitCondition {
            path: path.into(),
            expected_value: None,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Condition used for delete waits; satisfied when the object is gone.
    pub fn deleted() -> Self {
        Self::new("deletion")
    }

    pub fn expecting(mut self, value: impl Into<String>) -> Self {
        self.expected_value = Some(value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Parse the CLI form `path` or `path=value`.
    pub fn parse_flag(flag: &str) -> Result<Self, Error> {
        let (path, value) = match flag.split_once('=') {
            Some((path, value)) => (path, Some(value)),
            None => (flag, None),
        };
        if path.is_empty() {
            return Err(Error::Configuration(format!(
                "wait condition `{flag}` has an empty path"
            )));
        }
        let mut condition = Self::new(path);
        condition.expected_value = value.map(str::to_string);
        Ok(condition)
    }

    fn is_satisfied_by(&self, document: &Value) -> bool {
        let Some(resolved) = resolve_path(document, &self.path) else {
            return false;
        };
        if resolved.is_null() {
            return false;
        }
        match &self.expected_value {
            None => true,
            Some(expected) => scalar_string(resolved) == *expected,
        }
    }
}

/// Poll until the upsert condition holds on the object at `id`.
pub async fn wait_for_upsert<S: ObjectStore + ?Sized>(
    store: &S,
    ar: &ApiResource,
    id: &ObjectId,
    condition: &WaitCondition,
    stopper: &Stopper,
) -> Result<(), Error> {
    let timeout = condition.timeout.min(MAX_TIMEOUT);
    let started = Instant::now();
    loop {
        let fetched = match stopper.stop_future(store.get(ar, id)).await {
            None => return Err(Error::Cancelled),
            Some(fetched) => fetched,
        };
        let satisfied = match fetched {
            Ok(object) => condition.is_satisfied_by(&object.to_document()?),
            // The object may not be observable yet right after apply.
            Err(Error::NotFound { .. }) => false,
            Err(err) => return Err(err),
        };
        if satisfied {
            tracing::debug!(%id, path = %condition.path, "wait condition satisfied");
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(Error::WaitTimeout {
                path: condition.path.clone(),
                waited: started.elapsed(),
            });
        }
        if stopper
            .stop_future(sleep(condition.poll_interval))
            .await
            .is_none()
        {
            return Err(Error::Cancelled);
        }
    }
}

/// Poll until the object at `id` is gone.
pub async fn wait_for_delete<S: ObjectStore + ?Sized>(
    store: &S,
    ar: &ApiResource,
    id: &ObjectId,
    condition: &WaitCondition,
    stopper: &Stopper,
) -> Result<(), Error> {
    let timeout = condition.timeout.min(MAX_TIMEOUT);
    let started = Instant::now();
    loop {
        let fetched = match stopper.stop_future(store.get(ar, id)).await {
            None => return Err(Error::Cancelled),
            Some(fetched) => fetched,
        };
        match fetched {
            Err(Error::NotFound { .. }) => {
                tracing::debug!(%id, "object is gone");
                return Ok(());
            }
            Ok(_) => {}
            Err(err) => return Err(err),
        }
        if started.elapsed() >= timeout {
            return Err(Error::WaitTimeout {
                path: "deletion".to_string(),
                waited: started.elapsed(),
            });
        }
        if stopper
            .stop_future(sleep(condition.poll_interval))
            .await
            .is_none()
        {
            return Err(Error::Cancelled);
        }
    }
}

/// Resolve a dotted path (optionally with `[index]` suffixes) against a JSON
/// document.
pub(crate) fn resolve_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix('$').unwrap_or(path);
    let path = path.strip_prefix('.').unwrap_or(path);
    let mut current = document;
    if path.is_empty() {
        return Some(current);
    }
    for segment in path.split('.') {
        let (key, indexes) = parse_segment(segment)?;
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for index in indexes {
            current = current.get(index)?;
        }
    }
    Some(current)
}

fn parse_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(bracket) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };
    let key = &segment[..bracket];
    let mut indexes = Vec::new();
    let mut rest = &segment[bracket..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let end = stripped.find(']')?;
        indexes.push(stripped[..end].parse().ok()?);
        rest = &stripped[end + 1..];
    }
    if rest.is_empty() {
        Some((key, indexes))
    } else {
        None
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        catalog,
        object::ManagedObject,
        store::{ApplyParams, FieldValidation, MemoryStore},
    };

    fn document() -> Value {
        json!({
            "metadata": {"name": "kill-one", "namespace": "chaos"},
            "spec": {"action": "pod-kill"},
            "status": {
                "conditions": [
                    {"type": "AllInjected", "status": "True"},
                    {"type": "Selected", "status": "False"},
                ],
            },
        })
    }

    #[test]
    fn test_resolve_path() {
        let doc = document();
        assert_eq!(
            resolve_path(&doc, "metadata.name"),
            Some(&json!("kill-one"))
        );
        assert_eq!(
            resolve_path(&doc, "$.status.conditions[0].status"),
            Some(&json!("True"))
        );
        assert_eq!(
            resolve_path(&doc, ".status.conditions[1].type"),
            Some(&json!("Selected"))
        );
        assert_eq!(resolve_path(&doc, "status.conditions[2]"), None);
        assert_eq!(resolve_path(&doc, "spec.missing"), None);
        assert_eq!(resolve_path(&doc, "spec.action[0]"), None);
    }

    #[test]
    fn test_parse_flag() {
        let condition = WaitCondition::parse_flag("status.experiment.phase=Running").unwrap();
        assert_eq!(condition.path, "status.experiment.phase");
        assert_eq!(condition.expected_value.as_deref(), Some("Running"));

        let condition = WaitCondition::parse_flag("status.conditions[0].status").unwrap();
        assert_eq!(condition.expected_value, None);

        assert!(WaitCondition::parse_flag("=Running").is_err());
    }

    #[test]
    fn test_satisfaction() {
        let doc = document();
        assert!(WaitCondition::new("status.conditions").is_satisfied_by(&doc));
        assert!(WaitCondition::new("status.conditions[0].status")
            .expecting("True")
            .is_satisfied_by(&doc));
        assert!(!WaitCondition::new("status.conditions[1].status")
            .expecting("True")
            .is_satisfied_by(&doc));
        assert!(!WaitCondition::new("status.phase").is_satisfied_by(&doc));
    }

    fn pod_chaos() -> ManagedObject {
        serde_yaml::from_str(
            r#"
            apiVersion: chaos-mesh.org/v1alpha1
            kind: PodChaos
            metadata:
              namespace: chaos
              name: kill-one
            spec:
              action: pod-kill
            "#,
        )
        .unwrap()
    }

    fn apply_params() -> ApplyParams {
        ApplyParams {
            field_manager: "test".to_string(),
            force_conflicts: false,
            field_validation: FieldValidation::default(),
        }
    }

    #[tokio::test]
    async fn test_zero_timeout_evaluates_exactly_once() {
        let store = MemoryStore::new();
        let ar = catalog::lookup("PodChaos").unwrap().api_resource();
        let id = ObjectId::parse("chaos/kill-one").unwrap();
        let condition = WaitCondition::new("status.phase").with_timeout(Duration::ZERO);

        let err = wait_for_upsert(&store, &ar, &id, &condition, &Stopper::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WaitTimeout { .. }));
        assert_eq!(store.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_satisfied_on_first_evaluation() {
        let store = MemoryStore::new();
        let ar = catalog::lookup("PodChaos").unwrap().api_resource();
        let id = ObjectId::parse("chaos/kill-one").unwrap();
        store
            .apply(&ar, &id, &pod_chaos(), &apply_params())
            .await
            .unwrap();

        let condition = WaitCondition::new("spec.action")
            .expecting("pod-kill")
            .with_timeout(Duration::ZERO);
        wait_for_upsert(&store, &ar, &id, &condition, &Stopper::new())
            .await
            .unwrap();
        assert_eq!(store.get_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_approximately_timeout() {
        let store = MemoryStore::new();
        let ar = catalog::lookup("PodChaos").unwrap().api_resource();
        let id = ObjectId::parse("chaos/kill-one").unwrap();
        store
            .apply(&ar, &id, &pod_chaos(), &apply_params())
            .await
            .unwrap();

        let condition = WaitCondition::new("status.phase")
            .with_timeout(Duration::from_secs(10))
            .with_poll_interval(Duration::from_secs(1));
        let err = wait_for_upsert(&store, &ar, &id, &condition, &Stopper::new())
            .await
            .unwrap_err();
        match err {
            Error::WaitTimeout { waited, .. } => {
                assert!(waited >= Duration::from_secs(10));
                assert!(waited < Duration::from_secs(11));
            }
            other => panic!("expected WaitTimeout, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_satisfied_once_status_appears() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let ar = catalog::lookup("PodChaos").unwrap().api_resource();
        let id = ObjectId::parse("chaos/kill-one").unwrap();
        store
            .apply(&ar, &id, &pod_chaos(), &apply_params())
            .await
            .unwrap();

        let filler = {
            let store = store.clone();
            let ar = ar.clone();
            let id = id.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(3)).await;
                store.patch_stored(&ar, &id, |object| {
                    object.data["status"] = json!({"experiment": {"phase": "Running"}});
                });
            })
        };

        let condition = WaitCondition::new("status.experiment.phase")
            .expecting("Running")
            .with_timeout(Duration::from_secs(30))
            .with_poll_interval(Duration::from_secs(1));
        wait_for_upsert(store.as_ref(), &ar, &id, &condition, &Stopper::new())
            .await
            .unwrap();
        filler.await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_wait() {
        let store = MemoryStore::new();
        let ar = catalog::lookup("PodChaos").unwrap().api_resource();
        let id = ObjectId::parse("chaos/kill-one").unwrap();

        // Already gone: satisfied immediately.
        let condition = WaitCondition::deleted().with_timeout(Duration::ZERO);
        wait_for_delete(&store, &ar, &id, &condition, &Stopper::new())
            .await
            .unwrap();

        // Still present with a zero timeout: times out after one check.
        store
            .apply(&ar, &id, &pod_chaos(), &apply_params())
            .await
            .unwrap();
        let err = wait_for_delete(&store, &ar, &id, &condition, &Stopper::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WaitTimeout { .. }));
    }

    #[tokio::test]
    async fn test_stopped_wait_is_cancelled() {
        let store = MemoryStore::new();
        let ar = catalog::lookup("PodChaos").unwrap().api_resource();
        let id = ObjectId::parse("chaos/kill-one").unwrap();
        let stopper = Stopper::new();
        stopper.stop();

        let condition = WaitCondition::new("status.phase");
        let err = wait_for_upsert(&store, &ar, &id, &condition, &stopper)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}

//! Kubernetes metadata syntax checks, applied before any store call.

use kube::core::ObjectMeta;

use crate::error::Error;

const DNS1123_SUBDOMAIN_MAX: usize = 253;
const DNS1123_LABEL_MAX: usize = 63;
const QUALIFIED_NAME_MAX: usize = 63;
const LABEL_VALUE_MAX: usize = 63;

/// Validate name, namespace, labels and annotations of a caller-supplied
/// object against the Kubernetes syntax rules.
pub(crate) fn validate_metadata(metadata: &ObjectMeta) -> Result<(), Error> {
    let mut errors = Vec::new();

    match metadata.name.as_deref() {
        Some(name) if is_dns1123_subdomain(name) => {}
        Some(name) => errors.push(format!(
            "metadata.name `{name}` is not a valid DNS-1123 subdomain"
        )),
        None => errors.push("metadata.name is required".to_string()),
    }
    match metadata.namespace.as_deref() {
        Some(namespace) if is_dns1123_label(namespace) => {}
        Some(namespace) => errors.push(format!(
            "metadata.namespace `{namespace}` is not a valid DNS-1123 label"
        )),
        None => errors.push("metadata.namespace is required".to_string()),
    }

    if let Some(labels) = &metadata.labels {
        for (key, value) in labels {
            if !is_qualified_name(key) {
                errors.push(format!("label key `{key}` is not a valid qualified name"));
            }
            if !is_label_value(value) {
                errors.push(format!(
                    "label value `{value}` for key `{key}` is not valid"
                ));
            }
        }
    }
    if let Some(annotations) = &metadata.annotations {
        for key in annotations.keys() {
            if !is_qualified_name(key) {
                errors.push(format!(
                    "annotation key `{key}` is not a valid qualified name"
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Configuration(errors.join("; ")))
    }
}

fn is_dns1123_label(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= DNS1123_LABEL_MAX
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && s.bytes().next().map_or(false, |b| b.is_ascii_alphanumeric())
        && s.bytes().last().map_or(false, |b| b.is_ascii_alphanumeric())
}

fn is_dns1123_subdomain(s: &str) -> bool {
    !s.is_empty() && s.len() <= DNS1123_SUBDOMAIN_MAX && s.split('.').all(is_dns1123_label)
}

fn is_name_part(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= QUALIFIED_NAME_MAX
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
        && s.bytes().next().map_or(false, |b| b.is_ascii_alphanumeric())
        && s.bytes().last().map_or(false, |b| b.is_ascii_alphanumeric())
}

/// Qualified name: `name` or `dns-subdomain-prefix/name`.
fn is_qualified_name(s: &str) -> bool {
    match s.split_once('/') {
        Some((prefix, name)) => is_dns1123_subdomain(prefix) && is_name_part(name),
        None => is_name_part(s),
    }
}

fn is_label_value(s: &str) -> bool {
    s.is_empty() || (s.len() <= LABEL_VALUE_MAX && is_name_part(s))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn meta(namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_metadata() {
        assert!(validate_metadata(&meta("chaos-testing", "network-delay.v2")).is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(validate_metadata(&meta("chaos", "Bad_Name")).is_err());
        assert!(validate_metadata(&meta("Upper", "ok")).is_err());
        assert!(validate_metadata(&meta("chaos", "-leading")).is_err());
        assert!(validate_metadata(&meta("chaos", &"x".repeat(254))).is_err());
    }

    #[test]
    fn test_label_syntax() {
        let mut labels = BTreeMap::new();
        labels.insert("app.kubernetes.io/name".to_string(), "web".to_string());
        let mut metadata = meta("chaos", "ok");
        metadata.labels = Some(labels.clone());
        assert!(validate_metadata(&metadata).is_ok());

        labels.insert("bad key".to_string(), "web".to_string());
        metadata.labels = Some(labels);
        assert!(validate_metadata(&metadata).is_err());
    }
}

//! Declarative schema descriptions consumed by one generic validator.
//!
//! Each resource kind contributes a [`Schema`] tree describing its `spec`;
//! validation walks the caller's JSON document against it and reports every
//! mismatch with its dotted path.

use serde_json::Value;

use crate::error::Error;

/// Tagged variant tree mirroring the OpenAPI shape of a resource spec.
#[derive(Clone, Debug)]
pub enum Schema {
    String,
    Integer,
    Boolean,
    /// Homogeneous array of the inner schema.
    List(Box<Schema>),
    /// String-keyed map of the inner schema.
    Map(Box<Schema>),
    /// Fixed set of named fields; unknown keys are rejected.
    Object(Vec<Field>),
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: &'static str,
    pub required: bool,
    pub schema: Schema,
}

impl Field {
    pub fn required(name: &'static str, schema: Schema) -> Self {
        Field {
            name,
            required: true,
            schema,
        }
    }

    pub fn optional(name: &'static str, schema: Schema) -> Self {
        Field {
            name,
            required: false,
            schema,
        }
    }
}

impl Schema {
    /// Validate `value` against this schema, rooted at `root` for error paths.
    pub fn validate(&self, value: &Value, root: &str) -> Result<(), Error> {
        let mut errors = Vec::new();
        self.check(value, root, &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Configuration(errors.join("; ")))
        }
    }

    fn check(&self, value: &Value, path: &str, errors: &mut Vec<String>) {
        match self {
            Schema::String => {
                if !value.is_string() {
                    errors.push(format!("{path}: expected a string"));
                }
            }
            Schema::Integer => {
                if !value.is_i64() && !value.is_u64() {
                    errors.push(format!("{path}: expected an integer"));
                }
            }
            Schema::Boolean => {
                if !value.is_boolean() {
                    errors.push(format!("{path}: expected a boolean"));
                }
            }
            Schema::List(inner) => match value.as_array() {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        inner.check(item, &format!("{path}[{i}]"), errors);
                    }
                }
                None => errors.push(format!("{path}: expected a list")),
            },
            Schema::Map(inner) => match value.as_object() {
                Some(entries) => {
                    for (key, entry) in entries {
                        inner.check(entry, &format!("{path}.{key}"), errors);
                    }
                }
                None => errors.push(format!("{path}: expected a map")),
            },
            Schema::Object(fields) => match value.as_object() {
                Some(entries) => {
                    for field in fields {
                        match entries.get(field.name) {
                            // Explicit null counts as absent, like the API server.
                            Some(Value::Null) | None => {
                                if field.required {
                                    errors.push(format!(
                                        "{path}.{}: required field is missing",
                                        field.name
                                    ));
                                }
                            }
                            Some(entry) => {
                                field
                                    .schema
                                    .check(entry, &format!("{path}.{}", field.name), errors);
                            }
                        }
                    }
                    for key in entries.keys() {
                        if !fields.iter().any(|f| f.name == key) {
                            errors.push(format!("{path}.{key}: unknown field"));
                        }
                    }
                }
                None => errors.push(format!("{path}: expected an object")),
            },
        }
    }
}

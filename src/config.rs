use serde::Deserialize;

use crate::store::FieldValidation;

fn default_field_manager() -> String {
    "chaosctl.chaos-mesh.org".to_string()
}

/// Provider-wide defaults, resolved per call against any per-resource
/// overrides. Passed explicitly to the controller constructor; there is no
/// ambient global state.
#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    /// Field manager attributed as owner of applied fields
    #[serde(default = "default_field_manager")]
    pub field_manager: String,
    /// Override fields owned by other managers by default
    #[serde(default)]
    pub force_conflicts: bool,
    /// Server-side validation directive for apply calls
    #[serde(default)]
    pub field_validation: FieldValidation,
    /// Run without a cluster connection; every store operation fails fast
    #[serde(default)]
    pub offline: bool,
}

impl Config {
    pub fn try_from_env() -> Result<Self, envy::Error> {
        envy::prefixed("CONF_").from_env()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            field_manager: default_field_manager(),
            force_conflicts: false,
            field_validation: FieldValidation::default(),
            offline: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.field_manager, "chaosctl.chaos-mesh.org");
        assert!(!config.force_conflicts);
        assert_eq!(config.field_validation, FieldValidation::Strict);
        assert!(!config.offline);
    }
}

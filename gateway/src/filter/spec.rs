use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Filter-specific parameters. Opaque to the chain; each filter parses its own.
pub type FilterParams = serde_json::Map<String, serde_json::Value>;

/// One entry of the configured filter list.
///
/// An external spec always carries a non-empty module path; deserialization
/// rejects anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFilterSpec", into = "RawFilterSpec")]
pub struct FilterSpec {
    name: String,
    external_module_path: Option<PathBuf>,
    parameters: FilterParams,
}

impl FilterSpec {
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_module_path: None,
            parameters: FilterParams::new(),
        }
    }

    pub fn external(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            external_module_path: Some(path.into()),
            parameters: FilterParams::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: FilterParams) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_external(&self) -> bool {
        self.external_module_path.is_some()
    }

    pub fn external_module_path(&self) -> Option<&Path> {
        self.external_module_path.as_deref()
    }

    pub fn parameters(&self) -> &FilterParams {
        &self.parameters
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFilterSpec {
    name: String,
    #[serde(default)]
    external: bool,
    #[serde(default, alias = "external_module_path", skip_serializing_if = "Option::is_none")]
    external_module_path: Option<PathBuf>,
    #[serde(default)]
    parameters: FilterParams,
}

impl TryFrom<RawFilterSpec> for FilterSpec {
    type Error = String;

    fn try_from(raw: RawFilterSpec) -> Result<Self, Self::Error> {
        if raw.name.trim().is_empty() {
            return Err("filter name must not be empty".to_string());
        }
        let external_module_path = if raw.external {
            match raw.external_module_path {
                Some(path) if !path.as_os_str().is_empty() => Some(path),
                _ => {
                    return Err(format!(
                        "external filter `{}` requires a non-empty externalModulePath",
                        raw.name
                    ))
                }
            }
        } else {
            None
        };
        Ok(Self {
            name: raw.name,
            external_module_path,
            parameters: raw.parameters,
        })
    }
}

impl From<FilterSpec> for RawFilterSpec {
    fn from(spec: FilterSpec) -> Self {
        Self {
            name: spec.name,
            external: spec.external_module_path.is_some(),
            external_module_path: spec.external_module_path,
            parameters: spec.parameters,
        }
    }
}

//! Loading and validating the `{modules: [...]}` configuration document
//! described in spec.md §6. Mirrors the shape of the teacher's
//! `policy-server/src/settings.rs`: plain `serde` structs, `serde_yaml` for
//! parsing (which also accepts JSON), validation performed once up front.

use std::io::Read;
use std::path::Path;

use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::{DebugRawRunner, RawRunner};
use crate::runtimes::wapc::{WapcRuntime, WapcRuntimeError};
use crate::runtimes::wasi::{WasiRuntime, WasiRuntimeError};
use crate::runtimes::{EpochDeadlines, NamedExportRunner, Runtime};

/// Top level `{"modules": [...]}` configuration document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub modules: Vec<ModuleConfig>,
}

/// Dispatch kind for a module: which guest ABI it speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    #[default]
    Wasi,
    Kubewarden,
}

/// Immutable, per-module configuration. Defaulted and validated at load
/// time by [`Config::from_reader`]; never mutated afterwards.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleConfig {
    /// Defaults to the file stem of `module` when absent, see
    /// [`ModuleConfig::default_name`].
    #[serde(default)]
    pub name: String,

    /// Filesystem path to the compiled wasm bytes.
    pub module: String,

    /// Opaque settings forwarded verbatim to the guest. Never inspected by
    /// the host.
    #[serde(default)]
    pub settings: serde_json::Value,

    /// Enables transport tracing (`DebugRawRunner`) for this module.
    #[serde(default)]
    pub debug: bool,

    /// Which guest ABI this module speaks.
    #[serde(rename = "type", default)]
    pub module_type: ModuleType,

    /// Admission-only: whether this module mutates (vs. validates).
    #[serde(default)]
    pub mutating: bool,

    /// Admission-only: the resource/operation selector this module applies
    /// to.
    #[serde(default)]
    pub rules: Vec<RuleWithOperations>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("module {index}: 'module' path must not be empty")]
    EmptyModulePath { index: usize },

    #[error("module {index}: 'settings' must be JSON-serialisable: {source}")]
    InvalidSettings {
        index: usize,
        source: serde_json::Error,
    },
}

impl ModuleConfig {
    fn default_name(module_path: &str) -> String {
        Path::new(module_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(module_path)
            .to_string()
    }

    fn apply_defaults(&mut self) {
        if self.name.is_empty() {
            self.name = Self::default_name(&self.module);
        }
    }

    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.module.is_empty() {
            return Err(ConfigError::EmptyModulePath { index });
        }
        // settings is already a serde_json::Value, so serialisability is
        // trivially satisfied once parsed; re-serialise to catch pathological
        // values such as non-finite floats that serde_json rejects.
        serde_json::to_vec(&self.settings)
            .map(|_| ())
            .map_err(|source| ConfigError::InvalidSettings { index, source })
    }

    pub fn module_path(&self) -> &Path {
        Path::new(&self.module)
    }

    /// Reads `self.module` from disk and compiles it into the [`Runtime`]
    /// that `self.module_type` names.
    pub fn compile(
        &self,
        engine: wasmtime::Engine,
        epoch_deadlines: Option<EpochDeadlines>,
        pool_size: usize,
    ) -> Result<Runtime, LoadError> {
        let bytes = std::fs::read(self.module_path()).map_err(|source| LoadError::Io {
            path: self.module.clone(),
            source,
        })?;
        match self.module_type {
            ModuleType::Wasi => Ok(Runtime::Wasi(WasiRuntime::compile(
                engine,
                &bytes,
                epoch_deadlines,
            )?)),
            ModuleType::Kubewarden => Ok(Runtime::Wapc(WapcRuntime::compile(
                engine,
                &bytes,
                epoch_deadlines,
                pool_size,
            )?)),
        }
    }

    /// Wraps a compiled [`Runtime`] into the [`RawRunner`] that the rest of
    /// the crate's controllers are generic over, naming `fn_name` as the
    /// guest export to invoke. Wires in [`DebugRawRunner`] when `self.debug`
    /// is set (spec.md §3).
    pub fn raw_runner(&self, runtime: Runtime, fn_name: impl Into<String>) -> Box<dyn RawRunner> {
        let named = NamedExportRunner::new(runtime, fn_name);
        if self.debug {
            Box::new(DebugRawRunner::new(named, self.name.clone()))
        } else {
            Box::new(named)
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read module '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot compile WASI module: {0}")]
    Wasi(#[from] WasiRuntimeError),

    #[error("cannot compile waPC module: {0}")]
    Wapc(#[from] WapcRuntimeError),
}

impl Config {
    /// Parse and validate a configuration document (YAML or JSON — both are
    /// accepted by `serde_yaml`). Missing `name` is defaulted to the
    /// `module`'s file stem; missing `type` defaults to
    /// [`ModuleType::Wasi`]. Fails the whole load if any module's `module`
    /// path is empty or `settings` cannot round-trip through JSON.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_reader(reader)?;
        for (index, module) in config.modules.iter_mut().enumerate() {
            module.apply_defaults();
            module.validate(index)?;
        }
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        Self::from_reader(contents.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_name_from_module_basename() {
        let yaml = r#"
modules:
  - module: /etc/policies/test_authn.wasm
"#;
        let config = Config::from_str(yaml).expect("should parse");
        assert_eq!(config.modules.len(), 1);
        assert_eq!(config.modules[0].name, "test_authn");
        assert_eq!(config.modules[0].module_type, ModuleType::Wasi);
    }

    #[test]
    fn explicit_name_and_type_are_preserved() {
        let yaml = r#"
modules:
  - name: safe-annotations
    module: /etc/policies/safe-annotations.wasm
    type: kubewarden
    settings:
      denied_annotations: ["invalid-annotation"]
"#;
        let config = Config::from_str(yaml).expect("should parse");
        let module = &config.modules[0];
        assert_eq!(module.name, "safe-annotations");
        assert_eq!(module.module_type, ModuleType::Kubewarden);
        assert_eq!(
            module.settings["denied_annotations"][0],
            serde_json::json!("invalid-annotation")
        );
    }

    #[test]
    fn rejects_empty_module_path() {
        let yaml = r#"
modules:
  - module: ""
"#;
        let err = Config::from_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyModulePath { index: 0 }));
    }

    #[test]
    fn compile_dispatches_on_module_type() {
        let path = std::env::temp_dir().join(format!(
            "wasm_policy_core_config_test_{}.wasm",
            std::process::id()
        ));
        std::fs::write(&path, br#"(module)"#).expect("write temp wasm file");

        let module = ModuleConfig {
            name: "test".to_string(),
            module: path.to_string_lossy().to_string(),
            settings: serde_json::json!({}),
            debug: false,
            module_type: ModuleType::Wasi,
            mutating: false,
            rules: vec![],
        };
        let runtime = module
            .compile(wasmtime::Engine::default(), None, 1)
            .expect("compiles");
        assert!(matches!(runtime, Runtime::Wasi(_)));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn admission_module_carries_rules_and_mutating_flag() {
        let yaml = r#"
modules:
  - module: /etc/policies/test_admission_mut.wasm
    mutating: true
    rules:
      - operations: ["CREATE"]
        apiGroups: [""]
        apiVersions: ["v1"]
        resources: ["pods"]
"#;
        let config = Config::from_str(yaml).expect("should parse");
        let module = &config.modules[0];
        assert!(module.mutating);
        assert_eq!(module.rules.len(), 1);
        assert_eq!(
            module.rules[0].operations.as_deref(),
            Some(["CREATE".to_string()].as_slice())
        );
    }
}

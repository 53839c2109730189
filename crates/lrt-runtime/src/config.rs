//! Compilation options described in TOML.
//!
//! # TOML Format
//! ```toml
//! accelerators = ["cpu", "gpu"]
//!
//! [cpu]
//! num_threads = 4
//!
//! [gpu]
//! backend = "opencl"
//! precision = "fp16"
//! priority = "high"
//! fully_delegated = true
//!
//! [runtime]
//! profiling = true
//! error_reporter = "buffer"
//! ```
//!
//! Absent sections create no option block; absent keys leave the engine
//! default in place.

use std::path::Path;

use lrt_engine::{ErrorReporterMode, GpuBackend, GpuPriority, HwAccelerators, Precision};
use serde::{Deserialize, Serialize};

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::opaque::{CpuOptions, GpuOptions, RuntimeOptions};
use crate::options::OptionSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    Cpu,
    Gpu,
    Npu,
}

impl Accelerator {
    pub fn mask(&self) -> HwAccelerators {
        match self {
            Accelerator::Cpu => HwAccelerators::CPU,
            Accelerator::Gpu => HwAccelerators::GPU,
            Accelerator::Npu => HwAccelerators::NPU,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CpuConfig {
    /// -1 keeps the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GpuConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<GpuBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<Precision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<GpuPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_tensors: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialization_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_cache_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fully_delegated: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiling: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reporter: Option<ErrorReporterMode>,
}

/// Accelerator selection plus per-delegate settings for one compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompileConfig {
    #[serde(default)]
    pub accelerators: Vec<Accelerator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeConfig>,
}

impl CompileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("TOML serialise error: {e}")))
    }

    /// Union of the listed accelerators; empty when none are listed.
    pub fn accelerator_mask(&self) -> HwAccelerators {
        self.accelerators
            .iter()
            .fold(HwAccelerators::NONE, |mask, a| mask | a.mask())
    }

    /// Create an option set carrying this configuration. Each configured
    /// block is attached to the set, which then owns it. On failure the
    /// set is destroyed before the error is returned.
    pub fn build_options<'env>(&self, env: &'env Environment) -> Result<OptionSet<'env>> {
        let mut options = OptionSet::new(env)?;
        if let Err(e) = self.populate(env, &mut options) {
            options.destroy();
            return Err(e);
        }
        tracing::debug!(
            id = %options.id(),
            accelerators = %options.hardware_accelerators(),
            blocks = options.attached().len(),
            "options built from config"
        );
        Ok(options)
    }

    fn populate<'env>(&self, env: &'env Environment, options: &mut OptionSet<'env>) -> Result<()> {
        options.set_hardware_accelerators(self.accelerator_mask())?;

        if let Some(cpu) = &self.cpu {
            let mut block = CpuOptions::new(env)?;
            if let Some(threads) = cpu.num_threads {
                block.set_num_threads(threads)?;
            }
            options.add_opaque(&mut block)?;
        }

        if let Some(gpu) = &self.gpu {
            let mut block = GpuOptions::new(env)?;
            if let Some(backend) = gpu.backend {
                block.set_backend(backend)?;
            }
            if let Some(precision) = gpu.precision {
                block.set_precision(precision)?;
            }
            if let Some(priority) = gpu.priority {
                block.set_priority(priority)?;
            }
            if let Some(external) = gpu.external_tensors {
                block.set_external_tensors(external)?;
            }
            if let Some(dir) = &gpu.serialization_dir {
                block.set_serialization_dir(dir.as_str())?;
            }
            if let Some(key) = &gpu.model_cache_key {
                block.set_model_cache_key(key.as_str())?;
            }
            if let Some(fully) = gpu.fully_delegated {
                block.set_fully_delegated(fully)?;
            }
            options.add_opaque(&mut block)?;
        }

        if let Some(runtime) = &self.runtime {
            let mut block = RuntimeOptions::new(env)?;
            if let Some(profiling) = runtime.profiling {
                block.set_profiling(profiling)?;
            }
            if let Some(mode) = runtime.error_reporter {
                block.set_error_reporter(mode)?;
            }
            options.add_opaque(&mut block)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrt_engine::{HostEngine, ResourceKind, Status};
    use std::io::Write;
    use std::sync::Arc;

    const FULL: &str = r#"
accelerators = ["cpu", "gpu"]

[cpu]
num_threads = 4

[gpu]
backend = "opencl"
precision = "fp16"
priority = "high"
external_tensors = false
serialization_dir = "/data/cache"
model_cache_key = "tts-v1"
fully_delegated = true

[runtime]
profiling = true
error_reporter = "buffer"
"#;

    #[test]
    fn test_from_toml() {
        let c = CompileConfig::from_toml(FULL).unwrap();
        assert_eq!(c.accelerators, vec![Accelerator::Cpu, Accelerator::Gpu]);
        assert_eq!(c.accelerator_mask(), HwAccelerators::CPU | HwAccelerators::GPU);
        assert_eq!(c.cpu.as_ref().unwrap().num_threads, Some(4));
        let gpu = c.gpu.as_ref().unwrap();
        assert_eq!(gpu.backend, Some(GpuBackend::OpenCl));
        assert_eq!(gpu.precision, Some(Precision::Fp16));
        assert_eq!(gpu.priority, Some(GpuPriority::High));
        assert_eq!(gpu.model_cache_key.as_deref(), Some("tts-v1"));
        let runtime = c.runtime.as_ref().unwrap();
        assert_eq!(runtime.error_reporter, Some(ErrorReporterMode::Buffer));
    }

    #[test]
    fn test_toml_roundtrip() {
        let c = CompileConfig::from_toml(FULL).unwrap();
        let text = c.to_toml().unwrap();
        assert_eq!(CompileConfig::from_toml(&text).unwrap(), c);
    }

    #[test]
    fn test_empty_config() {
        let c = CompileConfig::from_toml("").unwrap();
        assert_eq!(c, CompileConfig::default());
        assert!(c.accelerator_mask().is_empty());
    }

    #[test]
    fn test_rejects_unknown_values() {
        let err = CompileConfig::from_toml(r#"accelerators = ["tpu"]"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let err = CompileConfig::from_toml("[cpu]\nthreads = 2\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"accelerators = [\"npu\"]\n").unwrap();
        let c = CompileConfig::from_file(file.path()).unwrap();
        assert_eq!(c.accelerator_mask(), HwAccelerators::NPU);

        let err = CompileConfig::from_file("/nonexistent/compile.toml").unwrap_err();
        assert_eq!(err.status(), Status::ErrorFileIO);
    }

    #[test]
    fn test_build_options_attaches_configured_blocks() {
        let engine = Arc::new(HostEngine::new());
        let mut env = Environment::new(engine.clone()).unwrap();
        {
            let c = CompileConfig::from_toml(FULL).unwrap();
            let mut options = c.build_options(&env).unwrap();
            assert_eq!(options.hardware_accelerators(), c.accelerator_mask());
            assert_eq!(options.attached().len(), 3);
            options.destroy();

            let c = CompileConfig::from_toml("accelerators = [\"cpu\"]\n[runtime]\n").unwrap();
            let mut options = c.build_options(&env).unwrap();
            assert_eq!(options.attached().len(), 1);
            options.destroy();
        }
        env.destroy();
        let stats = engine.stats();
        assert_eq!(stats.created(ResourceKind::Opaque), 4);
        assert!(stats.is_clean(), "{stats:?}");
    }

    #[test]
    fn test_build_failure_destroys_set() {
        let engine = Arc::new(HostEngine::new());
        let mut env = Environment::new(engine.clone()).unwrap();
        {
            let c = CompileConfig::from_toml("[cpu]\nnum_threads = 0\n").unwrap();
            let err = c.build_options(&env).unwrap_err();
            assert_eq!(err.status(), Status::ErrorInvalidArgument);
        }
        env.destroy();
        let stats = engine.stats();
        assert_eq!(stats.live(ResourceKind::Options), 0);
        // The rejected block was never attached, so nothing releases it.
        assert_eq!(stats.live(ResourceKind::Opaque), 1);
    }
}

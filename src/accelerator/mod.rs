//! Accelerator selection
//!
//! Experiment configs name hardware as `"<kind>"` or `"<kind>:<count>"`,
//! e.g. `"cpu"`, `"gpu:2"`, `"auto"`. [`AcceleratorConfig`] parses that form,
//! renders the option map a training harness expects, and resolves a candle
//! [`Device`] for the kinds this crate can run on.

use crate::primitives::{best_device, cpu_device, gpu_device};
use crate::{GraphNetError, Result};
use candle_core::Device;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::info;

/// Hardware family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    Cpu,
    Gpu,
    Tpu,
    Ipu,
    Auto,
}

impl Accelerator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::Tpu => "tpu",
            Self::Ipu => "ipu",
            Self::Auto => "auto",
        }
    }

    /// Harness option carrying the device count; `None` for `auto`
    pub fn count_key(&self) -> Option<&'static str> {
        match self {
            Self::Cpu => Some("num_processes"),
            Self::Gpu => Some("gpus"),
            Self::Tpu => Some("tpu_cores"),
            Self::Ipu => Some("ipus"),
            Self::Auto => None,
        }
    }
}

impl FromStr for Accelerator {
    type Err = GraphNetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            "tpu" => Ok(Self::Tpu),
            "ipu" => Ok(Self::Ipu),
            "auto" => Ok(Self::Auto),
            other => Err(GraphNetError::UnsupportedAccelerator(other.to_string())),
        }
    }
}

impl std::fmt::Display for Accelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accelerator kind with a device count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AcceleratorConfig {
    pub accelerator: Accelerator,
    pub devices: usize,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            accelerator: Accelerator::Auto,
            devices: 1,
        }
    }
}

impl AcceleratorConfig {
    /// Parse `"<kind>"` or `"<kind>:<count>"`; the count defaults to 1
    pub fn parse(spec: &str) -> Result<Self> {
        let (kind, devices) = match spec.split_once(':') {
            Some((kind, count)) => {
                let devices = count.trim().parse::<usize>().map_err(|e| {
                    GraphNetError::Config(format!(
                        "invalid device count '{}' in '{}': {}",
                        count, spec, e
                    ))
                })?;
                (kind, devices)
            }
            None => (spec, 1),
        };
        Ok(Self {
            accelerator: kind.trim().parse()?,
            devices,
        })
    }

    /// Options for a training harness: `accelerator` plus the kind's count key
    pub fn trainer_options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert(
            "accelerator".to_string(),
            Value::String(self.accelerator.as_str().to_string()),
        );
        if let Some(key) = self.accelerator.count_key() {
            options.insert(key.to_string(), Value::from(self.devices));
        }
        options
    }

    /// Candle device for this accelerator.
    ///
    /// `gpu` needs the `metal` or `cuda` feature and a visible device; `auto`
    /// falls back to CPU. TPU and IPU have no candle backend.
    pub fn device(&self) -> Result<Device> {
        let device = match self.accelerator {
            Accelerator::Cpu => cpu_device(),
            Accelerator::Auto => best_device(),
            Accelerator::Gpu => gpu_device().ok_or_else(|| {
                GraphNetError::Config("no GPU backend available for accelerator 'gpu'".into())
            })?,
            Accelerator::Tpu | Accelerator::Ipu => {
                return Err(GraphNetError::UnsupportedAccelerator(
                    self.accelerator.to_string(),
                ))
            }
        };
        info!(accelerator = %self, device = ?device, "resolved accelerator");
        Ok(device)
    }
}

impl FromStr for AcceleratorConfig {
    type Err = GraphNetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for AcceleratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.accelerator, self.devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        for (spec, kind) in [
            ("cpu", Accelerator::Cpu),
            ("gpu", Accelerator::Gpu),
            ("tpu", Accelerator::Tpu),
            ("ipu", Accelerator::Ipu),
            ("auto", Accelerator::Auto),
        ] {
            let config = AcceleratorConfig::parse(spec).unwrap();
            assert_eq!(config.accelerator, kind);
            assert_eq!(config.devices, 1);
        }
    }

    #[test]
    fn test_parse_counts() {
        let config: AcceleratorConfig = "gpu:4".parse().unwrap();
        assert_eq!(config.accelerator, Accelerator::Gpu);
        assert_eq!(config.devices, 4);
        assert_eq!(config.to_string(), "gpu:4");
    }

    #[test]
    fn test_parse_errors() {
        let err = AcceleratorConfig::parse("npu").unwrap_err();
        assert!(matches!(err, GraphNetError::UnsupportedAccelerator(ref k) if k == "npu"));
        assert_eq!(err.to_string(), "Accelerator npu not recognized");

        assert!(matches!(
            AcceleratorConfig::parse("gpu:two"),
            Err(GraphNetError::Config(_))
        ));
        assert!(matches!(
            AcceleratorConfig::parse("gpu:"),
            Err(GraphNetError::Config(_))
        ));
    }

    #[test]
    fn test_trainer_options() {
        let expected = [
            ("cpu:3", Some(("num_processes", 3))),
            ("gpu:2", Some(("gpus", 2))),
            ("tpu:8", Some(("tpu_cores", 8))),
            ("ipu", Some(("ipus", 1))),
            ("auto", None),
        ];
        for (spec, count) in expected {
            let options = AcceleratorConfig::parse(spec).unwrap().trainer_options();
            let kind = spec.split(':').next().unwrap();
            assert_eq!(options["accelerator"], Value::String(kind.to_string()));
            match count {
                Some((key, n)) => {
                    assert_eq!(options.len(), 2);
                    assert_eq!(options[key], Value::from(n));
                }
                None => assert_eq!(options.len(), 1),
            }
        }
    }

    #[test]
    fn test_device_resolution() {
        let cpu = AcceleratorConfig::parse("cpu").unwrap().device().unwrap();
        assert!(matches!(cpu, Device::Cpu));
        assert!(AcceleratorConfig::parse("auto").unwrap().device().is_ok());

        for spec in ["tpu", "ipu:2"] {
            assert!(matches!(
                AcceleratorConfig::parse(spec).unwrap().device(),
                Err(GraphNetError::UnsupportedAccelerator(_))
            ));
        }
    }

    #[test]
    fn test_serde_lowercase() {
        let config: AcceleratorConfig =
            serde_json::from_str(r#"{"accelerator": "gpu", "devices": 2}"#).unwrap();
        assert_eq!(config, AcceleratorConfig::parse("gpu:2").unwrap());
    }
}

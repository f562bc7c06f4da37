//! Model configuration
//!
//! [`ModelConfig`] carries the architecture hyperparameters shared by the
//! backbone and every head. It deserializes from JSON; keys it does not know
//! are ignored, so one experiment file can feed several constructors.

use crate::layers::BlockKind;
use crate::{GraphNetError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Architectural toggles for ablation runs.
///
/// The legacy string form is a concatenation of two-letter flags:
///
/// | Flag | Effect |
/// |---|---|
/// | `rs` | remove residual connections |
/// | `in` | remove instance normalization |
///
/// so `""`, `"rs"`, `"in"`, `"rsin"` and `"inrs"` are valid and anything
/// else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Option<String>", into = "String")]
pub struct Ablation {
    /// Add each block's input to its output
    pub residuals: bool,
    /// Use the normalized block variant
    pub instance_norm: bool,
}

impl Default for Ablation {
    fn default() -> Self {
        Self {
            residuals: true,
            instance_norm: true,
        }
    }
}

impl Ablation {
    /// Nothing removed
    pub fn none() -> Self {
        Self::default()
    }

    /// Parse the legacy flag string
    pub fn parse(flags: &str) -> Result<Self> {
        let mut ablation = Self::default();
        if flags.len() % 2 != 0 {
            return Err(GraphNetError::Config(format!(
                "ablation '{}' is not a sequence of two-letter flags",
                flags
            )));
        }
        for chunk in flags.as_bytes().chunks(2) {
            match chunk {
                b"rs" => ablation.residuals = false,
                b"in" => ablation.instance_norm = false,
                _ => {
                    return Err(GraphNetError::Config(format!(
                        "unknown ablation flag '{}' in '{}'",
                        String::from_utf8_lossy(chunk),
                        flags
                    )))
                }
            }
        }
        Ok(ablation)
    }

    /// Absent ablation means nothing is removed
    pub fn from_option(flags: Option<&str>) -> Result<Self> {
        flags.map_or_else(|| Ok(Self::default()), Self::parse)
    }

    /// Block variant implied by the `in` flag
    pub fn block_kind(&self) -> BlockKind {
        BlockKind::from_instance_norm(self.instance_norm)
    }
}

impl FromStr for Ablation {
    type Err = GraphNetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<Option<String>> for Ablation {
    type Error = GraphNetError;

    fn try_from(value: Option<String>) -> Result<Self> {
        Self::from_option(value.as_deref())
    }
}

impl From<Ablation> for String {
    fn from(ablation: Ablation) -> Self {
        ablation.to_string()
    }
}

impl std::fmt::Display for Ablation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.residuals {
            write!(f, "rs")?;
        }
        if !self.instance_norm {
            write!(f, "in")?;
        }
        Ok(())
    }
}

fn default_input_embed() -> bool {
    true
}

/// Hyperparameters of a backbone and the heads built on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Feature width of incoming graph tensors
    pub original_features_num: usize,

    /// Number of stacked equivariant blocks
    pub num_blocks: usize,

    /// Channel width inside the stack
    pub in_features: usize,

    /// Channel width of the backbone output
    pub out_features: usize,

    /// Depth of the MLPs inside each block
    pub depth_of_mlp: usize,

    /// Replace the input features by an embedding of the last channel
    #[serde(default = "default_input_embed")]
    pub input_embed: bool,

    /// Removed architectural features
    #[serde(default)]
    pub ablation: Ablation,
}

impl ModelConfig {
    /// Create a config with input embedding on and nothing ablated
    pub fn new(
        original_features_num: usize,
        num_blocks: usize,
        in_features: usize,
        out_features: usize,
        depth_of_mlp: usize,
    ) -> Self {
        Self {
            original_features_num,
            num_blocks,
            in_features,
            out_features,
            depth_of_mlp,
            input_embed: true,
            ablation: Ablation::default(),
        }
    }

    /// Builder: set input embedding
    pub fn with_input_embed(mut self, input_embed: bool) -> Self {
        self.input_embed = input_embed;
        self
    }

    /// Builder: set ablation
    pub fn with_ablation(mut self, ablation: Ablation) -> Self {
        self.ablation = ablation;
        self
    }

    /// Parse from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| GraphNetError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(GraphNetError::Io)?;
        Self::from_json(&json)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| GraphNetError::Serialization(e.to_string()))
    }

    /// Reject zero widths and empty stacks
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("original_features_num", self.original_features_num),
            ("num_blocks", self.num_blocks),
            ("in_features", self.in_features),
            ("out_features", self.out_features),
            ("depth_of_mlp", self.depth_of_mlp),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(GraphNetError::Config(format!("{} must be at least 1", name)));
            }
        }
        Ok(())
    }

    /// Channel width entering the first block
    pub fn first_block_width(&self) -> usize {
        if self.input_embed {
            self.in_features
        } else {
            self.original_features_num
        }
    }
}

//! Point descriptors and the two descriptor sources they are built from.
//!
//! The variable declaration lists the engine's exchange slots in the order
//! the engine declares them (TOML, `[[variable]]` entries). The point table
//! binds externally visible ids to those slots (JSON array).

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Direction of a point relative to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Written by the controller, read by the engine.
    Input,
    /// Produced by the engine each timestep.
    Output,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// The engine's own identification of an exchanged quantity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EngineKey {
    Output {
        variable_type: String,
        variable_name: String,
    },
    Input {
        variable_name: String,
    },
}

impl EngineKey {
    pub fn output(variable_type: &str, variable_name: &str) -> Self {
        Self::Output {
            variable_type: variable_type.to_string(),
            variable_name: variable_name.to_string(),
        }
    }

    pub fn input(variable_name: &str) -> Self {
        Self::Input {
            variable_name: variable_name.to_string(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Output { .. } => Role::Output,
            Self::Input { .. } => Role::Input,
        }
    }
}

impl fmt::Display for EngineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output {
                variable_type,
                variable_name,
            } => write!(f, "output ({variable_type}, {variable_name})"),
            Self::Input { variable_name } => write!(f, "input ({variable_name})"),
        }
    }
}

/// One simulation-exposed quantity with its resolved wire position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointDescriptor {
    /// Stable identifier known to callers.
    pub external_id: String,
    pub role: Role,
    pub engine_key: EngineKey,
    /// Zero-based offset into the vector exchanged for `role`.
    pub positional_index: usize,
}

/// Failures while loading or resolving point descriptors.
#[derive(Debug, Error)]
pub enum PointError {
    #[error("cannot read `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid variable declaration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid point table: {0}")]
    Json(#[from] serde_json::Error),
    #[error("variable #{index} (`{name}`): {message}")]
    InvalidSlot {
        index: usize,
        name: String,
        message: String,
    },
    #[error("point `{id}` binds neither an input nor an output")]
    EmptyBinding { id: String },
    #[error("point `{id}` maps to {key}, which matches no declared variable")]
    UnresolvedMapping { id: String, key: EngineKey },
    #[error("{key} is declared more than once")]
    DuplicateSlot { key: EngineKey },
    #[error("point `{id}` is bound more than once as {role}")]
    DuplicatePoint { id: String, role: Role },
    #[error("points `{first}` and `{second}` both bind {key}")]
    SharedSlot {
        first: String,
        second: String,
        key: EngineKey,
    },
    #[error("unknown {role} point `{id}`")]
    NotFound { id: String, role: Role },
}

/// One declared exchange slot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableSlot {
    pub role: Role,
    /// Output variable type (e.g. `Zone Mean Air Temperature`); outputs only.
    #[serde(default, rename = "type")]
    pub variable_type: Option<String>,
    /// Variable name (key value for outputs, schedule/actuator for inputs).
    pub name: String,
}

impl VariableSlot {
    /// Engine key of the slot; `index` is only used for error reporting.
    ///
    /// # Errors
    ///
    /// Returns [`PointError::InvalidSlot`] for an output without a type or an
    /// input with one.
    pub fn key(&self, index: usize) -> Result<EngineKey, PointError> {
        let invalid = |message: &str| PointError::InvalidSlot {
            index,
            name: self.name.clone(),
            message: message.to_string(),
        };
        match (self.role, &self.variable_type) {
            (Role::Output, Some(ty)) => Ok(EngineKey::output(ty, &self.name)),
            (Role::Output, None) => Err(invalid("output variables require a `type`")),
            (Role::Input, None) => Ok(EngineKey::input(&self.name)),
            (Role::Input, Some(_)) => Err(invalid("input variables take no `type`")),
        }
    }
}

/// Ordered slot declaration, in engine-declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableDeclaration {
    #[serde(default, rename = "variable")]
    pub variables: Vec<VariableSlot>,
}

impl VariableDeclaration {
    /// Parses a declaration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `PointError` if the file cannot be read or parsed.
    pub fn from_toml_file(path: &Path) -> Result<Self, PointError> {
        let content = fs::read_to_string(path).map_err(|source| PointError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a declaration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`PointError::Toml`] if the TOML is invalid or has unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, PointError> {
        Ok(toml::from_str(s)?)
    }

    /// Appends an output slot.
    pub fn with_output(mut self, variable_type: &str, name: &str) -> Self {
        self.variables.push(VariableSlot {
            role: Role::Output,
            variable_type: Some(variable_type.to_string()),
            name: name.to_string(),
        });
        self
    }

    /// Appends an input slot.
    pub fn with_input(mut self, name: &str) -> Self {
        self.variables.push(VariableSlot {
            role: Role::Input,
            variable_type: None,
            name: name.to_string(),
        });
        self
    }
}

/// Output side of a point binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputBinding {
    #[serde(rename = "type")]
    pub variable_type: String,
    #[serde(rename = "name")]
    pub variable_name: String,
}

/// Input side of a point binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputBinding {
    #[serde(rename = "name")]
    pub variable_name: String,
    /// Companion input set to 1.0 while the controller owns the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<String>,
}

/// One external id and the engine variables it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PointBinding {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputBinding>,
}

/// External id → engine key table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointTable {
    pub points: Vec<PointBinding>,
}

impl PointTable {
    /// Parses a point table from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns a `PointError` if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> Result<Self, PointError> {
        let content = fs::read_to_string(path).map_err(|source| PointError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Parses a point table from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`PointError::Json`] if the JSON is invalid or has unknown fields.
    pub fn from_json_str(s: &str) -> Result<Self, PointError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Adds an output-only point.
    pub fn with_output(mut self, id: &str, variable_type: &str, variable_name: &str) -> Self {
        self.points.push(PointBinding {
            id: id.to_string(),
            output: Some(OutputBinding {
                variable_type: variable_type.to_string(),
                variable_name: variable_name.to_string(),
            }),
            input: None,
        });
        self
    }

    /// Adds an input-only point, optionally with an enable companion.
    pub fn with_input(mut self, id: &str, variable_name: &str, enable: Option<&str>) -> Self {
        self.points.push(PointBinding {
            id: id.to_string(),
            output: None,
            input: Some(InputBinding {
                variable_name: variable_name.to_string(),
                enable: enable.map(str::to_string),
            }),
        });
        self
    }
}

//! # Pipeline Parameters
//!
//! Participants declare the parameters they understand into a shared
//! [`ParamSchema`]; the orchestrator resolves raw values against it once and
//! hands every participant the same [`PipelineArgs`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, StageError, StageResult};

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub default: Option<String>,
    /// Participants that declared it, in declaration order
    pub owners: Vec<String>,
}

/// Parameters declared across all participants of a pipeline.
///
/// Declaring the same name twice merges the declarations: the parameter is
/// required if any declarer requires it, and the first default wins.
#[derive(Debug, Clone, Default)]
pub struct ParamSchema {
    specs: Vec<ParamSpec>,
    owner: String,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute subsequent declarations to `owner`
    pub fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = owner.into();
    }

    pub fn required(&mut self, name: &str, description: &str) -> &mut Self {
        self.declare(name, description, true, None)
    }

    pub fn optional(
        &mut self,
        name: &str,
        description: &str,
        default: impl Into<String>,
    ) -> &mut Self {
        self.declare(name, description, false, Some(default.into()))
    }

    fn declare(
        &mut self,
        name: &str,
        description: &str,
        required: bool,
        default: Option<String>,
    ) -> &mut Self {
        let owner = self.owner.clone();
        if let Some(existing) = self.specs.iter_mut().find(|spec| spec.name == name) {
            existing.required |= required;
            if existing.default.is_none() {
                existing.default = default;
            }
            if !existing.owners.contains(&owner) {
                existing.owners.push(owner);
            }
        } else {
            self.specs.push(ParamSpec {
                name: name.to_string(),
                description: description.to_string(),
                required,
                default,
                owners: vec![owner],
            });
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl fmt::Display for ParamSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for spec in &self.specs {
            let requirement = if spec.required { "required" } else { "optional" };
            write!(f, "  {} ({requirement}", spec.name)?;
            if let Some(default) = &spec.default {
                write!(f, ", default {default}")?;
            }
            writeln!(f, "): {}", spec.description)?;
        }
        Ok(())
    }
}

/// Resolved parameter values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineArgs {
    values: BTreeMap<String, String>,
}

impl PipelineArgs {
    /// Apply defaults and check required parameters.
    ///
    /// Raw values nobody declared are kept; an empty value for a required
    /// parameter counts as missing.
    pub fn resolve(
        schema: &ParamSchema,
        raw: &BTreeMap<String, String>,
    ) -> Result<Self, PipelineError> {
        let mut values = raw.clone();
        for spec in schema.iter() {
            let present = values.get(&spec.name).is_some_and(|value| !value.trim().is_empty());
            if present {
                continue;
            }
            if let Some(default) = &spec.default {
                values.insert(spec.name.clone(), default.clone());
            } else if spec.required {
                let owner = spec.owners.first().cloned().unwrap_or_default();
                return Err(PipelineError::configuration(
                    owner,
                    StageError::missing_parameter(&spec.name),
                ));
            }
        }
        Ok(Self { values })
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn required(&self, name: &str) -> StageResult<&str> {
        self.get(name)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| StageError::missing_parameter(name))
    }

    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Parse a value when present
    pub fn parse<T>(&self, name: &str) -> StageResult<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(name)
            .map(|value| {
                value.trim().parse::<T>().map_err(|e| {
                    StageError::invalid_parameter(name, value, e.to_string())
                })
            })
            .transpose()
    }

    /// yes/no style switch
    pub fn flag(&self, name: &str, default: bool) -> StageResult<bool> {
        match self.get(name).map(|value| value.trim().to_ascii_lowercase()) {
            None => Ok(default),
            Some(value) => match value.as_str() {
                "yes" | "y" | "true" | "on" | "1" => Ok(true),
                "no" | "n" | "false" | "off" | "0" => Ok(false),
                _ => Err(StageError::invalid_parameter(
                    name,
                    value,
                    "expected yes or no",
                )),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

pub const BIN_DIR: &str = "bin";

pub type PartialAssignment = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default)]
    pub default: Option<String>,
}

impl Param {
    pub fn new(name: impl Into<String>, default: Option<&str>) -> Self {
        Self {
            name: name.into(),
            default: default.map(str::to_string),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.default {
            Some(default) => write!(f, "{}={}", self.name, default),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for Param {
    type Err = RegistryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let param = match trimmed.split_once('=') {
            Some((name, default)) => Param::new(name, Some(default)),
            None => Param::new(trimmed, None),
        };
        validate_param_name(&param.name)?;
        if let Some(default) = &param.default {
            validate_value(default)?;
        }
        Ok(param)
    }
}

// A named parameter schema. The declared order of `params` is the order of
// path segments on every remote and must never change once binaries exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRegistry")]
pub struct Registry {
    name: String,
    params: Vec<Param>,
}

#[derive(Deserialize)]
struct RawRegistry {
    name: String,
    #[serde(default)]
    params: Vec<Param>,
}

impl TryFrom<RawRegistry> for Registry {
    type Error = RegistryError;

    fn try_from(raw: RawRegistry) -> Result<Self, Self::Error> {
        Registry::new(raw.name, raw.params)
    }
}

impl Registry {
    pub fn new(name: impl Into<String>, params: Vec<Param>) -> Result<Self, RegistryError> {
        let name = name.into();
        validate_registry_name(&name)?;
        let mut seen = HashSet::new();
        for param in &params {
            validate_param_name(&param.name)?;
            if let Some(default) = &param.default {
                validate_value(default)?;
            }
            if !seen.insert(param.name.as_str()) {
                return Err(RegistryError::InvalidName(format!(
                    "duplicate parameter `{}` in registry {name}",
                    param.name
                )));
            }
        }
        Ok(Self { name, params })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn resolve(&self, partial: &PartialAssignment) -> Result<Assignment, RegistryError> {
        if let Some(unknown) = partial
            .keys()
            .find(|key| !self.params.iter().any(|param| &param.name == *key))
        {
            return Err(RegistryError::UnknownParameter {
                registry: self.name.clone(),
                param: unknown.clone(),
            });
        }

        let mut values = Vec::with_capacity(self.params.len());
        for param in &self.params {
            let value = partial
                .get(&param.name)
                .or(param.default.as_ref())
                .ok_or_else(|| RegistryError::MissingParameter {
                    registry: self.name.clone(),
                    param: param.name.clone(),
                })?;
            validate_value(value)?;
            values.push((param.name.clone(), value.clone()));
        }
        Ok(Assignment(values))
    }

    pub fn path_for(&self, assignment: &Assignment) -> String {
        let mut segments = Vec::with_capacity(assignment.len() + 2);
        segments.push(self.name.clone());
        segments.extend(assignment.segments());
        segments.push(BIN_DIR.to_string());
        segments.join("/")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment(Vec<(String, String)>);

impl Assignment {
    pub fn get(&self, param: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == param)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect()
    }

    pub fn to_partial(&self) -> PartialAssignment {
        self.0.iter().cloned().collect()
    }

    pub fn from_segments(
        registry: &Registry,
        segments: &[String],
    ) -> Result<Assignment, RegistryError> {
        let mut partial = PartialAssignment::new();
        for segment in segments {
            let (name, value) = segment
                .split_once('=')
                .ok_or_else(|| RegistryError::InvalidName(segment.clone()))?;
            partial.insert(name.to_string(), value.to_string());
        }
        if partial.len() != registry.params().len() {
            return Err(RegistryError::InvalidName(format!(
                "{} does not match the schema of {}",
                segments.join("/"),
                registry.name()
            )));
        }
        registry.resolve(&partial)
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.segments().join(",");
        write!(f, "{rendered}")
    }
}

pub fn parse_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<PartialAssignment, RegistryError> {
    let mut partial = PartialAssignment::new();
    for pair in pairs {
        let pair = pair.as_ref().trim();
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| RegistryError::InvalidName(format!("expected key=value, got {pair}")))?;
        validate_param_name(name)?;
        validate_value(value)?;
        partial.insert(name.to_string(), value.to_string());
    }
    Ok(partial)
}

pub fn validate_registry_name(name: &str) -> Result<(), RegistryError> {
    validate_segment(name)?;
    if name.starts_with('.') {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn validate_param_name(name: &str) -> Result<(), RegistryError> {
    validate_segment(name)?;
    if name.contains('=') {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<(), RegistryError> {
    validate_segment(value)
}

fn validate_segment(value: &str) -> Result<(), RegistryError> {
    let is_valid = !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\'])
        && !value.chars().any(char::is_control);
    if !is_valid {
        return Err(RegistryError::InvalidName(value.to_string()));
    }
    Ok(())
}

//! Parameter schemas and constraints for operation kinds.
//!
//! Every operation kind declares its parameters as a static list of
//! [`ParamSpec`]s. The same specs drive validation (through
//! [`ParamReader`]) and the catalog listing, so the two cannot drift.

use crate::core::error::{ValidationError, ValidationResult};
use crate::core::types::ParamValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameters attached to a task descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(IndexMap<String, ParamValue>);

impl Parameters {
    /// Create an empty parameter map.
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Look up a value by name. Explicit nulls read as absent.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name).filter(|v| !v.is_none())
    }

    /// Iterate over parameter names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no parameters were given.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ParamValue)> for Parameters {
    fn from_iter<T: IntoIterator<Item = (String, ParamValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Expected shape of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Whole number; floats with no fractional part are accepted.
    Integer,
    /// Any number.
    Float,
    /// Text.
    String,
    /// `true` or `false`.
    Boolean,
    /// A fixed number of `[x, y]` points
    Points,
}

/// Default used when the parameter is omitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DefaultValue {
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// Text default.
    String(&'static str),
    /// Boolean default.
    Boolean(bool),
    /// The caller must supply the parameter
    Required,
    /// Absent means "not set"
    Unset,
}

/// Constraint a parameter value must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Constraint {
    /// No constraint
    None,
    /// Numeric value must be in range [min, max]
    Range { min: f64, max: f64 },
    /// Numeric value must be strictly greater than the bound
    GreaterThan(f64),
    /// String value must be one of these options
    OneOf(&'static [&'static str]),
    /// Exactly this many points
    PointCount(usize),
}

impl Constraint {
    /// Validate a numeric value against this constraint.
    pub fn check_number(&self, num: f64) -> Result<(), String> {
        match self {
            Constraint::Range { min, max } => {
                if num < *min || num > *max {
                    return Err(format!("Value {} is out of range [{}, {}]", num, min, max));
                }
            }
            Constraint::GreaterThan(bound) => {
                if num <= *bound {
                    return Err(format!("Value {} must be greater than {}", num, bound));
                }
            }
            _ => {}
        }
        if !num.is_finite() {
            return Err(format!("Value {} is not finite", num));
        }
        Ok(())
    }

    /// Validate a string value against this constraint.
    pub fn check_string(&self, s: &str) -> Result<(), String> {
        if let Constraint::OneOf(options) = self {
            let matched = options.iter().any(|o| o.eq_ignore_ascii_case(s));
            if !matched {
                return Err(format!("'{}' is not one of: {}", s, options.join(", ")));
            }
        }
        Ok(())
    }

    /// Get a human-readable description of this constraint.
    pub fn description(&self) -> String {
        match self {
            Constraint::None => String::new(),
            Constraint::Range { min, max } => format!("{} to {}", min, max),
            Constraint::GreaterThan(bound) => format!("> {}", bound),
            Constraint::OneOf(options) => format!("one of [{}]", options.join(", ")),
            Constraint::PointCount(n) => format!("{} points", n),
        }
    }
}

/// Declaration of one parameter of an operation kind.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ParamSpec {
    /// Parameter name as it appears in the request
    pub name: &'static str,
    /// Expected value shape
    pub kind: ParamKind,
    /// Default when omitted
    pub default: DefaultValue,
    /// Value constraint
    pub constraint: Constraint,
    /// Description for listings
    pub description: &'static str,
}

impl ParamSpec {
    /// Integer parameter with a default.
    pub const fn integer(
        name: &'static str,
        default: i64,
        constraint: Constraint,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind: ParamKind::Integer,
            default: DefaultValue::Integer(default),
            constraint,
            description,
        }
    }

    /// Float parameter with a default.
    pub const fn float(
        name: &'static str,
        default: f64,
        constraint: Constraint,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind: ParamKind::Float,
            default: DefaultValue::Float(default),
            constraint,
            description,
        }
    }

    /// String parameter with a default.
    pub const fn string(
        name: &'static str,
        default: &'static str,
        constraint: Constraint,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind: ParamKind::String,
            default: DefaultValue::String(default),
            constraint,
            description,
        }
    }

    /// Boolean parameter with a default.
    pub const fn boolean(name: &'static str, default: bool, description: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Boolean,
            default: DefaultValue::Boolean(default),
            constraint: Constraint::None,
            description,
        }
    }

    /// Required parameter of any kind.
    pub const fn required(
        name: &'static str,
        kind: ParamKind,
        constraint: Constraint,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            default: DefaultValue::Required,
            constraint,
            description,
        }
    }

    /// Optional parameter with no default.
    pub const fn optional(
        name: &'static str,
        kind: ParamKind,
        constraint: Constraint,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            default: DefaultValue::Unset,
            constraint,
            description,
        }
    }
}

impl fmt::Display for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:?}]", self.name, self.kind)?;
        match self.default {
            DefaultValue::Required => write!(f, " (required)")?,
            DefaultValue::Unset => write!(f, " (optional)")?,
            DefaultValue::Integer(i) => write!(f, " = {}", i)?,
            DefaultValue::Float(v) => write!(f, " = {}", v)?,
            DefaultValue::String(s) => write!(f, " = \"{}\"", s)?,
            DefaultValue::Boolean(b) => write!(f, " = {}", b)?,
        }
        let constraint = self.constraint.description();
        if !constraint.is_empty() {
            write!(f, " {}", constraint)?;
        }
        Ok(())
    }
}

/// Typed, constraint-checked access to one task's parameters.
pub struct ParamReader<'a> {
    task_id: &'a str,
    params: &'a Parameters,
}

impl<'a> ParamReader<'a> {
    /// Create a reader for the given task.
    pub fn new(task_id: &'a str, params: &'a Parameters) -> Self {
        Self { task_id, params }
    }

    fn invalid(&self, spec: &ParamSpec, error: impl Into<String>) -> ValidationError {
        ValidationError::InvalidParameter {
            task_id: self.task_id.to_string(),
            parameter: spec.name.to_string(),
            error: error.into(),
        }
    }

    fn missing(&self, spec: &ParamSpec) -> ValidationError {
        ValidationError::MissingParameter {
            task_id: self.task_id.to_string(),
            parameter: spec.name.to_string(),
        }
    }

    fn number(&self, spec: &ParamSpec) -> ValidationResult<Option<f64>> {
        let Some(value) = self.params.get(spec.name) else {
            return match spec.default {
                DefaultValue::Float(v) => Ok(Some(v)),
                DefaultValue::Integer(i) => Ok(Some(i as f64)),
                DefaultValue::Required => Err(self.missing(spec)),
                _ => Ok(None),
            };
        };
        let num = value
            .as_float()
            .ok_or_else(|| self.invalid(spec, format!("expected a number, got {}", value.type_name())))?;
        spec.constraint
            .check_number(num)
            .map_err(|e| self.invalid(spec, e))?;
        Ok(Some(num))
    }

    /// Read a float parameter, applying its default.
    pub fn float(&self, spec: &ParamSpec) -> ValidationResult<f64> {
        self.number(spec)?.ok_or_else(|| self.missing(spec))
    }

    /// Read a float parameter that may be absent.
    pub fn opt_float(&self, spec: &ParamSpec) -> ValidationResult<Option<f64>> {
        self.number(spec)
    }

    /// Read an integer parameter, applying its default.
    pub fn integer(&self, spec: &ParamSpec) -> ValidationResult<i64> {
        let num = self.float(spec)?;
        if num.fract() != 0.0 {
            return Err(self.invalid(spec, format!("expected an integer, got {}", num)));
        }
        Ok(num as i64)
    }

    /// Read an integer parameter that may be absent.
    pub fn opt_integer(&self, spec: &ParamSpec) -> ValidationResult<Option<i64>> {
        match self.number(spec)? {
            Some(num) if num.fract() != 0.0 => {
                Err(self.invalid(spec, format!("expected an integer, got {}", num)))
            }
            other => Ok(other.map(|n| n as i64)),
        }
    }

    /// Read a string parameter, applying its default. The result is
    /// lower-cased so option matching is case-insensitive.
    pub fn string(&self, spec: &ParamSpec) -> ValidationResult<String> {
        let raw = match self.params.get(spec.name) {
            Some(value) => value
                .as_string()
                .ok_or_else(|| self.invalid(spec, format!("expected a string, got {}", value.type_name())))?
                .to_string(),
            None => match spec.default {
                DefaultValue::String(s) => s.to_string(),
                _ => return Err(self.missing(spec)),
            },
        };
        spec.constraint
            .check_string(&raw)
            .map_err(|e| self.invalid(spec, e))?;
        Ok(raw.to_ascii_lowercase())
    }

    /// Read a boolean parameter, applying its default.
    pub fn boolean(&self, spec: &ParamSpec) -> ValidationResult<bool> {
        match self.params.get(spec.name) {
            Some(value) => value
                .as_bool()
                .ok_or_else(|| self.invalid(spec, format!("expected a boolean, got {}", value.type_name()))),
            None => match spec.default {
                DefaultValue::Boolean(b) => Ok(b),
                _ => Err(self.missing(spec)),
            },
        }
    }

    /// Read a list of `[x, y]` points.
    pub fn points(&self, spec: &ParamSpec) -> ValidationResult<Vec<(f32, f32)>> {
        let value = self.params.get(spec.name).ok_or_else(|| self.missing(spec))?;
        let items = value
            .as_array()
            .ok_or_else(|| self.invalid(spec, format!("expected a list of points, got {}", value.type_name())))?;
        if let Constraint::PointCount(n) = spec.constraint {
            if items.len() != n {
                return Err(self.invalid(spec, format!("expected {} points, got {}", n, items.len())));
            }
        }
        items
            .iter()
            .map(|item| {
                item.as_point()
                    .map(|(x, y)| (x as f32, y as f32))
                    .ok_or_else(|| self.invalid(spec, "each point must be [x, y]"))
            })
            .collect()
    }

    /// Reject parameters not declared by the operation kind.
    pub fn reject_unknown(&self, specs: &[ParamSpec]) -> ValidationResult<()> {
        for name in self.params.names() {
            if !specs.iter().any(|s| s.name == name) {
                return Err(ValidationError::InvalidParameter {
                    task_id: self.task_id.to_string(),
                    parameter: name.to_string(),
                    error: "unknown parameter".to_string(),
                });
            }
        }
        Ok(())
    }
}

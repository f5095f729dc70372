use crate::error::AppError;
use serde::{Deserialize, Serialize};

/// How a parameter contributes to the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterKind {
    /// A switch: present or absent.
    Flag { enabled: bool },
    /// A flag followed by a user-entered value.
    TextValue { value: String },
}

/// One tool parameter as edited in the form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Empty for positional parameters.
    pub flag: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub required: bool,
}

impl Parameter {
    pub fn flag(name: &str, flag: &str, enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            flag: flag.to_string(),
            kind: ParameterKind::Flag { enabled },
            required: false,
        }
    }

    pub fn text(name: &str, flag: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            flag: flag.to_string(),
            kind: ParameterKind::TextValue { value: value.to_string() },
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Command tokens this parameter contributes; empty when unset.
    pub fn tokens(&self) -> Vec<String> {
        match &self.kind {
            ParameterKind::Flag { enabled: true } if !self.flag.is_empty() => vec![self.flag.clone()],
            ParameterKind::Flag { .. } => Vec::new(),
            ParameterKind::TextValue { value } => {
                let value = value.trim();
                if value.is_empty() {
                    Vec::new()
                } else if self.flag.is_empty() {
                    vec![value.to_string()]
                } else {
                    vec![self.flag.clone(), value.to_string()]
                }
            }
        }
    }

    fn is_missing(&self) -> bool {
        match &self.kind {
            ParameterKind::Flag { .. } => false,
            ParameterKind::TextValue { value } => self.required && value.trim().is_empty(),
        }
    }
}

/// Flattens parameters into command tokens in form order.
pub fn serialize_parameters(params: &[Parameter]) -> Vec<String> {
    params.iter().flat_map(Parameter::tokens).collect()
}

/// Rejects the form when any required value is blank.
pub fn validate_parameters(params: &[Parameter]) -> Result<(), AppError> {
    let missing: Vec<&str> = params
        .iter()
        .filter(|p| p.is_missing())
        .map(|p| p.name.as_str())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::InvalidParameter(format!("必填参数为空: {}", missing.join(", "))))
    }
}

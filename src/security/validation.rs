use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Required(String),
    TooLong { field: String, max: usize, actual: usize },
    InvalidValue { field: String, message: String },
}

impl ValidationError {
    pub fn field(&self) -> &str {
        match self {
            Self::Required(field) => field,
            Self::TooLong { field, .. } => field,
            Self::InvalidValue { field, .. } => field,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Required(field) => write!(f, "The {} field is required.", field),
            Self::TooLong { field, max, .. } => {
                write!(f, "The {} field must not be greater than {} characters.", field, max)
            }
            Self::InvalidValue { field, message } => {
                write!(f, "The selected {} is invalid: {}", field, message)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Every violated rule, grouped by field in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.fields
            .entry(error.field().to_string())
            .or_default()
            .push(error.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn field_errors(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.fields {
            self.fields.entry(field).or_default().extend(messages);
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<&str> = self
            .fields
            .values()
            .flat_map(|m| m.iter().map(String::as_str))
            .collect();
        write!(f, "{}", messages.join(" "))
    }
}

pub fn validate_required<'a>(
    value: Option<&'a str>,
    field_name: &str,
) -> Result<&'a str, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::Required(field_name.to_string())),
    }
}

/// Length is measured in characters, not bytes.
pub fn validate_max_length(
    value: &str,
    field_name: &str,
    max: usize,
) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len > max {
        return Err(ValidationError::TooLong {
            field: field_name.to_string(),
            max,
            actual: len,
        });
    }
    Ok(())
}

pub fn validate_one_of(
    value: &str,
    field_name: &str,
    allowed: &[&str],
) -> Result<(), ValidationError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidValue {
            field: field_name.to_string(),
            message: format!("must be one of {:?}", allowed),
        })
    }
}

pub struct Validator {
    errors: ValidationErrors,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            errors: ValidationErrors::new(),
        }
    }

    /// Present, non-blank and at most `max` characters.
    pub fn required_text(mut self, value: Option<&str>, field_name: &str, max: usize) -> Self {
        match validate_required(value, field_name) {
            Ok(v) => {
                if let Err(e) = validate_max_length(v, field_name, max) {
                    self.errors.add_error(e);
                }
            }
            Err(e) => self.errors.add_error(e),
        }
        self
    }

    /// Checked only when supplied and non-blank. A blank value counts as not supplied.
    pub fn optional_text(self, value: Option<&str>, field_name: &str, max: usize) -> Self {
        match value {
            Some(v) if !v.trim().is_empty() => self.required_text(value, field_name, max),
            _ => self,
        }
    }

    pub fn optional_one_of(
        mut self,
        value: Option<&str>,
        field_name: &str,
        allowed: &[&str],
    ) -> Self {
        if let Some(v) = value {
            if let Err(e) = validate_one_of(v, field_name, allowed) {
                self.errors.add_error(e);
            }
        }
        self
    }

    pub fn validate(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

//! Declarative input schemas and argument validation.
//!
//! A schema is an ordered list of named parameters. Validation checks every
//! parameter and reports one error per failing field instead of stopping at the
//! first problem. Defaults are filled in for absent optional parameters.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// JSON type a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
            }
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// One named parameter of an input schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub kind: ParamType,
    pub description: Option<String>,
    pub required: bool,
    pub enum_values: Option<Vec<Value>>,
    pub default: Option<Value>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            required: false,
            enum_values: None,
            default: None,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Number)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Integer)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Boolean)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Array)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Object)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Inclusive numeric bounds.
    pub fn range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn min(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn max(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    /// Inclusive length bounds (characters for strings, items for arrays).
    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        if !self.kind.matches(value) {
            return Err(format!("must be of type {}", self.kind.as_str()));
        }

        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                let listed: Vec<String> = allowed
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                return Err(format!("must be one of: {}", listed.join(", ")));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum {
                if n < min {
                    return Err(format!("must be greater than or equal to {min}"));
                }
            }
            if let Some(max) = self.maximum {
                if n > max {
                    return Err(format!("must be less than or equal to {max}"));
                }
            }
        }

        let (len, unit) = match value {
            Value::String(s) => (Some(s.chars().count()), "characters"),
            Value::Array(items) => (Some(items.len()), "items"),
            _ => (None, ""),
        };
        if let Some(len) = len {
            if let Some(min) = self.min_length {
                if len < min {
                    return Err(format!("must be at least {min} {unit}"));
                }
            }
            if let Some(max) = self.max_length {
                if len > max {
                    return Err(format!("must be at most {max} {unit}"));
                }
            }
        }

        Ok(())
    }

    fn to_json_schema(&self) -> Value {
        let mut prop = Map::new();
        prop.insert("type".into(), json!(self.kind.as_str()));
        if let Some(description) = &self.description {
            prop.insert("description".into(), json!(description));
        }
        if let Some(values) = &self.enum_values {
            prop.insert("enum".into(), Value::Array(values.clone()));
        }
        if let Some(default) = &self.default {
            prop.insert("default".into(), default.clone());
        }
        if let Some(min) = self.minimum {
            prop.insert("minimum".into(), json!(min));
        }
        if let Some(max) = self.maximum {
            prop.insert("maximum".into(), json!(max));
        }
        let (min_key, max_key) = match self.kind {
            ParamType::Array => ("minItems", "maxItems"),
            _ => ("minLength", "maxLength"),
        };
        if let Some(min) = self.min_length {
            prop.insert(min_key.into(), json!(min));
        }
        if let Some(max) = self.max_length {
            prop.insert(max_key.into(), json!(max));
        }
        Value::Object(prop)
    }
}

/// A validation failure for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

/// Ordered set of named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSchema {
    params: Vec<Parameter>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter. A parameter with the same name replaces the earlier one.
    pub fn param(mut self, param: Parameter) -> Self {
        if let Some(existing) = self.params.iter_mut().find(|p| p.name == param.name) {
            *existing = param;
        } else {
            self.params.push(param);
        }
        self
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Validate arguments, returning the normalized argument map (defaults applied)
    /// or every field error found.
    pub fn validate(&self, arguments: Option<&Value>) -> Result<Map<String, Value>, Vec<FieldError>> {
        let supplied = match arguments {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(vec![FieldError::new("arguments", "must be an object")]),
        };

        let mut errors = Vec::new();
        let mut normalized = Map::new();

        for param in &self.params {
            match supplied.get(&param.name) {
                None | Some(Value::Null) => {
                    if param.required {
                        errors.push(FieldError::new(&param.name, "is required"));
                    } else if let Some(default) = &param.default {
                        normalized.insert(param.name.clone(), default.clone());
                    }
                }
                Some(value) => match param.check(value) {
                    Ok(()) => {
                        normalized.insert(param.name.clone(), value.clone());
                    }
                    Err(message) => errors.push(FieldError::new(&param.name, message)),
                },
            }
        }

        for key in supplied.keys() {
            if self.get(key).is_none() {
                errors.push(FieldError::new(key, "is not a recognized parameter"));
            }
        }

        if errors.is_empty() {
            Ok(normalized)
        } else {
            Err(errors)
        }
    }

    /// Render as a JSON Schema object for listings.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            properties.insert(param.name.clone(), param.to_json_schema());
            if param.required {
                required.push(json!(param.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinates() -> InputSchema {
        InputSchema::new()
            .param(Parameter::number("latitude").required().range(-90.0, 90.0))
            .param(Parameter::number("longitude").required().range(-180.0, 180.0))
    }

    #[test]
    fn test_valid_arguments_pass() {
        let schema = coordinates();
        let args = json!({"latitude": 37.77, "longitude": -122.41});
        let normalized = schema.validate(Some(&args)).unwrap();
        assert_eq!(normalized["latitude"], json!(37.77));
    }

    #[test]
    fn test_missing_required_is_named() {
        let schema = InputSchema::new().param(Parameter::string("text").required());
        let errors = schema.validate(Some(&json!({}))).unwrap_err();
        assert_eq!(errors, vec![FieldError::new("text", "is required")]);
    }

    #[test]
    fn test_all_errors_collected() {
        let schema = coordinates();
        let args = json!({"latitude": 91, "longitude": "west", "altitude": 3});
        let errors = schema.validate(Some(&args)).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["latitude", "longitude", "altitude"]);
        assert_eq!(errors[0].message, "must be less than or equal to 90");
        assert_eq!(errors[1].message, "must be of type number");
    }

    #[test]
    fn test_enum_and_default() {
        let schema = InputSchema::new()
            .param(
                Parameter::string("kind")
                    .required()
                    .one_of(["fantasy", "sci-fi", "mystery"]),
            )
            .param(Parameter::boolean("include_art").default_value(false));

        let normalized = schema.validate(Some(&json!({"kind": "mystery"}))).unwrap();
        assert_eq!(normalized["include_art"], json!(false));

        let errors = schema.validate(Some(&json!({"kind": "western"}))).unwrap_err();
        assert_eq!(errors[0].message, "must be one of: fantasy, sci-fi, mystery");
    }

    #[test]
    fn test_integer_and_length() {
        let schema = InputSchema::new()
            .param(Parameter::integer("count").range(1.0, 10.0))
            .param(Parameter::string("code").length(1, 4));

        assert!(schema.validate(Some(&json!({"count": 3.0}))).is_ok());
        let errors = schema
            .validate(Some(&json!({"count": 2.5, "code": "abcdef"})))
            .unwrap_err();
        assert_eq!(errors[0].message, "must be of type integer");
        assert_eq!(errors[1].message, "must be at most 4 characters");
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let schema = coordinates();
        let errors = schema.validate(Some(&json!([1, 2]))).unwrap_err();
        assert_eq!(errors[0].field, "arguments");
    }

    #[test]
    fn test_json_schema_rendering() {
        let rendered = coordinates().to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["required"], json!(["latitude", "longitude"]));
        assert_eq!(rendered["properties"]["latitude"]["minimum"], json!(-90.0));
        assert_eq!(rendered["additionalProperties"], json!(false));
    }
}

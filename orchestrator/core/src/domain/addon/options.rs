// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Add-on Options Schema
//!
//! Add-ons declare their options with a small type language:
//!
//! | Type | Accepts |
//! |------|---------|
//! | `str`, `str(min,max)` | any scalar, coerced to a string, length bounded |
//! | `password` | same as `str` |
//! | `int`, `int(min,max)` | integers and numeric strings, range bounded |
//! | `float`, `float(min,max)` | numbers and numeric strings, range bounded |
//! | `bool` | booleans and `true/false/yes/no/on/off/1/0` |
//! | `email`, `url`, `port` | address-like strings, ports 1-65535 |
//! | `match(regex)` | strings fully matching the expression |
//! | `list(a\|b\|c)` | one of the listed literals |
//! | `device`, `device(subsystem=x)` | an existing device node, optionally filtered |
//!
//! A trailing `?` makes the option optional. Schema values may also be nested
//! objects or single-element lists (`["str"]`, `[{...}]`).

use crate::domain::host::Device;
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::warn;

static SCHEMA_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<s_prefix>str|password)(?:\((?P<s_min>\d+)?,(?P<s_max>\d+)?\))?|(?P<i_prefix>int)(?:\((?P<i_min>-?\d+)?,(?P<i_max>-?\d+)?\))?|(?P<f_prefix>float)(?:\((?P<f_min>-?[\d.]+)?,(?P<f_max>-?[\d.]+)?\))?|(?P<bool>bool)|(?P<email>email)|(?P<url>url)|(?P<port>port)|(?P<device>device)(?:\(subsystem=(?P<subsystem>[a-z0-9_-]+)\))?|match\((?P<match>.*)\)|list\((?P<list>.+)\))(?P<optional>\?)?$",
    )
    .expect("schema type expression is valid")
});

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email expression is valid"));

const SECRET_PREFIX: &str = "!secret ";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptionsError {
    #[error("Missing required option '{0}'")]
    Missing(String),

    #[error("Invalid value for option '{key}': {reason}")]
    Invalid { key: String, reason: String },

    #[error("Invalid schema for option '{key}': {reason}")]
    Schema { key: String, reason: String },

    #[error("Unknown secret '{0}'")]
    UnknownSecret(String),
}

/// Resolves `!secret <name>` references.
pub trait SecretResolver: Send + Sync {
    fn secret(&self, name: &str) -> Option<String>;
}

impl SecretResolver for HashMap<String, String> {
    fn secret(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

#[derive(Debug, Clone)]
pub enum ValueType {
    Str { min: Option<usize>, max: Option<usize> },
    Password { min: Option<usize>, max: Option<usize> },
    Int { min: Option<i64>, max: Option<i64> },
    Float { min: Option<f64>, max: Option<f64> },
    Bool,
    Email,
    Url,
    Port,
    Device { subsystem: Option<String> },
    Match(Regex),
    List(Vec<String>),
}

/// One parsed schema type string, e.g. `int(1,10)?`.
#[derive(Debug, Clone)]
pub struct FieldType {
    pub kind: ValueType,
    pub optional: bool,
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = SCHEMA_TYPE
            .captures(s)
            .ok_or_else(|| format!("unknown type '{}'", s))?;

        fn bound<T: FromStr>(caps: &regex::Captures<'_>, name: &str) -> Result<Option<T>, String> {
            caps.name(name)
                .map(|m| m.as_str().parse::<T>().map_err(|_| format!("invalid bound '{}'", m.as_str())))
                .transpose()
        }

        let kind = if let Some(prefix) = caps.name("s_prefix") {
            let (min, max) = (bound(&caps, "s_min")?, bound(&caps, "s_max")?);
            if prefix.as_str() == "password" {
                ValueType::Password { min, max }
            } else {
                ValueType::Str { min, max }
            }
        } else if caps.name("i_prefix").is_some() {
            ValueType::Int {
                min: bound(&caps, "i_min")?,
                max: bound(&caps, "i_max")?,
            }
        } else if caps.name("f_prefix").is_some() {
            ValueType::Float {
                min: bound(&caps, "f_min")?,
                max: bound(&caps, "f_max")?,
            }
        } else if caps.name("bool").is_some() {
            ValueType::Bool
        } else if caps.name("email").is_some() {
            ValueType::Email
        } else if caps.name("url").is_some() {
            ValueType::Url
        } else if caps.name("port").is_some() {
            ValueType::Port
        } else if caps.name("device").is_some() {
            ValueType::Device {
                subsystem: caps.name("subsystem").map(|m| m.as_str().to_string()),
            }
        } else if let Some(pattern) = caps.name("match") {
            let regex = Regex::new(&format!("^(?:{})$", pattern.as_str()))
                .map_err(|e| format!("invalid expression: {}", e))?;
            ValueType::Match(regex)
        } else if let Some(list) = caps.name("list") {
            ValueType::List(list.as_str().split('|').map(str::to_string).collect())
        } else {
            return Err(format!("unknown type '{}'", s));
        };

        Ok(Self {
            kind,
            optional: caps.name("optional").is_some(),
        })
    }
}

/// Result of a successful validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOptions {
    pub options: Value,
    /// Devices referenced by `device` options; mapped into the container.
    pub devices: Vec<Device>,
}

pub struct OptionsValidator<'a> {
    schema: &'a Value,
    devices: &'a [Device],
    secrets: &'a dyn SecretResolver,
    used_devices: Vec<Device>,
}

impl<'a> OptionsValidator<'a> {
    pub fn new(schema: &'a Value, devices: &'a [Device], secrets: &'a dyn SecretResolver) -> Self {
        Self {
            schema,
            devices,
            secrets,
            used_devices: Vec::new(),
        }
    }

    /// Validates `options` against the schema and returns normalized values.
    /// Unknown keys are dropped with a warning.
    pub fn validate(mut self, options: &Value) -> Result<ValidatedOptions, OptionsError> {
        let options = match self.schema {
            Value::Bool(false) => options.clone(),
            Value::Object(schema) => {
                let map = options.as_object().ok_or_else(|| OptionsError::Invalid {
                    key: String::new(),
                    reason: "options must be a dictionary".to_string(),
                })?;
                Value::Object(self.validate_dict(schema, map, "")?)
            }
            _ => {
                return Err(OptionsError::Schema {
                    key: String::new(),
                    reason: "schema must be a dictionary or false".to_string(),
                })
            }
        };

        Ok(ValidatedOptions {
            options,
            devices: self.used_devices,
        })
    }

    fn validate_dict(
        &mut self,
        schema: &Map<String, Value>,
        options: &Map<String, Value>,
        root: &str,
    ) -> Result<Map<String, Value>, OptionsError> {
        let mut validated = Map::new();

        for (key, value) in options {
            let path = join_path(root, key);
            let Some(entry) = schema.get(key) else {
                warn!("Unknown option '{}', dropping it", path);
                continue;
            };

            if value.is_null() {
                if is_optional(entry) {
                    continue;
                }
                return Err(OptionsError::Missing(path));
            }

            let normalized = match entry {
                Value::String(kind) => self.validate_single(kind, value, &path)?,
                Value::Array(item) => self.validate_list(item, value, &path)?,
                Value::Object(nested) => {
                    let map = value.as_object().ok_or_else(|| OptionsError::Invalid {
                        key: path.clone(),
                        reason: "expected a dictionary".to_string(),
                    })?;
                    Value::Object(self.validate_dict(nested, map, &path)?)
                }
                _ => {
                    return Err(OptionsError::Schema {
                        key: path,
                        reason: "unsupported schema entry".to_string(),
                    })
                }
            };
            validated.insert(key.clone(), normalized);
        }

        for (key, entry) in schema {
            if options.contains_key(key) || is_optional(entry) {
                continue;
            }
            return Err(OptionsError::Missing(join_path(root, key)));
        }

        Ok(validated)
    }

    fn validate_list(&mut self, item: &[Value], value: &Value, path: &str) -> Result<Value, OptionsError> {
        let Some(item) = item.first() else {
            return Err(OptionsError::Schema {
                key: path.to_string(),
                reason: "list schema needs an element type".to_string(),
            });
        };
        let values = value.as_array().ok_or_else(|| OptionsError::Invalid {
            key: path.to_string(),
            reason: "expected a list".to_string(),
        })?;

        let mut validated = Vec::with_capacity(values.len());
        for (index, element) in values.iter().enumerate() {
            let element_path = format!("{}[{}]", path, index);
            let normalized = match item {
                Value::String(kind) => self.validate_single(kind, element, &element_path)?,
                Value::Object(nested) => {
                    let map = element.as_object().ok_or_else(|| OptionsError::Invalid {
                        key: element_path.clone(),
                        reason: "expected a dictionary".to_string(),
                    })?;
                    Value::Object(self.validate_dict(nested, map, &element_path)?)
                }
                _ => {
                    return Err(OptionsError::Schema {
                        key: element_path,
                        reason: "unsupported list element schema".to_string(),
                    })
                }
            };
            validated.push(normalized);
        }
        Ok(Value::Array(validated))
    }

    fn validate_single(&mut self, kind: &str, value: &Value, path: &str) -> Result<Value, OptionsError> {
        let field: FieldType = kind.parse().map_err(|reason| OptionsError::Schema {
            key: path.to_string(),
            reason,
        })?;

        let resolved;
        let value = match value.as_str().and_then(|s| s.strip_prefix(SECRET_PREFIX)) {
            Some(name) => {
                let secret = self
                    .secrets
                    .secret(name.trim())
                    .ok_or_else(|| OptionsError::UnknownSecret(name.trim().to_string()))?;
                resolved = Value::String(secret);
                &resolved
            }
            None => value,
        };

        let invalid = |reason: &str| OptionsError::Invalid {
            key: path.to_string(),
            reason: reason.to_string(),
        };

        match field.kind {
            ValueType::Str { min, max } | ValueType::Password { min, max } => {
                let text = scalar_to_string(value).ok_or_else(|| invalid("expected a string"))?;
                let length = text.chars().count();
                if min.is_some_and(|min| length < min) || max.is_some_and(|max| length > max) {
                    return Err(invalid("string length out of range"));
                }
                Ok(Value::String(text))
            }
            ValueType::Int { min, max } => {
                let number = to_int(value).ok_or_else(|| invalid("expected an integer"))?;
                if min.is_some_and(|min| number < min) || max.is_some_and(|max| number > max) {
                    return Err(invalid("integer out of range"));
                }
                Ok(Value::Number(number.into()))
            }
            ValueType::Float { min, max } => {
                let number = to_float(value).ok_or_else(|| invalid("expected a number"))?;
                if min.is_some_and(|min| number < min) || max.is_some_and(|max| number > max) {
                    return Err(invalid("number out of range"));
                }
                Number::from_f64(number)
                    .map(Value::Number)
                    .ok_or_else(|| invalid("number is not finite"))
            }
            ValueType::Bool => to_bool(value).map(Value::Bool).ok_or_else(|| invalid("expected a boolean")),
            ValueType::Email => match value.as_str() {
                Some(text) if EMAIL.is_match(text) => Ok(Value::String(text.to_string())),
                _ => Err(invalid("expected an email address")),
            },
            ValueType::Url => match value.as_str().map(url::Url::parse) {
                Some(Ok(parsed)) if parsed.has_host() => Ok(Value::String(parsed.as_str().to_string())),
                _ => Err(invalid("expected a URL")),
            },
            ValueType::Port => match to_int(value) {
                Some(port) if (1..=65535).contains(&port) => Ok(Value::Number(port.into())),
                _ => Err(invalid("expected a port between 1 and 65535")),
            },
            ValueType::Match(regex) => match scalar_to_string(value) {
                Some(text) if regex.is_match(&text) => Ok(Value::String(text)),
                _ => Err(invalid("value does not match the expected format")),
            },
            ValueType::List(choices) => match scalar_to_string(value) {
                Some(text) if choices.contains(&text) => Ok(Value::String(text)),
                _ => Err(invalid(&format!("expected one of {}", choices.join(", ")))),
            },
            ValueType::Device { subsystem } => {
                let text = value.as_str().ok_or_else(|| invalid("expected a device path"))?;
                let device = self
                    .devices
                    .iter()
                    .find(|d| d.path.as_os_str() == text)
                    .ok_or_else(|| invalid("device does not exist"))?;
                if subsystem.as_deref().is_some_and(|s| s != device.subsystem) {
                    return Err(invalid("device does not match the required subsystem"));
                }
                if !self.used_devices.contains(device) {
                    self.used_devices.push(device.clone());
                }
                Ok(Value::String(text.to_string()))
            }
        }
    }
}

fn join_path(root: &str, key: &str) -> String {
    if root.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", root, key)
    }
}

/// A list schema is optional when its element type is.
fn is_optional(entry: &Value) -> bool {
    let entry = match entry {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return false,
        },
        other => other,
    };
    matches!(entry, Value::String(kind) if kind.ends_with('?'))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "on" | "enable" | "1" => Some(true),
            "false" | "no" | "off" | "disable" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn devices() -> Vec<Device> {
        vec![
            Device {
                path: PathBuf::from("/dev/ttyUSB0"),
                subsystem: "tty".to_string(),
            },
            Device {
                path: PathBuf::from("/dev/video0"),
                subsystem: "video4linux".to_string(),
            },
        ]
    }

    fn validate(schema: Value, options: Value) -> Result<ValidatedOptions, OptionsError> {
        let devices = devices();
        let secrets: HashMap<String, String> =
            HashMap::from([("db_password".to_string(), "hunter2".to_string())]);
        OptionsValidator::new(&schema, &devices, &secrets).validate(&options)
    }

    #[test]
    fn test_every_primitive_type_accepts_valid_input() {
        let schema = json!({
            "name": "str",
            "secret": "password",
            "count": "int(1,10)",
            "ratio": "float",
            "enabled": "bool",
            "mail": "email",
            "site": "url",
            "listen": "port",
            "code": "match(^[A-Z]{3}$)",
            "mode": "list(fast|slow)",
            "serial": "device(subsystem=tty)"
        });
        let options = json!({
            "name": 42,
            "secret": "pw",
            "count": "7",
            "ratio": 0.5,
            "enabled": "yes",
            "mail": "user@example.com",
            "site": "https://example.com/path",
            "listen": 8080,
            "code": "ABC",
            "mode": "slow",
            "serial": "/dev/ttyUSB0"
        });

        let validated = validate(schema, options).unwrap();
        let options = validated.options;
        assert_eq!(options["name"], json!("42"));
        assert_eq!(options["count"], json!(7));
        assert_eq!(options["enabled"], json!(true));
        assert_eq!(options["listen"], json!(8080));
        assert_eq!(options["mode"], json!("slow"));
        assert_eq!(validated.devices.len(), 1);
        assert_eq!(validated.devices[0].subsystem, "tty");
    }

    #[test]
    fn test_missing_required_option_fails() {
        let err = validate(json!({"user": "str", "port": "port"}), json!({"user": "root"})).unwrap_err();
        assert_eq!(err, OptionsError::Missing("port".to_string()));
    }

    #[test]
    fn test_optional_suffix_allows_missing() {
        let validated = validate(
            json!({"user": "str", "motd": "str?", "keys": ["str?"]}),
            json!({"user": "root"}),
        )
        .unwrap();
        assert_eq!(validated.options, json!({"user": "root"}));
    }

    #[test]
    fn test_unknown_keys_are_dropped() {
        let validated = validate(json!({"user": "str"}), json!({"user": "root", "legacy": true})).unwrap();
        assert_eq!(validated.options, json!({"user": "root"}));
    }

    #[test]
    fn test_out_of_range_values_fail() {
        assert!(validate(json!({"n": "int(1,10)"}), json!({"n": 11})).is_err());
        assert!(validate(json!({"s": "str(3,)"}), json!({"s": "ab"})).is_err());
        assert!(validate(json!({"p": "port"}), json!({"p": 70000})).is_err());
        assert!(validate(json!({"m": "list(a|b)"}), json!({"m": "c"})).is_err());
        assert!(validate(json!({"e": "email"}), json!({"e": "not-an-email"})).is_err());
    }

    #[test]
    fn test_device_subsystem_filter() {
        let err = validate(json!({"serial": "device(subsystem=tty)"}), json!({"serial": "/dev/video0"})).unwrap_err();
        assert!(matches!(err, OptionsError::Invalid { .. }));
        assert!(validate(json!({"serial": "device"}), json!({"serial": "/dev/missing"})).is_err());
    }

    #[test]
    fn test_nested_lists_and_dicts() {
        let schema = json!({
            "logins": [{"username": "str", "password": "password"}],
            "network": {"host": "str", "port": "port?"}
        });
        let options = json!({
            "logins": [{"username": "admin", "password": "secret"}],
            "network": {"host": "0.0.0.0"}
        });
        let validated = validate(schema, options).unwrap();
        assert_eq!(validated.options["logins"][0]["username"], json!("admin"));

        let err = validate(json!({"logins": [{"username": "str"}]}), json!({"logins": [{}]})).unwrap_err();
        assert_eq!(err, OptionsError::Missing("logins[0].username".to_string()));
    }

    #[test]
    fn test_secret_substitution() {
        let validated = validate(json!({"password": "password"}), json!({"password": "!secret db_password"})).unwrap();
        assert_eq!(validated.options["password"], json!("hunter2"));

        let err = validate(json!({"password": "password"}), json!({"password": "!secret nope"})).unwrap_err();
        assert_eq!(err, OptionsError::UnknownSecret("nope".to_string()));
    }

    #[test]
    fn test_disabled_schema_passes_options_through() {
        let validated = validate(Value::Bool(false), json!({"anything": [1, 2]})).unwrap();
        assert_eq!(validated.options, json!({"anything": [1, 2]}));
    }

    #[test]
    fn test_match_type_with_optional_suffix() {
        let field: FieldType = "match(^\\d+$)?".parse().unwrap();
        assert!(field.optional);
        assert!(matches!(field.kind, ValueType::Match(_)));
        assert!("bogus".parse::<FieldType>().is_err());
    }
}

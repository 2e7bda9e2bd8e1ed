//! Resolved request schemas and request binding.
//!
//! Each compiled policy owns an [`InputSchema`]: its input message plus the
//! closure of every message type reachable from it. The schema drives both the
//! type-checker and the conversion of an incoming request into the value bound
//! to `r`.
//!
//! Binding follows proto3 conventions: absent or `null` fields take their zero
//! value, 64-bit integers may arrive as decimal strings, and unknown fields are
//! ignored.
//!
//! A recursive message type has no finite zero value. Absent recursive
//! messages are zero-filled as deep as the predicate can read (see
//! [`InputSchema::with_read_depth`]) and left empty below that.

use std::collections::{HashMap, HashSet};

use rhai::{Array, Dynamic, Map};
use serde_json::Value;

use crate::descriptor::{DescriptorSource, FieldType, MessageSchema};
use crate::error::{DescriptorError, EvalFault};
use crate::policy::compiler::Limits;

/// A method's input message with every message type it references.
#[derive(Debug, Clone)]
pub struct InputSchema {
    root: String,
    messages: HashMap<String, MessageSchema>,
    read_depth: usize,
    limits: Limits,
}

impl InputSchema {
    /// Resolve `root` and the messages reachable from it.
    pub fn resolve<S>(source: &S, method: &str, root: &str) -> Result<Self, DescriptorError>
    where
        S: DescriptorSource + ?Sized,
    {
        let mut messages = HashMap::new();
        let mut pending = vec![root.to_string()];

        while let Some(name) = pending.pop() {
            if messages.contains_key(&name) {
                continue;
            }
            let Some(message) = source.message(&name) else {
                return Err(DescriptorError::UnresolvedType {
                    method: method.to_string(),
                    type_name: name,
                });
            };
            pending.extend(
                message
                    .fields
                    .values()
                    .filter_map(FieldType::message_name)
                    .filter(|n| !messages.contains_key(*n))
                    .map(str::to_string),
            );
            messages.insert(name, message.clone());
        }

        Ok(Self {
            root: root.to_string(),
            messages,
            read_depth: 0,
            limits: Limits::default(),
        })
    }

    /// Number of message field reads the predicate can chain from `r`.
    ///
    /// Recursive messages are zero-filled at least this deep.
    #[must_use]
    pub fn with_read_depth(mut self, depth: usize) -> Self {
        self.read_depth = depth;
        self
    }

    /// Size limits enforced on bound strings, lists and maps.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Name of the input message.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Look up a message in the resolved closure.
    #[must_use]
    pub fn message(&self, name: &str) -> Option<&MessageSchema> {
        self.messages.get(name)
    }

    /// Convert a JSON request into the value bound to `r`.
    pub fn bind(&self, method: &str, request: &Value) -> Result<Dynamic, EvalFault> {
        let binder = Binder {
            schema: self,
            method,
        };
        let mut path = Vec::new();
        binder.message(&self.root, request, 0, &mut path)
    }

    /// Zero value of the input message.
    #[must_use]
    pub fn zero(&self) -> Dynamic {
        zero_message(self, &self.root, 0, &mut HashSet::new())
    }
}

struct Binder<'a> {
    schema: &'a InputSchema,
    method: &'a str,
}

impl Binder<'_> {
    fn fault(&self, path: &[String], message: impl std::fmt::Display) -> EvalFault {
        let location = if path.is_empty() {
            String::new()
        } else {
            format!("field '{}': ", path.join("."))
        };
        EvalFault::binding(self.method, self.schema.root(), format!("{location}{message}"))
    }

    /// Bind a message found `depth` message levels below `r`.
    fn message(&self, name: &str, value: &Value, depth: usize, path: &mut Vec<String>) -> Result<Dynamic, EvalFault> {
        let Some(schema) = self.schema.message(name) else {
            return Err(self.fault(path, format!("unknown message type '{name}'")));
        };

        let object = match value {
            Value::Object(object) => object,
            Value::Null => return Ok(zero_message(self.schema, name, depth, &mut HashSet::new())),
            other => return Err(self.fault(path, format!("expected object, got {}", json_kind(other)))),
        };

        let mut map = Map::new();
        for (field, field_type) in &schema.fields {
            let bound = match object.get(field) {
                None | Some(Value::Null) => zero_value(self.schema, field_type, depth + 1, &mut HashSet::new()),
                Some(value) => {
                    path.push(field.clone());
                    let bound = self.field(field_type, value, depth + 1, path)?;
                    path.pop();
                    bound
                }
            };
            map.insert(field.as_str().into(), bound);
        }

        Ok(Dynamic::from_map(map))
    }

    fn field(
        &self,
        field_type: &FieldType,
        value: &Value,
        depth: usize,
        path: &mut Vec<String>,
    ) -> Result<Dynamic, EvalFault> {
        let limits = &self.schema.limits;
        match (field_type, value) {
            (FieldType::Bool, Value::Bool(b)) => Ok(Dynamic::from_bool(*b)),
            (FieldType::Int, Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
                .map(Dynamic::from_int)
                .ok_or_else(|| self.fault(path, format!("{n} does not fit in int64"))),
            (FieldType::Int, Value::String(s)) => s
                .parse::<i64>()
                .map(Dynamic::from_int)
                .map_err(|_| self.fault(path, format!("'{s}' is not an integer"))),
            (FieldType::Double, Value::Number(n)) => n
                .as_f64()
                .map(Dynamic::from_float)
                .ok_or_else(|| self.fault(path, format!("{n} is not a number"))),
            (FieldType::String, Value::String(s)) => {
                if exceeds(s.len(), limits.max_string_size) {
                    let message = too_large("string", s.len(), "max_string_size", limits.max_string_size);
                    return Err(self.fault(path, message));
                }
                Ok(Dynamic::from(s.clone()))
            }
            (FieldType::List(inner), Value::Array(items)) => {
                if exceeds(items.len(), limits.max_array_size) {
                    let message = too_large("list", items.len(), "max_array_size", limits.max_array_size);
                    return Err(self.fault(path, message));
                }
                let mut array = Array::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    path.push(index.to_string());
                    array.push(self.field(inner, item, depth, path)?);
                    path.pop();
                }
                Ok(Dynamic::from_array(array))
            }
            (FieldType::Map(inner), Value::Object(entries)) => {
                if exceeds(entries.len(), limits.max_map_size) {
                    let message = too_large("map", entries.len(), "max_map_size", limits.max_map_size);
                    return Err(self.fault(path, message));
                }
                let mut map = Map::new();
                for (key, item) in entries {
                    path.push(key.clone());
                    map.insert(key.as_str().into(), self.field(inner, item, depth, path)?);
                    path.pop();
                }
                Ok(Dynamic::from_map(map))
            }
            (FieldType::Message(name), value) => self.message(name, value, depth, path),
            (_, Value::Null) => Ok(zero_value(self.schema, field_type, depth, &mut HashSet::new())),
            (expected, other) => Err(self.fault(
                path,
                format!("expected {expected}, got {}", json_kind(other)),
            )),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A limit of zero means unlimited, as in the evaluator.
fn exceeds(len: usize, limit: usize) -> bool {
    limit > 0 && len > limit
}

fn too_large(kind: &str, len: usize, limit_name: &str, limit: usize) -> String {
    format!("{kind} of length {len} exceeds {limit_name} ({limit})")
}

fn zero_value(schema: &InputSchema, field_type: &FieldType, depth: usize, visiting: &mut HashSet<String>) -> Dynamic {
    match field_type {
        FieldType::Bool => Dynamic::FALSE,
        FieldType::Int => Dynamic::from_int(0),
        FieldType::Double => Dynamic::from_float(0.0),
        FieldType::String => Dynamic::from(String::new()),
        FieldType::List(_) => Dynamic::from_array(Array::new()),
        FieldType::Map(_) => Dynamic::from_map(Map::new()),
        FieldType::Message(name) => zero_message(schema, name, depth, visiting),
    }
}

/// Zero-filled message `depth` levels below `r`.
///
/// A message already being filled higher up the path repeats a recursive
/// type; it is filled only while `depth` is within the predicate's read depth
/// and left as an empty map past it.
fn zero_message(schema: &InputSchema, name: &str, depth: usize, visiting: &mut HashSet<String>) -> Dynamic {
    let Some(message) = schema.message(name) else {
        return Dynamic::from_map(Map::new());
    };
    let repeated = visiting.contains(name);
    if repeated && depth > schema.read_depth {
        return Dynamic::from_map(Map::new());
    }
    if !repeated {
        visiting.insert(name.to_string());
    }

    let map: Map = message
        .fields
        .iter()
        .map(|(field, field_type)| (field.as_str().into(), zero_value(schema, field_type, depth + 1, visiting)))
        .collect();

    if !repeated {
        visiting.remove(name);
    }
    Dynamic::from_map(map)
}

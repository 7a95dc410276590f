// The view-tree IR: the pure data contract between the engine and
// the external renderer. Runtime values map into it losslessly for
// everything serializable; native and struct values are simply
// absent. Two dictionary keys are reserved in the dynamic value
// space: {"$state": path} and {"$binding": path} mark references
// into host state and cross the boundary as state_ref / binding_ref.

use std::collections::BTreeMap;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::ids::fnv1a32;
use crate::value::Value;

pub const STATE_TAG: &str = "$state";
pub const BINDING_TAG: &str = "$binding";

pub const DEFAULT_IR_VERSION: i64 = 1;

#[derive(Clone, Debug, PartialEq)]
pub enum IrValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    List(Vec<IrValue>),
    Object(BTreeMap<String, IrValue>),
    StateRef(String),
    BindingRef(String),
}

impl IrValue {
    // Maps a runtime value into the IR. None means the value has no
    // IR form (native and struct instances).
    pub fn from_runtime(value: &Value) -> Option<IrValue> {
        match value {
            Value::Nil => Some(IrValue::Null),
            Value::Bool(v) => Some(IrValue::Bool(*v)),
            Value::Int(v) => Some(IrValue::Int(*v)),
            Value::Float(v) => Some(IrValue::Double(*v)),
            Value::Str(v) => Some(IrValue::Str(v.to_string())),
            Value::List(items) => Some(IrValue::List(
                items.iter().filter_map(IrValue::from_runtime).collect(),
            )),
            Value::Dict(entries) => {
                if let Some(Value::Str(path)) = entries.get(BINDING_TAG) {
                    return Some(IrValue::BindingRef(path.to_string()));
                }
                if let Some(Value::Str(path)) = entries.get(STATE_TAG) {
                    return Some(IrValue::StateRef(path.to_string()));
                }
                Some(IrValue::Object(
                    entries
                        .iter()
                        .filter_map(|(key, value)| {
                            IrValue::from_runtime(value).map(|ir| (key.clone(), ir))
                        })
                        .collect(),
                ))
            }
            Value::Native(_) | Value::Struct(_) => None,
        }
    }

    pub fn to_runtime(&self) -> Value {
        match self {
            IrValue::Null => Value::Nil,
            IrValue::Bool(v) => Value::Bool(*v),
            IrValue::Int(v) => Value::Int(*v),
            IrValue::Double(v) => Value::Float(*v),
            IrValue::Str(v) => Value::str(v.clone()),
            IrValue::List(items) => {
                Value::list(items.iter().map(IrValue::to_runtime).collect())
            }
            IrValue::Object(entries) => Value::dict(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_runtime()))
                    .collect(),
            ),
            IrValue::StateRef(path) => {
                let mut entries = BTreeMap::new();
                entries.insert(STATE_TAG.to_string(), Value::str(path.clone()));
                Value::dict(entries)
            }
            IrValue::BindingRef(path) => {
                let mut entries = BTreeMap::new();
                entries.insert(BINDING_TAG.to_string(), Value::str(path.clone()));
                Value::dict(entries)
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            IrValue::Null => serde_json::Value::Null,
            IrValue::Bool(v) => json!(v),
            IrValue::Int(v) => json!(v),
            IrValue::Double(v) => json!(v),
            IrValue::Str(v) => json!(v),
            IrValue::List(items) => {
                serde_json::Value::Array(items.iter().map(IrValue::to_json).collect())
            }
            IrValue::Object(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            IrValue::StateRef(path) => json!({ "state_ref": path }),
            IrValue::BindingRef(path) => json!({ "binding_ref": path }),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> IrValue {
        match value {
            serde_json::Value::Null => IrValue::Null,
            serde_json::Value::Bool(v) => IrValue::Bool(*v),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(v) => IrValue::Int(v),
                None => IrValue::Double(number.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(v) => IrValue::Str(v.clone()),
            serde_json::Value::Array(items) => {
                IrValue::List(items.iter().map(IrValue::from_json).collect())
            }
            serde_json::Value::Object(entries) => {
                if entries.len() == 1 {
                    if let Some(serde_json::Value::String(path)) = entries.get("state_ref") {
                        return IrValue::StateRef(path.clone());
                    }
                    if let Some(serde_json::Value::String(path)) = entries.get("binding_ref") {
                        return IrValue::BindingRef(path.clone());
                    }
                }
                IrValue::Object(
                    entries
                        .iter()
                        .map(|(key, value)| (key.clone(), IrValue::from_json(value)))
                        .collect(),
                )
            }
        }
    }
}

impl Serialize for IrValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for IrValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<IrValue, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(IrValue::from_json(&value))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    #[serde(rename = "type")]
    pub modifier_type: String,
    #[serde(default)]
    pub params: BTreeMap<String, IrValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event: String,
    #[serde(default)]
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub props: BTreeMap<String, IrValue>,
    #[serde(default)]
    pub children: Vec<ViewNode>,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    #[serde(default)]
    pub events: Vec<Event>,
}

fn default_ir_version() -> i64 {
    DEFAULT_IR_VERSION
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewTree {
    #[serde(default = "default_ir_version")]
    pub ir_version: i64,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub root: ViewNode,
}

// Caller-supplied defaults used when a payload is a bare node shape.
#[derive(Clone, Debug, Default)]
pub struct TreeDefaults {
    pub ir_version: Option<i64>,
    pub capabilities: Vec<String>,
}

impl ViewTree {
    // Accepts either a full {root, ir_version?, capabilities?}
    // payload or a bare node {type, ...}; in the bare case the
    // supplied defaults fill in the envelope.
    pub fn from(value: &Value, defaults: &TreeDefaults) -> Result<ViewTree, ErrorKind> {
        let entries = match value {
            Value::Dict(entries) => entries,
            other => {
                return Err(ErrorKind::TypeError { expected: "dict", got: other.type_name() });
            }
        };
        if let Some(root) = entries.get("root") {
            let ir_version = match entries.get("ir_version") {
                Some(Value::Int(v)) => *v,
                _ => defaults.ir_version.unwrap_or(DEFAULT_IR_VERSION),
            };
            let capabilities = match entries.get("capabilities") {
                Some(Value::List(items)) => items
                    .iter()
                    .filter_map(|item| match item {
                        Value::Str(text) => Some(text.to_string()),
                        _ => None,
                    })
                    .collect(),
                _ => defaults.capabilities.clone(),
            };
            return Ok(ViewTree { ir_version, capabilities, root: node_from(root)? });
        }
        Ok(ViewTree {
            ir_version: defaults.ir_version.unwrap_or(DEFAULT_IR_VERSION),
            capabilities: defaults.capabilities.clone(),
            root: node_from(value)?,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn node_from(value: &Value) -> Result<ViewNode, ErrorKind> {
    let entries = match value {
        Value::Dict(entries) => entries,
        other => return Err(ErrorKind::TypeError { expected: "dict", got: other.type_name() }),
    };
    let node_type = match entries.get("type") {
        Some(Value::Str(text)) => text.to_string(),
        _ => return Err(ErrorKind::Bridge("view node is missing its type".to_string())),
    };

    let props: BTreeMap<String, IrValue> = match entries.get("props") {
        Some(Value::Dict(props)) => props
            .iter()
            .filter_map(|(key, value)| {
                IrValue::from_runtime(value).map(|ir| (key.clone(), ir))
            })
            .collect(),
        _ => BTreeMap::new(),
    };

    let children: Vec<ViewNode> = match entries.get("children") {
        Some(Value::List(items)) => {
            items.iter().map(node_from).collect::<Result<Vec<_>, _>>()?
        }
        _ => Vec::new(),
    };

    let modifiers: Vec<Modifier> = match entries.get("modifiers") {
        Some(Value::List(items)) => items.iter().filter_map(modifier_from).collect(),
        _ => Vec::new(),
    };

    let events: Vec<Event> = match entries.get("events") {
        Some(Value::List(items)) => items.iter().filter_map(event_from).collect(),
        _ => Vec::new(),
    };

    let id = match entries.get("id") {
        Some(Value::Str(text)) => text.to_string(),
        _ => synthesize_id(&node_type, &props, &children),
    };

    Ok(ViewNode { id, node_type, props, children, modifiers, events })
}

fn modifier_from(value: &Value) -> Option<Modifier> {
    let entries = match value {
        Value::Dict(entries) => entries,
        _ => return None,
    };
    let modifier_type = match entries.get("type") {
        Some(Value::Str(text)) => text.to_string(),
        _ => return None,
    };
    let params = match entries.get("params") {
        Some(Value::Dict(params)) => params
            .iter()
            .filter_map(|(key, value)| {
                IrValue::from_runtime(value).map(|ir| (key.clone(), ir))
            })
            .collect(),
        _ => BTreeMap::new(),
    };
    Some(Modifier { modifier_type, params })
}

fn event_from(value: &Value) -> Option<Event> {
    let entries = match value {
        Value::Dict(entries) => entries,
        _ => return None,
    };
    let event = match entries.get("event") {
        Some(Value::Str(text)) => text.to_string(),
        _ => return None,
    };
    let action_id = match entries.get("action_id") {
        Some(Value::Str(text)) => text.to_string(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let path = match entries.get("path") {
        Some(Value::Str(text)) => Some(text.to_string()),
        _ => None,
    };
    Some(Event { event, action_id, path })
}

// Ids missing from the payload are synthesized from the node's
// shape, so re-serializing an unchanged tree diffs cleanly.
fn synthesize_id(
    node_type: &str,
    props: &BTreeMap<String, IrValue>,
    children: &[ViewNode],
) -> String {
    let prop_keys: Vec<&str> = props.keys().map(String::as_str).collect();
    let child_ids: Vec<&str> = children.iter().map(|child| child.id.as_str()).collect();
    let seed = format!("{}|{}|{}", node_type, prop_keys.join(","), child_ids.join(","));
    format!("node-{:08x}", fnv1a32(&seed))
}

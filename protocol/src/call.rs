use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// One entry of the tracer's chronological call/return log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CallEvent {
    Call {
        func_name: String,
        #[serde(default, deserialize_with = "null_as_default")]
        locals: Map<String, Value>,
    },
    Return {
        #[serde(default)]
        return_value: Value,
    },
    /// Line/exception events and anything else the tracer emits.
    #[serde(other)]
    Other,
}

impl CallEvent {
    pub fn call(func_name: impl Into<String>, locals: Map<String, Value>) -> Self {
        CallEvent::Call {
            func_name: func_name.into(),
            locals,
        }
    }

    pub fn ret(return_value: Value) -> Self {
        CallEvent::Return { return_value }
    }
}

/// A node of a reconstructed recursion tree.
///
/// `return_value` serializes as `return` and stays `null` until the matching
/// return event has been consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallNode {
    pub func: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub children: Vec<CallNode>,
    #[serde(rename = "return", default)]
    pub return_value: Option<Value>,
}

impl CallNode {
    pub fn new(func: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            func: func.into(),
            args,
            children: Vec::new(),
            return_value: None,
        }
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(CallNode::node_count).sum::<usize>()
    }

    /// Depth of the deepest path below this node (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(CallNode::depth).max().unwrap_or(0)
    }
}

/// Treats an explicit `null` like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use strum_macros::Display;

use crate::CallEvent;
use crate::CallNode;
use crate::call::null_as_default;

/// Stage tags understood by the reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Classification,
    Recursion,
    RecursionError,
    DpStart,
    DpStep,
    GraphStart,
    GraphStep,
    Issues,
    Explanation,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Classification,
        Stage::Recursion,
        Stage::RecursionError,
        Stage::DpStart,
        Stage::DpStep,
        Stage::GraphStart,
        Stage::GraphStep,
        Stage::Issues,
        Stage::Explanation,
        Stage::Done,
    ];

    /// Looks up a wire tag. Tags are matched exactly.
    pub fn from_tag(tag: &str) -> Option<Stage> {
        Self::ALL.into_iter().find(|stage| stage.to_string() == tag)
    }
}

/// Payload of the `recursion` stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecursionPayload {
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: Vec<CallEvent>,
    /// Tree already built by the server, preferred over local reconstruction.
    /// Kept raw so that a malformed tree does not cost the frame its events.
    #[serde(default)]
    pub tree: Option<Value>,
}

impl RecursionPayload {
    /// The server tree, if present and shaped like a [`CallNode`].
    pub fn server_tree(&self) -> Option<Result<CallNode, serde_json::Error>> {
        self.tree
            .as_ref()
            .filter(|tree| !tree.is_null())
            .map(CallNode::deserialize)
    }
}

/// Payload of the `recursion_error` stage: the server could not parse the
/// tracer output and forwards it verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecursionErrorPayload {
    #[serde(default, alias = "raw", alias = "stdout")]
    pub raw_stdout: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Payload of the `dp_step` stage: the complete table at this step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DpStepPayload {
    #[serde(default)]
    pub table: Option<DpTableSnapshot>,
}

/// A DP table as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DpTableSnapshot {
    /// `{"0": 1, "1": 1, "2": 2}`
    Indexed(Map<String, Value>),
    /// `[1, 1, 2]`, indexed by position.
    Dense(Vec<Value>),
}

/// One decoded frame, typed by its stage.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugEvent {
    Classification(Value),
    Recursion(RecursionPayload),
    RecursionError(RecursionErrorPayload),
    DpStart,
    DpStep(DpStepPayload),
    GraphStart,
    GraphStep(Value),
    /// Replaces the issues list; `null` reads as `[]`.
    Issues(Value),
    Explanation(Value),
    Done,
    /// A frame whose stage is missing or not in [`Stage`].
    Unknown {
        stage: Option<String>,
        payload: Value,
    },
}

impl DebugEvent {
    /// Builds the typed event for a decoded `{stage, payload}` pair.
    ///
    /// Fails only when a known stage carries a payload of the wrong shape.
    pub fn from_frame(stage: Option<&str>, payload: Value) -> Result<Self, serde_json::Error> {
        let Some(tag) = stage else {
            return Ok(DebugEvent::Unknown {
                stage: None,
                payload,
            });
        };
        let Some(known) = Stage::from_tag(tag) else {
            return Ok(DebugEvent::Unknown {
                stage: Some(tag.to_string()),
                payload,
            });
        };

        let event = match known {
            Stage::Classification => DebugEvent::Classification(payload),
            Stage::Recursion => DebugEvent::Recursion(typed_or_default(payload)?),
            Stage::RecursionError => DebugEvent::RecursionError(match payload {
                // Some backends send the raw text directly as the payload.
                Value::String(raw_stdout) => RecursionErrorPayload {
                    raw_stdout,
                    error: None,
                },
                other => typed_or_default(other)?,
            }),
            Stage::DpStart => DebugEvent::DpStart,
            Stage::DpStep => DebugEvent::DpStep(typed_or_default(payload)?),
            Stage::GraphStart => DebugEvent::GraphStart,
            Stage::GraphStep => DebugEvent::GraphStep(payload),
            Stage::Issues => DebugEvent::Issues(match payload {
                Value::Null => Value::Array(Vec::new()),
                other => other,
            }),
            Stage::Explanation => DebugEvent::Explanation(payload),
            Stage::Done => DebugEvent::Done,
        };
        Ok(event)
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            DebugEvent::Classification(_) => Some(Stage::Classification),
            DebugEvent::Recursion(_) => Some(Stage::Recursion),
            DebugEvent::RecursionError(_) => Some(Stage::RecursionError),
            DebugEvent::DpStart => Some(Stage::DpStart),
            DebugEvent::DpStep(_) => Some(Stage::DpStep),
            DebugEvent::GraphStart => Some(Stage::GraphStart),
            DebugEvent::GraphStep(_) => Some(Stage::GraphStep),
            DebugEvent::Issues(_) => Some(Stage::Issues),
            DebugEvent::Explanation(_) => Some(Stage::Explanation),
            DebugEvent::Done => Some(Stage::Done),
            DebugEvent::Unknown { .. } => None,
        }
    }

    /// Tag used in logs; unknown stages keep their original tag.
    pub fn stage_name(&self) -> String {
        match (self.stage(), self) {
            (Some(stage), _) => stage.to_string(),
            (None, DebugEvent::Unknown { stage: Some(tag), .. }) => tag.clone(),
            (None, _) => "<missing>".to_string(),
        }
    }
}

fn typed_or_default<T>(payload: Value) -> Result<T, serde_json::Error>
where
    T: DeserializeOwned + Default,
{
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload)
}

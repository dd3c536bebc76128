//! Folds decoded stream events into the cumulative visualization state.
//!
//! [`reduce`] is pure: it returns a new [`DebugState`] and leaves its input
//! untouched. The session owns the state and uses [`DebugState::apply`] to
//! update it in place.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use vizstream_protocol::CallEvent;
use vizstream_protocol::CallNode;
use vizstream_protocol::DebugEvent;
use vizstream_protocol::DpStepPayload;
use vizstream_protocol::DpTableSnapshot;
use vizstream_protocol::RecursionErrorPayload;
use vizstream_protocol::RecursionPayload;

use crate::call_tree;
use crate::merge::merge_values;

/// Cumulative state for one debug session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugState {
    pub classification: Option<Value>,
    pub recursion: Option<RecursionState>,
    pub dp: Option<DpState>,
    pub graph: Option<GraphState>,
    pub issues: Option<Value>,
    pub explanation: Option<Value>,
    /// Payloads of unrecognized stages, merged per stage name. Only filled
    /// when [`ReduceOptions::merge_unknown_stages`] is set.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
    /// Set by the `done` stage; no later event changes the state.
    pub complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecursionState {
    pub events: Vec<CallEvent>,
    pub tree: Option<CallNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DpState {
    pub table: Option<DpTable>,
}

/// DP snapshot as two parallel sequences, serialized as `[indices, values]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DpTable(pub Vec<i64>, pub Vec<Value>);

impl DpTable {
    pub fn indices(&self) -> &[i64] {
        &self.0
    }

    pub fn values(&self) -> &[Value] {
        &self.1
    }

    fn from_snapshot(snapshot: DpTableSnapshot) -> Self {
        let mut entries: Vec<(i64, Value)> = match snapshot {
            DpTableSnapshot::Indexed(map) => indexed_entries(map),
            DpTableSnapshot::Dense(values) => (0..).zip(values).collect(),
        };
        entries.sort_by_key(|(index, _)| *index);
        let (indices, values) = entries.into_iter().unzip();
        DpTable(indices, values)
    }
}

fn indexed_entries(map: Map<String, Value>) -> Vec<(i64, Value)> {
    map.into_iter()
        .filter_map(|(key, value)| match key.trim().parse::<i64>() {
            Ok(index) => Some((index, value)),
            Err(_) => {
                tracing::debug!("skipping non-numeric dp table key `{key}`");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphState {
    pub steps: Vec<Value>,
}

/// Knobs for stages outside the dispatch table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReduceOptions {
    /// Deep-merge unknown named stages into [`DebugState::extensions`]
    /// instead of ignoring them.
    pub merge_unknown_stages: bool,
}

/// Returns the state after `event`, with default options.
pub fn reduce(state: &DebugState, event: &DebugEvent) -> DebugState {
    reduce_with(state, event, ReduceOptions::default())
}

pub fn reduce_with(state: &DebugState, event: &DebugEvent, options: ReduceOptions) -> DebugState {
    let mut next = state.clone();
    next.apply(event, options);
    next
}

impl DebugState {
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Applies one event in place. Returns whether the state changed.
    pub fn apply(&mut self, event: &DebugEvent, options: ReduceOptions) -> bool {
        if self.complete {
            tracing::debug!("ignoring `{}` after done", event.stage_name());
            return false;
        }

        match event {
            DebugEvent::Classification(payload) => {
                self.classification = Some(payload.clone());
            }
            DebugEvent::Recursion(payload) => self.apply_recursion(payload),
            DebugEvent::RecursionError(payload) => return self.apply_recursion_error(payload),
            DebugEvent::DpStart => {
                self.dp = Some(DpState::default());
            }
            DebugEvent::DpStep(DpStepPayload { table }) => {
                self.dp = Some(DpState {
                    table: table.clone().map(DpTable::from_snapshot),
                });
            }
            DebugEvent::GraphStart => {
                self.graph = Some(GraphState::default());
            }
            DebugEvent::GraphStep(payload) => {
                self.graph
                    .get_or_insert_with(GraphState::default)
                    .steps
                    .push(payload.clone());
            }
            DebugEvent::Issues(issues) => {
                self.issues = Some(issues.clone());
            }
            DebugEvent::Explanation(payload) => {
                self.explanation = Some(payload.clone());
            }
            DebugEvent::Done => {
                self.complete = true;
            }
            DebugEvent::Unknown { stage, payload } => {
                return self.apply_unknown(stage.as_deref(), payload, options);
            }
        }
        true
    }

    fn apply_recursion(&mut self, payload: &RecursionPayload) {
        let tree = match payload.server_tree() {
            Some(Ok(tree)) => Some(tree),
            Some(Err(e)) => {
                tracing::debug!("server tree is malformed, rebuilding from events: {e}");
                call_tree::build(&payload.events)
            }
            None => call_tree::build(&payload.events),
        };
        self.recursion = Some(RecursionState {
            events: payload.events.clone(),
            tree,
        });
    }

    fn apply_recursion_error(&mut self, payload: &RecursionErrorPayload) -> bool {
        if let Some(error) = &payload.error {
            tracing::debug!("server failed to parse recursion trace: {error}");
        }
        let Some(events) = call_tree::recover_events(&payload.raw_stdout) else {
            return false;
        };
        let tree = call_tree::build(&events);
        self.recursion = Some(RecursionState { events, tree });
        true
    }

    fn apply_unknown(&mut self, stage: Option<&str>, payload: &Value, options: ReduceOptions) -> bool {
        let Some(stage) = stage else {
            tracing::debug!("ignoring frame without a stage");
            return false;
        };
        if !options.merge_unknown_stages {
            tracing::debug!("ignoring unknown stage `{stage}`");
            return false;
        }
        match self.extensions.get_mut(stage) {
            Some(existing) => merge_values(existing, payload.clone()),
            None => {
                self.extensions.insert(stage.to_string(), payload.clone());
            }
        }
        true
    }
}

//! Rebuilds a recursion tree from the tracer's flat call/return log.
//!
//! Returns pair with the most recently opened call that is still open. A
//! return that arrives with no open call is dropped; only the first
//! top-level call becomes the root.

use serde::Deserialize;
use serde_json::Value;
use vizstream_protocol::CallEvent;
use vizstream_protocol::CallNode;

/// Incremental builder over an explicit stack of open calls.
///
/// Children are attached to their parent when they close, which keeps them
/// in call order because siblings close in the order they were opened.
#[derive(Debug, Clone, Default)]
pub struct CallTreeBuilder {
    stack: Vec<CallNode>,
    root: Option<CallNode>,
    dangling_returns: usize,
    discarded_roots: usize,
}

impl CallTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &CallEvent) {
        match event {
            CallEvent::Call { func_name, locals } => {
                self.stack.push(CallNode::new(func_name.clone(), locals.clone()));
            }
            CallEvent::Return { return_value } => match self.stack.pop() {
                Some(mut node) => {
                    node.return_value = Some(return_value.clone());
                    self.attach(node);
                }
                None => {
                    self.dangling_returns += 1;
                    tracing::debug!("dropping return with no open call: {return_value}");
                }
            },
            CallEvent::Other => {}
        }
    }

    pub fn extend<'a>(&mut self, events: impl IntoIterator<Item = &'a CallEvent>) {
        for event in events {
            self.push(event);
        }
    }

    /// Tree as it stands now; calls still open have `return == null`.
    pub fn tree(&self) -> Option<CallNode> {
        self.clone().finish()
    }

    /// Closes the log, attaching any calls that never returned.
    pub fn finish(mut self) -> Option<CallNode> {
        while let Some(node) = self.stack.pop() {
            self.attach(node);
        }
        self.root
    }

    /// Number of calls currently open.
    pub fn open_calls(&self) -> usize {
        self.stack.len()
    }

    /// Returns dropped because no call was open.
    pub fn dangling_returns(&self) -> usize {
        self.dangling_returns
    }

    /// Top-level calls dropped because a root already existed.
    pub fn discarded_roots(&self) -> usize {
        self.discarded_roots
    }

    fn attach(&mut self, node: CallNode) {
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(node);
        } else if self.root.is_none() {
            self.root = Some(node);
        } else {
            self.discarded_roots += 1;
            tracing::debug!("discarding additional top-level call `{}`", node.func);
        }
    }
}

/// Builds the tree for a complete event log. Empty logs give `None`.
pub fn build(events: &[CallEvent]) -> Option<CallNode> {
    let mut builder = CallTreeBuilder::new();
    builder.extend(events);
    builder.finish()
}

#[derive(Debug, Deserialize)]
struct RecoveredTrace {
    #[serde(default)]
    events: Vec<CallEvent>,
}

/// Pulls the call log out of raw tracer output the server failed to parse.
///
/// Uses the last balanced `{...}` block: the one ending at the final `}` and
/// starting at the earliest `{` that makes it valid JSON. Returns `None` when
/// no such block exists or its `events` list is missing or empty.
pub fn recover_events(raw: &str) -> Option<Vec<CallEvent>> {
    let end = raw.rfind('}')?;
    let candidate = &raw[..=end];
    let block = candidate.match_indices('{').find_map(|(start, _)| {
        match serde_json::from_str::<Value>(&candidate[start..]) {
            Ok(value @ Value::Object(_)) => Some(value),
            _ => None,
        }
    });

    let Some(block) = block else {
        tracing::debug!("no JSON block found in raw recursion output");
        return None;
    };

    match serde_json::from_value::<RecoveredTrace>(block) {
        Ok(trace) if !trace.events.is_empty() => Some(trace.events),
        Ok(_) => {
            tracing::debug!("recovered recursion block has no events");
            None
        }
        Err(e) => {
            tracing::debug!("recovered recursion block is malformed: {e}");
            None
        }
    }
}

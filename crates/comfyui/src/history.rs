//! Typed views of the engine's `/history` and `/queue` payloads.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use yeepay_core::task::QueuePosition;

/// Output type the engine uses for files written to its output directory.
const OUTPUT_KIND: &str = "output";

/// One file produced by an output node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// `output` for saved files, `temp` for previews.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    OUTPUT_KIND.to_string()
}

/// Files produced by one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<OutputFile>,
    #[serde(default)]
    pub gifs: Vec<OutputFile>,
    #[serde(default)]
    pub videos: Vec<OutputFile>,
}

/// Execution status block of a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// The history entry of one prompt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: HashMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<PromptStatus>,
}

impl HistoryEntry {
    /// Saved output files, ordered by node id then by position in the node.
    pub fn output_files(&self) -> Vec<&OutputFile> {
        let mut node_ids: Vec<&String> = self.outputs.keys().collect();
        node_ids.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        });
        node_ids
            .into_iter()
            .flat_map(|id| {
                let out = &self.outputs[id];
                out.images.iter().chain(&out.gifs).chain(&out.videos)
            })
            .filter(|f| f.kind == OUTPUT_KIND)
            .collect()
    }

    fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.status_str.as_deref())
            == Some("error")
    }

    /// Whether the engine finished this prompt. An explicit `completed`
    /// flag wins even without outputs; entries lacking a status count as
    /// finished once they list outputs.
    fn is_finished(&self) -> bool {
        match &self.status {
            Some(status) => status.completed,
            None => !self.outputs.is_empty(),
        }
    }

    /// The engine's description of an execution error.
    pub fn error_message(&self) -> String {
        let messages = self.status.as_ref().map(|s| s.messages.as_slice()).unwrap_or(&[]);
        for message in messages {
            let Some([kind, body]) = message.as_array().map(Vec::as_slice) else {
                continue;
            };
            if kind.as_str() != Some("execution_error") {
                continue;
            }
            let exception = body
                .get("exception_message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .trim();
            return match body.get("node_type").and_then(Value::as_str) {
                Some(node) => format!("{node}: {exception}"),
                None => exception.to_string(),
            };
        }
        "ComfyUI reported an execution error".to_string()
    }
}

/// Result of a history lookup.
#[derive(Debug, Clone)]
pub enum HistoryStatus {
    /// The engine has no finished entry yet.
    Pending,
    /// Finished without an error. The entry may list no outputs.
    Completed(HistoryEntry),
    /// Finished with an execution error.
    Failed(String),
    /// The engine answered with a non-success status; try again later.
    Unknown,
}

impl HistoryStatus {
    /// Interpret the body of `GET /history/{prompt_id}`.
    pub fn from_body(prompt_id: &str, body: &Value) -> Result<Self, serde_json::Error> {
        let Some(raw) = body.get(prompt_id) else {
            return Ok(HistoryStatus::Pending);
        };
        let entry: HistoryEntry = serde_json::from_value(raw.clone())?;
        Ok(if entry.is_error() {
            HistoryStatus::Failed(entry.error_message())
        } else if entry.is_finished() {
            HistoryStatus::Completed(entry)
        } else {
            HistoryStatus::Pending
        })
    }
}

/// Prompt ids currently known to the engine queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub running: Vec<String>,
    pub pending: Vec<String>,
}

impl QueueSnapshot {
    /// Interpret the body of `GET /queue`.
    ///
    /// Queue items are arrays whose second element is the prompt id.
    pub fn from_body(body: &Value) -> Self {
        fn ids(list: Option<&Value>) -> Vec<String> {
            list.and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.get(1)?.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        }
        Self {
            running: ids(body.get("queue_running")),
            pending: ids(body.get("queue_pending")),
        }
    }

    pub fn position(&self, prompt_id: &str) -> Option<QueuePosition> {
        if self.running.iter().any(|id| id == prompt_id) {
            Some(QueuePosition::Running)
        } else if self.pending.iter().any(|id| id == prompt_id) {
            Some(QueuePosition::Pending)
        } else {
            None
        }
    }
}

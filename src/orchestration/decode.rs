//! Tolerant decoding of model output.
//!
//! Decoding runs in two stages. [`sanitize`] strips terminal escape codes
//! and unwraps the first markdown code fence. Candidate JSON values are then
//! taken from the sanitised text: the whole text first, then every balanced
//! `[...]` / `{...}` span in order of appearance. The first candidate that
//! converts into a valid task list wins; otherwise the result is
//! [`Decoded::ParseFailed`] with the reason the planner falls back on.

use crate::adapters::ToolCall;
use crate::core::{FallbackReason, Task, TaskGraph, TaskId, Workspace};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// CSI sequences (colours, cursor movement) and OSC sequences (titles, links).
static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("valid ANSI regex")
});

/// A markdown fence with an optional language tag.
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("valid fence regex")
});

/// Result of decoding a planner response.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Parsed(Vec<Task>),
    ParseFailed(FallbackReason),
}

/// Strip ANSI escapes and, when present, keep only the first fenced block.
pub fn sanitize(raw: &str) -> String {
    let plain = ANSI_RE.replace_all(raw, "");
    match FENCE_RE.captures(&plain) {
        Some(caps) => caps
            .get(1)
            .map_or("", |m| m.as_str())
            .trim()
            .to_string(),
        None => plain.trim().to_string(),
    }
}

/// Every balanced `[...]` or `{...}` span, in order of their opening bracket.
///
/// Brackets inside JSON string literals are ignored.
fn balanced_spans(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();

    for (start, &open) in bytes.iter().enumerate() {
        if open != b'[' && open != b'{' {
            continue;
        }
        let mut stack = Vec::new();
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'[' => stack.push(b']'),
                b'{' => stack.push(b'}'),
                b']' | b'}' => {
                    if stack.pop() != Some(b) {
                        break;
                    }
                    if stack.is_empty() {
                        spans.push(&text[start..=start + offset]);
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    spans
}

/// JSON values found in `raw`, most complete first.
fn json_candidates(raw: &str) -> Vec<Value> {
    let mut texts = vec![sanitize(raw)];
    // An unterminated fence makes sanitize give up; the raw text still has
    // the payload.
    let plain = ANSI_RE.replace_all(raw, "").trim().to_string();
    if plain != texts[0] {
        texts.push(plain);
    }

    let mut values = Vec::new();
    for text in &texts {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            values.push(value);
            continue;
        }
        values.extend(
            balanced_spans(text)
                .into_iter()
                .filter_map(|span| serde_json::from_str::<Value>(span).ok()),
        );
    }
    values
}

/// A task id given as a string or a bare number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    fn into_id(self) -> String {
        match self {
            RawId::Text(s) => s.trim().to_string(),
            RawId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(alias = "task_id")]
    id: Option<RawId>,
    description: Option<String>,
    #[serde(default, alias = "files")]
    target_files: Vec<String>,
    #[serde(default)]
    success_criteria: Vec<String>,
    #[serde(default)]
    dependencies: Vec<RawId>,
    #[serde(default)]
    budget: Option<Value>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

/// Pull the list of task entries out of a decoded value.
fn task_entries(value: Value) -> Result<Vec<Value>, String> {
    match value {
        Value::Array(entries) => Ok(entries),
        Value::Object(mut map) => match map.remove("tasks") {
            Some(Value::Array(entries)) => Ok(entries),
            Some(_) => Err("`tasks` is not an array".to_string()),
            None if map.contains_key("description") => Ok(vec![Value::Object(map)]),
            None => Err("no task array found".to_string()),
        },
        _ => Err("response is not a task array".to_string()),
    }
}

fn build_task(entry: Value, workspace: &Workspace) -> Result<Task, String> {
    let raw: RawTask =
        serde_json::from_value(entry).map_err(|e| format!("invalid task entry: {}", e))?;

    let id = raw
        .id
        .map(RawId::into_id)
        .filter(|id| !id.is_empty())
        .ok_or("task without id")?;
    let description = raw
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| format!("task {} has no description", id))?;

    let mut task = Task::new(id.as_str(), &description);
    for file in raw.target_files.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
        let path = workspace.resolve(file).map_err(|e| e.to_string())?;
        task.target_files.insert(path);
    }
    task.success_criteria = raw
        .success_criteria
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    task.dependencies = raw
        .dependencies
        .into_iter()
        .map(|d| TaskId::from(d.into_id()))
        .collect::<BTreeSet<_>>();
    task.budget = raw.budget.and_then(|b| match b {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    });
    // Explicit writes are locked like any other target file.
    for call in raw.tool_calls.iter().filter(|c| c.is_write()) {
        if let Some(path) = call.path() {
            let path = workspace.resolve(path).map_err(|e| e.to_string())?;
            task.target_files.insert(path);
        }
    }
    task.tool_calls = raw.tool_calls;
    Ok(task)
}

fn tasks_from_value(value: Value, max_tasks: usize, workspace: &Workspace) -> Result<Vec<Task>, String> {
    let entries = task_entries(value)?;
    if entries.is_empty() {
        return Err("empty task list".to_string());
    }

    let tasks = entries
        .into_iter()
        .take(max_tasks)
        .map(|entry| build_task(entry, workspace))
        .collect::<Result<Vec<_>, _>>()?;

    TaskGraph::build(&tasks).map_err(|e| e.to_string())?;
    Ok(tasks)
}

/// Decode a planner response into at most `max_tasks` validated tasks.
///
/// Validation requires an id and description per task, unique ids,
/// dependencies that name tasks in the list, an acyclic graph and target
/// files inside `workspace`. Target files are stored normalised.
pub fn decode_tasks(raw: &str, max_tasks: usize, workspace: &Workspace) -> Decoded {
    if raw.trim().is_empty() {
        return Decoded::ParseFailed(FallbackReason::EmptyResponse);
    }

    let candidates = json_candidates(raw);
    if candidates.is_empty() {
        return Decoded::ParseFailed(FallbackReason::Malformed("no JSON found".to_string()));
    }

    let mut first_error = None;
    for value in candidates {
        match tasks_from_value(value, max_tasks, workspace) {
            Ok(tasks) => return Decoded::Parsed(tasks),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    Decoded::ParseFailed(FallbackReason::Malformed(
        first_error.unwrap_or_else(|| "no task array found".to_string()),
    ))
}

/// Decode a list of tool calls proposed by the model.
///
/// Accepts a bare array or an object with a `tool_calls` array. Returns
/// `None` when nothing usable is found.
pub fn decode_tool_calls(raw: &str) -> Option<Vec<ToolCall>> {
    json_candidates(raw).into_iter().find_map(|value| {
        let list = match value {
            Value::Object(mut map) => map.remove("tool_calls")?,
            other => other,
        };
        serde_json::from_value::<Vec<ToolCall>>(list).ok()
    })
}

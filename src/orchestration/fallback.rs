//! Deterministic plan used when the model backend cannot produce one.
//!
//! The fallback is a pure function of the request text: one task that
//! restates the request, targeting any filenames the request mentions.

use crate::core::{Task, Workspace};
use regex::Regex;
use std::sync::LazyLock;

/// Criterion attached to every fallback task.
pub const ADDRESSED_CRITERION: &str = "the request has been addressed";

/// Id of the single fallback task.
pub const FALLBACK_TASK_ID: &str = "T1";

/// A relative path ending in `name.ext`, where ext starts with a letter.
static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9_.\-]+/)*[A-Za-z0-9_\-][A-Za-z0-9_.\-]*\.[A-Za-z][A-Za-z0-9]{0,9}$")
        .expect("valid filename regex")
});

/// Tokens that look like filenames but almost never are.
const NOT_FILES: &[&str] = &["e.g", "i.e", "etc", "vs", "node.js", "vue.js", "next.js"];

const CREATION_VERBS: &[&str] = &["create", "add", "write", "generate", "make"];

const TRIM_CHARS: &[char] = &[
    '"', '\'', '`', ',', ';', ':', '(', ')', '[', ']', '{', '}', '<', '>', '!', '?', '*',
];

/// Filenames mentioned in `request`, normalised, in order of first mention.
pub fn detect_files(request: &str) -> Vec<String> {
    let normaliser = Workspace::new(".");
    let mut files: Vec<String> = Vec::new();

    for token in request.split_whitespace() {
        let token = token.trim_matches(TRIM_CHARS).trim_end_matches('.');
        if token.contains("..") || token.contains("://") || token.starts_with('/') {
            continue;
        }
        if NOT_FILES.contains(&token.to_lowercase().as_str()) || !FILENAME_RE.is_match(token) {
            continue;
        }
        let Ok(path) = normaliser.resolve(token) else {
            continue;
        };
        let path = path.to_string_lossy().to_string();
        if !files.contains(&path) {
            files.push(path);
        }
    }
    files
}

fn mentions_creation(request: &str) -> bool {
    request
        .split(|c: char| !c.is_ascii_alphabetic())
        .map(str::to_lowercase)
        .any(|word| CREATION_VERBS.contains(&word.as_str()))
}

/// The fallback task list for `request`. Always exactly one task.
pub fn fallback_tasks(request: &str) -> Vec<Task> {
    let files = detect_files(request);
    let mut task = Task::new(FALLBACK_TASK_ID, request);

    if mentions_creation(request) {
        for file in &files {
            task = task.with_criterion(&format!("file `{}` exists", file));
        }
    }
    task = task.with_criterion(ADDRESSED_CRITERION);

    for file in files {
        task = task.with_target(file);
    }
    vec![task]
}

use regex::Regex;

use crate::task::TaskRequest;

/// Task type given to directives found in model replies.
pub const AUTO_DETECTED_TASK: &str = "auto-detected";

/// Finds a task directive in a model reply. Patterns are tried in order and
/// the first capture wins.
#[derive(Debug, Clone)]
pub struct DirectiveExtractor {
    patterns: Vec<Regex>,
}

impl DirectiveExtractor {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }

    pub fn with_defaults() -> Self {
        let patterns = [r"(?i)TASK:\s*(.+)", r"(?i)I will (.+)", r"(?i)Let me (.+)"]
            .into_iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self { patterns }
    }

    pub fn push_pattern(&mut self, pattern: Regex) {
        self.patterns.push(pattern);
    }

    pub fn extract(&self, reply: &str) -> Option<TaskRequest> {
        self.patterns.iter().find_map(|pattern| {
            let caps = pattern.captures(reply)?;
            let description = caps.get(1)?.as_str().trim();
            if description.is_empty() {
                return None;
            }
            Some(TaskRequest::with_type(description, AUTO_DETECTED_TASK))
        })
    }
}

impl Default for DirectiveExtractor {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_marker() {
        let extractor = DirectiveExtractor::with_defaults();
        let task = extractor
            .extract("Sure thing.\nTASK:  organize files in ~/Downloads  \nDone soon.")
            .unwrap();
        assert_eq!(task.description, "organize files in ~/Downloads");
        assert_eq!(task.task_type.as_deref(), Some(AUTO_DETECTED_TASK));
    }

    #[test]
    fn test_pattern_priority() {
        let extractor = DirectiveExtractor::with_defaults();
        let task = extractor
            .extract("Let me think. I will back up your notes.")
            .unwrap();
        assert_eq!(task.description, "back up your notes.");
    }

    #[test]
    fn test_case_insensitive_and_single_line() {
        let extractor = DirectiveExtractor::with_defaults();
        let task = extractor.extract("let me check the weather\nthanks").unwrap();
        assert_eq!(task.description, "check the weather");
    }

    #[test]
    fn test_no_directive() {
        let extractor = DirectiveExtractor::with_defaults();
        assert!(extractor.extract("Hello! How can I help?").is_none());
    }
}

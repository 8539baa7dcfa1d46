use regex::Regex;

/// Fallback type when nothing matches and the request declares none.
pub const GENERAL_TASK: &str = "general";

/// Maps a description pattern to a task type.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub task_type: String,
    pub pattern: Regex,
}

impl RoutingRule {
    pub fn new(task_type: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            task_type: task_type.into(),
            pattern: Regex::new(pattern)?,
        })
    }
}

/// Ordered rule table. The first rule whose pattern matches the description
/// decides the task type.
#[derive(Debug, Clone, Default)]
pub struct TaskRouter {
    rules: Vec<RoutingRule>,
}

impl TaskRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Email, file and web rules, in that priority order.
    pub fn with_defaults() -> Self {
        let defaults = [
            ("email", r"(?i)email|mail|send message|compose"),
            ("file", r"(?i)file|folder|directory|organize|backup"),
            ("web", r"(?i)search|browse|website|url|download"),
        ];
        let rules = defaults
            .into_iter()
            .filter_map(|(task_type, pattern)| RoutingRule::new(task_type, pattern).ok())
            .collect();
        Self { rules }
    }

    /// Append a rule at the lowest priority.
    pub fn push_rule(&mut self, rule: RoutingRule) {
        self.rules.push(rule);
    }

    /// Replace the rule for `rule.task_type` in place, or append it.
    pub fn set_rule(&mut self, rule: RoutingRule) {
        match self.rules.iter_mut().find(|r| r.task_type == rule.task_type) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Resolve the effective task type for a description.
    pub fn resolve(&self, description: &str, declared: Option<&str>) -> String {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(description))
            .map(|rule| rule.task_type.clone())
            .or_else(|| declared.filter(|t| !t.is_empty()).map(str::to_string))
            .unwrap_or_else(|| GENERAL_TASK.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routes() {
        let router = TaskRouter::with_defaults();
        assert_eq!(router.resolve("Send an EMAIL to Bob", None), "email");
        assert_eq!(router.resolve("compose a note", None), "email");
        assert_eq!(router.resolve("Organize my photos", None), "file");
        assert_eq!(router.resolve("browse the news", None), "web");
    }

    #[test]
    fn test_priority_email_file_web() {
        let router = TaskRouter::with_defaults();
        assert_eq!(router.resolve("email the file I downloaded", None), "email");
        assert_eq!(router.resolve("search the folder", None), "file");
    }

    #[test]
    fn test_matching_is_substring_based() {
        // "profile" contains "file"
        let router = TaskRouter::with_defaults();
        assert_eq!(router.resolve("update my profile", None), "file");
    }

    #[test]
    fn test_fallback_to_declared_then_general() {
        let router = TaskRouter::with_defaults();
        assert_eq!(router.resolve("water the plants", Some("scheduled")), "scheduled");
        assert_eq!(router.resolve("water the plants", Some("")), "general");
        assert_eq!(router.resolve("water the plants", None), "general");
        // Rules win over the declared type
        assert_eq!(router.resolve("backup photos", Some("scheduled")), "file");
    }

    #[test]
    fn test_custom_rules() {
        let mut router = TaskRouter::with_defaults();
        router.push_rule(RoutingRule::new("calendar", r"(?i)meeting|calendar").unwrap());
        assert_eq!(router.resolve("book a meeting", None), "calendar");

        router.set_rule(RoutingRule::new("web", r"(?i)lookup").unwrap());
        assert_eq!(router.resolve("browse the news", None), "general");
        assert_eq!(router.resolve("lookup rust docs", None), "web");
        assert_eq!(router.rules().len(), 4);
    }
}

//! Trigger set and branch filters

use crate::core::config::ConfigError;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fmt;
use tracing::debug;

/// Kind of source-control event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Push,
    PullRequest,
    WorkflowDispatch,
    Other(String),
}

impl EventKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "push" => EventKind::Push,
            "pull_request" => EventKind::PullRequest,
            "workflow_dispatch" => EventKind::WorkflowDispatch,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::WorkflowDispatch => "workflow_dispatch",
            EventKind::Other(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A triggering event: what happened and on which branch
///
/// For pull requests the branch is the target (base) branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub branch: String,
}

impl Event {
    /// Create an event; `refs/heads/` prefixes are stripped from the branch
    pub fn new(kind: EventKind, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        let branch = branch
            .strip_prefix("refs/heads/")
            .map(str::to_string)
            .unwrap_or(branch);
        Self { kind, branch }
    }

    pub fn push(branch: impl Into<String>) -> Self {
        Self::new(EventKind::Push, branch)
    }

    pub fn pull_request(branch: impl Into<String>) -> Self {
        Self::new(EventKind::PullRequest, branch)
    }

    /// Fully qualified git ref of the branch
    pub fn git_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }
}

/// Branch patterns for one event kind
#[derive(Debug, Clone, Default)]
pub struct BranchFilter {
    branches: Vec<String>,
    branches_ignore: Vec<String>,
    include: Option<GlobSet>,
    ignore: Option<GlobSet>,
}

impl BranchFilter {
    fn new(branches: Vec<String>, branches_ignore: Vec<String>) -> Result<Self, ConfigError> {
        let include = compile_patterns(&branches)?;
        let ignore = compile_patterns(&branches_ignore)?;
        Ok(Self {
            branches,
            branches_ignore,
            include,
            ignore,
        })
    }

    /// Check whether a branch passes the filter
    pub fn accepts(&self, branch: &str) -> bool {
        if let Some(include) = &self.include {
            return include.is_match(branch);
        }
        if let Some(ignore) = &self.ignore {
            return !ignore.is_match(branch);
        }
        true
    }

    pub fn branches(&self) -> &[String] {
        &self.branches
    }

    pub fn branches_ignore(&self) -> &[String] {
        &self.branches_ignore
    }
}

/// `*` stays within one path segment, `**` crosses segments
fn compile_patterns(patterns: &[String]) -> Result<Option<GlobSet>, ConfigError> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| ConfigError::InvalidBranchPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        builder.add(glob);
    }

    builder
        .build()
        .map(Some)
        .map_err(|e| ConfigError::InvalidBranchPattern {
            pattern: patterns.join(", "),
            reason: e.to_string(),
        })
}

/// One configured event with its branch filter
#[derive(Debug, Clone)]
pub struct Trigger {
    pub kind: EventKind,
    pub filter: BranchFilter,
}

/// The set of events that start a run
#[derive(Debug, Clone, Default)]
pub struct TriggerSet {
    triggers: Vec<Trigger>,
}

impl TriggerSet {
    /// Parse the raw `on:` value
    ///
    /// Accepts `on: push`, `on: [push, pull_request]`, or a mapping from
    /// event name to `{ branches, branches-ignore }`.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let mut triggers = Vec::new();

        match value {
            Value::Null => {}
            Value::String(name) => triggers.push(Trigger {
                kind: EventKind::parse(name),
                filter: BranchFilter::default(),
            }),
            Value::Sequence(items) => {
                for item in items {
                    let name = item.as_str().ok_or_else(|| {
                        ConfigError::InvalidTrigger(format!("expected event name, got {:?}", item))
                    })?;
                    triggers.push(Trigger {
                        kind: EventKind::parse(name),
                        filter: BranchFilter::default(),
                    });
                }
            }
            Value::Mapping(map) => {
                for (key, body) in map {
                    let name = key.as_str().ok_or_else(|| {
                        ConfigError::InvalidTrigger(format!("expected event name, got {:?}", key))
                    })?;
                    triggers.push(Trigger {
                        kind: EventKind::parse(name),
                        filter: parse_filter(name, body)?,
                    });
                }
            }
            other => {
                return Err(ConfigError::InvalidTrigger(format!(
                    "unsupported 'on' value: {:?}",
                    other
                )))
            }
        }

        Ok(Self { triggers })
    }

    /// Check whether an event starts a run
    pub fn matches(&self, event: &Event) -> bool {
        self.triggers
            .iter()
            .any(|t| t.kind == event.kind && t.filter.accepts(&event.branch))
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }
}

fn parse_filter(event: &str, body: &Value) -> Result<BranchFilter, ConfigError> {
    let map = match body {
        Value::Null => return Ok(BranchFilter::default()),
        Value::Mapping(map) => map,
        other => {
            return Err(ConfigError::InvalidTrigger(format!(
                "event '{}' expects a mapping, got {:?}",
                event, other
            )))
        }
    };

    let mut branches = Vec::new();
    let mut branches_ignore = Vec::new();

    for (key, value) in map {
        match key.as_str() {
            Some("branches") => branches = string_list(event, value)?,
            Some("branches-ignore") => branches_ignore = string_list(event, value)?,
            Some(other) => debug!("Ignoring filter '{}' on event '{}'", other, event),
            None => {}
        }
    }

    if !branches.is_empty() && !branches_ignore.is_empty() {
        return Err(ConfigError::InvalidTrigger(format!(
            "event '{}' cannot use both 'branches' and 'branches-ignore'",
            event
        )));
    }

    BranchFilter::new(branches, branches_ignore)
}

fn string_list(event: &str, value: &Value) -> Result<Vec<String>, ConfigError> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Sequence(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ConfigError::InvalidTrigger(format!(
                        "event '{}' branch patterns must be strings",
                        event
                    ))
                })
            })
            .collect(),
        other => Err(ConfigError::InvalidTrigger(format!(
            "event '{}' expects a list of branch patterns, got {:?}",
            event, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triggers(yaml: &str) -> TriggerSet {
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        TriggerSet::from_value(&value).unwrap()
    }

    #[test]
    fn test_master_filter_only_accepts_master() {
        let set = triggers(
            r#"
push:
  branches: [ master ]
pull_request:
  branches: [ master ]
"#,
        );

        assert_eq!(set.len(), 2);
        assert!(set.matches(&Event::push("master")));
        assert!(set.matches(&Event::pull_request("master")));
        assert!(set.matches(&Event::push("refs/heads/master")));
        assert!(!set.matches(&Event::push("develop")));
        assert!(!set.matches(&Event::pull_request("feature/master")));
        assert!(!set.matches(&Event::new(EventKind::WorkflowDispatch, "master")));
    }

    #[test]
    fn test_event_name_forms() {
        let single = triggers("push");
        assert!(single.matches(&Event::push("anything")));
        assert!(!single.matches(&Event::pull_request("anything")));

        let list = triggers("[push, pull_request]");
        assert!(list.matches(&Event::pull_request("dev")));
    }

    #[test]
    fn test_glob_patterns() {
        let set = triggers(
            r#"
push:
  branches: [ "release/*", "hotfix/**" ]
"#,
        );
        assert!(set.matches(&Event::push("release/1.0")));
        assert!(!set.matches(&Event::push("release/1.0/rc")));
        assert!(set.matches(&Event::push("hotfix/a/b")));
        assert!(!set.matches(&Event::push("master")));
    }

    #[test]
    fn test_branches_ignore() {
        let set = triggers(
            r#"
push:
  branches-ignore: [ "wip/*" ]
"#,
        );
        assert!(set.matches(&Event::push("master")));
        assert!(!set.matches(&Event::push("wip/try")));
    }

    #[test]
    fn test_both_filters_rejected() {
        let value: Value = serde_yaml::from_str(
            r#"
push:
  branches: [ master ]
  branches-ignore: [ dev ]
"#,
        )
        .unwrap();
        assert!(matches!(
            TriggerSet::from_value(&value),
            Err(ConfigError::InvalidTrigger(_))
        ));
    }

    #[test]
    fn test_null_is_empty() {
        let set = TriggerSet::from_value(&Value::Null).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_event_git_ref() {
        assert_eq!(Event::push("master").git_ref(), "refs/heads/master");
        assert_eq!(EventKind::parse("pull_request"), EventKind::PullRequest);
        assert_eq!(EventKind::parse("schedule").to_string(), "schedule");
    }
}

//! Access-policy documents.
//!
//! IAM-style JSON: a `Version` and a list of `Statement`s, each with an
//! `Effect` (`Allow` / `Deny`), one or more `Action` patterns, and an
//! optional `Resource`. The document is treated as opaque input: only its
//! shape is checked, and only the actions are interpreted.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::client::ProviderAction;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read access policy: {0}")]
    Read(String),

    #[error("malformed access policy: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// A JSON field that may hold a single value or a list of values.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPolicy {
    version: String,
    statement: OneOrMany<RawStatement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawStatement {
    sid: Option<String>,
    effect: Effect,
    action: OneOrMany<String>,
    resource: Option<OneOrMany<String>>,
}

/// One `Action` entry, compiled once when the document is loaded.
///
/// Matching is case-insensitive and `*` matches any run of characters.
#[derive(Debug, Clone)]
pub struct ActionPattern {
    raw: String,
    regex: Regex,
}

impl ActionPattern {
    pub fn new(raw: &str) -> Result<Self, regex::Error> {
        let body = regex::escape(raw).replace(r"\*", ".*");
        let regex = Regex::new(&format!("(?i)^{body}$"))?;
        Ok(Self {
            raw: raw.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, action: &str) -> bool {
        self.regex.is_match(action)
    }
}

impl PartialEq for ActionPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sid: Option<String>,
    pub effect: Effect,
    pub actions: Vec<ActionPattern>,
    pub resources: Vec<String>,
}

/// A parsed access policy.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPolicy {
    pub version: String,
    pub statements: Vec<Statement>,
}

impl AccessPolicy {
    pub fn from_json(s: &str) -> Result<Self, PolicyError> {
        let raw: RawPolicy =
            serde_json::from_str(s).map_err(|e| PolicyError::Malformed(e.to_string()))?;
        if raw.version.trim().is_empty() {
            return Err(PolicyError::Malformed("Version must not be empty".into()));
        }
        let mut statements = Vec::new();
        for (i, st) in raw.statement.into_vec().into_iter().enumerate() {
            let raw_actions = st.action.into_vec();
            if raw_actions.is_empty() || raw_actions.iter().any(|a| a.trim().is_empty()) {
                return Err(PolicyError::Malformed(format!(
                    "statement {i} has an empty Action"
                )));
            }
            let actions = raw_actions
                .iter()
                .map(|a| {
                    ActionPattern::new(a).map_err(|e| {
                        PolicyError::Malformed(format!("statement {i} Action {a:?}: {e}"))
                    })
                })
                .collect::<Result<_, _>>()?;
            statements.push(Statement {
                sid: st.sid,
                effect: st.effect,
                actions,
                resources: st.resource.map(OneOrMany::into_vec).unwrap_or_default(),
            });
        }
        if statements.is_empty() {
            return Err(PolicyError::Malformed("no statements".into()));
        }
        Ok(Self {
            version: raw.version,
            statements,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, PolicyError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| PolicyError::Read(e.to_string()))?;
        Self::from_json(&content)
    }

    /// A policy granting exactly the actions the autoscaler needs.
    pub fn least_privilege() -> Self {
        Self {
            version: "2012-10-17".to_string(),
            statements: vec![Statement {
                sid: Some("FleetGridAutoscaler".to_string()),
                effect: Effect::Allow,
                // Escaped literals always compile.
                actions: ProviderAction::ALL
                    .iter()
                    .filter_map(|a| ActionPattern::new(a.iam_action()).ok())
                    .collect(),
                resources: vec!["*".to_string()],
            }],
        }
    }

    /// Whether the named action is allowed. An explicit `Deny` always wins.
    pub fn allows(&self, action: &str) -> bool {
        let matching = |effect: Effect| {
            self.statements
                .iter()
                .filter(|st| st.effect == effect)
                .any(|st| st.actions.iter().any(|p| p.matches(action)))
        };
        !matching(Effect::Deny) && matching(Effect::Allow)
    }

    pub fn allows_action(&self, action: ProviderAction) -> bool {
        self.allows(action.iam_action())
    }

    /// Provider actions the policy does not grant.
    pub fn missing_actions(&self) -> Vec<ProviderAction> {
        ProviderAction::ALL
            .into_iter()
            .filter(|a| !self.allows_action(*a))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"{
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": [
                    "ec2:RunInstances",
                    "ec2:TerminateInstances",
                    "ec2:Describe*",
                    "ec2:CreateTags"
                ],
                "Resource": "*"
            },
            {
                "Sid": "Buckets",
                "Effect": "Allow",
                "Action": ["s3:GetObject", "s3:PutObject"],
                "Resource": ["arn:aws:s3:::tally-results", "arn:aws:s3:::tally-results/*"]
            }
        ]
    }"#;

    #[test]
    fn parses_and_grants_all_actions() {
        let policy = AccessPolicy::from_json(POLICY).unwrap();
        assert_eq!(policy.statements.len(), 2);
        assert_eq!(policy.statements[1].resources.len(), 2);
        assert_eq!(policy.statements[0].actions[2].as_str(), "ec2:Describe*");
        assert!(policy.missing_actions().is_empty());
        assert!(policy.allows("s3:GetObject"));
        assert!(!policy.allows("s3:DeleteObject"));
    }

    #[test]
    fn single_statement_and_string_action() {
        let policy = AccessPolicy::from_json(
            r#"{"Version":"2012-10-17","Statement":{"Effect":"Allow","Action":"ec2:DescribeInstances"}}"#,
        )
        .unwrap();
        assert_eq!(
            policy.missing_actions(),
            vec![
                ProviderAction::Launch,
                ProviderAction::Terminate,
                ProviderAction::Tag
            ]
        );
    }

    #[test]
    fn deny_overrides_wildcard_allow() {
        let policy = AccessPolicy::from_json(
            r#"{"Version":"2012-10-17","Statement":[
                {"Effect":"Allow","Action":"ec2:*"},
                {"Effect":"Deny","Action":"ec2:TerminateInstances"}
            ]}"#,
        )
        .unwrap();
        assert!(policy.allows_action(ProviderAction::Launch));
        assert!(!policy.allows_action(ProviderAction::Terminate));
    }

    fn matches(pattern: &str, action: &str) -> bool {
        ActionPattern::new(pattern).unwrap().matches(action)
    }

    #[test]
    fn actions_match_case_insensitively() {
        assert!(matches("EC2:runinstances", "ec2:RunInstances"));
        assert!(matches("*", "ec2:CreateTags"));
        assert!(matches("ec2:*Tags", "ec2:CreateTags"));
        assert!(!matches("ec2:Run*", "ec2:TerminateInstances"));
        assert!(!matches("ec2:Run", "ec2:RunInstances"));
    }

    #[test]
    fn pattern_metacharacters_are_literal() {
        assert!(!matches("ec2:Run.nstances", "ec2:RunInstances"));
        assert!(matches("ec2:(Run)?*", "ec2:(Run)?Instances"));
        assert!(!matches("ec2:[RT]*", "ec2:RunInstances"));
    }

    #[test]
    fn repeated_wildcards_evaluate_quickly() {
        let policy = AccessPolicy::from_json(
            r#"{"Version":"2012-10-17","Statement":{"Effect":"Allow","Action":"ec2:**************x"}}"#,
        )
        .unwrap();
        let started = std::time::Instant::now();
        assert_eq!(policy.missing_actions().len(), ProviderAction::ALL.len());
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert!(policy.allows("ec2:x"));
    }

    #[test]
    fn malformed_documents_rejected() {
        assert!(AccessPolicy::from_json("not json").is_err());
        assert!(AccessPolicy::from_json(r#"{"Version":"","Statement":[]}"#).is_err());
        assert!(AccessPolicy::from_json(r#"{"Version":"1","Statement":[]}"#).is_err());
        assert!(
            AccessPolicy::from_json(
                r#"{"Version":"1","Statement":[{"Effect":"Maybe","Action":"ec2:*"}]}"#
            )
            .is_err()
        );
        assert!(
            AccessPolicy::from_json(
                r#"{"Version":"1","Statement":[{"Effect":"Allow","Action":[]}]}"#
            )
            .is_err()
        );
    }

    #[test]
    fn least_privilege_grants_exactly_provider_actions() {
        let policy = AccessPolicy::least_privilege();
        assert!(policy.missing_actions().is_empty());
        assert!(!policy.allows("ec2:StopInstances"));
        assert!(!policy.allows("iam:PassRole"));
    }
}

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Canned reply for a matched request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockResponse {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_status() -> u16 {
    200
}

/// One interception rule
///
/// `path` is a regex matched in full against the request path (query included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockRule {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub response: MockResponse,
}

/// Ordered rule set; the first matching rule answers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MockRules {
    pub rules: Vec<MockRule>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    List(Vec<MockRule>),
    Wrapped { rules: Vec<MockRule> },
}

impl MockRules {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mock rules: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid mock rules file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let rules = match serde_yaml::from_str::<RuleFile>(content)? {
            RuleFile::List(rules) | RuleFile::Wrapped { rules } => rules,
        };

        for rule in &rules {
            if let Err(e) = Regex::new(&rule.path) {
                bail!("Invalid path pattern '{}': {}", rule.path, e);
            }
            if !(100..=599).contains(&rule.response.status) {
                bail!("Invalid status {} for path '{}'", rule.response.status, rule.path);
            }
        }

        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let rules = MockRules::from_yaml(
            r#"
- path: /api/user
  method: GET
  response:
    body: '{"name": "Ada"}'
    headers:
      Content-Type: application/json
- path: /api/orders/.*
  response:
    status: 503
"#,
        )
        .unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules.rules[0].method.as_deref(), Some("GET"));
        assert_eq!(rules.rules[0].response.status, 200);
        assert_eq!(
            rules.rules[0].response.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(rules.rules[1].response.status, 503);
        assert_eq!(rules.rules[1].response.body, None);
    }

    #[test]
    fn test_parse_wrapped() {
        let rules = MockRules::from_yaml("rules:\n  - path: /ping\n    response: {body: pong}\n").unwrap();
        assert_eq!(rules.rules[0].response.body.as_deref(), Some("pong"));
    }

    #[test]
    fn test_rejects_bad_pattern_and_status() {
        assert!(MockRules::from_yaml("- path: /a(\n  response: {}\n").is_err());
        assert!(MockRules::from_yaml("- path: /a\n  response: {status: 42}\n").is_err());
    }

    #[test]
    fn test_serializes_as_plain_list() {
        let rules = MockRules::from_yaml("- path: /ping\n  response: {}\n").unwrap();
        let json = serde_json::to_value(&rules).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["response"]["status"], 200);
    }
}

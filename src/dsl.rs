//! Intent declaration DSL and boundary predicates.
//!
//! ```text
//! intent settle_invoices          # name is informational
//! objective: Settle approved invoices
//! permit: [DEBIT_.*, NOTIFY_PAYEE]
//! ```

use crate::error::{GovResult, GovernanceError};
use crate::types::{AgentId, Intent};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Permitted-action predicate: a regex that must match the whole action name.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BoundaryPredicate {
    pattern: String,
    compiled: Regex,
}

impl BoundaryPredicate {
    pub fn new(pattern: &str) -> GovResult<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(GovernanceError::Parse {
                source: "boundary_predicate".to_string(),
                message: "predicate pattern must be non-empty".to_string(),
            });
        }
        let compiled = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            GovernanceError::Parse {
                source: "boundary_predicate".to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(Self { pattern: pattern.to_string(), compiled })
    }

    /// Predicate matching exactly one action name.
    pub fn exact(name: &str) -> GovResult<Self> {
        Self::new(&regex::escape(name))
    }

    pub fn matches(&self, action_name: &str) -> bool {
        self.compiled.is_match(action_name)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl PartialEq for BoundaryPredicate {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl fmt::Debug for BoundaryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundaryPredicate({})", self.pattern)
    }
}

impl TryFrom<String> for BoundaryPredicate {
    type Error = GovernanceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<BoundaryPredicate> for String {
    fn from(p: BoundaryPredicate) -> Self {
        p.pattern
    }
}

/// Parsed intent declaration, before it is bound to an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentDeclaration {
    pub name: String,
    pub objective: String,
    pub boundary: Vec<BoundaryPredicate>,
}

impl IntentDeclaration {
    pub fn bind(self, agent: AgentId, declared_at: u64) -> Intent {
        Intent::new(agent, self.objective, self.boundary, declared_at)
    }
}

/// Parser for textual intent declarations.
#[derive(Debug, Clone, Default)]
pub struct IntentDsl;

static INTENT_RE: OnceLock<Regex> = OnceLock::new();
static FIELD_RE: OnceLock<Regex> = OnceLock::new();

fn intent_re() -> &'static Regex {
    INTENT_RE.get_or_init(|| Regex::new(r"(?m)^intent\s+(\w+)\s*$").expect("valid regex"))
}

fn field_re() -> &'static Regex {
    FIELD_RE.get_or_init(|| Regex::new(r"(?m)^(\w+):\s*(.*)$").expect("valid regex"))
}

impl IntentDsl {
    /// Parse a declaration from DSL text.
    pub fn parse(text: &str) -> GovResult<IntentDeclaration> {
        let clean = Self::strip_comments(text);
        let name = intent_re()
            .captures(&clean)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| GovernanceError::Parse {
                source: "intent".to_string(),
                message: "missing intent name declaration".to_string(),
            })?;

        let fields: HashMap<&str, &str> = field_re()
            .captures_iter(&clean)
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str().trim())))
            .collect();

        let objective = fields
            .get("objective")
            .filter(|o| !o.is_empty())
            .map(|o| o.to_string())
            .ok_or_else(|| GovernanceError::Parse {
                source: format!("intent {}", name),
                message: "missing objective".to_string(),
            })?;

        let boundary = match fields.get("permit") {
            Some(list) => Self::parse_permit_list(list)?,
            None => Vec::new(),
        };

        Ok(IntentDeclaration { name, objective, boundary })
    }

    /// Parse and bind in one step.
    pub fn parse_intent(text: &str, agent: AgentId, declared_at: u64) -> GovResult<Intent> {
        Ok(Self::parse(text)?.bind(agent, declared_at))
    }

    fn strip_comments(text: &str) -> String {
        text.lines()
            .filter_map(|line| {
                let trimmed = match line.find('#') {
                    Some(pos) => line[..pos].trim(),
                    None => line.trim(),
                };
                if trimmed.is_empty() { None } else { Some(trimmed) }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn parse_permit_list(list: &str) -> GovResult<Vec<BoundaryPredicate>> {
        let inner = list
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| GovernanceError::Parse {
                source: "permit".to_string(),
                message: format!("expected bracketed list, got '{}'", list),
            })?;
        Self::split_top_level(inner)
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(BoundaryPredicate::new)
            .collect()
    }

    /// Split on commas outside `()`, `[]` and `{}`, so `{1,3}` and `[a,b]`
    /// stay inside one pattern. A backslash escapes the next character.
    fn split_top_level(list: &str) -> Vec<&str> {
        let mut parts = Vec::new();
        let mut depth = 0usize;
        let mut start = 0;
        let mut escaped = false;
        for (i, c) in list.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' => escaped = true,
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    parts.push(&list[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        parts.push(&list[start..]);
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_is_anchored() {
        let p = BoundaryPredicate::new("DEBIT_.*").unwrap();
        assert!(p.matches("DEBIT_GAS"));
        assert!(!p.matches("XDEBIT_GAS"));
        let exact = BoundaryPredicate::exact("a.b").unwrap();
        assert!(exact.matches("a.b"));
        assert!(!exact.matches("axb"));
    }

    #[test]
    fn predicate_serde_roundtrip_by_pattern() {
        let p = BoundaryPredicate::new("INIT_.*").unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"INIT_.*\"");
        let back: BoundaryPredicate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert!(serde_json::from_str::<BoundaryPredicate>("\"(\"").is_err());
    }

    #[test]
    fn permit_list_keeps_commas_inside_groups() {
        let list = IntentDsl::parse_permit_list(r"[DEBIT_[A-Z]{1,3}, (PAY|REFUND)_[a,b], OPEN\(, DONE]").unwrap();
        let patterns: Vec<&str> = list.iter().map(|p| p.pattern()).collect();
        assert_eq!(patterns, vec!["DEBIT_[A-Z]{1,3}", "(PAY|REFUND)_[a,b]", r"OPEN\(", "DONE"]);
        assert!(list[0].matches("DEBIT_GAS"));
        assert!(!list[0].matches("DEBIT_GASES"));
        assert!(list[1].matches("REFUND_b"));
        assert!(list[2].matches("OPEN("));
    }

    #[test]
    fn permit_list_requires_brackets() {
        assert!(IntentDsl::parse_permit_list("A, B").is_err());
        assert_eq!(IntentDsl::parse_permit_list("[]").unwrap().len(), 0);
    }
}

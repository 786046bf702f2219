//! Tag expressions: `{sel1,sel2,...}[group1,group2,...]`

use super::Tag;
use crate::{Result, TagDbError};
use regex::Regex;
use std::sync::{Arc, OnceLock};

static EXPRESSION: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();

fn expression_regex() -> Result<&'static Regex> {
    EXPRESSION
        .get_or_init(|| {
            Regex::new(r"^\{(?P<selectors>[^{}\[\]]*)\}(?:\[(?P<groupings>[^{}\[\]]*)\])?$")
        })
        .as_ref()
        .map_err(|e| TagDbError::Internal(format!("expression grammar: {}", e)))
}

/// One grouping dimension: a tag key and every tag known for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouping {
    pub key: String,
    pub tags: Vec<Arc<Tag>>,
}

/// A parsed and looked-up tag expression
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expression {
    /// Selectors that name existing tags
    pub selectors: Vec<Arc<Tag>>,
    /// Selectors naming tags that were never written
    pub unknown_selectors: Vec<String>,
    pub groupings: Vec<Grouping>,
}

impl Expression {
    /// True when a selector names a tag that does not exist
    pub fn matches_nothing(&self) -> bool {
        !self.unknown_selectors.is_empty()
    }

    /// Grouping keys in expression order
    pub fn group_keys(&self) -> impl Iterator<Item = &str> {
        self.groupings.iter().map(|g| g.key.as_str())
    }
}

/// Raw expression text split into selector strings and grouping keys.
///
/// Selectors are validated as `key=value`; grouping keys keep their first
/// occurrence only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExpressionSyntax {
    pub selectors: Vec<Tag>,
    pub group_keys: Vec<String>,
}

impl ExpressionSyntax {
    pub fn parse(expr: &str) -> Result<Self> {
        let caps = expression_regex()?
            .captures(expr.trim())
            .ok_or_else(|| TagDbError::Parse(format!("malformed expression {:?}", expr)))?;

        let selectors = caps
            .name("selectors")
            .map(|m| m.as_str())
            .unwrap_or_default();
        let selectors = split_items(selectors, "selector", expr)?
            .into_iter()
            .map(Tag::parse)
            .collect::<Result<Vec<_>>>()?;

        let mut group_keys: Vec<String> = Vec::new();
        if let Some(groupings) = caps.name("groupings") {
            for key in split_items(groupings.as_str(), "grouping", expr)? {
                if !group_keys.iter().any(|k| k == key) {
                    group_keys.push(key.to_string());
                }
            }
        }

        Ok(Self {
            selectors,
            group_keys,
        })
    }
}

fn split_items<'a>(list: &'a str, what: &str, expr: &str) -> Result<Vec<&'a str>> {
    list.split(',')
        .map(str::trim)
        .map(|item| {
            if item.is_empty() {
                Err(TagDbError::Parse(format!("empty {} in {:?}", what, expr)))
            } else {
                Ok(item)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selectors_only() {
        let syntax = ExpressionSyntax::parse("{project=web,env=prod}").unwrap();
        assert_eq!(
            syntax.selectors,
            vec![Tag::new("project", "web"), Tag::new("env", "prod")]
        );
        assert!(syntax.group_keys.is_empty());
    }

    #[test]
    fn test_parse_with_groupings() {
        let syntax = ExpressionSyntax::parse("{project=web}[hostname, dc,hostname]").unwrap();
        assert_eq!(syntax.selectors, vec![Tag::new("project", "web")]);
        assert_eq!(syntax.group_keys, vec!["hostname", "dc"]);
    }

    #[test]
    fn test_selector_value_may_contain_equals() {
        let syntax = ExpressionSyntax::parse("{query=a=b}").unwrap();
        assert_eq!(syntax.selectors, vec![Tag::new("query", "a=b")]);
    }

    #[test]
    fn test_malformed_expressions() {
        for bad in [
            "",
            "project=web",
            "{project=web",
            "{}",
            "{project}",
            "{project=web,}",
            "{a=b}[]",
            "{a=b}[x,,y]",
            "{a=b}[x]extra",
            "{a={b}}",
        ] {
            let err = ExpressionSyntax::parse(bad).unwrap_err();
            assert!(err.is_parse(), "{:?} should be a parse error", bad);
        }
    }
}

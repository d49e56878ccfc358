//! Search patterns of derived OAI sets
//!
//! A small boolean query language: `field:value` terms (dotted field paths,
//! quoted values, trailing `*` wildcard), `AND`/`OR`/`NOT`, parentheses and
//! implicit AND between adjacent terms.

use crate::errors::{AppError, Result};
use serde_json::{json, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Term { field: String, value: String },
    And(Box<Query>, Box<Query>),
    Or(Box<Query>, Box<Query>),
    Not(Box<Query>),
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let query = parser.or()?;
        if parser.pos != parser.tokens.len() {
            return Err(invalid(input, "unexpected trailing input"));
        }
        Ok(query)
    }

    /// Evaluate against record JSON
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Query::Term { field, value } => {
                let mut found = Vec::new();
                collect(record, &field.split('.').collect::<Vec<_>>(), &mut found);
                found.iter().any(|candidate| value_matches(value, candidate))
            }
            Query::And(a, b) => a.matches(record) && b.matches(record),
            Query::Or(a, b) => a.matches(record) || b.matches(record),
            Query::Not(q) => !q.matches(record),
        }
    }

    /// Lower to the search backend's boolean DSL
    pub fn to_dsl(&self) -> Value {
        match self {
            Query::Term { field, value } => match value.strip_suffix('*') {
                Some(prefix) => json!({"prefix": {field: prefix}}),
                None => json!({"term": {field: value}}),
            },
            Query::And(a, b) => json!({"bool": {"must": [a.to_dsl(), b.to_dsl()]}}),
            Query::Or(a, b) => json!({"bool": {"should": [a.to_dsl(), b.to_dsl()], "minimum_should_match": 1}}),
            Query::Not(q) => json!({"bool": {"must_not": [q.to_dsl()]}}),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Term { field, value } if value.contains(char::is_whitespace) => {
                write!(f, "{}:\"{}\"", field, value)
            }
            Query::Term { field, value } => write!(f, "{}:{}", field, value),
            Query::And(a, b) => write!(f, "({} AND {})", a, b),
            Query::Or(a, b) => write!(f, "({} OR {})", a, b),
            Query::Not(q) => write!(f, "NOT {}", q),
        }
    }
}

fn value_matches(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => candidate.starts_with(prefix),
        None => candidate == pattern,
    }
}

fn collect<'a>(value: &'a Value, path: &[&str], out: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect(item, path, out)),
        _ if path.is_empty() => match value {
            Value::String(s) => out.push(s.clone()),
            Value::Number(n) => out.push(n.to_string()),
            Value::Bool(b) => out.push(b.to_string()),
            _ => {}
        },
        Value::Object(obj) => {
            if let Some(next) = obj.get(path[0]) {
                collect(next, &path[1..], out);
            }
        }
        _ => {}
    }
}

fn invalid(input: &str, reason: &str) -> AppError {
    AppError::Validation {
        message: format!("Invalid search pattern '{}': {}", input, reason),
        field: Some("search_pattern".into()),
    }
}

// ============================================================================
// Tokenizer & parser
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    Not,
    Term(String, String),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Not);
            }
            _ => {
                let mut word = String::new();
                let mut value: Option<String> = None;
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' {
                        break;
                    }
                    chars.next();
                    match (&mut value, c) {
                        (None, ':') => value = Some(String::new()),
                        (Some(v), '"') if v.is_empty() => {
                            for c in chars.by_ref() {
                                if c == '"' {
                                    break;
                                }
                                v.push(c);
                            }
                            if v.is_empty() {
                                return Err(invalid(input, "empty quoted value"));
                            }
                        }
                        (Some(v), c) => v.push(c),
                        (None, c) => word.push(c),
                    }
                }

                match (word.as_str(), value) {
                    ("AND", None) => tokens.push(Token::And),
                    ("OR", None) => tokens.push(Token::Or),
                    ("NOT", None) => tokens.push(Token::Not),
                    (field, Some(value)) if !field.is_empty() && !value.is_empty() => {
                        tokens.push(Token::Term(field.to_string(), value))
                    }
                    _ => return Err(invalid(input, &format!("expected field:value, got '{}'", word))),
                }
            }
        }
    }

    if tokens.is_empty() {
        return Err(invalid(input, "empty pattern"));
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn error(&self, reason: &str) -> AppError {
        AppError::Validation {
            message: format!("Invalid search pattern at token {}: {}", self.pos, reason),
            field: Some("search_pattern".into()),
        }
    }

    fn or(&mut self) -> Result<Query> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and()?;
            left = Query::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Query> {
        let mut left = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.pos += 1;
                }
                Some(Token::Term(..)) | Some(Token::Open) | Some(Token::Not) => {}
                _ => return Ok(left),
            }
            let right = self.unary()?;
            left = Query::And(Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Query> {
        match self.peek().cloned() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Query::Not(Box::new(self.unary()?)))
            }
            Some(Token::Open) => {
                self.pos += 1;
                let inner = self.or()?;
                if self.peek() != Some(&Token::Close) {
                    return Err(self.error("missing closing parenthesis"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(Token::Term(field, value)) => {
                self.pos += 1;
                Ok(Query::Term { field, value })
            }
            _ => Err(self.error("expected a term")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_precedence() {
        let q = Query::parse("a:1 OR b:2 AND NOT c:3").unwrap();
        assert_eq!(
            q,
            Query::Or(
                Box::new(Query::term("a", "1")),
                Box::new(Query::And(
                    Box::new(Query::term("b", "2")),
                    Box::new(Query::Not(Box::new(Query::term("c", "3"))))
                ))
            )
        );
    }

    #[test]
    fn test_parse_grouping_quotes_and_implicit_and() {
        let q = Query::parse(r#"(communities:c1 OR communities:c2) title:"open data" -access_right:closed"#)
            .unwrap();
        assert_eq!(
            q.to_string(),
            r#"(((communities:c1 OR communities:c2) AND title:"open data") AND NOT access_right:closed)"#
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(Query::parse("").is_err());
        assert!(Query::parse("(a:1").is_err());
        assert!(Query::parse("justaword").is_err());
        assert!(Query::parse("a:1 OR").is_err());
    }

    #[test]
    fn test_matches_paths_lists_and_wildcards() {
        let record = serde_json::json!({
            "communities": ["c1", "ecfunded"],
            "resource_type": {"type": "publication", "subtype": "article"},
            "grants": [{"funder": {"acronym": "EC"}}],
            "recid": 12
        });

        assert!(Query::parse("communities:c1").unwrap().matches(&record));
        assert!(Query::parse("resource_type.type:publication AND grants.funder.acronym:EC")
            .unwrap()
            .matches(&record));
        assert!(Query::parse("resource_type.subtype:art*").unwrap().matches(&record));
        assert!(Query::parse("recid:12").unwrap().matches(&record));
        assert!(!Query::parse("NOT communities:ecfunded").unwrap().matches(&record));
        assert!(!Query::parse("communities:c2").unwrap().matches(&record));
    }

    #[test]
    fn test_to_dsl() {
        let dsl = Query::parse("a:1 AND NOT b:x*").unwrap().to_dsl();
        assert_eq!(
            dsl,
            serde_json::json!({"bool": {"must": [
                {"term": {"a": "1"}},
                {"bool": {"must_not": [{"prefix": {"b": "x"}}]}}
            ]}})
        );
    }
}

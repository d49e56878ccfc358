//! Per-file access rules
//!
//! A firerole is a newline separated list of rules evaluated top to bottom;
//! the first rule that applies decides. Nothing applying means deny.
//!
//! ```text
//! firerole: allow email "owner@example.org"
//! deny until "2099-01-01"
//! allow any
//! ```

use crate::errors::{AppError, Result};
use chrono::NaiveDate;
use std::fmt;

pub const FIREROLE_PREFIX: &str = "firerole: ";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    AllowAny,
    DenyAll,
    AllowEmail(String),
    /// Deny everyone reaching this rule before the date
    DenyUntil(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firerole {
    rules: Vec<Rule>,
}

impl Firerole {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Rules for the files of a record with the given access right
    pub fn for_access(access_right: &str, owner_email: &str, embargo_date: Option<NaiveDate>) -> Self {
        let owner = Rule::AllowEmail(owner_email.to_string());
        let rules = match (access_right, embargo_date) {
            ("open", _) => vec![Rule::AllowAny],
            ("embargoed", Some(until)) => vec![owner, Rule::DenyUntil(until), Rule::AllowAny],
            // embargoed without a date stays closed
            _ => vec![owner, Rule::DenyAll],
        };
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn parse(text: &str) -> Result<Self> {
        let body = text.strip_prefix(FIREROLE_PREFIX).ok_or_else(|| invalid(text))?;
        let rules = body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(parse_rule)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Whether a visitor (anonymous when `email` is `None`) may read on `today`
    pub fn allows(&self, email: Option<&str>, today: NaiveDate) -> bool {
        for rule in &self.rules {
            match rule {
                Rule::AllowAny => return true,
                Rule::DenyAll => return false,
                Rule::AllowEmail(allowed) => {
                    if email.is_some_and(|e| e.eq_ignore_ascii_case(allowed)) {
                        return true;
                    }
                }
                Rule::DenyUntil(until) => {
                    if today < *until {
                        return false;
                    }
                }
            }
        }
        false
    }
}

fn invalid(text: &str) -> AppError {
    AppError::InvalidFormat {
        message: format!("Invalid firerole: {}", text),
    }
}

fn quoted(text: &str) -> Option<&str> {
    text.trim().strip_prefix('"')?.strip_suffix('"')
}

fn parse_rule(line: &str) -> Result<Rule> {
    match line {
        "allow any" => return Ok(Rule::AllowAny),
        "deny all" => return Ok(Rule::DenyAll),
        _ => {}
    }
    if let Some(email) = line.strip_prefix("allow email ").and_then(quoted) {
        return Ok(Rule::AllowEmail(email.to_string()));
    }
    if let Some(date) = line.strip_prefix("deny until ").and_then(quoted) {
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| invalid(line))?;
        return Ok(Rule::DenyUntil(date));
    }
    Err(invalid(line))
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::AllowAny => f.write_str("allow any"),
            Rule::DenyAll => f.write_str("deny all"),
            Rule::AllowEmail(email) => write!(f, "allow email \"{}\"", email),
            Rule::DenyUntil(date) => write!(f, "deny until \"{}\"", date.format(DATE_FORMAT)),
        }
    }
}

impl fmt::Display for Firerole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules: Vec<String> = self.rules.iter().map(ToString::to_string).collect();
        write!(f, "{}{}", FIREROLE_PREFIX, rules.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_rendering() {
        assert_eq!(Firerole::for_access("open", "a@b.c", None).to_string(), "firerole: allow any");
        assert_eq!(
            Firerole::for_access("embargoed", "a@b.c", Some(date("2099-01-01"))).to_string(),
            "firerole: allow email \"a@b.c\"\ndeny until \"2099-01-01\"\nallow any"
        );
        assert_eq!(
            Firerole::for_access("restricted", "a@b.c", None).to_string(),
            "firerole: allow email \"a@b.c\"\ndeny all"
        );
        assert_eq!(
            Firerole::for_access("closed", "a@b.c", None).to_string(),
            Firerole::for_access("restricted", "a@b.c", None).to_string()
        );
    }

    #[test]
    fn test_parse_and_evaluate() {
        let text = "firerole: allow email \"owner@x.org\"\ndeny until \"2099-01-01\"\nallow any";
        let role = Firerole::parse(text).unwrap();
        assert_eq!(role.to_string(), text);

        assert!(!role.allows(None, date("2024-05-01")));
        assert!(role.allows(Some("owner@x.org"), date("2024-05-01")));
        assert!(!role.allows(Some("other@x.org"), date("2024-05-01")));
        assert!(role.allows(None, date("2099-01-01")));

        let closed = Firerole::parse("firerole: allow email \"owner@x.org\"\ndeny all").unwrap();
        assert!(!closed.allows(None, date("2200-01-01")));
        assert!(closed.allows(Some("OWNER@x.org"), date("2200-01-01")));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Firerole::parse("allow any").is_err());
        assert!(Firerole::parse("firerole: allow everybody").is_err());
        assert!(Firerole::parse("firerole: deny until \"soon\"").is_err());
    }
}

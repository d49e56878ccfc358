//! Type checks and field rules applied by the validation pass

use super::identifiers::{detect_scheme, is_doi};
use super::{FieldDescriptor, Mode, Rule, ValidationContext, ValidationResult, ValueType, RELATIONS};
use chrono::NaiveDate;
use serde_json::{Map, Value};
use validator::ValidateUrl;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub const INVALID_DATE: &str = "Invalid date format, expected YYYY-MM-DD.";
pub const INVALID_DOI: &str = "The provided DOI is invalid - it should look similar to '10.1234/foo.bar'.";
pub const PRERESERVED_DOI: &str =
    "You are not allowed to edit a pre-reserved DOI. Click the Pre-reserve DOI button to resolve the problem.";

const KEYWORD_SEPARATORS: &[char] = &[';', ','];

pub(super) fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

/// Check the value's shape; returns false when rules should be skipped
pub(super) fn check_type(field: &FieldDescriptor, value: &Value, result: &mut ValidationResult) -> bool {
    let name = field.name;

    match field.value_type {
        ValueType::Text => match value {
            Value::String(_) => true,
            _ => {
                result.error(name, "Not a valid string.");
                false
            }
        },
        ValueType::Date => match value.as_str().and_then(parse_date) {
            Some(_) => true,
            None => {
                result.error(name, INVALID_DATE);
                false
            }
        },
        ValueType::Url => match value.as_str() {
            Some(url) if url.validate_url() => true,
            _ => {
                result.error(name, "Not a valid URL.");
                false
            }
        },
        ValueType::Choice(choices) => match value.as_str() {
            Some(v) if choices.contains(&v) => true,
            _ => {
                result.error(name, "Not a valid choice.");
                false
            }
        },
        ValueType::Strings => match value.as_array() {
            Some(items) if items.iter().all(Value::is_string) => true,
            _ => {
                result.error(name, "Not a valid list of strings.");
                false
            }
        },
        ValueType::Persons => {
            let Some(items) = value.as_array() else {
                result.error(name, "Not a valid list.");
                return false;
            };
            let mut ok = true;
            for (i, item) in items.iter().enumerate() {
                let valid = item
                    .as_object()
                    .map(|o| o.get("name").map(|n| n.is_string() || n.is_null()).unwrap_or(true))
                    .unwrap_or(false);
                if !valid {
                    result.error(format!("{}.{}", name, i), "Not a valid person.");
                    ok = false;
                }
            }
            ok
        }
        ValueType::Identifiers => {
            let Some(items) = value.as_array() else {
                result.error(name, "Not a valid list.");
                return false;
            };
            let mut ok = true;
            for (i, item) in items.iter().enumerate() {
                let Some(obj) = item.as_object() else {
                    result.error(format!("{}.{}", name, i), "Not a valid identifier.");
                    ok = false;
                    continue;
                };
                let relation = obj.get("relation").and_then(Value::as_str).unwrap_or("");
                if !RELATIONS.contains(&relation) {
                    result.error(format!("{}.{}.relation", name, i), "Not a valid choice.");
                    ok = false;
                }
            }
            ok
        }
        ValueType::References(key) => {
            let valid = value
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .all(|item| item.get(key).map(Value::is_string).unwrap_or(false))
                })
                .unwrap_or(false);
            if !valid {
                result.error(name, format!("Each entry requires a string '{}'.", key));
            }
            valid
        }
    }
}

pub(super) fn apply(
    rule: Rule,
    name: &str,
    draft: &mut Map<String, Value>,
    ctx: &ValidationContext<'_>,
    result: &mut ValidationResult,
) {
    match rule {
        Rule::FutureDate => {
            let date = draft.get(name).and_then(Value::as_str).and_then(parse_date);
            if matches!(date, Some(d) if d <= ctx.today) {
                result.error(name, "Embargo date must be in the future.");
            }
        }
        Rule::Doi => {
            if let Some(doi) = draft.get(name).and_then(Value::as_str) {
                check_doi(name, doi, ctx, result);
            }
        }
        Rule::PersonName => {
            for_each_person(name, draft, |i, person| {
                let key = format!("{}.{}.name", name, i);
                let person_name = person.get("name").and_then(Value::as_str).unwrap_or("").trim();
                if person_name.is_empty() {
                    result.error(key, super::REQUIRED_MESSAGE);
                } else if !person_name.contains(',') {
                    result.error(key, "Name must be in the format \"Family name, Given names\".");
                } else if person_name == person_name.to_uppercase() {
                    result.warning(key, "Name is all uppercase, please correct it.");
                } else if person_name == person_name.to_lowercase() {
                    result.warning(key, "Name is all lowercase, please correct it.");
                }
            });
        }
        Rule::PersonAffiliation => {
            for_each_person(name, draft, |i, person| {
                let blank = person
                    .get("affiliation")
                    .and_then(Value::as_str)
                    .map(|a| a.trim().is_empty())
                    .unwrap_or(true);
                if blank {
                    result.warning(
                        format!("{}.{}.affiliation", name, i),
                        "Affiliation is missing, please add it if possible.",
                    );
                }
            });
        }
        Rule::KeywordLine => {
            if let Some(items) = draft.get(name).and_then(Value::as_array) {
                for (i, keyword) in items.iter().enumerate() {
                    if keyword.as_str().map(|k| k.contains(KEYWORD_SEPARATORS)).unwrap_or(false) {
                        result.warning(
                            format!("{}.{}", name, i),
                            "Keywords should be given one per line, not separated by ';' or ','.",
                        );
                    }
                }
            }
        }
        Rule::DetectScheme => {
            let Some(items) = draft.get_mut(name).and_then(Value::as_array_mut) else {
                return;
            };
            for (i, item) in items.iter_mut().enumerate() {
                let Some(obj) = item.as_object_mut() else { continue };
                let identifier = obj.get("identifier").and_then(Value::as_str).unwrap_or("").to_string();
                match detect_scheme(&identifier) {
                    Some(scheme) => {
                        obj.insert("scheme".to_string(), Value::String(scheme.to_string()));
                    }
                    None => {
                        obj.remove("scheme");
                        result.error(
                            format!("{}.{}.identifier", name, i),
                            "Not a valid persistent identifier. Identifier is required.",
                        );
                    }
                }
            }
        }
        Rule::CommunityExists => {
            for id in referenced_ids(draft, name, "identifier") {
                if !ctx.communities.contains(&id) {
                    let message = match ctx.mode {
                        Mode::Save => format!("Invalid community identifier: {}", id),
                        Mode::Publish => format!("Provided community does not exist: {}", id),
                    };
                    result.error(name, message);
                }
            }
        }
        Rule::GrantExists => {
            for id in referenced_ids(draft, name, "id") {
                if !ctx.grants.contains(&id) {
                    result.error(name, format!("Invalid grant identifier: {}", id));
                }
            }
        }
    }
}

fn check_doi(name: &str, doi: &str, ctx: &ValidationContext<'_>, result: &mut ValidationResult) {
    if !is_doi(doi) {
        result.error(name, INVALID_DOI);
        return;
    }

    let prefix = doi.split('/').next().unwrap_or_default();
    if prefix == ctx.site.test_prefix {
        result.error(name, format!("The prefix {} is invalid.", prefix));
        return;
    }

    if !ctx.site.is_local_doi(doi) || ctx.prereserved_doi == Some(doi) {
        return;
    }

    let message = if ctx.prereserved_doi.is_some() {
        PRERESERVED_DOI.to_string()
    } else {
        format!("The prefix {} is administrated locally.", prefix)
    };
    result.error(name, message.clone());
    result.invalid_local_doi = Some(message);
}

fn for_each_person(name: &str, draft: &Map<String, Value>, mut f: impl FnMut(usize, &Map<String, Value>)) {
    if let Some(items) = draft.get(name).and_then(Value::as_array) {
        for (i, item) in items.iter().enumerate() {
            if let Some(person) = item.as_object() {
                f(i, person);
            }
        }
    }
}

fn referenced_ids(draft: &Map<String, Value>, name: &str, key: &str) -> Vec<String> {
    draft
        .get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(key).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert!(parse_date("2013-05-08").is_some());
        assert!(parse_date("2013-13-08").is_none());
        assert!(parse_date("08/05/2013").is_none());
    }
}

//! Metadata validators and filters for the legacy deposition form
//!
//! Provides:
//! - An explicit field descriptor table (type, requirements, rules, filters)
//! - A single validation pass returning per-field errors and warnings
//! - Scheme detection and DOI normalisation helpers
//!
//! The pass mutates the draft: filters normalise values, drop blank list
//! entries and fields forbidden by the current access right, and related
//! identifier schemes are overwritten with the detected value.

pub mod identifiers;
mod rules;

use crate::config::SiteConfig;
use crate::errors::{AppError, FieldErrors, Result};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::LazyLock;

pub const REQUIRED_MESSAGE: &str = "Field is required.";

pub const UPLOAD_TYPES: &[&str] = &[
    "publication",
    "poster",
    "presentation",
    "dataset",
    "image",
    "video",
    "software",
    "lesson",
    "physicalobject",
    "other",
];

pub const PUBLICATION_TYPES: &[&str] = &[
    "annotationcollection",
    "book",
    "section",
    "conferencepaper",
    "datamanagementplan",
    "article",
    "patent",
    "preprint",
    "deliverable",
    "milestone",
    "proposal",
    "report",
    "softwaredocumentation",
    "taxonomictreatment",
    "technicalnote",
    "thesis",
    "workingpaper",
    "other",
];

pub const IMAGE_TYPES: &[&str] = &["figure", "plot", "drawing", "diagram", "photo", "other"];

pub const ACCESS_RIGHTS: &[&str] = &["open", "embargoed", "restricted", "closed"];

pub const RELATIONS: &[&str] = &[
    "isCitedBy",
    "cites",
    "isSupplementTo",
    "isSupplementedBy",
    "isContinuedBy",
    "continues",
    "isNewVersionOf",
    "isPreviousVersionOf",
    "isPartOf",
    "hasPart",
    "isReferencedBy",
    "references",
    "isDocumentedBy",
    "documents",
    "isCompiledBy",
    "compiles",
    "isVariantFormOf",
    "isOriginalFormOf",
    "isIdenticalTo",
    "isAlternateIdentifier",
    "isAlternativeIdentifier",
    "isReviewedBy",
    "reviews",
    "isDerivedFrom",
    "isSourceOf",
    "requires",
    "isRequiredBy",
];

// ============================================================================
// Schema descriptor
// ============================================================================

/// Shape of a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Text,
    Date,
    Url,
    Choice(&'static [&'static str]),
    /// List of `{name, affiliation, ...}` objects
    Persons,
    /// List of strings (one entry per line in the form)
    Strings,
    /// List of `{identifier, relation, scheme?}` objects
    Identifiers,
    /// List of objects referencing a knowledge base entry by the given key
    References(&'static str),
}

/// Field-specific checks run after type checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    FutureDate,
    Doi,
    PersonName,
    PersonAffiliation,
    KeywordLine,
    DetectScheme,
    CommunityExists,
    GrantExists,
}

/// Normalisation applied before the checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Trim,
    StripDoi,
    SplitLines,
    /// Drop list entries where every listed key is blank
    DropBlank(&'static [&'static str]),
}

/// `field` takes any of `values`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition {
    pub field: &'static str,
    pub values: &'static [&'static str],
}

impl Condition {
    pub fn holds(&self, draft: &Map<String, Value>) -> bool {
        draft
            .get(self.field)
            .and_then(|v| v.as_str())
            .map(|v| self.values.contains(&v))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub value_type: ValueType,
    pub required: bool,
    pub required_if: Option<Condition>,
    pub forbidden_unless: Option<Condition>,
    pub rules: Vec<Rule>,
    pub filters: Vec<Filter>,
}

impl FieldDescriptor {
    fn new(name: &'static str, value_type: ValueType) -> Self {
        let filters = match value_type {
            ValueType::Text | ValueType::Date | ValueType::Url | ValueType::Choice(_) => vec![Filter::Trim],
            _ => Vec::new(),
        };
        Self {
            name,
            value_type,
            required: false,
            required_if: None,
            forbidden_unless: None,
            rules: Vec::new(),
            filters,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn required_if(mut self, field: &'static str, values: &'static [&'static str]) -> Self {
        self.required_if = Some(Condition { field, values });
        self
    }

    fn forbidden_unless(mut self, field: &'static str, values: &'static [&'static str]) -> Self {
        self.forbidden_unless = Some(Condition { field, values });
        self
    }

    fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

const PERSON_KEYS: &[&str] = &["name", "affiliation"];

static SCHEMA: LazyLock<Vec<FieldDescriptor>> = LazyLock::new(|| {
    use ValueType::*;

    vec![
        FieldDescriptor::new("upload_type", Choice(UPLOAD_TYPES)).required(),
        FieldDescriptor::new("publication_type", Choice(PUBLICATION_TYPES))
            .required_if("upload_type", &["publication"])
            .forbidden_unless("upload_type", &["publication"]),
        FieldDescriptor::new("image_type", Choice(IMAGE_TYPES))
            .required_if("upload_type", &["image"])
            .forbidden_unless("upload_type", &["image"]),
        FieldDescriptor::new("publication_date", Date).required(),
        FieldDescriptor::new("title", Text).required(),
        FieldDescriptor::new("creators", Persons)
            .required()
            .filter(Filter::DropBlank(PERSON_KEYS))
            .rule(Rule::PersonName)
            .rule(Rule::PersonAffiliation),
        FieldDescriptor::new("description", Text).required(),
        FieldDescriptor::new("access_right", Choice(ACCESS_RIGHTS)).required(),
        FieldDescriptor::new("embargo_date", Date)
            .required_if("access_right", &["embargoed"])
            .forbidden_unless("access_right", &["embargoed"])
            .rule(Rule::FutureDate),
        FieldDescriptor::new("access_conditions", Text)
            .required_if("access_right", &["restricted"])
            .forbidden_unless("access_right", &["restricted"]),
        FieldDescriptor::new("license", Text).required_if("access_right", &["open", "embargoed"]),
        FieldDescriptor::new("doi", Text).filter(Filter::StripDoi).rule(Rule::Doi),
        FieldDescriptor::new("keywords", Strings)
            .filter(Filter::SplitLines)
            .filter(Filter::DropBlank(&[]))
            .rule(Rule::KeywordLine),
        FieldDescriptor::new("notes", Text),
        FieldDescriptor::new("related_identifiers", Identifiers)
            .filter(Filter::DropBlank(&["identifier"]))
            .rule(Rule::DetectScheme),
        FieldDescriptor::new("contributors", Persons)
            .filter(Filter::DropBlank(PERSON_KEYS))
            .rule(Rule::PersonName),
        FieldDescriptor::new("references", Strings)
            .filter(Filter::SplitLines)
            .filter(Filter::DropBlank(&[])),
        FieldDescriptor::new("communities", References("identifier"))
            .filter(Filter::DropBlank(&["identifier"]))
            .rule(Rule::CommunityExists),
        FieldDescriptor::new("grants", References("id"))
            .filter(Filter::DropBlank(&["id"]))
            .rule(Rule::GrantExists),
        FieldDescriptor::new("journal_title", Text),
        FieldDescriptor::new("journal_volume", Text),
        FieldDescriptor::new("journal_issue", Text),
        FieldDescriptor::new("journal_pages", Text),
        FieldDescriptor::new("conference_title", Text),
        FieldDescriptor::new("conference_acronym", Text),
        FieldDescriptor::new("conference_dates", Text),
        FieldDescriptor::new("conference_place", Text),
        FieldDescriptor::new("conference_url", Url),
        FieldDescriptor::new("conference_session", Text),
        FieldDescriptor::new("conference_session_part", Text),
        FieldDescriptor::new("imprint_publisher", Text),
        FieldDescriptor::new("imprint_isbn", Text),
        FieldDescriptor::new("imprint_place", Text),
        FieldDescriptor::new("partof_title", Text),
        FieldDescriptor::new("partof_pages", Text),
        FieldDescriptor::new("thesis_supervisors", Persons)
            .filter(Filter::DropBlank(PERSON_KEYS))
            .rule(Rule::PersonName),
        FieldDescriptor::new("thesis_university", Text),
        FieldDescriptor::new("version", Text),
        FieldDescriptor::new("language", Text),
    ]
});

/// The field table, resolved once
pub fn schema() -> &'static [FieldDescriptor] {
    &SCHEMA
}

// ============================================================================
// Validation
// ============================================================================

/// Which checks apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Saving a draft: only fields present are checked
    Save,
    /// Publishing: requirements are enforced and references re-resolved
    Publish,
}

/// Everything the checks need besides the draft
pub struct ValidationContext<'a> {
    pub site: &'a SiteConfig,
    /// Local DOI the deposition is allowed to carry (pre-reserved or already minted)
    pub prereserved_doi: Option<&'a str>,
    /// Known community identifiers among those referenced by the draft
    pub communities: &'a HashSet<String>,
    /// Known grant identifiers among those referenced by the draft
    pub grants: &'a HashSet<String>,
    pub today: NaiveDate,
    pub mode: Mode,
}

/// Outcome of a validation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub errors: FieldErrors,
    pub warnings: FieldErrors,
    /// Set when the DOI uses the local prefix without being allowed to
    #[serde(skip)]
    pub invalid_local_doi: Option<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_default().push(message.into());
    }

    pub fn warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.entry(field.into()).or_default().push(message.into());
    }

    /// Convert to the error surfaced at the pipeline boundary
    pub fn into_result(self) -> Result<()> {
        if let Some(message) = self.invalid_local_doi {
            return Err(AppError::InvalidLocalDoi { message });
        }
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::InvalidFields { errors: self.errors })
        }
    }
}

/// Whether a JSON value is blank (null, empty/whitespace string, empty list/object)
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty() || a.iter().all(is_blank),
        Value::Object(o) => o.is_empty() || o.values().all(is_blank),
        _ => false,
    }
}

/// Run the validation pass over a legacy draft
pub fn validate(draft: &mut Value, ctx: &ValidationContext<'_>) -> ValidationResult {
    let mut result = ValidationResult::default();

    let Some(map) = draft.as_object_mut() else {
        result.error("metadata", "Metadata must be an object.");
        return result;
    };

    for field in schema() {
        apply_filters(map, field);
    }

    // Drop fields the access right (or upload type) rules out
    for field in schema() {
        if let Some(condition) = field.forbidden_unless {
            if !condition.holds(map) {
                map.remove(field.name);
            }
        }
    }

    for field in schema() {
        let value = map.get(field.name).cloned();
        let blank = value.as_ref().map(is_blank).unwrap_or(true);

        let required = field.required || field.required_if.map(|c| c.holds(map)).unwrap_or(false);

        if blank {
            if ctx.mode == Mode::Publish && required {
                result.error(field.name, REQUIRED_MESSAGE);
            }
            continue;
        }

        let Some(value) = value else { continue };
        if !rules::check_type(field, &value, &mut result) {
            continue;
        }

        for rule in &field.rules {
            rules::apply(*rule, field.name, map, ctx, &mut result);
        }
    }

    result
}

fn apply_filters(map: &mut Map<String, Value>, field: &FieldDescriptor) {
    let Some(value) = map.get_mut(field.name) else {
        return;
    };

    for filter in &field.filters {
        match filter {
            Filter::Trim => {
                if let Value::String(s) = value {
                    *s = s.trim().to_string();
                }
            }
            Filter::StripDoi => {
                if let Value::String(s) = value {
                    *s = identifiers::normalize_doi(s);
                }
            }
            Filter::SplitLines => {
                if let Value::String(s) = value {
                    let lines = s
                        .lines()
                        .map(|l| Value::String(l.trim().to_string()))
                        .collect();
                    *value = Value::Array(lines);
                }
            }
            Filter::DropBlank(keys) => {
                if let Value::Array(items) = value {
                    items.retain(|item| !entry_is_blank(item, keys));
                    for item in items.iter_mut() {
                        trim_strings(item);
                    }
                }
            }
        }
    }

    if is_blank(value) {
        map.remove(field.name);
    }
}

fn entry_is_blank(item: &Value, keys: &[&str]) -> bool {
    match item {
        Value::Object(obj) if !keys.is_empty() => keys
            .iter()
            .all(|k| obj.get(*k).map(is_blank).unwrap_or(true)),
        other => is_blank(other),
    }
}

fn trim_strings(value: &mut Value) {
    match value {
        Value::String(s) => *s = s.trim().to_string(),
        Value::Object(obj) => obj.values_mut().for_each(trim_strings),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixture {
        site: SiteConfig,
        communities: HashSet<String>,
        grants: HashSet<String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                site: SiteConfig::default(),
                communities: ["c1".to_string()].into_iter().collect(),
                grants: ["10.13039/501100000780::283595".to_string()].into_iter().collect(),
            }
        }

        fn ctx(&self, mode: Mode, prereserved: Option<&'static str>) -> ValidationContext<'_> {
            ValidationContext {
                site: &self.site,
                prereserved_doi: prereserved,
                communities: &self.communities,
                grants: &self.grants,
                today: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                mode,
            }
        }
    }

    fn minimal() -> Value {
        json!({
            "title": "  Test title ",
            "creators": [{"name": "Doe, John", "affiliation": "Atlantis"}],
            "description": "Test",
            "publication_date": "2013-05-08",
            "upload_type": "presentation",
            "access_right": "open",
            "license": "cc-by"
        })
    }

    #[test]
    fn test_minimal_publishable() {
        let fx = Fixture::new();
        let mut draft = minimal();
        let result = validate(&mut draft, &fx.ctx(Mode::Publish, None));

        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(draft["title"], "Test title");
    }

    #[test]
    fn test_required_fields_on_publish_only() {
        let fx = Fixture::new();

        let mut draft = json!({"title": " "});
        let result = validate(&mut draft, &fx.ctx(Mode::Publish, None));
        for field in ["title", "creators", "description", "publication_date", "access_right", "upload_type"] {
            assert_eq!(result.errors[field], vec![REQUIRED_MESSAGE.to_string()], "{}", field);
        }

        let mut draft = json!({"title": " "});
        assert!(validate(&mut draft, &fx.ctx(Mode::Save, None)).is_valid());
    }

    #[test]
    fn test_conditional_requirements() {
        let fx = Fixture::new();

        let mut draft = minimal();
        draft["upload_type"] = json!("publication");
        draft["access_right"] = json!("embargoed");
        let result = validate(&mut draft, &fx.ctx(Mode::Publish, None));
        assert!(result.errors.contains_key("publication_type"));
        assert!(result.errors.contains_key("embargo_date"));

        let mut draft = minimal();
        draft["access_right"] = json!("closed");
        draft.as_object_mut().unwrap().remove("license");
        assert!(validate(&mut draft, &fx.ctx(Mode::Publish, None)).is_valid());
    }

    #[test]
    fn test_open_access_clears_embargo() {
        let fx = Fixture::new();
        let mut draft = minimal();
        draft["embargo_date"] = json!("2099-01-01");
        draft["access_conditions"] = json!("ask");

        assert!(validate(&mut draft, &fx.ctx(Mode::Publish, None)).is_valid());
        assert!(draft.get("embargo_date").is_none());
        assert!(draft.get("access_conditions").is_none());
    }

    #[test]
    fn test_embargo_dates() {
        let fx = Fixture::new();

        let mut draft = minimal();
        draft["access_right"] = json!("embargoed");
        draft["embargo_date"] = json!("2020-01-01");
        let result = validate(&mut draft, &fx.ctx(Mode::Publish, None));
        assert_eq!(result.errors["embargo_date"], vec!["Embargo date must be in the future."]);

        draft["embargo_date"] = json!("01/01/2099");
        let result = validate(&mut draft, &fx.ctx(Mode::Publish, None));
        assert_eq!(
            result.errors["embargo_date"],
            vec!["Invalid date format, expected YYYY-MM-DD."]
        );
    }

    #[test]
    fn test_doi_rules() {
        let fx = Fixture::new();

        let mut draft = minimal();
        draft["doi"] = json!("not-a-doi");
        let result = validate(&mut draft, &fx.ctx(Mode::Publish, None));
        assert_eq!(
            result.errors["doi"],
            vec!["The provided DOI is invalid - it should look similar to '10.1234/foo.bar'."]
        );

        draft["doi"] = json!("10.5072/zenodo.1");
        let result = validate(&mut draft, &fx.ctx(Mode::Publish, None));
        assert_eq!(result.errors["doi"], vec!["The prefix 10.5072 is invalid."]);

        draft["doi"] = json!("10.5281/zenodo.99");
        let result = validate(&mut draft, &fx.ctx(Mode::Publish, None));
        assert_eq!(result.errors["doi"], vec!["The prefix 10.5281 is administrated locally."]);
        assert!(matches!(result.into_result(), Err(AppError::InvalidLocalDoi { .. })));

        let mut draft = minimal();
        draft["doi"] = json!("10.5281/zenodo.99");
        let result = validate(&mut draft, &fx.ctx(Mode::Publish, Some("10.5281/zenodo.12")));
        assert_eq!(
            result.errors["doi"],
            vec!["You are not allowed to edit a pre-reserved DOI. Click the Pre-reserve DOI button to resolve the problem."]
        );

        let mut draft = minimal();
        draft["doi"] = json!(" https://doi.org/10.5281/zenodo.12 ");
        let result = validate(&mut draft, &fx.ctx(Mode::Publish, Some("10.5281/zenodo.12")));
        assert!(result.is_valid());
        assert_eq!(draft["doi"], "10.5281/zenodo.12");

        let mut draft = minimal();
        draft["doi"] = json!("doi:10.1234/foo.bar");
        assert!(validate(&mut draft, &fx.ctx(Mode::Publish, None)).is_valid());
        assert_eq!(draft["doi"], "10.1234/foo.bar");
    }

    #[test]
    fn test_person_names() {
        let fx = Fixture::new();
        let mut draft = minimal();
        draft["creators"] = json!([
            {"name": "Doe John", "affiliation": "Atlantis"},
            {"name": "DOE, JOHN"},
            {"name": " ", "affiliation": ""}
        ]);

        let result = validate(&mut draft, &fx.ctx(Mode::Publish, None));
        assert!(result.errors.contains_key("creators.0.name"));
        assert!(result.warnings.contains_key("creators.1.name"));
        assert!(result.warnings.contains_key("creators.1.affiliation"));
        // Blank entries are filtered out
        assert_eq!(draft["creators"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_keywords_and_references() {
        let fx = Fixture::new();
        let mut draft = minimal();
        draft["keywords"] = json!("alpha\n\nbeta; gamma\n");
        draft["references"] = json!(["Ref 1", "  ", ""]);

        let result = validate(&mut draft, &fx.ctx(Mode::Publish, None));
        assert!(result.is_valid());
        assert_eq!(draft["keywords"], json!(["alpha", "beta; gamma"]));
        assert!(result.warnings.contains_key("keywords.1"));
        assert_eq!(draft["references"], json!(["Ref 1"]));
    }

    #[test]
    fn test_related_identifier_schemes() {
        let fx = Fixture::new();
        let mut draft = minimal();
        draft["related_identifiers"] = json!([
            {"identifier": "10.1234/foo.bar2", "relation": "isCitedBy", "scheme": "url"},
            {"identifier": "2011ApJS..192...18K", "relation": "isAlternativeIdentifier"},
            {"identifier": "", "relation": "cites"},
            {"identifier": "???", "relation": "cites"}
        ]);

        let result = validate(&mut draft, &fx.ctx(Mode::Publish, None));
        assert_eq!(draft["related_identifiers"][0]["scheme"], "doi");
        assert_eq!(draft["related_identifiers"][1]["scheme"], "ads");
        assert_eq!(draft["related_identifiers"].as_array().unwrap().len(), 3);
        assert!(result.errors.contains_key("related_identifiers.2.identifier"));
    }

    #[test]
    fn test_knowledge_base_references() {
        let fx = Fixture::new();
        let mut draft = minimal();
        draft["communities"] = json!([{"identifier": "c1"}, {"identifier": "nope"}, {"identifier": ""}]);
        draft["grants"] = json!([{"id": "10.13039/501100000780::283595"}, {"id": "missing"}]);

        let result = validate(&mut draft, &fx.ctx(Mode::Save, None));
        assert_eq!(result.errors["communities"], vec!["Invalid community identifier: nope"]);
        assert_eq!(result.errors["grants"], vec!["Invalid grant identifier: missing"]);

        let result = validate(&mut draft, &fx.ctx(Mode::Publish, None));
        assert_eq!(result.errors["communities"], vec!["Provided community does not exist: nope"]);
    }

    #[test]
    fn test_choice_and_url_values() {
        let fx = Fixture::new();
        let mut draft = minimal();
        draft["upload_type"] = json!("spaceship");
        draft["conference_url"] = json!("not a url");

        let result = validate(&mut draft, &fx.ctx(Mode::Save, None));
        assert!(result.errors.contains_key("upload_type"));
        assert!(result.errors.contains_key("conference_url"));
    }
}

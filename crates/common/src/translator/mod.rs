//! Bidirectional mapping between the legacy flat deposition form and the
//! nested record schema
//!
//! Provides:
//! - `legacy_to_nested`: flat form fields into nested blocks
//! - `nested_to_legacy`: the exact inverse for form-originated records
//!
//! Year fields of the journal, imprint and part-of blocks are synthesized
//! from `publication_date` on the way in and dropped on the way out. Keys
//! neither direction knows about pass through untouched.
//!
//! Alternate identifiers are split out of `related_identifiers`. When they
//! were not all listed last, their original indexes are kept under
//! `_alternate_positions` so the legacy list comes back in the same order.

use serde_json::{Map, Value};

pub const ALTERNATE_RELATION: &str = "isAlternateIdentifier";
/// Older spelling still found in stored drafts
pub const ALTERNATIVE_RELATION: &str = "isAlternativeIdentifier";

const ALTERNATE_POSITIONS: &str = "_alternate_positions";

type FieldMap = &'static [(&'static str, &'static str)];

const JOURNAL: FieldMap = &[
    ("journal_title", "title"),
    ("journal_volume", "volume"),
    ("journal_issue", "issue"),
    ("journal_pages", "pages"),
];

const IMPRINT: FieldMap = &[("imprint_publisher", "publisher"), ("imprint_place", "place")];

const PART_OF: FieldMap = &[("partof_title", "title"), ("partof_pages", "pages")];

const MEETING: FieldMap = &[
    ("conference_title", "title"),
    ("conference_acronym", "acronym"),
    ("conference_dates", "dates"),
    ("conference_place", "place"),
    ("conference_url", "url"),
    ("conference_session", "session"),
    ("conference_session_part", "session_part"),
];

const PERSON_FIELDS: &[&str] = &["creators", "contributors"];

// ============================================================================
// Legacy -> nested
// ============================================================================

/// Translate a legacy flat draft into the nested record shape
pub fn legacy_to_nested(legacy: &Value) -> Value {
    let Some(source) = legacy.as_object() else {
        return legacy.clone();
    };
    let mut src = source.clone();
    let mut out = Map::new();

    let year = src
        .get("publication_date")
        .and_then(Value::as_str)
        .and_then(|d| d.get(..4))
        .map(|y| Value::String(y.to_string()));

    // Resource type
    if let Some(kind) = src.remove("upload_type") {
        let subtype_key = if kind.as_str() == Some("image") {
            "image_type"
        } else {
            "publication_type"
        };
        let mut resource_type = Map::new();
        resource_type.insert("type".into(), kind);
        if let Some(subtype) = src.remove(subtype_key) {
            resource_type.insert("subtype".into(), subtype);
        }
        out.insert("resource_type".into(), Value::Object(resource_type));
    }

    if let Some(journal) = take_block(&mut src, JOURNAL, year.as_ref()) {
        out.insert("journal".into(), Value::Object(journal));
    }

    let imprint = take_block(&mut src, IMPRINT, year.as_ref());
    let isbn = src.remove("imprint_isbn");

    if let Some(mut part_of) = take_block(&mut src, PART_OF, year.as_ref()) {
        if let Some(imprint) = &imprint {
            for key in ["publisher", "place"] {
                if let Some(v) = imprint.get(key) {
                    part_of.insert(key.into(), v.clone());
                }
            }
        }
        if let Some(isbn) = &isbn {
            part_of.insert("isbn".into(), isbn.clone());
        }
        out.insert("part_of".into(), Value::Object(part_of));
    }
    if let Some(imprint) = imprint {
        out.insert("imprint".into(), Value::Object(imprint));
    }
    if let Some(isbn) = isbn {
        out.insert("isbn".into(), isbn);
    }

    if let Some(meetings) = take_block(&mut src, MEETING, None) {
        out.insert("meetings".into(), Value::Object(meetings));
    }

    let mut thesis = Map::new();
    if let Some(university) = src.remove("thesis_university") {
        thesis.insert("university".into(), university);
    }
    if let Some(supervisors) = src.remove("thesis_supervisors") {
        thesis.insert("supervisors".into(), split_person_names(supervisors));
    }
    if !thesis.is_empty() {
        out.insert("thesis".into(), Value::Object(thesis));
    }

    if let Some(communities) = src.remove("communities") {
        out.insert("communities".into(), unwrap_ids(communities, "identifier"));
    }
    if let Some(grants) = src.remove("grants") {
        out.insert("grants".into(), unwrap_ids(grants, "id"));
    }

    if let Some(license) = src.remove("license") {
        let license = match license {
            Value::String(id) => {
                let mut block = Map::new();
                block.insert("identifier".into(), Value::String(id));
                Value::Object(block)
            }
            other => other,
        };
        out.insert("license".into(), license);
    }

    if let Some(references) = src.remove("references") {
        out.insert("references".into(), wrap_ids(references, "raw_reference"));
    }

    if let Some(related) = src.remove("related_identifiers") {
        let split = split_identifiers(related);
        // An explicitly empty list survives
        if !split.related.is_empty() || split.alternates.is_empty() {
            out.insert("related_identifiers".into(), Value::Array(split.related));
        }
        if !split.alternates.is_empty() {
            out.insert("alternate_identifiers".into(), Value::Array(split.alternates));
        }
        if let Some(positions) = split.positions {
            out.insert(
                ALTERNATE_POSITIONS.into(),
                Value::Array(positions.into_iter().map(Value::from).collect()),
            );
        }
    }

    for field in PERSON_FIELDS {
        if let Some(persons) = src.remove(*field) {
            out.insert((*field).into(), split_person_names(persons));
        }
    }

    // Everything else is shared between both shapes
    for (key, value) in src {
        out.entry(key).or_insert(value);
    }

    Value::Object(out)
}

fn take_block(src: &mut Map<String, Value>, fields: FieldMap, year: Option<&Value>) -> Option<Map<String, Value>> {
    let mut block = Map::new();
    for (legacy, nested) in fields {
        if let Some(value) = src.remove(*legacy) {
            block.insert((*nested).into(), value);
        }
    }
    if block.is_empty() {
        return None;
    }
    if let Some(year) = year {
        block.insert("year".into(), year.clone());
    }
    Some(block)
}

fn unwrap_ids(value: Value, key: &str) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item.get(key) {
                    Some(Value::String(id)) => Value::String(id.clone()),
                    _ => item,
                })
                .collect(),
        ),
        other => other,
    }
}

fn wrap_ids(value: Value, key: &str) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => {
                        let mut obj = Map::new();
                        obj.insert(key.into(), Value::String(s));
                        Value::Object(obj)
                    }
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}

fn is_alternate(relation: Option<&str>) -> bool {
    matches!(relation, Some(ALTERNATE_RELATION) | Some(ALTERNATIVE_RELATION))
}

struct SplitIdentifiers {
    related: Vec<Value>,
    alternates: Vec<Value>,
    /// Indexes of the alternates in the legacy list, unless they all came last
    positions: Option<Vec<usize>>,
}

fn split_identifiers(value: Value) -> SplitIdentifiers {
    let Value::Array(items) = value else {
        return SplitIdentifiers {
            related: vec![value],
            alternates: Vec::new(),
            positions: None,
        };
    };

    let total = items.len();
    let mut related = Vec::new();
    let mut alternates = Vec::new();
    let mut positions = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let relation = item.get("relation").and_then(Value::as_str).map(str::to_string);
        match (item, relation.as_deref()) {
            (Value::Object(mut obj), rel) if is_alternate(rel) => {
                if rel == Some(ALTERNATE_RELATION) {
                    obj.remove("relation");
                }
                alternates.push(Value::Object(obj));
                positions.push(index);
            }
            (item, _) => related.push(item),
        }
    }

    let trailing = positions.iter().copied().eq(total - positions.len()..total);
    SplitIdentifiers {
        related,
        alternates,
        positions: (!trailing).then_some(positions),
    }
}

fn split_person_names(value: Value) -> Value {
    let Value::Array(items) = value else {
        return value;
    };
    Value::Array(
        items
            .into_iter()
            .map(|item| {
                let Value::Object(mut person) = item else {
                    return item;
                };
                let name = person.get("name").and_then(Value::as_str).map(str::to_string);
                if let Some((family, given)) = name.as_deref().and_then(|n| n.split_once(',')) {
                    person.insert("familyname".into(), Value::String(family.trim().to_string()));
                    person.insert("givennames".into(), Value::String(given.trim().to_string()));
                }
                Value::Object(person)
            })
            .collect(),
    )
}

// ============================================================================
// Nested -> legacy
// ============================================================================

/// Translate a nested record (or record-shaped draft) back into the legacy form
pub fn nested_to_legacy(nested: &Value) -> Value {
    let Some(source) = nested.as_object() else {
        return nested.clone();
    };
    let mut src = source.clone();
    let mut out = Map::new();

    if let Some(Value::Object(mut resource_type)) = src.remove("resource_type") {
        let kind = resource_type.remove("type");
        let subtype_key = if kind.as_ref().and_then(Value::as_str) == Some("image") {
            "image_type"
        } else {
            "publication_type"
        };
        if let Some(kind) = kind {
            out.insert("upload_type".into(), kind);
        }
        if let Some(subtype) = resource_type.remove("subtype") {
            out.insert(subtype_key.into(), subtype);
        }
    }

    if let Some(Value::Object(journal)) = src.remove("journal") {
        put_block(&mut out, journal, JOURNAL);
    }

    let imprint = match src.remove("imprint") {
        Some(Value::Object(imprint)) => imprint,
        _ => Map::new(),
    };
    let part_of = match src.remove("part_of") {
        Some(Value::Object(part_of)) => part_of,
        _ => Map::new(),
    };
    for (legacy, nested) in IMPRINT {
        if let Some(value) = imprint.get(*nested).or_else(|| part_of.get(*nested)) {
            out.insert((*legacy).into(), value.clone());
        }
    }
    if let Some(isbn) = src.remove("isbn").or_else(|| part_of.get("isbn").cloned()) {
        out.insert("imprint_isbn".into(), isbn);
    }
    put_block(&mut out, part_of, PART_OF);

    if let Some(Value::Object(meetings)) = src.remove("meetings") {
        put_block(&mut out, meetings, MEETING);
    }

    if let Some(Value::Object(mut thesis)) = src.remove("thesis") {
        if let Some(university) = thesis.remove("university") {
            out.insert("thesis_university".into(), university);
        }
        if let Some(supervisors) = thesis.remove("supervisors") {
            out.insert("thesis_supervisors".into(), drop_person_names(supervisors));
        }
    }

    if let Some(communities) = src.remove("communities") {
        out.insert("communities".into(), wrap_ids(communities, "identifier"));
    }

    if let Some(grants) = src.remove("grants") {
        let grants = match grants {
            Value::Array(items) => Value::Array(items.into_iter().map(legacy_grant).collect()),
            other => other,
        };
        out.insert("grants".into(), grants);
    }

    if let Some(license) = src.remove("license") {
        let license = match license.get("identifier").or_else(|| license.get("id")) {
            Some(Value::String(id)) => Value::String(id.clone()),
            _ => license,
        };
        out.insert("license".into(), license);
    }

    if let Some(references) = src.remove("references") {
        out.insert("references".into(), unwrap_ids(references, "raw_reference"));
    }

    let related = src.remove("related_identifiers");
    let listed = related.is_some();
    let mut identifiers = match related {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    };
    let positions: Vec<usize> = match src.remove(ALTERNATE_POSITIONS) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_u64)
            .filter_map(|p| usize::try_from(p).ok())
            .collect(),
        _ => Vec::new(),
    };
    if let Some(Value::Array(alternates)) = src.remove("alternate_identifiers") {
        let alternates: Vec<Value> = alternates
            .into_iter()
            .map(|item| match item {
                Value::Object(mut obj) => {
                    obj.entry("relation")
                        .or_insert_with(|| Value::String(ALTERNATE_RELATION.into()));
                    Value::Object(obj)
                }
                other => other,
            })
            .collect();
        if positions.len() == alternates.len() {
            // Ascending indexes, so every earlier entry is already in place
            for (position, alternate) in positions.into_iter().zip(alternates) {
                let at = position.min(identifiers.len());
                identifiers.insert(at, alternate);
            }
        } else {
            identifiers.extend(alternates);
        }
    }
    if listed || !identifiers.is_empty() {
        out.insert("related_identifiers".into(), Value::Array(identifiers));
    }

    for field in PERSON_FIELDS {
        if let Some(persons) = src.remove(*field) {
            out.insert((*field).into(), drop_person_names(persons));
        }
    }

    for (key, value) in src {
        out.entry(key).or_insert(value);
    }

    Value::Object(out)
}

fn put_block(out: &mut Map<String, Value>, block: Map<String, Value>, fields: FieldMap) {
    for (legacy, nested) in fields {
        if let Some(value) = block.get(*nested) {
            out.insert((*legacy).into(), value.clone());
        }
    }
}

fn legacy_grant(item: Value) -> Value {
    let id = match &item {
        Value::String(id) => Some(id.clone()),
        Value::Object(obj) => obj
            .get("id")
            .or_else(|| obj.get("identifier"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    };
    match id {
        Some(id) => {
            let mut obj = Map::new();
            obj.insert("id".into(), Value::String(id));
            Value::Object(obj)
        }
        None => item,
    }
}

fn drop_person_names(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(mut person) => {
                        person.remove("familyname");
                        person.remove("givennames");
                        Value::Object(person)
                    }
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn legacy_record() -> Value {
        json!({
            "title": "Test title",
            "upload_type": "publication",
            "publication_type": "article",
            "publication_date": "2012-04-25",
            "creators": [{"name": "Doe, John", "affiliation": "Atlantis"}],
            "description": "Test",
            "access_right": "open",
            "license": "cc-by",
            "journal_title": "J",
            "journal_volume": "8",
            "imprint_publisher": "Zenodo",
            "imprint_isbn": "0-306-40615-2",
            "imprint_place": "Geneva",
            "partof_title": "Proceedings",
            "partof_pages": "1-10",
            "conference_title": "Conf",
            "conference_url": "https://conf.example.org",
            "thesis_university": "CERN",
            "thesis_supervisors": [{"name": "Smith, Jane"}],
            "communities": [{"identifier": "c1"}],
            "grants": [{"id": "10.13039/501100000780::283595"}],
            "references": ["Ref 1"],
            "keywords": ["alpha"],
            "related_identifiers": [
                {"identifier": "10.1234/foo.bar2", "relation": "isCitedBy"},
                {"identifier": "2011ApJS..192...18K", "relation": "isAlternativeIdentifier"}
            ]
        })
    }

    #[test]
    fn test_forward_translation() {
        let nested = legacy_to_nested(&legacy_record());

        assert_eq!(nested["resource_type"], json!({"type": "publication", "subtype": "article"}));
        assert_eq!(nested["journal"], json!({"title": "J", "volume": "8", "year": "2012"}));
        assert_eq!(
            nested["imprint"],
            json!({"publisher": "Zenodo", "place": "Geneva", "year": "2012"})
        );
        assert_eq!(nested["isbn"], "0-306-40615-2");
        assert_eq!(nested["part_of"]["title"], "Proceedings");
        assert_eq!(nested["part_of"]["publisher"], "Zenodo");
        assert_eq!(nested["part_of"]["year"], "2012");
        assert_eq!(nested["meetings"]["url"], "https://conf.example.org");
        assert_eq!(nested["thesis"]["supervisors"][0]["familyname"], "Smith");
        assert_eq!(nested["communities"], json!(["c1"]));
        assert_eq!(nested["grants"], json!(["10.13039/501100000780::283595"]));
        assert_eq!(nested["license"], json!({"identifier": "cc-by"}));
        assert_eq!(nested["references"], json!([{"raw_reference": "Ref 1"}]));
        assert_eq!(nested["creators"][0]["givennames"], "John");
        assert_eq!(
            nested["related_identifiers"],
            json!([{"identifier": "10.1234/foo.bar2", "relation": "isCitedBy"}])
        );
        assert_eq!(
            nested["alternate_identifiers"],
            json!([{"identifier": "2011ApJS..192...18K", "relation": "isAlternativeIdentifier"}])
        );
        assert!(nested.get("journal_title").is_none());
        assert_eq!(nested["keywords"], json!(["alpha"]));
    }

    #[test]
    fn test_round_trip() {
        let legacy = legacy_record();
        assert_eq!(nested_to_legacy(&legacy_to_nested(&legacy)), legacy);
    }

    #[test]
    fn test_round_trip_journal_only() {
        let legacy = json!({
            "journal_title": "J",
            "journal_volume": "8",
            "publication_date": "2012-04-25",
            "related_identifiers": [
                {"identifier": "10.1234/foo.bar2", "relation": "isCitedBy"},
                {"identifier": "2011ApJS..192...18K", "relation": "isAlternativeIdentifier"}
            ]
        });

        let nested = legacy_to_nested(&legacy);
        assert_eq!(nested["journal"]["year"], "2012");
        assert_eq!(nested_to_legacy(&nested), legacy);
    }

    #[test]
    fn test_round_trip_alternate_first() {
        let legacy = json!({
            "related_identifiers": [
                {"identifier": "2011ApJS..192...18K", "relation": "isAlternativeIdentifier"},
                {"identifier": "10.1234/foo.bar2", "relation": "isCitedBy"}
            ]
        });

        let nested = legacy_to_nested(&legacy);
        assert_eq!(
            nested["related_identifiers"],
            json!([{"identifier": "10.1234/foo.bar2", "relation": "isCitedBy"}])
        );
        assert_eq!(nested["_alternate_positions"], json!([0]));
        assert_eq!(nested_to_legacy(&nested), legacy);
    }

    #[test]
    fn test_round_trip_interleaved_alternates() {
        let legacy = json!({
            "related_identifiers": [
                {"identifier": "10.1234/a", "relation": "cites"},
                {"identifier": "arXiv:1310.2590", "relation": "isAlternateIdentifier", "scheme": "arxiv"},
                {"identifier": "10.1234/b", "relation": "isCitedBy"},
                {"identifier": "2011ApJS..192...18K", "relation": "isAlternativeIdentifier"},
                {"identifier": "10.1234/c", "relation": "isPartOf"}
            ]
        });

        let nested = legacy_to_nested(&legacy);
        assert_eq!(nested["related_identifiers"].as_array().unwrap().len(), 3);
        assert_eq!(nested["alternate_identifiers"].as_array().unwrap().len(), 2);
        let back = nested_to_legacy(&nested);
        assert!(back.get("_alternate_positions").is_none());
        assert_eq!(back, legacy);
    }

    #[test]
    fn test_round_trip_only_alternates_and_empty_list() {
        let legacy = json!({
            "related_identifiers": [
                {"identifier": "2011ApJS..192...18K", "relation": "isAlternativeIdentifier"}
            ]
        });
        let nested = legacy_to_nested(&legacy);
        assert!(nested.get("related_identifiers").is_none());
        assert!(nested.get("_alternate_positions").is_none());
        assert_eq!(nested_to_legacy(&nested), legacy);

        let legacy = json!({"title": "T", "related_identifiers": []});
        let nested = legacy_to_nested(&legacy);
        assert_eq!(nested["related_identifiers"], json!([]));
        assert_eq!(nested_to_legacy(&nested), legacy);
    }

    #[test]
    fn test_alternate_relation_restored() {
        let legacy = json!({
            "related_identifiers": [
                {"identifier": "10.1234/a", "relation": "cites"},
                {"identifier": "arXiv:1310.2590", "relation": "isAlternateIdentifier", "scheme": "arxiv"}
            ]
        });

        let nested = legacy_to_nested(&legacy);
        assert_eq!(
            nested["alternate_identifiers"],
            json!([{"identifier": "arXiv:1310.2590", "scheme": "arxiv"}])
        );
        assert_eq!(nested_to_legacy(&nested), legacy);
    }

    #[test]
    fn test_image_subtype() {
        let legacy = json!({"upload_type": "image", "image_type": "photo"});
        let nested = legacy_to_nested(&legacy);
        assert_eq!(nested["resource_type"], json!({"type": "image", "subtype": "photo"}));
        assert_eq!(nested_to_legacy(&nested), legacy);
    }

    #[test]
    fn test_no_year_without_block() {
        let nested = legacy_to_nested(&json!({"publication_date": "2012-04-25"}));
        assert!(nested.get("journal").is_none());
        assert!(nested.get("imprint").is_none());
        assert!(nested.get("part_of").is_none());
    }

    #[test]
    fn test_reverse_accepts_postprocessed_blocks() {
        let nested = json!({
            "license": {"identifier": "cc-by", "license": "Creative Commons Attribution", "url": "https://x"},
            "grants": [{"title": "ACR - Title (g1)", "identifier": "g1"}]
        });
        let legacy = nested_to_legacy(&nested);
        assert_eq!(legacy["license"], "cc-by");
        assert_eq!(legacy["grants"], json!([{"id": "g1"}]));
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        let legacy = json!({"prereserve_doi": {"doi": "10.5281/zenodo.1", "recid": 1}, "notes": "n"});
        let nested = legacy_to_nested(&legacy);
        assert_eq!(nested, legacy);
        assert_eq!(nested_to_legacy(&nested), legacy);
    }
}

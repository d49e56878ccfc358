//! DataCite metadata kernel 3

use super::{access_right_uri, list_at, publication_year, recid, str_at, XmlBuilder, PUBLISHER};
use crate::config::SiteConfig;
use serde_json::Value;

const KERNEL_NS: &str = "http://datacite.org/schema/kernel-3";
const KERNEL_LOCATION: &str =
    "http://datacite.org/schema/kernel-3 http://schema.datacite.org/meta/kernel-3/metadata.xsd";

fn resource_type_general(kind: &str) -> &'static str {
    match kind {
        "dataset" => "Dataset",
        "image" => "Image",
        "video" => "Audiovisual",
        "software" => "Software",
        "publication" | "poster" | "presentation" | "lesson" => "Text",
        _ => "Other",
    }
}

/// Identifier type as DataCite spells it
fn identifier_type(scheme: &str) -> String {
    match scheme {
        "arxiv" => "arXiv".to_string(),
        "handle" => "Handle".to_string(),
        "ads" => "bibcode".to_string(),
        other => other.to_uppercase(),
    }
}

/// `isCitedBy` becomes `IsCitedBy`
fn relation_type(relation: &str) -> String {
    let mut chars = relation.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn write_resource(xml: &mut XmlBuilder, record: &Value, site: &SiteConfig) {
    xml.open(
        "resource",
        &[
            ("xmlns", KERNEL_NS),
            ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
            ("xsi:schemaLocation", KERNEL_LOCATION),
        ],
    );

    if let Some(doi) = str_at(record, "/doi") {
        xml.leaf("identifier", &[("identifierType", "DOI")], doi);
    }

    xml.open("creators", &[]);
    for creator in list_at(record, "creators") {
        let Some(name) = str_at(creator, "/name") else {
            continue;
        };
        xml.open("creator", &[]).leaf("creatorName", &[], name);
        if let Some(orcid) = str_at(creator, "/orcid") {
            xml.leaf(
                "nameIdentifier",
                &[("nameIdentifierScheme", "ORCID"), ("schemeURI", "http://orcid.org/")],
                orcid,
            );
        }
        if let Some(affiliation) = str_at(creator, "/affiliation") {
            xml.leaf("affiliation", &[], affiliation);
        }
        xml.close("creator");
    }
    xml.close("creators");

    xml.open("titles", &[]);
    if let Some(title) = str_at(record, "/title") {
        xml.leaf("title", &[], title);
    }
    xml.close("titles");

    xml.leaf("publisher", &[], PUBLISHER);
    if let Some(year) = publication_year(record) {
        xml.leaf("publicationYear", &[], year);
    }

    let keywords: Vec<&str> = list_at(record, "keywords").iter().filter_map(Value::as_str).collect();
    if !keywords.is_empty() {
        xml.open("subjects", &[]);
        for keyword in keywords {
            xml.leaf("subject", &[], keyword);
        }
        xml.close("subjects");
    }

    let contributors = list_at(record, "contributors");
    if !contributors.is_empty() {
        xml.open("contributors", &[]);
        for contributor in contributors {
            let Some(name) = str_at(contributor, "/name") else {
                continue;
            };
            let kind = str_at(contributor, "/type").unwrap_or("Other");
            xml.open("contributor", &[("contributorType", kind)])
                .leaf("contributorName", &[], name);
            if let Some(affiliation) = str_at(contributor, "/affiliation") {
                xml.leaf("affiliation", &[], affiliation);
            }
            xml.close("contributor");
        }
        xml.close("contributors");
    }

    let access_right = str_at(record, "/access_right").unwrap_or("open");
    if let Some(published) = str_at(record, "/publication_date") {
        xml.open("dates", &[]);
        match str_at(record, "/embargo_date") {
            Some(embargo) if access_right == "embargoed" => {
                xml.leaf("date", &[("dateType", "Available")], embargo)
                    .leaf("date", &[("dateType", "Accepted")], published);
            }
            _ => {
                xml.leaf("date", &[("dateType", "Issued")], published);
            }
        }
        xml.close("dates");
    }

    if let Some(kind) = str_at(record, "/resource_type/type") {
        let subtype = str_at(record, "/resource_type/subtype").unwrap_or("");
        xml.leaf("resourceType", &[("resourceTypeGeneral", resource_type_general(kind))], subtype);
    }

    xml.open("alternateIdentifiers", &[]);
    if let Some(recid) = recid(record) {
        xml.leaf("alternateIdentifier", &[("alternateIdentifierType", "URL")], &site.record_url(&recid));
    }
    for alternate in list_at(record, "alternate_identifiers") {
        if let (Some(identifier), Some(scheme)) = (str_at(alternate, "/identifier"), str_at(alternate, "/scheme")) {
            xml.leaf(
                "alternateIdentifier",
                &[("alternateIdentifierType", &identifier_type(scheme))],
                identifier,
            );
        }
    }
    xml.close("alternateIdentifiers");

    let related = list_at(record, "related_identifiers");
    let concept_doi = str_at(record, "/conceptdoi").filter(|c| Some(*c) != str_at(record, "/doi"));
    if !related.is_empty() || concept_doi.is_some() {
        xml.open("relatedIdentifiers", &[]);
        for item in related {
            let (Some(identifier), Some(relation)) = (str_at(item, "/identifier"), str_at(item, "/relation")) else {
                continue;
            };
            let scheme = identifier_type(str_at(item, "/scheme").unwrap_or("url"));
            xml.leaf(
                "relatedIdentifier",
                &[("relatedIdentifierType", &scheme), ("relationType", &relation_type(relation))],
                identifier,
            );
        }
        if let Some(concept_doi) = concept_doi {
            xml.leaf(
                "relatedIdentifier",
                &[("relatedIdentifierType", "DOI"), ("relationType", "IsVersionOf")],
                concept_doi,
            );
        }
        xml.close("relatedIdentifiers");
    }

    xml.open("rightsList", &[]);
    if let Some(license_url) = str_at(record, "/license/url") {
        let title = str_at(record, "/license/license").unwrap_or(license_url);
        xml.leaf("rights", &[("rightsURI", license_url)], title);
    }
    xml.leaf("rights", &[("rightsURI", access_right_uri(access_right))], access_right);
    xml.close("rightsList");

    if let Some(description) = str_at(record, "/description") {
        xml.open("descriptions", &[])
            .leaf("description", &[("descriptionType", "Abstract")], description)
            .close("descriptions");
    }

    xml.close("resource");
}

/// Standalone DataCite XML document, as sent to the Metadata Store
pub fn datacite_v3(record: &Value, site: &SiteConfig) -> String {
    let mut xml = XmlBuilder::new().declaration();
    write_resource(&mut xml, record, site);
    xml.finish()
}

/// DataCite document wrapped in the `oai_datacite` envelope
pub fn oai_datacite(record: &Value, site: &SiteConfig) -> String {
    let mut xml = XmlBuilder::new();
    xml.open(
        "oai_datacite",
        &[
            ("xmlns", "http://schema.datacite.org/oai/oai-1.0/"),
            ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
            (
                "xsi:schemaLocation",
                "http://schema.datacite.org/oai/oai-1.0/ http://schema.datacite.org/oai/oai-1.0/oai.xsd",
            ),
        ],
    )
    .leaf("schemaVersion", &[], "3")
    .leaf("datacentreSymbol", &[], "CERN.ZENODO")
    .open("payload", &[]);
    write_resource(&mut xml, record, site);
    xml.close("payload").close("oai_datacite");
    xml.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "recid": 123,
            "doi": "10.5281/zenodo.123",
            "conceptdoi": "10.5281/zenodo.122",
            "title": "Test & title",
            "description": "Test",
            "publication_date": "2013-05-08",
            "access_right": "embargoed",
            "embargo_date": "2099-01-01",
            "resource_type": {"type": "publication", "subtype": "article"},
            "creators": [{"name": "Doe, John", "affiliation": "Atlantis", "orcid": "0000-0002-1825-0097"}],
            "keywords": ["kw1"],
            "related_identifiers": [{"identifier": "10.1234/foo.bar2", "relation": "isCitedBy", "scheme": "doi"}],
            "alternate_identifiers": [{"identifier": "2011ApJS..192...18K", "scheme": "ads"}],
            "license": {"identifier": "cc-by", "license": "Creative Commons Attribution", "url": "https://creativecommons.org/licenses/by/4.0/"}
        })
    }

    #[test]
    fn test_datacite_document() {
        let xml = datacite_v3(&record(), &SiteConfig::default());

        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains(r#"<identifier identifierType="DOI">10.5281/zenodo.123</identifier>"#));
        assert!(xml.contains("<creatorName>Doe, John</creatorName>"));
        assert!(xml.contains("<title>Test &amp; title</title>"));
        assert!(xml.contains("<publicationYear>2013</publicationYear>"));
        assert!(xml.contains(r#"<date dateType="Available">2099-01-01</date>"#));
        assert!(xml.contains(r#"<resourceType resourceTypeGeneral="Text">article</resourceType>"#));
        assert!(xml.contains(
            r#"<alternateIdentifier alternateIdentifierType="URL">https://zenodo.org/record/123</alternateIdentifier>"#
        ));
        assert!(xml.contains(r#"relatedIdentifierType="DOI" relationType="IsCitedBy""#));
        assert!(xml.contains(r#"relationType="IsVersionOf">10.5281/zenodo.122<"#));
        assert!(xml.contains("info:eu-repo/semantics/embargoedAccess"));
    }

    #[test]
    fn test_oai_datacite_wraps_resource() {
        let xml = oai_datacite(&record(), &SiteConfig::default());
        assert!(xml.starts_with("<oai_datacite"));
        assert!(xml.contains("<payload><resource"));
        assert!(xml.ends_with("</resource></payload></oai_datacite>"));
    }

    #[test]
    fn test_relation_type() {
        assert_eq!(relation_type("isSupplementTo"), "IsSupplementTo");
        assert_eq!(identifier_type("arxiv"), "arXiv");
        assert_eq!(identifier_type("doi"), "DOI");
    }
}

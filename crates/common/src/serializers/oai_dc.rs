//! Simple Dublin Core

use super::{access_right_uri, list_at, recid, str_at, XmlBuilder, PUBLISHER};
use crate::config::SiteConfig;
use serde_json::Value;

pub fn oai_dc(record: &Value, site: &SiteConfig) -> String {
    let mut xml = XmlBuilder::new();
    xml.open(
        "oai_dc:dc",
        &[
            ("xmlns:oai_dc", "http://www.openarchives.org/OAI/2.0/oai_dc/"),
            ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
            ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
            (
                "xsi:schemaLocation",
                "http://www.openarchives.org/OAI/2.0/oai_dc/ http://www.openarchives.org/OAI/2.0/oai_dc.xsd",
            ),
        ],
    );

    if let Some(title) = str_at(record, "/title") {
        xml.leaf("dc:title", &[], title);
    }
    for creator in list_at(record, "creators") {
        if let Some(name) = str_at(creator, "/name") {
            xml.leaf("dc:creator", &[], name);
        }
    }
    for keyword in list_at(record, "keywords").iter().filter_map(Value::as_str) {
        xml.leaf("dc:subject", &[], keyword);
    }
    if let Some(description) = str_at(record, "/description") {
        xml.leaf("dc:description", &[], description);
    }
    xml.leaf("dc:publisher", &[], PUBLISHER);
    if let Some(date) = str_at(record, "/publication_date") {
        xml.leaf("dc:date", &[], date);
    }
    if let Some(kind) = str_at(record, "/resource_type/type") {
        xml.leaf("dc:type", &[], kind);
    }
    if let Some(doi) = str_at(record, "/doi") {
        xml.leaf("dc:identifier", &[], &format!("https://doi.org/{}", doi));
    }
    if let Some(recid) = recid(record) {
        xml.leaf("dc:identifier", &[], &site.record_url(&recid));
    }
    for related in list_at(record, "related_identifiers") {
        if let Some(identifier) = str_at(related, "/identifier") {
            xml.leaf("dc:relation", &[], identifier);
        }
    }
    let access_right = str_at(record, "/access_right").unwrap_or("open");
    xml.leaf("dc:rights", &[], access_right_uri(access_right));
    if let Some(url) = str_at(record, "/license/url") {
        xml.leaf("dc:rights", &[], url);
    }

    xml.close("oai_dc:dc");
    xml.finish()
}

//! Record serialisations for registrars and harvesters
//!
//! Provides:
//! - DataCite kernel-3 XML (DOI registration, OAI `datacite*` formats)
//! - Dublin Core (`oai_dc`)
//! - MARC21 XML (`marcxml`)
//! - A small escaping XML builder shared by all of them

mod datacite;
mod marcxml;
mod oai_dc;

pub use datacite::{datacite_v3, oai_datacite};
pub use marcxml::marcxml;
pub use oai_dc::oai_dc;

use crate::config::SiteConfig;
use serde_json::Value;
use std::fmt::Write;

pub const PUBLISHER: &str = "Zenodo";

/// Metadata formats offered over OAI-PMH
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataFormat {
    OaiDc,
    DataCite,
    OaiDataCite,
    MarcXml,
}

/// `(metadataPrefix, format)` in the order they are advertised
pub const METADATA_PREFIXES: &[(&str, MetadataFormat)] = &[
    ("oai_dc", MetadataFormat::OaiDc),
    ("datacite", MetadataFormat::DataCite),
    ("oai_datacite", MetadataFormat::OaiDataCite),
    ("datacite3", MetadataFormat::DataCite),
    ("oai_datacite3", MetadataFormat::OaiDataCite),
    ("marcxml", MetadataFormat::MarcXml),
];

impl MetadataFormat {
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        METADATA_PREFIXES
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, f)| *f)
    }

    pub fn schema(&self) -> &'static str {
        match self {
            MetadataFormat::OaiDc => "http://www.openarchives.org/OAI/2.0/oai_dc.xsd",
            MetadataFormat::DataCite => "http://schema.datacite.org/meta/kernel-3/metadata.xsd",
            MetadataFormat::OaiDataCite => "http://schema.datacite.org/oai/oai-1.0/oai.xsd",
            MetadataFormat::MarcXml => "http://www.loc.gov/standards/marcxml/schema/MARC21slim.xsd",
        }
    }

    pub fn namespace(&self) -> &'static str {
        match self {
            MetadataFormat::OaiDc => "http://www.openarchives.org/OAI/2.0/oai_dc/",
            MetadataFormat::DataCite => "http://datacite.org/schema/kernel-3",
            MetadataFormat::OaiDataCite => "http://schema.datacite.org/oai/oai-1.0/",
            MetadataFormat::MarcXml => "http://www.loc.gov/MARC21/slim",
        }
    }

    /// Serialise a record body (without XML declaration)
    pub fn serialize(&self, record: &Value, site: &SiteConfig) -> String {
        match self {
            MetadataFormat::OaiDc => oai_dc(record, site),
            MetadataFormat::DataCite => datacite_v3(record, site),
            MetadataFormat::OaiDataCite => oai_datacite(record, site),
            MetadataFormat::MarcXml => marcxml(record, site),
        }
    }
}

// ============================================================================
// XML building
// ============================================================================

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Append-only XML writer; every text and attribute value is escaped
#[derive(Debug, Default)]
pub struct XmlBuilder {
    buf: String,
}

impl XmlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declaration(mut self) -> Self {
        self.buf.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        self
    }

    fn start_tag(&mut self, tag: &str, attrs: &[(&str, &str)]) {
        self.buf.push('<');
        self.buf.push_str(tag);
        for (name, value) in attrs {
            let _ = write!(self.buf, " {}=\"{}\"", name, escape(value));
        }
    }

    pub fn open(&mut self, tag: &str, attrs: &[(&str, &str)]) -> &mut Self {
        self.start_tag(tag, attrs);
        self.buf.push('>');
        self
    }

    pub fn close(&mut self, tag: &str) -> &mut Self {
        let _ = write!(self.buf, "</{}>", tag);
        self
    }

    pub fn leaf(&mut self, tag: &str, attrs: &[(&str, &str)], text: &str) -> &mut Self {
        self.start_tag(tag, attrs);
        let _ = write!(self.buf, ">{}</{}>", escape(text), tag);
        self
    }

    pub fn empty(&mut self, tag: &str, attrs: &[(&str, &str)]) -> &mut Self {
        self.start_tag(tag, attrs);
        self.buf.push_str("/>");
        self
    }

    /// Insert an already serialised fragment
    pub fn raw(&mut self, fragment: &str) -> &mut Self {
        self.buf.push_str(fragment);
        self
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

// ============================================================================
// Record accessors
// ============================================================================

pub(crate) fn str_at<'a>(record: &'a Value, pointer: &str) -> Option<&'a str> {
    record
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

pub(crate) fn list_at<'a>(record: &'a Value, key: &str) -> &'a [Value] {
    record
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub(crate) fn recid(record: &Value) -> Option<String> {
    match record.get("recid") {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

pub(crate) fn publication_year(record: &Value) -> Option<&str> {
    str_at(record, "/publication_date").and_then(|d| d.get(..4))
}

/// `info:eu-repo` access right term
pub(crate) fn access_right_uri(access_right: &str) -> &'static str {
    match access_right {
        "embargoed" => "info:eu-repo/semantics/embargoedAccess",
        "restricted" => "info:eu-repo/semantics/restrictedAccess",
        "closed" => "info:eu-repo/semantics/closedAccess",
        _ => "info:eu-repo/semantics/openAccess",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"a<b & "c">'"#), "a&lt;b &amp; &quot;c&quot;&gt;&apos;");
    }

    #[test]
    fn test_builder() {
        let mut xml = XmlBuilder::new();
        xml.open("a", &[("x", "1&2")])
            .leaf("b", &[], "t<")
            .empty("c", &[("y", "z")])
            .close("a");
        assert_eq!(xml.finish(), r#"<a x="1&amp;2"><b>t&lt;</b><c y="z"/></a>"#);
    }

    #[test]
    fn test_metadata_prefixes() {
        assert_eq!(MetadataFormat::from_prefix("datacite3"), Some(MetadataFormat::DataCite));
        assert_eq!(MetadataFormat::from_prefix("oai_datacite3"), Some(MetadataFormat::OaiDataCite));
        assert_eq!(MetadataFormat::from_prefix("marc21"), None);
        assert_eq!(METADATA_PREFIXES.len(), 6);
    }

    #[test]
    fn test_record_accessors() {
        let record = json!({"recid": 4, "publication_date": "2014-02-27", "title": " "});
        assert_eq!(recid(&record).as_deref(), Some("4"));
        assert_eq!(publication_year(&record), Some("2014"));
        assert_eq!(str_at(&record, "/title"), None);
        assert!(list_at(&record, "creators").is_empty());
    }
}

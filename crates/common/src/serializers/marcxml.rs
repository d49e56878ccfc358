//! MARC21 slim XML

use super::{list_at, recid, str_at, XmlBuilder, PUBLISHER};
use crate::config::SiteConfig;
use serde_json::Value;

struct DataField<'a> {
    tag: &'a str,
    subfields: Vec<(&'a str, String)>,
}

impl<'a> DataField<'a> {
    fn new(tag: &'a str) -> Self {
        Self {
            tag,
            subfields: Vec::new(),
        }
    }

    fn sub(mut self, code: &'a str, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.subfields.push((code, value.to_string()));
        }
        self
    }

    fn write(&self, xml: &mut XmlBuilder) {
        if self.subfields.is_empty() {
            return;
        }
        xml.open("datafield", &[("tag", self.tag), ("ind1", " "), ("ind2", " ")]);
        for (code, value) in &self.subfields {
            xml.leaf("subfield", &[("code", code)], value);
        }
        xml.close("datafield");
    }
}

pub fn marcxml(record: &Value, site: &SiteConfig) -> String {
    let mut xml = XmlBuilder::new();
    xml.open("record", &[("xmlns", "http://www.loc.gov/MARC21/slim")]);

    if let Some(recid) = recid(record) {
        xml.leaf("controlfield", &[("tag", "001")], &recid);
    }

    let mut fields = vec![DataField::new("024")
        .sub("a", str_at(record, "/doi"))
        .sub("2", str_at(record, "/doi").map(|_| "doi"))];

    let mut creators = list_at(record, "creators").iter();
    if let Some(first) = creators.next() {
        fields.push(
            DataField::new("100")
                .sub("a", str_at(first, "/name"))
                .sub("u", str_at(first, "/affiliation")),
        );
    }
    fields.push(DataField::new("245").sub("a", str_at(record, "/title")));
    fields.push(
        DataField::new("260")
            .sub("b", Some(PUBLISHER))
            .sub("c", str_at(record, "/publication_date")),
    );
    fields.push(DataField::new("520").sub("a", str_at(record, "/description")));
    fields.push(
        DataField::new("540")
            .sub("a", str_at(record, "/license/license"))
            .sub("u", str_at(record, "/license/url")),
    );
    fields.push(DataField::new("542").sub("l", str_at(record, "/access_right")));
    for keyword in list_at(record, "keywords").iter().filter_map(Value::as_str) {
        fields.push(DataField::new("653").sub("a", Some(keyword)));
    }
    for creator in creators {
        fields.push(
            DataField::new("700")
                .sub("a", str_at(creator, "/name"))
                .sub("u", str_at(creator, "/affiliation")),
        );
    }
    if let Some(journal) = record.get("journal") {
        fields.push(
            DataField::new("909")
                .sub("p", str_at(journal, "/title"))
                .sub("v", str_at(journal, "/volume"))
                .sub("n", str_at(journal, "/issue"))
                .sub("c", str_at(journal, "/pages"))
                .sub("y", str_at(journal, "/year")),
        );
    }
    let url = recid(record).map(|r| site.record_url(&r));
    fields.push(DataField::new("856").sub("u", url.as_deref()));
    fields.push(
        DataField::new("980")
            .sub("a", str_at(record, "/resource_type/type"))
            .sub("b", str_at(record, "/resource_type/subtype")),
    );

    for field in &fields {
        field.write(&mut xml);
    }

    xml.close("record");
    xml.finish()
}

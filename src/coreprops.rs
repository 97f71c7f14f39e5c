//! The core-properties part, holding document metadata.
//!
//! Core properties live at `/docProps/core.xml` and carry Dublin Core
//! metadata such as the title, creator, and modification times.

use crate::constants::{content_type as ct, namespace, relationship_type};
use crate::content_types::{escape_xml, push_entity};
use crate::error::{PackError, Result};
use crate::packuri::PackURI;
use crate::part::Part;
use crate::rel::Relationships;
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;

/// Standard part name for the core-properties part.
pub const CORE_PROPERTIES_URI: &str = "/docProps/core.xml";

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S",
];

/// A date value from a core-properties element.
///
/// Dates that parse as W3CDTF timestamps are held as instants; anything else
/// is carried through verbatim so a package with loose metadata still
/// round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateValue {
    Time(DateTime<Utc>),
    Raw(String),
}

impl DateValue {
    pub fn parse(s: &str) -> Self {
        for fmt in DATE_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                return DateValue::Time(dt.and_utc());
            }
        }
        DateValue::Raw(s.to_string())
    }

    fn to_w3cdtf(&self) -> String {
        match self {
            DateValue::Time(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            DateValue::Raw(s) => s.clone(),
        }
    }
}

/// The core document properties part.
#[derive(Debug)]
pub struct CorePropertiesPart {
    partname: PackURI,
    rels: Relationships,

    pub title: String,
    pub subject: String,
    pub creator: String,
    pub keywords: String,
    pub description: String,
    pub last_modified_by: String,
    pub revision: u32,
    pub created: Option<DateValue>,
    pub modified: Option<DateValue>,
}

impl CorePropertiesPart {
    /// Create an empty core-properties part at the standard name.
    pub fn new() -> Result<Self> {
        Self::with_name(PackURI::known(CORE_PROPERTIES_URI))
    }

    /// Create an empty core-properties part at the given name.
    pub fn with_name(partname: PackURI) -> Result<Self> {
        let rels = Relationships::for_source(&partname)?;
        Ok(Self {
            partname,
            rels,
            title: String::new(),
            subject: String::new(),
            creator: String::new(),
            keywords: String::new(),
            description: String::new(),
            last_modified_by: String::new(),
            revision: 1,
            created: None,
            modified: None,
        })
    }

    fn set_field(&mut self, element: &[u8], text: &str) -> Result<()> {
        match element {
            b"title" => self.title = text.to_string(),
            b"subject" => self.subject = text.to_string(),
            b"creator" => self.creator = text.to_string(),
            b"keywords" => self.keywords = text.to_string(),
            b"description" => self.description = text.to_string(),
            b"lastModifiedBy" => self.last_modified_by = text.to_string(),
            b"revision" => {
                self.revision = text.trim().parse().map_err(|_| {
                    PackError::Format(format!("invalid revision value '{text}'"))
                })?;
            }
            b"created" => self.created = Some(DateValue::parse(text)),
            b"modified" => self.modified = Some(DateValue::parse(text)),
            _ => {}
        }
        Ok(())
    }

    fn push_text_element(xml: &mut String, prefix: &str, element: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        xml.push_str(&format!(
            "  <{prefix}:{element}>{}</{prefix}:{element}>\n",
            escape_xml(value)
        ));
    }

    fn push_date_element(xml: &mut String, element: &str, value: &DateValue) {
        xml.push_str(&format!(
            "  <dcterms:{element} xsi:type=\"dcterms:W3CDTF\">{}</dcterms:{element}>\n",
            escape_xml(&value.to_w3cdtf())
        ));
    }
}

impl Part for CorePropertiesPart {
    fn partname(&self) -> &PackURI {
        &self.partname
    }

    fn content_type(&self) -> &str {
        ct::OPC_CORE_PROPERTIES
    }

    fn reltype(&self) -> Option<&str> {
        Some(relationship_type::CORE_PROPERTIES)
    }

    fn rels(&self) -> Option<&Relationships> {
        Some(&self.rels)
    }

    fn rels_mut(&mut self) -> Option<&mut Relationships> {
        Some(&mut self.rels)
    }

    fn load(&mut self, blob: Vec<u8>) -> Result<()> {
        let mut reader = Reader::from_reader(blob.as_slice());

        let mut buf = Vec::new();
        let mut current: Option<Vec<u8>> = None;
        let mut text = String::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    current = Some(e.local_name().as_ref().to_vec());
                    text.clear();
                }
                Ok(Event::Text(ref t)) => {
                    if current.is_some() {
                        text.push_str(std::str::from_utf8(t.as_ref())?);
                    }
                }
                Ok(Event::GeneralRef(ref e)) => {
                    if current.is_some() {
                        push_entity(&mut text, e)?;
                    }
                }
                Ok(Event::End(_)) => {
                    if let Some(element) = current.take() {
                        let value = text.trim();
                        if !value.is_empty() {
                            self.set_field(&element, value)?;
                        }
                        text.clear();
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(PackError::Format(format!("core properties parse error: {e}")));
                }
                _ => {}
            }
            buf.clear();
        }
        Ok(())
    }

    fn dump(&self) -> Result<Vec<u8>> {
        let mut xml = String::with_capacity(1024);
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        xml.push('\n');
        xml.push_str(&format!(
            "<cp:coreProperties xmlns:cp=\"{}\" xmlns:dc=\"{}\" xmlns:dcterms=\"{}\" \
             xmlns:dcmitype=\"{}\" xmlns:xsi=\"{}\">\n",
            namespace::CORE_PROPERTIES,
            namespace::DUBLIN_CORE,
            namespace::DUBLIN_CORE_TERMS,
            namespace::DUBLIN_CORE_TYPES,
            namespace::XSI,
        ));

        Self::push_text_element(&mut xml, "dc", "title", &self.title);
        Self::push_text_element(&mut xml, "dc", "subject", &self.subject);
        Self::push_text_element(&mut xml, "dc", "creator", &self.creator);
        Self::push_text_element(&mut xml, "cp", "keywords", &self.keywords);
        Self::push_text_element(&mut xml, "dc", "description", &self.description);
        Self::push_text_element(&mut xml, "cp", "lastModifiedBy", &self.last_modified_by);
        xml.push_str(&format!("  <cp:revision>{}</cp:revision>\n", self.revision));

        let now = DateValue::Time(Utc::now());
        Self::push_date_element(&mut xml, "created", self.created.as_ref().unwrap_or(&now));
        Self::push_date_element(&mut xml, "modified", self.modified.as_ref().unwrap_or(&now));

        xml.push_str("</cp:coreProperties>");
        Ok(xml.into_bytes())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl crate::part::RelationshipOwner for CorePropertiesPart {
    fn base_uri(&self) -> &str {
        self.partname.base_uri()
    }

    fn relationships(&self) -> Option<&Relationships> {
        Some(&self.rels)
    }

    fn relationships_mut(&mut self) -> Option<&mut Relationships> {
        Some(&mut self.rels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_date_value_parse() {
        let parsed = DateValue::parse("2024-06-01T10:30:00Z");
        let expected = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap();
        assert_eq!(parsed, DateValue::Time(expected));

        assert_eq!(
            DateValue::parse("yesterday"),
            DateValue::Raw("yesterday".to_string())
        );
    }

    #[test]
    fn test_defaults() {
        let props = CorePropertiesPart::new().unwrap();
        assert_eq!(props.partname().as_str(), "/docProps/core.xml");
        assert_eq!(props.content_type(), ct::OPC_CORE_PROPERTIES);
        assert_eq!(props.reltype(), Some(relationship_type::CORE_PROPERTIES));
        assert_eq!(props.revision, 1);
        assert!(props.created.is_none());
    }

    #[test]
    fn test_dump_and_load_roundtrip() {
        let mut props = CorePropertiesPart::new().unwrap();
        props.title = "Annual Report".to_string();
        props.creator = "A & B".to_string();
        props.revision = 7;
        props.created = Some(DateValue::Time(
            Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap(),
        ));

        let blob = props.dump().unwrap();
        let xml = std::str::from_utf8(&blob).unwrap();
        assert!(xml.contains("<dc:title>Annual Report</dc:title>"));
        assert!(xml.contains("A &amp; B"));
        assert!(xml.contains("2024-06-01T10:30:00Z"));
        assert!(xml.contains("xsi:type=\"dcterms:W3CDTF\""));

        let mut reparsed = CorePropertiesPart::new().unwrap();
        reparsed.load(blob).unwrap();
        assert_eq!(reparsed.title, "Annual Report");
        assert_eq!(reparsed.creator, "A & B");
        assert_eq!(reparsed.revision, 7);
        assert_eq!(reparsed.created, props.created);
    }

    #[test]
    fn test_load_keeps_text_around_entity_references() {
        let xml = br#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/">
            <dc:title>R&amp;D</dc:title>
            <dc:creator>Smith &lt;ops&gt; &#169; 2024</dc:creator>
        </cp:coreProperties>"#;
        let mut props = CorePropertiesPart::new().unwrap();
        props.load(xml.to_vec()).unwrap();
        assert_eq!(props.title, "R&D");
        assert_eq!(props.creator, "Smith <ops> \u{a9} 2024");
    }

    #[test]
    fn test_load_ignores_unknown_elements() {
        let xml = br#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/">
            <dc:title>T</dc:title>
            <cp:contentStatus>Draft</cp:contentStatus>
        </cp:coreProperties>"#;
        let mut props = CorePropertiesPart::new().unwrap();
        props.load(xml.to_vec()).unwrap();
        assert_eq!(props.title, "T");
    }

    #[test]
    fn test_load_rejects_bad_revision() {
        let xml = br#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties">
            <cp:revision>seven</cp:revision>
        </cp:coreProperties>"#;
        let mut props = CorePropertiesPart::new().unwrap();
        assert!(matches!(props.load(xml.to_vec()).unwrap_err(), PackError::Format(_)));
    }

    #[test]
    fn test_dump_defaults_dates_to_now() {
        let props = CorePropertiesPart::new().unwrap();
        let xml = String::from_utf8(props.dump().unwrap()).unwrap();
        assert!(xml.contains("<dcterms:created"));
        assert!(xml.contains("<dcterms:modified"));
    }
}

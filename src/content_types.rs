//! Content-type declarations and the [Content_Types].xml manifest.
//!
//! Every part in an OPC package must be covered by a content-type
//! declaration: either a Default keyed by file extension, or an Override
//! keyed by exact part name. Lookups are case-insensitive in both keys.

use crate::constants::namespace;
use crate::error::{PackError, Result};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;

/// Return the extension for a name: the substring after the first period.
///
/// Empty when the name carries no period, and never equal to a non-empty
/// input (a name ending in a period yields the empty string).
pub(crate) fn extension(name: &str) -> &str {
    name.split_once('.').map(|(_, ext)| ext).unwrap_or("")
}

/// A single content-type declaration from the package manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// A default declaration, keyed by file extension.
    Default { content_type: String, extension: String },
    /// An override declaration, keyed by exact part name.
    Override { content_type: String, part_name: String },
}

impl ContentType {
    /// The declared MIME type.
    pub fn content_type(&self) -> &str {
        match self {
            ContentType::Default { content_type, .. } => content_type,
            ContentType::Override { content_type, .. } => content_type,
        }
    }

    /// The declaration key: the extension for a Default, the part name for
    /// an Override.
    pub fn key(&self) -> &str {
        match self {
            ContentType::Default { extension, .. } => extension,
            ContentType::Override { part_name, .. } => part_name,
        }
    }
}

/// Registry of content-type declarations for a package.
///
/// Holds at most one Default per extension and one Override per part name.
/// Re-adding an identical declaration is idempotent; adding a conflicting
/// declaration for an existing key is an error.
#[derive(Debug, Default)]
pub struct ContentTypes {
    /// Default declarations, keyed by lower-cased extension
    defaults: HashMap<String, ContentType>,

    /// Override declarations, keyed by lower-cased part name
    overrides: HashMap<String, ContentType>,
}

impl ContentTypes {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration to the registry.
    ///
    /// Returns `DuplicateContentType` when the key already carries a
    /// declaration with a different MIME type.
    pub fn add(&mut self, ct: ContentType) -> Result<()> {
        let key = ct.key().to_lowercase();
        let map = match ct {
            ContentType::Default { .. } => &mut self.defaults,
            ContentType::Override { .. } => &mut self.overrides,
        };
        match map.get(&key) {
            None => {
                map.insert(key, ct);
                Ok(())
            }
            Some(existing) if existing.content_type() == ct.content_type() => Ok(()),
            Some(existing) => Err(PackError::DuplicateContentType(format!(
                "'{}' already declared as '{}', cannot redeclare as '{}'",
                ct.key(),
                existing.content_type(),
                ct.content_type()
            ))),
        }
    }

    /// Resolve the content type for a part name.
    ///
    /// Overrides are searched first (by exact name), then Defaults (by the
    /// name's extension). Both lookups fold case.
    ///
    /// # Arguments
    /// * `name` - The part name to resolve
    ///
    /// # Returns
    /// The declared MIME type, or `None` when the name is not covered by
    /// any declaration
    pub fn find_for(&self, name: &str) -> Option<&str> {
        if let Some(ct) = self.overrides.get(&name.to_lowercase()) {
            return Some(ct.content_type());
        }
        let ext = extension(name).to_lowercase();
        if ext.is_empty() {
            return None;
        }
        self.defaults.get(&ext).map(|ct| ct.content_type())
    }

    /// Number of declarations held.
    pub fn len(&self) -> usize {
        self.defaults.len() + self.overrides.len()
    }

    /// Check whether the registry holds no declarations.
    pub fn is_empty(&self) -> bool {
        self.defaults.is_empty() && self.overrides.is_empty()
    }

    /// Generate the XML for [Content_Types].xml.
    ///
    /// Each registered declaration produces exactly one element; entries are
    /// sorted by key for deterministic output.
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(1024);

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<Types xmlns="{}">"#, namespace::OPC_CONTENT_TYPES));
        xml.push('\n');

        let mut defaults: Vec<&ContentType> = self.defaults.values().collect();
        defaults.sort_by_key(|ct| ct.key());
        for ct in defaults {
            xml.push_str(&format!(
                r#"  <Default Extension="{}" ContentType="{}"/>"#,
                escape_xml(ct.key()),
                escape_xml(ct.content_type())
            ));
            xml.push('\n');
        }

        let mut overrides: Vec<&ContentType> = self.overrides.values().collect();
        overrides.sort_by_key(|ct| ct.key());
        for ct in overrides {
            xml.push_str(&format!(
                r#"  <Override PartName="{}" ContentType="{}"/>"#,
                escape_xml(ct.key()),
                escape_xml(ct.content_type())
            ));
            xml.push('\n');
        }

        xml.push_str("</Types>");
        xml
    }

    /// Parse a registry from [Content_Types].xml bytes.
    ///
    /// Fails with `Format` on an unrecognized child element of `Types` or on
    /// a declaration missing its key or ContentType attribute.
    pub fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut registry = Self::new();
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                    match e.local_name().as_ref() {
                        b"Types" => {}
                        b"Default" => {
                            let (key, ct) = Self::declaration_attrs(e, b"Extension")?;
                            registry.add(ContentType::Default {
                                content_type: ct,
                                extension: key,
                            })?;
                        }
                        b"Override" => {
                            let (key, ct) = Self::declaration_attrs(e, b"PartName")?;
                            registry.add(ContentType::Override {
                                content_type: ct,
                                part_name: key,
                            })?;
                        }
                        other => {
                            return Err(PackError::Format(format!(
                                "invalid Types child element: {}",
                                String::from_utf8_lossy(other)
                            )));
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(PackError::Format(format!("content types parse error: {e}")));
                }
                _ => {}
            }
            buf.clear();
        }

        Ok(registry)
    }

    /// Pull the key attribute and ContentType attribute off a declaration
    /// element, erroring when either is absent.
    fn declaration_attrs(
        e: &quick_xml::events::BytesStart<'_>,
        key_name: &[u8],
    ) -> Result<(String, String)> {
        let mut key = None;
        let mut content_type = None;

        for attr in e.attributes() {
            let attr = attr?;
            if attr.key.as_ref() == key_name {
                key = Some(attr.unescape_value()?.to_string());
            } else if attr.key.as_ref() == b"ContentType" {
                content_type = Some(attr.unescape_value()?.to_string());
            }
        }

        match (key, content_type) {
            (Some(k), Some(ct)) => Ok((k, ct)),
            _ => Err(PackError::Format(format!(
                "content type declaration missing {} or ContentType attribute",
                String::from_utf8_lossy(key_name)
            ))),
        }
    }
}

/// Append the replacement text for a character or predefined entity
/// reference. The reader reports references as separate events rather than
/// folding them into the surrounding text. An unknown named entity is a
/// format error.
pub(crate) fn push_entity(text: &mut String, entity: &quick_xml::events::BytesRef<'_>) -> Result<()> {
    if let Some(ch) = entity.resolve_char_ref()? {
        text.push(ch);
        return Ok(());
    }
    let name = std::str::from_utf8(entity.as_ref())?;
    match quick_xml::escape::resolve_predefined_entity(name) {
        Some(replacement) => text.push_str(replacement),
        None => {
            return Err(PackError::Format(format!("unknown entity reference '&{name};'")));
        }
    }
    Ok(())
}

/// Escape XML special characters.
#[inline]
pub(crate) fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::content_type as ct;

    #[test]
    fn test_extension() {
        assert_eq!(extension("foo.bar"), "bar");
        assert_eq!(extension(".only"), "only");
        assert_eq!(extension(""), "");
        assert_eq!(extension("noext"), "");
        assert_eq!(extension("emptyext."), "");
    }

    #[test]
    fn test_override_searched_before_default() {
        let mut registry = ContentTypes::new();
        registry
            .add(ContentType::Default {
                content_type: ct::XML.to_string(),
                extension: "xml".to_string(),
            })
            .unwrap();
        registry
            .add(ContentType::Override {
                content_type: "app/special+xml".to_string(),
                part_name: "/word/document.xml".to_string(),
            })
            .unwrap();

        assert_eq!(registry.find_for("/word/document.xml"), Some("app/special+xml"));
        assert_eq!(registry.find_for("/word/other.xml"), Some(ct::XML));
        assert_eq!(registry.find_for("/word/image1.png"), None);
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut registry = ContentTypes::new();
        registry
            .add(ContentType::Default {
                content_type: ct::XML.to_string(),
                extension: "xml".to_string(),
            })
            .unwrap();
        registry
            .add(ContentType::Default {
                content_type: "image/png".to_string(),
                extension: "PNG".to_string(),
            })
            .unwrap();

        assert_eq!(registry.find_for("/foo.XML"), Some(ct::XML));
        assert_eq!(registry.find_for("/foo.png"), Some("image/png"));
    }

    #[test]
    fn test_idempotent_add_serializes_once() {
        let mut registry = ContentTypes::new();
        for _ in 0..3 {
            registry
                .add(ContentType::Default {
                    content_type: ct::XML.to_string(),
                    extension: "xml".to_string(),
                })
                .unwrap();
        }

        let xml = registry.to_xml();
        assert_eq!(xml.matches("<Default").count(), 1);
    }

    #[test]
    fn test_conflicting_add_fails() {
        let mut registry = ContentTypes::new();
        registry
            .add(ContentType::Default {
                content_type: ct::XML.to_string(),
                extension: "xml".to_string(),
            })
            .unwrap();
        let err = registry
            .add(ContentType::Default {
                content_type: "text/plain".to_string(),
                extension: "XML".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, PackError::DuplicateContentType(_)));
    }

    #[test]
    fn test_from_xml() {
        let xml = br#"<?xml version="1.0"?>
            <Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
                <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
                <Default Extension="xml" ContentType="application/xml"/>
                <Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
            </Types>"#;

        let registry = ContentTypes::from_xml(xml).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.find_for("/word/document.xml"),
            Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml")
        );
        assert_eq!(registry.find_for("/_rels/.rels"), Some(ct::OPC_RELATIONSHIPS));
    }

    #[test]
    fn test_from_xml_rejects_unknown_element() {
        let xml = br#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
                <Fallback Extension="xml" ContentType="application/xml"/>
            </Types>"#;
        let err = ContentTypes::from_xml(xml).unwrap_err();
        assert!(matches!(err, PackError::Format(_)));
    }

    #[test]
    fn test_from_xml_rejects_missing_attribute() {
        let xml = br#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
                <Default Extension="xml"/>
            </Types>"#;
        assert!(ContentTypes::from_xml(xml).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let mut registry = ContentTypes::new();
        registry
            .add(ContentType::Default {
                content_type: ct::OPC_RELATIONSHIPS.to_string(),
                extension: "rels".to_string(),
            })
            .unwrap();
        registry
            .add(ContentType::Override {
                content_type: "app/pmxmain+xml".to_string(),
                part_name: "/pmx/samp.main".to_string(),
            })
            .unwrap();

        let reparsed = ContentTypes::from_xml(registry.to_xml().as_bytes()).unwrap();
        assert_eq!(reparsed.len(), 2);
        assert_eq!(reparsed.find_for("/pmx/samp.main"), Some("app/pmxmain+xml"));
    }
}

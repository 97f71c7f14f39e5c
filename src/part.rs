//! Package parts and the trait seams around them.
//!
//! A part is a named item inside the package with a content type and a blob
//! of bytes. Most parts also own a relationship set; the `.rels` parts
//! themselves do not, which is what terminates the relationship graph.

use crate::constants::relationship_type;
use crate::content_types::push_entity;
use crate::coreprops::CorePropertiesPart;
use crate::error::{PackError, Result};
use crate::package::Package;
use crate::packuri::PackURI;
use crate::rel::Relationships;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;

/// A part within an OPC package.
///
/// Implementations hold their own payload representation; `load` and `dump`
/// convert between it and the serialized bytes stored in the archive.
pub trait Part {
    /// The part name, e.g. "/word/document.xml".
    fn partname(&self) -> &PackURI;

    /// The content type of this part.
    fn content_type(&self) -> &str;

    /// The relationship type a package or part uses to point at this part,
    /// when the part carries one.
    fn reltype(&self) -> Option<&str> {
        None
    }

    /// The relationship set owned by this part. `None` for relationship
    /// parts, which own no relationships of their own.
    fn rels(&self) -> Option<&Relationships>;

    fn rels_mut(&mut self) -> Option<&mut Relationships>;

    /// Populate the part from its serialized bytes.
    fn load(&mut self, blob: Vec<u8>) -> Result<()>;

    /// Serialize the part for writing into the archive.
    fn dump(&self) -> Result<Vec<u8>>;

    fn as_any(&self) -> &dyn std::any::Any;

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// A part holding raw bytes, used for any content type without a more
/// specific representation (images, fonts, embedded media).
#[derive(Debug)]
pub struct BlobPart {
    partname: PackURI,
    content_type: String,
    reltype: Option<String>,
    rels: Relationships,
    payload: Option<Vec<u8>>,
}

impl BlobPart {
    pub fn new(partname: PackURI, content_type: String) -> Result<Self> {
        let rels = Relationships::for_source(&partname)?;
        Ok(Self {
            partname,
            content_type,
            reltype: None,
            rels,
            payload: None,
        })
    }

    /// Set the relationship type used when relating this part.
    pub fn with_reltype(mut self, reltype: String) -> Self {
        self.reltype = Some(reltype);
        self
    }

    pub fn set_blob(&mut self, blob: Vec<u8>) {
        self.payload = Some(blob);
    }

    pub fn blob(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

impl Part for BlobPart {
    fn partname(&self) -> &PackURI {
        &self.partname
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn reltype(&self) -> Option<&str> {
        self.reltype.as_deref()
    }

    fn rels(&self) -> Option<&Relationships> {
        Some(&self.rels)
    }

    fn rels_mut(&mut self) -> Option<&mut Relationships> {
        Some(&mut self.rels)
    }

    fn load(&mut self, blob: Vec<u8>) -> Result<()> {
        self.payload = Some(blob);
        Ok(())
    }

    fn dump(&self) -> Result<Vec<u8>> {
        self.payload
            .clone()
            .ok_or_else(|| PackError::NoContent(self.partname.to_string()))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// A part holding an XML document as UTF-8 text.
#[derive(Debug)]
pub struct XmlPart {
    partname: PackURI,
    content_type: String,
    reltype: Option<String>,
    rels: Relationships,
    payload: Option<String>,
}

impl XmlPart {
    pub fn new(partname: PackURI, content_type: String) -> Result<Self> {
        let rels = Relationships::for_source(&partname)?;
        Ok(Self {
            partname,
            content_type,
            reltype: None,
            rels,
            payload: None,
        })
    }

    /// Set the relationship type used when relating this part.
    pub fn with_reltype(mut self, reltype: String) -> Self {
        self.reltype = Some(reltype);
        self
    }

    pub fn set_xml<S: Into<String>>(&mut self, xml: S) {
        self.payload = Some(xml.into());
    }

    pub fn xml(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Extract the concatenated text content of the document.
    pub fn extract_text(&self) -> Result<String> {
        let Some(xml) = &self.payload else {
            return Err(PackError::NoContent(self.partname.to_string()));
        };
        let mut reader = Reader::from_reader(xml.as_bytes());

        let mut text = String::new();
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Text(ref t)) => text.push_str(std::str::from_utf8(t.as_ref())?),
                Ok(Event::GeneralRef(ref e)) => push_entity(&mut text, e)?,
                Ok(Event::Eof) => break,
                Err(e) => return Err(PackError::Format(format!("xml parse error: {e}"))),
                _ => {}
            }
            buf.clear();
        }
        Ok(text)
    }
}

impl Part for XmlPart {
    fn partname(&self) -> &PackURI {
        &self.partname
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn reltype(&self) -> Option<&str> {
        self.reltype.as_deref()
    }

    fn rels(&self) -> Option<&Relationships> {
        Some(&self.rels)
    }

    fn rels_mut(&mut self) -> Option<&mut Relationships> {
        Some(&mut self.rels)
    }

    fn load(&mut self, blob: Vec<u8>) -> Result<()> {
        let xml = String::from_utf8(blob).map_err(|e| PackError::Utf8(e.utf8_error()))?;
        self.payload = Some(xml);
        Ok(())
    }

    fn dump(&self) -> Result<Vec<u8>> {
        self.payload
            .as_ref()
            .map(|xml| xml.as_bytes().to_vec())
            .ok_or_else(|| PackError::NoContent(self.partname.to_string()))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Something that owns relationships: the package itself or a part.
pub trait RelationshipOwner {
    /// Base URI relative target references resolve against.
    fn base_uri(&self) -> &str;

    fn relationships(&self) -> Option<&Relationships>;

    fn relationships_mut(&mut self) -> Option<&mut Relationships>;

    /// Relate this owner to `target` under the relationship type the target
    /// declares.
    ///
    /// The target must sit under this owner's base URI; a target elsewhere
    /// in the package is not addressable from here.
    ///
    /// # Arguments
    /// * `target` - The part to relate to, which must declare a
    ///   relationship type
    /// * `id` - Explicit relationship id, or `None` to generate one
    ///
    /// # Returns
    /// The id of the new relationship
    fn relate(&mut self, target: &dyn Part, id: Option<&str>) -> Result<String> {
        let reltype = target
            .reltype()
            .ok_or_else(|| {
                PackError::InvalidRelationship(format!(
                    "part {} declares no relationship type",
                    target.partname()
                ))
            })?
            .to_string();
        let target_ref = relative_ref(self.base_uri(), target.partname())?;
        let rels = self.relationships_mut().ok_or_else(|| {
            PackError::InvalidRelationship(
                "a relationship part cannot own relationships".to_string(),
            )
        })?;
        rels.add_internal(reltype, target_ref, id.map(str::to_string))
    }

    /// Resolve the parts this owner relates to with the given type, in the
    /// order the relationships were added. External relationships and
    /// targets not present in the package are skipped.
    fn related<'a>(&self, package: &'a Package, reltype: &str) -> Vec<&'a dyn Part> {
        let Some(rels) = self.relationships() else {
            return Vec::new();
        };
        let mut parts = Vec::new();
        for rel in rels.by_type(reltype) {
            if rel.is_external() {
                continue;
            }
            let Ok(partname) = rel.target_partname() else {
                continue;
            };
            match package.get_part(&partname) {
                Some(part) => parts.push(part),
                None => log::warn!("relationship target {partname} not present in package"),
            }
        }
        parts
    }
}

impl<'a> RelationshipOwner for dyn Part + 'a {
    fn base_uri(&self) -> &str {
        self.partname().base_uri()
    }

    fn relationships(&self) -> Option<&Relationships> {
        self.rels()
    }

    fn relationships_mut(&mut self) -> Option<&mut Relationships> {
        self.rels_mut()
    }
}

/// A relationship part owns no relationships, so relating from one fails
/// and nothing is ever related to it.
impl RelationshipOwner for Relationships {
    fn base_uri(&self) -> &str {
        self.partname().base_uri()
    }

    fn relationships(&self) -> Option<&Relationships> {
        None
    }

    fn relationships_mut(&mut self) -> Option<&mut Relationships> {
        None
    }
}

impl RelationshipOwner for BlobPart {
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

impl RelationshipOwner for XmlPart {
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

/// Compute the relative reference from a base URI to a part name under it.
///
/// Segment-aware: "/word" covers "/word/media/a.png" but not "/wordier/a.png".
/// Fails when the target does not sit under the base.
pub(crate) fn relative_ref(base: &str, target: &PackURI) -> Result<String> {
    if base == "/" {
        return Ok(target.membername().to_string());
    }
    target
        .as_str()
        .strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(str::to_string)
        .ok_or_else(|| {
            PackError::InvalidRelationship(format!(
                "part {target} is not addressable under {base}"
            ))
        })
}

type PartFactory = fn(PackURI, String) -> Result<Box<dyn Part>>;

/// Maps relationship types to part constructors during package load.
///
/// Unregistered types fall back to [`XmlPart`] for XML content types and
/// [`BlobPart`] otherwise.
pub struct PartRegistry {
    by_reltype: HashMap<String, PartFactory>,
}

impl PartRegistry {
    /// An empty registry; every part loads as a generic XML or blob part.
    pub fn new() -> Self {
        Self {
            by_reltype: HashMap::new(),
        }
    }

    /// The standard registry, with the package-defined part types.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(relationship_type::CORE_PROPERTIES, |partname, _content_type| {
            Ok(Box::new(CorePropertiesPart::with_name(partname)?))
        });
        registry
    }

    pub fn register(&mut self, reltype: &str, factory: PartFactory) {
        self.by_reltype.insert(reltype.to_string(), factory);
    }

    /// Construct an empty part for the given name and types, ready for its
    /// payload to be loaded.
    ///
    /// # Arguments
    /// * `partname` - Name of the part being constructed
    /// * `content_type` - Its declared content type
    /// * `reltype` - The relationship type it was reached through
    pub fn construct(
        &self,
        partname: PackURI,
        content_type: String,
        reltype: &str,
    ) -> Result<Box<dyn Part>> {
        if let Some(factory) = self.by_reltype.get(reltype) {
            return factory(partname, content_type);
        }
        if is_xml_content_type(&content_type) {
            let part = XmlPart::new(partname, content_type)?.with_reltype(reltype.to_string());
            Ok(Box::new(part))
        } else {
            let part = BlobPart::new(partname, content_type)?.with_reltype(reltype.to_string());
            Ok(Box::new(part))
        }
    }
}

impl Default for PartRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn is_xml_content_type(content_type: &str) -> bool {
    content_type.ends_with("+xml") || content_type.ends_with("/xml")
}

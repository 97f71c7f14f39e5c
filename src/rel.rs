//! Relationship-related objects for OPC packages.
//!
//! This module provides types for managing relationships between parts in an
//! OPC package, including internal and external relationships. A
//! [`Relationships`] collection is itself a package part (the `.rels` file),
//! so it participates in save and lookup like any other part.

use crate::constants::{content_type as ct, namespace};
use crate::content_types::escape_xml;
use crate::error::{PackError, Result};
use crate::packuri::{PACKAGE_RELS_URI, PackURI};
use crate::part::Part;
use quick_xml::Reader;
use quick_xml::events::Event;
use rand::RngExt;
use smallvec::SmallVec;
use std::collections::HashMap;

/// Attempts at generating a fresh relationship id before giving up.
const MAX_ID_ATTEMPTS: usize = 8;

/// Source of relationship ids for ids the caller did not supply.
///
/// Injectable so tests can substitute a deterministic sequence for the
/// default random tokens.
pub trait IdGenerator: std::fmt::Debug {
    fn next_id(&mut self) -> String;
}

/// Generates opaque random tokens, e.g. "d1f2a3b4c5".
#[derive(Debug, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn next_id(&mut self) -> String {
        format!("d{:08x}", rand::rng().random::<u32>())
    }
}

/// Generates "rId1", "rId2", ... for deterministic output.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: u32,
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&mut self) -> String {
        self.next += 1;
        format!("rId{}", self.next)
    }
}

/// Whether a relationship points inside or outside the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetMode {
    #[default]
    Internal,
    External,
}

impl TargetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetMode::Internal => "Internal",
            TargetMode::External => "External",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Internal" => Ok(TargetMode::Internal),
            "External" => Ok(TargetMode::External),
            other => Err(PackError::Format(format!("invalid TargetMode '{other}'"))),
        }
    }
}

/// A single relationship from a source (package or part) to a target.
///
/// Identified by an id unique within its owning [`Relationships`] set. The
/// target is a relative part reference for internal relationships or an
/// absolute URL for external ones.
#[derive(Debug, Clone)]
pub struct Relationship {
    /// Relationship id (e.g., "rId1" or a random token)
    r_id: String,

    /// Relationship type URI
    reltype: String,

    /// Target reference, relative to the owner's base
    target_ref: String,

    /// Base URI for resolving relative references
    base_uri: String,

    /// Internal or External
    mode: TargetMode,
}

impl Relationship {
    /// Create a new relationship.
    ///
    /// # Arguments
    /// * `r_id` - Relationship id (e.g., "rId1")
    /// * `reltype` - Relationship type URI
    /// * `target_ref` - Target reference (part reference or external URL)
    /// * `base_uri` - Base URI for resolving relative references
    /// * `mode` - Whether the target lies inside or outside the package
    pub fn new(
        r_id: String,
        reltype: String,
        target_ref: String,
        base_uri: String,
        mode: TargetMode,
    ) -> Self {
        Self {
            r_id,
            reltype,
            target_ref,
            base_uri,
            mode,
        }
    }

    /// Get the relationship id.
    #[inline]
    pub fn r_id(&self) -> &str {
        &self.r_id
    }

    /// Get the relationship type.
    #[inline]
    pub fn reltype(&self) -> &str {
        &self.reltype
    }

    /// Get the target reference.
    #[inline]
    pub fn target_ref(&self) -> &str {
        &self.target_ref
    }

    /// Get the target mode.
    #[inline]
    pub fn mode(&self) -> TargetMode {
        self.mode
    }

    /// Check if this is an external relationship.
    #[inline]
    pub fn is_external(&self) -> bool {
        self.mode == TargetMode::External
    }

    /// Get the absolute target part name for internal relationships.
    ///
    /// Resolves the relative target reference against the owner's base.
    /// Returns an error for external relationships.
    pub fn target_partname(&self) -> Result<PackURI> {
        if self.is_external() {
            return Err(PackError::InvalidRelationship(
                "cannot resolve a part name for an external relationship".to_string(),
            ));
        }
        PackURI::from_rel_ref(&self.base_uri, &self.target_ref)
    }
}

/// Collection of relationships from a single source; the `.rels` part.
///
/// Stores relationships in insertion order with an id-uniqueness index and a
/// per-type index for `related` queries. Owned by the package (the root set
/// at `/_rels/.rels`) or by a non-relationship part.
#[derive(Debug)]
pub struct Relationships {
    /// Part name of the .rels file (e.g., "/word/_rels/document.xml.rels")
    partname: PackURI,

    /// Base URI of the owning source, for resolving relative references
    base_uri: String,

    /// Relationships in insertion order
    rels: Vec<Relationship>,

    /// Map of relationship id to index in `rels`
    ids: HashMap<String, usize>,

    /// Map of relationship type to indexes in `rels`, insertion order
    by_type: HashMap<String, SmallVec<[usize; 4]>>,

    /// Generator for ids the caller did not supply
    idgen: Box<dyn IdGenerator>,
}

impl Relationships {
    /// Create the package-level relationship set (`/_rels/.rels`).
    pub fn for_package() -> Self {
        Self::with_names(PackURI::known(PACKAGE_RELS_URI), "/".to_string())
    }

    /// Create the relationship set owned by the part at `source`.
    pub fn for_source(source: &PackURI) -> Result<Self> {
        Ok(Self::with_names(source.rels_uri()?, source.base_uri().to_string()))
    }

    fn with_names(partname: PackURI, base_uri: String) -> Self {
        Self {
            partname,
            base_uri,
            rels: Vec::new(),
            ids: HashMap::new(),
            by_type: HashMap::new(),
            idgen: Box::new(RandomIdGenerator),
        }
    }

    /// Replace the id generator, e.g. with [`SequentialIdGenerator`] for
    /// deterministic output.
    pub fn set_id_generator(&mut self, idgen: Box<dyn IdGenerator>) {
        self.idgen = idgen;
    }

    /// Base URI relative references in this set resolve against.
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Add a relationship to the collection.
    ///
    /// Fails with `DuplicateRelationshipId` when the id is already present
    /// in this set.
    pub fn add(&mut self, rel: Relationship) -> Result<&Relationship> {
        if self.ids.contains_key(rel.r_id()) {
            return Err(PackError::DuplicateRelationshipId(format!(
                "'{}' already present in {}",
                rel.r_id(),
                self.partname
            )));
        }
        let idx = self.rels.len();
        self.ids.insert(rel.r_id().to_string(), idx);
        self.by_type.entry(rel.reltype().to_string()).or_default().push(idx);
        self.rels.push(rel);
        Ok(&self.rels[idx])
    }

    /// Add an internal relationship, generating an id when none is given.
    ///
    /// A generated id is checked against existing ids and regenerated on
    /// collision; an explicit id that collides is an error.
    ///
    /// # Arguments
    /// * `reltype` - Relationship type URI
    /// * `target_ref` - Target reference, relative to this set's base
    /// * `id` - Explicit relationship id, or `None` to generate one
    ///
    /// # Returns
    /// The id of the new relationship
    pub fn add_internal(
        &mut self,
        reltype: String,
        target_ref: String,
        id: Option<String>,
    ) -> Result<String> {
        self.add_with_mode(reltype, target_ref, id, TargetMode::Internal)
    }

    /// Add an external relationship (an absolute URL target).
    pub fn add_external(
        &mut self,
        reltype: String,
        target_url: String,
        id: Option<String>,
    ) -> Result<String> {
        self.add_with_mode(reltype, target_url, id, TargetMode::External)
    }

    fn add_with_mode(
        &mut self,
        reltype: String,
        target_ref: String,
        id: Option<String>,
        mode: TargetMode,
    ) -> Result<String> {
        let r_id = match id {
            Some(id) => id,
            None => self.fresh_id()?,
        };
        let base_uri = self.base_uri.clone();
        self.add(Relationship::new(r_id.clone(), reltype, target_ref, base_uri, mode))?;
        Ok(r_id)
    }

    /// Generate an id not yet present in this set.
    fn fresh_id(&mut self) -> Result<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.idgen.next_id();
            if !self.ids.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(PackError::DuplicateRelationshipId(format!(
            "could not generate a unique relationship id for {}",
            self.partname
        )))
    }

    /// Get a relationship by its id.
    #[inline]
    pub fn get(&self, r_id: &str) -> Option<&Relationship> {
        self.ids.get(r_id).map(|&idx| &self.rels[idx])
    }

    /// Get the relationships of the given type, in insertion order.
    pub fn by_type<'a>(&'a self, reltype: &str) -> impl Iterator<Item = &'a Relationship> {
        self.by_type
            .get(reltype)
            .into_iter()
            .flatten()
            .map(|&idx| &self.rels[idx])
    }

    /// Get an iterator over all relationships, in insertion order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.rels.iter()
    }

    /// Get the number of relationships in the collection.
    #[inline]
    pub fn len(&self) -> usize {
        self.rels.len()
    }

    /// Check if the collection is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rels.is_empty()
    }

    /// Serialize relationships to `.rels` XML.
    ///
    /// Relationships are sorted by id for deterministic output; the
    /// TargetMode attribute is emitted only for external relationships.
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(1024);

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<Relationships xmlns="{}">"#, namespace::OPC_RELATIONSHIPS));
        xml.push('\n');

        let mut rels: Vec<&Relationship> = self.rels.iter().collect();
        rels.sort_by_key(|rel| rel.r_id());

        for rel in rels {
            let target_mode = if rel.is_external() {
                format!(r#" TargetMode="{}""#, rel.mode().as_str())
            } else {
                String::new()
            };
            xml.push_str(&format!(
                r#"  <Relationship Id="{}" Type="{}" Target="{}"{}/>"#,
                escape_xml(rel.r_id()),
                escape_xml(rel.reltype()),
                escape_xml(rel.target_ref()),
                target_mode
            ));
            xml.push('\n');
        }

        xml.push_str("</Relationships>");
        xml
    }

    /// Parse `.rels` XML into this collection.
    ///
    /// A duplicate id in the input is a fatal error, as is a Relationship
    /// element missing its Id, Type, or Target attribute.
    pub fn load_xml(&mut self, xml: &[u8]) -> Result<()> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                    if e.local_name().as_ref() == b"Relationship" {
                        let mut r_id = None;
                        let mut reltype = None;
                        let mut target_ref = None;
                        let mut mode = TargetMode::Internal;

                        for attr in e.attributes() {
                            let attr = attr?;
                            match attr.key.as_ref() {
                                b"Id" => r_id = Some(attr.unescape_value()?.to_string()),
                                b"Type" => reltype = Some(attr.unescape_value()?.to_string()),
                                b"Target" => target_ref = Some(attr.unescape_value()?.to_string()),
                                b"TargetMode" => mode = TargetMode::parse(&attr.unescape_value()?)?,
                                _ => {}
                            }
                        }

                        let (r_id, reltype, target_ref) = match (r_id, reltype, target_ref) {
                            (Some(i), Some(t), Some(r)) => (i, t, r),
                            _ => {
                                return Err(PackError::Format(format!(
                                    "Relationship element in {} missing Id, Type, or Target",
                                    self.partname
                                )));
                            }
                        };
                        let base_uri = self.base_uri.clone();
                        self.add(Relationship::new(r_id, reltype, target_ref, base_uri, mode))?;
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(PackError::Format(format!("rels parse error: {e}"))),
                _ => {}
            }
            buf.clear();
        }

        Ok(())
    }
}

/// The `.rels` file is a first-class part, so the collection implements
/// [`Part`]. A relationships part owns no relationship set of its own:
/// `rels()` is `None`, which is what stops the load recursion.
impl Part for Relationships {
    fn partname(&self) -> &PackURI {
        &self.partname
    }

    fn content_type(&self) -> &str {
        ct::OPC_RELATIONSHIPS
    }

    fn rels(&self) -> Option<&Relationships> {
        None
    }

    fn rels_mut(&mut self) -> Option<&mut Relationships> {
        None
    }

    fn load(&mut self, blob: Vec<u8>) -> Result<()> {
        self.load_xml(&blob)
    }

    fn dump(&self) -> Result<Vec<u8>> {
        Ok(self.to_xml().into_bytes())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> Relationships {
        let source = PackURI::new("/word/document.xml").unwrap();
        let mut rels = Relationships::for_source(&source).unwrap();
        rels.set_id_generator(Box::new(SequentialIdGenerator::default()));
        rels
    }

    #[test]
    fn test_package_set_names() {
        let rels = Relationships::for_package();
        assert_eq!(rels.partname().as_str(), "/_rels/.rels");
        assert_eq!(rels.base_uri(), "/");
    }

    #[test]
    fn test_part_set_names() {
        let rels = sample_set();
        assert_eq!(rels.partname().as_str(), "/word/_rels/document.xml.rels");
        assert_eq!(rels.base_uri(), "/word");
    }

    #[test]
    fn test_duplicate_explicit_id_fails() {
        let mut rels = sample_set();
        rels.add_internal("t".to_string(), "a.xml".to_string(), Some("rId1".to_string()))
            .unwrap();
        let err = rels
            .add_internal("t".to_string(), "b.xml".to_string(), Some("rId1".to_string()))
            .unwrap_err();
        assert!(matches!(err, PackError::DuplicateRelationshipId(_)));
    }

    #[test]
    fn test_generated_ids_unique() {
        let mut rels = sample_set();
        let a = rels.add_internal("t".to_string(), "a.xml".to_string(), None).unwrap();
        let b = rels.add_internal("t".to_string(), "b.xml".to_string(), None).unwrap();
        assert_ne!(a, b);
        assert_eq!(rels.len(), 2);
    }

    #[test]
    fn test_by_type_insertion_order() {
        let mut rels = sample_set();
        rels.add_internal("t1".to_string(), "a.xml".to_string(), None).unwrap();
        rels.add_internal("t2".to_string(), "b.xml".to_string(), None).unwrap();
        rels.add_internal("t1".to_string(), "c.xml".to_string(), None).unwrap();

        let targets: Vec<&str> = rels.by_type("t1").map(|r| r.target_ref()).collect();
        assert_eq!(targets, vec!["a.xml", "c.xml"]);
    }

    #[test]
    fn test_target_partname_resolution() {
        let mut rels = sample_set();
        rels.add_internal("t".to_string(), "media/image1.png".to_string(), None)
            .unwrap();
        let rel = rels.iter().next().unwrap();
        assert_eq!(rel.target_partname().unwrap().as_str(), "/word/media/image1.png");
    }

    #[test]
    fn test_external_target_has_no_partname() {
        let mut rels = sample_set();
        rels.add_external("t".to_string(), "http://example.com/".to_string(), None)
            .unwrap();
        let rel = rels.iter().next().unwrap();
        assert!(rel.is_external());
        assert!(rel.target_partname().is_err());
    }

    #[test]
    fn test_to_xml_sorted_with_target_mode() {
        let mut rels = sample_set();
        rels.add_internal("t".to_string(), "b.xml".to_string(), Some("rId2".to_string()))
            .unwrap();
        rels.add_external(
            "t".to_string(),
            "http://example.com/".to_string(),
            Some("rId1".to_string()),
        )
        .unwrap();

        let xml = rels.to_xml();
        let first = xml.find("rId1").unwrap();
        let second = xml.find("rId2").unwrap();
        assert!(first < second);
        assert!(xml.contains(r#"TargetMode="External""#));
        assert_eq!(xml.matches("TargetMode").count(), 1);
    }

    #[test]
    fn test_load_xml_roundtrip() {
        let mut rels = sample_set();
        rels.add_internal("http://example.com/rel".to_string(), "a.xml".to_string(), None)
            .unwrap();
        let xml = rels.to_xml();

        let mut reparsed = sample_set();
        reparsed.load_xml(xml.as_bytes()).unwrap();
        assert_eq!(reparsed.len(), 1);
        let rel = reparsed.iter().next().unwrap();
        assert_eq!(rel.reltype(), "http://example.com/rel");
        assert_eq!(rel.mode(), TargetMode::Internal);
    }

    #[test]
    fn test_load_xml_duplicate_id_fatal() {
        let xml = br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
            <Relationship Id="rId1" Type="t" Target="a.xml"/>
            <Relationship Id="rId1" Type="t" Target="b.xml"/>
        </Relationships>"#;
        let mut rels = sample_set();
        let err = rels.load_xml(xml).unwrap_err();
        assert!(matches!(err, PackError::DuplicateRelationshipId(_)));
    }

    #[test]
    fn test_load_xml_missing_attribute_fatal() {
        let xml = br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
            <Relationship Id="rId1" Type="t"/>
        </Relationships>"#;
        let mut rels = sample_set();
        assert!(matches!(rels.load_xml(xml).unwrap_err(), PackError::Format(_)));
    }

    #[test]
    fn test_invalid_target_mode() {
        assert!(TargetMode::parse("Sideways").is_err());
        assert_eq!(TargetMode::parse("External").unwrap(), TargetMode::External);
    }

    #[test]
    fn test_rels_part_has_no_rels() {
        let rels = sample_set();
        assert!(Part::rels(&rels).is_none());
        assert_eq!(rels.content_type(), ct::OPC_RELATIONSHIPS);
    }
}

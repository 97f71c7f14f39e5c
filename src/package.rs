//! The logical package: parts, root relationships, and content types.
//!
//! A [`Package`] is the aggregate root of the model. It maps part names to
//! parts, owns the root relationship set and the content-type registry, and
//! drives the relationship-chasing load and the full-graph save.

use crate::content_types::{ContentType, ContentTypes, extension};
use crate::coreprops::CorePropertiesPart;
use crate::error::{PackError, Result};
use crate::packuri::{CONTENT_TYPES_URI, PACKAGE_RELS_URI, PackURI};
use crate::part::{Part, PartRegistry, RelationshipOwner, relative_ref};
use crate::phys::{ZipPkgReader, ZipPkgWriter};
use crate::rel::Relationships;
use crate::constants::{content_type as ct, relationship_type};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

/// An OPC package.
///
/// The root relationship set is always present and addressable as the part
/// `/_rels/.rels`; `len` and iteration cover the ordinary parts only.
pub struct Package {
    /// Ordinary parts, keyed by part name
    parts: HashMap<String, Box<dyn Part>>,

    /// The package-level relationship set
    rels: Relationships,

    /// Content-type declarations for every part
    content_types: ContentTypes,

    /// Relationship-type to part constructor mapping used during load
    registry: PartRegistry,

    /// Well-known relationship type to part name, kept current on add and
    /// load for O(1) lookup
    by_reltype: HashMap<String, String>,

    /// Path the package was opened from or last saved to
    path: Option<PathBuf>,
}

impl Package {
    /// Create an empty package with the standard part registry.
    pub fn new() -> Self {
        Self::with_registry(PartRegistry::standard())
    }

    /// Create an empty package loading parts through `registry`.
    pub fn with_registry(registry: PartRegistry) -> Self {
        let mut content_types = ContentTypes::new();
        // a fresh registry cannot hold a conflicting declaration
        let _ = content_types.add(ContentType::Default {
            content_type: ct::OPC_RELATIONSHIPS.to_string(),
            extension: "rels".to_string(),
        });
        Self {
            parts: HashMap::new(),
            rels: Relationships::for_package(),
            content_types,
            registry,
            by_reltype: HashMap::new(),
            path: None,
        }
    }

    /// Open the package file at `path`, remembering it for [`Package::save`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, PartRegistry::standard())
    }

    /// Open a package file, loading parts through `registry`.
    pub fn open_with<P: AsRef<Path>>(path: P, registry: PartRegistry) -> Result<Self> {
        let mut phys = ZipPkgReader::open(path.as_ref())?;
        let mut package = Self::with_registry(registry);
        package.load_from(&mut phys)?;
        package.path = Some(path.as_ref().to_path_buf());
        Ok(package)
    }

    /// Load a package from any seekable reader, such as an in-memory buffer.
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        Self::from_reader_with(reader, PartRegistry::standard())
    }

    /// Load a package from a reader through `registry`.
    pub fn from_reader_with<R: Read + Seek>(reader: R, registry: PartRegistry) -> Result<Self> {
        let mut phys = ZipPkgReader::new(reader)?;
        let mut package = Self::with_registry(registry);
        package.load_from(&mut phys)?;
        Ok(package)
    }

    /// Save to the path the package was opened from or last saved to.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Err(PackError::MissingTarget);
        };
        self.store(File::create(path)?)?;
        Ok(())
    }

    /// Save to `path`, remembering it for later calls to [`Package::save`].
    pub fn save_as<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.store(File::create(path.as_ref())?)?;
        self.path = Some(path.as_ref().to_path_buf());
        Ok(())
    }

    /// Serialize the package into any seekable writer.
    pub fn write_to<W: Write + Seek>(&self, writer: W) -> Result<W> {
        self.store(writer)
    }

    /// Serialize the package archive into a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.store(Cursor::new(Vec::new()))?.into_inner())
    }

    /// Add a part to the package and declare its content type.
    ///
    /// # Arguments
    /// * `part` - The part to register
    /// * `override_ct` - Declare an Override keyed by the exact part name;
    ///   otherwise a Default keyed by the name's extension, failing when that
    ///   extension already carries a conflicting Default
    pub fn add_part(&mut self, part: Box<dyn Part>, override_ct: bool) -> Result<()> {
        let name = part.partname().as_str().to_string();
        self.check_aliasing(&name)?;

        let declaration = if override_ct {
            ContentType::Override {
                content_type: part.content_type().to_string(),
                part_name: name,
            }
        } else {
            ContentType::Default {
                content_type: part.content_type().to_string(),
                extension: extension(&name).to_string(),
            }
        };
        self.content_types.add(declaration)?;
        self.insert_part(part)
    }

    /// Get a part by name. The root relationship set answers to its fixed
    /// name `/_rels/.rels`.
    pub fn get_part(&self, name: impl AsRef<str>) -> Option<&dyn Part> {
        let name = name.as_ref();
        if name == PACKAGE_RELS_URI {
            return Some(&self.rels);
        }
        self.parts.get(name).map(|part| part.as_ref())
    }

    pub fn get_part_mut(&mut self, name: impl AsRef<str>) -> Option<&mut (dyn Part + 'static)> {
        let name = name.as_ref();
        if name == PACKAGE_RELS_URI {
            return Some(&mut self.rels);
        }
        self.parts.get_mut(name).map(move |part| &mut **part)
    }

    /// Remove and return a part. The root relationship set cannot be
    /// removed.
    pub fn remove_part(&mut self, name: impl AsRef<str>) -> Option<Box<dyn Part>> {
        let name = name.as_ref();
        let part = self.parts.remove(name)?;
        self.by_reltype.retain(|_, v| v != name);
        Some(part)
    }

    pub fn contains_part(&self, name: impl AsRef<str>) -> bool {
        let name = name.as_ref();
        name == PACKAGE_RELS_URI || self.parts.contains_key(name)
    }

    /// Iterate the ordinary parts, in no particular order.
    pub fn iter_parts(&self) -> impl Iterator<Item = &dyn Part> {
        self.parts.values().map(|part| part.as_ref())
    }

    /// Part names in sorted order, the fixed root relationships included.
    pub fn part_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.parts.keys().map(String::as_str).collect();
        names.push(PACKAGE_RELS_URI);
        names.sort_unstable();
        names
    }

    /// Number of ordinary parts held.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The package-level relationship set.
    pub fn root_rels(&self) -> &Relationships {
        &self.rels
    }

    pub fn root_rels_mut(&mut self) -> &mut Relationships {
        &mut self.rels
    }

    /// The content-type registry.
    pub fn content_types(&self) -> &ContentTypes {
        &self.content_types
    }

    /// Relate the package root to an already-added part under the
    /// relationship type the part declares.
    ///
    /// # Arguments
    /// * `target_name` - Name of a part already registered in the package
    /// * `id` - Explicit relationship id, or `None` to generate one
    ///
    /// # Returns
    /// The id of the new relationship
    pub fn relate_part(&mut self, target_name: impl AsRef<str>, id: Option<&str>) -> Result<String> {
        let target_name = target_name.as_ref();
        let part = self
            .parts
            .get(target_name)
            .ok_or_else(|| PackError::PartNotFound(target_name.to_string()))?;
        let reltype = declared_reltype(part.as_ref())?;
        let target_ref = relative_ref("/", part.partname())?;
        self.rels.add_internal(reltype, target_ref, id.map(str::to_string))
    }

    /// Relate one already-added part to another, under the relationship type
    /// the target declares. The target must sit under the source's base URI.
    ///
    /// # Arguments
    /// * `source_name` - Name of the part the relationship starts from
    /// * `target_name` - Name of the part it points at
    /// * `id` - Explicit relationship id, or `None` to generate one
    pub fn relate_parts(
        &mut self,
        source_name: impl AsRef<str>,
        target_name: impl AsRef<str>,
        id: Option<&str>,
    ) -> Result<String> {
        let target_name = target_name.as_ref();
        let target = self
            .parts
            .get(target_name)
            .ok_or_else(|| PackError::PartNotFound(target_name.to_string()))?;
        let reltype = declared_reltype(target.as_ref())?;
        let target_partname = target.partname().clone();

        let source_name = source_name.as_ref();
        let source = self
            .parts
            .get_mut(source_name)
            .ok_or_else(|| PackError::PartNotFound(source_name.to_string()))?;
        let base = source.partname().base_uri().to_string();
        let target_ref = relative_ref(&base, &target_partname)?;
        let rels = source.rels_mut().ok_or_else(|| {
            PackError::InvalidRelationship(
                "a relationship part cannot own relationships".to_string(),
            )
        })?;
        rels.add_internal(reltype, target_ref, id.map(str::to_string))
    }

    /// Resolve the parts the package root relates to with the given type,
    /// in relationship insertion order.
    pub fn related(&self, reltype: &str) -> Vec<&dyn Part> {
        RelationshipOwner::related(self, self, reltype)
    }

    /// Resolve the parts the named part relates to with the given type.
    pub fn related_from(&self, source_name: impl AsRef<str>, reltype: &str) -> Vec<&dyn Part> {
        match self.get_part(source_name) {
            Some(part) => part.related(self, reltype),
            None => Vec::new(),
        }
    }

    /// Look up the part registered for a well-known relationship type.
    ///
    /// # Returns
    /// * `Ok(part)` when a part declaring `reltype` is registered
    /// * `Err(PackError::RelationshipNotFound)` otherwise
    pub fn part_by_reltype(&self, reltype: &str) -> Result<&dyn Part> {
        let name = self
            .by_reltype
            .get(reltype)
            .ok_or_else(|| PackError::RelationshipNotFound(reltype.to_string()))?;
        self.parts
            .get(name)
            .map(|part| part.as_ref())
            .ok_or_else(|| PackError::PartNotFound(name.clone()))
    }

    /// The core-properties part, when the package holds one.
    pub fn core_properties(&self) -> Option<&CorePropertiesPart> {
        let name = self.by_reltype.get(relationship_type::CORE_PROPERTIES)?;
        self.parts.get(name)?.as_any().downcast_ref()
    }

    pub fn core_properties_mut(&mut self) -> Option<&mut CorePropertiesPart> {
        let name = self.by_reltype.get(relationship_type::CORE_PROPERTIES)?.clone();
        self.parts.get_mut(&name)?.as_any_mut().downcast_mut()
    }

    /// The main document part of an Office package.
    pub fn main_document_part(&self) -> Result<&dyn Part> {
        self.part_by_reltype(relationship_type::OFFICE_DOCUMENT)
    }

    /// Register a part without touching the content-type registry.
    ///
    /// Rejects a name that is a derivative of (or derived from) any
    /// registered part or relationship-file name.
    fn insert_part(&mut self, part: Box<dyn Part>) -> Result<()> {
        let name = part.partname().as_str().to_string();
        self.check_aliasing(&name)?;
        if let Some(reltype) = part.reltype() {
            self.by_reltype
                .entry(reltype.to_string())
                .or_insert_with(|| name.clone());
        }
        self.parts.insert(name, part);
        Ok(())
    }

    fn check_aliasing(&self, name: &str) -> Result<()> {
        let held_names = std::iter::once(PACKAGE_RELS_URI).chain(
            self.parts.values().flat_map(|part| {
                std::iter::once(part.partname().as_str())
                    .chain(part.rels().map(|rels| rels.partname().as_str()))
            }),
        );
        for held in held_names {
            if derives(name, held) {
                return Err(PackError::NameDerivative(format!(
                    "'{name}' collides with registered name '{held}'"
                )));
            }
        }
        Ok(())
    }

    /// Relationship-driven load.
    ///
    /// Reads the content-types manifest and root relationships, then chases
    /// relationships breadth-first. A part name already registered is
    /// skipped, which both guards relationship cycles and bounds the walk by
    /// the archive entry count.
    fn load_from<R: Read + Seek>(&mut self, phys: &mut ZipPkgReader<R>) -> Result<()> {
        self.content_types = ContentTypes::from_xml(&phys.content_types_xml()?)?;

        if let Some(xml) = phys.rels_xml_for(&PackURI::known(PACKAGE_RELS_URI))? {
            self.rels.load_xml(&xml)?;
        }

        let mut queue: VecDeque<(PackURI, String)> = VecDeque::new();
        enqueue_targets(&self.rels, &mut queue)?;

        while let Some((partname, reltype)) = queue.pop_front() {
            if self.contains_part(&partname) {
                continue;
            }
            let Some(content_type) = self.content_types.find_for(partname.as_str()) else {
                log::warn!("no content type declared for {partname}, part skipped");
                continue;
            };
            let content_type = content_type.to_string();

            let blob = phys.blob_for(&partname)?;
            let mut part = self.registry.construct(partname, content_type, &reltype)?;
            part.load(blob)?;

            if let Some(rels) = part.rels_mut() {
                let rels_name = rels.partname().clone();
                if let Some(xml) = phys.rels_xml_for(&rels_name)? {
                    rels.load_xml(&xml)?;
                }
                enqueue_targets(rels, &mut queue)?;
            }
            self.insert_part(part)?;
        }
        Ok(())
    }

    /// Serialize the whole package into `writer`.
    ///
    /// The content-types manifest and root relationships go first under
    /// their fixed names, then each part in name order, each followed by its
    /// relationship file when it owns any relationships. A part that fails
    /// to produce content is skipped so the rest of the save completes.
    fn store<W: Write + Seek>(&self, writer: W) -> Result<W> {
        let mut phys = ZipPkgWriter::new(writer);
        phys.write(
            &PackURI::known(CONTENT_TYPES_URI),
            self.content_types.to_xml().as_bytes(),
        )?;
        phys.write(self.rels.partname(), self.rels.to_xml().as_bytes())?;

        let mut names: Vec<&String> = self.parts.keys().collect();
        names.sort_unstable();
        for name in names {
            let part = &self.parts[name];
            match part.dump() {
                Ok(blob) if blob.is_empty() => {
                    log::warn!("part {name} produced no content, not written");
                }
                Ok(blob) => {
                    phys.write(part.partname(), &blob)?;
                    if let Some(rels) = part.rels() {
                        if !rels.is_empty() {
                            phys.write(rels.partname(), rels.to_xml().as_bytes())?;
                        }
                    }
                }
                Err(err) => {
                    log::warn!("part {name} failed to serialize, not written: {err}");
                }
            }
        }
        phys.finish()
    }
}

impl Default for Package {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationshipOwner for Package {
    fn base_uri(&self) -> &str {
        "/"
    }

    fn relationships(&self) -> Option<&Relationships> {
        Some(&self.rels)
    }

    fn relationships_mut(&mut self) -> Option<&mut Relationships> {
        Some(&mut self.rels)
    }
}

/// Segment-aware derivative test: equal names collide, as does one name
/// extending the other by whole segments.
fn derives(a: &str, b: &str) -> bool {
    a == b
        || (a.len() > b.len() && a.as_bytes()[b.len()] == b'/' && a.starts_with(b))
        || (b.len() > a.len() && b.as_bytes()[a.len()] == b'/' && b.starts_with(a))
}

fn declared_reltype(part: &dyn Part) -> Result<String> {
    part.reltype()
        .map(str::to_string)
        .ok_or_else(|| {
            PackError::InvalidRelationship(format!(
                "part {} declares no relationship type",
                part.partname()
            ))
        })
}

fn enqueue_targets(rels: &Relationships, queue: &mut VecDeque<(PackURI, String)>) -> Result<()> {
    for rel in rels.iter() {
        if rel.is_external() {
            continue;
        }
        queue.push_back((rel.target_partname()?, rel.reltype().to_string()));
    }
    Ok(())
}

//! An implementation of the Open Packaging Conventions (OPC) package model.
//!
//! An OPC package is a ZIP archive of parts: named, typed content units
//! wired together by typed relationships. A content-types manifest maps
//! every part to a MIME type, and `.rels` parts carry the relationships from
//! the package root and from individual parts. This is the container format
//! underneath `.docx`, `.xlsx`, and `.pptx` files.
//!
//! Opening a package reads the manifest and root relationships, then chases
//! relationships to load every reachable part; saving writes the whole
//! graph back out with deterministic entry metadata.
//!
//! # Examples
//!
//! Build a package, relate a part from the root, and round-trip it:
//!
//! ```no_run
//! use opcpack::{Package, PackURI, XmlPart};
//!
//! # fn main() -> opcpack::Result<()> {
//! let partname = PackURI::new("/test/part.xml")?;
//! let mut part = XmlPart::new(partname, "application/xml".to_string())?
//!     .with_reltype("http://example.com/relationships/test".to_string());
//! part.set_xml("<test>hi there</test>");
//!
//! let mut package = Package::new();
//! package.add_part(Box::new(part), true)?;
//! package.relate_part("/test/part.xml", None)?;
//! package.save_as("example.zip")?;
//!
//! let loaded = Package::open("example.zip")?;
//! let part = loaded.get_part("/test/part.xml").unwrap();
//! assert_eq!(part.dump()?, b"<test>hi there</test>");
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod content_types;
pub mod coreprops;
pub mod error;
pub mod package;
pub mod packuri;
pub mod part;
pub mod phys;
pub mod rel;

pub use content_types::{ContentType, ContentTypes};
pub use coreprops::{CorePropertiesPart, DateValue};
pub use error::{PackError, Result};
pub use package::Package;
pub use packuri::{CONTENT_TYPES_URI, PACKAGE_RELS_URI, PackURI};
pub use part::{BlobPart, Part, PartRegistry, RelationshipOwner, XmlPart};
pub use phys::{ZipPkgReader, ZipPkgWriter};
pub use rel::{
    IdGenerator, RandomIdGenerator, Relationship, Relationships, SequentialIdGenerator, TargetMode,
};

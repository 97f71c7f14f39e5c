/// Error types for OPC package operations
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackError {
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Invalid part name: {0}")]
    InvalidPartName(String),

    #[error("Part name aliasing: {0}")]
    NameDerivative(String),

    #[error("Part not found: {0}")]
    PartNotFound(String),

    #[error("Duplicate content type declaration: {0}")]
    DuplicateContentType(String),

    #[error("Duplicate relationship id: {0}")]
    DuplicateRelationshipId(String),

    #[error("Relationship not found: {0}")]
    RelationshipNotFound(String),

    #[error("Invalid relationship: {0}")]
    InvalidRelationship(String),

    #[error("Malformed package data: {0}")]
    Format(String),

    #[error("Part has no content: {0}")]
    NoContent(String),

    #[error("Save target required for a package that was not opened from a file")]
    MissingTarget,

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Attribute error: {0}")]
    Attr(String),
}

impl From<quick_xml::events::attributes::AttrError> for PackError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        PackError::Attr(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PackError>;

//! The PackURI value type and utilities for working with part names.
//!
//! A PackURI is a part name within an OPC package. Part names always begin
//! with a forward slash and use forward slashes as separators; a handful of
//! further shape rules from the OPC specification are enforced at
//! construction time, so holding a PackURI means holding a valid part name.

use crate::error::{PackError, Result};

/// The member name of the content-types manifest.
pub const CONTENT_TYPES_URI: &str = "/[Content_Types].xml";

/// The part name of the package-level relationships part.
pub const PACKAGE_RELS_URI: &str = "/_rels/.rels";

/// A validated part name within an OPC package.
///
/// Construction enforces the OPC part-name grammar: non-empty, a leading
/// slash, no trailing slash, and no path segment that is `.` or ends in a
/// period. Derivative-name (aliasing) checks are a package-level concern
/// and live on [`crate::package::Package`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackURI {
    /// The full part name (e.g., "/word/document.xml")
    uri: String,
}

impl PackURI {
    /// Create a new PackURI from a string, validating the part-name shape.
    ///
    /// # Arguments
    /// * `uri` - The part name, which must begin with a forward slash
    ///
    /// # Returns
    /// * `Ok(PackURI)` if the name is a valid part name
    /// * `Err(PackError::InvalidPartName)` describing the rule it breaks
    pub fn new<S: Into<String>>(uri: S) -> Result<Self> {
        let uri = uri.into();
        if uri.is_empty() {
            return Err(PackError::InvalidPartName("part name is empty".to_string()));
        }
        if !uri.starts_with('/') {
            return Err(PackError::InvalidPartName(format!(
                "'{uri}' does not begin with a slash"
            )));
        }
        if uri.ends_with('/') {
            return Err(PackError::InvalidPartName(format!("'{uri}' ends with a slash")));
        }
        for segment in uri[1..].split('/') {
            if segment == "." {
                return Err(PackError::InvalidPartName(format!(
                    "'{uri}' contains a dot segment"
                )));
            }
            if segment.ends_with('.') {
                return Err(PackError::InvalidPartName(format!(
                    "'{uri}' contains a segment ending in a period"
                )));
            }
        }
        Ok(PackURI { uri })
    }

    /// Construct from a fixed name known to be a valid part name, such as
    /// [`PACKAGE_RELS_URI`]. Callers pass literals only, never input.
    pub(crate) fn known(uri: &str) -> Self {
        PackURI { uri: uri.to_string() }
    }

    /// Create a PackURI from a relative reference and a base URI.
    ///
    /// This translates a relative reference (like "../styles.xml") onto a
    /// base URI (like "/word") to produce an absolute PackURI
    /// (like "/styles.xml"). The result is validated as a part name.
    ///
    /// # Arguments
    /// * `base_uri` - The base URI to resolve from
    /// * `relative_ref` - The relative reference to resolve
    pub fn from_rel_ref(base_uri: &str, relative_ref: &str) -> Result<Self> {
        let joined = Self::join_paths(base_uri, relative_ref);
        let normalized = Self::normalize_path(&joined);
        Self::new(normalized)
    }

    /// Get the base URI (directory portion) of this PackURI.
    ///
    /// For example, "/ppt/slides" for "/ppt/slides/slide1.xml" and "/" for
    /// "/presentation.xml".
    pub fn base_uri(&self) -> &str {
        match self.uri.rfind('/') {
            Some(0) | None => "/",
            Some(pos) => &self.uri[..pos],
        }
    }

    /// Get the filename portion of this PackURI.
    ///
    /// For example, "slide1.xml" for "/ppt/slides/slide1.xml".
    pub fn filename(&self) -> &str {
        match self.uri.rfind('/') {
            Some(pos) => &self.uri[pos + 1..],
            None => "",
        }
    }

    /// Get the member name (part name with the leading slash stripped).
    ///
    /// This is the form used as the ZIP member name for the package item.
    pub fn membername(&self) -> &str {
        &self.uri[1..]
    }

    /// Get the PackURI of the .rels part corresponding to this PackURI.
    ///
    /// For example, "/word/_rels/document.xml.rels" for "/word/document.xml".
    pub fn rels_uri(&self) -> Result<PackURI> {
        let base_uri = self.base_uri();
        let rels_uri_str = if base_uri == "/" {
            format!("/_rels/{}.rels", self.filename())
        } else {
            format!("{}/_rels/{}.rels", base_uri, self.filename())
        };
        Self::new(rels_uri_str)
    }

    /// Get the full part-name string.
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    fn join_paths(base: &str, rel: &str) -> String {
        if base.ends_with('/') {
            format!("{base}{rel}")
        } else {
            format!("{base}/{rel}")
        }
    }

    /// Normalize a path, resolving ".." and "." segments.
    fn normalize_path(path: &str) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for part in path.split('/') {
            match part {
                "" | "." => {
                    if parts.is_empty() {
                        // keep the leading slash
                        parts.push("");
                    }
                }
                ".." => {
                    if parts.len() > 1 {
                        parts.pop();
                    }
                }
                _ => parts.push(part),
            }
        }
        if parts.len() <= 1 {
            return "/".to_string();
        }
        parts.join("/")
    }
}

impl std::fmt::Display for PackURI {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri)
    }
}

impl AsRef<str> for PackURI {
    fn as_ref(&self) -> &str {
        &self.uri
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_packuri_new() {
        assert!(PackURI::new("/abc").is_ok());
        assert!(PackURI::new("/foo/bar").is_ok());
        assert!(PackURI::new("/foo-1/bar.xml").is_ok());
        assert!(PackURI::new("/_rels/.rels").is_ok());
        assert!(PackURI::new("/[Content_Types].xml").is_ok());
    }

    #[test]
    fn test_packuri_rejects_bad_shapes() {
        assert!(PackURI::new("").is_err());
        assert!(PackURI::new("abc").is_err());
        assert!(PackURI::new("/abc/").is_err());
        assert!(PackURI::new("/foo/bar.").is_err());
        assert!(PackURI::new("/bar/./abc.xml").is_err());
        assert!(PackURI::new("/").is_err());
    }

    #[test]
    fn test_base_uri() {
        let uri = PackURI::new("/ppt/slides/slide1.xml").unwrap();
        assert_eq!(uri.base_uri(), "/ppt/slides");

        let top = PackURI::new("/presentation.xml").unwrap();
        assert_eq!(top.base_uri(), "/");
    }

    #[test]
    fn test_filename() {
        let uri = PackURI::new("/ppt/slides/slide1.xml").unwrap();
        assert_eq!(uri.filename(), "slide1.xml");
    }

    #[test]
    fn test_membername() {
        let uri = PackURI::new("/word/document.xml").unwrap();
        assert_eq!(uri.membername(), "word/document.xml");
    }

    #[test]
    fn test_rels_uri() {
        let uri = PackURI::new("/word/document.xml").unwrap();
        assert_eq!(uri.rels_uri().unwrap().as_str(), "/word/_rels/document.xml.rels");

        let top = PackURI::new("/part.xml").unwrap();
        assert_eq!(top.rels_uri().unwrap().as_str(), "/_rels/part.xml.rels");
    }

    #[test]
    fn test_from_rel_ref() {
        let uri = PackURI::from_rel_ref("/word", "media/image1.png").unwrap();
        assert_eq!(uri.as_str(), "/word/media/image1.png");

        let uri = PackURI::from_rel_ref("/word", "../styles.xml").unwrap();
        assert_eq!(uri.as_str(), "/styles.xml");

        let uri = PackURI::from_rel_ref("/", "word/document.xml").unwrap();
        assert_eq!(uri.as_str(), "/word/document.xml");
    }

    proptest! {
        #[test]
        fn valid_names_always_construct(name in "(/[a-z][a-z0-9-]{0,7}){1,4}(\\.[a-z]{1,4})?") {
            let uri = PackURI::new(name.clone()).unwrap();
            prop_assert_eq!(uri.as_str(), name.as_str());
            prop_assert!(uri.rels_uri().is_ok());
        }

        #[test]
        fn trailing_slash_never_constructs(name in "(/[a-z]{1,8}){1,4}/") {
            prop_assert!(PackURI::new(name).is_err());
        }
    }
}

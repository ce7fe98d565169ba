//! Shared types and identifiers for Quay.
//!
//! This crate defines the data model used across the Quay workspace:
//! the node identifier ([`NodeId`]), the transport tag ([`TransportType`]),
//! registry records ([`Node`], [`FileRecord`]) and the listing projection
//! ([`FileEntry`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while parsing or validating model values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    /// A transport tag that no connector implementation is known for.
    #[error("unrecognized transport type: {0}")]
    UnknownTransport(String),

    /// A logical file path that cannot be stored.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A node identifier that is not a UUID.
    #[error("invalid node id {0:?}")]
    InvalidNodeId(String),
}

// ---------------------------------------------------------------------------
// Node identity
// ---------------------------------------------------------------------------

/// Globally unique identifier of a registered storage node.
///
/// Ordering is the byte order of the underlying UUID; placement uses it to
/// break ties deterministically.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Allocate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return the raw 16-byte representation.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl From<[u8; 16]> for NodeId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

impl FromStr for NodeId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| TypeError::InvalidNodeId(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Tag selecting which connector implementation handles a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum TransportType {
    /// A directory on the coordinator's own filesystem.
    Local,
    /// Volatile in-process storage.
    Memory,
    /// A remote node agent reached over TCP.
    Net,
}

impl TransportType {
    /// All transport types, in tag order.
    pub const ALL: [TransportType; 3] = [Self::Local, Self::Memory, Self::Net];

    /// Numeric tag used by front ends that pass the transport as an integer.
    pub fn tag(self) -> u8 {
        match self {
            Self::Local => 0,
            Self::Memory => 1,
            Self::Net => 2,
        }
    }

    /// Resolve a numeric tag.
    pub fn from_tag(tag: i64) -> Result<Self, TypeError> {
        match tag {
            0 => Ok(Self::Local),
            1 => Ok(Self::Memory),
            2 => Ok(Self::Net),
            other => Err(TypeError::UnknownTransport(other.to_string())),
        }
    }

    /// Lowercase name, as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Memory => "memory",
            Self::Net => "net",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransportType {
    type Err = TypeError;

    /// Accepts either the lowercase name or the numeric tag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(tag) = s.parse::<i64>() {
            return Self::from_tag(tag);
        }
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| TypeError::UnknownTransport(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Registry records
// ---------------------------------------------------------------------------

/// A registered storage node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Immutable identity, assigned at registration.
    pub id: NodeId,
    /// Transport-specific endpoint (directory, `host:port`, label).
    pub address: String,
    /// Which connector implementation handles this node.
    pub transport: TransportType,
    /// Maximum bytes this node may hold.
    pub capacity: u64,
    /// Bytes currently owned by file records on this node.
    ///
    /// Derived from the file records; never persisted.
    #[serde(skip)]
    pub used: u64,
}

impl Node {
    /// Bytes still available before reaching `capacity`.
    pub fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }
}

/// Metadata binding a logical path to the node holding its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Logical path, unique across the store.
    pub path: String,
    /// Byte length, fixed once stored.
    pub size: u64,
    /// The single node owning this file.
    pub owner: NodeId,
    /// Physical path on the owning node.
    pub location: String,
    /// Commit sequence number, used for insertion-ordered listing.
    pub seq: u64,
}

impl FileRecord {
    /// Project to the `(path, size)` pair returned by listings.
    pub fn entry(&self) -> FileEntry {
        FileEntry {
            path: self.path.clone(),
            size: self.size,
        }
    }
}

/// `(path, size)` pair returned by the listing operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Logical path.
    pub path: String,
    /// Byte length.
    pub size: u64,
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Validate a logical path and return its canonical form.
///
/// The canonical form is `/` followed by the path's segments joined with
/// `/`. Empty and `.` segments are dropped, so `a`, `/a`, `//a` and `/./a`
/// all name the same file. Paths containing NUL, paths with a `..` segment
/// and paths with no segments left are rejected.
pub fn canonical_path(path: &str) -> Result<String, TypeError> {
    let invalid = |reason| TypeError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if path.contains('\0') {
        return Err(invalid("contains NUL"));
    }
    let mut canonical = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if segment.split('\\').any(|part| part == "..") {
            return Err(invalid("contains a '..' segment"));
        }
        canonical.push('/');
        canonical.push_str(segment);
    }
    if canonical.is_empty() {
        return Err(invalid("empty"));
    }
    Ok(canonical)
}

/// Validate a logical path and return its physical location on a node:
/// the [canonical](canonical_path) path without its leading `/`.
pub fn location_for(path: &str) -> Result<String, TypeError> {
    let mut canonical = canonical_path(path)?;
    canonical.remove(0);
    Ok(canonical)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_parse_roundtrip() {
        let id = NodeId::random();
        let parsed: NodeId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_node_id_rejects_garbage() {
        assert!(matches!(
            "not-a-uuid".parse::<NodeId>(),
            Err(TypeError::InvalidNodeId(_))
        ));
    }

    #[test]
    fn test_node_ids_are_unique() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_ne!(a, b);
    }

    #[test]
    fn test_node_id_ordering_follows_bytes() {
        let low = NodeId::from([0u8; 16]);
        let high = NodeId::from([0xffu8; 16]);
        assert!(low < high);
    }

    #[test]
    fn test_transport_from_tag() {
        assert_eq!(TransportType::from_tag(0), Ok(TransportType::Local));
        assert_eq!(TransportType::from_tag(1), Ok(TransportType::Memory));
        assert_eq!(TransportType::from_tag(2), Ok(TransportType::Net));
        assert!(matches!(
            TransportType::from_tag(7),
            Err(TypeError::UnknownTransport(_))
        ));
        assert!(TransportType::from_tag(-1).is_err());
    }

    #[test]
    fn test_transport_tag_matches_from_tag() {
        for t in TransportType::ALL {
            assert_eq!(TransportType::from_tag(t.tag() as i64), Ok(t));
        }
    }

    #[test]
    fn test_transport_from_str_accepts_names_and_tags() {
        assert_eq!("local".parse(), Ok(TransportType::Local));
        assert_eq!("NET".parse(), Ok(TransportType::Net));
        assert_eq!(" 1 ".parse(), Ok(TransportType::Memory));
        assert!("ftp".parse::<TransportType>().is_err());
    }

    #[test]
    fn test_node_free() {
        let node = Node {
            id: NodeId::random(),
            address: "/srv/a".into(),
            transport: TransportType::Local,
            capacity: 100,
            used: 30,
        };
        assert_eq!(node.free(), 70);
    }

    #[test]
    fn test_node_used_is_not_serialized() {
        let node = Node {
            id: NodeId::random(),
            address: "mem".into(),
            transport: TransportType::Memory,
            capacity: 100,
            used: 42,
        };
        let bytes = postcard::to_allocvec(&node).unwrap();
        let back: Node = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back.used, 0);
        assert_eq!(back.capacity, 100);
        assert_eq!(back.id, node.id);
    }

    #[test]
    fn test_location_strips_leading_slash() {
        assert_eq!(location_for("/a/b.txt").unwrap(), "a/b.txt");
        assert_eq!(location_for("c.txt").unwrap(), "c.txt");
    }

    #[test]
    fn test_location_rejects_bad_paths() {
        for bad in ["", "/", "///", "a/../b", "..", "x\0y", "a\\..\\b"] {
            assert!(location_for(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_spellings_of_one_path_share_a_canonical_form() {
        for alias in ["a/b", "/a/b", "//a//b", "/./a/b/", "a/./b"] {
            assert_eq!(canonical_path(alias).unwrap(), "/a/b", "{alias:?}");
            assert_eq!(location_for(alias).unwrap(), "a/b", "{alias:?}");
        }
    }

    #[test]
    fn test_canonical_rejects_dot_only_paths() {
        for bad in [".", "/./", "./."] {
            assert!(canonical_path(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_location_allows_dots_inside_names() {
        assert_eq!(location_for("a/..b/c..").unwrap(), "a/..b/c..");
    }
}

//! Canonical content-derived identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::tree::NodeKind;

const SCHEME: &str = "swh";
const VERSION: &str = "1";
const HASH_HEX_LEN: usize = 40;

/// Canonical identifier of a content or directory object.
///
/// The string is supplied by the identifier deriver upstream and never
/// changes afterwards. Identical subtrees carry identical identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Build `swh:1:<cnt|dir>:<hex>` from a kind and a hex digest.
    pub fn from_digest(kind: NodeKind, hex_digest: &str) -> Self {
        Self(format!("{SCHEME}:{VERSION}:{}:{hex_digest}", kind.tag()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object kind encoded in the identifier, if it is well formed.
    pub fn kind(&self) -> Option<NodeKind> {
        let mut parts = self.0.split(':');
        let (Some(scheme), Some(version), Some(tag), Some(hash), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return None;
        };
        if scheme != SCHEME || version != VERSION {
            return None;
        }
        if hash.len() != HASH_HEX_LEN
            || !hash
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return None;
        }
        NodeKind::from_tag(tag)
    }

    /// Whether the archive would accept this identifier at all.
    pub fn is_well_formed(&self) -> bool {
        self.kind().is_some()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Node identifiers.
//!
//! Two textual forms are accepted:
//!
//! - `ns=<index>;<id>` addresses a namespace by its index on one server.
//! - `nsu=<uri>;<id>` addresses it by URI and is resolved against the
//!   server's namespace table.
//!
//! `<id>` is one of `i=<u32>`, `s=<string>`, `g=<guid>` or `b=<base64>`.
//! Without a namespace prefix the standard namespace (0) is assumed.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error produced while parsing or resolving a node id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid node id '{input}': {reason}")]
pub struct NodeIdError {
    /// The text that failed.
    pub input: String,
    /// What was wrong with it.
    pub reason: String,
}

impl NodeIdError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// NodeIdentifier
// =============================================================================

/// The identifier part of a node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeIdentifier {
    /// `i=` numeric identifier.
    Numeric(u32),
    /// `s=` string identifier.
    String(String),
    /// `g=` GUID identifier.
    Guid(Uuid),
    /// `b=` opaque identifier.
    Opaque(Vec<u8>),
}

impl NodeIdentifier {
    fn parse(input: &str, part: &str) -> Result<Self, NodeIdError> {
        if let Some(value) = part.strip_prefix("i=") {
            value
                .parse::<u32>()
                .map(Self::Numeric)
                .map_err(|_| NodeIdError::new(input, "invalid numeric identifier"))
        } else if let Some(value) = part.strip_prefix("s=") {
            Ok(Self::String(value.to_string()))
        } else if let Some(value) = part.strip_prefix("g=") {
            Uuid::parse_str(value)
                .map(Self::Guid)
                .map_err(|e| NodeIdError::new(input, format!("invalid GUID: {e}")))
        } else if let Some(value) = part.strip_prefix("b=") {
            BASE64
                .decode(value)
                .map(Self::Opaque)
                .map_err(|e| NodeIdError::new(input, format!("invalid base64: {e}")))
        } else {
            Err(NodeIdError::new(input, "expected i=, s=, g= or b= identifier"))
        }
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v),
            Self::Guid(v) => write!(f, "g={}", v),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

// =============================================================================
// NodeId
// =============================================================================

/// A node id bound to one server's namespace indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,
    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Server object (ns=0, i=2253), the default event notifier.
    pub const SERVER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(2253),
    };

    /// Server namespace array (ns=0, i=2255).
    pub const NAMESPACE_ARRAY: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(2255),
    };

    /// Server status state (ns=0, i=2259), read as a keep-alive probe.
    pub const SERVER_STATE: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(2259),
    };

    /// Creates a numeric node id.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node id.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Renders this id in expanded form, naming the namespace by URI.
    ///
    /// The standard namespace and indices missing from `namespaces` keep
    /// the `ns=` form.
    pub fn to_expanded(&self, namespaces: &[String]) -> String {
        if self.namespace_index == 0 {
            return self.identifier.to_string();
        }
        match namespaces.get(self.namespace_index as usize) {
            Some(uri) => format!("nsu={};{}", uri, self.identifier),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index == 0 {
            write!(f, "{}", self.identifier)
        } else {
            write!(f, "ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match ExpandedNodeId::from_str(s)? {
            ExpandedNodeId {
                namespace: NamespaceRef::Index(namespace_index),
                identifier,
            } => Ok(Self {
                namespace_index,
                identifier,
            }),
            ExpandedNodeId { .. } => Err(NodeIdError::new(s, "namespace URI needs a namespace table")),
        }
    }
}

// =============================================================================
// ExpandedNodeId
// =============================================================================

/// How a parsed node id names its namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceRef {
    /// `ns=<index>` or no prefix.
    Index(u16),
    /// `nsu=<uri>`.
    Uri(String),
}

/// A node id as written in a request, before namespace resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedNodeId {
    /// Namespace reference.
    pub namespace: NamespaceRef,
    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl ExpandedNodeId {
    /// Resolves the namespace against a server's namespace table.
    ///
    /// # Errors
    ///
    /// Returns an error if a namespace URI is not in the table.
    pub fn resolve(&self, namespaces: &[String]) -> Result<NodeId, NodeIdError> {
        let namespace_index = match &self.namespace {
            NamespaceRef::Index(index) => *index,
            NamespaceRef::Uri(uri) => namespaces
                .iter()
                .position(|ns| ns == uri)
                .and_then(|index| u16::try_from(index).ok())
                .ok_or_else(|| {
                    NodeIdError::new(&format!("nsu={};{}", uri, self.identifier), "unknown namespace URI")
                })?,
        };

        Ok(NodeId {
            namespace_index,
            identifier: self.identifier.clone(),
        })
    }
}

impl FromStr for ExpandedNodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(NodeIdError::new(input, "empty node id"));
        }

        let (namespace, identifier_part) = if let Some(rest) = input.strip_prefix("nsu=") {
            let (uri, id) = rest
                .split_once(';')
                .ok_or_else(|| NodeIdError::new(input, "missing identifier after namespace URI"))?;
            if uri.is_empty() {
                return Err(NodeIdError::new(input, "empty namespace URI"));
            }
            (NamespaceRef::Uri(uri.to_string()), id)
        } else if let Some(rest) = input.strip_prefix("ns=") {
            let (index, id) = rest
                .split_once(';')
                .ok_or_else(|| NodeIdError::new(input, "missing identifier after namespace"))?;
            let index = index
                .parse::<u16>()
                .map_err(|_| NodeIdError::new(input, "invalid namespace index"))?;
            (NamespaceRef::Index(index), id)
        } else {
            (NamespaceRef::Index(0), input)
        };

        Ok(Self {
            namespace,
            identifier: NodeIdentifier::parse(input, identifier_part)?,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<String> {
        vec![
            "http://opcfoundation.org/UA/".to_string(),
            "urn:server".to_string(),
            "http://example.com/plant".to_string(),
        ]
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!("i=2253".parse::<NodeId>().unwrap(), NodeId::SERVER);
        assert_eq!("ns=2;s=Line1.Speed".parse::<NodeId>().unwrap(), NodeId::string(2, "Line1.Speed"));
        assert_eq!(
            "ns=1;b=AQID".parse::<NodeId>().unwrap().identifier,
            NodeIdentifier::Opaque(vec![1, 2, 3])
        );
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("q=1".parse::<NodeId>().is_err());
        assert!("".parse::<ExpandedNodeId>().is_err());
    }

    #[test]
    fn test_string_identifier_keeps_semicolons() {
        let node: NodeId = "ns=2;s=a;b".parse().unwrap();
        assert_eq!(node.identifier, NodeIdentifier::String("a;b".into()));
    }

    #[test]
    fn test_resolve_namespace_uri() {
        let expanded: ExpandedNodeId = "nsu=http://example.com/plant;i=42".parse().unwrap();
        let node = expanded.resolve(&table()).unwrap();
        assert_eq!(node, NodeId::numeric(2, 42));
        assert_eq!(node.to_expanded(&table()), "nsu=http://example.com/plant;i=42");
    }

    #[test]
    fn test_unknown_namespace_uri() {
        let expanded: ExpandedNodeId = "nsu=urn:missing;i=1".parse().unwrap();
        assert!(expanded.resolve(&table()).is_err());
    }

    #[test]
    fn test_expanded_falls_back_to_index() {
        assert_eq!(NodeId::numeric(9, 1).to_expanded(&table()), "ns=9;i=1");
        assert_eq!(NodeId::SERVER.to_expanded(&table()), "i=2253");
    }
}

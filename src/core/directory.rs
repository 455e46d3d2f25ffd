//! Service directory snapshot types.
//!
//! These mirror what a discovery collaborator hands to the gateway: a named
//! [`Service`] made of one or more [`ServiceEntry`] values (versions or
//! instance groups), each carrying the [`Node`]s that can actually be dialled.
//! The resolver only ever reads them.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One addressable backend instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Dial target in `host:port` form.
    pub address: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Node {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            metadata: HashMap::new(),
        }
    }
}

/// A registered version/instance group of a logical service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl ServiceEntry {
    pub fn new(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            nodes,
        }
    }
}

/// The unit returned by routing: every entry registered under one name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub entries: Vec<ServiceEntry>,
}

impl Service {
    pub fn new(name: impl Into<String>, entries: Vec<ServiceEntry>) -> Self {
        Self {
            name: name.into(),
            entries,
        }
    }

    /// All nodes of all entries, in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.entries.iter().flat_map(|entry| entry.nodes.iter())
    }

    pub fn node_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.nodes.len()).sum()
    }

    /// A service without nodes cannot serve anything and is treated as "not found".
    pub fn is_empty(&self) -> bool {
        self.node_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_are_flattened_across_entries() {
        let service = Service::new(
            "greeter",
            vec![
                ServiceEntry::new("greeter", vec![Node::new("a", "10.0.0.1:80")]),
                ServiceEntry::new(
                    "greeter",
                    vec![Node::new("b", "10.0.0.2:80"), Node::new("c", "10.0.0.3:80")],
                ),
            ],
        );

        let ids: Vec<&str> = service.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(service.node_count(), 3);
        assert!(!service.is_empty());
    }

    #[test]
    fn test_service_without_nodes_is_empty() {
        let service = Service::new("ghost", vec![ServiceEntry::new("ghost", vec![])]);
        assert!(service.is_empty());
        assert!(Service::default().is_empty());
    }
}

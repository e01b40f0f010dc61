//! The object graph produced by one build call.
//!
//! Entities live in an arena and are addressed by [`NodeId`]. A child shared
//! by several parents is one node referenced from each parent's collection,
//! so "same instance" is simply "same `NodeId`".

use crate::model::EntityLayout;
use crate::value::Value;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EntityNode {
    pub(crate) layout: Arc<EntityLayout>,
    pub(crate) values: Vec<Value>,
    pub(crate) collections: Vec<Vec<NodeId>>,
    /// Slot of the identity attribute, if the node was keyed by one.
    pub(crate) identity: Option<usize>,
}

impl EntityNode {
    pub(crate) fn new(layout: Arc<EntityLayout>, identity: Option<usize>) -> Self {
        Self {
            values: vec![Value::Null; layout.attributes.len()],
            collections: vec![Vec::new(); layout.collections.len()],
            layout,
            identity,
        }
    }
}

/// Arena of entities plus the ordered list of roots (first appearance order).
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub(crate) nodes: Vec<EntityNode>,
    pub(crate) roots: Vec<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            roots: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, node: EntityNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut EntityNode {
        &mut self.nodes[id.index()]
    }

    /// Number of root entities.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Number of distinct entities (roots and children) in the arena.
    pub fn entity_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn roots(&self) -> impl ExactSizeIterator<Item = EntityRef<'_>> + '_ {
        self.roots.iter().map(move |&id| EntityRef { graph: self, id })
    }

    pub fn root(&self, position: usize) -> Option<EntityRef<'_>> {
        self.roots
            .get(position)
            .map(|&id| EntityRef { graph: self, id })
    }

    pub fn node(&self, id: NodeId) -> Option<EntityRef<'_>> {
        (id.index() < self.nodes.len()).then_some(EntityRef { graph: self, id })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for Graph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.roots.len()))?;
        for root in self.roots() {
            seq.serialize_element(&root)?;
        }
        seq.end()
    }
}

/// Borrowed view of one entity in a [`Graph`].
#[derive(Clone, Copy)]
pub struct EntityRef<'g> {
    graph: &'g Graph,
    id: NodeId,
}

impl<'g> EntityRef<'g> {
    fn node(&self) -> &'g EntityNode {
        &self.graph.nodes[self.id.index()]
    }

    pub const fn node_id(&self) -> NodeId {
        self.id
    }

    pub fn entity_type(&self) -> &'g str {
        &self.node().layout.name
    }

    /// Attribute by name, nearest declaration in the ancestor chain first.
    pub fn get(&self, attribute: &str) -> Option<&'g Value> {
        let node = self.node();
        node.layout
            .attribute_slot(attribute)
            .map(|slot| &node.values[slot])
    }

    /// The value this entity was deduplicated by.
    pub fn identity(&self) -> Option<&'g Value> {
        let node = self.node();
        node.identity.map(|slot| &node.values[slot])
    }

    pub fn children(&self, collection: &str) -> Option<Children<'g>> {
        let node = self.node();
        node.layout.collection_slot(collection).map(|slot| Children {
            graph: self.graph,
            ids: node.collections[slot].iter(),
        })
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &'g str> + 'g {
        self.node().layout.collections.iter().map(|c| c.name.as_str())
    }

    /// Whether both views point at the same arena node.
    pub fn same_instance(&self, other: &EntityRef<'_>) -> bool {
        std::ptr::eq(self.graph, other.graph) && self.id == other.id
    }
}

impl std::fmt::Debug for EntityRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRef")
            .field("id", &self.id)
            .field("entity_type", &self.entity_type())
            .field("identity", &self.identity())
            .finish()
    }
}

pub struct Children<'g> {
    graph: &'g Graph,
    ids: std::slice::Iter<'g, NodeId>,
}

impl<'g> Iterator for Children<'g> {
    type Item = EntityRef<'g>;

    fn next(&mut self) -> Option<Self::Item> {
        self.ids.next().map(|&id| EntityRef {
            graph: self.graph,
            id,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl ExactSizeIterator for Children<'_> {}

impl Serialize for EntityRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let node = self.node();
        let layout = &node.layout;
        let mut map = serializer.serialize_map(None)?;

        // Shadowed ancestor attributes share a name with a nearer one; only
        // the nearest is emitted.
        for (slot, attr) in layout.attributes.iter().enumerate() {
            if layout.attribute_slot(&attr.name) == Some(slot) {
                map.serialize_entry(&attr.name, &node.values[slot])?;
            }
        }
        for (slot, collection) in layout.collections.iter().enumerate() {
            if layout.collection_slot(&collection.name) == Some(slot) {
                let children: Vec<EntityRef<'_>> = node.collections[slot]
                    .iter()
                    .map(|&id| EntityRef {
                        graph: self.graph,
                        id,
                    })
                    .collect();
                map.serialize_entry(&collection.name, &children)?;
            }
        }
        map.end()
    }
}

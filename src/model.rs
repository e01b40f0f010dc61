//! Entity type declarations and the validated catalog built from them.
//!
//! An [`EntityType`] is the explicit stand-in for a domain class: a name, an
//! optional supertype, and an ordered list of scalar and collection
//! attributes. [`TypeCatalog`] flattens each type together with its ancestor
//! chain into an immutable [`EntityLayout`] of numbered slots, so the build
//! engine reads and writes attributes by index instead of by name.

use crate::error::ConfigurationError;
use crate::value::ValueKind;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDecl {
    pub name: String,
    #[serde(default)]
    pub kind: ValueKind,
    /// Element entity type; `Some` makes this an append-only collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl AttributeDecl {
    pub fn scalar(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            collection: None,
        }
    }

    pub fn collection(name: impl Into<String>, element: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ValueKind::Any,
            collection: Some(element.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub attributes: Vec<AttributeDecl>,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extends: None,
            is_abstract: false,
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.extends = Some(supertype.into());
        self
    }

    #[must_use]
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.attributes.push(AttributeDecl::scalar(name, kind));
        self
    }

    #[must_use]
    pub fn collection(mut self, name: impl Into<String>, element: impl Into<String>) -> Self {
        self.attributes.push(AttributeDecl::collection(name, element));
        self
    }
}

/// Index of an entity type inside one [`TypeCatalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityTypeId(pub(crate) u32);

impl EntityTypeId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct AttributeSlot {
    pub name: String,
    pub kind: ValueKind,
    /// Position in the ancestor chain of the type that declared it (0 = self).
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub struct CollectionSlot {
    pub name: String,
    pub element: String,
    pub depth: usize,
}

/// Flattened, immutable shape of one entity type.
#[derive(Debug)]
pub struct EntityLayout {
    pub name: String,
    pub instantiable: bool,
    pub attributes: Vec<AttributeSlot>,
    pub collections: Vec<CollectionSlot>,
}

/// Where a target attribute name resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRef {
    Scalar(usize),
    Collection(usize),
}

impl EntityLayout {
    pub fn attribute_slot(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn collection_slot(&self, name: &str) -> Option<usize> {
        self.collections.iter().position(|c| c.name == name)
    }

    /// Nearest declaration wins: the type itself, then each ancestor in turn.
    pub fn resolve(&self, name: &str) -> Option<SlotRef> {
        let scalar = self
            .attribute_slot(name)
            .map(|i| (self.attributes[i].depth, SlotRef::Scalar(i)));
        let collection = self
            .collection_slot(name)
            .map(|i| (self.collections[i].depth, SlotRef::Collection(i)));

        match (scalar, collection) {
            (Some(s), Some(c)) => Some(if c.0 < s.0 { c.1 } else { s.1 }),
            (Some(s), None) => Some(s.1),
            (None, Some(c)) => Some(c.1),
            (None, None) => None,
        }
    }
}

/// Validated set of entity layouts for one schema.
#[derive(Debug)]
pub struct TypeCatalog {
    layouts: Vec<Arc<EntityLayout>>,
    by_name: FxHashMap<String, EntityTypeId>,
}

impl TypeCatalog {
    pub fn new(schema: &str, types: &[EntityType]) -> Result<Self, ConfigurationError> {
        let mut by_name = FxHashMap::default();
        for (i, ty) in types.iter().enumerate() {
            if by_name.insert(ty.name.clone(), i).is_some() {
                return Err(ConfigurationError::DuplicateEntityType {
                    schema: schema.to_string(),
                    entity_type: ty.name.clone(),
                });
            }
            let mut seen = FxHashMap::default();
            for attr in &ty.attributes {
                if seen.insert(attr.name.as_str(), ()).is_some() {
                    return Err(ConfigurationError::DuplicateAttribute {
                        schema: schema.to_string(),
                        entity_type: ty.name.clone(),
                        attribute: attr.name.clone(),
                    });
                }
            }
        }

        for ty in types {
            for attr in &ty.attributes {
                if let Some(element) = &attr.collection {
                    if !by_name.contains_key(element) {
                        warn!(
                            schema,
                            entity_type = ty.name.as_str(),
                            collection = attr.name.as_str(),
                            element = element.as_str(),
                            "Collection element type is not declared; nothing will be linked into it"
                        );
                    }
                }
            }
        }

        let mut layouts = Vec::with_capacity(types.len());
        for ty in types {
            let chain = ancestor_chain(schema, ty, types, &by_name)?;
            layouts.push(Arc::new(flatten(ty, &chain)));
        }

        let by_name = by_name
            .into_iter()
            .map(|(name, i)| (name, EntityTypeId(i as u32)))
            .collect();

        Ok(Self { layouts, by_name })
    }

    pub fn id(&self, name: &str) -> Option<EntityTypeId> {
        self.by_name.get(name).copied()
    }

    pub fn layout(&self, id: EntityTypeId) -> &Arc<EntityLayout> {
        &self.layouts[id.index()]
    }

    pub fn name(&self, id: EntityTypeId) -> &str {
        &self.layouts[id.index()].name
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// First collection on `parent` (or its ancestors) whose element type is
    /// exactly `child`.
    pub fn resolve_collection(&self, parent: EntityTypeId, child: EntityTypeId) -> Option<usize> {
        let child_name = self.name(child);
        self.layout(parent)
            .collections
            .iter()
            .position(|c| c.element == child_name)
    }
}

fn ancestor_chain<'a>(
    schema: &str,
    ty: &'a EntityType,
    types: &'a [EntityType],
    by_name: &FxHashMap<String, usize>,
) -> Result<Vec<&'a EntityType>, ConfigurationError> {
    let mut chain = vec![ty];
    let mut cursor = ty;
    while let Some(supertype) = &cursor.extends {
        let &i = by_name
            .get(supertype)
            .ok_or_else(|| ConfigurationError::UnknownEntityType {
                schema: schema.to_string(),
                entity_type: supertype.clone(),
            })?;
        cursor = &types[i];
        if chain.iter().any(|seen| seen.name == cursor.name) {
            return Err(ConfigurationError::CyclicInheritance {
                schema: schema.to_string(),
                entity_type: ty.name.clone(),
            });
        }
        chain.push(cursor);
    }
    Ok(chain)
}

fn flatten(ty: &EntityType, chain: &[&EntityType]) -> EntityLayout {
    let mut attributes = Vec::new();
    let mut collections = Vec::new();

    for (depth, declared) in chain.iter().enumerate() {
        for attr in &declared.attributes {
            match &attr.collection {
                Some(element) => collections.push(CollectionSlot {
                    name: attr.name.clone(),
                    element: element.clone(),
                    depth,
                }),
                None => attributes.push(AttributeSlot {
                    name: attr.name.clone(),
                    kind: attr.kind,
                    depth,
                }),
            }
        }
    }

    EntityLayout {
        name: ty.name.clone(),
        instantiable: !ty.is_abstract,
        attributes,
        collections,
    }
}

//! Metadata extraction: turns a [`SchemaDef`] into validated, immutable
//! [`SchemaMetadata`].
//!
//! Every target attribute is resolved to a slot up front, so a misconfigured
//! schema fails here, once, instead of on some later row.

use crate::error::ConfigurationError;
use crate::model::{EntityTypeId, SlotRef, TypeCatalog};
use crate::schema::{FieldDecl, SchemaDef};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// One resolved field rule.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub source: String,
    pub target_type: EntityTypeId,
    pub attribute: String,
    /// Scalar slot on the target type's layout.
    pub slot: usize,
    /// `None` for root-level mappings.
    pub parent_type: Option<EntityTypeId>,
    pub identity: bool,
}

/// How a child level finds its parent instance within one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentLink {
    /// The row's root instance.
    Root,
    /// Whatever this row recorded for the level at that index.
    Level(usize),
    /// The parent type has no mappings in this schema.
    Unlinked,
}

/// All mappings of one non-root entity type.
#[derive(Debug, Clone)]
pub struct EntityGroup {
    pub entity_type: EntityTypeId,
    pub parent_type: EntityTypeId,
    pub parent: ParentLink,
    /// Index into [`SchemaMetadata::child_mappings`].
    pub identity: usize,
    /// Indices into [`SchemaMetadata::child_mappings`], in declaration order.
    pub mappings: Vec<usize>,
}

/// Validated mapping description for one row schema. Child levels are kept
/// in the order their entity type was first declared, which is the order the
/// engine visits them in (shallow to deep).
#[derive(Debug)]
pub struct SchemaMetadata {
    schema: String,
    catalog: TypeCatalog,
    root_type: EntityTypeId,
    root_mappings: Vec<FieldMapping>,
    root_identity: usize,
    child_mappings: Vec<FieldMapping>,
    groups: Vec<EntityGroup>,
}

impl SchemaMetadata {
    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub const fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub const fn root_type(&self) -> EntityTypeId {
        self.root_type
    }

    pub fn root_mappings(&self) -> &[FieldMapping] {
        &self.root_mappings
    }

    pub fn root_identity(&self) -> &FieldMapping {
        &self.root_mappings[self.root_identity]
    }

    pub fn child_mappings(&self) -> &[FieldMapping] {
        &self.child_mappings
    }

    pub fn groups(&self) -> &[EntityGroup] {
        &self.groups
    }

    pub fn identity_of(&self, group: &EntityGroup) -> &FieldMapping {
        &self.child_mappings[group.identity]
    }

    pub fn mappings_of<'a>(
        &'a self,
        group: &'a EntityGroup,
    ) -> impl Iterator<Item = &'a FieldMapping> + 'a {
        group.mappings.iter().map(|&i| &self.child_mappings[i])
    }

    /// Child entity type names in visiting order.
    pub fn child_types(&self) -> impl Iterator<Item = &str> + '_ {
        self.groups.iter().map(|g| self.catalog.name(g.entity_type))
    }
}

struct PendingLevel {
    entity_type: EntityTypeId,
    parent_type: EntityTypeId,
    identity: Option<usize>,
    mappings: Vec<usize>,
}

/// Validate `def` and build its metadata.
pub fn extract(def: &SchemaDef) -> Result<SchemaMetadata, ConfigurationError> {
    let schema = def.name.as_str();
    let catalog = TypeCatalog::new(schema, &def.entities)?;

    let mut root_type: Option<EntityTypeId> = None;
    let mut root_mappings: Vec<FieldMapping> = Vec::new();
    let mut child_mappings: Vec<FieldMapping> = Vec::new();
    let mut levels: Vec<PendingLevel> = Vec::new();
    let mut group_index: FxHashMap<EntityTypeId, usize> = FxHashMap::default();

    for decl in &def.fields {
        let target = lookup_type(&catalog, schema, &decl.target)?;
        let slot = resolve_slot(&catalog, schema, decl, target)?;
        let parent_type = match &decl.parent {
            Some(parent) => Some(lookup_type(&catalog, schema, parent)?),
            None => None,
        };

        let mapping = FieldMapping {
            source: decl.source.clone(),
            target_type: target,
            attribute: decl.attribute.clone(),
            slot,
            parent_type,
            identity: decl.is_identity(),
        };

        let Some(parent_type) = parent_type else {
            match root_type {
                None => root_type = Some(target),
                Some(root) if root != target => {
                    return Err(ConfigurationError::ConflictingRootTypes {
                        schema: schema.to_string(),
                        first: catalog.name(root).to_string(),
                        second: decl.target.clone(),
                    });
                }
                Some(_) => {}
            }
            if mapping.identity {
                if let Some(previous) = root_mappings.iter().find(|m| m.identity) {
                    return Err(duplicate_identity(schema, decl, previous));
                }
            }
            root_mappings.push(mapping);
            continue;
        };

        let index = child_mappings.len();
        let g = match group_index.get(&target) {
            Some(&g) => g,
            None => {
                group_index.insert(target, levels.len());
                levels.push(PendingLevel {
                    entity_type: target,
                    parent_type,
                    identity: None,
                    mappings: Vec::new(),
                });
                levels.len() - 1
            }
        };

        let level = &mut levels[g];
        if level.parent_type != parent_type {
            return Err(ConfigurationError::ConflictingParentTypes {
                schema: schema.to_string(),
                entity_type: decl.target.clone(),
                first: catalog.name(level.parent_type).to_string(),
                second: catalog.name(parent_type).to_string(),
            });
        }
        if mapping.identity {
            if let Some(previous) = level.identity {
                return Err(duplicate_identity(schema, decl, &child_mappings[previous]));
            }
            level.identity = Some(index);
        }
        level.mappings.push(index);
        child_mappings.push(mapping);
    }

    let Some(root_type) = root_type else {
        return Err(ConfigurationError::NoRootFields {
            schema: schema.to_string(),
        });
    };

    let Some(root_identity) = root_mappings.iter().position(|m| m.identity) else {
        return Err(ConfigurationError::MissingRootIdentity {
            schema: schema.to_string(),
            root: catalog.name(root_type).to_string(),
        });
    };

    // A child level of the root type may hang under the root; any other type
    // naming itself as parent could never be linked.
    if let Some(level) = levels
        .iter()
        .find(|l| l.parent_type == l.entity_type && l.entity_type != root_type)
    {
        return Err(ConfigurationError::SelfParent {
            schema: schema.to_string(),
            entity_type: catalog.name(level.entity_type).to_string(),
        });
    }

    let mut groups = Vec::with_capacity(levels.len());
    for (position, level) in levels.into_iter().enumerate() {
        let Some(identity) = level.identity else {
            return Err(ConfigurationError::MissingIdentity {
                schema: schema.to_string(),
                entity_type: catalog.name(level.entity_type).to_string(),
            });
        };

        let parent = if level.parent_type == root_type {
            ParentLink::Root
        } else if let Some(&parent_level) = group_index.get(&level.parent_type) {
            if parent_level > position {
                warn!(
                    schema,
                    entity_type = catalog.name(level.entity_type),
                    parent = catalog.name(level.parent_type),
                    "Child type declared before its parent type; it will never be linked"
                );
            }
            ParentLink::Level(parent_level)
        } else {
            warn!(
                schema,
                entity_type = catalog.name(level.entity_type),
                parent = catalog.name(level.parent_type),
                "Parent type has no mappings in this schema; it will never be linked"
            );
            ParentLink::Unlinked
        };

        groups.push(EntityGroup {
            entity_type: level.entity_type,
            parent_type: level.parent_type,
            parent,
            identity,
            mappings: level.mappings,
        });
    }

    debug!(
        schema,
        root = catalog.name(root_type),
        root_fields = root_mappings.len(),
        child_fields = child_mappings.len(),
        child_levels = groups.len(),
        "Schema metadata extracted"
    );

    Ok(SchemaMetadata {
        schema: schema.to_string(),
        catalog,
        root_type,
        root_mappings,
        root_identity,
        child_mappings,
        groups,
    })
}

fn lookup_type(
    catalog: &TypeCatalog,
    schema: &str,
    name: &str,
) -> Result<EntityTypeId, ConfigurationError> {
    catalog
        .id(name)
        .ok_or_else(|| ConfigurationError::UnknownEntityType {
            schema: schema.to_string(),
            entity_type: name.to_string(),
        })
}

fn resolve_slot(
    catalog: &TypeCatalog,
    schema: &str,
    decl: &FieldDecl,
    target: EntityTypeId,
) -> Result<usize, ConfigurationError> {
    match catalog.layout(target).resolve(&decl.attribute) {
        Some(SlotRef::Scalar(slot)) => Ok(slot),
        Some(SlotRef::Collection(_)) => Err(ConfigurationError::CollectionTarget {
            schema: schema.to_string(),
            source_field: decl.source.clone(),
            entity_type: decl.target.clone(),
            attribute: decl.attribute.clone(),
        }),
        None => Err(ConfigurationError::UnresolvedAttribute {
            schema: schema.to_string(),
            source_field: decl.source.clone(),
            entity_type: decl.target.clone(),
            attribute: decl.attribute.clone(),
        }),
    }
}

fn duplicate_identity(
    schema: &str,
    decl: &FieldDecl,
    previous: &FieldMapping,
) -> ConfigurationError {
    ConfigurationError::DuplicateIdentity {
        schema: schema.to_string(),
        entity_type: decl.target.clone(),
        first: previous.attribute.clone(),
        second: decl.attribute.clone(),
    }
}

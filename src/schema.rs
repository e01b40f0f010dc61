use crate::config::DEFAULT_IDENTITY_ATTRIBUTE;
use crate::model::EntityType;
use crate::row::Row;
use serde::{Deserialize, Serialize};

/// One declared field-level rule: row field `source` feeds `attribute` on
/// entity type `target`. `parent` is the entity type whose collection holds
/// `target`; it is absent for root-level fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub source: String,
    pub target: String,
    pub attribute: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<bool>,
}

impl FieldDecl {
    pub fn root(
        source: impl Into<String>,
        target: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            attribute: attribute.into(),
            parent: None,
            identity: None,
        }
    }

    pub fn child(
        source: impl Into<String>,
        target: impl Into<String>,
        attribute: impl Into<String>,
        parent: impl Into<String>,
    ) -> Self {
        Self {
            parent: Some(parent.into()),
            ..Self::root(source, target, attribute)
        }
    }

    /// Override the `"id"` naming convention.
    #[must_use]
    pub fn with_identity(mut self, identity: bool) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_identity(&self) -> bool {
        self.identity
            .unwrap_or_else(|| self.attribute == DEFAULT_IDENTITY_ATTRIBUTE)
    }
}

/// Explicit description of one row schema: the entity types it feeds and the
/// ordered field rules. Declaration order of child fields doubles as the
/// depth order of their entity types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDef {
    pub name: String,
    #[serde(default)]
    pub entities: Vec<EntityType>,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

impl SchemaDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: Vec::new(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn entity(mut self, entity: EntityType) -> Self {
        self.entities.push(entity);
        self
    }

    #[must_use]
    pub fn field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn root_field(
        self,
        source: impl Into<String>,
        target: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        self.field(FieldDecl::root(source, target, attribute))
    }

    #[must_use]
    pub fn child_field(
        self,
        source: impl Into<String>,
        target: impl Into<String>,
        attribute: impl Into<String>,
        parent: impl Into<String>,
    ) -> Self {
        self.field(FieldDecl::child(source, target, attribute, parent))
    }
}

/// A row type that carries its own schema description. Caches key on the
/// implementing type, so `describe` runs at most once per process.
pub trait RowSchema: Row + 'static {
    fn describe() -> SchemaDef;
}

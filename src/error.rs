use crate::value::ValueKind;
use thiserror::Error as ThisError;

/// Schema-level problems found while extracting metadata. Raised once, on the
/// first use of a schema, and never cached as valid metadata.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ConfigurationError {
    #[error("schema '{schema}' declares no root-level fields")]
    NoRootFields { schema: String },

    #[error("schema '{schema}' has no root-level identity field for root type '{root}'")]
    MissingRootIdentity { schema: String, root: String },

    #[error(
        "schema '{schema}' maps root-level fields onto both '{first}' and '{second}'; \
         all root-level fields must target the same root type"
    )]
    ConflictingRootTypes {
        schema: String,
        first: String,
        second: String,
    },

    #[error("schema '{schema}' references unknown entity type '{entity_type}'")]
    UnknownEntityType { schema: String, entity_type: String },

    #[error("schema '{schema}' declares entity type '{entity_type}' more than once")]
    DuplicateEntityType { schema: String, entity_type: String },

    #[error("entity type '{entity_type}' in schema '{schema}' declares attribute '{attribute}' more than once")]
    DuplicateAttribute {
        schema: String,
        entity_type: String,
        attribute: String,
    },

    #[error("entity type '{entity_type}' in schema '{schema}' has a cyclic supertype chain")]
    CyclicInheritance { schema: String, entity_type: String },

    #[error(
        "attribute '{attribute}' not found on entity type '{entity_type}' or its ancestors \
         (declared on field '{schema}#{source_field}')"
    )]
    UnresolvedAttribute {
        schema: String,
        source_field: String,
        entity_type: String,
        attribute: String,
    },

    #[error(
        "attribute '{attribute}' on entity type '{entity_type}' is a collection and cannot be \
         mapped from field '{schema}#{source_field}'"
    )]
    CollectionTarget {
        schema: String,
        source_field: String,
        entity_type: String,
        attribute: String,
    },

    #[error("entity type '{entity_type}' in schema '{schema}' has no identity field")]
    MissingIdentity { schema: String, entity_type: String },

    #[error("entity type '{entity_type}' in schema '{schema}' has more than one identity field ('{first}', '{second}')")]
    DuplicateIdentity {
        schema: String,
        entity_type: String,
        first: String,
        second: String,
    },

    #[error("entity type '{entity_type}' in schema '{schema}' is declared under both '{first}' and '{second}'")]
    ConflictingParentTypes {
        schema: String,
        entity_type: String,
        first: String,
        second: String,
    },

    #[error("entity type '{entity_type}' in schema '{schema}' declares itself as its own parent")]
    SelfParent { schema: String, entity_type: String },
}

/// Row-level or structural failure during one build call. Aborts the call;
/// no partial graph is returned.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum MappingError {
    #[error(
        "null identity for entity type '{entity_type}' while mapping schema '{schema}'; \
         use NullIdStrategy::Skip to ignore it or NullIdStrategy::AllowNull to key it by null"
    )]
    NullIdentity { schema: String, entity_type: String },

    #[error("cannot read source field '{field}' from a '{schema}' row")]
    FieldRead { schema: String, field: String },

    #[error(
        "cannot set attribute '{attribute}' on '{entity_type}': expected {expected}, found {found} \
         (schema '{schema}')"
    )]
    AttributeWrite {
        schema: String,
        entity_type: String,
        attribute: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("cannot instantiate abstract entity type '{entity_type}' (schema '{schema}')")]
    Instantiation { schema: String, entity_type: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Mapping,
}

/// Any failure surfaced by the mapping entry points.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

impl Error {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Mapping(_) => ErrorKind::Mapping,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

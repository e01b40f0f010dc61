//! Flatgraph: fold flat JOIN rows into a deduplicated entity graph
//!
//! A relational query that joins a parent with its children repeats the
//! parent's columns on every row. This crate takes those rows, plus an
//! explicit description of which column feeds which attribute of which entity
//! type, and rebuilds the hierarchy: one instance per distinct identity, every
//! child linked into its parent's collection exactly once, in first-appearance
//! order.
//!
//! # Pipeline
//!
//! 1. **Describe** -- A [`SchemaDef`] lists the entity types (with supertypes
//!    and collections) and the ordered field rules of one row schema
//! 2. **Extract** -- [`extract`] validates the description once and produces
//!    immutable [`SchemaMetadata`] with every attribute resolved to a slot
//! 3. **Build** -- A [`GraphBuildEngine`] makes one linear pass over the rows,
//!    deduplicating roots and children by `(type, identity)` and applying a
//!    [`NullIdStrategy`] to children whose identity is null
//! 4. **Navigate** -- The resulting [`Graph`] is an arena of entities viewed
//!    through [`EntityRef`]; a shared child is one node, reachable from every
//!    parent that references it
//!
//! # Caching
//!
//! Metadata and engines are computed once per row type (and per strategy)
//! and reused by every later call, from any thread. [`FlatGraphMapper`] owns
//! those caches; [`map`] and [`map_with_strategy`] go through a process-wide
//! instance. Invalid schemas are rejected every time and never cached.
//!
//! # Key Modules
//!
//! - [`model`] -- Entity type declarations and their flattened layouts
//! - [`schema`] -- Row schema descriptions and the [`RowSchema`] trait
//! - [`metadata`] -- Validation and slot resolution
//! - [`engine`] -- The single-pass graph build
//! - [`graph`] -- Arena graph, navigation, JSON serialisation
//! - [`cache`] -- Compute-once caches and the mapping facade
//! - [`input`] -- Schema and row file loading for the CLI
//! - [`stats`] -- Per-engine atomic counters
//!
//! # Example Usage
//!
//! ```bash
//! # Validate a schema description
//! flatgraph check --schema user_roles.json
//!
//! # Build the graph from CSV rows, keeping id-less children as one null instance
//! flatgraph map --schema user_roles.json --rows rows.csv --strategy allow-null --pretty
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod input;
pub mod metadata;
pub mod model;
pub mod row;
pub mod schema;
pub mod stats;
pub mod strategy;
pub mod value;

pub use cache::{map, map_with_strategy, FlatGraphMapper, OnceMap};
pub use engine::GraphBuildEngine;
pub use error::{ConfigurationError, Error, ErrorKind, MappingError, Result};
pub use graph::{Children, EntityRef, Graph, NodeId};
pub use metadata::{extract, SchemaMetadata};
pub use model::{EntityType, TypeCatalog};
pub use row::Row;
pub use schema::{FieldDecl, RowSchema, SchemaDef};
pub use stats::{EngineStats, StatsSnapshot};
pub use strategy::NullIdStrategy;
pub use value::{Value, ValueKind};

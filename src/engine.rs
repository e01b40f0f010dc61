//! Graph build engine: folds an ordered run of rows into deduplicated,
//! linked entities in one linear pass.
//!
//! An engine is bound to one schema and one [`NullIdStrategy`]. It holds only
//! immutable metadata plus the lazily filled collection-slot cache; identity
//! maps and the per-row working table belong to each `build` call, so one
//! engine serves any number of concurrent calls.

use crate::config::DEFAULT_ROW_CAPACITY_HINT;
use crate::error::{ConfigurationError, MappingError};
use crate::graph::{EntityNode, Graph, NodeId};
use crate::metadata::{self, FieldMapping, ParentLink, SchemaMetadata};
use crate::model::EntityTypeId;
use crate::row::Row;
use crate::schema::SchemaDef;
use crate::stats::{BuildCounts, EngineStats};
use crate::strategy::NullIdStrategy;
use crate::value::Value;
use dashmap::DashMap;
use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct GraphBuildEngine {
    metadata: Arc<SchemaMetadata>,
    strategy: NullIdStrategy,
    /// (parent type, child type) -> collection slot on the parent, or `None`
    /// when the parent has no collection of that element type.
    collection_slots: DashMap<(EntityTypeId, EntityTypeId), Option<usize>, FxBuildHasher>,
    stats: EngineStats,
}

/// Transient state owned by one build call.
struct BuildState {
    graph: Graph,
    roots: FxHashMap<Value, NodeId>,
    children: FxHashMap<(EntityTypeId, Value), NodeId>,
    linked: FxHashSet<(NodeId, NodeId)>,
    /// Instance recorded for each child level in the current row.
    row_levels: Vec<Option<NodeId>>,
    counts: BuildCounts,
}

impl GraphBuildEngine {
    pub fn new(metadata: Arc<SchemaMetadata>, strategy: NullIdStrategy) -> Self {
        debug!(
            schema = metadata.schema(),
            strategy = %strategy,
            "Graph build engine created"
        );
        Self {
            metadata,
            strategy,
            collection_slots: DashMap::with_hasher(FxBuildHasher::default()),
            stats: EngineStats::new(),
        }
    }

    /// Extract metadata from `def` and bind an engine to it, bypassing the
    /// process-wide caches.
    pub fn from_schema(
        def: &SchemaDef,
        strategy: NullIdStrategy,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self::new(Arc::new(metadata::extract(def)?), strategy))
    }

    pub fn metadata(&self) -> &Arc<SchemaMetadata> {
        &self.metadata
    }

    pub const fn strategy(&self) -> NullIdStrategy {
        self.strategy
    }

    pub const fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn build<R: Row>(&self, rows: &[R]) -> Result<Graph, MappingError> {
        if rows.is_empty() {
            return Ok(Graph::new());
        }

        let hint = (rows.len() / 4).min(DEFAULT_ROW_CAPACITY_HINT);
        let mut state = BuildState {
            graph: Graph::with_capacity(hint),
            roots: FxHashMap::with_capacity_and_hasher(hint, FxBuildHasher::default()),
            children: FxHashMap::with_capacity_and_hasher(hint, FxBuildHasher::default()),
            linked: FxHashSet::default(),
            row_levels: vec![None; self.metadata.groups().len()],
            counts: BuildCounts::default(),
        };

        for row in rows {
            self.process_row(row, &mut state)?;
        }

        self.stats.record(&state.counts);
        debug!(
            schema = self.metadata.schema(),
            strategy = %self.strategy,
            rows = state.counts.rows_processed,
            roots = state.graph.len(),
            entities = state.graph.entity_count(),
            links = state.counts.links_added,
            "Graph built"
        );

        Ok(state.graph)
    }

    fn process_row<R: Row>(&self, row: &R, state: &mut BuildState) -> Result<(), MappingError> {
        let metadata = &*self.metadata;
        state.counts.rows_processed += 1;

        let root_identity = metadata.root_identity();
        let root_id = self.read(row, root_identity)?;
        if root_id.is_null() {
            state.counts.rows_discarded += 1;
            trace!(schema = metadata.schema(), "Row discarded: null root identity");
            return Ok(());
        }

        // First row to introduce an identity is authoritative; later rows
        // never rewrite its attributes.
        let root = match state.roots.entry(root_id) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(e) => {
                let id = self.materialize(
                    row,
                    metadata.root_type(),
                    root_identity.slot,
                    metadata.root_mappings().iter(),
                    &mut state.graph,
                    &mut state.counts,
                )?;
                state.graph.roots.push(id);
                *e.insert(id)
            }
        };

        state.row_levels.fill(None);

        for (level, group) in metadata.groups().iter().enumerate() {
            let identity = metadata.identity_of(group);
            let id_value = self.read(row, identity)?;

            if id_value.is_null() {
                match self.strategy {
                    NullIdStrategy::Skip => {
                        state.counts.null_ids_skipped += 1;
                        trace!(
                            schema = metadata.schema(),
                            entity_type = metadata.catalog().name(group.entity_type),
                            "Null identity skipped"
                        );
                        continue;
                    }
                    NullIdStrategy::Throw => {
                        return Err(MappingError::NullIdentity {
                            schema: metadata.schema().to_string(),
                            entity_type: metadata.catalog().name(group.entity_type).to_string(),
                        });
                    }
                    NullIdStrategy::AllowNull => {}
                }
            }

            let child = match state.children.entry((group.entity_type, id_value)) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(e) => {
                    let id = self.materialize(
                        row,
                        group.entity_type,
                        identity.slot,
                        metadata.mappings_of(group),
                        &mut state.graph,
                        &mut state.counts,
                    )?;
                    *e.insert(id)
                }
            };
            state.row_levels[level] = Some(child);

            // A parent level skipped earlier in this row leaves nothing to
            // link to; deeper levels are dropped for the row as well.
            let parent = match group.parent {
                ParentLink::Root => Some(root),
                ParentLink::Level(parent_level) => state.row_levels[parent_level],
                ParentLink::Unlinked => None,
            };
            if let Some(parent) = parent {
                self.link(parent, group.parent_type, group.entity_type, child, state);
            }
        }

        Ok(())
    }

    fn read<R: Row>(&self, row: &R, mapping: &FieldMapping) -> Result<Value, MappingError> {
        row.field(&mapping.source)
            .ok_or_else(|| MappingError::FieldRead {
                schema: self.metadata.schema().to_string(),
                field: mapping.source.clone(),
            })
    }

    /// Create a fresh instance of `entity_type` and populate it from `row`.
    fn materialize<'m, R: Row>(
        &self,
        row: &R,
        entity_type: EntityTypeId,
        identity_slot: usize,
        mappings: impl Iterator<Item = &'m FieldMapping>,
        graph: &mut Graph,
        counts: &mut BuildCounts,
    ) -> Result<NodeId, MappingError> {
        let layout = self.metadata.catalog().layout(entity_type);
        if !layout.instantiable {
            return Err(MappingError::Instantiation {
                schema: self.metadata.schema().to_string(),
                entity_type: layout.name.clone(),
            });
        }

        let mut node = EntityNode::new(Arc::clone(layout), Some(identity_slot));
        for mapping in mappings {
            let value = self.read(row, mapping)?;
            let slot = &layout.attributes[mapping.slot];
            if !slot.kind.accepts(&value) {
                return Err(MappingError::AttributeWrite {
                    schema: self.metadata.schema().to_string(),
                    entity_type: layout.name.clone(),
                    attribute: slot.name.clone(),
                    expected: slot.kind,
                    found: value.kind(),
                });
            }
            node.values[mapping.slot] = value;
        }

        counts.entities_created += 1;
        Ok(graph.push(node))
    }

    fn link(
        &self,
        parent: NodeId,
        parent_type: EntityTypeId,
        child_type: EntityTypeId,
        child: NodeId,
        state: &mut BuildState,
    ) {
        let Some(slot) = self.collection_slot(parent_type, child_type) else {
            return;
        };
        if state.linked.insert((parent, child)) {
            state.graph.node_mut(parent).collections[slot].push(child);
            state.counts.links_added += 1;
        }
    }

    fn collection_slot(&self, parent: EntityTypeId, child: EntityTypeId) -> Option<usize> {
        if let Some(slot) = self.collection_slots.get(&(parent, child)) {
            return *slot;
        }
        *self
            .collection_slots
            .entry((parent, child))
            .or_insert_with(|| {
                let catalog = self.metadata.catalog();
                let slot = catalog.resolve_collection(parent, child);
                if slot.is_none() {
                    debug!(
                        schema = self.metadata.schema(),
                        parent = catalog.name(parent),
                        child = catalog.name(child),
                        "No collection linkage point; children will not be linked"
                    );
                }
                slot
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityType;
    use crate::value::ValueKind;
    use std::collections::BTreeMap;

    type TestRow = BTreeMap<String, Value>;

    fn schema() -> SchemaDef {
        SchemaDef::new("UserRow")
            .entity(
                EntityType::new("User")
                    .attribute("id", ValueKind::Int)
                    .attribute("name", ValueKind::Text)
                    .collection("roles", "Role"),
            )
            .entity(
                EntityType::new("Role")
                    .attribute("id", ValueKind::Int)
                    .attribute("name", ValueKind::Text)
                    .collection("permissions", "Permission"),
            )
            .entity(
                EntityType::new("Permission")
                    .attribute("id", ValueKind::Int)
                    .attribute("name", ValueKind::Text),
            )
            .root_field("user_id", "User", "id")
            .root_field("user_name", "User", "name")
            .child_field("role_id", "Role", "id", "User")
            .child_field("role_name", "Role", "name", "User")
            .child_field("permission_id", "Permission", "id", "Role")
            .child_field("permission_name", "Permission", "name", "Role")
    }

    fn row(
        user: Option<i64>,
        name: &str,
        role: Option<i64>,
        role_name: &str,
        permission: Option<i64>,
        permission_name: &str,
    ) -> TestRow {
        let text = |s: &str| if s.is_empty() { Value::Null } else { Value::from(s) };
        BTreeMap::from([
            ("user_id".to_string(), Value::from(user)),
            ("user_name".to_string(), text(name)),
            ("role_id".to_string(), Value::from(role)),
            ("role_name".to_string(), text(role_name)),
            ("permission_id".to_string(), Value::from(permission)),
            ("permission_name".to_string(), text(permission_name)),
        ])
    }

    fn engine(strategy: NullIdStrategy) -> GraphBuildEngine {
        GraphBuildEngine::from_schema(&schema(), strategy).unwrap()
    }

    #[test]
    fn empty_input_yields_empty_graph() {
        for strategy in [NullIdStrategy::Skip, NullIdStrategy::Throw, NullIdStrategy::AllowNull] {
            let graph = engine(strategy).build::<TestRow>(&[]).unwrap();
            assert!(graph.is_empty());
            assert_eq!(graph.entity_count(), 0);
        }
    }

    #[test]
    fn first_row_wins_for_attributes() {
        let rows = [
            row(Some(1), "Alice", Some(10), "ADMIN", Some(100), "READ"),
            row(Some(1), "Alicia", Some(10), "ROOT", Some(100), "WRITE"),
        ];
        let graph = engine(NullIdStrategy::Skip).build(&rows).unwrap();

        let user = graph.root(0).unwrap();
        assert_eq!(user.get("name"), Some(&Value::from("Alice")));
        let role = user.children("roles").unwrap().next().unwrap();
        assert_eq!(role.get("name"), Some(&Value::from("ADMIN")));
        let permission = role.children("permissions").unwrap().next().unwrap();
        assert_eq!(permission.get("name"), Some(&Value::from("READ")));
    }

    #[test]
    fn null_root_rows_are_discarded() {
        let rows = [
            row(None, "", None, "", None, ""),
            row(Some(1), "Alice", Some(10), "ADMIN", Some(100), "READ"),
        ];
        let engine = engine(NullIdStrategy::Throw);
        let graph = engine.build(&rows).unwrap();

        assert_eq!(graph.len(), 1);
        assert_eq!(engine.stats().rows_discarded(), 1);
        assert_eq!(engine.stats().rows_processed(), 2);
    }

    #[test]
    fn repeated_rows_do_not_duplicate_links() {
        let rows = [
            row(Some(1), "Alice", Some(10), "ADMIN", Some(100), "READ"),
            row(Some(1), "Alice", Some(10), "ADMIN", Some(100), "READ"),
            row(Some(1), "Alice", Some(10), "ADMIN", Some(100), "READ"),
        ];
        let engine = engine(NullIdStrategy::Skip);
        let graph = engine.build(&rows).unwrap();

        let user = graph.root(0).unwrap();
        assert_eq!(user.children("roles").unwrap().len(), 1);
        assert_eq!(graph.entity_count(), 3);
        assert_eq!(engine.stats().links_added(), 2);
    }

    #[test]
    fn skipped_parent_level_drops_deeper_levels_for_that_row() {
        let rows = [row(Some(1), "Alice", None, "", Some(100), "READ")];
        let engine = engine(NullIdStrategy::Skip);
        let graph = engine.build(&rows).unwrap();

        let user = graph.root(0).unwrap();
        assert_eq!(user.children("roles").unwrap().len(), 0);
        // The permission still exists in the arena, it just has no parent.
        assert_eq!(graph.entity_count(), 2);
        assert_eq!(engine.stats().null_ids_skipped(), 1);
    }

    #[test]
    fn throw_names_entity_type_and_schema() {
        let rows = [row(Some(1), "Alice", None, "", None, "")];
        let err = engine(NullIdStrategy::Throw).build(&rows).unwrap_err();
        assert_eq!(
            err,
            MappingError::NullIdentity {
                schema: "UserRow".into(),
                entity_type: "Role".into(),
            }
        );
    }

    #[test]
    fn allow_null_collapses_onto_one_instance() {
        let rows = [
            row(Some(1), "Alice", None, "GHOST", None, ""),
            row(Some(1), "Alice", None, "OTHER", None, ""),
            row(Some(2), "Bob", None, "THIRD", None, ""),
        ];
        let graph = engine(NullIdStrategy::AllowNull).build(&rows).unwrap();

        let alice = graph.root(0).unwrap();
        let bob = graph.root(1).unwrap();
        let ghost = alice.children("roles").unwrap().next().unwrap();
        assert_eq!(ghost.identity(), Some(&Value::Null));
        assert_eq!(ghost.get("name"), Some(&Value::from("GHOST")));
        assert_eq!(alice.children("roles").unwrap().len(), 1);
        assert!(ghost.same_instance(&bob.children("roles").unwrap().next().unwrap()));
        assert_eq!(ghost.children("permissions").unwrap().len(), 1);
    }

    #[test]
    fn missing_source_field_is_a_mapping_error() {
        let mut broken = row(Some(1), "Alice", Some(10), "ADMIN", Some(100), "READ");
        broken.remove("role_name");
        let err = engine(NullIdStrategy::Skip).build(&[broken]).unwrap_err();
        assert!(matches!(err, MappingError::FieldRead { ref field, .. } if field == "role_name"));
    }

    #[test]
    fn kind_mismatch_is_a_mapping_error() {
        let mut broken = row(Some(1), "Alice", Some(10), "ADMIN", Some(100), "READ");
        broken.insert("user_name".into(), Value::Int(5));
        let err = engine(NullIdStrategy::Skip).build(&[broken]).unwrap_err();
        assert!(matches!(
            err,
            MappingError::AttributeWrite { expected: ValueKind::Text, found: ValueKind::Int, .. }
        ));
    }

    #[test]
    fn abstract_entity_cannot_be_instantiated() {
        let def = SchemaDef::new("Row")
            .entity(
                EntityType::new("Shape")
                    .abstract_type()
                    .attribute("id", ValueKind::Any),
            )
            .root_field("shape_id", "Shape", "id");
        let engine = GraphBuildEngine::from_schema(&def, NullIdStrategy::Skip).unwrap();

        let rows = [BTreeMap::from([("shape_id".to_string(), Value::Int(1))])];
        let err = engine.build(&rows).unwrap_err();
        assert!(matches!(err, MappingError::Instantiation { .. }));

        // Nothing needs instantiating when every row is discarded.
        let rows = [BTreeMap::from([("shape_id".to_string(), Value::Null)])];
        assert!(engine.build(&rows).unwrap().is_empty());
    }

    #[test]
    fn missing_collection_makes_linking_a_no_op() {
        let def = SchemaDef::new("Row")
            .entity(EntityType::new("Order").attribute("id", ValueKind::Int))
            .entity(EntityType::new("Line").attribute("id", ValueKind::Int))
            .root_field("order_id", "Order", "id")
            .child_field("line_id", "Line", "id", "Order");
        let engine = GraphBuildEngine::from_schema(&def, NullIdStrategy::Skip).unwrap();

        let rows = [BTreeMap::from([
            ("order_id".to_string(), Value::Int(1)),
            ("line_id".to_string(), Value::Int(2)),
        ])];
        let graph = engine.build(&rows).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.entity_count(), 2);
        assert_eq!(engine.stats().links_added(), 0);
    }

    #[test]
    fn collection_slot_is_resolved_through_ancestors() {
        let def = SchemaDef::new("Row")
            .entity(EntityType::new("Container").collection("items", "Item"))
            .entity(
                EntityType::new("Box")
                    .extends("Container")
                    .attribute("id", ValueKind::Int),
            )
            .entity(EntityType::new("Item").attribute("id", ValueKind::Int))
            .root_field("box_id", "Box", "id")
            .child_field("item_id", "Item", "id", "Box");
        let engine = GraphBuildEngine::from_schema(&def, NullIdStrategy::Skip).unwrap();

        let rows: Vec<TestRow> = (1..=3)
            .map(|item| {
                BTreeMap::from([
                    ("box_id".to_string(), Value::Int(1)),
                    ("item_id".to_string(), Value::Int(item)),
                ])
            })
            .collect();
        let graph = engine.build(&rows).unwrap();

        let ids: Vec<_> = graph
            .root(0)
            .unwrap()
            .children("items")
            .unwrap()
            .map(|item| item.identity().cloned())
            .collect();
        assert_eq!(ids, [Some(Value::Int(1)), Some(Value::Int(2)), Some(Value::Int(3))]);
    }

    #[test]
    fn root_type_children_link_under_their_root() {
        let def = SchemaDef::new("OrgRow")
            .entity(
                EntityType::new("Employee")
                    .attribute("id", ValueKind::Int)
                    .collection("reports", "Employee"),
            )
            .root_field("manager_id", "Employee", "id")
            .child_field("report_id", "Employee", "id", "Employee");
        let engine = GraphBuildEngine::from_schema(&def, NullIdStrategy::Skip).unwrap();

        let pair = |manager: i64, report: i64| {
            BTreeMap::from([
                ("manager_id".to_string(), Value::Int(manager)),
                ("report_id".to_string(), Value::Int(report)),
            ])
        };
        let graph = engine.build(&[pair(1, 2), pair(1, 3), pair(2, 4)]).unwrap();

        assert_eq!(graph.len(), 2);
        let manager = graph.root(0).unwrap();
        let reports: Vec<_> = manager
            .children("reports")
            .unwrap()
            .map(|e| e.identity().cloned())
            .collect();
        assert_eq!(reports, [Some(Value::Int(2)), Some(Value::Int(3))]);

        // Root 2 and child 2 are kept apart: roots and children are keyed separately.
        let child_two = manager.children("reports").unwrap().next().unwrap();
        let root_two = graph.root(1).unwrap();
        assert!(!child_two.same_instance(&root_two));
        assert_eq!(root_two.children("reports").unwrap().len(), 1);
        assert_eq!(child_two.children("reports").unwrap().len(), 0);
    }

    #[test]
    fn concurrent_builds_share_one_engine() {
        let engine = engine(NullIdStrategy::Skip);
        let rows = [
            row(Some(1), "Alice", Some(10), "ADMIN", Some(100), "READ"),
            row(Some(2), "Bob", Some(10), "ADMIN", Some(101), "WRITE"),
        ];

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let graph = engine.build(&rows).unwrap();
                    assert_eq!(graph.len(), 2);
                    assert_eq!(graph.entity_count(), 5);
                });
            }
        });
        assert_eq!(engine.stats().builds(), 4);
    }
}

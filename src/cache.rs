//! Process-wide compute-once caches and the mapping facade built on them.

use crate::config::CACHE_INITIAL_CAPACITY;
use crate::engine::GraphBuildEngine;
use crate::error::{ConfigurationError, Error};
use crate::graph::Graph;
use crate::metadata::{self, SchemaMetadata};
use crate::schema::RowSchema;
use crate::strategy::NullIdStrategy;
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use rayon::prelude::*;
use rustc_hash::FxBuildHasher;
use std::any::{type_name, TypeId};
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// Concurrent map whose values are computed at most once per key. The shard
/// lock only guards fetching the key's cell; the computation runs outside it,
/// so a slow key never blocks other keys and concurrent callers of the same
/// key wait on that key's cell alone. A failed computation leaves the cell
/// empty and the next caller retries.
pub struct OnceMap<K, V> {
    cells: DashMap<K, Arc<OnceCell<V>>, FxBuildHasher>,
}

impl<K: Eq + Hash, V: Clone> OnceMap<K, V> {
    pub fn new() -> Self {
        Self {
            cells: DashMap::with_capacity_and_hasher(
                CACHE_INITIAL_CAPACITY,
                FxBuildHasher::default(),
            ),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.cells.get(key).and_then(|cell| cell.get().cloned())
    }

    pub fn get_or_try_init<E>(
        &self,
        key: K,
        init: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let cell = Arc::clone(self.cells.entry(key).or_default().value());
        cell.get_or_try_init(init).cloned()
    }

    /// Number of keys with a computed value.
    pub fn len(&self) -> usize {
        self.cells.iter().filter(|cell| cell.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V: Clone> Default for OnceMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

type EngineKey = (TypeId, NullIdStrategy);

/// Caches metadata per row schema and engines per (row schema, strategy).
/// Both caches live as long as the mapper; the free functions [`map`] and
/// [`map_with_strategy`] share one process-wide mapper.
#[derive(Default)]
pub struct FlatGraphMapper {
    metadata: OnceMap<TypeId, Arc<SchemaMetadata>>,
    engines: OnceMap<EngineKey, Arc<GraphBuildEngine>>,
}

impl FlatGraphMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph with [`NullIdStrategy::Skip`].
    pub fn map<S: RowSchema>(&self, rows: &[S]) -> Result<Graph, Error> {
        self.map_with_strategy(rows, NullIdStrategy::default())
    }

    pub fn map_with_strategy<S: RowSchema>(
        &self,
        rows: &[S],
        strategy: NullIdStrategy,
    ) -> Result<Graph, Error> {
        let engine = self.engine::<S>(strategy)?;
        Ok(engine.build(rows)?)
    }

    /// Map independent batches of rows in parallel. Each batch is its own
    /// build call, so the graphs share no instances.
    pub fn map_batches<S, B>(
        &self,
        batches: &[B],
        strategy: NullIdStrategy,
    ) -> Result<Vec<Graph>, Error>
    where
        S: RowSchema + Sync,
        B: AsRef<[S]> + Sync,
    {
        let engine = self.engine::<S>(strategy)?;
        let graphs = batches
            .par_iter()
            .map(|batch| engine.build(batch.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(graphs)
    }

    pub fn engine<S: RowSchema>(
        &self,
        strategy: NullIdStrategy,
    ) -> Result<Arc<GraphBuildEngine>, ConfigurationError> {
        self.engines
            .get_or_try_init((TypeId::of::<S>(), strategy), || {
                let metadata = self.metadata::<S>()?;
                Ok(Arc::new(GraphBuildEngine::new(metadata, strategy)))
            })
    }

    pub fn metadata<S: RowSchema>(&self) -> Result<Arc<SchemaMetadata>, ConfigurationError> {
        self.metadata.get_or_try_init(TypeId::of::<S>(), || {
            debug!(row_type = type_name::<S>(), "Extracting schema metadata");
            metadata::extract(&S::describe()).map(Arc::new)
        })
    }

    /// Number of schemas with cached metadata.
    pub fn cached_schemas(&self) -> usize {
        self.metadata.len()
    }

    /// Number of cached engines.
    pub fn cached_engines(&self) -> usize {
        self.engines.len()
    }
}

static MAPPER: Lazy<FlatGraphMapper> = Lazy::new(FlatGraphMapper::new);

/// The process-wide mapper behind [`map`] and [`map_with_strategy`].
pub fn global() -> &'static FlatGraphMapper {
    &MAPPER
}

pub fn map<S: RowSchema>(rows: &[S]) -> Result<Graph, Error> {
    MAPPER.map(rows)
}

pub fn map_with_strategy<S: RowSchema>(
    rows: &[S],
    strategy: NullIdStrategy,
) -> Result<Graph, Error> {
    MAPPER.map_with_strategy(rows, strategy)
}

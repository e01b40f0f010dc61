/// Target attribute name that marks a field as its entity type's identity
/// when the declaration does not say either way
pub const DEFAULT_IDENTITY_ATTRIBUTE: &str = "id";

/// Upper bound on the initial capacity reserved for identity maps (rows / 4, capped)
pub const DEFAULT_ROW_CAPACITY_HINT: usize = 4096;

/// Initial shard-map capacity for the process-wide metadata and engine caches
pub const CACHE_INITIAL_CAPACITY: usize = 64;

//! SQL schema definitions for the two SQLite-backed stores.
//!
//! 1. Key-value database: hashes and sorted sets shared by every worker of a
//!    deployment (one file, many processes).
//! 2. Storage file: one embedded store per session (or per file-backed task).

// --- 1. Key-value database ---
pub const KV_DB_SCHEMA_HASHES: &str = "
    CREATE TABLE IF NOT EXISTS kv_hash (
        key TEXT NOT NULL,
        field TEXT NOT NULL,
        value BLOB NOT NULL,
        PRIMARY KEY (key, field)
    ) WITHOUT ROWID
";
pub const KV_DB_SCHEMA_SORTED_SETS: &str = "
    CREATE TABLE IF NOT EXISTS kv_sorted_set (
        key TEXT NOT NULL,
        member TEXT NOT NULL,
        score INTEGER NOT NULL,
        PRIMARY KEY (key, member)
    ) WITHOUT ROWID
";
pub const KV_DB_SCHEMA_SORTED_SET_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_kv_sorted_set_score ON kv_sorted_set(key, score, member)";

// --- 2. Storage file ---
pub const STORE_DB_SCHEMA_METADATA: &str = "
    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";
pub const STORE_DB_SCHEMA_CONTAINERS: &str = "
    CREATE TABLE IF NOT EXISTS attribute_containers (
        row_id INTEGER PRIMARY KEY AUTOINCREMENT,
        container_type TEXT NOT NULL,
        identifier TEXT NOT NULL UNIQUE,
        data BLOB NOT NULL
    )
";
pub const STORE_DB_SCHEMA_CONTAINERS_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_attribute_containers_type ON attribute_containers(container_type, row_id)";
pub const STORE_DB_SCHEMA_EVENT_INDEX: &str = "
    CREATE TABLE IF NOT EXISTS event_index (
        identifier TEXT PRIMARY KEY,
        timestamp INTEGER NOT NULL
    )
";
pub const STORE_DB_SCHEMA_EVENT_INDEX_TIMESTAMP: &str = "CREATE INDEX IF NOT EXISTS idx_event_index_timestamp ON event_index(timestamp, identifier)";

pub const KV_DB_SCHEMAS: &[&str] = &[
    KV_DB_SCHEMA_HASHES,
    KV_DB_SCHEMA_SORTED_SETS,
    KV_DB_SCHEMA_SORTED_SET_INDEX,
];

pub const STORE_DB_SCHEMAS: &[&str] = &[
    STORE_DB_SCHEMA_METADATA,
    STORE_DB_SCHEMA_CONTAINERS,
    STORE_DB_SCHEMA_CONTAINERS_INDEX,
    STORE_DB_SCHEMA_EVENT_INDEX,
    STORE_DB_SCHEMA_EVENT_INDEX_TIMESTAMP,
];

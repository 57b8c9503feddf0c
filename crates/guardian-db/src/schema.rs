//! SQL schema definitions.

/// Complete schema for the v1 hub database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Sensor nodes
-- ============================================================

CREATE TABLE IF NOT EXISTS nodes (
    node_id TEXT PRIMARY KEY,
    last_seen INTEGER NOT NULL,
    battery_percent INTEGER NOT NULL DEFAULT 100,
    lat REAL NOT NULL DEFAULT 0,
    lon REAL NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'active',
    last_rssi INTEGER NOT NULL DEFAULT 0
);

-- ============================================================
-- Reconstructed spectrograms
-- ============================================================

CREATE TABLE IF NOT EXISTS spectrograms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id TEXT NOT NULL,
    image_bytes BLOB NOT NULL,
    lat REAL NOT NULL DEFAULT 0,
    lon REAL NOT NULL DEFAULT 0,
    anomaly_score INTEGER NOT NULL DEFAULT 0,
    received_at INTEGER NOT NULL,
    session_id INTEGER NOT NULL,
    rssi INTEGER NOT NULL DEFAULT 0,
    truncated INTEGER NOT NULL DEFAULT 0,
    classification TEXT,
    confidence INTEGER,
    threat_level TEXT,
    reasoning TEXT,
    features TEXT,
    classifier_used TEXT,
    classified_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_spectrograms_received ON spectrograms(received_at);
CREATE INDEX IF NOT EXISTS idx_spectrograms_node ON spectrograms(node_id);

-- ============================================================
-- Operator alerts
-- ============================================================

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id TEXT NOT NULL,
    confidence INTEGER NOT NULL DEFAULT 0,
    lat REAL NOT NULL DEFAULT 0,
    lon REAL NOT NULL DEFAULT 0,
    timestamp INTEGER NOT NULL,
    analysis_text TEXT NOT NULL DEFAULT '',
    responded INTEGER NOT NULL DEFAULT 0,
    responded_by TEXT,
    responded_at INTEGER,
    rssi INTEGER NOT NULL DEFAULT 0,
    spectrogram_id INTEGER REFERENCES spectrograms(id),
    UNIQUE(spectrogram_id)
);

CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts(timestamp);

-- ============================================================
-- Offline re-classification queue
-- ============================================================

CREATE TABLE IF NOT EXISTS sync_queue (
    rank INTEGER PRIMARY KEY AUTOINCREMENT,
    spectrogram_id INTEGER NOT NULL REFERENCES spectrograms(id),
    enqueued_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status);
"#;

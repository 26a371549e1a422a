//! Schema the worker depends on. The relational store's schema management
//! belongs to the upstream ingester/web application (out of scope per
//! SPEC_FULL.md); this DDL exists so integration tests and a fresh local
//! Postgres can stand up the contract tables this service reads and writes.
//! `photos` in particular carries many columns this service never touches —
//! only the subset listed in §6's database contract is authoritative here.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS photos (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'ready',
    small_width INTEGER,
    small_height INTEGER,
    taken_at TIMESTAMPTZ,
    ai_processed_at TIMESTAMPTZ,
    ai_ocr_text TEXT,
    ai_ocr_date DATE,
    ai_person_ids TEXT[] NOT NULL DEFAULT '{}',
    ai_colors TEXT[],
    ai_quality_score DOUBLE PRECISION
);

CREATE TABLE IF NOT EXISTS ai_queue (
    photo_id TEXT PRIMARY KEY REFERENCES photos(id),
    status TEXT NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_ai_queue_claim
    ON ai_queue (status, priority DESC, created_at ASC);

CREATE TABLE IF NOT EXISTS persons (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    name_source TEXT NOT NULL DEFAULT 'auto',
    photo_count INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS faces (
    id TEXT PRIMARY KEY,
    person_id TEXT NOT NULL REFERENCES persons(id),
    embedding REAL[],
    photo_count INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_faces_person ON faces (person_id);

CREATE TABLE IF NOT EXISTS photo_faces (
    id BIGSERIAL PRIMARY KEY,
    photo_id TEXT NOT NULL REFERENCES photos(id),
    face_id TEXT NOT NULL REFERENCES faces(id),
    box_x DOUBLE PRECISION NOT NULL,
    box_y DOUBLE PRECISION NOT NULL,
    box_w DOUBLE PRECISION NOT NULL,
    box_h DOUBLE PRECISION NOT NULL,
    embedding REAL[],
    confidence REAL NOT NULL,
    hidden BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (photo_id, face_id)
);

CREATE TABLE IF NOT EXISTS ai_tags (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    name TEXT NOT NULL,
    photo_count INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS photo_tags (
    id BIGSERIAL PRIMARY KEY,
    photo_id TEXT NOT NULL REFERENCES photos(id),
    tag_id TEXT NOT NULL REFERENCES ai_tags(id),
    confidence REAL NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (photo_id, tag_id)
);
"#;

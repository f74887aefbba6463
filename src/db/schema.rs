pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- links table
CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT,
    content TEXT,
    summary TEXT,
    status TEXT NOT NULL DEFAULT 'read_later',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    fetched_at TEXT,
    summarized_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_links_url ON links(url);
CREATE INDEX IF NOT EXISTS idx_links_status ON links(status);

-- categories table
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT
);

-- tags table (names are lower-cased by the pipeline before lookup)
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

-- tasks table
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    completed INTEGER NOT NULL DEFAULT 0
);

-- activities table
CREATE TABLE IF NOT EXISTS activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT
);

-- junction tables; re-linking an existing pair must be a no-op
CREATE TABLE IF NOT EXISTS link_categories (
    link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
    category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
    UNIQUE(link_id, category_id)
);

CREATE TABLE IF NOT EXISTS link_tags (
    link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    UNIQUE(link_id, tag_id)
);

CREATE TABLE IF NOT EXISTS link_tasks (
    link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    UNIQUE(link_id, task_id)
);

CREATE TABLE IF NOT EXISTS link_activities (
    link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
    activity_id INTEGER NOT NULL REFERENCES activities(id) ON DELETE CASCADE,
    UNIQUE(link_id, activity_id)
);

-- full-text search projection of links, keyed by rowid = links.id.
-- Maintained explicitly inside the same transaction as every link mutation.
CREATE VIRTUAL TABLE IF NOT EXISTS link_search USING fts5(
    url, title, content, summary
);
"#;

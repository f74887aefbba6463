use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{Activity, Category, Link, LinkStatus, NewLink, Tag, Task};

use super::schema::SCHEMA;

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Link operations

    pub async fn get_link_by_url(&self, url: &str) -> Result<Option<Link>> {
        let url = url.to_string();
        let link = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, url, title, content, summary, status, created_at, updated_at, fetched_at, summarized_at
                     FROM links WHERE url = ?1",
                )?;
                let link = stmt
                    .query_row(params![url], |row| Ok(link_from_row(row)))
                    .optional()?;
                Ok(link)
            })
            .await?;
        Ok(link)
    }

    pub async fn get_link(&self, id: i64) -> Result<Option<Link>> {
        let link = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, url, title, content, summary, status, created_at, updated_at, fetched_at, summarized_at
                     FROM links WHERE id = ?1",
                )?;
                let link = stmt
                    .query_row(params![id], |row| Ok(link_from_row(row)))
                    .optional()?;
                Ok(link)
            })
            .await?;
        Ok(link)
    }

    /// Inserts a new link and its search-index row in one transaction.
    /// A second link with the same URL fails with `DuplicateUrl`.
    pub async fn create_link(&self, link: NewLink) -> Result<Link> {
        let url = link.url.clone();
        let created = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO links (url, title, content, summary, status) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        link.url,
                        link.title,
                        link.content,
                        link.summary,
                        link.status.as_str()
                    ],
                )?;
                let id = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO link_search (rowid, url, title, content, summary) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, link.url, link.title, link.content, link.summary],
                )?;
                let created = tx.query_row(
                    "SELECT id, url, title, content, summary, status, created_at, updated_at, fetched_at, summarized_at
                     FROM links WHERE id = ?1",
                    params![id],
                    |row| Ok(link_from_row(row)),
                )?;
                tx.commit()?;
                Ok(created)
            })
            .await;

        match created {
            Ok(link) => Ok(link),
            Err(e) => {
                let err = AppError::from(e);
                if err.is_unique_violation() {
                    Err(AppError::DuplicateUrl(url))
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Updates title/content/summary in place, re-projecting the search row
    /// in the same transaction. Status and associations are untouched.
    pub async fn update_link(
        &self,
        id: i64,
        title: Option<String>,
        content: Option<String>,
        summary: Option<String>,
    ) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "UPDATE links SET title = ?1, content = ?2, summary = ?3, updated_at = datetime('now') WHERE id = ?4",
                    params![title, content, summary, id],
                )?;
                tx.execute(
                    "UPDATE link_search SET title = ?1, content = ?2, summary = ?3 WHERE rowid = ?4",
                    params![title, content, summary, id],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn update_link_status(&self, id: i64, status: LinkStatus) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE links SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                    params![status.as_str(), id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn touch_fetched_at(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE links SET fetched_at = datetime('now') WHERE id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn touch_summarized_at(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE links SET summarized_at = datetime('now') WHERE id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Deletes a link, its search-index row, and (via cascade) every
    /// association row, all in one transaction.
    pub async fn delete_link(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM link_search WHERE rowid = ?1", params![id])?;
                tx.execute("DELETE FROM links WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Category / tag / task / activity operations

    pub async fn get_or_create_category(&self, name: &str) -> Result<Category> {
        let name = name.to_string();
        let category = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO categories (name) VALUES (?1)",
                    params![name],
                )?;
                let category = conn.query_row(
                    "SELECT id, name, description FROM categories WHERE name = ?1",
                    params![name],
                    |row| {
                        Ok(Category {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            description: row.get(2)?,
                        })
                    },
                )?;
                Ok(category)
            })
            .await?;
        Ok(category)
    }

    pub async fn get_or_create_tag(&self, name: &str) -> Result<Tag> {
        let name = name.to_string();
        let tag = self
            .conn
            .call(move |conn| {
                conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", params![name])?;
                let tag = conn.query_row(
                    "SELECT id, name FROM tags WHERE name = ?1",
                    params![name],
                    |row| {
                        Ok(Tag {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    },
                )?;
                Ok(tag)
            })
            .await?;
        Ok(tag)
    }

    pub async fn get_or_create_task(&self, name: &str) -> Result<Task> {
        let name = name.to_string();
        let task = self
            .conn
            .call(move |conn| {
                let existing = conn
                    .query_row(
                        "SELECT id, name, description, completed FROM tasks WHERE name = ?1",
                        params![name],
                        |row| Ok(task_from_row(row)),
                    )
                    .optional()?;
                if let Some(task) = existing {
                    return Ok(task);
                }
                conn.execute("INSERT INTO tasks (name) VALUES (?1)", params![name])?;
                let task = conn.query_row(
                    "SELECT id, name, description, completed FROM tasks WHERE id = ?1",
                    params![conn.last_insert_rowid()],
                    |row| Ok(task_from_row(row)),
                )?;
                Ok(task)
            })
            .await?;
        Ok(task)
    }

    pub async fn get_or_create_activity(&self, name: &str) -> Result<Activity> {
        let name = name.to_string();
        let activity = self
            .conn
            .call(move |conn| {
                let existing = conn
                    .query_row(
                        "SELECT id, name, description FROM activities WHERE name = ?1",
                        params![name],
                        |row| Ok(activity_from_row(row)),
                    )
                    .optional()?;
                if let Some(activity) = existing {
                    return Ok(activity);
                }
                conn.execute("INSERT INTO activities (name) VALUES (?1)", params![name])?;
                let activity = conn.query_row(
                    "SELECT id, name, description FROM activities WHERE id = ?1",
                    params![conn.last_insert_rowid()],
                    |row| Ok(activity_from_row(row)),
                )?;
                Ok(activity)
            })
            .await?;
        Ok(activity)
    }

    // Association operations, all tolerant of repeat calls.

    pub async fn link_category(&self, link_id: i64, category_id: i64) -> Result<()> {
        self.link_pair("link_categories", "category_id", link_id, category_id)
            .await
    }

    pub async fn link_tag(&self, link_id: i64, tag_id: i64) -> Result<()> {
        self.link_pair("link_tags", "tag_id", link_id, tag_id).await
    }

    pub async fn link_task(&self, link_id: i64, task_id: i64) -> Result<()> {
        self.link_pair("link_tasks", "task_id", link_id, task_id).await
    }

    pub async fn link_activity(&self, link_id: i64, activity_id: i64) -> Result<()> {
        self.link_pair("link_activities", "activity_id", link_id, activity_id)
            .await
    }

    async fn link_pair(
        &self,
        table: &'static str,
        column: &'static str,
        link_id: i64,
        other_id: i64,
    ) -> Result<()> {
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "INSERT OR IGNORE INTO {table} (link_id, {column}) VALUES (?1, ?2)"
                );
                conn.execute(&sql, params![link_id, other_id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_categories_for_link(&self, link_id: i64) -> Result<Vec<Category>> {
        let categories = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.name, c.description FROM categories c
                     JOIN link_categories lc ON lc.category_id = c.id
                     WHERE lc.link_id = ?1 ORDER BY c.name",
                )?;
                let categories = stmt
                    .query_map(params![link_id], |row| {
                        Ok(Category {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            description: row.get(2)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(categories)
            })
            .await?;
        Ok(categories)
    }

    pub async fn get_tags_for_link(&self, link_id: i64) -> Result<Vec<Tag>> {
        let tags = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT t.id, t.name FROM tags t
                     JOIN link_tags lt ON lt.tag_id = t.id
                     WHERE lt.link_id = ?1 ORDER BY t.name",
                )?;
                let tags = stmt
                    .query_map(params![link_id], |row| {
                        Ok(Tag {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(tags)
            })
            .await?;
        Ok(tags)
    }

    // Search

    /// Full-text search over the index. The query is quoted as an FTS string
    /// literal so user input cannot hit MATCH syntax errors.
    pub async fn search_links(&self, query: &str, limit: i64) -> Result<Vec<Link>> {
        let match_expr = format!("\"{}\"", query.replace('"', "\"\""));
        let links = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT l.id, l.url, l.title, l.content, l.summary, l.status,
                            l.created_at, l.updated_at, l.fetched_at, l.summarized_at
                     FROM link_search s
                     JOIN links l ON l.id = s.rowid
                     WHERE s MATCH ?1
                     ORDER BY s.rank
                     LIMIT ?2",
                )?;
                let links = stmt
                    .query_map(params![match_expr, limit], |row| Ok(link_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(links)
            })
            .await?;
        Ok(links)
    }

    // Stats

    pub async fn count_links(&self) -> Result<i64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    pub async fn count_search_rows(&self) -> Result<i64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM link_search", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn link_from_row(row: &Row) -> Link {
    Link {
        id: row.get(0).unwrap(),
        url: row.get(1).unwrap(),
        title: row.get(2).unwrap(),
        content: row.get(3).unwrap(),
        summary: row.get(4).unwrap(),
        status: row
            .get::<_, String>(5)
            .ok()
            .and_then(|s| LinkStatus::parse(&s))
            .unwrap_or_default(),
        created_at: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        updated_at: row
            .get::<_, String>(7)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        fetched_at: row
            .get::<_, Option<String>>(8)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        summarized_at: row
            .get::<_, Option<String>>(9)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
    }
}

fn task_from_row(row: &Row) -> Task {
    Task {
        id: row.get(0).unwrap(),
        name: row.get(1).unwrap(),
        description: row.get(2).unwrap(),
        completed: row.get::<_, i64>(3).unwrap() != 0,
    }
}

fn activity_from_row(row: &Row) -> Activity {
    Activity {
        id: row.get(0).unwrap(),
        name: row.get(1).unwrap(),
        description: row.get(2).unwrap(),
    }
}

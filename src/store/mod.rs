//! # Story Store
//!
//! Durable record of every story seen and of each story's video job, in one
//! SQLite file. The store is an explicit value handed to whoever needs it;
//! there is no global connection.
//!
//! All access goes through one connection behind a mutex, so every
//! read-modify-write (`upsert_stories`, `update_job`) runs inside a single
//! transaction without interleaving. `Story.stage` is written in the same
//! transaction as the job it mirrors.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::StoreError;
use crate::model::{merge_context, ContextEntry, SourceKind, Story};
use crate::pipeline::{JobArtifacts, Stage, VideoJob};

pub const SCHEMA_VERSION: i64 = 1;

/// Cap on ids listed in an ambiguity error.
const AMBIGUOUS_LIST_MAX: usize = 10;

/// `list` filters; every field optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoryFilter {
    pub stage: Option<Stage>,
    pub source: Option<SourceKind>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
}

pub struct StoryStore {
    conn: Mutex<Connection>,
}

impl StoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .lock()
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let conn = self.conn.lock();
            let sql = include_str!("../../migrations/0001_init.sql");
            conn.execute_batch(sql)?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
        }

        Ok(())
    }

    // ---- stories ----

    /// Insert new stories and merge into existing ones, in one transaction.
    ///
    /// An existing record keeps its id and stage, takes the incoming scores
    /// and primary fields, and unions its context with the incoming context.
    /// Deciding which record deserves to be stored is the caller's job
    /// ([`crate::ingest::run_and_store`] ranks against the stored record).
    pub fn upsert_stories(&self, stories: &[Story]) -> Result<UpsertOutcome, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut outcome = UpsertOutcome::default();

        for s in stories {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT context_json FROM stories WHERE id = ?1",
                    [&s.id],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(context_json) => {
                    let mut context: Vec<ContextEntry> = serde_json::from_str(&context_json)?;
                    merge_context(&mut context, &s.context);
                    tx.execute(
                        "
                        UPDATE stories
                        SET source = ?2,
                            title = ?3,
                            url = ?4,
                            raw_score = ?5,
                            normalized_score = ?6,
                            weighted_score = ?7,
                            created_at = ?8,
                            fetched_at = ?9,
                            context_json = ?10
                        WHERE id = ?1
                        ",
                        params![
                            s.id,
                            s.source.as_str(),
                            s.title,
                            s.url,
                            s.raw_score,
                            s.normalized_score,
                            s.weighted_score,
                            s.created_at.to_rfc3339(),
                            s.fetched_at.to_rfc3339(),
                            serde_json::to_string(&context)?,
                        ],
                    )?;
                    outcome.updated += 1;
                }
                None => {
                    tx.execute(
                        "
                        INSERT INTO stories (
                            id, source, title, url, raw_score, normalized_score,
                            weighted_score, created_at, fetched_at, context_json, stage
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                        ",
                        params![
                            s.id,
                            s.source.as_str(),
                            s.title,
                            s.url,
                            s.raw_score,
                            s.normalized_score,
                            s.weighted_score,
                            s.created_at.to_rfc3339(),
                            s.fetched_at.to_rfc3339(),
                            serde_json::to_string(&s.context)?,
                            Stage::Ingested.as_str(),
                        ],
                    )?;
                    outcome.inserted += 1;
                }
            }
        }

        tx.commit()?;
        tracing::debug!(
            target: "store",
            inserted = outcome.inserted,
            updated = outcome.updated,
            "stories upserted"
        );
        Ok(outcome)
    }

    pub fn get_story(&self, id: &str) -> Result<Option<Story>, StoreError> {
        let conn = self.conn.lock();
        let story = conn
            .query_row(
                &format!("SELECT {STORY_COLUMNS} FROM stories WHERE id = ?1"),
                [id],
                parse_story_row,
            )
            .optional()?;
        Ok(story)
    }

    /// Stories ordered by weighted score (desc), then id.
    pub fn list_stories(&self, filter: &StoryFilter) -> Result<Vec<Story>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "
            SELECT {STORY_COLUMNS}
            FROM stories
            WHERE (?1 IS NULL OR stage = ?1)
              AND (?2 IS NULL OR source = ?2)
            ORDER BY weighted_score DESC, id ASC
            LIMIT ?3
            "
        ))?;
        let limit: i64 = filter
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        let rows = stmt.query_map(
            params![
                filter.stage.map(|s| s.as_str()),
                filter.source.map(|s| s.as_str()),
                limit
            ],
            parse_story_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Resolve an id prefix to exactly one stored id.
    pub fn resolve_prefix(&self, prefix: &str) -> Result<String, StoreError> {
        let needle = prefix.trim().to_ascii_lowercase();
        if needle.is_empty() || !needle.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StoreError::NotFound {
                prefix: prefix.to_string(),
            });
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "
            SELECT id FROM stories
            WHERE substr(id, 1, length(?1)) = ?1
            ORDER BY id ASC
            LIMIT ?2
            ",
        )?;
        let rows = stmt.query_map(params![needle, (AMBIGUOUS_LIST_MAX + 1) as i64], |row| {
            row.get::<_, String>(0)
        })?;
        let mut matches = Vec::new();
        for row in rows {
            matches.push(row?);
        }
        match matches.len() {
            0 => Err(StoreError::NotFound {
                prefix: prefix.to_string(),
            }),
            1 => Ok(matches.remove(0)),
            _ => {
                matches.truncate(AMBIGUOUS_LIST_MAX);
                Err(StoreError::Ambiguous {
                    prefix: prefix.to_string(),
                    matches,
                })
            }
        }
    }

    /// Resolve a prefix and load the story.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Story, StoreError> {
        let id = self.resolve_prefix(prefix)?;
        self.get_story(&id)?
            .ok_or(StoreError::MissingStory { id })
    }

    // ---- video jobs ----

    pub fn get_job(&self, story_id: &str) -> Result<Option<VideoJob>, StoreError> {
        let conn = self.conn.lock();
        Self::read_job(&conn, story_id)
    }

    /// Load the job, creating it on first pipeline entry.
    pub fn ensure_job(&self, story_id: &str) -> Result<VideoJob, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if let Some(job) = Self::read_job(&tx, story_id)? {
            return Ok(job);
        }
        let exists: Option<String> = tx
            .query_row("SELECT id FROM stories WHERE id = ?1", [story_id], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::MissingStory {
                id: story_id.to_string(),
            });
        }
        let job = VideoJob::new(story_id, Utc::now());
        Self::write_job(&tx, &job)?;
        tx.commit()?;
        tracing::debug!(target: "store", story_id, "video job created");
        Ok(job)
    }

    /// Read-modify-write one job atomically. The story's stage is updated to
    /// the job's status in the same transaction.
    pub fn update_job<F>(&self, story_id: &str, f: F) -> Result<VideoJob, StoreError>
    where
        F: FnOnce(&mut VideoJob),
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut job = Self::read_job(&tx, story_id)?.ok_or_else(|| StoreError::MissingStory {
            id: story_id.to_string(),
        })?;
        f(&mut job);
        job.updated_at = Utc::now();
        Self::write_job(&tx, &job)?;
        tx.commit()?;
        Ok(job)
    }

    fn read_job(conn: &Connection, story_id: &str) -> Result<Option<VideoJob>, StoreError> {
        Ok(conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM video_jobs WHERE story_id = ?1"),
                [story_id],
                parse_job_row,
            )
            .optional()?)
    }

    fn write_job(conn: &Connection, job: &VideoJob) -> Result<(), StoreError> {
        let a = &job.artifacts;
        conn.execute(
            "
            INSERT INTO video_jobs (
                story_id, stage, completed_stage, stage_started_at, stage_error,
                failed_stage, script_path, audio_path, audio_duration_secs,
                timestamps_path, captions_path, video_path, external_id,
                publish_attempts, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ON CONFLICT(story_id) DO UPDATE SET
                stage = excluded.stage,
                completed_stage = excluded.completed_stage,
                stage_started_at = excluded.stage_started_at,
                stage_error = excluded.stage_error,
                failed_stage = excluded.failed_stage,
                script_path = excluded.script_path,
                audio_path = excluded.audio_path,
                audio_duration_secs = excluded.audio_duration_secs,
                timestamps_path = excluded.timestamps_path,
                captions_path = excluded.captions_path,
                video_path = excluded.video_path,
                external_id = excluded.external_id,
                publish_attempts = excluded.publish_attempts,
                updated_at = excluded.updated_at
            ",
            params![
                job.story_id,
                job.stage.as_str(),
                job.completed_stage.as_str(),
                job.stage_started_at.map(|t| t.to_rfc3339()),
                job.stage_error,
                job.failed_stage.map(|s| s.as_str()),
                path_str(&a.script),
                path_str(&a.audio),
                a.audio_duration_secs,
                path_str(&a.timestamps),
                path_str(&a.captions),
                path_str(&a.video),
                a.external_id,
                job.publish_attempts as i64,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )?;
        conn.execute(
            "UPDATE stories SET stage = ?2 WHERE id = ?1",
            params![job.story_id, job.stage.as_str()],
        )?;
        Ok(())
    }
}

const STORY_COLUMNS: &str = "id, source, title, url, raw_score, normalized_score, \
     weighted_score, created_at, fetched_at, context_json, stage";

const JOB_COLUMNS: &str = "story_id, stage, completed_stage, stage_started_at, stage_error, \
     failed_stage, script_path, audio_path, audio_duration_secs, timestamps_path, \
     captions_path, video_path, external_id, publish_attempts, created_at, updated_at";

fn path_str(p: &Option<PathBuf>) -> Option<String> {
    p.as_ref().map(|p| p.to_string_lossy().into_owned())
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn invalid_data(idx: usize, message: String) -> rusqlite::Error {
    conversion_error(
        idx,
        std::io::Error::new(std::io::ErrorKind::InvalidData, message),
    )
}

fn column_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_timestamp(row.get::<_, String>(idx)?).map_err(|err| conversion_error(idx, err))
}

fn column_stage(row: &Row<'_>, idx: usize) -> rusqlite::Result<Stage> {
    let raw: String = row.get(idx)?;
    raw.parse::<Stage>()
        .map_err(|_| invalid_data(idx, format!("invalid stage: {raw}")))
}

fn parse_story_row(row: &Row<'_>) -> rusqlite::Result<Story> {
    let source_raw: String = row.get(1)?;
    let source = source_raw
        .parse::<SourceKind>()
        .map_err(|_| invalid_data(1, format!("invalid source: {source_raw}")))?;
    let context_json: String = row.get(9)?;
    let context: Vec<ContextEntry> =
        serde_json::from_str(&context_json).map_err(|err| conversion_error(9, err))?;

    Ok(Story {
        id: row.get(0)?,
        source,
        title: row.get(2)?,
        url: row.get(3)?,
        raw_score: row.get(4)?,
        normalized_score: row.get(5)?,
        weighted_score: row.get(6)?,
        created_at: column_timestamp(row, 7)?,
        fetched_at: column_timestamp(row, 8)?,
        context,
        stage: column_stage(row, 10)?,
    })
}

fn parse_job_row(row: &Row<'_>) -> rusqlite::Result<VideoJob> {
    let stage_started_at = row
        .get::<_, Option<String>>(3)?
        .map(parse_timestamp)
        .transpose()
        .map_err(|err| conversion_error(3, err))?;
    let failed_stage = match row.get::<_, Option<String>>(5)? {
        Some(raw) => Some(
            raw.parse::<Stage>()
                .map_err(|_| invalid_data(5, format!("invalid stage: {raw}")))?,
        ),
        None => None,
    };
    let path = |idx: usize| -> rusqlite::Result<Option<PathBuf>> {
        Ok(row.get::<_, Option<String>>(idx)?.map(PathBuf::from))
    };

    Ok(VideoJob {
        story_id: row.get(0)?,
        stage: column_stage(row, 1)?,
        completed_stage: column_stage(row, 2)?,
        stage_started_at,
        stage_error: row.get(4)?,
        failed_stage,
        artifacts: JobArtifacts {
            script: path(6)?,
            audio: path(7)?,
            audio_duration_secs: row.get(8)?,
            timestamps: path(9)?,
            captions: path(10)?,
            video: path(11)?,
            external_id: row.get(12)?,
        },
        publish_attempts: row.get::<_, i64>(13)?.max(0) as u32,
        created_at: column_timestamp(row, 14)?,
        updated_at: column_timestamp(row, 15)?,
    })
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StoreError::Timestamp(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::story_id;
    use crate::model::Comment;
    use chrono::TimeZone;

    fn story(url: &str, source: SourceKind, weighted: f64) -> Story {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        Story {
            id: story_id(url),
            source,
            title: format!("title for {url}"),
            url: url.into(),
            raw_score: Some(10.0),
            normalized_score: weighted,
            weighted_score: weighted,
            created_at: t,
            fetched_at: t,
            context: vec![ContextEntry::Comments {
                source,
                entries: vec![Comment::new(None, url)],
            }],
            stage: Stage::Ingested,
        }
    }

    #[test]
    fn migrate_sets_version_and_is_repeatable() {
        let store = StoryStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
        store.migrate().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        {
            let conn = Connection::open(tmp.path()).unwrap();
            conn.execute("PRAGMA user_version = 99", []).unwrap();
        }
        let err = StoryStore::open(tmp.path()).err().unwrap();
        assert!(matches!(
            err,
            StoreError::UnsupportedSchemaVersion { found: 99, .. }
        ));
    }

    #[test]
    fn upsert_round_trips_and_merges() {
        let store = StoryStore::open_in_memory().unwrap();
        let a = story("https://a.dev/x", SourceKind::Reddit, 0.2);
        assert_eq!(
            store.upsert_stories(&[a.clone()]).unwrap(),
            UpsertOutcome { inserted: 1, updated: 0 }
        );
        assert_eq!(store.get_story(&a.id).unwrap().unwrap(), a);

        let mut again = story("https://a.dev/x", SourceKind::HackerNews, 0.7);
        again.context = vec![ContextEntry::TweetText { text: "new".into() }];
        assert_eq!(
            store.upsert_stories(&[again.clone()]).unwrap(),
            UpsertOutcome { inserted: 0, updated: 1 }
        );
        let got = store.get_story(&a.id).unwrap().unwrap();
        assert_eq!(got.id, a.id);
        assert_eq!(got.weighted_score, 0.7);
        assert_eq!(got.source, SourceKind::HackerNews);
        assert_eq!(got.context.len(), 2);
        assert_eq!(store.list_stories(&StoryFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn reingest_keeps_pipeline_stage() {
        let store = StoryStore::open_in_memory().unwrap();
        let a = story("https://a.dev/x", SourceKind::Reddit, 0.2);
        store.upsert_stories(&[a.clone()]).unwrap();
        store.ensure_job(&a.id).unwrap();
        store
            .update_job(&a.id, |j| {
                j.stage = Stage::Voiced;
                j.completed_stage = Stage::Voiced;
            })
            .unwrap();
        store.upsert_stories(&[a.clone()]).unwrap();
        assert_eq!(store.get_story(&a.id).unwrap().unwrap().stage, Stage::Voiced);
    }

    #[test]
    fn list_filters_and_orders() {
        let store = StoryStore::open_in_memory().unwrap();
        store
            .upsert_stories(&[
                story("https://a.dev/1", SourceKind::Reddit, 0.1),
                story("https://a.dev/2", SourceKind::HackerNews, 0.9),
                story("https://a.dev/3", SourceKind::Reddit, 0.5),
            ])
            .unwrap();
        let all = store.list_stories(&StoryFilter::default()).unwrap();
        let scores: Vec<_> = all.iter().map(|s| s.weighted_score).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.1]);

        let reddit = store
            .list_stories(&StoryFilter {
                source: Some(SourceKind::Reddit),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(reddit.len(), 1);
        assert_eq!(reddit[0].weighted_score, 0.5);

        let scripted = store
            .list_stories(&StoryFilter {
                stage: Some(Stage::Scripted),
                ..Default::default()
            })
            .unwrap();
        assert!(scripted.is_empty());
    }

    #[test]
    fn prefix_resolution() {
        let store = StoryStore::open_in_memory().unwrap();
        let mut a = story("https://a.dev/1", SourceKind::Reddit, 0.1);
        let mut b = story("https://a.dev/2", SourceKind::Reddit, 0.1);
        a.id = format!("abc1{}", "0".repeat(60));
        b.id = format!("abc2{}", "0".repeat(60));
        store.upsert_stories(&[a.clone(), b.clone()]).unwrap();

        assert_eq!(store.resolve_prefix("ABC1").unwrap(), a.id);
        assert!(matches!(
            store.resolve_prefix("abc"),
            Err(StoreError::Ambiguous { ref matches, .. }) if matches.len() == 2
        ));
        assert!(matches!(store.resolve_prefix("ffff"), Err(StoreError::NotFound { .. })));
        assert!(matches!(store.resolve_prefix(""), Err(StoreError::NotFound { .. })));
        assert!(matches!(store.resolve_prefix("a%"), Err(StoreError::NotFound { .. })));
        assert_eq!(store.find_by_prefix("abc2").unwrap().id, b.id);
    }

    #[test]
    fn job_requires_story_and_is_created_once() {
        let store = StoryStore::open_in_memory().unwrap();
        assert!(matches!(
            store.ensure_job("nope"),
            Err(StoreError::MissingStory { .. })
        ));
        let a = story("https://a.dev/1", SourceKind::Reddit, 0.1);
        store.upsert_stories(&[a.clone()]).unwrap();
        let j1 = store.ensure_job(&a.id).unwrap();
        let j2 = store.ensure_job(&a.id).unwrap();
        assert_eq!(j1, j2);
        assert_eq!(j1.stage, Stage::Ingested);
    }

    #[test]
    fn update_job_persists_fields_and_mirrors_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("nested").join("s.db");
        let a = story("https://a.dev/1", SourceKind::Reddit, 0.1);
        {
            let store = StoryStore::open(&db).unwrap();
            store.upsert_stories(&[a.clone()]).unwrap();
            store.ensure_job(&a.id).unwrap();
            store
                .update_job(&a.id, |j| {
                    j.stage = Stage::Failed;
                    j.completed_stage = Stage::Voiced;
                    j.failed_stage = Some(Stage::Timestamped);
                    j.stage_error = Some("whisper exploded".into());
                    j.artifacts.audio = Some("out/a/narration.mp3".into());
                    j.artifacts.audio_duration_secs = Some(41.5);
                    j.publish_attempts = 2;
                })
                .unwrap();
        }
        // Reopen: survives restart.
        let store = StoryStore::open(&db).unwrap();
        let job = store.get_job(&a.id).unwrap().unwrap();
        assert_eq!(job.stage, Stage::Failed);
        assert_eq!(job.completed_stage, Stage::Voiced);
        assert_eq!(job.failed_stage, Some(Stage::Timestamped));
        assert_eq!(job.stage_error.as_deref(), Some("whisper exploded"));
        assert_eq!(job.artifacts.audio_duration_secs, Some(41.5));
        assert_eq!(job.publish_attempts, 2);
        assert_eq!(store.get_story(&a.id).unwrap().unwrap().stage, Stage::Failed);
    }
}

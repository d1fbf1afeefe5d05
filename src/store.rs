use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::app_dirs::AppDirs;
use crate::clock::Millis;
use crate::error::Result;
use crate::patterns::{CharErrorPattern, KeyAccuracyRecord, SequenceErrorPattern};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable aggregate storage keyed by user + key, user + pair and user + sequence.
///
/// Every upsert must be a single atomic insert-or-increment so that
/// concurrent writers to the same key never lose an update.
pub trait PatternStore {
    /// A press without a latency counts toward accuracy but leaves the
    /// mean latency alone.
    fn upsert_key_accuracy(
        &self,
        user: &str,
        key: char,
        correct: bool,
        latency_ms: Option<Millis>,
    ) -> Result<()>;
    fn upsert_char_error(&self, user: &str, expected: char, actual: char) -> Result<()>;
    fn upsert_sequence(
        &self,
        user: &str,
        sequence: &str,
        had_error: bool,
        latency_ms: Millis,
    ) -> Result<()>;

    fn key_accuracy(&self, user: &str, key: char) -> Result<Option<KeyAccuracyRecord>>;
    fn sequence(&self, user: &str, sequence: &str) -> Result<Option<SequenceErrorPattern>>;

    /// Lowest accuracy first, ties broken by more errors
    fn weakest_keys(
        &self,
        user: &str,
        limit: usize,
        min_samples: i64,
    ) -> Result<Vec<KeyAccuracyRecord>>;
    /// Highest mean latency first, counting only presses that had a latency
    fn slowest_keys(
        &self,
        user: &str,
        limit: usize,
        min_samples: i64,
    ) -> Result<Vec<KeyAccuracyRecord>>;
    fn top_confusions(&self, user: &str, limit: usize) -> Result<Vec<CharErrorPattern>>;
    /// Highest error rate first, ties broken by more errors
    fn weakest_sequences(
        &self,
        user: &str,
        limit: usize,
        min_samples: i64,
    ) -> Result<Vec<SequenceErrorPattern>>;
    fn slowest_sequences(
        &self,
        user: &str,
        limit: usize,
        min_samples: i64,
    ) -> Result<Vec<SequenceErrorPattern>>;

    fn clear_user(&self, user: &str) -> Result<()>;
}

/// SQLite-backed pattern store
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens the store at the default state directory
    pub fn open_default() -> Result<Self> {
        Self::open(AppDirs::db_path())
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!(path = %path.display(), "opening pattern store");
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS key_accuracy (
                user_id TEXT NOT NULL,
                key TEXT NOT NULL,
                total_presses INTEGER NOT NULL,
                correct_presses INTEGER NOT NULL,
                avg_latency_ms INTEGER NOT NULL,
                latency_samples INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, key)
            );

            CREATE TABLE IF NOT EXISTS char_errors (
                user_id TEXT NOT NULL,
                expected TEXT NOT NULL,
                actual TEXT NOT NULL,
                count INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, expected, actual)
            );

            CREATE TABLE IF NOT EXISTS sequence_errors (
                user_id TEXT NOT NULL,
                sequence TEXT NOT NULL,
                total_attempts INTEGER NOT NULL,
                error_count INTEGER NOT NULL,
                avg_latency_ms INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, sequence)
            );
            "#,
        )?;

        Ok(Self { conn })
    }

    fn key_rows(
        &self,
        sql: &str,
        user: &str,
        limit: usize,
        min_samples: i64,
    ) -> Result<Vec<KeyAccuracyRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![user, min_samples, limit as i64], key_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn sequence_rows(
        &self,
        sql: &str,
        user: &str,
        limit: usize,
        min_samples: i64,
    ) -> Result<Vec<SequenceErrorPattern>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![user, min_samples, limit as i64], sequence_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn first_char(text: String) -> char {
    text.chars().next().unwrap_or('\0')
}

fn key_from_row(row: &Row<'_>) -> rusqlite::Result<KeyAccuracyRecord> {
    Ok(KeyAccuracyRecord {
        key: first_char(row.get(0)?),
        total_presses: row.get(1)?,
        correct_presses: row.get(2)?,
        avg_latency_ms: row.get(3)?,
        latency_samples: row.get(4)?,
    })
}

fn sequence_from_row(row: &Row<'_>) -> rusqlite::Result<SequenceErrorPattern> {
    Ok(SequenceErrorPattern {
        sequence: row.get(0)?,
        total_attempts: row.get(1)?,
        error_count: row.get(2)?,
        avg_latency_ms: row.get(3)?,
    })
}

impl PatternStore for SqliteStore {
    fn upsert_key_accuracy(
        &self,
        user: &str,
        key: char,
        correct: bool,
        latency_ms: Option<Millis>,
    ) -> Result<()> {
        // SET expressions see the row as it was before the update
        self.conn.execute(
            r#"
            INSERT INTO key_accuracy (
                user_id, key, total_presses, correct_presses,
                avg_latency_ms, latency_samples, updated_at
            )
            VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)
            ON CONFLICT (user_id, key) DO UPDATE SET
                total_presses = total_presses + 1,
                correct_presses = correct_presses + excluded.correct_presses,
                avg_latency_ms = CASE
                    WHEN excluded.latency_samples = 0 THEN avg_latency_ms
                    ELSE CAST(ROUND(
                        (avg_latency_ms * latency_samples + excluded.avg_latency_ms)
                        * 1.0 / (latency_samples + 1)
                    ) AS INTEGER)
                END,
                latency_samples = latency_samples + excluded.latency_samples,
                updated_at = excluded.updated_at
            "#,
            params![
                user,
                key.to_string(),
                i64::from(correct),
                latency_ms.unwrap_or_default(),
                i64::from(latency_ms.is_some()),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn upsert_char_error(&self, user: &str, expected: char, actual: char) -> Result<()> {
        if expected == actual {
            return Ok(());
        }
        self.conn.execute(
            r#"
            INSERT INTO char_errors (user_id, expected, actual, count, updated_at)
            VALUES (?1, ?2, ?3, 1, ?4)
            ON CONFLICT (user_id, expected, actual) DO UPDATE SET
                count = count + 1,
                updated_at = excluded.updated_at
            "#,
            params![
                user,
                expected.to_string(),
                actual.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn upsert_sequence(
        &self,
        user: &str,
        sequence: &str,
        had_error: bool,
        latency_ms: Millis,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO sequence_errors (
                user_id, sequence, total_attempts, error_count, avg_latency_ms, updated_at
            )
            VALUES (?1, ?2, 1, ?3, ?4, ?5)
            ON CONFLICT (user_id, sequence) DO UPDATE SET
                total_attempts = total_attempts + 1,
                error_count = error_count + excluded.error_count,
                avg_latency_ms = CAST(ROUND(
                    (avg_latency_ms * total_attempts + excluded.avg_latency_ms)
                    * 1.0 / (total_attempts + 1)
                ) AS INTEGER),
                updated_at = excluded.updated_at
            "#,
            params![
                user,
                sequence,
                i64::from(had_error),
                latency_ms,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn key_accuracy(&self, user: &str, key: char) -> Result<Option<KeyAccuracyRecord>> {
        let record = self
            .conn
            .query_row(
                r#"
                SELECT key, total_presses, correct_presses, avg_latency_ms, latency_samples
                FROM key_accuracy
                WHERE user_id = ?1 AND key = ?2
                "#,
                params![user, key.to_string()],
                key_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn sequence(&self, user: &str, sequence: &str) -> Result<Option<SequenceErrorPattern>> {
        let record = self
            .conn
            .query_row(
                r#"
                SELECT sequence, total_attempts, error_count, avg_latency_ms
                FROM sequence_errors
                WHERE user_id = ?1 AND sequence = ?2
                "#,
                params![user, sequence],
                sequence_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn weakest_keys(
        &self,
        user: &str,
        limit: usize,
        min_samples: i64,
    ) -> Result<Vec<KeyAccuracyRecord>> {
        self.key_rows(
            r#"
            SELECT key, total_presses, correct_presses, avg_latency_ms, latency_samples
            FROM key_accuracy
            WHERE user_id = ?1 AND total_presses >= ?2
            ORDER BY (correct_presses * 1.0 / total_presses) ASC,
                     (total_presses - correct_presses) DESC,
                     key ASC
            LIMIT ?3
            "#,
            user,
            limit,
            min_samples,
        )
    }

    fn slowest_keys(
        &self,
        user: &str,
        limit: usize,
        min_samples: i64,
    ) -> Result<Vec<KeyAccuracyRecord>> {
        self.key_rows(
            r#"
            SELECT key, total_presses, correct_presses, avg_latency_ms, latency_samples
            FROM key_accuracy
            WHERE user_id = ?1 AND latency_samples >= ?2
            ORDER BY avg_latency_ms DESC, key ASC
            LIMIT ?3
            "#,
            user,
            limit,
            min_samples,
        )
    }

    fn top_confusions(&self, user: &str, limit: usize) -> Result<Vec<CharErrorPattern>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT expected, actual, count
            FROM char_errors
            WHERE user_id = ?1
            ORDER BY count DESC, expected ASC, actual ASC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![user, limit as i64], |row| {
            Ok(CharErrorPattern {
                expected: first_char(row.get(0)?),
                actual: first_char(row.get(1)?),
                count: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn weakest_sequences(
        &self,
        user: &str,
        limit: usize,
        min_samples: i64,
    ) -> Result<Vec<SequenceErrorPattern>> {
        self.sequence_rows(
            r#"
            SELECT sequence, total_attempts, error_count, avg_latency_ms
            FROM sequence_errors
            WHERE user_id = ?1 AND total_attempts >= ?2
            ORDER BY (error_count * 1.0 / total_attempts) DESC,
                     error_count DESC,
                     sequence ASC
            LIMIT ?3
            "#,
            user,
            limit,
            min_samples,
        )
    }

    fn slowest_sequences(
        &self,
        user: &str,
        limit: usize,
        min_samples: i64,
    ) -> Result<Vec<SequenceErrorPattern>> {
        self.sequence_rows(
            r#"
            SELECT sequence, total_attempts, error_count, avg_latency_ms
            FROM sequence_errors
            WHERE user_id = ?1 AND total_attempts >= ?2
            ORDER BY avg_latency_ms DESC, sequence ASC
            LIMIT ?3
            "#,
            user,
            limit,
            min_samples,
        )
    }

    fn clear_user(&self, user: &str) -> Result<()> {
        for table in ["key_accuracy", "char_errors", "sequence_errors"] {
            self.conn
                .execute(&format!("DELETE FROM {table} WHERE user_id = ?1"), [user])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: &str = "alice";

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_key_accuracy_counts() {
        let store = store();
        for _ in 0..4 {
            store.upsert_key_accuracy(USER, 'e', true, Some(100)).unwrap();
        }
        store.upsert_key_accuracy(USER, 'e', false, Some(200)).unwrap();

        let record = store.key_accuracy(USER, 'e').unwrap().unwrap();
        assert_eq!(record.total_presses, 5);
        assert_eq!(record.correct_presses, 4);
        assert_eq!(record.avg_latency_ms, 120);
        assert!((record.accuracy() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_running_mean_matches_util() {
        let store = store();
        let samples = [130, 95, 240, 101, 88, 175];
        let mut expected = 0;
        for (count, &sample) in samples.iter().enumerate() {
            store.upsert_key_accuracy(USER, 'q', true, Some(sample)).unwrap();
            expected = crate::util::running_mean(expected, count as i64, sample);
            let record = store.key_accuracy(USER, 'q').unwrap().unwrap();
            assert_eq!(record.avg_latency_ms, expected);
        }
    }

    #[test]
    fn test_press_without_latency_keeps_mean() {
        let store = store();
        store.upsert_key_accuracy(USER, 'a', true, None).unwrap();
        store.upsert_key_accuracy(USER, 'a', true, Some(400)).unwrap();
        store.upsert_key_accuracy(USER, 'a', false, None).unwrap();
        store.upsert_key_accuracy(USER, 'a', true, Some(200)).unwrap();

        let record = store.key_accuracy(USER, 'a').unwrap().unwrap();
        assert_eq!(record.total_presses, 4);
        assert_eq!(record.correct_presses, 3);
        assert_eq!(record.latency_samples, 2);
        assert_eq!(record.avg_latency_ms, 300);
    }

    #[test]
    fn test_slowest_keys_need_latency_samples() {
        let store = store();
        for _ in 0..5 {
            store.upsert_key_accuracy(USER, 'o', true, None).unwrap();
            store.upsert_key_accuracy(USER, 'p', true, Some(80)).unwrap();
        }

        let slowest = store.slowest_keys(USER, 10, 5).unwrap();
        assert_eq!(slowest.len(), 1);
        assert_eq!(slowest[0].key, 'p');
        // still ranked on accuracy
        assert_eq!(store.weakest_keys(USER, 10, 5).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_key_is_none() {
        assert!(store().key_accuracy(USER, 'z').unwrap().is_none());
    }

    #[test]
    fn test_users_are_isolated() {
        let store = store();
        store.upsert_key_accuracy("alice", 'a', true, Some(100)).unwrap();
        store.upsert_key_accuracy("bob", 'a', false, Some(100)).unwrap();

        assert_eq!(store.key_accuracy("alice", 'a').unwrap().unwrap().correct_presses, 1);
        assert_eq!(store.key_accuracy("bob", 'a').unwrap().unwrap().correct_presses, 0);

        store.clear_user("bob").unwrap();
        assert!(store.key_accuracy("bob", 'a').unwrap().is_none());
        assert!(store.key_accuracy("alice", 'a').unwrap().is_some());
    }

    #[test]
    fn test_char_error_counts_pairs() {
        let store = store();
        store.upsert_char_error(USER, 'e', 'r').unwrap();
        store.upsert_char_error(USER, 'e', 'r').unwrap();
        store.upsert_char_error(USER, 'e', 'w').unwrap();
        store.upsert_char_error(USER, 'a', 'a').unwrap();

        let confusions = store.top_confusions(USER, 10).unwrap();
        assert_eq!(
            confusions,
            vec![
                CharErrorPattern { expected: 'e', actual: 'r', count: 2 },
                CharErrorPattern { expected: 'e', actual: 'w', count: 1 },
            ]
        );
    }

    #[test]
    fn test_sequence_upsert() {
        let store = store();
        store.upsert_sequence(USER, "th", false, 100).unwrap();
        store.upsert_sequence(USER, "th", true, 201).unwrap();

        let th = store.sequence(USER, "th").unwrap().unwrap();
        assert_eq!(th.total_attempts, 2);
        assert_eq!(th.error_count, 1);
        assert_eq!(th.avg_latency_ms, 151);
    }

    #[test]
    fn test_weakest_keys_ranking() {
        let store = store();
        // 'a': 3/5, 'b': 6/10 (same accuracy, more errors), 'c': 5/5, 'd': 0/2 (too few)
        for i in 0..5 {
            store.upsert_key_accuracy(USER, 'a', i < 3, Some(100)).unwrap();
            store.upsert_key_accuracy(USER, 'c', true, Some(100)).unwrap();
        }
        for i in 0..10 {
            store.upsert_key_accuracy(USER, 'b', i < 6, Some(100)).unwrap();
        }
        for _ in 0..2 {
            store.upsert_key_accuracy(USER, 'd', false, Some(100)).unwrap();
        }

        let keys: Vec<char> = store
            .weakest_keys(USER, 10, 5)
            .unwrap()
            .iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!['b', 'a', 'c']);

        let limited = store.weakest_keys(USER, 1, 5).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].key, 'b');
    }

    #[test]
    fn test_slowest_keys_ranking() {
        let store = store();
        for _ in 0..5 {
            store.upsert_key_accuracy(USER, 'x', true, Some(300)).unwrap();
            store.upsert_key_accuracy(USER, 'y', true, Some(150)).unwrap();
        }
        store.upsert_key_accuracy(USER, 'z', true, Some(9_000)).unwrap();

        let keys: Vec<char> = store
            .slowest_keys(USER, 10, 5)
            .unwrap()
            .iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!['x', 'y']);
    }

    #[test]
    fn test_sequence_rankings() {
        let store = store();
        for i in 0..5 {
            store.upsert_sequence(USER, "th", i < 1, 80).unwrap();
            store.upsert_sequence(USER, "qu", i < 3, 200).unwrap();
        }
        store.upsert_sequence(USER, "zx", true, 5_000).unwrap();

        let weakest: Vec<String> = store
            .weakest_sequences(USER, 10, 5)
            .unwrap()
            .into_iter()
            .map(|s| s.sequence)
            .collect();
        assert_eq!(weakest, vec!["qu", "th"]);

        let slowest = store.slowest_sequences(USER, 1, 5).unwrap();
        assert_eq!(slowest[0].sequence, "qu");
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("patterns.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_key_accuracy(USER, 'k', true, Some(90)).unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(
            reopened.key_accuracy(USER, 'k').unwrap().unwrap().total_presses,
            1
        );
    }
}

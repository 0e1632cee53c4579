//! SQLite-backed trigram model implementing [`Engine`].
//!
//! A trained line is split on whitespace and padded with a boundary token
//! (id 0) on both ends; every window of three tokens bumps a counter.
//! Replies pick a pivot trigram containing a seed word and walk the counts
//! forward and backward until both ends reach a boundary.

use std::collections::VecDeque;
use std::path::Path;

use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rusqlite::{Connection, OptionalExtension, params};

use crate::engine::{Engine, Shutdown};
use crate::error::EngineError;

const BOUNDARY: i64 = 0;
const MAX_REPLY_TOKENS: usize = 64;
/// Lines per transaction in `train_many`.
const BATCH_SIZE: usize = 1000;

/// What an untrained brain says.
pub const EMPTY_BRAIN_REPLY: &str = "I don't know enough to answer you yet!";

const FORWARD: &str = "SELECT w3, count FROM trigrams WHERE w1 = ?1 AND w2 = ?2";
const BACKWARD: &str = "SELECT w1, count FROM trigrams WHERE w2 = ?1 AND w3 = ?2";

/// Persistent trigram store.
pub struct Brain {
    db: Connection,
    rng: StdRng,
}

impl Brain {
    /// Open or create a brain file.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let db = Connection::open(path).map_err(|source| EngineError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::init(db)
    }

    /// Open an in-memory brain (for testing).
    pub fn in_memory() -> Result<Self, EngineError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self, EngineError> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS tokens (
                id INTEGER PRIMARY KEY,
                text TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS trigrams (
                w1 INTEGER NOT NULL,
                w2 INTEGER NOT NULL,
                w3 INTEGER NOT NULL,
                count INTEGER NOT NULL,
                PRIMARY KEY (w1, w2, w3)
            ) WITHOUT ROWID;
            CREATE INDEX IF NOT EXISTS idx_trigrams_w2_w3
                ON trigrams(w2, w3);
            INSERT OR IGNORE INTO tokens (id, text) VALUES (0, '');",
        )?;
        Ok(Self {
            db,
            rng: StdRng::from_entropy(),
        })
    }

    /// Make generation reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Every learned token with its id, boundary excluded.
    pub fn tokens(&self) -> Result<Vec<(i64, String)>, EngineError> {
        let mut stmt = self
            .db
            .prepare("SELECT id, text FROM tokens WHERE id != 0 ORDER BY id ASC")?;
        let tokens = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tokens)
    }

    /// Every trigram as token texts (boundary rendered as `""`) with its count.
    pub fn trigram_counts(&self) -> Result<Vec<([String; 3], i64)>, EngineError> {
        let mut stmt = self.db.prepare(
            "SELECT a.text, b.text, c.text, t.count
             FROM trigrams t
             JOIN tokens a ON a.id = t.w1
             JOIN tokens b ON b.id = t.w2
             JOIN tokens c ON c.id = t.w3
             ORDER BY t.w1, t.w2, t.w3",
        )?;
        let grams = stmt
            .query_map([], |row| {
                Ok(([row.get(0)?, row.get(1)?, row.get(2)?], row.get(3)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(grams)
    }

    fn lookup(&self, word: &str) -> Result<Option<i64>, EngineError> {
        let id = self
            .db
            .prepare_cached("SELECT id FROM tokens WHERE text = ?1")?
            .query_row([word], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    fn text_of(&self, id: i64) -> Result<String, EngineError> {
        let text = self
            .db
            .prepare_cached("SELECT text FROM tokens WHERE id = ?1")?
            .query_row([id], |row| row.get(0))?;
        Ok(text)
    }

    /// Weighted pick of a whole trigram from the rows `sql` selects.
    fn pick_trigram(&mut self, sql: &str, word: i64) -> Result<Option<[i64; 3]>, EngineError> {
        let rows = {
            let mut stmt = self.db.prepare_cached(sql)?;
            let rows = stmt
                .query_map([word], |row| {
                    Ok(([row.get(0)?, row.get(1)?, row.get(2)?], row.get(3)?))
                })?
                .collect::<Result<Vec<([i64; 3], i64)>, _>>()?;
            rows
        };
        Ok(choose_weighted(&rows, &mut self.rng))
    }

    /// Weighted pick of one neighbouring token.
    fn pick_neighbour(&mut self, sql: &str, a: i64, b: i64) -> Result<Option<i64>, EngineError> {
        let rows = {
            let mut stmt = self.db.prepare_cached(sql)?;
            let rows = stmt
                .query_map(params![a, b], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<(i64, i64)>, _>>()?;
            rows
        };
        Ok(choose_weighted(&rows, &mut self.rng))
    }
}

impl Engine for Brain {
    fn train(&mut self, text: &str) -> Result<(), EngineError> {
        learn(&self.db, text)?;
        Ok(())
    }

    fn train_many<I>(&mut self, texts: I, shutdown: &Shutdown) -> Result<usize, EngineError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut texts = texts.into_iter();
        let mut count = 0;
        loop {
            let tx = self.db.transaction()?;
            let mut batch = 0;
            while batch < BATCH_SIZE && !shutdown.is_requested() {
                let Some(text) = texts.next() else { break };
                learn(&tx, &text)?;
                batch += 1;
            }
            tx.commit()?;
            count += batch;
            // Source exhausted or shutdown requested.
            if batch < BATCH_SIZE {
                break;
            }
        }
        Ok(count)
    }

    fn reply(&mut self, seed: &str) -> Result<String, EngineError> {
        let known = seed
            .split_whitespace()
            .filter_map(|word| self.lookup(word).transpose())
            .collect::<Result<Vec<i64>, _>>()?;

        let mut pivot = None;
        if let Some(&word) = known.choose(&mut self.rng) {
            pivot = self.pick_trigram("SELECT w1, w2, w3, count FROM trigrams WHERE w2 = ?1", word)?;
        }
        if pivot.is_none() {
            pivot = self.pick_trigram(
                "SELECT w1, w2, w3, count FROM trigrams WHERE w1 = ?1 AND w2 = ?1",
                BOUNDARY,
            )?;
        }
        let Some(pivot) = pivot else {
            return Ok(EMPTY_BRAIN_REPLY.to_string());
        };

        let mut seq: VecDeque<i64> = pivot.into_iter().collect();
        while seq.back() != Some(&BOUNDARY) && seq.len() < MAX_REPLY_TOKENS {
            let n = seq.len();
            match self.pick_neighbour(FORWARD, seq[n - 2], seq[n - 1])? {
                Some(next) => seq.push_back(next),
                None => break,
            }
        }
        while seq.front() != Some(&BOUNDARY) && seq.len() < MAX_REPLY_TOKENS {
            match self.pick_neighbour(BACKWARD, seq[0], seq[1])? {
                Some(prev) => seq.push_front(prev),
                None => break,
            }
        }

        let words = seq
            .into_iter()
            .filter(|&id| id != BOUNDARY)
            .map(|id| self.text_of(id))
            .collect::<Result<Vec<_>, _>>()?;
        if words.is_empty() {
            return Ok(EMPTY_BRAIN_REPLY.to_string());
        }
        Ok(words.join(" "))
    }
}

/// Record one line. Works on a plain connection or inside a transaction.
fn learn(db: &Connection, text: &str) -> rusqlite::Result<()> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Ok(());
    }

    let mut ids = vec![BOUNDARY, BOUNDARY];
    for word in words {
        ids.push(token_id(db, word)?);
    }
    ids.push(BOUNDARY);

    let mut bump = db.prepare_cached(
        "INSERT INTO trigrams (w1, w2, w3, count) VALUES (?1, ?2, ?3, 1)
         ON CONFLICT (w1, w2, w3) DO UPDATE SET count = count + 1",
    )?;
    for w in ids.windows(3) {
        bump.execute(params![w[0], w[1], w[2]])?;
    }
    Ok(())
}

fn token_id(db: &Connection, word: &str) -> rusqlite::Result<i64> {
    db.prepare_cached("INSERT OR IGNORE INTO tokens (text) VALUES (?1)")?
        .execute([word])?;
    db.prepare_cached("SELECT id FROM tokens WHERE text = ?1")?
        .query_row([word], |row| row.get(0))
}

fn choose_weighted<T: Copy>(rows: &[(T, i64)], rng: &mut StdRng) -> Option<T> {
    let dist = WeightedIndex::new(rows.iter().map(|(_, count)| (*count).max(1) as u64)).ok()?;
    Some(rows[dist.sample(rng)].0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brain() -> Brain {
        Brain::in_memory().unwrap().with_seed(1)
    }

    #[test]
    fn empty_brain_has_a_stock_answer() {
        let mut b = brain();
        assert_eq!(b.reply("").unwrap(), EMPTY_BRAIN_REPLY);
        assert_eq!(b.reply("hello").unwrap(), EMPTY_BRAIN_REPLY);
    }

    #[test]
    fn single_sentence_is_reproduced_from_any_seed() {
        let mut b = brain();
        b.train("hello brave new world").unwrap();
        assert_eq!(b.reply("brave").unwrap(), "hello brave new world");
        assert_eq!(b.reply("world").unwrap(), "hello brave new world");
        assert_eq!(b.reply("").unwrap(), "hello brave new world");
        assert_eq!(b.reply("nothing known here").unwrap(), "hello brave new world");
    }

    #[test]
    fn reply_contains_seed_word() {
        let mut b = brain();
        b.train("the cat sat down").unwrap();
        b.train("a dog ran off").unwrap();
        for _ in 0..20 {
            assert!(b.reply("dog").unwrap().contains("dog"));
        }
    }

    #[test]
    fn blank_lines_teach_nothing() {
        let mut b = brain();
        b.train("   ").unwrap();
        b.train("").unwrap();
        assert!(b.tokens().unwrap().is_empty());
        assert!(b.trigram_counts().unwrap().is_empty());
    }

    #[test]
    fn counts_accumulate() {
        let mut b = brain();
        b.train("hi there").unwrap();
        b.train("hi there").unwrap();
        let grams = b.trigram_counts().unwrap();
        assert_eq!(grams.len(), 3);
        assert!(grams.iter().all(|(_, count)| *count == 2));
        assert_eq!(
            grams[0].0,
            ["".to_string(), "".to_string(), "hi".to_string()]
        );
        assert_eq!(
            b.tokens().unwrap(),
            vec![(1, "hi".to_string()), (2, "there".to_string())]
        );
    }

    #[test]
    fn train_many_batches_and_honours_shutdown() {
        let mut b = brain();
        let lines = (0..2500).map(|i| format!("line number {i}"));
        assert_eq!(b.train_many(lines, &Shutdown::new()).unwrap(), 2500);

        let stop = Shutdown::new();
        stop.request();
        assert_eq!(b.train_many(vec!["never seen".to_string()], &stop).unwrap(), 0);
        assert!(b.lookup("seen").unwrap().is_none());
    }

    #[test]
    fn store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cobe.store");
        {
            let mut b = Brain::open(&path).unwrap();
            b.train("persist me please").unwrap();
        }
        let mut b = Brain::open(&path).unwrap();
        assert_eq!(b.reply("me").unwrap(), "persist me please");
    }
}

//! Self-learning Bayesian word-frequency filter.
//!
//! Counters live in memory and are persisted to a single JSON word file.
//! Mutations arm a debounced background writer so that bursts of training
//! collapse into one disk write; a crash can lose at most the final
//! debounce window.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep_until, Duration, Instant};

use crate::error::SiftError;
use crate::filters::{Filter, Verdict};
use crate::message::Message;
use crate::tokenize::tokenize_bounded;

const WORD_FILE: &str = "bayes-words.json";
const MAX_WORD_LENGTH: usize = 64;
const SPAM_THRESHOLD: f64 = 0.75;
const WRITE_DELAY: Duration = Duration::from_secs(1);

/// Per-token spam/ham counters. The JSON field names are part of the
/// word file format and must not change.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCounts {
    #[serde(rename = "spamCount", default)]
    pub spam_count: u64,
    #[serde(rename = "hamCount", default)]
    pub ham_count: u64,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct WordTable {
    words: HashMap<String, WordCounts>,
    total_spam: u64,
    total_ham: u64,
}

#[derive(Debug, Clone, Copy)]
enum WriterState {
    Idle,
    Armed { deadline: Instant },
    Writing { rearmed: bool },
}

#[derive(Debug)]
struct WordStore {
    path: PathBuf,
    table: Mutex<WordTable>,
    writer: Mutex<WriterState>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BayesSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
}

/// Bayesian spam filter with an on-disk word database.
///
/// Scoring is read-only; `classify` and `reset` mutate the database and
/// schedule a debounced write. The word file is owned exclusively by
/// this filter instance.
pub struct BayesFilter {
    store: Arc<WordStore>,
}

impl BayesFilter {
    /// Create a filter backed by `bayes-words.json` in the working
    /// directory, loading it if present.
    pub fn new() -> Self {
        Self::with_path(WORD_FILE)
    }

    /// Create a filter backed by the given word file.
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let table = load_table(&path);
        BayesFilter {
            store: Arc::new(WordStore {
                path,
                table: Mutex::new(table),
                writer: Mutex::new(WriterState::Idle),
            }),
        }
    }

    /// Estimated probability that `msg` is spam, in `[0, 1]`. A message
    /// with no known tokens scores exactly 0.5.
    pub fn score(&self, msg: &Message) -> f64 {
        let tokens = message_tokens(msg);
        let table = self.store.table.lock().unwrap();
        let spam_total = table.total_spam as f64;
        let ham_total = table.total_ham as f64;
        let bias = 1.0 / (spam_total + ham_total + 1.0);

        let mut sum = 0.0;
        for token in &tokens {
            if let Some(counts) = table.words.get(token.as_str()) {
                let p_spam = (counts.spam_count as f64 + bias) / spam_total;
                let p_ham = (counts.ham_count as f64 + bias) / ham_total;
                let p = p_spam / (p_spam + p_ham);
                sum += (1.0 - p).ln() - p.ln();
            }
        }
        1.0 / (1.0 + sum.exp())
    }

    /// Number of distinct tokens in the database.
    pub fn word_count(&self) -> usize {
        self.store.table.lock().unwrap().words.len()
    }

    /// `(total_spam, total_ham)` aggregate counters.
    pub fn totals(&self) -> (u64, u64) {
        let table = self.store.table.lock().unwrap();
        (table.total_spam, table.total_ham)
    }

    /// Write the word file now, regardless of the debounce timer.
    /// Intended for orderly shutdown; a timer already armed still fires.
    pub fn flush(&self) -> Result<(), SiftError> {
        self.store.write_snapshot()
    }

    #[cfg(test)]
    fn snapshot(&self) -> WordTable {
        self.store.table.lock().unwrap().clone()
    }
}

impl Default for BayesFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for BayesFilter {
    fn id(&self) -> &'static str {
        "bayes"
    }

    fn apply_settings(&mut self, settings: &Value) -> Result<(), SiftError> {
        if settings.is_null() {
            return Ok(());
        }
        let parsed: BayesSettings =
            serde_json::from_value(settings.clone()).map_err(|source| {
                SiftError::FilterSettings {
                    id: self.id().to_string(),
                    source,
                }
            })?;
        if let Some(path) = parsed.path {
            if path != self.store.path {
                *self = BayesFilter::with_path(path);
            }
        }
        Ok(())
    }

    fn settings(&self) -> Value {
        if self.store.path == Path::new(WORD_FILE) {
            serde_json::json!({})
        } else {
            serde_json::json!({ "path": self.store.path })
        }
    }

    fn immediate(&self, msg: &Message) -> Verdict {
        let score = self.score(msg);
        log::debug!("Bayes score {score:.4}");
        if score > SPAM_THRESHOLD {
            Verdict::Revoke
        } else {
            Verdict::Pass
        }
    }

    fn classify(&self, msg: &Message, is_spam: bool, undo: bool) {
        let tokens = message_tokens(msg);
        if tokens.is_empty() {
            return;
        }
        {
            let mut table = self.store.table.lock().unwrap();
            let mut applied: u64 = 0;
            let mut underflows: usize = 0;
            for token in tokens {
                let counts = table.words.entry(token).or_default();
                let counter = if is_spam {
                    &mut counts.spam_count
                } else {
                    &mut counts.ham_count
                };
                if !undo {
                    *counter += 1;
                    applied += 1;
                } else if *counter > 0 {
                    *counter -= 1;
                    applied += 1;
                } else {
                    underflows += 1;
                }
            }
            if underflows > 0 {
                log::warn!(
                    "Declassify underflow on {underflows} token(s); counters left at zero"
                );
            }
            let total = if is_spam {
                &mut table.total_spam
            } else {
                &mut table.total_ham
            };
            if undo {
                *total -= applied;
            } else {
                *total += applied;
            }
        }
        Arc::clone(&self.store).arm();
    }

    fn reset(&self) {
        {
            let mut table = self.store.table.lock().unwrap();
            table.words.clear();
            table.total_spam = 0;
            table.total_ham = 0;
        }
        Arc::clone(&self.store).arm();
    }
}

/// Unique tokens of the decoded subject and body, capped at
/// `MAX_WORD_LENGTH` code points each. Case is preserved.
fn message_tokens(msg: &Message) -> HashSet<String> {
    let subject = msg.decoded_subject();
    let body = msg.decoded_body();
    let mut tokens = HashSet::new();
    for text in [&subject, &body] {
        for token in tokenize_bounded(text, MAX_WORD_LENGTH) {
            if !tokens.contains(token) {
                tokens.insert(token.to_string());
            }
        }
    }
    tokens
}

fn load_table(path: &Path) -> WordTable {
    let mut table = WordTable::default();
    match fs::read(path) {
        Ok(bytes) => match serde_json::from_slice::<HashMap<String, WordCounts>>(&bytes) {
            Ok(words) => {
                table.total_spam = words.values().map(|c| c.spam_count).sum();
                table.total_ham = words.values().map(|c| c.ham_count).sum();
                log::debug!(
                    "Loaded {} words from {} (spam {}, ham {})",
                    words.len(),
                    path.display(),
                    table.total_spam,
                    table.total_ham
                );
                table.words = words;
            }
            Err(e) => {
                log::warn!("Word store {} is corrupt, starting empty: {e}", path.display());
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("No word store at {}, starting empty", path.display());
        }
        Err(e) => {
            log::warn!("Failed to read word store {}, starting empty: {e}", path.display());
        }
    }
    table
}

impl WordStore {
    /// Schedule a write. The timer restarts on every call, so a burst of
    /// mutations produces a single write one quiet second later. Arming
    /// while a write is running makes the writer go around again once it
    /// finishes.
    fn arm(self: Arc<Self>) {
        let mut state = self.writer.lock().unwrap();
        match *state {
            WriterState::Idle => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    *state = WriterState::Armed {
                        deadline: Instant::now() + WRITE_DELAY,
                    };
                    drop(state);
                    handle.spawn(self.run_writer());
                }
                Err(_) => {
                    log::debug!("No async runtime; word store write deferred to flush()");
                }
            },
            WriterState::Armed { .. } => {
                *state = WriterState::Armed {
                    deadline: Instant::now() + WRITE_DELAY,
                };
            }
            WriterState::Writing { .. } => {
                *state = WriterState::Writing { rearmed: true };
            }
        }
    }

    async fn run_writer(self: Arc<Self>) {
        loop {
            // Sleep until the deadline stops moving, then claim the write.
            loop {
                let pending = {
                    let mut state = self.writer.lock().unwrap();
                    match *state {
                        WriterState::Armed { deadline } => {
                            if Instant::now() >= deadline {
                                *state = WriterState::Writing { rearmed: false };
                                None
                            } else {
                                Some(deadline)
                            }
                        }
                        _ => return,
                    }
                };
                match pending {
                    Some(deadline) => sleep_until(deadline).await,
                    None => break,
                }
            }

            if let Err(e) = self.write_snapshot() {
                log::warn!("Word store write failed, keeping changes in memory: {e}");
            }

            let mut state = self.writer.lock().unwrap();
            if let WriterState::Writing { rearmed: true } = *state {
                *state = WriterState::Armed {
                    deadline: Instant::now() + WRITE_DELAY,
                };
            } else {
                *state = WriterState::Idle;
                return;
            }
        }
    }

    /// Durable update: serialize to a temp file, flush it, then replace
    /// the destination via rename.
    fn write_snapshot(&self) -> Result<(), SiftError> {
        let json = {
            let table = self.table.lock().unwrap();
            serde_json::to_vec_pretty(&table.words).map_err(std::io::Error::from)
        }
        .map_err(|source| SiftError::StoreWrite {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let result: std::io::Result<()> = (|| {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.flush()?;
            drop(file);
            if self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            fs::rename(&tmp, &self.path)
        })();
        result.map_err(|source| SiftError::StoreWrite {
            path: self.path.clone(),
            source,
        })
    }
}

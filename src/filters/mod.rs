pub mod bayes;
pub mod blacklist;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SiftError;
use crate::message::Message;

/// The decision a filter (or a whole chain) emits for a message.
///
/// When verdicts are combined, `Amnesty` dominates `Block`, which
/// dominates `Revoke`, which dominates `Pass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Abstain.
    Pass,
    /// Hide an already-accepted message.
    Revoke,
    /// Reject before acceptance.
    Block,
    /// Accept unconditionally, overriding every other filter.
    Amnesty,
}

impl Verdict {
    /// Combine verdicts in filter order. `Amnesty` short-circuits;
    /// `Block` and `Revoke` are recorded and evaluation continues, so
    /// the result is independent of filter order.
    pub fn combine<I: IntoIterator<Item = Verdict>>(verdicts: I) -> Verdict {
        let mut block_seen = false;
        let mut revoke_seen = false;
        for verdict in verdicts {
            match verdict {
                Verdict::Amnesty => return Verdict::Amnesty,
                Verdict::Block => block_seen = true,
                Verdict::Revoke => revoke_seen = true,
                Verdict::Pass => {}
            }
        }
        if block_seen {
            Verdict::Block
        } else if revoke_seen {
            Verdict::Revoke
        } else {
            Verdict::Pass
        }
    }

    /// Whether a message with this final verdict counts as spam for
    /// training purposes.
    pub fn is_spam(self) -> bool {
        matches!(self, Verdict::Block | Verdict::Revoke)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Verdict::Pass => "pass",
            Verdict::Revoke => "revoke",
            Verdict::Block => "block",
            Verdict::Amnesty => "amnesty",
        };
        f.write_str(s)
    }
}

/// A pluggable classifier in the filter chain.
///
/// `immediate` runs synchronously with message submission and must not
/// block; `scan` runs on a background task and may perform I/O. Filters
/// that do not learn keep the default `scan`, `classify` and `reset`.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Stable identifier, equal to the string used for registration.
    fn id(&self) -> &'static str;

    /// Parse the filter's `settings` blob from the chain configuration.
    fn apply_settings(&mut self, settings: &Value) -> Result<(), SiftError>;

    /// Serialize the current configuration.
    fn settings(&self) -> Value;

    /// Non-blocking classification.
    fn immediate(&self, msg: &Message) -> Verdict;

    /// Background classification; may block on I/O.
    async fn scan(&self, _msg: &Message) -> Verdict {
        Verdict::Pass
    }

    /// Update learned state with the ground-truth label of `msg`.
    /// `undo` reverses a previous call with the same label.
    fn classify(&self, _msg: &Message, _is_spam: bool, _undo: bool) {}

    /// Drop all learned state.
    fn reset(&self) {}
}

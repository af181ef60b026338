use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SiftError;
use crate::filters::{Filter, Verdict};
use crate::message::Message;
use crate::tokenize::tokenize;

#[derive(Debug, Default, Serialize, Deserialize)]
struct BlacklistSettings {
    #[serde(default)]
    ips: Vec<String>,
    #[serde(default)]
    words: Vec<String>,
}

/// Blocks messages delivered through a blacklisted peer or containing a
/// blacklisted word. IP entries are byte-prefix matches against each hop
/// of the delivery path ("124.51.45." matches the whole /24); word
/// entries match case-insensitively against subject and body tokens.
#[derive(Debug, Default)]
pub struct BlacklistFilter {
    ips: Vec<String>,
    words: HashSet<String>,
}

impl BlacklistFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for BlacklistFilter {
    fn id(&self) -> &'static str {
        "blacklist"
    }

    fn apply_settings(&mut self, settings: &Value) -> Result<(), SiftError> {
        if settings.is_null() {
            self.ips.clear();
            self.words.clear();
            return Ok(());
        }
        let parsed: BlacklistSettings =
            serde_json::from_value(settings.clone()).map_err(|source| {
                SiftError::FilterSettings {
                    id: self.id().to_string(),
                    source,
                }
            })?;
        self.ips = parsed.ips;
        self.words = parsed.words.iter().map(|w| w.to_lowercase()).collect();
        Ok(())
    }

    fn settings(&self) -> Value {
        let mut words: Vec<String> = self.words.iter().cloned().collect();
        words.sort();
        serde_json::to_value(BlacklistSettings {
            ips: self.ips.clone(),
            words,
        })
        .unwrap_or(Value::Null)
    }

    fn immediate(&self, msg: &Message) -> Verdict {
        for hop in &msg.peer_address {
            for prefix in &self.ips {
                if hop.starts_with(prefix.as_str()) {
                    log::debug!("Peer {hop} matches blacklisted prefix {prefix}");
                    return Verdict::Block;
                }
            }
        }

        if !self.words.is_empty() {
            for text in [msg.decoded_subject(), msg.decoded_body()] {
                for token in tokenize(&text) {
                    if self.words.contains(&token.to_lowercase()) {
                        log::debug!("Blacklisted word found: {token}");
                        return Verdict::Block;
                    }
                }
            }
        }

        Verdict::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn configured(settings: Value) -> BlacklistFilter {
        let mut filter = BlacklistFilter::new();
        filter.apply_settings(&settings).unwrap();
        filter
    }

    #[test]
    fn test_ip_prefix_blocks() {
        let filter = configured(json!({"ips": ["124.51.45."]}));
        let msg = Message {
            peer_address: vec!["124.51.45.7".to_string(), "proxy".to_string()],
            ..Default::default()
        };
        assert_eq!(filter.immediate(&msg), Verdict::Block);
    }

    #[test]
    fn test_ip_miss_passes() {
        let filter = configured(json!({"ips": ["124.51.45."]}));
        let msg = Message {
            peer_address: vec!["8.8.8.8".to_string()],
            body: b"good morning".to_vec(),
            ..Default::default()
        };
        assert_eq!(filter.immediate(&msg), Verdict::Pass);
    }

    #[test]
    fn test_word_in_subject_blocks() {
        let filter = configured(json!({"words": ["viagra"]}));
        let mut msg = Message::new();
        msg.set_header("Subject", "Cheap VIAGRA today");
        assert_eq!(filter.immediate(&msg), Verdict::Block);
    }

    #[test]
    fn test_word_in_encoded_subject_blocks() {
        let filter = configured(json!({"words": ["viagra"]}));
        let mut msg = Message::new();
        msg.set_header("Subject", "=?utf-8?Q?cheap_Viagra?=");
        assert_eq!(filter.immediate(&msg), Verdict::Block);
    }

    #[test]
    fn test_word_in_body_blocks() {
        let filter = configured(json!({"words": ["казино"]}));
        let msg = Message {
            body: "лучшее КАЗИНО города".as_bytes().to_vec(),
            ..Default::default()
        };
        assert_eq!(filter.immediate(&msg), Verdict::Block);
    }

    #[test]
    fn test_word_must_match_whole_token() {
        let filter = configured(json!({"words": ["via"]}));
        let mut msg = Message::new();
        msg.set_header("Subject", "flying via viaduct");
        assert_eq!(filter.immediate(&msg), Verdict::Block);

        let mut msg = Message::new();
        msg.set_header("Subject", "crossing the viaduct");
        assert_eq!(filter.immediate(&msg), Verdict::Pass);
    }

    #[test]
    fn test_empty_settings_pass_everything() {
        let filter = configured(json!({}));
        let mut msg = Message::new();
        msg.set_header("Subject", "anything at all");
        assert_eq!(filter.immediate(&msg), Verdict::Pass);
    }

    #[test]
    fn test_malformed_settings_rejected() {
        let mut filter = BlacklistFilter::new();
        let err = filter.apply_settings(&json!({"ips": "not-a-list"}));
        assert!(matches!(err, Err(SiftError::FilterSettings { .. })));
    }

    #[test]
    fn test_settings_round_trip() {
        let filter = configured(json!({"ips": ["10."], "words": ["B", "a"]}));
        assert_eq!(
            filter.settings(),
            json!({"ips": ["10."], "words": ["a", "b"]})
        );
    }
}

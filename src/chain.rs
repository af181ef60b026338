//! The ordered filter pipeline and its two-phase evaluation protocol.
//!
//! A message is first judged synchronously by every filter's `immediate`
//! verdict; the combined result goes to the caller right away. A
//! background task then runs the slower `scan` phase, notifies the
//! caller if the verdict changed, and feeds the final verdict back into
//! every learning filter as training ground truth.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::config::ChainConfig;
use crate::error::SiftError;
use crate::filters::{Filter, Verdict};
use crate::message::Message;
use crate::registry::{self, FilterRegistry};

#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain from a configuration value using the process-wide
    /// registry.
    pub fn from_value(config: &Value) -> Result<Self, SiftError> {
        registry::with_global(|reg| Self::from_config(reg, config))
    }

    /// Build a chain from a configuration value using an explicit
    /// registry.
    pub fn from_config(registry: &FilterRegistry, config: &Value) -> Result<Self, SiftError> {
        let mut chain = Self::new();
        chain.load_config(registry, config)?;
        Ok(chain)
    }

    /// Replace the chain's filters with the ones described by `config`.
    /// The new filter list is built completely before it is swapped in,
    /// so a configuration error leaves the chain unchanged.
    pub fn load_config(
        &mut self,
        registry: &FilterRegistry,
        config: &Value,
    ) -> Result<(), SiftError> {
        let entries = ChainConfig::from_value(config)?.into_entries();
        let mut filters = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut filter = registry.build(&entry.filter)?;
            filter.apply_settings(&entry.settings)?;
            filters.push(filter);
        }
        self.filters = filters;
        Ok(())
    }

    /// Serialize the chain as order-preserving array-form configuration.
    pub fn serialize_config(&self) -> Value {
        Value::Array(
            self.filters
                .iter()
                .map(|f| json!({ "filter": f.id(), "settings": f.settings() }))
                .collect(),
        )
    }

    /// Append a manually constructed filter.
    pub fn push(&mut self, filter: Box<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Combined non-blocking verdict for `msg`.
    pub fn immediate_verdict(&self, msg: &Message) -> Verdict {
        Verdict::combine(self.filters.iter().map(|f| f.immediate(msg)))
    }

    /// Two-phase evaluation. `on_immediate` is invoked synchronously
    /// with the combined immediate verdict before this method returns;
    /// `on_async` is invoked from the returned background task only when
    /// the scan phase settles on a different verdict. The final verdict
    /// is then used to train every learning filter. Must be called from
    /// within a Tokio runtime.
    pub fn evaluate<F, G>(self: Arc<Self>, msg: Message, on_immediate: F, on_async: G) -> JoinHandle<()>
    where
        F: FnOnce(Verdict),
        G: FnOnce(Verdict) + Send + 'static,
    {
        let immediate = self.immediate_verdict(&msg);
        on_immediate(immediate);

        let chain = self;
        tokio::spawn(async move {
            let mut settled = immediate;
            // Amnesty and Block are final; only Pass and Revoke can be
            // overridden by the scan phase.
            if !matches!(immediate, Verdict::Amnesty | Verdict::Block) {
                for filter in &chain.filters {
                    match filter.scan(&msg).await {
                        Verdict::Amnesty => {
                            settled = Verdict::Amnesty;
                            break;
                        }
                        Verdict::Block => {
                            settled = Verdict::Block;
                            break;
                        }
                        Verdict::Revoke => settled = Verdict::Revoke,
                        Verdict::Pass => {}
                    }
                }
            }

            if settled != immediate {
                if let Err(e) = catch_unwind(AssertUnwindSafe(|| on_async(settled))) {
                    log::error!("Async verdict callback panicked: {e:?}");
                }
            }

            for filter in &chain.filters {
                filter.classify(&msg, settled.is_spam(), false);
            }
        })
    }

    /// Train every learning filter with an operator-supplied label.
    pub fn classify(&self, msg: &Message, is_spam: bool) {
        for filter in &self.filters {
            filter.classify(msg, is_spam, false);
        }
    }

    /// Reverse a previous `classify` with the same label.
    pub fn declassify(&self, msg: &Message, is_spam: bool) {
        for filter in &self.filters {
            filter.classify(msg, is_spam, true);
        }
    }

    /// Clear the learned state of every filter.
    pub fn reset_classification(&self) {
        for filter in &self.filters {
            filter.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Immediate,
        Scan,
        Classify { is_spam: bool },
        Reset,
    }

    struct ScriptedFilter {
        immediate: Verdict,
        scan: Verdict,
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl ScriptedFilter {
        fn boxed(immediate: Verdict, scan: Verdict, events: &Arc<Mutex<Vec<Event>>>) -> Box<Self> {
            Box::new(ScriptedFilter {
                immediate,
                scan,
                events: Arc::clone(events),
            })
        }
    }

    #[async_trait]
    impl Filter for ScriptedFilter {
        fn id(&self) -> &'static str {
            "scripted"
        }

        fn apply_settings(&mut self, _settings: &Value) -> Result<(), SiftError> {
            Ok(())
        }

        fn settings(&self) -> Value {
            json!({})
        }

        fn immediate(&self, _msg: &Message) -> Verdict {
            self.events.lock().unwrap().push(Event::Immediate);
            self.immediate
        }

        async fn scan(&self, _msg: &Message) -> Verdict {
            self.events.lock().unwrap().push(Event::Scan);
            self.scan
        }

        fn classify(&self, _msg: &Message, is_spam: bool, _undo: bool) {
            self.events.lock().unwrap().push(Event::Classify { is_spam });
        }

        fn reset(&self) {
            self.events.lock().unwrap().push(Event::Reset);
        }
    }

    fn scripted_chain(verdicts: &[(Verdict, Verdict)]) -> (Arc<FilterChain>, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut chain = FilterChain::new();
        for (immediate, scan) in verdicts {
            chain.push(ScriptedFilter::boxed(*immediate, *scan, &events));
        }
        (Arc::new(chain), events)
    }

    #[test]
    fn test_amnesty_dominates_block_and_revoke() {
        use Verdict::*;
        let (chain, _) = scripted_chain(&[(Revoke, Pass), (Amnesty, Pass), (Block, Pass)]);
        assert_eq!(chain.immediate_verdict(&Message::new()), Amnesty);
    }

    #[tokio::test]
    async fn test_immediate_callback_fires_before_async_phase() {
        use Verdict::*;
        let (chain, _) = scripted_chain(&[(Pass, Revoke)]);
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        let o2 = Arc::clone(&order);
        let handle = chain.evaluate(
            Message::new(),
            move |v| o1.lock().unwrap().push(format!("immediate:{v}")),
            move |v| o2.lock().unwrap().push(format!("async:{v}")),
        );
        handle.await.unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec!["immediate:pass".to_string(), "async:revoke".to_string()]
        );
    }

    #[tokio::test]
    async fn test_async_callback_skipped_when_verdict_unchanged() {
        use Verdict::*;
        let (chain, _) = scripted_chain(&[(Pass, Pass)]);
        let async_called = Arc::new(Mutex::new(false));

        let flag = Arc::clone(&async_called);
        let handle = chain.evaluate(Message::new(), |_| {}, move |_| {
            *flag.lock().unwrap() = true;
        });
        handle.await.unwrap();

        assert!(!*async_called.lock().unwrap());
    }

    #[tokio::test]
    async fn test_block_is_final_and_skips_scan() {
        use Verdict::*;
        let (chain, events) = scripted_chain(&[(Block, Amnesty)]);
        let async_called = Arc::new(Mutex::new(false));

        let flag = Arc::clone(&async_called);
        let handle = chain.evaluate(Message::new(), |v| assert_eq!(v, Block), move |_| {
            *flag.lock().unwrap() = true;
        });
        handle.await.unwrap();

        assert!(!*async_called.lock().unwrap());
        let events = events.lock().unwrap();
        assert!(!events.contains(&Event::Scan));
        // A blocked message still trains as spam.
        assert!(events.contains(&Event::Classify { is_spam: true }));
    }

    #[tokio::test]
    async fn test_training_uses_settled_verdict() {
        use Verdict::*;
        let (chain, events) = scripted_chain(&[(Pass, Revoke), (Pass, Pass)]);
        chain.evaluate(Message::new(), |_| {}, |_| {}).await.unwrap();

        let events = events.lock().unwrap();
        let trained: Vec<&Event> = events
            .iter()
            .filter(|e| matches!(e, Event::Classify { .. }))
            .collect();
        assert_eq!(trained, vec![&Event::Classify { is_spam: true }; 2]);
    }

    #[tokio::test]
    async fn test_amnesty_trains_as_ham() {
        use Verdict::*;
        let (chain, events) = scripted_chain(&[(Amnesty, Pass)]);
        chain.evaluate(Message::new(), |_| {}, |_| {}).await.unwrap();

        let events = events.lock().unwrap();
        assert!(events.contains(&Event::Classify { is_spam: false }));
    }

    #[tokio::test]
    async fn test_scan_short_circuits_on_block() {
        use Verdict::*;
        let (chain, events) = scripted_chain(&[(Pass, Block), (Pass, Amnesty)]);
        let delivered = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&delivered);
        let handle = chain.evaluate(Message::new(), |_| {}, move |v| {
            *slot.lock().unwrap() = Some(v);
        });
        handle.await.unwrap();

        assert_eq!(*delivered.lock().unwrap(), Some(Block));
        // Second filter's scan never ran.
        let scans = events.lock().unwrap().iter().filter(|e| **e == Event::Scan).count();
        assert_eq!(scans, 1);
    }

    #[tokio::test]
    async fn test_declassify_and_reset_fan_out() {
        use Verdict::*;
        let (chain, events) = scripted_chain(&[(Pass, Pass), (Pass, Pass)]);
        chain.declassify(&Message::new(), true);
        chain.reset_classification();

        let events = events.lock().unwrap();
        assert_eq!(events.iter().filter(|e| **e == Event::Reset).count(), 2);
        assert_eq!(
            events.iter().filter(|e| matches!(e, Event::Classify { .. })).count(),
            2
        );
    }

    #[test]
    fn test_load_config_array_form_preserves_order() {
        let registry = FilterRegistry::with_builtins();
        let chain = FilterChain::from_config(
            &registry,
            &json!([
                { "filter": "bayes" },
                { "filter": "blacklist", "settings": { "ips": ["10."] } }
            ]),
        )
        .unwrap();
        assert_eq!(chain.ids(), vec!["bayes", "blacklist"]);
    }

    #[test]
    fn test_load_config_object_form_is_lexicographic() {
        let registry = FilterRegistry::with_builtins();
        let chain = FilterChain::from_config(
            &registry,
            &json!({
                "blacklist": { "words": ["spam"] },
                "bayes": null
            }),
        )
        .unwrap();
        assert_eq!(chain.ids(), vec!["bayes", "blacklist"]);
    }

    #[test]
    fn test_load_config_unknown_filter_is_an_error() {
        let registry = FilterRegistry::with_builtins();
        let result = FilterChain::from_config(&registry, &json!([{ "filter": "nope" }]));
        assert!(matches!(result, Err(SiftError::UnknownFilter(id)) if id == "nope"));
    }

    #[test]
    fn test_failed_load_leaves_chain_unchanged() {
        let registry = FilterRegistry::with_builtins();
        let mut chain = FilterChain::new();
        chain
            .load_config(&registry, &json!([{ "filter": "blacklist" }]))
            .unwrap();

        let err = chain.load_config(
            &registry,
            &json!([
                { "filter": "bayes" },
                { "filter": "blacklist", "settings": { "ips": "bad" } }
            ]),
        );
        assert!(err.is_err());
        assert_eq!(chain.ids(), vec!["blacklist"]);
    }

    #[test]
    fn test_serialize_config_is_array_form() {
        let registry = FilterRegistry::with_builtins();
        let chain = FilterChain::from_config(
            &registry,
            &json!([{ "filter": "blacklist", "settings": { "ips": ["10."], "words": [] } }]),
        )
        .unwrap();
        assert_eq!(
            chain.serialize_config(),
            json!([{ "filter": "blacklist", "settings": { "ips": ["10."], "words": [] } }])
        );
    }

    #[tokio::test]
    async fn test_blacklisted_peer_blocks_end_to_end() {
        let registry = FilterRegistry::with_builtins();
        let chain = Arc::new(
            FilterChain::from_config(
                &registry,
                &json!([{ "filter": "blacklist", "settings": { "ips": ["124.51.45."] } }]),
            )
            .unwrap(),
        );

        let msg = Message {
            peer_address: vec!["124.51.45.7".to_string(), "proxy".to_string()],
            ..Default::default()
        };
        let async_called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&async_called);
        let handle = chain.evaluate(msg, |v| assert_eq!(v, Verdict::Block), move |_| {
            *flag.lock().unwrap() = true;
        });
        handle.await.unwrap();
        assert!(!*async_called.lock().unwrap());
    }
}

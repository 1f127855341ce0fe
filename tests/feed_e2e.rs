use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use livetable::feed::LifecycleState;
use livetable::{
    ChangeNotification, ChangeSource, ChannelSink, CollectionProvider, DocumentId, FeedConfig,
    FeedError, FeedEvent, FeedResult, FeedStream, FieldDescriptor, FilterSelectorBuilder,
    FilterSettings, LiveQuery, MemoryCollection, NotificationSender, Provider, Publication,
    PublicationId, QueryOptions, RawDocument, Selector, SortSpec, SubscribeRequest, Subscription,
    ValidationError,
};

fn describe(event: &FeedEvent) -> String {
    match event {
        FeedEvent::Added { id, row, .. } => format!("added:{id}@{}", row.rank()),
        FeedEvent::Changed { id, row, .. } => format!("changed:{id}@{}", row.rank()),
        FeedEvent::Removed { id, .. } => format!("removed:{id}"),
        FeedEvent::Count { count, .. } => format!("count:{count}"),
        FeedEvent::Ready { .. } => "ready".to_string(),
    }
}

fn drained(stream: &FeedStream) -> Vec<String> {
    stream.drain().iter().map(describe).collect()
}

fn open(coll: &MemoryCollection, options: &QueryOptions, config: &FeedConfig) -> (Subscription, FeedStream) {
    let (sink, stream) = ChannelSink::new(1024);
    let sub = Subscription::open(
        PublicationId::new("t1"),
        coll,
        &Selector::new(),
        options,
        Arc::new(sink),
        config,
    )
    .unwrap();
    (sub, stream)
}

fn scored_abc() -> MemoryCollection {
    let coll = MemoryCollection::new("scores");
    coll.insert(json!({"_id": "a", "score": 1, "name": "A"})).unwrap();
    coll.insert(json!({"_id": "b", "score": 2, "name": "B"})).unwrap();
    coll.insert(json!({"_id": "c", "score": 3, "name": "C"})).unwrap();
    coll
}

fn by_score(limit: usize) -> QueryOptions {
    QueryOptions::new().sort_by(SortSpec::asc("score")).with_limit(limit)
}

#[test]
fn initial_materialization_then_delete_shifts_window() {
    let coll = scored_abc();
    let (mut sub, stream) = open(&coll, &by_score(2), &FeedConfig::default());

    assert_eq!(sub.state(), LifecycleState::Active);
    assert_eq!(drained(&stream), ["count:2", "added:a@0", "added:b@1", "ready"]);

    coll.remove(&DocumentId::new("a")).unwrap();
    assert_eq!(sub.process_pending().unwrap(), 2);
    assert_eq!(
        drained(&stream),
        ["count:2", "removed:a", "changed:b@0", "added:c@1", "count:2"]
    );
    assert!(sub.snapshot().ranks_contiguous());
    assert_eq!(sub.snapshot().len(), 2);
}

#[test]
fn field_update_emits_single_changed_without_count() {
    let coll = scored_abc();
    let (mut sub, stream) = open(&coll, &by_score(2), &FeedConfig::default());
    stream.drain();

    coll.update(json!({"_id": "b", "score": 2, "name": "Bee"})).unwrap();
    sub.process_pending().unwrap();

    let events = stream.drain();
    assert_eq!(events.len(), 1);
    let FeedEvent::Changed { id, row, .. } = &events[0] else {
        panic!("expected changed, got {:?}", events[0]);
    };
    assert_eq!(id.as_str(), "b");
    assert_eq!(row.get("name"), Some(&json!("Bee")));
    assert_eq!(row.rank(), 1);
}

#[test]
fn reordering_update_changes_both_ranks() {
    let coll = scored_abc();
    let (mut sub, stream) = open(&coll, &by_score(2), &FeedConfig::default());
    stream.drain();

    coll.update(json!({"_id": "b", "score": 0, "name": "B"})).unwrap();
    sub.process_pending().unwrap();
    assert_eq!(drained(&stream), ["changed:b@0", "changed:a@1"]);
}

#[test]
fn injected_attributes_win_over_document_fields() {
    let coll = MemoryCollection::new("c");
    coll.insert(json!({"_id": "x", "feed-rank": 99, "feed-id": "spoofed"}))
        .unwrap();
    let (sub, stream) = open(&coll, &QueryOptions::new(), &FeedConfig::default());

    let events = stream.drain();
    let FeedEvent::Added { row, .. } = &events[1] else {
        panic!("expected added, got {:?}", events[1]);
    };
    assert_eq!(row.get("feed-rank"), Some(&json!(0)));
    assert_eq!(row.get("feed-id"), Some(&json!("t1")));
    assert_eq!(sub.snapshot().len(), 1);
}

#[test]
fn custom_attribute_names_from_config() {
    let coll = MemoryCollection::new("c");
    coll.insert(json!({"_id": "x"})).unwrap();
    let config = FeedConfig::from_json_str(r#"{"subscription_field": "sub", "rank_field": "pos"}"#)
        .unwrap();
    let (_sub, stream) = open(&coll, &QueryOptions::new(), &config);

    let events = stream.drain();
    let FeedEvent::Added { row, .. } = &events[1] else {
        panic!("expected added");
    };
    assert_eq!(row.get("pos"), Some(&json!(0)));
    assert_eq!(row.get("sub"), Some(&json!("t1")));
    assert_eq!(row.get("feed-rank"), None);
}

#[test]
fn notifications_queued_during_initialization_are_discarded() {
    let coll = scored_abc();
    let (mut sub, stream) = open(&coll, &QueryOptions::new(), &FeedConfig::default());

    assert_eq!(
        drained(&stream),
        ["count:3", "added:a@0", "added:b@1", "added:c@2", "ready"]
    );
    assert_eq!(sub.process_pending().unwrap(), 0);
    assert!(stream.drain().is_empty());
    assert_eq!(sub.stats().discarded, 3);
    assert_eq!(sub.stats().processed, 0);
}

#[test]
fn stop_is_idempotent_and_silences_the_feed() {
    let coll = scored_abc();
    let (mut sub, stream) = open(&coll, &QueryOptions::new(), &FeedConfig::default());
    stream.drain();

    sub.stop();
    sub.stop();
    assert_eq!(sub.state(), LifecycleState::Stopped);
    assert_eq!(coll.live_query_count().unwrap(), 0);
    assert!(sub.snapshot().is_empty());

    coll.insert(json!({"_id": "d", "score": 4})).unwrap();
    assert_eq!(sub.process_pending().unwrap(), 0);

    sub.handle(ChangeNotification::Added(DocumentId::new("d"))).unwrap();
    assert!(stream.drain().is_empty());
    assert_eq!(sub.stats().discarded, 4);
}

#[test]
fn dropping_a_subscription_releases_its_query() {
    let coll = scored_abc();
    {
        let (_sub, _stream) = open(&coll, &QueryOptions::new(), &FeedConfig::default());
        assert_eq!(coll.live_query_count().unwrap(), 1);
    }
    assert_eq!(coll.live_query_count().unwrap(), 0);
}

#[test]
fn zero_limit_is_unbounded_and_skip_applies() {
    let coll = scored_abc();
    let options = QueryOptions::new()
        .sort_by(SortSpec::desc("score"))
        .with_skip(1)
        .with_limit(0);
    let (_sub, stream) = open(&coll, &options, &FeedConfig::default());
    assert_eq!(drained(&stream), ["count:2", "added:b@0", "added:a@1", "ready"]);
}

#[test]
fn overflow_triggers_resync() {
    let coll = MemoryCollection::new("c");
    let config = FeedConfig {
        notification_queue_capacity: 1,
        ..FeedConfig::default()
    };
    let (mut sub, stream) = open(&coll, &by_score(0), &config);
    assert_eq!(drained(&stream), ["count:0", "ready"]);

    coll.insert(json!({"_id": "a", "score": 1})).unwrap();
    coll.insert(json!({"_id": "b", "score": 2})).unwrap();
    coll.insert(json!({"_id": "c", "score": 3})).unwrap();

    assert_eq!(sub.process_pending().unwrap(), 1);
    assert_eq!(
        drained(&stream),
        ["count:3", "added:a@0", "added:b@1", "added:c@2", "count:3"]
    );
    let stats = sub.stats();
    assert_eq!(stats.resyncs, 1);
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.processed, 1);

    coll.remove(&DocumentId::new("b")).unwrap();
    coll.remove(&DocumentId::new("a")).unwrap();
    sub.process_pending().unwrap();
    assert_eq!(
        drained(&stream),
        ["count:1", "removed:a", "removed:b", "changed:c@0", "count:1"]
    );
    assert_eq!(sub.stats().resyncs, 2);
    assert!(sub.snapshot().ranks_contiguous());
}

struct FixedSource {
    docs: Vec<Value>,
    stops: Arc<AtomicUsize>,
}

struct FixedQuery {
    docs: Vec<Value>,
    stops: Arc<AtomicUsize>,
}

impl LiveQuery for FixedQuery {
    fn count(&self) -> FeedResult<usize> {
        Ok(self.docs.len())
    }

    fn fetch_all(&self) -> FeedResult<Vec<RawDocument>> {
        Ok(self.docs.iter().cloned().map(RawDocument::new).collect())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl ChangeSource for FixedSource {
    fn name(&self) -> &str {
        "fixed"
    }

    fn open(
        &self,
        _selector: &Selector,
        _options: &QueryOptions,
        _notifications: NotificationSender,
    ) -> FeedResult<Box<dyn LiveQuery>> {
        Ok(Box::new(FixedQuery {
            docs: self.docs.clone(),
            stops: Arc::clone(&self.stops),
        }))
    }
}

#[test]
fn rows_failing_projection_are_skipped_without_consuming_a_rank() {
    let stops = Arc::new(AtomicUsize::new(0));
    let source = FixedSource {
        docs: vec![json!({"_id": "a"}), json!(42), json!({"name": "no id"}), json!({"_id": "d"})],
        stops: Arc::clone(&stops),
    };
    let (sink, stream) = ChannelSink::new(64);
    let mut sub = Subscription::open(
        PublicationId::new("t1"),
        &source,
        &Selector::new(),
        &QueryOptions::new(),
        Arc::new(sink),
        &FeedConfig::default(),
    )
    .unwrap();

    assert_eq!(drained(&stream), ["count:4", "added:a@0", "added:d@1", "ready"]);
    assert!(sub.snapshot().ranks_contiguous());

    sub.stop();
    sub.stop();
    drop(sub);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

struct FailingSource;

impl ChangeSource for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    fn open(
        &self,
        _selector: &Selector,
        _options: &QueryOptions,
        _notifications: NotificationSender,
    ) -> FeedResult<Box<dyn LiveQuery>> {
        Err(FeedError::source("backend unavailable"))
    }
}

#[test]
fn source_open_failure_propagates() {
    let publication = Publication::new(
        "broken",
        CollectionProvider::collection(FailingSource),
        Provider::Value(Selector::new()),
    )
    .unwrap();
    let (sink, stream) = ChannelSink::new(8);
    let err = publication
        .subscribe(&SubscribeRequest::new("t1"), Arc::new(sink))
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(stream.drain().is_empty());
}

#[test]
fn missing_collection_serves_an_empty_feed() {
    let publication =
        Publication::new("nothing", Provider::Value(None), Provider::Value(Selector::new())).unwrap();
    let (sink, stream) = ChannelSink::new(8);
    let handle = publication
        .subscribe(&SubscribeRequest::new("t1"), Arc::new(sink))
        .unwrap();

    assert_eq!(drained(&stream), ["count:0", "ready"]);
    handle.stop();
    handle.stop();
    assert!(handle.is_stopped());
}

#[test]
fn blank_publication_id_rejected() {
    let publication = Publication::new(
        "people",
        CollectionProvider::collection(MemoryCollection::new("people")),
        Provider::Value(Selector::new()),
    )
    .unwrap();
    let (sink, _stream) = ChannelSink::new(8);
    let err = publication
        .subscribe(&SubscribeRequest::new("  "), Arc::new(sink))
        .unwrap_err();
    assert!(err.is_validation());
}

struct RejectingBuilder;

impl FilterSelectorBuilder for RejectingBuilder {
    fn build(
        &self,
        filter: &str,
        _fields: &[FieldDescriptor],
        _settings: Option<&FilterSettings>,
    ) -> FeedResult<Selector> {
        Err(ValidationError::InvalidSelector {
            reason: format!("cannot search for '{filter}'"),
        }
        .into())
    }
}

#[test]
fn filter_builder_errors_propagate_unchanged() {
    let coll = MemoryCollection::new("people");
    let publication = Publication::new(
        "people",
        CollectionProvider::collection(coll.clone()),
        Provider::Value(Selector::new()),
    )
    .unwrap()
    .with_builder(Arc::new(RejectingBuilder));
    let (sink, _stream) = ChannelSink::new(8);
    let err = publication
        .subscribe(&SubscribeRequest::new("t1").with_filter("x"), Arc::new(sink))
        .unwrap_err();

    assert!(matches!(
        err,
        FeedError::Validation(ValidationError::InvalidSelector { ref reason }) if reason.contains("'x'")
    ));
    assert_eq!(coll.live_query_count().unwrap(), 0);
}

fn people() -> MemoryCollection {
    let coll = MemoryCollection::new("people");
    coll.insert(json!({"_id": "1", "name": "Ann", "team": "red"})).unwrap();
    coll.insert(json!({"_id": "2", "name": "Bob", "team": "red"})).unwrap();
    coll.insert(json!({"_id": "3", "name": "Joanne", "team": "blue"}))
        .unwrap();
    coll
}

#[test]
fn published_feed_follows_filter_on_worker_thread() {
    let coll = people();
    let publication = Publication::new(
        "people",
        CollectionProvider::collection(coll.clone()),
        Provider::Value(Selector::new()),
    )
    .unwrap();
    let request = SubscribeRequest::new("t1")
        .with_filter("ann")
        .with_fields(vec![FieldDescriptor::new("name")])
        .with_options(QueryOptions::new().sort_by(SortSpec::asc("name")));

    let (sink, stream) = ChannelSink::new(64);
    let handle = publication.subscribe(&request, Arc::new(sink)).unwrap();
    assert_eq!(drained(&stream), ["count:2", "added:1@0", "added:3@1", "ready"]);

    coll.insert(json!({"_id": "4", "name": "Anna", "team": "blue"}))
        .unwrap();
    let mut seen = Vec::new();
    for _ in 0..3 {
        let env = stream.recv_timeout(Duration::from_secs(2)).unwrap();
        seen.push(describe(&env.event));
    }
    assert_eq!(seen, ["count:3", "added:4@1", "changed:3@2"]);

    coll.insert(json!({"_id": "5", "name": "Zed"})).unwrap();
    handle.stop();
    assert_eq!(coll.live_query_count().unwrap(), 0);
    assert_eq!(handle.stats().processed, 1);
    assert!(stream.drain().is_empty());
}

#[test]
fn base_selector_restricts_published_rows() {
    let coll = people();
    let publication = Publication::new(
        "reds",
        CollectionProvider::collection(coll.clone()),
        Provider::Value(Selector::new().with("team", json!("red"))),
    )
    .unwrap();
    let request = SubscribeRequest::new("t1")
        .with_filter("o")
        .with_fields(vec![FieldDescriptor::new("name")]);

    let (sink, stream) = ChannelSink::new(64);
    let handle = publication.subscribe(&request, Arc::new(sink)).unwrap();
    assert_eq!(drained(&stream), ["count:1", "added:2@0", "ready"]);

    drop(handle);
    assert_eq!(coll.live_query_count().unwrap(), 0);
}

#[test]
fn numeric_and_text_ids_publish_as_separate_rows() {
    let coll = MemoryCollection::new("mixed");
    coll.insert(json!({"_id": 1, "score": 1})).unwrap();
    coll.insert(json!({"_id": "1", "score": 2})).unwrap();
    let (mut sub, stream) = open(&coll, &by_score(0), &FeedConfig::default());

    assert_eq!(drained(&stream), ["count:2", "added:#1@0", "added:1@1", "ready"]);

    coll.remove(&DocumentId::new("1")).unwrap();
    sub.process_pending().unwrap();
    assert_eq!(drained(&stream), ["count:1", "removed:1"]);
    assert_eq!(sub.snapshot().len(), 1);
    assert!(sub.snapshot().all().all(|row| row.id().is_numeric()));
}

#[test]
fn seeding_past_stream_capacity_does_not_block() {
    let coll = scored_abc();
    let (sink, stream) = ChannelSink::new(2);
    let mut sub = Subscription::open(
        PublicationId::new("t1"),
        &coll,
        &Selector::new(),
        &QueryOptions::new(),
        Arc::new(sink),
        &FeedConfig::default(),
    )
    .unwrap();

    assert_eq!(sub.snapshot().len(), 3);
    assert_eq!(stream.dropped(), 3);
    assert_eq!(drained(&stream), ["count:3", "added:a@0"]);

    sub.stop();
    assert_eq!(coll.live_query_count().unwrap(), 0);
}

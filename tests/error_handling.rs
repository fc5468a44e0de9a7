//! Error handling and edge case tests.

use statefold::{
    Action, ActionReducer, Feature, FnReducer, PreInitPolicy, ReduceError, Reducer, Store,
    StoreConfig, StoreError, StoreStatus,
};
use std::sync::Arc;

struct Increment;
struct Explode;

fn counter(name: &str) -> Arc<Feature<i64>> {
    let feature = Arc::new(Feature::new(name, 0i64));
    feature.add_reducer(ActionReducer::new(|n: &i64, _: &Increment| n + 1));
    feature
}

fn exploding_reducer() -> FnReducer<
    impl Fn(&Action) -> bool + Send + Sync,
    impl Fn(&Arc<i64>, &Action) -> Result<Arc<i64>, ReduceError> + Send + Sync,
> {
    FnReducer::new(
        |a: &Action| a.is::<Explode>(),
        |_: &Arc<i64>, _: &Action| -> Result<Arc<i64>, ReduceError> {
            Err(ReduceError::new("exploded"))
        },
    )
}

// --- Invalid Arguments ---

#[test]
fn test_dispatch_absent_action() {
    let store = Store::new();
    store.register_feature(counter("counter")).unwrap();
    store.initialize().unwrap();

    let result = store.dispatch_opt(None);
    assert!(matches!(result, Err(StoreError::InvalidArgument("action"))));

    store.dispatch_opt(Some(Action::new(Increment))).unwrap();
    assert_eq!(*store.feature::<i64>("counter").unwrap().state(), 1);
}

#[test]
fn test_add_absent_reducer() {
    let feature = counter("counter");
    let result = feature.add_reducer_opt(None);
    assert!(matches!(result, Err(StoreError::InvalidArgument("reducer"))));
    assert_eq!(feature.reducer_count(), 1);

    let reducer: Arc<dyn Reducer<i64>> = Arc::new(exploding_reducer());
    feature.add_reducer_opt(Some(reducer)).unwrap();
    assert_eq!(feature.reducer_count(), 2);
}

// --- Registration Errors ---

#[test]
fn test_register_duplicate_feature() {
    let store = Store::new();
    let original = counter("counter");
    store.register_feature(original.clone()).unwrap();

    let result = store.register_feature(counter("counter"));
    assert!(matches!(result, Err(StoreError::DuplicateFeature(ref name)) if name == "counter"));

    assert_eq!(store.feature_count(), 1);
    let registered = store.feature::<i64>("counter").unwrap();
    assert!(Arc::ptr_eq(&registered, &original));
}

#[test]
fn test_get_unregistered_feature() {
    let store = Store::new();
    let result = store.get_feature("nonexistent");
    assert!(matches!(result, Err(StoreError::FeatureNotFound(_))));
}

#[test]
fn test_initialize_twice() {
    let store = Store::new();
    store.initialize().unwrap();
    assert!(matches!(
        store.initialize(),
        Err(StoreError::AlreadyInitialized)
    ));
    assert_eq!(store.status(), StoreStatus::Ready);
}

// --- Reducer Failures ---

#[test]
fn test_reducer_failure_reported_to_caller() {
    let store = Store::new();
    let feature = counter("counter");
    feature.add_reducer(exploding_reducer());
    store.register_feature(feature.clone()).unwrap();
    store.initialize().unwrap();

    let err = store.dispatch(Explode).unwrap_err();
    match err {
        StoreError::Dispatch(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].feature, "counter");
            assert_eq!(failures[0].reducer_index, 1);
            assert_eq!(failures[0].source, ReduceError::new("exploded"));
        }
        other => panic!("Expected Dispatch error, got {:?}", other),
    }
    assert_eq!(*feature.state(), 0);
    assert_eq!(feature.version().0, 0);
}

#[test]
fn test_failing_feature_does_not_block_others() {
    let store = Store::new();
    let failing = Arc::new(Feature::new("failing", 0i64));
    failing.add_reducer(FnReducer::new(
        |a: &Action| a.is::<Increment>(),
        |_: &Arc<i64>, _: &Action| -> Result<Arc<i64>, ReduceError> { Err("no".into()) },
    ));
    let healthy = counter("healthy");
    // Registered first so the healthy feature comes after the failure
    store.register_feature(failing.clone()).unwrap();
    store.register_feature(healthy.clone()).unwrap();
    store.initialize().unwrap();

    let result = store.dispatch(Increment);
    assert!(matches!(result, Err(StoreError::Dispatch(ref f)) if f.len() == 1));
    assert_eq!(*healthy.state(), 1);
    assert_eq!(*failing.state(), 0);
}

#[test]
fn test_partial_fold_commits_last_successful_state() {
    let feature = Arc::new(Feature::new("chain", 1i64));
    feature.add_reducer(ActionReducer::new(|n: &i64, _: &Explode| n * 10));
    feature.add_reducer(exploding_reducer());
    feature.add_reducer(ActionReducer::new(|n: &i64, _: &Explode| n + 1000));

    let err = feature.receive_dispatch(&Action::new(Explode)).unwrap_err();
    assert!(matches!(err, StoreError::Reducer { reducer_index: 1, .. }));
    assert_eq!(*feature.state(), 10);
}

#[test]
fn test_replay_failures_reported_from_initialize() {
    let store = Store::new();
    let feature = counter("counter");
    feature.add_reducer(exploding_reducer());
    store.register_feature(feature.clone()).unwrap();

    store.dispatch(Increment).unwrap();
    store.dispatch(Explode).unwrap();
    store.dispatch(Increment).unwrap();

    let result = store.initialize();
    assert!(matches!(result, Err(StoreError::Dispatch(ref f)) if f.len() == 1));
    assert_eq!(store.status(), StoreStatus::Ready);
    assert_eq!(*feature.state(), 2);
}

// --- Pre-initialization Policy ---

#[test]
fn test_reject_before_initialize() {
    let store = Store::with_config(StoreConfig {
        pre_init_policy: PreInitPolicy::Reject,
        ..Default::default()
    });
    let feature = counter("counter");
    store.register_feature(feature.clone()).unwrap();

    assert!(matches!(
        store.dispatch(Increment),
        Err(StoreError::NotInitialized)
    ));
    assert_eq!(store.queued_count(), 0);

    store.initialize().unwrap();
    assert_eq!(*feature.state(), 0);
}

// --- Type Errors ---

#[test]
fn test_restore_snapshot_into_mismatched_feature() {
    let first = Store::new();
    first.register_feature(counter("shared")).unwrap();
    let snapshot = first.snapshot();

    let second = Store::new();
    second
        .register_feature(Arc::new(Feature::new("shared", String::new())))
        .unwrap();

    let result = second.restore(&snapshot);
    assert!(matches!(result, Err(StoreError::StateTypeMismatch { .. })));
}

#[test]
fn test_restore_snapshot_missing_feature() {
    let first = Store::new();
    first.register_feature(counter("only-here")).unwrap();
    let snapshot = first.snapshot();

    let result = Store::new().restore(&snapshot);
    assert!(matches!(result, Err(StoreError::FeatureNotFound(_))));
}

#[test]
fn test_error_display() {
    let err = StoreError::DuplicateFeature("counter".into());
    assert_eq!(err.to_string(), "Feature already registered: counter");

    let err = StoreError::Reducer {
        feature: "counter".into(),
        reducer_index: 2,
        source: ReduceError::new("bad"),
    };
    assert_eq!(err.to_string(), "Reducer #2 of counter failed: bad");
}

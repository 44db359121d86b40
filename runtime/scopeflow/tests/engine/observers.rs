use std::sync::{Arc, Mutex};

use scopeflow::{Blueprint, Error, Exit, FailureKind, Inputs};

use crate::fixtures::{CallTracker, OwnerError, intercepting};

type Seen = Arc<Mutex<Vec<(String, String, FailureKind)>>>;

fn recorder(
    seen: &Seen,
    label: &'static str,
) -> impl Fn(&str, &scopeflow::Failure) + Send + Sync + 'static {
    let seen = seen.clone();
    move |endpoint: &str, failure: &scopeflow::Failure| {
        seen.lock()
            .unwrap()
            .push((label.to_string(), endpoint.to_string(), failure.kind()));
    }
}

#[tokio::test]
async fn observers_see_failures_once_unwinding_is_over() {
    let seen = Seen::default();
    let tracker = CallTracker::default();
    let guard = intercepting("guard", &tracker, |_| Exit::Propagate);

    let mut nested = Blueprint::new();
    nested.error_observer(recorder(&seen, "nested"));
    nested
        .endpoint("inner", |_| async { Err::<(), _>(OwnerError("Rick".into())) })
        .param(&guard);
    let mut bp = Blueprint::new();
    bp.error_observer(recorder(&seen, "root"));
    bp.endpoint("outer", |_| async { Err::<(), _>(Error::msg("boom")) });
    bp.nest(nested);
    let app = bp.build().unwrap();

    let _ = app.endpoint("inner").unwrap().call(Inputs::empty()).await;
    let _ = app.endpoint("outer").unwrap().call(Inputs::empty()).await;

    // Observers registered on a blueprint apply to the blueprints nested under it.
    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        [
            ("root".to_string(), "inner".to_string(), FailureKind::Handler),
            ("nested".to_string(), "inner".to_string(), FailureKind::Handler),
            ("root".to_string(), "outer".to_string(), FailureKind::Handler),
        ]
    );
    assert_eq!(tracker.count("teardown guard (error: Owner error: Rick)").await, 1);
}

#[tokio::test]
async fn observers_are_told_about_suppressed_failures() {
    let seen = Seen::default();
    let tracker = CallTracker::default();
    let guard = intercepting("guard", &tracker, |_| Exit::Suppress);

    let mut bp = Blueprint::new();
    bp.error_observer(recorder(&seen, "root"));
    bp.endpoint("e", |_| async { Err::<(), _>(Error::msg("boom")) })
        .param(&guard);
    bp.endpoint("fine", |_| async { Ok::<_, Error>(()) });
    let app = bp.build().unwrap();

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;
    assert!(completion.outcome().failure().unwrap().was_suppressed());
    let _ = app.endpoint("fine").unwrap().call(Inputs::empty()).await;

    assert_eq!(seen.lock().unwrap().len(), 1);
}

//! Teardown steps suppressing, replacing or failing on the propagating error.
use googletest::{
    assert_that,
    prelude::{eq, len},
};
use scopeflow::http::StatusCode;
use scopeflow::{Blueprint, Error, Exit, FailureKind, HttpError, Inputs, Outcome, Provider};

use crate::fixtures::{CallTracker, OwnerError, intercepting, tracked};

fn suppress_owner_errors(e: &Error) -> Exit {
    if e.is::<OwnerError>() {
        Exit::Suppress
    } else {
        Exit::Propagate
    }
}

fn failing_handler() -> impl Fn(scopeflow::Resolved) -> std::future::Ready<Result<(), OwnerError>>
+ Send
+ Sync
+ 'static {
    |_| std::future::ready(Err(OwnerError("Rick".into())))
}

#[tokio::test]
async fn outer_scopes_do_not_see_a_suppressed_error() {
    let tracker = CallTracker::default();
    let a = tracked("a", &tracker);
    let b = intercepting("b", &tracker, suppress_owner_errors).depends_on(&a);

    let mut bp = Blueprint::new();
    bp.endpoint("e", failing_handler()).param(&b);
    let app = bp.build().unwrap();

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;

    let Outcome::Suppressed(failure) = completion.outcome() else {
        panic!("Expected a suppressed outcome, got {:?}", completion.outcome());
    };
    assert!(failure.was_suppressed());
    assert_eq!(failure.kind(), FailureKind::Handler);
    assert_that!(failure.intercepted_by(), len(eq(1)));
    assert_eq!(failure.intercepted_by()[0].as_str(), "b");
    // Suppressed outcomes are not classified: there is nothing to report.
    assert!(completion.classify().is_none());
    tracker
        .assert_log(&[
            "acquire a",
            "acquire b",
            "teardown b (error: Owner error: Rick)",
            "teardown a",
        ])
        .await;
}

#[tokio::test]
async fn errors_that_are_not_handled_keep_propagating() {
    let tracker = CallTracker::default();
    let b = intercepting("b", &tracker, suppress_owner_errors);

    let mut bp = Blueprint::new();
    bp.endpoint("e", |_| async {
        Err::<(), _>(HttpError::new(StatusCode::NOT_FOUND, "Item not found"))
    })
    .param(&b);
    let app = bp.build().unwrap();

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;

    assert!(matches!(completion.outcome(), Outcome::Failed(_)));
    assert_eq!(completion.classify().unwrap().status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn a_replaced_error_is_what_outer_scopes_see() {
    let tracker = CallTracker::default();
    let a = tracked("a", &tracker);
    let b = intercepting("b", &tracker, |e| {
        Exit::Replace(Error::new(HttpError::new(
            StatusCode::BAD_REQUEST,
            format!("Rejected: {e}"),
        )))
    })
    .depends_on(&a);

    let mut bp = Blueprint::new();
    bp.endpoint("e", failing_handler()).param(&b);
    let app = bp.build().unwrap();

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;

    let failure = completion.outcome().failure().unwrap();
    assert!(matches!(completion.outcome(), Outcome::Failed(_)));
    assert_eq!(failure.kind(), FailureKind::Handler);
    assert!(failure.trigger().is::<OwnerError>());
    assert!(failure.error().is::<HttpError>());
    assert_eq!(failure.intercepted_by()[0].as_str(), "b");
    assert_eq!(completion.classify().unwrap().status, StatusCode::BAD_REQUEST);
    tracker
        .assert_log(&[
            "acquire a",
            "acquire b",
            "teardown b (error: Owner error: Rick)",
            "teardown a (error: 400 Bad Request: Rejected: Owner error: Rick)",
        ])
        .await;
}

#[tokio::test]
async fn a_failing_teardown_step_supersedes_the_propagating_error() {
    let tracker = CallTracker::default();
    let a = tracked("a", &tracker);
    let b = Provider::scoped(
        "b",
        |_, _| async { Ok::<_, Error>(()) },
        |_, _| async { Err::<Exit, _>(Error::msg("Failed to release the connection")) },
    )
    .depends_on(&a);

    let mut bp = Blueprint::new();
    bp.endpoint("e", failing_handler()).param(&b);
    let app = bp.build().unwrap();

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;

    let failure = completion.outcome().failure().unwrap();
    assert_eq!(failure.kind(), FailureKind::Teardown);
    assert_eq!(failure.origin().map(|i| i.as_str()), Some("b"));
    assert_eq!(failure.error().to_string(), "Failed to release the connection");
    // The handler error is not lost.
    assert!(failure.trigger().is::<OwnerError>());
    assert_that!(failure.context(), len(eq(1)));
    assert!(failure.context()[0].is::<OwnerError>());
    // Outer scopes see the teardown failure.
    tracker
        .assert_log(&[
            "acquire a",
            "teardown a (error: Failed to release the connection)",
        ])
        .await;
}

#[tokio::test]
async fn a_teardown_failure_on_the_success_path_fails_the_request() {
    let tracker = CallTracker::default();
    let a = tracked("a", &tracker);
    let b = Provider::scoped(
        "b",
        |_, _| async { Ok::<_, Error>(()) },
        |_, _| async { Err::<Exit, _>(Error::msg("Failed to commit")) },
    )
    .depends_on(&a);

    let mut bp = Blueprint::new();
    bp.endpoint("e", |_| async { Ok::<_, Error>(()) }).param(&b);
    let app = bp.build().unwrap();

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;

    let Outcome::Failed(failure) = completion.outcome() else {
        panic!("Expected a failure, got {:?}", completion.outcome());
    };
    assert_eq!(failure.kind(), FailureKind::Teardown);
    assert!(failure.context().is_empty());
    tracker
        .assert_log(&["acquire a", "teardown a (error: Failed to commit)"])
        .await;
}

#[tokio::test]
async fn a_suppressed_error_can_be_revived_by_a_later_teardown_failure() {
    let tracker = CallTracker::default();
    let a = Provider::scoped(
        "a",
        |_, _| async { Ok::<_, Error>(()) },
        |_, _| async { Err::<Exit, _>(Error::msg("Failed to close the pool")) },
    );
    let b = intercepting("b", &tracker, suppress_owner_errors).depends_on(&a);

    let mut bp = Blueprint::new();
    bp.endpoint("e", failing_handler()).param(&b);
    let app = bp.build().unwrap();

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;

    let Outcome::Failed(failure) = completion.outcome() else {
        panic!("Expected a failure, got {:?}", completion.outcome());
    };
    assert_eq!(failure.kind(), FailureKind::Teardown);
    assert_eq!(failure.origin().map(|i| i.as_str()), Some("a"));
    assert!(!failure.was_suppressed());
    assert!(failure.context()[0].is::<OwnerError>());
}

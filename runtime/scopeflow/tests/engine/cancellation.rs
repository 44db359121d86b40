use std::time::Duration;

use scopeflow::blueprint::errors::{RequestCancelled, RequestTimedOut};
use scopeflow::scope::errors::TeardownTimedOut;
use scopeflow::{Blueprint, EngineConfig, Error, Exit, FailureKind, Inputs, Outcome, Provider};
use tokio_util::sync::CancellationToken;

use crate::fixtures::{CallTracker, tracked};

#[tokio::test]
async fn acquired_scopes_are_torn_down_when_the_request_is_cancelled() {
    let tracker = CallTracker::default();
    let token = CancellationToken::new();
    let a = tracked("a", &tracker);
    let b = tracked("b", &tracker).depends_on(&a);
    // `c` pulls the plug on the request and never completes.
    let c = {
        let token = token.clone();
        Provider::value("c", move |_, _| {
            let token = token.clone();
            async move {
                token.cancel();
                std::future::pending::<Result<(), Error>>().await
            }
        })
    }
    .depends_on(&b);

    let mut bp = Blueprint::new();
    bp.endpoint("e", |_| async { Ok::<_, Error>(()) }).param(&c);
    let app = bp.build().unwrap();

    let completion = app
        .endpoint("e")
        .unwrap()
        .call_with_cancellation(Inputs::empty(), token)
        .await;

    let Outcome::Failed(failure) = completion.outcome() else {
        panic!("Expected a failure, got {:?}", completion.outcome());
    };
    assert_eq!(failure.kind(), FailureKind::Cancellation);
    assert!(failure.error().is::<RequestCancelled>());
    tracker
        .assert_log(&[
            "acquire a",
            "acquire b",
            "teardown b (error: The request was cancelled)",
            "teardown a (error: The request was cancelled)",
        ])
        .await;
}

#[tokio::test]
async fn nothing_is_acquired_for_a_request_that_was_cancelled_upfront() {
    let tracker = CallTracker::default();
    let a = tracked("a", &tracker);
    let token = CancellationToken::new();
    token.cancel();

    let mut bp = Blueprint::new();
    bp.endpoint("e", |_| async { Ok::<_, Error>(()) }).param(&a);
    let app = bp.build().unwrap();

    let completion = app
        .endpoint("e")
        .unwrap()
        .call_with_cancellation(Inputs::empty(), token)
        .await;

    assert_eq!(
        completion.outcome().failure().map(|f| f.kind()),
        Some(FailureKind::Cancellation)
    );
    tracker.assert_log(&[]).await;
}

#[tokio::test(start_paused = true)]
async fn slow_requests_time_out() {
    let tracker = CallTracker::default();
    let a = tracked("a", &tracker);
    let timeout = Duration::from_secs(1);

    let mut bp = Blueprint::new();
    bp.config(EngineConfig::new().with_resolution_timeout(timeout));
    bp.endpoint("e", |_| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok::<_, Error>(())
    })
    .param(&a);
    let app = bp.build().unwrap();

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;

    let failure = completion.outcome().failure().unwrap();
    assert_eq!(failure.kind(), FailureKind::Cancellation);
    let e = failure.error().downcast_ref::<RequestTimedOut>().unwrap();
    assert_eq!(e.timeout, timeout);
    insta::assert_snapshot!(failure.error(), @"The request did not complete within 1s");
    assert_eq!(tracker.count("teardown a (error: The request did not complete within 1s)").await, 1);
}

#[tokio::test(start_paused = true)]
async fn slow_teardown_steps_are_abandoned() {
    let tracker = CallTracker::default();
    let a = tracked("a", &tracker);
    let b = Provider::scoped(
        "b",
        |_, _| async { Ok::<_, Error>(()) },
        |_, _| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, Error>(Exit::Propagate)
        },
    )
    .depends_on(&a);

    let mut bp = Blueprint::new();
    bp.config(EngineConfig::new().with_teardown_timeout(Duration::from_millis(500)));
    bp.endpoint("e", |_| async { Ok::<_, Error>(()) }).param(&b);
    let app = bp.build().unwrap();

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;

    let Outcome::Failed(failure) = completion.outcome() else {
        panic!("Expected a failure, got {:?}", completion.outcome());
    };
    assert_eq!(failure.kind(), FailureKind::Cancellation);
    assert_eq!(failure.origin().map(|i| i.as_str()), Some("b"));
    assert!(failure.error().is::<TeardownTimedOut>());
    // The outer scope is still closed.
    tracker
        .assert_log(&[
            "acquire a",
            "teardown a (error: The teardown step of `b` did not complete within 500ms)",
        ])
        .await;
}

use scopeflow::{Blueprint, EngineConfig, Error, Exit, Inputs, Provider, Resolved};

use crate::fixtures::{CallTracker, OwnerError, intercepting};

/// An endpoint whose handler enqueues a background task, then fails if `fail` is set.
fn app(tracker: &CallTracker, fail: bool, config: EngineConfig) -> scopeflow::Application<()> {
    let guard = intercepting("guard", tracker, |e| {
        if e.is::<OwnerError>() {
            Exit::Suppress
        } else {
            Exit::Propagate
        }
    });
    let task_tracker = tracker.clone();
    let mut bp = Blueprint::new();
    bp.config(config);
    bp.endpoint("e", move |resolved: Resolved| {
        let tracker = task_tracker.clone();
        async move {
            resolved.background_tasks().add("send_email", async move {
                tracker.record("send email").await;
                Ok::<_, Error>(())
            });
            if fail {
                return Err(Error::new(OwnerError("Rick".into())));
            }
            Ok(())
        }
    })
    .param(&guard);
    bp.build().unwrap()
}

#[tokio::test]
async fn background_tasks_run_after_teardown_on_success() {
    let tracker = CallTracker::default();
    let app = app(&tracker, false, EngineConfig::default());

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;
    assert_eq!(completion.background_tasks().len(), 1);
    assert!(completion.run_background_tasks().await);

    tracker
        .assert_log(&["acquire guard", "teardown guard", "send email"])
        .await;
    assert!(completion.background_tasks().is_empty());
}

#[tokio::test]
async fn background_tasks_are_discarded_on_failure() {
    let tracker = CallTracker::default();
    let failing = Provider::value("failing", |_, _| async {
        Err::<(), _>(Error::msg("Nope"))
    });
    let task_tracker = tracker.clone();
    let mut bp = Blueprint::new();
    bp.endpoint("e", |_| async { Ok::<_, Error>(()) })
        .param(&Provider::value("enqueue", move |deps, _| {
            let tracker = task_tracker.clone();
            async move {
                deps.background_tasks().add("audit", async move {
                    tracker.record("audit").await;
                    Ok::<_, Error>(())
                });
                Ok::<_, Error>(())
            }
        }))
        .param(&failing);
    let app = bp.build().unwrap();

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;
    assert!(completion.outcome().failure().is_some());
    assert_eq!(completion.background_tasks().len(), 1);

    assert!(!completion.run_background_tasks().await);
    assert!(completion.background_tasks().is_empty());
    tracker.assert_log(&[]).await;
}

#[tokio::test]
async fn background_tasks_are_discarded_on_suppressed_outcomes_by_default() {
    let tracker = CallTracker::default();
    let app = app(&tracker, true, EngineConfig::default());

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;
    assert!(!completion.run_background_tasks().await);

    assert_eq!(tracker.count("send email").await, 0);
}

#[tokio::test]
async fn background_tasks_can_run_on_suppressed_outcomes() {
    let tracker = CallTracker::default();
    let config = EngineConfig::new().with_background_tasks_on_suppressed(true);
    let app = app(&tracker, true, config);

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;
    assert!(completion.run_background_tasks().await);

    assert_eq!(tracker.count("send email").await, 1);
}

#[tokio::test]
async fn a_failing_background_task_does_not_stop_the_others() {
    let tracker = CallTracker::default();
    let task_tracker = tracker.clone();
    let mut bp = Blueprint::new();
    bp.endpoint("e", move |resolved: Resolved| {
        let tracker = task_tracker.clone();
        async move {
            let tasks = resolved.background_tasks();
            tasks.add("flaky", async { Err::<(), _>(Error::msg("SMTP is down")) });
            tasks.add("reliable", async move {
                tracker.record("reliable").await;
                Ok::<_, Error>(())
            });
            Ok::<_, Error>(())
        }
    });
    let app = bp.build().unwrap();

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;
    assert!(completion.run_background_tasks().await);
    tracker.assert_log(&["reliable"]).await;
}

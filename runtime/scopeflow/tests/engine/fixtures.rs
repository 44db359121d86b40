use std::sync::Arc;

use scopeflow::{Error, Exit, Provider};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
#[error("Owner error: {0}")]
pub struct OwnerError(pub String);

/// Records what providers did, and in which order.
#[derive(Clone, Default)]
pub struct CallTracker {
    log: Arc<Mutex<Vec<String>>>,
}

impl CallTracker {
    pub async fn record(&self, entry: impl Into<String>) {
        self.log.lock().await.push(entry.into());
    }

    pub async fn log(&self) -> Vec<String> {
        self.log.lock().await.clone()
    }

    /// How many times `entry` shows up in the log.
    pub async fn count(&self, entry: &str) -> usize {
        self.log.lock().await.iter().filter(|e| *e == entry).count()
    }

    pub async fn assert_log(&self, expected: &[&str]) {
        assert_eq!(self.log().await, expected);
    }
}

/// A value provider that logs `produce {name}` every time it runs.
pub fn counted(name: &'static str, tracker: &CallTracker) -> Provider {
    let tracker = tracker.clone();
    Provider::value(name, move |_, _| {
        let tracker = tracker.clone();
        async move {
            tracker.record(format!("produce {name}")).await;
            Ok::<_, Error>(name)
        }
    })
}

/// A scoped provider that logs its acquisition and its teardown, letting errors through.
pub fn tracked(name: &'static str, tracker: &CallTracker) -> Provider {
    intercepting(name, tracker, |_| Exit::Propagate)
}

/// A scoped provider that logs its acquisition and its teardown.
///
/// When an error is propagating, `decide` picks what happens to it.
pub fn intercepting<F>(name: &'static str, tracker: &CallTracker, decide: F) -> Provider
where
    F: Fn(&Error) -> Exit + Send + Sync + 'static,
{
    let (acquire_tracker, teardown_tracker) = (tracker.clone(), tracker.clone());
    let decide = Arc::new(decide);
    Provider::scoped(
        name,
        move |_, _| {
            let tracker = acquire_tracker.clone();
            async move {
                tracker.record(format!("acquire {name}")).await;
                Ok::<_, Error>(name)
            }
        },
        move |_, error: Option<Error>| {
            let tracker = teardown_tracker.clone();
            let decide = decide.clone();
            async move {
                let exit = match error {
                    Some(e) => {
                        tracker.record(format!("teardown {name} (error: {e})")).await;
                        decide(&e)
                    }
                    None => {
                        tracker.record(format!("teardown {name}")).await;
                        Exit::Propagate
                    }
                };
                Ok::<_, Error>(exit)
            }
        },
    )
}

use scopeflow::plan::errors::CompositionError;
use scopeflow::{Blueprint, Error, Inputs, Provider};

use crate::fixtures::{CallTracker, counted};

fn unit(name: &'static str) -> Provider {
    Provider::value(name, |_, _| async { Ok::<_, Error>(()) })
}

#[test]
fn a_cycle_prevents_the_application_from_being_built() {
    let stub = unit("session");
    let user = unit("user").depends_on(&stub);
    let session = unit("session").depends_on(&user);

    let mut bp = Blueprint::new();
    bp.endpoint("profile", |_| async { Ok::<_, Error>(()) })
        .param(&session);

    let err = bp.build().unwrap_err();

    assert!(matches!(err, CompositionError::CyclicDependency(_)));
    insta::assert_snapshot!(err, @"The dependency graph contains a cycle: session -> user -> session");
}

#[test]
fn a_single_broken_endpoint_fails_the_whole_build() {
    let cached = unit("token");
    let uncached = unit("token").no_cache();

    let mut bp = Blueprint::new();
    bp.dependency(&cached);
    bp.endpoint("healthy", |_| async { Ok::<_, Error>(()) });
    bp.endpoint("broken", |_| async { Ok::<_, Error>(()) })
        .param(&uncached);

    let err = bp.build().unwrap_err();
    assert!(matches!(err, CompositionError::ConflictingDeclarations(_)));
}

#[tokio::test]
async fn a_shared_sub_dependency_is_resolved_before_all_of_its_dependents() {
    let tracker = CallTracker::default();
    let config = counted("config", &tracker);
    let db = counted("db", &tracker).depends_on(&config);
    let cache = counted("cache", &tracker).depends_on(&config);

    let mut bp = Blueprint::new();
    bp.dependency(&db);
    bp.endpoint("e", |_| async { Ok::<_, Error>(()) })
        .param(&cache);
    let app = bp.build().unwrap();

    let identities: Vec<_> = app
        .endpoint("e")
        .unwrap()
        .plan()
        .identities()
        .map(|i| i.to_string())
        .collect();
    assert_eq!(identities, ["config", "db", "cache"]);

    let completion = app.endpoint("e").unwrap().call(Inputs::empty()).await;
    assert!(completion.outcome().is_success());
    tracker
        .assert_log(&["produce config", "produce db", "produce cache"])
        .await;
}

#[test]
fn endpoints_are_listed_in_registration_order() {
    let mut nested = Blueprint::new();
    nested.endpoint("nested", |_| async { Ok::<_, Error>(()) });
    let mut bp = Blueprint::new();
    bp.endpoint("first", |_| async { Ok::<_, Error>(()) });
    bp.nest(nested);
    bp.endpoint("second", |_| async { Ok::<_, Error>(()) });

    let app = bp.build().unwrap();

    let names: Vec<_> = app.endpoints().map(|e| e.name()).collect();
    assert_eq!(names, ["first", "second", "nested"]);
    assert!(app.endpoint("missing").is_none());
}

#[test]
fn operation_level_dependencies_share_their_sub_dependencies() {
    let key = unit("verify_key");
    let token = unit("verify_token").depends_on(&key);
    let user = unit("verify_user").depends_on(&key);

    let mut bp = Blueprint::new();
    bp.endpoint("read_items", |_| async { Ok::<_, Error>(()) })
        .dependency(&token)
        .dependency(&user);
    let app = bp.build().unwrap();

    let plan = app.endpoint("read_items").unwrap().plan();
    let identities: Vec<_> = plan.identities().map(|i| i.as_str()).collect();
    assert_eq!(identities, ["verify_key", "verify_token", "verify_user"]);
    assert_eq!(plan.steps()[1].inputs(), [0]);
    assert_eq!(plan.steps()[2].inputs(), [0]);
}

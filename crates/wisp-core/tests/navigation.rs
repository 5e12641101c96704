mod fixtures;

use fixtures::{Docs, default_docs_session, docs_session};
use wisp_core::wisp_types::{ClientEvent, RenderOutcome};
use wisp_core::{Environment, Notification, SessionConfig};

#[test]
fn test_set_path_notifies_once_and_routes() {
    let session = default_docs_session();
    let lock = session.lock().unwrap();

    lock.with(|_, ctx| ctx.set_internal_path("/docs/intro", true))
        .unwrap()
        .unwrap();

    let (notifications, shown) = lock
        .with(|app: &mut Docs, _| (app.notifications.clone(), app.shown.clone()))
        .unwrap();
    assert_eq!(
        notifications,
        vec![Notification::InternalPathChanged("/docs/intro".to_string())]
    );
    assert_eq!(shown.as_deref(), Some("intro"));

    lock.with(|_, ctx| {
        assert_eq!(ctx.internal_path_next_part("/docs/"), "intro");
        assert_eq!(ctx.internal_path_next_part("/x/"), "");
        assert!(ctx.internal_path_valid());
    })
    .unwrap();
}

#[test]
fn test_silent_path_change_is_rendered_without_notification() {
    let session = default_docs_session();
    let lock = session.lock().unwrap();
    lock.flush().unwrap();

    lock.with(|_, ctx| ctx.set_internal_path("/docs/install", false))
        .unwrap()
        .unwrap();
    let notifications = lock.with(|app: &mut Docs, _| app.notifications.len()).unwrap();
    assert_eq!(notifications, 0);

    let delta = lock.flush().unwrap();
    assert_eq!(delta.internal_path.as_deref(), Some("/docs/install"));
    assert_eq!(lock.flush().unwrap().internal_path, None);
}

#[test]
fn test_unknown_topic_is_reported_invalid() {
    let session = default_docs_session();
    let delta = session
        .process(ClientEvent::Navigate {
            path: "/docs/missing".to_string(),
        })
        .unwrap();
    assert_eq!(delta.outcome, RenderOutcome::Ok);

    let lock = session.lock().unwrap();
    let notifications = lock.with(|app: &mut Docs, _| app.notifications.clone()).unwrap();
    assert_eq!(
        notifications,
        vec![
            Notification::InternalPathChanged("/docs/missing".to_string()),
            Notification::InternalPathInvalid("/docs/missing".to_string()),
        ]
    );
}

#[test]
fn test_plain_html_client_gets_not_found() {
    let env = Environment {
        interactive: false,
        internal_path: "/docs/missing".to_string(),
        ..Environment::default()
    };
    let session = docs_session(env, SessionConfig::default());
    let delta = session.lock().unwrap().flush().unwrap();

    assert!(delta.full);
    assert_eq!(delta.outcome, RenderOutcome::NotFound);
}

#[test]
fn test_signal_navigates_through_the_application() {
    let session = default_docs_session();
    let token = {
        let lock = session.lock().unwrap();
        lock.flush().unwrap();
        lock.with(|app: &mut Docs, _| app.nav_token.clone()).unwrap()
    };

    let delta = session
        .process(ClientEvent::Signal {
            token,
            args: vec!["/docs/install".to_string()],
        })
        .unwrap();

    assert!(!delta.full);
    assert_eq!(delta.internal_path.as_deref(), Some("/docs/install"));
    assert!(delta.script.contains("show('install');"));
}

#[test]
fn test_first_render_loads_required_library() {
    let session = default_docs_session();
    let lock = session.lock().unwrap();

    let first = lock.flush().unwrap();
    assert!(first.full);
    assert_eq!(first.libraries.len(), 1);
    assert!(first.script.contains("render_page();"));

    let second = lock.flush().unwrap();
    assert!(!second.full);
    assert!(second.libraries.is_empty());
}

mod fixtures;

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use fixtures::{DIALOG, DIALOG_BUTTON, Docs, NAV_LINK, default_docs_session};
use wisp_core::wisp_types::ClientEvent;
use wisp_core::{ExposedTarget, SessionError, WaitOutcome};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_background_work_is_pushed() {
    let session = Arc::new(default_docs_session());
    session.lock().unwrap().flush().unwrap();
    let mut updates = session.connect_push();

    let worker = {
        let session = Arc::clone(&session);
        tokio::task::spawn_blocking(move || {
            let lock = session.lock().unwrap();
            lock.enable_updates(true);
            lock.with(|app: &mut Docs, ctx| {
                app.visible.push_str("progress(100);");
                ctx.trigger_update();
            })
            .unwrap();
        })
    };
    worker.await.unwrap();

    let delta = tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(delta.script.contains("progress(100);"));
    assert!(!delta.full);
}

#[test]
fn test_waiting_lock_resumes_after_client_event() {
    let session = default_docs_session();
    session.lock().unwrap().flush().unwrap();
    let handle = session.handle();
    let token = session
        .lock()
        .unwrap()
        .with(|app: &mut Docs, _| app.nav_token.clone())
        .unwrap();

    let (locked_tx, locked_rx) = mpsc::channel();

    thread::scope(|scope| {
        let waiter = scope.spawn(move || {
            let mut lock = handle.lock().unwrap();
            locked_tx.send(()).unwrap();
            let outcome = lock.wait_for_event(Duration::from_secs(5)).unwrap();
            let clicks = lock.with(|app: &mut Docs, _| app.clicks).unwrap();
            (outcome, clicks)
        });

        locked_rx.recv().unwrap();
        // The click only gets through once the waiter has yielded the lock.
        let delta = session
            .process(ClientEvent::Signal {
                token,
                args: vec!["/docs/intro".to_string()],
            })
            .unwrap();
        assert_eq!(delta.internal_path.as_deref(), Some("/docs/intro"));

        let (outcome, clicks) = waiter.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Event);
        assert_eq!(clicks, 1);
    });
}

#[test]
fn test_wait_inside_turn_is_refused() {
    let session = default_docs_session();
    let handle = session.handle();
    let lock = session.lock().unwrap();

    let nested = lock
        .with(|_, _| {
            let mut inner = handle.lock().unwrap();
            inner.wait_for_event(Duration::from_millis(10))
        })
        .unwrap();
    assert!(matches!(nested, Err(SessionError::StateBorrowed)));
}

#[test]
fn test_modal_dialog_blocks_outside_signals() {
    let session = default_docs_session();
    let lock = session.lock().unwrap();
    lock.flush().unwrap();

    let (nav, button) = lock
        .with(|app: &mut Docs, ctx| {
            ctx.push_exposed_constraint(DIALOG);
            let button = ctx.expose(ExposedTarget::signal(DIALOG_BUTTON, "clicked"));
            (app.nav_token.clone(), button)
        })
        .unwrap();
    assert!(!lock.is_exposed(NAV_LINK).unwrap());

    lock.notify(ClientEvent::Signal { token: nav, args: vec![] })
        .unwrap();
    lock.notify(ClientEvent::Signal { token: button, args: vec![] })
        .unwrap();
    assert_eq!(lock.with(|app: &mut Docs, _| app.clicks).unwrap(), 1);
}

#[test]
fn test_destroy_wakes_waiting_lock() {
    let session = default_docs_session();
    session.lock().unwrap().flush().unwrap();
    let handle = session.handle();

    let (locked_tx, locked_rx) = mpsc::channel();

    thread::scope(|scope| {
        let waiter = scope.spawn(move || {
            let mut lock = handle.lock().unwrap();
            locked_tx.send(()).unwrap();
            let outcome = lock.wait_for_event(Duration::from_secs(5)).unwrap();
            (outcome, lock.is_valid())
        });

        locked_rx.recv().unwrap();
        assert!(session.destroy());
        let (outcome, valid) = waiter.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Destroyed);
        assert!(!valid);
    });
}

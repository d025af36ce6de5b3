//! Online and offline login through `SyncContext`.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use haven_core::auth::TokenStore;
use haven_core::testing::MockResponse;
use haven_domain::{AuthOutcome, HavenError};
use support::*;

const EMAIL: &str = "student@example.com";
const PASSWORD: &str = "correct horse";

#[tokio::test]
async fn online_login_enables_offline_login_later() -> anyhow::Result<()> {
    let h = harness(test_config(true, false)).await;
    h.remote.add_account(EMAIL, PASSWORD, None);

    let outcome = h.context.authenticate(EMAIL, PASSWORD).await?;
    assert!(matches!(outcome, AuthOutcome::Online { .. }));
    assert_eq!(h.tokens.load_token().await?.as_deref(), Some("token-for-student@example.com"));

    h.context.connectivity_monitor().set_online(false);
    let outcome = h.context.authenticate("Student@Example.com ", PASSWORD).await?;
    let AuthOutcome::Offline { session } = outcome else { panic!("expected offline session") };
    assert_eq!(session.email, EMAIL);
    assert_eq!(h.remote.login_calls(), 1);

    let err = h.context.authenticate(EMAIL, "wrong").await.unwrap_err();
    assert!(matches!(err, HavenError::InvalidOfflineCredential));
    Ok(())
}

#[tokio::test]
async fn offline_login_without_record_is_refused() {
    let h = harness(test_config(false, false)).await;
    let err = h.context.authenticate(EMAIL, PASSWORD).await.unwrap_err();
    assert!(matches!(err, HavenError::NoOfflineRecord));
    assert_eq!(h.remote.login_calls(), 0);
}

#[tokio::test]
async fn rejected_login_forgets_offline_record() -> anyhow::Result<()> {
    let h = harness(test_config(true, false)).await;
    h.remote.add_account(EMAIL, PASSWORD, None);
    h.context.authenticate(EMAIL, PASSWORD).await?;

    let err = h.context.authenticate(EMAIL, "changed elsewhere").await.unwrap_err();
    assert!(matches!(err, HavenError::ServerRejected { status: 401, .. }));

    h.context.connectivity_monitor().set_online(false);
    let err = h.context.authenticate(EMAIL, PASSWORD).await.unwrap_err();
    assert!(matches!(err, HavenError::NoOfflineRecord));
    Ok(())
}

#[tokio::test]
async fn unreachable_server_falls_back_to_offline_login() -> anyhow::Result<()> {
    let h = harness(test_config(true, false)).await;
    h.remote.add_account(EMAIL, PASSWORD, None);
    h.context.authenticate(EMAIL, PASSWORD).await?;
    h.context.logout().await?;
    assert_eq!(h.tokens.load_token().await?, None);
    assert!(h.context.current_session().await?.is_none());

    h.remote.set_login_failure(Some(MockResponse::Network));
    let outcome = h.context.authenticate(EMAIL, PASSWORD).await?;
    assert!(matches!(outcome, AuthOutcome::Offline { .. }));
    assert!(!h.context.get_connectivity().online);
    assert!(h.context.current_session().await?.is_some());
    Ok(())
}

#[tokio::test]
async fn server_error_during_login_is_surfaced() {
    let h = harness(test_config(true, false)).await;
    h.remote.set_login_failure(Some(MockResponse::Status(503)));

    let err = h.context.authenticate(EMAIL, PASSWORD).await.unwrap_err();
    assert!(matches!(err, HavenError::ServerUnavailable { status: Some(503), .. }));
    assert!(h.context.get_connectivity().online);
}

#[tokio::test]
async fn listeners_follow_connectivity_until_removed() -> anyhow::Result<()> {
    let h = harness(test_config(true, false)).await;
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let id = h.context.on_connectivity_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    h.context.connectivity_monitor().set_online(false);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    assert!(h.context.remove_connectivity_listener(id));
    h.context.connectivity_monitor().set_online(true);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    h.context.health_check()?;
    h.context.shutdown().await?;
    h.context.shutdown().await?;
    Ok(())
}

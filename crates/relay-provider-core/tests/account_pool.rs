use std::time::Duration;

use relay_provider_core::credential::{Account, ApiKeyCredential};
use relay_provider_core::{
    AccountState, Credential, CredentialPool, Event, EventHub, OperationalEvent,
    UnavailableReason,
};
use tokio::time::timeout;

fn test_account(id: i64) -> Account {
    Account {
        id,
        provider: "test".to_string(),
        credential: Credential::ClaudeConsole(ApiKeyCredential {
            api_key: "k".to_string(),
        }),
        proxy: None,
        concurrency_limit: None,
        priority: 0,
        cost_weight: 1.0,
        allowed_models: Vec::new(),
    }
}

#[tokio::test]
async fn unavailable_recovers_via_queue() {
    let hub = EventHub::new(16);
    let mut rx = hub.subscribe();
    let pool = CredentialPool::new(hub.clone());

    pool.insert(test_account(1)).await;

    pool.mark_unavailable(1, Duration::from_millis(50), UnavailableReason::RateLimit)
        .await;

    let ev = timeout(Duration::from_millis(200), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        ev,
        Event::Operational(OperationalEvent::UnavailableStart(_))
    ));

    let ev = timeout(Duration::from_millis(500), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        ev,
        Event::Operational(OperationalEvent::UnavailableEnd(_))
    ));

    let state = pool.state(1).await.unwrap();
    assert!(matches!(state, AccountState::Active));
}

#[tokio::test]
async fn stale_queue_entry_does_not_recover_early() {
    let hub = EventHub::new(32);
    let pool = CredentialPool::new(hub);

    pool.insert(test_account(1)).await;

    pool.mark_unavailable(1, Duration::from_millis(80), UnavailableReason::Timeout)
        .await;
    pool.mark_unavailable(1, Duration::from_millis(200), UnavailableReason::Timeout)
        .await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    let state = pool.state(1).await.unwrap();
    assert!(matches!(state, AccountState::Unavailable { .. }));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let state = pool.state(1).await.unwrap();
    assert!(matches!(state, AccountState::Active));
}

#[tokio::test]
async fn candidates_excludes_model_specific_unavailability() {
    let hub = EventHub::new(16);
    let pool = CredentialPool::new(hub);
    pool.insert(test_account(1)).await;

    let before = pool.candidates("test", "claude-3-5-sonnet").await;
    assert_eq!(before.len(), 1);

    pool.mark_model_unavailable(
        1,
        "claude-3-5-sonnet",
        Duration::from_millis(200),
        UnavailableReason::ModelDisallow,
    )
    .await;

    let during = pool.candidates("test", "claude-3-5-sonnet").await;
    assert!(during.is_empty());

    let other_model = pool.candidates("test", "claude-3-opus").await;
    assert_eq!(other_model.len(), 1);
}

#[tokio::test]
async fn allowed_models_restricts_candidacy() {
    let hub = EventHub::new(16);
    let pool = CredentialPool::new(hub);
    let mut account = test_account(1);
    account.allowed_models = vec!["claude-3-5-sonnet".to_string()];
    pool.insert(account).await;

    assert_eq!(pool.candidates("test", "claude-3-5-sonnet").await.len(), 1);
    assert!(pool.candidates("test", "claude-3-opus").await.is_empty());
}

//! Delivery tests: silence means success, and nothing is sent twice.

use super::harness::{token, TestContext, TEST_POLL_TIMEOUT};
use crate::dispatcher::DispatchSummary;
use crate::protocol::GatewayStatus;
use chrono::{TimeZone, Utc};
use push_database::NewNotification;

#[tokio::test]
async fn silent_gateway_delivers_whole_batch() {
    let ctx = TestContext::new();
    ctx.create_app("app", Some(true));
    let queued = ctx.enqueue("app", 4);

    let summary = ctx.registry.push_notifications("app").await.unwrap();

    assert_eq!(
        summary,
        DispatchSummary {
            pending: 4,
            written: 4,
            delivered: 4,
            ..Default::default()
        }
    );
    for n in ctx.reload_all(&queued) {
        assert!(n.sent);
        assert_eq!(n.result_code, Some(GatewayStatus::NoError.code()));
        assert_eq!(n.attempts, 1);
        assert!(n.sent_at.is_some());
    }
}

#[tokio::test]
async fn unset_sandbox_mode_single_notification() {
    let ctx = TestContext::new();
    ctx.create_app("app", None);
    let queued = ctx.enqueue("app", 1);

    ctx.registry.push_notifications("app").await.unwrap();

    let n = ctx.reload(&queued[0]);
    assert!(n.sent);
    assert_eq!(n.result_code, Some(0));

    // Opened against the sandbox with the development certificate
    assert_eq!(ctx.gateway.opens(), vec![("app-dev-cert".to_string(), true)]);

    // The defaulted mode was persisted
    let app = ctx.db.get_application("app").unwrap().unwrap();
    assert_eq!(app.sandbox_mode, Some(true));
}

#[tokio::test]
async fn production_app_uses_production_certificate() {
    let ctx = TestContext::new();
    ctx.create_app("app", Some(false));
    ctx.enqueue("app", 1);

    ctx.registry.push_notifications("app").await.unwrap();

    assert_eq!(
        ctx.gateway.opens(),
        vec![("app-prod-cert".to_string(), false)]
    );
}

#[tokio::test]
async fn second_call_without_new_notifications_is_noop() {
    let ctx = TestContext::new();
    ctx.create_app("app", Some(true));
    let queued = ctx.enqueue("app", 3);

    ctx.registry.push_notifications("app").await.unwrap();
    let after_first = ctx.reload_all(&queued);

    let summary = ctx.registry.push_notifications("app").await.unwrap();

    assert!(summary.is_noop());
    assert_eq!(ctx.gateway.opens().len(), 1, "no connection for an empty queue");
    assert_eq!(ctx.gateway.written_count(), 3);

    for (before, after) in after_first.iter().zip(ctx.reload_all(&queued)) {
        assert_eq!(before.attempts, after.attempts);
        assert_eq!(before.result_code, after.result_code);
        assert_eq!(before.updated_at, after.updated_at);
    }
}

#[tokio::test]
async fn empty_queue_opens_no_connection() {
    let ctx = TestContext::new();
    ctx.create_app("app", Some(true));

    let summary = ctx.registry.push_notifications("app").await.unwrap();

    assert_eq!(summary, DispatchSummary::default());
    assert!(ctx.gateway.opens().is_empty());
}

#[tokio::test]
async fn sent_notifications_are_never_written_again() {
    let ctx = TestContext::new();
    ctx.create_app("app", Some(true));
    let first = ctx.enqueue("app", 2);

    ctx.registry.push_notifications("app").await.unwrap();

    let second = ctx.enqueue_token("app", &token(10));
    ctx.registry.push_notifications("app").await.unwrap();

    let connections = ctx.gateway.connections();
    assert_eq!(connections.len(), 2);
    assert_eq!(connections[1].len(), 1);
    assert_eq!(hex::encode(connections[1][0].device_token), second.device_token);

    for n in ctx.reload_all(&first) {
        assert_eq!(n.attempts, 1);
    }
}

#[tokio::test]
async fn already_sent_notification_is_skipped() {
    let ctx = TestContext::new();
    ctx.create_app("app", Some(true));
    let queued = ctx.enqueue("app", 3);

    let mut sent = queued[1].clone();
    sent.sent = true;
    sent.result_code = Some(0);
    sent.attempts = 1;
    sent.sent_at = Some(Utc::now());
    ctx.db.update_notification(&sent).unwrap();

    let summary = ctx.registry.push_notifications("app").await.unwrap();
    assert_eq!(summary.pending, 2);

    let written: Vec<String> = ctx
        .gateway
        .written()
        .iter()
        .map(|f| hex::encode(f.device_token))
        .collect();
    assert_eq!(
        written,
        vec![queued[0].device_token.clone(), queued[2].device_token.clone()]
    );
    assert_eq!(ctx.reload(&queued[1]).attempts, 1);
}

#[tokio::test]
async fn frames_follow_queue_order_with_positional_identifiers() {
    let ctx = TestContext::new();
    ctx.create_app("app", Some(true));
    let queued = ctx.enqueue("app", 6);

    ctx.registry.push_notifications("app").await.unwrap();

    let written = ctx.gateway.written();
    assert_eq!(written.len(), 6);
    for (i, (frame, n)) in written.iter().zip(&queued).enumerate() {
        assert_eq!(frame.identifier, i as u32);
        assert_eq!(hex::encode(frame.device_token), n.device_token);
        let payload: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(payload, n.payload);
    }
}

#[tokio::test]
async fn configured_poll_timeout_bounds_the_wait() {
    let ctx = TestContext::new();
    ctx.create_app("app", Some(true));
    ctx.enqueue("app", 1);

    ctx.registry.push_notifications("app").await.unwrap();

    assert_eq!(ctx.gateway.poll_timeouts(), vec![TEST_POLL_TIMEOUT]);
}

#[tokio::test]
async fn expiry_is_written_as_unix_seconds() {
    let ctx = TestContext::new();
    ctx.create_app("app", Some(true));

    let expires_at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
    let mut new = NewNotification::new("app", &token(0), serde_json::json!({"aps": {}}));
    new.expires_at = Some(expires_at);
    ctx.db.insert_notification(&new).unwrap();

    ctx.registry.push_notifications("app").await.unwrap();

    let written = ctx.gateway.written();
    assert_eq!(written[0].expiry, expires_at.timestamp() as u32);
}

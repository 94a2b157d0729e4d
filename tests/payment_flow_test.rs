mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use rust_decimal_macros::dec;
use uuid::Uuid;

use payments_api::entities::payment::{PaymentGatewayKind, PaymentStatus};
use payments_api::errors::ServiceError;
use payments_api::events::PaymentEvent;
use payments_api::gateways::ChargeOutcome;
use payments_api::services::payments::{RefundPaymentRequest, WebhookOutcome};

use common::{initialize_request, webhook_body, TestApp};

#[tokio::test]
async fn initialize_persists_a_pending_payment() {
    let app = TestApp::new().await;
    let order_id = Uuid::new_v4();

    let response = app
        .service
        .initialize_payment(initialize_request(order_id, dec!(5000)))
        .await
        .unwrap();

    assert_eq!(response.payment_id, "pay_123");
    assert_eq!(response.redirect_url.as_deref(), Some("https://pay/123"));

    let stored = app.service.get_by_payment_id("pay_123").await.unwrap();
    assert_eq!(stored.order_id, order_id);
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert_eq!(stored.amount, dec!(5000));
    assert_eq!(stored.currency, "NGN");
    assert_eq!(stored.version, 1);
    assert!(!stored.saga_id.is_empty());
    assert!(app.publisher.events().await.is_empty());
}

#[tokio::test]
async fn duplicate_initialize_reuses_the_pending_record() {
    let app = TestApp::new().await;
    let order_id = Uuid::new_v4();

    let first = app
        .service
        .initialize_payment(initialize_request(order_id, dec!(5000)))
        .await
        .unwrap();
    let second = app
        .service
        .initialize_payment(initialize_request(order_id, dec!(5000)))
        .await
        .unwrap();

    assert_eq!(first.payment_id, second.payment_id);
    assert_eq!(second.redirect_url.as_deref(), Some("https://pay/123"));
    // Exactly one gateway charge: the retry returned the stored reference.
    assert_eq!(app.gateway.process_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn initialize_rejects_an_already_paid_order() {
    let app = TestApp::new().await;
    let order_id = Uuid::new_v4();

    app.service
        .initialize_payment(initialize_request(order_id, dec!(5000)))
        .await
        .unwrap();
    app.service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_123", "success", 5000),
            Some("sig"),
        )
        .await
        .unwrap();

    let err = app
        .service
        .initialize_payment(initialize_request(order_id, dec!(5000)))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
    assert!(err.to_string().contains("already completed"));
}

#[tokio::test]
async fn gateway_rejection_surfaces_and_persists_nothing() {
    let app = TestApp::new().await;
    app.gateway
        .set_charge_outcome(ChargeOutcome::failure("Insufficient merchant balance"));

    let err = app
        .service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::PaymentFailed(_)));
    assert!(err.to_string().contains("Insufficient merchant balance"));
    let err = app.service.get_by_payment_id("pay_123").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn unconfigured_gateway_is_rejected() {
    let app = TestApp::new().await;
    let mut req = initialize_request(Uuid::new_v4(), dec!(5000));
    req.gateway = PaymentGatewayKind::Flutterwave;

    let err = app.service.initialize_payment(req).await.unwrap_err();
    assert!(matches!(err, ServiceError::GatewayNotConfigured(_)));
}

#[tokio::test]
async fn successful_webhook_confirms_and_publishes_once() {
    let app = TestApp::new().await;
    let order_id = Uuid::new_v4();
    app.service
        .initialize_payment(initialize_request(order_id, dec!(5000)))
        .await
        .unwrap();

    let outcome = app
        .service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_123", "success", 5000),
            Some("sig"),
        )
        .await
        .unwrap();

    let payment = match outcome {
        WebhookOutcome::Confirmed(payment) => payment,
        other => unreachable!("expected Confirmed, got {:?}", other),
    };
    assert_eq!(payment.status, PaymentStatus::Success);
    assert!(payment.paid_at.is_some());
    assert_eq!(payment.version, 2);

    let events = app.publisher.events().await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        PaymentEvent::PaymentCompleted {
            order_id: event_order,
            payment_id,
            saga_id,
            amount,
            ..
        } => {
            assert_eq!(*event_order, order_id);
            assert_eq!(payment_id, "pay_123");
            assert_eq!(saga_id, &payment.saga_id);
            assert_eq!(*amount, dec!(5000));
        }
        other => unreachable!("expected PaymentCompleted, got {:?}", other),
    }
}

#[tokio::test]
async fn webhook_replay_within_lock_ttl_reports_in_progress() {
    let app = TestApp::with_lock_ttl(Duration::from_secs(30)).await;
    app.service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap();

    let body = webhook_body("pay_123", "success", 5000);
    app.service
        .handle_webhook(PaymentGatewayKind::Paystack, &body, Some("sig"))
        .await
        .unwrap();

    // The lock is released only by TTL expiry, so an immediate replay is
    // reported as contended, with no state change and no new event.
    let err = app
        .service
        .handle_webhook(PaymentGatewayKind::Paystack, &body, Some("sig"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::LockContended(_)));

    let payment = app.service.get_by_payment_id("pay_123").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(app.publisher.events().await.len(), 1);
}

#[tokio::test]
async fn webhook_replay_after_lock_expiry_is_idempotent() {
    let app = TestApp::new().await;
    app.service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap();

    let body = webhook_body("pay_123", "success", 5000);
    app.service
        .handle_webhook(PaymentGatewayKind::Paystack, &body, Some("sig"))
        .await
        .unwrap();
    let paid_at_first = app
        .service
        .get_by_payment_id("pay_123")
        .await
        .unwrap()
        .paid_at;

    tokio::time::sleep(Duration::from_millis(250)).await;
    let outcome = app
        .service
        .handle_webhook(PaymentGatewayKind::Paystack, &body, Some("sig"))
        .await
        .unwrap();

    let payment = match outcome {
        WebhookOutcome::AlreadyProcessed(payment) => payment,
        other => unreachable!("expected AlreadyProcessed, got {:?}", other),
    };
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.paid_at, paid_at_first);
    // Exactly one transition, exactly one completion event.
    assert_eq!(app.publisher.events().await.len(), 1);
}

#[tokio::test]
async fn underreported_amount_fails_the_payment() {
    let app = TestApp::new().await;
    app.service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap();

    let outcome = app
        .service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_123", "success", 4000),
            Some("sig"),
        )
        .await
        .unwrap();

    let payment = match outcome {
        WebhookOutcome::Failed(payment) => payment,
        other => unreachable!("expected Failed, got {:?}", other),
    };
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert!(payment.failed_at.is_some());

    let events = app.publisher.events().await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        PaymentEvent::PaymentFailed { reason, .. } => {
            assert!(reason.contains("amount mismatch"));
        }
        other => unreachable!("expected PaymentFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn failed_webhook_marks_the_payment_failed() {
    let app = TestApp::new().await;
    app.service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap();

    let outcome = app
        .service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_123", "failed", 5000),
            Some("sig"),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, WebhookOutcome::Failed(_)));
    let payment = app.service.get_by_payment_id("pay_123").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(app.publisher.events().await.len(), 1);
}

#[tokio::test]
async fn pending_webhook_only_patches_metadata() {
    let app = TestApp::new().await;
    app.service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap();

    let outcome = app
        .service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_123", "processing", 5000),
            Some("sig"),
        )
        .await
        .unwrap();

    let payment = match outcome {
        WebhookOutcome::PendingUpdate(payment) => payment,
        other => unreachable!("expected PendingUpdate, got {:?}", other),
    };
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.version, 2);
    assert_eq!(payment.metadata["last_webhook"]["status"], "processing");
    assert!(app.publisher.events().await.is_empty());
}

#[tokio::test]
async fn unknown_transaction_reference_is_a_hard_error() {
    let app = TestApp::new().await;
    let err = app
        .service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_ghost", "success", 5000),
            Some("sig"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn invalid_signature_rejects_without_state_change() {
    let app = TestApp::new().await;
    app.service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap();
    app.gateway.set_verification(Some(false));

    let err = app
        .service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_123", "success", 5000),
            Some("bad-sig"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::WebhookRejected(_)));
    let payment = app.service.get_by_payment_id("pay_123").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(app.publisher.events().await.is_empty());
}

#[tokio::test]
async fn unverifiable_gateways_are_accepted_with_a_warning() {
    let app = TestApp::new().await;
    app.service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap();
    app.gateway.set_verification(None);

    let outcome = app
        .service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_123", "success", 5000),
            None,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Confirmed(_)));
}

#[tokio::test]
async fn concurrent_confirmations_transition_once() {
    let app = TestApp::new().await;
    app.service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        app.service
            .confirm_payment("pay_123", serde_json::json!({ "source": "a" })),
        app.service
            .confirm_payment("pay_123", serde_json::json!({ "source": "b" })),
    );
    assert_eq!(a.unwrap().status, PaymentStatus::Success);
    assert_eq!(b.unwrap().status, PaymentStatus::Success);

    // One transition, one event, regardless of which caller won.
    assert_eq!(app.publisher.events().await.len(), 1);
}

#[tokio::test]
async fn refund_succeeds_after_confirmation() {
    let app = TestApp::new().await;
    let order_id = Uuid::new_v4();
    app.service
        .initialize_payment(initialize_request(order_id, dec!(5000)))
        .await
        .unwrap();
    app.service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_123", "success", 5000),
            Some("sig"),
        )
        .await
        .unwrap();

    let refunded = app
        .service
        .refund_payment(
            "pay_123",
            RefundPaymentRequest {
                amount: Some(dec!(2000)),
                reason: Some("customer request".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert!(refunded.refunded_at.is_some());
    assert_eq!(refunded.metadata["refund_response"]["refund_reference"], "rf_1");
    assert_eq!(app.gateway.refund_calls.load(Ordering::SeqCst), 1);

    let events = app.publisher.events().await;
    assert_eq!(events.len(), 2);
    match &events[1] {
        PaymentEvent::PaymentRefunded {
            order_id: event_order,
            original_payment_id,
            refund_amount,
            reason,
            ..
        } => {
            assert_eq!(*event_order, order_id);
            assert_eq!(original_payment_id, "pay_123");
            assert_eq!(*refund_amount, dec!(2000));
            assert_eq!(reason.as_deref(), Some("customer request"));
        }
        other => unreachable!("expected PaymentRefunded, got {:?}", other),
    }
}

#[tokio::test]
async fn refund_requires_a_successful_payment() {
    let app = TestApp::new().await;
    app.service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap();

    let err = app
        .service
        .refund_payment("pay_123", RefundPaymentRequest::default())
        .await
        .unwrap_err();

    assert!(err
        .to_string()
        .contains("only successful payments can be refunded"));
    assert_eq!(app.gateway.refund_calls.load(Ordering::SeqCst), 0);
    let payment = app.service.get_by_payment_id("pay_123").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn refund_is_refused_when_the_gateway_lacks_support() {
    let app = TestApp::new().await;
    app.service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap();
    app.service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_123", "success", 5000),
            Some("sig"),
        )
        .await
        .unwrap();
    app.gateway.refunds_supported.store(false, Ordering::SeqCst);

    let err = app
        .service
        .refund_payment("pay_123", RefundPaymentRequest::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("refund not supported"));
    assert_eq!(app.gateway.refund_calls.load(Ordering::SeqCst), 0);
    let payment = app.service.get_by_payment_id("pay_123").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
}

#[tokio::test]
async fn refund_cannot_exceed_the_captured_amount() {
    let app = TestApp::new().await;
    app.service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap();
    app.service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_123", "success", 5000),
            Some("sig"),
        )
        .await
        .unwrap();

    let err = app
        .service
        .refund_payment(
            "pay_123",
            RefundPaymentRequest {
                amount: Some(dec!(9000)),
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exceeds captured amount"));
    assert_eq!(app.gateway.refund_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn terminal_status_never_flips_to_another_terminal() {
    let app = TestApp::new().await;
    app.service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap();
    app.service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_123", "success", 5000),
            Some("sig"),
        )
        .await
        .unwrap();

    // A contradictory failed report after success is rejected, not applied.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let err = app
        .service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_123", "failed", 5000),
            Some("sig"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));

    let payment = app.service.get_by_payment_id("pay_123").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(app.publisher.events().await.len(), 1);
}

#[tokio::test]
async fn cancelled_payments_cannot_be_confirmed() {
    let app = TestApp::new().await;
    app.service
        .initialize_payment(initialize_request(Uuid::new_v4(), dec!(5000)))
        .await
        .unwrap();

    let cancelled = app.service.cancel_payment("pay_123").await.unwrap();
    assert_eq!(cancelled.status, PaymentStatus::Cancelled);

    let err = app
        .service
        .confirm_payment("pay_123", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));

    let payment = app.service.get_by_payment_id("pay_123").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Cancelled);
}

#[tokio::test]
async fn list_and_stats_reflect_store_activity() {
    let app = TestApp::new().await;
    let store_id = Uuid::new_v4();

    let mut req = initialize_request(Uuid::new_v4(), dec!(5000));
    req.store_id = Some(store_id);
    app.service.initialize_payment(req).await.unwrap();
    app.service
        .handle_webhook(
            PaymentGatewayKind::Paystack,
            &webhook_body("pay_123", "success", 5000),
            Some("sig"),
        )
        .await
        .unwrap();

    app.gateway.set_charge_outcome(ChargeOutcome {
        success: true,
        message: "ok".to_string(),
        transaction_id: Some("pay_456".to_string()),
        redirect_url: Some("https://pay/456".to_string()),
    });
    let mut req = initialize_request(Uuid::new_v4(), dec!(1200));
    req.store_id = Some(store_id);
    app.service.initialize_payment(req).await.unwrap();

    let filter = payments_api::repositories::PaymentFilter {
        store_id: Some(store_id),
        ..Default::default()
    };
    let (items, total) = app.service.list_payments(&filter, 1, 20).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(items.len(), 2);

    let stats = app.service.store_stats(store_id, None, None).await.unwrap();
    assert_eq!(stats.total_count, 2);
    let success = stats
        .by_status
        .iter()
        .find(|b| b.status == PaymentStatus::Success)
        .expect("success bucket present");
    assert_eq!(success.count, 1);
    assert_eq!(success.amount, dec!(5000));
    let pending = stats
        .by_status
        .iter()
        .find(|b| b.status == PaymentStatus::Pending)
        .expect("pending bucket present");
    assert_eq!(pending.count, 1);
}

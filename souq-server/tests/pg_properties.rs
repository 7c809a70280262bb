//! PostgreSQL 集成测试
//!
//! 需要可用的 PostgreSQL 实例（DATABASE_URL），默认 ignore：
//!
//! ```text
//! DATABASE_URL=postgres://localhost/souq_test cargo test -- --ignored
//! ```
//!
//! 所有实体用雪花 ID，测试之间不共享行，无需清库。

use rust_decimal::Decimal;
use shared::error::ErrorCode;
use shared::message::Channel;
use shared::order::{Offer, OfferStatus, OrderStatus, OrderType, PaymentMethod, PaymentStatus};
use shared::util::{now_millis, snowflake_id};
use sqlx::PgPool;
use souq_server::error::ServiceError;
use souq_server::hub::NotificationHub;
use souq_server::orders::store::{CartItemRequest, CartOrderRequest};
use souq_server::orders::{OrderLifecycle, OrderStore, SubmitOutcome};
use souq_server::db;

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for pg tests");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!().run(&pool).await.expect("run migrations");
    pool
}

fn store(pool: &PgPool) -> OrderStore {
    OrderStore::new(pool.clone(), 10, Decimal::new(250, 2), 6)
}

fn lifecycle(pool: &PgPool) -> OrderLifecycle {
    OrderLifecycle::new(pool.clone(), NotificationHub::local(16))
}

async fn seed_offer(pool: &PgPool, quantity: i32, unit_price: Decimal) -> Offer {
    let now = now_millis();
    let offer = Offer {
        id: snowflake_id(),
        store_id: snowflake_id(),
        quantity,
        status: OfferStatus::Active.derive(quantity),
        unit_price,
        created_at: now,
        updated_at: now,
    };
    db::offers::insert(pool, &offer).await.expect("seed offer");
    offer
}

fn cart(offer: &Offer, quantity: i32) -> CartOrderRequest {
    CartOrderRequest {
        store_id: offer.store_id,
        items: vec![CartItemRequest {
            offer_id: offer.id,
            quantity,
        }],
        order_type: OrderType::Pickup,
        payment_method: PaymentMethod::Cash,
        delivery_address: None,
    }
}

fn app_code(err: &ServiceError) -> Option<ErrorCode> {
    match err {
        ServiceError::App(e) => Some(e.code),
        ServiceError::Db(_) => None,
    }
}

#[tokio::test]
#[ignore]
async fn last_unit_sells_exactly_once() {
    let pool = test_pool().await;
    let offer = seed_offer(&pool, 1, Decimal::new(500, 2)).await;
    let store = store(&pool);

    let a = store.create_booking(snowflake_id(), offer.id, 1, PaymentMethod::Cash, None);
    let b = store.create_booking(snowflake_id(), offer.id, 1, PaymentMethod::Cash, None);
    let (ra, rb) = tokio::join!(a, b);

    let successes = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one buyer may win the last unit");
    let loser = if ra.is_err() { ra } else { rb };
    assert_eq!(
        app_code(&loser.unwrap_err()),
        Some(ErrorCode::InsufficientStock)
    );

    let after = db::offers::get(&pool, offer.id).await.unwrap().unwrap();
    assert_eq!(after.quantity, 0);
    assert_eq!(after.status, OfferStatus::OutOfStock);
}

#[tokio::test]
#[ignore]
async fn exhausted_offer_reports_insufficient_stock_not_inactive() {
    let pool = test_pool().await;
    // quantity 0 的行派生为 out_of_stock
    let offer = seed_offer(&pool, 0, Decimal::new(500, 2)).await;
    assert_eq!(offer.status, OfferStatus::OutOfStock);
    let store = store(&pool);

    let err = store
        .create_booking(snowflake_id(), offer.id, 1, PaymentMethod::Cash, None)
        .await
        .unwrap_err();
    assert_eq!(app_code(&err), Some(ErrorCode::InsufficientStock));
}

#[tokio::test]
#[ignore]
async fn deactivated_offer_rejected_even_with_stock() {
    let pool = test_pool().await;
    let now = now_millis();
    let offer = Offer {
        id: snowflake_id(),
        store_id: snowflake_id(),
        quantity: 5,
        status: OfferStatus::Inactive,
        unit_price: Decimal::new(500, 2),
        created_at: now,
        updated_at: now,
    };
    db::offers::insert(&pool, &offer).await.unwrap();
    let store = store(&pool);

    let err = store
        .create_booking(snowflake_id(), offer.id, 1, PaymentMethod::Cash, None)
        .await
        .unwrap_err();
    assert_eq!(app_code(&err), Some(ErrorCode::OfferInactive));
}

/// 提交直到落定：占位竞争的败者在 in_progress 上退避重试
async fn submit_until_settled(
    store: &OrderStore,
    user_id: i64,
    key: &str,
    request: CartOrderRequest,
) -> SubmitOutcome {
    loop {
        match store
            .submit_cart_order(user_id, Some(key), request.clone())
            .await
        {
            Ok(outcome) => return outcome,
            Err(e) if app_code(&e) == Some(ErrorCode::IdempotencyInProgress) => {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            Err(e) => panic!("unexpected submission error: {e}"),
        }
    }
}

#[tokio::test]
#[ignore]
async fn simultaneous_identical_submissions_converge_on_one_order() {
    let pool = test_pool().await;
    let offer = seed_offer(&pool, 10, Decimal::new(300, 2)).await;
    let store = store(&pool);
    let user_id = snowflake_id();
    let key = format!("test-{}", snowflake_id());

    let (a, b, c) = tokio::join!(
        submit_until_settled(&store, user_id, &key, cart(&offer, 2)),
        submit_until_settled(&store, user_id, &key, cart(&offer, 2)),
        submit_until_settled(&store, user_id, &key, cart(&offer, 2)),
    );

    fn settled_order_id(outcome: &SubmitOutcome) -> i64 {
        match outcome {
            SubmitOutcome::Created(order) => order.id,
            SubmitOutcome::Replayed { body, .. } => body["id"].as_i64().expect("cached order id"),
        }
    }
    let ids = [settled_order_id(&a), settled_order_id(&b), settled_order_id(&c)];
    assert_eq!(ids[0], ids[1], "all submitters must see the same order");
    assert_eq!(ids[1], ids[2], "all submitters must see the same order");

    let created = [&a, &b, &c]
        .into_iter()
        .filter(|o| matches!(o, SubmitOutcome::Created(_)))
        .count();
    assert_eq!(created, 1, "exactly one submission may create");

    // 一个订单、一次扣减
    let orders = store.list_for_user(user_id).await.unwrap();
    assert_eq!(orders.len(), 1);
    let after = db::offers::get(&pool, offer.id).await.unwrap().unwrap();
    assert_eq!(after.quantity, 8);
}

#[tokio::test]
#[ignore]
async fn repeated_submission_creates_one_order() {
    let pool = test_pool().await;
    let offer = seed_offer(&pool, 10, Decimal::new(300, 2)).await;
    let store = store(&pool);
    let user_id = snowflake_id();
    let key = format!("test-{}", snowflake_id());

    let first = store
        .submit_cart_order(user_id, Some(&key), cart(&offer, 2))
        .await
        .unwrap();
    let SubmitOutcome::Created(order) = first else {
        panic!("first submission must create")
    };

    for _ in 0..2 {
        let replay = store
            .submit_cart_order(user_id, Some(&key), cart(&offer, 2))
            .await
            .unwrap();
        let SubmitOutcome::Replayed { status, body } = replay else {
            panic!("repeat submission must replay")
        };
        assert_eq!(status, 201);
        assert_eq!(body["id"], serde_json::json!(order.id));
    }

    // 只扣了一次库存
    let after = db::offers::get(&pool, offer.id).await.unwrap().unwrap();
    assert_eq!(after.quantity, 8);
}

#[tokio::test]
#[ignore]
async fn reused_key_with_different_payload_conflicts() {
    let pool = test_pool().await;
    let offer = seed_offer(&pool, 10, Decimal::new(300, 2)).await;
    let store = store(&pool);
    let user_id = snowflake_id();
    let key = format!("test-{}", snowflake_id());

    store
        .submit_cart_order(user_id, Some(&key), cart(&offer, 1))
        .await
        .unwrap();
    let err = store
        .submit_cart_order(user_id, Some(&key), cart(&offer, 3))
        .await
        .unwrap_err();
    assert_eq!(app_code(&err), Some(ErrorCode::IdempotencyConflict));
}

#[tokio::test]
#[ignore]
async fn failed_creation_frees_the_key_for_retry() {
    let pool = test_pool().await;
    let offer = seed_offer(&pool, 1, Decimal::new(300, 2)).await;
    let store = store(&pool);
    let user_id = snowflake_id();
    let key = format!("test-{}", snowflake_id());

    // 库存不足，创建失败，占位被清理
    let err = store
        .submit_cart_order(user_id, Some(&key), cart(&offer, 5))
        .await
        .unwrap_err();
    assert_eq!(app_code(&err), Some(ErrorCode::InsufficientStock));

    // 同一 key 重试修正后的载荷可以成功
    let outcome = store
        .submit_cart_order(user_id, Some(&key), cart(&offer, 1))
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Created(_)));
}

#[tokio::test]
#[ignore]
async fn cancel_restores_stock_and_voids_payment() {
    let pool = test_pool().await;
    let offer = seed_offer(&pool, 5, Decimal::new(400, 2)).await;
    let store = store(&pool);
    let lifecycle = lifecycle(&pool);
    let user_id = snowflake_id();

    let order = store
        .create_booking(user_id, offer.id, 3, PaymentMethod::Card, None)
        .await
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::AwaitingProof);
    let mid = db::offers::get(&pool, offer.id).await.unwrap().unwrap();
    assert_eq!(mid.quantity, 2);

    let cancelled = lifecycle.cancel(order.id, user_id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Voided);

    let after = db::offers::get(&pool, offer.id).await.unwrap().unwrap();
    assert_eq!(after.quantity, 5);
    assert_eq!(after.status, OfferStatus::Active);
}

#[tokio::test]
#[ignore]
async fn reject_releases_stock_like_cancel() {
    let pool = test_pool().await;
    let offer = seed_offer(&pool, 2, Decimal::new(400, 2)).await;
    let store = store(&pool);
    let lifecycle = lifecycle(&pool);

    let order = store
        .create_booking(snowflake_id(), offer.id, 2, PaymentMethod::Cash, None)
        .await
        .unwrap();
    // 2 -> 0 让 offer 进入 out_of_stock，拒单后必须恢复 active
    assert_eq!(
        db::offers::get(&pool, offer.id).await.unwrap().unwrap().status,
        OfferStatus::OutOfStock
    );

    let rejected = lifecycle.reject(order.id, order.store_id).await.unwrap();
    assert_eq!(rejected.status, OrderStatus::Rejected);

    let after = db::offers::get(&pool, offer.id).await.unwrap().unwrap();
    assert_eq!(after.quantity, 2);
    assert_eq!(after.status, OfferStatus::Active);
}

#[tokio::test]
#[ignore]
async fn confirmed_payment_survives_cancellation() {
    let pool = test_pool().await;
    let offer = seed_offer(&pool, 5, Decimal::new(400, 2)).await;
    let store = store(&pool);
    let lifecycle = lifecycle(&pool);
    let user_id = snowflake_id();

    let order = store
        .create_booking(user_id, offer.id, 1, PaymentMethod::BankTransfer, None)
        .await
        .unwrap();
    let paid = lifecycle.mark_paid(order.id, order.store_id).await.unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);

    // 已收款订单取消后支付状态不作废（退款由对账流程处理）
    let cancelled = lifecycle.cancel(order.id, user_id).await.unwrap();
    assert_eq!(cancelled.payment_status, PaymentStatus::Paid);

    // 二次确认被拒
    let err = lifecycle.mark_paid(order.id, order.store_id).await.unwrap_err();
    assert!(app_code(&err).is_some());
}

#[tokio::test]
#[ignore]
async fn terminal_orders_refuse_further_transitions() {
    let pool = test_pool().await;
    let offer = seed_offer(&pool, 5, Decimal::new(400, 2)).await;
    let store = store(&pool);
    let lifecycle = lifecycle(&pool);
    let user_id = snowflake_id();

    let order = store
        .create_booking(user_id, offer.id, 1, PaymentMethod::Cash, None)
        .await
        .unwrap();
    lifecycle.cancel(order.id, user_id).await.unwrap();

    let err = lifecycle.confirm(order.id, order.store_id).await.unwrap_err();
    assert_eq!(app_code(&err), Some(ErrorCode::OrderTerminal));

    // 库存只回补一次
    let err = lifecycle.cancel(order.id, user_id).await.unwrap_err();
    assert_eq!(app_code(&err), Some(ErrorCode::OrderTerminal));
    let after = db::offers::get(&pool, offer.id).await.unwrap().unwrap();
    assert_eq!(after.quantity, 5);
}

#[tokio::test]
#[ignore]
async fn pickup_path_skips_delivering() {
    let pool = test_pool().await;
    let offer = seed_offer(&pool, 5, Decimal::new(400, 2)).await;
    let store = store(&pool);
    let lifecycle = lifecycle(&pool);

    let order = store
        .create_booking(snowflake_id(), offer.id, 1, PaymentMethod::Cash, None)
        .await
        .unwrap();
    assert!(order.pickup_code.is_some());

    lifecycle.confirm(order.id, order.store_id).await.unwrap();
    lifecycle.mark_ready(order.id, order.store_id).await.unwrap();

    let err = lifecycle
        .start_delivery(order.id, order.store_id)
        .await
        .unwrap_err();
    assert_eq!(app_code(&err), Some(ErrorCode::InvalidTransition));

    let done = lifecycle.complete(order.id, order.store_id).await.unwrap();
    assert_eq!(done.status, OrderStatus::Completed);
}

#[tokio::test]
#[ignore]
async fn booking_limit_blocks_the_eleventh_order() {
    let pool = test_pool().await;
    let offer = seed_offer(&pool, 100, Decimal::new(100, 2)).await;
    let store = store(&pool);
    let user_id = snowflake_id();

    for _ in 0..10 {
        store
            .create_booking(user_id, offer.id, 1, PaymentMethod::Cash, None)
            .await
            .unwrap();
    }
    let err = store
        .create_booking(user_id, offer.id, 1, PaymentMethod::Cash, None)
        .await
        .unwrap_err();
    assert_eq!(app_code(&err), Some(ErrorCode::BookingLimit));
}

#[tokio::test]
#[ignore]
async fn lifecycle_notifications_reach_subscribers() {
    let pool = test_pool().await;
    let offer = seed_offer(&pool, 5, Decimal::new(400, 2)).await;
    let store = store(&pool);
    let hub = NotificationHub::local(16);
    let lifecycle = OrderLifecycle::new(pool.clone(), hub.clone());
    let user_id = snowflake_id();

    let order = store
        .create_booking(user_id, offer.id, 1, PaymentMethod::Cash, None)
        .await
        .unwrap();
    let mut user_rx = hub.subscribe(&Channel::User(user_id));
    let mut store_rx = hub.subscribe(&Channel::Store(order.store_id));

    lifecycle.confirm(order.id, order.store_id).await.unwrap();
    let accepted = tokio::time::timeout(std::time::Duration::from_secs(1), user_rx.recv())
        .await
        .expect("confirm must notify the customer")
        .unwrap();
    assert_eq!(
        accepted.kind,
        shared::message::NotificationKind::OrderAccepted
    );

    // 取货就绪通知带取货码
    lifecycle.mark_ready(order.id, order.store_id).await.unwrap();
    let ready = tokio::time::timeout(std::time::Duration::from_secs(1), user_rx.recv())
        .await
        .expect("ready must notify pickup customers")
        .unwrap();
    assert_eq!(
        ready.data.unwrap()["pickup_code"],
        serde_json::json!(order.pickup_code)
    );
    assert!(store_rx.try_recv().is_err(), "seller actions do not echo back");
}

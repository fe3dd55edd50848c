mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::{line, voucher, ChargeOutcome, TestApp, SHIPPING_FEE};
use storefront_checkout::{
    entities::{
        order::{OrderStatus, PaymentMethod, PaymentStatus},
        voucher::DiscountType,
    },
    errors::{PaymentError, ServiceError, StockError, VoucherError},
    services::CheckoutRequest,
};
use sea_orm::TransactionTrait;
use uuid::Uuid;

fn request(
    lines: Vec<storefront_checkout::models::CartLine>,
    code: Option<&str>,
    method: PaymentMethod,
) -> CheckoutRequest {
    CheckoutRequest {
        user_id: Uuid::new_v4(),
        lines,
        voucher_code: code.map(str::to_string),
        payment_method: method,
        country: "VN".to_string(),
    }
}

#[tokio::test]
async fn percentage_voucher_discounts_ten_percent() {
    let app = TestApp::new().await;
    let shirt = app.seed_product("Shirt", "tops", 5).await;
    let save10 = app
        .seed_voucher(voucher("SAVE10", DiscountType::Percentage, 10))
        .await;

    let order = app
        .processor()
        .checkout(request(
            vec![line(shirt.id, 100_000, 2)],
            Some("save10"),
            PaymentMethod::Card,
        ))
        .await
        .unwrap();

    assert_eq!(order.subtotal, 200_000);
    assert_eq!(order.discount_amount, 20_000);
    assert_eq!(order.shipping_fee, SHIPPING_FEE);
    assert_eq!(
        order.total,
        order.subtotal + order.shipping_fee - order.discount_amount
    );
    assert_eq!(order.voucher_id, Some(save10.id));
    assert_eq!(order.payment_status, PaymentStatus::Paid);

    let charges = app.gateway.charges();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].amount, order.total);

    let after = app.processor().products().find(shirt.id).await.unwrap().unwrap();
    assert_eq!(after.stock_quantity, 3);
    assert_eq!(after.purchase_count, 2);

    let redeemed = app
        .processor()
        .vouchers()
        .find_by_id(save10.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(redeemed.usage_count, 1);
}

#[tokio::test]
async fn percentage_discount_is_capped() {
    let app = TestApp::new().await;
    let coat = app.seed_product("Coat", "outerwear", 5).await;
    let mut cap = voucher("CAP15K", DiscountType::Percentage, 10);
    cap.max_discount = Some(15_000);
    app.seed_voucher(cap).await;

    let order = app
        .processor()
        .checkout(request(
            vec![line(coat.id, 250_000, 2)],
            Some("CAP15K"),
            PaymentMethod::CashOnDelivery,
        ))
        .await
        .unwrap();

    assert_eq!(order.subtotal, 500_000);
    assert_eq!(order.discount_amount, 15_000);
    assert_eq!(order.total, 500_000 + SHIPPING_FEE - 15_000);
}

#[tokio::test]
async fn fixed_discount_never_exceeds_subtotal() {
    let app = TestApp::new().await;
    let socks = app.seed_product("Socks", "accessories", 10).await;
    app.seed_voucher(voucher("FLAT50K", DiscountType::Fixed, 50_000))
        .await;

    let order = app
        .processor()
        .checkout(request(
            vec![line(socks.id, 30_000, 1)],
            Some("FLAT50K"),
            PaymentMethod::CashOnDelivery,
        ))
        .await
        .unwrap();

    assert_eq!(order.discount_amount, 30_000);
    assert_eq!(order.total, SHIPPING_FEE);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(app.gateway.charges().is_empty());
}

#[tokio::test]
async fn below_minimum_leaves_everything_untouched() {
    let app = TestApp::new().await;
    let cap = app.seed_product("Cap", "hats", 4).await;
    let mut min = voucher("MIN100K", DiscountType::Fixed, 10_000);
    min.min_purchase = Some(100_000);
    app.seed_voucher(min).await;

    let err = app
        .processor()
        .checkout(request(
            vec![line(cap.id, 50_000, 1)],
            Some("MIN100K"),
            PaymentMethod::Card,
        ))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ServiceError::Voucher(VoucherError::BelowMinimum {
            minimum: 100_000,
            subtotal: 50_000
        })
    );
    assert!(app.orders().await.is_empty());
    assert!(app.gateway.charges().is_empty());
    assert_eq!(app.stock_of(cap.id).await, 4);
}

#[tokio::test]
async fn exhausted_voucher_is_rejected() {
    let app = TestApp::new().await;
    let bag = app.seed_product("Bag", "bags", 4).await;
    let mut once = voucher("ONCE", DiscountType::Fixed, 10_000);
    once.usage_limit = Some(1);
    once.usage_count = 1;
    app.seed_voucher(once).await;

    let err = app
        .processor()
        .checkout(request(
            vec![line(bag.id, 50_000, 1)],
            Some("ONCE"),
            PaymentMethod::CashOnDelivery,
        ))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::Voucher(VoucherError::LimitReached));
    assert!(app.orders().await.is_empty());
}

#[tokio::test]
async fn stock_shortfall_cancels_and_refunds() {
    let app = TestApp::new().await;
    let boots = app.seed_product("Boots", "shoes", 2).await;

    let err = app
        .processor()
        .checkout(request(
            vec![line(boots.id, 100_000, 3)],
            None,
            PaymentMethod::Card,
        ))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ServiceError::Stock(StockError::InsufficientStock {
            requested: 3,
            available: 2,
            ..
        })
    );
    assert_eq!(app.stock_of(boots.id).await, 2);

    let orders = app.orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Cancelled);
    assert_eq!(orders[0].payment_status, PaymentStatus::Refunded);

    let refunds = app.gateway.refunds();
    assert_eq!(refunds, vec![("ch_1".to_string(), orders[0].total)]);
}

#[tokio::test]
async fn partial_reservation_is_released() {
    let app = TestApp::new().await;
    let plenty = app.seed_product("Plenty", "x", 5).await;
    let scarce = app.seed_product("Scarce", "x", 1).await;

    let err = app
        .processor()
        .checkout(request(
            vec![line(plenty.id, 10_000, 3), line(scarce.id, 10_000, 2)],
            None,
            PaymentMethod::CashOnDelivery,
        ))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ServiceError::Stock(StockError::InsufficientStock { product_id, .. }) if product_id == scarce.id
    );
    assert_eq!(app.stock_of(plenty.id).await, 5);
    assert_eq!(app.stock_of(scarce.id).await, 1);

    let orders = app.orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Cancelled);
    assert_eq!(orders[0].payment_status, PaymentStatus::Pending);
    assert!(app.gateway.refunds().is_empty());
}

#[tokio::test]
async fn voucher_lost_at_commit_is_compensated() {
    let app = TestApp::new().await;
    let mug = app.seed_product("Mug", "kitchen", 10).await;
    let mut last = voucher("LASTONE", DiscountType::Fixed, 5_000);
    last.usage_limit = Some(1);
    app.seed_voucher(last).await;

    // The card checkout validates first, then stalls on the gateway while a
    // cash checkout takes the only redemption.
    app.gateway.set_delay(Duration::from_millis(500));
    let slow = {
        let processor = app.state.processor.clone();
        let req = request(
            vec![line(mug.id, 20_000, 1)],
            Some("LASTONE"),
            PaymentMethod::Card,
        );
        tokio::spawn(async move { processor.checkout(req).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    app.processor()
        .checkout(request(
            vec![line(mug.id, 20_000, 1)],
            Some("LASTONE"),
            PaymentMethod::CashOnDelivery,
        ))
        .await
        .unwrap();

    let err = slow.await.unwrap().unwrap_err();
    assert_matches!(err, ServiceError::Voucher(VoucherError::LimitReached));

    assert_eq!(app.stock_of(mug.id).await, 9);
    assert_eq!(app.gateway.refunds().len(), 1);

    let cancelled: Vec<_> = app
        .orders()
        .await
        .into_iter()
        .filter(|o| o.status == OrderStatus::Cancelled)
        .collect();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].payment_status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn abandoned_card_checkout_still_places_the_order() {
    let app = TestApp::new().await;
    let vase = app.seed_product("Vase", "home", 4).await;
    app.gateway.set_delay(Duration::from_millis(300));

    let caller = {
        let processor = app.state.processor.clone();
        let req = request(vec![line(vase.id, 50_000, 2)], None, PaymentMethod::Card);
        tokio::spawn(async move { processor.checkout(req).await })
    };
    while app.gateway.charges().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The client goes away while the provider is still confirming the charge.
    caller.abort();
    assert!(caller.await.unwrap_err().is_cancelled());

    let mut settled = false;
    for _ in 0..100 {
        if app.stock_of(vase.id).await == 2 && app.orders().await.len() == 1 {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(settled, "captured charge did not end as an order");

    let orders = app.orders().await;
    assert_eq!(orders[0].status, OrderStatus::Pending);
    assert_eq!(orders[0].payment_status, PaymentStatus::Paid);
    assert_eq!(orders[0].payment_reference.as_deref(), Some("ch_1"));
    assert_eq!(app.gateway.charges().len(), 1);
    assert!(app.gateway.refunds().is_empty());
}

#[tokio::test]
async fn abandoned_checkout_after_persisting_still_rolls_back() {
    let app = TestApp::new().await;
    let mut lines = Vec::new();
    let mut products = Vec::new();
    for i in 0..12 {
        let p = app.seed_product(&format!("Item {i}"), "x", 5).await;
        lines.push(line(p.id, 10_000, 1));
        products.push(p.id);
    }
    // The last line cannot be served, so the commit must compensate.
    let scarce = app.seed_product("Scarce", "x", 1).await;
    lines.push(line(scarce.id, 10_000, 3));

    let caller = {
        let processor = app.state.processor.clone();
        let req = request(lines, None, PaymentMethod::Card);
        tokio::spawn(async move { processor.checkout(req).await })
    };

    // Wait for the order row, then hold the only connection so the commit
    // stalls mid-way while the caller walks away.
    while app.orders().await.is_empty() {
        tokio::task::yield_now().await;
    }
    let hold = app.state.db.begin().await.unwrap();
    caller.abort();
    let _ = caller.await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    hold.rollback().await.unwrap();

    let mut settled = false;
    for _ in 0..100 {
        let orders = app.orders().await;
        if orders[0].status == OrderStatus::Cancelled {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(settled, "abandoned checkout left its order pending");

    for id in products {
        assert_eq!(app.stock_of(id).await, 5);
    }
    assert_eq!(app.stock_of(scarce.id).await, 1);

    let orders = app.orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payment_status, PaymentStatus::Refunded);
    assert_eq!(app.gateway.refunds(), vec![("ch_1".to_string(), orders[0].total)]);
}

#[tokio::test]
async fn payment_timeout_creates_no_order() {
    let app = TestApp::with_payment_timeout(Duration::from_millis(100)).await;
    let lamp = app.seed_product("Lamp", "home", 3).await;
    app.gateway.set_delay(Duration::from_secs(2));

    let err = app
        .processor()
        .checkout(request(
            vec![line(lamp.id, 40_000, 1)],
            None,
            PaymentMethod::Card,
        ))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::Payment(PaymentError::Timeout));
    assert!(app.orders().await.is_empty());
    assert_eq!(app.stock_of(lamp.id).await, 3);
}

#[tokio::test]
async fn declined_and_unconfirmed_payments_abort() {
    let app = TestApp::new().await;
    let pen = app.seed_product("Pen", "office", 3).await;

    app.gateway
        .set_outcome(ChargeOutcome::Decline("card expired".into()));
    let err = app
        .processor()
        .checkout(request(vec![line(pen.id, 5_000, 1)], None, PaymentMethod::Card))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Payment(PaymentError::Declined(msg)) if msg == "card expired");

    app.gateway.set_outcome(ChargeOutcome::NoReference);
    let err = app
        .processor()
        .checkout(request(vec![line(pen.id, 5_000, 1)], None, PaymentMethod::Card))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Payment(PaymentError::Unconfirmed));

    app.gateway.set_outcome(ChargeOutcome::Unavailable);
    let err = app
        .processor()
        .checkout(request(vec![line(pen.id, 5_000, 1)], None, PaymentMethod::Card))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Payment(PaymentError::GatewayUnavailable(_)));

    assert!(app.orders().await.is_empty());
    assert_eq!(app.stock_of(pen.id).await, 3);
}

#[tokio::test]
async fn checkout_flips_the_oldest_claim() {
    let app = TestApp::new().await;
    let hat = app.seed_product("Hat", "hats", 5).await;
    app.seed_voucher(voucher("HATS5", DiscountType::Fixed, 5_000))
        .await;

    let user_id = Uuid::new_v4();
    let vouchers = app.processor().vouchers();
    let first = vouchers
        .claim(user_id, "hats5", chrono::Utc::now() - chrono::Duration::minutes(5))
        .await
        .unwrap();
    vouchers
        .claim(user_id, "HATS5", chrono::Utc::now())
        .await
        .unwrap();

    let mut req = request(
        vec![line(hat.id, 50_000, 1)],
        Some("HATS5"),
        PaymentMethod::CashOnDelivery,
    );
    req.user_id = user_id;
    app.processor().checkout(req).await.unwrap();

    let claims = vouchers.claims_for_user(user_id).await.unwrap();
    assert_eq!(claims.len(), 2);
    let used: Vec<_> = claims.iter().filter(|c| c.is_used).collect();
    assert_eq!(used.len(), 1);
    assert_eq!(used[0].id, first.id);
    assert!(used[0].used_at.is_some());
}

#[tokio::test]
async fn unknown_product_is_rejected_before_payment() {
    let app = TestApp::new().await;

    let err = app
        .processor()
        .checkout(request(
            vec![line(Uuid::new_v4(), 5_000, 1)],
            None,
            PaymentMethod::Card,
        ))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::Stock(StockError::UnknownProduct { .. }));
    assert!(app.gateway.charges().is_empty());
}

#[tokio::test]
async fn completed_checkout_refreshes_trending() {
    let app = TestApp::new().await;
    let tee = app.seed_product("Tee", "tops", 10).await;

    app.processor()
        .checkout(request(
            vec![line(tee.id, 10_000, 2)],
            None,
            PaymentMethod::CashOnDelivery,
        ))
        .await
        .unwrap();

    // The recompute runs in the background.
    let mut flagged = false;
    for _ in 0..50 {
        let trending = app.processor().products().trending().await.unwrap();
        if trending.iter().any(|p| p.id == tee.id) {
            flagged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(flagged);
}

// tests/postgres_tests.rs

//! Runs against the database in `DATABASE_URL`. Skipped when it is unset.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lexis::{
    models::checkout::NewCheckoutSession,
    payments::{BillingPortal, HostedCheckout, PaymentError},
    services::checkout::CheckoutService,
    store::{CheckoutStore, postgres::PgStore},
};
use sqlx::{PgPool, postgres::PgPoolOptions};

const WAIT: Duration = Duration::from_secs(10);

/// Same pool shape as the server.
async fn connect() -> Option<PgStore> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    Some(PgStore::connect(pool).await.expect("listener"))
}

fn uid() -> String {
    format!("uid_{}", uuid::Uuid::new_v4().simple())
}

fn request() -> NewCheckoutSession {
    NewCheckoutSession::subscription("price_1", "a@example.com", "http://localhost:3000/subscription")
}

/// Writes `sessionId` the way the payment extension does.
async fn complete(pool: &PgPool, id: &str, session_id: &str) {
    sqlx::query("UPDATE checkout_sessions SET session_id = $1 WHERE id = $2")
        .bind(session_id)
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn watch_observes_session_id_written_after_attach() {
    let Some(store) = connect().await else { return };
    let uid = uid();
    let id = store.create_session(&uid, &request()).await.unwrap();

    let mut watch = store.watch_session(&uid, &id).await.unwrap();
    let first = watch.next().await.unwrap().unwrap();
    assert_eq!(first.uid, uid);
    assert!(first.session_id.is_none());

    complete(store.pool(), &id, "cs_test_after").await;

    let next = tokio::time::timeout(WAIT, watch.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(next.session_id.as_deref(), Some("cs_test_after"));
}

#[tokio::test]
async fn watch_sees_session_id_written_before_attach() {
    let Some(store) = connect().await else { return };
    let uid = uid();
    let id = store.create_session(&uid, &request()).await.unwrap();
    complete(store.pool(), &id, "cs_test_before").await;

    let mut watch = store.watch_session(&uid, &id).await.unwrap();
    let first = watch.next().await.unwrap().unwrap();
    assert_eq!(first.session_id.as_deref(), Some("cs_test_before"));
}

#[tokio::test]
async fn watch_requires_owner() {
    let Some(store) = connect().await else { return };
    let id = store.create_session(&uid(), &request()).await.unwrap();

    assert!(store.watch_session(&uid(), &id).await.is_err());
    assert_eq!(store.live_watches(&id), 0);
}

#[tokio::test]
async fn open_watches_leave_the_pool_free() {
    let Some(store) = connect().await else { return };

    // More waiting checkouts than the pool has connections.
    let mut watches = Vec::new();
    for _ in 0..8 {
        let uid = uid();
        let id = store.create_session(&uid, &request()).await.unwrap();
        let mut watch = store.watch_session(&uid, &id).await.unwrap();
        watch.next().await.unwrap().unwrap();
        watches.push((id, watch));
    }

    let (one,): (i32,) = sqlx::query_as("SELECT 1").fetch_one(store.pool()).await.unwrap();
    assert_eq!(one, 1);

    for (n, (id, watch)) in watches.iter_mut().enumerate() {
        let session_id = format!("cs_test_{n}");
        complete(store.pool(), id, &session_id).await;
        let doc = tokio::time::timeout(WAIT, watch.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(doc.session_id, Some(session_id));
    }

    let (id, watch) = watches.pop().unwrap();
    assert_eq!(store.live_watches(&id), 1);
    drop(watch);
    assert_eq!(store.live_watches(&id), 0);
}

#[tokio::test]
async fn watch_rereads_row_after_listener_connection_drops() {
    let Some(store) = connect().await else { return };
    let uid = uid();
    let id = store.create_session(&uid, &request()).await.unwrap();

    let mut watch = store.watch_session(&uid, &id).await.unwrap();
    watch.next().await.unwrap().unwrap();

    // Kill the listener, then write while it reconnects.
    let (killed,): (i64,) = sqlx::query_as(
        r#"
        SELECT count(*) FROM (
            SELECT pg_terminate_backend(pid)
            FROM pg_stat_activity
            WHERE datname = current_database()
              AND query LIKE 'LISTEN%'
              AND pid <> pg_backend_pid()
        ) t
        "#,
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert!(killed >= 1);
    complete(store.pool(), &id, "cs_test_gap").await;

    let doc = loop {
        let doc = tokio::time::timeout(WAIT, watch.next()).await.unwrap().unwrap().unwrap();
        if doc.session_id.is_some() {
            break doc;
        }
    };
    assert_eq!(doc.session_id.as_deref(), Some("cs_test_gap"));
}

struct NoPortal;

#[async_trait]
impl BillingPortal for NoPortal {
    async fn create_portal_link(&self, _uid: &str, _return_url: &str) -> Result<String, PaymentError> {
        Err(PaymentError::InvalidSessionId("unused".to_string()))
    }
}

#[tokio::test]
async fn checkout_flow_redirects_once_extension_writes_session_id() {
    let Some(store) = connect().await else { return };
    let store = Arc::new(store);
    let service = CheckoutService::new(
        store.clone(),
        Arc::new(HostedCheckout::new("https://checkout.example.com/pay/").unwrap()),
        Arc::new(NoPortal),
        WAIT,
    );
    let uid = uid();

    // Stand-in for the payment extension: waits for the row, then fills it in.
    let pool = store.pool().clone();
    let extension_uid = uid.clone();
    tokio::spawn(async move {
        loop {
            let row: Option<(String,)> = sqlx::query_as("SELECT id FROM checkout_sessions WHERE uid = $1")
                .bind(&extension_uid)
                .fetch_optional(&pool)
                .await
                .unwrap();
            if let Some((id,)) = row {
                complete(&pool, &id, "cs_test_flow").await;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    let mut flow = service.begin(&uid).unwrap();
    let url = flow
        .checkout("a@example.com", "price_1", "http://localhost:3000/subscription")
        .await
        .unwrap();
    assert_eq!(url, "https://checkout.example.com/pay/cs_test_flow");
}

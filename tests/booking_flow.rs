use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use keyturn::tenant::TenantManager;
use keyturn::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("keyturn_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "keyturn".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect_db(addr: SocketAddr, db: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(db)
        .user("keyturn")
        .password("keyturn");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    connect_db(addr, "test_org").await
}

/// Data rows of a simple query (skipping command-complete frames).
async fn query_rows(
    client: &tokio_postgres::Client,
    sql: &str,
) -> Vec<tokio_postgres::SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn booking_date() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(7)
}

async fn create_open_room(client: &tokio_postgres::Client) -> Ulid {
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, name, min_players, max_players, duration_minutes, base_price_cents) VALUES ('{rid}', 'The Vault', 2, 8, 60, 10000)"
        ))
        .await
        .unwrap();
    let template_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO templates (id, room_id, day_of_week, start_minute, end_minute) VALUES ('{template_id}', '{rid}', NULL, 540, 1320)"
        ))
        .await
        .unwrap();
    rid
}

fn reserve_sql(id: Ulid, rid: Ulid, date: NaiveDate, start: i32) -> String {
    format!(
        "INSERT INTO bookings (id, room_id, booking_date, start_minute, players, customer_name, customer_email) VALUES ('{id}', '{rid}', '{date}', {start}, 4, 'Ada', 'ada@example.com')"
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn connect_and_list_rooms() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let rid = create_open_room(&client).await;

    let rows = query_rows(&client, "SELECT * FROM rooms").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some(rid.to_string().as_str()));
    assert_eq!(rows[0].get(1), Some("The Vault"));
    assert_eq!(rows[0].get(2), Some("active"));
}

#[tokio::test]
async fn reserve_conflict_cancel_rereserve() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_open_room(&client).await;
    let date = booking_date();

    // First reservation wins
    let first = Ulid::new();
    client
        .batch_execute(&reserve_sql(first, rid, date, 600))
        .await
        .unwrap();

    // Overlapping second reservation fails with a conflict
    let second = Ulid::new();
    let err = client
        .batch_execute(&reserve_sql(second, rid, date, 630))
        .await
        .unwrap_err();
    let db_err = err.as_db_error().unwrap();
    assert_eq!(db_err.code().code(), "P0001");
    assert!(db_err.message().contains("capacity_exceeded"));

    // Cancel the first booking
    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'cancelled', cancellation_reason = 'card declined' WHERE id = '{first}'"
        ))
        .await
        .unwrap();

    // The slot is free again
    client
        .batch_execute(&reserve_sql(second, rid, date, 630))
        .await
        .unwrap();

    // Both rows exist; one cancelled, one pending
    let rows = query_rows(
        &client,
        &format!("SELECT * FROM bookings WHERE room_id = '{rid}'"),
    )
    .await;
    assert_eq!(rows.len(), 2);
    let statuses: Vec<_> = rows.iter().map(|r| r.get(8).unwrap().to_string()).collect();
    assert!(statuses.contains(&"cancelled".to_string()));
    assert!(statuses.contains(&"pending".to_string()));
}

#[tokio::test]
async fn deleting_bookings_is_refused() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let id = Ulid::new();
    let err = client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{id}'"))
        .await
        .unwrap_err();
    assert!(
        err.as_db_error()
            .unwrap()
            .message()
            .contains("cancelled via UPDATE")
    );
}

#[tokio::test]
async fn availability_and_slot_check() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_open_room(&client).await;
    let date = booking_date();

    client
        .batch_execute(&reserve_sql(Ulid::new(), rid, date, 600))
        .await
        .unwrap();

    let rows = query_rows(
        &client,
        &format!("SELECT * FROM availability WHERE room_id = '{rid}' AND date = '{date}'"),
    )
    .await;
    // 540..600 and 660..1320 remain free
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get(2), Some("540"));
    assert_eq!(rows[0].get(3), Some("600"));
    assert_eq!(rows[1].get(2), Some("660"));
    assert_eq!(rows[1].get(3), Some("1320"));

    let rows = query_rows(
        &client,
        &format!(
            "SELECT * FROM slot_check WHERE room_id = '{rid}' AND date = '{date}' AND start = 630 AND \"end\" = 690"
        ),
    )
    .await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some("f"));
    assert_eq!(rows[0].get(1), Some("capacity_exceeded"));

    let rows = query_rows(
        &client,
        &format!(
            "SELECT * FROM slot_check WHERE room_id = '{rid}' AND date = '{date}' AND start = 660 AND \"end\" = 720"
        ),
    )
    .await;
    assert_eq!(rows[0].get(0), Some("t"));
    assert_eq!(rows[0].get(1), Some(""));
}

#[tokio::test]
async fn quote_respects_calendar_and_discount() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms VALUES ('{rid}', 'Cursed Cellar', 2, 8, 60, 10000, 15000, 20000, 6, 10)"
        ))
        .await
        .unwrap();

    // A Monday: base rate, group discount at the threshold
    let rows = query_rows(
        &client,
        &format!("SELECT * FROM quote WHERE room_id = '{rid}' AND date = '2026-12-21' AND players = 6"),
    )
    .await;
    assert_eq!(rows[0].get(3), Some("10000"));
    assert_eq!(rows[0].get(4), Some("1000"));
    assert_eq!(rows[0].get(5), Some("9000"));

    // A Saturday that is also a holiday: holiday rate wins
    client
        .batch_execute("INSERT INTO holidays VALUES ('2026-12-26')")
        .await
        .unwrap();
    let rows = query_rows(
        &client,
        &format!("SELECT * FROM quote WHERE room_id = '{rid}' AND date = '2026-12-26' AND players = 2"),
    )
    .await;
    assert_eq!(rows[0].get(3), Some("20000"));
    assert_eq!(rows[0].get(5), Some("20000"));
}

#[tokio::test]
async fn closed_exception_blocks_and_surfaces_in_slot_check() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_open_room(&client).await;
    let date = booking_date();

    let ex_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO exceptions (id, room_id, exception_date, closed) VALUES ('{ex_id}', '{rid}', '{date}', true)"
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&reserve_sql(Ulid::new(), rid, date, 600))
        .await
        .unwrap_err();
    assert!(err.as_db_error().unwrap().message().contains("outside_hours"));

    let rows = query_rows(
        &client,
        &format!(
            "SELECT * FROM slot_check WHERE room_id = '{rid}' AND date = '{date}' AND start = 600 AND \"end\" = 660"
        ),
    )
    .await;
    assert_eq!(rows[0].get(0), Some("f"));
    assert_eq!(rows[0].get(1), Some("outside_hours"));

    // Lifting the exception reopens the day
    client
        .batch_execute(&format!("DELETE FROM exceptions WHERE id = '{ex_id}'"))
        .await
        .unwrap();
    client
        .batch_execute(&reserve_sql(Ulid::new(), rid, date, 600))
        .await
        .unwrap();
}

#[tokio::test]
async fn lifecycle_errors_map_to_check_violations() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_open_room(&client).await;
    let date = booking_date();

    let bid = Ulid::new();
    client
        .batch_execute(&reserve_sql(bid, rid, date, 600))
        .await
        .unwrap();
    client
        .batch_execute(&format!("UPDATE bookings SET status = 'cancelled' WHERE id = '{bid}'"))
        .await
        .unwrap();

    // completing a cancelled booking is an illegal transition
    let err = client
        .batch_execute(&format!("UPDATE bookings SET status = 'completed' WHERE id = '{bid}'"))
        .await
        .unwrap_err();
    let db_err = err.as_db_error().unwrap();
    assert_eq!(db_err.code().code(), "23514");
    assert!(db_err.message().contains("illegal transition"));

    // a second cancel is distinguishable
    let err = client
        .batch_execute(&format!("UPDATE bookings SET status = 'cancelled' WHERE id = '{bid}'"))
        .await
        .unwrap_err();
    assert!(err.as_db_error().unwrap().message().contains("already cancelled"));
}

#[tokio::test]
async fn stats_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_open_room(&client).await;
    let date = booking_date();

    let bid = Ulid::new();
    client
        .batch_execute(&reserve_sql(bid, rid, date, 600))
        .await
        .unwrap();
    client
        .batch_execute(&format!("UPDATE bookings SET status = 'confirmed' WHERE id = '{bid}'"))
        .await
        .unwrap();
    client
        .batch_execute(&format!("UPDATE bookings SET payment_status = 'paid' WHERE id = '{bid}'"))
        .await
        .unwrap();

    let rows = query_rows(&client, "SELECT * FROM stats").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some("1")); // total
    assert_eq!(rows[0].get(2), Some("1")); // confirmed
    assert_eq!(rows[0].get(6), Some("10000")); // revenue
    assert_eq!(rows[0].get(7), Some("400")); // avg players x100

    // Complete the session and leave a review; stats pick it up
    client
        .batch_execute(&format!("UPDATE bookings SET status = 'completed' WHERE id = '{bid}'"))
        .await
        .unwrap();
    let review_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO reviews VALUES ('{review_id}', '{bid}', 5, 'brilliant finale')"
        ))
        .await
        .unwrap();

    let rows = query_rows(&client, "SELECT * FROM stats").await;
    assert_eq!(rows[0].get(8), Some("1")); // total reviews
    assert_eq!(rows[0].get(9), Some("500")); // avg rating x100
}

#[tokio::test]
async fn recommendations_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let rid = create_open_room(&client).await;
    let date = booking_date();

    client
        .batch_execute(&reserve_sql(Ulid::new(), rid, date, 600))
        .await
        .unwrap();

    let rows = query_rows(
        &client,
        &format!(
            "SELECT * FROM recommendations WHERE room_id = '{rid}' AND date = '{date}' AND players = 4"
        ),
    )
    .await;
    assert!(!rows.is_empty());
    for row in &rows {
        let start: i32 = row.get(2).unwrap().parse().unwrap();
        let end: i32 = row.get(3).unwrap().parse().unwrap();
        assert_eq!(start % 30, 0);
        assert_eq!(end - start, 60);
        assert!(end <= 600 || start >= 660, "slot [{start},{end}) overlaps the booking");
        assert_eq!(row.get(4), Some("10000"));
    }
}

#[tokio::test]
async fn tenants_do_not_share_rooms() {
    let (addr, _tm) = start_test_server().await;
    let client_a = connect_db(addr, "org_a").await;
    let client_b = connect_db(addr, "org_b").await;

    create_open_room(&client_a).await;

    let rows_a = query_rows(&client_a, "SELECT * FROM rooms").await;
    let rows_b = query_rows(&client_b, "SELECT * FROM rooms").await;
    assert_eq!(rows_a.len(), 1);
    assert!(rows_b.is_empty());
}

#[tokio::test]
async fn listen_is_acknowledged() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let rid = Ulid::new();
    client.batch_execute(&format!("LISTEN room_{rid}")).await.unwrap();
    client.batch_execute("UNLISTEN *").await.unwrap();

    let err = client.batch_execute("LISTEN kitchen").await.unwrap_err();
    assert!(err.as_db_error().unwrap().message().contains("invalid channel"));
}

#[tokio::test]
async fn unknown_column_update_is_a_syntax_error() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let rid = Ulid::new();
    let err = client
        .batch_execute(&format!("UPDATE rooms SET slug = 'x' WHERE id = '{rid}'"))
        .await
        .unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "42601");
}

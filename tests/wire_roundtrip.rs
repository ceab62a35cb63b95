use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};

use ppdb_schedule::engine::Engine;
use ppdb_schedule::wire;

// ── Test infrastructure ──────────────────────────────────────

static SERVER_SEQ: AtomicUsize = AtomicUsize::new(0);

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!(
        "ppdb_int_test_{}_{}",
        std::process::id(),
        SERVER_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let wal = dir.join("schedule.wal");
    let _ = std::fs::remove_file(&wal);
    let engine = Arc::new(Engine::open(wal).unwrap());

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "ppdb".to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("ppdb")
        .user("ppdb")
        .password("ppdb");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn one(client: &Client, sql: &str) -> SimpleQueryRow {
    let mut rows = rows(client, sql).await;
    assert_eq!(rows.len(), 1, "{sql}");
    rows.remove(0)
}

/// (SQLSTATE, message) of a failing statement.
async fn failure(client: &Client, sql: &str) -> (String, String) {
    let err = client.simple_query(sql).await.unwrap_err();
    let db = err.as_db_error().expect("database error");
    (db.code().code().to_string(), db.message().to_string())
}

/// Period over 2024, lane Zonasi and a period lane Feb 1 .. Nov 30.
/// Returns (period_id, lane_id, period_lane_id).
async fn seed(client: &Client) -> (String, String, String) {
    let period = one(
        client,
        r#"INSERT INTO periods (name, start, "end") VALUES ('Gelombang 1', '2024-01-01T00:00:00Z', '2024-12-31T00:00:00Z')"#,
    )
    .await;
    let lane = one(client, "INSERT INTO lanes (name) VALUES ('Zonasi')").await;
    let period_id = period.get("id").unwrap().to_string();
    let lane_id = lane.get("id").unwrap().to_string();
    let period_lane = one(
        client,
        &format!(
            r#"INSERT INTO period_lanes (period_id, lane_id, start, "end", ranking_method) VALUES ({period_id}, {lane_id}, '2024-02-01T00:00:00Z', '2024-11-30T00:00:00Z', 'STRAIGHT_LINE_DISTANCE')"#
        ),
    )
    .await;
    let period_lane_id = period_lane.get("id").unwrap().to_string();
    (period_id, lane_id, period_lane_id)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_read_back_hierarchy() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let (period_id, _, period_lane_id) = seed(&client).await;

    let period = one(&client, &format!("SELECT * FROM periods WHERE id = {period_id}")).await;
    assert_eq!(period.get("name"), Some("Gelombang 1"));
    assert_eq!(period.get("start"), Some("2024-01-01T00:00:00.000Z"));

    let lanes = rows(
        &client,
        &format!("SELECT * FROM period_lanes WHERE period_id = {period_id}"),
    )
    .await;
    assert_eq!(lanes.len(), 1);
    assert_eq!(lanes[0].get("lane_name"), Some("Zonasi"));
    assert_eq!(lanes[0].get("ranking_method"), Some("STRAIGHT_LINE_DISTANCE"));

    let detail = one(
        &client,
        &format!("SELECT * FROM period_lanes WHERE id = {period_lane_id}"),
    )
    .await;
    assert_eq!(detail.get("period_name"), Some("Gelombang 1"));
    assert_eq!(detail.get("period_end"), Some("2024-12-31T00:00:00.000Z"));
}

#[tokio::test]
async fn schedule_outside_period_lane_is_rejected() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let (_, _, period_lane_id) = seed(&client).await;
    let stage = one(&client, "INSERT INTO stages (name) VALUES ('Pendaftaran')").await;
    let stage_id = stage.get("id").unwrap();

    let (code, message) = failure(
        &client,
        &format!(
            r#"INSERT INTO schedules (period_lane_id, stage_id, start, "end") VALUES ({period_lane_id}, {stage_id}, '2024-01-15T00:00:00Z', '2024-03-01T00:00:00Z')"#
        ),
    )
    .await;
    assert_eq!(code, "23514");
    assert!(message.contains("start"), "{message}");

    let schedule = one(
        &client,
        &format!(
            r#"INSERT INTO schedules (period_lane_id, stage_id, start, "end") VALUES ({period_lane_id}, {stage_id}, '2024-02-01T00:00:00Z', '2024-03-01T00:00:00Z')"#
        ),
    )
    .await;
    assert_eq!(schedule.get("stage_name"), Some("Pendaftaran"));
    assert_eq!(schedule.get("is_closed"), Some("f"));
}

#[tokio::test]
async fn duplicate_period_lane_is_a_conflict() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let (period_id, lane_id, _) = seed(&client).await;

    let (code, message) = failure(
        &client,
        &format!(
            r#"INSERT INTO period_lanes (period_id, lane_id, start, "end") VALUES ({period_id}, {lane_id}, '2024-03-01T00:00:00Z', '2024-04-01T00:00:00Z')"#
        ),
    )
    .await;
    assert_eq!(code, "23505");
    assert_eq!(message, "period and lane combination already exists");
}

#[tokio::test]
async fn shrinking_period_past_a_lane_fails() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let (period_id, _, _) = seed(&client).await;

    let (code, message) = failure(
        &client,
        &format!(
            r#"UPDATE periods SET name = 'Gelombang 1', start = '2024-03-01T00:00:00Z', "end" = '2024-12-31T00:00:00Z' WHERE id = {period_id}"#
        ),
    )
    .await;
    assert_eq!(code, "23514");
    assert!(message.contains("Zonasi"), "{message}");

    let period = one(&client, &format!("SELECT * FROM periods WHERE id = {period_id}")).await;
    assert_eq!(period.get("start"), Some("2024-01-01T00:00:00.000Z"));
}

#[tokio::test]
async fn closing_a_schedule_skips_interval_checks() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let (_, _, period_lane_id) = seed(&client).await;
    let stage = one(&client, "INSERT INTO stages (name) VALUES ('Verifikasi')").await;
    let stage_id = stage.get("id").unwrap();
    let schedule = one(
        &client,
        &format!(
            r#"INSERT INTO schedules (period_lane_id, stage_id, start, "end") VALUES ({period_lane_id}, {stage_id}, '2024-03-01T00:00:00Z', '2024-03-10T00:00:00Z')"#
        ),
    )
    .await;
    let schedule_id = schedule.get("id").unwrap();

    let closed = one(
        &client,
        &format!("UPDATE schedules SET is_closed = 1 WHERE id = {schedule_id}"),
    )
    .await;
    assert_eq!(closed.get("is_closed"), Some("t"));
    assert_eq!(closed.get("start"), Some("2024-03-01T00:00:00.000Z"));
}

#[tokio::test]
async fn invalid_input_and_missing_rows() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let (code, _) = failure(&client, "INSERT INTO lanes (name) VALUES ('Zonasi 2')").await;
    assert_eq!(code, "22023");

    let (code, _) = failure(&client, "SELECT * FROM periods WHERE id = 99").await;
    assert_eq!(code, "P0002");

    let (code, _) = failure(&client, "SELECT * FROM periods WHERE page_size = 500").await;
    assert_eq!(code, "54000");

    let (code, _) = failure(&client, "DROP TABLE periods").await;
    assert_eq!(code, "42601");
}

#[tokio::test]
async fn period_pages_report_total() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    for i in 1..=3 {
        rows(
            &client,
            &format!(
                r#"INSERT INTO periods (name, start, "end") VALUES ('Gelombang {i}', '2024-01-01T00:00:00Z', '2024-12-31T00:00:00Z')"#
            ),
        )
        .await;
    }

    let page = rows(&client, "SELECT * FROM periods WHERE page = 2 AND page_size = 2").await;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].get("name"), Some("Gelombang 3"));
    assert_eq!(page[0].get("total"), Some("3"));
    assert_eq!(page[0].get("page"), Some("2"));
}

#[tokio::test]
async fn empty_period_page_still_reports_total() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let empty = one(&client, "SELECT * FROM periods").await;
    assert_eq!(empty.get("id"), None);
    assert_eq!(empty.get("total"), Some("0"));
    assert_eq!(empty.get("page"), Some("1"));

    for i in 1..=3 {
        rows(
            &client,
            &format!(
                r#"INSERT INTO periods (name, start, "end") VALUES ('Gelombang {i}', '2024-01-01T00:00:00Z', '2024-12-31T00:00:00Z')"#
            ),
        )
        .await;
    }
    let past_end = one(&client, "SELECT * FROM periods WHERE page = 5 AND page_size = 2").await;
    assert_eq!(past_end.get("name"), None);
    assert_eq!(past_end.get("total"), Some("3"));
    assert_eq!(past_end.get("page"), Some("5"));
    assert_eq!(past_end.get("page_size"), Some("2"));
}

#[tokio::test]
async fn schedule_move_is_checked_against_the_new_period_lane() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let (period_id, _, period_lane_id) = seed(&client).await;
    let lane = one(&client, "INSERT INTO lanes (name) VALUES ('Prestasi')").await;
    let narrow = one(
        &client,
        &format!(
            r#"INSERT INTO period_lanes (period_id, lane_id, start, "end") VALUES ({period_id}, {}, '2024-05-01T00:00:00Z', '2024-06-01T00:00:00Z')"#,
            lane.get("id").unwrap()
        ),
    )
    .await;
    let stage = one(&client, "INSERT INTO stages (name) VALUES ('Verifikasi')").await;
    let stage_id = stage.get("id").unwrap();
    let schedule = one(
        &client,
        &format!(
            r#"INSERT INTO schedules (period_lane_id, stage_id, start, "end") VALUES ({period_lane_id}, {stage_id}, '2024-03-01T00:00:00Z', '2024-03-10T00:00:00Z')"#
        ),
    )
    .await;
    let schedule_id = schedule.get("id").unwrap();

    let (code, _) = failure(
        &client,
        &format!(
            "UPDATE schedules SET period_lane_id = {} WHERE id = {schedule_id}",
            narrow.get("id").unwrap()
        ),
    )
    .await;
    assert_eq!(code, "42601");

    let (code, _) = failure(
        &client,
        &format!(
            r#"UPDATE schedules SET period_lane_id = {}, stage_id = {stage_id}, start = '2024-03-01T00:00:00Z', "end" = '2024-03-10T00:00:00Z' WHERE id = {schedule_id}"#,
            narrow.get("id").unwrap()
        ),
    )
    .await;
    assert_eq!(code, "23514");

    let unchanged = one(&client, &format!("SELECT * FROM schedules WHERE id = {schedule_id}")).await;
    assert_eq!(unchanged.get("period_lane_id"), Some(period_lane_id.as_str()));
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let (_, _, period_lane_id) = seed(&client).await;

    let stage = client
        .query_one("INSERT INTO stages (name) VALUES ($1)", &[&"Pengumuman"])
        .await
        .unwrap();
    let stage_id: i64 = stage.get("id");

    client
        .query_one(
            r#"INSERT INTO schedules (period_lane_id, stage_id, start, "end") VALUES ($1, $2, $3, $4)"#,
            &[
                &period_lane_id.as_str(),
                &stage_id.to_string().as_str(),
                &"2024-05-01T00:00:00Z",
                &"2024-05-02T00:00:00Z",
            ],
        )
        .await
        .unwrap();

    let schedules = client
        .query(
            "SELECT * FROM schedules WHERE period_lane_id = $1",
            &[&period_lane_id.as_str()],
        )
        .await
        .unwrap();
    assert_eq!(schedules.len(), 1);
    let name: &str = schedules[0].get("stage_name");
    let closed: bool = schedules[0].get("is_closed");
    let start: Option<&str> = schedules[0].get("start");
    assert_eq!(name, "Pengumuman");
    assert!(!closed);
    assert_eq!(start, Some("2024-05-01T00:00:00.000Z"));
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};

const YEAR_START: &str = "2024-01-01T00:00:00Z";
const YEAR_END: &str = "2024-12-31T00:00:00Z";

async fn connect(host: &str, port: u16) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("ppdb")
        .user("ppdb")
        .password("ppdb");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

/// Run a statement and return the `id` column of its first row.
async fn returning_id(client: &Client, sql: &str) -> Result<String, tokio_postgres::Error> {
    let messages = client.simple_query(sql).await?;
    Ok(messages
        .into_iter()
        .find_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get("id").map(str::to_string),
            _ => None,
        })
        .expect("statement returned no row"))
}

async fn insert_period(client: &Client, name: &str) -> String {
    returning_id(
        client,
        &format!(
            r#"INSERT INTO periods (name, start, "end") VALUES ('{name}', '{YEAR_START}', '{YEAR_END}')"#
        ),
    )
    .await
    .unwrap()
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// One period lane with `n` stages scheduled under it. Returns the period lane id.
async fn setup(client: &Client, n: usize) -> String {
    let period_id = insert_period(client, "Bench").await;
    let lane_id = returning_id(client, "INSERT INTO lanes (name) VALUES ('Bench')")
        .await
        .unwrap();
    let period_lane_id = returning_id(
        client,
        &format!(
            r#"INSERT INTO period_lanes (period_id, lane_id, start, "end", ranking_method) VALUES ({period_id}, {lane_id}, '{YEAR_START}', '{YEAR_END}', 'STRAIGHT_LINE_DISTANCE')"#
        ),
    )
    .await
    .unwrap();
    for i in 0..n {
        let stage_id = returning_id(
            client,
            &format!("INSERT INTO stages (name) VALUES ('Stage {i}')"),
        )
        .await
        .unwrap();
        returning_id(
            client,
            &format!(
                r#"INSERT INTO schedules (period_lane_id, stage_id, start, "end") VALUES ({period_lane_id}, {stage_id}, '2024-03-01T00:00:00Z', '2024-03-10T00:00:00Z')"#
            ),
        )
        .await
        .unwrap();
    }
    println!("  period lane {period_lane_id} with {n} schedules");
    period_lane_id
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        insert_period(&client, &format!("Sequential {i}")).await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} periods in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;
    let start = Instant::now();

    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for j in 0..n_per_task {
                insert_period(&client, &format!("Concurrent {t} {j}")).await;
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} periods = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(host: &str, port: u16, period_lane_id: &str) {
    let stop = Arc::new(AtomicBool::new(false));

    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                insert_period(&client, &format!("Writer {w} {i}")).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let sql = format!("SELECT * FROM schedules WHERE period_lane_id = {period_lane_id}");
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client.simple_query(&sql).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in reader_handles {
        all.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("schedule list latency", &mut all);
}

/// Many connections insert the same period lane at once; exactly one may win.
async fn phase4_duplicate_race(host: &str, port: u16) {
    let rounds = 50;
    let racers = 8;
    let client = connect(host, port).await;
    let mut clean = 0;

    for r in 0..rounds {
        let period_id = insert_period(&client, &format!("Race {r}")).await;
        let lane_id = returning_id(&client, &format!("INSERT INTO lanes (name) VALUES ('Race{r}')"))
            .await
            .unwrap();
        let sql = format!(
            r#"INSERT INTO period_lanes (period_id, lane_id, start, "end") VALUES ({period_id}, {lane_id}, '{YEAR_START}', '{YEAR_END}')"#
        );

        let wins = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..racers {
            let host = host.to_string();
            let sql = sql.clone();
            let wins = wins.clone();
            handles.push(tokio::spawn(async move {
                let client = connect(&host, port).await;
                if returning_id(&client, &sql).await.is_ok() {
                    wins.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for h in handles {
            let _ = h.await;
        }
        if wins.load(Ordering::Relaxed) == 1 {
            clean += 1;
        }
    }

    println!("  {clean}/{rounds} rounds with exactly one winner out of {racers}");
}

async fn phase5_connection_storm(host: &str, port: u16) {
    let n_conns = 100;
    let ops_per_conn = 10;
    let success = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for i in 0..ops_per_conn {
                insert_period(&client, &format!("Storm {c} {i}")).await;
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("PPDB_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("PPDB_PORT")
        .unwrap_or_else(|_| "5434".into())
        .parse()
        .expect("invalid PPDB_PORT");

    println!("=== ppdb-schedule stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[setup]");
    let setup_client = connect(&host, port).await;
    let period_lane_id = setup(&setup_client, 20).await;
    drop(setup_client);

    println!("\n[phase 1] sequential write throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port, &period_lane_id).await;

    println!("\n[phase 4] duplicate insert race");
    phase4_duplicate_race(&host, port).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}

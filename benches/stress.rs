use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{Days, NaiveDate};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const VENUES: i64 = 20;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("bench")
        .user("venuedb")
        .password("venuedb");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
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

fn day(n: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap() + Days::new(n)
}

fn order_sql(package_id: i64, date: NaiveDate, token: &str) -> String {
    format!(
        "INSERT INTO orders (package_id, date, access_token) VALUES ({package_id}, '{date}', '{token}')"
    )
}

/// Catalog ids for one run. Offset by wall clock so reruns against the
/// same server never collide.
struct Catalog {
    city_id: i64,
    packages: Vec<i64>,
    token: String,
}

async fn setup(client: &tokio_postgres::Client) -> Catalog {
    let base = (SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() % 1_000_000) as i64
        * 1_000;
    let city_id = base;
    client
        .batch_execute(&format!(
            "INSERT INTO cities (id, name) VALUES ({city_id}, 'Bench City {base}')"
        ))
        .await
        .unwrap();

    let mut packages = Vec::new();
    for i in 1..=VENUES {
        let id = base + i;
        client
            .batch_execute(&format!(
                "INSERT INTO venues (id, city_id, name, min_price, max_price, capacity) VALUES ({id}, {city_id}, 'Venue {i}', 100, 900, 250);
                 INSERT INTO categories (id, venue_id, description) VALUES ({id}, {id}, 'Wedding');
                 INSERT INTO packages (id, category_id, name, price, capacity) VALUES ({id}, {id}, 'Package {i}', 500, 200);"
            ))
            .await
            .unwrap();
        packages.push(id);
    }

    let email = format!("bench-{}@example.com", Ulid::new());
    client
        .batch_execute(&format!(
            "INSERT INTO users (email, fullname, password) VALUES ('{email}', 'Bench', 'bench')"
        ))
        .await
        .unwrap();
    let rows = client
        .simple_query(&format!(
            "SELECT * FROM login WHERE email = '{email}' AND password = 'bench'"
        ))
        .await
        .unwrap();
    let token = rows
        .into_iter()
        .find_map(|m| match m {
            tokio_postgres::SimpleQueryMessage::Row(r) => r.get(3).map(str::to_string),
            _ => None,
        })
        .expect("login returned no session");

    println!("  created {VENUES} venues in city {city_id}");
    Catalog {
        city_id,
        packages,
        token,
    }
}

async fn phase1_sequential(host: &str, port: u16, catalog: &Catalog) {
    let client = connect(host, port).await;
    let package_id = catalog.packages[0];

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        client
            .batch_execute(&order_sql(package_id, day(i as u64), &catalog.token))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    println!(
        "  {n} orders in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("order", &mut latencies);
}

/// Every task races for the same (package, date) slots. Exactly one
/// order per slot must win.
async fn phase2_contention(host: &str, port: u16, catalog: &Catalog) {
    let n_tasks = 10;
    let n_dates = 200;
    let package_id = catalog.packages[1];
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let token = catalog.token.clone();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for d in 0..n_dates {
                match client.batch_execute(&order_sql(package_id, day(d), &token)).await {
                    Ok(()) => {
                        won.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                        lost.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let lost = lost.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_dates} dates: {won} won, {lost} rejected in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, n_dates as usize, "every slot must be sold exactly once");
}

async fn phase3_listing_under_load(host: &str, port: u16, catalog: &Catalog) {
    let n_writers = 4;
    let n_readers = 4;
    let orders_per_writer = 250;
    let reads_per_reader = 250;

    let mut writer_handles = Vec::new();
    for w in 0..n_writers {
        let host = host.to_string();
        let token = catalog.token.clone();
        let package_id = catalog.packages[2 + w];
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for d in 0..orders_per_writer {
                client
                    .batch_execute(&order_sql(package_id, day(d), &token))
                    .await
                    .unwrap();
            }
        }));
    }

    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let city_id = catalog.city_id;
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let date = day((i * n_readers + r) as u64 % 250);
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        r#"SELECT * FROM venues WHERE city_id = {city_id} AND date = '{date}' AND "limit" = 50"#
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    for h in writer_handles {
        h.await.unwrap();
    }
    let mut latencies = Vec::new();
    for h in reader_handles {
        latencies.extend(h.await.unwrap());
    }
    print_latency("dated venue listing", &mut latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 100;
    let start = Instant::now();
    let ok = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..n_conns {
        let host = host.to_string();
        let ok = ok.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for _ in 0..5 {
                if client.simple_query("SELECT * FROM nearby").await.is_err() {
                    return;
                }
            }
            ok.fetch_add(1, Ordering::Relaxed);
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    println!(
        "  {n_conns} connections, 5 reads each: {}/{n_conns} succeeded in {:.2}s",
        ok.load(Ordering::Relaxed),
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("VENUEDB_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("VENUEDB_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid VENUEDB_PORT");

    println!("=== venuedb stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[setup]");
    let setup_client = connect(&host, port).await;
    let catalog = setup(&setup_client).await;
    drop(setup_client);

    println!("\n[phase 1] sequential order throughput");
    phase1_sequential(&host, port, &catalog).await;

    println!("\n[phase 2] same-date contention");
    phase2_contention(&host, port, &catalog).await;

    println!("\n[phase 3] dated listing latency under order load");
    phase3_listing_under_load(&host, port, &catalog).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}

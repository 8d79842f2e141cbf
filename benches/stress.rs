use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Client, Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16, tenant: &str) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(tenant)
        .user("bench")
        .password(std::env::var("PARKBOOK_PASSWORD").unwrap_or_else(|_| "parkbook".into()));

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
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap() + Days::new(offset)
}

struct Lot {
    location: Ulid,
    spots: Vec<Ulid>,
}

/// One location with `n_spots` spots and a holiday surcharge.
async fn setup_lot(client: &Client, n_spots: usize) -> Lot {
    let location = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO locations VALUES ('{location}', 'Bench', 42.50, 900.00)"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO pricing_exceptions VALUES ('{}', '{location}', '{}', '{}', 25, 'Peak')",
            Ulid::new(),
            day(10),
            day(40)
        ))
        .await
        .unwrap();

    let mut spots = Vec::with_capacity(n_spots);
    for i in 0..n_spots {
        let spot = Ulid::new();
        client
            .batch_execute(&format!(
                "INSERT INTO spots VALUES ('{spot}', '{location}', 'S{i}')"
            ))
            .await
            .unwrap();
        spots.push(spot);
    }
    Lot { location, spots }
}

fn insert_booking(lot: &Lot, spot: Ulid, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "INSERT INTO bookings VALUES ('{}', '{}', '{spot}', '{}', '{start}', '{end}', 'periodic')",
        Ulid::new(),
        lot.location,
        Ulid::new()
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &format!("bench_{}", Ulid::new())).await;
    let lot = setup_lot(&client, 1).await;
    let spot = lot.spots[0];

    let n = 2000u64;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        client
            .batch_execute(&insert_booking(&lot, spot, day(i * 2), day(i * 2 + 1)))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many clients race for the same days on a handful of spots. Exactly one
/// booking per spot and day range may win.
async fn phase2_contention(host: &str, port: u16) {
    let tenant = format!("bench_{}", Ulid::new());
    let setup_client = connect(host, port, &tenant).await;
    let lot = Arc::new(setup_lot(&setup_client, 4).await);
    drop(setup_client);

    let n_tasks = 32;
    let rounds = 50u64;
    let won = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let tenant = tenant.clone();
        let lot = lot.clone();
        let won = won.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            for round in 0..rounds {
                for &spot in &lot.spots {
                    let sql = insert_booking(&lot, spot, day(round * 3), day(round * 3 + 2));
                    match client.batch_execute(&sql).await {
                        Ok(()) => won.fetch_add(1, Ordering::Relaxed),
                        Err(_) => conflicts.fetch_add(1, Ordering::Relaxed),
                    };
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let expected = rounds as usize * lot.spots.len();
    println!(
        "  {n_tasks} tasks, {} attempts in {:.2}s: {won} won (expected {expected}), {} conflicts",
        n_tasks * rounds as usize * lot.spots.len(),
        elapsed.as_secs_f64(),
        conflicts.load(Ordering::Relaxed)
    );
    if won != expected {
        println!("  !! double booking detected");
    }
}

async fn phase3_preview_under_load(host: &str, port: u16) {
    let tenant = format!("bench_{}", Ulid::new());
    let setup_client = connect(host, port, &tenant).await;
    let lot = Arc::new(setup_lot(&setup_client, 20).await);
    drop(setup_client);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let tenant = tenant.clone();
        let lot = lot.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            let spot = lot.spots[w];
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let _ = client
                    .batch_execute(&insert_booking(&lot, spot, day(i), day(i)))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let tenant = tenant.clone();
        let lot = lot.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            let spot = lot.spots[5 + r];
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM preview WHERE location_id = '{}' AND spot_id = '{spot}' \
                         AND start_date = '{}' AND end_date = '{}' AND booking_type = 'periodic'",
                        lot.location,
                        day(0),
                        day(60)
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("preview query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10u64;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &format!("bench_{}", Ulid::new())).await;
            let lot = setup_lot(&client, 1).await;
            for i in 0..ops_per_conn {
                client
                    .batch_execute(&insert_booking(&lot, lot.spots[0], day(i), day(i)))
                    .await
                    .unwrap();
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
        "  {n_conns} connections, {ops_per_conn} bookings each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("PARKBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("PARKBOOK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid PARKBOOK_PORT");

    println!("=== parkbook stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended bookings");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] preview latency under write load");
    phase3_preview_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== done ===");
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use stanza::engine::Engine;
use stanza::notify::NotifyHub;

const HOUR: i64 = 3_600_000;

fn bench_wal(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("stanza_bench");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(format!("{name}_{}.wal", Ulid::new()))
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

async fn phase1_sequential(engine: &Engine) {
    engine.add_room("seq", None, 1).await.unwrap();

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = (i as i64) * HOUR;
        let t = Instant::now();
        engine.book("seq", s, s + HOUR, "bench", None).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!("phase 1 — sequential bookings, one room:");
    println!("    {:.0} bookings/s", n as f64 / elapsed);
    print_latency("book", &mut latencies);
}

async fn phase2_contended(engine: Arc<Engine>) {
    engine.add_room("hot", None, 1).await.unwrap();

    let workers = 8;
    let attempts_per_worker = 250;
    let start = Instant::now();

    let mut handles = Vec::new();
    for w in 0..workers {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(attempts_per_worker);
            let mut confirmed = 0usize;
            for i in 0..attempts_per_worker {
                // All workers fight over the same day of slots
                let s = ((i % 24) as i64) * HOUR;
                let t = Instant::now();
                if eng.book("hot", s, s + HOUR, &format!("w{w}"), None).await.is_ok() {
                    confirmed += 1;
                }
                latencies.push(t.elapsed());
            }
            (latencies, confirmed)
        }));
    }

    let mut all_latencies = Vec::new();
    let mut total_confirmed = 0;
    for h in handles {
        let (lat, confirmed) = h.await.unwrap();
        all_latencies.extend(lat);
        total_confirmed += confirmed;
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!("phase 2 — {workers} workers contending on one room:");
    println!(
        "    {:.0} attempts/s, {total_confirmed} confirmed (24 slots available)",
        all_latencies.len() as f64 / elapsed
    );
    print_latency("book (contended)", &mut all_latencies);
}

async fn phase3_parallel_rooms(engine: Arc<Engine>) {
    let rooms = 10;
    let bookings_per_room = 500;
    for r in 0..rooms {
        engine.add_room(&format!("par-{r}"), None, 1).await.unwrap();
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for r in 0..rooms {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(bookings_per_room);
            for i in 0..bookings_per_room {
                let s = (i as i64) * HOUR;
                let t = Instant::now();
                eng.book(&format!("par-{r}"), s, s + HOUR, "bench", None)
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!("phase 3 — {rooms} independent rooms in parallel:");
    println!("    {:.0} bookings/s", all_latencies.len() as f64 / elapsed);
    print_latency("book (parallel rooms)", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let engine = Arc::new(Engine::new(bench_wal("stress"), Arc::new(NotifyHub::new())).unwrap());

    println!("stanza stress bench");
    phase1_sequential(&engine).await;
    phase2_contended(engine.clone()).await;
    phase3_parallel_rooms(engine).await;
}

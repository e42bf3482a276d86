//! Basic usage example for the pacer crate.
//!
//! Run with `RUST_LOG=pacer=debug cargo run --example basic` to see the
//! crate's own tracing output.

use pacer::{
    Debouncer, Deduplicator, QueueError, RateLimiter, RateLimiterConfig, RequestQueue, Throttle,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Basic Pacer Example ===\n");

    // Example 1: Sharing identical requests
    dedupe_example().await;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 2: Throttle and debounce
    timing_example().await;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 3: Serialized queue
    queue_example().await;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 4: Token bucket
    limiter_example().await;
}

async fn dedupe_example() {
    println!("1. Request Deduplication:");

    let dedupe: Deduplicator<Vec<String>, String> = Deduplicator::new();
    let fetches = Arc::new(AtomicUsize::new(0));

    let widgets: Vec<_> = (0..4)
        .map(|_| {
            let fetches = fetches.clone();
            dedupe.dedupe("/api/sources", move || async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(vec!["warehouse".to_string(), "crm".to_string()])
            })
        })
        .collect();

    println!("   4 widgets asked for /api/sources");
    for (i, widget) in widgets.into_iter().enumerate() {
        match widget.await {
            Ok(sources) => println!("   Widget {} - ✅ {:?}", i + 1, sources),
            Err(err) => println!("   Widget {} - ❌ {}", i + 1, err),
        }
    }
    println!(
        "   Network fetches: {} | {}",
        fetches.load(Ordering::SeqCst),
        dedupe.stats()
    );
}

async fn timing_example() {
    println!("2. Throttle and Debounce:");

    let refreshes = Throttle::new(
        |tab: &'static str| format!("refreshed {tab}"),
        Duration::from_millis(200),
    );
    for tab in ["overview", "logs", "metrics"] {
        println!("   Switch to {:<8} -> {:?}", tab, refreshes.call(tab));
    }

    let search = Debouncer::new(
        |query: String| println!("   🔍 searching for {query:?}"),
        Duration::from_millis(150),
    );
    for query in ["s", "se", "sel", "sele", "select"] {
        search.call(query.to_string());
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
}

async fn queue_example() {
    println!("3. Request Queue (100ms spacing):");

    let queue = RequestQueue::new(Duration::from_millis(100));
    let started = Instant::now();

    let jobs: Vec<_> = (1..=4)
        .map(|page| {
            queue.add(move || async move {
                if page == 3 {
                    Err(format!("page {page}: 503 Service Unavailable"))
                } else {
                    Ok(format!("page {page} at {:?}", started.elapsed()))
                }
            })
        })
        .collect();

    for job in jobs {
        match job.await {
            Ok(msg) => println!("   ✅ {msg}"),
            Err(QueueError::Failed(err)) => println!("   ❌ {err}"),
            Err(QueueError::Cleared) => println!("   ⏹ cleared"),
            Err(QueueError::Aborted) => println!("   💥 aborted"),
        }
    }
    println!("{}", queue.stats());
}

async fn limiter_example() {
    println!("4. Rate Limiter (8/s, burst 15):");

    let limiter = RateLimiter::with_config(RateLimiterConfig::default());

    let mut approved = 0;
    for _ in 0..20 {
        if limiter.try_acquire() {
            approved += 1;
        }
    }
    println!("   Burst: {approved}/20 approved immediately");
    println!("   Next token in {:?}", limiter.wait_time());

    let started = Instant::now();
    limiter.acquire().await;
    println!("   acquire() waited {:?}", started.elapsed());

    let metrics = limiter.metrics();
    println!("   Health: {}", metrics.health_status());
    println!("{metrics}");
}

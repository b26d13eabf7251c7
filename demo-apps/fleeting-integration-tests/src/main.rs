use anyhow::{ensure, Result};
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleeting_integration_tests=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = std::env::var("FLEETING_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
    let client = reqwest::Client::new();

    tracing::info!("🧪 Fleeting Integration Tests");
    tracing::info!("   Server: {}", server);
    println!();

    // Run all tests
    test_register_and_list(&client, &server).await?;
    test_filter_and_sort(&client, &server).await?;
    test_rejects_non_object(&client, &server).await?;
    test_parallel_registers(&client, &server).await?;
    test_concurrent_readers_and_writers(&client, &server).await?;

    println!();
    tracing::info!("✅ All tests passed!");

    Ok(())
}

/// A field name unique to one test, so entries from other runs are filtered out
fn run_tag(test: &str) -> String {
    format!("{}_{}", test, uuid::Uuid::new_v4().simple())
}

async fn register(client: &reqwest::Client, server: &str, body: &Value) -> Result<Value> {
    let response = client
        .post(format!("{}/register", server))
        .json(body)
        .send()
        .await?;
    Ok(response.json().await?)
}

async fn list(client: &reqwest::Client, server: &str, params: &[(&str, &str)]) -> Result<Vec<Value>> {
    let response = client
        .get(format!("{}/list", server))
        .query(params)
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json().await?)
}

/// Test basic REGISTER/LIST round trip
async fn test_register_and_list(client: &reqwest::Client, server: &str) -> Result<()> {
    tracing::info!("Test: Register and List");

    let tag = run_tag("basic");
    let response = register(client, server, &json!({ &tag: true, "name": "alice" })).await?;

    ensure!(response["status"] == "success", "register should succeed: {}", response);
    ensure!(
        response["entries"].as_u64().unwrap_or(0) >= 1,
        "entry count should include the new entry"
    );

    let entries = list(client, server, &[("filter", tag.as_str())]).await?;
    ensure!(entries.len() == 1, "expected one tagged entry, got {}", entries.len());
    ensure!(entries[0]["name"] == "alice", "name should round-trip");
    ensure!(entries[0]["timestamp"].is_string(), "server should stamp the entry");

    tracing::info!("   ✓ Register and list work correctly");
    Ok(())
}

/// Test presence filter, alias and stable sort
async fn test_filter_and_sort(client: &reqwest::Client, server: &str) -> Result<()> {
    tracing::info!("Test: Filter and Sort");

    let tag = run_tag("sort");
    let rows = [
        json!({ &tag: 1, "name": "carol", "score": 7 }),
        json!({ &tag: 1, "name": "alice" }),
        json!({ &tag: 1, "name": "bob", "score": 3 }),
    ];
    for row in &rows {
        register(client, server, row).await?;
    }

    let by_name = list(client, server, &[("filter", tag.as_str()), ("sort", "name"), ("order", "asc")]).await?;
    let names: Vec<_> = by_name.iter().map(|e| e["name"].as_str().unwrap_or_default()).collect();
    ensure!(names == ["alice", "bob", "carol"], "unexpected order {:?}", names);

    let scored: Vec<Value> = list(client, server, &[("filter_key", tag.as_str()), ("sort", "score"), ("order", "desc")])
        .await?
        .into_iter()
        .filter(|e| e.get("score").is_some())
        .collect();
    let names: Vec<_> = scored.iter().map(|e| e["name"].as_str().unwrap_or_default()).collect();
    ensure!(names == ["carol", "bob"], "unexpected order {:?}", names);

    tracing::info!("   ✓ Filtering and sorting work correctly");
    Ok(())
}

/// Test that non-object payloads are refused
async fn test_rejects_non_object(client: &reqwest::Client, server: &str) -> Result<()> {
    tracing::info!("Test: Reject non-object payload");

    let response = client
        .post(format!("{}/register", server))
        .json(&json!([1, 2, 3]))
        .send()
        .await?;

    ensure!(
        response.status() == reqwest::StatusCode::BAD_REQUEST,
        "expected 400, got {}",
        response.status()
    );
    let body: Value = response.json().await?;
    ensure!(body["status"] == "error", "expected error body, got {}", body);

    tracing::info!("   ✓ Array payload rejected");
    Ok(())
}

/// Test parallel REGISTER operations - no entry may be lost
async fn test_parallel_registers(client: &reqwest::Client, server: &str) -> Result<()> {
    tracing::info!("Test: Parallel REGISTER (200 concurrent requests)");

    let num_operations = 200;
    let tag = run_tag("parallel");
    let start = Instant::now();

    let futures: Vec<_> = (0..num_operations)
        .map(|i| {
            let body = json!({ &tag: i, "value": format!("value-{}", i) });
            async move {
                let response = register(client, server, &body).await?;
                ensure!(response["status"] == "success", "register {} failed: {}", i, response);
                Ok::<_, anyhow::Error>(())
            }
        })
        .collect();

    join_all(futures)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let elapsed = start.elapsed();
    tracing::info!(
        "   REGISTER {} entries in {:?} ({:.0} req/sec)",
        num_operations,
        elapsed,
        num_operations as f64 / elapsed.as_secs_f64()
    );

    let entries = list(client, server, &[("filter", tag.as_str()), ("sort", tag.as_str())]).await?;
    ensure!(
        entries.len() == num_operations,
        "expected {} entries, found {}",
        num_operations,
        entries.len()
    );
    let seen: HashSet<i64> = entries.iter().filter_map(|e| e[&tag].as_i64()).collect();
    ensure!(seen.len() == num_operations, "duplicate or missing entries");

    tracing::info!("   ✓ All {} entries present exactly once", num_operations);
    Ok(())
}

/// Test that lists taken during writes are always consistent
async fn test_concurrent_readers_and_writers(client: &reqwest::Client, server: &str) -> Result<()> {
    tracing::info!("Test: Concurrent readers and writers");

    let writers = 20;
    let writes_per_writer = 5;
    let tag = run_tag("mixed");
    let semaphore = Arc::new(Semaphore::new(16)); // Limit concurrent connections
    let max_seen = Arc::new(AtomicUsize::new(0));

    let writer_futures: Vec<_> = (0..writers)
        .map(|w| {
            let semaphore = Arc::clone(&semaphore);
            let tag = tag.clone();
            async move {
                let _permit = semaphore.acquire().await?;
                for op in 0..writes_per_writer {
                    register(client, server, &json!({ &tag: format!("{}-{}", w, op) })).await?;
                }
                Ok::<_, anyhow::Error>(())
            }
        })
        .collect();

    let reader_futures: Vec<_> = (0..writers)
        .map(|_| {
            let semaphore = Arc::clone(&semaphore);
            let max_seen = Arc::clone(&max_seen);
            let tag = tag.clone();
            async move {
                let _permit = semaphore.acquire().await?;
                let entries = list(client, server, &[("filter", tag.as_str())]).await?;
                ensure!(
                    entries.iter().all(|e| e.get(&tag).is_some()),
                    "filter returned an entry without the key"
                );
                max_seen.fetch_max(entries.len(), Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            }
        })
        .collect();

    let (writes, reads) = tokio::join!(join_all(writer_futures), join_all(reader_futures));
    writes.into_iter().collect::<Result<Vec<_>>>()?;
    reads.into_iter().collect::<Result<Vec<_>>>()?;

    let total = list(client, server, &[("filter", tag.as_str())]).await?.len();
    ensure!(
        total == writers * writes_per_writer,
        "expected {} entries, found {}",
        writers * writes_per_writer,
        total
    );
    ensure!(max_seen.load(Ordering::SeqCst) <= total, "reader saw phantom entries");

    tracing::info!("   ✓ {} writes visible, readers never saw partial state", total);
    Ok(())
}

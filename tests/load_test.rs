//! Load testing through the full gateway pipeline.

use std::time::Instant;

mod common;

#[tokio::test]
async fn test_load_performance() {
    let backend = common::start_mock_backend("Hello from upstream").await;

    let mut config = common::gateway_config(backend.port());
    // Every task shares the loopback address and would drain one bucket.
    config.rate_limit.enabled = false;
    let gateway = common::start_gateway(config).await;

    let concurrency = 20;
    let requests_per_task = 50;
    let total_requests = concurrency * requests_per_task;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let url = common::url(&gateway, "frontend", "/");
    let start = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let client = client.clone();
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for _ in 0..requests_per_task {
                let req_start = Instant::now();
                if let Ok(res) = client.get(&url).send().await {
                    if res.status().is_success() && res.bytes().await.is_ok() {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();

    assert!(!all_latencies.is_empty(), "No successful requests recorded");
    assert_eq!(all_latencies.len(), total_requests);

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p95 = all_latencies[(all_latencies.len() as f64 * 0.95) as usize];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", rps);
    println!("P50 Latency:    {:?}", p50);
    println!("P95 Latency:    {:?}", p95);
    println!("P99 Latency:    {:?}", p99);
    println!("Success Rate:   {}/{}", all_latencies.len(), total_requests);
    println!("-------------------------\n");

    gateway.shutdown().await;
}

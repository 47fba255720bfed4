//! Coalescing Demo
//!
//! Shows how concurrent single-key lookups are merged into windowed
//! multi-key backend calls:
//! - concurrent lookups sharing one call
//! - duplicate keys merged into one backend entry
//! - windows split by the maximum batch size
//! - tumbling windows under sustained traffic
//!
//! Usage:
//!   RUST_LOG=batch_coalescer=debug cargo run --example coalescing_demo

use async_trait::async_trait;
use batch_coalescer::{
    BackendClient, CallOptions, Coalescer, CoalescerConfig, ConfigPatch, WindowMode,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory account store that pretends to be a remote RPC node.
struct AccountNode {
    endpoint: String,
    balances: HashMap<String, u64>,
    calls: AtomicUsize,
}

impl AccountNode {
    fn new(endpoint: &str) -> Self {
        let balances = (0..20)
            .map(|i| (format!("acct-{:02}", i), 1_000 * (i as u64 + 1)))
            .collect();
        Self {
            endpoint: endpoint.to_string(),
            balances,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BackendClient for AccountNode {
    type Record = u64;

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch_many(
        &self,
        keys: &[String],
        options: &CallOptions,
    ) -> batch_coalescer::Result<Vec<Option<u64>>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        println!("  backend call #{n}: {} keys {:?} (options: {options})", keys.len(), keys);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(keys.iter().map(|k| self.balances.get(k).copied()).collect())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Batch Coalescer Demo ===\n");

    let engine = Coalescer::with_config(
        CoalescerConfig::new()
            .with_time_window(Duration::from_millis(50))
            .with_maximum_batch_size(4)
            .with_call_options(serde_json::json!({"commitment": "confirmed"})),
    )?;
    let node = Arc::new(AccountNode::new("memory://devnet"));

    // Example 1: concurrent lookups
    println!("--- Example 1: Concurrent lookups ---");
    let (a, b, c) = tokio::join!(
        engine.submit(&node, "acct-01"),
        engine.submit(&node, "acct-02"),
        engine.submit(&node, "acct-03"),
    );
    println!("  balances: {:?} {:?} {:?}\n", a?, b?, c?);

    // Example 2: duplicates and chunking
    println!("--- Example 2: Duplicates and chunking (max 4 keys per call) ---");
    let keys = ["acct-04", "acct-05", "acct-04", "acct-06", "acct-07", "acct-08", "nobody"];
    let tickets = keys
        .iter()
        .map(|k| engine.enqueue(&node, *k))
        .collect::<batch_coalescer::Result<Vec<_>>>()?;
    for (key, result) in keys.iter().zip(futures::future::join_all(tickets).await) {
        println!("  {key}: {:?}", result?);
    }
    println!();

    // Example 3: tumbling windows
    println!("--- Example 3: Tumbling windows under sustained traffic ---");
    engine.set_config(ConfigPatch::new().window_mode(WindowMode::Tumbling))?;
    let mut tickets = Vec::new();
    for i in 10..18 {
        tickets.push(engine.enqueue(&node, format!("acct-{i}"))?);
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
    futures::future::join_all(tickets).await;
    println!();

    let stats = engine.stats();
    println!("--- Stats ---");
    println!("  submitted:       {}", stats.submitted);
    println!("  windows closed:  {}", stats.windows_closed);
    println!("  backend calls:   {}", stats.backend_calls);
    println!("  deduplicated:    {}", stats.deduplicated);
    println!("  coalescing ratio: {:.2}", stats.coalescing_ratio());

    engine.teardown();
    Ok(())
}

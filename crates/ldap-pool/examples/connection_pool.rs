//! Connection pooling with metrics example.
//!
//! This example demonstrates pool configuration, concurrent checkouts,
//! health monitoring and graceful shutdown. It runs against the
//! in-process mock directory from `ldap-testing`, so no server is
//! needed; swap in your backend's `ConnectionFactory` implementation to
//! pool real connections.
//!
//! # Running
//!
//! ```bash
//! cargo run --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use ldap_driver_pool::{
    BlockingConnectionPool, IdlePruneStrategy, PoolConfig, PoolError, SearchValidator,
};
use ldap_testing::MockDirectory;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Connection Pool with Metrics Example ===\n");

    let directory = MockDirectory::builder()
        .connect_latency(Duration::from_millis(5))
        .build();

    // Configure the pool
    let pool_config = PoolConfig::new()
        .min_connections(2)
        .max_connections(10)
        .block_wait_time(Duration::from_secs(10))
        .validate_on_check_out(true);

    println!("Pool configuration:");
    println!("  Min connections: {}", pool_config.min_connections);
    println!("  Max connections: {}", pool_config.max_connections);
    println!("  Block wait time: {:?}", pool_config.block_wait_time);
    println!();

    let pool = Arc::new(
        BlockingConnectionPool::builder(directory.clone())
            .config(pool_config)
            .validator(SearchValidator::new())
            .prune_strategy(IdlePruneStrategy::new(
                Duration::from_secs(30),
                Duration::from_secs(120),
            ))
            .build()?,
    );
    pool.initialize().await?;

    println!("Pool initialized.\n");
    print_pool_status(&pool);

    // Example 1: Basic pool usage
    println!("\n1. Basic pool usage:");
    {
        let conn = pool.checkout().await?;
        println!("  Checked out connection {}", conn.id());
        conn.close().await?;
        // The handle is back in the pool, not closed.
    }

    // Example 2: Concurrent usage
    println!("\n2. Concurrent pool usage (10 parallel checkouts):");
    let start = tokio::time::Instant::now();
    let mut handles = vec![];

    for i in 0..10 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            let conn = pool.checkout().await?;
            // Simulate a directory operation
            tokio::time::sleep(Duration::from_millis(20)).await;
            conn.close().await?;
            Ok::<_, PoolError>(i)
        }));
    }

    let mut completed = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            completed += 1;
        }
    }
    println!("  Completed {} checkouts in {:?}", completed, start.elapsed());

    print_pool_metrics(&pool);

    // Example 3: Monitor pool health
    println!("\n3. Pool health monitoring:");
    let status = pool.status();
    let utilization = status.utilization();
    let health_status = if utilization < 70.0 {
        "HEALTHY"
    } else if utilization < 90.0 {
        "WARNING"
    } else {
        "CRITICAL"
    };
    println!("  Pool health: {}", health_status);
    println!("  Utilization: {:.1}%", utilization);

    // Example 4: A connection the caller knows is broken
    println!("\n4. Invalidating a broken connection:");
    {
        let mut conn = pool.checkout().await?;
        println!("  Checked out connection {}", conn.id());
        conn.invalidate();
        conn.close().await?;
        println!("  Invalidated; the pool destroys and replaces it.");
    }

    // Final metrics
    println!("\n5. Final pool metrics:");
    print_pool_metrics(&pool);
    print_pool_status(&pool);

    // Graceful shutdown
    println!("\n6. Graceful shutdown:");
    pool.shutdown().await;
    println!("  Pool closed; {} connections still live.", directory.live());

    Ok(())
}

fn print_pool_status(pool: &BlockingConnectionPool<MockDirectory>) {
    let status = pool.status();
    println!(
        "  Status: {}/{} connections active ({:.1}% utilization), {} idle",
        status.active,
        status.max,
        status.utilization(),
        status.available
    );
}

fn print_pool_metrics(pool: &BlockingConnectionPool<MockDirectory>) {
    let metrics = pool.metrics();
    println!("  Metrics:");
    println!("    Connections created: {}", metrics.connections_created);
    println!("    Connections destroyed: {}", metrics.connections_destroyed);
    println!(
        "    Checkout success rate: {:.2}%",
        metrics.checkout_success_rate() * 100.0
    );
    println!(
        "    Validations: {} performed, {} failed",
        metrics.validations_performed, metrics.validations_failed
    );
    println!("    Connections pruned: {}", metrics.connections_pruned);
}

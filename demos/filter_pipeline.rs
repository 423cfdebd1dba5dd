//! Number processing pipeline demonstrating filtering and transformations
//!
//! Pipeline:
//! 1. Generate: numbers 1-100
//! 2. Filter: keep only even numbers
//! 3. Transform: multiply by 10
//! 4. Sink: sum everything up
//!
//! Usage: cargo run --example filter_pipeline --release

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use conveyor::{from_iter, PipelineBuilder};

fn main() {
    tracing_subscriber::fmt::init();

    println!("Number Processing Pipeline");
    println!("==========================");
    println!("Generating 1-100, filtering evens, multiplying by 10, summing");
    println!();

    let start = Instant::now();

    let sum = Arc::new(AtomicU64::new(0));
    let count = Arc::new(AtomicU64::new(0));
    let sink_sum = Arc::clone(&sum);
    let sink_count = Arc::clone(&count);

    let pipeline = PipelineBuilder::new()
        .buffer_capacity(50)
        .generator(from_iter(1..=100u64))
        .filter(|n: u64| (n % 2 == 0).then_some(n))
        .transform(|n: u64| n * 10)
        .sink(move |n| {
            sink_sum.fetch_add(n, Ordering::Relaxed);
            sink_count.fetch_add(1, Ordering::Relaxed);
        });

    pipeline.consume();

    println!("=== Final Results ===");
    println!("Numbers kept: {}", count.load(Ordering::Relaxed));
    println!("Sum: {}", sum.load(Ordering::Relaxed));
    for index in 0..pipeline.stage_count() {
        if let Some(snapshot) = pipeline.stage_metrics(index) {
            println!(
                "Stage {index}: processed {}, filtered {}, faults {}",
                snapshot.processed, snapshot.filtered, snapshot.faults
            );
        }
    }

    println!("\nPipeline execution time: {:.3}s", start.elapsed().as_secs_f64());
}

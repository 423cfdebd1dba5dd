//! Word frequency counter pipeline
//!
//! Splits lines of text into words (a hatch stage: one line, many words),
//! drops short words, counts frequencies and prints the top-N table.
//!
//! Usage: cargo run --example word_count --release

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use conveyor::{from_iter, Hatchable, PipelineBuilder};

const TEXT: &str = "\
the wheels on the bus go round and round
round and round round and round
the wheels on the bus go round and round
all through the town";

fn main() {
    tracing_subscriber::fmt::init();

    let counts: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let sink_counts = Arc::clone(&counts);

    let lines: Vec<String> = TEXT.lines().map(String::from).collect();

    // Each popped line hatches into one output per word.
    let mut pending: Vec<String> = Vec::new();
    let pipeline = PipelineBuilder::new()
        .generator(from_iter(lines))
        .hatch(move |input: Hatchable<String>| {
            if let Some(line) = input.into_inner() {
                pending = line.split_whitespace().rev().map(String::from).collect();
            }
            pending.pop()
        })
        .filter(|word: String| (word.len() > 2).then_some(word))
        .sink(move |word| {
            *sink_counts.lock().unwrap().entry(word).or_insert(0) += 1;
        });

    pipeline.consume();

    let counts = counts.lock().unwrap();
    let mut ranked: Vec<_> = counts.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

    println!("=== Top {} words ===", ranked.len().min(10));
    for (rank, (word, count)) in ranked.iter().take(10).enumerate() {
        println!("{:2}. {} ({})", rank + 1, word, count);
    }
}

use conveyor::{
    from_iter, BufferMode, BufferQueue, Envelope, Filtered, Outcome, PipelineBuilder,
    PipelineState,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn iota(start: u64) -> impl FnMut() -> Option<u64> + Send {
    let mut next = start;
    move || {
        let value = next;
        next += 1;
        Some(value)
    }
}

#[test]
fn transform_chain_preserves_order() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&collected);

    let pipeline = PipelineBuilder::new()
        .generator(from_iter(1..=10))
        .transform(|n: i64| n * 2)
        .transform(|n: i64| n / 2)
        .sink(move |n| out.lock().unwrap().push(n));

    assert_eq!(pipeline.consume(), Outcome::Ok);
    assert_eq!(pipeline.state(), PipelineState::Idle);

    let collected = collected.lock().unwrap();
    assert_eq!(*collected, (1..=10).collect::<Vec<i64>>());
}

#[test]
fn stop_halts_an_endless_pipeline() {
    let counter = Arc::new(AtomicU64::new(0));
    let sink_counter = Arc::clone(&counter);

    let pipeline = PipelineBuilder::new()
        .buffer_capacity(64)
        .generator(iota(1))
        .sink(move |_| {
            sink_counter.fetch_add(1, Ordering::Relaxed);
        });

    assert_eq!(pipeline.run(), Outcome::Ok);
    while counter.load(Ordering::Relaxed) < 100 {
        thread::yield_now();
    }

    assert_eq!(pipeline.stop(), Outcome::Ok);
    assert!(counter.load(Ordering::Relaxed) >= 100);

    // No stage callable runs after stop returns.
    let settled = counter.load(Ordering::Relaxed);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(counter.load(Ordering::Relaxed), settled);
}

#[test]
fn filter_keeps_only_odd_values() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&collected);

    let pipeline = PipelineBuilder::new()
        .generator(from_iter(-1000..9000))
        .filter(|n: i32| (n % 2 != 0).then_some(n))
        .sink(move |n| out.lock().unwrap().push(n));

    assert_eq!(pipeline.consume(), Outcome::Ok);

    let collected = collected.lock().unwrap();
    assert_eq!(collected.len(), 5000);
    assert!(collected.iter().all(|n| n % 2 != 0));
}

#[test]
fn filter_accepts_explicit_envelopes() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&collected);

    let pipeline = PipelineBuilder::new()
        .generator(from_iter(-5..=5))
        .filter(|n: i32| {
            if n > 0 {
                Filtered::keep(n)
            } else {
                Filtered::discard()
            }
        })
        .sink(move |n| out.lock().unwrap().push(n));

    assert_eq!(pipeline.consume(), Outcome::Ok);
    assert_eq!(*collected.lock().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn hatch_emits_n_copies_of_n() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&collected);

    // An input n hatches into n copies of n: 1 -> [1], 2 -> [2, 2], ...
    let mut current = 0u32;
    let mut remaining = 0u32;
    let pipeline = PipelineBuilder::new()
        .generator(from_iter(1..=10u32))
        .hatch(move |input: conveyor::Hatchable<u32>| {
            if let Some(n) = input.into_inner() {
                current = n;
                remaining = n;
            }
            if remaining > 0 {
                remaining -= 1;
                Some(current)
            } else {
                None
            }
        })
        .sink(move |n| out.lock().unwrap().push(n));

    assert_eq!(pipeline.consume(), Outcome::Ok);

    let collected = collected.lock().unwrap();
    assert_eq!(collected.len(), 55);

    let mut expected = Vec::new();
    for n in 1..=10u32 {
        expected.extend(std::iter::repeat(n).take(n as usize));
    }
    assert_eq!(*collected, expected);
}

#[test]
fn pause_freezes_and_resume_continues() {
    let counter = Arc::new(AtomicU64::new(0));
    let sink_counter = Arc::clone(&counter);

    let pipeline = PipelineBuilder::new()
        .buffer_capacity(64)
        .generator(iota(1))
        .sink(move |_| {
            sink_counter.fetch_add(1, Ordering::Relaxed);
        });

    assert_eq!(pipeline.run(), Outcome::Ok);
    while counter.load(Ordering::Relaxed) < 100 {
        thread::yield_now();
    }

    assert_eq!(pipeline.pause(), Outcome::Ok);
    assert_eq!(pipeline.state(), PipelineState::Paused);
    assert_eq!(pipeline.pause(), Outcome::NoOp);

    // The sink may finish the one call already in flight, nothing more.
    let on_pause = counter.load(Ordering::Relaxed);
    thread::sleep(Duration::from_millis(50));
    let settled = counter.load(Ordering::Relaxed);
    assert!(settled - on_pause <= 1);

    thread::sleep(Duration::from_millis(20));
    assert_eq!(counter.load(Ordering::Relaxed), settled);

    assert_eq!(pipeline.run(), Outcome::Ok);
    while counter.load(Ordering::Relaxed) <= settled {
        thread::yield_now();
    }

    assert_eq!(pipeline.stop(), Outcome::Ok);
}

#[test]
fn stop_from_paused_does_not_deadlock() {
    let pipeline = PipelineBuilder::new()
        .buffer_capacity(8)
        .generator(iota(1))
        .sink(|_| {});

    assert_eq!(pipeline.run(), Outcome::Ok);
    thread::sleep(Duration::from_millis(10));
    assert_eq!(pipeline.pause(), Outcome::Ok);
    assert_eq!(pipeline.stop(), Outcome::Ok);
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[test]
fn pipeline_restarts_after_stop() {
    let counter = Arc::new(AtomicU64::new(0));
    let sink_counter = Arc::clone(&counter);

    let pipeline = PipelineBuilder::new()
        .buffer_capacity(64)
        .generator(iota(1))
        .sink(move |_| {
            sink_counter.fetch_add(1, Ordering::Relaxed);
        });

    assert_eq!(pipeline.run(), Outcome::Ok);
    while counter.load(Ordering::Relaxed) < 10 {
        thread::yield_now();
    }
    assert_eq!(pipeline.stop(), Outcome::Ok);

    let after_first_run = counter.load(Ordering::Relaxed);
    assert_eq!(pipeline.run(), Outcome::Ok);
    while counter.load(Ordering::Relaxed) <= after_first_run {
        thread::yield_now();
    }
    assert_eq!(pipeline.stop(), Outcome::Ok);
}

#[test]
fn consume_resumes_a_paused_pipeline() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&collected);

    let pipeline = PipelineBuilder::new()
        .generator(from_iter(1..=1000))
        .sink(move |n| out.lock().unwrap().push(n));

    assert_eq!(pipeline.run(), Outcome::Ok);
    pipeline.pause();

    // Resume-then-drain: everything still flows to the sink.
    assert_eq!(pipeline.consume(), Outcome::Ok);
    assert_eq!(collected.lock().unwrap().len(), 1000);
}

#[test]
fn dropping_a_running_pipeline_joins_workers() {
    let pipeline = PipelineBuilder::new()
        .buffer_capacity(8)
        .generator(iota(1))
        .transform(|n: u64| n + 1)
        .sink(|_| {});

    assert_eq!(pipeline.run(), Outcome::Ok);
    thread::sleep(Duration::from_millis(10));
    drop(pipeline);
}

#[test]
fn callable_errors_are_swallowed_per_item() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&collected);

    let pipeline = PipelineBuilder::new()
        .generator(from_iter(1..=10))
        .try_transform(|n: i32| {
            if n == 5 {
                Err("five is not welcome here".into())
            } else {
                Ok(n)
            }
        })
        .sink(move |n| out.lock().unwrap().push(n));

    assert_eq!(pipeline.consume(), Outcome::Ok);

    let collected = collected.lock().unwrap();
    assert_eq!(collected.len(), 9);
    assert!(!collected.contains(&5));

    let transform = pipeline.stage_metrics(1).unwrap();
    assert_eq!(transform.faults, 1);
    assert_eq!(transform.processed, 9);
}

#[test]
fn iterator_source_drains_words() {
    let words = ["The", "wheels", "on", "the", "bus", "go", "round", "and", "round", "!"];
    let lengths = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&lengths);

    let pipeline = PipelineBuilder::new()
        .generator(from_iter(words.map(String::from)))
        .transform(|w: String| w.len())
        .sink(move |n| out.lock().unwrap().push(n));

    assert_eq!(pipeline.consume(), Outcome::Ok);

    let lengths = lengths.lock().unwrap();
    assert_eq!(lengths.len(), words.len());
    for (len, word) in lengths.iter().zip(words) {
        assert_eq!(*len, word.len());
    }
}

#[test]
fn sink_panic_drops_only_the_failing_item() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&collected);

    let pipeline = PipelineBuilder::new()
        .generator(from_iter(1..=10))
        .sink(move |n: i32| {
            assert_ne!(n, 5, "sink rejects five");
            out.lock().unwrap().push(n);
        });

    // The panic on item 5 is swallowed; every other item still arrives.
    assert_eq!(pipeline.consume(), Outcome::Ok);

    let collected = collected.lock().unwrap();
    assert_eq!(*collected, vec![1, 2, 3, 4, 6, 7, 8, 9, 10]);

    let sink = pipeline.stage_metrics(1).unwrap();
    assert_eq!(sink.faults, 1);
    assert_eq!(sink.processed, 9);
}

#[test]
fn buffer_is_fifo_across_threads() {
    let buffer = BufferQueue::unbounded();
    let producer = buffer.clone();
    let handle = thread::spawn(move || {
        for i in 1..=10_000u32 {
            producer.push(Envelope::Item(i)).expect("push failed");
        }
    });

    for expected in 1..=10_000u32 {
        assert_eq!(buffer.pop().expect("pop failed"), Envelope::Item(expected));
    }
    handle.join().expect("producer thread panicked");
}

#[test]
fn closed_buffer_rejects_both_sides() {
    let buffer: BufferQueue<i32> = BufferQueue::unbounded();
    buffer.set_mode(BufferMode::Closed);
    assert!(buffer.push(1).is_err());
    assert!(buffer.pop().is_err());
}

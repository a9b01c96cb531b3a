use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pvmonitor::{
    BitSet, ChannelSource, LocalSource, MonitorConfig, MonitorElement, MonitorEngine, MonitorError,
    Monitored, Record, SourceMonitor, Structure, UpdateOutcome, Value,
};

/// Five integer fields, compared field by field.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Fields([i64; 5]);

impl Fields {
    fn with(mut self, field: usize, value: i64) -> Self {
        self.0[field] = value;
        self
    }
}

impl Monitored for Fields {
    fn field_count(&self) -> usize {
        5
    }

    fn diff_into(&self, newer: &Self, changed: &mut BitSet) {
        for (i, (a, b)) in self.0.iter().zip(&newer.0).enumerate() {
            if a != b {
                changed.set(i);
            }
        }
    }
}

fn changed<V>(el: &MonitorElement<V>) -> Vec<usize> {
    el.changed().iter().collect()
}

fn assert_partition<V: Monitored>(engine: &MonitorEngine<V>) {
    let state = engine.pool_state();
    assert_eq!(state.accounted(), state.capacity, "{state:?}");
}

#[test]
fn first_delivery_then_incremental_change() {
    let engine = MonitorEngine::new(Fields::default(), MonitorConfig::with_queue_size(2));
    engine.start().unwrap();

    let v1 = Fields::default().with(3, 10);
    assert_eq!(engine.on_update(v1), UpdateOutcome::Delivered);
    let el = engine.poll().unwrap();
    assert_eq!(changed(&el), vec![0, 1, 2, 3, 4]);
    assert_eq!(*el.value(), v1);
    engine.release(el).unwrap();

    let v2 = v1.with(3, 11);
    assert_eq!(engine.on_update(v2), UpdateOutcome::Delivered);
    let el = engine.poll().unwrap();
    assert_eq!(changed(&el), vec![3]);
    assert_eq!(*el.value(), v2);
    assert!(el.overrun().is_empty());
    engine.release(el).unwrap();
    assert_partition(&engine);
}

#[test]
fn backpressure_delivers_union_after_release() {
    let engine = MonitorEngine::new(Fields::default(), MonitorConfig::with_queue_size(2));
    engine.start().unwrap();

    let v1 = Fields::default().with(3, 10);
    engine.on_update(v1);
    let held = engine.poll().unwrap();

    let v2 = v1.with(0, 1);
    let v3 = v2.with(4, 2);
    assert_eq!(engine.on_update(v2), UpdateOutcome::Coalesced);
    assert_eq!(engine.on_update(v3), UpdateOutcome::Coalesced);
    assert!(engine.poll().is_none());
    assert_partition(&engine);

    engine.release(held).unwrap();
    assert!(engine.poll().is_none());

    assert_eq!(engine.on_update(v3), UpdateOutcome::Delivered);
    let el = engine.poll().unwrap();
    assert_eq!(changed(&el), vec![0, 4]);
    assert_eq!(*el.value(), v3);
    engine.release(el).unwrap();
    assert_partition(&engine);
}

#[test]
fn release_of_foreign_snapshot_is_a_protocol_violation() {
    let engine = MonitorEngine::new(Fields::default(), MonitorConfig::with_queue_size(2));
    let other = MonitorEngine::new(Fields::default(), MonitorConfig::with_queue_size(2));
    engine.start().unwrap();
    other.start().unwrap();

    engine.on_update(Fields::default().with(1, 1));
    other.on_update(Fields::default().with(1, 1));
    let mine = engine.poll().unwrap();
    assert!(engine.poll().is_none());
    let foreign = other.poll().unwrap();

    let before = engine.pool_state();
    let err = engine.release(foreign).unwrap_err();
    assert!(matches!(err.to_error(), MonitorError::ProtocolViolation { .. }));
    assert_eq!(engine.pool_state(), before);

    other.release(err.into_element()).unwrap();
    engine.release(mine).unwrap();
    assert_partition(&engine);
    assert_partition(&other);
}

#[test]
fn release_order_is_fifo() {
    let engine = MonitorEngine::new(Fields::default(), MonitorConfig::with_queue_size(5));
    engine.start().unwrap();
    for v in 1..=3 {
        assert_eq!(engine.on_update(Fields::default().with(0, v)), UpdateOutcome::Delivered);
    }

    let polled: Vec<_> = std::iter::from_fn(|| engine.poll()).collect();
    assert_eq!(polled.len(), 3);
    let values: Vec<i64> = polled.iter().map(|el| el.value().0[0]).collect();
    assert_eq!(values, vec![1, 2, 3]);

    let mut polled = polled.into_iter();
    let first = polled.next().unwrap();
    let second = polled.next().unwrap();
    let third = polled.next().unwrap();

    let third = engine.release(third).unwrap_err().into_element();
    let second = engine.release(second).unwrap_err().into_element();
    engine.release(first).unwrap();
    engine.release(second).unwrap();
    engine.release(third).unwrap();
    assert_eq!(engine.stats().snapshot().violations, 2);
    assert_partition(&engine);
}

#[test]
fn repeated_writes_keep_one_bit_and_last_value() {
    let engine = MonitorEngine::new(Fields::default(), MonitorConfig::with_queue_size(2));
    engine.start().unwrap();
    engine.on_update(Fields::default().with(0, 1));
    let held = engine.poll().unwrap();

    let base = Fields::default().with(0, 1);
    for v in 1..=10 {
        engine.on_update(base.with(2, v));
    }
    engine.release(held).unwrap();
    engine.on_update(base.with(2, 10));

    let el = engine.poll().unwrap();
    assert_eq!(changed(&el), vec![2]);
    assert_eq!(el.overrun().iter().collect::<Vec<_>>(), vec![2]);
    assert_eq!(el.value().0[2], 10);
    engine.release(el).unwrap();

    // Overrun does not leak into the next delivery.
    engine.on_update(base.with(2, 11));
    let el = engine.poll().unwrap();
    assert!(el.overrun().is_empty());
    engine.release(el).unwrap();
}

#[test]
fn partition_holds_through_mixed_traffic() {
    let engine = MonitorEngine::new(Fields::default(), MonitorConfig::with_queue_size(3));
    engine.start().unwrap();
    let mut held = std::collections::VecDeque::new();

    for step in 0..60i64 {
        engine.on_update(Fields::default().with((step % 5) as usize, step));
        assert_partition(&engine);
        if step % 3 == 0 {
            if let Some(el) = engine.poll() {
                held.push_back(el);
            }
        }
        if step % 4 == 0 {
            if let Some(el) = held.pop_front() {
                engine.release(el).unwrap();
            }
        }
        assert_partition(&engine);
    }
    while let Some(el) = held.pop_front() {
        engine.release(el).unwrap();
    }
    while let Some(el) = engine.poll() {
        engine.release(el).unwrap();
    }
    let state = engine.pool_state();
    assert_eq!(state.pending, 0);
    assert_eq!(state.outstanding, 0);
    assert_partition(&engine);
}

fn power_supply() -> Arc<Structure> {
    Structure::builder()
        .field("current", Value::Float(0.0))
        .field("voltage", Value::Float(0.0))
        .field("status", Value::from("OFF"))
        .field("waveform", Value::FloatArray(vec![0.0; 4]))
        .build()
        .unwrap()
}

#[test]
fn record_changes_map_to_field_names() {
    let structure = power_supply();
    let engine = MonitorEngine::new(Record::new(Arc::clone(&structure)), MonitorConfig::default());
    let source = Arc::new(LocalSource::new());
    let monitor = SourceMonitor::new(Arc::new(engine), Arc::clone(&source));
    monitor.start().unwrap();
    let engine = monitor.engine();

    let on = Record::new(Arc::clone(&structure)).with("status", "ON");
    source.post(on.clone());
    let el = engine.poll().unwrap();
    assert_eq!(el.changed().count(), 4);
    engine.release(el).unwrap();

    source.post(on.clone().with("current", 1.25).with("waveform", vec![0.0, 1.0, 0.0, -1.0]));
    let el = engine.poll().unwrap();
    assert_eq!(structure.names_of(el.changed()), vec!["current", "waveform"]);
    assert_eq!(el.value().get("current"), Some(&Value::Float(1.25)));
    engine.release(el).unwrap();

    monitor.stop();
    assert_eq!(source.subscriber_count(), 0);
}

#[test]
fn record_from_another_structure_is_rejected() {
    let single = |name: &str| Structure::builder().field(name, Value::Int(0)).build().unwrap();
    let engine = MonitorEngine::new(Record::new(single("a")), MonitorConfig::default());
    engine.start().unwrap();

    let foreign = Record::new(single("b")).with("b", 5);
    assert_eq!(engine.on_update(foreign), UpdateOutcome::Rejected);
    assert!(engine.poll().is_none());
    assert_eq!(engine.stats().snapshot().rejected, 1);

    // The engine keeps its own layout and still accepts matching records.
    let own = Record::new(single("a")).with("a", 5);
    assert_eq!(engine.on_update(own), UpdateOutcome::Delivered);
    let el = engine.poll().unwrap();
    assert_eq!(el.value().get("a"), Some(&Value::Int(5)));
    assert_eq!(el.value().get("b"), None);
    engine.release(el).unwrap();
}

#[test]
fn nan_to_nan_is_not_a_change() {
    let structure = power_supply();
    let engine = MonitorEngine::new(Record::new(Arc::clone(&structure)), MonitorConfig::default());
    engine.start().unwrap();

    let nan = Record::new(Arc::clone(&structure)).with("voltage", f64::NAN);
    assert_eq!(engine.on_update(nan.clone()), UpdateOutcome::Delivered);
    let el = engine.poll().unwrap();
    engine.release(el).unwrap();

    assert_eq!(engine.on_update(nan), UpdateOutcome::Unchanged);
    assert!(engine.poll().is_none());
}

#[test]
fn threaded_producer_and_blocking_consumer() {
    const UPDATES: i64 = 500;

    let structure = power_supply();
    let config = MonitorConfig::from_options("queueSize=3,flushOnRelease=true").unwrap();
    let engine = Arc::new(MonitorEngine::new(Record::new(Arc::clone(&structure)), config));
    let source = Arc::new(ChannelSource::new(UPDATES as usize).unwrap());
    let monitor = SourceMonitor::new(Arc::clone(&engine), Arc::clone(&source));
    monitor.start().unwrap();
    let stream = engine.stream();

    let producer = {
        let source = Arc::clone(&source);
        let structure = Arc::clone(&structure);
        thread::spawn(move || {
            for i in 1..=UPDATES {
                let record = Record::new(Arc::clone(&structure)).with("current", i as f64);
                assert!(source.post(record));
            }
        })
    };

    let mut last = 0.0;
    let mut deliveries = 0u64;
    while last < UPDATES as f64 {
        let el = stream.recv_timeout(Duration::from_secs(10)).unwrap();
        let current = el.value().get("current").and_then(Value::as_float).unwrap();
        assert!(current > last, "deliveries went backwards: {current} after {last}");
        assert!(el.changed().get(0));
        last = current;
        deliveries += 1;
        stream.release(el).unwrap();
    }
    producer.join().unwrap();

    monitor.stop();
    source.shutdown();
    assert_eq!(source.dropped(), 0);

    let stats = engine.stats().snapshot();
    assert_eq!(stats.updates, UPDATES as u64);
    assert_eq!(stats.deliveries, deliveries);
    assert_eq!(stats.violations, 0);
    assert_partition(&engine);
}

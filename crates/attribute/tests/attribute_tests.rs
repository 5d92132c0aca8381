//! Integration tests for tensorcol-attribute
//!
//! These tests drive a whole column through its public API:
//!
//! 1. **Scenarios** - mapped column set/get/clear, loading a saved column
//! 2. **Persistence** - save/load through files
//! 3. **Compaction** - commit-triggered compaction and guard interaction
//! 4. **Concurrency** - readers racing a writer that compacts

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use rand::{Rng, SeedableRng};
use tempfile::TempDir;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use tensorcol_attribute::{AttributeConfig, FileHeader, TensorAttribute};
use tensorcol_core::{Error, FastValue, Index, Label, TensorSpec, Value, ValueType};
use tensorcol_storage::data_buffer::SLOT_SIZE;
use tensorcol_streamed::{decode_to_fast_value, IndexMode};

// ============================================================================
// Helpers
// ============================================================================

fn sparse(cells: &[(&str, f64)]) -> FastValue {
    let mut spec = TensorSpec::new(ValueType::from_spec("tensor(x{})").unwrap());
    for (label, cell) in cells {
        spec = spec.add([("x", *label)], *cell);
    }
    spec.to_value().unwrap()
}

fn spec_of(value: &dyn Value) -> TensorSpec {
    TensorSpec::from_value(value)
}

fn compacting_config() -> AttributeConfig {
    let mut config = AttributeConfig::new("tensor(x{})");
    config.compaction.dead_slack_bytes = 0;
    config.store.min_entries_per_buffer = 64;
    config.store.max_entries_per_buffer = 64;
    config
}

/// Records the target and message of every event
#[derive(Clone, Default)]
struct EventStore(Arc<Mutex<Vec<(String, String)>>>);

impl EventStore {
    fn has(&self, target: &str, message: &str) -> bool {
        self.0
            .lock()
            .unwrap()
            .iter()
            .any(|(t, m)| t == target && m == message)
    }
}

struct MessageVisitor(HashMap<String, String>);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
}

impl<S: Subscriber> Layer<S> for EventStore {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(HashMap::new());
        event.record(&mut visitor);
        let message = visitor.0.remove("message").unwrap_or_default();
        self.0
            .lock()
            .unwrap()
            .push((event.metadata().target().to_string(), message));
    }
}

fn capture_events() -> (EventStore, tracing::subscriber::DefaultGuard) {
    let store = EventStore::default();
    let subscriber = tracing_subscriber::registry().with(store.clone());
    (store, tracing::subscriber::set_default(subscriber))
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_mapped_column_scenario() {
    for mode in [IndexMode::Streamed, IndexMode::Fast] {
        let mut config = AttributeConfig::new("tensor(x{})");
        config.index_mode = mode;
        let mut attr = TensorAttribute::new("scenario", config).unwrap();
        attr.add_docs(2);
        attr.set_tensor(0, &sparse(&[("a", 1.0), ("b", 2.0)])).unwrap();
        attr.set_tensor(1, &sparse(&[("a", 3.0)])).unwrap();
        attr.commit();

        let doc0 = attr.get_tensor(0).unwrap();
        assert_eq!(spec_of(&doc0), spec_of(&sparse(&[("a", 1.0), ("b", 2.0)])));

        let a: &[u8] = b"a";
        let mut view = doc0.index().create_view(&[0]);
        view.lookup(&[a]);
        let mut rest: [&[u8]; 0] = [];
        assert_eq!(view.next_result(&mut rest), Some(0));
        assert_eq!(view.next_result(&mut rest), None);
        drop(view);
        drop(doc0);

        assert_eq!(attr.clear_doc(0), 1);
        attr.commit();
        assert!(attr.get_tensor(0).is_none());
        let doc1 = attr.get_tensor(1).unwrap();
        assert_eq!(spec_of(&doc1), spec_of(&sparse(&[("a", 3.0)])));
    }
}

#[test]
fn test_load_scenario() {
    let blob: Vec<u8> = [0u8, 0, 0, 0, 0, 0, 0, 1]
        .iter()
        .copied()
        .chain(2.5f32.to_le_bytes())
        .collect();
    assert_eq!(blob.len(), 12);

    let mut file = Vec::new();
    FileHeader::new(2, 7).write_to(&mut file).unwrap();
    file.extend_from_slice(&0u32.to_le_bytes());
    file.extend_from_slice(&12u32.to_le_bytes());
    file.extend_from_slice(&blob);

    let mut attr = TensorAttribute::new("dense", AttributeConfig::new("tensor<float>(x[1])")).unwrap();
    assert!(attr.load_from(&mut &file[..]).unwrap());
    assert_eq!(attr.num_docs(), 2);
    assert_eq!(attr.committed_doc_id_limit(), 2);
    assert_eq!(attr.create_serial_num(), 7);
    assert!(attr.get_tensor(0).is_none());

    let expected = decode_to_fast_value(&blob, attr.value_type()).unwrap();
    let loaded = attr.get_tensor(1).unwrap();
    assert_eq!(spec_of(&loaded), spec_of(&expected));
    assert_eq!(loaded.cells().get(0), 2.5);
    assert_eq!(attr.status().num_values, 1);
}

#[test]
fn test_load_rejects_unknown_version() {
    let mut file = Vec::new();
    FileHeader {
        version: 2,
        doc_id_limit: 0,
        create_serial_num: 0,
    }
    .write_to(&mut file)
    .unwrap();
    let mut attr = TensorAttribute::new("t", AttributeConfig::default()).unwrap();
    let err = attr.load_from(&mut &file[..]).unwrap_err();
    assert!(matches!(err, Error::UnsupportedVersion { version: 2, .. }));
}

// ============================================================================
// Corrupt Input
// ============================================================================

fn file_with_blob(doc_id_limit: u32, declared_size: u32, blob: &[u8]) -> Vec<u8> {
    let mut file = Vec::new();
    FileHeader::new(doc_id_limit, 3).write_to(&mut file).unwrap();
    file.extend_from_slice(&declared_size.to_le_bytes());
    file.extend_from_slice(blob);
    file
}

fn repeated_address_blob() -> Vec<u8> {
    let mut blob = vec![0, 0, 0, 1, 0, 0, 0, 2, 1, b'a', 1, b'a'];
    blob.extend_from_slice(&1.0f64.to_le_bytes());
    blob.extend_from_slice(&2.0f64.to_le_bytes());
    blob
}

fn corrupt_files() -> Vec<(&'static str, Vec<u8>)> {
    let repeated = repeated_address_blob();
    let mut truncated_header = Vec::new();
    FileHeader::new(1, 0).write_to(&mut truncated_header).unwrap();
    truncated_header.truncate(9);
    vec![
        ("repeated address", file_with_blob(1, repeated.len() as u32, &repeated)),
        ("oversized blob", file_with_blob(1, 0xffff_fff0, &[0, 0, 0, 1])),
        ("huge doc id limit", file_with_blob(u32::MAX, 0, &[])),
        ("truncated header", truncated_header),
    ]
}

#[test]
fn test_corrupt_load_keeps_previous_contents() {
    for mode in [IndexMode::Streamed, IndexMode::Fast] {
        let mut config = AttributeConfig::new("tensor(x{})");
        config.index_mode = mode;
        let mut attr = TensorAttribute::new("corrupt", config).unwrap();
        let doc = attr.add_doc();
        attr.set_tensor(doc, &sparse(&[("a", 1.0)])).unwrap();
        attr.commit();
        let reader = attr.reader();
        let expected = spec_of(&sparse(&[("a", 1.0)]));

        for (name, file) in corrupt_files() {
            let err = attr.load_from(&mut &file[..]).unwrap_err();
            assert!(err.is_corruption(), "{} in {} mode: {}", name, mode, err);
            assert_eq!(attr.committed_doc_id_limit(), 1, "{}", name);
            assert_eq!(attr.status().num_values, 1, "{}", name);
            assert_eq!(spec_of(&reader.get_tensor(0).unwrap()), expected, "{}", name);
            assert_eq!(spec_of(&attr.get_tensor_copy(0).unwrap()), expected, "{}", name);
        }
    }
}

#[test]
fn test_repeated_address_rejected_on_store() {
    let mut attr = TensorAttribute::new("corrupt", AttributeConfig::new("tensor(x{})")).unwrap();
    let doc = attr.add_doc();
    let err = attr.set_encoded_tensor(doc, &repeated_address_blob()).unwrap_err();
    assert!(err.is_corruption());
    attr.commit();
    assert!(attr.get_tensor(doc).is_none());
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_save_load_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mixed.tensor");
    let tensor_type = "tensor<float>(x{},y[2])";
    let value_type = ValueType::from_spec(tensor_type).unwrap();
    let value = |label: &str, base: f64| {
        TensorSpec::new(value_type.clone())
            .add([("x", Label::from(label)), ("y", Label::from(0u32))], base)
            .add([("x", Label::from(label)), ("y", Label::from(1u32))], base + 0.5)
            .to_value()
            .unwrap()
    };

    let mut attr = TensorAttribute::new("mixed", AttributeConfig::new(tensor_type)).unwrap();
    attr.add_docs(5);
    attr.set_create_serial_num(99);
    for doc in [0u32, 2, 3] {
        attr.set_tensor(doc, &value(&format!("l{}", doc), doc as f64)).unwrap();
    }
    attr.commit();
    attr.save_to_path(&path).unwrap();

    let mut loaded = TensorAttribute::new("mixed", AttributeConfig::new(tensor_type)).unwrap();
    let reader = loaded.reader();
    assert!(loaded.load_from_path(&path).unwrap());
    assert_eq!(loaded.num_docs(), 5);
    assert_eq!(loaded.create_serial_num(), 99);
    for doc in 0..5 {
        assert_eq!(
            reader.get_tensor(doc).map(|v| spec_of(&v)),
            attr.get_tensor(doc).map(|v| spec_of(&v)),
            "doc {}",
            doc
        );
    }
}

#[test]
fn test_saver_runs_on_another_thread() {
    let mut attr = TensorAttribute::new("t", AttributeConfig::default()).unwrap();
    attr.add_docs(3);
    attr.set_tensor(1, &sparse(&[("a", 1.0)])).unwrap();
    attr.commit();

    let saver = attr.init_save();
    // later writes do not leak into the snapshot
    attr.set_tensor(1, &sparse(&[("b", 2.0)])).unwrap();
    attr.set_tensor(2, &sparse(&[("c", 3.0)])).unwrap();
    attr.commit();
    attr.commit();

    let bytes = thread::spawn(move || {
        let mut out = Vec::new();
        saver.save_to(&mut out).unwrap();
        out
    })
    .join()
    .unwrap();

    let mut loaded = TensorAttribute::new("t", AttributeConfig::default()).unwrap();
    loaded.load_from(&mut &bytes[..]).unwrap();
    assert_eq!(
        loaded.get_tensor(1).map(|v| spec_of(&v)),
        Some(spec_of(&sparse(&[("a", 1.0)])))
    );
    assert!(loaded.get_tensor(2).is_none());
}

#[test]
fn test_config_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("attribute.toml");
    std::fs::write(
        &path,
        "tensor_type = \"tensor(x{},y{})\"\nindex_mode = \"fast\"\n\n[store]\nmin_entries_per_buffer = 8\n",
    )
    .unwrap();
    let config = AttributeConfig::from_path(&path).unwrap();
    assert_eq!(config.index_mode, IndexMode::Fast);
    assert_eq!(config.store.min_entries_per_buffer, 8);
    let attr = TensorAttribute::new("t", config).unwrap();
    assert_eq!(attr.value_type().count_mapped_dimensions(), 2);

    let missing = AttributeConfig::from_path(&dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(missing, Error::Config(_)));
}

// ============================================================================
// Compaction
// ============================================================================

#[test]
fn test_commit_compacts_dead_space() {
    let (events, _guard) = capture_events();
    let mut attr = TensorAttribute::new("t", compacting_config()).unwrap();
    attr.add_docs(8);
    for doc in 0..8 {
        attr.set_tensor(doc, &sparse(&[("old", doc as f64)])).unwrap();
    }
    attr.commit();
    assert_eq!(attr.compact_generation(), 0);

    for doc in 0..8 {
        attr.set_tensor(doc, &sparse(&[("new", doc as f64)])).unwrap();
    }
    attr.commit();

    assert!(attr.compact_generation() > 0);
    assert_eq!(attr.state()["compact_generation"], attr.compact_generation());
    let usage = attr.memory_usage();
    assert_eq!(usage.dead_bytes, SLOT_SIZE, "only the reserved slot is dead");
    assert_eq!(usage.allocated_bytes_on_hold, 0);
    for doc in 0..8 {
        assert_eq!(
            attr.get_tensor(doc).map(|v| spec_of(&v)),
            Some(spec_of(&sparse(&[("new", doc as f64)])))
        );
    }
    assert!(events.has("tensorcol::compaction", "Compacted buffer put on hold"));
}

#[test]
fn test_open_guard_defers_compaction() {
    let mut attr = TensorAttribute::new("t", compacting_config()).unwrap();
    attr.add_docs(8);
    for doc in 0..8 {
        attr.set_tensor(doc, &sparse(&[("old", doc as f64)])).unwrap();
    }
    attr.commit();

    let reader = attr.reader();
    let guard = reader.take_guard();
    let pinned = reader.get_tensor_data(3).unwrap();
    for doc in 0..8 {
        attr.set_tensor(doc, &sparse(&[("new", doc as f64)])).unwrap();
    }
    attr.commit();
    attr.commit();
    assert_eq!(attr.compact_generation(), 0, "replaced entries are still on hold");
    assert!(attr.memory_usage().allocated_bytes_on_hold > 0);

    drop(guard);
    attr.commit();
    assert!(attr.compact_generation() > 0);
    // bytes resolved before the compaction stay valid
    let old = decode_to_fast_value(pinned.as_slice(), attr.value_type()).unwrap();
    assert_eq!(spec_of(&old), spec_of(&sparse(&[("old", 3.0)])));
}

#[test]
fn test_compact_worst_without_dead_space_changes_nothing() {
    let mut attr = TensorAttribute::new("t", compacting_config()).unwrap();
    attr.add_docs(4);
    for doc in 0..4 {
        attr.set_tensor(doc, &sparse(&[("v", doc as f64)])).unwrap();
    }
    attr.commit();
    let before: Vec<_> = (0..4).map(|d| attr.get_tensor_data(d).unwrap().as_slice().to_vec()).collect();
    assert!(!attr.compact_worst());
    for doc in 0..4 {
        assert_eq!(attr.get_tensor_data(doc).unwrap().as_slice(), &before[doc as usize][..]);
    }
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_readers_only_see_set_values() {
    const DOCS: u32 = 32;
    const ROUNDS: usize = 400;

    let values: Vec<FastValue> = (0..6)
        .map(|i| {
            let label = format!("k{}", i);
            sparse(&[(label.as_str(), i as f64), ("shared", 1.0)])
        })
        .collect();
    let allowed: Arc<Vec<TensorSpec>> = Arc::new(values.iter().map(|v| TensorSpec::from_value(v)).collect());

    let mut attr = TensorAttribute::new("t", compacting_config()).unwrap();
    attr.add_docs(DOCS);
    attr.commit();
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let reader = attr.reader();
            let allowed = Arc::clone(&allowed);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut seen = 0usize;
                while !stop.load(Ordering::Relaxed) {
                    for doc in 0..reader.committed_doc_id_limit() {
                        if let Some(value) = reader.get_tensor(doc) {
                            assert!(allowed.contains(&spec_of(&value)));
                            seen += 1;
                        }
                    }
                }
                seen
            })
        })
        .collect();

    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    for _ in 0..ROUNDS {
        let doc = rng.gen_range(0..DOCS);
        if rng.gen_bool(0.1) {
            attr.clear_doc(doc);
        } else {
            attr.set_tensor(doc, &values[rng.gen_range(0..values.len())]).unwrap();
        }
        attr.commit();
    }
    stop.store(true, Ordering::Relaxed);
    let seen: usize = readers.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(seen > 0);
    assert!(attr.compact_generation() > 0);
}

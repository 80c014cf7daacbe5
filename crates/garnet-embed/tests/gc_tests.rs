//! GC Control Tests
//!
//! Collector toggling and liveness as seen by the host:
//! - Immediates are never dead
//! - A disabled collector never frees, however much is allocated
//! - Arena save/restore decides what survives a full collection
//! - `GcPause` restores the previous state

use garnet_embed::{as_basic_object, Garnet, Value, ValueType, VmOptions};

#[test]
fn test_immediates_are_never_dead() {
    let mrb = Garnet::new();
    let immediates = [
        Value::NIL,
        Value::TRUE,
        Value::FALSE,
        Value::fixnum(7),
        Value::float(2.5),
        mrb.symbol_value("sym"),
    ];
    for enabled in [true, false] {
        mrb.set_collection_enabled(enabled);
        mrb.full_gc();
        for value in immediates {
            assert!(!mrb.is_dead(value), "{:?}", value);
        }
    }
}

#[test]
fn test_disabled_collector_never_frees() {
    let mrb = Garnet::with_options(VmOptions {
        gc_threshold: 16,
        ..Default::default()
    });
    let ai = mrb.arena_save();
    let previous = mrb.set_collection_enabled(false);
    assert!(previous);

    let mut live = mrb.live_count();
    for i in 0..500 {
        mrb.arena_restore(ai);
        mrb.string_value(&format!("garbage {}", i));
        assert!(mrb.full_gc().is_none());
        let now = mrb.live_count();
        assert!(now >= live, "live count dropped from {} to {}", live, now);
        live = now;
    }

    mrb.arena_restore(ai);
    mrb.set_collection_enabled(true);
    let freed = mrb.full_gc().unwrap();
    assert!(freed >= 500);
    assert!(mrb.live_count() < live);
}

#[test]
fn test_arena_restore_lets_string_die() {
    let mrb = Garnet::new();
    let ai = mrb.arena_save();
    let s = mrb.load_string("'a' + 'b'").unwrap();
    assert_eq!(mrb.to_string(s).unwrap(), "ab");

    mrb.full_gc();
    assert!(!mrb.is_dead(s));

    mrb.arena_restore(ai);
    mrb.full_gc();
    assert!(mrb.is_dead(s));
}

#[test]
fn test_globals_keep_objects_alive() {
    let mrb = Garnet::new();
    let ai = mrb.arena_save();
    let kept = mrb.load_string("$kept = 'kept'").unwrap();
    mrb.arena_restore(ai);
    mrb.full_gc();
    assert!(!mrb.is_dead(kept));
    assert_eq!(mrb.to_string(mrb.global("$kept")).unwrap(), "kept");
}

#[test]
fn test_pause_guard() {
    let mrb = Garnet::new();
    {
        let _pause = mrb.pause_gc();
        assert!(!mrb.collection_enabled());
        assert!(mrb.full_gc().is_none());
    }
    assert!(mrb.collection_enabled());
    assert!(mrb.full_gc().is_some());

    let stats = mrb.gc_stats();
    assert!(stats.collections >= 1);
    assert!(stats.skipped >= 1);
}

#[test]
fn test_basic_object_header() {
    let mrb = Garnet::new();
    let frozen = mrb.load_string("'x'.freeze").unwrap();
    let header = as_basic_object(mrb.vm(), frozen).unwrap();
    assert_eq!(header.tt, ValueType::String);
    assert!(header.frozen);
    drop(header);

    let ai = mrb.arena_save();
    let temp = mrb.string_value("temp");
    mrb.arena_restore(ai);
    mrb.full_gc();
    assert!(as_basic_object(mrb.vm(), temp).is_none());
    assert!(as_basic_object(mrb.vm(), Value::fixnum(1)).is_none());
}

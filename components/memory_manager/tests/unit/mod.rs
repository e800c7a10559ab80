//! Unit tests for memory manager components

use core_types::{CellId, Value};
use memory_manager::{
    ActivationData, CallTarget, CellData, CellKind, CodeId, FunctionData, Heap, HeapLimits,
    PropertyAttributes, PropertyError,
};
use std::sync::Arc;

fn object(heap: &mut Heap) -> CellId {
    let root = heap.structures_mut().root(CellKind::Object, Value::null());
    heap.allocate(root, CellData::Plain).unwrap()
}

// ============================================================================
// Shape tests
// ============================================================================

#[test]
fn test_same_insertion_order_shares_structure() {
    let mut heap = Heap::default();
    let names: Vec<_> = ["a", "b", "c", "d", "e", "f", "g", "h"]
        .iter()
        .map(|n| heap.intern(n))
        .collect();
    let first = object(&mut heap);
    let second = object(&mut heap);
    for (i, name) in names.iter().enumerate() {
        heap.set_property(first, *name, Value::number(i as f64)).unwrap();
    }
    for (i, name) in names.iter().enumerate() {
        heap.set_property(second, *name, Value::number((i * 10) as f64)).unwrap();
    }
    assert_eq!(heap.structure_of(first), heap.structure_of(second));
}

#[test]
fn test_different_order_different_structure() {
    let mut heap = Heap::default();
    let a = heap.intern("a");
    let b = heap.intern("b");
    let first = object(&mut heap);
    let second = object(&mut heap);
    heap.set_property(first, a, Value::null()).unwrap();
    heap.set_property(first, b, Value::null()).unwrap();
    heap.set_property(second, b, Value::null()).unwrap();
    heap.set_property(second, a, Value::null()).unwrap();
    assert_ne!(heap.structure_of(first), heap.structure_of(second));
}

#[test]
fn test_different_attributes_different_structure() {
    let mut heap = Heap::default();
    let a = heap.intern("a");
    let first = object(&mut heap);
    let second = object(&mut heap);
    heap.define_property(first, a, Value::null(), PropertyAttributes::NONE).unwrap();
    heap.define_property(second, a, Value::null(), PropertyAttributes::DONT_ENUM).unwrap();
    assert_ne!(heap.structure_of(first), heap.structure_of(second));
}

// ============================================================================
// Collector tests
// ============================================================================

#[test]
fn test_activation_chain_is_traced() {
    let mut heap = Heap::default();
    let scope_root = heap.structures_mut().root(CellKind::Activation, Value::null());
    let outer = heap
        .allocate(
            scope_root,
            CellData::Activation(ActivationData {
                slots: vec![],
                names: Arc::from(Vec::new()),
                parent: None,
            }),
        )
        .unwrap();
    let held = object(&mut heap);
    let v = heap.intern("v");
    let inner = heap
        .allocate(
            scope_root,
            CellData::Activation(ActivationData {
                slots: vec![Value::from_cell(held)],
                names: Arc::from(vec![v]),
                parent: Some(outer),
            }),
        )
        .unwrap();
    let fn_root = heap.structures_mut().root(CellKind::Function, Value::null());
    let closure = heap
        .allocate(
            fn_root,
            CellData::Function(FunctionData {
                target: CallTarget::Script(CodeId(0)),
                scope: Some(inner),
                name: None,
                arity: 0,
            }),
        )
        .unwrap();
    heap.clear_temporaries();

    heap.collect([Value::from_cell(closure)], []);
    assert!(heap.is_live(outer));
    assert!(heap.is_live(inner));
    assert!(heap.is_live(held));
}

#[test]
fn test_prototypes_are_traced_through_structures() {
    let mut heap = Heap::default();
    let proto = object(&mut heap);
    let root = heap
        .structures_mut()
        .root(CellKind::Object, Value::from_cell(proto));
    let child = heap.allocate(root, CellData::Plain).unwrap();
    heap.clear_temporaries();

    heap.collect([Value::from_cell(child)], []);
    assert!(heap.is_live(proto));
}

#[test]
fn test_dictionary_structures_released_with_owner() {
    let mut heap = Heap::default();
    let obj = object(&mut heap);
    let a = heap.intern("a");
    heap.set_property(obj, a, Value::null()).unwrap();
    heap.delete_property(obj, a).unwrap();
    let dict = heap.structure_of(obj).unwrap();
    let slots = heap.structures().len();
    heap.clear_temporaries();
    let summary = heap.collect([], []);
    assert_eq!(summary.freed_structures, 2);
    assert!(!heap.structures().is_live(dict));

    let other = object(&mut heap);
    heap.set_property(other, a, Value::null()).unwrap();
    heap.delete_property(other, a).unwrap();
    assert!(heap.structures().get(heap.structure_of(other).unwrap()).is_dictionary());
    assert_eq!(heap.structures().len(), slots);
}

#[test]
fn test_structures_of_dead_prototypes_are_reclaimed() {
    let mut heap = Heap::default();
    let x = heap.intern("x");
    heap.structures_mut().root(CellKind::Object, Value::null());
    let base = heap.structures().live_count();
    let mut counts = Vec::new();
    for _ in 0..3 {
        for _ in 0..100 {
            let prototype = object(&mut heap);
            let root = heap
                .structures_mut()
                .root(CellKind::Object, Value::from_cell(prototype));
            let instance = heap.allocate(root, CellData::Plain).unwrap();
            heap.set_property(instance, x, Value::null()).unwrap();
        }
        heap.clear_temporaries();
        heap.collect([], []);
        counts.push((heap.live_cells(), heap.structures().live_count()));
    }
    assert_eq!(counts, [(0, base); 3]);
    assert!(heap.structures().len() <= base + 200);
}

#[test]
fn test_structures_in_use_survive_collection() {
    let mut heap = Heap::default();
    let x = heap.intern("x");
    let prototype = object(&mut heap);
    let root = heap
        .structures_mut()
        .root(CellKind::Object, Value::from_cell(prototype));
    let instance = heap.allocate(root, CellData::Plain).unwrap();
    heap.set_property(instance, x, Value::number(1.0)).unwrap();
    let shape = heap.structure_of(instance).unwrap();
    heap.clear_temporaries();

    let summary = heap.collect([Value::from_cell(instance)], []);
    assert_eq!(summary.freed_structures, 0);
    assert!(heap.structures().is_live(root));
    assert!(heap.structures().is_live(shape));

    let twin = heap.allocate(root, CellData::Plain).unwrap();
    heap.set_property(twin, x, Value::number(2.0)).unwrap();
    assert_eq!(heap.structure_of(twin), Some(shape));
    assert_eq!(heap.get_property(instance, x), Value::number(1.0));
}

#[test]
fn test_out_of_memory_after_collection_fails() {
    let cell_size = {
        let mut sizing = Heap::default();
        object(&mut sizing);
        sizing.live_bytes()
    };
    let mut heap = Heap::new(HeapLimits {
        gc_threshold: cell_size,
        max_bytes: cell_size * 2,
    });
    let a = object(&mut heap);
    let b = object(&mut heap);
    heap.collect([Value::from_cell(a), Value::from_cell(b)], []);
    let root = heap.structures_mut().root(CellKind::Object, Value::null());
    assert!(heap.allocate(root, CellData::Plain).is_err());
}

#[test]
fn test_element_growth_respects_hard_limit() {
    let mut heap = Heap::new(HeapLimits {
        gc_threshold: 64 * 1024,
        max_bytes: 64 * 1024,
    });
    let root = heap.structures_mut().root(CellKind::Array, Value::null());
    let arr = heap.allocate(root, CellData::Array(Vec::new())).unwrap();
    let length = heap.intern("length");
    let before = heap.live_bytes();

    for huge in [10_000_000.0, 4_294_967_294.0] {
        assert_eq!(
            heap.set_property(arr, length, Value::number(huge)),
            Err(PropertyError::OutOfMemory)
        );
        assert_eq!(heap.array_length(arr), Some(0));
        assert_eq!(heap.live_bytes(), before);
    }

    let mut appended = 0;
    let error = loop {
        match heap.set_index(arr, appended, Value::number(1.0)) {
            Ok(_) => appended += 1,
            Err(error) => break error,
        }
        assert!(heap.live_bytes() <= heap.limits().max_bytes);
    };
    assert_eq!(error, PropertyError::OutOfMemory);
    assert!(appended > 0);
    assert_eq!(heap.array_length(arr), Some(appended));
    assert!(heap.live_bytes() <= heap.limits().max_bytes);
}

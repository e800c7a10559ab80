//! Unit tests for interpreter components

use bytecode_system::{CodeBlock, Opcode};
use core_types::{CellId, ErrorKind, Value, VmError};
use interpreter::{
    BinaryOp, CacheState, InlineCache, StubArg, StubId, StubReturn, UnaryOp, Unwind, Vm,
    VmConfig, EXCEPTION_SENTINEL, NO_SITE, POLYMORPHIC_CACHE_SIZE,
};

// ============================================================================
// Inline caches
// ============================================================================

#[test]
fn test_cache_scans_entries_in_insertion_order() {
    let mut cache: InlineCache<u32, &'static str> = InlineCache::new();
    cache.update(1, "one");
    cache.update(2, "two");
    assert_eq!(cache.lookup(1), Some("one"));
    assert_eq!(cache.lookup(2), Some("two"));
    assert_eq!(cache.lookup(3), None);
    assert_eq!(cache.state(), CacheState::Polymorphic(2));
}

#[test]
fn test_megamorphic_never_recovers() {
    let mut cache: InlineCache<u32, u32> = InlineCache::new();
    for n in 0..=POLYMORPHIC_CACHE_SIZE as u32 {
        cache.update(n, n * 10);
    }
    assert_eq!(cache.state(), CacheState::Megamorphic);
    assert_eq!(cache.lookup(0), None);
    cache.update(0, 0);
    assert_eq!(cache.state(), CacheState::Megamorphic);
}

// ============================================================================
// Value operations
// ============================================================================

#[test]
fn test_arithmetic_operators() {
    let mut vm = Vm::default();
    let cases = [
        (BinaryOp::Sub, 7.0, 2.0, 5.0),
        (BinaryOp::Mul, 7.0, 2.0, 14.0),
        (BinaryOp::Div, 7.0, 2.0, 3.5),
        (BinaryOp::Mod, 7.0, 2.0, 1.0),
        (BinaryOp::Mod, -7.0, 2.0, -1.0),
        (BinaryOp::ShiftLeft, 1.0, 33.0, 2.0),
        (BinaryOp::ShiftRight, -8.0, 1.0, -4.0),
        (BinaryOp::UnsignedShiftRight, -1.0, 28.0, 15.0),
        (BinaryOp::BitXor, 6.0, 3.0, 5.0),
    ];
    for (op, lhs, rhs, expected) in cases {
        let result = vm.binary_op(op, Value::number(lhs), Value::number(rhs)).unwrap();
        assert_eq!(result, Value::number(expected), "{op:?} {lhs} {rhs}");
    }
}

#[test]
fn test_division_by_zero_and_nan() {
    let mut vm = Vm::default();
    let inf = vm
        .binary_op(BinaryOp::Div, Value::number(1.0), Value::number(0.0))
        .unwrap();
    assert_eq!(vm.to_number(inf), f64::INFINITY);
    let nan = vm
        .binary_op(BinaryOp::Mod, Value::number(1.0), Value::number(0.0))
        .unwrap();
    assert!(vm.to_number(nan).is_nan());
    let equal = vm.binary_op(BinaryOp::StrictEqual, nan, nan).unwrap();
    assert_eq!(equal, Value::boolean(false));
}

#[test]
fn test_unary_operators() {
    let mut vm = Vm::default();
    let text = vm.new_string("12").unwrap();
    assert_eq!(vm.unary_op(UnaryOp::ToNumber, text).unwrap(), Value::number(12.0));
    assert_eq!(vm.unary_op(UnaryOp::Increment, text).unwrap(), Value::number(13.0));
    assert_eq!(vm.unary_op(UnaryOp::Negate, Value::number(3.0)).unwrap(), Value::number(-3.0));
    assert_eq!(vm.unary_op(UnaryOp::Not, Value::number(0.0)).unwrap(), Value::boolean(true));
    let kind = vm.unary_op(UnaryOp::TypeOf, Value::null()).unwrap();
    assert_eq!(vm.string_value(kind), Some("object"));
}

#[test]
fn test_relational_operators_with_undefined() {
    let mut vm = Vm::default();
    for op in [BinaryOp::Less, BinaryOp::LessEq, BinaryOp::Greater, BinaryOp::GreaterEq] {
        let result = vm.binary_op(op, Value::undefined(), Value::number(1.0)).unwrap();
        assert_eq!(result, Value::boolean(false), "{op:?}");
    }
}

#[test]
fn test_null_equals_undefined_only_loosely() {
    let vm = Vm::default();
    assert!(vm.loose_equals(Value::null(), Value::undefined()));
    assert!(!vm.strict_equals(Value::null(), Value::undefined()));
    assert!(!vm.loose_equals(Value::null(), Value::number(0.0)));
}

#[test]
fn test_display_of_numbers() {
    let vm = Vm::default();
    assert_eq!(vm.to_display_string(Value::number(1.5)), "1.5");
    assert_eq!(vm.to_display_string(Value::number(-0.0)), "0");
    assert_eq!(vm.to_display_string(Value::number(f64::NAN)), "NaN");
    assert_eq!(vm.to_display_string(Value::number(f64::NEG_INFINITY)), "-Infinity");
}

// ============================================================================
// Stub protocol
// ============================================================================

#[test]
fn test_arg_word_encodings() {
    assert_eq!(StubArg::from_int32(-5).int32(), -5);
    assert_eq!(StubArg::from_index(NO_SITE).index(), NO_SITE);
    assert_eq!(StubArg::from_value(Value::null()).value(), Value::null());
    assert_eq!(StubArg::default().value(), Value::undefined());
}

#[test]
fn test_stub_return_channels() {
    let plain = StubReturn::value(Value::number(1.0));
    assert!(!plain.is_exception());
    assert_eq!(plain.secondary, 0);
    let raised = StubReturn::exception();
    assert!(raised.is_exception());
    assert_eq!(raised.secondary, EXCEPTION_SENTINEL);
}

#[test]
fn test_property_stubs() {
    let mut vm = Vm::default();
    let object = vm.call_stub(StubId::NewObject, &[]).value;
    let name = vm.intern("size");
    let put = vm.call_stub(
        StubId::PutById,
        &[
            StubArg::from_value(object),
            StubArg::from_atom(name),
            StubArg::from_value(Value::number(3.0)),
            StubArg::from_index(NO_SITE),
        ],
    );
    assert!(!put.is_exception());
    let get = vm.call_stub(
        StubId::GetById,
        &[StubArg::from_value(object), StubArg::from_atom(name), StubArg::from_index(NO_SITE)],
    );
    assert_eq!(get.value, Value::number(3.0));

    let key = vm.new_string("size").unwrap();
    let found = vm.call_stub(StubId::In, &[StubArg::from_value(key), StubArg::from_value(object)]);
    assert_eq!(found.value, Value::boolean(true));
}

#[test]
fn test_new_array_stub_spills_arguments() {
    let mut vm = Vm::default();
    let words: Vec<StubArg> = (0..9).map(|n| StubArg::from_value(Value::number(n as f64))).collect();
    let array = vm.call_stub_varargs(StubId::NewArray, words).value;
    assert_eq!(vm.to_display_string(array), "0,1,2,3,4,5,6,7,8");
}

#[test]
fn test_call_stub_runs_script_function() {
    let mut vm = Vm::default();
    let mut function = CodeBlock::function("sum", &["a", "b"]);
    let t = function.temp();
    function.emit(Opcode::Add { dst: t, lhs: 0, rhs: 1 });
    function.emit(Opcode::Return { src: t });
    let sum = vm.load(function).unwrap();

    let result = vm.call_stub(
        StubId::Call,
        &[
            StubArg::from_value(sum),
            StubArg::from_value(Value::undefined()),
            StubArg::from_index(NO_SITE),
            StubArg::from_value(Value::number(20.0)),
            StubArg::from_value(Value::number(22.0)),
        ],
    );
    assert_eq!(result.value, Value::number(42.0));
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn test_throw_stub_parks_the_exception() {
    let mut vm = Vm::default();
    let error = vm.new_error(ErrorKind::RangeError, "too far").unwrap();
    let result = vm.call_stub(StubId::Throw, &[StubArg::from_value(error)]);
    assert!(result.is_exception());
    assert_eq!(vm.take_stub_unwind(), Unwind::Throw(error));
    // The channel is emptied by taking it
    assert!(matches!(vm.take_stub_unwind(), Unwind::Fatal(VmError::InvalidBytecode(_))));
}

#[test]
fn test_timeout_check_stub_reports_interrupt_as_fatal() {
    let mut vm = Vm::default();
    assert!(!vm.call_stub(StubId::TimeoutCheck, &[]).is_exception());
    vm.interrupt_handle().interrupt();
    let result = vm.call_stub(StubId::TimeoutCheck, &[]);
    assert!(result.is_exception());
    assert_eq!(vm.take_stub_unwind(), Unwind::Fatal(VmError::Interrupted));
}

#[test]
fn test_register_file_check_stub() {
    let mut vm = Vm::new(VmConfig {
        register_file_capacity: 64,
        ..VmConfig::default()
    })
    .unwrap();
    assert!(!vm.call_stub(StubId::RegisterFileCheck, &[StubArg::from_index(64)]).is_exception());
    let result = vm.call_stub(StubId::RegisterFileCheck, &[StubArg::from_index(65)]);
    assert!(result.is_exception());
    let Unwind::Throw(error) = vm.take_stub_unwind() else {
        panic!("expected a thrown RangeError");
    };
    let message = vm.get_property(error, "message").unwrap();
    assert_eq!(vm.string_value(message), Some("Maximum call stack size exceeded"));
}

#[test]
fn test_global_stubs() {
    let mut vm = Vm::default();
    let name = vm.intern("counter");
    let missing = vm.call_stub(StubId::GetGlobal, &[StubArg::from_atom(name), StubArg::from_index(NO_SITE)]);
    assert!(missing.is_exception());
    let Unwind::Throw(error) = vm.take_stub_unwind() else {
        panic!("expected a thrown ReferenceError");
    };
    let report = vm.describe_exception(&VmError::Exception(error));
    assert_eq!(report.kind, ErrorKind::ReferenceError);
    assert_eq!(report.message, "counter is not defined");

    vm.call_stub(
        StubId::PutGlobal,
        &[
            StubArg::from_atom(name),
            StubArg::from_value(Value::number(1.0)),
            StubArg::from_index(NO_SITE),
        ],
    );
    assert_eq!(vm.get_global("counter"), Some(Value::number(1.0)));
}

// ============================================================================
// Heap-facing helpers
// ============================================================================

#[test]
fn test_error_objects_inherit_from_kind_prototype() {
    let mut vm = Vm::default();
    let error = vm.new_error(ErrorKind::SyntaxError, "unexpected").unwrap();
    let proto = vm.intrinsics().error_prototype(ErrorKind::SyntaxError);
    let id: CellId = error.as_cell().unwrap();
    assert_eq!(vm.heap().prototype_of(id), Value::from_cell(proto));
    assert_eq!(vm.to_display_string(error), "SyntaxError: unexpected");
}

#[test]
fn test_delete_reports_non_deletable_globals() {
    let mut vm = Vm::default();
    let global = vm.global_object();
    assert!(!vm.delete_property(global, "undefined").unwrap());
    vm.set_global("temporary", Value::number(1.0)).unwrap();
    assert!(vm.delete_property(global, "temporary").unwrap());
    assert_eq!(vm.get_global("temporary"), None);
}

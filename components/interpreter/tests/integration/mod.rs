//! Integration tests for interpreter
//!
//! Whole programs assembled with the code block builders and run through
//! the dispatch loop: calls, closures, exceptions, caches, GC and hooks.

use bytecode_system::{CodeBlock, Opcode};
use core_types::{ErrorKind, Value, VmError};
use interpreter::{
    CacheState, DebugEvent, DebugEventKind, DebugListener, ReadOnlyPolicy, Vm, VmConfig,
};
use memory_manager::PropertyAttributes;
use parking_lot::Mutex;
use std::sync::Arc;

fn vm_with(config: VmConfig) -> Vm {
    Vm::new(config).unwrap()
}

/// `function <name>(<param>) { return <param> * 2 }`
fn doubler(name: &str) -> CodeBlock {
    let mut block = CodeBlock::function(name, &["x"]);
    let (two, out) = (block.temp(), block.temp());
    let c2 = block.add_constant(2.0);
    block.emit(Opcode::LoadConst { dst: two, index: c2 });
    block.emit(Opcode::Mul { dst: out, lhs: 0, rhs: two });
    block.emit(Opcode::Return { src: out });
    block
}

/// `function <name>() { throw <message> }`
fn thrower(name: &str, message: &str) -> CodeBlock {
    let mut block = CodeBlock::function(name, &[]);
    let t = block.temp();
    let c = block.add_constant(message);
    block.emit(Opcode::LoadConst { dst: t, index: c });
    block.emit(Opcode::Throw { src: t });
    block
}

/// `function <name>() { return (nested template 0)() }`
fn forwarder(name: &str, inner: CodeBlock) -> CodeBlock {
    let mut block = CodeBlock::function(name, &[]);
    let (f, undef, out) = (block.temp(), block.temp(), block.temp());
    let template = block.add_function(inner);
    let cache = block.new_call_cache();
    block.emit(Opcode::NewFunction { dst: f, function: template });
    block.emit(Opcode::LoadUndefined { dst: undef });
    block.emit(Opcode::Call {
        dst: out,
        callee: f,
        this: undef,
        first_arg: undef,
        argc: 0,
        cache,
    });
    block.emit(Opcode::Return { src: out });
    block
}

/// `function get(o) { return o.v }`
fn property_reader() -> CodeBlock {
    let mut block = CodeBlock::function("get", &["o"]);
    let out = block.temp();
    let name = block.add_identifier("v");
    let cache = block.new_property_cache();
    block.emit(Opcode::GetById { dst: out, base: 0, name, cache });
    block.emit(Opcode::Return { src: out });
    block
}

#[test]
fn test_counting_loop() {
    let mut vm = Vm::default();
    let mut block = CodeBlock::new();
    let (i, sum, limit, cond) = (block.temp(), block.temp(), block.temp(), block.temp());
    let zero = block.add_constant(0.0);
    let ten = block.add_constant(10.0);

    block.emit(Opcode::LoadConst { dst: i, index: zero });
    block.emit(Opcode::LoadConst { dst: sum, index: zero });
    block.emit(Opcode::LoadConst { dst: limit, index: ten });
    let head = block.emit(Opcode::Less { dst: cond, lhs: i, rhs: limit });
    let exit = block.emit(Opcode::JumpIfFalse { cond, target: 0 });
    block.emit(Opcode::Add { dst: sum, lhs: sum, rhs: i });
    block.emit(Opcode::Increment { dst: i, src: i });
    block.emit(Opcode::Loop { target: head });
    let end = block.emit(Opcode::Return { src: sum });
    block.patch_jump(exit, end);

    assert_eq!(vm.run(block).unwrap(), Value::number(45.0));
}

#[test]
fn test_string_concatenation() {
    let mut vm = Vm::default();
    let mut block = CodeBlock::new();
    let (a, b, out) = (block.temp(), block.temp(), block.temp());
    let hello = block.add_constant("answer: ");
    let n = block.add_constant(42.0);
    block.emit(Opcode::LoadConst { dst: a, index: hello });
    block.emit(Opcode::LoadConst { dst: b, index: n });
    block.emit(Opcode::Add { dst: out, lhs: a, rhs: b });
    block.emit(Opcode::Return { src: out });

    let result = vm.run(block).unwrap();
    assert_eq!(vm.string_value(result), Some("answer: 42"));
}

#[test]
fn test_script_call_with_arguments() {
    let mut vm = Vm::default();
    let mut add = CodeBlock::function("add", &["a", "b"]);
    let t = add.temp();
    add.emit(Opcode::Add { dst: t, lhs: 0, rhs: 1 });
    add.emit(Opcode::Return { src: t });

    let mut block = CodeBlock::new();
    let (f, a, b, this, out) = (block.temp(), block.temp(), block.temp(), block.temp(), block.temp());
    let template = block.add_function(add);
    let cache = block.new_call_cache();
    let c2 = block.add_constant(2.0);
    let c3 = block.add_constant(3.0);
    block.emit(Opcode::NewFunction { dst: f, function: template });
    block.emit(Opcode::LoadConst { dst: a, index: c2 });
    block.emit(Opcode::LoadConst { dst: b, index: c3 });
    block.emit(Opcode::LoadUndefined { dst: this });
    block.emit(Opcode::Call {
        dst: out,
        callee: f,
        this,
        first_arg: a,
        argc: 2,
        cache,
    });
    block.emit(Opcode::Return { src: out });

    assert_eq!(vm.run(block).unwrap(), Value::number(5.0));
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn test_missing_arguments_are_undefined_and_extras_are_kept() {
    let mut vm = Vm::default();
    let mut function = CodeBlock::function("args", &["a", "b"]);
    let (list, length) = (function.temp(), function.temp());
    let name = function.add_identifier("length");
    let cache = function.new_property_cache();
    function.emit(Opcode::ArgumentsObject { dst: list });
    function.emit(Opcode::GetById { dst: length, base: list, name, cache });
    function.emit(Opcode::Return { src: length });
    let f = vm.load(function).unwrap();

    let one = [Value::number(1.0)];
    assert_eq!(vm.call(f, Value::undefined(), &one).unwrap(), Value::number(1.0));
    let four = [1.0, 2.0, 3.0, 4.0].map(Value::number);
    assert_eq!(vm.call(f, Value::undefined(), &four).unwrap(), Value::number(4.0));
}

#[test]
fn test_block_scoped_closures_capture_each_iteration() {
    let mut vm = Vm::default();
    let mut getter = CodeBlock::function("get", &[]);
    let t = getter.temp();
    getter.emit(Opcode::GetScopedVar { dst: t, depth: 0, index: 0 });
    getter.emit(Opcode::Return { src: t });

    let mut block = CodeBlock::new();
    let layout = block.add_scope_layout(&["i"]);
    let template = block.add_function(getter);
    let value = block.temp();
    let closures = block.temps(3);
    let results = block.temps(3);
    let undef = block.temp();
    for k in 0..3u32 {
        let c = block.add_constant(k as f64);
        block.emit(Opcode::PushScope { layout });
        block.emit(Opcode::LoadConst { dst: value, index: c });
        block.emit(Opcode::PutScopedVar { depth: 0, index: 0, value });
        block.emit(Opcode::NewFunction { dst: closures + k, function: template });
        block.emit(Opcode::PopScope);
    }
    block.emit(Opcode::LoadUndefined { dst: undef });
    for k in 0..3u32 {
        let cache = block.new_call_cache();
        block.emit(Opcode::Call {
            dst: results + k,
            callee: closures + k,
            this: undef,
            first_arg: undef,
            argc: 0,
            cache,
        });
    }
    block.emit(Opcode::NewArray { dst: value, first: results, count: 3 });
    block.emit(Opcode::Return { src: value });

    let array = vm.run(block).unwrap();
    assert_eq!(vm.to_display_string(array), "0,1,2");
}

#[test]
fn test_closure_sees_later_writes_to_outer_variable() {
    let mut vm = Vm::default();
    let mut getter = CodeBlock::function("get", &[]);
    let t = getter.temp();
    let x_name = getter.add_identifier("x");
    getter.emit(Opcode::ResolveName { dst: t, name: x_name });
    getter.emit(Opcode::Return { src: t });

    let mut outer = CodeBlock::function("outer", &[]);
    let x = outer.declare_variable("x");
    outer.needs_activation = true;
    let (g, undef, out) = (outer.temp(), outer.temp(), outer.temp());
    let template = outer.add_function(getter);
    let cache = outer.new_call_cache();
    let one = outer.add_constant(1.0);
    let two = outer.add_constant(2.0);
    outer.emit(Opcode::LoadConst { dst: x, index: one });
    outer.emit(Opcode::NewFunction { dst: g, function: template });
    outer.emit(Opcode::LoadConst { dst: x, index: two });
    outer.emit(Opcode::LoadUndefined { dst: undef });
    outer.emit(Opcode::Call {
        dst: out,
        callee: g,
        this: undef,
        first_arg: undef,
        argc: 0,
        cache,
    });
    outer.emit(Opcode::Return { src: out });

    let f = vm.load(outer).unwrap();
    assert_eq!(vm.call(f, Value::undefined(), &[]).unwrap(), Value::number(2.0));
}

#[test]
fn test_closure_outlives_its_frame() {
    let mut vm = Vm::new(VmConfig {
        gc_threshold_bytes: 1024,
        ..VmConfig::default()
    })
    .unwrap();

    let mut counter = CodeBlock::function("next", &[]);
    let t = counter.temp();
    counter.emit(Opcode::GetScopedVar { dst: t, depth: 0, index: 0 });
    counter.emit(Opcode::Increment { dst: t, src: t });
    counter.emit(Opcode::PutScopedVar { depth: 0, index: 0, value: t });
    counter.emit(Opcode::Return { src: t });

    let mut make = CodeBlock::function("make", &["start"]);
    make.needs_activation = true;
    let f = make.temp();
    let template = make.add_function(counter);
    make.emit(Opcode::NewFunction { dst: f, function: template });
    make.emit(Opcode::Return { src: f });

    let make = vm.load(make).unwrap();
    let next = vm.call(make, Value::undefined(), &[Value::number(10.0)]).unwrap();
    let root = vm.protect(next);
    vm.release_temporaries();
    vm.collect_garbage();

    assert_eq!(vm.call(next, Value::undefined(), &[]).unwrap(), Value::number(11.0));
    assert_eq!(vm.call(next, Value::undefined(), &[]).unwrap(), Value::number(12.0));
    vm.unprotect(root);
}

#[test]
fn test_handler_three_frames_up() {
    let mut vm = Vm::default();
    let chain = forwarder("f1", forwarder("f2", thrower("f3", "boom")));

    let mut block = CodeBlock::new();
    let (f, undef, out, caught) = (block.temp(), block.temp(), block.temp(), block.temp());
    let template = block.add_function(chain);
    let cache = block.new_call_cache();
    block.emit(Opcode::NewFunction { dst: f, function: template });
    block.emit(Opcode::LoadUndefined { dst: undef });
    let call = block.emit(Opcode::Call {
        dst: out,
        callee: f,
        this: undef,
        first_arg: undef,
        argc: 0,
        cache,
    });
    block.emit(Opcode::Return { src: out });
    let handler = block.emit(Opcode::Catch { dst: caught });
    block.emit(Opcode::Return { src: caught });
    block.add_handler(call, call + 1, handler, 0);

    let result = vm.run(block).unwrap();
    assert_eq!(vm.string_value(result), Some("boom"));
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn test_uncaught_exception_reaches_the_host() {
    let mut vm = Vm::default();
    let chain = forwarder("outer", thrower("inner", "nope"));
    let f = vm.load(chain).unwrap();

    let error = vm.call(f, Value::undefined(), &[]).unwrap_err();
    let thrown = error.exception().unwrap();
    assert_eq!(vm.string_value(thrown), Some("nope"));
    assert_eq!(vm.call_depth(), 0);

    let report = vm.describe_exception(&error);
    let names: Vec<_> = report.stack.iter().map(|frame| frame.function_name.clone()).collect();
    assert_eq!(
        names,
        vec![Some("inner".to_string()), Some("outer".to_string())]
    );
}

#[test]
fn test_handler_restores_block_scope_depth() {
    let mut vm = Vm::default();
    let mut block = CodeBlock::new();
    let layout = block.add_scope_layout(&["tmp"]);
    let (value, caught) = (block.temp(), block.temp());
    let c = block.add_constant("inside");
    let start = block.emit(Opcode::PushScope { layout });
    block.emit(Opcode::PushScope { layout });
    block.emit(Opcode::LoadConst { dst: value, index: c });
    let throw = block.emit(Opcode::Throw { src: value });
    let handler = block.emit(Opcode::Catch { dst: caught });
    block.emit(Opcode::PopScope);
    block.emit(Opcode::Return { src: caught });
    block.add_handler(start + 1, throw + 1, handler, 1);

    let result = vm.run(block).unwrap();
    assert_eq!(vm.string_value(result), Some("inside"));
}

#[test]
fn test_stack_overflow_is_a_catchable_range_error() {
    let mut vm = Vm::new(VmConfig {
        max_call_depth: 200,
        ..VmConfig::default()
    })
    .unwrap();

    let mut recurse = CodeBlock::function("recurse", &[]);
    let (f, undef, out) = (recurse.temp(), recurse.temp(), recurse.temp());
    let name = recurse.add_identifier("recurse");
    let global_cache = recurse.new_property_cache();
    let call_cache = recurse.new_call_cache();
    recurse.emit(Opcode::GetGlobal { dst: f, name, cache: global_cache });
    recurse.emit(Opcode::LoadUndefined { dst: undef });
    recurse.emit(Opcode::Call {
        dst: out,
        callee: f,
        this: undef,
        first_arg: undef,
        argc: 0,
        cache: call_cache,
    });
    recurse.emit(Opcode::Return { src: out });
    let recurse = vm.load(recurse).unwrap();
    vm.set_global("recurse", recurse).unwrap();

    let mut block = CodeBlock::new();
    let (f, undef, out, caught, message) = (block.temp(), block.temp(), block.temp(), block.temp(), block.temp());
    let name = block.add_identifier("recurse");
    let message_name = block.add_identifier("message");
    let global_cache = block.new_property_cache();
    let property_cache = block.new_property_cache();
    let call_cache = block.new_call_cache();
    block.emit(Opcode::GetGlobal { dst: f, name, cache: global_cache });
    block.emit(Opcode::LoadUndefined { dst: undef });
    let call = block.emit(Opcode::Call {
        dst: out,
        callee: f,
        this: undef,
        first_arg: undef,
        argc: 0,
        cache: call_cache,
    });
    block.emit(Opcode::Return { src: out });
    let handler = block.emit(Opcode::Catch { dst: caught });
    block.emit(Opcode::GetById {
        dst: message,
        base: caught,
        name: message_name,
        cache: property_cache,
    });
    block.emit(Opcode::Return { src: message });
    block.add_handler(call, call + 1, handler, 0);

    let result = vm.run(block).unwrap();
    assert_eq!(vm.string_value(result), Some("Maximum call stack size exceeded"));
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn test_inline_caching_does_not_change_results() {
    fn run(caching: bool) -> Vec<Value> {
        let mut vm = vm_with(VmConfig {
            inline_caching: caching,
            ..VmConfig::default()
        });
        let get = vm.load(property_reader()).unwrap();
        let code = vm.function_code(get).unwrap();
        let mut results = Vec::new();
        for (extra, v) in [("a", 1.0), ("b", 2.0), ("a", 3.0), ("c", 4.0)] {
            let object = vm.new_object().unwrap();
            vm.set_property(object, extra, Value::null()).unwrap();
            vm.set_property(object, "v", Value::number(v)).unwrap();
            results.push(vm.call(get, Value::undefined(), &[object]).unwrap());
        }
        let missing = vm.new_object().unwrap();
        results.push(vm.call(get, Value::undefined(), &[missing]).unwrap());
        if !caching {
            assert_eq!(vm.property_cache_state(code, 0), Some(CacheState::Uninitialized));
        }
        results
    }

    assert_eq!(run(true), run(false));
    assert_eq!(run(true)[3], Value::number(4.0));
}

#[test]
fn test_property_site_goes_polymorphic_then_megamorphic() {
    let mut vm = Vm::default();
    let get = vm.load(property_reader()).unwrap();
    let code = vm.function_code(get).unwrap();
    assert_eq!(vm.property_cache_state(code, 0), Some(CacheState::Uninitialized));

    let expected = [
        CacheState::Monomorphic,
        CacheState::Polymorphic(2),
        CacheState::Polymorphic(3),
        CacheState::Polymorphic(4),
        CacheState::Megamorphic,
    ];
    for (n, state) in expected.into_iter().enumerate() {
        let object = vm.new_object().unwrap();
        vm.set_property(object, &format!("p{n}"), Value::null()).unwrap();
        vm.set_property(object, "v", Value::number(n as f64)).unwrap();
        let value = vm.call(get, Value::undefined(), &[object]).unwrap();
        assert_eq!(value, Value::number(n as f64));
        assert_eq!(vm.property_cache_state(code, 0), Some(state));
    }

    // Still correct once megamorphic
    let object = vm.new_object().unwrap();
    vm.set_property(object, "v", Value::number(9.0)).unwrap();
    assert_eq!(vm.call(get, Value::undefined(), &[object]).unwrap(), Value::number(9.0));
}

#[test]
fn test_cached_read_sees_prototype_change() {
    let mut vm = Vm::default();
    let get = vm.load(property_reader()).unwrap();
    let proto = vm.new_object().unwrap();
    vm.set_property(proto, "v", Value::number(1.0)).unwrap();
    let object = vm.new_object().unwrap();
    vm.set_prototype(object, proto).unwrap();

    assert_eq!(vm.call(get, Value::undefined(), &[object]).unwrap(), Value::number(1.0));
    vm.set_property(proto, "v", Value::number(2.0)).unwrap();
    assert_eq!(vm.call(get, Value::undefined(), &[object]).unwrap(), Value::number(2.0));
    vm.set_property(object, "v", Value::number(3.0)).unwrap();
    assert_eq!(vm.call(get, Value::undefined(), &[object]).unwrap(), Value::number(3.0));
}

#[test]
fn test_cached_writes_add_then_replace() {
    let mut vm = Vm::default();
    let mut set = CodeBlock::function("set", &["o", "value"]);
    let out = set.temp();
    let name = set.add_identifier("v");
    let cache = set.new_property_cache();
    set.emit(Opcode::PutById { base: 0, name, value: 1, cache });
    set.emit(Opcode::LoadUndefined { dst: out });
    set.emit(Opcode::Return { src: out });
    let set = vm.load(set).unwrap();
    let code = vm.function_code(set).unwrap();

    let first = vm.new_object().unwrap();
    let second = vm.new_object().unwrap();
    vm.call(set, Value::undefined(), &[first, Value::number(1.0)]).unwrap();
    assert_eq!(vm.property_cache_state(code, 0), Some(CacheState::Monomorphic));
    vm.call(set, Value::undefined(), &[second, Value::number(2.0)]).unwrap();
    vm.call(set, Value::undefined(), &[first, Value::number(3.0)]).unwrap();

    assert_eq!(vm.get_property(first, "v").unwrap(), Value::number(3.0));
    assert_eq!(vm.get_property(second, "v").unwrap(), Value::number(2.0));
}

#[test]
fn test_cached_read_survives_structure_reuse() {
    let mut vm = Vm::default();
    let get = vm.load(property_reader()).unwrap();
    let code = vm.function_code(get).unwrap();
    let kept = vm.protect(get);

    let proto = vm.new_object().unwrap();
    let object = vm.new_object().unwrap();
    vm.set_prototype(object, proto).unwrap();
    vm.set_property(object, "w", Value::number(1.0)).unwrap();
    vm.set_property(object, "v", Value::number(7.0)).unwrap();
    let dead_shape = vm.heap().cell_of(object).unwrap().structure();
    assert_eq!(vm.call(get, Value::undefined(), &[object]).unwrap(), Value::number(7.0));
    assert_eq!(vm.property_cache_state(code, 0), Some(CacheState::Monomorphic));

    vm.release_temporaries();
    let summary = vm.collect_garbage();
    assert!(summary.freed_structures >= 3);
    assert!(!vm.heap().structures().is_live(dead_shape));
    assert_eq!(vm.property_cache_state(code, 0), Some(CacheState::Uninitialized));

    // The first new structure takes the reclaimed id, with `v` at another offset.
    let other = vm.new_object().unwrap();
    vm.set_property(other, "v", Value::number(42.0)).unwrap();
    assert_eq!(vm.heap().cell_of(other).unwrap().structure(), dead_shape);
    assert_eq!(vm.call(get, Value::undefined(), &[other]).unwrap(), Value::number(42.0));
    vm.unprotect(kept);
}

#[test]
fn test_constructed_prototypes_do_not_accumulate_structures() {
    let mut counter = CodeBlock::function("Counter", &[]);
    let (this, one, out) = (counter.temp(), counter.temp(), counter.temp());
    let name = counter.add_identifier("n");
    let cache = counter.new_property_cache();
    let c = counter.add_constant(1.0);
    counter.emit(Opcode::LoadThis { dst: this });
    counter.emit(Opcode::LoadConst { dst: one, index: c });
    counter.emit(Opcode::PutById { base: this, name, value: one, cache });
    counter.emit(Opcode::LoadUndefined { dst: out });
    counter.emit(Opcode::Return { src: out });

    let mut vm = Vm::default();
    let mut rounds = Vec::new();
    for _ in 0..3 {
        for _ in 0..200 {
            let constructor = vm.load(counter.clone()).unwrap();
            let instance = vm.construct(constructor, &[]).unwrap();
            assert_eq!(vm.get_property(instance, "n").unwrap(), Value::number(1.0));
        }
        vm.release_temporaries();
        vm.collect_garbage();
        let structures = vm.heap().structures();
        rounds.push((vm.heap().live_cells(), structures.live_count(), structures.len()));
    }
    assert_eq!(rounds[1], rounds[0]);
    assert_eq!(rounds[2], rounds[0]);
}

#[test]
fn test_read_only_policy() {
    fn write_read_only(policy: ReadOnlyPolicy) -> (Result<Value, VmError>, Vm, Value) {
        let mut vm = vm_with(VmConfig {
            read_only_policy: policy,
            ..VmConfig::default()
        });
        let mut set = CodeBlock::function("set", &["o"]);
        let (value, out) = (set.temp(), set.temp());
        let name = set.add_identifier("fixed");
        let cache = set.new_property_cache();
        let c = set.add_constant(2.0);
        set.emit(Opcode::LoadConst { dst: value, index: c });
        set.emit(Opcode::PutById { base: 0, name, value, cache });
        set.emit(Opcode::LoadUndefined { dst: out });
        set.emit(Opcode::Return { src: out });
        let set = vm.load(set).unwrap();
        let object = vm.new_object().unwrap();
        vm.define_property(object, "fixed", Value::number(1.0), PropertyAttributes::READ_ONLY)
            .unwrap();
        let result = vm.call(set, Value::undefined(), &[object]);
        (result, vm, object)
    }

    let (result, mut vm, object) = write_read_only(ReadOnlyPolicy::Ignore);
    assert!(result.is_ok());
    assert_eq!(vm.get_property(object, "fixed").unwrap(), Value::number(1.0));

    let (result, vm, _) = write_read_only(ReadOnlyPolicy::Throw);
    let error = result.unwrap_err();
    assert_eq!(vm.describe_exception(&error).kind, ErrorKind::TypeError);
}

#[test]
fn test_call_site_caches_its_callee() {
    let mut vm = Vm::default();
    let mut block = CodeBlock::new();
    let (f, arg, undef, out, i, limit, cond) = (
        block.temp(),
        block.temp(),
        block.temp(),
        block.temp(),
        block.temp(),
        block.temp(),
        block.temp(),
    );
    let template = block.add_function(doubler("double"));
    let cache = block.new_call_cache();
    let zero = block.add_constant(0.0);
    let three = block.add_constant(3.0);
    block.emit(Opcode::NewFunction { dst: f, function: template });
    block.emit(Opcode::LoadUndefined { dst: undef });
    block.emit(Opcode::LoadConst { dst: i, index: zero });
    block.emit(Opcode::LoadConst { dst: out, index: zero });
    block.emit(Opcode::LoadConst { dst: limit, index: three });
    let head = block.emit(Opcode::Less { dst: cond, lhs: i, rhs: limit });
    let exit = block.emit(Opcode::JumpIfFalse { cond, target: 0 });
    block.emit(Opcode::Move { dst: arg, src: i });
    block.emit(Opcode::Call {
        dst: out,
        callee: f,
        this: undef,
        first_arg: arg,
        argc: 1,
        cache,
    });
    block.emit(Opcode::Increment { dst: i, src: i });
    block.emit(Opcode::Loop { target: head });
    let end = block.emit(Opcode::Return { src: out });
    block.patch_jump(exit, end);

    let program = vm.load(block).unwrap();
    let code = vm.function_code(program).unwrap();
    let global = vm.global_object();
    assert_eq!(vm.call(program, global, &[]).unwrap(), Value::number(4.0));
    assert_eq!(vm.call_cache_state(code, 0), Some(CacheState::Monomorphic));
}

#[test]
fn test_construct_uses_prototype_and_ignores_primitive_result() {
    let mut vm = Vm::default();
    let mut point = CodeBlock::function("Point", &["x"]);
    let (this, out) = (point.temp(), point.temp());
    let name = point.add_identifier("x");
    let cache = point.new_property_cache();
    point.emit(Opcode::LoadThis { dst: this });
    point.emit(Opcode::PutById { base: this, name, value: 0, cache });
    point.emit(Opcode::LoadUndefined { dst: out });
    point.emit(Opcode::Return { src: out });

    let mut block = CodeBlock::new();
    let (ctor, arg, object, is_point) = (block.temp(), block.temp(), block.temp(), block.temp());
    let template = block.add_function(point);
    let cache = block.new_call_cache();
    let name = block.add_identifier("Point");
    let global_cache = block.new_property_cache();
    let c = block.add_constant(3.0);
    block.emit(Opcode::NewFunction { dst: ctor, function: template });
    block.emit(Opcode::PutGlobal { name, value: ctor, cache: global_cache });
    block.emit(Opcode::LoadConst { dst: arg, index: c });
    block.emit(Opcode::Construct {
        dst: object,
        callee: ctor,
        first_arg: arg,
        argc: 1,
        cache,
    });
    block.emit(Opcode::InstanceOf { dst: is_point, value: object, constructor: ctor });
    block.emit(Opcode::JumpIfFalse { cond: is_point, target: 0 });
    block.emit(Opcode::Return { src: object });
    let last = block.emit(Opcode::Return { src: is_point });
    block.patch_jump(last - 2, last);

    let object = vm.run(block).unwrap();
    assert_eq!(vm.get_property(object, "x").unwrap(), Value::number(3.0));

    let ctor = vm.get_global("Point").unwrap();
    let another = vm.construct(ctor, &[Value::number(5.0)]).unwrap();
    assert_eq!(vm.get_property(another, "x").unwrap(), Value::number(5.0));
    let proto = vm.get_property(ctor, "prototype").unwrap();
    assert_eq!(vm.heap().prototype_of(another.as_cell().unwrap()), proto);
}

#[test]
fn test_construct_keeps_object_result() {
    let mut vm = Vm::default();
    let mut factory = CodeBlock::function("Factory", &[]);
    let out = factory.temp();
    factory.emit(Opcode::NewArray { dst: out, first: 0, count: 0 });
    factory.emit(Opcode::Return { src: out });
    let factory = vm.load(factory).unwrap();

    let result = vm.construct(factory, &[]).unwrap();
    let array_proto = Value::from_cell(vm.intrinsics().array_prototype);
    assert_eq!(vm.heap().prototype_of(result.as_cell().unwrap()), array_proto);
}

#[test]
fn test_calling_a_non_function_throws_type_error() {
    let mut vm = Vm::default();
    let mut block = CodeBlock::new();
    let (callee, out) = (block.temp(), block.temp());
    let cache = block.new_call_cache();
    let c = block.add_constant(1.0);
    block.emit(Opcode::LoadConst { dst: callee, index: c });
    block.emit(Opcode::Call {
        dst: out,
        callee,
        this: callee,
        first_arg: callee,
        argc: 0,
        cache,
    });
    block.emit(Opcode::Return { src: out });

    let error = vm.run(block).unwrap_err();
    let report = vm.describe_exception(&error);
    assert_eq!(report.kind, ErrorKind::TypeError);
    assert_eq!(report.message, "1 is not a function");
}

#[test]
fn test_gc_runs_during_allocation_loop() {
    let mut vm = vm_with(VmConfig {
        gc_threshold_bytes: 4 * 1024,
        ..VmConfig::default()
    });
    let mut block = CodeBlock::new();
    let (keep, value, scratch, i, limit, cond, out) = (
        block.temp(),
        block.temp(),
        block.temp(),
        block.temp(),
        block.temp(),
        block.temp(),
        block.temp(),
    );
    let name = block.add_identifier("v");
    let put_cache = block.new_property_cache();
    let get_cache = block.new_property_cache();
    let seven = block.add_constant(7.0);
    let zero = block.add_constant(0.0);
    let many = block.add_constant(2000.0);
    block.emit(Opcode::NewObject { dst: keep });
    block.emit(Opcode::LoadConst { dst: value, index: seven });
    block.emit(Opcode::PutById { base: keep, name, value, cache: put_cache });
    block.emit(Opcode::LoadConst { dst: i, index: zero });
    block.emit(Opcode::LoadConst { dst: limit, index: many });
    let head = block.emit(Opcode::Less { dst: cond, lhs: i, rhs: limit });
    let exit = block.emit(Opcode::JumpIfFalse { cond, target: 0 });
    block.emit(Opcode::NewObject { dst: scratch });
    block.emit(Opcode::PutById { base: scratch, name, value: i, cache: put_cache });
    block.emit(Opcode::Increment { dst: i, src: i });
    block.emit(Opcode::Loop { target: head });
    let end = block.emit(Opcode::GetById { dst: out, base: keep, name, cache: get_cache });
    block.emit(Opcode::Return { src: out });
    block.patch_jump(exit, end);

    assert_eq!(vm.run(block).unwrap(), Value::number(7.0));
    let stats = vm.gc_stats();
    assert!(stats.collections > 0);
    assert!(stats.cells_freed > 0);
}

#[test]
fn test_out_of_memory_is_fatal_and_uncatchable() {
    let mut vm = vm_with(VmConfig {
        gc_threshold_bytes: 16 * 1024,
        max_heap_bytes: 64 * 1024,
        ..VmConfig::default()
    });
    let mut block = CodeBlock::new();
    let (list, object, caught) = (block.temp(), block.temp(), block.temp());
    block.emit(Opcode::NewArray { dst: list, first: object, count: 0 });
    let start = block.emit(Opcode::NewObject { dst: object });
    // Each array holds the previous one, so everything stays reachable
    block.emit(Opcode::NewArray { dst: list, first: list, count: 2 });
    let back = block.emit(Opcode::Loop { target: start });
    let handler = block.emit(Opcode::Catch { dst: caught });
    block.emit(Opcode::Return { src: caught });
    block.add_handler(start, back + 1, handler, 0);

    let error = vm.run(block).unwrap_err();
    assert!(matches!(error, VmError::OutOfMemory { .. }));
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn test_array_growth_past_the_heap_limit_is_fatal() {
    let limit = 1024 * 1024;
    let mut vm = vm_with(VmConfig {
        gc_threshold_bytes: 256 * 1024,
        max_heap_bytes: limit,
        ..VmConfig::default()
    });
    let array = vm.new_array(&[]).unwrap();
    let error = vm
        .set_property(array, "length", Value::number(10_000_000.0))
        .unwrap_err();
    assert_eq!(error, VmError::OutOfMemory { limit });
    assert!(vm.heap().live_bytes() <= limit);
    assert_eq!(vm.get_property(array, "length").unwrap(), Value::number(0.0));

    vm.set_property(array, "length", Value::number(1000.0)).unwrap();
    assert_eq!(vm.get_property(array, "length").unwrap(), Value::number(1000.0));

    // A handler around the write does not see the failure.
    let mut block = CodeBlock::new();
    let (list, huge, caught) = (block.temp(), block.temp(), block.temp());
    let length = block.add_identifier("length");
    let cache = block.new_property_cache();
    let c = block.add_constant(4_294_967_294.0);
    block.emit(Opcode::NewArray { dst: list, first: list, count: 0 });
    block.emit(Opcode::LoadConst { dst: huge, index: c });
    let put = block.emit(Opcode::PutById { base: list, name: length, value: huge, cache });
    block.emit(Opcode::Return { src: list });
    let handler = block.emit(Opcode::Catch { dst: caught });
    block.emit(Opcode::Return { src: caught });
    block.add_handler(put, put + 1, handler, 0);

    let error = vm.run(block).unwrap_err();
    assert!(matches!(error, VmError::OutOfMemory { .. }));
    assert_eq!(vm.call_depth(), 0);
    assert!(vm.heap().live_bytes() <= limit);
}

#[test]
fn test_watchdog_stops_infinite_loop() {
    let mut vm = vm_with(VmConfig {
        time_limit_ms: Some(20),
        ticks_per_check: 1,
        ..VmConfig::default()
    });
    let mut block = CodeBlock::new();
    block.emit(Opcode::Loop { target: 0 });
    assert_eq!(vm.run(block), Err(VmError::Interrupted));

    // The context stays usable afterwards
    let mut block = CodeBlock::new();
    let t = block.temp();
    block.emit(Opcode::LoadBool { dst: t, value: true });
    block.emit(Opcode::Return { src: t });
    assert_eq!(vm.run(block).unwrap(), Value::boolean(true));
}

#[test]
fn test_interrupt_is_not_catchable() {
    let mut vm = Vm::default();
    let mut block = CodeBlock::new();
    let caught = block.temp();
    let start = block.emit(Opcode::Loop { target: 0 });
    let handler = block.emit(Opcode::Catch { dst: caught });
    block.emit(Opcode::Return { src: caught });
    block.add_handler(start, start + 1, handler, 0);

    vm.interrupt_handle().interrupt();
    assert_eq!(vm.run(block), Err(VmError::Interrupted));
    assert!(!vm.interrupt_handle().is_interrupted());
}

#[test]
fn test_native_calls_back_into_script() {
    let mut vm = Vm::default();
    vm.register_native("applyFive", 1, |call| {
        let callback = call.argument(0);
        call.vm().call(callback, Value::undefined(), &[Value::number(5.0)])
    })
    .unwrap();

    let mut block = CodeBlock::new();
    let (native, f, undef, out) = (block.temp(), block.temp(), block.temp(), block.temp());
    let name = block.add_identifier("applyFive");
    let global_cache = block.new_property_cache();
    let template = block.add_function(doubler("double"));
    let cache = block.new_call_cache();
    block.emit(Opcode::GetGlobal { dst: native, name, cache: global_cache });
    block.emit(Opcode::NewFunction { dst: f, function: template });
    block.emit(Opcode::LoadUndefined { dst: undef });
    block.emit(Opcode::Call {
        dst: out,
        callee: native,
        this: undef,
        first_arg: f,
        argc: 1,
        cache,
    });
    block.emit(Opcode::Return { src: out });

    assert_eq!(vm.run(block).unwrap(), Value::number(10.0));
}

#[test]
fn test_native_error_is_caught_by_script() {
    let mut vm = Vm::default();
    vm.register_native("fail", 0, |call| Err(call.error(ErrorKind::TypeError, "bad input")))
        .unwrap();

    let mut block = CodeBlock::new();
    let (native, undef, out, caught, message) = (block.temp(), block.temp(), block.temp(), block.temp(), block.temp());
    let name = block.add_identifier("fail");
    let message_name = block.add_identifier("message");
    let global_cache = block.new_property_cache();
    let property_cache = block.new_property_cache();
    let cache = block.new_call_cache();
    block.emit(Opcode::GetGlobal { dst: native, name, cache: global_cache });
    block.emit(Opcode::LoadUndefined { dst: undef });
    let call = block.emit(Opcode::Call {
        dst: out,
        callee: native,
        this: undef,
        first_arg: undef,
        argc: 0,
        cache,
    });
    block.emit(Opcode::Return { src: out });
    let handler = block.emit(Opcode::Catch { dst: caught });
    block.emit(Opcode::GetById {
        dst: message,
        base: caught,
        name: message_name,
        cache: property_cache,
    });
    block.emit(Opcode::Return { src: message });
    block.add_handler(call, call + 1, handler, 0);

    let result = vm.run(block).unwrap();
    assert_eq!(vm.string_value(result), Some("bad input"));
}

#[test]
fn test_script_exception_passes_through_native() {
    let mut vm = Vm::default();
    vm.register_native("invoke", 1, |call| {
        let callback = call.argument(0);
        call.vm().call(callback, Value::undefined(), &[])
    })
    .unwrap();
    let invoke = vm.get_global("invoke").unwrap();
    let thrower = vm.load(thrower("thrower", "through")).unwrap();

    let error = vm.call(invoke, Value::undefined(), &[thrower]).unwrap_err();
    let thrown = error.exception().unwrap();
    assert_eq!(vm.string_value(thrown), Some("through"));
}

#[derive(Default)]
struct Recorder {
    events: Arc<Mutex<Vec<(DebugEventKind, Option<String>)>>>,
}

impl Recorder {
    fn record(&self, event: &DebugEvent) {
        self.events.lock().push((event.kind, event.function_name.clone()));
    }
}

impl DebugListener for Recorder {
    fn call_event(&mut self, _vm: &mut Vm, event: &DebugEvent) {
        self.record(event);
    }
    fn return_event(&mut self, _vm: &mut Vm, event: &DebugEvent) {
        self.record(event);
    }
    fn at_statement(&mut self, _vm: &mut Vm, event: &DebugEvent) {
        self.record(event);
    }
    fn exception(&mut self, _vm: &mut Vm, event: &DebugEvent) {
        self.record(event);
    }
    fn will_execute_program(&mut self, _vm: &mut Vm, event: &DebugEvent) {
        self.record(event);
    }
    fn did_execute_program(&mut self, _vm: &mut Vm, event: &DebugEvent) {
        self.record(event);
    }
}

#[test]
fn test_debugger_sees_calls_statements_and_exceptions() {
    let mut vm = Vm::default();
    let recorder = Recorder::default();
    let events = recorder.events.clone();
    vm.add_debug_listener(Box::new(recorder));

    let mut block = CodeBlock::new();
    let (f, undef, out, caught) = (block.temp(), block.temp(), block.temp(), block.temp());
    let template = block.add_function(thrower("oops", "x"));
    let cache = block.new_call_cache();
    block.emit(Opcode::Debug { line: 1 });
    block.emit(Opcode::NewFunction { dst: f, function: template });
    block.emit(Opcode::LoadUndefined { dst: undef });
    let call = block.emit(Opcode::Call {
        dst: out,
        callee: f,
        this: undef,
        first_arg: undef,
        argc: 0,
        cache,
    });
    block.emit(Opcode::Return { src: out });
    let handler = block.emit(Opcode::Catch { dst: caught });
    block.emit(Opcode::Return { src: caught });
    block.add_handler(call, call + 1, handler, 0);
    vm.run(block).unwrap();

    let oops = Some("oops".to_string());
    assert_eq!(
        *events.lock(),
        vec![
            (DebugEventKind::WillExecuteProgram, None),
            (DebugEventKind::Call, None),
            (DebugEventKind::Statement, None),
            (DebugEventKind::Call, oops.clone()),
            (DebugEventKind::Exception, oops.clone()),
            (DebugEventKind::Return, oops),
            (DebugEventKind::Return, None),
            (DebugEventKind::DidExecuteProgram, None),
        ]
    );
}

#[test]
fn test_listener_may_call_back_into_the_vm() {
    struct Counter {
        hits: Arc<Mutex<Vec<Value>>>,
    }

    impl DebugListener for Counter {
        fn at_statement(&mut self, vm: &mut Vm, event: &DebugEvent) {
            vm.set_global("lastLine", Value::number(event.line as f64)).unwrap();
            let value = vm.get_global("lastLine").unwrap();
            self.hits.lock().push(value);
        }
    }

    let mut vm = Vm::default();
    let hits = Arc::new(Mutex::new(Vec::new()));
    vm.add_debug_listener(Box::new(Counter { hits: hits.clone() }));

    let mut block = CodeBlock::new();
    let t = block.temp();
    block.emit(Opcode::Debug { line: 3 });
    block.emit(Opcode::Debug { line: 4 });
    block.emit(Opcode::LoadNull { dst: t });
    block.emit(Opcode::Return { src: t });
    vm.run(block).unwrap();

    assert_eq!(*hits.lock(), vec![Value::number(3.0), Value::number(4.0)]);
}

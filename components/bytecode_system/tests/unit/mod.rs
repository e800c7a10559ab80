//! Unit tests for code block assembly and validation

use bytecode_system::{BytecodeError, CodeBlock, Constant, Opcode};

/// `function(n) { var total = 0; for (...) total = total + n; return total; }`
fn counting_loop() -> CodeBlock {
    let mut block = CodeBlock::function("sum", &["n"]);
    let total = block.declare_variable("total");
    let i = block.declare_variable("i");
    let cond = block.temp();
    let one = block.temp();
    let zero_index = block.add_constant(0.0);
    let one_index = block.add_constant(1.0);

    block.emit(Opcode::LoadConst { dst: total, index: zero_index });
    block.emit(Opcode::LoadConst { dst: i, index: zero_index });
    block.emit(Opcode::LoadConst { dst: one, index: one_index });
    let head = block.next_pc();
    block.emit(Opcode::Less { dst: cond, lhs: i, rhs: 0 });
    let exit = block.emit(Opcode::JumpIfFalse { cond, target: 0 });
    block.emit(Opcode::Add { dst: total, lhs: total, rhs: 0 });
    block.emit(Opcode::Add { dst: i, lhs: i, rhs: one });
    block.emit(Opcode::Loop { target: head });
    let end = block.next_pc();
    block.patch_jump(exit, end);
    block.emit(Opcode::Return { src: total });
    block
}

#[test]
fn test_counting_loop_layout() {
    let block = counting_loop();
    assert_eq!(block.num_params, 1);
    assert_eq!(block.num_vars, 3);
    assert_eq!(block.num_registers, 5);
    assert_eq!(block.constants, vec![Constant::Number(0.0), Constant::Number(1.0)]);
    assert_eq!(block.instructions[4].opcode.jump_target(), Some(8));
    assert_eq!(block.validate(), Ok(()));
}

#[test]
fn test_identifier_out_of_range_is_rejected() {
    let mut block = CodeBlock::new();
    let r = block.temp();
    let cache = block.new_property_cache();
    block.emit(Opcode::GetGlobal { dst: r, name: 3, cache });
    block.emit(Opcode::Return { src: r });
    match block.validate() {
        Err(BytecodeError::IndexOutOfRange { table, index, .. }) => {
            assert_eq!(table, "identifier");
            assert_eq!(index, 3);
        }
        other => panic!("expected identifier error, got {:?}", other),
    }
}

#[test]
fn test_cache_sites_must_be_allocated() {
    let mut block = CodeBlock::new();
    let r = block.temp();
    let name = block.add_identifier("x");
    block.emit(Opcode::GetGlobal { dst: r, name, cache: 0 });
    block.emit(Opcode::Return { src: r });
    assert!(matches!(
        block.validate(),
        Err(BytecodeError::IndexOutOfRange { table: "property cache", .. })
    ));
}

#[test]
fn test_handler_outside_code_is_rejected() {
    let mut block = CodeBlock::new();
    let r = block.temp();
    block.emit(Opcode::LoadNull { dst: r });
    block.emit(Opcode::Throw { src: r });
    block.add_handler(0, 2, 9, 0);
    assert!(matches!(block.validate(), Err(BytecodeError::BadJumpTarget { target: 9, .. })));
}

#[test]
fn test_argument_range_checked_at_both_ends() {
    let mut block = CodeBlock::new();
    let callee = block.temp();
    let first = block.temps(2);
    let cache = block.new_call_cache();
    block.emit(Opcode::Call {
        dst: callee,
        callee,
        this: callee,
        first_arg: first,
        argc: 3,
        cache,
    });
    block.emit(Opcode::Return { src: callee });
    assert!(matches!(
        block.validate(),
        Err(BytecodeError::RegisterOutOfRange { register: 3, .. })
    ));
}

#[test]
fn test_frame_layout_mismatch() {
    let mut block = counting_loop();
    block.num_params = 7;
    assert!(matches!(block.validate(), Err(BytecodeError::BadFrameLayout { .. })));
}

#[test]
fn test_scope_layout_interns_names() {
    let mut block = CodeBlock::new();
    let x = block.add_identifier("x");
    let layout = block.add_scope_layout(&["x", "y"]);
    assert_eq!(block.scope_layouts[layout as usize][0], x);
    assert_eq!(block.identifier(block.scope_layouts[layout as usize][1]), "y");
}

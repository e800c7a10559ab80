//! Contract tests for the serialized code block format

use bytecode_system::{CodeBlock, Constant, Opcode};

#[test]
fn contract_minimal_json_program_loads() {
    let json = r#"{
        "instructions": [
            { "opcode": { "LoadConst": { "dst": 0, "index": 0 } } },
            { "opcode": { "Return": { "src": 0 } } }
        ],
        "constants": [ { "Number": 42.0 } ],
        "num_registers": 1
    }"#;
    let block = CodeBlock::from_json(json).unwrap();
    assert_eq!(block.name, None);
    assert_eq!(block.constants, vec![Constant::Number(42.0)]);
    assert_eq!(block.instructions[1].opcode, Opcode::Return { src: 0 });
    assert!(block.validate().is_ok());
}

#[test]
fn contract_unit_variants_serialize_as_strings() {
    let mut block = CodeBlock::new();
    let layout = block.add_scope_layout(&["i"]);
    block.emit(Opcode::PushScope { layout });
    block.emit(Opcode::PopScope);
    let json = block.to_json().unwrap();
    assert!(json.contains("\"PopScope\""));
}

#[test]
fn contract_source_positions_survive_serialization() {
    let mut block = CodeBlock::new();
    let r = block.temp();
    block.emit_with_position(Opcode::LoadNull { dst: r }, core_types::SourcePosition::new(4, 1));
    block.emit(Opcode::Return { src: r });
    let restored = CodeBlock::from_json(&block.to_json().unwrap()).unwrap();
    assert_eq!(restored.line_at(0), 4);
    assert_eq!(restored.line_at(1), 0);
}

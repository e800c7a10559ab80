//! Unit tests for source position types

use core_types::{SourcePosition, StackFrame};

#[test]
fn test_source_position_new() {
    let pos = SourcePosition::new(4, 2);
    assert_eq!(pos.line, 4);
    assert_eq!(pos.column, 2);
    assert_eq!(SourcePosition::default(), SourcePosition::new(0, 0));
}

#[test]
fn test_stack_frame_without_line() {
    let frame = StackFrame {
        function_name: Some("main".to_string()),
        line: 0,
    };
    assert_eq!(frame.to_string(), "main");
}

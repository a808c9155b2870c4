use crate::chunk::opcode::get_opcode;
use crate::chunk::OpCode;
use crate::compiler::compile;
use crate::gc::{GcConfig, Heap};

fn proto_instructions(source: &str) -> Vec<OpCode> {
    let mut heap = Heap::new(GcConfig::default());
    let id = compile(&mut heap, source, "test").unwrap();
    heap.prototypes
        .get(id.0)
        .data
        .instructions
        .iter()
        .map(|i| get_opcode(*i))
        .collect()
}

#[test]
fn constant_arithmetic_is_folded_away() {
    // `1+2*3` must reach the Return with no Add/Mul left to run.
    let ops = proto_instructions("return 1+2*3");
    assert!(!ops.contains(&OpCode::Add));
    assert!(!ops.contains(&OpCode::Mul));
    assert!(ops.contains(&OpCode::LoadConstant) || ops.contains(&OpCode::Return));
}

#[test]
fn division_by_a_literal_zero_is_not_folded() {
    // `1/0` must still run as a Div at execution time (±inf is a
    // runtime float result, not a compile-time error).
    let ops = proto_instructions("return 1/0");
    assert!(ops.contains(&OpCode::Div));
}

#[test]
fn syntax_error_is_reported_for_bad_statement() {
    let mut heap = Heap::new(GcConfig::default());
    let result = compile(&mut heap, "local x = ", "test");
    assert!(result.is_err());
}

#[test]
fn bare_non_call_expression_statement_is_rejected() {
    let mut heap = Heap::new(GcConfig::default());
    // `x + 1` alone is not a valid statement (only calls/assignments
    // are): this should be a parse error, not silently dropped.
    let result = compile(&mut heap, "local x = 1\nx + 1", "test");
    assert!(result.is_err());
}

#[test]
fn nested_function_becomes_a_child_prototype() {
    let mut heap = Heap::new(GcConfig::default());
    let id = compile(&mut heap, "local f = function() return 1 end", "test").unwrap();
    assert_eq!(heap.prototypes.get(id.0).data.children.len(), 1);
}

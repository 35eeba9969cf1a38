//! Builds executables and runs them. Output is raw bytes: `println(x)`
//! writes the low byte of `x`, so digits are printed as `x + 48`.

#![cfg(all(target_os = "linux", target_arch = "x86_64"))]

use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::Duration;

use mjc::ast::{BinaryOp, Expression, Statement, TypeDenoter, UnaryOp};
use mjc::test_harness::*;
use mjc::{CompileOptions, Program, compile};

const ETXTBSY: i32 = 26;

fn executable_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(format!("mjc-run-{name}"))
}

/// Compiles `program`, runs it, and returns its stdout.
fn run(name: &str, program: &Program) -> Vec<u8> {
    let path = executable_path(name);
    compile(program, &CompileOptions::default())
        .expect("compilation failed")
        .write_to(&path)
        .expect("write failed");

    // A concurrently forked test may still hold the file open for writing.
    let mut attempts = 0;
    let output: Output = loop {
        match Command::new(&path).output() {
            Err(err) if err.raw_os_error() == Some(ETXTBSY) && attempts < 20 => {
                attempts += 1;
                std::thread::sleep(Duration::from_millis(25));
            }
            result => break result.expect("failed to spawn executable"),
        }
    };
    let _ = std::fs::remove_file(&path);

    assert!(
        output.status.success(),
        "{name} exited with {:?}",
        output.status
    );
    output.stdout
}

fn digit(value: Expression) -> Statement {
    println(add(value, int(48)))
}

fn entry_only(body: Vec<Statement>) -> Program {
    ProgramBuilder::new()
        .class(ClassBuilder::new("Main").method(entry_method(body)))
        .build()
}

#[test]
fn test_empty_main_exits_cleanly() {
    assert_eq!(run("empty", &entry_only(vec![])), b"");
}

#[test]
fn test_println_writes_low_byte() {
    let program = entry_only(vec![println(int(72)), println(int(0x169))]);
    assert_eq!(run("println", &program), b"Hi");
}

#[test]
fn test_arithmetic() {
    let program = entry_only(vec![
        digit(binary(BinaryOp::Div, int(17), int(5))),
        digit(binary(BinaryOp::Sub, int(9), int(4))),
        digit(binary(BinaryOp::Mul, int(2), int(4))),
        println(unary(UnaryOp::Neg, int(-65))),
    ]);
    assert_eq!(run("arithmetic", &program), b"358A");
}

#[test]
fn test_comparisons_and_logic() {
    let program = entry_only(vec![
        digit(binary(BinaryOp::Lt, int(1), int(2))),
        digit(binary(BinaryOp::Ge, int(1), int(2))),
        digit(binary(BinaryOp::Eq, int(3), int(3))),
        digit(binary(BinaryOp::Ne, int(3), int(3))),
        digit(unary(UnaryOp::Not, boolean(false))),
        digit(binary(BinaryOp::And, boolean(true), boolean(false))),
        digit(binary(BinaryOp::Or, boolean(true), boolean(false))),
    ]);
    assert_eq!(run("comparisons", &program), b"1010101");
}

#[test]
fn test_while_loop_counts() {
    let program = entry_only(vec![
        var_decl(0, int(0)),
        while_stmt(
            binary(BinaryOp::Lt, local(0), int(10)),
            Statement::Block(vec![
                digit(local(0)),
                assign(local_ref(0), add(local(0), int(1))),
            ]),
        ),
    ]);
    assert_eq!(run("while", &program), b"0123456789");
}

#[test]
fn test_if_else_branches() {
    let program = entry_only(vec![
        if_stmt(
            binary(BinaryOp::Gt, int(3), int(4)),
            println(int(78)),
            Some(println(int(89))),
        ),
        if_stmt(boolean(true), println(int(33)), None),
    ]);
    assert_eq!(run("if_else", &program), b"Y!");
}

#[test]
fn test_block_scoped_locals() {
    // Each iteration declares and drops two locals; the outer one survives.
    let program = entry_only(vec![
        var_decl(0, int(0)),
        while_stmt(
            binary(BinaryOp::Lt, local(0), int(3)),
            Statement::Block(vec![
                var_decl(1, int(5)),
                var_decl(2, add(local(1), local(0))),
                digit(local(2)),
                assign(local_ref(0), add(local(0), int(1))),
            ]),
        ),
        digit(local(0)),
    ]);
    assert_eq!(run("scopes", &program), b"5673");
}

#[test]
fn test_recursive_factorial() {
    let program = ProgramBuilder::new()
        .class(
            ClassBuilder::new("Main")
                .method(entry_method(vec![println(call(
                    method_ref(0, 1),
                    vec![int(5)],
                ))]))
                .method(static_method(
                    "fact",
                    TypeDenoter::Int,
                    1,
                    vec![
                        if_stmt(
                            binary(BinaryOp::Lt, param(0), int(2)),
                            return_value(int(1)),
                            None,
                        ),
                        return_value(binary(
                            BinaryOp::Mul,
                            param(0),
                            call(
                                method_ref(0, 1),
                                vec![binary(BinaryOp::Sub, param(0), int(1))],
                            ),
                        )),
                    ],
                )),
        )
        .build();
    // 5! = 120 = 'x'
    assert_eq!(run("fact", &program), b"x");
}

#[test]
fn test_mutual_recursion() {
    let is_even = static_method(
        "isEven",
        TypeDenoter::Boolean,
        1,
        vec![
            if_stmt(
                binary(BinaryOp::Eq, param(0), int(0)),
                return_value(boolean(true)),
                None,
            ),
            return_value(call(
                method_ref(0, 2),
                vec![binary(BinaryOp::Sub, param(0), int(1))],
            )),
        ],
    );
    let is_odd = static_method(
        "isOdd",
        TypeDenoter::Boolean,
        1,
        vec![
            if_stmt(
                binary(BinaryOp::Eq, param(0), int(0)),
                return_value(boolean(false)),
                None,
            ),
            return_value(call(
                method_ref(0, 1),
                vec![binary(BinaryOp::Sub, param(0), int(1))],
            )),
        ],
    );
    let program = ProgramBuilder::new()
        .class(
            ClassBuilder::new("Main")
                .method(entry_method(vec![
                    digit(call(method_ref(0, 1), vec![int(10)])),
                    digit(call(method_ref(0, 1), vec![int(7)])),
                ]))
                .method(is_even)
                .method(is_odd),
        )
        .build();
    assert_eq!(run("parity", &program), b"10");
}

#[test]
fn test_parameter_order() {
    // sub(a, b) = a - b
    let program = ProgramBuilder::new()
        .class(
            ClassBuilder::new("Main")
                .method(entry_method(vec![digit(call(
                    method_ref(0, 1),
                    vec![int(9), int(2)],
                ))]))
                .method(static_method(
                    "sub",
                    TypeDenoter::Int,
                    2,
                    vec![return_value(binary(BinaryOp::Sub, param(0), param(1)))],
                )),
        )
        .build();
    assert_eq!(run("params", &program), b"7");
}

#[test]
fn test_objects_and_instance_methods() {
    let counter = ClassBuilder::new("Counter")
        .field("count", TypeDenoter::Int)
        .method(instance_method(
            "inc",
            TypeDenoter::Void,
            0,
            vec![assign(
                field_ref(1, 0),
                add(Expression::Ref(field_ref(1, 0)), int(1)),
            )],
        ))
        .method(instance_method(
            "get",
            TypeDenoter::Int,
            0,
            vec![return_value(Expression::Ref(field_ref(1, 0)))],
        ))
        .method(instance_method(
            "addTwice",
            TypeDenoter::Void,
            1,
            vec![
                assign(
                    field_ref(1, 0),
                    add(Expression::Ref(field_ref(1, 0)), param(0)),
                ),
                call_stmt(method_ref(1, 0), vec![]),
            ],
        ));
    let program = ProgramBuilder::new()
        .class(ClassBuilder::new("Main").method(entry_method(vec![
            var_decl(0, Expression::NewObject { class: 1 }),
            call_stmt(qualified_method(local_ref(0), 1, 0), vec![]),
            call_stmt(qualified_method(local_ref(0), 1, 0), vec![]),
            digit(call(qualified_method(local_ref(0), 1, 1), vec![])),
            call_stmt(qualified_method(local_ref(0), 1, 2), vec![int(4)]),
            digit(Expression::Ref(qualified_field(local_ref(0), 1, 0))),
        ])))
        .class(counter)
        .build();
    // inc, inc -> 2; addTwice(4) adds 4 then calls inc -> 7
    assert_eq!(run("objects", &program), b"27");
}

#[test]
fn test_distinct_objects_do_not_share_fields() {
    let program = ProgramBuilder::new()
        .class(ClassBuilder::new("Main").method(entry_method(vec![
            var_decl(0, Expression::NewObject { class: 1 }),
            var_decl(1, Expression::NewObject { class: 1 }),
            assign(qualified_field(local_ref(0), 1, 1), int(3)),
            assign(qualified_field(local_ref(1), 1, 1), int(4)),
            digit(Expression::Ref(qualified_field(local_ref(0), 1, 1))),
            digit(Expression::Ref(qualified_field(local_ref(1), 1, 1))),
            digit(Expression::Ref(qualified_field(local_ref(1), 1, 0))),
        ])))
        .class(
            ClassBuilder::new("Pair")
                .field("left", TypeDenoter::Int)
                .field("right", TypeDenoter::Int),
        )
        .build();
    assert_eq!(run("pairs", &program), b"340");
}

#[test]
fn test_static_fields() {
    let program = ProgramBuilder::new()
        .class(
            ClassBuilder::new("Main")
                .static_field("total", TypeDenoter::Int)
                .static_field("step", TypeDenoter::Int)
                .method(entry_method(vec![
                    digit(Expression::Ref(field_ref(0, 0))),
                    assign(field_ref(0, 1), int(3)),
                    assign(field_ref(0, 0), int(1)),
                    assign(
                        field_ref(0, 0),
                        add(
                            Expression::Ref(field_ref(0, 0)),
                            Expression::Ref(field_ref(0, 1)),
                        ),
                    ),
                    digit(Expression::Ref(field_ref(0, 0))),
                ])),
        )
        .build();
    assert_eq!(run("statics", &program), b"04");
}

#[test]
fn test_arrays() {
    let program = entry_only(vec![
        var_decl(
            0,
            Expression::NewArray {
                element: TypeDenoter::Int,
                size: Box::new(int(4)),
            },
        ),
        Statement::IndexedAssign {
            array: local_ref(0),
            index: int(1),
            value: int(9),
        },
        Statement::IndexedAssign {
            array: local_ref(0),
            index: int(3),
            value: int(2),
        },
        digit(Expression::Index {
            array: local_ref(0),
            index: Box::new(int(1)),
        }),
        digit(Expression::Index {
            array: local_ref(0),
            index: Box::new(int(3)),
        }),
        digit(Expression::Index {
            array: local_ref(0),
            index: Box::new(int(0)),
        }),
    ]);
    assert_eq!(run("arrays", &program), b"920");
}

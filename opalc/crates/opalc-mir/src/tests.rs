//! Lowering integration tests.
//!
//! HIR fixtures are built by hand and pushed through `lower_function`; the
//! assertions check the emitted CFG structure. Structural validation runs on
//! every lowered function as part of `lower_function` itself.

use crate::lower::{lower_function, LowerConfig, LowerErrorKind, LoweredFunction};
use crate::mir::{
    BinOp, BlockId, CallTarget, Constant, LValue, LValueWrapper, LocalId, Param, RValue,
    Statement, Terminator,
};
use opalc_hir::hir::{self, ExprKind, Literal, MatchArm, PatKind, Pattern};
use opalc_hir::resolver::{
    Crate, EnumDef, FnSig, Item, StructDef, StructFields, Variant, VariantData,
};
use opalc_hir::types::{
    Abi, BorrowKind, CoreType, GenericPath, Path, SimplePath, Type,
};
use opalc_hir::hir::Expr;
use opalc_util::{Span, Symbol};

fn i32_ty() -> Type {
    Type::Primitive(CoreType::I32)
}

fn bool_ty() -> Type {
    Type::Primitive(CoreType::Bool)
}

fn e(kind: ExprKind, ty: Type) -> Expr {
    Expr::new(kind, ty, Span::DUMMY)
}

fn lit_i32(v: i32) -> Expr {
    e(ExprKind::Literal(Literal::Integer(v as u128)), i32_ty())
}

fn var(slot: u32, ty: Type) -> Expr {
    e(
        ExprKind::Variable {
            name: Symbol::intern("v"),
            slot,
        },
        ty,
    )
}

fn block(stmts: Vec<Expr>, tail: Option<Expr>, ty: Type) -> Expr {
    e(
        ExprKind::Block {
            stmts,
            tail: tail.map(Box::new),
        },
        ty,
    )
}

fn binop(op: hir::BinOp, left: Expr, right: Expr, ty: Type) -> Expr {
    e(
        ExprKind::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        ty,
    )
}

fn fn_of(args: Vec<(Pattern, Type)>, ret_ty: Type, locals: Vec<Type>, body: Expr) -> hir::Function {
    hir::Function {
        name: Symbol::intern("test_fn"),
        args,
        ret_ty,
        locals,
        body,
        generator: None,
    }
}

fn lower_ok(krate: &Crate, f: &hir::Function) -> LoweredFunction {
    let _ = env_logger::builder().is_test(true).try_init();
    lower_function(krate, &LowerConfig::default(), f).expect("lowering failed")
}

fn lower_full(krate: &Crate, f: &hir::Function) -> LoweredFunction {
    let cfg = LowerConfig {
        full_validate: true,
        ..LowerConfig::default()
    };
    lower_function(krate, &cfg, f).expect("lowering failed")
}

/// `core::option::Option` with `Some` first, as the fixtures expect.
fn option_path() -> SimplePath {
    SimplePath::new(&["core", "option", "Option"])
}

fn option_i32() -> Type {
    Type::named(option_path(), vec![i32_ty()])
}

fn krate_with_option() -> Crate {
    let mut krate = Crate::new();
    krate.add_item(
        option_path(),
        Item::Enum(EnumDef {
            variants: vec![
                Variant {
                    name: Symbol::intern("Some"),
                    data: VariantData::Tuple(vec![Type::Generic {
                        name: Symbol::intern("T"),
                        index: 0,
                    }]),
                },
                Variant {
                    name: Symbol::intern("None"),
                    data: VariantData::Unit,
                },
            ],
        }),
    );
    krate
}

fn variant_path(base: SimplePath, variant: &str, params: Vec<Type>) -> GenericPath {
    let mut components = base.components;
    components.push(Symbol::intern(variant));
    GenericPath::new(SimplePath { components }, params)
}

// ========================================================================
// Concrete scenarios
// ========================================================================

#[test]
fn test_s1_argument_plus_one() {
    let krate = Crate::new();
    let body = block(
        vec![],
        Some(binop(
            hir::BinOp::Add,
            var(0, i32_ty()),
            lit_i32(1),
            i32_ty(),
        )),
        i32_ty(),
    );
    let f = fn_of(
        vec![(Pattern::bind("x", 0), i32_ty())],
        i32_ty(),
        vec![i32_ty()],
        body,
    );
    let out = lower_full(&krate, &f);

    assert_eq!(out.mir.blocks.len(), 1);
    let bb = &out.mir.blocks[BlockId(0)];
    assert_eq!(bb.statements.len(), 1);
    match &bb.statements[0] {
        Statement::Assign {
            dst,
            src: RValue::BinOp { lhs, op, rhs },
            ..
        } => {
            assert_eq!(*dst, LValue::new_return());
            assert_eq!(*op, BinOp::Add);
            assert_eq!(*lhs, Param::LValue(LValue::new_argument(0)));
            assert_eq!(
                *rhs,
                Param::Constant(Constant::Int {
                    value: 1,
                    ty: CoreType::I32
                })
            );
        }
        other => panic!("unexpected statement {:?}", other),
    }
    assert!(matches!(bb.terminator, Terminator::Return));
}

#[test]
fn test_s2_if_else_diamond() {
    let krate = Crate::new();
    let body = block(
        vec![],
        Some(e(
            ExprKind::If {
                cond: Box::new(var(0, bool_ty())),
                then_arm: Box::new(lit_i32(1)),
                else_arm: Some(Box::new(lit_i32(2))),
            },
            i32_ty(),
        )),
        i32_ty(),
    );
    let f = fn_of(vec![], i32_ty(), vec![bool_ty()], body);
    let out = lower_ok(&krate, &f);
    let mir = &out.mir;

    assert_eq!(mir.blocks.len(), 4);
    let (bb_true, bb_false) = match &mir.blocks[BlockId(0)].terminator {
        Terminator::If {
            cond,
            bb_true,
            bb_false,
        } => {
            assert_eq!(*cond, LValue::new_local(LocalId(0)));
            (*bb_true, *bb_false)
        }
        other => panic!("entry terminator {:?}", other),
    };

    let mut join = None;
    for (bb, value) in [(bb_true, 1), (bb_false, 2)] {
        let blk = &mir.blocks[bb];
        assert_eq!(blk.statements.len(), 1);
        let result_local = match &blk.statements[0] {
            Statement::Assign {
                dst,
                src: RValue::Constant(Constant::Int { value: v, .. }),
                ..
            } => {
                assert_eq!(*v, value);
                dst.as_local().expect("result slot is a local")
            }
            other => panic!("arm statement {:?}", other),
        };
        match &blk.terminator {
            Terminator::Goto(t) => match join {
                None => join = Some((*t, result_local)),
                Some((j, l)) => {
                    assert_eq!(*t, j, "arms join at the same block");
                    assert_eq!(result_local, l, "arms share the result slot");
                }
            },
            other => panic!("arm terminator {:?}", other),
        }
    }
}

#[test]
fn test_s3_option_match_switch() {
    let krate = krate_with_option();
    let some_pat = Pattern {
        binding: None,
        implicit_derefs: 0,
        kind: PatKind::PathTuple {
            path: variant_path(option_path(), "Some", vec![i32_ty()]),
            pats: vec![Pattern::bind("x", 1)],
        },
    };
    let none_pat = Pattern {
        binding: None,
        implicit_derefs: 0,
        kind: PatKind::PathValue {
            path: variant_path(option_path(), "None", vec![i32_ty()]),
        },
    };
    let body = block(
        vec![],
        Some(e(
            ExprKind::Match {
                value: Box::new(var(0, option_i32())),
                arms: vec![
                    MatchArm {
                        patterns: vec![some_pat],
                        guard: None,
                        body: var(1, i32_ty()),
                    },
                    MatchArm {
                        patterns: vec![none_pat],
                        guard: None,
                        body: lit_i32(0),
                    },
                ],
            },
            i32_ty(),
        )),
        i32_ty(),
    );
    let f = fn_of(
        vec![(Pattern::bind("v", 0), option_i32())],
        i32_ty(),
        vec![option_i32(), i32_ty()],
        body,
    );
    let out = lower_ok(&krate, &f);
    let mir = &out.mir;

    let (bb_some, bb_none) = match &mir.blocks[BlockId(0)].terminator {
        Terminator::Switch { val, targets } => {
            assert_eq!(*val, LValue::new_argument(0));
            assert_eq!(targets.len(), 2);
            (targets[0], targets[1])
        }
        other => panic!("entry terminator {:?}", other),
    };

    // Some arm: bind x from the downcast projection, forward it to the
    // result slot
    let some_blk = &mir.blocks[bb_some];
    match &some_blk.statements[0] {
        Statement::Assign {
            dst,
            src: RValue::Use(src),
            ..
        } => {
            assert_eq!(*dst, LValue::new_local(LocalId(1)));
            assert_eq!(*src, LValue::new_argument(0).downcast(0).field(0));
        }
        other => panic!("some-arm statement {:?}", other),
    }
    let join = match &some_blk.terminator {
        Terminator::Goto(t) => *t,
        other => panic!("some-arm terminator {:?}", other),
    };

    // None arm: constant zero into the result slot, same join
    let none_blk = &mir.blocks[bb_none];
    assert!(none_blk.statements.iter().any(|s| matches!(
        s,
        Statement::Assign {
            src: RValue::Constant(Constant::Int { value: 0, .. }),
            ..
        }
    )));
    assert_eq!(none_blk.terminator, Terminator::Goto(join));
}

#[test]
fn test_s4_tuple_let_destructure() {
    let krate = Crate::new();
    let tuple_ty = Type::Tuple(vec![i32_ty(), i32_ty()]);
    let let_stmt = e(
        ExprKind::Let {
            pattern: Pattern {
                binding: None,
                implicit_derefs: 0,
                kind: PatKind::Tuple(vec![Pattern::bind("a", 0), Pattern::bind("b", 1)]),
            },
            ty: tuple_ty.clone(),
            value: Some(Box::new(e(
                ExprKind::Tuple {
                    vals: vec![lit_i32(1), lit_i32(2)],
                },
                tuple_ty.clone(),
            ))),
        },
        Type::unit(),
    );
    let body = block(vec![let_stmt], None, Type::unit());
    let f = fn_of(vec![], Type::unit(), vec![i32_ty(), i32_ty()], body);
    let out = lower_full(&krate, &f);
    let mir = &out.mir;

    assert_eq!(mir.blocks.len(), 1);
    let stmts = &mir.blocks[BlockId(0)].statements;

    let tmp = match &stmts[0] {
        Statement::Assign {
            dst,
            src: RValue::Tuple { vals },
            ..
        } => {
            assert_eq!(vals.len(), 2);
            dst.as_local().expect("tuple temp is a local")
        }
        other => panic!("first statement {:?}", other),
    };
    for (i, slot) in [(0u32, 0u32), (1, 1)] {
        match &stmts[1 + i as usize] {
            Statement::Assign {
                dst,
                src: RValue::Use(src),
                ..
            } => {
                assert_eq!(*dst, LValue::new_local(LocalId(slot)));
                assert_eq!(*src, LValue::new_local(tmp).field(i));
            }
            other => panic!("destructure statement {:?}", other),
        }
    }
    // No enum is involved, so no Downcast projections anywhere
    for stmt in stmts {
        if let Statement::Assign { dst, src, .. } = stmt {
            assert!(!dst.wrappers.iter().any(|w| matches!(w, LValueWrapper::Downcast(_))));
            if let RValue::Use(lv) = src {
                assert!(!lv.wrappers.iter().any(|w| matches!(w, LValueWrapper::Downcast(_))));
            }
        }
    }
}

#[test]
fn test_s5_while_let_loop() {
    let mut krate = krate_with_option();
    let iter_path = SimplePath::new(&["test", "Iter"]);
    krate.add_item(
        iter_path.clone(),
        Item::Struct(StructDef {
            fields: StructFields::Unit,
        }),
    );
    let next_path = SimplePath::new(&["test", "next"]);
    let iter_ty = Type::named(iter_path, vec![]);
    krate.add_item(
        next_path.clone(),
        Item::Function(FnSig {
            abi: Abi::Rust,
            params: vec![Type::borrow(BorrowKind::Unique, iter_ty.clone())],
            ret: option_i32(),
        }),
    );
    let f_path = SimplePath::new(&["test", "f"]);
    krate.add_item(
        f_path.clone(),
        Item::Function(FnSig {
            abi: Abi::Rust,
            params: vec![i32_ty()],
            ret: Type::unit(),
        }),
    );

    let call_next = e(
        ExprKind::CallPath {
            path: Path::simple(next_path.clone()),
            args: vec![e(
                ExprKind::Borrow {
                    kind: BorrowKind::Unique,
                    value: Box::new(var(0, iter_ty.clone())),
                },
                Type::borrow(BorrowKind::Unique, iter_ty.clone()),
            )],
        },
        option_i32(),
    );
    let call_f = e(
        ExprKind::CallPath {
            path: Path::simple(f_path.clone()),
            args: vec![var(1, i32_ty())],
        },
        Type::unit(),
    );
    let match_expr = e(
        ExprKind::Match {
            value: Box::new(call_next),
            arms: vec![
                MatchArm {
                    patterns: vec![Pattern {
                        binding: None,
                        implicit_derefs: 0,
                        kind: PatKind::PathTuple {
                            path: variant_path(option_path(), "Some", vec![i32_ty()]),
                            pats: vec![Pattern::bind("x", 1)],
                        },
                    }],
                    guard: None,
                    body: call_f,
                },
                MatchArm {
                    patterns: vec![Pattern {
                        binding: None,
                        implicit_derefs: 0,
                        kind: PatKind::PathValue {
                            path: variant_path(option_path(), "None", vec![i32_ty()]),
                        },
                    }],
                    guard: None,
                    body: e(
                        ExprKind::Break {
                            label: None,
                            value: None,
                        },
                        Type::Never,
                    ),
                },
            ],
        },
        Type::unit(),
    );
    let loop_expr = e(
        ExprKind::Loop {
            body: Box::new(match_expr),
            label: None,
            diverges: false,
        },
        Type::unit(),
    );
    let body = block(vec![loop_expr], None, Type::unit());
    let f = fn_of(
        vec![(Pattern::bind("it", 0), iter_ty)],
        Type::unit(),
        vec![Type::named(SimplePath::new(&["test", "Iter"]), vec![]), i32_ty()],
        body,
    );
    let out = lower_ok(&krate, &f);
    let mir = &out.mir;

    // The loop head is the Goto target of the entry block
    let loop_head = match &mir.blocks[BlockId(0)].terminator {
        Terminator::Goto(t) => *t,
        other => panic!("entry terminator {:?}", other),
    };

    // One decision switch over the call result
    let switches: Vec<_> = mir
        .blocks
        .iter_enumerated()
        .filter_map(|(id, b)| match &b.terminator {
            Terminator::Switch { val, targets } => Some((id, val.clone(), targets.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(switches.len(), 1);
    let (_, scrutinee, targets) = &switches[0];
    assert!(scrutinee.as_local().is_some(), "matches on the call temp");
    assert_eq!(targets.len(), 2);

    // Calls to next and f both present
    let call_targets: Vec<_> = mir
        .blocks
        .iter()
        .filter_map(|b| match &b.terminator {
            Terminator::Call {
                target: CallTarget::Path(Path::Simple(gp)),
                ..
            } => Some(gp.path.clone()),
            _ => None,
        })
        .collect();
    assert!(call_targets.contains(&next_path));
    assert!(call_targets.contains(&f_path));

    // Some path loops back to the head; the None arm breaks out elsewhere
    let loops_back = mir
        .blocks
        .iter_enumerated()
        .any(|(id, b)| id != BlockId(0) && b.terminator == Terminator::Goto(loop_head));
    assert!(loops_back, "loop bottom jumps back to the loop head");

    let none_blk = &mir.blocks[targets[1]];
    match &none_blk.terminator {
        Terminator::Goto(exit) => assert_ne!(*exit, loop_head, "break leaves the loop"),
        other => panic!("none-arm terminator {:?}", other),
    }
    assert!(none_blk.statements.iter().any(|s| matches!(
        s,
        Statement::Assign {
            src: RValue::Tuple { vals },
            ..
        } if vals.is_empty()
    )));
}

#[test]
fn test_s6_generator_two_states() {
    let mut krate = Crate::new();
    let ret_path = SimplePath::new(&["test", "GenRet"]);
    krate.add_item(
        ret_path.clone(),
        Item::Enum(EnumDef {
            variants: vec![
                Variant {
                    name: Symbol::intern("Yielded"),
                    data: VariantData::Tuple(vec![i32_ty()]),
                },
                Variant {
                    name: Symbol::intern("Complete"),
                    data: VariantData::Tuple(vec![i32_ty()]),
                },
            ],
        }),
    );
    let pin_path = SimplePath::new(&["test", "Pin"]);
    krate.add_item(
        pin_path.clone(),
        Item::Struct(StructDef {
            fields: StructFields::Tuple(vec![]),
        }),
    );
    krate.mark_copy(pin_path.clone());

    let state_enum = SimplePath::new(&["test", "GenState"]);
    let decl = hir::GeneratorDecl {
        obj: SimplePath::new(&["test", "GenObj"]),
        state_enum: state_enum.clone(),
        state_struct: SimplePath::new(&["test", "GenData"]),
        capture_usages: vec![],
    };

    let yield_stmt = e(ExprKind::Yield(Box::new(lit_i32(1))), Type::unit());
    let body = block(vec![yield_stmt], Some(lit_i32(2)), i32_ty());
    let f = hir::Function {
        name: Symbol::intern("gen_fn"),
        args: vec![(Pattern::bind("self", 0), Type::named(pin_path.clone(), vec![]))],
        ret_ty: Type::named(ret_path.clone(), vec![]),
        locals: vec![Type::named(pin_path, vec![])],
        body,
        generator: Some(decl),
    };
    let out = lower_ok(&krate, &f);
    let gen = out.generator.expect("generator output");

    // State enum: two numbered states plus END
    assert_eq!(
        gen.state_variants,
        vec![
            Symbol::intern("0"),
            Symbol::intern("1"),
            Symbol::intern("END")
        ]
    );
    assert!(gen.state_fields.is_empty(), "nothing is live across the yield");

    let mir = &out.mir;
    let targets = match &mir.blocks[BlockId(0)].terminator {
        Terminator::Switch { targets, .. } => targets.clone(),
        other => panic!("dispatch terminator {:?}", other),
    };
    assert_eq!(targets.len(), 3);

    // Each state arm re-arms the discriminant then resumes; END diverges
    for &arm in &targets[..2] {
        let blk = &mir.blocks[arm];
        assert!(matches!(
            &blk.statements[0],
            Statement::Assign {
                src: RValue::EnumVariant { index: 2, .. },
                ..
            }
        ));
        assert!(matches!(blk.terminator, Terminator::Goto(_)));
    }
    assert_eq!(mir.blocks[targets[2]].terminator, Terminator::Diverge);

    // The yield writes Yielded(1), advances the state to 1, and returns
    let yield_blk = mir
        .blocks
        .iter()
        .find(|b| {
            b.statements.iter().any(|s| {
                matches!(
                    s,
                    Statement::Assign {
                        dst,
                        src: RValue::EnumVariant { index: 0, vals, .. },
                        ..
                    } if *dst == LValue::new_return() && vals.len() == 1
                )
            })
        })
        .expect("yield block");
    assert!(yield_blk.statements.iter().any(|s| matches!(
        s,
        Statement::Assign {
            src: RValue::EnumVariant { index: 1, vals, .. },
            ..
        } if vals.is_empty()
    )));
    assert_eq!(yield_blk.terminator, Terminator::Return);

    // The tail completes with Complete(2)
    assert!(mir.blocks.iter().any(|b| {
        b.statements.iter().any(|s| {
            matches!(
                s,
                Statement::Assign {
                    dst,
                    src: RValue::EnumVariant { index: 1, vals, .. },
                    ..
                } if *dst == LValue::new_return() && vals.len() == 1
            )
        }) && b.terminator == Terminator::Return
    }));

    // Drop glue: returns unit, dispatches over the same three states
    crate::validate::validate(&gen.drop_fn).expect("drop glue is valid MIR");
    let drop_entry = &gen.drop_fn.blocks[BlockId(0)];
    match &drop_entry.terminator {
        Terminator::Switch { targets, .. } => assert_eq!(targets.len(), 3),
        other => panic!("drop dispatch terminator {:?}", other),
    }
}

// ========================================================================
// Boundary behaviours
// ========================================================================

#[test]
fn test_b1_empty_block_yields_unit() {
    let krate = Crate::new();
    let f = fn_of(
        vec![],
        Type::unit(),
        vec![],
        block(vec![], None, Type::unit()),
    );
    let out = lower_full(&krate, &f);
    let mir = &out.mir;

    assert_eq!(mir.blocks.len(), 1);
    let bb = &mir.blocks[BlockId(0)];
    assert_eq!(bb.statements.len(), 1);
    assert!(matches!(
        &bb.statements[0],
        Statement::Assign {
            dst,
            src: RValue::Tuple { vals },
            ..
        } if *dst == LValue::new_return() && vals.is_empty()
    ));
    assert!(matches!(bb.terminator, Terminator::Return));
}

#[test]
fn test_b2_infinite_loop_shape() {
    let krate = Crate::new();
    let loop_expr = e(
        ExprKind::Loop {
            body: Box::new(block(vec![], None, Type::unit())),
            label: None,
            diverges: true,
        },
        Type::Never,
    );
    let f = fn_of(
        vec![],
        Type::unit(),
        vec![],
        block(vec![loop_expr], None, Type::unit()),
    );
    let out = lower_ok(&krate, &f);
    let mir = &out.mir;

    let loop_head = match &mir.blocks[BlockId(0)].terminator {
        Terminator::Goto(t) => *t,
        other => panic!("entry terminator {:?}", other),
    };
    assert_eq!(mir.blocks[loop_head].terminator, Terminator::Goto(loop_head));
    for (id, bb) in mir.blocks.iter_enumerated() {
        match &bb.terminator {
            Terminator::Goto(t) => assert_eq!(*t, loop_head, "bb{} goes elsewhere", id.0),
            Terminator::Diverge => {}
            other => panic!("unexpected terminator {:?}", other),
        }
    }
}

fn token_krate() -> (Crate, Type, SimplePath) {
    let mut krate = Crate::new();
    let token_path = SimplePath::new(&["test", "Token"]);
    krate.add_item(
        token_path.clone(),
        Item::Struct(StructDef {
            fields: StructFields::Unit,
        }),
    );
    let mk_path = SimplePath::new(&["test", "mk"]);
    krate.add_item(
        mk_path.clone(),
        Item::Function(FnSig {
            abi: Abi::Rust,
            params: vec![],
            ret: Type::named(token_path.clone(), vec![]),
        }),
    );
    (krate, Type::named(token_path, vec![]), mk_path)
}

fn call_mk(mk_path: &SimplePath, token_ty: &Type) -> Expr {
    e(
        ExprKind::CallPath {
            path: Path::simple(mk_path.clone()),
            args: vec![],
        },
        token_ty.clone(),
    )
}

fn let_bind(slot: u32, ty: Type, value: Expr) -> Expr {
    e(
        ExprKind::Let {
            pattern: Pattern::bind("v", slot),
            ty,
            value: Some(Box::new(value)),
        },
        Type::unit(),
    )
}

#[test]
fn test_b3_return_drops_nested_scopes_innermost_first() {
    let (krate, token_ty, mk_path) = token_krate();

    let inner = block(
        vec![
            let_bind(2, token_ty.clone(), call_mk(&mk_path, &token_ty)),
            e(ExprKind::Return(Box::new(lit_i32(7))), Type::Never),
        ],
        None,
        Type::Never,
    );
    let middle = block(
        vec![
            let_bind(1, token_ty.clone(), call_mk(&mk_path, &token_ty)),
            inner,
        ],
        None,
        Type::Never,
    );
    let outer = block(
        vec![
            let_bind(0, token_ty.clone(), call_mk(&mk_path, &token_ty)),
            middle,
        ],
        None,
        Type::Never,
    );
    let f = fn_of(
        vec![],
        i32_ty(),
        vec![token_ty.clone(), token_ty.clone(), token_ty.clone()],
        outer,
    );
    let out = lower_ok(&krate, &f);
    let mir = &out.mir;

    // The returning block assigns the value, then drops c, b, a in that order
    let ret_blk = mir
        .blocks
        .iter()
        .find(|b| {
            matches!(b.terminator, Terminator::Return)
                && b.statements
                    .iter()
                    .any(|s| matches!(s, Statement::Assign { dst, .. } if *dst == LValue::new_return()))
        })
        .expect("return block");

    let drops: Vec<LocalId> = ret_blk
        .statements
        .iter()
        .filter_map(|s| match s {
            Statement::Drop { val, .. } => val.as_local(),
            _ => None,
        })
        .collect();
    assert_eq!(
        drops,
        vec![LocalId(2), LocalId(1), LocalId(0)],
        "drops run innermost-first"
    );
    // All drops come after the return-value assignment
    let assign_pos = ret_blk
        .statements
        .iter()
        .position(|s| matches!(s, Statement::Assign { dst, .. } if *dst == LValue::new_return()))
        .unwrap();
    let first_drop = ret_blk
        .statements
        .iter()
        .position(|s| matches!(s, Statement::Drop { .. }))
        .unwrap();
    assert!(assign_pos < first_drop);
}

#[test]
fn test_b4_borrowed_temporary_is_raised() {
    let (krate, token_ty, mk_path) = token_krate();
    let ref_ty = Type::borrow(BorrowKind::Shared, token_ty.clone());

    let borrow = e(
        ExprKind::Borrow {
            kind: BorrowKind::Shared,
            value: Box::new(call_mk(&mk_path, &token_ty)),
        },
        ref_ty.clone(),
    );
    let f = fn_of(
        vec![],
        Type::unit(),
        vec![ref_ty.clone()],
        block(vec![let_bind(0, ref_ty, borrow)], None, Type::unit()),
    );
    let out = lower_ok(&krate, &f);
    let mir = &out.mir;

    // Find the borrow that initialises `x` and the temporary it refers to
    let mut referent = None;
    for bb in mir.blocks.iter() {
        for s in &bb.statements {
            if let Statement::Assign {
                dst,
                src: RValue::Borrow { val, .. },
                ..
            } = s
            {
                if *dst == LValue::new_local(LocalId(0)) {
                    referent = val.as_local();
                }
            }
        }
    }
    let referent = referent.expect("x is initialised from a borrow of a local");

    // The temporary survives the initialiser statement: its drop sits in the
    // block-closing sequence of the same block, after the assignment to x
    let blk = mir
        .blocks
        .iter()
        .find(|b| {
            b.statements
                .iter()
                .any(|s| matches!(s, Statement::Assign { dst, .. } if *dst == LValue::new_local(LocalId(0))))
        })
        .unwrap();
    let assign_pos = blk
        .statements
        .iter()
        .position(|s| matches!(s, Statement::Assign { dst, .. } if *dst == LValue::new_local(LocalId(0))))
        .unwrap();
    let drop_pos = blk
        .statements
        .iter()
        .position(|s| matches!(s, Statement::Drop { val, .. } if val.as_local() == Some(referent)));
    match drop_pos {
        Some(p) => assert!(p > assign_pos, "temporary dropped after the let"),
        None => panic!("borrowed temporary is never dropped"),
    }
}

// ========================================================================
// Round-trip and destructure properties
// ========================================================================

#[test]
fn test_p7_lowering_is_deterministic() {
    let krate = krate_with_option();
    let body = block(
        vec![],
        Some(e(
            ExprKind::Match {
                value: Box::new(var(0, option_i32())),
                arms: vec![
                    MatchArm {
                        patterns: vec![Pattern {
                            binding: None,
                            implicit_derefs: 0,
                            kind: PatKind::PathTuple {
                                path: variant_path(option_path(), "Some", vec![i32_ty()]),
                                pats: vec![Pattern::bind("x", 1)],
                            },
                        }],
                        guard: None,
                        body: var(1, i32_ty()),
                    },
                    MatchArm {
                        patterns: vec![Pattern::any()],
                        guard: None,
                        body: lit_i32(0),
                    },
                ],
            },
            i32_ty(),
        )),
        i32_ty(),
    );
    let f = fn_of(
        vec![(Pattern::bind("v", 0), option_i32())],
        i32_ty(),
        vec![option_i32(), i32_ty()],
        body,
    );
    let a = lower_ok(&krate, &f);
    let b = lower_ok(&krate, &f);
    assert_eq!(a.mir, b.mir);
}

#[test]
fn test_p8_single_inhabited_variant_destructure() {
    let mut krate = Crate::new();
    let wrap_path = SimplePath::new(&["test", "Wrap"]);
    krate.add_item(
        wrap_path.clone(),
        Item::Enum(EnumDef {
            variants: vec![
                Variant {
                    name: Symbol::intern("V"),
                    data: VariantData::Tuple(vec![i32_ty()]),
                },
                Variant {
                    name: Symbol::intern("Bad"),
                    data: VariantData::Tuple(vec![Type::Never]),
                },
            ],
        }),
    );
    let wrap_ty = Type::named(wrap_path.clone(), vec![]);

    let let_stmt = e(
        ExprKind::Let {
            pattern: Pattern {
                binding: None,
                implicit_derefs: 0,
                kind: PatKind::PathTuple {
                    path: variant_path(wrap_path, "V", vec![]),
                    pats: vec![Pattern::bind("x", 1)],
                },
            },
            ty: wrap_ty.clone(),
            value: Some(Box::new(var(0, wrap_ty.clone()))),
        },
        Type::unit(),
    );
    let f = fn_of(
        vec![(Pattern::bind("w", 0), wrap_ty.clone())],
        Type::unit(),
        vec![wrap_ty, i32_ty()],
        block(vec![let_stmt], None, Type::unit()),
    );
    let out = lower_ok(&krate, &f);

    let mut downcasts = Vec::new();
    for bb in out.mir.blocks.iter() {
        for s in &bb.statements {
            if let Statement::Assign { src: RValue::Use(lv), .. } = s {
                for w in &lv.wrappers {
                    if let LValueWrapper::Downcast(v) = w {
                        downcasts.push(*v);
                    }
                }
            }
        }
    }
    assert_eq!(downcasts, vec![0], "exactly one Downcast of variant 0");
}

// ========================================================================
// Materialisation and short-circuit shape
// ========================================================================

#[test]
fn test_call_arguments_pinned_into_distinct_temporaries() {
    let mut krate = Crate::new();
    let g_path = SimplePath::new(&["test", "g"]);
    krate.add_item(
        g_path.clone(),
        Item::Function(FnSig {
            abi: Abi::Rust,
            params: vec![i32_ty(), i32_ty(), i32_ty()],
            ret: i32_ty(),
        }),
    );
    let call = e(
        ExprKind::CallPath {
            path: Path::simple(g_path),
            args: vec![
                binop(hir::BinOp::Add, var(0, i32_ty()), lit_i32(1), i32_ty()),
                binop(hir::BinOp::Add, var(0, i32_ty()), lit_i32(2), i32_ty()),
                lit_i32(7),
            ],
        },
        i32_ty(),
    );
    let f = fn_of(
        vec![(Pattern::bind("x", 0), i32_ty())],
        i32_ty(),
        vec![i32_ty()],
        block(vec![], Some(call), i32_ty()),
    );
    let out = lower_ok(&krate, &f);

    let args = out
        .mir
        .blocks
        .iter()
        .find_map(|b| match &b.terminator {
            Terminator::Call { args, .. } => Some(args.clone()),
            _ => None,
        })
        .expect("call terminator");
    assert_eq!(args.len(), 3);
    let (a0, a1) = match (&args[0], &args[1]) {
        (Param::LValue(a), Param::LValue(b)) => (a.as_local().unwrap(), b.as_local().unwrap()),
        other => panic!("computed arguments not in temporaries: {:?}", other),
    };
    assert_ne!(a0, a1, "each argument gets its own temporary");
    assert!(matches!(args[2], Param::Constant(Constant::Int { value: 7, .. })));
}

#[test]
fn test_short_circuit_and_is_control_flow() {
    let krate = Crate::new();
    let expr = binop(
        hir::BinOp::BoolAnd,
        var(0, bool_ty()),
        var(1, bool_ty()),
        bool_ty(),
    );
    let f = fn_of(
        vec![
            (Pattern::bind("a", 0), bool_ty()),
            (Pattern::bind("b", 1), bool_ty()),
        ],
        bool_ty(),
        vec![bool_ty(), bool_ty()],
        block(vec![], Some(expr), bool_ty()),
    );
    let out = lower_ok(&krate, &f);
    let mir = &out.mir;

    // No BinOp is emitted for `&&`
    for bb in mir.blocks.iter() {
        for s in &bb.statements {
            assert!(
                !matches!(s, Statement::Assign { src: RValue::BinOp { .. }, .. }),
                "short-circuit must not produce a BinOp"
            );
        }
    }
    // The left side drives an If; the false edge assigns the constant
    let has_if = mir
        .blocks
        .iter()
        .any(|b| matches!(b.terminator, Terminator::If { .. }));
    assert!(has_if);
    let has_const_false = mir.blocks.iter().any(|b| {
        b.statements.iter().any(|s| {
            matches!(
                s,
                Statement::Assign {
                    src: RValue::Constant(Constant::Bool(false)),
                    ..
                }
            )
        })
    });
    assert!(has_const_false);
}

#[test]
fn test_value_match_uses_switch_value() {
    let krate = Crate::new();
    let body = block(
        vec![],
        Some(e(
            ExprKind::Match {
                value: Box::new(var(0, i32_ty())),
                arms: vec![
                    MatchArm {
                        patterns: vec![Pattern {
                            binding: None,
                            implicit_derefs: 0,
                            kind: PatKind::Value(hir::PatConst::Int(1)),
                        }],
                        guard: None,
                        body: lit_i32(10),
                    },
                    MatchArm {
                        patterns: vec![Pattern::any()],
                        guard: None,
                        body: lit_i32(20),
                    },
                ],
            },
            i32_ty(),
        )),
        i32_ty(),
    );
    let f = fn_of(
        vec![(Pattern::bind("x", 0), i32_ty())],
        i32_ty(),
        vec![i32_ty()],
        body,
    );
    let out = lower_ok(&krate, &f);
    let mir = &out.mir;

    // The literal arm tests via SwitchValue on the scrutinee
    let (values, default) = mir
        .blocks
        .iter()
        .find_map(|b| match &b.terminator {
            Terminator::SwitchValue {
                val,
                values,
                default,
                ..
            } => {
                assert_eq!(*val, LValue::new_argument(0));
                Some((values.clone(), *default))
            }
            _ => None,
        })
        .expect("SwitchValue test");
    assert_eq!(
        values,
        vec![Constant::Int {
            value: 1,
            ty: CoreType::I32
        }]
    );
    // The default edge leads to the wildcard arm, which produces 20
    let mut seen = std::collections::HashSet::new();
    let mut frontier = vec![default];
    let mut found = false;
    while let Some(bb) = frontier.pop() {
        if !seen.insert(bb) {
            continue;
        }
        let blk = &mir.blocks[bb];
        if blk.statements.iter().any(|s| {
            matches!(
                s,
                Statement::Assign {
                    src: RValue::Constant(Constant::Int { value: 20, .. }),
                    ..
                }
            )
        }) {
            found = true;
            break;
        }
        frontier.extend(blk.terminator.targets());
    }
    assert!(found, "wildcard arm reachable from the default edge");
}

#[test]
fn test_guard_failure_falls_to_next_arm() {
    let krate = Crate::new();
    let guard = binop(hir::BinOp::CmpGt, var(1, i32_ty()), lit_i32(0), bool_ty());
    let body = block(
        vec![],
        Some(e(
            ExprKind::Match {
                value: Box::new(var(0, i32_ty())),
                arms: vec![
                    MatchArm {
                        patterns: vec![Pattern::bind("n", 1)],
                        guard: Some(guard),
                        body: lit_i32(1),
                    },
                    MatchArm {
                        patterns: vec![Pattern::any()],
                        guard: None,
                        body: lit_i32(0),
                    },
                ],
            },
            i32_ty(),
        )),
        i32_ty(),
    );
    let f = fn_of(
        vec![(Pattern::bind("x", 0), i32_ty())],
        i32_ty(),
        vec![i32_ty(), i32_ty()],
        body,
    );
    let out = lower_ok(&krate, &f);
    let mir = &out.mir;

    // The guard comparison reads the scrutinee through the alias, before any
    // binding assignment
    let guard_cmp = mir.blocks.iter().find_map(|b| {
        b.statements.iter().find_map(|s| match s {
            Statement::Assign {
                dst,
                src:
                    RValue::BinOp {
                        lhs: Param::LValue(lhs),
                        op: BinOp::Gt,
                        ..
                    },
                ..
            } => Some((dst.clone(), lhs.clone())),
            _ => None,
        })
    });
    let (_, lhs) = guard_cmp.expect("guard comparison emitted");
    assert_eq!(
        lhs,
        LValue::new_argument(0),
        "guard reads the scrutinee place, not a moved binding"
    );

    // The guard If has a false edge that eventually assigns the second arm's
    // value
    let has_guard_if = mir
        .blocks
        .iter()
        .any(|b| matches!(b.terminator, Terminator::If { .. }));
    assert!(has_guard_if);
}

// ========================================================================
// User errors
// ========================================================================

#[test]
fn test_error_refutable_pattern_in_let() {
    let krate = Crate::new();
    let let_stmt = e(
        ExprKind::Let {
            pattern: Pattern {
                binding: None,
                implicit_derefs: 0,
                kind: PatKind::Value(hir::PatConst::Int(1)),
            },
            ty: i32_ty(),
            value: Some(Box::new(lit_i32(1))),
        },
        Type::unit(),
    );
    let f = fn_of(
        vec![],
        Type::unit(),
        vec![],
        block(vec![let_stmt], None, Type::unit()),
    );
    let err = lower_function(&krate, &LowerConfig::default(), &f).unwrap_err();
    assert_eq!(err.kind, LowerErrorKind::RefutablePattern);
}

#[test]
fn test_error_break_outside_loop() {
    let krate = Crate::new();
    let f = fn_of(
        vec![],
        Type::unit(),
        vec![],
        block(
            vec![e(
                ExprKind::Break {
                    label: None,
                    value: None,
                },
                Type::Never,
            )],
            None,
            Type::unit(),
        ),
    );
    let err = lower_function(&krate, &LowerConfig::default(), &f).unwrap_err();
    assert_eq!(err.kind, LowerErrorKind::BreakOutsideLoop);
}

fn point_krate() -> (Crate, SimplePath) {
    let mut krate = Crate::new();
    let p_path = SimplePath::new(&["test", "P"]);
    krate.add_item(
        p_path.clone(),
        Item::Struct(StructDef {
            fields: StructFields::Named(vec![(Symbol::intern("x"), i32_ty())]),
        }),
    );
    (krate, p_path)
}

#[test]
fn test_error_unknown_field_in_struct_literal() {
    let (krate, p_path) = point_krate();
    let lit = e(
        ExprKind::StructLiteral {
            path: GenericPath::plain(p_path.clone()),
            base: None,
            fields: vec![(Symbol::intern("y"), lit_i32(1))],
        },
        Type::named(p_path, vec![]),
    );
    let f = fn_of(
        vec![],
        Type::unit(),
        vec![],
        block(vec![lit], None, Type::unit()),
    );
    let err = lower_function(&krate, &LowerConfig::default(), &f).unwrap_err();
    assert_eq!(err.kind, LowerErrorKind::UnknownField(Symbol::intern("y")));
}

#[test]
fn test_error_missing_field_without_base() {
    let (krate, p_path) = point_krate();
    let lit = e(
        ExprKind::StructLiteral {
            path: GenericPath::plain(p_path.clone()),
            base: None,
            fields: vec![],
        },
        Type::named(p_path, vec![]),
    );
    let f = fn_of(
        vec![],
        Type::unit(),
        vec![],
        block(vec![lit], None, Type::unit()),
    );
    let err = lower_function(&krate, &LowerConfig::default(), &f).unwrap_err();
    assert_eq!(err.kind, LowerErrorKind::MissingField(Symbol::intern("x")));
}

#[test]
fn test_error_invalid_cast_bool_to_float() {
    let krate = Crate::new();
    let cast = e(
        ExprKind::Cast {
            value: Box::new(e(
                ExprKind::Literal(Literal::Boolean(true)),
                bool_ty(),
            )),
        },
        Type::Primitive(CoreType::F64),
    );
    let f = fn_of(
        vec![],
        Type::unit(),
        vec![],
        block(vec![cast], None, Type::unit()),
    );
    let err = lower_function(&krate, &LowerConfig::default(), &f).unwrap_err();
    assert!(matches!(err.kind, LowerErrorKind::InvalidCast { .. }));
}

#[test]
fn test_error_unhandled_variant_in_irrefutable_destructure() {
    let krate = krate_with_option();
    let let_stmt = e(
        ExprKind::Let {
            pattern: Pattern {
                binding: None,
                implicit_derefs: 0,
                kind: PatKind::PathTuple {
                    path: variant_path(option_path(), "Some", vec![i32_ty()]),
                    pats: vec![Pattern::bind("x", 1)],
                },
            },
            ty: option_i32(),
            value: Some(Box::new(var(0, option_i32()))),
        },
        Type::unit(),
    );
    let f = fn_of(
        vec![(Pattern::bind("v", 0), option_i32())],
        Type::unit(),
        vec![option_i32(), i32_ty()],
        block(vec![let_stmt], None, Type::unit()),
    );
    let err = lower_function(&krate, &LowerConfig::default(), &f).unwrap_err();
    assert_eq!(
        err.kind,
        LowerErrorKind::UnhandledVariant(Symbol::intern("None"))
    );
}

// ========================================================================
// Parallel driver
// ========================================================================

#[test]
fn test_lower_functions_batch() {
    let krate = Crate::new();
    let mk = |v: i32| {
        fn_of(
            vec![],
            i32_ty(),
            vec![],
            block(vec![], Some(lit_i32(v)), i32_ty()),
        )
    };
    let fns = vec![mk(1), mk(2), mk(3)];
    let results = crate::lower::lower_functions(&krate, &LowerConfig::default(), &fns);
    assert_eq!(results.len(), 3);
    for r in results {
        r.expect("batch lowering failed");
    }
}

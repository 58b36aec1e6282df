//! Edge case tests for opalc-mir

use crate::builder::MirBuilder;
use crate::mir::{
    BasicBlock, BlockId, Constant, DropKind, LValue, LValueWrapper, LocalId, Param, RValue,
    Statement, Terminator,
};
use opalc_hir::resolver::Crate;
use opalc_hir::types::{BorrowKind, CoreType, Type};
use opalc_util::{Span, Symbol};

fn i32_ty() -> Type {
    Type::Primitive(CoreType::I32)
}

fn unit_token(path: &opalc_hir::types::SimplePath) -> RValue {
    RValue::Struct {
        path: opalc_hir::types::GenericPath::plain(path.clone()),
        vals: vec![],
    }
}

fn new_builder(krate: &Crate) -> MirBuilder<'_, Crate> {
    MirBuilder::new(
        krate,
        Symbol::intern("edge"),
        i32_ty(),
        &[],
        &[],
        Span::DUMMY,
    )
}

// ==================== LVALUE TESTS ====================

/// EDGE CASE: wrappers apply left to right
#[test]
fn test_edge_lvalue_wrapper_order() {
    let lv = LValue::new_argument(0).field(0).deref().field(1);
    assert_eq!(
        lv.wrappers,
        vec![
            LValueWrapper::Field(0),
            LValueWrapper::Deref,
            LValueWrapper::Field(1)
        ]
    );
}

/// EDGE CASE: structural equality of lvalues
#[test]
fn test_edge_lvalue_equality() {
    let a = LValue::new_local(LocalId(3)).deref();
    let b = LValue::new_local(LocalId(3)).deref();
    let c = LValue::new_local(LocalId(3)).field(0);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

/// EDGE CASE: as_local only accepts unprojected locals
#[test]
fn test_edge_as_local() {
    assert_eq!(LValue::new_local(LocalId(1)).as_local(), Some(LocalId(1)));
    assert_eq!(LValue::new_local(LocalId(1)).deref().as_local(), None);
    assert_eq!(LValue::new_argument(0).as_local(), None);
}

/// EDGE CASE: deep projection chain
#[test]
fn test_edge_deep_projection() {
    let mut lv = LValue::new_local(LocalId(0));
    for i in 0..10 {
        lv = lv.field(i);
    }
    assert_eq!(lv.wrappers.len(), 10);
}

// ==================== TERMINATOR TESTS ====================

/// EDGE CASE: successors of every terminator kind
#[test]
fn test_edge_terminator_targets() {
    assert!(Terminator::Return.targets().is_empty());
    assert!(Terminator::Diverge.targets().is_empty());
    assert_eq!(Terminator::Goto(BlockId(4)).targets(), vec![BlockId(4)]);
    assert_eq!(
        Terminator::If {
            cond: LValue::new_local(LocalId(0)),
            bb_true: BlockId(1),
            bb_false: BlockId(2),
        }
        .targets(),
        vec![BlockId(1), BlockId(2)]
    );
    assert_eq!(
        Terminator::SwitchValue {
            val: LValue::new_local(LocalId(0)),
            values: vec![Constant::Uint {
                value: 0,
                ty: CoreType::U8
            }],
            targets: vec![BlockId(1)],
            default: BlockId(2),
        }
        .targets(),
        vec![BlockId(1), BlockId(2)]
    );
}

/// EDGE CASE: a freshly created block is not terminated
#[test]
fn test_edge_new_block_incomplete() {
    let block = BasicBlock::new();
    assert!(block.statements.is_empty());
    assert!(matches!(block.terminator, Terminator::Incomplete));
}

// ==================== BUILDER TESTS ====================

/// EDGE CASE: builder entry block is block 0 and starts active
#[test]
fn test_edge_builder_entry() {
    let krate = Crate::new();
    let mut b = new_builder(&krate);
    assert!(b.block_active());
    b.end_block(Span::DUMMY, Terminator::Return);
    let f = b.finish();
    assert_eq!(f.blocks.len(), 1);
}

/// EDGE CASE: pause and resume preserves the block
#[test]
fn test_edge_pause_resume() {
    let krate = Crate::new();
    let mut b = new_builder(&krate);
    let paused = b.pause_cur_block();
    assert!(!b.block_active());

    let other = b.new_bb_unlinked();
    b.set_cur_block(other);
    b.end_block(Span::DUMMY, Terminator::Return);

    b.set_cur_block(paused);
    b.end_block(Span::DUMMY, Terminator::Goto(other));
    let f = b.finish();
    assert_eq!(f.blocks[paused].terminator, Terminator::Goto(other));
}

/// EDGE CASE: temporaries get fresh, sequential locals
#[test]
fn test_edge_temporaries_sequential() {
    let krate = Crate::new();
    let mut b = new_builder(&krate);
    let t0 = b.new_temporary(Span::DUMMY, i32_ty());
    let t1 = b.new_temporary(Span::DUMMY, i32_ty());
    assert_eq!(t0.as_local(), Some(LocalId(0)));
    assert_eq!(t1.as_local(), Some(LocalId(1)));
    b.end_block(Span::DUMMY, Terminator::Return);
}

/// EDGE CASE: a pending rvalue result materialises into a temporary on
/// demand, a plain use does not
#[test]
fn test_edge_result_materialisation() {
    let krate = Crate::new();
    let mut b = new_builder(&krate);
    let sp = Span::DUMMY;

    let t = b.new_temporary(sp, i32_ty());
    b.push_stmt_assign(
        sp,
        t.clone(),
        RValue::Constant(Constant::Int {
            value: 3,
            ty: CoreType::I32,
        }),
    );
    b.set_result(sp, t.clone());
    let lv = b.get_result_in_lvalue(sp, &i32_ty());
    assert_eq!(lv, t, "a use passes through untouched");

    b.set_result(
        sp,
        RValue::BinOp {
            lhs: Param::LValue(t.clone()),
            op: crate::mir::BinOp::Add,
            rhs: Param::Constant(Constant::Int {
                value: 1,
                ty: CoreType::I32,
            }),
        },
    );
    let lv2 = b.get_result_in_lvalue(sp, &i32_ty());
    assert_ne!(lv2, t, "a computed rvalue lands in a fresh temporary");
    b.end_block(sp, Terminator::Return);
}

/// EDGE CASE: lvalue type computation through borrows and tuples
#[test]
fn test_edge_lvalue_type_projection() {
    let krate = Crate::new();
    let mut b = new_builder(&krate);
    let sp = Span::DUMMY;

    let tuple_ty = Type::Tuple(vec![i32_ty(), Type::Primitive(CoreType::Bool)]);
    let ref_ty = Type::borrow(BorrowKind::Shared, tuple_ty);
    let t = b.new_temporary(sp, ref_ty);

    let projected = t.clone().deref().field(1);
    assert_eq!(
        b.lvalue_type(sp, &projected),
        Type::Primitive(CoreType::Bool)
    );
    b.end_block(sp, Terminator::Return);
}

// ==================== STATEMENT TESTS ====================

/// EDGE CASE: assignment carries the drop-destination flag
#[test]
fn test_edge_assign_drop_flag() {
    let krate = Crate::new();
    let mut b = new_builder(&krate);
    let sp = Span::DUMMY;
    let t = b.new_temporary(sp, i32_ty());
    b.push_stmt_assign(sp, t.clone(), RValue::unit());
    b.push_stmt_assign_nodrop(sp, t.clone(), RValue::unit());
    b.end_block(sp, Terminator::Return);
    let f = b.finish();

    let stmts = &f.blocks[BlockId(0)].statements;
    assert!(matches!(stmts[0], Statement::Assign { drop_dst: true, .. }));
    assert!(matches!(stmts[1], Statement::Assign { drop_dst: false, .. }));
}

/// EDGE CASE: both drop kinds are representable
#[test]
fn test_edge_drop_kinds() {
    let deep = Statement::Drop {
        val: LValue::new_local(LocalId(0)),
        kind: DropKind::Deep,
    };
    let shallow = Statement::Drop {
        val: LValue::new_local(LocalId(0)),
        kind: DropKind::Shallow,
    };
    assert_ne!(deep, shallow);
}

// ==================== SCOPE TESTS ====================

/// EDGE CASE: scope-owned non-copy locals drop in reverse order on exit
#[test]
fn test_edge_scope_drop_order() {
    let mut krate = Crate::new();
    let token = opalc_hir::types::SimplePath::new(&["edge", "Token"]);
    krate.add_item(
        token.clone(),
        opalc_hir::resolver::Item::Struct(opalc_hir::resolver::StructDef {
            fields: opalc_hir::resolver::StructFields::Unit,
        }),
    );
    let token_ty = Type::named(token.clone(), vec![]);

    let mut b = new_builder(&krate);
    let sp = Span::DUMMY;
    let scope = b.new_scope_temp(sp);
    let t0 = b.new_temporary(sp, token_ty.clone());
    let t1 = b.new_temporary(sp, token_ty);
    b.push_stmt_assign(sp, t0.clone(), unit_token(&token));
    b.push_stmt_assign(sp, t1.clone(), unit_token(&token));
    b.terminate_scope(sp, scope, true);
    b.end_block(sp, Terminator::Return);
    let f = b.finish();

    let drops: Vec<LocalId> = f.blocks[BlockId(0)]
        .statements
        .iter()
        .filter_map(|s| match s {
            Statement::Drop { val, .. } => val.as_local(),
            _ => None,
        })
        .collect();
    assert_eq!(drops, vec![LocalId(1), LocalId(0)]);
}

/// EDGE CASE: a moved-out local is not dropped at scope exit
#[test]
fn test_edge_moved_local_not_dropped() {
    let mut krate = Crate::new();
    let token = opalc_hir::types::SimplePath::new(&["edge", "Token2"]);
    krate.add_item(
        token.clone(),
        opalc_hir::resolver::Item::Struct(opalc_hir::resolver::StructDef {
            fields: opalc_hir::resolver::StructFields::Unit,
        }),
    );
    let token_ty = Type::named(token.clone(), vec![]);

    let mut b = new_builder(&krate);
    let sp = Span::DUMMY;
    let scope = b.new_scope_temp(sp);
    let t0 = b.new_temporary(sp, token_ty.clone());
    let t1 = b.new_temporary(sp, token_ty);
    b.push_stmt_assign(sp, t0.clone(), unit_token(&token));
    // Moving t0 into t1 invalidates t0
    b.push_stmt_assign(sp, t1.clone(), RValue::Use(t0.clone()));
    b.terminate_scope(sp, scope, true);
    b.end_block(sp, Terminator::Return);
    let f = b.finish();

    let drops: Vec<LocalId> = f.blocks[BlockId(0)]
        .statements
        .iter()
        .filter_map(|s| match s {
            Statement::Drop { val, .. } => val.as_local(),
            _ => None,
        })
        .collect();
    assert_eq!(drops, vec![LocalId(1)], "only the live value is dropped");
}

//! Match lowering.
//!
//! Consumes the scrutinee place and the arm list, producing a decision graph
//! of `Switch`/`SwitchValue`/`If` terminators that tests patterns in source
//! order. Each selected arm binds its variables, evaluates its guard (before
//! any binding escapes), runs the body in a fresh variable scope, assigns the
//! match result slot, and jumps to the join block.
//!
//! Two strategies:
//! - the common all-arms-are-plain-variant-patterns case lowers to a single
//!   `Switch` with one target per variant;
//! - everything else falls back to an order-preserving chain of per-pattern
//!   tests, where a failed test or guard falls through to the next arm.

use crate::builder::bug;
use crate::lower::expr::ExprVisitor;
use crate::lower::LowerResult;
use crate::mir::{BinOp, BlockId, Constant, LValue, Param, RValue, Terminator};
use opalc_hir::hir::{MatchArm, PatConst, PatKind, Pattern};
use opalc_hir::resolver::{Item, Resolve};
use opalc_hir::types::{ArraySize, CoreType, Type};
use opalc_util::{Span, Symbol};

fn ty_bool() -> Type {
    Type::Primitive(CoreType::Bool)
}

fn ty_usize() -> Type {
    Type::Primitive(CoreType::Usize)
}

pub(crate) fn visit_match<R: Resolve>(
    vis: &mut ExprVisitor<'_, R>,
    e: &opalc_hir::hir::Expr,
    value: &opalc_hir::hir::Expr,
    arms: &[MatchArm],
) -> LowerResult {
    let saved = vis.borrow_raise_target.take();
    let r = visit_match_inner(vis, e, value, arms);
    vis.borrow_raise_target = saved;
    r
}

fn visit_match_inner<R: Resolve>(
    vis: &mut ExprVisitor<'_, R>,
    e: &opalc_hir::hir::Expr,
    value: &opalc_hir::hir::Expr,
    arms: &[MatchArm],
) -> LowerResult {
    let sp = e.span;
    vis.visit(value)?;
    if !vis.builder.block_active() {
        return Ok(());
    }
    let match_val = vis.builder.get_result_in_lvalue(value.span, &value.ty);

    if arms.is_empty() {
        // Zero-variant scrutinee; this code is unreachable
        vis.builder.end_block(sp, Terminator::Diverge);
        return Ok(());
    }

    // Single unguarded arm is just a destructure, same as `let`
    if arms.len() == 1 && arms[0].patterns.len() == 1 && arms[0].guard.is_none() {
        let arm = &arms[0];
        let pat = &arm.patterns[0];
        let asp = arm.body.span;

        let scope = vis.builder.new_scope_var(asp);
        let tmp_scope = vis.builder.new_scope_temp(asp);
        vis.define_vars_from(sp, pat);
        vis.destructure_from(sp, pat, match_val, false)?;

        vis.visit(&arm.body)?;

        if vis.builder.block_active() {
            let res = vis.builder.get_result(asp);
            let raise_to = vis.builder.owning_scope_above(asp, scope);
            vis.builder.raise_temporaries_in_rvalue(asp, &res, raise_to);
            vis.builder.terminate_scope(sp, tmp_scope, true);
            vis.builder.terminate_scope(sp, scope, true);
            vis.builder.set_result(asp, res);
        } else {
            vis.builder.terminate_scope(sp, tmp_scope, false);
            vis.builder.terminate_scope(sp, scope, false);
        }
        return Ok(());
    }

    let res_slot = vis.builder.new_temporary(sp, e.ty.clone());
    let join = vis.builder.new_bb_unlinked();

    if let Some(variant_count) = switchable_variant_count(vis, &value.ty, arms) {
        lower_match_switch(vis, sp, &match_val, arms, variant_count, &res_slot, join)?;
    } else {
        lower_match_general(vis, sp, &match_val, arms, &res_slot, join)?;
    }

    vis.builder.set_cur_block(join);
    vis.builder.set_result(sp, res_slot);
    Ok(())
}

/// Can this match lower to one `Switch`? Requires an enum scrutinee and
/// plain single-pattern unguarded arms whose subpatterns bind without
/// further testing.
fn switchable_variant_count<R: Resolve>(
    vis: &ExprVisitor<'_, R>,
    scrutinee_ty: &Type,
    arms: &[MatchArm],
) -> Option<usize> {
    let gp = match scrutinee_ty {
        Type::Path(gp) => gp,
        _ => return None,
    };
    let variant_count = match vis.builder.resolver().lookup(&gp.path) {
        Some(Item::Enum(en)) => en.variants.len(),
        _ => return None,
    };
    for arm in arms {
        if arm.guard.is_some() || arm.patterns.len() != 1 {
            return None;
        }
        let pat = &arm.patterns[0];
        if pat.implicit_derefs != 0 {
            return None;
        }
        match &pat.kind {
            PatKind::Any => {}
            PatKind::PathValue { path } => {
                vis.enum_variant_target(path)?;
            }
            PatKind::PathTuple { path, pats } => {
                vis.enum_variant_target(path)?;
                if !pats.iter().all(binds_without_tests) {
                    return None;
                }
            }
            PatKind::PathNamed { path, fields } => {
                vis.enum_variant_target(path)?;
                if !fields.iter().all(|(_, p)| binds_without_tests(p)) {
                    return None;
                }
            }
            _ => return None,
        }
    }
    Some(variant_count)
}

/// True when matching the pattern cannot fail: plain bindings, tuples and
/// references thereof.
fn binds_without_tests(pat: &Pattern) -> bool {
    match &pat.kind {
        PatKind::Any => true,
        PatKind::Ref(sub) => binds_without_tests(sub),
        PatKind::Tuple(subs) => subs.iter().all(binds_without_tests),
        _ => false,
    }
}

/// One `Switch` over the scrutinee's variants; the first arm covering each
/// variant wins, wildcards cover the remainder.
fn lower_match_switch<R: Resolve>(
    vis: &mut ExprVisitor<'_, R>,
    sp: Span,
    match_val: &LValue,
    arms: &[MatchArm],
    variant_count: usize,
    res_slot: &LValue,
    join: BlockId,
) -> LowerResult {
    let split = vis.builder.new_scope_split(sp);
    let entry = vis.builder.pause_cur_block();

    let mut targets: Vec<Option<BlockId>> = vec![None; variant_count];

    for arm in arms {
        let pat = &arm.patterns[0];
        let arm_bb = vis.builder.new_bb_unlinked();

        match &pat.kind {
            PatKind::Any => {
                for t in targets.iter_mut().filter(|t| t.is_none()) {
                    *t = Some(arm_bb);
                }
            }
            PatKind::PathValue { path }
            | PatKind::PathTuple { path, .. }
            | PatKind::PathNamed { path, .. } => {
                let (_, idx) = vis.enum_variant_target(path).unwrap();
                if targets[idx as usize].is_none() {
                    targets[idx as usize] = Some(arm_bb);
                }
            }
            _ => unreachable!(),
        }

        let asp = arm.body.span;
        vis.builder.set_cur_block(arm_bb);
        let var_scope = vis.builder.new_scope_var(asp);
        let tmp_scope = vis.builder.new_scope_temp(asp);
        vis.define_vars_from(sp, pat);
        vis.destructure_from(sp, pat, match_val.clone(), true)?;

        vis.visit(&arm.body)?;
        if vis.builder.block_active() {
            let res = vis.builder.get_result(asp);
            vis.builder.push_stmt_assign(asp, res_slot.clone(), res);
            vis.builder.terminate_scope(sp, tmp_scope, true);
            vis.builder.terminate_scope(sp, var_scope, true);
            vis.builder.end_split_arm(sp, split, true);
            vis.builder.end_block(sp, Terminator::Goto(join));
        } else {
            vis.builder.terminate_scope(sp, tmp_scope, false);
            vis.builder.terminate_scope(sp, var_scope, false);
            vis.builder.end_split_arm(sp, split, false);
        }
    }

    // Variants no arm covered can only be uninhabited; exhaustiveness was
    // checked before lowering
    let mut diverge_bb = None;
    for t in targets.iter_mut() {
        if t.is_none() {
            let bb = *diverge_bb.get_or_insert_with(|| {
                let bb = vis.builder.new_bb_unlinked();
                vis.builder.set_cur_block(bb);
                vis.builder.end_block(sp, Terminator::Diverge);
                bb
            });
            *t = Some(bb);
        }
    }

    vis.builder.set_cur_block(entry);
    vis.builder.end_block(
        sp,
        Terminator::Switch {
            val: match_val.clone(),
            targets: targets.into_iter().map(Option::unwrap).collect(),
        },
    );

    // Arm-state merge; the caller re-enters at the join block
    vis.builder.terminate_scope(sp, split, true);
    Ok(())
}

/// Order-preserving chain: each arm tests its patterns, a failed test or
/// guard falls through to the next arm's entry block.
fn lower_match_general<R: Resolve>(
    vis: &mut ExprVisitor<'_, R>,
    sp: Span,
    match_val: &LValue,
    arms: &[MatchArm],
    res_slot: &LValue,
    join: BlockId,
) -> LowerResult {
    let split = vis.builder.new_scope_split(sp);

    for (arm_idx, arm) in arms.iter().enumerate() {
        let asp = arm.body.span;
        let is_last = arm_idx == arms.len() - 1;
        let next_arm_bb = vis.builder.new_bb_unlinked();

        let var_scope = vis.builder.new_scope_var(asp);
        let tmp_scope = vis.builder.new_scope_temp(asp);
        vis.define_vars_from(sp, &arm.patterns[0]);

        let body_bb = vis.builder.new_bb_unlinked();

        for (pat_idx, pat) in arm.patterns.iter().enumerate() {
            let last_pat = pat_idx == arm.patterns.len() - 1;
            let next_pat_bb = if last_pat {
                next_arm_bb
            } else {
                vis.builder.new_bb_unlinked()
            };

            let prep_bb = vis.builder.new_bb_unlinked();
            test_pattern(vis, sp, pat, match_val.clone(), prep_bb, next_pat_bb)?;
            vis.builder.set_cur_block(prep_bb);

            if let Some(guard) = &arm.guard {
                // Aliases let the guard see the bindings without anything
                // moving out of the scrutinee yet
                vis.destructure_aliases_from(sp, pat, match_val.clone())?;
                let gsp = guard.span;
                let gtmp = vis.builder.new_scope_temp(gsp);
                vis.visit(guard)?;
                let guard_live = vis.builder.block_active();
                let gval = if guard_live {
                    let v = vis.builder.get_result_in_lvalue(gsp, &ty_bool());
                    vis.builder.terminate_scope(gsp, gtmp, true);
                    Some(v)
                } else {
                    vis.builder.terminate_scope(gsp, gtmp, false);
                    None
                };

                let mut slots = Vec::new();
                collect_binding_slots(pat, &mut slots);
                for slot in slots {
                    vis.builder.remove_variable_alias(slot);
                }

                let bind_bb = vis.builder.new_bb_unlinked();
                if let Some(gval) = gval {
                    vis.builder.end_block(
                        gsp,
                        Terminator::If {
                            cond: gval,
                            bb_true: bind_bb,
                            bb_false: next_arm_bb,
                        },
                    );
                }
                // A diverged guard leaves bind_bb unreachable but it is still
                // lowered and sealed
                vis.builder.set_cur_block(bind_bb);
            }

            vis.destructure_from(sp, pat, match_val.clone(), true)?;
            vis.builder.end_block(sp, Terminator::Goto(body_bb));

            if !last_pat {
                vis.builder.set_cur_block(next_pat_bb);
            }
        }

        vis.builder.set_cur_block(body_bb);
        vis.visit(&arm.body)?;
        if vis.builder.block_active() {
            let res = vis.builder.get_result(asp);
            vis.builder.push_stmt_assign(asp, res_slot.clone(), res);
            vis.builder.terminate_scope(sp, tmp_scope, true);
            vis.builder.terminate_scope(sp, var_scope, true);
            vis.builder.end_split_arm(sp, split, true);
            vis.builder.end_block(sp, Terminator::Goto(join));
        } else {
            vis.builder.terminate_scope(sp, tmp_scope, false);
            vis.builder.terminate_scope(sp, var_scope, false);
            vis.builder.end_split_arm(sp, split, false);
        }

        vis.builder.set_cur_block(next_arm_bb);
        if is_last {
            // Exhaustiveness was established before lowering; falling off the
            // last arm is unreachable
            vis.builder.end_block(sp, Terminator::Diverge);
        }
    }

    // Arm-state merge; the caller re-enters at the join block
    vis.builder.terminate_scope(sp, split, true);
    Ok(())
}

fn collect_binding_slots(pat: &Pattern, out: &mut Vec<u32>) {
    if let Some(b) = &pat.binding {
        out.push(b.slot);
    }
    match &pat.kind {
        PatKind::Any | PatKind::PathValue { .. } | PatKind::Value(_) | PatKind::Range { .. } => {}
        PatKind::Ref(sub) => collect_binding_slots(sub, out),
        PatKind::Tuple(subs) | PatKind::PathTuple { pats: subs, .. } | PatKind::Slice(subs) => {
            for sub in subs {
                collect_binding_slots(sub, out);
            }
        }
        PatKind::PathNamed { fields, .. } => {
            for (_, sub) in fields {
                collect_binding_slots(sub, out);
            }
        }
        PatKind::SplitSlice {
            leading,
            extra,
            trailing,
        } => {
            for sub in leading {
                collect_binding_slots(sub, out);
            }
            if let Some(b) = extra {
                out.push(b.slot);
            }
            for sub in trailing {
                collect_binding_slots(sub, out);
            }
        }
    }
}

fn pat_const_to_constant(sp: Span, c: &PatConst, ty: &Type) -> Constant {
    match c {
        PatConst::Int(v) => match ty.as_primitive() {
            Some(p) if p.is_signed_integer() => Constant::Int { value: *v, ty: p },
            other => bug!(sp, "integer pattern on type {:?}", other),
        },
        PatConst::Uint(v) => match ty.as_primitive() {
            Some(p) if p.is_unsigned_integer() || p == CoreType::Char => {
                Constant::Uint { value: *v, ty: p }
            }
            other => bug!(sp, "unsigned pattern on type {:?}", other),
        },
        PatConst::Bool(b) => Constant::Bool(*b),
        PatConst::Str(s) => Constant::Str(*s),
    }
}

/// Emit the structural test for `pat` against `lval`: control reaches
/// `success` exactly when the pattern matches, `fail` otherwise. The current
/// block is consumed.
fn test_pattern<R: Resolve>(
    vis: &mut ExprVisitor<'_, R>,
    sp: Span,
    pat: &Pattern,
    mut lval: LValue,
    success: BlockId,
    fail: BlockId,
) -> LowerResult {
    for _ in 0..pat.implicit_derefs {
        lval = lval.deref();
    }

    match &pat.kind {
        PatKind::Any => {
            vis.builder.end_block(sp, Terminator::Goto(success));
            Ok(())
        }
        PatKind::Ref(sub) => test_pattern(vis, sp, sub, lval.deref(), success, fail),
        PatKind::Tuple(subs) => {
            let items: Vec<(Pattern, LValue)> = subs
                .iter()
                .enumerate()
                .map(|(i, s)| (s.clone(), lval.clone().field(i as u32)))
                .collect();
            test_seq(vis, sp, items, success, fail)
        }
        PatKind::PathValue { path } | PatKind::PathTuple { path, .. } | PatKind::PathNamed { path, .. } => {
            match vis.enum_variant_target(path) {
                Some((enum_path, idx)) => {
                    let variant_count = match vis.builder.resolver().lookup(&enum_path.path) {
                        Some(Item::Enum(en)) => en.variants.len(),
                        other => bug!(sp, "{:?} is not an enum ({:?})", enum_path.path, other),
                    };
                    let sub_items = variant_sub_items(vis, sp, pat, &lval, &enum_path, idx);

                    let inner = if sub_items.is_empty() {
                        success
                    } else {
                        vis.builder.new_bb_unlinked()
                    };
                    let targets = (0..variant_count)
                        .map(|v| if v == idx as usize { inner } else { fail })
                        .collect();
                    vis.builder.end_block(
                        sp,
                        Terminator::Switch {
                            val: lval,
                            targets,
                        },
                    );
                    if !sub_items.is_empty() {
                        vis.builder.set_cur_block(inner);
                        test_seq(vis, sp, sub_items, success, fail)?;
                    }
                    Ok(())
                }
                None => {
                    // Plain struct: fields only
                    let sub_items = struct_sub_items(vis, sp, pat, &lval);
                    test_seq(vis, sp, sub_items, success, fail)
                }
            }
        }
        PatKind::Value(c) => {
            let ty = vis.builder.lvalue_type(sp, &lval);
            match c {
                PatConst::Bool(b) => {
                    let (bb_true, bb_false) = if *b { (success, fail) } else { (fail, success) };
                    vis.builder.end_block(
                        sp,
                        Terminator::If {
                            cond: lval,
                            bb_true,
                            bb_false,
                        },
                    );
                    Ok(())
                }
                _ => {
                    let constant = pat_const_to_constant(sp, c, &ty);
                    vis.builder.end_block(
                        sp,
                        Terminator::SwitchValue {
                            val: lval,
                            values: vec![constant],
                            targets: vec![success],
                            default: fail,
                        },
                    );
                    Ok(())
                }
            }
        }
        PatKind::Range { lo, hi } => {
            let ty = vis.builder.lvalue_type(sp, &lval);
            let lo_c = pat_const_to_constant(sp, lo, &ty);
            let hi_c = pat_const_to_constant(sp, hi, &ty);

            let cmp_lo = vis.builder.new_temporary(sp, ty_bool());
            vis.builder.push_stmt_assign(
                sp,
                cmp_lo.clone(),
                RValue::BinOp {
                    lhs: Param::LValue(lval.clone()),
                    op: BinOp::Ge,
                    rhs: Param::Constant(lo_c),
                },
            );
            let upper_bb = vis.builder.new_bb_unlinked();
            vis.builder.end_block(
                sp,
                Terminator::If {
                    cond: cmp_lo,
                    bb_true: upper_bb,
                    bb_false: fail,
                },
            );
            vis.builder.set_cur_block(upper_bb);
            let cmp_hi = vis.builder.new_temporary(sp, ty_bool());
            vis.builder.push_stmt_assign(
                sp,
                cmp_hi.clone(),
                RValue::BinOp {
                    lhs: Param::LValue(lval),
                    op: BinOp::Le,
                    rhs: Param::Constant(hi_c),
                },
            );
            vis.builder.end_block(
                sp,
                Terminator::If {
                    cond: cmp_hi,
                    bb_true: success,
                    bb_false: fail,
                },
            );
            Ok(())
        }
        PatKind::Slice(subs) => {
            let is_array = vis
                .builder
                .with_val_type(sp, &lval, |ty| matches!(ty, Type::Array(..)));
            let items: Vec<(Pattern, LValue)> = subs
                .iter()
                .enumerate()
                .map(|(i, s)| (s.clone(), lval.clone().field(i as u32)))
                .collect();
            if is_array {
                // Length is static and was checked by the type checker
                test_seq(vis, sp, items, success, fail)
            } else {
                let len = emit_slice_len(vis, sp, &lval);
                let cmp = vis.builder.new_temporary(sp, ty_bool());
                vis.builder.push_stmt_assign(
                    sp,
                    cmp.clone(),
                    RValue::BinOp {
                        lhs: Param::LValue(len),
                        op: BinOp::Eq,
                        rhs: Param::Constant(Constant::Uint {
                            value: subs.len() as u128,
                            ty: CoreType::Usize,
                        }),
                    },
                );
                let elems_bb = vis.builder.new_bb_unlinked();
                vis.builder.end_block(
                    sp,
                    Terminator::If {
                        cond: cmp,
                        bb_true: elems_bb,
                        bb_false: fail,
                    },
                );
                vis.builder.set_cur_block(elems_bb);
                test_seq(vis, sp, items, success, fail)
            }
        }
        PatKind::SplitSlice {
            leading,
            extra: _,
            trailing,
        } => {
            let is_array = vis
                .builder
                .with_val_type(sp, &lval, |ty| {
                    matches!(ty, Type::Array(_, ArraySize::Known(_)))
                });
            if is_array {
                let mut items: Vec<(Pattern, LValue)> = Vec::new();
                let size = vis.builder.with_val_type(sp, &lval, |ty| match ty {
                    Type::Array(_, ArraySize::Known(n)) => *n,
                    _ => unreachable!(),
                });
                for (i, s) in leading.iter().enumerate() {
                    items.push((s.clone(), lval.clone().field(i as u32)));
                }
                for (i, s) in trailing.iter().enumerate() {
                    let idx = size as u32 - trailing.len() as u32 + i as u32;
                    items.push((s.clone(), lval.clone().field(idx)));
                }
                return test_seq(vis, sp, items, success, fail);
            }

            let len = emit_slice_len(vis, sp, &lval);
            let min_len = (leading.len() + trailing.len()) as u128;
            let cmp = vis.builder.new_temporary(sp, ty_bool());
            vis.builder.push_stmt_assign(
                sp,
                cmp.clone(),
                RValue::BinOp {
                    lhs: Param::LValue(len.clone()),
                    op: BinOp::Ge,
                    rhs: Param::Constant(Constant::Uint {
                        value: min_len,
                        ty: CoreType::Usize,
                    }),
                },
            );
            let elems_bb = vis.builder.new_bb_unlinked();
            vis.builder.end_block(
                sp,
                Terminator::If {
                    cond: cmp,
                    bb_true: elems_bb,
                    bb_false: fail,
                },
            );
            vis.builder.set_cur_block(elems_bb);

            let mut items: Vec<(Pattern, LValue)> = Vec::new();
            for (i, s) in leading.iter().enumerate() {
                items.push((s.clone(), lval.clone().field(i as u32)));
            }
            for (i, s) in trailing.iter().enumerate() {
                let ofs = vis.builder.lvalue_or_temp(
                    sp,
                    &ty_usize(),
                    RValue::BinOp {
                        lhs: Param::LValue(len.clone()),
                        op: BinOp::Sub,
                        rhs: Param::Constant(Constant::Uint {
                            value: (trailing.len() - i) as u128,
                            ty: CoreType::Usize,
                        }),
                    },
                );
                let local = ofs.as_local().unwrap();
                items.push((s.clone(), lval.clone().index(local)));
            }
            test_seq(vis, sp, items, success, fail)
        }
    }
}

/// Test a list of (pattern, place) pairs in order, short-circuiting to
/// `fail`.
fn test_seq<R: Resolve>(
    vis: &mut ExprVisitor<'_, R>,
    sp: Span,
    items: Vec<(Pattern, LValue)>,
    success: BlockId,
    fail: BlockId,
) -> LowerResult {
    // Skip subtests that cannot fail; everything matching is a plain Goto
    let real: Vec<(Pattern, LValue)> = items
        .into_iter()
        .filter(|(p, _)| !binds_without_tests(p))
        .collect();
    if real.is_empty() {
        vis.builder.end_block(sp, Terminator::Goto(success));
        return Ok(());
    }
    let count = real.len();
    for (i, (pat, lv)) in real.into_iter().enumerate() {
        let is_last = i == count - 1;
        let cont = if is_last {
            success
        } else {
            vis.builder.new_bb_unlinked()
        };
        test_pattern(vis, sp, &pat, lv, cont, fail)?;
        if !is_last {
            vis.builder.set_cur_block(cont);
        }
    }
    Ok(())
}

fn emit_slice_len<R: Resolve>(
    vis: &mut ExprVisitor<'_, R>,
    sp: Span,
    lval: &LValue,
) -> LValue {
    let ptr = vis.builder.get_ptr_to_dst(sp, lval);
    vis.builder
        .lvalue_or_temp(sp, &ty_usize(), RValue::DstMeta { val: ptr })
}

/// Sub-tests for an enum variant pattern: each subpattern against its
/// downcast field projection.
fn variant_sub_items<R: Resolve>(
    vis: &ExprVisitor<'_, R>,
    sp: Span,
    pat: &Pattern,
    lval: &LValue,
    enum_path: &opalc_hir::types::GenericPath,
    idx: u32,
) -> Vec<(Pattern, LValue)> {
    let base = lval.clone().downcast(idx);
    match &pat.kind {
        PatKind::PathValue { .. } => Vec::new(),
        PatKind::PathTuple { pats, .. } => pats
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), base.clone().field(i as u32)))
            .collect(),
        PatKind::PathNamed { fields, .. } => {
            let decl: Vec<Symbol> = match vis.builder.resolver().lookup(&enum_path.path) {
                Some(Item::Enum(en)) => match &en.variants[idx as usize].data {
                    opalc_hir::resolver::VariantData::Struct(fs) => {
                        fs.iter().map(|(n, _)| *n).collect()
                    }
                    _ => bug!(sp, "named pattern on non-struct variant"),
                },
                _ => unreachable!(),
            };
            fields
                .iter()
                .map(|(name, s)| {
                    let fi = decl
                        .iter()
                        .position(|n| n == name)
                        .unwrap_or_else(|| bug!(sp, "unknown field {} in variant pattern", name));
                    (s.clone(), base.clone().field(fi as u32))
                })
                .collect()
        }
        _ => unreachable!(),
    }
}

/// Sub-tests for a plain struct pattern.
fn struct_sub_items<R: Resolve>(
    vis: &ExprVisitor<'_, R>,
    sp: Span,
    pat: &Pattern,
    lval: &LValue,
) -> Vec<(Pattern, LValue)> {
    match &pat.kind {
        PatKind::PathValue { .. } => Vec::new(),
        PatKind::PathTuple { pats, .. } => pats
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), lval.clone().field(i as u32)))
            .collect(),
        PatKind::PathNamed { path, fields } => {
            let decl: Vec<Symbol> = match vis.builder.resolver().lookup(&path.path) {
                Some(Item::Struct(s)) => match &s.fields {
                    opalc_hir::resolver::StructFields::Named(fs) => {
                        fs.iter().map(|(n, _)| *n).collect()
                    }
                    _ => bug!(sp, "named pattern on tuple/unit struct"),
                },
                other => bug!(sp, "struct pattern on {:?}", other),
            };
            fields
                .iter()
                .map(|(name, s)| {
                    let fi = decl
                        .iter()
                        .position(|n| n == name)
                        .unwrap_or_else(|| bug!(sp, "unknown field {} in struct pattern", name));
                    (s.clone(), lval.clone().field(fi as u32))
                })
                .collect()
        }
        _ => unreachable!(),
    }
}

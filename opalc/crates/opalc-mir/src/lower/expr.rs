//! Expression lowering visitor.
//!
//! Depth-first walk over the HIR expression tree, driving the builder and
//! the scope manager. Each construct's routine upholds the result handoff
//! protocol: on return it either left a result with the current block
//! active, or sealed the block with a diverging terminator and left none.

use crate::builder::{assert_bug, bug, MirBuilder};
use crate::lower::generator::GenLowerState;
use crate::lower::{matches, LowerConfig, LowerError, LowerErrorKind, LowerResult, TargetVersion};
use crate::mir::{
    self, AsmStatement, BlockId, CallTarget, Constant, LValue, Param, RValue, Terminator,
};
use crate::scope::ScopeId;
use opalc_hir::hir::{
    self, AssignOp, BindMode, EmplaceKind, Expr, ExprKind, Literal, ValueUsage,
};
use opalc_hir::resolver::{Item, LangItem, Resolve, StructFields};
use opalc_hir::types::{
    Abi, ArraySize, BorrowKind, CoreType, GenericPath, Path, SimplePath, Type,
};
use opalc_util::{Span, Symbol};

/// An enclosing loop, as seen by `break`/`continue`.
#[derive(Clone)]
pub(crate) struct LoopDesc {
    pub scope: ScopeId,
    pub label: Option<Symbol>,
    /// Continue target (loop head)
    pub cur: BlockId,
    /// Break target (loop exit)
    pub next: BlockId,
    pub res_value: LValue,
}

pub(crate) struct ExprVisitor<'a, R: Resolve> {
    pub(crate) builder: MirBuilder<'a, R>,
    pub(crate) cfg: &'a LowerConfig,
    pub(crate) loop_stack: Vec<LoopDesc>,
    pub(crate) block_tmp_scope: Option<ScopeId>,
    pub(crate) stmt_scope: Option<ScopeId>,
    pub(crate) borrow_raise_target: Option<ScopeId>,
    pub(crate) in_borrow: bool,
    pub(crate) gen: Option<GenLowerState>,
}

fn ty_bool() -> Type {
    Type::Primitive(CoreType::Bool)
}

fn ty_usize() -> Type {
    Type::Primitive(CoreType::Usize)
}

pub(crate) fn err<T>(sp: Span, kind: LowerErrorKind) -> LowerResult<T> {
    Err(LowerError::new(sp, kind))
}

impl<'a, R: Resolve> ExprVisitor<'a, R> {
    pub(crate) fn new(
        mut builder: MirBuilder<'a, R>,
        cfg: &'a LowerConfig,
        gen_decl: Option<&hir::GeneratorDecl>,
    ) -> Self {
        let gen = gen_decl.map(|decl| {
            // Dispatch block stays open until the post-pass wires the state
            // switch; lowering proceeds into state 0's entry.
            let bb_open = builder.pause_cur_block();
            let entry = builder.new_bb_unlinked();
            builder.set_cur_block(entry);
            GenLowerState::new(bb_open, entry, decl.state_enum.clone())
        });
        Self {
            builder,
            cfg,
            loop_stack: Vec::new(),
            block_tmp_scope: None,
            stmt_scope: None,
            borrow_raise_target: None,
            in_borrow: false,
            gen: None,
        }
        .with_gen(gen)
    }

    fn with_gen(mut self, gen: Option<GenLowerState>) -> Self {
        self.gen = gen;
        self
    }

    pub(crate) fn finish(self) -> mir::Function {
        self.builder.finish()
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    pub(crate) fn visit(&mut self, e: &Expr) -> LowerResult {
        log::trace!("visit {:?}", std::mem::discriminant(&e.kind));
        match &e.kind {
            ExprKind::Block { stmts, tail } => self.visit_block(e, stmts, tail.as_deref()),
            ExprKind::Asm { .. } => self.visit_asm(e),
            ExprKind::Return(value) => self.visit_return(e, value),
            ExprKind::Yield(value) => self.visit_yield(e, value),
            ExprKind::Let { pattern, ty, value } => {
                self.visit_let(e, pattern, ty, value.as_deref())
            }
            ExprKind::Loop {
                body,
                label,
                diverges,
            } => self.visit_loop(e, body, *label, *diverges),
            ExprKind::Break { label, value } => self.visit_break(e, *label, value.as_deref()),
            ExprKind::Continue { label } => self.visit_continue(e, *label),
            ExprKind::Match { value, arms } => matches::visit_match(self, e, value, arms),
            ExprKind::If {
                cond,
                then_arm,
                else_arm,
            } => self.visit_if(e, cond, then_arm, else_arm.as_deref()),
            ExprKind::Assign { op, slot, value } => self.visit_assign(e, *op, slot, value),
            ExprKind::BinOp { op, left, right } => self.visit_binop(e, *op, left, right),
            ExprKind::UniOp { op, value } => self.visit_uniop(e, *op, value),
            ExprKind::Borrow { kind, value } => self.visit_borrow(e, *kind, value),
            ExprKind::Cast { value } => self.visit_cast(e, value),
            ExprKind::Unsize { value } => self.visit_unsize(e, value),
            ExprKind::Index { value, index } => self.visit_index(e, value, index),
            ExprKind::Deref { value } => self.visit_deref(e, value),
            ExprKind::Emplace { kind, place, value } => {
                self.visit_emplace(e, *kind, place.as_deref(), value)
            }
            ExprKind::TupleVariant {
                path,
                is_struct,
                args,
            } => self.visit_tuple_variant(e, path, *is_struct, args),
            ExprKind::CallPath { path, args } => self.visit_call_path(e, path, args),
            ExprKind::CallValue { value, args } => self.visit_call_value(e, value, args),
            ExprKind::Field { value, field } => self.visit_field(e, value, *field),
            ExprKind::Literal(lit) => self.visit_literal(e, lit),
            ExprKind::UnitVariant { path, is_struct } => {
                self.visit_unit_variant(e, path, *is_struct)
            }
            ExprKind::PathValue { path } => self.visit_path_value(e, path),
            ExprKind::Variable { slot, .. } => self.visit_variable(e, *slot),
            ExprKind::ConstParam { name, binding } => {
                self.builder
                    .set_result(e.span, Constant::Generic {
                        name: *name,
                        index: *binding,
                    });
                Ok(())
            }
            ExprKind::StructLiteral { path, base, fields } => {
                self.visit_struct_literal(e, path, base.as_deref(), fields)
            }
            ExprKind::Tuple { vals } => self.visit_tuple(e, vals),
            ExprKind::ArrayList { vals } => self.visit_array_list(e, vals),
            ExprKind::ArraySized { val, count } => self.visit_array_sized(e, val, *count),
            ExprKind::Closure { obj_path, captures } => self.visit_closure(e, obj_path, captures),
            ExprKind::Generator {
                obj_path,
                captures,
                state_data_ty,
                ..
            } => self.visit_generator_literal(e, obj_path, captures, state_data_ty),
        }
    }

    // ------------------------------------------------------------------
    // Blocks, statements, let
    // ------------------------------------------------------------------

    fn visit_block(&mut self, e: &Expr, stmts: &[Expr], tail: Option<&Expr>) -> LowerResult {
        let sp = e.span;
        // Result slot allocated before the block scopes open, so it survives
        // them. Only used when scope drops would clobber a raw result.
        let res_slot = tail.map(|_| self.builder.new_temporary(sp, e.ty.clone()));

        let var_scope = self.builder.new_scope_var(sp);
        let tmp_scope = self.builder.new_scope_temp(sp);
        let saved_block_tmp = self.block_tmp_scope.replace(tmp_scope);
        let mut diverged = false;

        let mut run = || -> LowerResult {
            for stmt in stmts {
                let ssp = stmt.span;
                let saved_brt = self.borrow_raise_target.take();
                let stmt_scope = self.builder.new_scope_temp(ssp);
                let saved_stmt = self.stmt_scope.replace(stmt_scope);
                let r = self.visit(stmt);
                self.stmt_scope = saved_stmt;
                self.borrow_raise_target = saved_brt;
                r?;

                if self.builder.block_active() {
                    if self.builder.has_result() {
                        let _ = self.builder.get_result(ssp);
                    }
                    self.builder.terminate_scope(ssp, stmt_scope, true);
                    diverged |= stmt.ty.is_diverge();
                } else {
                    self.builder.terminate_scope(ssp, stmt_scope, false);
                    let bb = self.builder.new_bb_unlinked();
                    self.builder.set_cur_block(bb);
                    diverged = true;
                }
            }

            if let Some(tail) = tail {
                let ssp = tail.span;
                let stmt_scope = self.builder.new_scope_temp(ssp);
                self.visit(tail)?;

                if self.builder.block_active() {
                    assert_bug!(ssp, self.builder.has_result(), "active block but no result");
                    let mut res = self.builder.get_result(ssp);

                    // If closing this block emits drops, park the value out
                    // of their way first.
                    if self
                        .builder
                        .scope_has_pending_drops(&[stmt_scope, tmp_scope, var_scope])
                    {
                        let slot = res_slot.clone().unwrap();
                        self.builder.push_stmt_assign(ssp, slot.clone(), res);
                        res = RValue::Use(slot);
                    }

                    // When the block is a statement of a larger expression,
                    // its tail temporaries must live as long as the statement
                    if let Some(outer) = self.stmt_scope {
                        self.builder.raise_all(ssp, stmt_scope, outer);
                    } else {
                        self.builder.terminate_scope(ssp, stmt_scope, true);
                    }
                    self.builder.terminate_scope(sp, tmp_scope, true);
                    self.builder.terminate_scope(sp, var_scope, true);
                    self.builder.set_result(sp, res);
                } else {
                    self.builder.terminate_scope(ssp, stmt_scope, false);
                    self.builder.terminate_scope(sp, tmp_scope, false);
                    self.builder.terminate_scope(sp, var_scope, false);
                }
            } else if diverged {
                self.builder.terminate_scope(sp, tmp_scope, false);
                self.builder.terminate_scope(sp, var_scope, false);
                self.builder.end_block(sp, Terminator::Diverge);
            } else {
                self.builder.terminate_scope(sp, tmp_scope, true);
                self.builder.terminate_scope(sp, var_scope, true);
                self.builder.set_result(sp, RValue::unit());
            }
            Ok(())
        };
        let result = run();
        self.block_tmp_scope = saved_block_tmp;
        result
    }

    fn visit_let(
        &mut self,
        e: &Expr,
        pattern: &hir::Pattern,
        ty: &Type,
        value: Option<&Expr>,
    ) -> LowerResult {
        let sp = e.span;
        self.define_vars_from(sp, pattern);
        if let Some(value) = value {
            let saved = std::mem::replace(&mut self.borrow_raise_target, self.block_tmp_scope);
            let r = self.visit(value);
            self.borrow_raise_target = saved;
            r?;

            if !self.builder.block_active() {
                return Ok(());
            }
            let res = self.builder.get_result(sp);

            if pattern.is_simple_move_binding() {
                let slot = pattern.binding.as_ref().unwrap().slot;
                let var = self.builder.get_variable(sp, slot);
                self.builder.push_stmt_assign(sp, var, res);
            } else {
                let lv = self.builder.lvalue_or_temp(value.span, ty, res);
                self.destructure_from(sp, pattern, lv, false)?;
            }
        }
        self.builder.set_result(sp, RValue::unit());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Loops and loop control
    // ------------------------------------------------------------------

    fn visit_loop(
        &mut self,
        e: &Expr,
        body: &Expr,
        label: Option<Symbol>,
        diverges: bool,
    ) -> LowerResult {
        let sp = e.span;
        let loop_block = self.builder.new_bb_linked(sp);
        let loop_scope = self.builder.new_scope_loop(sp);
        let loop_next = self.builder.new_bb_unlinked();
        let res_slot = self.builder.new_temporary(sp, e.ty.clone());

        let loop_tmp_scope = self.builder.new_scope_temp(sp);
        let saved_stmt = self.stmt_scope.replace(loop_tmp_scope);

        self.loop_stack.push(LoopDesc {
            scope: loop_scope,
            label,
            cur: loop_block,
            next: loop_next,
            res_value: res_slot.clone(),
        });
        let r = self.visit(body);
        self.loop_stack.pop();
        self.stmt_scope = saved_stmt;
        r?;

        // Stray body result is `()`; discard it
        if self.builder.has_result() {
            assert_bug!(sp, self.builder.block_active(), "result without a block");
            let _ = self.builder.get_result(sp);
        }

        if self.builder.block_active() {
            self.builder.terminate_scope(sp, loop_tmp_scope, true);
            self.builder.terminate_scope(sp, loop_scope, true);
            self.builder.end_block(sp, Terminator::Goto(loop_block));
        } else {
            // Cleanup on exit paths was handled by `break`
            self.builder.terminate_scope(sp, loop_tmp_scope, false);
            self.builder.terminate_scope(sp, loop_scope, false);
        }

        if !diverges {
            self.builder.set_cur_block(loop_next);
            self.builder.set_result(sp, res_slot);
        } else {
            assert_bug!(sp, !self.builder.has_result(), "diverging loop with a result");
            self.builder.set_cur_block(loop_next);
            self.builder.end_block(sp, Terminator::Diverge);
        }
        Ok(())
    }

    fn find_loop(&self, sp: Span, label: Option<Symbol>) -> LowerResult<LoopDesc> {
        match label {
            Some(l) => match self.loop_stack.iter().rev().find(|d| d.label == Some(l)) {
                Some(d) => Ok(d.clone()),
                None => err(sp, LowerErrorKind::UnknownLoopLabel(l)),
            },
            None => match self.loop_stack.last() {
                Some(d) => Ok(d.clone()),
                None => err(sp, LowerErrorKind::BreakOutsideLoop),
            },
        }
    }

    fn visit_break(
        &mut self,
        e: &Expr,
        label: Option<Symbol>,
        value: Option<&Expr>,
    ) -> LowerResult {
        let sp = e.span;
        if self.loop_stack.is_empty() {
            return err(sp, LowerErrorKind::BreakOutsideLoop);
        }
        // Evaluate the value before the loop lookup; the stack may shift
        // during the inner visit
        if let Some(value) = value {
            self.visit(value)?;
            if !self.builder.block_active() {
                return Ok(());
            }
        }
        let target = self.find_loop(sp, label)?;

        if value.is_some() {
            let res = self.builder.get_result(sp);
            self.builder.push_stmt_assign(sp, target.res_value.clone(), res);
        } else {
            self.builder
                .push_stmt_assign(sp, target.res_value.clone(), RValue::unit());
        }
        self.builder.terminate_scope_early(sp, target.scope);
        self.builder.end_block(sp, Terminator::Goto(target.next));
        Ok(())
    }

    fn visit_continue(&mut self, e: &Expr, label: Option<Symbol>) -> LowerResult {
        let sp = e.span;
        if self.loop_stack.is_empty() {
            return err(sp, LowerErrorKind::BreakOutsideLoop);
        }
        let target = self.find_loop(sp, label)?;
        self.builder.terminate_scope_early(sp, target.scope);
        self.builder.end_block(sp, Terminator::Goto(target.cur));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Return and yield
    // ------------------------------------------------------------------

    /// The enum path behind the function return type, for generator wrapping.
    fn return_state_enum(&self, sp: Span, variant: &str, expect_idx: u32) -> GenericPath {
        let ret_ty = self.builder.lvalue_type(sp, &LValue::new_return());
        let gp = match ret_ty {
            Type::Path(gp) => gp,
            other => bug!(sp, "generator return type is not an enum path: {:?}", other),
        };
        let idx = self
            .builder
            .enum_variant_index(sp, &gp, Symbol::intern(variant));
        assert_bug!(sp, idx == expect_idx, "{} is not variant {}", variant, expect_idx);
        gp
    }

    fn visit_return(&mut self, e: &Expr, value: &Expr) -> LowerResult {
        let sp = e.span;
        self.visit(value)?;
        if !self.builder.block_active() {
            return Ok(());
        }

        if self.gen.is_some() {
            let gp = self.return_state_enum(sp, "Complete", 1);
            let val = self.builder.get_result_in_param(sp, &value.ty);
            self.builder.push_stmt_assign(
                sp,
                LValue::new_return(),
                RValue::EnumVariant {
                    path: gp,
                    index: 1,
                    vals: vec![val],
                },
            );
        } else {
            let res = self.builder.get_result(sp);
            self.builder.push_stmt_assign(sp, LValue::new_return(), res);
        }
        let fcn_scope = self.builder.fcn_scope();
        self.builder.terminate_scope_early(sp, fcn_scope);
        self.builder.end_block(sp, Terminator::Return);
        Ok(())
    }

    fn visit_yield(&mut self, e: &Expr, value: &Expr) -> LowerResult {
        let sp = e.span;
        assert_bug!(sp, self.gen.is_some(), "yield outside of a generator");

        let gp = self.return_state_enum(sp, "Yielded", 0);
        self.visit(value)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        let val = self.builder.get_result_in_param(sp, &value.ty);
        self.builder.push_stmt_assign(
            sp,
            LValue::new_return(),
            RValue::EnumVariant {
                path: gp,
                index: 0,
                vals: vec![val],
            },
        );

        // Advance the state discriminant to the state about to be created,
        // then suspend. Scopes are deliberately left alive across the yield.
        let gen = self.gen.as_ref().unwrap();
        let state_enum = GenericPath::plain(gen.state_enum.clone());
        let next_state = gen.states.len() as u32;
        let state_lv = GenLowerState::state_discriminant_lv();
        self.builder.push_stmt_assign(
            sp,
            state_lv,
            RValue::EnumVariant {
                path: state_enum,
                index: next_state,
                vals: vec![],
            },
        );
        self.builder.end_block(sp, Terminator::Return);

        let saved = self.builder.get_active_locals();
        let entry = self.builder.new_bb_unlinked();
        let gen = self.gen.as_mut().unwrap();
        gen.states.last_mut().unwrap().saved = saved;
        gen.push_state(entry);
        self.builder.set_cur_block(entry);

        self.builder.set_result(sp, RValue::unit());
        Ok(())
    }

    // ------------------------------------------------------------------
    // If and short-circuit conditions
    // ------------------------------------------------------------------

    /// Emit the condition of an `if`, short-circuiting `&&`/`||` into nested
    /// `If` terminators and folding `!` into branch swaps.
    fn emit_if(&mut self, cond: &Expr, mut bb_true: BlockId, mut bb_false: BlockId) -> LowerResult {
        let mut cond_p = cond;
        let mut reverse = false;
        while let ExprKind::UniOp {
            op: hir::UniOp::Invert,
            value,
        } = &cond_p.kind
        {
            cond_p = value;
            reverse = !reverse;
        }
        if reverse {
            std::mem::swap(&mut bb_true, &mut bb_false);
        }

        match &cond_p.kind {
            ExprKind::BinOp {
                op: hir::BinOp::BoolAnd,
                left,
                right,
            } => {
                // If left is false, skip right entirely
                let inner_true = self.builder.new_bb_unlinked();
                self.emit_if(left, inner_true, bb_false)?;
                self.builder.set_cur_block(inner_true);
                self.emit_if(right, bb_true, bb_false)
            }
            ExprKind::BinOp {
                op: hir::BinOp::BoolOr,
                left,
                right,
            } => {
                let inner_false = self.builder.new_bb_unlinked();
                self.emit_if(left, bb_true, inner_false)?;
                self.builder.set_cur_block(inner_false);
                self.emit_if(right, bb_true, bb_false)
            }
            ExprKind::Literal(Literal::Boolean(b)) => {
                let target = if *b { bb_true } else { bb_false };
                self.builder.end_block(cond_p.span, Terminator::Goto(target));
                Ok(())
            }
            _ => {
                let sp = cond_p.span;
                let scope = self.builder.new_scope_temp(sp);
                self.visit(cond_p)?;
                if !self.builder.block_active() {
                    // Condition diverged; both branch blocks are dead but the
                    // caller still lowers (and seals) them
                    self.builder.terminate_scope(sp, scope, false);
                    return Ok(());
                }
                assert_bug!(
                    sp,
                    cond_p.ty == ty_bool(),
                    "if condition is not bool: {:?}",
                    cond_p.ty
                );
                let decision = self.builder.get_result_in_lvalue(sp, &ty_bool());
                self.builder.terminate_scope(sp, scope, true);
                self.builder.end_block(
                    sp,
                    Terminator::If {
                        cond: decision,
                        bb_true,
                        bb_false,
                    },
                );
                Ok(())
            }
        }
    }

    fn visit_if(
        &mut self,
        e: &Expr,
        cond: &Expr,
        then_arm: &Expr,
        else_arm: Option<&Expr>,
    ) -> LowerResult {
        let sp = e.span;
        let bb_true = self.builder.new_bb_unlinked();
        let bb_false = self.builder.new_bb_unlinked();
        self.emit_if(cond, bb_true, bb_false)?;

        let next_block = self.builder.new_bb_unlinked();
        let result_val = self.builder.new_temporary(sp, e.ty.clone());

        // Handles one arm moving a value the other doesn't
        let scope = self.builder.new_scope_split(then_arm.span);

        // true arm
        {
            let asp = then_arm.span;
            let stmt_scope = self.builder.new_scope_temp(asp);
            self.builder.set_cur_block(bb_true);
            self.visit(then_arm)?;
            if self.builder.block_active() {
                let res = self.builder.get_result(asp);
                self.builder.push_stmt_assign(sp, result_val.clone(), res);
                self.builder.terminate_scope(sp, stmt_scope, true);
                self.builder.end_split_arm(sp, scope, true);
                self.builder.end_block(sp, Terminator::Goto(next_block));
            } else {
                self.builder.terminate_scope(sp, stmt_scope, false);
                self.builder.end_split_arm(sp, scope, false);
            }
        }

        // false arm
        self.builder.set_cur_block(bb_false);
        if let Some(else_arm) = else_arm {
            let asp = else_arm.span;
            let stmt_scope = self.builder.new_scope_temp(asp);
            self.visit(else_arm)?;
            if self.builder.block_active() {
                let res = self.builder.get_result(asp);
                self.builder.push_stmt_assign(sp, result_val.clone(), res);
                self.builder.terminate_scope(sp, stmt_scope, true);
                self.builder.end_split_arm(sp, scope, true);
                self.builder.end_block(sp, Terminator::Goto(next_block));
            } else {
                self.builder.terminate_scope(sp, stmt_scope, false);
                self.builder.end_split_arm(sp, scope, false);
            }
        } else {
            self.builder
                .push_stmt_assign(sp, result_val.clone(), RValue::unit());
            self.builder.end_split_arm(sp, scope, true);
            self.builder.end_block(sp, Terminator::Goto(next_block));
        }

        self.builder.set_cur_block(next_block);
        self.builder.terminate_scope(sp, scope, true);
        self.builder.set_result(sp, result_val);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    /// Operand-kind legality for a MIR binary op, per the documented allowed
    /// sets. Violations are type-checker bugs, not user errors.
    fn check_binop_types(&self, sp: Span, op: mir::BinOp, ty_l: &Type, ty_r: &Type) {
        use mir::BinOp::*;
        match op {
            Eq | Ne | Lt | Le | Gt | Ge => {
                assert_bug!(
                    sp,
                    ty_l == ty_r,
                    "comparison operand types differ: {:?} != {:?}",
                    ty_l,
                    ty_r
                );
                match ty_l {
                    Type::Pointer(..) => {}
                    Type::Primitive(p) if *p != CoreType::Str => {}
                    other => bug!(sp, "invalid type in comparison: {:?}", other),
                }
            }
            BitAnd | BitOr | BitXor => {
                assert_bug!(
                    sp,
                    ty_l == ty_r,
                    "bitwise operand types differ: {:?} != {:?}",
                    ty_l,
                    ty_r
                );
                match ty_l.as_primitive() {
                    Some(p) if p.is_integer() || p == CoreType::Bool => {}
                    other => bug!(sp, "invalid type for bitwise operator: {:?}", other),
                }
            }
            Add | Sub | Mul | Div | Rem => {
                assert_bug!(
                    sp,
                    ty_l == ty_r,
                    "arithmetic operand types differ: {:?} != {:?}",
                    ty_l,
                    ty_r
                );
                match ty_l.as_primitive() {
                    Some(p) if p.is_integer() || p.is_float() => {}
                    other => bug!(sp, "invalid type for arithmetic operator: {:?}", other),
                }
            }
            Shl | Shr => {
                // Shift width may be a different integer type
                for ty in [ty_l, ty_r] {
                    match ty.as_primitive() {
                        Some(p) if p.is_integer() => {}
                        other => bug!(sp, "invalid type for shift operator: {:?}", other),
                    }
                }
            }
        }
    }

    fn visit_binop(
        &mut self,
        e: &Expr,
        op: hir::BinOp,
        left: &Expr,
        right: &Expr,
    ) -> LowerResult {
        let sp = e.span;
        let ty_l = &left.ty;
        let ty_r = &right.ty;

        // Short-circuiting booleans become control flow, never a BinOp
        if matches!(op, hir::BinOp::BoolAnd | hir::BinOp::BoolOr) {
            let res = self.builder.new_temporary(sp, e.ty.clone());
            self.visit(left)?;
            if !self.builder.block_active() {
                return Ok(());
            }
            let left_lv = self.builder.get_result_in_lvalue(left.span, ty_l);

            let bb_next = self.builder.new_bb_unlinked();
            let bb_true = self.builder.new_bb_unlinked();
            let bb_false = self.builder.new_bb_unlinked();
            self.builder.end_block(
                sp,
                Terminator::If {
                    cond: left_lv,
                    bb_true,
                    bb_false,
                },
            );

            let split_scope = self.builder.new_scope_split(sp);

            if op == hir::BinOp::BoolOr {
                // Left true: result is true, skip right
                self.builder.set_cur_block(bb_true);
                self.builder
                    .push_stmt_assign(sp, res.clone(), Constant::Bool(true).into());
                self.builder.end_split_arm(left.span, split_scope, true);
                self.builder.end_block(sp, Terminator::Goto(bb_next));
                self.builder.set_cur_block(bb_false);
            } else {
                // Left false: result is false, skip right
                self.builder.set_cur_block(bb_false);
                self.builder
                    .push_stmt_assign(sp, res.clone(), Constant::Bool(false).into());
                self.builder.end_split_arm(left.span, split_scope, true);
                self.builder.end_block(sp, Terminator::Goto(bb_next));
                self.builder.set_cur_block(bb_true);
            }

            let tmp_scope = self.builder.new_scope_temp(right.span);
            self.visit(right)?;
            if self.builder.block_active() {
                let rres = self.builder.get_result(right.span);
                self.builder.push_stmt_assign(sp, res.clone(), rres);
                self.builder.terminate_scope(right.span, tmp_scope, true);
                self.builder.end_split_arm(right.span, split_scope, true);
                self.builder.end_block(sp, Terminator::Goto(bb_next));
            } else {
                self.builder.terminate_scope(right.span, tmp_scope, false);
                self.builder.end_split_arm(right.span, split_scope, false);
            }

            self.builder.set_cur_block(bb_next);
            self.builder.terminate_scope(sp, split_scope, true);
            self.builder.set_result(sp, res);
            return Ok(());
        }

        self.visit(left)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        let lhs = self.builder.get_result_in_param(left.span, ty_l);
        self.visit(right)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        let rhs = self.builder.get_result_in_param(right.span, ty_r);

        let mir_op = lower_binop(sp, op);
        self.check_binop_types(sp, mir_op, ty_l, ty_r);
        self.builder.set_result(
            sp,
            RValue::BinOp {
                lhs,
                op: mir_op,
                rhs,
            },
        );
        Ok(())
    }

    fn visit_uniop(&mut self, e: &Expr, op: hir::UniOp, value: &Expr) -> LowerResult {
        let sp = e.span;
        let ty_val = &value.ty;
        self.visit(value)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        let val = self.builder.get_result_in_lvalue(value.span, ty_val);

        let mir_op = match op {
            hir::UniOp::Invert => {
                match ty_val.as_primitive() {
                    Some(p) if p.is_integer() || p == CoreType::Bool => {}
                    _ => bug!(sp, "`!` operator on invalid type: {:?}", ty_val),
                }
                mir::UniOp::Inv
            }
            hir::UniOp::Negate => {
                match ty_val.as_primitive() {
                    Some(p) if p.is_signed_integer() || p.is_float() => {}
                    _ => bug!(sp, "`-` operator on invalid type: {:?}", ty_val),
                }
                mir::UniOp::Neg
            }
        };
        self.builder
            .set_result(sp, RValue::UniOp { val, op: mir_op });
        Ok(())
    }

    fn visit_assign(
        &mut self,
        e: &Expr,
        op: Option<AssignOp>,
        slot: &Expr,
        value: &Expr,
    ) -> LowerResult {
        let sp = e.span;

        self.visit(value)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        let val = self.builder.get_result(sp);

        self.visit(slot)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        let dst = self.builder.get_result_unwrap_lvalue(sp);

        let ty_slot = &slot.ty;
        let ty_val = &value.ty;

        if let Some(op) = op {
            // Compound assignment: only primitive operands reach MIR;
            // overloads were desugared to method calls earlier
            if !ty_slot.is_primitive() || !ty_val.is_primitive() {
                return err(
                    sp,
                    LowerErrorKind::InvalidOperands(format!(
                        "compound assignment on non-primitive types {:?} and {:?}",
                        ty_slot, ty_val
                    )),
                );
            }
            let val_p = match val {
                RValue::Use(lv) => Param::LValue(lv),
                RValue::Constant(c) => Param::Constant(c),
                other => Param::LValue(self.builder.lvalue_or_temp(sp, ty_val, other)),
            };
            let mir_op = lower_assign_op(op);
            self.check_binop_types(sp, mir_op, ty_slot, ty_val);
            self.builder.push_stmt_assign(
                sp,
                dst.clone(),
                RValue::BinOp {
                    lhs: Param::LValue(dst.clone()),
                    op: mir_op,
                    rhs: val_p,
                },
            );
        } else {
            assert_bug!(
                sp,
                ty_slot == ty_val,
                "assignment type mismatch: {:?} != {:?}",
                ty_slot,
                ty_val
            );
            self.builder.push_stmt_assign(sp, dst, val);
        }
        self.builder.set_result(sp, RValue::unit());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Borrows, casts, coercions
    // ------------------------------------------------------------------

    fn visit_borrow(&mut self, e: &Expr, kind: BorrowKind, value: &Expr) -> LowerResult {
        let sp = e.span;
        let saved = std::mem::replace(&mut self.in_borrow, true);
        let r = self.visit(value);
        self.in_borrow = saved;
        r?;
        if !self.builder.block_active() {
            return Ok(());
        }

        let val = self.builder.get_result_in_lvalue(value.span, &value.ty);
        if let Some(target) = self.borrow_raise_target {
            log::trace!("raising borrow of {:?} to {:?}", val, target);
            self.builder.raise_temporaries(sp, &val, target);
        }
        self.builder.set_result(sp, RValue::Borrow { kind, val });
        Ok(())
    }

    fn visit_cast(&mut self, e: &Expr, value: &Expr) -> LowerResult {
        let sp = e.span;
        self.visit(value)?;
        if !self.builder.block_active() {
            return Ok(());
        }

        let ty_out = &e.ty;
        let ty_in = &value.ty;
        if ty_out == ty_in {
            // Identity cast: forward the pending result untouched
            return Ok(());
        }

        let val = self.builder.get_result_in_lvalue(value.span, ty_in);
        let invalid = || {
            err::<()>(
                sp,
                LowerErrorKind::InvalidCast {
                    from: ty_in.clone(),
                    to: ty_out.clone(),
                },
            )
        };

        match ty_out {
            Type::Function(de) => {
                // Trust the earlier stages on fn pointer casts
                match ty_in {
                    Type::Function(se) => {
                        assert_bug!(
                            sp,
                            de.params == se.params,
                            "fn pointer cast changes argument types"
                        );
                    }
                    other => bug!(sp, "cast to fn pointer from {:?}", other),
                }
            }
            Type::Pointer(_, de_inner) => match ty_in {
                Type::Primitive(p) => match p {
                    CoreType::Bool | CoreType::Char | CoreType::Str | CoreType::F32
                    | CoreType::F64 => return invalid(),
                    _ => {}
                },
                Type::Borrow(_, se_inner) => {
                    if de_inner != se_inner {
                        return invalid();
                    }
                }
                Type::Function(_) => {
                    let ok = de_inner.is_unit()
                        || **de_inner == Type::Primitive(CoreType::U8)
                        || **de_inner == Type::Primitive(CoreType::I8);
                    if !ok {
                        return invalid();
                    }
                }
                Type::Pointer(..) => {}
                _ => return invalid(),
            },
            Type::Primitive(de) => match de {
                CoreType::Str | CoreType::Bool => return invalid(),
                CoreType::Char => {
                    if ty_in.as_primitive() != Some(CoreType::U8) {
                        return invalid();
                    }
                }
                CoreType::F32 | CoreType::F64 => match ty_in.as_primitive() {
                    Some(CoreType::Str) | Some(CoreType::Char) | Some(CoreType::Bool) | None => {
                        return invalid()
                    }
                    Some(_) => {}
                },
                // Integer targets
                _ => match ty_in {
                    Type::Primitive(CoreType::Str) => return invalid(),
                    Type::Primitive(_) => {}
                    Type::Path(gp) => {
                        // Integer-repr enums cast to integers
                        match self.builder.resolver().lookup(&gp.path) {
                            Some(Item::Enum(_)) => {}
                            _ => return invalid(),
                        }
                    }
                    Type::Pointer(..) => {}
                    Type::Function(_) if *de == CoreType::Usize => {}
                    _ => return invalid(),
                },
            },
            _ => return invalid(),
        }

        self.builder.set_result(
            sp,
            RValue::Cast {
                val,
                ty: ty_out.clone(),
            },
        );
        Ok(())
    }

    fn visit_unsize(&mut self, e: &Expr, value: &Expr) -> LowerResult {
        let sp = e.span;
        self.visit(value)?;
        if !self.builder.block_active() {
            return Ok(());
        }

        let ty_out = &e.ty;
        let ty_in = &value.ty;
        if ty_out == ty_in {
            return Ok(());
        }

        let ptr_lval = self.builder.get_result_in_lvalue(value.span, ty_in);

        if let (Type::Borrow(_, oe_inner), Type::Borrow(_, ie_inner)) = (ty_out, ty_in) {
            match &**oe_inner {
                Type::Slice(_) => match &**ie_inner {
                    Type::Array(_, size) => {
                        let size_val = match size {
                            ArraySize::Known(n) => Constant::Uint {
                                value: *n as u128,
                                ty: CoreType::Usize,
                            },
                            ArraySize::Generic { name, index } => Constant::Generic {
                                name: *name,
                                index: *index,
                            },
                        };
                        self.builder.set_result(
                            sp,
                            RValue::MakeDst {
                                ptr: Param::LValue(ptr_lval),
                                meta: Param::Constant(size_val),
                            },
                        );
                    }
                    Type::Generic { .. } | Type::Associated { .. } => {
                        // Size not statically known: read it off the existing
                        // fat pointer
                        let size_lval = self.builder.lvalue_or_temp(
                            sp,
                            &ty_usize(),
                            RValue::DstMeta {
                                val: ptr_lval.clone(),
                            },
                        );
                        self.builder.set_result(
                            sp,
                            RValue::MakeDst {
                                ptr: Param::LValue(ptr_lval),
                                meta: Param::LValue(size_lval),
                            },
                        );
                    }
                    other => bug!(sp, "unsize to slice from non-array {:?}", other),
                },
                Type::TraitObject(_) => {
                    self.builder.set_result(
                        sp,
                        RValue::Cast {
                            val: ptr_lval,
                            ty: ty_out.clone(),
                        },
                    );
                }
                _ => {
                    // Check an Unsize impl exists, then leave a cast for the
                    // later passes either way
                    if let Some(unsize) = self.builder.resolver().lang_item(LangItem::Unsize) {
                        let params = [(**oe_inner).clone()];
                        let _found =
                            self.builder.resolver().find_impl(unsize, &params, ie_inner);
                    }
                    self.builder.set_result(
                        sp,
                        RValue::Cast {
                            val: ptr_lval,
                            ty: ty_out.clone(),
                        },
                    );
                }
            }
        } else {
            // CoerceUnsized on non-references: emit a cast and defer the
            // field-level magic to later passes
            self.builder.set_result(
                sp,
                RValue::Cast {
                    val: ptr_lval,
                    ty: ty_out.clone(),
                },
            );
        }
        Ok(())
    }

    fn visit_index(&mut self, e: &Expr, value: &Expr, index: &Expr) -> LowerResult {
        let sp = e.span;

        // Index first: if it borrows from the source, the borrow is over by
        // the time the source is evaluated
        let ty_idx = &index.ty;
        self.visit(index)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        let mut index_lv = self.builder.get_result_in_lvalue(index.span, ty_idx);

        let ty_val = &value.ty;
        self.visit(value)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        let value_lv = self.builder.get_result_in_lvalue(value.span, ty_val);

        assert_bug!(
            sp,
            ty_idx.as_primitive() == Some(CoreType::Usize),
            "indexing with non-usize type {:?}",
            ty_idx
        );
        match ty_val {
            Type::Array(_, size) => {
                assert_bug!(
                    sp,
                    matches!(size, ArraySize::Known(_)),
                    "indexing array of unknown size {:?}",
                    ty_val
                );
            }
            Type::Slice(_) => {}
            other => bug!(sp, "indexing unsupported type {:?}", other),
        }

        if self.cfg.emit_bounds_checks {
            let limit = match ty_val {
                Type::Array(_, ArraySize::Known(n)) => RValue::Constant(Constant::Uint {
                    value: *n as u128,
                    ty: CoreType::Usize,
                }),
                Type::Slice(_) => {
                    let ptr = self.builder.get_ptr_to_dst(value.span, &value_lv);
                    RValue::DstMeta { val: ptr }
                }
                _ => unreachable!(),
            };
            let limit_lval = self.builder.lvalue_or_temp(sp, &ty_usize(), limit);
            let cmp_res = self.builder.new_temporary(sp, ty_bool());
            self.builder.push_stmt_assign(
                sp,
                cmp_res.clone(),
                RValue::BinOp {
                    lhs: Param::LValue(index_lv.clone()),
                    op: mir::BinOp::Ge,
                    rhs: Param::LValue(limit_lval),
                },
            );
            let arm_panic = self.builder.new_bb_unlinked();
            let arm_continue = self.builder.new_bb_unlinked();
            self.builder.end_block(
                sp,
                Terminator::If {
                    cond: cmp_res,
                    bb_true: arm_panic,
                    bb_false: arm_continue,
                },
            );
            self.builder.set_cur_block(arm_panic);
            self.builder.end_block(sp, Terminator::Diverge);
            self.builder.set_cur_block(arm_continue);
        }

        if index_lv.as_local().is_none() {
            let tmp = self.builder.new_temporary(sp, ty_usize());
            self.builder
                .push_stmt_assign(sp, tmp.clone(), RValue::Use(index_lv));
            index_lv = tmp;
        }
        let index_local = index_lv.as_local().unwrap();
        self.builder.set_result(sp, value_lv.index(index_local));
        Ok(())
    }

    fn visit_deref(&mut self, e: &Expr, value: &Expr) -> LowerResult {
        let sp = e.span;
        let ty_val = &value.ty;
        self.visit(value)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        let mut val = self.builder.get_result_in_lvalue(value.span, ty_val);

        match ty_val {
            Type::Pointer(..) | Type::Borrow(..) => {
                // Plain pointer/reference deref
            }
            _ if self.builder.is_type_owned_box(ty_val) => {
                // Box magically derefs
            }
            _ => {
                // Overloaded deref expands into a trait method call
                if self.in_borrow {
                    if let Some(target) = self.borrow_raise_target {
                        self.builder.raise_temporaries(sp, &val, target);
                    }
                }

                let (lang, method, bt) = match value.usage {
                    ValueUsage::Borrow => (LangItem::Deref, "deref", BorrowKind::Shared),
                    ValueUsage::Mutate => (LangItem::DerefMut, "deref_mut", BorrowKind::Unique),
                    ValueUsage::Move => {
                        bug!(sp, "by-value use of an overloaded deref: {:?}", ty_val)
                    }
                    ValueUsage::Unknown => bug!(sp, "unclassified usage of deref value"),
                };
                let trait_path = match self.builder.resolver().lang_item(lang) {
                    Some(p) => p.clone(),
                    None => bug!(sp, "lang item for {} is missing", method),
                };
                let method_path = Path::UfcsKnown {
                    ty: Box::new(ty_val.clone()),
                    trait_path: GenericPath::plain(trait_path),
                    item: Symbol::intern(method),
                };

                let arg = self.builder.lvalue_or_temp(
                    sp,
                    &Type::borrow(bt, ty_val.clone()),
                    RValue::Borrow {
                        kind: bt,
                        val,
                    },
                );
                self.builder.moved_lvalue(sp, &arg);
                let res = self
                    .builder
                    .new_temporary(sp, Type::borrow(bt, e.ty.clone()));

                let ok_block = self.builder.new_bb_unlinked();
                let panic_block = self.builder.new_bb_unlinked();
                self.builder.end_block(
                    sp,
                    Terminator::Call {
                        ret_block: ok_block,
                        panic_block,
                        result: res.clone(),
                        target: CallTarget::Path(method_path),
                        args: vec![Param::LValue(arg)],
                    },
                );
                self.builder.set_cur_block(panic_block);
                self.builder.end_block(sp, Terminator::Diverge);
                self.builder.set_cur_block(ok_block);
                self.builder.mark_value_assigned(sp, &res);
                val = res;
            }
        }

        self.builder.set_result(sp, val.deref());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Emplacement
    // ------------------------------------------------------------------

    fn visit_emplace(
        &mut self,
        e: &Expr,
        kind: EmplaceKind,
        place: Option<&Expr>,
        value: &Expr,
    ) -> LowerResult {
        match self.cfg.target {
            TargetVersion::V1_19 => self.visit_emplace_119(e, kind, place, value),
            TargetVersion::V1_29 | TargetVersion::V1_39 => {
                self.visit_emplace_129(e, kind, value)
            }
        }
    }

    /// Call an intrinsic whose panic path is a diverge stub, continuing on
    /// the ok path.
    fn emit_intrinsic_call(
        &mut self,
        sp: Span,
        name: &str,
        params: Vec<Type>,
        args: Vec<Param>,
        result: LValue,
    ) {
        let ok = self.builder.new_bb_unlinked();
        let panic = self.builder.new_bb_unlinked();
        self.builder.end_block(
            sp,
            Terminator::Call {
                ret_block: ok,
                panic_block: panic,
                result: result.clone(),
                target: CallTarget::Intrinsic {
                    name: Symbol::intern(name),
                    params,
                },
                args,
            },
        );
        self.builder.set_cur_block(panic);
        self.builder.end_block(sp, Terminator::Diverge);
        self.builder.set_cur_block(ok);
        self.builder.mark_value_assigned(sp, &result);
    }

    fn lang_path(&self, sp: Span, li: LangItem, what: &str) -> SimplePath {
        match self.builder.resolver().lang_item(li) {
            Some(p) => p.clone(),
            None => bug!(sp, "lang item `{}` is missing", what),
        }
    }

    /// Placer-protocol emplacement (1.19): make_place, Place::pointer, write
    /// through the raw pointer without dropping, finalize.
    ///
    /// The panic edges do not unwind the partially-constructed place; they
    /// diverge, matching the behaviour this lowering replicates.
    fn visit_emplace_119(
        &mut self,
        e: &Expr,
        kind: EmplaceKind,
        place: Option<&Expr>,
        value: &Expr,
    ) -> LowerResult {
        if kind == EmplaceKind::Noop {
            return self.visit(value);
        }
        let sp = e.span;
        let data_ty = value.ty.clone();
        let path_placer = self.lang_path(sp, LangItem::PlacerTrait, "placer_trait");
        let path_boxed = self.lang_path(sp, LangItem::BoxedTrait, "boxed_trait");
        let path_place = self.lang_path(sp, LangItem::PlaceTrait, "place_trait");
        let path_box_place = self.lang_path(sp, LangItem::BoxPlaceTrait, "box_place_trait");
        let path_in_place = self.lang_path(sp, LangItem::InPlaceTrait, "in_place_trait");

        // 1. The type of the place
        let place_type_raw = match kind {
            EmplaceKind::Noop => unreachable!(),
            EmplaceKind::Boxer => Type::Associated {
                ty: Box::new(e.ty.clone()),
                trait_path: GenericPath::plain(path_boxed.clone()),
                item: Symbol::intern("Place"),
            },
            EmplaceKind::Placer => Type::Associated {
                ty: Box::new(place.unwrap().ty.clone()),
                trait_path: GenericPath::new(path_placer.clone(), vec![data_ty.clone()]),
                item: Symbol::intern("Place"),
            },
        };
        let place_type = self.builder.resolver().expand_associated_types(place_type_raw);

        // 2. Initialise the place
        let place_lv = self.builder.new_temporary(sp, place_type.clone());
        let place_panic = self.builder.new_bb_unlinked();
        let place_ok = self.builder.new_bb_unlinked();
        match kind {
            EmplaceKind::Noop => unreachable!(),
            EmplaceKind::Boxer => {
                self.builder.end_block(
                    sp,
                    Terminator::Call {
                        ret_block: place_ok,
                        panic_block: place_panic,
                        result: place_lv.clone(),
                        target: CallTarget::Path(Path::UfcsKnown {
                            ty: Box::new(place_type.clone()),
                            trait_path: GenericPath::new(path_box_place, vec![data_ty.clone()]),
                            item: Symbol::intern("make_place"),
                        }),
                        args: vec![],
                    },
                );
            }
            EmplaceKind::Placer => {
                let place_expr = place.unwrap();
                self.visit(place_expr)?;
                let val = self
                    .builder
                    .get_result_in_param(place_expr.span, &place_expr.ty);
                if let Param::LValue(lv) = &val {
                    self.builder.moved_lvalue(place_expr.span, lv);
                }
                self.builder.end_block(
                    sp,
                    Terminator::Call {
                        ret_block: place_ok,
                        panic_block: place_panic,
                        result: place_lv.clone(),
                        target: CallTarget::Path(Path::UfcsKnown {
                            ty: Box::new(place_expr.ty.clone()),
                            trait_path: GenericPath::new(
                                path_placer,
                                vec![data_ty.clone()],
                            ),
                            item: Symbol::intern("make_place"),
                        }),
                        args: vec![val],
                    },
                );
            }
        }
        self.builder.set_cur_block(place_panic);
        self.builder.end_block(sp, Terminator::Diverge);
        self.builder.set_cur_block(place_ok);
        self.builder.mark_value_assigned(sp, &place_lv);

        // 3. Obtain the raw pointer
        let place_raw = self
            .builder
            .new_temporary(sp, Type::pointer(BorrowKind::Unique, data_ty.clone()));
        let raw_panic = self.builder.new_bb_unlinked();
        let raw_ok = self.builder.new_bb_unlinked();
        {
            let refmut_ty = Type::borrow(BorrowKind::Unique, place_type.clone());
            let place_refmut = self.builder.lvalue_or_temp(
                sp,
                &refmut_ty,
                RValue::Borrow {
                    kind: BorrowKind::Unique,
                    val: place_lv.clone(),
                },
            );
            self.builder.moved_lvalue(sp, &place_refmut);
            self.builder.end_block(
                sp,
                Terminator::Call {
                    ret_block: raw_ok,
                    panic_block: raw_panic,
                    result: place_raw.clone(),
                    target: CallTarget::Path(Path::UfcsKnown {
                        ty: Box::new(place_type.clone()),
                        trait_path: GenericPath::new(path_place, vec![data_ty.clone()]),
                        item: Symbol::intern("pointer"),
                    }),
                    args: vec![Param::LValue(place_refmut)],
                },
            );
        }
        self.builder.set_cur_block(raw_panic);
        self.builder.end_block(sp, Terminator::Diverge);
        self.builder.set_cur_block(raw_ok);
        self.builder.mark_value_assigned(sp, &place_raw);

        // 4. Evaluate the value and write it through the raw pointer
        self.visit(value)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        let val = self.builder.get_result(sp);
        self.builder
            .push_stmt_assign_nodrop(sp, place_raw.clone().deref(), val);

        // 5. Finalize
        let finalize_path = match kind {
            EmplaceKind::Noop => unreachable!(),
            EmplaceKind::Boxer => Path::UfcsKnown {
                ty: Box::new(e.ty.clone()),
                trait_path: GenericPath::plain(path_boxed),
                item: Symbol::intern("finalize"),
            },
            EmplaceKind::Placer => Path::UfcsKnown {
                ty: Box::new(place_type),
                trait_path: GenericPath::new(path_in_place, vec![data_ty]),
                item: Symbol::intern("finalize"),
            },
        };
        let res = self.builder.new_temporary(sp, e.ty.clone());
        let fin_panic = self.builder.new_bb_unlinked();
        let fin_ok = self.builder.new_bb_unlinked();
        self.builder.moved_lvalue(sp, &place_lv);
        self.builder.end_block(
            sp,
            Terminator::Call {
                ret_block: fin_ok,
                panic_block: fin_panic,
                result: res.clone(),
                target: CallTarget::Path(finalize_path),
                args: vec![Param::LValue(place_lv)],
            },
        );
        self.builder.set_cur_block(fin_panic);
        self.builder.end_block(sp, Terminator::Diverge);
        self.builder.set_cur_block(fin_ok);
        self.builder.mark_value_assigned(sp, &res);
        self.builder.set_result(sp, res);
        Ok(())
    }

    /// Exchange-malloc emplacement (1.29+): compute layout, allocate, cast,
    /// write without dropping, transmute into the owning box.
    fn visit_emplace_129(&mut self, e: &Expr, kind: EmplaceKind, value: &Expr) -> LowerResult {
        let sp = e.span;
        assert_bug!(sp, kind == EmplaceKind::Boxer, "placer syntax after 1.19");
        let data_ty = value.ty.clone();

        self.visit(value)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        let val = self.builder.get_result(sp);

        let lang_exchange_malloc = self.lang_path(sp, LangItem::ExchangeMalloc, "exchange_malloc");
        let lang_owned_box = self.lang_path(sp, LangItem::OwnedBox, "owned_box");

        // 1. Size and alignment, statically or via intrinsics
        let (size_param, align_param) =
            match self.builder.resolver().get_size_and_align(&data_ty) {
                Some((size, align)) => (
                    Param::Constant(Constant::Uint {
                        value: size as u128,
                        ty: CoreType::Usize,
                    }),
                    Param::Constant(Constant::Uint {
                        value: align as u128,
                        ty: CoreType::Usize,
                    }),
                ),
                None => {
                    let size_slot = self.builder.new_temporary(sp, ty_usize());
                    self.emit_intrinsic_call(
                        sp,
                        "size_of",
                        vec![data_ty.clone()],
                        vec![],
                        size_slot.clone(),
                    );
                    let align_slot = self.builder.new_temporary(sp, ty_usize());
                    self.emit_intrinsic_call(
                        sp,
                        "align_of",
                        vec![data_ty.clone()],
                        vec![],
                        align_slot.clone(),
                    );
                    (Param::LValue(size_slot), Param::LValue(align_slot))
                }
            };

        // 2. Allocate; exchange_malloc hands back a *mut u8
        let place_raw = self.builder.new_temporary(
            sp,
            Type::pointer(BorrowKind::Unique, Type::Primitive(CoreType::U8)),
        );
        let alloc_panic = self.builder.new_bb_unlinked();
        let alloc_ok = self.builder.new_bb_unlinked();
        self.builder.end_block(
            sp,
            Terminator::Call {
                ret_block: alloc_ok,
                panic_block: alloc_panic,
                result: place_raw.clone(),
                target: CallTarget::Path(Path::simple(lang_exchange_malloc)),
                args: vec![size_param, align_param],
            },
        );
        self.builder.set_cur_block(alloc_panic);
        self.builder.end_block(sp, Terminator::Diverge);
        self.builder.set_cur_block(alloc_ok);
        self.builder.mark_value_assigned(sp, &place_raw);

        // 3. Cast to *mut T and write without dropping the destination
        let place_type = Type::pointer(BorrowKind::Unique, data_ty.clone());
        let place = self.builder.new_temporary(sp, place_type.clone());
        self.builder.push_stmt_assign(
            sp,
            place.clone(),
            RValue::Cast {
                val: place_raw,
                ty: place_type.clone(),
            },
        );
        self.builder
            .push_stmt_assign_nodrop(sp, place.clone().deref(), val);

        // 4. Transmute the pointer into the owning box
        let res_type = Type::named(lang_owned_box, vec![data_ty]);
        let res = self.builder.new_temporary(sp, res_type.clone());
        self.emit_intrinsic_call(
            sp,
            "transmute",
            vec![res_type, place_type],
            vec![Param::LValue(place)],
            res.clone(),
        );
        self.builder.set_result(sp, res);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Evaluate call arguments. Every argument except a sole single one is
    /// pinned into its own temporary so evaluation order survives later
    /// reordering; constants pass through. A diverged argument still yields
    /// a placeholder temporary to keep the call shape intact.
    fn get_args(&mut self, args: &[Expr]) -> LowerResult<Vec<Param>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            if self.builder.block_active() {
                self.visit(arg)?;
            }
            let param = if !self.builder.block_active() {
                let tmp = self.builder.new_temporary(arg.span, arg.ty.clone());
                Param::LValue(tmp)
            } else if args.len() == 1 {
                self.builder.get_result_in_param(arg.span, &arg.ty)
            } else {
                match self.builder.get_result(arg.span) {
                    RValue::Constant(c) => Param::Constant(c),
                    res => {
                        // Fresh temporary per argument: ordering matters
                        let tmp = self.builder.new_temporary(arg.span, arg.ty.clone());
                        self.builder.push_stmt_assign(arg.span, tmp.clone(), res);
                        Param::LValue(tmp)
                    }
                }
            };
            if self.builder.block_active() {
                if let Param::LValue(lv) = &param {
                    self.builder.moved_lvalue(arg.span, lv);
                }
            }
            values.push(param);
        }
        Ok(values)
    }

    fn visit_call_path(&mut self, e: &Expr, path: &Path, args: &[Expr]) -> LowerResult {
        let saved = self.borrow_raise_target.take();
        let r = self.visit_call_path_inner(e, path, args);
        self.borrow_raise_target = saved;
        r
    }

    fn visit_call_path_inner(&mut self, e: &Expr, path: &Path, args: &[Expr]) -> LowerResult {
        let sp = e.span;
        let values = self.get_args(args)?;
        if !self.builder.block_active() {
            // An argument diverged; the call itself is dead code
            return Ok(());
        }

        let panic_block = self.builder.new_bb_unlinked();
        let next_block = self.builder.new_bb_unlinked();
        let res = self.builder.new_temporary(sp, e.ty.clone());

        let mut unconditional_diverge = false;

        // Intrinsics are a distinct call target, recognised by ABI; the
        // drop_in_place lang item is rewritten to an intrinsic as well
        if let Path::Simple(gp) = path {
            if let Some(Item::Function(sig)) = self.builder.resolver().lookup(&gp.path) {
                match sig.abi {
                    Abi::RustIntrinsic => {
                        self.builder.end_block(
                            sp,
                            Terminator::Call {
                                ret_block: next_block,
                                panic_block,
                                result: res.clone(),
                                target: CallTarget::Intrinsic {
                                    name: gp.path.last(),
                                    params: gp.params.clone(),
                                },
                                args: values.clone(),
                            },
                        );
                    }
                    Abi::PlatformIntrinsic => {
                        let name = format!("platform:{}", gp.path.last());
                        self.builder.end_block(
                            sp,
                            Terminator::Call {
                                ret_block: next_block,
                                panic_block,
                                result: res.clone(),
                                target: CallTarget::Intrinsic {
                                    name: Symbol::intern(&name),
                                    params: gp.params.clone(),
                                },
                                args: values.clone(),
                            },
                        );
                    }
                    _ => {}
                }
                if sig.ret.is_diverge() {
                    unconditional_diverge = true;
                }
            }
            if self.builder.block_active() {
                let is_drop_in_place = self
                    .builder
                    .resolver()
                    .lang_item(LangItem::DropInPlace)
                    .map_or(false, |p| *p == gp.path);
                if is_drop_in_place {
                    self.builder.end_block(
                        sp,
                        Terminator::Call {
                            ret_block: next_block,
                            panic_block,
                            result: res.clone(),
                            target: CallTarget::Intrinsic {
                                name: Symbol::intern("drop_in_place"),
                                params: gp.params.clone(),
                            },
                            args: values.clone(),
                        },
                    );
                }
            }
        }

        // Not an intrinsic: a plain path call
        if self.builder.block_active() {
            self.builder.end_block(
                sp,
                Terminator::Call {
                    ret_block: next_block,
                    panic_block,
                    result: res.clone(),
                    target: CallTarget::Path(path.clone()),
                    args: values,
                },
            );
        }

        self.builder.set_cur_block(panic_block);
        self.builder.end_block(sp, Terminator::Diverge);

        self.builder.set_cur_block(next_block);
        if unconditional_diverge {
            // The return block exists to satisfy the call shape, but control
            // never reaches it
            self.builder.end_block(sp, Terminator::Diverge);
            let bb = self.builder.new_bb_unlinked();
            self.builder.set_cur_block(bb);
        } else {
            self.builder.mark_value_assigned(sp, &res);
        }
        self.builder.set_result(sp, res);
        Ok(())
    }

    fn visit_call_value(&mut self, e: &Expr, value: &Expr, args: &[Expr]) -> LowerResult {
        let sp = e.span;
        let saved = self.borrow_raise_target.take();
        let r = (|| -> LowerResult {
            // Only function pointers get here; other callables were
            // desugared into trait method calls
            assert_bug!(
                sp,
                matches!(value.ty, Type::Function(_)),
                "call of non-fn value of type {:?}",
                value.ty
            );
            self.visit(value)?;
            if !self.builder.block_active() {
                return Ok(());
            }

            // Pin the callee before the arguments; evaluation order
            let fcn_val = self.builder.new_temporary(value.span, value.ty.clone());
            let fres = self.builder.get_result(value.span);
            self.builder
                .push_stmt_assign(value.span, fcn_val.clone(), fres);

            let values = self.get_args(args)?;
            if !self.builder.block_active() {
                return Ok(());
            }

            let panic_block = self.builder.new_bb_unlinked();
            let next_block = self.builder.new_bb_unlinked();
            let res = self.builder.new_temporary(sp, e.ty.clone());
            self.builder.end_block(
                sp,
                Terminator::Call {
                    ret_block: next_block,
                    panic_block,
                    result: res.clone(),
                    target: CallTarget::Value(fcn_val),
                    args: values,
                },
            );
            self.builder.set_cur_block(panic_block);
            self.builder.end_block(sp, Terminator::Diverge);
            self.builder.set_cur_block(next_block);
            self.builder.mark_value_assigned(sp, &res);
            self.builder.set_result(sp, res);
            Ok(())
        })();
        self.borrow_raise_target = saved;
        r
    }

    // ------------------------------------------------------------------
    // Field access, literals, paths, variables
    // ------------------------------------------------------------------

    fn visit_field(&mut self, e: &Expr, value: &Expr, field: Symbol) -> LowerResult {
        let sp = e.span;
        self.visit(value)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        let val = self.builder.get_result_in_lvalue(value.span, &value.ty);

        let name = field.as_str();
        if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
            let idx: u32 = name
                .parse()
                .unwrap_or_else(|_| bug!(sp, "tuple field index `{}` out of range", name));
            self.builder.set_result(sp, val.field(idx));
            return Ok(());
        }

        let gp = match &value.ty {
            Type::Path(gp) => gp,
            other => bug!(sp, "named field access on non-path type {:?}", other),
        };
        match self.builder.resolver().lookup(&gp.path) {
            Some(Item::Struct(s)) => match &s.fields {
                StructFields::Named(fields) => {
                    match fields.iter().position(|(n, _)| *n == field) {
                        Some(idx) => {
                            self.builder.set_result(sp, val.field(idx as u32));
                            Ok(())
                        }
                        None => err(sp, LowerErrorKind::UnknownField(field)),
                    }
                }
                _ => bug!(sp, "named field on tuple/unit struct {:?}", gp.path),
            },
            Some(Item::Union(u)) => match u.find_field(field) {
                Some(idx) => {
                    self.builder.set_result(sp, val.downcast(idx as u32));
                    Ok(())
                }
                None => err(sp, LowerErrorKind::UnknownField(field)),
            },
            other => bug!(sp, "field access on {:?} ({:?})", gp.path, other),
        }
    }

    fn visit_literal(&mut self, e: &Expr, lit: &Literal) -> LowerResult {
        let sp = e.span;
        let res: Constant = match lit {
            Literal::Integer(v) => {
                let prim = match e.ty.as_primitive() {
                    Some(p) => p,
                    None => bug!(sp, "integer literal with non-primitive type {:?}", e.ty),
                };
                if prim.is_unsigned_integer() || prim == CoreType::Char {
                    Constant::Uint {
                        value: *v,
                        ty: prim,
                    }
                } else if prim.is_signed_integer() {
                    Constant::Int {
                        value: *v as i128,
                        ty: prim,
                    }
                } else {
                    bug!(sp, "integer literal with unexpected type {:?}", e.ty)
                }
            }
            Literal::Float(v) => {
                let prim = match e.ty.as_primitive() {
                    Some(p) if p.is_float() => p,
                    _ => bug!(sp, "float literal with non-float type {:?}", e.ty),
                };
                Constant::Float {
                    value: *v,
                    ty: prim,
                }
            }
            Literal::Boolean(b) => Constant::Bool(*b),
            Literal::String(s) => Constant::Str(*s),
            Literal::ByteString(b) => Constant::Bytes(b.clone()),
        };
        self.builder.set_result(sp, res);
        Ok(())
    }

    fn enum_parent_and_index(&self, sp: Span, path: &GenericPath) -> (GenericPath, u32) {
        let enum_path = GenericPath::new(path.path.parent(), path.params.clone());
        let idx = self
            .builder
            .enum_variant_index(sp, &enum_path, path.path.last());
        (enum_path, idx)
    }

    fn visit_tuple_variant(
        &mut self,
        e: &Expr,
        path: &GenericPath,
        is_struct: bool,
        args: &[Expr],
    ) -> LowerResult {
        let sp = e.span;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            self.visit(arg)?;
            if !self.builder.block_active() {
                return Ok(());
            }
            values.push(self.builder.get_result_in_param(arg.span, &arg.ty));
        }

        if is_struct {
            self.builder.set_result(
                sp,
                RValue::Struct {
                    path: path.clone(),
                    vals: values,
                },
            );
        } else {
            let (enum_path, idx) = self.enum_parent_and_index(sp, path);
            self.builder.set_result(
                sp,
                RValue::EnumVariant {
                    path: enum_path,
                    index: idx,
                    vals: values,
                },
            );
        }
        Ok(())
    }

    fn visit_unit_variant(&mut self, e: &Expr, path: &GenericPath, is_struct: bool) -> LowerResult {
        let sp = e.span;
        if is_struct {
            self.builder.set_result(
                sp,
                RValue::Struct {
                    path: path.clone(),
                    vals: vec![],
                },
            );
        } else {
            let (enum_path, idx) = self.enum_parent_and_index(sp, path);
            self.builder.set_result(
                sp,
                RValue::EnumVariant {
                    path: enum_path,
                    index: idx,
                    vals: vec![],
                },
            );
        }
        Ok(())
    }

    fn visit_path_value(&mut self, e: &Expr, path: &Path) -> LowerResult {
        let sp = e.span;
        match path {
            Path::Simple(gp) => {
                match self.builder.resolver().lookup(&gp.path) {
                    Some(Item::Static { .. }) => {
                        self.builder
                            .set_result(sp, LValue::new_static(path.clone()));
                        Ok(())
                    }
                    Some(Item::Const { .. }) => {
                        self.builder
                            .set_result(sp, Constant::Const(Box::new(path.clone())));
                        Ok(())
                    }
                    Some(Item::Function(_)) => {
                        self.builder
                            .set_result(sp, Constant::ItemAddr(Box::new(path.clone())));
                        Ok(())
                    }
                    Some(Item::Struct(s)) => match s.fields {
                        // Unit struct used as a value
                        StructFields::Unit => {
                            self.builder.set_result(
                                sp,
                                RValue::Struct {
                                    path: gp.clone(),
                                    vals: vec![],
                                },
                            );
                            Ok(())
                        }
                        // Tuple struct constructor function
                        _ => {
                            self.builder
                                .set_result(sp, Constant::ItemAddr(Box::new(path.clone())));
                            Ok(())
                        }
                    },
                    None => {
                        // Enum tuple-variant constructor?
                        let parent = gp.path.parent();
                        if !parent.components.is_empty() {
                            if let Some(Item::Enum(en)) =
                                self.builder.resolver().lookup(&parent)
                            {
                                if en.find_variant(gp.path.last()).is_some() {
                                    self.builder.set_result(
                                        sp,
                                        Constant::ItemAddr(Box::new(path.clone())),
                                    );
                                    return Ok(());
                                }
                            }
                        }
                        err(sp, LowerErrorKind::UnresolvedItem(format!("{}", gp.path)))
                    }
                    other => bug!(sp, "path value {:?} resolves to {:?}", gp.path, other),
                }
            }
            Path::UfcsKnown {
                trait_path, item, ..
            } => match self.builder.resolver().lookup(&trait_path.path) {
                Some(Item::Trait(t)) => {
                    if t.consts.contains(item) {
                        self.builder
                            .set_result(sp, Constant::Const(Box::new(path.clone())));
                        Ok(())
                    } else if t.methods.contains(item) {
                        self.builder
                            .set_result(sp, Constant::ItemAddr(Box::new(path.clone())));
                        Ok(())
                    } else {
                        err(
                            sp,
                            LowerErrorKind::UnresolvedItem(format!(
                                "{}::{}",
                                trait_path.path, item
                            )),
                        )
                    }
                }
                _ => err(
                    sp,
                    LowerErrorKind::UnresolvedItem(format!("{}", trait_path.path)),
                ),
            },
        }
    }

    fn visit_variable(&mut self, e: &Expr, slot: u32) -> LowerResult {
        let sp = e.span;
        // A `ref` binding installed an alias for this slot
        if let Some((mode, lv)) = self.builder.get_variable_alias(slot).cloned() {
            let res: RValue = match mode {
                BindMode::Move => RValue::Use(lv),
                BindMode::Ref => RValue::Borrow {
                    kind: BorrowKind::Shared,
                    val: lv,
                },
                BindMode::MutRef => RValue::Borrow {
                    kind: BorrowKind::Unique,
                    val: lv,
                },
            };
            self.builder.set_result(sp, res);
            return Ok(());
        }
        let var = self.builder.get_variable(sp, slot);
        self.builder.set_result(sp, var);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Aggregates
    // ------------------------------------------------------------------

    /// Build the field parameters for a named-field literal: declared order,
    /// one temporary per computed field, missing fields from the base value.
    fn struct_literal_params(
        &mut self,
        sp: Span,
        decl_fields: &[(Symbol, Type)],
        base: Option<&Expr>,
        fields: &[(Symbol, Expr)],
    ) -> LowerResult<Option<Vec<Param>>> {
        let base_val = match base {
            Some(b) => {
                self.visit(b)?;
                if !self.builder.block_active() {
                    return Ok(None);
                }
                Some(self.builder.get_result_in_lvalue(b.span, &b.ty))
            }
            None => None,
        };

        let mut values: Vec<Option<Param>> = vec![None; decl_fields.len()];
        for (name, valnode) in fields {
            let idx = match decl_fields.iter().position(|(n, _)| n == name) {
                Some(i) => i,
                None => return err(valnode.span, LowerErrorKind::UnknownField(*name)),
            };
            self.visit(valnode)?;
            if !self.builder.block_active() {
                return Ok(None);
            }
            let param = match self.builder.get_result(valnode.span) {
                RValue::Constant(c) => Param::Constant(c),
                res => {
                    // Temporary per field: source order must be preserved
                    let tmp = self.builder.new_temporary(valnode.span, valnode.ty.clone());
                    self.builder.push_stmt_assign(valnode.span, tmp.clone(), res);
                    Param::LValue(tmp)
                }
            };
            values[idx] = Some(param);
        }

        let mut out = Vec::with_capacity(values.len());
        for (i, v) in values.into_iter().enumerate() {
            match v {
                Some(p) => out.push(p),
                None => match &base_val {
                    Some(b) => out.push(Param::LValue(b.clone().field(i as u32))),
                    None => {
                        return err(sp, LowerErrorKind::MissingField(decl_fields[i].0));
                    }
                },
            }
        }
        Ok(Some(out))
    }

    fn visit_struct_literal(
        &mut self,
        e: &Expr,
        path: &GenericPath,
        base: Option<&Expr>,
        fields: &[(Symbol, Expr)],
    ) -> LowerResult {
        let sp = e.span;
        let resolver = self.builder.resolver();

        match resolver.lookup(&path.path) {
            Some(Item::Struct(s)) => match s.fields.clone() {
                StructFields::Unit => {
                    self.builder.set_result(
                        sp,
                        RValue::Struct {
                            path: path.clone(),
                            vals: vec![],
                        },
                    );
                    Ok(())
                }
                StructFields::Named(decl) => {
                    match self.struct_literal_params(sp, &decl, base, fields)? {
                        Some(vals) => {
                            self.builder.set_result(
                                sp,
                                RValue::Struct {
                                    path: path.clone(),
                                    vals,
                                },
                            );
                            Ok(())
                        }
                        None => Ok(()),
                    }
                }
                StructFields::Tuple(_) => {
                    bug!(sp, "struct literal for tuple struct {:?}", path.path)
                }
            },
            Some(Item::Union(u)) => {
                // Union literals have exactly one field
                let (name, valnode) = match fields {
                    [f] => f,
                    _ => bug!(sp, "union literal with {} fields", fields.len()),
                };
                let idx = match u.find_field(*name) {
                    Some(i) => i as u32,
                    None => return err(sp, LowerErrorKind::UnknownField(*name)),
                };
                self.visit(valnode)?;
                if !self.builder.block_active() {
                    return Ok(());
                }
                let val = self.builder.get_result_in_lvalue(valnode.span, &valnode.ty);
                self.builder.set_result(
                    sp,
                    RValue::UnionVariant {
                        path: path.clone(),
                        index: idx,
                        val: Param::LValue(val),
                    },
                );
                Ok(())
            }
            None => {
                // Struct-like enum variant
                let (enum_path, idx) = self.enum_parent_and_index(sp, path);
                let decl = match self.builder.resolver().lookup(&enum_path.path) {
                    Some(Item::Enum(en)) => match &en.variants[idx as usize].data {
                        opalc_hir::resolver::VariantData::Struct(fields) => fields.clone(),
                        other => bug!(
                            sp,
                            "struct literal for non-struct variant {:?} ({:?})",
                            path.path,
                            other
                        ),
                    },
                    _ => unreachable!(),
                };
                match self.struct_literal_params(sp, &decl, base, fields)? {
                    Some(vals) => {
                        self.builder.set_result(
                            sp,
                            RValue::EnumVariant {
                                path: enum_path,
                                index: idx,
                                vals,
                            },
                        );
                        Ok(())
                    }
                    None => Ok(()),
                }
            }
            other => bug!(sp, "struct literal for {:?} ({:?})", path.path, other),
        }
    }

    fn visit_tuple(&mut self, e: &Expr, vals: &[Expr]) -> LowerResult {
        let sp = e.span;
        let mut values = Vec::with_capacity(vals.len());
        for v in vals {
            self.visit(v)?;
            if !self.builder.block_active() {
                return Ok(());
            }
            values.push(self.builder.get_result_in_param(v.span, &v.ty));
        }
        self.builder.set_result(sp, RValue::Tuple { vals: values });
        Ok(())
    }

    fn visit_array_list(&mut self, e: &Expr, vals: &[Expr]) -> LowerResult {
        let sp = e.span;
        let mut values = Vec::with_capacity(vals.len());
        for v in vals {
            self.visit(v)?;
            if !self.builder.block_active() {
                return Ok(());
            }
            values.push(self.builder.get_result_in_param(v.span, &v.ty));
        }
        self.builder.set_result(sp, RValue::Array { vals: values });
        Ok(())
    }

    fn visit_array_sized(&mut self, e: &Expr, val: &Expr, count: u64) -> LowerResult {
        let sp = e.span;
        self.visit(val)?;
        if !self.builder.block_active() {
            return Ok(());
        }
        let value = self.builder.get_result_in_param(val.span, &val.ty);
        self.builder
            .set_result(sp, RValue::SizedArray { val: value, count });
        Ok(())
    }

    fn visit_closure(&mut self, e: &Expr, obj_path: &GenericPath, captures: &[Expr]) -> LowerResult {
        let sp = e.span;
        let saved = self.borrow_raise_target.take();
        let r = (|| -> LowerResult {
            let mut vals = Vec::with_capacity(captures.len());
            for cap in captures {
                self.visit(cap)?;
                if !self.builder.block_active() {
                    return Ok(());
                }
                let lv = self.builder.get_result_in_lvalue(cap.span, &cap.ty);
                vals.push(Param::LValue(lv));
            }
            self.builder.set_result(
                sp,
                RValue::Struct {
                    path: obj_path.clone(),
                    vals,
                },
            );
            Ok(())
        })();
        self.borrow_raise_target = saved;
        r
    }

    fn visit_generator_literal(
        &mut self,
        e: &Expr,
        obj_path: &GenericPath,
        captures: &[Expr],
        state_data_ty: &Type,
    ) -> LowerResult {
        let sp = e.span;
        let saved = self.borrow_raise_target.take();
        let r = (|| -> LowerResult {
            let mut vals = Vec::with_capacity(1 + captures.len());

            // The state slot starts zeroed: discriminant 0 is the not-yet-run
            // state
            let maybe_uninit = self.lang_path(sp, LangItem::MaybeUninit, "maybe_uninit");
            let slot_type = Type::named(maybe_uninit, vec![state_data_ty.clone()]);
            let res_slot = self.builder.new_temporary(sp, slot_type.clone());
            self.emit_intrinsic_call(sp, "init", vec![slot_type], vec![], res_slot.clone());
            vals.push(Param::LValue(res_slot));

            for cap in captures {
                self.visit(cap)?;
                if !self.builder.block_active() {
                    return Ok(());
                }
                let lv = self.builder.get_result_in_lvalue(cap.span, &cap.ty);
                vals.push(Param::LValue(lv));
            }
            self.builder.set_result(
                sp,
                RValue::Struct {
                    path: obj_path.clone(),
                    vals,
                },
            );
            Ok(())
        })();
        self.borrow_raise_target = saved;
        r
    }

    // ------------------------------------------------------------------
    // Inline assembly
    // ------------------------------------------------------------------

    fn visit_asm(&mut self, e: &Expr) -> LowerResult {
        let sp = e.span;
        let (template, outputs, inputs, clobbers, flags) = match &e.kind {
            ExprKind::Asm {
                template,
                outputs,
                inputs,
                clobbers,
                flags,
            } => (template, outputs, inputs, clobbers, flags),
            _ => unreachable!(),
        };

        let mut input_ops = Vec::with_capacity(inputs.len());
        for (spec, v) in inputs {
            self.visit(v)?;
            if !self.builder.block_active() {
                return Ok(());
            }
            let lv = self.builder.get_result_in_lvalue(v.span, &v.ty);
            input_ops.push((spec.clone(), lv));
        }

        let mut output_ops = Vec::with_capacity(outputs.len());
        for (spec, v) in outputs {
            self.visit(v)?;
            if !self.builder.block_active() {
                return Ok(());
            }
            if !spec.starts_with('=') && !spec.starts_with('+') {
                return err(v.span, LowerErrorKind::MalformedAsmConstraint);
            }
            let lv = if spec[1..].starts_with('*') {
                self.builder.get_result_in_lvalue(v.span, &v.ty)
            } else {
                self.builder.get_result_unwrap_lvalue(v.span)
            };
            output_ops.push((spec.clone(), lv));
        }

        self.builder.push_stmt_asm(
            sp,
            AsmStatement {
                template: template.clone(),
                outputs: output_ops,
                inputs: input_ops,
                clobbers: clobbers.clone(),
                flags: flags.clone(),
            },
        );
        self.builder.set_result(sp, RValue::unit());
        Ok(())
    }
}

pub(crate) fn lower_binop(sp: Span, op: hir::BinOp) -> mir::BinOp {
    match op {
        hir::BinOp::CmpEq => mir::BinOp::Eq,
        hir::BinOp::CmpNe => mir::BinOp::Ne,
        hir::BinOp::CmpLt => mir::BinOp::Lt,
        hir::BinOp::CmpLe => mir::BinOp::Le,
        hir::BinOp::CmpGt => mir::BinOp::Gt,
        hir::BinOp::CmpGe => mir::BinOp::Ge,
        hir::BinOp::Add => mir::BinOp::Add,
        hir::BinOp::Sub => mir::BinOp::Sub,
        hir::BinOp::Mul => mir::BinOp::Mul,
        hir::BinOp::Div => mir::BinOp::Div,
        hir::BinOp::Mod => mir::BinOp::Rem,
        hir::BinOp::And => mir::BinOp::BitAnd,
        hir::BinOp::Or => mir::BinOp::BitOr,
        hir::BinOp::Xor => mir::BinOp::BitXor,
        hir::BinOp::Shl => mir::BinOp::Shl,
        hir::BinOp::Shr => mir::BinOp::Shr,
        hir::BinOp::BoolAnd | hir::BinOp::BoolOr => {
            bug!(sp, "short-circuit operator reached BinOp lowering")
        }
    }
}

fn lower_assign_op(op: AssignOp) -> mir::BinOp {
    match op {
        AssignOp::Add => mir::BinOp::Add,
        AssignOp::Sub => mir::BinOp::Sub,
        AssignOp::Mul => mir::BinOp::Mul,
        AssignOp::Div => mir::BinOp::Div,
        AssignOp::Mod => mir::BinOp::Rem,
        AssignOp::And => mir::BinOp::BitAnd,
        AssignOp::Or => mir::BinOp::BitOr,
        AssignOp::Xor => mir::BinOp::BitXor,
        AssignOp::Shl => mir::BinOp::Shl,
        AssignOp::Shr => mir::BinOp::Shr,
    }
}

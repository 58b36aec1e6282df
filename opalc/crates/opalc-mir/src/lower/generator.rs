//! Generator transform.
//!
//! A generator body lowers like any function, except that `yield` seals the
//! current block with `Return` and opens a new "state". This post-pass then:
//!
//! 1. wires the paused entry block into a dispatch `Switch` over the state
//!    discriminant, one arm per state plus a diverging `END` arm,
//! 2. names the discriminant enum's variants (`0..N`, `END`),
//! 3. lifts every local saved across a yield into the state-data struct and
//!    rewrites its accesses into projections through the pinned self
//!    argument,
//! 4. synthesises drop glue that destroys whatever the current state owns.
//!
//! Saved locals live behind `MaybeUninit` and `ManuallyDrop` wrappers, which
//! is where the double `.value.value` projection comes from: the runtime
//! controls their initialisation and drop explicitly.

use crate::builder::{assert_bug, bug, MirBuilder};
use crate::lower::expr::ExprVisitor;
use crate::lower::{GeneratorOutput, LowerResult};
use crate::mir::{
    BlockId, CallTarget, DropKind, Function, LValue, LValueRoot, LValueWrapper, LocalId, Param,
    RValue, Statement, Terminator,
};
use opalc_hir::hir::{self, Pattern, ValueUsage};
use opalc_hir::resolver::Resolve;
use opalc_hir::types::{BorrowKind, GenericPath, SimplePath, Type};
use indexmap::IndexMap;
use opalc_util::{Idx, Span, Symbol};
use std::collections::BTreeMap;

/// One suspension state: where execution resumes, and which locals were live
/// when the state was entered via its yield.
pub(crate) struct GenState {
    pub entry: BlockId,
    pub saved: Vec<(LocalId, DropKind)>,
}

/// Lowering-time generator bookkeeping, owned by the visitor.
pub(crate) struct GenLowerState {
    /// The paused block that will become the dispatch switch
    pub bb_open: BlockId,
    pub states: Vec<GenState>,
    pub state_enum: SimplePath,
}

impl GenLowerState {
    pub(crate) fn new(bb_open: BlockId, first_entry: BlockId, state_enum: SimplePath) -> Self {
        Self {
            bb_open,
            states: vec![GenState {
                entry: first_entry,
                saved: Vec::new(),
            }],
            state_enum,
        }
    }

    pub(crate) fn push_state(&mut self, entry: BlockId) {
        self.states.push(GenState {
            entry,
            saved: Vec::new(),
        });
    }

    /// The place of the state discriminant, from the generator's signature:
    /// `(*self.ptr).state.value.value.idx` with the deref through `Pin`.
    pub(crate) fn state_discriminant_lv() -> LValue {
        LValue {
            root: LValueRoot::Argument(0),
            wrappers: vec![
                LValueWrapper::Field(0), // .ptr (from Pin)
                LValueWrapper::Deref,
                LValueWrapper::Field(0),    // .state
                LValueWrapper::Downcast(1), // .value (from MaybeUninit)
                LValueWrapper::Field(0),    // .value (from ManuallyDrop)
                LValueWrapper::Field(0),    // .idx
            ],
        }
    }

    /// Same discriminant place as seen from drop glue, whose receiver is a
    /// plain `&mut self`.
    fn drop_discriminant_lv() -> LValue {
        LValue {
            root: LValueRoot::Argument(0),
            wrappers: vec![
                LValueWrapper::Deref,
                LValueWrapper::Field(0),
                LValueWrapper::Downcast(1),
                LValueWrapper::Field(0),
                LValueWrapper::Field(0),
            ],
        }
    }
}

/// Drive a generator function's body and run the whole transform.
pub(crate) fn lower_generator_body<R: Resolve>(
    vis: &mut ExprVisitor<'_, R>,
    f: &hir::Function,
    decl: &hir::GeneratorDecl,
) -> LowerResult<GeneratorOutput> {
    let sp = f.body.span;
    let n_args = f.args.len();
    let n_capture_slots = n_args + decl.capture_usages.len();

    // Captures arrive pre-initialised as the leading variable slots after the
    // arguments; they live in fields of the generator object. Insertion order
    // is the rewrite order, so the map must preserve it.
    let mut mappings: IndexMap<LocalId, Vec<LValueWrapper>> = IndexMap::new();
    for (i, usage) in decl.capture_usages.iter().enumerate() {
        let slot = (n_args + i) as u32;
        vis.builder.define_variable(sp, slot);
        vis.builder
            .mark_value_assigned(sp, &LValue::new_local(LocalId(slot)));
        let mut wrappers = vec![LValueWrapper::Field(1 + i as u32)];
        if matches!(usage, ValueUsage::Borrow | ValueUsage::Mutate) {
            wrappers.push(LValueWrapper::Deref);
        }
        mappings.insert(LocalId(slot), wrappers);
    }

    vis.visit(&f.body)?;
    if vis.builder.block_active() {
        assert_bug!(sp, vis.builder.has_result(), "active block but no result");
        // Falling off the end completes the generator
        let gp = generator_ret_enum(&vis.builder, sp);
        let val = vis.builder.get_result_in_param(sp, &f.body.ty);
        vis.builder.push_stmt_assign(
            sp,
            LValue::new_return(),
            RValue::EnumVariant {
                path: gp,
                index: 1,
                vals: vec![val],
            },
        );
    }
    vis.builder.final_cleanup(sp);

    let (used, state_variants) = generator_finalise(vis, sp);

    // Lift saved locals (captures excluded) into the state-data struct
    let mut state_fields: Vec<Type> = Vec::new();
    for (local, _kind) in &used {
        if local.index() < n_capture_slots {
            continue;
        }
        let field_idx = state_fields.len() as u32;
        let ty = vis
            .builder
            .lvalue_type(sp, &LValue::new_local(*local));
        state_fields.push(ty);
        mappings.insert(
            *local,
            vec![
                LValueWrapper::Field(0),    // .state
                LValueWrapper::Downcast(1), // MaybeUninit.value
                LValueWrapper::Field(0),    // ManuallyDrop.value
                LValueWrapper::Field(field_idx),
            ],
        );
    }
    log::debug!(
        "generator {}: {} states, {} lifted locals",
        f.name,
        state_variants.len() - 1,
        state_fields.len()
    );

    rewrite_locals(sp, vis.builder.fcn_mut(), &mappings);

    let gen = vis.gen.as_ref().unwrap();
    let drop_fn = generator_make_drop(
        vis.builder.resolver(),
        sp,
        &gen.states,
        n_args,
        decl,
        &mappings,
    );

    Ok(GeneratorOutput {
        state_variants,
        state_fields,
        drop_fn,
    })
}

fn generator_ret_enum<R: Resolve>(builder: &MirBuilder<'_, R>, sp: Span) -> GenericPath {
    let ret_ty = builder.lvalue_type(sp, &LValue::new_return());
    let gp = match ret_ty {
        Type::Path(gp) => gp,
        other => bug!(sp, "generator return type is not an enum path: {:?}", other),
    };
    let idx = builder.enum_variant_index(sp, &gp, Symbol::intern("Complete"));
    assert_bug!(sp, idx == 1, "Complete is not the second variant");
    gp
}

/// Wire the dispatch switch and name the state enum's variants. Returns the
/// union of saved locals across all yields.
fn generator_finalise<R: Resolve>(
    vis: &mut ExprVisitor<'_, R>,
    sp: Span,
) -> (Vec<(LocalId, DropKind)>, Vec<Symbol>) {
    let gen = vis.gen.take().expect("generator finalise without state");
    let end_idx = gen.states.len() as u32;
    let state_enum = GenericPath::plain(gen.state_enum.clone());

    let mut used: BTreeMap<LocalId, DropKind> = BTreeMap::new();
    let mut arm_targets = Vec::with_capacity(gen.states.len() + 1);
    let mut variants = Vec::with_capacity(gen.states.len() + 1);

    for (i, state) in gen.states.iter().enumerate() {
        let bb = vis.builder.new_bb_unlinked();
        arm_targets.push(bb);
        vis.builder.set_cur_block(bb);
        // Mark the generator poisoned on entry; a later yield re-arms it
        vis.builder.push_stmt_assign(
            sp,
            GenLowerState::state_discriminant_lv(),
            RValue::EnumVariant {
                path: state_enum.clone(),
                index: end_idx,
                vals: vec![],
            },
        );
        vis.builder.end_block(sp, Terminator::Goto(state.entry));

        variants.push(Symbol::intern(&i.to_string()));
        for (l, k) in &state.saved {
            used.insert(*l, *k);
        }
    }

    // Re-entering a completed generator is a contract violation
    let end_bb = vis.builder.new_bb_unlinked();
    arm_targets.push(end_bb);
    vis.builder.set_cur_block(end_bb);
    vis.builder.end_block(sp, Terminator::Diverge);
    variants.push(Symbol::intern("END"));

    vis.builder.set_cur_block(gen.bb_open);
    vis.builder.end_block(
        sp,
        Terminator::Switch {
            val: GenLowerState::state_discriminant_lv(),
            targets: arm_targets,
        },
    );

    vis.gen = Some(gen);
    (used.into_iter().collect(), variants)
}

/// Synthesise the generator's drop glue: switch on the discriminant, drop
/// what the current state owns.
fn generator_make_drop<R: Resolve>(
    resolver: &R,
    sp: Span,
    states: &[GenState],
    n_args: usize,
    decl: &hir::GeneratorDecl,
    mappings: &IndexMap<LocalId, Vec<LValueWrapper>>,
) -> Function {
    let self_ty = Type::borrow(BorrowKind::Unique, Type::named(decl.obj.clone(), vec![]));
    let args = [(Pattern::any(), self_ty)];
    let mut b = MirBuilder::new(
        resolver,
        Symbol::intern("drop"),
        Type::unit(),
        &args,
        &[],
        sp,
    );

    let get_lv = |local: LocalId| -> Option<LValue> {
        mappings.get(&local).map(|ws| {
            let mut wrappers = vec![LValueWrapper::Deref];
            wrappers.extend(ws.iter().cloned());
            LValue {
                root: LValueRoot::Argument(0),
                wrappers,
            }
        })
    };

    let entry = b.pause_cur_block();
    let mut arms = Vec::with_capacity(states.len() + 1);

    // Discriminant 0: never run, only the captures are live
    let bb = b.new_bb_unlinked();
    arms.push(bb);
    b.set_cur_block(bb);
    for i in 0..decl.capture_usages.len() {
        if let Some(lv) = get_lv(LocalId((n_args + i) as u32)) {
            b.push_stmt_drop(sp, lv, DropKind::Deep);
        }
    }
    b.end_block(sp, Terminator::Return);

    // Discriminant k+1: whatever yield k left live. The final state has no
    // saves and doubles as the completed state.
    for state in states {
        let bb = b.new_bb_unlinked();
        arms.push(bb);
        b.set_cur_block(bb);
        for (local, kind) in &state.saved {
            if let Some(lv) = get_lv(*local) {
                b.push_stmt_drop(sp, lv, *kind);
            }
        }
        b.end_block(sp, Terminator::Return);
    }

    b.set_cur_block(entry);
    b.push_stmt_assign(sp, LValue::new_return(), RValue::unit());
    b.end_block(
        sp,
        Terminator::Switch {
            val: GenLowerState::drop_discriminant_lv(),
            targets: arms,
        },
    );
    b.final_cleanup(sp);
    b.finish()
}

/// Rewrite every access to a lifted or captured local into its projection
/// through the pinned self argument.
fn rewrite_locals(
    sp: Span,
    fcn: &mut Function,
    mappings: &IndexMap<LocalId, Vec<LValueWrapper>>,
) {
    let rewrite = |lv: &mut LValue| {
        if let LValueRoot::Local(l) = lv.root {
            if let Some(ws) = mappings.get(&l) {
                let mut wrappers = vec![LValueWrapper::Field(0), LValueWrapper::Deref];
                wrappers.extend(ws.iter().cloned());
                wrappers.extend(lv.wrappers.drain(..));
                lv.root = LValueRoot::Argument(0);
                lv.wrappers = wrappers;
            }
        }
        for w in &lv.wrappers {
            if let LValueWrapper::Index(l) = w {
                if mappings.contains_key(l) {
                    bug!(sp, "saved local used as a runtime index");
                }
            }
        }
    };
    let rewrite_param = |p: &mut Param| {
        if let Param::LValue(lv) = p {
            rewrite(lv);
        }
    };
    let rewrite_rvalue = |rv: &mut RValue| match rv {
        RValue::Use(lv)
        | RValue::Borrow { val: lv, .. }
        | RValue::Cast { val: lv, .. }
        | RValue::UniOp { val: lv, .. }
        | RValue::DstMeta { val: lv }
        | RValue::DstPtr { val: lv } => rewrite(lv),
        RValue::BinOp { lhs, rhs, .. } => {
            rewrite_param(lhs);
            rewrite_param(rhs);
        }
        RValue::MakeDst { ptr, meta } => {
            rewrite_param(ptr);
            rewrite_param(meta);
        }
        RValue::Tuple { vals }
        | RValue::Array { vals }
        | RValue::Struct { vals, .. }
        | RValue::EnumVariant { vals, .. } => {
            for v in vals {
                rewrite_param(v);
            }
        }
        RValue::SizedArray { val, .. } | RValue::UnionVariant { val, .. } => rewrite_param(val),
        RValue::Constant(_) => {}
    };

    for block in fcn.blocks.iter_mut() {
        for stmt in &mut block.statements {
            match stmt {
                Statement::Assign { dst, src, .. } => {
                    rewrite(dst);
                    rewrite_rvalue(src);
                }
                Statement::Drop { val, .. } => rewrite(val),
                Statement::Asm(asm) => {
                    for (_, lv) in &mut asm.outputs {
                        rewrite(lv);
                    }
                    for (_, lv) in &mut asm.inputs {
                        rewrite(lv);
                    }
                }
            }
        }
        match &mut block.terminator {
            Terminator::If { cond, .. } => rewrite(cond),
            Terminator::Switch { val, .. } | Terminator::SwitchValue { val, .. } => rewrite(val),
            Terminator::Call {
                result,
                target,
                args,
                ..
            } => {
                rewrite(result);
                if let CallTarget::Value(lv) = target {
                    rewrite(lv);
                }
                for a in args {
                    rewrite_param(a);
                }
            }
            Terminator::Incomplete
            | Terminator::Return
            | Terminator::Diverge
            | Terminator::Goto(_) => {}
        }
    }
}

//! MirBuilder - imperative CFG construction.
//!
//! The builder owns the function under construction: it allocates locals and
//! blocks, appends statements to the current block, seals blocks with
//! terminators, and carries the "result" of the most recently visited HIR
//! expression between visitor calls.
//!
//! Result handoff protocol: every visited expression either leaves a result
//! here with the current block still active, or seals the current block with
//! a diverging terminator and leaves no result. Callers that must produce a
//! value regardless ask for a fresh temporary when the block is gone.
//!
//! Scope bookkeeping (drops, moves, split merges) lives in [`crate::scope`];
//! this module is the block/statement/result surface.

use crate::mir::*;
use crate::scope::{ScopeData, ScopeId, ScopeKind, ValState};
use opalc_hir::hir::{BindMode, Pattern};
use opalc_hir::resolver::{Item, LangItem, Resolve, StructFields, VariantData};
use opalc_hir::types::{GenericPath, Path, Type};
use opalc_util::{FxHashMap, Idx, IndexVec, Span, Symbol};

/// Internal invariant violation: the type checker let something through that
/// the lowering cannot represent. Panics with the span and a dump.
macro_rules! bug {
    ($sp:expr, $($arg:tt)*) => {{
        let sp: opalc_util::Span = $sp;
        panic!("lowering bug at {}:{}: {}", sp.line, sp.column, format!($($arg)*))
    }};
}

/// Assert an invariant the type checker should have guaranteed.
macro_rules! assert_bug {
    ($sp:expr, $cond:expr, $($arg:tt)*) => {
        if !$cond {
            bug!($sp, $($arg)*);
        }
    };
}

pub(crate) use {assert_bug, bug};

impl From<LValue> for RValue {
    fn from(lv: LValue) -> RValue {
        RValue::Use(lv)
    }
}

impl From<Constant> for RValue {
    fn from(c: Constant) -> RValue {
        RValue::Constant(c)
    }
}

/// CFG construction state for one function lowering.
pub struct MirBuilder<'a, R: Resolve> {
    resolver: &'a R,
    fcn: Function,
    current_block: Option<BlockId>,
    result: Option<RValue>,

    /// All scopes ever opened; never removed, addressed by stable id
    pub(crate) scopes: IndexVec<ScopeId, ScopeData>,
    /// The live scope nesting, innermost last
    pub(crate) scope_stack: Vec<ScopeId>,
    fcn_scope: ScopeId,

    /// Initialisation state per local, parallel to `fcn.locals`
    pub(crate) var_states: Vec<ValState>,
    /// Variable slots that live directly in an argument
    var_arg_map: FxHashMap<u32, u32>,
    /// Aliases installed by `ref` bindings and guard evaluation
    var_aliases: FxHashMap<u32, (BindMode, LValue)>,
    /// Number of named variable slots; locals beyond are temporaries
    n_vars: usize,
}

impl<'a, R: Resolve> MirBuilder<'a, R> {
    /// Set up a builder: locals 0..`locals.len()` are the declared variable
    /// slots, block 0 is created as the entry and made current, and the
    /// function scope is opened.
    pub fn new(
        resolver: &'a R,
        name: Symbol,
        ret_ty: Type,
        args: &'a [(Pattern, Type)],
        locals: &[Type],
        sp: Span,
    ) -> Self {
        let mut fcn = Function::new(
            name,
            args.iter().map(|(_, t)| t.clone()).collect(),
            ret_ty,
        );
        for ty in locals {
            fcn.locals.push(Local {
                ty: ty.clone(),
                span: sp,
                name: None,
            });
        }

        let mut scopes = IndexVec::new();
        let fcn_scope = scopes.push(ScopeData {
            span: sp,
            kind: ScopeKind::Owning {
                is_temporary: false,
                locals: Vec::new(),
            },
        });

        let mut builder = MirBuilder {
            resolver,
            fcn,
            current_block: None,
            result: None,
            scopes,
            scope_stack: vec![fcn_scope],
            fcn_scope,
            var_states: vec![ValState::Uninit; locals.len()],
            var_arg_map: FxHashMap::default(),
            var_aliases: FxHashMap::default(),
            n_vars: locals.len(),
        };

        let entry = builder.new_bb_unlinked();
        builder.current_block = Some(entry);

        // Simple `name: Type` arguments alias their variable slot straight to
        // the argument; everything else is destructured by the driver prelude.
        for (i, (pat, _ty)) in args.iter().enumerate() {
            if pat.is_simple_move_binding() {
                let slot = pat.binding.as_ref().unwrap().slot;
                builder.var_arg_map.insert(slot, i as u32);
                builder.define_variable(sp, slot);
                if (slot as usize) < builder.var_states.len() {
                    builder.var_states[slot as usize] = ValState::Init;
                }
            }
        }

        builder
    }

    pub fn resolver(&self) -> &'a R {
        self.resolver
    }

    pub fn fcn_scope(&self) -> ScopeId {
        self.fcn_scope
    }

    pub(crate) fn fcn_mut(&mut self) -> &mut Function {
        &mut self.fcn
    }

    pub fn local_count(&self) -> usize {
        self.fcn.locals.len()
    }

    pub fn variable_count(&self) -> usize {
        self.n_vars
    }

    /// Consume the builder, yielding the finished function.
    pub fn finish(self) -> Function {
        self.fcn
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    pub fn block_active(&self) -> bool {
        self.current_block.is_some()
    }

    /// Create a block with no predecessor wired yet.
    pub fn new_bb_unlinked(&mut self) -> BlockId {
        self.fcn.blocks.push(BasicBlock::new())
    }

    /// Create a block, jump the current block into it, and make it current.
    pub fn new_bb_linked(&mut self, sp: Span) -> BlockId {
        let bb = self.new_bb_unlinked();
        self.end_block(sp, Terminator::Goto(bb));
        self.set_cur_block(bb);
        bb
    }

    pub fn set_cur_block(&mut self, bb: BlockId) {
        assert!(
            self.current_block.is_none(),
            "set_cur_block with a block already active"
        );
        assert!(
            matches!(self.fcn.blocks[bb].terminator, Terminator::Incomplete),
            "set_cur_block on an already-terminated block"
        );
        self.current_block = Some(bb);
    }

    /// Suspend emission, remembering the open block for later.
    pub fn pause_cur_block(&mut self) -> BlockId {
        self.current_block
            .take()
            .expect("pause_cur_block with no active block")
    }

    /// Seal the current block.
    pub fn end_block(&mut self, sp: Span, term: Terminator) {
        let bb = match self.current_block.take() {
            Some(bb) => bb,
            None => bug!(sp, "end_block with no active block"),
        };
        assert_bug!(
            sp,
            matches!(self.fcn.blocks[bb].terminator, Terminator::Incomplete),
            "block {} terminated twice",
            bb
        );
        self.fcn.blocks[bb].terminator = term;
    }

    fn cur_block_mut(&mut self, sp: Span) -> &mut BasicBlock {
        match self.current_block {
            Some(bb) => &mut self.fcn.blocks[bb],
            None => bug!(sp, "statement emitted with no active block"),
        }
    }

    // ------------------------------------------------------------------
    // Locals and variables
    // ------------------------------------------------------------------

    /// Allocate a fresh temporary of the given type, owned by the innermost
    /// temporary scope.
    pub fn new_temporary(&mut self, sp: Span, ty: Type) -> LValue {
        let local = self.fcn.locals.push(Local {
            ty,
            span: sp,
            name: None,
        });
        self.var_states.push(ValState::Uninit);
        self.register_local_in_temp_scope(sp, local);
        LValue::new_local(local)
    }

    /// The place a variable slot names: its argument, or its local.
    pub fn get_variable(&self, sp: Span, slot: u32) -> LValue {
        assert_bug!(
            sp,
            (slot as usize) < self.n_vars,
            "variable slot {} out of range ({} declared)",
            slot,
            self.n_vars
        );
        match self.var_arg_map.get(&slot) {
            Some(&arg) => LValue::new_argument(arg),
            None => LValue::new_local(LocalId(slot)),
        }
    }

    pub fn add_variable_alias(&mut self, _sp: Span, slot: u32, mode: BindMode, lv: LValue) {
        self.var_aliases.insert(slot, (mode, lv));
    }

    pub fn get_variable_alias(&self, slot: u32) -> Option<&(BindMode, LValue)> {
        self.var_aliases.get(&slot)
    }

    pub fn remove_variable_alias(&mut self, slot: u32) {
        self.var_aliases.remove(&slot);
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Append an assignment. Non-copy places consumed by `src` are marked
    /// moved; a bare-local `dst` becomes initialised.
    pub fn push_stmt_assign(&mut self, sp: Span, dst: LValue, src: RValue) {
        self.push_stmt_assign_inner(sp, dst, src, true);
    }

    /// As `push_stmt_assign`, but codegen must not drop the old destination
    /// contents (writes into freshly allocated raw memory).
    pub fn push_stmt_assign_nodrop(&mut self, sp: Span, dst: LValue, src: RValue) {
        self.push_stmt_assign_inner(sp, dst, src, false);
    }

    fn push_stmt_assign_inner(&mut self, sp: Span, dst: LValue, src: RValue, drop_dst: bool) {
        self.mark_rvalue_moves(sp, &src);
        self.mark_value_assigned(sp, &dst);
        self.cur_block_mut(sp).statements.push(Statement::Assign {
            dst,
            src,
            drop_dst,
        });
    }

    pub fn push_stmt_drop(&mut self, sp: Span, val: LValue, kind: DropKind) {
        self.cur_block_mut(sp)
            .statements
            .push(Statement::Drop { val, kind });
    }

    pub fn push_stmt_asm(&mut self, sp: Span, asm: AsmStatement) {
        self.cur_block_mut(sp).statements.push(Statement::Asm(asm));
    }

    /// Record that `dst` now holds a value.
    pub fn mark_value_assigned(&mut self, _sp: Span, dst: &LValue) {
        if let Some(local) = dst.as_local() {
            self.var_states[local.index()] = ValState::Init;
        }
    }

    /// Record that a place was consumed. Copy types stay live.
    pub fn moved_lvalue(&mut self, sp: Span, lv: &LValue) {
        if let Some(local) = lv.as_local() {
            if !self.lvalue_is_copy(sp, lv) {
                self.var_states[local.index()] = ValState::Moved;
            }
        }
    }

    fn mark_rvalue_moves(&mut self, sp: Span, src: &RValue) {
        let mut moved: Vec<LValue> = Vec::new();
        let mut push_param = |p: &Param, out: &mut Vec<LValue>| {
            if let Param::LValue(lv) = p {
                out.push(lv.clone());
            }
        };
        match src {
            RValue::Use(lv) | RValue::Cast { val: lv, .. } => moved.push(lv.clone()),
            RValue::BinOp { lhs, rhs, .. } => {
                push_param(lhs, &mut moved);
                push_param(rhs, &mut moved);
            }
            RValue::UniOp { val, .. } => moved.push(val.clone()),
            RValue::MakeDst { ptr, meta } => {
                push_param(ptr, &mut moved);
                push_param(meta, &mut moved);
            }
            RValue::Tuple { vals } | RValue::Array { vals } => {
                for v in vals {
                    push_param(v, &mut moved);
                }
            }
            RValue::SizedArray { val, .. } => push_param(val, &mut moved),
            RValue::Struct { vals, .. } | RValue::EnumVariant { vals, .. } => {
                for v in vals {
                    push_param(v, &mut moved);
                }
            }
            RValue::UnionVariant { val, .. } => push_param(val, &mut moved),
            // Borrows and metadata reads observe without consuming
            RValue::Constant(_)
            | RValue::Borrow { .. }
            | RValue::DstMeta { .. }
            | RValue::DstPtr { .. } => {}
        }
        for lv in moved {
            self.moved_lvalue(sp, &lv);
        }
    }

    // ------------------------------------------------------------------
    // Result handoff
    // ------------------------------------------------------------------

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    pub fn set_result(&mut self, sp: Span, res: impl Into<RValue>) {
        assert_bug!(sp, self.block_active(), "result set with no active block");
        assert_bug!(sp, self.result.is_none(), "result set twice");
        self.result = Some(res.into());
    }

    /// Take the pending result.
    pub fn get_result(&mut self, sp: Span) -> RValue {
        match self.result.take() {
            Some(r) => r,
            None => bug!(sp, "result requested but none pending"),
        }
    }

    /// Take the result as a place, materialising into a temporary when it is
    /// not already one.
    pub fn get_result_in_lvalue(&mut self, sp: Span, ty: &Type) -> LValue {
        match self.get_result(sp) {
            RValue::Use(lv) => lv,
            other => {
                let tmp = self.new_temporary(sp, ty.clone());
                self.push_stmt_assign(sp, tmp.clone(), other);
                tmp
            }
        }
    }

    /// Take the result, requiring it to already be a place (assignment
    /// destinations).
    pub fn get_result_unwrap_lvalue(&mut self, sp: Span) -> LValue {
        match self.get_result(sp) {
            RValue::Use(lv) => lv,
            other => bug!(sp, "expected an lvalue result, got {:?}", other),
        }
    }

    /// Take the result as a Param: places and constants pass through, other
    /// rvalues are materialised.
    pub fn get_result_in_param(&mut self, sp: Span, ty: &Type) -> Param {
        match self.get_result(sp) {
            RValue::Use(lv) => Param::LValue(lv),
            RValue::Constant(c) => Param::Constant(c),
            other => {
                let tmp = self.new_temporary(sp, ty.clone());
                self.push_stmt_assign(sp, tmp.clone(), other);
                Param::LValue(tmp)
            }
        }
    }

    /// Place an rvalue into an lvalue: pass uses through, materialise the
    /// rest into a temporary.
    pub fn lvalue_or_temp(&mut self, sp: Span, ty: &Type, rv: RValue) -> LValue {
        match rv {
            RValue::Use(lv) => lv,
            other => {
                let tmp = self.new_temporary(sp, ty.clone());
                self.push_stmt_assign(sp, tmp.clone(), other);
                tmp
            }
        }
    }

    // ------------------------------------------------------------------
    // Types of places
    // ------------------------------------------------------------------

    /// Compute the type an lvalue holds, walking root then wrappers.
    pub fn lvalue_type(&self, sp: Span, lv: &LValue) -> Type {
        let mut cur = match &lv.root {
            LValueRoot::Return => self.fcn.ret_ty.clone(),
            LValueRoot::Argument(i) => self
                .fcn
                .args
                .get(*i as usize)
                .cloned()
                .unwrap_or_else(|| bug!(sp, "argument index {} out of range", i)),
            LValueRoot::Local(l) => match self.fcn.locals.get(*l) {
                Some(local) => local.ty.clone(),
                None => bug!(sp, "local {:?} out of range", l),
            },
            LValueRoot::Static(path) => match path.as_ref() {
                Path::Simple(gp) => match self.resolver.lookup(&gp.path) {
                    Some(Item::Static { ty }) => ty.clone(),
                    other => bug!(sp, "static {:?} resolves to {:?}", gp.path, other),
                },
                Path::UfcsKnown { .. } => bug!(sp, "UFCS static paths not lowered here"),
            },
        };
        // A pending Downcast selects a variant/union field for the next Field
        let mut variant: Option<u32> = None;

        for w in &lv.wrappers {
            match w {
                LValueWrapper::Deref => {
                    assert_bug!(sp, variant.is_none(), "deref through a downcast");
                    cur = match cur {
                        Type::Borrow(_, inner) | Type::Pointer(_, inner) => *inner,
                        Type::Path(ref gp) if self.is_owned_box_path(&gp.path) => {
                            gp.params.first().cloned().unwrap_or_else(|| {
                                bug!(sp, "owned box with no type parameter")
                            })
                        }
                        other => bug!(sp, "deref of non-pointer type {:?}", other),
                    };
                }
                LValueWrapper::Field(idx) => {
                    cur = self.field_type(sp, cur, variant.take(), *idx);
                }
                LValueWrapper::Downcast(v) => {
                    let gp = match &cur {
                        Type::Path(gp) => gp.clone(),
                        other => bug!(sp, "downcast of non-path type {:?}", other),
                    };
                    match self.resolver.lookup(&gp.path) {
                        // Enum downcast: the following Field projects into
                        // the selected variant's payload
                        Some(Item::Enum(_)) => variant = Some(*v),
                        // Union downcast selects the field itself
                        Some(Item::Union(u)) => {
                            cur = match u.fields.get(*v as usize) {
                                Some((_, t)) => t.substitute_generics(&gp.params),
                                None => {
                                    bug!(sp, "union field {} not present on {:?}", v, gp.path)
                                }
                            };
                        }
                        other => bug!(sp, "downcast of {:?} ({:?})", gp.path, other),
                    }
                }
                LValueWrapper::Index(_) => {
                    assert_bug!(sp, variant.is_none(), "index through a downcast");
                    cur = match cur {
                        Type::Array(inner, _) | Type::Slice(inner) => *inner,
                        other => bug!(sp, "indexing non-array type {:?}", other),
                    };
                }
            }
        }
        assert_bug!(sp, variant.is_none(), "dangling downcast in {:?}", lv);
        cur
    }

    fn field_type(&self, sp: Span, cur: Type, variant: Option<u32>, idx: u32) -> Type {
        match cur {
            Type::Tuple(ts) => ts
                .get(idx as usize)
                .cloned()
                .unwrap_or_else(|| bug!(sp, "tuple field {} out of range", idx)),
            // Patterns project array elements as static fields
            Type::Array(inner, _) | Type::Slice(inner) => *inner,
            Type::Path(gp) => {
                let item = match self.resolver.lookup(&gp.path) {
                    Some(item) => item,
                    None => bug!(sp, "unknown type path {:?}", gp.path),
                };
                let raw = match (item, variant) {
                    (Item::Struct(s), None) => match &s.fields {
                        StructFields::Tuple(tys) => tys.get(idx as usize).cloned(),
                        StructFields::Named(fields) => {
                            fields.get(idx as usize).map(|(_, t)| t.clone())
                        }
                        StructFields::Unit => None,
                    },
                    (Item::Enum(e), Some(v)) => {
                        match e.variants.get(v as usize).map(|var| &var.data) {
                            Some(VariantData::Tuple(tys)) => tys.get(idx as usize).cloned(),
                            Some(VariantData::Struct(fields)) => {
                                fields.get(idx as usize).map(|(_, t)| t.clone())
                            }
                            _ => None,
                        }
                    }
                    _ => None,
                };
                match raw {
                    Some(t) => t.substitute_generics(&gp.params),
                    None => bug!(
                        sp,
                        "field {} (variant {:?}) not present on {:?}",
                        idx,
                        variant,
                        gp.path
                    ),
                }
            }
            other => bug!(sp, "field access on non-aggregate type {:?}", other),
        }
    }

    /// Callback-style type inspection, the shape the visitor wants.
    pub fn with_val_type<T>(&self, sp: Span, lv: &LValue, f: impl FnOnce(&Type) -> T) -> T {
        let ty = self.lvalue_type(sp, lv);
        f(&ty)
    }

    pub fn lvalue_is_copy(&self, sp: Span, lv: &LValue) -> bool {
        let ty = self.lvalue_type(sp, lv);
        self.resolver.type_is_copy(&ty)
    }

    pub fn is_owned_box_path(&self, path: &opalc_hir::types::SimplePath) -> bool {
        self.resolver
            .lang_item(LangItem::OwnedBox)
            .map_or(false, |p| p == path)
    }

    pub fn is_type_owned_box(&self, ty: &Type) -> bool {
        matches!(ty, Type::Path(gp) if self.is_owned_box_path(&gp.path))
    }

    /// Get a pointer lvalue for the fat-pointer metadata read of `lv`.
    ///
    /// If the place is itself a deref, the pointer is right there; otherwise
    /// borrow it into a temporary.
    pub fn get_ptr_to_dst(&mut self, sp: Span, lv: &LValue) -> LValue {
        if let Some(LValueWrapper::Deref) = lv.wrappers.last() {
            let mut inner = lv.clone();
            inner.wrappers.pop();
            inner
        } else {
            let inner_ty = self.lvalue_type(sp, lv);
            let ref_ty = Type::borrow(opalc_hir::types::BorrowKind::Shared, inner_ty);
            let tmp = self.new_temporary(sp, ref_ty);
            self.push_stmt_assign(
                sp,
                tmp.clone(),
                RValue::Borrow {
                    kind: opalc_hir::types::BorrowKind::Shared,
                    val: lv.clone(),
                },
            );
            tmp
        }
    }

    /// All currently-initialised locals, innermost scopes included, in slot
    /// order. Snapshotted at generator yield points.
    pub fn get_active_locals(&self) -> Vec<(LocalId, DropKind)> {
        let mut out: Vec<(LocalId, DropKind)> = Vec::new();
        for id in &self.scope_stack {
            if let ScopeKind::Owning { locals, .. } = &self.scopes[*id].kind {
                for l in locals {
                    if self.var_states[l.index()] == ValState::Init {
                        out.push((*l, DropKind::Deep));
                    }
                }
            }
        }
        out.sort_by_key(|(l, _)| *l);
        out
    }

    /// Enum variant lookup through the resolver, shared by several visitors.
    pub fn enum_variant_index(&self, sp: Span, enum_path: &GenericPath, name: Symbol) -> u32 {
        match self.resolver.lookup(&enum_path.path) {
            Some(Item::Enum(e)) => match e.find_variant(name) {
                Some(idx) => idx as u32,
                None => bug!(sp, "variant {} not present on {:?}", name, enum_path.path),
            },
            other => bug!(sp, "{:?} is not an enum ({:?})", enum_path.path, other),
        }
    }
}

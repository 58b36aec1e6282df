//! Drop scopes.
//!
//! Scopes are the bookkeeping that makes every constructed value drop exactly
//! once on every exit path. They nest strictly LIFO during the HIR traversal;
//! rather than RAII handles unwinding in destructor order, all scopes live in
//! a flat vector owned by the builder and are addressed by stable [`ScopeId`]s.
//! "Early termination" (`break`/`continue`/`return`) walks the stack outward
//! from the innermost scope, emitting drops along the way, without popping
//! anything: control structure resumes where the early exit diverged.
//!
//! Scope kinds:
//! - variable scopes own named locals bound by patterns,
//! - temporary scopes own the temporaries of one expression or statement,
//! - loop scopes anchor break/continue early-termination,
//! - split scopes bracket a CFG diamond (if/match/short-circuit) and merge
//!   per-arm initialisation state at the join.

use crate::builder::{assert_bug, bug, MirBuilder};
use crate::mir::{DropKind, LocalId, RValue, Param, LValue};
use opalc_hir::resolver::Resolve;
use opalc_util::{define_idx, Idx, Span};

define_idx!(ScopeId, "scope");

/// Per-local initialisation state on the current path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValState {
    Uninit,
    Init,
    Moved,
}

#[derive(Debug, Clone)]
pub struct ScopeData {
    pub span: Span,
    pub kind: ScopeKind,
}

#[derive(Debug, Clone)]
pub enum ScopeKind {
    /// Variable scope (`is_temporary == false`) or temporary scope
    Owning {
        is_temporary: bool,
        /// Owned locals in definition order; dropped in reverse
        locals: Vec<LocalId>,
    },
    /// Break/continue anchor; owns nothing itself
    Loop,
    /// Join point over N arms
    Split {
        /// Initialisation state snapshot at split entry
        entry_states: Vec<ValState>,
        arms: Vec<SplitArm>,
    },
}

#[derive(Debug, Clone)]
pub struct SplitArm {
    pub reachable: bool,
    /// Full state snapshot at arm end
    pub states: Vec<ValState>,
}

impl<'a, R: Resolve> MirBuilder<'a, R> {
    // ------------------------------------------------------------------
    // Opening scopes
    // ------------------------------------------------------------------

    fn push_scope(&mut self, sp: Span, kind: ScopeKind) -> ScopeId {
        let id = self.scopes.push(ScopeData { span: sp, kind });
        self.scope_stack.push(id);
        id
    }

    /// Variable scope: will own pattern-bound locals.
    pub fn new_scope_var(&mut self, sp: Span) -> ScopeId {
        self.push_scope(
            sp,
            ScopeKind::Owning {
                is_temporary: false,
                locals: Vec::new(),
            },
        )
    }

    /// Temporary scope: owns the temporaries of one expression/statement.
    pub fn new_scope_temp(&mut self, sp: Span) -> ScopeId {
        self.push_scope(
            sp,
            ScopeKind::Owning {
                is_temporary: true,
                locals: Vec::new(),
            },
        )
    }

    /// Loop scope: anchor for break/continue early termination.
    pub fn new_scope_loop(&mut self, sp: Span) -> ScopeId {
        self.push_scope(sp, ScopeKind::Loop)
    }

    /// Split scope: snapshots state for the per-arm merge at the join.
    pub fn new_scope_split(&mut self, sp: Span) -> ScopeId {
        let entry_states = self.var_states.clone();
        self.push_scope(
            sp,
            ScopeKind::Split {
                entry_states,
                arms: Vec::new(),
            },
        )
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Bring a pattern-bound variable slot into the innermost variable scope.
    pub fn define_variable(&mut self, sp: Span, slot: u32) {
        let local = LocalId(slot);
        for id in self.scope_stack.iter().rev() {
            if let ScopeKind::Owning {
                is_temporary: false,
                locals,
            } = &mut self.scopes[*id].kind
            {
                if !locals.contains(&local) {
                    locals.push(local);
                }
                return;
            }
        }
        bug!(sp, "no variable scope open for slot {}", slot);
    }

    pub(crate) fn register_local_in_temp_scope(&mut self, sp: Span, local: LocalId) {
        for id in self.scope_stack.iter().rev() {
            if let ScopeKind::Owning {
                is_temporary: true,
                locals,
            } = &mut self.scopes[*id].kind
            {
                locals.push(local);
                return;
            }
        }
        // Before the root block opens its scopes, temporaries land in the
        // function scope
        let fcn_scope = self.fcn_scope();
        match &mut self.scopes[fcn_scope].kind {
            ScopeKind::Owning { locals, .. } => locals.push(local),
            _ => bug!(sp, "function scope is not an owning scope"),
        }
    }

    // ------------------------------------------------------------------
    // Closing scopes
    // ------------------------------------------------------------------

    /// Close the innermost scope, which must be `scope`. With `emit_cleanup`
    /// and an active block, live owned locals are dropped in reverse
    /// definition order. Split scopes merge their arms instead.
    pub fn terminate_scope(&mut self, sp: Span, scope: ScopeId, emit_cleanup: bool) {
        let top = match self.scope_stack.last() {
            Some(&top) => top,
            None => bug!(sp, "terminate_scope with empty scope stack"),
        };
        assert_bug!(
            sp,
            top == scope,
            "scope termination out of order: closing {:?} but {:?} is innermost",
            scope,
            top
        );

        match self.scopes[scope].kind.clone() {
            ScopeKind::Owning { locals, .. } => {
                if emit_cleanup && self.block_active() {
                    self.drop_scope_locals(sp, &locals);
                }
                for l in locals {
                    self.var_states[l.index()] = ValState::Uninit;
                }
            }
            ScopeKind::Loop => {}
            ScopeKind::Split { entry_states, arms } => {
                self.merge_split_arms(&entry_states, &arms);
            }
        }
        self.scope_stack.pop();
    }

    /// Seal the current arm of a split scope and reset state for the next.
    /// `scope` must be the innermost scope.
    pub fn end_split_arm(&mut self, sp: Span, scope: ScopeId, reachable: bool) {
        let top = self.scope_stack.last().copied();
        assert_bug!(
            sp,
            top == Some(scope),
            "end_split_arm: {:?} is not the innermost scope",
            scope
        );
        let states = self.var_states.clone();
        match &mut self.scopes[scope].kind {
            ScopeKind::Split { entry_states, arms } => {
                arms.push(SplitArm { reachable, states });
                // Next arm starts from the entry state; locals allocated
                // since entry default to uninitialised
                let mut reset = entry_states.clone();
                reset.resize(self.var_states.len(), ValState::Uninit);
                self.var_states = reset;
            }
            _ => bug!(sp, "end_split_arm on non-split scope {:?}", scope),
        }
    }

    fn merge_split_arms(&mut self, entry_states: &[ValState], arms: &[SplitArm]) {
        let reachable: Vec<&SplitArm> = arms.iter().filter(|a| a.reachable).collect();
        if reachable.is_empty() {
            // Join is unreachable; restore entry state
            let mut reset = entry_states.to_vec();
            reset.resize(self.var_states.len(), ValState::Uninit);
            self.var_states = reset;
            return;
        }
        let len = self.var_states.len();
        let get = |arm: &SplitArm, i: usize| {
            arm.states.get(i).copied().unwrap_or(ValState::Uninit)
        };
        for i in 0..len {
            let first = get(reachable[0], i);
            // Initialised only when initialised on every reachable arm;
            // anything mixed is conservatively uninitialised at the join
            self.var_states[i] = if reachable.iter().all(|a| get(a, i) == first) {
                first
            } else {
                ValState::Uninit
            };
        }
    }

    /// Emit drops for every scope from the innermost up to and including
    /// `scope`, without popping anything. Used by break/continue/return.
    pub fn terminate_scope_early(&mut self, sp: Span, scope: ScopeId) {
        assert_bug!(
            sp,
            self.block_active(),
            "early scope termination with no active block"
        );
        assert_bug!(
            sp,
            self.scope_stack.contains(&scope),
            "early termination target {:?} is not on the scope stack",
            scope
        );
        let mut to_drop: Vec<Vec<LocalId>> = Vec::new();
        for id in self.scope_stack.iter().rev() {
            if let ScopeKind::Owning { locals, .. } = &self.scopes[*id].kind {
                to_drop.push(locals.clone());
            }
            if *id == scope {
                break;
            }
        }
        for locals in to_drop {
            self.drop_scope_locals(sp, &locals);
        }
    }

    fn drop_scope_locals(&mut self, sp: Span, locals: &[LocalId]) {
        for l in locals.iter().rev() {
            if self.var_states[l.index()] == ValState::Init {
                let lv = self.local_place(*l);
                // Copy types have no destructor; emitting drops for them
                // would only be noise for later passes to elide
                if !self.lvalue_is_copy(sp, &lv) {
                    self.push_stmt_drop(sp, lv, DropKind::Deep);
                }
            }
        }
    }

    /// The place a scope-owned local names (variable slots may alias an
    /// argument).
    fn local_place(&self, local: LocalId) -> LValue {
        if local.index() < self.variable_count() {
            self.get_variable(Span::DUMMY, local.0)
        } else {
            LValue::new_local(local)
        }
    }

    // ------------------------------------------------------------------
    // Raising
    // ------------------------------------------------------------------

    /// Transfer ownership of the temporaries referenced by `lv` from their
    /// temporary scopes into `target`, extending their lifetime. Required
    /// when a borrow outlives the expression that produced its referent.
    pub fn raise_temporaries(&mut self, sp: Span, lv: &LValue, target: ScopeId) {
        let mut locals: Vec<LocalId> = Vec::new();
        if let Some(l) = lv.root_local() {
            locals.push(l);
        }
        for w in &lv.wrappers {
            if let crate::mir::LValueWrapper::Index(l) = w {
                locals.push(*l);
            }
        }
        for l in locals {
            self.raise_local(sp, l, target);
        }
    }

    /// Raise every temporary referenced anywhere in an rvalue.
    pub fn raise_temporaries_in_rvalue(&mut self, sp: Span, rv: &RValue, target: ScopeId) {
        let mut lvs: Vec<LValue> = Vec::new();
        let mut push_param = |p: &Param, out: &mut Vec<LValue>| {
            if let Param::LValue(lv) = p {
                out.push(lv.clone());
            }
        };
        match rv {
            RValue::Use(lv)
            | RValue::Borrow { val: lv, .. }
            | RValue::Cast { val: lv, .. }
            | RValue::UniOp { val: lv, .. }
            | RValue::DstMeta { val: lv }
            | RValue::DstPtr { val: lv } => lvs.push(lv.clone()),
            RValue::BinOp { lhs, rhs, .. } => {
                push_param(lhs, &mut lvs);
                push_param(rhs, &mut lvs);
            }
            RValue::MakeDst { ptr, meta } => {
                push_param(ptr, &mut lvs);
                push_param(meta, &mut lvs);
            }
            RValue::Tuple { vals }
            | RValue::Array { vals }
            | RValue::Struct { vals, .. }
            | RValue::EnumVariant { vals, .. } => {
                for v in vals {
                    push_param(v, &mut lvs);
                }
            }
            RValue::SizedArray { val, .. } | RValue::UnionVariant { val, .. } => {
                push_param(val, &mut lvs)
            }
            RValue::Constant(_) => {}
        }
        for lv in lvs {
            self.raise_temporaries(sp, &lv, target);
        }
    }

    fn raise_local(&mut self, sp: Span, local: LocalId, target: ScopeId) {
        // Walk inward-out; stop at the target scope
        let stack = self.scope_stack.clone();
        for id in stack.iter().rev() {
            if *id == target {
                return;
            }
            let mut found = false;
            if let ScopeKind::Owning { locals, .. } = &mut self.scopes[*id].kind {
                if let Some(pos) = locals.iter().position(|l| *l == local) {
                    locals.remove(pos);
                    found = true;
                }
            }
            if found {
                match &mut self.scopes[target].kind {
                    ScopeKind::Owning { locals, .. } => locals.push(local),
                    _ => bug!(sp, "raise target {:?} is not an owning scope", target),
                }
                return;
            }
        }
    }

    /// Move every local owned by `from` (which must be innermost) into `to`,
    /// then discard `from`. Used to extend a block tail's temporaries to the
    /// enclosing statement.
    pub fn raise_all(&mut self, sp: Span, from: ScopeId, to: ScopeId) {
        let top = self.scope_stack.last().copied();
        assert_bug!(
            sp,
            top == Some(from),
            "raise_all: {:?} is not the innermost scope",
            from
        );
        let moved = match &mut self.scopes[from].kind {
            ScopeKind::Owning { locals, .. } => std::mem::take(locals),
            _ => bug!(sp, "raise_all from non-owning scope {:?}", from),
        };
        match &mut self.scopes[to].kind {
            ScopeKind::Owning { locals, .. } => locals.extend(moved),
            _ => bug!(sp, "raise_all target {:?} is not an owning scope", to),
        }
        self.scope_stack.pop();
    }

    /// Would closing any of these scopes right now emit a drop? Used to
    /// decide whether a block result can be forwarded raw or must be parked
    /// in a result slot before the scope drops run.
    pub fn scope_has_pending_drops(&self, scopes: &[ScopeId]) -> bool {
        scopes.iter().any(|id| match &self.scopes[*id].kind {
            ScopeKind::Owning { locals, .. } => locals.iter().any(|l| {
                self.var_states[l.index()] == ValState::Init
                    && !self.lvalue_is_copy(Span::DUMMY, &self.local_place(*l))
            }),
            _ => false,
        })
    }

    /// The scope immediately enclosing `scope` on the stack.
    pub fn scope_above(&self, sp: Span, scope: ScopeId) -> ScopeId {
        match self.scope_stack.iter().position(|s| *s == scope) {
            Some(0) | None => bug!(sp, "no scope above {:?}", scope),
            Some(pos) => self.scope_stack[pos - 1],
        }
    }

    /// The nearest owning scope strictly enclosing `scope`; raise targets
    /// must own locals, so loop/split scopes in between are skipped.
    pub fn owning_scope_above(&self, sp: Span, scope: ScopeId) -> ScopeId {
        let pos = match self.scope_stack.iter().position(|s| *s == scope) {
            Some(p) => p,
            None => bug!(sp, "{:?} is not on the scope stack", scope),
        };
        for id in self.scope_stack[..pos].iter().rev() {
            if matches!(self.scopes[*id].kind, ScopeKind::Owning { .. }) {
                return *id;
            }
        }
        bug!(sp, "no owning scope above {:?}", scope)
    }

    /// End-of-function cleanup: drop the function scope's live locals and
    /// seal with `Return` if control still flows.
    pub fn final_cleanup(&mut self, sp: Span) {
        let fcn_scope = self.fcn_scope();
        if self.block_active() {
            self.terminate_scope(sp, fcn_scope, true);
            self.end_block(sp, crate::mir::Terminator::Return);
        } else {
            self.terminate_scope(sp, fcn_scope, false);
        }
    }
}

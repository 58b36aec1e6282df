//! MIR validation.
//!
//! A single pass over a finished function checks the structural invariants:
//! every block is sealed, every block reference and local index is in range,
//! and every call has a well-formed panic edge. Type agreement is checked by
//! [`validate_types`]: every assigned rvalue must have the type its
//! destination place holds. The optional full pass runs a forward
//! definitely-assigned dataflow and rejects reads of locals that are not
//! initialised on every incoming path.

use crate::mir::{
    BasicBlock, BlockId, CallTarget, Constant, Function, LValue, LValueRoot, LValueWrapper,
    LocalId, Param, RValue, Statement, Terminator,
};
use opalc_hir::resolver::{Item, Resolve, StructFields, VariantData};
use opalc_hir::types::{BorrowKind, CoreType, Path, Type};
use opalc_util::Idx;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidateError {
    #[error("block {0} is not terminated")]
    Unterminated(BlockId),
    #[error("block {block} references out-of-range block {target}")]
    BadBlockRef { block: BlockId, target: BlockId },
    #[error("block {block} references out-of-range local {local}")]
    BadLocalRef { block: BlockId, local: LocalId },
    #[error("call in {block} has panic target {target} that does not diverge")]
    BadPanicEdge { block: BlockId, target: BlockId },
    #[error("local {local} possibly read before assignment in {block}")]
    UseBeforeInit { block: BlockId, local: LocalId },
    #[error("assignment in {block}: place holds {dst:?} but the value is {src:?}")]
    TypeMismatch {
        block: BlockId,
        dst: Type,
        src: Type,
    },
}

/// Check the always-on structural invariants.
pub fn validate(fcn: &Function) -> Result<(), ValidateError> {
    let n_blocks = fcn.blocks.len();
    let n_locals = fcn.locals.len();

    for (id, block) in fcn.blocks.iter_enumerated() {
        if matches!(block.terminator, Terminator::Incomplete) {
            return Err(ValidateError::Unterminated(id));
        }
        for target in block.terminator.targets() {
            if target.index() >= n_blocks {
                return Err(ValidateError::BadBlockRef { block: id, target });
            }
        }
        for local in block_locals(block) {
            if local.index() >= n_locals {
                return Err(ValidateError::BadLocalRef { block: id, local });
            }
        }
        if let Terminator::Call { panic_block, .. } = &block.terminator {
            if panic_block.index() < n_blocks
                && !matches!(fcn.blocks[*panic_block].terminator, Terminator::Diverge)
            {
                return Err(ValidateError::BadPanicEdge {
                    block: id,
                    target: *panic_block,
                });
            }
        }
    }
    Ok(())
}

/// Type agreement: every `Assign` stores a value of the type its destination
/// holds.
///
/// Both sides are typed conservatively: a position whose type cannot be
/// named from the function and item table alone (opaque constants,
/// fat-pointer construction, unresolved paths) is skipped rather than
/// guessed, so the check never rejects well-typed MIR it cannot see through.
/// Call results are typed by the callee's signature and stay out of scope
/// here.
pub fn validate_types<R: Resolve>(fcn: &Function, resolver: &R) -> Result<(), ValidateError> {
    for (id, block) in fcn.blocks.iter_enumerated() {
        for stmt in &block.statements {
            if let Statement::Assign { dst, src, .. } = stmt {
                let dst_ty = match lvalue_type_of(fcn, resolver, dst) {
                    Some(t) => t,
                    None => continue,
                };
                let src_ty = match rvalue_type_of(fcn, resolver, src) {
                    Some(t) => t,
                    None => continue,
                };
                if dst_ty != src_ty {
                    return Err(ValidateError::TypeMismatch {
                        block: id,
                        dst: dst_ty,
                        src: src_ty,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Full initialisation-consistency check: a forward dataflow computing the
/// definitely-assigned set per block, intersected over predecessors.
pub fn validate_full(fcn: &Function) -> Result<(), ValidateError> {
    let n_locals = fcn.locals.len();
    let n_blocks = fcn.blocks.len();
    if n_blocks == 0 {
        return Ok(());
    }

    // `None` means "not yet reached"
    let mut ins: Vec<Option<Vec<bool>>> = vec![None; n_blocks];
    ins[0] = Some(vec![false; n_locals]);

    let mut changed = true;
    while changed {
        changed = false;
        for (id, block) in fcn.blocks.iter_enumerated() {
            let state_in = match &ins[id.index()] {
                Some(s) => s.clone(),
                None => continue,
            };
            let state_out = transfer(block, state_in);
            for succ in block.terminator.targets() {
                let slot = &mut ins[succ.index()];
                match slot {
                    None => {
                        *slot = Some(state_out.clone());
                        changed = true;
                    }
                    Some(existing) => {
                        for (e, o) in existing.iter_mut().zip(&state_out) {
                            if *e && !*o {
                                *e = false;
                                changed = true;
                            }
                        }
                    }
                }
            }
        }
    }

    // Checking pass over reachable blocks
    for (id, block) in fcn.blocks.iter_enumerated() {
        let mut state = match &ins[id.index()] {
            Some(s) => s.clone(),
            None => continue,
        };
        for stmt in &block.statements {
            for local in stmt_reads(stmt) {
                if !state[local.index()] {
                    return Err(ValidateError::UseBeforeInit { block: id, local });
                }
            }
            apply_stmt_writes(stmt, &mut state);
        }
        for local in terminator_reads(&block.terminator) {
            if !state[local.index()] {
                return Err(ValidateError::UseBeforeInit { block: id, local });
            }
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Type recovery for the agreement check
// ----------------------------------------------------------------------

/// The type a place holds, or `None` when the walk leaves what the function
/// and item table can name.
fn lvalue_type_of<R: Resolve>(fcn: &Function, resolver: &R, lv: &LValue) -> Option<Type> {
    let mut cur = match &lv.root {
        LValueRoot::Return => fcn.ret_ty.clone(),
        LValueRoot::Argument(i) => fcn.args.get(*i as usize)?.clone(),
        LValueRoot::Local(l) => fcn.locals.get(*l)?.ty.clone(),
        LValueRoot::Static(path) => match path.as_ref() {
            Path::Simple(gp) => match resolver.lookup(&gp.path)? {
                Item::Static { ty } => ty.clone(),
                _ => return None,
            },
            Path::UfcsKnown { .. } => return None,
        },
    };
    // A pending enum downcast selects the variant for the next Field
    let mut variant: Option<u32> = None;

    for w in &lv.wrappers {
        match w {
            LValueWrapper::Deref => {
                if variant.is_some() {
                    return None;
                }
                cur = match cur {
                    Type::Borrow(_, inner) | Type::Pointer(_, inner) => *inner,
                    Type::Path(ref gp)
                        if resolver
                            .lang_item(opalc_hir::resolver::LangItem::OwnedBox)
                            .map_or(false, |p| *p == gp.path) =>
                    {
                        gp.params.first()?.clone()
                    }
                    _ => return None,
                };
            }
            LValueWrapper::Field(idx) => {
                cur = field_type_of(resolver, cur, variant.take(), *idx)?;
            }
            LValueWrapper::Downcast(v) => {
                let gp = match &cur {
                    Type::Path(gp) => gp.clone(),
                    _ => return None,
                };
                match resolver.lookup(&gp.path)? {
                    Item::Enum(_) => variant = Some(*v),
                    Item::Union(u) => {
                        let (_, t) = u.fields.get(*v as usize)?;
                        cur = t.substitute_generics(&gp.params);
                    }
                    _ => return None,
                }
            }
            LValueWrapper::Index(_) => {
                if variant.is_some() {
                    return None;
                }
                cur = match cur {
                    Type::Array(inner, _) | Type::Slice(inner) => *inner,
                    _ => return None,
                };
            }
        }
    }
    if variant.is_some() {
        return None;
    }
    Some(cur)
}

fn field_type_of<R: Resolve>(
    resolver: &R,
    cur: Type,
    variant: Option<u32>,
    idx: u32,
) -> Option<Type> {
    match cur {
        Type::Tuple(ts) => ts.get(idx as usize).cloned(),
        // Patterns project array elements as static fields
        Type::Array(inner, _) | Type::Slice(inner) => Some(*inner),
        Type::Path(gp) => {
            let raw = match (resolver.lookup(&gp.path)?, variant) {
                (Item::Struct(s), None) => match &s.fields {
                    StructFields::Tuple(tys) => tys.get(idx as usize).cloned(),
                    StructFields::Named(fields) => {
                        fields.get(idx as usize).map(|(_, t)| t.clone())
                    }
                    StructFields::Unit => None,
                },
                (Item::Enum(e), Some(v)) => match e.variants.get(v as usize).map(|var| &var.data)
                {
                    Some(VariantData::Tuple(tys)) => tys.get(idx as usize).cloned(),
                    Some(VariantData::Struct(fields)) => {
                        fields.get(idx as usize).map(|(_, t)| t.clone())
                    }
                    _ => None,
                },
                _ => None,
            };
            raw.map(|t| t.substitute_generics(&gp.params))
        }
        _ => None,
    }
}

/// Constants whose type is intrinsic to the value. Item addresses, named
/// consts, and const generics need context this pass does not have.
fn constant_type_of(c: &Constant) -> Option<Type> {
    match c {
        Constant::Int { ty, .. } | Constant::Uint { ty, .. } | Constant::Float { ty, .. } => {
            Some(Type::Primitive(*ty))
        }
        Constant::Bool(_) => Some(Type::Primitive(CoreType::Bool)),
        Constant::Str(_) => Some(Type::borrow(
            BorrowKind::Shared,
            Type::Primitive(CoreType::Str),
        )),
        Constant::Bytes(_)
        | Constant::ItemAddr(_)
        | Constant::Const(_)
        | Constant::Generic { .. } => None,
    }
}

fn param_type_of<R: Resolve>(fcn: &Function, resolver: &R, p: &Param) -> Option<Type> {
    match p {
        Param::LValue(lv) => lvalue_type_of(fcn, resolver, lv),
        Param::Constant(c) => constant_type_of(c),
    }
}

fn rvalue_type_of<R: Resolve>(fcn: &Function, resolver: &R, rv: &RValue) -> Option<Type> {
    match rv {
        RValue::Use(lv) => lvalue_type_of(fcn, resolver, lv),
        RValue::Constant(c) => constant_type_of(c),
        RValue::Borrow { kind, val } => {
            Some(Type::borrow(*kind, lvalue_type_of(fcn, resolver, val)?))
        }
        RValue::Cast { ty, .. } => Some(ty.clone()),
        RValue::BinOp { lhs, op, .. } => {
            use crate::mir::BinOp::*;
            match op {
                Eq | Ne | Lt | Le | Gt | Ge => Some(Type::Primitive(CoreType::Bool)),
                // Arithmetic, bitwise, and shifts yield the left operand type
                _ => param_type_of(fcn, resolver, lhs),
            }
        }
        RValue::UniOp { val, .. } => lvalue_type_of(fcn, resolver, val),
        RValue::DstMeta { .. } => Some(Type::Primitive(CoreType::Usize)),
        // The fat-pointer halves depend on the destination's DST
        RValue::DstPtr { .. } | RValue::MakeDst { .. } => None,
        RValue::Tuple { vals } => {
            let mut tys = Vec::with_capacity(vals.len());
            for v in vals {
                tys.push(param_type_of(fcn, resolver, v)?);
            }
            Some(Type::Tuple(tys))
        }
        RValue::Array { vals } => {
            let elem = param_type_of(fcn, resolver, vals.first()?)?;
            Some(Type::Array(
                Box::new(elem),
                opalc_hir::types::ArraySize::Known(vals.len() as u64),
            ))
        }
        RValue::SizedArray { val, count } => {
            let elem = param_type_of(fcn, resolver, val)?;
            Some(Type::Array(
                Box::new(elem),
                opalc_hir::types::ArraySize::Known(*count),
            ))
        }
        RValue::Struct { path, .. }
        | RValue::EnumVariant { path, .. }
        | RValue::UnionVariant { path, .. } => Some(Type::Path(path.clone())),
    }
}

// ----------------------------------------------------------------------
// Dataflow plumbing
// ----------------------------------------------------------------------

fn transfer(block: &BasicBlock, mut state: Vec<bool>) -> Vec<bool> {
    for stmt in &block.statements {
        apply_stmt_writes(stmt, &mut state);
    }
    if let Terminator::Call { result, .. } = &block.terminator {
        if let Some(l) = result.as_local() {
            state[l.index()] = true;
        }
    }
    state
}

fn apply_stmt_writes(stmt: &Statement, state: &mut [bool]) {
    if let Statement::Assign { dst, .. } = stmt {
        if let Some(l) = dst.as_local() {
            state[l.index()] = true;
        }
    }
}

fn lvalue_locals(lv: &LValue, out: &mut Vec<LocalId>) {
    if let LValueRoot::Local(l) = lv.root {
        out.push(l);
    }
    for w in &lv.wrappers {
        if let LValueWrapper::Index(l) = w {
            out.push(*l);
        }
    }
}

fn param_locals(p: &Param, out: &mut Vec<LocalId>) {
    if let Param::LValue(lv) = p {
        lvalue_locals(lv, out);
    }
}

fn rvalue_locals(rv: &RValue, out: &mut Vec<LocalId>) {
    match rv {
        RValue::Use(lv)
        | RValue::Borrow { val: lv, .. }
        | RValue::Cast { val: lv, .. }
        | RValue::UniOp { val: lv, .. }
        | RValue::DstMeta { val: lv }
        | RValue::DstPtr { val: lv } => lvalue_locals(lv, out),
        RValue::BinOp { lhs, rhs, .. } => {
            param_locals(lhs, out);
            param_locals(rhs, out);
        }
        RValue::MakeDst { ptr, meta } => {
            param_locals(ptr, out);
            param_locals(meta, out);
        }
        RValue::Tuple { vals }
        | RValue::Array { vals }
        | RValue::Struct { vals, .. }
        | RValue::EnumVariant { vals, .. } => {
            for v in vals {
                param_locals(v, out);
            }
        }
        RValue::SizedArray { val, .. } | RValue::UnionVariant { val, .. } => {
            param_locals(val, out)
        }
        RValue::Constant(_) => {}
    }
}

/// Locals a statement reads. A projected write reads its own base.
fn stmt_reads(stmt: &Statement) -> Vec<LocalId> {
    let mut out = Vec::new();
    match stmt {
        Statement::Assign { dst, src, .. } => {
            rvalue_locals(src, &mut out);
            if !dst.wrappers.is_empty() {
                lvalue_locals(dst, &mut out);
            }
        }
        Statement::Drop { val, .. } => lvalue_locals(val, &mut out),
        Statement::Asm(asm) => {
            for (_, lv) in &asm.inputs {
                lvalue_locals(lv, &mut out);
            }
            for (_, lv) in &asm.outputs {
                if !lv.wrappers.is_empty() {
                    lvalue_locals(lv, &mut out);
                }
            }
        }
    }
    out
}

fn terminator_reads(term: &Terminator) -> Vec<LocalId> {
    let mut out = Vec::new();
    match term {
        Terminator::If { cond, .. } => lvalue_locals(cond, &mut out),
        Terminator::Switch { val, .. } | Terminator::SwitchValue { val, .. } => {
            lvalue_locals(val, &mut out)
        }
        Terminator::Call { target, args, result, .. } => {
            if let CallTarget::Value(lv) = target {
                lvalue_locals(lv, &mut out);
            }
            for a in args {
                param_locals(a, &mut out);
            }
            if !result.wrappers.is_empty() {
                lvalue_locals(result, &mut out);
            }
        }
        Terminator::Incomplete
        | Terminator::Return
        | Terminator::Diverge
        | Terminator::Goto(_) => {}
    }
    out
}

/// Every local mentioned anywhere in a block.
fn block_locals(block: &BasicBlock) -> Vec<LocalId> {
    let mut out = Vec::new();
    for stmt in &block.statements {
        match stmt {
            Statement::Assign { dst, src, .. } => {
                lvalue_locals(dst, &mut out);
                rvalue_locals(src, &mut out);
            }
            Statement::Drop { val, .. } => lvalue_locals(val, &mut out),
            Statement::Asm(asm) => {
                for (_, lv) in &asm.outputs {
                    lvalue_locals(lv, &mut out);
                }
                for (_, lv) in &asm.inputs {
                    lvalue_locals(lv, &mut out);
                }
            }
        }
    }
    match &block.terminator {
        Terminator::If { cond, .. } => lvalue_locals(cond, &mut out),
        Terminator::Switch { val, .. } | Terminator::SwitchValue { val, .. } => {
            lvalue_locals(val, &mut out)
        }
        Terminator::Call { result, target, args, .. } => {
            lvalue_locals(result, &mut out);
            if let CallTarget::Value(lv) = target {
                lvalue_locals(lv, &mut out);
            }
            for a in args {
                param_locals(a, &mut out);
            }
        }
        _ => {}
    }
    out
}

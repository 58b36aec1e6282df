//! Pattern destructuring.
//!
//! Given a pattern and a source place, emit the assignments that bind every
//! named variable. Structural *testing* of refutable patterns is the match
//! lowering's job; this module only projects and binds, and it rejects
//! refutable constructs when the context promised irrefutability.

use crate::builder::{assert_bug, bug};
use crate::lower::expr::ExprVisitor;
use crate::lower::{LowerError, LowerErrorKind, LowerResult};
use crate::mir::{BinOp, Constant, LValue, Param, RValue};
use opalc_hir::hir::{BindMode, PatBinding, PatKind, Pattern};
use opalc_hir::resolver::{Item, Resolve, VariantData};
use opalc_hir::types::{ArraySize, BorrowKind, CoreType, GenericPath, Type};
use opalc_util::Span;

/// Refutability of the destructure context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AllowRefutable {
    No,
    Yes,
    /// Refutable constructs allowed, bindings are a caller bug
    NoBindings,
    /// Process the structure, skip the bindings (first pass of
    /// binding-and-matching patterns)
    IgnoreBindings,
}

/// What to do when a binding is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindTarget {
    /// Assign the bound place (or a borrow of it) into the variable
    Assign,
    /// Install an alias so guard evaluation sees the place without moving
    Alias,
}

impl<'a, R: Resolve> ExprVisitor<'a, R> {
    /// Bring every variable named by `pat` into the innermost variable scope.
    pub(crate) fn define_vars_from(&mut self, sp: Span, pat: &Pattern) {
        if let Some(b) = &pat.binding {
            self.builder.define_variable(sp, b.slot);
        }
        match &pat.kind {
            PatKind::Any | PatKind::PathValue { .. } | PatKind::Value(_) | PatKind::Range { .. } => {}
            PatKind::Ref(sub) => self.define_vars_from(sp, sub),
            PatKind::Tuple(subs) | PatKind::PathTuple { pats: subs, .. } | PatKind::Slice(subs) => {
                for sub in subs {
                    self.define_vars_from(sp, sub);
                }
            }
            PatKind::PathNamed { fields, .. } => {
                for (_, sub) in fields {
                    self.define_vars_from(sp, sub);
                }
            }
            PatKind::SplitSlice {
                leading,
                extra,
                trailing,
            } => {
                for sub in leading {
                    self.define_vars_from(sp, sub);
                }
                if let Some(b) = extra {
                    self.builder.define_variable(sp, b.slot);
                }
                for sub in trailing {
                    self.define_vars_from(sp, sub);
                }
            }
        }
    }

    /// Destructure `lval` according to `pat`, assigning every binding.
    pub(crate) fn destructure_from(
        &mut self,
        sp: Span,
        pat: &Pattern,
        lval: LValue,
        allow_refutable: bool,
    ) -> LowerResult {
        let allow = if allow_refutable {
            AllowRefutable::Yes
        } else {
            AllowRefutable::No
        };
        self.destructure_from_ex(sp, pat, lval, BindTarget::Assign, allow)
    }

    /// As `destructure_from`, but bindings become variable aliases instead of
    /// assignments. Used for guard evaluation, where nothing may move yet.
    pub(crate) fn destructure_aliases_from(
        &mut self,
        sp: Span,
        pat: &Pattern,
        lval: LValue,
    ) -> LowerResult {
        self.destructure_from_ex(sp, pat, lval, BindTarget::Alias, AllowRefutable::Yes)
    }

    fn emit_binding(
        &mut self,
        sp: Span,
        binding: &PatBinding,
        mut lval: LValue,
        target: BindTarget,
    ) {
        for _ in 0..binding.implicit_derefs {
            lval = lval.deref();
        }
        match target {
            BindTarget::Alias => {
                self.builder
                    .add_variable_alias(sp, binding.slot, binding.mode, lval);
            }
            BindTarget::Assign => {
                let rv = match binding.mode {
                    BindMode::Move => RValue::Use(lval),
                    BindMode::Ref | BindMode::MutRef => {
                        if let Some(raise_to) = self.borrow_raise_target {
                            log::trace!("raising destructure borrow of {:?}", lval);
                            self.builder.raise_temporaries(sp, &lval, raise_to);
                        }
                        RValue::Borrow {
                            kind: if binding.mode == BindMode::Ref {
                                BorrowKind::Shared
                            } else {
                                BorrowKind::Unique
                            },
                            val: lval,
                        }
                    }
                };
                let var = self.builder.get_variable(sp, binding.slot);
                self.builder.push_stmt_assign(sp, var, rv);
            }
        }
    }

    fn destructure_from_ex(
        &mut self,
        sp: Span,
        pat: &Pattern,
        mut lval: LValue,
        target: BindTarget,
        mut allow: AllowRefutable,
    ) -> LowerResult {
        log::trace!("destructure {:?} := {:?}", pat.kind, lval);

        if allow != AllowRefutable::IgnoreBindings {
            if let Some(binding) = &pat.binding {
                match allow {
                    AllowRefutable::NoBindings => {
                        bug!(sp, "binding present where none was expected")
                    }
                    AllowRefutable::No => {
                        assert_bug!(
                            sp,
                            matches!(pat.kind, PatKind::Any),
                            "irrefutable destructure cannot bind and match"
                        );
                    }
                    AllowRefutable::Yes => {
                        // Bind the whole value, then destructure the inside
                        self.destructure_from_ex(
                            sp,
                            pat,
                            lval.clone(),
                            target,
                            AllowRefutable::IgnoreBindings,
                        )?;
                    }
                    AllowRefutable::IgnoreBindings => unreachable!(),
                }
                self.emit_binding(sp, binding, lval, target);
                return Ok(());
            }
        }
        if allow == AllowRefutable::IgnoreBindings {
            allow = AllowRefutable::NoBindings;
        }

        for _ in 0..pat.implicit_derefs {
            lval = lval.deref();
        }

        match &pat.kind {
            PatKind::Any => Ok(()),
            PatKind::Ref(sub) => self.destructure_from_ex(sp, sub, lval.deref(), target, allow),
            PatKind::Tuple(subs) => {
                for (i, sub) in subs.iter().enumerate() {
                    self.destructure_from_ex(
                        sp,
                        sub,
                        lval.clone().field(i as u32),
                        target,
                        allow,
                    )?;
                }
                Ok(())
            }
            PatKind::PathValue { path } => {
                if let Some((enum_path, _idx)) = self.enum_variant_target(path) {
                    if allow == AllowRefutable::No {
                        self.check_other_variants_impossible(sp, &enum_path, path)?;
                    }
                }
                Ok(())
            }
            PatKind::PathTuple { path, pats } => {
                let fields: Vec<LValue>;
                if let Some((enum_path, idx)) = self.enum_variant_target(path) {
                    if allow == AllowRefutable::No {
                        self.check_other_variants_impossible(sp, &enum_path, path)?;
                    }
                    let base = lval.downcast(idx);
                    fields = (0..pats.len())
                        .map(|i| base.clone().field(i as u32))
                        .collect();
                } else {
                    fields = (0..pats.len())
                        .map(|i| lval.clone().field(i as u32))
                        .collect();
                }
                for (sub, fld) in pats.iter().zip(fields) {
                    self.destructure_from_ex(sp, sub, fld, target, allow)?;
                }
                Ok(())
            }
            PatKind::PathNamed { path, fields } => {
                let resolver = self.builder.resolver();
                let (base, decl): (LValue, Vec<opalc_util::Symbol>) =
                    if let Some((enum_path, idx)) = self.enum_variant_target(path) {
                        if allow == AllowRefutable::No {
                            self.check_other_variants_impossible(sp, &enum_path, path)?;
                        }
                        let names = match resolver.lookup(&enum_path.path) {
                            Some(Item::Enum(en)) => match &en.variants[idx as usize].data {
                                VariantData::Struct(fs) => {
                                    fs.iter().map(|(n, _)| *n).collect()
                                }
                                other => bug!(
                                    sp,
                                    "named destructure of non-struct variant ({:?})",
                                    other
                                ),
                            },
                            _ => unreachable!(),
                        };
                        (lval.downcast(idx), names)
                    } else {
                        let names = match resolver.lookup(&path.path) {
                            Some(Item::Struct(s)) => match &s.fields {
                                opalc_hir::resolver::StructFields::Named(fs) => {
                                    fs.iter().map(|(n, _)| *n).collect()
                                }
                                other => {
                                    bug!(sp, "named destructure of {:?} struct", other)
                                }
                            },
                            other => bug!(sp, "named destructure of {:?}", other),
                        };
                        (lval, names)
                    };
                for (name, sub) in fields {
                    let idx = match decl.iter().position(|n| n == name) {
                        Some(i) => i as u32,
                        None => {
                            return Err(LowerError::new(
                                sp,
                                LowerErrorKind::UnknownField(*name),
                            ))
                        }
                    };
                    self.destructure_from_ex(sp, sub, base.clone().field(idx), target, allow)?;
                }
                Ok(())
            }
            PatKind::Value(_) | PatKind::Range { .. } => {
                if allow == AllowRefutable::No {
                    return Err(LowerError::new(sp, LowerErrorKind::RefutablePattern));
                }
                // Value already tested by the match lowering; nothing to bind
                Ok(())
            }
            PatKind::Slice(subs) => {
                let is_array = self
                    .builder
                    .with_val_type(sp, &lval, |ty| matches!(ty, Type::Array(..)));
                if !is_array && allow == AllowRefutable::No {
                    return Err(LowerError::new(sp, LowerErrorKind::RefutablePattern));
                }
                // Size was checked statically (array) or by the match test
                // (slice); project elements directly either way
                for (i, sub) in subs.iter().enumerate() {
                    self.destructure_from_ex(
                        sp,
                        sub,
                        lval.clone().field(i as u32),
                        target,
                        allow,
                    )?;
                }
                Ok(())
            }
            PatKind::SplitSlice {
                leading,
                extra,
                trailing,
            } => self.destructure_split_slice(sp, leading, extra, trailing, lval, target, allow),
        }
    }

    fn destructure_split_slice(
        &mut self,
        sp: Span,
        leading: &[Pattern],
        extra: &Option<PatBinding>,
        trailing: &[Pattern],
        lval: LValue,
        target: BindTarget,
        allow: AllowRefutable,
    ) -> LowerResult {
        let (array_size, inner_type) = self.builder.with_val_type(sp, &lval, |ty| match ty {
            Type::Array(inner, ArraySize::Known(n)) => (Some(*n), (**inner).clone()),
            Type::Array(inner, _) => (None, (**inner).clone()),
            Type::Slice(inner) => (None, (**inner).clone()),
            other => bug!(sp, "slice destructure of {:?}", other),
        });

        if let Some(size) = array_size {
            assert_bug!(
                sp,
                size as usize >= leading.len() + trailing.len(),
                "array shorter than its split pattern"
            );
            for (i, sub) in leading.iter().enumerate() {
                self.destructure_from_ex(sp, sub, lval.clone().field(i as u32), target, allow)?;
            }
            if extra.is_some() {
                bug!(sp, "rest binding on a fixed-size array is not implemented");
            }
            for (i, sub) in trailing.iter().enumerate() {
                let idx = size as u32 - trailing.len() as u32 + i as u32;
                self.destructure_from_ex(sp, sub, lval.clone().field(idx), target, allow)?;
            }
            return Ok(());
        }

        if allow == AllowRefutable::No {
            return Err(LowerError::new(sp, LowerErrorKind::RefutablePattern));
        }

        let usize_ty = Type::Primitive(CoreType::Usize);

        // Runtime length, needed for the rest binding and trailing elements
        let len_lval = if extra.is_some() || !trailing.is_empty() {
            let ptr = self.builder.get_ptr_to_dst(sp, &lval);
            Some(
                self.builder
                    .lvalue_or_temp(sp, &usize_ty, RValue::DstMeta { val: ptr }),
            )
        } else {
            None
        };

        for (i, sub) in leading.iter().enumerate() {
            self.destructure_from_ex(sp, sub, lval.clone().field(i as u32), target, allow)?;
        }

        if let Some(bind) = extra {
            let bt = match bind.mode {
                BindMode::Move => bug!(sp, "by-value rest binding of a slice"),
                BindMode::Ref => BorrowKind::Shared,
                BindMode::MutRef => BorrowKind::Unique,
            };

            // Remaining length
            let sub_count = Constant::Uint {
                value: (leading.len() + trailing.len()) as u128,
                ty: CoreType::Usize,
            };
            let len_val = self.builder.lvalue_or_temp(
                sp,
                &usize_ty,
                RValue::BinOp {
                    lhs: Param::LValue(len_lval.clone().unwrap()),
                    op: BinOp::Sub,
                    rhs: Param::Constant(sub_count),
                },
            );

            // Pointer to the first element of the rest
            let ptr_val = self.builder.lvalue_or_temp(
                sp,
                &Type::borrow(bt, inner_type.clone()),
                RValue::Borrow {
                    kind: bt,
                    val: lval.clone().field(leading.len() as u32),
                },
            );

            let var = self.builder.get_variable(sp, bind.slot);
            self.builder.push_stmt_assign(
                sp,
                var,
                RValue::MakeDst {
                    ptr: Param::LValue(ptr_val),
                    meta: Param::LValue(len_val),
                },
            );
        }

        for (i, sub) in trailing.iter().enumerate() {
            // Dynamic index: len - (trailing.len() - i)
            let sub_count = Constant::Uint {
                value: (trailing.len() - i) as u128,
                ty: CoreType::Usize,
            };
            let ofs_val = self.builder.lvalue_or_temp(
                sp,
                &usize_ty,
                RValue::BinOp {
                    lhs: Param::LValue(len_lval.clone().unwrap()),
                    op: BinOp::Sub,
                    rhs: Param::Constant(sub_count),
                },
            );
            let ofs_local = match ofs_val.as_local() {
                Some(l) => l,
                None => bug!(sp, "length temporary is not a bare local"),
            };
            self.destructure_from_ex(
                sp,
                sub,
                lval.clone().index(ofs_local),
                target,
                allow,
            )?;
        }
        Ok(())
    }

    /// If `path` names an enum variant, its enum path and variant index.
    pub(crate) fn enum_variant_target(&self, path: &GenericPath) -> Option<(GenericPath, u32)> {
        let resolver = self.builder.resolver();
        // A direct struct path is not a variant
        if resolver.lookup(&path.path).is_some() {
            return None;
        }
        let parent = path.path.parent();
        if parent.components.is_empty() {
            return None;
        }
        match resolver.lookup(&parent) {
            Some(Item::Enum(en)) => en
                .find_variant(path.path.last())
                .map(|idx| (GenericPath::new(parent, path.params.clone()), idx as u32)),
            _ => None,
        }
    }

    /// Irrefutable enum destructure: every variant other than the matched one
    /// must be uninhabited.
    fn check_other_variants_impossible(
        &self,
        sp: Span,
        enum_path: &GenericPath,
        variant_path: &GenericPath,
    ) -> LowerResult {
        let resolver = self.builder.resolver();
        let en = match resolver.lookup(&enum_path.path) {
            Some(Item::Enum(en)) => en,
            other => bug!(sp, "{:?} is not an enum ({:?})", enum_path.path, other),
        };
        let matched = variant_path.path.last();
        for variant in &en.variants {
            if variant.name == matched {
                continue;
            }
            let impossible = match &variant.data {
                VariantData::Unit => false,
                VariantData::Tuple(tys) => tys.iter().any(|t| {
                    resolver.type_is_impossible(&t.substitute_generics(&enum_path.params))
                }),
                VariantData::Struct(fields) => fields.iter().any(|(_, t)| {
                    resolver.type_is_impossible(&t.substitute_generics(&enum_path.params))
                }),
            };
            if !impossible {
                return Err(LowerError::new(
                    sp,
                    LowerErrorKind::UnhandledVariant(variant.name),
                ));
            }
        }
        Ok(())
    }
}

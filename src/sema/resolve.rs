//! Declaration handling: scopes, storage classes, linkage, and tags.

use super::{Analyzer, VarBinding};
use crate::ast::{self, StorageClass, TypeSpec};
use crate::error::{CompileResult, ErrorKind, SourceLoc};
use crate::fx::FxHashSet;
use crate::sema::typed;
use crate::symbols::{Attrs, InitValue, StaticInit, SymbolData};
use crate::types::Type;

impl Analyzer<'_> {
    /// Resolve a source-spelled type against the visible structure tags.
    ///
    /// A `struct tag` specifier refers to the innermost visible declaration
    /// of the tag; an unseen tag is implicitly declared (incomplete) in the
    /// current scope. Completeness is not required here; uses that need a
    /// size check it themselves.
    pub(super) fn resolve_type(&mut self, spec: &TypeSpec, loc: SourceLoc) -> CompileResult<Type> {
        Ok(match spec {
            TypeSpec::Char => Type::Char,
            TypeSpec::SChar => Type::SChar,
            TypeSpec::UChar => Type::UChar,
            TypeSpec::Short => Type::Short,
            TypeSpec::UShort => Type::UShort,
            TypeSpec::Int => Type::Int,
            TypeSpec::UInt => Type::UInt,
            TypeSpec::Long => Type::Long,
            TypeSpec::ULong => Type::ULong,
            TypeSpec::Double => Type::Double,
            TypeSpec::Void => Type::Void,
            TypeSpec::Pointer(inner) => self.resolve_type(inner, loc)?.pointer_to(),
            TypeSpec::Array(elem, n) => {
                let elem = self.resolve_type(elem, loc)?;
                if matches!(elem, Type::Function(_) | Type::Void) {
                    return self.err(
                        ErrorKind::TypeMismatch,
                        loc,
                        "array of functions or of void",
                    );
                }
                elem.array_of(*n)
            }
            TypeSpec::Function { params, ret } => {
                let ret = self.resolve_type(ret, loc)?;
                if ret.is_array() {
                    return self.err(ErrorKind::TypeMismatch, loc, "function returning an array");
                }
                let mut ptys = Vec::with_capacity(params.len());
                for p in params {
                    let pty = self.resolve_type(p, loc)?;
                    // Array parameters adjust to pointers.
                    let pty = match pty {
                        Type::Array(elem, _) => Type::Pointer(elem),
                        Type::Void => {
                            return self.err(
                                ErrorKind::TypeMismatch,
                                loc,
                                "parameter has void type",
                            );
                        }
                        Type::Function(_) => {
                            return self.err(
                                ErrorKind::TypeMismatch,
                                loc,
                                "parameter has function type",
                            );
                        }
                        other => other,
                    };
                    ptys.push(pty);
                }
                Type::Function(Box::new(crate::types::FunType { params: ptys, ret }))
            }
            TypeSpec::Struct(tag) => {
                if let Some(&id) = self.tags.get(tag) {
                    Type::Struct(id)
                } else {
                    let id = self.types.declare(tag);
                    self.tags.insert(tag.clone(), id);
                    Type::Struct(id)
                }
            }
        })
    }

    /// Handle a structure declaration or definition.
    ///
    /// A bare `struct S;` (re)declares the tag in the current scope,
    /// shadowing any outer declaration without completing it. A definition
    /// additionally computes the member layout.
    pub(super) fn struct_decl(&mut self, d: &ast::StructDecl) -> CompileResult<()> {
        let id = match self.tags.get_in_current_scope(&d.tag) {
            Some(&id) => id,
            None => {
                let id = self.types.declare(&d.tag);
                self.tags.insert(d.tag.clone(), id);
                id
            }
        };
        if d.members.is_empty() {
            return Ok(());
        }
        let mut seen = FxHashSet::default();
        let mut members = Vec::with_capacity(d.members.len());
        for m in &d.members {
            if !seen.insert(m.name.as_str()) {
                return self.err(
                    ErrorKind::RedeclarationConflict,
                    d.loc,
                    format!("duplicate member `{}`", m.name),
                );
            }
            let ty = self.resolve_type(&m.ty, d.loc)?;
            if matches!(ty, Type::Function(_)) {
                return self.err(
                    ErrorKind::TypeMismatch,
                    d.loc,
                    format!("member `{}` has function type", m.name),
                );
            }
            if !ty.is_complete(self.types) {
                return self.err(
                    ErrorKind::IncompleteType,
                    d.loc,
                    format!("member `{}` has incomplete type", m.name),
                );
            }
            members.push((m.name.clone(), ty));
        }
        self.types.complete(id, members, d.loc)
    }

    /// Handle an object declaration at file scope.
    pub(super) fn file_scope_var(&mut self, d: &ast::VarDecl) -> CompileResult<()> {
        let ty = self.resolve_type(&d.ty, d.loc)?;
        if matches!(ty, Type::Function(_) | Type::Void) {
            return self.err(
                ErrorKind::TypeMismatch,
                d.loc,
                format!("`{}` declared with non-object type", d.name),
            );
        }
        // A definition (anything but an uninitialized extern declaration)
        // needs a size.
        if (d.init.is_some() || d.storage != Some(StorageClass::Extern))
            && !ty.is_complete(self.types)
        {
            return self.err(
                ErrorKind::IncompleteType,
                d.loc,
                format!("`{}` has incomplete type", d.name),
            );
        }
        let mut global = d.storage != Some(StorageClass::Static);
        let mut init = match &d.init {
            Some(i) => InitValue::Initialized(self.static_initializer(&ty, i, d.loc)?),
            None if d.storage == Some(StorageClass::Extern) => InitValue::None,
            None => InitValue::Tentative,
        };

        if let Some(&sym) = self.linked.get(&d.name) {
            let old = self.symbols[sym].clone();
            let (old_init, old_global) = match old.attrs {
                Attrs::Static { init, global } => (init, global),
                _ => {
                    return self.err(
                        ErrorKind::RedeclarationConflict,
                        d.loc,
                        format!("`{}` redeclared as a different kind of symbol", d.name),
                    );
                }
            };
            if old.ty != ty {
                return self.err(
                    ErrorKind::RedeclarationConflict,
                    d.loc,
                    format!("conflicting types for `{}`", d.name),
                );
            }
            if d.storage == Some(StorageClass::Extern) {
                global = old_global;
            } else if old_global != global {
                return self.err(
                    ErrorKind::LinkageConflict,
                    d.loc,
                    format!("conflicting linkage for `{}`", d.name),
                );
            }
            init = match (old_init, init) {
                (InitValue::Initialized(_), InitValue::Initialized(_)) => {
                    return self.err(
                        ErrorKind::RedeclarationConflict,
                        d.loc,
                        format!("multiple definitions of `{}`", d.name),
                    );
                }
                (InitValue::Initialized(v), _) | (_, InitValue::Initialized(v)) => {
                    InitValue::Initialized(v)
                }
                (InitValue::Tentative, _) | (_, InitValue::Tentative) => InitValue::Tentative,
                (InitValue::None, InitValue::None) => InitValue::None,
            };
            self.symbols[sym].attrs = Attrs::Static { init, global };
            self.vars
                .insert(d.name.clone(), VarBinding { sym, has_linkage: true });
        } else {
            let sym = self.symbols.add(SymbolData {
                name: d.name.clone(),
                ty,
                attrs: Attrs::Static { init, global },
                loc: d.loc,
            });
            self.linked.insert(d.name.clone(), sym);
            self.vars
                .insert(d.name.clone(), VarBinding { sym, has_linkage: true });
        }
        Ok(())
    }

    /// Handle an object declaration at block scope, returning a definition
    /// to lower when the object is automatic and initialized.
    pub(super) fn block_scope_var(
        &mut self,
        d: &ast::VarDecl,
    ) -> CompileResult<Option<typed::VarDef>> {
        let ty = self.resolve_type(&d.ty, d.loc)?;
        if matches!(ty, Type::Function(_) | Type::Void) {
            return self.err(
                ErrorKind::TypeMismatch,
                d.loc,
                format!("`{}` declared with non-object type", d.name),
            );
        }
        if let Some(prev) = self.vars.get_in_current_scope(&d.name).copied() {
            // Two declarations of one name in one scope are only compatible
            // when both have linkage.
            if !(prev.has_linkage && d.storage == Some(StorageClass::Extern)) {
                return self.err(
                    ErrorKind::RedeclarationConflict,
                    d.loc,
                    format!("conflicting declarations of `{}`", d.name),
                );
            }
        }
        match d.storage {
            Some(StorageClass::Extern) => {
                if d.init.is_some() {
                    return self.err(
                        ErrorKind::InvalidInitializer,
                        d.loc,
                        format!("initializer on block-scope `extern {}`", d.name),
                    );
                }
                let sym = if let Some(&sym) = self.linked.get(&d.name) {
                    let old = &self.symbols[sym];
                    if matches!(old.attrs, Attrs::Fun { .. }) {
                        return self.err(
                            ErrorKind::RedeclarationConflict,
                            d.loc,
                            format!("`{}` redeclared as a different kind of symbol", d.name),
                        );
                    }
                    if old.ty != ty {
                        return self.err(
                            ErrorKind::RedeclarationConflict,
                            d.loc,
                            format!("conflicting types for `{}`", d.name),
                        );
                    }
                    sym
                } else {
                    let sym = self.symbols.add(SymbolData {
                        name: d.name.clone(),
                        ty,
                        attrs: Attrs::Static {
                            init: InitValue::None,
                            global: true,
                        },
                        loc: d.loc,
                    });
                    self.linked.insert(d.name.clone(), sym);
                    sym
                };
                self.vars
                    .insert(d.name.clone(), VarBinding { sym, has_linkage: true });
                Ok(None)
            }
            Some(StorageClass::Static) => {
                if !ty.is_complete(self.types) {
                    return self.err(
                        ErrorKind::IncompleteType,
                        d.loc,
                        format!("`{}` has incomplete type", d.name),
                    );
                }
                let init = match &d.init {
                    Some(i) => self.static_initializer(&ty, i, d.loc)?,
                    None => vec![StaticInit::Zero(ty.size(self.types))],
                };
                let name = self.symbols.unique_name(&d.name);
                let sym = self.symbols.add(SymbolData {
                    name,
                    ty,
                    attrs: Attrs::Static {
                        init: InitValue::Initialized(init),
                        global: false,
                    },
                    loc: d.loc,
                });
                self.vars.insert(
                    d.name.clone(),
                    VarBinding {
                        sym,
                        has_linkage: false,
                    },
                );
                Ok(None)
            }
            None => {
                if !ty.is_complete(self.types) {
                    return self.err(
                        ErrorKind::IncompleteType,
                        d.loc,
                        format!("`{}` has incomplete type", d.name),
                    );
                }
                let name = self.symbols.unique_name(&d.name);
                let sym = self.symbols.add(SymbolData {
                    name,
                    ty: ty.clone(),
                    attrs: Attrs::Local,
                    loc: d.loc,
                });
                self.vars.insert(
                    d.name.clone(),
                    VarBinding {
                        sym,
                        has_linkage: false,
                    },
                );
                match &d.init {
                    Some(i) => {
                        let init = self.check_initializer(&ty, i)?;
                        Ok(Some(typed::VarDef { sym, init }))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Handle a function declaration or definition.
    pub(super) fn fun_decl(
        &mut self,
        d: &ast::FunDecl,
        at_block_scope: bool,
    ) -> CompileResult<Option<typed::FunDef>> {
        let ty = self.resolve_type(&d.ty, d.loc)?;
        let ft = match &ty {
            Type::Function(ft) => (**ft).clone(),
            _ => {
                return self.err(
                    ErrorKind::TypeMismatch,
                    d.loc,
                    format!("`{}` declared as a function without function type", d.name),
                );
            }
        };
        if at_block_scope && d.storage == Some(StorageClass::Static) {
            return self.err(
                ErrorKind::LinkageConflict,
                d.loc,
                format!("block-scope declaration of `{}` cannot be static", d.name),
            );
        }
        if at_block_scope && d.body.is_some() {
            return self.err(
                ErrorKind::TypeMismatch,
                d.loc,
                "nested function definitions are not permitted",
            );
        }
        if let Some(prev) = self.vars.get_in_current_scope(&d.name).copied() {
            if !prev.has_linkage {
                return self.err(
                    ErrorKind::RedeclarationConflict,
                    d.loc,
                    format!("conflicting declarations of `{}`", d.name),
                );
            }
        }
        let has_body = d.body.is_some();
        let mut global = d.storage != Some(StorageClass::Static);

        let sym = if let Some(&sym) = self.linked.get(&d.name) {
            let old = self.symbols[sym].clone();
            let (old_defined, old_global) = match old.attrs {
                Attrs::Fun { defined, global } => (defined, global),
                _ => {
                    return self.err(
                        ErrorKind::RedeclarationConflict,
                        d.loc,
                        format!("`{}` redeclared as a different kind of symbol", d.name),
                    );
                }
            };
            if old.ty != ty {
                return self.err(
                    ErrorKind::RedeclarationConflict,
                    d.loc,
                    format!("conflicting types for `{}`", d.name),
                );
            }
            if old_defined && has_body {
                return self.err(
                    ErrorKind::RedeclarationConflict,
                    d.loc,
                    format!("redefinition of `{}`", d.name),
                );
            }
            if d.storage == Some(StorageClass::Static) && old_global {
                return self.err(
                    ErrorKind::LinkageConflict,
                    d.loc,
                    format!("static declaration of `{}` follows non-static", d.name),
                );
            }
            global = old_global;
            self.symbols[sym].attrs = Attrs::Fun {
                defined: old_defined || has_body,
                global,
            };
            sym
        } else {
            let sym = self.symbols.add(SymbolData {
                name: d.name.clone(),
                ty: ty.clone(),
                attrs: Attrs::Fun {
                    defined: has_body,
                    global,
                },
                loc: d.loc,
            });
            self.linked.insert(d.name.clone(), sym);
            sym
        };
        self.vars
            .insert(d.name.clone(), VarBinding { sym, has_linkage: true });

        let Some(body) = &d.body else {
            return Ok(None);
        };

        // A definition requires complete parameter and return types.
        for pty in &ft.params {
            if !pty.is_complete(self.types) {
                return self.err(
                    ErrorKind::IncompleteType,
                    d.loc,
                    format!("parameter of `{}` has incomplete type", d.name),
                );
            }
        }
        if ft.ret != Type::Void && !ft.ret.is_complete(self.types) {
            return self.err(
                ErrorKind::IncompleteType,
                d.loc,
                format!("`{}` returns an incomplete type", d.name),
            );
        }
        debug_assert_eq!(d.params.len(), ft.params.len());

        self.current_ret = Some(ft.ret.clone());
        self.labels.clear();
        self.gotos.clear();
        self.vars.push_scope();
        self.tags.push_scope();

        // The scopes must be released on every exit path, error included.
        let result = (|| {
            let mut params = Vec::with_capacity(d.params.len());
            for (pname, pty) in d.params.iter().zip(&ft.params) {
                if self.vars.get_in_current_scope(pname).is_some() {
                    return self.err(
                        ErrorKind::RedeclarationConflict,
                        d.loc,
                        format!("duplicate parameter `{pname}`"),
                    );
                }
                let uname = self.symbols.unique_name(pname);
                let psym = self.symbols.add(SymbolData {
                    name: uname,
                    ty: pty.clone(),
                    attrs: Attrs::Local,
                    loc: d.loc,
                });
                self.vars.insert(
                    pname.clone(),
                    VarBinding {
                        sym: psym,
                        has_linkage: false,
                    },
                );
                params.push(psym);
            }
            // The body's items share the parameter scope.
            let body = self.check_block_items(&body.items)?;
            Ok((params, body))
        })();

        self.vars.pop_scope();
        self.tags.pop_scope();
        self.current_ret = None;
        let (params, body) = result?;

        for (label, loc) in core::mem::take(&mut self.gotos) {
            if !self.labels.contains(&label) {
                return self.err(
                    ErrorKind::Undeclared,
                    loc,
                    format!("use of undeclared label `{label}`"),
                );
            }
        }

        Ok(Some(typed::FunDef { sym, params, body }))
    }
}

//! Recursive-descent parser for the C subset.
//!
//! Input is the flat token vector from the lexer; output is a list of
//! function definitions plus top-level declaration statements. The parser
//! performs no semantic interpretation except the one C requires of it:
//! deciding whether an identifier names a typedef, which it does by
//! consulting the symbol table plus the typedefs seen earlier in this
//! translation unit. On the first unexpected token it stops and reports
//! the position together with what it expected.

use crate::ast::{
    BinaryOp, Designator, Expr, Function, InitItem, Initializer, MemberDecl, Param, Quals,
    SizeofArg, Stmt, StorageClass, SwitchCase, UnaryOp, VarDecl,
};
use crate::diag::SourceLoc;
use crate::lexer::{Keyword, NumLit, Punct, TokKind, Token};
use crate::symtab::{SymbolKind, SymbolTable};
use crate::types::Type;
use std::collections::HashMap;

/// Parse failure with the position of the offending token.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub loc: SourceLoc,
    pub message: String,
}

/// Parsed translation unit: function definitions/prototypes and
/// top-level declaration statements, in source order.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub funcs: Vec<Function>,
    pub globals: Vec<Stmt>,
}

/// Suffixes of a direct declarator, outermost first.
enum DeclSuffix {
    Array(Option<Expr>),
    Func(Vec<Param>, bool),
}

enum DeclInner {
    Name(Option<String>, SourceLoc),
    Paren(Box<Declarator>),
}

struct Declarator {
    ptr_depth: u32,
    quals: Quals,
    inner: DeclInner,
    suffixes: Vec<DeclSuffix>,
}

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    /// Outer symbol table consulted for typedef names
    symtab: &'a SymbolTable,
    /// Typedefs declared earlier in this unit, resolved to their types
    typedefs: HashMap<String, Type>,
    /// Counter for anonymous aggregate tags
    next_anon: u32,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, symtab: &'a SymbolTable) -> Self {
        Parser {
            tokens,
            pos: 0,
            symtab,
            typedefs: HashMap::new(),
            next_anon: 0,
        }
    }

    /// Parse the whole token stream.
    pub fn parse_translation_unit(&mut self) -> Result<ParseResult, ParseError> {
        let mut result = ParseResult::default();
        while !self.at_eof() {
            self.parse_toplevel(&mut result)?;
        }
        Ok(result)
    }

    // ----- token plumbing -------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokKind::Eof
    }

    fn loc(&self) -> SourceLoc {
        self.peek().loc.clone()
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            loc: self.loc(),
            message: message.into(),
        }
    }

    fn expected(&self, what: &str) -> ParseError {
        self.error(format!("expected {}, found {}", what, self.peek().describe()))
    }

    fn check_punct(&self, p: Punct) -> bool {
        self.peek().kind == TokKind::Punct(p)
    }

    fn consume_punct(&mut self, p: Punct) -> bool {
        if self.check_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: Punct) -> Result<(), ParseError> {
        if self.consume_punct(p) {
            Ok(())
        } else {
            Err(self.expected(&format!("'{}'", p.as_str())))
        }
    }

    fn check_kw(&self, kw: Keyword) -> bool {
        self.peek().kind == TokKind::Kw(kw)
    }

    fn consume_kw(&mut self, kw: Keyword) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> Result<(), ParseError> {
        if self.consume_kw(kw) {
            Ok(())
        } else {
            Err(self.expected(&format!("'{}'", kw.as_str())))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, SourceLoc), ParseError> {
        let loc = self.loc();
        match &self.peek().kind {
            TokKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok((name, loc))
            }
            _ => Err(self.expected("identifier")),
        }
    }

    fn is_typedef_name(&self, name: &str) -> bool {
        self.typedefs.contains_key(name) || self.symtab.is_typedef(name)
    }

    fn typedef_type(&self, name: &str) -> Option<Type> {
        if let Some(ty) = self.typedefs.get(name) {
            return Some(ty.clone());
        }
        self.symtab
            .lookup(name)
            .filter(|s| s.kind == SymbolKind::Typedef)
            .map(|s| s.ty.clone())
    }

    fn anon_tag(&mut self, kind: &str) -> String {
        self.next_anon += 1;
        format!("__anon_{}_{}", kind, self.next_anon)
    }

    /// True when the current token can begin a declaration.
    fn at_type_start(&self) -> bool {
        match &self.peek().kind {
            TokKind::Kw(kw) => matches!(
                kw,
                Keyword::Void
                    | Keyword::Char
                    | Keyword::Short
                    | Keyword::Int
                    | Keyword::Long
                    | Keyword::Float
                    | Keyword::Double
                    | Keyword::Signed
                    | Keyword::Unsigned
                    | Keyword::Bool
                    | Keyword::Complex
                    | Keyword::Struct
                    | Keyword::Union
                    | Keyword::Enum
                    | Keyword::Const
                    | Keyword::Volatile
                    | Keyword::Restrict
                    | Keyword::Typedef
                    | Keyword::Static
                    | Keyword::Extern
                    | Keyword::Inline
                    | Keyword::Noreturn
            ),
            TokKind::Ident(name) => self.is_typedef_name(name),
            _ => false,
        }
    }

    // ----- declaration specifiers -----------------------------------------

    /// Collected declaration specifiers before any declarator.
    fn parse_decl_specifiers(&mut self) -> Result<DeclSpec, ParseError> {
        let loc = self.loc();
        let mut spec = DeclSpec {
            storage: StorageClass::None,
            quals: Quals::default(),
            is_inline: false,
            is_noreturn: false,
            base: None,
            tag_decl: None,
            loc,
        };
        let mut longs = 0u8;
        let mut signedness: Option<bool> = None; // Some(true) = unsigned
        let mut complex = false;
        let mut core: Option<Keyword> = None;

        loop {
            let kw = match &self.peek().kind {
                TokKind::Kw(kw) => *kw,
                TokKind::Ident(name)
                    if core.is_none()
                        && longs == 0
                        && signedness.is_none()
                        && !complex
                        && spec.base.is_none()
                        && self.is_typedef_name(name) =>
                {
                    // A typedef name acts as the whole type specifier.
                    // It only does so when nothing else has claimed the
                    // base type; `unsigned T x` never treats T as a type.
                    let resolved = self.typedef_type(name).unwrap();
                    self.advance();
                    spec.base = Some(resolved);
                    continue;
                }
                _ => break,
            };
            match kw {
                Keyword::Typedef => {
                    self.advance();
                    spec.storage = StorageClass::Typedef;
                }
                Keyword::Static => {
                    self.advance();
                    spec.storage = StorageClass::Static;
                }
                Keyword::Extern => {
                    self.advance();
                    spec.storage = StorageClass::Extern;
                }
                Keyword::Const => {
                    self.advance();
                    spec.quals.is_const = true;
                }
                Keyword::Volatile => {
                    self.advance();
                    spec.quals.is_volatile = true;
                }
                Keyword::Restrict => {
                    self.advance();
                    spec.quals.is_restrict = true;
                }
                Keyword::Inline => {
                    self.advance();
                    spec.is_inline = true;
                }
                Keyword::Noreturn => {
                    self.advance();
                    spec.is_noreturn = true;
                }
                Keyword::Long => {
                    self.advance();
                    longs += 1;
                }
                Keyword::Signed => {
                    self.advance();
                    signedness = Some(false);
                }
                Keyword::Unsigned => {
                    self.advance();
                    signedness = Some(true);
                }
                Keyword::Complex => {
                    self.advance();
                    complex = true;
                }
                Keyword::Void
                | Keyword::Char
                | Keyword::Short
                | Keyword::Int
                | Keyword::Float
                | Keyword::Double
                | Keyword::Bool => {
                    self.advance();
                    match core {
                        None => core = Some(kw),
                        // `short int` and `int` after `long` add nothing
                        Some(Keyword::Short) if kw == Keyword::Int => {}
                        Some(_) if kw == Keyword::Int && longs > 0 => {}
                        Some(_) => {
                            return Err(self.error("multiple base types in declaration"));
                        }
                    }
                }
                Keyword::Struct | Keyword::Union => {
                    self.advance();
                    let (ty, decl) = self.parse_aggregate_spec(kw)?;
                    spec.base = Some(ty);
                    spec.tag_decl = decl;
                }
                Keyword::Enum => {
                    self.advance();
                    let (ty, decl) = self.parse_enum_spec()?;
                    spec.base = Some(ty);
                    spec.tag_decl = decl;
                }
                _ => break,
            }
        }

        if spec.base.is_none() {
            let unsigned = signedness == Some(true);
            let base = match (core, longs) {
                (Some(Keyword::Void), 0) => Type::Void,
                (Some(Keyword::Bool), 0) => Type::Bool,
                (Some(Keyword::Char), 0) => {
                    if unsigned {
                        Type::UChar
                    } else {
                        Type::Char
                    }
                }
                (Some(Keyword::Short), 0) => {
                    if unsigned {
                        Type::UShort
                    } else {
                        Type::Short
                    }
                }
                (Some(Keyword::Int), 0) | (None, 0) if core.is_some() || signedness.is_some() => {
                    if unsigned {
                        Type::UInt
                    } else {
                        Type::Int
                    }
                }
                (Some(Keyword::Int), 1) | (None, 1) => {
                    if unsigned {
                        Type::ULong
                    } else {
                        Type::Long
                    }
                }
                (Some(Keyword::Int), 2) | (None, 2) => {
                    if unsigned {
                        Type::ULLong
                    } else {
                        Type::LLong
                    }
                }
                (Some(Keyword::Float), 0) => {
                    if complex {
                        Type::FloatComplex
                    } else {
                        Type::Float
                    }
                }
                (Some(Keyword::Double), 0) => {
                    if complex {
                        Type::DoubleComplex
                    } else {
                        Type::Double
                    }
                }
                (Some(Keyword::Double), 1) => {
                    if complex {
                        Type::LDoubleComplex
                    } else {
                        Type::LDouble
                    }
                }
                (None, _) if longs > 2 => {
                    return Err(self.error("too many 'long' specifiers"));
                }
                (None, 0) => return Err(self.expected("type specifier")),
                _ => return Err(self.error("invalid combination of type specifiers")),
            };
            spec.base = Some(base);
        }
        Ok(spec)
    }

    /// `struct tag`, `struct tag { members }`, or `struct { members }`.
    fn parse_aggregate_spec(
        &mut self,
        kw: Keyword,
    ) -> Result<(Type, Option<Stmt>), ParseError> {
        let loc = self.loc();
        let tag = match &self.peek().kind {
            TokKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                name
            }
            TokKind::Punct(Punct::LBrace) => self.anon_tag(if kw == Keyword::Struct {
                "struct"
            } else {
                "union"
            }),
            _ => return Err(self.expected("struct tag or '{'")),
        };

        let ty = if kw == Keyword::Struct {
            Type::Struct(tag.clone())
        } else {
            Type::Union(tag.clone())
        };

        if !self.consume_punct(Punct::LBrace) {
            return Ok((ty, None));
        }

        let mut members = Vec::new();
        while !self.consume_punct(Punct::RBrace) {
            self.parse_member_decl(&mut members)?;
        }

        let decl = if kw == Keyword::Struct {
            Stmt::StructDecl {
                tag,
                members: Some(members),
                loc,
            }
        } else {
            Stmt::UnionDecl {
                tag,
                members: Some(members),
                loc,
            }
        };
        Ok((ty, Some(decl)))
    }

    /// One member line: `type declarator (, declarator)* ;` with optional
    /// bit-field widths and a flexible trailing array.
    fn parse_member_decl(&mut self, members: &mut Vec<MemberDecl>) -> Result<(), ParseError> {
        let spec = self.parse_decl_specifiers()?;
        let base = self.resolve_spec_base(&spec)?;
        loop {
            let loc = self.loc();
            // Anonymous bit-field: `int : 3;`
            if self.check_punct(Punct::Colon) {
                self.advance();
                let width = self.parse_cond_expr()?;
                members.push(MemberDecl {
                    name: String::new(),
                    ty: base.clone(),
                    quals: spec.quals,
                    bit_width: Some(width),
                    is_flexible: false,
                    loc,
                });
            } else {
                let d = self.parse_declarator()?;
                let (name, ty) = self.apply_declarator(d, base.clone())?;
                let name = name.ok_or_else(|| self.expected("member name"))?;
                let is_flexible = matches!(
                    &ty,
                    Type::Array {
                        len: None,
                        size_expr: None,
                        ..
                    }
                );
                let bit_width = if self.consume_punct(Punct::Colon) {
                    Some(self.parse_cond_expr()?)
                } else {
                    None
                };
                members.push(MemberDecl {
                    name,
                    ty,
                    quals: spec.quals,
                    bit_width,
                    is_flexible,
                    loc,
                });
            }
            if !self.consume_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::Semi)?;
        Ok(())
    }

    /// `enum tag`, `enum tag { list }`, or `enum { list }`.
    fn parse_enum_spec(&mut self) -> Result<(Type, Option<Stmt>), ParseError> {
        let loc = self.loc();
        let tag = match &self.peek().kind {
            TokKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Some(name)
            }
            _ => None,
        };
        let tag_name = tag.clone().unwrap_or_else(|| self.anon_tag("enum"));
        let ty = Type::Enum(tag_name);

        if !self.consume_punct(Punct::LBrace) {
            if tag.is_none() {
                return Err(self.expected("enum tag or '{'"));
            }
            return Ok((ty, None));
        }

        let mut enumerators = Vec::new();
        loop {
            if self.consume_punct(Punct::RBrace) {
                break;
            }
            let (name, eloc) = self.expect_ident()?;
            let value = if self.consume_punct(Punct::Assign) {
                Some(self.parse_cond_expr()?)
            } else {
                None
            };
            enumerators.push((name, value, eloc));
            if !self.consume_punct(Punct::Comma) {
                self.expect_punct(Punct::RBrace)?;
                break;
            }
        }
        let decl = Stmt::EnumDecl {
            tag,
            enumerators,
            loc,
        };
        Ok((ty, Some(decl)))
    }

    fn resolve_spec_base(&self, spec: &DeclSpec) -> Result<Type, ParseError> {
        spec.base
            .clone()
            .ok_or_else(|| self.expected("type specifier"))
    }

    // ----- declarators ----------------------------------------------------

    fn parse_declarator(&mut self) -> Result<Declarator, ParseError> {
        let mut ptr_depth = 0;
        let mut quals = Quals::default();
        while self.consume_punct(Punct::Star) {
            ptr_depth += 1;
            loop {
                if self.consume_kw(Keyword::Const) {
                    quals.is_const = true;
                } else if self.consume_kw(Keyword::Volatile) {
                    quals.is_volatile = true;
                } else if self.consume_kw(Keyword::Restrict) {
                    quals.is_restrict = true;
                } else {
                    break;
                }
            }
        }

        let inner = match &self.peek().kind {
            TokKind::Ident(name) => {
                let name = name.clone();
                let loc = self.loc();
                self.advance();
                DeclInner::Name(Some(name), loc)
            }
            TokKind::Punct(Punct::LParen) if self.paren_is_declarator() => {
                self.advance();
                let d = self.parse_declarator()?;
                self.expect_punct(Punct::RParen)?;
                DeclInner::Paren(Box::new(d))
            }
            _ => DeclInner::Name(None, self.loc()),
        };

        let mut suffixes = Vec::new();
        loop {
            if self.consume_punct(Punct::LBracket) {
                // `[]`, `[*]`, or a size expression (maybe a VLA)
                let size = if self.check_punct(Punct::RBracket) {
                    None
                } else if self.check_punct(Punct::Star)
                    && self.peek_at(1).kind == TokKind::Punct(Punct::RBracket)
                {
                    self.advance();
                    None
                } else {
                    Some(self.parse_assign_expr()?)
                };
                self.expect_punct(Punct::RBracket)?;
                suffixes.push(DeclSuffix::Array(size));
            } else if self.consume_punct(Punct::LParen) {
                let (params, variadic) = self.parse_param_list()?;
                suffixes.push(DeclSuffix::Func(params, variadic));
            } else {
                break;
            }
        }

        Ok(Declarator {
            ptr_depth,
            quals,
            inner,
            suffixes,
        })
    }

    /// Decide whether `(` after the pointer chain opens a parenthesized
    /// declarator rather than a function parameter list.
    fn paren_is_declarator(&self) -> bool {
        match &self.peek_at(1).kind {
            TokKind::Punct(Punct::Star) | TokKind::Punct(Punct::LParen) => true,
            TokKind::Ident(name) => !self.is_typedef_name(name),
            _ => false,
        }
    }

    fn parse_param_list(&mut self) -> Result<(Vec<Param>, bool), ParseError> {
        let mut params = Vec::new();
        let mut variadic = false;

        if self.consume_punct(Punct::RParen) {
            return Ok((params, variadic));
        }
        // `(void)` declares zero parameters
        if self.check_kw(Keyword::Void)
            && self.peek_at(1).kind == TokKind::Punct(Punct::RParen)
        {
            self.advance();
            self.advance();
            return Ok((params, variadic));
        }

        loop {
            if self.consume_punct(Punct::Ellipsis) {
                variadic = true;
                self.expect_punct(Punct::RParen)?;
                break;
            }
            let loc = self.loc();
            let spec = self.parse_decl_specifiers()?;
            let base = self.resolve_spec_base(&spec)?;
            let d = self.parse_declarator()?;
            let (name, ty) = self.apply_declarator(d, base)?;
            // Parameters of array type decay to pointers at the boundary
            let ty = match ty {
                Type::Array { elem, .. } => Type::Ptr(elem),
                other => other,
            };
            params.push(Param {
                name: name.unwrap_or_default(),
                ty,
                quals: spec.quals,
                loc,
            });
            if self.consume_punct(Punct::RParen) {
                break;
            }
            self.expect_punct(Punct::Comma)?;
        }
        Ok((params, variadic))
    }

    /// Build the declared type inside-out from the declarator shape.
    fn apply_declarator(
        &mut self,
        d: Declarator,
        base: Type,
    ) -> Result<(Option<String>, Type), ParseError> {
        let mut ty = base;
        for _ in 0..d.ptr_depth {
            ty = Type::Ptr(Box::new(ty));
        }
        for suffix in d.suffixes.into_iter().rev() {
            ty = match suffix {
                DeclSuffix::Array(size) => Type::Array {
                    elem: Box::new(ty),
                    len: None,
                    size_expr: size.map(Box::new),
                },
                DeclSuffix::Func(params, variadic) => Type::Func {
                    ret: Box::new(ty),
                    params: params.iter().map(|p| p.ty.clone()).collect(),
                    variadic,
                },
            };
        }
        match d.inner {
            DeclInner::Name(name, _) => Ok((name, ty)),
            DeclInner::Paren(inner) => self.apply_declarator(*inner, ty),
        }
    }

    /// Parameters of the outermost function declarator, for definitions.
    fn outer_func_params(d: &Declarator) -> Option<(&[Param], bool)> {
        match d.suffixes.first() {
            Some(DeclSuffix::Func(params, variadic)) => Some((params, *variadic)),
            _ => None,
        }
    }

    /// `(type-name)` for casts, sizeof, and compound literals.
    fn parse_type_name(&mut self) -> Result<Type, ParseError> {
        let spec = self.parse_decl_specifiers()?;
        let base = self.resolve_spec_base(&spec)?;
        let d = self.parse_declarator()?;
        let (name, ty) = self.apply_declarator(d, base)?;
        if name.is_some() {
            return Err(self.error("type name must not declare an identifier"));
        }
        Ok(ty)
    }

    // ----- top level ------------------------------------------------------

    fn parse_toplevel(&mut self, result: &mut ParseResult) -> Result<(), ParseError> {
        let spec = self.parse_decl_specifiers()?;

        // Bare tag declaration: `struct S { ... };`, `struct S;`, etc.
        if self.consume_punct(Punct::Semi) {
            if let Some(decl) = spec.tag_decl {
                result.globals.push(decl);
                return Ok(());
            }
            if let Some(decl) = Self::forward_tag_decl(&spec) {
                result.globals.push(decl);
                return Ok(());
            }
            return Err(self.error("declaration declares nothing"));
        }

        if let Some(decl) = &spec.tag_decl {
            result.globals.push(decl.clone());
        }

        let base = self.resolve_spec_base(&spec)?;
        let first = self.parse_declarator()?;

        // Function definition: declarator with a parameter list followed
        // by `{`.
        if self.check_punct(Punct::LBrace) {
            let (params, variadic) = match Self::outer_func_params(&first) {
                Some((params, variadic)) => (params.to_vec(), variadic),
                None => return Err(self.expected("function parameter list before '{'")),
            };
            let (name, ty) = self.apply_declarator(first, base)?;
            let name = name.ok_or_else(|| self.expected("function name"))?;
            let return_type = match ty {
                Type::Func { ret, .. } => *ret,
                _ => return Err(self.expected("function declarator")),
            };
            self.expect_punct(Punct::LBrace)?;
            let body = self.parse_block_body()?;
            result.funcs.push(Function {
                name,
                return_type,
                params,
                variadic,
                body: Some(body),
                is_inline: spec.is_inline,
                is_noreturn: spec.is_noreturn,
                is_static: spec.storage == StorageClass::Static,
                loc: spec.loc.clone(),
            });
            return Ok(());
        }

        // Otherwise: one or more declarators ending in `;`.
        let mut d = Some(first);
        loop {
            let decl = match d.take() {
                Some(decl) => decl,
                None => self.parse_declarator()?,
            };
            let (name, ty) = self.apply_declarator(decl, base.clone())?;
            let name = name.ok_or_else(|| self.expected("declarator name"))?;

            if spec.storage == StorageClass::Typedef {
                self.typedefs.insert(name.clone(), ty.clone());
                result.globals.push(Stmt::Typedef {
                    name,
                    ty,
                    loc: spec.loc.clone(),
                });
            } else if let Type::Func {
                ret,
                params: param_tys,
                variadic,
            } = &ty
            {
                // Prototype
                result.funcs.push(Function {
                    name,
                    return_type: (**ret).clone(),
                    params: param_tys
                        .iter()
                        .map(|t| Param {
                            name: String::new(),
                            ty: t.clone(),
                            quals: Quals::default(),
                            loc: spec.loc.clone(),
                        })
                        .collect(),
                    variadic: *variadic,
                    body: None,
                    is_inline: spec.is_inline,
                    is_noreturn: spec.is_noreturn,
                    is_static: spec.storage == StorageClass::Static,
                    loc: spec.loc.clone(),
                });
            } else {
                let init = if self.consume_punct(Punct::Assign) {
                    Some(self.parse_initializer()?)
                } else {
                    None
                };
                result.globals.push(Stmt::VarDecl(VarDecl {
                    name,
                    ty,
                    storage: spec.storage,
                    quals: spec.quals,
                    init,
                    loc: spec.loc.clone(),
                }));
            }

            if self.consume_punct(Punct::Comma) {
                continue;
            }
            self.expect_punct(Punct::Semi)?;
            break;
        }
        Ok(())
    }

    /// Forward tag declaration synthesized from bare `struct S;`.
    fn forward_tag_decl(spec: &DeclSpec) -> Option<Stmt> {
        match &spec.base {
            Some(Type::Struct(tag)) => Some(Stmt::StructDecl {
                tag: tag.clone(),
                members: None,
                loc: spec.loc.clone(),
            }),
            Some(Type::Union(tag)) => Some(Stmt::UnionDecl {
                tag: tag.clone(),
                members: None,
                loc: spec.loc.clone(),
            }),
            _ => None,
        }
    }

    // ----- statements -----------------------------------------------------

    /// Body of a `{ ... }` block whose opening brace is already consumed.
    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        while !self.consume_punct(Punct::RBrace) {
            if self.at_eof() {
                return Err(self.expected("'}'"));
            }
            self.parse_stmt_into(&mut stmts)?;
        }
        Ok(stmts)
    }

    /// Parse one statement; declarations may expand to several.
    fn parse_stmt_into(&mut self, out: &mut Vec<Stmt>) -> Result<(), ParseError> {
        if self.at_type_start() {
            self.parse_local_decl(out)?;
            return Ok(());
        }
        let stmt = self.parse_stmt()?;
        out.push(stmt);
        Ok(())
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();

        // Labels: `ident :` not followed by another colon use
        if let TokKind::Ident(name) = &self.peek().kind {
            if self.peek_at(1).kind == TokKind::Punct(Punct::Colon) {
                let name = name.clone();
                self.advance();
                self.advance();
                return Ok(Stmt::Label { name, loc });
            }
        }

        match self.peek().kind.clone() {
            TokKind::Punct(Punct::LBrace) => {
                self.advance();
                let body = self.parse_block_body()?;
                Ok(Stmt::Block(body))
            }
            TokKind::Punct(Punct::Semi) => {
                self.advance();
                Ok(Stmt::Block(Vec::new()))
            }
            TokKind::Kw(Keyword::Return) => {
                self.advance();
                let value = if self.check_punct(Punct::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect_punct(Punct::Semi)?;
                Ok(Stmt::Return { value, loc })
            }
            TokKind::Kw(Keyword::If) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let cond = self.parse_expr()?;
                self.expect_punct(Punct::RParen)?;
                let then_branch = Box::new(self.parse_stmt()?);
                let else_branch = if self.consume_kw(Keyword::Else) {
                    Some(Box::new(self.parse_stmt()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                    loc,
                })
            }
            TokKind::Kw(Keyword::While) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let cond = self.parse_expr()?;
                self.expect_punct(Punct::RParen)?;
                let body = Box::new(self.parse_stmt()?);
                Ok(Stmt::While { cond, body, loc })
            }
            TokKind::Kw(Keyword::Do) => {
                self.advance();
                let body = Box::new(self.parse_stmt()?);
                self.expect_kw(Keyword::While)?;
                self.expect_punct(Punct::LParen)?;
                let cond = self.parse_expr()?;
                self.expect_punct(Punct::RParen)?;
                self.expect_punct(Punct::Semi)?;
                Ok(Stmt::DoWhile { body, cond, loc })
            }
            TokKind::Kw(Keyword::For) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let init = if self.consume_punct(Punct::Semi) {
                    None
                } else if self.at_type_start() {
                    let mut decls = Vec::new();
                    self.parse_local_decl(&mut decls)?;
                    Some(Box::new(Stmt::Block(decls)))
                } else {
                    let e = self.parse_expr()?;
                    self.expect_punct(Punct::Semi)?;
                    Some(Box::new(Stmt::Expr(e)))
                };
                let cond = if self.check_punct(Punct::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect_punct(Punct::Semi)?;
                let step = if self.check_punct(Punct::RParen) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect_punct(Punct::RParen)?;
                let body = Box::new(self.parse_stmt()?);
                Ok(Stmt::For {
                    init,
                    cond,
                    step,
                    body,
                    loc,
                })
            }
            TokKind::Kw(Keyword::Switch) => self.parse_switch(),
            TokKind::Kw(Keyword::Break) => {
                self.advance();
                self.expect_punct(Punct::Semi)?;
                Ok(Stmt::Break { loc })
            }
            TokKind::Kw(Keyword::Continue) => {
                self.advance();
                self.expect_punct(Punct::Semi)?;
                Ok(Stmt::Continue { loc })
            }
            TokKind::Kw(Keyword::Goto) => {
                self.advance();
                let (name, _) = self.expect_ident()?;
                self.expect_punct(Punct::Semi)?;
                Ok(Stmt::Goto { name, loc })
            }
            TokKind::Kw(Keyword::StaticAssert) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let cond = self.parse_cond_expr()?;
                let message = if self.consume_punct(Punct::Comma) {
                    match self.peek().kind.clone() {
                        TokKind::StrLit { value, .. } => {
                            self.advance();
                            Some(value)
                        }
                        _ => return Err(self.expected("string literal")),
                    }
                } else {
                    None
                };
                self.expect_punct(Punct::RParen)?;
                self.expect_punct(Punct::Semi)?;
                Ok(Stmt::StaticAssert {
                    cond,
                    message,
                    loc,
                })
            }
            _ => {
                let e = self.parse_expr()?;
                self.expect_punct(Punct::Semi)?;
                Ok(Stmt::Expr(e))
            }
        }
    }

    /// Structured switch body: case groups and an optional default.
    fn parse_switch(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        self.expect_kw(Keyword::Switch)?;
        self.expect_punct(Punct::LParen)?;
        let cond = self.parse_expr()?;
        self.expect_punct(Punct::RParen)?;
        self.expect_punct(Punct::LBrace)?;

        let mut cases: Vec<SwitchCase> = Vec::new();
        let mut default: Option<Vec<Stmt>> = None;

        while !self.consume_punct(Punct::RBrace) {
            if self.consume_kw(Keyword::Case) {
                let cloc = self.loc();
                let value = self.parse_cond_expr()?;
                self.expect_punct(Punct::Colon)?;
                let body = self.parse_case_body()?;
                cases.push(SwitchCase {
                    value,
                    body,
                    loc: cloc,
                });
            } else if self.consume_kw(Keyword::Default) {
                self.expect_punct(Punct::Colon)?;
                if default.is_some() {
                    return Err(self.error("multiple default labels in one switch"));
                }
                default = Some(self.parse_case_body()?);
            } else {
                return Err(self.expected("'case', 'default' or '}'"));
            }
        }

        Ok(Stmt::Switch {
            cond,
            cases,
            default,
            loc,
        })
    }

    /// Statements until the next `case`/`default`/`}`.
    fn parse_case_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut body = Vec::new();
        loop {
            if self.check_kw(Keyword::Case)
                || self.check_kw(Keyword::Default)
                || self.check_punct(Punct::RBrace)
            {
                break;
            }
            if self.at_eof() {
                return Err(self.expected("'}'"));
            }
            self.parse_stmt_into(&mut body)?;
        }
        Ok(body)
    }

    /// Local declaration inside a block.
    fn parse_local_decl(&mut self, out: &mut Vec<Stmt>) -> Result<(), ParseError> {
        let spec = self.parse_decl_specifiers()?;

        if self.consume_punct(Punct::Semi) {
            if let Some(decl) = spec.tag_decl {
                out.push(decl);
                return Ok(());
            }
            if let Some(decl) = Self::forward_tag_decl(&spec) {
                out.push(decl);
                return Ok(());
            }
            return Err(self.error("declaration declares nothing"));
        }
        if let Some(decl) = &spec.tag_decl {
            out.push(decl.clone());
        }

        let base = self.resolve_spec_base(&spec)?;
        loop {
            let d = self.parse_declarator()?;
            let (name, ty) = self.apply_declarator(d, base.clone())?;
            let name = name.ok_or_else(|| self.expected("declarator name"))?;

            if spec.storage == StorageClass::Typedef {
                self.typedefs.insert(name.clone(), ty.clone());
                out.push(Stmt::Typedef {
                    name,
                    ty,
                    loc: spec.loc.clone(),
                });
            } else {
                let init = if self.consume_punct(Punct::Assign) {
                    Some(self.parse_initializer()?)
                } else {
                    None
                };
                out.push(Stmt::VarDecl(VarDecl {
                    name,
                    ty,
                    storage: spec.storage,
                    quals: spec.quals,
                    init,
                    loc: spec.loc.clone(),
                }));
            }
            if self.consume_punct(Punct::Comma) {
                continue;
            }
            self.expect_punct(Punct::Semi)?;
            break;
        }
        Ok(())
    }

    // ----- initializers ---------------------------------------------------

    fn parse_initializer(&mut self) -> Result<Initializer, ParseError> {
        if !self.consume_punct(Punct::LBrace) {
            return Ok(Initializer::Expr(self.parse_assign_expr()?));
        }
        let mut items = Vec::new();
        loop {
            if self.consume_punct(Punct::RBrace) {
                break;
            }
            let designator = if self.consume_punct(Punct::LBracket) {
                let idx = self.parse_cond_expr()?;
                self.expect_punct(Punct::RBracket)?;
                self.expect_punct(Punct::Assign)?;
                Some(Designator::Index(idx))
            } else if self.check_punct(Punct::Dot) {
                self.advance();
                let (field, _) = self.expect_ident()?;
                self.expect_punct(Punct::Assign)?;
                Some(Designator::Field(field))
            } else {
                None
            };
            let init = self.parse_initializer()?;
            items.push(InitItem { designator, init });
            if !self.consume_punct(Punct::Comma) {
                self.expect_punct(Punct::RBrace)?;
                break;
            }
        }
        Ok(Initializer::List(items))
    }

    // ----- expressions ----------------------------------------------------

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_assign_expr()
    }

    /// Constant-expression position: conditional, no assignment.
    pub fn parse_cond_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_conditional()
    }

    fn parse_assign_expr(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_conditional()?;
        let loc = self.loc();

        let compound = match self.peek().kind {
            TokKind::Punct(Punct::Assign) => None,
            TokKind::Punct(Punct::PlusAssign) => Some(BinaryOp::Add),
            TokKind::Punct(Punct::MinusAssign) => Some(BinaryOp::Sub),
            TokKind::Punct(Punct::StarAssign) => Some(BinaryOp::Mul),
            TokKind::Punct(Punct::SlashAssign) => Some(BinaryOp::Div),
            TokKind::Punct(Punct::PercentAssign) => Some(BinaryOp::Mod),
            TokKind::Punct(Punct::AmpAssign) => Some(BinaryOp::BitAnd),
            TokKind::Punct(Punct::PipeAssign) => Some(BinaryOp::BitOr),
            TokKind::Punct(Punct::CaretAssign) => Some(BinaryOp::BitXor),
            TokKind::Punct(Punct::ShlAssign) => Some(BinaryOp::Shl),
            TokKind::Punct(Punct::ShrAssign) => Some(BinaryOp::Shr),
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_assign_expr()?;
        let value = match compound {
            None => rhs,
            Some(op) => Expr::Binary {
                op,
                lhs: Box::new(lhs.clone()),
                rhs: Box::new(rhs),
                loc: loc.clone(),
            },
        };
        self.make_assignment(lhs, value, loc)
    }

    /// Sort an assignment into the target-shaped AST variants.
    fn make_assignment(
        &self,
        target: Expr,
        value: Expr,
        loc: SourceLoc,
    ) -> Result<Expr, ParseError> {
        match target {
            Expr::Index { array, index, .. } => Ok(Expr::AssignIndex {
                array,
                index,
                value: Box::new(value),
                loc,
            }),
            Expr::Member {
                object,
                member,
                arrow,
                ..
            } => Ok(Expr::AssignMember {
                object,
                member,
                arrow,
                value: Box::new(value),
                loc,
            }),
            Expr::Ident { .. } | Expr::Unary { op: UnaryOp::Deref, .. } => Ok(Expr::Assign {
                target: Box::new(target),
                value: Box::new(value),
                loc,
            }),
            _ => Err(ParseError {
                loc,
                message: "expression is not assignable".to_string(),
            }),
        }
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_binary(0)?;
        if !self.check_punct(Punct::Question) {
            return Ok(cond);
        }
        let loc = self.loc();
        self.advance();
        let then_expr = self.parse_expr()?;
        self.expect_punct(Punct::Colon)?;
        let else_expr = self.parse_conditional()?;
        Ok(Expr::Cond {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
            loc,
        })
    }

    /// Binary operator at `min_prec` or tighter, precedence climbing.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_cast()?;
        loop {
            let (op, prec) = match self.peek().kind {
                TokKind::Punct(Punct::OrOr) => (BinaryOp::LogOr, 1),
                TokKind::Punct(Punct::AndAnd) => (BinaryOp::LogAnd, 2),
                TokKind::Punct(Punct::Pipe) => (BinaryOp::BitOr, 3),
                TokKind::Punct(Punct::Caret) => (BinaryOp::BitXor, 4),
                TokKind::Punct(Punct::Amp) => (BinaryOp::BitAnd, 5),
                TokKind::Punct(Punct::EqEq) => (BinaryOp::Eq, 6),
                TokKind::Punct(Punct::NotEq) => (BinaryOp::Ne, 6),
                TokKind::Punct(Punct::Lt) => (BinaryOp::Lt, 7),
                TokKind::Punct(Punct::Gt) => (BinaryOp::Gt, 7),
                TokKind::Punct(Punct::Le) => (BinaryOp::Le, 7),
                TokKind::Punct(Punct::Ge) => (BinaryOp::Ge, 7),
                TokKind::Punct(Punct::Shl) => (BinaryOp::Shl, 8),
                TokKind::Punct(Punct::Shr) => (BinaryOp::Shr, 8),
                TokKind::Punct(Punct::Plus) => (BinaryOp::Add, 9),
                TokKind::Punct(Punct::Minus) => (BinaryOp::Sub, 9),
                TokKind::Punct(Punct::Star) => (BinaryOp::Mul, 10),
                TokKind::Punct(Punct::Slash) => (BinaryOp::Div, 10),
                TokKind::Punct(Punct::Percent) => (BinaryOp::Mod, 10),
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                loc,
            };
        }
        Ok(lhs)
    }

    /// `(type)expr` casts and `(type){...}` compound literals.
    fn parse_cast(&mut self) -> Result<Expr, ParseError> {
        if self.check_punct(Punct::LParen) && self.paren_opens_type_name() {
            let loc = self.loc();
            self.advance();
            let ty = self.parse_type_name()?;
            self.expect_punct(Punct::RParen)?;
            if self.check_punct(Punct::LBrace) {
                let init = Box::new(self.parse_initializer()?);
                return Ok(Expr::CompoundLit { ty, init, loc });
            }
            let operand = self.parse_cast()?;
            return Ok(Expr::Cast {
                ty,
                operand: Box::new(operand),
                loc,
            });
        }
        self.parse_unary()
    }

    fn paren_opens_type_name(&self) -> bool {
        match &self.peek_at(1).kind {
            TokKind::Kw(kw) => matches!(
                kw,
                Keyword::Void
                    | Keyword::Char
                    | Keyword::Short
                    | Keyword::Int
                    | Keyword::Long
                    | Keyword::Float
                    | Keyword::Double
                    | Keyword::Signed
                    | Keyword::Unsigned
                    | Keyword::Bool
                    | Keyword::Complex
                    | Keyword::Struct
                    | Keyword::Union
                    | Keyword::Enum
                    | Keyword::Const
                    | Keyword::Volatile
            ),
            TokKind::Ident(name) => self.is_typedef_name(name),
            _ => false,
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        match self.peek().kind.clone() {
            TokKind::Punct(Punct::Minus) => {
                self.advance();
                let operand = self.parse_cast()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                    loc,
                })
            }
            TokKind::Punct(Punct::Plus) => {
                self.advance();
                let operand = self.parse_cast()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Plus,
                    operand: Box::new(operand),
                    loc,
                })
            }
            TokKind::Punct(Punct::Tilde) => {
                self.advance();
                let operand = self.parse_cast()?;
                Ok(Expr::Unary {
                    op: UnaryOp::BitNot,
                    operand: Box::new(operand),
                    loc,
                })
            }
            TokKind::Punct(Punct::Bang) => {
                self.advance();
                let operand = self.parse_cast()?;
                Ok(Expr::Unary {
                    op: UnaryOp::LogNot,
                    operand: Box::new(operand),
                    loc,
                })
            }
            TokKind::Punct(Punct::Star) => {
                self.advance();
                let operand = self.parse_cast()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Deref,
                    operand: Box::new(operand),
                    loc,
                })
            }
            TokKind::Punct(Punct::Amp) => {
                self.advance();
                let operand = self.parse_cast()?;
                Ok(Expr::Unary {
                    op: UnaryOp::AddrOf,
                    operand: Box::new(operand),
                    loc,
                })
            }
            // `++x` desugars to `x = x + 1`
            TokKind::Punct(Punct::Inc) => {
                self.advance();
                let target = self.parse_unary()?;
                self.desugar_incdec(target, BinaryOp::Add, false, loc)
            }
            TokKind::Punct(Punct::Dec) => {
                self.advance();
                let target = self.parse_unary()?;
                self.desugar_incdec(target, BinaryOp::Sub, false, loc)
            }
            TokKind::Kw(Keyword::Sizeof) => {
                self.advance();
                if self.check_punct(Punct::LParen) && self.paren_opens_type_name() {
                    self.advance();
                    let ty = self.parse_type_name()?;
                    self.expect_punct(Punct::RParen)?;
                    Ok(Expr::Sizeof {
                        arg: Box::new(SizeofArg::Type(ty)),
                        loc,
                    })
                } else {
                    let operand = self.parse_unary()?;
                    Ok(Expr::Sizeof {
                        arg: Box::new(SizeofArg::Expr(operand)),
                        loc,
                    })
                }
            }
            TokKind::Kw(Keyword::Alignof) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let ty = self.parse_type_name()?;
                self.expect_punct(Punct::RParen)?;
                Ok(Expr::Alignof { ty, loc })
            }
            TokKind::Kw(Keyword::Offsetof) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let ty = self.parse_type_name()?;
                self.expect_punct(Punct::Comma)?;
                let (member, _) = self.expect_ident()?;
                self.expect_punct(Punct::RParen)?;
                Ok(Expr::Offsetof { ty, member, loc })
            }
            _ => self.parse_postfix(),
        }
    }

    /// Desugar `++`/`--`.
    ///
    /// Prefix forms become plain assignments. Postfix forms recover the
    /// old value arithmetically: `x++` is `(x = x + 1) - 1`, which holds
    /// for integers and, through pointer arithmetic scaling, for
    /// pointers.
    fn desugar_incdec(
        &self,
        target: Expr,
        op: BinaryOp,
        postfix: bool,
        loc: SourceLoc,
    ) -> Result<Expr, ParseError> {
        let one = Expr::Number {
            lit: NumLit {
                value: 1,
                float: None,
                base: 10,
                unsigned: false,
                longs: 0,
                float_suffix: false,
            },
            loc: loc.clone(),
        };
        let new_value = Expr::Binary {
            op,
            lhs: Box::new(target.clone()),
            rhs: Box::new(one.clone()),
            loc: loc.clone(),
        };
        let assign = self.make_assignment(target, new_value, loc.clone())?;
        if !postfix {
            return Ok(assign);
        }
        let undo = match op {
            BinaryOp::Add => BinaryOp::Sub,
            _ => BinaryOp::Add,
        };
        Ok(Expr::Binary {
            op: undo,
            lhs: Box::new(assign),
            rhs: Box::new(one),
            loc,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            let loc = self.loc();
            match self.peek().kind.clone() {
                TokKind::Punct(Punct::LParen) => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.consume_punct(Punct::RParen) {
                        loop {
                            args.push(self.parse_assign_expr()?);
                            if self.consume_punct(Punct::RParen) {
                                break;
                            }
                            self.expect_punct(Punct::Comma)?;
                        }
                    }
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        loc,
                    };
                }
                TokKind::Punct(Punct::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect_punct(Punct::RBracket)?;
                    expr = Expr::Index {
                        array: Box::new(expr),
                        index: Box::new(index),
                        loc,
                    };
                }
                TokKind::Punct(Punct::Dot) => {
                    self.advance();
                    let (member, _) = self.expect_ident()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        member,
                        arrow: false,
                        loc,
                    };
                }
                TokKind::Punct(Punct::Arrow) => {
                    self.advance();
                    let (member, _) = self.expect_ident()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        member,
                        arrow: true,
                        loc,
                    };
                }
                TokKind::Punct(Punct::Inc) => {
                    self.advance();
                    expr = self.desugar_incdec(expr, BinaryOp::Add, true, loc)?;
                }
                TokKind::Punct(Punct::Dec) => {
                    self.advance();
                    expr = self.desugar_incdec(expr, BinaryOp::Sub, true, loc)?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        match self.peek().kind.clone() {
            TokKind::Num(lit) => {
                self.advance();
                Ok(Expr::Number { lit, loc })
            }
            TokKind::CharLit { value, wide } => {
                self.advance();
                Ok(Expr::CharLit { value, wide, loc })
            }
            TokKind::StrLit { value, wide } => {
                self.advance();
                // Adjacent string literals concatenate
                let mut value = value;
                let mut wide = wide;
                while let TokKind::StrLit {
                    value: next,
                    wide: next_wide,
                } = self.peek().kind.clone()
                {
                    value.push_str(&next);
                    wide = wide || next_wide;
                    self.advance();
                }
                Ok(Expr::StrLit { value, wide, loc })
            }
            TokKind::Ident(name) => {
                self.advance();
                Ok(Expr::Ident { name, loc })
            }
            TokKind::Punct(Punct::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect_punct(Punct::RParen)?;
                Ok(expr)
            }
            _ => Err(self.expected("expression")),
        }
    }
}

/// Collected declaration specifiers.
struct DeclSpec {
    storage: StorageClass,
    quals: Quals,
    is_inline: bool,
    is_noreturn: bool,
    base: Option<Type>,
    /// Tag declaration produced by an inline `struct {...}` etc.
    tag_decl: Option<Stmt>,
    loc: SourceLoc,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(src: &str) -> ParseResult {
        let symtab = SymbolTable::new();
        let tokens = tokenize(src, "test.c").unwrap();
        let mut parser = Parser::new(tokens, &symtab);
        parser.parse_translation_unit().unwrap()
    }

    fn parse_err(src: &str) -> ParseError {
        let symtab = SymbolTable::new();
        let tokens = tokenize(src, "test.c").unwrap();
        let mut parser = Parser::new(tokens, &symtab);
        parser.parse_translation_unit().unwrap_err()
    }

    #[test]
    fn test_simple_function() {
        let unit = parse("int f(void) { return 2 + 3; }");
        assert_eq!(unit.funcs.len(), 1);
        let f = &unit.funcs[0];
        assert_eq!(f.name, "f");
        assert_eq!(f.return_type, Type::Int);
        assert!(f.params.is_empty());
        assert!(!f.variadic);
        let body = f.body.as_ref().unwrap();
        assert!(matches!(&body[0], Stmt::Return { value: Some(_), .. }));
    }

    #[test]
    fn test_prototype_vs_definition() {
        let unit = parse("int g(int x);\nint g(int x) { return x; }");
        assert_eq!(unit.funcs.len(), 2);
        assert!(unit.funcs[0].is_prototype());
        assert!(!unit.funcs[1].is_prototype());
    }

    #[test]
    fn test_pointer_declarator_chain() {
        let unit = parse("char **argv;");
        match &unit.globals[0] {
            Stmt::VarDecl(v) => {
                assert_eq!(v.ty, Type::ptr_to(Type::ptr_to(Type::Char)));
            }
            other => panic!("expected var decl, got {:?}", other),
        }
    }

    #[test]
    fn test_function_pointer_declarator() {
        let unit = parse("int (*handler)(int);");
        match &unit.globals[0] {
            Stmt::VarDecl(v) => match &v.ty {
                Type::Ptr(inner) => assert!(inner.is_func()),
                other => panic!("expected pointer to function, got {:?}", other),
            },
            other => panic!("expected var decl, got {:?}", other),
        }
    }

    #[test]
    fn test_array_of_arrays() {
        let unit = parse("int grid[2][3];");
        match &unit.globals[0] {
            Stmt::VarDecl(v) => match &v.ty {
                Type::Array { elem, .. } => {
                    assert!(matches!(**elem, Type::Array { .. }));
                }
                other => panic!("expected array, got {:?}", other),
            },
            other => panic!("expected var decl, got {:?}", other),
        }
    }

    #[test]
    fn test_struct_with_bitfields() {
        let unit = parse("struct flags { unsigned a : 3; unsigned b : 5; };");
        match &unit.globals[0] {
            Stmt::StructDecl { tag, members, .. } => {
                assert_eq!(tag, "flags");
                let members = members.as_ref().unwrap();
                assert_eq!(members.len(), 2);
                assert!(members[0].bit_width.is_some());
            }
            other => panic!("expected struct decl, got {:?}", other),
        }
    }

    #[test]
    fn test_typedef_then_use() {
        let unit = parse("typedef unsigned long size_t;\nsize_t n;");
        assert!(matches!(&unit.globals[0], Stmt::Typedef { .. }));
        assert!(matches!(&unit.globals[1], Stmt::VarDecl(_)));
    }

    #[test]
    fn test_precedence_mul_binds_tighter() {
        let unit = parse("int f(void) { return 1 + 2 * 3; }");
        let body = unit.funcs[0].body.as_ref().unwrap();
        match &body[0] {
            Stmt::Return {
                value: Some(Expr::Binary { op, rhs, .. }),
                ..
            } => {
                assert_eq!(*op, BinaryOp::Add);
                assert!(matches!(
                    **rhs,
                    Expr::Binary {
                        op: BinaryOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("expected return of binary, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let unit = parse("void f(void) { int a; int b; a = b = 1; }");
        let body = unit.funcs[0].body.as_ref().unwrap();
        match &body[2] {
            Stmt::Expr(Expr::Assign { value, .. }) => {
                assert!(matches!(**value, Expr::Assign { .. }));
            }
            other => panic!("expected nested assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_assign_index_and_member_forms() {
        let unit = parse(
            "struct p { int x; };\nvoid f(void) { int a[4]; struct p q; a[1] = 2; q.x = 3; }",
        );
        let body = unit.funcs[0].body.as_ref().unwrap();
        assert!(matches!(&body[2], Stmt::Expr(Expr::AssignIndex { .. })));
        assert!(matches!(&body[3], Stmt::Expr(Expr::AssignMember { .. })));
    }

    #[test]
    fn test_switch_structure() {
        let unit = parse(
            "int f(int x) { switch (x) { case 1: return 1; case 2: return 2; default: return 0; } }",
        );
        let body = unit.funcs[0].body.as_ref().unwrap();
        match &body[0] {
            Stmt::Switch { cases, default, .. } => {
                assert_eq!(cases.len(), 2);
                assert!(default.is_some());
            }
            other => panic!("expected switch, got {:?}", other),
        }
    }

    #[test]
    fn test_goto_and_label() {
        let unit = parse("void f(void) { goto done; done: return; }");
        let body = unit.funcs[0].body.as_ref().unwrap();
        assert!(matches!(&body[0], Stmt::Goto { name, .. } if name == "done"));
        assert!(matches!(&body[1], Stmt::Label { name, .. } if name == "done"));
    }

    #[test]
    fn test_cast_and_sizeof_type() {
        let unit = parse("unsigned long f(void) { return sizeof(int) + (unsigned long)1; }");
        let body = unit.funcs[0].body.as_ref().unwrap();
        match &body[0] {
            Stmt::Return {
                value: Some(Expr::Binary { lhs, rhs, .. }),
                ..
            } => {
                assert!(matches!(**lhs, Expr::Sizeof { .. }));
                assert!(matches!(**rhs, Expr::Cast { .. }));
            }
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_variadic_prototype() {
        let unit = parse("int printf(const char *fmt, ...);");
        assert!(unit.funcs[0].variadic);
    }

    #[test]
    fn test_error_reports_expected_token() {
        let err = parse_err("int f(void) { return 1 }");
        assert!(err.message.contains("expected ';'"), "got: {}", err.message);
    }

    #[test]
    fn test_designated_initializers() {
        let unit = parse("int a[3] = { [0] = 1, [2] = 3 };");
        match &unit.globals[0] {
            Stmt::VarDecl(v) => match v.init.as_ref().unwrap() {
                Initializer::List(items) => {
                    assert!(matches!(items[0].designator, Some(Designator::Index(_))));
                }
                other => panic!("expected list initializer, got {:?}", other),
            },
            other => panic!("expected var decl, got {:?}", other),
        }
    }

    #[test]
    fn test_postfix_increment_desugars() {
        let unit = parse("void f(void) { int i; i++; }");
        let body = unit.funcs[0].body.as_ref().unwrap();
        // i++ becomes (i = i + 1) - 1
        match &body[1] {
            Stmt::Expr(Expr::Binary {
                op: BinaryOp::Sub,
                lhs,
                ..
            }) => assert!(matches!(**lhs, Expr::Assign { .. })),
            other => panic!("expected desugared increment, got {:?}", other),
        }
    }
}

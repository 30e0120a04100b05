use std::collections::HashMap;

use crate::diagnostic::Diagnostic;
use crate::ir::types::{Allocation, BufferType, ElementKind, TempType, Type};
use crate::ir::{BinOp, FuncKind, Index, Module, OpKind, RegionId, ValueId, INDEX_SIZE};
use crate::lower::layout::BufferLayout;
use crate::span::{Span, Spanned};

use super::lexeme::Lexeme;

const MAX_NESTING_DEPTH: u32 = 64;

/// Recursive-descent parser for the IR textual form. Builds the module
/// directly; structural legality beyond the grammar is the verifier's job.
pub struct Parser {
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
    module: Module,
    /// Lexical scopes for `%name` bindings. Apply bodies are isolated and
    /// replace the stack; loop and conditional bodies extend it.
    scopes: Vec<HashMap<String, ValueId>>,
    depth: u32,
}

type ParseResult<T> = Result<T, Diagnostic>;

impl Parser {
    pub fn new(tokens: Vec<Spanned<Lexeme>>) -> Self {
        Self {
            tokens,
            pos: 0,
            module: Module::new(),
            scopes: Vec::new(),
            depth: 0,
        }
    }

    pub fn parse_module(mut self) -> Result<Module, Vec<Diagnostic>> {
        while !self.at(&Lexeme::Eof) {
            if let Err(diag) = self.parse_func() {
                return Err(vec![diag]);
            }
        }
        Ok(self.module)
    }

    // ── Token helpers ─────────────────────────────────────────────

    fn current(&self) -> &Lexeme {
        &self.tokens[self.pos].node
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn advance(&mut self) -> Spanned<Lexeme> {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, lexeme: &Lexeme) -> bool {
        self.current() == lexeme
    }

    fn eat(&mut self, lexeme: &Lexeme) -> bool {
        if self.at(lexeme) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, lexeme: &Lexeme) -> ParseResult<Span> {
        if self.at(lexeme) {
            Ok(self.advance().span)
        } else {
            Err(self.error(format!("expected '{}', found '{}'", lexeme, self.current())))
        }
    }

    fn at_ident(&self, word: &str) -> bool {
        matches!(self.current(), Lexeme::Ident(name) if name == word)
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.at_ident(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> ParseResult<Spanned<String>> {
        match self.current().clone() {
            Lexeme::Ident(name) => Ok(self.advance().map(|_| name)),
            other => Err(self.error(format!("expected an identifier, found '{}'", other))),
        }
    }

    fn expect_value_name(&mut self) -> ParseResult<Spanned<String>> {
        match self.current().clone() {
            Lexeme::ValueName(name) => Ok(self.advance().map(|_| name)),
            other => Err(self.error(format!("expected a value name, found '{}'", other))),
        }
    }

    fn expect_symbol_name(&mut self) -> ParseResult<Spanned<String>> {
        match self.current().clone() {
            Lexeme::SymbolName(name) => Ok(self.advance().map(|_| name)),
            other => Err(self.error(format!("expected a symbol name, found '{}'", other))),
        }
    }

    fn expect_int(&mut self) -> ParseResult<i64> {
        let negative = self.eat(&Lexeme::Minus);
        match *self.current() {
            Lexeme::Int(value) => {
                self.advance();
                Ok(if negative { -value } else { value })
            }
            ref other => Err(self.error(format!("expected an integer, found '{}'", other))),
        }
    }

    fn expect_number(&mut self) -> ParseResult<f64> {
        let negative = self.eat(&Lexeme::Minus);
        let value = match *self.current() {
            Lexeme::Int(value) => value as f64,
            Lexeme::Float(value) => value,
            ref other => {
                return Err(self.error(format!("expected a number, found '{}'", other)));
            }
        };
        self.advance();
        Ok(if negative { -value } else { value })
    }

    fn error(&self, message: String) -> Diagnostic {
        Diagnostic::error(message, self.current_span())
    }

    // ── Scopes ────────────────────────────────────────────────────

    fn bind(&mut self, name: Spanned<String>, value: ValueId) -> ParseResult<()> {
        let scope = self.scopes.last_mut().expect("no active scope");
        if scope.insert(name.node.clone(), value).is_some() {
            return Err(Diagnostic::error(
                format!("value '%{}' is defined twice", name.node),
                name.span,
            ));
        }
        Ok(())
    }

    fn lookup(&self, name: &Spanned<String>) -> ParseResult<ValueId> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(&name.node) {
                return Ok(*value);
            }
        }
        Err(Diagnostic::error(
            format!("unknown value '%{}'", name.node),
            name.span,
        ))
    }

    // ── Attributes and types ──────────────────────────────────────

    /// `[a, b, c]` — rejects any arity other than three.
    fn parse_index_tuple(&mut self) -> ParseResult<Index> {
        let start = self.expect(&Lexeme::LBracket)?;
        let mut elems = Vec::new();
        if !self.at(&Lexeme::RBracket) {
            loop {
                elems.push(self.expect_int()?);
                if !self.eat(&Lexeme::Comma) {
                    break;
                }
            }
        }
        let end = self.expect(&Lexeme::RBracket)?;
        if elems.len() != INDEX_SIZE {
            return Err(Diagnostic::error(
                format!(
                    "expected an index tuple of length {}, found {}",
                    INDEX_SIZE,
                    elems.len()
                ),
                start.merge(end),
            ));
        }
        Ok([elems[0], elems[1], elems[2]])
    }

    /// `([lb] : [ub])`
    fn parse_bounds(&mut self) -> ParseResult<(Index, Index)> {
        self.expect(&Lexeme::LParen)?;
        let lb = self.parse_index_tuple()?;
        self.expect(&Lexeme::Colon)?;
        let ub = self.parse_index_tuple()?;
        self.expect(&Lexeme::RParen)?;
        Ok((lb, ub))
    }

    fn parse_element_kind(&mut self) -> ParseResult<ElementKind> {
        let word = self.expect_ident()?;
        match word.node.as_str() {
            "f32" => Ok(ElementKind::F32),
            "f64" => Ok(ElementKind::F64),
            other => Err(Diagnostic::error(
                format!("expected an element type, found '{}'", other),
                word.span,
            )),
        }
    }

    fn parse_allocation(&mut self) -> ParseResult<Allocation> {
        let word = self.expect_ident()?;
        let mut mask = [false; 3];
        for ch in word.node.chars() {
            match ch {
                'i' => mask[0] = true,
                'j' => mask[1] = true,
                'k' => mask[2] = true,
                _ => {
                    return Err(Diagnostic::error(
                        format!("invalid allocation '{}'", word.node),
                        word.span,
                    ));
                }
            }
        }
        Ok(Allocation(mask))
    }

    fn parse_type(&mut self) -> ParseResult<Type> {
        let head = self.expect_ident()?;
        match head.node.as_str() {
            "index" => Ok(Type::Index),
            "bool" => Ok(Type::Bool),
            "f32" => Ok(Type::Element(ElementKind::F32)),
            "f64" => Ok(Type::Element(ElementKind::F64)),
            "field" => {
                self.expect(&Lexeme::LAngle)?;
                let allocation = self.parse_allocation()?;
                self.expect(&Lexeme::Comma)?;
                let element = self.parse_element_kind()?;
                self.expect(&Lexeme::RAngle)?;
                Ok(Type::field(element, allocation))
            }
            "temp" => {
                self.expect(&Lexeme::LAngle)?;
                let allocation = self.parse_allocation()?;
                self.expect(&Lexeme::Comma)?;
                let element = self.parse_element_kind()?;
                let mut shape = [None; 3];
                if self.eat(&Lexeme::Comma) {
                    shape = self.parse_shape()?;
                }
                self.expect(&Lexeme::RAngle)?;
                Ok(Type::Temp(TempType {
                    element,
                    allocation,
                    shape,
                }))
            }
            "buffer" => {
                self.expect(&Lexeme::LAngle)?;
                let element = self.parse_element_kind()?;
                self.expect(&Lexeme::Comma)?;
                self.expect_keyword("shape")?;
                let shape = self.parse_index_tuple()?;
                self.expect(&Lexeme::Comma)?;
                self.expect_keyword("strides")?;
                let strides = self.parse_index_tuple()?;
                self.expect(&Lexeme::Comma)?;
                self.expect_keyword("offset")?;
                let offset = self.expect_int()?;
                self.expect(&Lexeme::RAngle)?;
                Ok(Type::Buffer(BufferType {
                    element,
                    layout: BufferLayout {
                        shape,
                        strides,
                        offset,
                    },
                }))
            }
            other => Err(Diagnostic::error(
                format!("expected a type, found '{}'", other),
                head.span,
            )),
        }
    }

    /// `[64, ?, 60]` — static or dynamic per-dimension extents.
    fn parse_shape(&mut self) -> ParseResult<[Option<i64>; 3]> {
        let start = self.expect(&Lexeme::LBracket)?;
        let mut elems = Vec::new();
        loop {
            if self.eat(&Lexeme::Question) {
                elems.push(None);
            } else {
                elems.push(Some(self.expect_int()?));
            }
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        let end = self.expect(&Lexeme::RBracket)?;
        if elems.len() != INDEX_SIZE {
            return Err(Diagnostic::error(
                format!(
                    "expected a shape of length {}, found {}",
                    INDEX_SIZE,
                    elems.len()
                ),
                start.merge(end),
            ));
        }
        Ok([elems[0], elems[1], elems[2]])
    }

    fn expect_keyword(&mut self, word: &str) -> ParseResult<()> {
        if self.eat_ident(word) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found '{}'", word, self.current())))
        }
    }

    fn parse_type_list(&mut self) -> ParseResult<Vec<Type>> {
        self.expect(&Lexeme::LParen)?;
        let mut types = Vec::new();
        if !self.at(&Lexeme::RParen) {
            loop {
                types.push(self.parse_type()?);
                if !self.eat(&Lexeme::Comma) {
                    break;
                }
            }
        }
        self.expect(&Lexeme::RParen)?;
        Ok(types)
    }

    // ── Routines ──────────────────────────────────────────────────

    fn parse_func(&mut self) -> ParseResult<()> {
        let span = self.current_span();
        self.expect_keyword("func")?;
        let name = self.expect_symbol_name()?;

        self.expect(&Lexeme::LParen)?;
        let mut param_names = Vec::new();
        let mut param_types = Vec::new();
        if !self.at(&Lexeme::RParen) {
            loop {
                let param = self.expect_value_name()?;
                self.expect(&Lexeme::Colon)?;
                let ty = self.parse_type()?;
                param_names.push(param);
                param_types.push(ty);
                if !self.eat(&Lexeme::Comma) {
                    break;
                }
            }
        }
        self.expect(&Lexeme::RParen)?;

        let kind = if self.eat_ident("program") {
            FuncKind::StencilProgram
        } else if self.eat_ident("function") {
            FuncKind::StencilFunction
        } else {
            FuncKind::Plain
        };
        let result_types = if self.eat(&Lexeme::Arrow) {
            self.parse_type_list()?
        } else {
            Vec::new()
        };

        let region = self.module.new_region(&param_types);
        let args = self.module.region_args(region).to_vec();
        self.scopes.push(HashMap::new());
        for (param, arg) in param_names.into_iter().zip(args) {
            self.bind(param, arg)?;
        }
        self.parse_region_ops(region)?;
        self.scopes.pop();

        let func = self.module.create_op(
            span,
            OpKind::Func {
                name: name.node,
                kind,
                result_types,
            },
            vec![],
            vec![],
            vec![region],
        );
        self.module.add_func(func);
        Ok(())
    }

    fn parse_region_ops(&mut self, region: RegionId) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(self.error("region nesting depth exceeded".to_string()));
        }
        self.expect(&Lexeme::LBrace)?;
        while !self.at(&Lexeme::RBrace) {
            if self.at(&Lexeme::Eof) {
                return Err(self.error("unexpected end of input inside a region".to_string()));
            }
            self.parse_op(region)?;
        }
        self.expect(&Lexeme::RBrace)?;
        self.depth -= 1;
        Ok(())
    }

    // ── Operations ────────────────────────────────────────────────

    fn parse_op(&mut self, region: RegionId) -> ParseResult<()> {
        let mut result_names = Vec::new();
        if matches!(self.current(), Lexeme::ValueName(_)) {
            loop {
                result_names.push(self.expect_value_name()?);
                if !self.eat(&Lexeme::Comma) {
                    break;
                }
            }
            self.expect(&Lexeme::Equal)?;
        }

        let mnemonic = self.expect_ident()?;
        let span = mnemonic.span;
        match mnemonic.node.as_str() {
            "assert" => {
                let field = self.parse_operand()?;
                let (lb, ub) = self.parse_bounds()?;
                self.finish_op(region, span, OpKind::Assert { lb, ub }, vec![field], vec![], vec![], result_names)
            }
            "load" => {
                let field = self.parse_operand()?;
                self.expect(&Lexeme::Colon)?;
                let result_ty = self.parse_type()?;
                self.finish_op(region, span, OpKind::Load, vec![field], vec![result_ty], vec![], result_names)
            }
            "store" => {
                let view = self.parse_operand()?;
                self.expect_keyword("to")?;
                let field = self.parse_operand()?;
                let (lb, ub) = self.parse_bounds()?;
                self.finish_op(region, span, OpKind::Store { lb, ub }, vec![view, field], vec![], vec![], result_names)
            }
            "cast" => {
                let field = self.parse_operand()?;
                let (lb, ub) = self.parse_bounds()?;
                let ty = self.module.value_type(field);
                self.finish_op(region, span, OpKind::Cast { lb, ub }, vec![field], vec![ty], vec![], result_names)
            }
            "access" => {
                let view = self.parse_operand()?;
                let offset = self.parse_index_tuple()?;
                let element = self.element_of(view, span)?;
                self.finish_op(
                    region,
                    span,
                    OpKind::Access { offset },
                    vec![view],
                    vec![Type::Element(element)],
                    vec![],
                    result_names,
                )
            }
            "dyn_access" => {
                let view = self.parse_operand()?;
                self.expect(&Lexeme::LBracket)?;
                let mut operands = vec![view];
                loop {
                    operands.push(self.parse_operand()?);
                    if !self.eat(&Lexeme::Comma) {
                        break;
                    }
                }
                self.expect(&Lexeme::RBracket)?;
                if operands.len() != 1 + INDEX_SIZE {
                    return Err(Diagnostic::error(
                        format!("expected {} index operands", INDEX_SIZE),
                        span,
                    ));
                }
                self.expect_keyword("in")?;
                let (lb, ub) = self.parse_bounds()?;
                let element = self.element_of(view, span)?;
                self.finish_op(
                    region,
                    span,
                    OpKind::DynAccess { lb, ub },
                    operands,
                    vec![Type::Element(element)],
                    vec![],
                    result_names,
                )
            }
            "apply" => self.parse_apply(region, span, result_names),
            "return" => {
                let unroll = if self.eat_ident("unroll") {
                    Some(self.parse_index_tuple()?)
                } else {
                    None
                };
                let operands = self.parse_operand_names()?;
                self.finish_op(region, span, OpKind::Return { unroll }, operands, vec![], vec![], result_names)
            }
            "store_result" => {
                let value = self.parse_operand()?;
                let ty = self.module.value_type(value);
                self.finish_op(region, span, OpKind::StoreResult, vec![value], vec![ty], vec![], result_names)
            }
            "call" => {
                let callee = self.expect_symbol_name()?;
                self.expect(&Lexeme::LParen)?;
                let mut operands = Vec::new();
                if !self.at(&Lexeme::RParen) {
                    loop {
                        operands.push(self.parse_operand()?);
                        if !self.eat(&Lexeme::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&Lexeme::RParen)?;
                let offset = self.parse_index_tuple()?;
                self.expect(&Lexeme::Colon)?;
                self.parse_type_list()?; // parameter types, informational
                self.expect(&Lexeme::Arrow)?;
                let result_ty = self.parse_type()?;
                self.finish_op(
                    region,
                    span,
                    OpKind::Call {
                        callee: callee.node,
                        offset,
                    },
                    operands,
                    vec![result_ty],
                    vec![],
                    result_names,
                )
            }
            "combine" => self.parse_combine(region, span, result_names),
            "ret" => {
                let operands = self.parse_operand_names()?;
                self.finish_op(region, span, OpKind::FuncReturn, operands, vec![], vec![], result_names)
            }
            "for" => self.parse_for(region, span, result_names),
            "if" => self.parse_if(region, span, result_names),
            "yield" => {
                let operands = self.parse_operand_names()?;
                self.finish_op(region, span, OpKind::Yield, operands, vec![], vec![], result_names)
            }
            "alloc" => {
                self.expect(&Lexeme::Colon)?;
                let ty = self.parse_type()?;
                self.finish_op(region, span, OpKind::Alloc, vec![], vec![ty], vec![], result_names)
            }
            "dealloc" => {
                let buffer = self.parse_operand()?;
                self.finish_op(region, span, OpKind::Dealloc, vec![buffer], vec![], vec![], result_names)
            }
            "load_elem" => {
                let buffer = self.parse_operand()?;
                let indices = self.parse_bracketed_operands()?;
                let element = self.element_of(buffer, span)?;
                let mut operands = vec![buffer];
                operands.extend(indices);
                self.finish_op(
                    region,
                    span,
                    OpKind::LoadElem,
                    operands,
                    vec![Type::Element(element)],
                    vec![],
                    result_names,
                )
            }
            "store_elem" => {
                let value = self.parse_operand()?;
                self.expect(&Lexeme::Comma)?;
                let buffer = self.parse_operand()?;
                let indices = self.parse_bracketed_operands()?;
                let mut operands = vec![value, buffer];
                operands.extend(indices);
                self.finish_op(region, span, OpKind::StoreElem, operands, vec![], vec![], result_names)
            }
            "const_index" => {
                let value = self.expect_int()?;
                self.finish_op(
                    region,
                    span,
                    OpKind::ConstIndex { value },
                    vec![],
                    vec![Type::Index],
                    vec![],
                    result_names,
                )
            }
            "index_add" => {
                let a = self.parse_operand()?;
                self.expect(&Lexeme::Comma)?;
                let b = self.parse_operand()?;
                self.finish_op(region, span, OpKind::IndexAdd, vec![a, b], vec![Type::Index], vec![], result_names)
            }
            "const" => {
                let element = self.parse_element_kind()?;
                let value = self.expect_number()?;
                self.finish_op(
                    region,
                    span,
                    OpKind::Constant { value, element },
                    vec![],
                    vec![Type::Element(element)],
                    vec![],
                    result_names,
                )
            }
            "add" | "sub" | "mul" | "div" => {
                let op = match mnemonic.node.as_str() {
                    "add" => BinOp::Add,
                    "sub" => BinOp::Sub,
                    "mul" => BinOp::Mul,
                    _ => BinOp::Div,
                };
                let a = self.parse_operand()?;
                self.expect(&Lexeme::Comma)?;
                let b = self.parse_operand()?;
                let ty = self.module.value_type(a);
                self.finish_op(region, span, OpKind::Binary { op }, vec![a, b], vec![ty], vec![], result_names)
            }
            other => Err(Diagnostic::error(
                format!("unknown operation '{}'", other),
                span,
            )),
        }
    }

    fn parse_apply(
        &mut self,
        region: RegionId,
        span: Span,
        result_names: Vec<Spanned<String>>,
    ) -> ParseResult<()> {
        let mut operands = Vec::new();
        let mut arg_names = Vec::new();
        let mut arg_types = Vec::new();
        if self.eat(&Lexeme::LParen) {
            loop {
                let arg = self.expect_value_name()?;
                self.expect(&Lexeme::Equal)?;
                let operand = self.expect_value_name()?;
                self.expect(&Lexeme::Colon)?;
                let ty = self.parse_type()?;
                arg_names.push(arg);
                operands.push(self.lookup(&operand)?);
                arg_types.push(ty);
                if !self.eat(&Lexeme::Comma) {
                    break;
                }
            }
            self.expect(&Lexeme::RParen)?;
        }
        self.expect(&Lexeme::Arrow)?;
        let result_types = self.parse_type_list()?;

        let body = self.module.new_region(&arg_types);
        let args = self.module.region_args(body).to_vec();

        // The body is isolated from above: only the bound arguments are
        // visible inside.
        let saved = std::mem::take(&mut self.scopes);
        self.scopes.push(HashMap::new());
        for (arg_name, arg) in arg_names.into_iter().zip(args) {
            self.bind(arg_name, arg)?;
        }
        let body_result = self.parse_region_ops(body);
        self.scopes = saved;
        body_result?;

        let (lb, ub) = if self.eat_ident("to") {
            let (lb, ub) = self.parse_bounds()?;
            (Some(lb), Some(ub))
        } else {
            (None, None)
        };
        self.finish_op(
            region,
            span,
            OpKind::Apply { lb, ub },
            operands,
            result_types,
            vec![body],
            result_names,
        )
    }

    fn parse_combine(
        &mut self,
        region: RegionId,
        span: Span,
        result_names: Vec<Spanned<String>>,
    ) -> ParseResult<()> {
        let dim = self.expect_int()?;
        if !(0..INDEX_SIZE as i64).contains(&dim) {
            return Err(Diagnostic::error(
                format!("expected a combine dimension below {}", INDEX_SIZE),
                span,
            ));
        }
        let lower_ops = self.parse_paren_operands()?;
        let upper_ops = self.parse_paren_operands()?;
        let lowerext_ops = if self.eat_ident("lowerext") {
            self.parse_paren_operands()?
        } else {
            Vec::new()
        };
        let upperext_ops = if self.eat_ident("upperext") {
            self.parse_paren_operands()?
        } else {
            Vec::new()
        };
        self.expect(&Lexeme::Arrow)?;
        let result_types = self.parse_type_list()?;

        let kind = OpKind::Combine {
            dim: dim as usize,
            lower: lower_ops.len(),
            upper: upper_ops.len(),
            lowerext: lowerext_ops.len(),
            upperext: upperext_ops.len(),
        };
        let operands = lower_ops
            .into_iter()
            .chain(upper_ops)
            .chain(lowerext_ops)
            .chain(upperext_ops)
            .collect();
        self.finish_op(region, span, kind, operands, result_types, vec![], result_names)
    }

    fn parse_for(
        &mut self,
        region: RegionId,
        span: Span,
        result_names: Vec<Spanned<String>>,
    ) -> ParseResult<()> {
        let iv_name = self.expect_value_name()?;
        self.expect_keyword("in")?;
        self.expect(&Lexeme::LParen)?;
        let lower = self.expect_int()?;
        self.expect(&Lexeme::Colon)?;
        let upper = self.expect_int()?;
        self.expect(&Lexeme::RParen)?;

        let body = self.module.new_region(&[Type::Index]);
        let iv = self.module.region_args(body)[0];
        self.scopes.push(HashMap::new());
        self.bind(iv_name, iv)?;
        let body_result = self.parse_region_ops(body);
        self.scopes.pop();
        body_result?;

        self.finish_op(
            region,
            span,
            OpKind::For { lower, upper },
            vec![],
            vec![],
            vec![body],
            result_names,
        )
    }

    fn parse_if(
        &mut self,
        region: RegionId,
        span: Span,
        result_names: Vec<Spanned<String>>,
    ) -> ParseResult<()> {
        let cond = self.parse_operand()?;
        let result_types = if self.eat(&Lexeme::Arrow) {
            self.parse_type_list()?
        } else {
            Vec::new()
        };

        let then_region = self.module.new_region(&[]);
        self.scopes.push(HashMap::new());
        let then_result = self.parse_region_ops(then_region);
        self.scopes.pop();
        then_result?;

        self.expect_keyword("else")?;
        let else_region = self.module.new_region(&[]);
        self.scopes.push(HashMap::new());
        let else_result = self.parse_region_ops(else_region);
        self.scopes.pop();
        else_result?;

        self.finish_op(
            region,
            span,
            OpKind::If,
            vec![cond],
            result_types,
            vec![then_region, else_region],
            result_names,
        )
    }

    // ── Shared op plumbing ────────────────────────────────────────

    fn parse_operand(&mut self) -> ParseResult<ValueId> {
        let name = self.expect_value_name()?;
        self.lookup(&name)
    }

    /// Zero or more `%name` operands, as in `return %a, %b`.
    fn parse_operand_names(&mut self) -> ParseResult<Vec<ValueId>> {
        let mut operands = Vec::new();
        if matches!(self.current(), Lexeme::ValueName(_)) {
            loop {
                operands.push(self.parse_operand()?);
                if !self.eat(&Lexeme::Comma) {
                    break;
                }
            }
        }
        Ok(operands)
    }

    fn parse_paren_operands(&mut self) -> ParseResult<Vec<ValueId>> {
        self.expect(&Lexeme::LParen)?;
        let mut operands = Vec::new();
        if !self.at(&Lexeme::RParen) {
            loop {
                operands.push(self.parse_operand()?);
                if !self.eat(&Lexeme::Comma) {
                    break;
                }
            }
        }
        self.expect(&Lexeme::RParen)?;
        Ok(operands)
    }

    fn parse_bracketed_operands(&mut self) -> ParseResult<Vec<ValueId>> {
        self.expect(&Lexeme::LBracket)?;
        let mut operands = Vec::new();
        loop {
            operands.push(self.parse_operand()?);
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::RBracket)?;
        if operands.len() != INDEX_SIZE {
            return Err(self.error(format!("expected {} index operands", INDEX_SIZE)));
        }
        Ok(operands)
    }

    fn element_of(&self, value: ValueId, span: Span) -> ParseResult<ElementKind> {
        self.module.value_type(value).element_kind().ok_or_else(|| {
            Diagnostic::error(
                format!(
                    "expected a storage operand, found '{}'",
                    self.module.value_type(value)
                ),
                span,
            )
        })
    }

    /// Creates the op, appends it to the region, and binds result names.
    #[allow(clippy::too_many_arguments)]
    fn finish_op(
        &mut self,
        region: RegionId,
        span: Span,
        kind: OpKind,
        operands: Vec<ValueId>,
        result_types: Vec<Type>,
        regions: Vec<RegionId>,
        result_names: Vec<Spanned<String>>,
    ) -> ParseResult<()> {
        if result_names.len() != result_types.len() {
            return Err(Diagnostic::error(
                format!(
                    "operation produces {} result(s) but {} name(s) are bound",
                    result_types.len(),
                    result_names.len()
                ),
                span,
            ));
        }
        let op = self
            .module
            .create_op(span, kind, operands, result_types, regions);
        self.module.push_op(region, op);
        let results = self.module.results(op).to_vec();
        for (name, result) in result_names.into_iter().zip(results) {
            self.bind(name, result)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{parse_module, print_module};
    use crate::ir::{FuncKind, OpKind};

    const COPY: &str = "\
func @copy(%arg0 : field<ijk, f64>) program {
  assert %arg0 ([0, 0, 0] : [10, 10, 10])
  %0 = load %arg0 : temp<ijk, f64>
  %1 = apply (%2 = %0 : temp<ijk, f64>) -> (temp<ijk, f64>) {
    %3 = access %2[0, 0, 0]
    return %3
  } to ([0, 0, 0] : [10, 10, 10])
  store %1 to %arg0 ([0, 0, 0] : [10, 10, 10])
  ret
}
";

    #[test]
    fn test_parse_copy_program() {
        let m = parse_module(COPY, 0).expect("parse failed");
        assert_eq!(m.funcs().len(), 1);
        let func = m.funcs()[0];
        assert!(matches!(
            m.op(func).kind,
            OpKind::Func {
                kind: FuncKind::StencilProgram,
                ..
            }
        ));
        let body = m.regions_of(func)[0];
        assert_eq!(m.region_ops(body).len(), 5);
        crate::ir::verify::verify_module(&m).unwrap();
    }

    #[test]
    fn test_print_parse_round_trip() {
        let m = parse_module(COPY, 0).unwrap();
        let printed = print_module(&m);
        let reparsed = parse_module(&printed, 0).expect("printed form must re-parse");
        assert_eq!(printed, print_module(&reparsed));
    }

    #[test]
    fn test_malformed_tuple_arity_rejected() {
        let source = "\
func @bad(%arg0 : field<ijk, f64>) program {
  assert %arg0 ([0, 0] : [10, 10])
  ret
}
";
        let errors = parse_module(source, 0).unwrap_err();
        assert!(errors[0]
            .message
            .contains("expected an index tuple of length 3"));
    }

    #[test]
    fn test_unknown_value_rejected() {
        let source = "\
func @bad() {
  dealloc %nope
  ret
}
";
        let errors = parse_module(source, 0).unwrap_err();
        assert!(errors[0].message.contains("unknown value '%nope'"));
    }

    #[test]
    fn test_apply_body_is_isolated() {
        let source = "\
func @bad(%arg0 : field<ijk, f64>) program {
  %0 = load %arg0 : temp<ijk, f64>
  %1 = apply (%2 = %0 : temp<ijk, f64>) -> (temp<ijk, f64>) {
    %3 = access %0[0, 0, 0]
    return %3
  } to ([0, 0, 0] : [4, 4, 4])
  ret
}
";
        let errors = parse_module(source, 0).unwrap_err();
        assert!(errors[0].message.contains("unknown value '%0'"));
    }

    #[test]
    fn test_parse_loop_nest_form() {
        let source = "\
func @nest(%arg0 : buffer<f64, shape [4, 4, 4], strides [1, 4, 16], offset 0>) {
  for %0 in (0 : 4) {
    for %1 in (0 : 4) {
      for %2 in (0 : 4) {
        %3 = const_index 1
        %4 = index_add %2, %3
        %5 = load_elem %arg0[%4, %1, %0]
        store_elem %5, %arg0[%2, %1, %0]
        yield
      }
      yield
    }
    yield
  }
  ret
}
";
        let m = parse_module(source, 0).expect("parse failed");
        crate::ir::verify::verify_module(&m).unwrap();
        let printed = print_module(&m);
        let reparsed = parse_module(&printed, 0).unwrap();
        assert_eq!(printed, print_module(&reparsed));
    }

    #[test]
    fn test_parse_combine_and_call() {
        let source = "\
func @weight(%arg0 : f64) function -> (f64) {
  ret %arg0
}

func @use(%arg0 : field<ijk, f64>) {
  %0 = load %arg0 : temp<ijk, f64>
  %1, %2 = apply (%3 = %0 : temp<ijk, f64>) -> (temp<ijk, f64>, temp<ijk, f64>) {
    %4 = access %3[0, 0, 0]
    %5 = call @weight(%4)[0, 0, 0] : (f64) -> f64
    return %4, %5
  } to ([0, 0, 0] : [4, 4, 4])
  %6, %7 = apply (%8 = %0 : temp<ijk, f64>) -> (temp<ijk, f64>, temp<ijk, f64>) {
    %9 = access %8[0, 0, 0]
    return %9, %9
  } to ([4, 0, 0] : [8, 4, 4])
  %10, %11 = combine 0 (%1, %2) (%6, %7) -> (temp<ijk, f64>, temp<ijk, f64>)
  store %10 to %arg0 ([0, 0, 0] : [8, 4, 4])
  ret
}
";
        let m = parse_module(source, 0).expect("parse failed");
        crate::ir::verify::verify_module(&m).unwrap();
        let printed = print_module(&m);
        let reparsed = parse_module(&printed, 0).unwrap();
        assert_eq!(printed, print_module(&reparsed));
    }
}

use crate::ast::*;
use crate::error::ParseError;
use crate::funcs::{Arity, Callee, FunctionRegistry};
use crate::lexer::{Token, TokenKind, Tokenizer, DEFAULT_LEFT_DELIM, DEFAULT_RIGHT_DELIM};
use crate::value::Value;
use std::collections::VecDeque;

/// Deepest allowed nesting of blocks and parenthesised pipelines.
pub const MAX_NESTING: usize = 256;

/// Why a node list stopped.
enum Stop {
    Eof,
    End(Span),
    /// `{{else` was consumed; the rest of that action is still pending.
    Else(Span),
}

pub struct Parser<'a> {
    lexer: Tokenizer<'a>,
    buffer: VecDeque<Token>,
    funcs: &'a FunctionRegistry,
    /// Number of lexically enclosing range bodies.
    range_depth: usize,
    /// Blocks and parens currently open.
    nesting: usize,
    eof: Span,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str, funcs: &'a FunctionRegistry) -> Self {
        Self::with_delims(input, DEFAULT_LEFT_DELIM, DEFAULT_RIGHT_DELIM, funcs)
    }

    pub fn with_delims(
        input: &'a str,
        left: &'a str,
        right: &'a str,
        funcs: &'a FunctionRegistry,
    ) -> Self {
        Self {
            lexer: Tokenizer::with_delims(input, left, right),
            buffer: VecDeque::new(),
            funcs,
            range_depth: 0,
            nesting: 0,
            eof: span(input.len(), 0),
        }
    }

    fn peek_token(&mut self, n: usize) -> Result<Option<&Token>, ParseError> {
        while self.buffer.len() <= n {
            match self.lexer.next() {
                Some(token) => self.buffer.push_back(token?),
                None => break,
            }
        }
        Ok(self.buffer.get(n))
    }

    fn peek(&mut self, n: usize) -> Result<Option<&TokenKind>, ParseError> {
        Ok(self.peek_token(n)?.map(|t| &t.kind))
    }

    fn consume(&mut self) -> Result<Option<Token>, ParseError> {
        self.peek_token(0)?;
        Ok(self.buffer.pop_front())
    }

    /// Span of the next token, or the end of input.
    fn here(&mut self) -> Result<Span, ParseError> {
        let eof = self.eof;
        Ok(self.peek_token(0)?.map_or(eof, |t| t.span))
    }

    fn unexpected(&mut self, expected: &str) -> ParseError {
        let eof = self.eof;
        match self.peek_token(0) {
            Ok(Some(t)) => ParseError::syntax(t.kind.describe(), expected, t.span),
            Ok(None) => ParseError::syntax("end of input", expected, eof),
            Err(e) => e,
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        if self.peek(0)? == Some(&kind) {
            if let Some(token) = self.consume()? {
                return Ok(token);
            }
        }
        Err(self.unexpected(expected))
    }

    /// Open one nesting level. Errors need no matching `leave`: parsing
    /// stops at the first one.
    fn enter(&mut self, at: Span) -> Result<(), ParseError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(ParseError::syntax(
                format!("nesting deeper than {MAX_NESTING} levels"),
                "a shallower template",
                at,
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    pub fn parse(mut self) -> Result<Vec<Node>, ParseError> {
        let (nodes, stop) = self.parse_list()?;
        match stop {
            Stop::Eof => Ok(nodes),
            Stop::End(span) => Err(ParseError::syntax("`end`", "end of input", span)),
            Stop::Else(span) => Err(ParseError::syntax("`else`", "end of input", span)),
        }
    }

    fn parse_list(&mut self) -> Result<(Vec<Node>, Stop), ParseError> {
        let mut nodes = Vec::new();
        loop {
            let Some(token) = self.consume()? else {
                return Ok((nodes, Stop::Eof));
            };
            match token.kind {
                TokenKind::Text(s) => nodes.push(Node::Text(s)),
                TokenKind::ActionStart => {
                    let start = token.span;
                    match self.peek(0)? {
                        Some(TokenKind::End) => {
                            let end = self.consume()?.map_or(start, |t| t.span);
                            self.expect(TokenKind::ActionEnd, "end of action")?;
                            return Ok((nodes, Stop::End(join(start, end))));
                        }
                        Some(TokenKind::Else) => {
                            let end = self.consume()?.map_or(start, |t| t.span);
                            return Ok((nodes, Stop::Else(join(start, end))));
                        }
                        Some(TokenKind::Range) => nodes.push(self.parse_range(start)?),
                        Some(TokenKind::If) => {
                            self.consume()?;
                            nodes.push(Node::If(self.parse_branch(start, TokenKind::If)?));
                        }
                        Some(TokenKind::With) => {
                            self.consume()?;
                            nodes.push(Node::With(self.parse_branch(start, TokenKind::With)?));
                        }
                        Some(TokenKind::Break | TokenKind::Continue) => {
                            nodes.push(self.parse_loop_control(start)?)
                        }
                        Some(TokenKind::ActionEnd) => {
                            return Err(self.unexpected("a command"));
                        }
                        _ => {
                            let pipeline = self.parse_pipeline(1)?;
                            self.expect(TokenKind::ActionEnd, "end of action")?;
                            nodes.push(Node::Action(pipeline));
                        }
                    }
                }
                _ => return Err(ParseError::syntax(token.kind.describe(), "text or an action", token.span)),
            }
        }
    }

    fn parse_loop_control(&mut self, start: Span) -> Result<Node, ParseError> {
        let Some(token) = self.consume()? else {
            return Err(self.unexpected("`break` or `continue`"));
        };
        let span = join(start, token.span);
        let (keyword, node) = match token.kind {
            TokenKind::Break => ("break", Node::Break(span)),
            _ => ("continue", Node::Continue(span)),
        };
        if self.range_depth == 0 {
            return Err(ParseError::IllegalControlFlow { keyword, span });
        }
        self.expect(TokenKind::ActionEnd, "end of action")?;
        Ok(node)
    }

    fn parse_range(&mut self, start: Span) -> Result<Node, ParseError> {
        self.enter(start)?;
        self.expect(TokenKind::Range, "`range`")?;
        let pipeline = self.parse_pipeline(2)?;
        self.expect(TokenKind::ActionEnd, "end of action")?;

        self.range_depth += 1;
        let body = self.parse_list();
        self.range_depth -= 1;
        let (body, stop) = body?;

        let (else_body, end) = match stop {
            Stop::End(end) => (Vec::new(), end),
            Stop::Else(_) => {
                self.expect(TokenKind::ActionEnd, "end of action after `else`")?;
                self.parse_closing_list("range")?
            }
            Stop::Eof => return Err(ParseError::syntax("end of input", "`{{end}}` closing range", start)),
        };

        self.leave();
        Ok(Node::Range(RangeNode {
            pipeline,
            body,
            else_body,
            span: join(start, end),
        }))
    }

    /// `if` and `with`, including `{{else if}}` / `{{else with}}` chains.
    /// The keyword itself has been consumed.
    fn parse_branch(&mut self, start: Span, keyword: TokenKind) -> Result<BranchNode, ParseError> {
        self.enter(start)?;
        let pipeline = self.parse_pipeline(1)?;
        self.expect(TokenKind::ActionEnd, "end of action")?;
        let (body, stop) = self.parse_list()?;

        let (else_body, end) = match stop {
            Stop::End(end) => (Vec::new(), end),
            Stop::Else(else_span) if self.peek(0)? == Some(&keyword) => {
                self.consume()?;
                let nested = self.parse_branch(else_span, keyword.clone())?;
                let end = nested.span;
                let node = match keyword {
                    TokenKind::If => Node::If(nested),
                    _ => Node::With(nested),
                };
                (vec![node], end)
            }
            Stop::Else(_) => {
                self.expect(TokenKind::ActionEnd, "end of action after `else`")?;
                let what = if keyword == TokenKind::If { "if" } else { "with" };
                self.parse_closing_list(what)?
            }
            Stop::Eof => {
                return Err(ParseError::syntax(
                    "end of input",
                    format!("`{{{{end}}}}` closing {}", keyword.describe()),
                    start,
                ))
            }
        };

        self.leave();
        Ok(BranchNode {
            pipeline,
            body,
            else_body,
            span: join(start, end),
        })
    }

    /// An else body, which must be closed by `{{end}}`.
    fn parse_closing_list(&mut self, what: &str) -> Result<(Vec<Node>, Span), ParseError> {
        let (nodes, stop) = self.parse_list()?;
        match stop {
            Stop::End(end) => Ok((nodes, end)),
            Stop::Else(span) => Err(ParseError::syntax("second `else`", format!("`{{{{end}}}}` closing {what}"), span)),
            Stop::Eof => Err(ParseError::syntax("end of input", format!("`{{{{end}}}}` closing {what}"), self.eof)),
        }
    }

    fn parse_declaration(&mut self, max_vars: usize) -> Result<Option<Declaration>, ParseError> {
        let is_decl = match (self.peek(0)?.cloned(), self.peek(1)?.cloned()) {
            (Some(TokenKind::Variable(_)), Some(TokenKind::Declare | TokenKind::Assign)) => true,
            (Some(TokenKind::Variable(_)), Some(TokenKind::Comma)) => {
                matches!(self.peek(2)?, Some(TokenKind::Variable(_)))
                    && matches!(self.peek(3)?, Some(TokenKind::Declare | TokenKind::Assign))
            }
            _ => false,
        };
        if !is_decl {
            return Ok(None);
        }

        let start = self.here()?;
        let mut vars = Vec::new();
        loop {
            match self.consume()? {
                Some(Token { kind: TokenKind::Variable(name), span }) => {
                    if name == "$" {
                        return Err(ParseError::syntax("`$`", "a variable name to declare", span));
                    }
                    vars.push(name);
                }
                _ => return Err(self.unexpected("a variable")),
            }
            if matches!(self.peek(0)?, Some(TokenKind::Comma)) {
                self.consume()?;
            } else {
                break;
            }
        }
        let op = self.consume()?.ok_or_else(|| self.unexpected("`:=` or `=`"))?;
        let kind = match op.kind {
            TokenKind::Declare => DeclKind::Declare,
            _ => DeclKind::Assign,
        };
        let span = join(start, op.span);
        if vars.len() > max_vars {
            return Err(ParseError::syntax(
                format!("{} variables", vars.len()),
                format!("at most {max_vars} variable(s) here"),
                span,
            ));
        }
        Ok(Some(Declaration { vars, kind, span }))
    }

    /// `[decl] command { | command }`, stopping before `}}` or `)`.
    fn parse_pipeline(&mut self, max_vars: usize) -> Result<Pipeline, ParseError> {
        let start = self.here()?;
        let decl = self.parse_declaration(max_vars)?;
        let mut stages: Vec<Expr> = Vec::new();
        loop {
            if matches!(self.peek(0)?, Some(TokenKind::ActionEnd | TokenKind::RParen | TokenKind::Pipe) | None) {
                return Err(self.unexpected("a command"));
            }
            let stage = self.parse_command(!stages.is_empty())?;
            stages.push(stage);
            if matches!(self.peek(0)?, Some(TokenKind::Pipe)) {
                self.consume()?;
            } else {
                break;
            }
        }
        let end = stages.last().map_or(start, |s| s.span);
        Ok(Pipeline {
            decl,
            stages,
            span: join(start, end),
        })
    }

    fn at_command_end(&mut self) -> Result<bool, ParseError> {
        Ok(matches!(
            self.peek(0)?,
            Some(TokenKind::ActionEnd | TokenKind::RParen | TokenKind::Pipe) | None
        ))
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        while !self.at_command_end()? {
            args.push(self.parse_operand()?);
        }
        Ok(args)
    }

    fn parse_command(&mut self, piped: bool) -> Result<Expr, ParseError> {
        if let Some(TokenKind::Ident(_)) = self.peek(0)? {
            let Some(Token { kind: TokenKind::Ident(name), span: name_span }) = self.consume()? else {
                return Err(self.unexpected("a function name"));
            };
            let args = self.parse_args()?;
            return self.build_call(name, name_span, args, piped);
        }

        let operand = self.parse_operand()?;
        let args = self.parse_args()?;
        let span = args.last().map_or(operand.span, |a| join(operand.span, a.span));
        let expr = match operand.kind {
            ExprKind::FieldChain { root, fields, .. } if !args.is_empty() => Expr::new(
                ExprKind::FieldChain { root, fields, args },
                span,
            ),
            _ if !args.is_empty() => {
                return Err(ParseError::syntax(
                    "arguments",
                    "a function or method before its arguments",
                    span,
                ))
            }
            _ => operand,
        };
        if piped && !expr.accepts_input() {
            return Err(ParseError::syntax(
                "a value in a later pipeline stage",
                "a function, method or `slice`",
                expr.span,
            ));
        }
        Ok(expr)
    }

    fn build_call(
        &mut self,
        name: String,
        name_span: Span,
        args: Vec<Expr>,
        piped: bool,
    ) -> Result<Expr, ParseError> {
        let span = args.last().map_or(name_span, |a| join(name_span, a.span));
        let got = args.len() + usize::from(piped);

        // A host helper named `slice` replaces the built-in like any other.
        if name == "slice" && !self.funcs.contains(&name) {
            let arity = Arity::Between(1, 3);
            if !arity.accepts(got) {
                return Err(ParseError::WrongArity {
                    name,
                    expected: arity.to_string(),
                    got,
                    span,
                });
            }
            return Ok(Expr::new(ExprKind::Slice { operands: args }, span));
        }

        let callee = self
            .funcs
            .resolve(&name)
            .ok_or_else(|| ParseError::UndefinedFunction {
                name: name.clone(),
                span: name_span,
            })?;
        let arity = callee.arity();
        if !arity.accepts(got) {
            return Err(ParseError::WrongArity {
                name,
                expected: arity.to_string(),
                got,
                span,
            });
        }
        Ok(Expr::new(ExprKind::Call { name, callee, args }, span))
    }

    fn parse_operand(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.consume()? else {
            return Err(self.unexpected("an operand"));
        };
        let start = token.span;
        let root = match token.kind {
            TokenKind::Dot => return Ok(Expr::new(ExprKind::Dot, start)),
            TokenKind::Field(name) => {
                let dot = Expr::new(ExprKind::Dot, span(start.offset(), 0));
                return self.parse_field_chain(dot, vec![name], start);
            }
            TokenKind::Variable(name) => Expr::new(ExprKind::Variable(name), start),
            TokenKind::LParen => {
                self.enter(start)?;
                let inner = self.parse_pipeline(0)?;
                let close = self.expect(TokenKind::RParen, "`)`")?;
                self.leave();
                Expr::new(ExprKind::Pipeline(Box::new(inner)), join(start, close.span))
            }
            TokenKind::StringLit(s) => return Ok(Expr::new(ExprKind::Literal(Value::String(s)), start)),
            TokenKind::Int(i) => return Ok(Expr::new(ExprKind::Literal(Value::Int(i)), start)),
            TokenKind::Float(x) => return Ok(Expr::new(ExprKind::Literal(Value::Float(x)), start)),
            TokenKind::True => return Ok(Expr::new(ExprKind::Literal(Value::Bool(true)), start)),
            TokenKind::False => return Ok(Expr::new(ExprKind::Literal(Value::Bool(false)), start)),
            TokenKind::Nil => return Ok(Expr::new(ExprKind::Literal(Value::Null), start)),
            TokenKind::Ident(name) => {
                // A bare name in argument position is a zero-argument call.
                return self.build_call(name, start, Vec::new(), false);
            }
            other => return Err(ParseError::syntax(other.describe(), "an operand", start)),
        };
        self.parse_field_chain(root, Vec::new(), start)
    }

    /// Collect `.Field` tokens written directly after `root` (no whitespace).
    fn parse_field_chain(
        &mut self,
        root: Expr,
        mut fields: Vec<String>,
        start: Span,
    ) -> Result<Expr, ParseError> {
        let mut end = join(start, root.span);
        loop {
            let adjacent = match self.peek_token(0)? {
                Some(Token { kind: TokenKind::Field(_), span }) => {
                    span.offset() == end.offset() + end.len()
                }
                _ => false,
            };
            if !adjacent {
                break;
            }
            if let Some(Token { kind: TokenKind::Field(name), span }) = self.consume()? {
                fields.push(name);
                end = join(end, span);
            }
        }
        if fields.is_empty() {
            return Ok(root);
        }
        Ok(Expr::new(
            ExprKind::FieldChain {
                root: Box::new(root),
                fields,
                args: Vec::new(),
            },
            end,
        ))
    }
}

/// Every host function a parsed tree calls, for diagnostics.
pub fn called_functions(nodes: &[Node]) -> Vec<String> {
    fn walk_expr(expr: &Expr, out: &mut Vec<String>) {
        match &expr.kind {
            ExprKind::Call { name, callee, args } => {
                if matches!(callee, Callee::Host(_)) && !out.contains(name) {
                    out.push(name.clone());
                }
                args.iter().for_each(|a| walk_expr(a, out));
            }
            ExprKind::FieldChain { root, args, .. } => {
                walk_expr(root, out);
                args.iter().for_each(|a| walk_expr(a, out));
            }
            ExprKind::Slice { operands } => operands.iter().for_each(|a| walk_expr(a, out)),
            ExprKind::Pipeline(p) => walk_pipeline(p, out),
            ExprKind::Literal(_) | ExprKind::Dot | ExprKind::Variable(_) => {}
        }
    }
    fn walk_pipeline(p: &Pipeline, out: &mut Vec<String>) {
        p.stages.iter().for_each(|s| walk_expr(s, out));
    }
    fn walk(nodes: &[Node], out: &mut Vec<String>) {
        for node in nodes {
            match node {
                Node::Action(p) => walk_pipeline(p, out),
                Node::Range(r) => {
                    walk_pipeline(&r.pipeline, out);
                    walk(&r.body, out);
                    walk(&r.else_body, out);
                }
                Node::If(b) | Node::With(b) => {
                    walk_pipeline(&b.pipeline, out);
                    walk(&b.body, out);
                    walk(&b.else_body, out);
                }
                Node::Text(_) | Node::Break(_) | Node::Continue(_) => {}
            }
        }
    }
    let mut out = Vec::new();
    walk(nodes, &mut out);
    out
}

// Surface parsing. The parser is deliberately loose: it does not
// know operator precedence, and it surfaces every infix expression as
// a flat chain of operands and operator texts (including `=`). The
// fold pass turns chains into binary trees when it can; the compiler
// is written to survive when it can't. Statements are separated by
// newlines or semicolons; blocks are brace-delimited.

use crate::error::CompileError;
use crate::span::{LineIndex, Span};

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Let,
    Var,
    Func,
    Struct,
    If,
    Else,
    While,
    Return,
    True,
    False,
    Nil,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Semi,
    Newline,
    Operator(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OpTok {
    pub text: String,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Nil(Span),
    Bool(bool, Span),
    Int(i64, Span),
    Float(f64, Span),
    Str(String, Span),
    Ident(String, Span),
    // A flat infix sequence: operands.len() == operators.len() + 1.
    Chain { operands: Vec<Expr>, operators: Vec<OpTok>, span: Span },
    // Produced by the fold pass, never by the parser.
    Binary { op: OpTok, lhs: Box<Expr>, rhs: Box<Expr>, span: Span },
    Member { base: Box<Expr>, name: String, name_span: Span, span: Span },
    Call { callee: Box<Expr>, args: Vec<Expr>, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Nil(span)
            | Expr::Bool(_, span)
            | Expr::Int(_, span)
            | Expr::Float(_, span)
            | Expr::Str(_, span)
            | Expr::Ident(_, span) => *span,
            Expr::Chain { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Member { span, .. }
            | Expr::Call { span, .. } => *span,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub type_hint: Option<String>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfStmt {
    pub cond: Expr,
    pub then_body: Vec<Stmt>,
    pub else_branch: Option<ElseBranch>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ElseBranch {
    ElseIf(Box<IfStmt>),
    Else(Vec<Stmt>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Binding { name: String, mutable: bool, init: Expr, span: Span },
    If(IfStmt),
    While { cond: Expr, body: Vec<Stmt>, span: Span },
    Return { value: Option<Expr>, span: Span },
    Expr(Expr),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Binding { span, .. } | Stmt::While { span, .. } | Stmt::Return { span, .. } => {
                *span
            }
            Stmt::If(stmt) => stmt.span,
            Stmt::Expr(expr) => expr.span(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Struct(StructDecl),
    Function(FuncDecl),
    Statement(Stmt),
}

impl Item {
    pub fn span(&self) -> Span {
        match self {
            Item::Struct(decl) => decl.span,
            Item::Function(decl) => decl.span,
            Item::Statement(stmt) => stmt.span(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct SourceFile {
    pub items: Vec<Item>,
}

pub fn parse(source: &str, index: &LineIndex) -> Result<SourceFile, CompileError> {
    let tokens = lex(source, index)?;
    Parser { tokens, pos: 0, index }.parse_file()
}

// Parses a bare expression; used by the compiler's textual
// assignment fallback to re-parse the two halves of `lhs = rhs`.
pub fn parse_expression(source: &str, index: &LineIndex) -> Result<Expr, CompileError> {
    let tokens = lex(source, index)?;
    let mut parser = Parser { tokens, pos: 0, index };
    parser.skip_separators();
    let expr = parser.parse_expr()?;
    parser.skip_separators();
    if !parser.at_eof() {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

/******************************************************************************/
// Lexer

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "let" => TokenKind::Let,
        "var" => TokenKind::Var,
        "func" => TokenKind::Func,
        "struct" => TokenKind::Struct,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "return" => TokenKind::Return,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "nil" => TokenKind::Nil,
        _ => return None,
    })
}

fn lex(source: &str, index: &LineIndex) -> Result<Vec<Token>, CompileError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let start = pos;
        let byte = bytes[pos];
        match byte {
            b' ' | b'\t' | b'\r' => {
                pos += 1;
            }
            b'\n' => {
                pos += 1;
                tokens.push(Token { kind: TokenKind::Newline, start, end: pos });
            }
            b'/' if bytes.get(pos + 1) == Some(&b'/') => {
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
            }
            b'(' => { pos += 1; tokens.push(Token { kind: TokenKind::LParen, start, end: pos }); }
            b')' => { pos += 1; tokens.push(Token { kind: TokenKind::RParen, start, end: pos }); }
            b'{' => { pos += 1; tokens.push(Token { kind: TokenKind::LBrace, start, end: pos }); }
            b'}' => { pos += 1; tokens.push(Token { kind: TokenKind::RBrace, start, end: pos }); }
            b',' => { pos += 1; tokens.push(Token { kind: TokenKind::Comma, start, end: pos }); }
            b':' => { pos += 1; tokens.push(Token { kind: TokenKind::Colon, start, end: pos }); }
            b';' => { pos += 1; tokens.push(Token { kind: TokenKind::Semi, start, end: pos }); }
            b'.' => { pos += 1; tokens.push(Token { kind: TokenKind::Dot, start, end: pos }); }
            b'"' => {
                pos += 1;
                let mut text = String::new();
                loop {
                    match bytes.get(pos) {
                        None | Some(b'\n') => {
                            return Err(CompileError::new(
                                "unterminated string literal",
                                Some(index.span(start, pos)),
                            ));
                        }
                        Some(b'"') => {
                            pos += 1;
                            break;
                        }
                        Some(b'\\') => {
                            let escape = bytes.get(pos + 1).copied();
                            let resolved = match escape {
                                Some(b'"') => '"',
                                Some(b'\\') => '\\',
                                Some(b'n') => '\n',
                                Some(b't') => '\t',
                                Some(b'r') => '\r',
                                _ => {
                                    return Err(CompileError::new(
                                        "unknown escape sequence",
                                        Some(index.span(pos, pos + 2)),
                                    ));
                                }
                            };
                            text.push(resolved);
                            pos += 2;
                        }
                        Some(_) => {
                            // Consume a full UTF-8 scalar, not a byte.
                            let rest = &source[pos..];
                            let ch = rest.chars().next().unwrap_or('\u{fffd}');
                            text.push(ch);
                            pos += ch.len_utf8();
                        }
                    }
                }
                tokens.push(Token { kind: TokenKind::Str(text), start, end: pos });
            }
            b'0'..=b'9' => {
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
                let mut is_float = false;
                if pos + 1 < bytes.len()
                    && bytes[pos] == b'.'
                    && bytes[pos + 1].is_ascii_digit()
                {
                    is_float = true;
                    pos += 1;
                    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
                let text = &source[start..pos];
                let kind = if is_float {
                    TokenKind::Float(text.parse().map_err(|_| {
                        CompileError::new("malformed float literal", Some(index.span(start, pos)))
                    })?)
                } else {
                    TokenKind::Int(text.parse().map_err(|_| {
                        CompileError::new("malformed integer literal", Some(index.span(start, pos)))
                    })?)
                };
                tokens.push(Token { kind, start, end: pos });
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_')
                {
                    pos += 1;
                }
                let word = &source[start..pos];
                let kind = keyword(word).unwrap_or_else(|| TokenKind::Ident(word.to_string()));
                tokens.push(Token { kind, start, end: pos });
            }
            b'=' | b'<' | b'>' | b'!' | b'&' | b'|' | b'+' | b'-' | b'*' | b'/' | b'%' => {
                let two = if pos + 1 < bytes.len() { &source[pos..pos + 2] } else { "" };
                let text = match two {
                    "==" | "<=" | ">=" | "!=" | "&&" | "||" => {
                        pos += 2;
                        two.to_string()
                    }
                    _ => {
                        pos += 1;
                        (byte as char).to_string()
                    }
                };
                tokens.push(Token { kind: TokenKind::Operator(text), start, end: pos });
            }
            _ => {
                return Err(CompileError::new(
                    format!("unexpected character {:?}", source[pos..].chars().next()),
                    Some(index.span(pos, pos + 1)),
                ));
            }
        }
    }

    Ok(tokens)
}

/******************************************************************************/
// Parser

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    index: &'a LineIndex,
}

impl<'a> Parser<'a> {
    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, ahead: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn token_span(&self, token: &Token) -> Span {
        self.index.span(token.start, token.end)
    }

    fn here(&self) -> Span {
        match self.tokens.get(self.pos).or_else(|| self.tokens.last()) {
            Some(token) => self.token_span(token),
            None => self.index.span(0, 0),
        }
    }

    fn unexpected(&self, wanted: &str) -> CompileError {
        let found = match self.peek() {
            Some(kind) => format!("{:?}", kind),
            None => "end of input".to_string(),
        };
        CompileError::new(format!("expected {}, found {}", wanted, found), Some(self.here()))
    }

    fn expect(&mut self, kind: TokenKind, wanted: &str) -> Result<Token, CompileError> {
        match self.peek() {
            Some(found) if *found == kind => Ok(self.advance().unwrap()),
            _ => Err(self.unexpected(wanted)),
        }
    }

    fn expect_ident(&mut self, wanted: &str) -> Result<(String, Span), CompileError> {
        match self.peek() {
            Some(TokenKind::Ident(_)) => {
                let token = self.advance().unwrap();
                let span = self.token_span(&token);
                match token.kind {
                    TokenKind::Ident(name) => Ok((name, span)),
                    _ => unreachable!(),
                }
            }
            _ => Err(self.unexpected(wanted)),
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(TokenKind::Newline) | Some(TokenKind::Semi)) {
            self.pos += 1;
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some(TokenKind::Newline)) {
            self.pos += 1;
        }
    }

    fn parse_file(&mut self) -> Result<SourceFile, CompileError> {
        let mut items = Vec::new();
        self.skip_separators();
        while !self.at_eof() {
            items.push(self.parse_item()?);
            self.skip_separators();
        }
        Ok(SourceFile { items })
    }

    fn parse_item(&mut self) -> Result<Item, CompileError> {
        match self.peek() {
            Some(TokenKind::Struct) => Ok(Item::Struct(self.parse_struct()?)),
            Some(TokenKind::Func) => Ok(Item::Function(self.parse_func()?)),
            _ => Ok(Item::Statement(self.parse_stmt()?)),
        }
    }

    fn parse_struct(&mut self) -> Result<StructDecl, CompileError> {
        let start = self.here();
        self.advance(); // struct
        let (name, _) = self.expect_ident("struct name")?;
        self.skip_newlines();
        self.expect(TokenKind::LBrace, "{")?;
        let mut fields = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                Some(TokenKind::RBrace) => {
                    let close = self.advance().unwrap();
                    let span = start.merge(self.token_span(&close));
                    return Ok(StructDecl { name, fields, span });
                }
                Some(TokenKind::Var) | Some(TokenKind::Let) => {
                    self.advance();
                    let (field_name, field_span) = self.expect_ident("field name")?;
                    let type_hint = if matches!(self.peek(), Some(TokenKind::Colon)) {
                        self.advance();
                        Some(self.expect_ident("field type")?.0)
                    } else {
                        None
                    };
                    fields.push(FieldDecl { name: field_name, type_hint, span: field_span });
                }
                _ => return Err(self.unexpected("field declaration or }")),
            }
        }
    }

    fn parse_func(&mut self) -> Result<FuncDecl, CompileError> {
        let start = self.here();
        self.advance(); // func
        let (name, _) = self.expect_ident("function name")?;
        self.expect(TokenKind::LParen, "(")?;
        let mut params = Vec::new();
        self.skip_newlines();
        if !matches!(self.peek(), Some(TokenKind::RParen)) {
            loop {
                let (param, _) = self.expect_ident("parameter name")?;
                // Parameter type annotations parse and are discarded.
                if matches!(self.peek(), Some(TokenKind::Colon)) {
                    self.advance();
                    self.expect_ident("parameter type")?;
                }
                params.push(param);
                self.skip_newlines();
                if matches!(self.peek(), Some(TokenKind::Comma)) {
                    self.advance();
                    self.skip_newlines();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, ")")?;
        self.skip_newlines();
        let body = self.parse_block()?;
        let span = start.merge(self.here());
        Ok(FuncDecl { name, params, body, span })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, CompileError> {
        self.expect(TokenKind::LBrace, "{")?;
        let mut body = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                Some(TokenKind::RBrace) => {
                    self.advance();
                    return Ok(body);
                }
                None => return Err(self.unexpected("statement or }")),
                _ => body.push(self.parse_stmt()?),
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, CompileError> {
        match self.peek() {
            Some(TokenKind::Let) | Some(TokenKind::Var) => self.parse_binding(),
            Some(TokenKind::If) => Ok(Stmt::If(self.parse_if()?)),
            Some(TokenKind::While) => self.parse_while(),
            Some(TokenKind::Return) => self.parse_return(),
            _ => Ok(Stmt::Expr(self.parse_expr()?)),
        }
    }

    fn parse_binding(&mut self) -> Result<Stmt, CompileError> {
        let start = self.here();
        let mutable = matches!(self.peek(), Some(TokenKind::Var));
        self.advance(); // let | var
        let (name, _) = self.expect_ident("binding name")?;
        // Optional annotation on the binding itself.
        if matches!(self.peek(), Some(TokenKind::Colon)) {
            self.advance();
            self.expect_ident("type")?;
        }
        self.expect(TokenKind::Operator("=".to_string()), "=")?;
        let init = self.parse_expr()?;
        let span = start.merge(init.span());
        Ok(Stmt::Binding { name, mutable, init, span })
    }

    fn parse_if(&mut self) -> Result<IfStmt, CompileError> {
        let start = self.here();
        self.advance(); // if
        if matches!(self.peek(), Some(TokenKind::Let) | Some(TokenKind::Var)) {
            return Err(CompileError::new(
                "pattern bindings are not supported in conditions",
                Some(self.here()),
            ));
        }
        let cond = self.parse_expr()?;
        self.skip_newlines();
        let then_body = self.parse_block()?;
        let mut span = start.merge(self.here());
        let else_branch = {
            let checkpoint = self.pos;
            self.skip_separators();
            if matches!(self.peek(), Some(TokenKind::Else)) {
                self.advance();
                self.skip_newlines();
                if matches!(self.peek(), Some(TokenKind::If)) {
                    let nested = self.parse_if()?;
                    span = span.merge(nested.span);
                    Some(ElseBranch::ElseIf(Box::new(nested)))
                } else {
                    let body = self.parse_block()?;
                    span = span.merge(self.here());
                    Some(ElseBranch::Else(body))
                }
            } else {
                self.pos = checkpoint;
                None
            }
        };
        Ok(IfStmt { cond, then_body, else_branch, span })
    }

    fn parse_while(&mut self) -> Result<Stmt, CompileError> {
        let start = self.here();
        self.advance(); // while
        let cond = self.parse_expr()?;
        self.skip_newlines();
        let body = self.parse_block()?;
        let span = start.merge(self.here());
        Ok(Stmt::While { cond, body, span })
    }

    fn parse_return(&mut self) -> Result<Stmt, CompileError> {
        let start = self.here();
        self.advance(); // return
        let value = match self.peek() {
            None
            | Some(TokenKind::Newline)
            | Some(TokenKind::Semi)
            | Some(TokenKind::RBrace) => None,
            _ => Some(self.parse_expr()?),
        };
        let span = match &value {
            Some(expr) => start.merge(expr.span()),
            None => start,
        };
        Ok(Stmt::Return { value, span })
    }

    // An expression is a flat chain: operand (operator operand)*.
    // The chain keeps the operators' literal text; precedence is the
    // fold pass's problem.
    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        let first = self.parse_operand()?;
        let mut operands = vec![first];
        let mut operators: Vec<OpTok> = Vec::new();
        loop {
            let text = match self.peek() {
                Some(TokenKind::Operator(text)) => text.clone(),
                _ => break,
            };
            let token = self.advance().unwrap();
            operators.push(OpTok { text, span: self.token_span(&token) });
            self.skip_newlines();
            operands.push(self.parse_operand()?);
        }
        if operators.is_empty() {
            return Ok(operands.pop().unwrap());
        }
        let span = operands[0].span().merge(operands[operands.len() - 1].span());
        Ok(Expr::Chain { operands, operators, span })
    }

    fn parse_operand(&mut self) -> Result<Expr, CompileError> {
        // A leading minus on a numeric literal is part of the number.
        if let Some(TokenKind::Operator(op)) = self.peek() {
            if op == "-" {
                match self.peek_at(1) {
                    Some(TokenKind::Int(_)) | Some(TokenKind::Float(_)) => {
                        let minus = self.advance().unwrap();
                        let number = self.advance().unwrap();
                        let span = self
                            .token_span(&minus)
                            .merge(self.token_span(&number));
                        return Ok(match number.kind {
                            TokenKind::Int(v) => Expr::Int(-v, span),
                            TokenKind::Float(v) => Expr::Float(-v, span),
                            _ => unreachable!(),
                        });
                    }
                    _ => {}
                }
            }
        }
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(TokenKind::Dot) => {
                    self.advance();
                    let (name, name_span) = self.expect_ident("member name")?;
                    let span = expr.span().merge(name_span);
                    expr = Expr::Member { base: Box::new(expr), name, name_span, span };
                }
                Some(TokenKind::LParen) => {
                    let args = self.parse_args()?;
                    let span = expr.span().merge(self.here());
                    expr = Expr::Call { callee: Box::new(expr), args, span };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        self.expect(TokenKind::LParen, "(")?;
        let mut args = Vec::new();
        self.skip_newlines();
        if matches!(self.peek(), Some(TokenKind::RParen)) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            self.skip_newlines();
            match self.peek() {
                Some(TokenKind::Comma) => {
                    self.advance();
                    self.skip_newlines();
                }
                Some(TokenKind::RParen) => {
                    self.advance();
                    return Ok(args);
                }
                _ => return Err(self.unexpected(", or )")),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let token = match self.advance() {
            Some(token) => token,
            None => return Err(self.unexpected("expression")),
        };
        let span = self.token_span(&token);
        Ok(match token.kind {
            TokenKind::Nil => Expr::Nil(span),
            TokenKind::True => Expr::Bool(true, span),
            TokenKind::False => Expr::Bool(false, span),
            TokenKind::Int(v) => Expr::Int(v, span),
            TokenKind::Float(v) => Expr::Float(v, span),
            TokenKind::Str(v) => Expr::Str(v, span),
            TokenKind::Ident(name) => Expr::Ident(name, span),
            TokenKind::LParen => {
                self.skip_newlines();
                let inner = self.parse_expr()?;
                self.skip_newlines();
                self.expect(TokenKind::RParen, ")")?;
                inner
            }
            _ => {
                self.pos -= 1;
                return Err(self.unexpected("expression"));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_ok(text: &str) -> SourceFile {
        let index = LineIndex::new(text);
        parse(text, &index).unwrap()
    }

    fn only_expr(text: &str) -> Expr {
        let file = parse_ok(text);
        assert_eq!(file.items.len(), 1, "expected a single item in {:?}", text);
        match file.items.into_iter().next().unwrap() {
            Item::Statement(Stmt::Expr(expr)) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    fn chain_shape(expr: &Expr) -> (usize, Vec<String>) {
        match expr {
            Expr::Chain { operands, operators, .. } => (
                operands.len(),
                operators.iter().map(|op| op.text.clone()).collect(),
            ),
            other => panic!("expected chain, got {:?}", other),
        }
    }

    #[test]
    fn test_terms() {
        assert!(matches!(only_expr("42"), Expr::Int(42, _)));
        assert!(matches!(only_expr("42.5"), Expr::Float(_, _)));
        assert!(matches!(only_expr("(42)"), Expr::Int(42, _)));
        assert!(matches!(only_expr("true"), Expr::Bool(true, _)));
        assert!(matches!(only_expr("nil"), Expr::Nil(_)));
        assert!(matches!(only_expr("-7"), Expr::Int(-7, _)));
        assert!(matches!(only_expr("foo"), Expr::Ident(_, _)));
    }

    #[test]
    fn test_string_escapes() {
        match only_expr(r#""a\"b\n""#) {
            Expr::Str(text, _) => assert_eq!(text, "a\"b\n"),
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn test_chains_stay_flat() {
        let (operands, operators) = chain_shape(&only_expr("1 + 2 * 3"));
        assert_eq!(operands, 3);
        assert_eq!(operators, vec!["+", "*"]);

        let (operands, operators) = chain_shape(&only_expr("a = b + 1"));
        assert_eq!(operands, 3);
        assert_eq!(operators, vec!["=", "+"]);
    }

    #[test]
    fn test_member_and_call_postfix() {
        match only_expr("name.uppercased()") {
            Expr::Call { callee, args, .. } => {
                assert!(args.is_empty());
                assert!(matches!(*callee, Expr::Member { .. }));
            }
            other => panic!("expected call, got {:?}", other),
        }

        match only_expr("Point(2, 3)") {
            Expr::Call { callee, args, .. } => {
                assert_eq!(args.len(), 2);
                assert!(matches!(*callee, Expr::Ident(_, _)));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_statement_separators() {
        let file = parse_ok("let x = 1\nlet y = 2; let z = 3");
        assert_eq!(file.items.len(), 3);
    }

    #[test]
    fn test_struct_decl() {
        let file = parse_ok("struct Point { var x; var y: Int }");
        match &file.items[0] {
            Item::Struct(decl) => {
                assert_eq!(decl.name, "Point");
                assert_eq!(decl.fields.len(), 2);
                assert_eq!(decl.fields[0].name, "x");
                assert_eq!(decl.fields[1].type_hint.as_deref(), Some("Int"));
            }
            other => panic!("expected struct, got {:?}", other),
        }
    }

    #[test]
    fn test_func_decl() {
        let file = parse_ok("func add(a, b) { return a + b }");
        match &file.items[0] {
            Item::Function(decl) => {
                assert_eq!(decl.name, "add");
                assert_eq!(decl.params, vec!["a", "b"]);
                assert_eq!(decl.body.len(), 1);
                assert!(matches!(decl.body[0], Stmt::Return { value: Some(_), .. }));
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_if_else_if_else() {
        let file = parse_ok("if a { b() } else if c { d() } else { e() }");
        match &file.items[0] {
            Item::Statement(Stmt::If(stmt)) => {
                assert!(stmt.else_branch.is_some());
                match stmt.else_branch.as_ref().unwrap() {
                    ElseBranch::ElseIf(nested) => {
                        assert!(matches!(
                            nested.else_branch,
                            Some(ElseBranch::Else(_))
                        ));
                    }
                    other => panic!("expected else-if, got {:?}", other),
                }
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_while_condition_stops_at_brace() {
        let file = parse_ok("while i < 5 { i = i + 1 }");
        match &file.items[0] {
            Item::Statement(Stmt::While { cond, body, .. }) => {
                let (operands, operators) = chain_shape(cond);
                assert_eq!(operands, 2);
                assert_eq!(operators, vec!["<"]);
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected while, got {:?}", other),
        }
    }

    #[test]
    fn test_condition_binding_rejected() {
        let index = LineIndex::new("if let x = f() { }");
        let err = parse("if let x = f() { }", &index).unwrap_err();
        assert!(err.message.contains("pattern bindings"));
    }

    #[test]
    fn test_bare_return() {
        let file = parse_ok("return");
        assert!(matches!(
            file.items[0],
            Item::Statement(Stmt::Return { value: None, .. })
        ));
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(parse_ok("").items.len(), 0);
        assert_eq!(parse_ok("\n\n  // just a comment\n").items.len(), 0);
    }

    #[test]
    fn test_unterminated_string() {
        let index = LineIndex::new("\"abc");
        assert!(parse("\"abc", &index).is_err());
    }

    #[test]
    fn test_spans_are_ordered() {
        let text = "let total = 1 + 2";
        let file = parse_ok(text);
        let span = file.items[0].span();
        assert!(span.end >= span.start);
    }
}

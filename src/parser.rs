use crate::ast::{
    BinaryOp, DeclScope, EnumVariant, Expr, ForIterable, FunctionDecl, LogicalOp, Mode, Parameter,
    Program, Stmt, TypeName, UnaryOp, UpdateOp,
};
use crate::error::{FloError, Span};
use crate::lexer::{Token, TokenType};
use crate::stack::ensure_sufficient_stack;
use std::collections::HashSet;
use std::rc::Rc;

const SCRIPT_SHEBANG: &str = "#!script";

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    mode: Mode,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        let mut mode = Mode::Program;
        let mut kept = Vec::with_capacity(tokens.len());
        for token in tokens {
            if token.token_type == TokenType::Shebang {
                if token.lexeme.trim() == SCRIPT_SHEBANG {
                    mode = Mode::Script;
                }
                continue;
            }
            kept.push(token);
        }

        // a stream that lost its EOF still needs one to stop on
        if kept.last().map(|t| t.token_type) != Some(TokenType::Eof) {
            let end = kept.last().map(|t| t.span.end).unwrap_or(0);
            let line = kept.last().map(|t| t.line).unwrap_or(1);
            kept.push(Token::new(TokenType::Eof, String::new(), Span::new(end, end), line, 0));
        }

        Self {
            tokens: kept,
            current: 0,
            mode,
        }
    }

    pub fn parse(&mut self) -> Result<Program, FloError> {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            if self.check(&TokenType::BlockEnd) {
                self.advance();
                continue;
            }
            statements.push(self.declaration()?);
        }
        check_dead_code(&statements)?;

        tracing::debug!(statements = statements.len(), mode = ?self.mode, "parsed program");
        Ok(Program {
            statements,
            mode: self.mode,
        })
    }

    fn declaration(&mut self) -> Result<Stmt, FloError> {
        ensure_sufficient_stack(|| self.statement())
    }

    fn statement(&mut self) -> Result<Stmt, FloError> {
        if self.match_types(&[TokenType::Let]) {
            self.var_declaration(DeclScope::Local)
        } else if self.match_types(&[TokenType::Static]) {
            self.var_declaration(DeclScope::Global)
        } else if self.match_types(&[TokenType::Alloc]) {
            self.alloc_declaration()
        } else if self.match_types(&[TokenType::Fn]) {
            self.function_declaration()
        } else if self.match_types(&[TokenType::Class]) {
            self.class_declaration()
        } else if self.match_types(&[TokenType::Enum]) {
            self.enum_declaration()
        } else if self.match_types(&[TokenType::If]) {
            self.if_statement()
        } else if self.match_types(&[TokenType::While]) {
            self.while_statement()
        } else if self.match_types(&[TokenType::For]) {
            self.for_statement()
        } else if self.match_types(&[TokenType::Return]) {
            self.return_statement()
        } else if self.match_types(&[
            TokenType::Break,
            TokenType::Continue,
            TokenType::Unreachable,
            TokenType::Pass,
        ]) {
            let token = self.previous().clone();
            self.end_statement()?;
            let span = token.span;
            Ok(match token.token_type {
                TokenType::Break => Stmt::Break { span },
                TokenType::Continue => Stmt::Continue { span },
                TokenType::Unreachable => Stmt::Unreachable { span },
                _ => Stmt::Pass { span },
            })
        } else if self.match_types(&[TokenType::Delete]) {
            self.delete_statement()
        } else if self.check(&TokenType::BlockStart) {
            Err(FloError::parse_error_with_help(
                self.peek().span,
                "Unexpected indentation".to_string(),
                "Only the body of a block (after ':') may be indented further.".to_string(),
            ))
        } else {
            self.expression_statement()
        }
    }

    fn var_declaration(&mut self, scope: DeclScope) -> Result<Stmt, FloError> {
        let start = self.previous().span.start;
        let mutable = self.match_types(&[TokenType::Mut]);
        let type_name = if self.at_type_annotation() {
            Some(self.type_name()?)
        } else {
            None
        };

        let name = self
            .consume_with_help(
                TokenType::Identifier,
                "Expected variable name",
                "Declarations look like: let mut int count = 0".to_string(),
            )?
            .lexeme
            .clone();

        self.consume_with_help(
            TokenType::Equal,
            &format!("Expected '=' after variable name '{}'", name),
            "Variables must be initialized when declared: let int x = 0".to_string(),
        )?;
        let initializer = self.expression()?;
        let end = initializer.span().end;
        self.end_statement()?;

        Ok(Stmt::VarDecl {
            scope,
            mutable,
            type_name,
            name,
            initializer: Some(initializer),
            span: Span::new(start, end),
        })
    }

    fn alloc_declaration(&mut self) -> Result<Stmt, FloError> {
        let start = self.previous().span.start;
        let token = self
            .consume_with_help(
                TokenType::Identifier,
                "Expected a name after '@alloc'",
                "Dynamic declarations look like: @alloc buffer".to_string(),
            )?
            .clone();
        self.end_statement()?;

        Ok(Stmt::VarDecl {
            scope: DeclScope::Dynamic,
            mutable: true,
            type_name: None,
            name: token.lexeme,
            initializer: None,
            span: Span::new(start, token.span.end),
        })
    }

    fn function_declaration(&mut self) -> Result<Stmt, FloError> {
        let start = self.previous().span.start;
        // builtin type names double as conversion functions, `fn int(...)`
        let name = if self.match_types(&[TokenType::BuiltinType]) {
            self.previous().lexeme.clone()
        } else {
            self.consume(TokenType::Identifier, "Expected function name after 'fn'")?
                .lexeme
                .clone()
        };

        self.consume_with_help(
            TokenType::LeftParen,
            &format!("Expected '(' after function name '{}'", name),
            "Functions are declared like: fn add(int a, int b) int: ...".to_string(),
        )?;

        let mut params = Vec::new();
        let mut seen = HashSet::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                let param = self.parameter()?;
                if !seen.insert(param.name.clone()) {
                    return Err(FloError::parse_error(
                        param.span,
                        format!("Duplicate parameter '{}' in function '{}'", param.name, name),
                    ));
                }
                params.push(param);
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }
        self.consume_with_help(
            TokenType::RightParen,
            "Expected ')' after parameters",
            "Separate parameters with ',' and close the list with ')'.".to_string(),
        )?;

        let return_type = if self.check(&TokenType::Colon) {
            None
        } else {
            Some(self.type_name()?)
        };

        let (body, body_span) = self.block_with(Self::declaration)?;
        check_dead_code(&body)?;

        Ok(Stmt::Function(Rc::new(FunctionDecl {
            name,
            params,
            return_type,
            body,
            span: Span::new(start, body_span.end),
        })))
    }

    fn parameter(&mut self) -> Result<Parameter, FloError> {
        let start = self.peek().span.start;
        let type_name = if self.at_type_annotation() {
            Some(self.type_name()?)
        } else {
            None
        };
        let token = self
            .consume(TokenType::Identifier, "Expected parameter name")?
            .clone();

        let default = if self.match_types(&[TokenType::Equal]) {
            Some(self.expression()?)
        } else {
            None
        };
        let end = default
            .as_ref()
            .map(|d| d.span().end)
            .unwrap_or(token.span.end);

        Ok(Parameter {
            name: token.lexeme,
            type_name,
            default,
            span: Span::new(start, end),
        })
    }

    fn class_declaration(&mut self) -> Result<Stmt, FloError> {
        let start = self.previous().span.start;
        let name = self
            .consume(TokenType::Identifier, "Expected class name after 'class'")?
            .lexeme
            .clone();

        let (body, body_span) = self.block_with(|parser| {
            if parser.match_types(&[TokenType::Let, TokenType::Static]) {
                parser.var_declaration(DeclScope::Member)
            } else {
                parser.declaration()
            }
        })?;
        check_dead_code(&body)?;

        Ok(Stmt::Class {
            name,
            body,
            span: Span::new(start, body_span.end),
        })
    }

    fn enum_declaration(&mut self) -> Result<Stmt, FloError> {
        let start = self.previous().span.start;
        let name = self
            .consume(TokenType::Identifier, "Expected enum name after 'enum'")?
            .lexeme
            .clone();

        let (variants, body_span) = self.block_with(|parser| {
            let token = parser
                .consume_with_help(
                    TokenType::Identifier,
                    "Expected enum entry name",
                    "Enum entries look like: RED or RED = 1".to_string(),
                )?
                .clone();
            let value = if parser.match_types(&[TokenType::Equal]) {
                Some(parser.expression()?)
            } else {
                None
            };
            let end = value.as_ref().map(|v| v.span().end).unwrap_or(token.span.end);
            parser.end_statement()?;
            Ok(EnumVariant {
                name: token.lexeme,
                value,
                span: Span::new(token.span.start, end),
            })
        })?;

        Ok(Stmt::Enum {
            name,
            variants,
            span: Span::new(start, body_span.end),
        })
    }

    fn if_statement(&mut self) -> Result<Stmt, FloError> {
        let start = self.previous().span.start;
        let condition = self.expression()?;
        let then_branch = Box::new(self.block()?);

        let else_branch = if self.match_types(&[TokenType::Elif]) {
            Some(Box::new(self.if_statement()?))
        } else if self.match_types(&[TokenType::Else]) {
            Some(Box::new(self.block()?))
        } else {
            None
        };

        let end = else_branch
            .as_ref()
            .map(|stmt| stmt.span().end)
            .unwrap_or(then_branch.span().end);

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            span: Span::new(start, end),
        })
    }

    fn while_statement(&mut self) -> Result<Stmt, FloError> {
        let start = self.previous().span.start;
        let condition = self.expression()?;
        let body = Box::new(self.block()?);
        let end = body.span().end;

        Ok(Stmt::While {
            condition,
            body,
            span: Span::new(start, end),
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, FloError> {
        let start = self.previous().span.start;
        let type_name = if self.at_type_annotation() {
            Some(self.type_name()?)
        } else {
            None
        };
        let variable = self
            .consume_with_help(
                TokenType::Identifier,
                "Expected loop variable after 'for'",
                "Loops look like: for i in 10, for i in 0..10 or for item in items".to_string(),
            )?
            .lexeme
            .clone();
        self.consume_with_help(
            TokenType::In,
            &format!("Expected 'in' after loop variable '{}'", variable),
            "Loops look like: for i in 10, for i in 0..10 or for item in items".to_string(),
        )?;

        let first = self.expression()?;
        let iterable = if self.match_types(&[TokenType::DotDot]) {
            let end = self.expression()?;
            ForIterable::Range { start: first, end }
        } else {
            ForIterable::Value(first)
        };

        let body = Box::new(self.block()?);
        let end = body.span().end;

        Ok(Stmt::For {
            variable,
            type_name,
            iterable,
            body,
            span: Span::new(start, end),
        })
    }

    fn return_statement(&mut self) -> Result<Stmt, FloError> {
        let keyword = self.previous().clone();

        // only an expression on the same line belongs to the return
        let value = if !self.is_at_end()
            && !self.check(&TokenType::BlockEnd)
            && self.peek().line == keyword.line
        {
            Some(self.expression()?)
        } else {
            None
        };
        let end = value.as_ref().map(|v| v.span().end).unwrap_or(keyword.span.end);
        self.end_statement()?;

        Ok(Stmt::Return {
            value,
            span: Span::new(keyword.span.start, end),
        })
    }

    fn delete_statement(&mut self) -> Result<Stmt, FloError> {
        let start = self.previous().span.start;
        let target = self.expression()?;

        match target {
            Expr::Identifier { .. } | Expr::Member { .. } => {}
            _ => {
                return Err(FloError::parse_error_with_help(
                    *target.span(),
                    "Invalid delete target".to_string(),
                    "Only a variable (delete x) or an object key (delete obj.key) can be deleted."
                        .to_string(),
                ))
            }
        }

        let end = target.span().end;
        self.end_statement()?;
        Ok(Stmt::Delete {
            target,
            span: Span::new(start, end),
        })
    }

    fn expression_statement(&mut self) -> Result<Stmt, FloError> {
        let expr = self.expression()?;
        let span = *expr.span();
        self.end_statement()?;
        Ok(Stmt::Expression { expr, span })
    }

    /// `: stmt` on the same line, or `:` followed by an indented block.
    fn block(&mut self) -> Result<Stmt, FloError> {
        let (statements, span) = self.block_with(Self::declaration)?;
        check_dead_code(&statements)?;
        Ok(Stmt::Block { statements, span })
    }

    fn block_with<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, FloError>,
    ) -> Result<(Vec<T>, Span), FloError> {
        let colon = self
            .consume_with_help(
                TokenType::Colon,
                "Expected ':' before block",
                "Blocks start with ':' followed by an indented body on the next line.".to_string(),
            )?
            .clone();

        let mut items = Vec::new();

        if self.match_types(&[TokenType::BlockStart]) {
            let start = self.peek().span.start;
            while !self.check(&TokenType::BlockEnd) && !self.is_at_end() {
                items.push(item(self)?);
            }
            let end = self.previous().span.end;
            self.consume(TokenType::BlockEnd, "Expected end of block")?;
            return Ok((items, Span::new(start, end.max(start))));
        }

        if self.is_at_end() || self.check(&TokenType::BlockEnd) || self.peek().line != colon.line {
            return Err(FloError::parse_error_with_help(
                Span::single(colon.span.end),
                "Expected an indented block after ':'".to_string(),
                "Indent the body by 4 spaces, or write a single statement after ':'.".to_string(),
            ));
        }

        let start = self.peek().span.start;
        items.push(item(self)?);
        let end = self.previous().span.end;
        Ok((items, Span::new(start, end)))
    }

    /// Type annotations come in front of a name: `int x`, `Foo x`, `Foo[] x`,
    /// `list<int> x`.
    fn at_type_annotation(&self) -> bool {
        if self.check(&TokenType::BuiltinType) {
            return true;
        }
        self.check(&TokenType::Identifier)
            && matches!(
                self.peek_next().map(|t| t.token_type),
                Some(TokenType::Identifier | TokenType::Less | TokenType::LeftBracket)
            )
    }

    fn type_name(&mut self) -> Result<TypeName, FloError> {
        if !self.check(&TokenType::BuiltinType) && !self.check(&TokenType::Identifier) {
            return Err(FloError::parse_error(
                self.peek().span,
                format!("Expected type name, found '{}'", self.peek().lexeme),
            ));
        }
        let token = self.advance().clone();
        let mut end = token.span.end;

        let mut generics = Vec::new();
        if self.match_types(&[TokenType::Less]) {
            loop {
                generics.push(self.type_name()?);
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
            end = self.close_angle()?;
        }

        let mut array_depth = 0;
        while self.check(&TokenType::LeftBracket)
            && self.peek_next().map(|t| t.token_type) == Some(TokenType::RightBracket)
        {
            self.advance();
            end = self.advance().span.end;
            array_depth += 1;
        }

        Ok(TypeName {
            name: token.lexeme,
            builtin: token.token_type == TokenType::BuiltinType,
            generics,
            array_depth,
            span: Span::new(token.span.start, end),
        })
    }

    /// Consume one '>' of a generic list, splitting a '>>' token in two.
    fn close_angle(&mut self) -> Result<usize, FloError> {
        if self.check(&TokenType::ShiftRight) {
            let token = &mut self.tokens[self.current];
            token.token_type = TokenType::Greater;
            token.lexeme = ">".to_string();
            token.span.start += 1;
            token.column += 1;
            return Ok(token.span.start);
        }
        Ok(self
            .consume(TokenType::Greater, "Expected '>' after type arguments")?
            .span
            .end)
    }

    fn expression(&mut self) -> Result<Expr, FloError> {
        ensure_sufficient_stack(|| self.assignment())
    }

    fn assignment(&mut self) -> Result<Expr, FloError> {
        let expr = self.elvis()?;

        if self.match_types(&[
            TokenType::Equal,
            TokenType::PlusEqual,
            TokenType::MinusEqual,
            TokenType::StarEqual,
            TokenType::SlashEqual,
            TokenType::PercentEqual,
            TokenType::AmpersandEqual,
            TokenType::CaretEqual,
            TokenType::PipeEqual,
        ]) {
            let operator_token = self.previous().clone();
            let operator = match operator_token.token_type {
                TokenType::PlusEqual => Some(BinaryOp::Add),
                TokenType::MinusEqual => Some(BinaryOp::Subtract),
                TokenType::StarEqual => Some(BinaryOp::Multiply),
                TokenType::SlashEqual => Some(BinaryOp::Divide),
                TokenType::PercentEqual => Some(BinaryOp::Modulo),
                TokenType::AmpersandEqual => Some(BinaryOp::BitAnd),
                TokenType::CaretEqual => Some(BinaryOp::BitXor),
                TokenType::PipeEqual => Some(BinaryOp::BitOr),
                _ => None,
            };

            if !matches!(expr, Expr::Identifier { .. } | Expr::Member { .. }) {
                return Err(FloError::parse_error_with_help(
                    *expr.span(),
                    "Invalid assignment target".to_string(),
                    "Only variables (x = 1) and members (obj.key = 1, items[0] = 1) can be assigned."
                        .to_string(),
                ));
            }

            // right associative: a = b = 1
            let value = self.assignment()?;
            let span = Span::new(expr.span().start, value.span().end);
            return Ok(Expr::Assign {
                target: Box::new(expr),
                operator,
                value: Box::new(value),
                span,
            });
        }

        Ok(expr)
    }

    fn elvis(&mut self) -> Result<Expr, FloError> {
        let condition = self.or()?;

        if self.match_types(&[TokenType::Question]) {
            let then_expr = self.expression()?;
            self.consume_with_help(
                TokenType::Colon,
                "Expected ':' in conditional expression",
                "Conditional expressions look like: condition ? then : otherwise".to_string(),
            )?;
            let else_expr = self.expression()?;
            let span = Span::new(condition.span().start, else_expr.span().end);
            return Ok(Expr::Elvis {
                condition: Box::new(condition),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                span,
            });
        }

        Ok(condition)
    }

    fn object_literal(&mut self, start: usize) -> Result<Expr, FloError> {
        let mut entries: Vec<(String, Expr)> = Vec::new();
        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            let key_token = self.advance().clone();
            let key = match key_token.token_type {
                TokenType::Identifier | TokenType::String => key_token.lexeme.clone(),
                _ => {
                    return Err(FloError::parse_error_with_help(
                        key_token.span,
                        format!("Expected object key, found '{}'", key_token.lexeme),
                        "Object keys are names or strings: { name: value, \"key\": value }"
                            .to_string(),
                    ))
                }
            };

            let value = if self.match_types(&[TokenType::Colon]) {
                self.expression()?
            } else if key_token.token_type == TokenType::Identifier {
                // shorthand { x } takes the value of the variable x
                Expr::Identifier {
                    name: key.clone(),
                    span: key_token.span,
                }
            } else {
                return Err(FloError::parse_error(
                    self.peek().span,
                    format!("Expected ':' after object key \"{}\"", key),
                ));
            };

            if entries.iter().any(|(existing, _)| *existing == key) {
                return Err(FloError::parse_error(
                    key_token.span,
                    format!("Duplicate object key '{}'", key),
                ));
            }
            entries.push((key, value));

            if !self.match_types(&[TokenType::Comma]) {
                break;
            }
        }

        let end = self
            .consume_with_help(
                TokenType::RightBrace,
                "Expected '}' after object entries",
                "Object literals must be closed with '}'. Example: { x: 1, y: 2 }".to_string(),
            )?
            .span
            .end;

        Ok(Expr::Object {
            entries,
            span: Span::new(start, end),
        })
    }

    fn list_literal(&mut self, start: usize) -> Result<Expr, FloError> {
        let mut elements = Vec::new();
        if !self.check(&TokenType::RightBracket) {
            loop {
                elements.push(self.expression()?);
                if !self.match_types(&[TokenType::Comma]) || self.check(&TokenType::RightBracket) {
                    break;
                }
            }
        }

        let end_token = self
            .consume_with_help(
                TokenType::RightBracket,
                "Expected ']' after list elements",
                "List literals must be closed with ']'. Example: [1, 2, 3]".to_string(),
            )?
            .clone();

        Ok(Expr::List {
            elements,
            span: Span::new(start, end_token.span.end),
        })
    }

    fn or(&mut self) -> Result<Expr, FloError> {
        let mut expr = self.and()?;

        while self.match_types(&[TokenType::Or]) {
            let right = self.and()?;
            let span = Span::new(expr.span().start, right.span().end);
            expr = Expr::Logical {
                left: Box::new(expr),
                operator: LogicalOp::Or,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr, FloError> {
        let mut expr = self.bit_or()?;

        while self.match_types(&[TokenType::And]) {
            let right = self.bit_or()?;
            let span = Span::new(expr.span().start, right.span().end);
            expr = Expr::Logical {
                left: Box::new(expr),
                operator: LogicalOp::And,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn bit_or(&mut self) -> Result<Expr, FloError> {
        self.binary_level(&[(TokenType::Pipe, BinaryOp::BitOr)], Self::bit_xor)
    }

    fn bit_xor(&mut self) -> Result<Expr, FloError> {
        self.binary_level(&[(TokenType::Caret, BinaryOp::BitXor)], Self::bit_and)
    }

    fn bit_and(&mut self) -> Result<Expr, FloError> {
        self.binary_level(&[(TokenType::Ampersand, BinaryOp::BitAnd)], Self::equality)
    }

    fn equality(&mut self) -> Result<Expr, FloError> {
        self.binary_level(
            &[
                (TokenType::EqualEqual, BinaryOp::Equal),
                (TokenType::BangEqual, BinaryOp::NotEqual),
            ],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr, FloError> {
        self.binary_level(
            &[
                (TokenType::Less, BinaryOp::Less),
                (TokenType::LessEqual, BinaryOp::LessEqual),
                (TokenType::Greater, BinaryOp::Greater),
                (TokenType::GreaterEqual, BinaryOp::GreaterEqual),
            ],
            Self::shift,
        )
    }

    fn shift(&mut self) -> Result<Expr, FloError> {
        self.binary_level(
            &[
                (TokenType::ShiftLeft, BinaryOp::ShiftLeft),
                (TokenType::ShiftRight, BinaryOp::ShiftRight),
            ],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr, FloError> {
        self.binary_level(
            &[
                (TokenType::Plus, BinaryOp::Add),
                (TokenType::Minus, BinaryOp::Subtract),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr, FloError> {
        self.binary_level(
            &[
                (TokenType::Star, BinaryOp::Multiply),
                (TokenType::Slash, BinaryOp::Divide),
                (TokenType::SlashSlash, BinaryOp::FloorDivide),
                (TokenType::Percent, BinaryOp::Modulo),
            ],
            Self::power,
        )
    }

    fn power(&mut self) -> Result<Expr, FloError> {
        self.binary_level(&[(TokenType::StarStar, BinaryOp::Power)], Self::unary)
    }

    /// One left-associative precedence level.
    fn binary_level(
        &mut self,
        operators: &[(TokenType, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, FloError>,
    ) -> Result<Expr, FloError> {
        let mut expr = next(self)?;

        loop {
            let Some(operator) = operators
                .iter()
                .find(|(token_type, _)| self.check(token_type))
                .map(|(_, op)| *op)
            else {
                break;
            };
            self.advance();

            let right = next(self)?;
            let span = Span::new(expr.span().start, right.span().end);
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, FloError> {
        if self.match_types(&[TokenType::PlusPlus, TokenType::MinusMinus]) {
            let token = self.previous().clone();
            let operator = if token.token_type == TokenType::PlusPlus {
                UpdateOp::Increment
            } else {
                UpdateOp::Decrement
            };
            let target = ensure_sufficient_stack(|| self.unary())?;
            check_update_target(&target, &token.lexeme)?;
            let span = Span::new(token.span.start, target.span().end);
            return Ok(Expr::Update {
                operator,
                prefix: true,
                target: Box::new(target),
                span,
            });
        }

        if self.match_types(&[TokenType::Not, TokenType::Tilde, TokenType::Minus, TokenType::Plus]) {
            let token = self.previous().clone();
            let operator = match token.token_type {
                TokenType::Not => UnaryOp::Not,
                TokenType::Tilde => UnaryOp::BitNot,
                TokenType::Minus => UnaryOp::Negate,
                _ => UnaryOp::Plus,
            };
            let operand = ensure_sufficient_stack(|| self.unary())?;
            let span = Span::new(token.span.start, operand.span().end);
            return Ok(Expr::Unary {
                operator,
                operand: Box::new(operand),
                span,
            });
        }

        self.call()
    }

    fn call(&mut self) -> Result<Expr, FloError> {
        let expr = self.primary()?;
        self.postfix_chain(expr)
    }

    /// Calls, member access, indexing and postfix `++`/`--`, iteratively.
    /// Each operator must start on the line where its operand ends.
    fn postfix_chain(&mut self, mut expr: Expr) -> Result<Expr, FloError> {
        loop {
            if self.peek().line != self.previous().line {
                break;
            }

            if self.match_types(&[TokenType::LeftParen]) {
                expr = self.finish_call(expr)?;
            } else if self.match_types(&[TokenType::Dot]) {
                let property = self
                    .consume_with_help(
                        TokenType::Identifier,
                        "Expected property name after '.'",
                        "Member access needs a name: object.name".to_string(),
                    )?
                    .clone();
                let span = Span::new(expr.span().start, property.span.end);
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Box::new(Expr::Identifier {
                        name: property.lexeme,
                        span: property.span,
                    }),
                    computed: false,
                    span,
                };
            } else if self.match_types(&[TokenType::LeftBracket]) {
                let index = self.expression()?;
                let end = self
                    .consume(TokenType::RightBracket, "Expected ']' after index")?
                    .span
                    .end;
                let span = Span::new(expr.span().start, end);
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Box::new(index),
                    computed: true,
                    span,
                };
            } else if self.match_types(&[TokenType::PlusPlus, TokenType::MinusMinus]) {
                let token = self.previous().clone();
                check_update_target(&expr, &token.lexeme)?;
                let operator = if token.token_type == TokenType::PlusPlus {
                    UpdateOp::Increment
                } else {
                    UpdateOp::Decrement
                };
                let span = Span::new(expr.span().start, token.span.end);
                expr = Expr::Update {
                    operator,
                    prefix: false,
                    target: Box::new(expr),
                    span,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr, FloError> {
        let mut args = Vec::new();

        if !self.check(&TokenType::RightParen) {
            loop {
                args.push(self.expression()?);
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        let paren = self
            .consume_with_help(
                TokenType::RightParen,
                "Expected ')' after arguments",
                "Function calls must close their argument list with ')'. Example: add(1, 2)"
                    .to_string(),
            )?
            .clone();

        let span = Span::new(callee.span().start, paren.span.end);
        Ok(Expr::Call {
            callee: Box::new(callee),
            args,
            span,
        })
    }

    fn primary(&mut self) -> Result<Expr, FloError> {
        if self.is_at_end() {
            return Err(FloError::parse_error_with_help(
                self.eof_span(),
                "Unexpected end of input".to_string(),
                "Expected an expression here. Check for unmatched parentheses or brackets."
                    .to_string(),
            ));
        }

        let token = self.advance().clone();

        match token.token_type {
            TokenType::Number => {
                let value = parse_int_literal(&token.lexeme).ok_or_else(|| {
                    FloError::parse_error(token.span, format!("Invalid integer '{}'", token.lexeme))
                })?;
                Ok(Expr::Number {
                    value,
                    span: token.span,
                })
            }
            TokenType::Float => {
                let value = token.lexeme.parse::<f64>().map_err(|_| {
                    FloError::parse_error(token.span, format!("Invalid float '{}'", token.lexeme))
                })?;
                Ok(Expr::Float {
                    value,
                    span: token.span,
                })
            }
            TokenType::String => Ok(Expr::Str {
                value: token.lexeme,
                span: token.span,
            }),
            TokenType::Identifier => Ok(Expr::Identifier {
                name: token.lexeme,
                span: token.span,
            }),
            TokenType::BuiltinType if self.check(&TokenType::LeftParen) => Ok(Expr::Identifier {
                name: token.lexeme,
                span: token.span,
            }),
            TokenType::LeftParen => {
                if self.check(&TokenType::RightParen) {
                    return Err(FloError::parse_error_with_help(
                        Span::new(token.span.start, self.peek().span.end),
                        "Empty parentheses are not allowed".to_string(),
                        "Parentheses must contain an expression. Use 'None' for an empty value."
                            .to_string(),
                    ));
                }

                let expr = self.expression()?;
                self.consume_with_help(
                    TokenType::RightParen,
                    "Expected ')' after expression",
                    "Every opening parenthesis '(' must have a matching closing parenthesis ')'."
                        .to_string(),
                )?;
                Ok(expr)
            }
            TokenType::LeftBracket => self.list_literal(token.span.start),
            TokenType::LeftBrace => self.object_literal(token.span.start),
            _ => {
                let help_msg = match token.token_type {
                    TokenType::RightParen => {
                        "Found ')' without matching '('. Check for unbalanced parentheses."
                    }
                    TokenType::RightBrace => {
                        "Found '}' without matching '{'. Check for unbalanced braces."
                    }
                    TokenType::RightBracket => {
                        "Found ']' without matching '['. Check for unbalanced brackets."
                    }
                    TokenType::BlockStart | TokenType::BlockEnd => {
                        "The expression is incomplete before the end of the line."
                    }
                    _ => "Expected a literal value, variable, or parenthesized expression here.",
                };
                let found = if token.lexeme.is_empty() {
                    "end of line".to_string()
                } else {
                    format!("'{}'", token.lexeme)
                };

                Err(FloError::parse_error_with_help(
                    token.span,
                    format!("Expected expression, found {}", found),
                    help_msg.to_string(),
                ))
            }
        }
    }

    /// Simple statements end at the end of their line.
    fn end_statement(&self) -> Result<(), FloError> {
        if self.is_at_end()
            || self.check(&TokenType::BlockEnd)
            || self.check(&TokenType::Else)
            || self.check(&TokenType::Elif)
            || self.peek().line != self.previous().line
        {
            return Ok(());
        }

        Err(FloError::parse_error_with_help(
            self.peek().span,
            format!("Unexpected '{}' after statement", self.peek().lexeme),
            "Put each statement on its own line.".to_string(),
        ))
    }

    fn match_types(&mut self, types: &[TokenType]) -> bool {
        for token_type in types {
            if self.check(token_type) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn check(&self, token_type: &TokenType) -> bool {
        if self.is_at_end() {
            return *token_type == TokenType::Eof;
        }
        self.peek().token_type == *token_type
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn peek_next(&self) -> Option<&Token> {
        self.tokens.get(self.current + 1)
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn eof_span(&self) -> Span {
        if self.current > 0 {
            Span::single(self.previous().span.end)
        } else {
            self.peek().span
        }
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<&Token, FloError> {
        if self.check(&token_type) {
            return Ok(self.advance());
        }
        Err(FloError::parse_error(self.error_span(), message.to_string()))
    }

    fn consume_with_help(
        &mut self,
        token_type: TokenType,
        message: &str,
        help: String,
    ) -> Result<&Token, FloError> {
        if self.check(&token_type) {
            return Ok(self.advance());
        }
        Err(FloError::parse_error_with_help(
            self.error_span(),
            message.to_string(),
            help,
        ))
    }

    /// Point at the unexpected token, or just past the last real token when
    /// the input ran out.
    fn error_span(&self) -> Span {
        let token = self.peek();
        if self.is_at_end()
            || (token.lexeme.is_empty() && matches!(token.token_type, TokenType::BlockEnd | TokenType::BlockStart))
        {
            self.eof_span()
        } else {
            token.span
        }
    }
}

/// Parse a token stream into a program.
pub fn parse(tokens: Vec<Token>) -> Result<Program, FloError> {
    Parser::new(tokens).parse()
}

/// Decimal or `0x` hex literal as a wrapping 32-bit int.
fn parse_int_literal(lexeme: &str) -> Option<i32> {
    let value = match lexeme.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => lexeme.parse::<u32>().ok()?,
    };
    Some(value as i32)
}

fn check_update_target(target: &Expr, operator: &str) -> Result<(), FloError> {
    match target {
        Expr::Identifier { .. } | Expr::Member { .. } => Ok(()),
        _ => Err(FloError::parse_error_with_help(
            *target.span(),
            format!("Invalid operand for '{}'", operator),
            format!("'{}' needs a variable or member: x{} or obj.count{}", operator, operator, operator),
        )),
    }
}

/// Nothing may follow `return`, `break`, `continue` or `unreachable` in
/// the same block.
fn check_dead_code(statements: &[Stmt]) -> Result<(), FloError> {
    for pair in statements.windows(2) {
        if pair[0].is_terminator() {
            return Err(FloError::parse_error_with_help(
                *pair[1].span(),
                "Unreachable code".to_string(),
                "Statements after return, break, continue or unreachable never run. Remove them."
                    .to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::lexer::tokenize;

    fn parse_source(source: &str) -> Result<Program, FloError> {
        parse(tokenize(source, "test")?)
    }

    fn parse_expr(source: &str) -> Expr {
        let program = parse_source(source).unwrap();
        match program.statements.into_iter().next() {
            Some(Stmt::Expression { expr, .. }) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn mode_from_shebang() {
        assert_eq!(parse_source("1").unwrap().mode, Mode::Program);
        assert_eq!(parse_source("#!script\n1").unwrap().mode, Mode::Script);
        assert_eq!(parse_source("#!/usr/bin/env flo\n1").unwrap().mode, Mode::Program);
    }

    #[test]
    fn precedence() {
        match parse_expr("1 + 2 * 3") {
            Expr::Binary {
                operator: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(*right, Expr::Binary { operator: BinaryOp::Multiply, .. })),
            other => panic!("unexpected {:?}", other),
        }
        match parse_expr("a or b and c") {
            Expr::Logical {
                operator: LogicalOp::Or,
                right,
                ..
            } => assert!(matches!(*right, Expr::Logical { operator: LogicalOp::And, .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn power_is_left_associative() {
        match parse_expr("2 ** 3 ** 2") {
            Expr::Binary {
                operator: BinaryOp::Power,
                left,
                ..
            } => assert!(matches!(*left, Expr::Binary { operator: BinaryOp::Power, .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn spans_cover_whole_expression() {
        let expr = parse_expr("foo(1, 2).bar");
        assert_eq!(*expr.span(), Span::new(0, 13));
    }

    #[test]
    fn hex_literal_wraps() {
        assert!(matches!(parse_expr("0xFFFFFFFF"), Expr::Number { value: -1, .. }));
    }

    #[test]
    fn compound_assignment() {
        match parse_expr("x += 1") {
            Expr::Assign { operator, .. } => assert_eq!(operator, Some(BinaryOp::Add)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn invalid_assignment_target() {
        let error = parse_source("1 = 2").unwrap_err();
        assert_eq!(error.kind, ErrorKind::ParseError);
        assert_eq!(error.message, "Invalid assignment target");
    }

    #[test]
    fn elvis_expression() {
        assert!(matches!(parse_expr("a ? 1 : 2"), Expr::Elvis { .. }));
    }

    #[test]
    fn object_literal_with_shorthand() {
        match parse_expr("{a: 1, \"b\": 2, c}") {
            Expr::Object { entries, .. } => {
                let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["a", "b", "c"]);
                assert!(matches!(entries[2].1, Expr::Identifier { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn declaration_with_types() {
        let program = parse_source("let mut int[] xs = [1, 2]\nstatic list<list<int>> m = []").unwrap();
        match &program.statements[0] {
            Stmt::VarDecl {
                scope,
                mutable,
                type_name: Some(type_name),
                name,
                ..
            } => {
                assert_eq!(*scope, DeclScope::Local);
                assert!(*mutable);
                assert_eq!(type_name.to_string(), "int[]");
                assert_eq!(name, "xs");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &program.statements[1] {
            Stmt::VarDecl {
                scope: DeclScope::Global,
                type_name: Some(type_name),
                ..
            } => assert_eq!(type_name.to_string(), "list<list<int>>"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn declaration_needs_initializer() {
        let error = parse_source("let int x").unwrap_err();
        assert!(error.message.starts_with("Expected '='"));
    }

    #[test]
    fn function_declaration() {
        let program = parse_source("fn add(int a, int b = 2) int:\n    return a + b\n").unwrap();
        match &program.statements[0] {
            Stmt::Function(decl) => {
                assert_eq!(decl.name, "add");
                assert_eq!(decl.params.len(), 2);
                assert!(decl.params[1].default.is_some());
                assert_eq!(decl.return_type.as_ref().map(|t| t.to_string()), Some("int".to_string()));
                assert_eq!(decl.body.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn builtin_type_names_as_functions() {
        let program = parse_source("fn int(float x) int: return x // 1\nint(3.7)").unwrap();
        assert!(matches!(&program.statements[0], Stmt::Function(decl) if decl.name == "int"));
        match &program.statements[1] {
            Stmt::Expression {
                expr: Expr::Call { callee, .. },
                ..
            } => assert!(matches!(callee.as_ref(), Expr::Identifier { name, .. } if name == "int")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_source("let x = int").is_err());
    }

    #[test]
    fn inline_block() {
        let program = parse_source("fn add(int a, int b) int: return a + b").unwrap();
        assert!(matches!(&program.statements[0], Stmt::Function(decl) if decl.body.len() == 1));
    }

    #[test]
    fn elif_nests_in_else() {
        let source = "if a:\n    1\nelif b:\n    2\nelse:\n    3\n";
        match &parse_source(source).unwrap().statements[0] {
            Stmt::If {
                else_branch: Some(else_branch),
                ..
            } => assert!(matches!(**else_branch, Stmt::If { else_branch: Some(_), .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn for_forms() {
        let program = parse_source("for i in 10: pass\nfor int i in 0..10: pass\nfor x in xs: pass").unwrap();
        assert!(matches!(
            &program.statements[0],
            Stmt::For { iterable: ForIterable::Value(_), .. }
        ));
        assert!(matches!(
            &program.statements[1],
            Stmt::For { iterable: ForIterable::Range { .. }, type_name: Some(_), .. }
        ));
    }

    #[test]
    fn return_value_only_on_same_line() {
        let program = parse_source("fn f():\n    return\nfn g(): return 1").unwrap();
        match &program.statements[0] {
            Stmt::Function(decl) => assert!(matches!(decl.body[0], Stmt::Return { value: None, .. })),
            other => panic!("unexpected {:?}", other),
        }
        match &program.statements[1] {
            Stmt::Function(decl) => assert!(matches!(decl.body[0], Stmt::Return { value: Some(_), .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn dead_code_after_return() {
        let error = parse_source("fn f():\n    return 1\n    2\n").unwrap_err();
        assert_eq!(error.kind, ErrorKind::ParseError);
        assert_eq!(error.message, "Unreachable code");
    }

    #[test]
    fn class_members() {
        let program = parse_source("class Point:\n    let int x = 0\n    static int count = 0\n").unwrap();
        match &program.statements[0] {
            Stmt::Class { body, .. } => {
                assert!(body
                    .iter()
                    .all(|s| matches!(s, Stmt::VarDecl { scope: DeclScope::Member, .. })));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn enum_entries() {
        let program = parse_source("enum Color:\n    RED\n    GREEN = 5\n").unwrap();
        match &program.statements[0] {
            Stmt::Enum { variants, .. } => {
                assert_eq!(variants.len(), 2);
                assert!(variants[1].value.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn postfix_stays_on_its_line() {
        let program = parse_source("let x = a\n(b)").unwrap();
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn one_statement_per_line() {
        let error = parse_source("a = 1 b = 2").unwrap_err();
        assert_eq!(error.kind, ErrorKind::ParseError);
    }

    #[test]
    fn alloc_declaration() {
        assert!(parse_source("@alloc").is_err());
        match &parse_source("@alloc buffer").unwrap().statements[0] {
            Stmt::VarDecl {
                scope: DeclScope::Dynamic,
                initializer: None,
                name,
                ..
            } => assert_eq!(name, "buffer"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_block() {
        let error = parse_source("while x:\ny").unwrap_err();
        assert_eq!(error.message, "Expected an indented block after ':'");
    }

    #[test]
    fn delete_targets() {
        assert!(parse_source("delete x").is_ok());
        assert!(parse_source("delete obj.key").is_ok());
        assert!(parse_source("delete 1 + 2").is_err());
    }
}

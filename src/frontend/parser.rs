use std::collections::BTreeMap;

use hashbrown::HashMap;

use crate::{
    errors::{ErrorCollector, ErrorReporter},
    frontend::{
        ModuleSource,
        ast::{
            BinaryOperator, BuiltinFunction, ClassDefinition, ClassMemberDefinition, Expression,
            ExpressionKind, FieldType, LambdaParameter, Literal, MatchCase, Module,
            ModuleMembersImport, ObjectConstructorField, ObjectPatternName, Parameter, Pattern,
            PatternKind, StatementBlock, Type, TypeDefinition, TypeDefinitionKind,
            UnaryOperator, UndecidedTypeCounter, ValStatement,
        },
        lexer::{Keyword, Lexer, Token, TokenKind},
        location::{ModuleReference, Range},
    },
};

/// Parses one module, reporting syntax errors instead of stopping at them.
///
/// Nodes get fresh undecided types from `counter`; the checker replaces them.
pub fn parse_module(
    source: &ModuleSource,
    counter: &mut UndecidedTypeCounter,
    errors: &mut ErrorCollector,
) -> Module {
    let mut parser = Parser {
        lexer: Lexer::new(&source.file),
        reporter: errors.reporter(&source.reference),
        counter,
        previous_range: Range::DUMMY,
        consumed: 0,
        last_error_range: None,
    };

    let module = parser.parse_module();

    for (range, message) in parser.lexer.take_errors() {
        parser.reporter.syntax_error(range, message);
    }

    module
}

struct Parser<'source, 'a> {
    lexer: Lexer<'source>,
    reporter: ErrorReporter<'a>,
    counter: &'a mut UndecidedTypeCounter,
    /// Range of the most recently consumed token
    previous_range: Range,
    consumed: usize,
    last_error_range: Option<Range>,
}

impl Parser<'_, '_> {
    fn peek_kind(&mut self) -> Option<TokenKind> {
        self.lexer.peek().map(|t| t.kind)
    }

    fn peek_nth_kind(&mut self, n: usize) -> Option<TokenKind> {
        self.lexer.peek_nth(n).map(|t| t.kind)
    }

    fn peek_is(&mut self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn peek_range(&mut self) -> Range {
        match self.lexer.peek() {
            Some(token) => token.range,
            None => {
                let end = self.lexer.current_position();
                Range::new(end, end)
            }
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.lexer.next()?;
        self.previous_range = token.range;
        self.consumed += 1;
        Some(token)
    }

    /// Consumes the next token, or yields a zero-width token at the end of input
    fn bump(&mut self) -> Token {
        match self.advance() {
            Some(token) => token,
            None => Token {
                kind: TokenKind::Unknown,
                span: crate::frontend::lexer::Span { start: 0, end: 0 },
                range: self.peek_range(),
            },
        }
    }

    fn consume_if(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek_is(kind) {
            self.advance()
        } else {
            None
        }
    }

    fn text_of(&self, token: Token) -> &str {
        self.lexer.source().value_of_span(token.span)
    }

    fn report_syntax_error(&mut self, range: Range, message: String) {
        // Only the first error at a given location is kept to avoid cascades
        if self.last_error_range == Some(range) {
            return;
        }

        self.last_error_range = Some(range);
        self.reporter.syntax_error(range, message);
    }

    fn report_unexpected(&mut self, expected: &str) {
        let range = self.peek_range();
        let actual = match self.lexer.peek() {
            Some(token) => self.text_of(token).to_string(),
            None => "<EOF>".to_string(),
        };

        self.report_syntax_error(range, format!("Expected: {expected}, actual: {actual}."));
    }

    /// Consumes a token of the given kind, or reports an error and returns a
    /// zero-width placeholder token without consuming anything
    fn expect_next_to_be(&mut self, kind: TokenKind, expected: &str) -> Token {
        if let Some(token) = self.consume_if(kind) {
            return token;
        }

        self.report_unexpected(expected);
        let at = self.peek_range().start;

        Token {
            kind,
            span: crate::frontend::lexer::Span { start: 0, end: 0 },
            range: Range::new(at, at),
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Token {
        self.expect_next_to_be(TokenKind::Keyword(keyword), &keyword.to_string())
    }

    fn expect_identifier(&mut self, kind: TokenKind, expected: &str) -> (String, Range) {
        if self.peek_is(kind) {
            let token = self.bump();
            return (self.text_of(token).to_string(), token.range);
        }

        self.report_unexpected(expected);
        let at = self.peek_range().start;
        (String::from("MISSING"), Range::new(at, at))
    }

    fn lower_identifier(&mut self) -> (String, Range) {
        self.expect_identifier(TokenKind::LowerIdentifier, "lowercase identifier")
    }

    fn upper_identifier(&mut self) -> (String, Range) {
        self.expect_identifier(TokenKind::UpperIdentifier, "uppercase identifier")
    }

    /// Skips one token when a loop iteration made no progress
    fn ensure_progress(&mut self, consumed_before: usize) {
        if self.consumed == consumed_before {
            self.advance();
        }
    }

    fn fresh_type(&mut self) -> Type {
        self.counter.fresh()
    }

    fn expression(&mut self, range: Range, kind: ExpressionKind) -> Expression {
        let ty = self.fresh_type();
        Expression::new(range, ty, kind)
    }

    /// ( import )* ( class )*
    fn parse_module(&mut self) -> Module {
        let mut imports = Vec::new();
        let mut classes = Vec::new();

        while self.peek_is(TokenKind::Keyword(Keyword::Import)) {
            imports.push(self.parse_import());
        }

        while self.lexer.peek().is_some() {
            let consumed_before = self.consumed;
            classes.push(self.parse_class());
            self.ensure_progress(consumed_before);
        }

        Module { imports, classes }
    }

    // import { Foo, Bar } from some.module
    fn parse_import(&mut self) -> ModuleMembersImport {
        let import_keyword = self.expect_keyword(Keyword::Import);
        self.expect_next_to_be(TokenKind::OpenBrace, "{");

        let mut imported_members = vec![self.upper_identifier()];
        while self.consume_if(TokenKind::Comma).is_some() {
            imported_members.push(self.upper_identifier());
        }

        self.expect_next_to_be(TokenKind::CloseBrace, "}");
        self.expect_keyword(Keyword::From);

        let (imported_module, imported_module_range) = self.parse_module_reference();

        ModuleMembersImport {
            range: import_keyword.range.union(&imported_module_range),
            imported_members,
            imported_module,
            imported_module_range,
        }
    }

    // foo.Bar.baz
    fn parse_module_reference(&mut self) -> (ModuleReference, Range) {
        let mut parts = Vec::new();
        let start = self.peek_range();

        loop {
            match self.peek_kind() {
                Some(TokenKind::LowerIdentifier | TokenKind::UpperIdentifier) => {
                    let token = self.bump();
                    parts.push(self.text_of(token).to_string());
                }
                _ => {
                    self.report_unexpected("module name");
                    break;
                }
            }

            if self.consume_if(TokenKind::Dot).is_none() {
                break;
            }
        }

        (ModuleReference::new(parts), start.union(&self.previous_range))
    }

    // <A, B>
    fn parse_type_parameters(&mut self) -> Vec<String> {
        let mut type_parameters = Vec::new();

        if self.consume_if(TokenKind::LessThan).is_some() {
            type_parameters.push(self.upper_identifier().0);
            while self.consume_if(TokenKind::Comma).is_some() {
                type_parameters.push(self.upper_identifier().0);
            }
            self.expect_next_to_be(TokenKind::GreaterThan, ">");
        }

        type_parameters
    }

    /// private? class Name<T>(type definition)? { members }
    fn parse_class(&mut self) -> ClassDefinition {
        let start = self.peek_range();
        let is_public = self
            .consume_if(TokenKind::Keyword(Keyword::Private))
            .is_none();

        self.expect_keyword(Keyword::Class);
        let (name, name_range) = self.upper_identifier();
        let type_parameters = self.parse_type_parameters();

        let type_definition = if self.peek_is(TokenKind::OpenParen) {
            self.parse_type_definition()
        } else {
            TypeDefinition::empty_object(name_range)
        };

        self.expect_next_to_be(TokenKind::OpenBrace, "{");

        let mut members = Vec::new();
        while !matches!(self.peek_kind(), None | Some(TokenKind::CloseBrace)) {
            let consumed_before = self.consumed;
            members.push(self.parse_class_member());
            self.ensure_progress(consumed_before);
        }

        self.expect_next_to_be(TokenKind::CloseBrace, "}");

        ClassDefinition {
            range: start.union(&self.previous_range),
            name,
            name_range,
            is_public,
            type_parameters,
            type_definition,
            members,
        }
    }

    // (val a: int, private val b: bool) or (Tag1(int), Tag2(bool))
    fn parse_type_definition(&mut self) -> TypeDefinition {
        let open_paren = self.expect_next_to_be(TokenKind::OpenParen, "(");

        let kind = if self.peek_is(TokenKind::UpperIdentifier) {
            TypeDefinitionKind::Variant
        } else {
            TypeDefinitionKind::Object
        };

        let mut names = Vec::new();
        let mut mappings = HashMap::new();

        loop {
            let (name, field_type) = match kind {
                TypeDefinitionKind::Object => {
                    let is_public = self
                        .consume_if(TokenKind::Keyword(Keyword::Private))
                        .is_none();
                    self.expect_keyword(Keyword::Val);
                    let (name, _) = self.lower_identifier();
                    self.expect_next_to_be(TokenKind::Colon, ":");
                    let ty = self.parse_type();
                    (name, FieldType { ty, is_public })
                }
                TypeDefinitionKind::Variant => {
                    let (name, _) = self.upper_identifier();
                    self.expect_next_to_be(TokenKind::OpenParen, "(");
                    let ty = self.parse_type();
                    self.expect_next_to_be(TokenKind::CloseParen, ")");
                    (name, FieldType { ty, is_public: false })
                }
            };

            // Duplicates are kept in `names` so the checker can report them
            names.push(name.clone());
            mappings.entry(name).or_insert(field_type);

            if self.consume_if(TokenKind::Comma).is_none() {
                break;
            }
        }

        self.expect_next_to_be(TokenKind::CloseParen, ")");

        TypeDefinition {
            range: open_paren.range.union(&self.previous_range),
            kind,
            names,
            mappings,
        }
    }

    /// private? (function | method) <T>? name(a: int): int = body
    fn parse_class_member(&mut self) -> ClassMemberDefinition {
        let start = self.peek_range();
        let is_public = self
            .consume_if(TokenKind::Keyword(Keyword::Private))
            .is_none();

        let is_method = match self.peek_kind() {
            Some(TokenKind::Keyword(Keyword::Method)) => {
                self.advance();
                true
            }
            Some(TokenKind::Keyword(Keyword::Function)) => {
                self.advance();
                false
            }
            _ => {
                self.report_unexpected("function or method");
                false
            }
        };

        let type_parameters = self.parse_type_parameters();
        let (name, name_range) = self.lower_identifier();

        self.expect_next_to_be(TokenKind::OpenParen, "(");
        let mut parameters = Vec::new();
        if !self.peek_is(TokenKind::CloseParen) {
            loop {
                let (name, name_range) = self.lower_identifier();
                self.expect_next_to_be(TokenKind::Colon, ":");
                let type_start = self.peek_range();
                let ty = self.parse_type();

                parameters.push(Parameter {
                    name,
                    name_range,
                    ty,
                    type_range: type_start.union(&self.previous_range),
                });

                if self.consume_if(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect_next_to_be(TokenKind::CloseParen, ")");

        self.expect_next_to_be(TokenKind::Colon, ":");
        let return_type = self.parse_type();
        self.expect_next_to_be(TokenKind::Equals, "=");
        let body = self.parse_expression();

        ClassMemberDefinition {
            range: start.union(&body.range),
            is_public,
            is_method,
            name,
            name_range,
            type_parameters,
            parameters,
            return_type,
            body,
        }
    }

    // type = "unit" | "bool" | "int" | "string"
    //        | UPPER_ID ( "<" type ( "," type )* ">" )?
    //        | "[" type ( "*" type )* "]"
    //        | "(" ( type ( "," type )* )? ")" "->" type
    fn parse_type(&mut self) -> Type {
        match self.peek_kind() {
            Some(TokenKind::Keyword(Keyword::Unit)) => {
                self.advance();
                Type::UNIT
            }
            Some(TokenKind::Keyword(Keyword::Bool)) => {
                self.advance();
                Type::BOOL
            }
            Some(TokenKind::Keyword(Keyword::Int)) => {
                self.advance();
                Type::INT
            }
            Some(TokenKind::Keyword(Keyword::String)) => {
                self.advance();
                Type::STRING
            }
            Some(TokenKind::UpperIdentifier) => {
                let (name, _) = self.upper_identifier();
                let mut type_arguments = Vec::new();

                if self.consume_if(TokenKind::LessThan).is_some() {
                    type_arguments.push(self.parse_type());
                    while self.consume_if(TokenKind::Comma).is_some() {
                        type_arguments.push(self.parse_type());
                    }
                    self.expect_next_to_be(TokenKind::GreaterThan, ">");
                }

                Type::Identifier {
                    name,
                    type_arguments,
                }
            }
            Some(TokenKind::OpenBracket) => {
                self.advance();
                let mut elements = vec![self.parse_type()];
                while self.consume_if(TokenKind::Asterisk).is_some() {
                    elements.push(self.parse_type());
                }
                self.expect_next_to_be(TokenKind::CloseBracket, "]");
                Type::Tuple(elements)
            }
            Some(TokenKind::OpenParen) => {
                self.advance();
                let mut argument_types = Vec::new();
                if !self.peek_is(TokenKind::CloseParen) {
                    argument_types.push(self.parse_type());
                    while self.consume_if(TokenKind::Comma).is_some() {
                        argument_types.push(self.parse_type());
                    }
                }
                self.expect_next_to_be(TokenKind::CloseParen, ")");
                self.expect_next_to_be(TokenKind::Arrow, "->");
                let return_type = self.parse_type();
                Type::function(argument_types, return_type)
            }
            _ => {
                self.report_unexpected("type");
                Type::UNIT
            }
        }
    }

    /// expression     -> disjunction
    /// disjunction    -> conjunction ( "||" conjunction )*
    /// conjunction    -> comparison ( "&&" comparison )*
    /// comparison     -> concat ( ( "==" | "!=" | "<" | "<=" | ">" | ">=" ) concat )*
    /// concat         -> term ( "::" term )*
    /// term           -> factor ( ( "+" | "-" ) factor )*
    /// factor         -> unary ( ( "*" | "/" | "%" ) unary )*
    /// unary          -> ( "!" | "-" ) unary | postfix
    /// postfix        -> base ( "." LOWER_ID | "(" arguments ")" )*
    fn parse_expression(&mut self) -> Expression {
        self.parse_disjunction_expression()
    }

    fn binary(&mut self, operator: BinaryOperator, operator_range: Range, e1: Expression, e2: Expression) -> Expression {
        self.expression(
            e1.range.union(&e2.range),
            ExpressionKind::Binary {
                operator,
                operator_range,
                e1: Box::new(e1),
                e2: Box::new(e2),
            },
        )
    }

    fn parse_disjunction_expression(&mut self) -> Expression {
        let mut expression = self.parse_conjunction_expression();

        while let Some(operator) = self.consume_if(TokenKind::LogicalOr) {
            let rhs = self.parse_conjunction_expression();
            expression = self.binary(BinaryOperator::Or, operator.range, expression, rhs);
        }

        expression
    }

    fn parse_conjunction_expression(&mut self) -> Expression {
        let mut expression = self.parse_comparison_expression();

        while let Some(operator) = self.consume_if(TokenKind::LogicalAnd) {
            let rhs = self.parse_comparison_expression();
            expression = self.binary(BinaryOperator::And, operator.range, expression, rhs);
        }

        expression
    }

    fn parse_comparison_expression(&mut self) -> Expression {
        let mut expression = self.parse_concat_expression();

        while self
            .peek_kind()
            .is_some_and(|kind| kind.is_comparison_operator())
        {
            let token = self.bump();
            let operator = match token.kind {
                TokenKind::DoubleEquals => BinaryOperator::Equal,
                TokenKind::NotEquals => BinaryOperator::NotEqual,
                TokenKind::LessThan => BinaryOperator::LessThan,
                TokenKind::LessThanOrEqualTo => BinaryOperator::LessThanOrEqual,
                TokenKind::GreaterThan => BinaryOperator::GreaterThan,
                _ => BinaryOperator::GreaterThanOrEqual,
            };
            let rhs = self.parse_concat_expression();
            expression = self.binary(operator, token.range, expression, rhs);
        }

        expression
    }

    fn parse_concat_expression(&mut self) -> Expression {
        let mut expression = self.parse_term_expression();

        while let Some(operator) = self.consume_if(TokenKind::DoubleColon) {
            let rhs = self.parse_term_expression();
            expression = self.binary(BinaryOperator::Concat, operator.range, expression, rhs);
        }

        expression
    }

    fn parse_term_expression(&mut self) -> Expression {
        let mut expression = self.parse_factor_expression();

        while self.peek_kind().is_some_and(|kind| kind.is_term_operator()) {
            let token = self.bump();
            let operator = match token.kind {
                TokenKind::Plus => BinaryOperator::Plus,
                _ => BinaryOperator::Minus,
            };
            let rhs = self.parse_factor_expression();
            expression = self.binary(operator, token.range, expression, rhs);
        }

        expression
    }

    fn parse_factor_expression(&mut self) -> Expression {
        let mut expression = self.parse_unary_expression();

        while self.peek_kind().is_some_and(|kind| kind.is_factor_operator()) {
            let token = self.bump();
            let operator = match token.kind {
                TokenKind::Asterisk => BinaryOperator::Multiply,
                TokenKind::Divide => BinaryOperator::Divide,
                _ => BinaryOperator::Modulo,
            };
            let rhs = self.parse_unary_expression();
            expression = self.binary(operator, token.range, expression, rhs);
        }

        expression
    }

    fn parse_unary_expression(&mut self) -> Expression {
        if !self.peek_kind().is_some_and(|kind| kind.is_unary_operator()) {
            return self.parse_postfix_expression();
        }

        let token = self.bump();

        // The magnitude of i64::MIN only fits when it is negated right away
        if token.kind == TokenKind::Minus {
            if let Some(literal) = self.lexer.peek() {
                if literal.kind == TokenKind::IntegerLiteral
                    && self.text_of(literal) == "9223372036854775808"
                {
                    self.advance();
                    return self.expression(
                        token.range.union(&literal.range),
                        ExpressionKind::Literal(Literal::Int(i64::MIN)),
                    );
                }
            }
        }

        let operator = match token.kind {
            TokenKind::Bang => UnaryOperator::Not,
            _ => UnaryOperator::Negate,
        };
        let expression = self.parse_unary_expression();

        self.expression(
            token.range.union(&expression.range),
            ExpressionKind::Unary {
                operator,
                expression: Box::new(expression),
            },
        )
    }

    fn parse_postfix_expression(&mut self) -> Expression {
        let mut expression = self.parse_base_expression();

        loop {
            if self.consume_if(TokenKind::Dot).is_some() {
                let (field_name, field_range) = self.lower_identifier();
                expression = self.expression(
                    expression.range.union(&field_range),
                    ExpressionKind::FieldAccess {
                        expression: Box::new(expression),
                        field_name,
                        field_range,
                        field_order: 0,
                    },
                );
            } else if self.consume_if(TokenKind::OpenParen).is_some() {
                let arguments = self.parse_arguments();
                expression = self.expression(
                    expression.range.union(&self.previous_range),
                    ExpressionKind::FunctionApplication {
                        function: Box::new(expression),
                        arguments,
                    },
                );
            } else {
                return expression;
            }
        }
    }

    // a, b, c)
    fn parse_arguments(&mut self) -> Vec<Expression> {
        let mut arguments = Vec::new();

        if !self.peek_is(TokenKind::CloseParen) {
            arguments.push(self.parse_expression());
            while self.consume_if(TokenKind::Comma).is_some() {
                arguments.push(self.parse_expression());
            }
        }

        self.expect_next_to_be(TokenKind::CloseParen, ")");
        arguments
    }

    fn parse_base_expression(&mut self) -> Expression {
        let Some(token) = self.lexer.peek() else {
            self.report_unexpected("expression");
            return self.placeholder_expression();
        };

        match token.kind {
            TokenKind::IntegerLiteral => {
                self.advance();
                let literal = match self.text_of(token).parse::<i64>() {
                    Ok(value) => value,
                    Err(_) => {
                        self.report_syntax_error(token.range, "Not a 64-bit integer.".into());
                        0
                    }
                };
                self.expression(token.range, ExpressionKind::Literal(Literal::Int(literal)))
            }
            TokenKind::StringLiteral => {
                self.advance();
                let value = unescape_string_literal(self.text_of(token));
                self.expression(token.range, ExpressionKind::Literal(Literal::String(value)))
            }
            TokenKind::BooleanLiteral => {
                self.advance();
                let value = self.text_of(token) == "true";
                self.expression(token.range, ExpressionKind::Literal(Literal::Bool(value)))
            }
            TokenKind::Keyword(Keyword::This) => {
                self.advance();
                self.expression(token.range, ExpressionKind::This)
            }
            TokenKind::LowerIdentifier => {
                self.advance();
                let name = self.text_of(token).to_string();
                self.expression(token.range, ExpressionKind::Variable(name))
            }
            TokenKind::UpperIdentifier => self.parse_class_member_or_variant(),
            TokenKind::OpenBracket => self.parse_tuple_constructor(),
            TokenKind::OpenBrace => {
                let is_object = self.peek_nth_kind(1) == Some(TokenKind::LowerIdentifier)
                    && matches!(
                        self.peek_nth_kind(2),
                        Some(TokenKind::Colon | TokenKind::Comma)
                    );

                if is_object {
                    self.parse_object_constructor()
                } else {
                    self.parse_statement_block()
                }
            }
            TokenKind::OpenParen => {
                let is_lambda = match (self.peek_nth_kind(1), self.peek_nth_kind(2)) {
                    (Some(TokenKind::CloseParen), Some(TokenKind::Arrow)) => true,
                    (
                        Some(TokenKind::LowerIdentifier),
                        Some(TokenKind::Colon | TokenKind::Comma),
                    ) => true,
                    (Some(TokenKind::LowerIdentifier), Some(TokenKind::CloseParen)) => {
                        self.peek_nth_kind(3) == Some(TokenKind::Arrow)
                    }
                    _ => false,
                };

                if is_lambda {
                    self.parse_lambda()
                } else {
                    self.advance();
                    let mut nested = self.parse_expression();
                    self.expect_next_to_be(TokenKind::CloseParen, ")");
                    nested.range = token.range.union(&self.previous_range);
                    nested
                }
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if_else(),
            TokenKind::Keyword(Keyword::Match) => self.parse_match(),
            TokenKind::Keyword(Keyword::Panic) => {
                let (range, argument) = self.parse_builtin_argument();
                self.expression(range, ExpressionKind::Panic(Box::new(argument)))
            }
            TokenKind::Keyword(
                keyword @ (Keyword::Println | Keyword::IntToString | Keyword::StringToInt),
            ) => {
                let function = match keyword {
                    Keyword::Println => BuiltinFunction::Println,
                    Keyword::IntToString => BuiltinFunction::IntToString,
                    _ => BuiltinFunction::StringToInt,
                };
                let (range, argument) = self.parse_builtin_argument();
                self.expression(
                    range,
                    ExpressionKind::BuiltinCall {
                        function,
                        argument: Box::new(argument),
                    },
                )
            }
            _ => {
                self.report_unexpected("expression");

                // Closing delimiters belong to an enclosing construct
                if !matches!(
                    token.kind,
                    TokenKind::CloseBrace
                        | TokenKind::CloseParen
                        | TokenKind::CloseBracket
                        | TokenKind::Semicolon
                        | TokenKind::Keyword(Keyword::Class)
                ) {
                    self.advance();
                }

                self.placeholder_expression()
            }
        }
    }

    fn placeholder_expression(&mut self) -> Expression {
        let at = self.peek_range().start;
        self.expression(
            Range::new(at, at),
            ExpressionKind::Literal(Literal::Int(0)),
        )
    }

    // Class.member or Tag(data)
    fn parse_class_member_or_variant(&mut self) -> Expression {
        let (name, name_range) = self.upper_identifier();

        if self.consume_if(TokenKind::Dot).is_some() {
            let (member_name, member_name_range) = self.lower_identifier();
            return self.expression(
                name_range.union(&member_name_range),
                ExpressionKind::ClassMember {
                    class_name: name,
                    class_name_range: name_range,
                    member_name,
                    member_name_range,
                    type_arguments: Vec::new(),
                },
            );
        }

        self.expect_next_to_be(TokenKind::OpenParen, "(");
        let data = self.parse_expression();
        self.expect_next_to_be(TokenKind::CloseParen, ")");

        self.expression(
            name_range.union(&self.previous_range),
            ExpressionKind::VariantConstructor {
                tag: name,
                tag_range: name_range,
                tag_order: 0,
                data: Box::new(data),
            },
        )
    }

    // [a, b, c]
    fn parse_tuple_constructor(&mut self) -> Expression {
        let open = self.expect_next_to_be(TokenKind::OpenBracket, "[");
        let mut elements = vec![self.parse_expression()];

        while self.consume_if(TokenKind::Comma).is_some() {
            elements.push(self.parse_expression());
        }

        self.expect_next_to_be(TokenKind::CloseBracket, "]");
        let range = open.range.union(&self.previous_range);

        if elements.len() < 2 {
            self.report_syntax_error(range, "A tuple needs at least two elements.".into());
        }

        self.expression(range, ExpressionKind::TupleConstructor(elements))
    }

    // { a: 1, b }
    fn parse_object_constructor(&mut self) -> Expression {
        let open = self.expect_next_to_be(TokenKind::OpenBrace, "{");
        let mut fields = Vec::new();

        loop {
            let (name, name_range) = self.lower_identifier();

            let expression = if self.consume_if(TokenKind::Colon).is_some() {
                self.parse_expression()
            } else {
                self.expression(name_range, ExpressionKind::Variable(name.clone()))
            };

            fields.push(ObjectConstructorField {
                name,
                range: name_range.union(&expression.range),
                order: 0,
                expression,
            });

            if self.consume_if(TokenKind::Comma).is_none() {
                break;
            }
        }

        self.expect_next_to_be(TokenKind::CloseBrace, "}");

        self.expression(
            open.range.union(&self.previous_range),
            ExpressionKind::ObjectConstructor(fields),
        )
    }

    // { val a = 1; val b = 2; a + b }
    fn parse_statement_block(&mut self) -> Expression {
        let open = self.expect_next_to_be(TokenKind::OpenBrace, "{");
        let mut statements = Vec::new();

        while self.peek_is(TokenKind::Keyword(Keyword::Val)) {
            statements.push(self.parse_val_statement());
        }

        let expression = if matches!(self.peek_kind(), None | Some(TokenKind::CloseBrace)) {
            None
        } else {
            Some(self.parse_expression())
        };

        self.expect_next_to_be(TokenKind::CloseBrace, "}");
        let range = open.range.union(&self.previous_range);

        self.expression(
            range,
            ExpressionKind::StatementBlock(Box::new(StatementBlock {
                range,
                statements,
                expression,
            })),
        )
    }

    // val pattern: type = expression;
    fn parse_val_statement(&mut self) -> ValStatement {
        let val_keyword = self.expect_keyword(Keyword::Val);
        let pattern = self.parse_pattern();

        let type_annotation = self
            .consume_if(TokenKind::Colon)
            .map(|_| self.parse_type());

        self.expect_next_to_be(TokenKind::Equals, "=");
        let assigned = self.parse_expression();
        self.expect_next_to_be(TokenKind::Semicolon, ";");

        ValStatement {
            range: val_keyword.range.union(&self.previous_range),
            pattern,
            type_annotation,
            assigned,
        }
    }

    fn parse_pattern(&mut self) -> Pattern {
        let start = self.peek_range();

        let kind = match self.peek_kind() {
            Some(TokenKind::OpenBracket) => {
                self.advance();
                let mut names = vec![self.parse_optional_name()];
                while self.consume_if(TokenKind::Comma).is_some() {
                    names.push(self.parse_optional_name());
                }
                self.expect_next_to_be(TokenKind::CloseBracket, "]");
                PatternKind::Tuple(names)
            }
            Some(TokenKind::OpenBrace) => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    let (field_name, field_range) = self.lower_identifier();
                    let alias = self
                        .consume_if(TokenKind::Keyword(Keyword::As))
                        .map(|_| self.lower_identifier().0);

                    names.push(ObjectPatternName {
                        range: field_range.union(&self.previous_range),
                        field_name,
                        field_order: 0,
                        alias,
                    });

                    if self.consume_if(TokenKind::Comma).is_none() {
                        break;
                    }
                }
                self.expect_next_to_be(TokenKind::CloseBrace, "}");
                PatternKind::Object(names)
            }
            Some(TokenKind::Underscore) => {
                self.advance();
                PatternKind::Wildcard
            }
            _ => PatternKind::Variable(self.lower_identifier().0),
        };

        Pattern {
            range: start.union(&self.previous_range),
            kind,
        }
    }

    // a or _
    fn parse_optional_name(&mut self) -> Option<(String, Range)> {
        if self.consume_if(TokenKind::Underscore).is_some() {
            None
        } else {
            Some(self.lower_identifier())
        }
    }

    // (a, b: int) -> body
    fn parse_lambda(&mut self) -> Expression {
        let open = self.expect_next_to_be(TokenKind::OpenParen, "(");
        let mut parameters = Vec::new();

        if !self.peek_is(TokenKind::CloseParen) {
            loop {
                let (name, range) = self.lower_identifier();
                let ty = match self.consume_if(TokenKind::Colon) {
                    Some(_) => self.parse_type(),
                    None => self.fresh_type(),
                };

                parameters.push(LambdaParameter { name, range, ty });

                if self.consume_if(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }

        self.expect_next_to_be(TokenKind::CloseParen, ")");
        self.expect_next_to_be(TokenKind::Arrow, "->");
        let body = self.parse_expression();

        self.expression(
            open.range.union(&body.range),
            ExpressionKind::Lambda {
                parameters,
                captured: BTreeMap::new(),
                body: Box::new(body),
            },
        )
    }

    // if condition then e1 else e2
    fn parse_if_else(&mut self) -> Expression {
        let if_keyword = self.expect_keyword(Keyword::If);
        let condition = self.parse_expression();
        self.expect_keyword(Keyword::Then);
        let e1 = self.parse_expression();
        self.expect_keyword(Keyword::Else);
        let e2 = self.parse_expression();

        self.expression(
            if_keyword.range.union(&e2.range),
            ExpressionKind::IfElse {
                condition: Box::new(condition),
                e1: Box::new(e1),
                e2: Box::new(e2),
            },
        )
    }

    // match (e) { | Tag data -> e1 | _ -> e2 }
    fn parse_match(&mut self) -> Expression {
        let match_keyword = self.expect_keyword(Keyword::Match);
        self.expect_next_to_be(TokenKind::OpenParen, "(");
        let matched = self.parse_expression();
        self.expect_next_to_be(TokenKind::CloseParen, ")");
        self.expect_next_to_be(TokenKind::OpenBrace, "{");

        let mut cases = Vec::new();
        loop {
            let bar = self.expect_next_to_be(TokenKind::Bar, "|");

            let (tag, data_variable) = if self.consume_if(TokenKind::Underscore).is_some() {
                (None, None)
            } else {
                let tag = self.upper_identifier();
                let data_variable = if self.consume_if(TokenKind::Underscore).is_some() {
                    None
                } else {
                    Some(self.lower_identifier())
                };
                (Some(tag), data_variable)
            };

            self.expect_next_to_be(TokenKind::Arrow, "->");
            let expression = self.parse_expression();

            cases.push(MatchCase {
                range: bar.range.union(&expression.range),
                tag,
                tag_order: 0,
                data_variable,
                expression,
            });

            if !self.peek_is(TokenKind::Bar) {
                break;
            }
        }

        self.expect_next_to_be(TokenKind::CloseBrace, "}");

        self.expression(
            match_keyword.range.union(&self.previous_range),
            ExpressionKind::Match {
                matched: Box::new(matched),
                cases,
            },
        )
    }

    // keyword(argument)
    fn parse_builtin_argument(&mut self) -> (Range, Expression) {
        let keyword = self.bump().range;
        self.expect_next_to_be(TokenKind::OpenParen, "(");
        let argument = self.parse_expression();
        self.expect_next_to_be(TokenKind::CloseParen, ")");

        (keyword.union(&self.previous_range), argument)
    }
}

fn unescape_string_literal(text: &str) -> String {
    let inner = text.strip_prefix('"').unwrap_or(text);
    let inner = inner.strip_suffix('"').unwrap_or(inner);

    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn parse(text: &str) -> (Module, ErrorCollector) {
        let source = ModuleSource::in_memory(ModuleReference::from_dotted("Test"), text);
        let mut counter = UndecidedTypeCounter::new();
        let mut errors = ErrorCollector::new();
        let module = parse_module(&source, &mut counter, &mut errors);
        (module, errors)
    }

    fn parse_body(text: &str) -> Expression {
        let (module, errors) = parse(&format!("class Main {{ function main(): int = {text} }}"));
        assert!(errors.is_empty(), "{:?}", errors.errors());
        module.classes[0].members[0].body.clone()
    }

    #[test]
    fn parses_classes_with_type_definitions() {
        let (module, errors) = parse(indoc::indoc! {r#"
            import { Foo, Bar } from some.module
            class Pair<A, B>(val first: A, private val second: B) {
              method first(): A = this.first
            }
            private class Opt(None(unit), Some(int)) {}
            class Util {}
        "#});

        assert!(errors.is_empty(), "{:?}", errors.errors());
        assert_eq!(module.imports[0].imported_members.len(), 2);
        assert_eq!(module.imports[0].imported_module.to_string(), "some.module");

        let pair = &module.classes[0];
        assert_eq!(pair.type_parameters, vec!["A", "B"]);
        assert_eq!(pair.type_definition.names, vec!["first", "second"]);
        assert!(!pair.type_definition.mappings["second"].is_public);
        assert!(pair.members[0].is_method);

        let opt = &module.classes[1];
        assert!(!opt.is_public);
        assert_eq!(opt.type_definition.kind, TypeDefinitionKind::Variant);
        assert!(module.classes[2].type_definition.names.is_empty());
    }

    #[test]
    fn respects_operator_precedence() {
        let body = parse_body("1 + 2 * 3 == 7 || false");

        let ExpressionKind::Binary { operator, e1, .. } = &body.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*operator, BinaryOperator::Or);

        let ExpressionKind::Binary { operator, e1, .. } = &e1.kind else {
            panic!("expected comparison");
        };
        assert_eq!(*operator, BinaryOperator::Equal);

        let ExpressionKind::Binary { operator, e2, .. } = &e1.kind else {
            panic!("expected addition");
        };
        assert_eq!(*operator, BinaryOperator::Plus);
        assert!(matches!(
            e2.kind,
            ExpressionKind::Binary {
                operator: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn distinguishes_objects_blocks_and_lambdas() {
        assert!(matches!(
            parse_body("{ a: 1, b }").kind,
            ExpressionKind::ObjectConstructor(_)
        ));
        assert!(matches!(
            parse_body("{ val a = 1; a }").kind,
            ExpressionKind::StatementBlock(_)
        ));
        assert!(matches!(
            parse_body("(x, y: int) -> x").kind,
            ExpressionKind::Lambda { .. }
        ));
        assert!(matches!(parse_body("(x)").kind, ExpressionKind::Variable(_)));
        assert!(matches!(
            parse_body("(x) -> x").kind,
            ExpressionKind::Lambda { .. }
        ));
    }

    #[test]
    fn parses_match_with_wildcard_arm() {
        let body = parse_body("match (v) { | Some x -> x | None _ -> 0 | _ -> 1 }");

        let ExpressionKind::Match { cases, .. } = &body.kind else {
            panic!("expected match");
        };
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].data_variable.as_ref().unwrap().0, "x");
        assert!(cases[1].data_variable.is_none());
        assert!(cases[2].tag.is_none());
    }

    #[test]
    fn parses_patterns() {
        let body = parse_body("{ val [a, _] = t; val { f, g as h } = o; val _ = 1; a }");

        let ExpressionKind::StatementBlock(block) = &body.kind else {
            panic!("expected block");
        };
        assert!(matches!(&block.statements[0].pattern.kind, PatternKind::Tuple(names) if names[1].is_none()));
        assert!(matches!(
            &block.statements[1].pattern.kind,
            PatternKind::Object(names) if names[1].bound_name() == "h"
        ));
        assert!(matches!(block.statements[2].pattern.kind, PatternKind::Wildcard));
    }

    #[test]
    fn unescapes_strings_and_handles_min_int() {
        assert!(matches!(
            parse_body(r#""a\"b\n""#).kind,
            ExpressionKind::Literal(Literal::String(ref s)) if s == "a\"b\n"
        ));
        assert!(matches!(
            parse_body("-9223372036854775808").kind,
            ExpressionKind::Literal(Literal::Int(i64::MIN))
        ));
    }

    #[test]
    fn reports_single_error_for_missing_brace() {
        let (_, errors) = parse("class Main { function main(): string = 3");

        assert_eq!(errors.len(), 1);
        assert_eq!(errors.errors()[0].kind, ErrorKind::SyntaxError);
    }

    #[test]
    fn recovers_from_garbage_members() {
        let (module, errors) = parse("class A { ; function f(): int = 1 } class B {}");

        assert!(!errors.is_empty());
        assert_eq!(module.classes.len(), 2);
        assert_eq!(module.classes[0].members.last().unwrap().name, "f");
    }

    #[test]
    fn rejects_integer_overflow() {
        let (_, errors) = parse("class A { function f(): int = 99999999999999999999 }");

        assert_eq!(errors.len(), 1);
        assert!(errors.errors()[0].message.contains("64-bit"));
    }
}

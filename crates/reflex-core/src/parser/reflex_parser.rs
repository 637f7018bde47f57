//! Reflex source parser using nom
//!
//! # EBNF Grammar
//!
//! ```ebnf
//! unit        = [ "package" dotted ";" ], { "import" dotted [ ".*" ] ";" }, class, { class };
//! class       = { annotation }, { modifier }, "class", ident, [ "extends", dotted ], "{", { member }, "}";
//! member      = { annotation }, { modifier }, ( field | method );
//! field       = "field", ident, ":", dotted, [ "=", expr ], ";";
//! method      = "fn", ident, "(", [ param, { ",", param } ], ")", [ ":", dotted ], ( block | ";" );
//! param       = ident, ":", dotted;
//! annotation  = "@", dotted, [ "(", string, ")" ];
//! modifier    = "public" | "protected" | "private" | "static";
//!
//! block       = "{", { stmt }, "}";
//! stmt        = "let", ident, [ ":", dotted ], "=", expr, ";"
//!             | "return", [ expr ], ";"
//!             | "if", "(", expr, ")", block, [ "else", ( block | if ) ]
//!             | "while", "(", expr, ")", block
//!             | expr, [ "=", expr ], ";";
//!
//! expr        = and, { "||", and };
//! and         = equality, { "&&", equality };
//! equality    = relation, { ( "==" | "!=" ), relation };
//! relation    = additive, { ( "<=" | ">=" | "<" | ">" ), additive };
//! additive    = term, { ( "+" | "-" ), term };
//! term        = unary, { ( "*" | "/" | "%" ), unary };
//! unary       = ( "-" | "!" ), unary | postfix;
//! postfix     = primary, { ".", ident, [ args ] };
//! primary     = float | int | string | "true" | "false" | "null" | "this"
//!             | "new", dotted, args | ident, [ args ] | "(", expr, ")";
//! ```

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_until},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace1, not_line_ending, one_of, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value, verify},
    error::{Error, ErrorKind},
    multi::{many0, many1, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::{ParseError, StructuralParser};
use crate::ast::{
    Annotation, BinaryOp, Expr, FieldDecl, LValue, Member, MethodDecl, Modifiers, Param, Stmt,
    StructuralTree, TypeRef, UnaryOp, Visibility,
};

const KEYWORDS: &[&str] = &[
    "package", "import", "class", "extends", "field", "fn", "let", "return", "if", "else",
    "while", "new", "this", "true", "false", "null", "public", "private", "protected", "static",
];

/// Parser for the Reflex class language
#[derive(Debug, Default, Clone, Copy)]
pub struct ReflexParser;

impl ReflexParser {
    pub fn new() -> Self {
        Self
    }
}

impl StructuralParser for ReflexParser {
    fn parse_unit(&self, source: &str) -> Result<Vec<StructuralTree>, ParseError> {
        parse_source_unit(source)
    }

    fn parse_expression(&self, source: &str) -> Result<Expr, ParseError> {
        parse_expression(source)
    }

    fn parse_body(&self, source: &str) -> Result<Vec<Stmt>, ParseError> {
        parse_statements(source)
    }

    fn name(&self) -> &'static str {
        "reflex"
    }
}

/// Parse a complete source unit
pub fn parse_source_unit(source: &str) -> Result<Vec<StructuralTree>, ParseError> {
    run(source, all_consuming(terminated(source_unit, sp)))
}

/// Parse a single expression
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    run(source, all_consuming(terminated(expression, sp)))
}

/// Parse a statement list; one pair of enclosing braces is accepted
pub fn parse_statements(source: &str) -> Result<Vec<Stmt>, ParseError> {
    if let Ok(stmts) = run(source, all_consuming(terminated(block, sp))) {
        return Ok(stmts);
    }
    run(source, all_consuming(terminated(many0(statement), sp)))
}

/// Parse a single member declaration (`field ...;` or `fn ...`)
pub fn parse_member(source: &str) -> Result<Member, ParseError> {
    run(source, all_consuming(terminated(member, sp)))
}

/// Parse one annotation, `@Name` or `@Name("value")`
pub fn parse_annotation(source: &str) -> Result<Annotation, ParseError> {
    run(source, all_consuming(terminated(ws(annotation), sp)))
}

/// Parse a (possibly dotted) type name
pub fn parse_type_name(source: &str) -> Result<TypeRef, ParseError> {
    run(
        source,
        all_consuming(terminated(map(ws(dotted_name), TypeRef::named), sp)),
    )
}

fn run<'a, O, F>(source: &'a str, mut parser: F) -> Result<O, ParseError>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    match parser(source) {
        Ok((_, output)) => Ok(output),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(error_at(source, e)),
        Err(nom::Err::Incomplete(_)) => Err(ParseError {
            message: "unexpected end of input".to_string(),
            line: source.lines().count().max(1),
            column: 1,
        }),
    }
}

fn error_at(source: &str, error: Error<&str>) -> ParseError {
    let consumed = &source[..source.len() - error.input.len()];
    let line = consumed.matches('\n').count() + 1;
    let column = consumed.rsplit('\n').next().map(|l| l.chars().count()).unwrap_or(0) + 1;
    let near: String = error.input.trim_start().chars().take(20).collect();
    let message = if near.is_empty() {
        format!("unexpected end of input ({:?})", error.code)
    } else {
        format!("unexpected input near '{near}' ({:?})", error.code)
    };
    ParseError {
        message,
        line,
        column,
    }
}

// ---------------------------------------------------------------------------
// Lexical helpers

fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag("//"), not_line_ending))(input)
}

fn block_comment(input: &str) -> IResult<&str, &str> {
    recognize(tuple((tag("/*"), take_until("*/"), tag("*/"))))(input)
}

/// Skip whitespace and comments
fn sp(input: &str) -> IResult<&str, ()> {
    value((), many0(alt((multispace1, line_comment, block_comment))))(input)
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    preceded(sp, inner)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(
        tag(word),
        not(satisfy(|c: char| c.is_alphanumeric() || c == '_')),
    )
}

fn identifier(input: &str) -> IResult<&str, &str> {
    verify(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_")))),
        )),
        |word: &str| !KEYWORDS.contains(&word),
    )(input)
}

fn dotted_name(input: &str) -> IResult<&str, &str> {
    recognize(separated_list1(char('.'), identifier))(input)
}

fn import_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(dotted_name, opt(tag(".*"))))(input)
}

fn exponent(input: &str) -> IResult<&str, &str> {
    recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1)))(input)
}

/// Finite only: an overflowing literal could not be printed back as source
fn float_literal(input: &str) -> IResult<&str, f64> {
    verify(
        map_res(
            alt((
                recognize(tuple((digit1, char('.'), digit1, opt(exponent)))),
                recognize(pair(digit1, exponent)),
            )),
            |text: &str| text.parse::<f64>(),
        ),
        |value: &f64| value.is_finite(),
    )(input)
}

fn int_literal(input: &str) -> IResult<&str, i64> {
    map_res(
        terminated(digit1, not(satisfy(|c: char| c.is_alphabetic() || c == '_'))),
        |text: &str| text.parse::<i64>(),
    )(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
    map(
        delimited(
            char('"'),
            opt(escaped_transform(
                is_not("\\\""),
                '\\',
                alt((
                    value("\\", char('\\')),
                    value("\"", char('"')),
                    value("\n", char('n')),
                    value("\t", char('t')),
                )),
            )),
            char('"'),
        ),
        Option::unwrap_or_default,
    )(input)
}

// ---------------------------------------------------------------------------
// Expressions

fn args(input: &str) -> IResult<&str, Vec<Expr>> {
    delimited(
        char('('),
        separated_list0(ws(char(',')), expression),
        ws(char(')')),
    )(input)
}

fn new_expr(input: &str) -> IResult<&str, Expr> {
    map(
        preceded(keyword("new"), pair(ws(dotted_name), ws(args))),
        |(ty, args)| Expr::New {
            ty: TypeRef::named(ty),
            args,
        },
    )(input)
}

fn call_or_ident(input: &str) -> IResult<&str, Expr> {
    map(pair(identifier, opt(args)), |(name, args)| match args {
        Some(args) => Expr::MethodCall {
            receiver: None,
            method: name.to_string(),
            args,
        },
        None => Expr::Ident(name.to_string()),
    })(input)
}

fn primary(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        map(float_literal, Expr::Float),
        map(int_literal, Expr::Int),
        map(string_literal, Expr::Str),
        value(Expr::Bool(true), keyword("true")),
        value(Expr::Bool(false), keyword("false")),
        value(Expr::Null, keyword("null")),
        value(Expr::This, keyword("this")),
        new_expr,
        call_or_ident,
        delimited(char('('), expression, ws(char(')'))),
    )))(input)
}

fn postfix(input: &str) -> IResult<&str, Expr> {
    let (mut input, mut expr) = primary(input)?;
    loop {
        match preceded(ws(char('.')), pair(ws(identifier), opt(args)))(input) {
            Ok((rest, (name, call_args))) => {
                expr = match call_args {
                    Some(args) => Expr::MethodCall {
                        receiver: Some(Box::new(expr)),
                        method: name.to_string(),
                        args,
                    },
                    None => Expr::FieldAccess {
                        object: Box::new(expr),
                        field: name.to_string(),
                    },
                };
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((input, expr))
}

fn negate(operand: Expr) -> Expr {
    // Fold literals so printed negative constants parse back unchanged
    match operand {
        Expr::Int(value) => Expr::Int(-value),
        Expr::Float(value) => Expr::Float(-value),
        other => Expr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(other),
        },
    }
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('-')), unary), negate),
        map(
            preceded(ws(terminated(char('!'), not(char('=')))), unary),
            |operand| Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            },
        ),
        postfix,
    ))(input)
}

fn fold_binary<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<&'a str, Expr>,
    operator: fn(&'a str) -> IResult<&'a str, BinaryOp>,
) -> IResult<&'a str, Expr> {
    let (input, first) = operand(input)?;
    let (input, rest) = many0(pair(ws(operator), operand))(input)?;
    let folded = rest.into_iter().fold(first, |left, (op, right)| Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    });
    Ok((input, folded))
}

fn term_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Multiply, char('*')),
        value(BinaryOp::Divide, terminated(char('/'), not(one_of("/*")))),
        value(BinaryOp::Modulo, char('%')),
    ))(input)
}

fn additive_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Subtract, char('-')),
    ))(input)
}

fn relation_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::LessEqual, tag("<=")),
        value(BinaryOp::GreaterEqual, tag(">=")),
        value(BinaryOp::LessThan, char('<')),
        value(BinaryOp::GreaterThan, char('>')),
    ))(input)
}

fn equality_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Equal, tag("==")),
        value(BinaryOp::NotEqual, tag("!=")),
    ))(input)
}

fn and_op(input: &str) -> IResult<&str, BinaryOp> {
    value(BinaryOp::And, tag("&&"))(input)
}

fn or_op(input: &str) -> IResult<&str, BinaryOp> {
    value(BinaryOp::Or, tag("||"))(input)
}

fn term(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, unary, term_op)
}

fn additive(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, term, additive_op)
}

fn relation(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, additive, relation_op)
}

fn equality(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, relation, equality_op)
}

fn conjunction(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, equality, and_op)
}

fn expression(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, conjunction, or_op)
}

// ---------------------------------------------------------------------------
// Statements

fn block(input: &str) -> IResult<&str, Vec<Stmt>> {
    delimited(ws(char('{')), many0(statement), ws(char('}')))(input)
}

fn let_stmt(input: &str) -> IResult<&str, Stmt> {
    map(
        tuple((
            keyword("let"),
            ws(identifier),
            opt(preceded(ws(char(':')), ws(dotted_name))),
            ws(char('=')),
            expression,
            ws(char(';')),
        )),
        |(_, name, ty, _, value, _)| Stmt::Let {
            name: name.to_string(),
            ty: ty.map(TypeRef::named),
            value,
        },
    )(input)
}

fn return_stmt(input: &str) -> IResult<&str, Stmt> {
    map(
        tuple((keyword("return"), opt(expression), ws(char(';')))),
        |(_, value, _)| Stmt::Return(value),
    )(input)
}

fn if_stmt(input: &str) -> IResult<&str, Stmt> {
    map(
        tuple((
            keyword("if"),
            ws(char('(')),
            expression,
            ws(char(')')),
            block,
            opt(preceded(
                ws(keyword("else")),
                alt((block, map(ws(if_stmt), |nested| vec![nested]))),
            )),
        )),
        |(_, _, condition, _, then_branch, else_branch)| Stmt::If {
            condition,
            then_branch,
            else_branch,
        },
    )(input)
}

fn while_stmt(input: &str) -> IResult<&str, Stmt> {
    map(
        tuple((
            keyword("while"),
            ws(char('(')),
            expression,
            ws(char(')')),
            block,
        )),
        |(_, _, condition, _, body)| Stmt::While { condition, body },
    )(input)
}

fn assign_op(input: &str) -> IResult<&str, char> {
    ws(terminated(char('='), not(char('='))))(input)
}

fn assign_or_expr_stmt(input: &str) -> IResult<&str, Stmt> {
    let (rest, target) = expression(input)?;
    if let Ok((rest, _)) = assign_op(rest) {
        let target = match target {
            Expr::Ident(name) => LValue::Local(name),
            Expr::FieldAccess { object, field } => LValue::Field {
                object: *object,
                field,
            },
            _ => return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify))),
        };
        let (rest, value) = expression(rest)?;
        let (rest, _) = ws(char(';'))(rest)?;
        return Ok((rest, Stmt::Assign { target, value }));
    }
    let (rest, _) = ws(char(';'))(rest)?;
    Ok((rest, Stmt::Expr(target)))
}

fn statement(input: &str) -> IResult<&str, Stmt> {
    ws(alt((
        let_stmt,
        return_stmt,
        if_stmt,
        while_stmt,
        assign_or_expr_stmt,
    )))(input)
}

// ---------------------------------------------------------------------------
// Declarations

fn annotation(input: &str) -> IResult<&str, Annotation> {
    map(
        preceded(
            char('@'),
            pair(
                dotted_name,
                opt(delimited(ws(char('(')), ws(string_literal), ws(char(')')))),
            ),
        ),
        |(name, value)| Annotation {
            name: name.to_string(),
            value,
        },
    )(input)
}

fn modifiers(input: &str) -> IResult<&str, Modifiers> {
    let (rest, words) = many0(ws(alt((
        keyword("public"),
        keyword("private"),
        keyword("protected"),
        keyword("static"),
    ))))(input)?;

    let mut modifiers = Modifiers::default();
    let mut visibility_seen = false;
    for word in words {
        let visibility = match word {
            "static" => {
                modifiers.is_static = true;
                continue;
            }
            "private" => Visibility::Private,
            "protected" => Visibility::Protected,
            _ => Visibility::Public,
        };
        if visibility_seen {
            return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify)));
        }
        visibility_seen = true;
        modifiers.visibility = visibility;
    }
    Ok((rest, modifiers))
}

fn param(input: &str) -> IResult<&str, Param> {
    map(
        tuple((ws(identifier), ws(char(':')), ws(dotted_name))),
        |(name, _, ty)| Param {
            name: name.to_string(),
            ty: TypeRef::named(ty),
        },
    )(input)
}

fn field_rest(input: &str) -> IResult<&str, (String, TypeRef, Option<Expr>)> {
    map(
        tuple((
            ws(keyword("field")),
            ws(identifier),
            ws(char(':')),
            ws(dotted_name),
            opt(preceded(ws(char('=')), expression)),
            ws(char(';')),
        )),
        |(_, name, _, ty, initializer, _)| (name.to_string(), TypeRef::named(ty), initializer),
    )(input)
}

type MethodParts = (String, Vec<Param>, TypeRef, Option<Vec<Stmt>>);

fn method_rest(input: &str) -> IResult<&str, MethodParts> {
    map(
        tuple((
            ws(keyword("fn")),
            ws(identifier),
            ws(char('(')),
            separated_list0(ws(char(',')), param),
            ws(char(')')),
            opt(preceded(ws(char(':')), ws(dotted_name))),
            alt((map(block, Some), value(None, ws(char(';'))))),
        )),
        |(_, name, _, params, _, return_type, body)| {
            (
                name.to_string(),
                params,
                return_type.map(TypeRef::named).unwrap_or_else(TypeRef::void),
                body,
            )
        },
    )(input)
}

fn member(input: &str) -> IResult<&str, Member> {
    let (input, annotations) = many0(ws(annotation))(input)?;
    let (input, modifiers) = modifiers(input)?;
    if let Ok((rest, (name, ty, initializer))) = field_rest(input) {
        return Ok((
            rest,
            Member::Field(FieldDecl {
                name,
                ty,
                modifiers,
                annotations,
                initializer,
            }),
        ));
    }
    let (rest, (name, params, return_type, body)) = method_rest(input)?;
    Ok((
        rest,
        Member::Method(MethodDecl {
            name,
            params,
            return_type,
            modifiers,
            annotations,
            body,
        }),
    ))
}

fn class_decl(input: &str) -> IResult<&str, StructuralTree> {
    let (input, annotations) = many0(ws(annotation))(input)?;
    let (input, _class_modifiers) = modifiers(input)?;
    let (input, _) = ws(keyword("class"))(input)?;
    let (input, name) = ws(identifier)(input)?;
    let (input, superclass) = opt(preceded(ws(keyword("extends")), ws(dotted_name)))(input)?;
    let (input, members) = delimited(ws(char('{')), many0(member), ws(char('}')))(input)?;

    let mut tree = StructuralTree::new("", name);
    tree.annotations = annotations;
    tree.superclass = superclass.map(TypeRef::named);
    for member in members {
        tree.push_member(member);
    }
    Ok((input, tree))
}

fn source_unit(input: &str) -> IResult<&str, Vec<StructuralTree>> {
    let (input, package) = opt(delimited(
        ws(keyword("package")),
        ws(dotted_name),
        ws(char(';')),
    ))(input)?;
    let (input, imports) = many0(delimited(
        ws(keyword("import")),
        ws(import_name),
        ws(char(';')),
    ))(input)?;
    let (input, mut classes) = many1(class_decl)(input)?;

    for class in &mut classes {
        class.package = package.unwrap_or_default().to_string();
        class.imports = imports.iter().map(|i| i.to_string()).collect();
    }
    Ok((input, classes))
}

use std::fmt;

use chumsky::{input::ValueInput, pratt::*, prelude::*};
use parse_display::Display;

use super::TemplateError;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnaryOp {
    #[display("!")]
    Not,
    #[display("-")]
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BinaryOp {
    #[display("+")]
    Add,
    #[display("-")]
    Sub,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Rem,
    #[display("==")]
    Eq,
    #[display("!=")]
    Ne,
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
    #[display("&&")]
    And,
    #[display("||")]
    Or,
}

/// Expression inside a template tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    List(Vec<Expr>),
    Var(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Method {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    /// A call without receiver: a builtin, a component helper, or a zero-argument accessor.
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }
}

/// Statement tag: the code of a `<% ... %>` tag.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Statement {
    If(Expr),
    Elsif(Expr),
    Else,
    End,
    For {
        item: String,
        second: Option<String>,
        iterable: Expr,
    },
    Let {
        name: String,
        expr: Expr,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token<'code> {
    Ident(&'code str),
    Int(i64),
    Float(f64),
    Str(String),
    Nil,
    True,
    False,
    And,
    Or,
    Not,
    In,
    EqEq,
    NotEq,
    LessOrEqual,
    GreaterOrEqual,
    Less,
    Greater,
    AmpAmp,
    PipePipe,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    Bang,
    Assign,
    Question,
    Colon,
    Comma,
    Dot,
    BracketRoundOpen,
    BracketRoundClose,
    BracketSquareOpen,
    BracketSquareClose,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Token::Ident(name) => return write!(f, "`{name}`"),
            Token::Int(i) => return write!(f, "`{i}`"),
            Token::Float(x) => return write!(f, "`{x}`"),
            Token::Str(s) => return write!(f, "{s:?}"),
            Token::Nil => "nil",
            Token::True => "true",
            Token::False => "false",
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::In => "in",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::LessOrEqual => "<=",
            Token::GreaterOrEqual => ">=",
            Token::Less => "<",
            Token::Greater => ">",
            Token::AmpAmp => "&&",
            Token::PipePipe => "||",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Asterisk => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Bang => "!",
            Token::Assign => "=",
            Token::Question => "?",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::BracketRoundOpen => "(",
            Token::BracketRoundClose => ")",
            Token::BracketSquareOpen => "[",
            Token::BracketSquareClose => "]",
        };
        write!(f, "`{s}`")
    }
}

type Spanned<'code> = (Token<'code>, SimpleSpan);
type Extra<'code> = extra::Err<Rich<'code, Token<'code>>>;

fn quoted<'code>(
    quote: char,
) -> impl Parser<'code, &'code str, String, extra::Err<Rich<'code, char>>> + Clone {
    let escape = just('\\').ignore_then(any().map(|c| match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    }));
    just(quote)
        .ignore_then(
            escape
                .or(none_of([quote, '\\']))
                .repeated()
                .collect::<String>(),
        )
        .then_ignore(just(quote))
}

pub(crate) fn lexer<'code>(
) -> impl Parser<'code, &'code str, Vec<Spanned<'code>>, extra::Err<Rich<'code, char>>> {
    let number = text::int(10)
        .then(just('.').then(text::digits(10)).or_not())
        .to_slice()
        .try_map(|digits: &str, span| {
            if digits.contains('.') {
                digits
                    .parse()
                    .map(Token::Float)
                    .map_err(|_| Rich::custom(span, "invalid number"))
            } else {
                digits
                    .parse()
                    .map(Token::Int)
                    .map_err(|_| Rich::custom(span, "integer out of range"))
            }
        });

    let word = text::ascii::ident().map(|word: &str| match word {
        "nil" => Token::Nil,
        "true" => Token::True,
        "false" => Token::False,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "in" => Token::In,
        _ => Token::Ident(word),
    });

    let comparator = choice((
        just("==").to(Token::EqEq),
        just("!=").to(Token::NotEq),
        just("<=").to(Token::LessOrEqual),
        just(">=").to(Token::GreaterOrEqual),
        just('<').to(Token::Less),
        just('>').to(Token::Greater),
        just("&&").to(Token::AmpAmp),
        just("||").to(Token::PipePipe),
    ));

    let operator = choice((
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Asterisk),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
        just('!').to(Token::Bang),
        just('=').to(Token::Assign),
        just('?').to(Token::Question),
        just(':').to(Token::Colon),
        just(',').to(Token::Comma),
        just('.').to(Token::Dot),
    ));

    let bracket = choice((
        just('(').to(Token::BracketRoundOpen),
        just(')').to(Token::BracketRoundClose),
        just('[').to(Token::BracketSquareOpen),
        just(']').to(Token::BracketSquareClose),
    ));

    let string = quoted('"').or(quoted('\'')).map(Token::Str);

    choice((number, word, string, comparator, operator, bracket))
        .map_with(|token, extra| (token, extra.span()))
        .padded()
        .repeated()
        .collect()
        .then_ignore(end())
}

/// `.name`, `.name(args)` or `[index]` following an operand.
#[derive(Debug, Clone)]
enum Suffix {
    Member(String, Option<Vec<Expr>>),
    Index(Expr),
}

impl Suffix {
    fn apply(self, receiver: Expr) -> Expr {
        match self {
            Suffix::Member(name, None) => Expr::Field(Box::new(receiver), name),
            Suffix::Member(name, Some(args)) => Expr::Method {
                receiver: Box::new(receiver),
                name,
                args,
            },
            Suffix::Index(index) => Expr::Index(Box::new(receiver), Box::new(index)),
        }
    }
}

pub(crate) fn expression<'code, I>() -> impl Parser<'code, I, Expr, Extra<'code>> + Clone
where
    I: ValueInput<'code, Token = Token<'code>, Span = SimpleSpan>,
{
    recursive(|expression| {
        let name = select! { Token::Ident(name) => name.to_string() };

        let args = expression
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(
                just(Token::BracketRoundOpen),
                just(Token::BracketRoundClose),
            );

        let literal = select! {
            Token::Nil => Literal::Nil,
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
            Token::Int(i) => Literal::Int(i),
            Token::Float(x) => Literal::Float(x),
            Token::Str(s) => Literal::Str(s),
        }
        .map(Expr::Literal);

        let call_or_var = name
            .clone()
            .then(args.clone().or_not())
            .map(|(name, args)| match args {
                Some(args) => Expr::Call { name, args },
                None => Expr::Var(name),
            });

        let list = expression
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(
                just(Token::BracketSquareOpen),
                just(Token::BracketSquareClose),
            )
            .map(Expr::List);

        let nested = expression.clone().delimited_by(
            just(Token::BracketRoundOpen),
            just(Token::BracketRoundClose),
        );

        let suffix = choice((
            just(Token::Dot)
                .ignore_then(name)
                .then(args.or_not())
                .map(|(name, args)| Suffix::Member(name, args)),
            expression
                .clone()
                .delimited_by(
                    just(Token::BracketSquareOpen),
                    just(Token::BracketSquareClose),
                )
                .map(Suffix::Index),
        ));

        let operand = choice((literal, call_or_var, list, nested)).pratt((
            postfix(9, suffix, |lhs, suffix: Suffix, _| suffix.apply(lhs)),
            prefix(
                8,
                select! {
                    Token::Bang => UnaryOp::Not,
                    Token::Not => UnaryOp::Not,
                    Token::Minus => UnaryOp::Neg,
                },
                |op, rhs, _| Expr::Unary(op, Box::new(rhs)),
            ),
            infix(
                left(6),
                select! {
                    Token::Asterisk => BinaryOp::Mul,
                    Token::Slash => BinaryOp::Div,
                    Token::Percent => BinaryOp::Rem,
                },
                |l, op, r, _| Expr::binary(op, l, r),
            ),
            infix(
                left(5),
                select! {
                    Token::Plus => BinaryOp::Add,
                    Token::Minus => BinaryOp::Sub,
                },
                |l, op, r, _| Expr::binary(op, l, r),
            ),
            infix(
                left(4),
                select! {
                    Token::LessOrEqual => BinaryOp::Le,
                    Token::GreaterOrEqual => BinaryOp::Ge,
                    Token::Less => BinaryOp::Lt,
                    Token::Greater => BinaryOp::Gt,
                },
                |l, op, r, _| Expr::binary(op, l, r),
            ),
            infix(
                left(3),
                select! {
                    Token::EqEq => BinaryOp::Eq,
                    Token::NotEq => BinaryOp::Ne,
                },
                |l, op, r, _| Expr::binary(op, l, r),
            ),
            infix(
                left(2),
                select! {
                    Token::AmpAmp => BinaryOp::And,
                    Token::And => BinaryOp::And,
                },
                |l, op, r, _| Expr::binary(op, l, r),
            ),
            infix(
                left(1),
                select! {
                    Token::PipePipe => BinaryOp::Or,
                    Token::Or => BinaryOp::Or,
                },
                |l, op, r, _| Expr::binary(op, l, r),
            ),
        ));

        // `c ? a : b` nests to the right through `expression`.
        let branches = just(Token::Question)
            .ignore_then(expression.clone())
            .then_ignore(just(Token::Colon))
            .then(expression);

        operand
            .then(branches.or_not())
            .map(|(cond, branches)| match branches {
                Some((then, otherwise)) => Expr::Conditional {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                },
                None => cond,
            })
    })
}

fn keyword<'code, I>(word: &'static str) -> impl Parser<'code, I, Token<'code>, Extra<'code>> + Clone
where
    I: ValueInput<'code, Token = Token<'code>, Span = SimpleSpan>,
{
    just(Token::Ident(word))
}

pub(crate) fn statement<'code, I>() -> impl Parser<'code, I, Statement, Extra<'code>>
where
    I: ValueInput<'code, Token = Token<'code>, Span = SimpleSpan>,
{
    let name = select! { Token::Ident(name) => name.to_string() };
    let expr = expression();

    let for_loop = keyword("for")
        .ignore_then(name.clone())
        .then(just(Token::Comma).ignore_then(name.clone()).or_not())
        .then_ignore(just(Token::In))
        .then(expr.clone())
        .map(|((item, second), iterable)| Statement::For {
            item,
            second,
            iterable,
        });

    let binding = keyword("let")
        .ignore_then(name)
        .then_ignore(just(Token::Assign))
        .then(expr.clone())
        .map(|(name, expr)| Statement::Let { name, expr });

    choice((
        keyword("if").ignore_then(expr.clone()).map(Statement::If),
        keyword("elsif").ignore_then(expr).map(Statement::Elsif),
        keyword("else").to(Statement::Else),
        keyword("end").to(Statement::End),
        for_loop,
        binding,
    ))
}

fn located<'a, T: fmt::Display + 'a>(
    errors: Vec<Rich<'a, T>>,
    source: &str,
    base: usize,
) -> TemplateError {
    match errors.into_iter().next() {
        Some(error) => TemplateError::at(
            source,
            base + error.span().into_range().start,
            error.reason().to_string(),
        ),
        None => TemplateError::at(source, base, "invalid tag"),
    }
}

fn tokenize<'code>(
    code: &'code str,
    source: &str,
    base: usize,
) -> Result<Vec<Spanned<'code>>, TemplateError> {
    lexer()
        .parse(code)
        .into_result()
        .map_err(|errors| located(errors, source, base))
}

/// Parses the code of an output tag. `base` is the offset of `code` in `source`.
pub(crate) fn parse_expr(code: &str, source: &str, base: usize) -> Result<Expr, TemplateError> {
    let tokens = tokenize(code, source, base)?;
    let eoi = SimpleSpan::from(code.len()..code.len());
    let result = expression()
        .then_ignore(end())
        .parse(tokens.as_slice().map(eoi, |(t, s)| (t, s)))
        .into_result()
        .map_err(|errors| located(errors, source, base));
    result
}

/// Parses the code of a statement tag. `base` is the offset of `code` in `source`.
pub(crate) fn parse_statement(
    code: &str,
    source: &str,
    base: usize,
) -> Result<Statement, TemplateError> {
    let tokens = tokenize(code, source, base)?;
    let eoi = SimpleSpan::from(code.len()..code.len());
    let result = statement()
        .then_ignore(end())
        .parse(tokens.as_slice().map(eoi, |(t, s)| (t, s)))
        .into_result()
        .map_err(|errors| located(errors, source, base));
    result
}

// Parser for kernel description files.
//
// Parses a token stream (from the lexer) into an AST using chumsky
// combinators. Grammar:
//
//   kernel    = item*
//   item      = loop_decl | expr_decl
//   loop_decl = 'loop' NUMBER 'work_amount' '=' dim '{' loop_port* '}'
//   loop_port = ('entry' | 'exit') VALUE '.' ('in' | 'out') '[' NUMBER ']'
//               'dim' NUMBER 'fixed'?
//   expr_decl = (VALUE '=')? IDENT '(' operand,* ')' (':' tensor)?
//               ('loops' '[' NUMBER,* ']')?
//   operand   = VALUE (':' tensor)?
//   tensor    = IDENT '[' dim,* ']' ('layout' '[' NUMBER,* ']')?
//   dim       = NUMBER | '?'
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub kernel: Option<Kernel>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a kernel source string. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = kernel_parser(source);
    let (kernel, parse_errors) = parser.parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        kernel,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All rules are built inside `kernel_parser` so that the `source` reference is
// captured once and shared by all combinators.

fn kernel_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Kernel, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Leaves ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    let value = select! {
        Token::Value(name) = e => ValueRef { name, span: e.span() },
    };

    let number = select! {
        Token::Number(n) => n,
    };

    let spanned_number = select! {
        Token::Number(n) = e => (n, e.span()),
    };

    let dim = select! {
        Token::Number(n) = e => DimLit::Known(n, e.span()),
        Token::Question = e => DimLit::Dynamic(e.span()),
    };

    // ── Tensor type ──

    let layout = just(Token::Layout)
        .ignore_then(
            number
                .clone()
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBracket), just(Token::RBracket)),
        )
        .map_with(|axes, e| (axes, e.span()));

    let tensor = ident
        .clone()
        .then(
            dim.clone()
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBracket), just(Token::RBracket)),
        )
        .then(layout.or_not())
        .map_with(|((elem, shape), layout), e| {
            let (layout, layout_span) = match layout {
                Some((axes, span)) => (Some(axes), Some(span)),
                None => (None, None),
            };
            TensorDecl {
                elem,
                shape,
                layout,
                layout_span,
                span: e.span(),
            }
        });

    // ── Loop declaration ──

    let port_kind = select! {
        Token::Entry => LoopPortKind::Entry,
        Token::Exit => LoopPortKind::Exit,
    };

    let port_dir = select! {
        Token::In => PortDir::In,
        Token::Out => PortDir::Out,
    };

    let loop_port = port_kind
        .then(value.clone())
        .then_ignore(just(Token::Dot))
        .then(port_dir)
        .then(number.delimited_by(just(Token::LBracket), just(Token::RBracket)))
        .then_ignore(just(Token::Dim))
        .then(spanned_number.clone())
        .then(just(Token::Fixed).or_not().map(|f| f.is_some()))
        .map_with(
            |(((((kind, value), dir), index), (dim, dim_span)), fixed), e| LoopPortDecl {
                kind,
                value,
                dir,
                index,
                dim,
                dim_span,
                fixed,
                span: e.span(),
            },
        );

    let loop_decl = just(Token::Loop)
        .ignore_then(spanned_number.clone())
        .then_ignore(just(Token::WorkAmount))
        .then_ignore(just(Token::Equals))
        .then(dim)
        .then(
            loop_port
                .repeated()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|(((id, id_span), work_amount), ports), e| LoopDecl {
            id,
            id_span,
            work_amount,
            ports,
            span: e.span(),
        });

    // ── Expression ──

    let operand = value
        .clone()
        .then(just(Token::Colon).ignore_then(tensor.clone()).or_not())
        .map_with(|(value, ty), e| Operand {
            value,
            ty,
            span: e.span(),
        });

    let loops_clause = just(Token::Loops)
        .ignore_then(
            spanned_number
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBracket), just(Token::RBracket)),
        )
        .or_not()
        .map(Option::unwrap_or_default);

    let expr_decl = value
        .then_ignore(just(Token::Equals))
        .or_not()
        .then(ident)
        .then(
            operand
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then(just(Token::Colon).ignore_then(tensor).or_not())
        .then(loops_clause)
        .map_with(|((((result, op), operands), output), loops), e| ExprDecl {
            result,
            op,
            operands,
            output,
            loops,
            span: e.span(),
        });

    // ── Kernel ──

    choice((loop_decl.map(Item::Loop), expr_decl.map(Item::Expr)))
        .repeated()
        .collect::<Vec<_>>()
        .map_with(|items, e| Kernel {
            items,
            span: e.span(),
        })
}

// ── Tests ──

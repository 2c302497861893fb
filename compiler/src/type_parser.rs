// Parser for port type strings.
//
// Parses a token stream (from `type_lexer`) into a `RawType` per the grammar
//   type       := ["internal"] world "<" domain ">" annotation*
//   annotation := "@" ident "(" ident ")"
// Uses chumsky combinators. Name validation (which worlds and domains
// exist) happens in `types::TypeDesc::parse`, not here.
//
// Preconditions: none.
// Postconditions: returns a `RawType` or the list of rendered syntax errors.
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::type_lexer::TypeToken;

/// Syntactic shape of a type string, before name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawType {
    pub internal: bool,
    pub world: String,
    pub domain: String,
    pub annotations: Vec<(String, String)>,
}

/// Parse a type string. Lexes then parses; lex and parse errors are merged.
pub fn parse(source: &str) -> Result<RawType, Vec<String>> {
    let lex_result = crate::type_lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = type_parser(source);
    let (raw, parse_errors) = parser.parse(stream).into_output_errors();

    let mut errors: Vec<String> = lex_result
        .errors
        .into_iter()
        .map(|e| format!("{} at {}..{}", e.message, e.span.start, e.span.end))
        .collect();
    errors.extend(parse_errors.into_iter().map(|e| e.to_string()));

    match raw {
        Some(raw) if errors.is_empty() => Ok(raw),
        _ => {
            if errors.is_empty() {
                errors.push("empty type".to_string());
            }
            Err(errors)
        }
    }
}

fn type_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, RawType, extra::Err<Rich<'tokens, TypeToken, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = TypeToken, Span = SimpleSpan>,
{
    let ident = just(TypeToken::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        source[span.start()..span.end()].to_string()
    });

    let annotation = just(TypeToken::At).ignore_then(ident.clone()).then(
        ident
            .clone()
            .delimited_by(just(TypeToken::LParen), just(TypeToken::RParen)),
    );

    just(TypeToken::Internal)
        .or_not()
        .then(ident.clone())
        .then(
            ident
                .clone()
                .delimited_by(just(TypeToken::Lt), just(TypeToken::Gt)),
        )
        .then(annotation.repeated().collect::<Vec<_>>())
        .then_ignore(end())
        .map(|(((internal, world), domain), annotations)| RawType {
            internal: internal.is_some(),
            world,
            domain,
            annotations,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_world_and_domain() {
        let raw = parse("Signal<float>").unwrap();
        assert_eq!(
            raw,
            RawType {
                internal: false,
                world: "Signal".into(),
                domain: "float".into(),
                annotations: vec![],
            }
        );
    }

    #[test]
    fn parses_internal_and_annotations() {
        let raw = parse("internal Field<vec2> @unit(px) @semantics(position)").unwrap();
        assert!(raw.internal);
        assert_eq!(raw.world, "Field");
        assert_eq!(raw.domain, "vec2");
        assert_eq!(
            raw.annotations,
            vec![
                ("unit".to_string(), "px".to_string()),
                ("semantics".to_string(), "position".to_string())
            ]
        );
    }

    #[test]
    fn missing_closing_bracket_is_error() {
        assert!(parse("Signal<float").is_err());
    }

    #[test]
    fn trailing_garbage_is_error() {
        assert!(parse("Signal<float> float").is_err());
    }

    #[test]
    fn empty_string_is_error() {
        assert!(parse("").is_err());
    }

    #[test]
    fn lex_error_is_reported() {
        let errs = parse("Signal<float>#").unwrap_err();
        assert!(errs[0].contains("unexpected character"));
    }
}

/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while_m_n},
    character::complete::{char, none_of},
    combinator::{all_consuming, map_opt, not, value, verify},
    multi::fold_many0,
    sequence::{delimited, preceded},
    IResult,
};
use once_cell::sync::Lazy;
use regex::Regex;
use shared::dictionary;
use shared::terms::{Literal, Term};

use crate::error::{Error, Result};

static DATATYPE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\^\^<([^\^"'>]+)>$"#).expect("valid regex"));
static LANG_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@(\w+(?:-\w+)*)$").expect("valid regex"));

/// Parses the canonical notation of a term back into a [`Term`].
///
/// Accepts `<iri>`, `_:id` and a single quoted string (`"..."`, `'...'`,
/// `"""..."""` or `'''...'''`) optionally followed by `^^<datatype>` and/or `@lang`.
/// Anything else, including expressions and bare words, is rejected.
pub fn parse_term(text: &str) -> Result<Term> {
    if let Some(rest) = text.strip_prefix('<') {
        let iri = rest
            .strip_suffix('>')
            .ok_or_else(|| Error::Notation(format!("IRI is not closed by '>': {}", text)))?;
        if iri.contains(['<', '>']) {
            return Err(Error::Notation(format!("IRI contains '<' or '>': {}", text)));
        }
        return Ok(Term::Resource(iri.to_string()));
    }

    if let Some(id) = text.strip_prefix("_:") {
        if id.chars().any(char::is_whitespace) {
            return Err(Error::Notation(format!("invalid blank node label: {}", text)));
        }
        return Ok(Term::Anonymous(id.to_string()));
    }

    let (body, datatype, lang) = split_suffixes(text);
    let (_, value) = all_consuming(string_literal)(body)
        .map_err(|_| Error::Notation(format!("not a single quoted string: {}", text)))?;

    Ok(Term::Literal(Literal::new(
        value,
        dictionary::intern(datatype),
        lang.map(str::to_string),
    )))
}

/// Strips the datatype and language suffixes, accepting them in either order.
fn split_suffixes(text: &str) -> (&str, Option<&str>, Option<&str>) {
    let mut body = text;
    let mut datatype = None;
    let mut lang = None;

    if let Some((rest, found)) = strip_suffix(&DATATYPE_SUFFIX, body) {
        body = rest;
        datatype = Some(found);
    }
    if let Some((rest, found)) = strip_suffix(&LANG_SUFFIX, body) {
        body = rest;
        lang = Some(found);
    }
    if datatype.is_none() {
        if let Some((rest, found)) = strip_suffix(&DATATYPE_SUFFIX, body) {
            body = rest;
            datatype = Some(found);
        }
    }
    (body, datatype, lang)
}

fn strip_suffix<'t>(pattern: &Regex, text: &'t str) -> Option<(&'t str, &'t str)> {
    let captures = pattern.captures(text)?;
    let whole = captures.get(0)?;
    let group = captures.get(1)?;
    Some((&text[..whole.start()], group.as_str()))
}

fn string_literal(input: &str) -> IResult<&str, String> {
    alt((
        quoted("\"\"\"", true),
        quoted("'''", true),
        quoted("\"", false),
        quoted("'", false),
    ))(input)
}

// Long forms may span lines, short forms may not.
fn quoted<'a>(delimiter: &'static str, multiline: bool) -> impl FnMut(&'a str) -> IResult<&'a str, String> {
    move |input| {
        delimited(
            tag(delimiter),
            fold_many0(
                alt((escape_sequence, plain_char(delimiter, multiline))),
                String::new,
                |mut value, c| {
                    value.push(c);
                    value
                },
            ),
            tag(delimiter),
        )(input)
    }
}

fn plain_char<'a>(delimiter: &'static str, multiline: bool) -> impl FnMut(&'a str) -> IResult<&'a str, char> {
    move |input| {
        let (input, _) = not(tag(delimiter))(input)?;
        verify(none_of("\\"), |c: &char| multiline || (*c != '\n' && *c != '\r'))(input)
    }
}

fn escape_sequence(input: &str) -> IResult<&str, char> {
    preceded(
        char('\\'),
        alt((
            value('\t', char('t')),
            value('\n', char('n')),
            value('\r', char('r')),
            value('\u{08}', char('b')),
            value('\u{0C}', char('f')),
            value('"', char('"')),
            value('\'', char('\'')),
            value('\\', char('\\')),
            preceded(char('u'), hex_char(4)),
            preceded(char('U'), hex_char(8)),
        )),
    )(input)
}

fn hex_char<'a>(digits: usize) -> impl FnMut(&'a str) -> IResult<&'a str, char> {
    map_opt(
        take_while_m_n(digits, digits, |c: char| c.is_ascii_hexdigit()),
        |hex: &str| u32::from_str_radix(hex, 16).ok().and_then(char::from_u32),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::dictionary::Datatype;
    use shared::xsd::{XSD_DECIMAL, XSD_STRING};

    fn literal(text: &str) -> Literal {
        match parse_term(text).unwrap() {
            Term::Literal(literal) => literal,
            other => panic!("expected a literal, got {:?}", other),
        }
    }

    #[test]
    fn test_iri() {
        assert_eq!(parse_term("<http://example.org/a>").unwrap(), Term::resource("http://example.org/a"));
        assert_eq!(parse_term("<>").unwrap(), Term::resource(""));
    }

    #[test]
    fn test_malformed_iri() {
        for text in ["<", "<http://a", "<http://a>>", "<<http://a>", "<http://<a>"] {
            assert!(matches!(parse_term(text), Err(Error::Notation(_))), "accepted {:?}", text);
        }
    }

    #[test]
    fn test_quoting_forms() {
        assert_eq!(literal("\"hello\"").value(), "hello");
        assert_eq!(literal("'hello'").value(), "hello");
        assert_eq!(literal("\"\"\"multi\nline \"quoted\" text\"\"\"").value(), "multi\nline \"quoted\" text");
        assert_eq!(literal("'''it's'''").value(), "it's");
        assert_eq!(literal("\"\"").value(), "");
        assert_eq!(literal("\"\"\"\"\"\"").value(), "");
    }

    #[test]
    fn test_escapes() {
        assert_eq!(literal(r#""a\tb\nc\rd\\e\"f\'g""#).value(), "a\tb\nc\rd\\e\"f'g");
        assert_eq!(literal(r#""\u00e1b\u0161""#).value(), "ábš");
        assert_eq!(literal(r#""\U0001f600""#).value(), "\u{1F600}");
        assert_eq!(literal(r#""\b\f""#).value(), "\u{08}\u{0C}");
    }

    #[test]
    fn test_suffixes() {
        let typed = literal(&format!("\"1.5\"^^<{}>", XSD_DECIMAL));
        assert_eq!(typed.datatype().map(Datatype::as_str), Some(XSD_DECIMAL));
        assert_eq!(typed.lang(), None);

        let tagged = literal("'bonjour'@fr");
        assert_eq!(tagged.lang(), Some("fr"));
        assert_eq!(tagged.datatype(), None);

        let both = literal("\"1234\"^^<special_type>@en-gb");
        assert_eq!(both.datatype().map(Datatype::as_str), Some("special_type"));
        assert_eq!(both.lang(), Some("en-gb"));

        let reversed = literal("\"1234\"@en^^<special_type>");
        assert_eq!(reversed.datatype().map(Datatype::as_str), Some("special_type"));
        assert_eq!(reversed.lang(), Some("en"));
    }

    #[test]
    fn test_unicode_language_tag() {
        let tagged = literal("\"Германия\"@русский");
        assert_eq!(tagged.value(), "Германия");
        assert_eq!(tagged.lang(), Some("русский"));

        let term = Term::from(Literal::language_tagged("x", "ελ-gr"));
        assert_eq!(parse_term(&term.to_notation()).unwrap(), term);
    }

    #[test]
    fn test_rejects_anything_but_one_string() {
        for text in [
            "hello",
            "\"hello\" + \" world\"",
            "\"hello\"\nx = \" world\"",
            "\"unterminated",
            "\"short\nform\"",
            "'mixed\"",
            "\"bad escape \\q\"",
            "\"\\u12\"",
            "42",
            "\"a\" \"b\"",
            "\"\"\"",
            "",
        ] {
            assert!(matches!(parse_term(text), Err(Error::Notation(_))), "accepted {:?}", text);
        }
    }

    #[test]
    fn test_round_trip() {
        let terms = vec![
            Term::resource("http://example.org/ábš"),
            Term::resource(""),
            Term::anonymous("b0"),
            Term::from(Literal::simple("")),
            Term::from(Literal::simple("\x01-\t-\n-\r-\"-'-\\-\x7f-Германия-\u{1F600}")),
            Term::from(Literal::typed("30", XSD_DECIMAL)),
            Term::from(Literal::typed("x", XSD_STRING)),
            Term::from(Literal::language_tagged("colour", "en-gb")),
            Term::from(Literal::new("1234", Some(Datatype::from("special_type")), Some("en".to_string()))),
        ];
        for term in terms {
            assert_eq!(parse_term(&term.to_notation()).unwrap(), term, "notation {}", term.to_notation());
        }
    }

    #[test]
    fn test_parsed_datatype_is_interned() {
        let first = literal(&format!("\"1\"^^<{}>", XSD_DECIMAL));
        let second = literal(&format!("\"2\"^^<{}>", XSD_DECIMAL));
        assert!(Datatype::ptr_eq(first.datatype().unwrap(), second.datatype().unwrap()));
    }
}

/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dictionary::Datatype;

/// An RDF term as it appears in a query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    /// A resource named by its IRI.
    Resource(String),
    Literal(Literal),
    /// A blank node. The identifier is only meaningful inside one document.
    Anonymous(String),
}

/// A literal value. `value` is always the lexical form.
///
/// Datatype and language tag are independent: either, both or neither may be set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Literal {
    value: String,
    datatype: Option<Datatype>,
    lang: Option<String>,
}

impl Literal {
    pub fn new(value: impl Into<String>, datatype: Option<Datatype>, lang: Option<String>) -> Self {
        Literal {
            value: value.into(),
            datatype,
            lang,
        }
    }

    pub fn simple(value: impl Into<String>) -> Self {
        Literal::new(value, None, None)
    }

    pub fn typed(value: impl Into<String>, datatype: impl Into<Datatype>) -> Self {
        Literal::new(value, Some(datatype.into()), None)
    }

    pub fn language_tagged(value: impl Into<String>, lang: impl Into<String>) -> Self {
        Literal::new(value, None, Some(lang.into()))
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn datatype(&self) -> Option<&Datatype> {
        self.datatype.as_ref()
    }

    pub fn lang(&self) -> Option<&str> {
        self.lang.as_deref()
    }

    /// Renders the literal as `"escaped"`, then `^^<datatype>`, then `@lang`.
    pub fn to_notation(&self) -> String {
        let mut notation = quote(&self.value);
        if let Some(datatype) = &self.datatype {
            notation.push_str("^^<");
            notation.push_str(datatype);
            notation.push('>');
        }
        if let Some(lang) = &self.lang {
            notation.push('@');
            notation.push_str(lang);
        }
        notation
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl Term {
    pub fn resource(value: impl Into<String>) -> Self {
        Term::Resource(value.into())
    }

    pub fn anonymous(value: impl Into<String>) -> Self {
        Term::Anonymous(value.into())
    }

    /// The IRI, lexical form or blank node identifier.
    pub fn value(&self) -> &str {
        match self {
            Term::Resource(value) | Term::Anonymous(value) => value,
            Term::Literal(literal) => literal.value(),
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Term::Literal(literal) => Some(literal),
            _ => None,
        }
    }

    /// Canonical notation: `<iri>`, `_:id` or a quoted literal.
    pub fn to_notation(&self) -> String {
        match self {
            Term::Resource(value) => format!("<{}>", value),
            Term::Anonymous(value) => format!("_:{}", value),
            Term::Literal(literal) => literal.to_notation(),
        }
    }
}

impl From<Literal> for Term {
    fn from(literal: Literal) -> Self {
        Term::Literal(literal)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// Wraps `text` in double quotes, escaping everything outside printable ASCII
/// plus `"` and `\` the way N-Triples does.
pub fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '\t' => quoted.push_str("\\t"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            ' '..='~' => quoted.push(c),
            c if (c as u32) < 0x10000 => quoted.push_str(&format!("\\u{:04x}", c as u32)),
            c => quoted.push_str(&format!("\\U{:08x}", c as u32)),
        }
    }
    quoted.push('"');
    quoted
}

/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use num_bigint::BigInt;
use once_cell::sync::Lazy;
use shared::terms::Term;
use shared::xsd::*;

use crate::error::{Error, Result};
use crate::markup::{MarkupSource, XmlEventSource};
use crate::result_set::{ParseState, RawResultSet, Row, Rows};
use crate::temporal::{self, Timestamp};

/// A literal converted to a native value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// IRIs, blank node identifiers and literals without a known conversion.
    String(String),
    Integer(BigInt),
    Float(f64),
    Decimal(BigDecimal),
    Boolean(bool),
    DateTime(DateTime<FixedOffset>),
    LocalDateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl From<Timestamp> for Value {
    fn from(timestamp: Timestamp) -> Self {
        match timestamp {
            Timestamp::Zoned(dt) => Value::DateTime(dt),
            Timestamp::Local(ndt) => Value::LocalDateTime(ndt),
        }
    }
}

pub type TypedRow = Vec<Option<Value>>;

/// Conversion applied to the lexical form of literals of one datatype.
#[derive(Clone)]
pub struct Converter(Arc<dyn Fn(&str) -> Result<Value> + Send + Sync>);

impl Converter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> Result<Value> + Send + Sync + 'static,
    {
        Converter(Arc::new(f))
    }

    pub fn call(&self, value: &str) -> Result<Value> {
        (self.0)(value)
    }
}

impl Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Converter(<function>)")
    }
}

/// Conversion for literals whose datatype has no entry in the table. Receives
/// the lexical value and the datatype.
#[derive(Clone)]
pub struct Fallback(Arc<dyn Fn(&str, &str) -> Result<Value> + Send + Sync>);

impl Fallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, &str) -> Result<Value> + Send + Sync + 'static,
    {
        Fallback(Arc::new(f))
    }

    pub fn call(&self, value: &str, datatype: &str) -> Result<Value> {
        (self.0)(value, datatype)
    }
}

impl Debug for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fallback(<function>)")
    }
}

pub type TypeTable = HashMap<String, Converter>;

static BASIC_TYPES: Lazy<TypeTable> = Lazy::new(|| {
    let mut table = TypeTable::new();
    table.insert(XSD_INT.to_string(), integer(XSD_INT));
    table.insert(XSD_LONG.to_string(), integer(XSD_LONG));
    table.insert(XSD_DOUBLE.to_string(), float(XSD_DOUBLE));
    table.insert(XSD_FLOAT.to_string(), float(XSD_FLOAT));
    table.insert(XSD_INTEGER.to_string(), decimal(XSD_INTEGER));
    table.insert(XSD_DECIMAL.to_string(), decimal(XSD_DECIMAL));
    table.insert(
        XSD_BOOLEAN.to_string(),
        Converter::new(|v| Ok(Value::Boolean(matches!(v.to_lowercase().as_str(), "true" | "1")))),
    );
    table.insert(
        XSD_DATETIME.to_string(),
        Converter::new(|v| {
            temporal::parse_datetime(v)
                .map(Value::from)
                .map_err(|e| Error::conversion(v, XSD_DATETIME, e))
        }),
    );
    table.insert(
        XSD_DATE.to_string(),
        Converter::new(|v| {
            temporal::parse_date(v)
                .map(Value::Date)
                .map_err(|e| Error::conversion(v, XSD_DATE, e))
        }),
    );
    table.insert(
        XSD_TIME.to_string(),
        Converter::new(|v| {
            temporal::parse_time(v)
                .map(Value::Time)
                .map_err(|e| Error::conversion(v, XSD_TIME, e))
        }),
    );
    table
});

fn integer(datatype: &'static str) -> Converter {
    Converter::new(move |v| {
        BigInt::from_str(v.trim())
            .map(Value::Integer)
            .map_err(|e| Error::conversion(v, datatype, e))
    })
}

fn float(datatype: &'static str) -> Converter {
    Converter::new(move |v| {
        f64::from_str(v.trim())
            .map(Value::Float)
            .map_err(|e| Error::conversion(v, datatype, e))
    })
}

// xsd:integer is unbounded, so it shares the exact decimal path
fn decimal(datatype: &'static str) -> Converter {
    Converter::new(move |v| {
        BigDecimal::from_str(v.trim())
            .map(Value::Decimal)
            .map_err(|e| Error::conversion(v, datatype, e))
    })
}

/// A [`RawResultSet`] whose rows hold native values instead of terms.
#[derive(Debug)]
pub struct ResultSet<S: MarkupSource> {
    inner: RawResultSet<S>,
    types: TypeTable,
    fallback: Option<Fallback>,
}

impl<R: Read> ResultSet<XmlEventSource<R>> {
    pub fn new(input: R) -> Self {
        ResultSet::from_raw(RawResultSet::new(input))
    }

    pub fn with_encoding(input: R, label: &str) -> Result<Self> {
        Ok(ResultSet::from_raw(RawResultSet::with_encoding(input, label)?))
    }
}

impl<S: MarkupSource> ResultSet<S> {
    pub fn from_raw(inner: RawResultSet<S>) -> Self {
        ResultSet {
            inner,
            types: TypeTable::new(),
            fallback: None,
        }
    }

    /// Adds conversions, taking precedence over the built-in ones for the same
    /// datatype.
    pub fn with_types(mut self, types: TypeTable) -> Self {
        self.types.extend(types);
        self
    }

    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&str, &str) -> Result<Value> + Send + Sync + 'static,
    {
        self.fallback = Some(Fallback::new(fallback));
        self
    }

    /// The built-in conversion table.
    pub fn basic_types() -> &'static TypeTable {
        &BASIC_TYPES
    }

    /// Converts one raw row. `additional_types` is consulted before the built-in
    /// table, `fallback` only for datatypes neither of them knows. Literals
    /// without a datatype keep their lexical form.
    pub fn unpack_row(
        row: Row,
        fallback: Option<&Fallback>,
        additional_types: Option<&TypeTable>,
    ) -> Result<TypedRow> {
        row.into_iter()
            .map(|slot| slot.map(|term| unpack_term(term, fallback, additional_types)).transpose())
            .collect()
    }

    pub fn start_parse(&mut self) -> Result<()> {
        self.inner.start_parse()
    }

    pub fn variables(&mut self) -> Result<&[String]> {
        self.inner.variables()
    }

    pub fn has_answer(&mut self) -> Result<Option<bool>> {
        self.inner.has_answer()
    }

    pub fn fetch_next(&mut self) -> TypedRows<'_, S> {
        TypedRows {
            rows: self.inner.fetch_next(),
            types: &self.types,
            fallback: self.fallback.as_ref(),
        }
    }

    pub fn fetch_rows(&mut self, limit: usize) -> Result<Vec<TypedRow>> {
        let mut rows = Vec::new();
        for row in self.fetch_next() {
            rows.push(row?);
            if rows.len() == limit {
                break;
            }
        }
        Ok(rows)
    }

    pub fn get_raw_response_text(&mut self, max_length: usize) -> Result<String> {
        self.inner.get_raw_response_text(max_length)
    }

    pub fn close(&mut self) {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn encoding(&self) -> &str {
        self.inner.encoding()
    }

    pub fn state(&self) -> ParseState {
        self.inner.state()
    }
}

fn unpack_term(term: Term, fallback: Option<&Fallback>, additional_types: Option<&TypeTable>) -> Result<Value> {
    let literal = match term {
        Term::Resource(value) | Term::Anonymous(value) => return Ok(Value::String(value)),
        Term::Literal(literal) => literal,
    };
    let datatype = match literal.datatype() {
        Some(datatype) => datatype.as_str(),
        None => return Ok(Value::String(literal.value().to_string())),
    };

    let converter = additional_types
        .and_then(|types| types.get(datatype))
        .or_else(|| BASIC_TYPES.get(datatype));
    match (converter, fallback) {
        (Some(converter), _) => converter.call(literal.value()),
        (None, Some(fallback)) => fallback.call(literal.value(), datatype),
        (None, None) => Ok(Value::String(literal.value().to_string())),
    }
}

/// Forward-only cursor over the converted rows of a [`ResultSet`].
pub struct TypedRows<'a, S: MarkupSource> {
    rows: Rows<'a, S>,
    types: &'a TypeTable,
    fallback: Option<&'a Fallback>,
}

impl<S: MarkupSource> Iterator for TypedRows<'_, S> {
    type Item = Result<TypedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(row.and_then(|row| ResultSet::<S>::unpack_row(row, self.fallback, Some(self.types))))
    }
}

impl<'a, S: MarkupSource> IntoIterator for &'a mut ResultSet<S> {
    type Item = Result<TypedRow>;
    type IntoIter = TypedRows<'a, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.fetch_next()
    }
}

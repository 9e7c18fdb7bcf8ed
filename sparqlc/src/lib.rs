/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Client-side core for SPARQL endpoints: streams SPARQL XML result documents
//! into rows of RDF terms, converts them to native values and parses the
//! canonical term notation.
//!
//! ```no_run
//! use std::fs::File;
//! use sparqlc::RawResultSet;
//!
//! # fn main() -> sparqlc::Result<()> {
//! let mut results = RawResultSet::new(File::open("response.srx")?);
//! println!("{:?}", results.variables()?);
//! for row in results.fetch_next() {
//!     println!("{:?}", row?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod markup;
pub mod n3_parser;
pub mod result_set;
pub mod temporal;
pub mod typed_result;

pub use error::{Error, Result};
pub use markup::{EventReplay, MarkupEvent, MarkupSource, XmlEventSource};
pub use n3_parser::parse_term;
pub use result_set::{ParseState, RawResultSet, Row, Rows, DEFAULT_ENCODING, MAX_RAW_LEN};
pub use shared::dictionary::{Datatype, DatatypeInterner};
pub use shared::terms::{Literal, Term};
pub use shared::xsd;
pub use typed_result::{Converter, Fallback, ResultSet, TypeTable, TypedRow, TypedRows, Value};

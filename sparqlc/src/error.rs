/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced while reading or interpreting a query response.
#[derive(Debug, Error)]
pub enum Error {
    /// The response is not a well-formed result document. `data` holds the
    /// unread remainder of the response, decoded and capped at 1 MiB.
    #[error("invalid SPARQL result document: {message}")]
    Parse { message: String, data: String },

    #[error("invalid term notation: {0}")]
    Notation(String),

    /// The document is well-formed but its content contradicts itself,
    /// e.g. a binding names a variable missing from the header.
    #[error("malformed SPARQL response: {0}")]
    ProtocolViolation(String),

    #[error("ResultSet trying to read a closed stream")]
    StreamClosed,

    #[error("unknown text encoding: {0}")]
    UnknownEncoding(String),

    #[error("cannot convert {value:?} to <{datatype}>: {message}")]
    Conversion {
        value: String,
        datatype: String,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn conversion(value: &str, datatype: &str, message: impl ToString) -> Self {
        Error::Conversion {
            value: value.to_string(),
            datatype: datatype.to_string(),
            message: message.to_string(),
        }
    }

    /// The raw response remainder attached to a [`Error::Parse`].
    pub fn diagnostic_data(&self) -> Option<&str> {
        match self {
            Error::Parse { data, .. } => Some(data),
            _ => None,
        }
    }
}

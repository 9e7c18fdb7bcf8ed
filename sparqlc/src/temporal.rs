/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Permissive parsing of XSD date and time lexical forms.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

/// A date-time with or without a timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Zoned(DateTime<FixedOffset>),
    Local(NaiveDateTime),
}

static TIMEZONE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:Z|[+-]\d{2}:\d{2})$").expect("valid regex"));

const ZONED_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];
const LOCAL_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];
const TIME_FORMATS: [&str; 3] = ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];

/// Accepts RFC 3339, offsets without a colon, local date-times with `T` or a
/// space, and a bare date (read as midnight).
pub fn parse_datetime(text: &str) -> Result<Timestamp, String> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(Timestamp::Zoned(dt));
    }
    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Ok(Timestamp::Zoned(dt));
        }
    }
    for fmt in LOCAL_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(Timestamp::Local(ndt));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(Timestamp::Local(date.and_time(NaiveTime::MIN)));
    }
    Err(format!("Cannot parse dateTime: {}", text))
}

/// The calendar date of `text`; a timezone suffix is dropped.
pub fn parse_date(text: &str) -> Result<NaiveDate, String> {
    let trimmed = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(strip_timezone(trimmed), "%Y-%m-%d") {
        return Ok(date);
    }
    match parse_datetime(trimmed) {
        Ok(Timestamp::Zoned(dt)) => Ok(dt.date_naive()),
        Ok(Timestamp::Local(ndt)) => Ok(ndt.date()),
        Err(_) => Err(format!("Cannot parse date: {}", text)),
    }
}

/// The wall-clock time of `text`; a timezone suffix is dropped.
pub fn parse_time(text: &str) -> Result<NaiveTime, String> {
    let trimmed = text.trim();
    let local = strip_timezone(trimmed);
    for fmt in TIME_FORMATS {
        if let Ok(time) = NaiveTime::parse_from_str(local, fmt) {
            return Ok(time);
        }
    }
    match parse_datetime(trimmed) {
        Ok(Timestamp::Zoned(dt)) => Ok(dt.time()),
        Ok(Timestamp::Local(ndt)) => Ok(ndt.time()),
        Err(_) => Err(format!("Cannot parse time: {}", text)),
    }
}

fn strip_timezone(text: &str) -> &str {
    match TIMEZONE_SUFFIX.find(text) {
        Some(found) => &text[..found.start()],
        None => text,
    }
}

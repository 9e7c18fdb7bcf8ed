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
use std::io::Read;
use std::sync::Arc;

use encoding_rs::{Encoding, UTF_8};
use log::{debug, error};
use shared::dictionary::{Datatype, DatatypeInterner};
use shared::terms::{Literal, Term};

use crate::error::{Error, Result};
use crate::markup::{attribute, MarkupError, MarkupEvent, MarkupSource, XmlEventSource};

pub const DEFAULT_ENCODING: &str = "utf-8";

/// Maximum length of data returned by `get_raw_response_text` and attached to
/// parse errors.
pub const MAX_RAW_LEN: usize = 1024 * 1024;

/// One solution: a slot per declared variable, in declaration order.
/// Unbound variables are `None`.
pub type Row = Vec<Option<Term>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    NotStarted,
    HeaderParsing,
    /// Boolean (ASK) result; the answer is known and there are no rows.
    AskAnswered,
    /// Header read, no row consumed yet.
    RowsReady,
    Streaming,
    Exhausted,
    Failed,
    /// Closed by the caller before the document was fully read.
    Closed,
}

/// Outcome of feeding one event to the assembler.
#[derive(Debug)]
enum Step {
    Continue,
    HeaderDone,
    Answer(bool),
    Row(Row),
    Finished,
}

#[derive(Debug)]
enum ValueKind {
    Resource,
    Anonymous,
    Literal {
        datatype: Option<Datatype>,
        lang: Option<String>,
    },
}

impl ValueKind {
    fn into_term(self, text: String) -> Term {
        match self {
            ValueKind::Resource => Term::Resource(text),
            ValueKind::Anonymous => Term::Anonymous(text),
            ValueKind::Literal { datatype, lang } => Term::Literal(Literal::new(text, datatype, lang)),
        }
    }
}

/// Transition function of the result document: turns markup events into the
/// header, the boolean answer and completed rows.
#[derive(Debug, Default)]
struct RowAssembler {
    variables: Vec<String>,
    in_rows: bool,
    depth: usize,
    boolean: Option<String>,
    row: Option<Row>,
    slot: Option<usize>,
    value: Option<(ValueKind, String)>,
}

impl RowAssembler {
    fn on_event(&mut self, event: MarkupEvent, interner: &DatatypeInterner) -> Result<Step> {
        match event {
            MarkupEvent::Start { name, attributes } => {
                self.depth += 1;
                self.on_start(&name, &attributes, interner)
            }
            MarkupEvent::End { name } => {
                self.depth = self.depth.saturating_sub(1);
                let step = self.on_end(&name)?;
                if self.depth == 0 {
                    // Root element closed
                    return Ok(Step::Finished);
                }
                Ok(step)
            }
            MarkupEvent::Text(text) => {
                if let Some((_, buffer)) = self.value.as_mut() {
                    buffer.push_str(&text);
                } else if let Some(buffer) = self.boolean.as_mut() {
                    buffer.push_str(&text);
                }
                Ok(Step::Continue)
            }
            MarkupEvent::Eof => Ok(Step::Finished),
        }
    }

    fn on_start(
        &mut self,
        name: &str,
        attributes: &[(String, String)],
        interner: &DatatypeInterner,
    ) -> Result<Step> {
        match name {
            "variable" if !self.in_rows => {
                let variable = attribute(attributes, "name").ok_or_else(|| {
                    Error::ProtocolViolation("<variable> element without a name".to_string())
                })?;
                self.variables.push(variable.to_string());
            }
            "boolean" if !self.in_rows => self.boolean = Some(String::new()),
            "result" => {
                self.row = Some(vec![None; self.variables.len()]);
                if !self.in_rows {
                    self.in_rows = true;
                    return Ok(Step::HeaderDone);
                }
            }
            "binding" => {
                let variable = attribute(attributes, "name").ok_or_else(|| {
                    Error::ProtocolViolation("<binding> element without a name".to_string())
                })?;
                let index = self
                    .variables
                    .iter()
                    .position(|declared| declared == variable)
                    .ok_or_else(|| {
                        Error::ProtocolViolation(format!(
                            "binding for undeclared variable '{}'",
                            variable
                        ))
                    })?;
                self.slot = Some(index);
            }
            "uri" => self.value = Some((ValueKind::Resource, String::new())),
            "bnode" => self.value = Some((ValueKind::Anonymous, String::new())),
            "literal" => {
                let lang = attribute(attributes, "xml:lang")
                    .filter(|lang| !lang.is_empty())
                    .map(str::to_string);
                let datatype =
                    interner.intern(attribute(attributes, "datatype").filter(|dt| !dt.is_empty()));
                self.value = Some((ValueKind::Literal { datatype, lang }, String::new()));
            }
            _ => {}
        }
        Ok(Step::Continue)
    }

    fn on_end(&mut self, name: &str) -> Result<Step> {
        match name {
            "boolean" => {
                if let Some(text) = self.boolean.take() {
                    return Ok(Step::Answer(text == "true"));
                }
            }
            "head" if !self.in_rows && !self.variables.is_empty() => {
                self.in_rows = true;
                return Ok(Step::HeaderDone);
            }
            "uri" | "bnode" | "literal" => {
                if let Some((kind, text)) = self.value.take() {
                    let slot = match (self.slot, self.row.as_mut()) {
                        (Some(slot), Some(row)) => &mut row[slot],
                        _ => {
                            return Err(Error::ProtocolViolation(format!(
                                "<{}> value outside of a result binding",
                                name
                            )))
                        }
                    };
                    *slot = Some(kind.into_term(text));
                }
            }
            "binding" => self.slot = None,
            "result" => {
                if let Some(row) = self.row.take() {
                    return Ok(Step::Row(row));
                }
            }
            _ => {}
        }
        Ok(Step::Continue)
    }
}

fn encoding_for(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| Error::UnknownEncoding(label.to_string()))
}

/// A SPARQL XML result set read in one forward pass over its stream.
///
/// The header is parsed lazily on the first call to [`variables`](Self::variables),
/// [`has_answer`](Self::has_answer) or [`fetch_next`](Self::fetch_next). The stream is
/// released once the document is exhausted, on error, on [`close`](Self::close) and
/// when the result set is dropped.
pub struct RawResultSet<S: MarkupSource> {
    source: Option<S>,
    assembler: RowAssembler,
    state: ParseState,
    header_parsed: bool,
    answer: Option<bool>,
    encoding_label: String,
    encoding: &'static Encoding,
    interner: Arc<DatatypeInterner>,
    rows_read: usize,
}

impl<R: Read> RawResultSet<XmlEventSource<R>> {
    /// Reads a UTF-8 response.
    pub fn new(input: R) -> Self {
        RawResultSet::from_source(XmlEventSource::new(input))
    }

    /// Reads a response declared in the encoding named by `label`
    /// (e.g. `utf-8`, `utf-16`, `iso-8859-1`).
    pub fn with_encoding(input: R, label: &str) -> Result<Self> {
        let encoding = encoding_for(label)?;
        RawResultSet::from_source(XmlEventSource::with_encoding(input, encoding)).encoded_as(label)
    }
}

impl<S: MarkupSource> RawResultSet<S> {
    /// Builds a result set over any markup event source.
    pub fn from_source(source: S) -> Self {
        RawResultSet {
            source: Some(source),
            assembler: RowAssembler::default(),
            state: ParseState::NotStarted,
            header_parsed: false,
            answer: None,
            encoding_label: DEFAULT_ENCODING.to_string(),
            encoding: UTF_8,
            interner: DatatypeInterner::global(),
            rows_read: 0,
        }
    }

    pub fn encoded_as(mut self, label: &str) -> Result<Self> {
        self.encoding = encoding_for(label)?;
        self.encoding_label = label.to_string();
        Ok(self)
    }

    /// Interns literal datatypes through `interner` instead of the process-wide one.
    pub fn with_interner(mut self, interner: Arc<DatatypeInterner>) -> Self {
        self.interner = interner;
        self
    }

    pub fn encoding(&self) -> &str {
        &self.encoding_label
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    /// Parses the header: the declared variables and, for ASK results, the
    /// boolean answer. Does nothing once parsing has started.
    pub fn start_parse(&mut self) -> Result<()> {
        match self.state {
            ParseState::NotStarted => {}
            ParseState::Closed if !self.header_parsed => return Err(Error::StreamClosed),
            _ => return Ok(()),
        }
        if self.source.is_none() {
            return Err(Error::StreamClosed);
        }

        self.state = ParseState::HeaderParsing;
        loop {
            let event = self.pull()?;
            match self.step(event)? {
                Step::Continue => {}
                Step::HeaderDone => {
                    self.header_parsed = true;
                    self.state = ParseState::RowsReady;
                    debug!(
                        "Parsed result header with {} variables",
                        self.assembler.variables.len()
                    );
                    return Ok(());
                }
                Step::Answer(answer) => {
                    self.header_parsed = true;
                    self.answer = Some(answer);
                    self.state = ParseState::AskAnswered;
                    debug!("Parsed boolean result: {}", answer);
                    self.release();
                    return Ok(());
                }
                Step::Finished => {
                    self.header_parsed = true;
                    self.state = ParseState::Exhausted;
                    debug!("Result document ended without rows or answer");
                    self.release();
                    return Ok(());
                }
                Step::Row(_) => {
                    return Err(self.abort(Error::ProtocolViolation(
                        "result row before the end of the header".to_string(),
                    )))
                }
            }
        }
    }

    /// The declared variable names, in declaration order.
    pub fn variables(&mut self) -> Result<&[String]> {
        self.start_parse()?;
        Ok(&self.assembler.variables)
    }

    /// `Some(answer)` for a boolean result, `None` for a tabular one. A tabular
    /// result may still turn out to have no rows.
    pub fn has_answer(&mut self) -> Result<Option<bool>> {
        self.start_parse()?;
        Ok(self.answer)
    }

    /// Lazily yields the remaining rows. The cursor never rewinds: a later call
    /// picks up at the next unread row, and yields nothing once the result is
    /// exhausted or failed.
    pub fn fetch_next(&mut self) -> Rows<'_, S> {
        Rows {
            result_set: self,
            done: false,
        }
    }

    /// Collects rows eagerly. `limit == 0` reads everything; otherwise reading
    /// stops after `limit` rows and the rest of the stream stays unread.
    pub fn fetch_rows(&mut self, limit: usize) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for row in self.fetch_next() {
            rows.push(row?);
            if rows.len() == limit {
                break;
            }
        }
        Ok(rows)
    }

    /// Reads up to `max_length` bytes without parsing them, decodes them with the
    /// configured encoding and closes the stream.
    pub fn get_raw_response_text(&mut self, max_length: usize) -> Result<String> {
        let source = self.source.as_mut().ok_or(Error::StreamClosed)?;
        let text = source.drain(max_length, self.encoding);
        self.close();
        Ok(text?)
    }

    /// Releases the stream. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.source.is_none() {
            return;
        }
        if matches!(
            self.state,
            ParseState::NotStarted
                | ParseState::HeaderParsing
                | ParseState::RowsReady
                | ParseState::Streaming
        ) {
            self.state = ParseState::Closed;
        }
        self.release();
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        self.start_parse()?;
        match self.state {
            ParseState::RowsReady | ParseState::Streaming => {}
            ParseState::Closed => return Err(Error::StreamClosed),
            _ => return Ok(None),
        }

        self.state = ParseState::Streaming;
        loop {
            let event = self.pull()?;
            match self.step(event)? {
                Step::Row(row) => {
                    self.rows_read += 1;
                    return Ok(Some(row));
                }
                Step::Finished => {
                    self.state = ParseState::Exhausted;
                    debug!("Result stream exhausted after {} rows", self.rows_read);
                    self.release();
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    fn pull(&mut self) -> Result<MarkupEvent> {
        let source = self.source.as_mut().ok_or(Error::StreamClosed)?;
        match source.next_event() {
            Ok(event) => Ok(event),
            Err(MarkupError::Syntax(message)) => {
                let data = self.leftover_text();
                Err(self.abort(Error::Parse { message, data }))
            }
            Err(MarkupError::Io(e)) => Err(self.abort(Error::Io(e))),
        }
    }

    fn step(&mut self, event: MarkupEvent) -> Result<Step> {
        match self.assembler.on_event(event, &self.interner) {
            Ok(step) => Ok(step),
            Err(e) => Err(self.abort(e)),
        }
    }

    /// Marks the parse failed and releases the stream.
    fn abort(&mut self, e: Error) -> Error {
        self.state = ParseState::Failed;
        error!("SPARQL result parsing failed: {}", e);
        self.release();
        e
    }

    fn leftover_text(&mut self) -> String {
        let encoding = self.encoding;
        match self.source.as_mut().map(|source| source.drain(MAX_RAW_LEN, encoding)) {
            Some(Ok(text)) => text,
            _ => String::new(),
        }
    }

    fn release(&mut self) {
        if self.source.take().is_some() {
            debug!("Released result stream");
        }
    }
}

impl<S: MarkupSource> fmt::Debug for RawResultSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResultSet")
            .field("state", &self.state())
            .field("encoding", &self.encoding())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<S: MarkupSource> Drop for RawResultSet<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Forward-only cursor over the rows of a [`RawResultSet`].
pub struct Rows<'a, S: MarkupSource> {
    result_set: &'a mut RawResultSet<S>,
    done: bool,
}

impl<S: MarkupSource> Iterator for Rows<'_, S> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.result_set.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a, S: MarkupSource> IntoIterator for &'a mut RawResultSet<S> {
    type Item = Result<Row>;
    type IntoIter = Rows<'a, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.fetch_next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::EventReplay;
    use shared::xsd::XSD_INTEGER;

    fn header(variables: &[&str]) -> Vec<MarkupEvent> {
        let mut events = vec![MarkupEvent::start("sparql", &[]), MarkupEvent::start("head", &[])];
        for variable in variables {
            events.push(MarkupEvent::start("variable", &[("name", variable)]));
            events.push(MarkupEvent::end("variable"));
        }
        events.push(MarkupEvent::end("head"));
        events
    }

    fn binding(variable: &str, element: &str, attributes: &[(&str, &str)], texts: &[&str]) -> Vec<MarkupEvent> {
        let mut events = vec![
            MarkupEvent::start("binding", &[("name", variable)]),
            MarkupEvent::start(element, attributes),
        ];
        events.extend(texts.iter().map(|text| MarkupEvent::text(text)));
        events.push(MarkupEvent::end(element));
        events.push(MarkupEvent::end("binding"));
        events
    }

    fn replay(events: Vec<MarkupEvent>) -> RawResultSet<EventReplay> {
        RawResultSet::from_source(EventReplay::new(events))
    }

    #[test]
    fn test_text_fragments_are_concatenated() {
        let mut events = header(&["text", "page"]);
        events.push(MarkupEvent::start("results", &[]));
        events.push(MarkupEvent::start("result", &[]));
        events.extend(binding("text", "literal", &[], &["multiple", "<br>", "paragraphs", "<br>", "here"]));
        events.extend(binding("page", "uri", &[], &["http://example.com/", "?a=1&b=2"]));
        events.push(MarkupEvent::end("result"));
        events.push(MarkupEvent::end("results"));
        events.push(MarkupEvent::end("sparql"));

        let rows = replay(events).fetch_rows(0).unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Some(Term::Literal(Literal::simple("multiple<br>paragraphs<br>here"))),
                Some(Term::resource("http://example.com/?a=1&b=2")),
            ]]
        );
    }

    #[test]
    fn test_missing_binding_is_an_empty_slot() {
        let mut events = header(&["x", "y", "z"]);
        events.push(MarkupEvent::start("results", &[]));
        events.push(MarkupEvent::start("result", &[]));
        events.extend(binding("y", "bnode", &[], &["b0"]));
        events.push(MarkupEvent::end("result"));
        events.push(MarkupEvent::end("results"));
        events.push(MarkupEvent::end("sparql"));

        let rows = replay(events).fetch_rows(0).unwrap();
        assert_eq!(rows, vec![vec![None, Some(Term::anonymous("b0")), None]]);
    }

    #[test]
    fn test_literal_attributes() {
        let mut events = header(&["x"]);
        events.push(MarkupEvent::start("result", &[]));
        events.extend(binding("x", "literal", &[("datatype", XSD_INTEGER), ("xml:lang", "")], &["30"]));
        events.push(MarkupEvent::end("result"));
        events.push(MarkupEvent::end("sparql"));

        let interner = Arc::new(DatatypeInterner::new());
        let mut result_set = replay(events).with_interner(Arc::clone(&interner));
        let rows = result_set.fetch_rows(0).unwrap();
        let literal = rows[0][0].as_ref().and_then(Term::as_literal).unwrap();
        assert_eq!(literal.lang(), None);
        let canonical = interner.intern(Some(XSD_INTEGER)).unwrap();
        assert!(Datatype::ptr_eq(literal.datatype().unwrap(), &canonical));
    }

    #[test]
    fn test_undeclared_variable_is_a_protocol_violation() {
        let mut events = header(&["x"]);
        events.push(MarkupEvent::start("result", &[]));
        events.extend(binding("nope", "uri", &[], &["http://a/"]));
        events.push(MarkupEvent::end("result"));
        events.push(MarkupEvent::end("sparql"));

        let mut result_set = replay(events);
        let err = result_set.fetch_rows(0).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(result_set.state(), ParseState::Failed);
        assert!(result_set.is_closed());
        assert_eq!(result_set.fetch_rows(0).unwrap(), Vec::<Row>::new());
    }

    #[test]
    fn test_ask_result() {
        let mut events = header(&[]);
        events.push(MarkupEvent::start("boolean", &[]));
        events.push(MarkupEvent::text("true"));
        events.push(MarkupEvent::end("boolean"));
        events.push(MarkupEvent::end("sparql"));

        let mut result_set = replay(events);
        assert_eq!(result_set.has_answer().unwrap(), Some(true));
        assert_eq!(result_set.state(), ParseState::AskAnswered);
        assert!(result_set.is_closed());
        assert!(result_set.fetch_rows(0).unwrap().is_empty());
        assert!(result_set.variables().unwrap().is_empty());
    }

    #[test]
    fn test_answer_requires_exact_true() {
        let mut events = header(&[]);
        events.push(MarkupEvent::start("boolean", &[]));
        events.push(MarkupEvent::text("TRUE"));
        events.push(MarkupEvent::end("boolean"));
        events.push(MarkupEvent::end("sparql"));

        assert_eq!(replay(events).has_answer().unwrap(), Some(false));
    }

    #[test]
    fn test_cursor_never_rewinds() {
        let mut events = header(&["x"]);
        for value in ["a", "b", "c"] {
            events.push(MarkupEvent::start("result", &[]));
            events.extend(binding("x", "bnode", &[], &[value]));
            events.push(MarkupEvent::end("result"));
        }
        events.push(MarkupEvent::end("sparql"));

        let mut result_set = replay(events);
        assert_eq!(result_set.fetch_rows(1).unwrap(), vec![vec![Some(Term::anonymous("a"))]]);
        assert!(!result_set.is_closed());
        let rest: Vec<Row> = result_set.fetch_next().collect::<Result<_>>().unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(result_set.state(), ParseState::Exhausted);
        assert!(result_set.fetch_next().next().is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut result_set = replay(header(&["x"]));
        result_set.close();
        result_set.close();
        assert!(result_set.is_closed());
        assert!(matches!(result_set.variables(), Err(Error::StreamClosed)));
        assert!(matches!(result_set.get_raw_response_text(MAX_RAW_LEN), Err(Error::StreamClosed)));
    }

    #[test]
    fn test_fetch_after_close_mid_stream() {
        let mut events = header(&["x"]);
        events.push(MarkupEvent::start("result", &[]));
        events.push(MarkupEvent::end("result"));
        events.push(MarkupEvent::end("sparql"));

        let mut result_set = replay(events);
        assert_eq!(result_set.variables().unwrap(), ["x".to_string()]);
        result_set.close();
        assert_eq!(result_set.state(), ParseState::Closed);
        assert_eq!(result_set.variables().unwrap(), ["x".to_string()]);
        assert!(matches!(result_set.fetch_rows(0), Err(Error::StreamClosed)));
    }

    #[test]
    fn test_syntax_error_carries_leftover_text() {
        let document = "<sparql><head><variable name=\"x\"/></head><results><result></binding> trailing text";
        let mut result_set = RawResultSet::new(document.as_bytes());
        let err = result_set.fetch_rows(0).unwrap_err();
        let data = err.diagnostic_data().unwrap();
        assert!(document.ends_with(data));
        assert!(data.contains("trailing text"));
        assert_eq!(result_set.state(), ParseState::Failed);
        assert!(result_set.is_closed());
    }

    #[test]
    fn test_debug_output() {
        let mut result_set = replay(header(&["x"]));
        result_set.close();
        let debug = format!("{:?}", result_set);
        assert!(debug.starts_with("RawResultSet"));
        assert!(debug.contains("Closed"));
        assert!(debug.contains("utf-8"));
    }

    #[test]
    fn test_unknown_encoding() {
        let err = RawResultSet::with_encoding("".as_bytes(), "no-such-encoding").err().unwrap();
        assert!(matches!(err, Error::UnknownEncoding(_)));
    }
}

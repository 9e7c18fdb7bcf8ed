/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Markup events consumed by the result parser, and the quick-xml backed source
//! producing them from a byte stream.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::io::{self, BufReader, Read};

use encoding_rs::{Decoder, Encoding, UTF_8};
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// The only event shapes the result parser needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupEvent {
    /// Element start. `name` is the local name, attribute keys keep their prefix
    /// (`xml:lang`). Empty elements are reported as a start followed by an end.
    Start {
        name: String,
        attributes: Vec<(String, String)>,
    },
    End {
        name: String,
    },
    /// A text fragment. One element's text may arrive in several fragments.
    Text(String),
    Eof,
}

impl MarkupEvent {
    pub fn start(name: &str, attributes: &[(&str, &str)]) -> Self {
        MarkupEvent::Start {
            name: name.to_string(),
            attributes: attributes
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }

    pub fn end(name: &str) -> Self {
        MarkupEvent::End {
            name: name.to_string(),
        }
    }

    pub fn text(text: &str) -> Self {
        MarkupEvent::Text(text.to_string())
    }
}

/// Value of attribute `key`, if present.
pub(crate) fn attribute<'a>(attributes: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, value)| value.as_str())
}

#[derive(Debug, Error)]
pub enum MarkupError {
    #[error("{0}")]
    Syntax(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A forward-only producer of markup events over one response.
pub trait MarkupSource {
    fn next_event(&mut self) -> Result<MarkupEvent, MarkupError>;

    /// Reads up to `max_len` bytes the parser has not consumed yet and decodes
    /// them with `encoding`.
    fn drain(&mut self, max_len: usize, encoding: &'static Encoding) -> io::Result<String>;
}

const CHUNK_LEN: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Unsniffed,
    Passthrough,
    Transcoding,
}

/// Hands ASCII-compatible input to the XML reader untouched and re-encodes
/// UTF-16 input (by BOM or by the configured encoding) into UTF-8.
struct Utf8Input<R> {
    input: R,
    encoding: &'static Encoding,
    mode: InputMode,
    decoder: Option<Decoder>,
    raw: Vec<u8>,
    decoded: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl<R: Read> Utf8Input<R> {
    fn new(input: R, encoding: &'static Encoding) -> Self {
        Utf8Input {
            input,
            encoding,
            mode: InputMode::Unsniffed,
            decoder: None,
            raw: Vec::new(),
            decoded: Vec::new(),
            pos: 0,
            finished: false,
        }
    }

    fn is_transcoding(&self) -> bool {
        self.mode == InputMode::Transcoding
    }

    /// Bytes read from now on are passed through, unless transcoding has begun.
    fn pass_through(&mut self) {
        if self.mode == InputMode::Unsniffed {
            self.mode = InputMode::Passthrough;
        }
    }

    fn sniff(&mut self) -> io::Result<()> {
        let mut head = [0u8; 2];
        let mut len = 0;
        while len < head.len() {
            match self.input.read(&mut head[len..]) {
                Ok(0) => break,
                Ok(n) => len += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.raw.extend_from_slice(&head[..len]);

        let utf16_bom = head[..len] == [0xFF, 0xFE] || head[..len] == [0xFE, 0xFF];
        if utf16_bom || !self.encoding.is_ascii_compatible() {
            // The decoder sniffs the BOM itself, which wins over the configured encoding
            self.decoder = Some(self.encoding.new_decoder());
            self.mode = InputMode::Transcoding;
        } else {
            self.mode = InputMode::Passthrough;
        }
        Ok(())
    }

    fn fill(&mut self) -> io::Result<()> {
        let decoder = match self.decoder.as_mut() {
            Some(decoder) => decoder,
            None => {
                self.finished = true;
                return Ok(());
            }
        };
        if self.raw.is_empty() {
            self.raw.resize(CHUNK_LEN, 0);
            let read = loop {
                match self.input.read(&mut self.raw) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        self.raw.clear();
                        return Err(e);
                    }
                }
            };
            self.raw.truncate(read);
        }

        let last = self.raw.is_empty();
        let capacity = decoder
            .max_utf8_buffer_length(self.raw.len())
            .unwrap_or(CHUNK_LEN * 4);
        self.decoded.clear();
        self.decoded.resize(capacity, 0);
        let (_, read, written, _) = decoder.decode_to_utf8(&self.raw, &mut self.decoded, last);
        self.decoded.truncate(written);
        self.raw.drain(..read);
        self.pos = 0;
        self.finished = last;
        Ok(())
    }
}

impl<R: Read> Read for Utf8Input<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.mode == InputMode::Unsniffed {
            self.sniff()?;
        }
        if buf.is_empty() {
            return Ok(0);
        }

        if self.mode == InputMode::Passthrough {
            if self.raw.is_empty() {
                return self.input.read(buf);
            }
            let n = buf.len().min(self.raw.len());
            buf[..n].copy_from_slice(&self.raw[..n]);
            self.raw.drain(..n);
            return Ok(n);
        }

        loop {
            if self.pos < self.decoded.len() {
                let n = buf.len().min(self.decoded.len() - self.pos);
                buf[..n].copy_from_slice(&self.decoded[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            self.fill()?;
        }
    }
}

/// Streams events out of an XML document with quick-xml, holding only the
/// current event in memory.
///
/// ASCII-compatible documents are decoded by quick-xml, which honours their
/// BOM and XML declaration. UTF-16 documents are re-encoded to UTF-8 before
/// they reach the reader.
pub struct XmlEventSource<R: Read> {
    reader: Reader<BufReader<Utf8Input<R>>>,
    buf: Vec<u8>,
    open_elements: Vec<String>,
    pending_end: Option<String>,
}

impl<R: Read> XmlEventSource<R> {
    pub fn new(input: R) -> Self {
        XmlEventSource::with_encoding(input, UTF_8)
    }

    /// Reads a document sent in `encoding`. A UTF-16 BOM overrides it.
    pub fn with_encoding(input: R, encoding: &'static Encoding) -> Self {
        let mut reader = Reader::from_reader(BufReader::new(Utf8Input::new(input, encoding)));
        // Literal values keep their surrounding whitespace
        reader.trim_text(false);
        reader.check_end_names(true);
        reader.expand_empty_elements(false);

        XmlEventSource {
            reader,
            buf: Vec::with_capacity(1024),
            open_elements: Vec::new(),
            pending_end: None,
        }
    }
}

impl<R: Read> MarkupSource for XmlEventSource<R> {
    fn next_event(&mut self) -> Result<MarkupEvent, MarkupError> {
        if let Some(name) = self.pending_end.take() {
            return Ok(MarkupEvent::End { name });
        }

        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(error) => return Err(xml_error(error, self.reader.buffer_position())),
            };

            match event {
                Event::Start(ref e) => {
                    let (name, attributes) = element(e, &self.reader)?;
                    self.open_elements.push(name.clone());
                    return Ok(MarkupEvent::Start { name, attributes });
                }
                Event::Empty(ref e) => {
                    let (name, attributes) = element(e, &self.reader)?;
                    self.pending_end = Some(name.clone());
                    return Ok(MarkupEvent::Start { name, attributes });
                }
                Event::End(ref e) => {
                    self.open_elements.pop();
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    return Ok(MarkupEvent::End { name });
                }
                Event::Text(ref e) => {
                    let text = decode(&self.reader, e)?;
                    let text = unescape(&text)
                        .map_err(|error| MarkupError::Syntax(error.to_string()))?
                        .into_owned();
                    if !text.is_empty() {
                        return Ok(MarkupEvent::Text(text));
                    }
                }
                Event::CData(ref e) => {
                    let text = decode(&self.reader, e)?.into_owned();
                    if !text.is_empty() {
                        return Ok(MarkupEvent::Text(text));
                    }
                }
                Event::Eof => {
                    if let Some(name) = self.open_elements.last() {
                        return Err(MarkupError::Syntax(format!(
                            "unexpected end of document: element <{}> is never closed",
                            name
                        )));
                    }
                    return Ok(MarkupEvent::Eof);
                }
                // Declarations, comments, processing instructions, doctype
                _ => {}
            }
        }
    }

    fn drain(&mut self, max_len: usize, encoding: &'static Encoding) -> io::Result<String> {
        let input = self.reader.get_mut();
        let transcoding = input.get_ref().is_transcoding();
        if !transcoding {
            input.get_mut().pass_through();
        }

        let mut remaining = Vec::new();
        input.by_ref().take(max_len as u64).read_to_end(&mut remaining)?;
        if transcoding {
            return Ok(String::from_utf8_lossy(&remaining).into_owned());
        }
        let (text, _, _) = encoding.decode(&remaining);
        Ok(text.into_owned())
    }
}

/// Decodes raw document bytes. Re-encoded input is UTF-8 whatever its
/// declaration says.
fn decode<'b, R: Read>(
    reader: &Reader<BufReader<Utf8Input<R>>>,
    bytes: &'b [u8],
) -> Result<Cow<'b, str>, MarkupError> {
    if reader.get_ref().get_ref().is_transcoding() {
        return std::str::from_utf8(bytes)
            .map(Cow::Borrowed)
            .map_err(|error| MarkupError::Syntax(error.to_string()));
    }
    reader
        .decoder()
        .decode(bytes)
        .map_err(|error| xml_error(error, reader.buffer_position()))
}

fn element<R: Read>(
    e: &BytesStart<'_>,
    reader: &Reader<BufReader<Utf8Input<R>>>,
) -> Result<(String, Vec<(String, String)>), MarkupError> {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|error| MarkupError::Syntax(error.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = decode(reader, &attr.value)?;
        let value = unescape(&value)
            .map_err(|error| MarkupError::Syntax(error.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok((name, attributes))
}

fn xml_error(error: quick_xml::Error, position: usize) -> MarkupError {
    match error {
        quick_xml::Error::Io(e) => MarkupError::Io(io::Error::new(e.kind(), e.to_string())),
        other => MarkupError::Syntax(format!("{} (at byte {})", other, position)),
    }
}

/// Replays a prepared list of events. Lets callers feed the result parser from
/// any markup parser they already run.
#[derive(Debug, Default)]
pub struct EventReplay {
    events: VecDeque<MarkupEvent>,
}

impl EventReplay {
    pub fn new(events: impl IntoIterator<Item = MarkupEvent>) -> Self {
        EventReplay {
            events: events.into_iter().collect(),
        }
    }
}

impl MarkupSource for EventReplay {
    fn next_event(&mut self) -> Result<MarkupEvent, MarkupError> {
        Ok(self.events.pop_front().unwrap_or(MarkupEvent::Eof))
    }

    fn drain(&mut self, _max_len: usize, _encoding: &'static Encoding) -> io::Result<String> {
        self.events.clear();
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(xml: &str) -> Result<Vec<MarkupEvent>, MarkupError> {
        let mut source = XmlEventSource::new(xml.as_bytes());
        let mut events = Vec::new();
        loop {
            let event = source.next_event()?;
            if event == MarkupEvent::Eof {
                return Ok(events);
            }
            events.push(event);
        }
    }

    #[test]
    fn test_empty_element_becomes_start_and_end() {
        let events = collect(r#"<head><variable name="x"/></head>"#).unwrap();
        assert_eq!(
            events,
            vec![
                MarkupEvent::start("head", &[]),
                MarkupEvent::start("variable", &[("name", "x")]),
                MarkupEvent::end("variable"),
                MarkupEvent::end("head"),
            ]
        );
    }

    #[test]
    fn test_prefixed_attribute_and_entities() {
        let events = collect(r#"<literal xml:lang="en">a &lt; b</literal>"#).unwrap();
        assert_eq!(events[0], MarkupEvent::start("literal", &[("xml:lang", "en")]));
        assert_eq!(events[1], MarkupEvent::text("a < b"));
    }

    #[test]
    fn test_cdata_is_text() {
        let events = collect("<uri><![CDATA[http://x/<y>]]></uri>").unwrap();
        assert_eq!(events[1], MarkupEvent::text("http://x/<y>"));
    }

    #[test]
    fn test_mismatched_end_is_a_syntax_error() {
        let err = collect("<result><binding></result>").unwrap_err();
        assert!(matches!(err, MarkupError::Syntax(_)));
    }

    #[test]
    fn test_unclosed_document_is_a_syntax_error() {
        let err = collect("<sparql><head>").unwrap_err();
        assert!(matches!(err, MarkupError::Syntax(_)));
    }

    #[test]
    fn test_drain_returns_unread_bytes() {
        let mut source = XmlEventSource::new("<a>text</a>".as_bytes());
        assert_eq!(source.next_event().unwrap(), MarkupEvent::start("a", &[]));
        let rest = source.drain(1024, UTF_8).unwrap();
        assert_eq!(rest, "text</a>");
    }

    fn utf16le(text: &str) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes
    }

    /// Hands out one byte per read.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match (self.0.split_first(), buf.is_empty()) {
                (Some((byte, rest)), false) => {
                    buf[0] = *byte;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    #[test]
    fn test_utf16_document_is_transcoded() {
        let xml = "<?xml version=\"1.0\" encoding=\"UTF-16\"?><literal xml:lang=\"ru\">Германия &amp; Co</literal>";
        let bytes = utf16le(xml);
        let mut source = XmlEventSource::new(Trickle(&bytes));
        assert_eq!(source.next_event().unwrap(), MarkupEvent::start("literal", &[("xml:lang", "ru")]));
        assert_eq!(source.next_event().unwrap(), MarkupEvent::text("Германия & Co"));
        assert_eq!(source.next_event().unwrap(), MarkupEvent::end("literal"));
        assert_eq!(source.next_event().unwrap(), MarkupEvent::Eof);
    }

    #[test]
    fn test_configured_utf16_without_bom() {
        let bytes: Vec<u8> = "<a>ábš</a>".encode_utf16().flat_map(u16::to_be_bytes).collect();
        let mut source = XmlEventSource::with_encoding(bytes.as_slice(), encoding_rs::UTF_16BE);
        assert_eq!(source.next_event().unwrap(), MarkupEvent::start("a", &[]));
        assert_eq!(source.next_event().unwrap(), MarkupEvent::text("ábš"));
    }

    #[test]
    fn test_ascii_compatible_input_is_untouched() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><a>M\xfcnchen</a>";
        let mut source = XmlEventSource::with_encoding(&bytes[..], encoding_rs::WINDOWS_1252);
        assert_eq!(source.next_event().unwrap(), MarkupEvent::start("a", &[]));
        assert_eq!(source.next_event().unwrap(), MarkupEvent::text("München"));
    }

    #[test]
    fn test_drain_after_transcoding_is_utf8() {
        let bytes = utf16le("<a>Германия</a>");
        let mut source = XmlEventSource::new(bytes.as_slice());
        assert_eq!(source.next_event().unwrap(), MarkupEvent::start("a", &[]));
        assert_eq!(source.drain(1024, encoding_rs::UTF_16LE).unwrap(), "Германия</a>");
    }

    #[test]
    fn test_replay_ends_with_eof() {
        let mut replay = EventReplay::new(vec![MarkupEvent::text("x")]);
        assert_eq!(replay.next_event().unwrap(), MarkupEvent::text("x"));
        assert_eq!(replay.next_event().unwrap(), MarkupEvent::Eof);
    }
}

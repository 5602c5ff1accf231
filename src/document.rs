//! Streaming document access.
//!
//! The engine consumes a pull stream of [`DocumentEvent`]s and produces output
//! through a [`DocumentWriter`]. The XML implementations sit on quick-xml.

use crate::error::EngineError;
use crate::value::SourceInfo;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

/// One attribute of a start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    pub location: SourceInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub location: SourceInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    Start(StartElement),
    /// Non-whitespace character data.
    Text(String, SourceInfo),
    End,
    Eof,
}

/// Pull-based source of document events.
pub trait DocumentReader {
    fn next_event(&mut self) -> Result<DocumentEvent, EngineError>;

    /// Consume events up to and including the end of the current element.
    fn skip_subtree(&mut self) -> Result<(), EngineError> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next_event()? {
                DocumentEvent::Start(_) => depth += 1,
                DocumentEvent::End => depth -= 1,
                DocumentEvent::Text(..) => {}
                DocumentEvent::Eof => {
                    return Err(EngineError::document(
                        "Unexpected end of document inside an element",
                    ))
                }
            }
        }
        Ok(())
    }

    /// Advance to the first element of the document.
    fn read_root(&mut self) -> Result<StartElement, EngineError> {
        loop {
            match self.next_event()? {
                DocumentEvent::Start(start) => return Ok(start),
                DocumentEvent::Eof => {
                    return Err(EngineError::document("The document has no root element"))
                }
                DocumentEvent::Text(_, location) => {
                    return Err(EngineError::document("Text outside the root element")
                        .with_location(&location))
                }
                DocumentEvent::End => {
                    return Err(EngineError::document("Unbalanced end tag"))
                }
            }
        }
    }
}

/// Sink for serialized output.
pub trait DocumentWriter {
    fn start_element(&mut self, name: &str) -> Result<(), EngineError>;

    /// Only valid between `start_element` and the first child or end.
    fn attribute(&mut self, name: &str, value: &str) -> Result<(), EngineError>;

    fn end_element(&mut self) -> Result<(), EngineError>;
}

/// Shorten an optional writer borrow for a nested call.
pub(crate) fn reborrow<'a>(
    writer: &'a mut Option<&mut dyn DocumentWriter>,
) -> Option<&'a mut dyn DocumentWriter> {
    match writer {
        Some(w) => Some(&mut **w),
        None => None,
    }
}

/// Reads XML text, reporting 1-based line numbers against `file`.
pub struct XmlDocumentReader<'a> {
    reader: Reader<&'a [u8]>,
    input: &'a str,
    file: String,
    pending_end: bool,
}

impl<'a> XmlDocumentReader<'a> {
    pub fn new(input: &'a str, file: impl Into<String>) -> Self {
        let mut reader = Reader::from_str(input);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            input,
            file: file.into(),
            pending_end: false,
        }
    }

    /// Location of the first non-blank byte at or after `offset`.
    fn location_at(&self, offset: usize) -> SourceInfo {
        let offset = offset.min(self.input.len());
        let start = self
            .input
            .get(offset..)
            .and_then(|rest| rest.find(|c: char| !c.is_whitespace()))
            .map_or(offset, |skip| offset + skip);
        let line = self.input.as_bytes()[..start]
            .iter()
            .filter(|b| **b == b'\n')
            .count()
            + 1;
        SourceInfo::new(self.file.clone(), line)
    }

    fn error(&self, message: impl Into<String>, offset: usize) -> EngineError {
        EngineError::document(message).with_location(&self.location_at(offset))
    }

    fn start_element(&self, e: &BytesStart<'_>, offset: usize) -> Result<StartElement, EngineError> {
        let location = self.location_at(offset);
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| self.error(err.to_string(), offset))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| self.error(err.to_string(), offset))?
                .into_owned();
            attributes.push(Attribute {
                name: key,
                value,
                location: location.clone(),
            });
        }
        Ok(StartElement {
            name,
            attributes,
            location,
        })
    }
}

impl DocumentReader for XmlDocumentReader<'_> {
    fn next_event(&mut self) -> Result<DocumentEvent, EngineError> {
        if self.pending_end {
            self.pending_end = false;
            return Ok(DocumentEvent::End);
        }
        loop {
            let offset = self.reader.buffer_position() as usize;
            let event = self
                .reader
                .read_event()
                .map_err(|err| self.error(err.to_string(), offset))?;
            match event {
                Event::Start(e) => return Ok(DocumentEvent::Start(self.start_element(&e, offset)?)),
                Event::Empty(e) => {
                    let start = self.start_element(&e, offset)?;
                    self.pending_end = true;
                    return Ok(DocumentEvent::Start(start));
                }
                Event::End(_) => return Ok(DocumentEvent::End),
                Event::Text(e) => {
                    let text = e
                        .decode()
                        .map_err(|err| self.error(err.to_string(), offset))?;
                    if text.trim().is_empty() {
                        continue;
                    }
                    return Ok(DocumentEvent::Text(
                        text.into_owned(),
                        self.location_at(offset),
                    ));
                }
                Event::CData(e) => {
                    let text = String::from_utf8_lossy(&e).into_owned();
                    return Ok(DocumentEvent::Text(text, self.location_at(offset)));
                }
                Event::Eof => return Ok(DocumentEvent::Eof),
                // Comments, declarations, processing instructions.
                _ => continue,
            }
        }
    }
}

/// Writes indented XML into memory.
pub struct XmlDocumentWriter {
    writer: Writer<Vec<u8>>,
    pending: Option<BytesStart<'static>>,
    open: Vec<String>,
}

impl Default for XmlDocumentWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlDocumentWriter {
    pub fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
            pending: None,
            open: Vec::new(),
        }
    }

    fn write(&mut self, event: Event<'_>) -> Result<(), EngineError> {
        self.writer
            .write_event(event)
            .map_err(|err| EngineError::document(err.to_string()))
    }

    fn flush_pending(&mut self) -> Result<(), EngineError> {
        if let Some(start) = self.pending.take() {
            self.write(Event::Start(start))?;
        }
        Ok(())
    }

    /// The finished document text.
    pub fn finish(mut self) -> Result<String, EngineError> {
        if let Some(name) = self.open.last() {
            return Err(EngineError::document(format!(
                "Element '{}' was never closed",
                name
            )));
        }
        self.flush_pending()?;
        String::from_utf8(self.writer.into_inner())
            .map_err(|err| EngineError::document(err.to_string()))
    }
}

impl DocumentWriter for XmlDocumentWriter {
    fn start_element(&mut self, name: &str) -> Result<(), EngineError> {
        self.flush_pending()?;
        self.pending = Some(BytesStart::new(name.to_string()));
        self.open.push(name.to_string());
        Ok(())
    }

    fn attribute(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        match self.pending.as_mut() {
            Some(start) => {
                start.push_attribute((name, value));
                Ok(())
            }
            None => Err(EngineError::document(format!(
                "Attribute '{}' written outside a start tag",
                name
            ))),
        }
    }

    fn end_element(&mut self) -> Result<(), EngineError> {
        let name = self
            .open
            .pop()
            .ok_or_else(|| EngineError::document("end_element without a matching start"))?;
        match self.pending.take() {
            Some(start) => self.write(Event::Empty(start)),
            None => self.write(Event::End(BytesEnd::new(name))),
        }
    }
}

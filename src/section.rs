//! Level stacks.
//!
//! A section is one named root node type read from a stack of level
//! documents, lowest first. Each level is parsed on top of the effective
//! node of the level below it; saving a level writes only what differs
//! from its parent.

use crate::document::{DocumentEvent, DocumentReader, XmlDocumentReader, XmlDocumentWriter};
use crate::element::{Element, SaveMode};
use crate::error::EngineError;
use crate::host::HostContext;
use crate::schema::NodeSchema;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One level of a stack. A level without text contributes nothing of its
/// own and inherits its parent unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSource {
    pub file: String,
    pub text: Option<String>,
}

impl LevelSource {
    pub fn new(file: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            text: Some(text.into()),
        }
    }

    pub fn missing(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            text: None,
        }
    }
}

/// Outcome of parsing one level without failing on recoverable errors.
#[derive(Debug)]
pub struct ParsedLevel {
    pub element: Element,
    pub errors: Vec<EngineError>,
}

#[derive(Debug, Clone)]
pub struct Section {
    name: String,
    schema: Arc<NodeSchema>,
    context: Option<HostContext>,
}

impl Section {
    pub fn new(name: impl Into<String>, schema: Arc<NodeSchema>) -> Self {
        Self {
            name: name.into(),
            schema,
            context: None,
        }
    }

    pub fn with_context(mut self, context: HostContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<NodeSchema> {
        &self.schema
    }

    /// The node as it stands before any level applies: defaults only.
    pub fn baseline(&self) -> Result<Element, EngineError> {
        self.inherit(None)
    }

    fn inherit(&self, parent: Option<&Element>) -> Result<Element, EngineError> {
        let mut element = Element::with_tag(Arc::clone(&self.schema), self.name.clone());
        element.associate_context(self.context.clone());
        element.reset(parent)?;
        Ok(element)
    }

    /// Parse one level, collecting every recoverable problem instead of
    /// failing on the first. Malformed documents still fail outright.
    #[instrument(skip(self, parent, text), fields(section = %self.name))]
    pub fn parse(
        &self,
        parent: Option<&Element>,
        file: &str,
        text: &str,
    ) -> Result<ParsedLevel, EngineError> {
        let mut element = self.inherit(parent)?;
        let mut reader = XmlDocumentReader::new(text, file);
        let root = reader.read_root()?;
        if root.name != self.name {
            return Err(EngineError::schema(format!(
                "Expected the root element '{}' but found '{}'",
                self.name, root.name
            ))
            .with_location(&root.location));
        }

        let mut errors = Vec::new();
        element.deserialize(&root, &mut reader, false, &mut errors)?;
        match reader.next_event()? {
            DocumentEvent::Eof => {}
            DocumentEvent::Start(extra) => {
                return Err(EngineError::document("Only one root element is allowed")
                    .with_location(&extra.location))
            }
            DocumentEvent::Text(_, location) => {
                return Err(
                    EngineError::document("Text outside the root element").with_location(&location)
                )
            }
            DocumentEvent::End => return Err(EngineError::document("Unbalanced end tag")),
        }
        element.reset_modified();

        if errors.is_empty() {
            debug!(file, "Parsed level");
        } else {
            warn!(file, error_count = errors.len(), "Level has errors");
        }
        Ok(ParsedLevel { element, errors })
    }

    /// Parse one level on top of `parent`, failing with every problem found.
    pub fn load(
        &self,
        parent: Option<&Element>,
        file: &str,
        text: &str,
    ) -> Result<Element, EngineError> {
        let parsed = self.parse(parent, file, text)?;
        EngineError::from_errors(parsed.errors)?;
        Ok(parsed.element)
    }

    fn load_level(
        &self,
        parent: Option<&Element>,
        level: &LevelSource,
    ) -> Result<Element, EngineError> {
        match &level.text {
            Some(text) => self.load(parent, &level.file, text),
            None => {
                debug!(file = %level.file, "Level has no document, inheriting");
                let mut element = self.inherit(parent)?;
                element.reset_modified();
                Ok(element)
            }
        }
    }

    /// Effective node of every level, lowest first.
    pub fn resolve(&self, levels: &[LevelSource]) -> Result<Vec<Element>, EngineError> {
        info!(section = %self.name, level_count = levels.len(), "Resolving levels");
        let mut resolved: Vec<Element> = Vec::with_capacity(levels.len());
        for level in levels {
            let element = self.load_level(resolved.last(), level)?;
            resolved.push(element);
        }
        Ok(resolved)
    }

    /// Parse every level and report all problems across the stack. A level
    /// that fails to parse at all is replaced by its parent for the levels
    /// above it.
    pub fn check(&self, levels: &[LevelSource]) -> Vec<EngineError> {
        let mut problems = Vec::new();
        let mut current: Option<Element> = None;
        for level in levels {
            let parent = current.as_ref();
            let next = match &level.text {
                Some(text) => match self.parse(parent, &level.file, text) {
                    Ok(parsed) => {
                        problems.extend(parsed.errors);
                        Some(parsed.element)
                    }
                    Err(err) => {
                        problems.extend(err.into_errors());
                        None
                    }
                },
                None => self.load_level(parent, level).ok(),
            };
            if next.is_some() {
                current = next;
            }
        }
        problems
    }

    /// Write the delta of `edited` over `parent`. Returns `None` when the
    /// level would be empty.
    #[instrument(skip(self, edited, parent), fields(section = %self.name))]
    pub fn save(
        &self,
        edited: &Element,
        parent: Option<&Element>,
        mode: SaveMode,
    ) -> Result<Option<String>, EngineError> {
        let mut delta = Element::unmerge(edited, parent, mode)?;
        delta.associate_context(edited.context().cloned());
        if !delta.serialize_to_element(None, &self.name)? {
            debug!("Nothing to write");
            return Ok(None);
        }
        let mut writer = XmlDocumentWriter::new();
        delta.serialize_to_element(Some(&mut writer), &self.name)?;
        let text = writer.finish()?;
        debug!(bytes = text.len(), "Level written");
        Ok(Some(text))
    }
}

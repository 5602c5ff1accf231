//! confstack: hierarchical configuration levels
//!
//! Configuration is read from a stack of levels (machine, site, application,
//! ...). Each level's document is applied over the effective configuration of
//! the level below it, ancestors may lock attributes, elements and collection
//! members against change, and saving a level writes only what it adds.

pub mod cli;
pub mod collection;
pub mod config;
pub mod document;
pub mod element;
pub mod error;
pub mod host;
pub mod lock;
pub mod logging;
pub mod manifest;
pub mod schema;
pub mod section;
mod serialize;
pub mod value;

pub use collection::{Collection, Entry, EntryState, EntryStatus};
pub use document::{
    DocumentEvent, DocumentReader, DocumentWriter, StartElement, XmlDocumentReader,
    XmlDocumentWriter,
};
pub use element::{Element, NodeKind, SaveMode};
pub use error::{ApiError, EngineError, ErrorKind};
pub use host::{HostContext, HostHooks, TargetVersion};
pub use lock::{LockKind, LockSet};
pub use schema::{
    CollectionSchema, CollectionType, DirectiveNames, ElementKey, KeyComparer, NodeSchema,
    PropertyDescriptor,
};
pub use section::{LevelSource, Section};
pub use value::{ScalarKind, ScalarValue, SourceInfo, ValueFlags};

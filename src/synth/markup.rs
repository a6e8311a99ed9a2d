//! Markup metadata.
//!
//! Only two facts are read from a markup document: the class it is bound to
//! (the root element's `x:Class`) and the stylesheets it references.
//!
//! ```xml
//! <ContentPage x:Class="Demo.Views.MainPage" ...>
//!     <ContentPage.Resources>
//!         <StyleSheet Source="/styles/app.css" />
//!     </ContentPage.Resources>
//! </ContentPage>
//! ```

use std::path::{Path, PathBuf};

use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};

/// A markup document as delivered by an edit event.
#[derive(Debug, Clone)]
pub struct MarkupDocument {
    pub path: PathBuf,
    pub text: String,
}

impl MarkupDocument {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    /// Read a markup document from disk.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        Ok(Self::new(path, std::fs::read_to_string(path)?))
    }
}

/// Metadata extracted from markup text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkupInfo {
    /// `Namespace.Class` from the root `x:Class`, when present.
    pub class_full_name: Option<String>,
    /// `Source` of every `*StyleSheet` element, in document order.
    pub stylesheets: Vec<String>,
}

impl MarkupInfo {
    /// Split the bound class into `(namespace, class)`.
    ///
    /// Without `x:Class` the class name is the document's file stem.
    pub fn identity(&self, path: &Path) -> (Option<String>, String) {
        match self.class_full_name.as_deref() {
            Some(full) => match full.rsplit_once('.') {
                Some((ns, name)) => (Some(ns.to_string()), name.to_string()),
                None => (None, full.to_string()),
            },
            None => (None, file_stem(path)),
        }
    }
}

/// Inspect markup text. Malformed markup is logged and yields what was read
/// before the error.
pub fn inspect(text: &str) -> MarkupInfo {
    let mut reader = Reader::from_str(text);
    let mut info = MarkupInfo::default();
    let mut at_root = true;

    loop {
        match reader.read_event() {
            Ok(Event::Start(elem) | Event::Empty(elem)) => {
                if at_root {
                    info.class_full_name = class_attribute(&reader, &elem);
                    at_root = false;
                }
                if is_stylesheet(&elem)
                    && let Some(source) = attribute(&reader, &elem, b"Source")
                {
                    info.stylesheets.push(source);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                crate::log!("synth"; "malformed markup at byte {}: {}", reader.error_position(), e);
                break;
            }
        }
    }

    info
}

fn is_stylesheet(elem: &BytesStart<'_>) -> bool {
    elem.local_name().as_ref().ends_with(b"StyleSheet")
}

/// Value of the prefixed `Class` attribute (`x:Class`).
fn class_attribute(reader: &Reader<&[u8]>, elem: &BytesStart<'_>) -> Option<String> {
    elem.attributes()
        .filter_map(Result::ok)
        .find(|attr| attr.key.prefix().is_some() && attr.key.local_name().as_ref() == b"Class")
        .and_then(|attr| attr.decode_and_unescape_value(reader.decoder()).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn attribute(reader: &Reader<&[u8]>, elem: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    elem.attributes()
        .filter_map(Result::ok)
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| attr.decode_and_unescape_value(reader.decoder()).ok())
        .map(|value| value.into_owned())
}

fn file_stem(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .unwrap_or_default()
        .to_string()
}

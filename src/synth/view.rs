//! The merged-state record of one logical view.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use rustc_hash::FxHashMap;

use crate::freshness::ContentHash;

/// Authoritative state of one view across its markup and code documents.
#[derive(Debug, Clone, Default)]
pub struct ViewClass {
    pub(super) id: u64,
    pub class_name: String,
    pub namespace: Option<String>,
    pub markup_path: Option<PathBuf>,
    pub behavior_path: Option<PathBuf>,
    /// Generated behind-code of the markup document.
    pub aux_path: Option<PathBuf>,
    /// Referenced stylesheet path → loaded text.
    pub style_sheets: FxHashMap<PathBuf, String>,
    pub markup_text: Option<String>,
    pub emitted_source: Option<String>,
    pub version: u64,
    pub needs_rebuild: bool,
    /// Set once a behavior document has supplied code-side identity.
    pub initialized: bool,

    /// Stylesheet reference → path it last resolved to.
    pub(super) style_refs: FxHashMap<String, PathBuf>,
    pub(super) behavior_text: Option<String>,
    pub(super) partials: BTreeMap<PathBuf, String>,
    pub(super) aux_text: Option<String>,
    pub(super) template_hash: ContentHash,
}

/// A rebuilt unit ready to ship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedUnit {
    /// Identity of the view (unversioned).
    pub full_name: String,
    /// Type name inside `source`.
    pub type_name: String,
    pub version: u64,
    pub source: String,
}

impl ViewClass {
    pub fn new(class_name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            class_name: class_name.into(),
            namespace,
            ..Self::default()
        }
    }

    pub fn full_name(&self) -> String {
        qualify(self.namespace.as_deref(), &self.class_name)
    }

    /// Type name the current `emitted_source` declares.
    pub fn emitted_name(&self) -> String {
        versioned_name(&self.class_name, self.version)
    }

    /// Paths of the partial fragments, sorted.
    pub fn partial_paths(&self) -> impl Iterator<Item = &Path> {
        self.partials.keys().map(PathBuf::as_path)
    }

    /// Consume the rebuild flag, returning the unit to ship.
    pub fn take_rebuild(&mut self) -> Option<EmittedUnit> {
        if !std::mem::take(&mut self.needs_rebuild) {
            return None;
        }
        let source = self.emitted_source.clone()?;
        Some(EmittedUnit {
            full_name: self.full_name(),
            type_name: self.emitted_name(),
            version: self.version,
            source,
        })
    }

    /// Every path this view can be looked up by.
    pub(super) fn paths(&self) -> Vec<PathBuf> {
        [&self.markup_path, &self.behavior_path]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }
}

/// `className` at version 0, `className<version>` afterwards.
pub fn versioned_name(class_name: &str, version: u64) -> String {
    if version == 0 {
        class_name.to_string()
    } else {
        format!("{class_name}{version}")
    }
}

pub fn qualify(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}.{name}"),
        None => name.to_string(),
    }
}

// ============================================================================
// Document path conventions
// ============================================================================
//
// Views/MainPage.xaml        markup
// Views/MainPage.xaml.cs     behavior   (markup path + "." + source ext)
// Views/MainPage.xaml.g.cs   generated  (markup path + generated suffix)

/// Behavior document paired with a markup document.
pub fn behavior_path_for(markup: &Path, source_extension: &str) -> PathBuf {
    append(markup, &format!(".{source_extension}"))
}

/// Generated fragment path for a markup document.
pub fn aux_path_for(markup: &Path, generated_suffix: &str) -> PathBuf {
    append(markup, generated_suffix)
}

/// Markup document paired with a behavior document, if the name follows the
/// `<markup>.<source ext>` convention.
pub fn markup_path_for(behavior: &Path, markup_extension: &str, source_extension: &str) -> Option<PathBuf> {
    let name = behavior.file_name()?.to_str()?;
    let stem = name.strip_suffix(&format!(".{source_extension}"))?;
    let is_markup = Path::new(stem)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(markup_extension));
    is_markup.then(|| behavior.with_file_name(stem))
}

fn append(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_name() {
        assert_eq!(versioned_name("MainPage", 0), "MainPage");
        assert_eq!(versioned_name("MainPage", 1), "MainPage1");
        assert_eq!(versioned_name("MainPage", 12), "MainPage12");
    }

    #[test]
    fn test_full_name() {
        assert_eq!(ViewClass::new("Card", None).full_name(), "Card");
        assert_eq!(
            ViewClass::new("Card", Some("Demo.Views".into())).full_name(),
            "Demo.Views.Card"
        );
    }

    #[test]
    fn test_path_conventions() {
        let markup = Path::new("Views/MainPage.xaml");
        assert_eq!(
            behavior_path_for(markup, "cs"),
            PathBuf::from("Views/MainPage.xaml.cs")
        );
        assert_eq!(
            aux_path_for(markup, ".g.cs"),
            PathBuf::from("Views/MainPage.xaml.g.cs")
        );
        assert_eq!(
            markup_path_for(Path::new("Views/MainPage.xaml.cs"), "xaml", "cs"),
            Some(PathBuf::from("Views/MainPage.xaml"))
        );
        assert_eq!(
            markup_path_for(Path::new("Views/MainPage.Events.cs"), "xaml", "cs"),
            None
        );
    }

    #[test]
    fn test_take_rebuild_consumes_flag() {
        let mut view = ViewClass::new("Card", Some("Demo".into()));
        assert_eq!(view.take_rebuild(), None);

        view.emitted_source = Some("class Card1 { }".into());
        view.version = 1;
        view.needs_rebuild = true;

        let unit = view.take_rebuild().unwrap();
        assert_eq!(unit.full_name, "Demo.Card");
        assert_eq!(unit.type_name, "Card1");
        assert_eq!(unit.version, 1);
        assert!(!view.needs_rebuild);
        assert_eq!(view.take_rebuild(), None);
    }
}

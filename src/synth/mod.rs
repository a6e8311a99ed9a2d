//! Class Synthesis - Incremental Merge & Versioning
//!
//! Owns the state of every live view and turns edits into emitted units:
//! - Markup edit: reload stylesheets, regenerate behind-code, re-synthesize
//! - Behavior edit: refresh identity and partial fragments, re-synthesize
//!
//! Every synthesis that changes the merged content bumps the view's version
//! and renames the emitted type (`MainPage` → `MainPage3`) so a host that
//! keeps old definitions loaded never sees a name twice.

mod collab;
mod emit;
mod error;
mod fragment;
mod lexer;
mod markup;
mod store;
mod view;


use std::path::{Path, PathBuf};

use regex::Regex;
use rustc_hash::FxHashMap;

pub use collab::{
    ClassDeclaration, CommandGenerator, MarkupGenerator, NoopGenerator, ScanningProvider,
    SourceDocument, SyntaxProvider, generator_for,
};
pub use error::{GeneratorError, SynthesisError};
pub use markup::{MarkupDocument, MarkupInfo, inspect as inspect_markup};
pub use store::{ViewHandle, ViewKeys, ViewStore};
pub use view::{EmittedUnit, ViewClass, versioned_name};

use crate::{
    config::{HotConfig, SynthConfig},
    freshness::ContentHash,
    log,
    style::StyleResolver,
};
use emit::Parts;
use fragment::Fragment;
use view::{aux_path_for, behavior_path_for, markup_path_for, qualify};

/// What a synthesis step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthOutcome {
    /// Content changed; `version` is the new version.
    Rebuilt { full_name: String, version: u64 },
    /// Merged content identical to the last emitted unit.
    Unchanged { full_name: String },
    /// No code-side information yet.
    Pending { full_name: String },
}

impl SynthOutcome {
    pub fn full_name(&self) -> &str {
        match self {
            Self::Rebuilt { full_name, .. }
            | Self::Unchanged { full_name }
            | Self::Pending { full_name } => full_name,
        }
    }
}

/// Session-scoped synthesizer for all live views.
pub struct ClassSynthesizer {
    config: SynthConfig,
    styles: StyleResolver,
    store: ViewStore,
    syntax: Box<dyn SyntaxProvider>,
    generator: Box<dyn MarkupGenerator>,
    loader: Regex,
}

impl ClassSynthesizer {
    pub fn new(
        config: &HotConfig,
        syntax: Box<dyn SyntaxProvider>,
        generator: Box<dyn MarkupGenerator>,
    ) -> Result<Self, SynthesisError> {
        Ok(Self {
            loader: Regex::new(&config.synth.loader_pattern)?,
            config: config.synth.clone(),
            styles: StyleResolver::new(config.style.clone()),
            store: ViewStore::new(config.session.capacity),
            syntax,
            generator,
        })
    }

    /// Synthesizer with the default collaborators for `config`.
    pub fn from_config(config: &HotConfig) -> Result<Self, SynthesisError> {
        let syntax = ScanningProvider::new(
            config.synth.source_extension.clone(),
            config.style.root_markers.clone(),
        );
        Self::new(config, Box::new(syntax), generator_for(&config.synth.generator))
    }

    pub fn store(&self) -> &ViewStore {
        &self.store
    }

    pub fn view(&self, full_name: &str) -> Option<ViewHandle> {
        self.store.get_by_name(full_name)
    }

    /// Whether `path` is a markup document.
    pub fn is_markup(&self, path: &Path) -> bool {
        has_extension(path, &self.config.markup_extension)
    }

    /// Whether `path` is a source document (behavior, partial or generated).
    pub fn is_source(&self, path: &Path) -> bool {
        has_extension(path, &self.config.source_extension)
    }

    // ========================================================================
    // Edit events
    // ========================================================================

    /// A markup document changed.
    pub fn on_markup_updated(&self, doc: &MarkupDocument) -> Result<SynthOutcome, SynthesisError> {
        let info = markup::inspect(&doc.text);
        let (namespace, class_name) = info.identity(&doc.path);
        let full_name = qualify(namespace.as_deref(), &class_name);
        let behavior = behavior_path_for(&doc.path, &self.config.source_extension);

        let handle = self
            .store
            .find_or_insert(Some(&full_name), &[doc.path.as_path(), behavior.as_path()], || {
                ViewClass::new(class_name.clone(), namespace.clone())
            });
        let mut view = handle.lock();

        if !view.initialized {
            view.class_name = class_name;
            view.namespace = namespace;
        }
        view.markup_path = Some(doc.path.clone());
        view.aux_path = Some(aux_path_for(&doc.path, &self.config.generated_suffix));
        view.markup_text = Some(doc.text.clone());

        self.reload_styles(&mut view, &doc.path, &info.stylesheets);
        self.regenerate(&mut view, doc);
        self.store.reindex(view.id, ViewKeys::of(&view));

        self.synthesize(&mut view)
    }

    /// A behavior, partial or generated source document changed.
    ///
    /// The declaring class is looked up through the syntax provider.
    pub fn on_source_updated(&self, doc: &SourceDocument) -> Result<SynthOutcome, SynthesisError> {
        let decl = self
            .syntax
            .declaration(doc)
            .ok_or_else(|| SynthesisError::NoDeclaration(doc.path.clone()))?;
        self.on_behavior_updated(doc, &decl)
    }

    /// Code-side information for a view arrived or changed.
    pub fn on_behavior_updated(
        &self,
        doc: &SourceDocument,
        decl: &ClassDeclaration,
    ) -> Result<SynthOutcome, SynthesisError> {
        let full_name = decl.full_name();
        let markup = self.markup_path_for(&doc.path);
        let mut keys = vec![doc.path.as_path()];
        if let Some(markup) = &markup {
            keys.push(markup.as_path());
        }

        let handle = self.store.find_or_insert(Some(&full_name), &keys, || {
            ViewClass::new(decl.name.clone(), decl.namespace.clone())
        });
        let mut view = handle.lock();

        if !view.initialized {
            view.class_name = decl.name.clone();
            view.namespace = decl.namespace.clone();
            view.initialized = true;
        }

        let primary = match &view.behavior_path {
            Some(path) => path.clone(),
            None => self.primary_behavior(doc, decl),
        };
        if view.markup_path.is_none() {
            view.markup_path = self.markup_path_for(&primary);
        }
        if view.aux_path.is_none() {
            view.aux_path = view
                .markup_path
                .as_deref()
                .map(|m| aux_path_for(m, &self.config.generated_suffix));
        }
        view.behavior_path = Some(primary.clone());

        // primary fragment
        if doc.path == primary {
            view.behavior_text = Some(doc.text.clone());
        } else if view.behavior_text.is_none() {
            let text = std::fs::read_to_string(&primary)
                .map_err(|e| SynthesisError::Io(primary.clone(), e))?;
            view.behavior_text = Some(text);
        }

        // generated fragment
        let aux = view.aux_path.clone();
        if aux.as_deref() == Some(doc.path.as_path()) {
            view.aux_text = Some(doc.text.clone());
        } else if view.aux_text.is_none()
            && let Some(aux) = &aux
            && let Ok(text) = std::fs::read_to_string(aux)
        {
            view.aux_text = Some(text);
        }

        // partial fragments: every other declaring document
        let mut partials = std::collections::BTreeMap::new();
        for location in &decl.locations {
            if *location == primary || Some(location) == aux.as_ref() {
                continue;
            }
            let text = if *location == doc.path {
                Some(doc.text.clone())
            } else {
                read_partial(location).or_else(|| view.partials.get(location).cloned())
            };
            if let Some(text) = text {
                partials.insert(location.clone(), text);
            }
        }
        view.partials = partials;

        self.store.reindex(view.id, ViewKeys::of(&view));
        self.synthesize(&mut view)
    }

    /// Consume the pending rebuild of `full_name`, if any.
    pub fn take_rebuild(&self, full_name: &str) -> Option<EmittedUnit> {
        self.store.get_by_name(full_name)?.lock().take_rebuild()
    }

    // ========================================================================
    // Synthesis
    // ========================================================================

    /// Merge the view's fragments and decide whether it needs a rebuild.
    ///
    /// On error the previously emitted unit and version are kept.
    pub fn synthesize(&self, view: &mut ViewClass) -> Result<SynthOutcome, SynthesisError> {
        let full_name = view.full_name();
        if !view.initialized || view.behavior_text.is_none() {
            return Ok(SynthOutcome::Pending { full_name });
        }

        let template = self.template(view)?;
        let hash = ContentHash::of(&template);

        if view.emitted_source.is_some() && hash == view.template_hash {
            view.needs_rebuild = false;
            crate::debug!("synth"; "{} unchanged ({})", full_name, hash);
            return Ok(SynthOutcome::Unchanged { full_name });
        }

        let version = view.version.max(self.store.last_version(&full_name)) + 1;
        let type_name = versioned_name(&view.class_name, version);
        let source = emit::rename(
            &template,
            &view.class_name,
            view.namespace.as_deref(),
            &type_name,
        );

        view.emitted_source = Some(source);
        view.template_hash = hash;
        view.version = version;
        view.needs_rebuild = true;
        self.store.record_version(&full_name, version);
        crate::debug!("synth"; "{} -> {} ({})", full_name, type_name, hash);

        Ok(SynthOutcome::Rebuilt { full_name, version })
    }

    /// Build the name-agnostic merged unit.
    fn template(&self, view: &ViewClass) -> Result<String, SynthesisError> {
        let class_name = view.class_name.as_str();
        let behavior_path = view.behavior_path.clone().unwrap_or_default();
        let behavior_text = view.behavior_text.as_deref().unwrap_or_default();

        let primary = parse_fragment(behavior_text, class_name, &behavior_path)?;
        let partials = view
            .partials
            .iter()
            .map(|(path, text)| parse_fragment(text, class_name, path))
            .collect::<Result<Vec<_>, _>>()?;
        let aux = match (&view.aux_text, &view.aux_path) {
            (Some(text), Some(path)) => Some(self.live_fragment(view, text, path)?),
            _ => None,
        };

        Ok(emit::merge(&Parts {
            class_name,
            namespace: view.namespace.as_deref(),
            primary: &primary,
            partials: &partials,
            aux: aux.as_ref(),
        }))
    }

    /// Parse the generated fragment and point its markup load at the session.
    fn live_fragment(&self, view: &ViewClass, text: &str, path: &Path) -> Result<Fragment, SynthesisError> {
        let mut fragment = parse_fragment(text, &view.class_name, path)?;
        fragment.body = emit::rewrite_loader(
            &fragment.body,
            &self.loader,
            &self.config.session_loader,
            view.markup_text.as_deref().unwrap_or_default(),
        )
        .ok_or_else(|| SynthesisError::LoaderCallNotFound(path.to_path_buf()))?;
        Ok(fragment)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Reload every referenced stylesheet.
    ///
    /// A reference that no longer resolves keeps the sheet it last resolved
    /// to; references dropped from the markup are forgotten.
    fn reload_styles(&self, view: &mut ViewClass, markup_path: &Path, references: &[String]) {
        let mut sheets = FxHashMap::default();
        let mut resolved = FxHashMap::default();
        for reference in references {
            let Some(path) = self.styles.resolve(markup_path, reference) else {
                log!("style"; "stylesheet `{}` not found for {}", reference, markup_path.display());
                if let Some(prior) = view.style_refs.get(reference)
                    && let Some(text) = view.style_sheets.get(prior)
                {
                    sheets.insert(prior.clone(), text.clone());
                    resolved.insert(reference.clone(), prior.clone());
                }
                continue;
            };
            if let Some(text) = self.styles.load(&path) {
                sheets.insert(path.clone(), text);
            }
            resolved.insert(reference.clone(), path);
        }
        view.style_sheets = sheets;
        view.style_refs = resolved;
    }

    /// Best-effort regeneration of the behind-code; failures keep the prior fragment.
    fn regenerate(&self, view: &mut ViewClass, doc: &MarkupDocument) {
        let Some(aux) = view.aux_path.clone() else {
            return;
        };
        if let Err(e) = self.generator.regenerate(doc, &aux) {
            log!("synth"; "{}", e);
            return;
        }
        match std::fs::read_to_string(&aux) {
            Ok(text) => view.aux_text = Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                crate::debug!("synth"; "no generated fragment at {}", aux.display());
            }
            Err(e) => log!("synth"; "failed to read {}: {}", aux.display(), e),
        }
    }

    /// Pick the primary behavior document among the declaring documents.
    fn primary_behavior(&self, doc: &SourceDocument, decl: &ClassDeclaration) -> PathBuf {
        if self.markup_path_for(&doc.path).is_some() {
            return doc.path.clone();
        }
        decl.locations
            .iter()
            .find(|p| self.markup_path_for(p).is_some())
            .cloned()
            .unwrap_or_else(|| doc.path.clone())
    }

    fn markup_path_for(&self, behavior: &Path) -> Option<PathBuf> {
        markup_path_for(
            behavior,
            &self.config.markup_extension,
            &self.config.source_extension,
        )
    }
}

fn parse_fragment(text: &str, class_name: &str, path: &Path) -> Result<Fragment, SynthesisError> {
    fragment::parse(text, class_name).map_err(|issue| SynthesisError::Fragment {
        path: path.to_path_buf(),
        issue,
    })
}

fn read_partial(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .inspect_err(|e| log!("synth"; "failed to read partial {}: {}", path.display(), e))
        .ok()
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

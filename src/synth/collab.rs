//! Collaborators the synthesizer consumes.
//!
//! - [`SyntaxProvider`]: which class a source document declares, and every
//!   document that declares a part of it.
//! - [`MarkupGenerator`]: regenerates the behind-code fragment of a markup
//!   document.
//!
//! Both are chosen once when the session starts.

use std::path::{Path, PathBuf};

use jwalk::WalkDir;

use super::{
    error::GeneratorError,
    fragment::{self, ClassDecl},
    markup::MarkupDocument,
};
use crate::{style::find_project_root, utils::exec::Cmd};

/// A behavior or partial source document as delivered by an edit event.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub text: String,
}

impl SourceDocument {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    pub fn read(path: &Path) -> std::io::Result<Self> {
        Ok(Self::new(path, std::fs::read_to_string(path)?))
    }
}

/// Identity of a declared class and where its parts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDeclaration {
    pub name: String,
    pub namespace: Option<String>,
    /// Every document declaring part of the class, sorted.
    pub locations: Vec<PathBuf>,
}

impl ClassDeclaration {
    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

// ============================================================================
// Syntax provider
// ============================================================================

pub trait SyntaxProvider: Send + Sync {
    /// Describe the class declared by `doc`, if any.
    fn declaration(&self, doc: &SourceDocument) -> Option<ClassDeclaration>;
}

/// Finds partial declarations by scanning the project's source files.
///
/// The scan is bounded by the nearest directory carrying a root marker; when
/// none exists only the document's own directory is scanned.
pub struct ScanningProvider {
    source_extension: String,
    root_markers: Vec<String>,
}

impl ScanningProvider {
    pub fn new(source_extension: impl Into<String>, root_markers: Vec<String>) -> Self {
        Self {
            source_extension: source_extension.into(),
            root_markers,
        }
    }

    fn scan_root(&self, doc_path: &Path) -> PathBuf {
        let dir = doc_path.parent().unwrap_or(Path::new("."));
        find_project_root(dir, &self.root_markers).unwrap_or_else(|| dir.to_path_buf())
    }

    fn is_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.source_extension))
    }
}

impl SyntaxProvider for ScanningProvider {
    fn declaration(&self, doc: &SourceDocument) -> Option<ClassDeclaration> {
        let outline = fragment::outline(&doc.text).ok()?;
        let decl = primary_class(&outline.classes)?;
        let mut locations = vec![doc.path.clone()];

        if decl.is_partial() {
            let full_name = decl.full_name();
            let mut others: Vec<_> = WalkDir::new(self.scan_root(&doc.path))
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .map(|e| e.path())
                .filter(|p| self.is_source(p) && *p != doc.path)
                .filter(|p| declares_partial(p, &full_name))
                .collect();
            locations.append(&mut others);
        }
        locations.sort();
        locations.dedup();

        Some(ClassDeclaration {
            name: decl.name.clone(),
            namespace: decl.namespace.clone(),
            locations,
        })
    }
}

/// The first partial class wins; otherwise the first class.
fn primary_class(classes: &[ClassDecl]) -> Option<&ClassDecl> {
    classes
        .iter()
        .find(|c| c.is_partial())
        .or_else(|| classes.first())
}

fn declares_partial(path: &Path, full_name: &str) -> bool {
    let Ok(text) = std::fs::read_to_string(path) else {
        return false;
    };
    fragment::outline(&text).is_ok_and(|outline| {
        outline
            .classes
            .iter()
            .any(|c| c.is_partial() && c.full_name() == full_name)
    })
}

// ============================================================================
// Markup generator
// ============================================================================

pub trait MarkupGenerator: Send + Sync {
    /// Regenerate the behind-code fragment for `doc` at `output`.
    fn regenerate(&self, doc: &MarkupDocument, output: &Path) -> Result<(), GeneratorError>;
}

/// Uses whatever generated fragment the build already left on disk.
pub struct NoopGenerator;

impl MarkupGenerator for NoopGenerator {
    fn regenerate(&self, _doc: &MarkupDocument, _output: &Path) -> Result<(), GeneratorError> {
        Ok(())
    }
}

/// Runs a configured command; `{markup}` and `{output}` are substituted.
pub struct CommandGenerator {
    command: Vec<String>,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn expand(&self, markup: &Path, output: &Path) -> Vec<String> {
        let markup = markup.to_string_lossy();
        let output = output.to_string_lossy();
        self.command
            .iter()
            .map(|part| part.replace("{markup}", &markup).replace("{output}", &output))
            .collect()
    }
}

impl MarkupGenerator for CommandGenerator {
    fn regenerate(&self, doc: &MarkupDocument, output: &Path) -> Result<(), GeneratorError> {
        if self.command.is_empty() {
            return Err(GeneratorError::NotConfigured);
        }
        let argv = self.expand(&doc.path, output);
        crate::debug!("synth"; "generator: {}", argv.join(" "));

        Cmd::from_slice(&argv)
            .run()
            .map(|_| ())
            .map_err(|e| GeneratorError::Failed {
                path: doc.path.clone(),
                message: e.to_string(),
            })
    }
}

/// Pick the generator for a configured command line.
pub fn generator_for(command: &[String]) -> Box<dyn MarkupGenerator> {
    if command.is_empty() {
        Box::new(NoopGenerator)
    } else {
        Box::new(CommandGenerator::new(command.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provider() -> ScanningProvider {
        ScanningProvider::new("cs", vec!["*.csproj".into()])
    }

    fn write(root: &Path, rel: &str, text: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_declaration_collects_partials() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "App.csproj", "<Project />");
        let behavior = write(
            root,
            "Views/MainPage.xaml.cs",
            "namespace Demo.Views { public partial class MainPage : ContentPage { } }",
        );
        let partial = write(
            root,
            "Views/MainPage.Events.cs",
            "namespace Demo.Views { partial class MainPage { void OnTap() { } } }",
        );
        write(
            root,
            "Other/MainPage.cs",
            "namespace Demo.Other { partial class MainPage { } }",
        );

        let doc = SourceDocument::read(&behavior).unwrap();
        let decl = provider().declaration(&doc).unwrap();

        assert_eq!(decl.name, "MainPage");
        assert_eq!(decl.full_name(), "Demo.Views.MainPage");
        let mut expected = vec![behavior, partial];
        expected.sort();
        assert_eq!(decl.locations, expected);
    }

    #[test]
    fn test_non_partial_class_has_single_location() {
        let doc = SourceDocument::new("/nowhere/Solo.cs", "namespace A { class Solo { } }");
        let decl = provider().declaration(&doc).unwrap();
        assert_eq!(decl.locations, [PathBuf::from("/nowhere/Solo.cs")]);
    }

    #[test]
    fn test_no_class_declared() {
        let doc = SourceDocument::new("/nowhere/Empty.cs", "using System;");
        assert_eq!(provider().declaration(&doc), None);
    }

    #[test]
    fn test_command_generator_expands_placeholders() {
        let generator =
            CommandGenerator::new(vec!["xamlg".into(), "{markup}".into(), "-o={output}".into()]);
        assert_eq!(
            generator.expand(Path::new("A.xaml"), Path::new("A.xaml.g.cs")),
            ["xamlg", "A.xaml", "-o=A.xaml.g.cs"]
        );
    }

    #[test]
    fn test_command_generator_not_configured() {
        let doc = MarkupDocument::new("A.xaml", "<A />");
        let result = CommandGenerator::new(Vec::new()).regenerate(&doc, Path::new("A.xaml.g.cs"));
        assert!(matches!(result, Err(GeneratorError::NotConfigured)));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_generator_writes_output() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("A.xaml.g.cs");
        let generator = CommandGenerator::new(vec![
            "sh".into(),
            "-c".into(),
            "echo generated > \"$0\"".into(),
            "{output}".into(),
        ]);

        generator
            .regenerate(&MarkupDocument::new("A.xaml", "<A />"), &output)
            .unwrap();
        assert_eq!(std::fs::read_to_string(output).unwrap().trim(), "generated");
    }
}

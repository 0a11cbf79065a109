//! A line-oriented reference engine.
//!
//! Every Input Unit is a text file. Lines starting with `@` are directives:
//!
//! ```text
//! @import "lib/a.kl"     declares a dependency, relative to this unit
//! @error message         reports an error at this line
//! @warn message          reports a warning
//! @suggest message       reports a suggestion
//! @note message          reports an informational message
//! ```
//!
//! All other lines form the unit's body. The output of a unit is a header
//! naming the unit and, for each import, the hash of the imported unit's
//! output, followed by the body with trailing whitespace stripped and blank
//! lines dropped. A unit's output therefore changes exactly when its own
//! body or the output of something it imports changes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use kiln_cache::{ArtifactKind, ChangeSet};
use kiln_common::path::resolve_relative;
use kiln_common::{ContentHash, FileSystem};
use kiln_config::ResolvedProject;
use kiln_diagnostics::{Category, Diagnostic, DiagnosticCode, Location};
use serde::Serialize;

use crate::engine::{AnalysisEngine, AnalysisError, PlannedArtifact};

const ROOT_MISSING: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 1);
const IMPORT_MISSING: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 2);
const IMPORT_OUTSIDE: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 3);
const IMPORT_CYCLE: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 4);
const MALFORMED_DIRECTIVE: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 5);
const UNKNOWN_DIRECTIVE: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 6);
const UNREADABLE: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 7);
const OUTPUT_COLLISION: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 8);
const INVALID_UTF8: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 9);
const USER_ERROR: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 10);
const USER_WARNING: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 11);
const USER_SUGGESTION: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 12);
const USER_NOTE: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 13);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Import {
    target: PathBuf,
    line: u32,
    column: u32,
}

/// One parsed Input Unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUnit {
    fingerprint: ContentHash,
    imports: Vec<Import>,
    body: Vec<(u32, String)>,
    diagnostics: Vec<Diagnostic>,
}

impl ParsedUnit {
    /// Parses the text of the unit at logical path `path`.
    pub fn parse(path: &Path, text: &str) -> Self {
        Self::parse_text(path, text, ContentHash::from_bytes(text.as_bytes()))
    }

    /// Parses raw file contents.
    ///
    /// The fingerprint is taken over the bytes as read, matching the change
    /// detector's. Invalid UTF-8 sequences are replaced and reported once, at
    /// the line holding the first of them.
    pub fn parse_bytes(path: &Path, bytes: &[u8]) -> Self {
        let fingerprint = ContentHash::from_bytes(bytes);
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::parse_text(path, text, fingerprint),
            Err(e) => {
                let valid = &bytes[..e.valid_up_to()];
                let line = valid.iter().filter(|&&b| b == b'\n').count() as u32 + 1;
                let column =
                    valid.iter().rev().take_while(|&&b| b != b'\n').count() as u32 + 1;
                let mut unit =
                    Self::parse_text(path, &String::from_utf8_lossy(bytes), fingerprint);
                unit.diagnostics.insert(
                    0,
                    Diagnostic::warning(INVALID_UTF8, "unit is not valid UTF-8")
                        .with_location(Location::new(path, line, column))
                        .with_note("invalid bytes were replaced with U+FFFD"),
                );
                unit
            }
        }
    }

    fn parse_text(path: &Path, text: &str, fingerprint: ContentHash) -> Self {
        let mut unit = ParsedUnit {
            fingerprint,
            imports: Vec::new(),
            body: Vec::new(),
            diagnostics: Vec::new(),
        };

        for (index, raw) in text.lines().enumerate() {
            let line = index as u32 + 1;
            let trimmed = raw.trim_start();
            let Some(directive) = trimmed.strip_prefix('@') else {
                let body = raw.trim_end();
                if !body.is_empty() {
                    unit.body.push((line, body.to_string()));
                }
                continue;
            };

            let indent = column_of(raw, raw.len() - trimmed.len());
            let at = |column: u32| Location::new(path, line, column);
            let (name, rest) = directive
                .split_once(char::is_whitespace)
                .map(|(n, r)| (n, r.trim()))
                .unwrap_or((directive, ""));

            let diag = match name {
                "import" => {
                    let column = raw.find('"').map_or(indent, |i| column_of(raw, i));
                    match parse_quoted(rest) {
                        None => Some(
                            Diagnostic::error(MALFORMED_DIRECTIVE, "malformed import")
                                .with_location(at(indent))
                                .with_help("write imports as @import \"relative/path\""),
                        ),
                        Some(target) => match resolve_relative(path, Path::new(target)) {
                            Some(target) => {
                                unit.imports.push(Import {
                                    target,
                                    line,
                                    column,
                                });
                                None
                            }
                            None => Some(
                                Diagnostic::error(
                                    IMPORT_OUTSIDE,
                                    format!("import \"{target}\" is outside the project"),
                                )
                                .with_location(at(column)),
                            ),
                        },
                    }
                }
                "error" => Some(Diagnostic::error(USER_ERROR, rest)),
                "warn" => Some(Diagnostic::warning(USER_WARNING, rest)),
                "suggest" => Some(Diagnostic::suggestion(USER_SUGGESTION, rest)),
                "note" => Some(Diagnostic::info(USER_NOTE, rest)),
                other => Some(Diagnostic::warning(
                    UNKNOWN_DIRECTIVE,
                    format!("unknown directive @{other}"),
                )),
            };
            if let Some(diag) = diag {
                let diag = if diag.location.is_none() {
                    diag.with_location(at(indent))
                } else {
                    diag
                };
                unit.diagnostics.push(diag);
            }
        }
        unit
    }

    /// Logical paths this unit imports, in declaration order.
    pub fn imports(&self) -> impl Iterator<Item = &Path> {
        self.imports.iter().map(|i| i.target.as_path())
    }
}

fn column_of(raw: &str, byte_offset: usize) -> u32 {
    raw[..byte_offset].chars().count() as u32 + 1
}

fn parse_quoted(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('"')?;
    let end = inner.find('"')?;
    let (target, trailing) = (&inner[..end], inner[end + 1..].trim());
    (!target.is_empty() && trailing.is_empty()).then_some(target)
}

/// The analyzed state of a text project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextProgram {
    units: BTreeMap<PathBuf, ParsedUnit>,
    missing: BTreeSet<PathBuf>,
    problems: Vec<Diagnostic>,
    reparsed: BTreeSet<PathBuf>,
}

impl TextProgram {
    /// Logical paths of every analyzed unit.
    pub fn unit_paths(&self) -> impl Iterator<Item = &Path> {
        self.units.keys().map(PathBuf::as_path)
    }

    /// Units parsed from disk in the cycle that produced this program.
    pub fn reparsed(&self) -> &BTreeSet<PathBuf> {
        &self.reparsed
    }

    /// Returns `true` if `target` can reach `unit` over import edges.
    fn reaches(&self, target: &Path, unit: &Path) -> bool {
        let mut seen = BTreeSet::new();
        let mut stack = vec![target];
        while let Some(next) = stack.pop() {
            if next == unit {
                return true;
            }
            if !seen.insert(next) {
                continue;
            }
            if let Some(parsed) = self.units.get(next) {
                stack.extend(parsed.imports());
            }
        }
        false
    }
}

struct Rendered {
    text: String,
    lines: Vec<[u32; 2]>,
}

#[derive(Serialize)]
struct LineMap<'a> {
    version: u32,
    unit: &'a Path,
    output: String,
    mappings: &'a [[u32; 2]],
}

struct Renderer<'p> {
    program: &'p TextProgram,
    done: BTreeMap<&'p Path, (ContentHash, Rendered)>,
}

impl<'p> Renderer<'p> {
    fn hash_of(&mut self, path: &'p Path) -> ContentHash {
        if let Some((hash, _)) = self.done.get(path) {
            return *hash;
        }
        let rendered = self.render(path);
        let hash = ContentHash::from_bytes(rendered.text.as_bytes());
        self.done.insert(path, (hash, rendered));
        hash
    }

    /// Imports that close a cycle are rendered as `cycle`, so recursion only
    /// follows acyclic edges.
    fn render(&mut self, path: &'p Path) -> Rendered {
        let program = self.program;
        let mut text = format!("# kiln: {}\n", path.display());
        let mut lines = Vec::new();
        let Some(unit) = program.units.get(path) else {
            return Rendered { text, lines };
        };
        for import in &unit.imports {
            let target = import.target.as_path();
            let marker = if !program.units.contains_key(target) {
                "missing".to_string()
            } else if program.reaches(target, path) {
                "cycle".to_string()
            } else {
                self.hash_of(target).to_string()
            };
            text.push_str(&format!("# import {} {marker}\n", target.display()));
        }
        let header = text.lines().count() as u32;
        for (i, (source_line, body)) in unit.body.iter().enumerate() {
            text.push_str(body);
            text.push('\n');
            lines.push([header + i as u32 + 1, *source_line]);
        }
        Rendered { text, lines }
    }
}

/// The reference [`AnalysisEngine`] for line-oriented text units.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextEngine;

impl TextEngine {
    /// Creates the engine.
    pub fn new() -> Self {
        Self
    }
}

impl AnalysisEngine for TextEngine {
    type Program = TextProgram;

    fn create_or_update_program(
        &self,
        project: &ResolvedProject,
        prior: Option<&TextProgram>,
        changes: &ChangeSet,
        fs: &dyn FileSystem,
    ) -> Result<TextProgram, AnalysisError> {
        let mut program = TextProgram::default();
        let roots: BTreeSet<&Path> = project.roots.iter().map(PathBuf::as_path).collect();
        let mut queue: VecDeque<PathBuf> = project.roots.iter().cloned().collect();
        let mut seen = BTreeSet::new();

        while let Some(path) = queue.pop_front() {
            if !seen.insert(path.clone()) {
                continue;
            }

            let reusable = match (prior, changes.fingerprints.get(&path)) {
                (Some(prior), Some(fp)) => prior.units.get(&path).filter(|u| u.fingerprint == *fp),
                _ => None,
            };
            let parsed = match reusable {
                Some(parsed) => parsed.clone(),
                None => match fs.read(&project.absolute(&path)) {
                    Ok(bytes) => {
                        program.reparsed.insert(path.clone());
                        ParsedUnit::parse_bytes(&path, &bytes)
                    }
                    Err(e) => {
                        if !e.is_not_found() {
                            program.problems.push(Diagnostic::error(
                                UNREADABLE,
                                format!("cannot read {}: {e}", path.display()),
                            ));
                        } else if roots.contains(path.as_path()) {
                            program.problems.push(Diagnostic::error(
                                ROOT_MISSING,
                                format!("root unit {} does not exist", path.display()),
                            ));
                        }
                        program.missing.insert(path);
                        continue;
                    }
                },
            };

            queue.extend(parsed.imports.iter().map(|i| i.target.clone()));
            program.units.insert(path, parsed);
        }

        let mut owners: BTreeMap<PathBuf, &Path> = BTreeMap::new();
        for path in program.units.keys() {
            let output = project.output_path(path);
            match owners.get(&output) {
                Some(first) => program.problems.push(Diagnostic::error(
                    OUTPUT_COLLISION,
                    format!(
                        "{} and {} both produce {}; only the first is emitted",
                        first.display(),
                        path.display(),
                        output.display()
                    ),
                )),
                None => {
                    owners.insert(output, path);
                }
            }
        }

        tracing::debug!(
            units = program.units.len(),
            reparsed = program.reparsed.len(),
            missing = program.missing.len(),
            "text program built"
        );
        Ok(program)
    }

    fn diagnostics(&self, program: &TextProgram) -> Vec<Diagnostic> {
        let mut out = program.problems.clone();
        for (path, unit) in &program.units {
            out.extend(unit.diagnostics.iter().cloned());
            for import in &unit.imports {
                let at = Location::new(path, import.line, import.column);
                if program.missing.contains(&import.target) {
                    out.push(
                        Diagnostic::error(
                            IMPORT_MISSING,
                            format!("cannot find imported unit \"{}\"", import.target.display()),
                        )
                        .with_location(at),
                    );
                } else if program.reaches(&import.target, path) {
                    out.push(
                        Diagnostic::warning(
                            IMPORT_CYCLE,
                            format!("import of {} forms a cycle", import.target.display()),
                        )
                        .with_location(at),
                    );
                }
            }
        }
        out
    }

    fn emit_plan(&self, project: &ResolvedProject, program: &TextProgram) -> Vec<PlannedArtifact> {
        let mut renderer = Renderer {
            program,
            done: BTreeMap::new(),
        };
        for path in program.units.keys() {
            renderer.hash_of(path);
        }

        let source_map = project.config.build.source_map;
        let map_extension = format!("{}.map", project.config.build.out_extension);
        let mut claimed: BTreeSet<PathBuf> = BTreeSet::new();
        let mut plan = Vec::new();

        for (path, (_, rendered)) in &renderer.done {
            let output = project.output_path(path);
            if !claimed.insert(output.clone()) {
                tracing::warn!(unit = %path.display(), output = %output.display(), "output path collision");
                continue;
            }
            let sources = BTreeSet::from([path.to_path_buf()]);
            let stale = program.reparsed.contains(*path);

            if source_map {
                let map = LineMap {
                    version: 1,
                    unit: *path,
                    output: output
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    mappings: &rendered.lines,
                };
                plan.push(PlannedArtifact {
                    path: output.with_extension(&map_extension),
                    content: serde_json::to_vec(&map).unwrap_or_default(),
                    sources: sources.clone(),
                    kind: ArtifactKind::SourceMap,
                    stale,
                });
            }

            plan.push(PlannedArtifact {
                path: output,
                content: rendered.text.clone().into_bytes(),
                sources,
                kind: ArtifactKind::Output,
                stale,
            });
        }
        plan
    }

    fn units(&self, program: &TextProgram) -> BTreeMap<PathBuf, BTreeSet<PathBuf>> {
        program
            .units
            .iter()
            .map(|(path, unit)| (path.clone(), unit.imports().map(Path::to_path_buf).collect()))
            .collect()
    }
}

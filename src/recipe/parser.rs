// src/recipe/parser.rs

//! Descriptor loading
//!
//! The loader walks the text line by line with a stack of open `%if` blocks.
//! Blocks whose condition folds to false are skipped, blocks that depend on
//! a feature flag attach that condition to every item read inside them.
//! Macros are expanded as each line is read, so the resulting
//! [`Descriptor`] holds final strings.

use crate::error::{Error, Result};
use crate::features::{Condition, FeatureFlag, FeatureSet};
use crate::recipe::changelog::ChangeLog;
use crate::recipe::deps::{DependencyKind, DependencySet, parse_dependency_list, parse_provides_list};
use crate::recipe::expr::{self, Folded};
use crate::recipe::files::{EntryKind, InstallManifest};
use crate::recipe::format::{
    Descriptor, MacroDefinition, MacroKind, PackageSection, SourceEntry,
};
use crate::recipe::macros::MacroTable;
use crate::recipe::phases::{BuildPhase, BuildRecipe, CommandSplitter, Phase};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

static TAG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9]*)(?:\(([^)]*)\))?\s*:\s*(.*)$").unwrap()
});

static NUMBERED_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(source|patch)(\d*)$").unwrap());

/// Settings that influence how a descriptor is loaded
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Extra macros, like `rpmbuild -D 'NAME VALUE'`
    pub defines: BTreeMap<String, String>,
    /// Target distribution channel recorded on the package
    pub channel: Option<String>,
    /// Architecture for `%ifarch` and `%{_arch}`
    pub arch: String,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            defines: BTreeMap::new(),
            channel: None,
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

impl LoadOptions {
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(name.into(), value.into());
        self
    }
}

/// Parse a descriptor from text
pub fn parse_descriptor(text: &str, options: &LoadOptions) -> Result<Descriptor> {
    let mut loader = Loader::new(options);
    let mut last = 0;
    for (idx, raw) in text.lines().enumerate() {
        last = idx + 1;
        loader.line(last, raw)?;
    }
    loader.finish(last)
}

/// Parse a descriptor from a file
pub fn parse_descriptor_file(path: &Path, options: &LoadOptions) -> Result<Descriptor> {
    let content = std::fs::read_to_string(path)?;
    debug!("Loading descriptor {}", path.display());
    parse_descriptor(&content, options)
}

/// Check a loaded descriptor for completeness
///
/// Returns lint warnings; an empty name or version is an error.
pub fn validate_descriptor(descriptor: &Descriptor) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    let pkg = &descriptor.package;

    if pkg.name.trim().is_empty() {
        return Err(Error::Config("package name cannot be empty".to_string()));
    }
    if pkg.version.trim().is_empty() {
        return Err(Error::Config("package version cannot be empty".to_string()));
    }

    if pkg.summary.is_empty() {
        warnings.push("Missing package summary".to_string());
    }
    if pkg.license.is_empty() {
        warnings.push("Missing package license".to_string());
    }
    if pkg.url.is_none() {
        warnings.push("Missing upstream URL".to_string());
    }
    if pkg.description.trim().is_empty() {
        warnings.push("Missing %description".to_string());
    }
    if pkg.sources.is_empty() {
        warnings.push("No Source tag".to_string());
    }
    if descriptor.recipe.is_empty() {
        warnings.push("No build phases".to_string());
    }

    if descriptor.files.is_empty() {
        warnings.push("Empty %files section".to_string());
    }
    for entry in &descriptor.files.entries {
        let relative_ok = matches!(entry.kind, EntryKind::Doc | EntryKind::License);
        if !entry.path.starts_with('/') && !relative_ok {
            warnings.push(format!("%files entry '{}' is not an absolute path", entry.path));
        }
    }

    if !descriptor.changelog.is_newest_first() {
        warnings.push("%changelog entries are not in newest-first order".to_string());
    }
    if let Some(latest) = descriptor.changelog.latest() {
        let evr = pkg.evr();
        let vr = format!("{}-{}", pkg.version, pkg.release);
        if latest.version != evr && latest.version != vr {
            warnings.push(format!(
                "Latest changelog entry is for {}, package is {}",
                latest.version, evr
            ));
        }
    }

    // Flags that are declared but never used, and the other way round
    let mut referenced: HashSet<String> = HashSet::new();
    let mut note = |c: Option<&Condition>| {
        if let Some(c) = c {
            referenced.extend(c.flags().into_iter().map(str::to_string));
        }
    };
    descriptor.dependencies.references.iter().for_each(|d| note(d.condition.as_ref()));
    descriptor.dependencies.provides.iter().for_each(|p| note(p.condition.as_ref()));
    for phase in descriptor.recipe.iter() {
        note(phase.condition.as_ref());
        phase.commands.iter().for_each(|c| note(c.condition.as_ref()));
    }
    descriptor.files.entries.iter().for_each(|e| note(e.condition.as_ref()));

    for flag in descriptor.features.iter() {
        if !referenced.contains(&flag.name) {
            warnings.push(format!("Feature flag '{}' is never used", flag.name));
        }
    }
    let mut undeclared: Vec<&String> = referenced
        .iter()
        .filter(|name| descriptor.features.get(name).is_none())
        .collect();
    undeclared.sort();
    for name in undeclared {
        warnings.push(format!("Feature '{}' is used but never declared", name));
    }

    Ok(warnings)
}

/// One open `%if` block
#[derive(Debug)]
struct Frame {
    line: usize,
    /// Whether the enclosing blocks were live when this one opened
    live: bool,
    /// Disjunction of the branches seen so far
    taken: Folded,
    /// Condition of the branch being read
    current: Folded,
    seen_else: bool,
}

#[derive(Debug)]
enum SectionKind {
    Preamble,
    Description(Vec<String>),
    Phase(BuildPhase, CommandSplitter),
    Files,
    Changelog(Vec<(usize, String)>),
}

#[derive(Debug)]
struct Section {
    kind: SectionKind,
    header_line: usize,
    /// Number of `%if` frames open at the header
    depth: usize,
    /// Condition in force at the header
    base: Option<Condition>,
    /// Line of the `%endif` that closed a block opened before the header
    closed_at: Option<usize>,
}

impl Section {
    fn preamble() -> Self {
        Self {
            kind: SectionKind::Preamble,
            header_line: 0,
            depth: 0,
            base: None,
            closed_at: None,
        }
    }
}

struct Loader<'o> {
    options: &'o LoadOptions,
    macros: MacroTable,
    frames: Vec<Frame>,
    section: Section,

    package: PackageSection,
    macro_defs: Vec<MacroDefinition>,
    features: FeatureSet,
    dependencies: DependencySet,
    recipe: BuildRecipe,
    files: InstallManifest,
    changelog: ChangeLog,

    seen_tags: HashSet<String>,
    seen_sections: HashSet<&'static str>,
}

impl<'o> Loader<'o> {
    fn new(options: &'o LoadOptions) -> Self {
        let mut macros = MacroTable::with_builtins(&options.arch);
        macros.define("buildroot", "$RPM_BUILD_ROOT");
        macros.define("_builddir", "$RPM_BUILD_DIR");
        macros.define("_sourcedir", "$RPM_SOURCE_DIR");
        for (name, value) in &options.defines {
            macros.define(name, value);
        }

        Self {
            options,
            macros,
            frames: Vec::new(),
            section: Section::preamble(),
            package: PackageSection {
                channel: options.channel.clone(),
                ..Default::default()
            },
            macro_defs: Vec::new(),
            features: FeatureSet::new(),
            dependencies: DependencySet::new(),
            recipe: BuildRecipe::new(),
            files: InstallManifest::new(),
            changelog: ChangeLog::new(),
            seen_tags: HashSet::new(),
            seen_sections: HashSet::new(),
        }
    }

    fn line(&mut self, line: usize, raw: &str) -> Result<()> {
        let trimmed = raw.trim();
        let directive = directive_word(trimmed);

        if let Some((word, rest)) = directive
            && matches!(word, "if" | "elif" | "ifarch" | "ifnarch" | "else" | "endif")
        {
            return self.conditional(line, word, rest);
        }
        if !self.is_live() {
            return Ok(());
        }

        if let Some((word, rest)) = directive {
            match word {
                "global" | "define" => return self.define_macro(line, word, rest),
                "undefine" => {
                    self.require_unconditional(line, "%undefine")?;
                    let name = rest.trim();
                    self.macros.undefine(name);
                    self.macro_defs.retain(|m| m.name != name);
                    return Ok(());
                }
                "bcond_with" | "bcond_without" | "bcond" => {
                    return self.declare_flag(line, word, rest);
                }
                "description" | "prep" | "build" | "install" | "check" | "files"
                | "changelog" => return self.begin_section(line, word, rest),
                "package" | "pre" | "post" | "preun" | "postun" | "pretrans" | "posttrans"
                | "triggerin" | "triggerun" | "triggerpostun" | "verifyscript" | "clean"
                | "conf" | "generate_buildrequires" | "sourcelist" | "patchlist" => {
                    return Err(Error::parse(
                        line,
                        format!("unsupported section %{}", word),
                        "%description, %prep, %build, %install, %check, %files or %changelog",
                    ));
                }
                _ => {}
            }
        }

        self.content(line, raw)
    }

    fn is_live(&self) -> bool {
        self.frames.iter().all(|f| f.current != Folded::Const(false))
    }

    /// Conjunction of the feature conditions of frames from `depth` on
    fn condition_from(&self, depth: usize) -> Option<Condition> {
        self.frames
            .iter()
            .skip(depth)
            .filter_map(|f| match &f.current {
                Folded::Cond(c) => Some(c.clone()),
                Folded::Const(_) => None,
            })
            .fold(None, |acc, c| Condition::and_opt(acc, Some(c)))
    }

    fn require_unconditional(&self, line: usize, what: &str) -> Result<()> {
        if self.condition_from(0).is_some() {
            return Err(Error::parse(
                line,
                format!("{} cannot depend on a feature flag", what),
                format!("{} outside feature-gated %if blocks", what),
            ));
        }
        Ok(())
    }

    fn expand(&self, text: &str, line: usize) -> Result<String> {
        if let Some(flag) = expr::feature_reference(text) {
            return Err(Error::parse(
                line,
                format!("feature '{}' referenced outside an %if expression", flag),
                "%if %{with NAME} ... %endif around the gated text",
            ));
        }
        self.macros
            .expand(text)
            .map_err(|e| Error::parse(line, e.to_string(), "balanced macro references"))
    }

    fn conditional(&mut self, line: usize, word: &str, rest: &str) -> Result<()> {
        let live = self.is_live();
        match word {
            "if" | "ifarch" | "ifnarch" => {
                let folded = if !live {
                    Folded::Const(false)
                } else if word == "if" {
                    self.evaluate(rest, line)?
                } else {
                    let arches = self.expand(rest, line)?;
                    let matched = arches
                        .split(|c: char| c.is_whitespace() || c == ',')
                        .any(|a| a == self.options.arch);
                    Folded::Const(matched == (word == "ifarch"))
                };
                self.frames.push(Frame {
                    line,
                    live,
                    taken: folded.clone(),
                    current: folded,
                    seen_else: false,
                });
            }
            "elif" | "else" => {
                let in_section = self.frames.len() <= self.section.depth
                    && !matches!(self.section.kind, SectionKind::Preamble);
                let Some(frame) = self.frames.last() else {
                    return Err(Error::parse(line, format!("%{} without %if", word), "%if before %else"));
                };
                if frame.seen_else {
                    return Err(Error::parse(
                        line,
                        format!("%{} after %else", word),
                        "at most one %else per %if, after any %elif",
                    ));
                }
                if in_section && matches!(frame.taken, Folded::Cond(_)) {
                    return Err(Error::parse(
                        line,
                        format!("%{} switches a feature block that contains a section header", word),
                        "%if/%endif enclosing whole sections without %else",
                    ));
                }
                let branch = match (frame.live, word) {
                    (false, _) => Folded::Const(false),
                    (true, "elif") => self.evaluate(rest, line)?,
                    (true, _) => Folded::Const(true),
                };
                let Some(frame) = self.frames.last_mut() else {
                    return Ok(());
                };
                let current = frame.taken.clone().not().and(branch.clone());
                frame.taken = frame.taken.clone().or(branch);
                frame.current = if frame.live { current } else { Folded::Const(false) };
                frame.seen_else = word == "else";
            }
            _ => {
                let Some(frame) = self.frames.pop() else {
                    return Err(Error::parse(line, "%endif without %if", "%if before %endif"));
                };
                if self.frames.len() < self.section.depth {
                    self.section.depth = self.frames.len();
                    if matches!(frame.current, Folded::Cond(_)) {
                        self.section.closed_at = Some(line);
                    }
                }
            }
        }
        Ok(())
    }

    fn evaluate(&self, expr_text: &str, line: usize) -> Result<Folded> {
        expr::evaluate_if(expr_text, &self.macros).map_err(|e| {
            Error::parse(
                line,
                e.to_string(),
                "an expression of numbers, \"strings\", %{with NAME}, ==, !=, <, >, !, && and ||",
            )
        })
    }

    fn define_macro(&mut self, line: usize, word: &str, rest: &str) -> Result<()> {
        const EXPECTED: &str = "%global NAME BODY";
        self.require_unconditional(line, &format!("%{}", word))?;

        let rest = rest.trim();
        let (name, body) = match rest.split_once(char::is_whitespace) {
            Some((n, b)) => (n, b.trim()),
            None => (rest, ""),
        };
        if name.is_empty() {
            return Err(Error::parse(line, "missing macro name", EXPECTED));
        }
        if name.contains('(') {
            return Err(Error::parse(line, "parametric macros are not supported", EXPECTED));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::parse(line, format!("invalid macro name '{}'", name), EXPECTED));
        }

        let (kind, stored) = if word == "global" {
            (MacroKind::Global, self.expand(body, line)?)
        } else {
            if let Some(flag) = expr::feature_reference(body) {
                return Err(Error::parse(
                    line,
                    format!("feature '{}' referenced outside an %if expression", flag),
                    EXPECTED,
                ));
            }
            (MacroKind::Define, body.to_string())
        };

        self.macros.define(name, &stored);
        self.macro_defs.retain(|m| m.name != name);
        self.macro_defs.push(MacroDefinition {
            kind,
            name: name.to_string(),
            body: stored,
        });
        Ok(())
    }

    fn declare_flag(&mut self, line: usize, word: &str, rest: &str) -> Result<()> {
        const EXPECTED: &str = "%bcond_with NAME, %bcond_without NAME or %bcond NAME DEFAULT";
        self.require_unconditional(line, &format!("%{}", word))?;

        let mut parts = rest.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| Error::parse(line, "missing feature name", EXPECTED))?;
        let default = match word {
            "bcond_with" => false,
            "bcond_without" => true,
            _ => {
                let default_expr = parts.by_ref().collect::<Vec<_>>().join(" ");
                if default_expr.is_empty() {
                    return Err(Error::parse(line, "missing default for %bcond", EXPECTED));
                }
                match self.evaluate(&default_expr, line)? {
                    Folded::Const(b) => b,
                    Folded::Cond(_) => {
                        return Err(Error::parse(
                            line,
                            "a feature default cannot depend on another feature",
                            EXPECTED,
                        ));
                    }
                }
            }
        };
        if word != "bcond" && parts.next().is_some() {
            return Err(Error::parse(line, "unexpected text after feature name", EXPECTED));
        }

        self.features
            .declare(FeatureFlag::new(name, default))
            .map_err(|e| Error::parse(line, e.to_string(), "each feature declared once"))
    }

    fn begin_section(&mut self, line: usize, word: &str, rest: &str) -> Result<()> {
        self.flush_section()?;

        let name: &'static str = match word {
            "description" => "description",
            "prep" => "prep",
            "build" => "build",
            "install" => "install",
            "check" => "check",
            "files" => "files",
            _ => "changelog",
        };
        if !rest.trim().is_empty() {
            return Err(Error::parse(
                line,
                format!("arguments to %{} are not supported (no subpackages)", name),
                format!("%{} on a line of its own", name),
            ));
        }
        if !self.seen_sections.insert(name) {
            return Err(Error::parse(
                line,
                format!("second %{} section", name),
                format!("at most one %{} section", name),
            ));
        }

        let base = self.condition_from(0);
        let kind = match name {
            "description" | "changelog" if base.is_some() => {
                return Err(Error::parse(
                    line,
                    format!("%{} cannot depend on a feature flag", name),
                    format!("%{} outside feature-gated %if blocks", name),
                ));
            }
            "description" => SectionKind::Description(Vec::new()),
            "changelog" => SectionKind::Changelog(Vec::new()),
            "files" => SectionKind::Files,
            phase => {
                let phase = Phase::from_str(phase).map_err(|e| {
                    Error::parse(line, e.to_string(), "%prep, %build, %install or %check")
                })?;
                SectionKind::Phase(BuildPhase::new(phase), CommandSplitter::new())
            }
        };

        self.section = Section {
            kind,
            header_line: line,
            depth: self.frames.len(),
            base,
            closed_at: None,
        };
        Ok(())
    }

    fn flush_section(&mut self) -> Result<()> {
        let section = std::mem::replace(&mut self.section, Section::preamble());
        match section.kind {
            SectionKind::Preamble | SectionKind::Files => {}
            SectionKind::Description(mut lines) => {
                while lines.last().is_some_and(|l| l.trim().is_empty()) {
                    lines.pop();
                }
                let start = lines.iter().take_while(|l| l.trim().is_empty()).count();
                self.package.description = lines[start..].join("\n");
            }
            SectionKind::Phase(mut phase, splitter) => {
                phase.commands = splitter.finish()?;
                phase.condition = section.base;
                debug!(
                    "Loaded {} with {} commands",
                    phase.phase.section(),
                    phase.commands.len()
                );
                self.recipe.insert(phase).map_err(|e| {
                    Error::parse(section.header_line, e.to_string(), "each phase at most once")
                })?;
            }
            SectionKind::Changelog(lines) => {
                self.changelog = ChangeLog::parse(lines.iter().map(|(l, t)| (*l, t.as_str())))?;
            }
        }
        Ok(())
    }

    fn content(&mut self, line: usize, raw: &str) -> Result<()> {
        let blank = raw.trim().is_empty();
        let comment = raw.trim_start().starts_with('#');

        if let Some(endif) = self.section.closed_at
            && !blank
            && !comment
        {
            return Err(Error::parse(
                line,
                format!(
                    "section continues after the %endif on line {} that closed the block around its header",
                    endif
                ),
                "%endif after the last line of a conditional section",
            ));
        }

        match self.section.kind {
            SectionKind::Preamble => {
                if blank || comment {
                    return Ok(());
                }
                self.preamble_line(line, raw.trim())
            }
            SectionKind::Description(_) => {
                if !blank {
                    self.require_unconditional(line, "%description text")?;
                }
                let text = self.expand(raw.trim_end(), line)?;
                if let SectionKind::Description(lines) = &mut self.section.kind {
                    lines.push(text);
                }
                Ok(())
            }
            SectionKind::Phase(..) => self.phase_line(line, raw),
            SectionKind::Files => {
                if blank || comment {
                    return Ok(());
                }
                let text = self.expand(raw, line)?;
                let condition =
                    Condition::and_opt(self.section.base.clone(), self.condition_from(self.section.depth));
                self.files.parse_line(&text, condition.as_ref(), line)
            }
            SectionKind::Changelog(_) => {
                if !blank {
                    self.require_unconditional(line, "%changelog text")?;
                }
                let text = self.expand(raw.trim_end(), line)?;
                if let SectionKind::Changelog(lines) = &mut self.section.kind {
                    lines.push((line, text));
                }
                Ok(())
            }
        }
    }

    fn preamble_line(&mut self, line: usize, text: &str) -> Result<()> {
        const EXPECTED: &str = "Tag: value";

        let Some(caps) = TAG_LINE.captures(text) else {
            if text.starts_with('%') {
                // A macro call standing on its own; only empty expansions are allowed
                let expanded = self.expand(text, line)?;
                if expanded.trim().is_empty() {
                    return Ok(());
                }
                if expanded.trim() != text && TAG_LINE.is_match(expanded.trim()) {
                    return self.preamble_line(line, expanded.trim());
                }
                return Err(Error::parse(
                    line,
                    format!("unknown directive '{}'", text),
                    "a preamble tag, macro definition, %bcond or %if",
                ));
            }
            return Err(Error::parse(line, format!("malformed line '{}'", text), EXPECTED));
        };

        let tag = caps[1].to_string();
        let qualifier = caps.get(2).map(|m| m.as_str().trim().to_string());
        let value = self.expand(caps[3].trim(), line)?;
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::parse(line, format!("empty value for {}", tag), EXPECTED));
        }

        let lower = tag.to_ascii_lowercase();
        let condition = self.condition_from(0);

        if lower == "provides" {
            if qualifier.is_some() {
                return Err(Error::parse(line, "Provides takes no qualifier", "Provides: CAPABILITY"));
            }
            let provides = parse_provides_list(value, condition.as_ref(), line)?;
            self.dependencies.provides.extend(provides);
            return Ok(());
        }
        if let Ok(kind) = DependencyKind::from_str(&tag) {
            if qualifier.is_some() && !kind.accepts_qualifier() {
                return Err(Error::parse(
                    line,
                    format!("{} takes no qualifier", kind),
                    format!("{}: NAME", kind),
                ));
            }
            let deps =
                parse_dependency_list(kind, qualifier.as_deref(), value, condition.as_ref(), line)?;
            self.dependencies.references.extend(deps);
            return Ok(());
        }

        // Everything else is a single-valued tag
        if qualifier.is_some() {
            return Err(Error::parse(line, format!("{} takes no qualifier", tag), EXPECTED));
        }
        self.require_unconditional(line, &tag)?;
        // `Source:` and `Source0:` are the same tag
        let key = match NUMBERED_TAG.captures(&tag) {
            Some(num) => format!("{}{}", num[1].to_ascii_lowercase(), num[2].parse::<u32>().unwrap_or(0)),
            None => lower.clone(),
        };
        if !self.seen_tags.insert(key) {
            return Err(Error::parse(line, format!("duplicate {} tag", tag), "each tag once"));
        }

        let value = value.to_string();
        match lower.as_str() {
            "name" => {
                self.macros.define("name", &value);
                self.package.name = value;
            }
            "version" | "release" => {
                if value.contains(['-', ' ', '\t']) {
                    return Err(Error::parse(
                        line,
                        format!("{} '{}' contains '-' or whitespace", tag, value),
                        format!("{}: a single token without '-'", tag),
                    ));
                }
                self.macros.define(&lower, &value);
                if lower == "version" {
                    self.package.version = value;
                } else {
                    self.package.release = value;
                }
            }
            "epoch" => {
                let epoch = value.parse::<u64>().map_err(|_| {
                    Error::parse(line, format!("invalid epoch '{}'", value), "Epoch: NUMBER")
                })?;
                self.macros.define("epoch", &value);
                self.package.epoch = Some(epoch);
            }
            "summary" => {
                self.macros.define("summary", &value);
                self.package.summary = value;
            }
            "license" => self.package.license = value,
            "url" => {
                self.macros.define("url", &value);
                self.package.url = Some(value);
            }
            "buildarch" => self.package.build_arch = Some(value),
            _ => {
                if let Some(num) = NUMBERED_TAG.captures(&tag) {
                    let index = if num[2].is_empty() {
                        0
                    } else {
                        num[2].parse::<u32>().map_err(|_| {
                            Error::parse(line, format!("invalid index in {}", tag), "SourceN: LOCATION")
                        })?
                    };
                    let entry = SourceEntry::new(index, value);
                    let path = format!("$RPM_SOURCE_DIR/{}", entry.filename());
                    if num[1].eq_ignore_ascii_case("source") {
                        self.macros.define(&format!("SOURCE{}", index), &path);
                        self.package.sources.push(entry);
                    } else {
                        self.macros.define(&format!("PATCH{}", index), &path);
                        self.package.patches.push(entry);
                    }
                } else {
                    self.package.extra_tags.push((tag, value));
                }
            }
        }
        Ok(())
    }

    fn phase_line(&mut self, line: usize, raw: &str) -> Result<()> {
        let condition = self.condition_from(self.section.depth);
        let SectionKind::Phase(phase, _) = &self.section.kind else {
            return Ok(());
        };
        let phase = phase.phase;

        let trimmed = raw.trim();
        let generated = match directive_word(trimmed) {
            Some((word @ ("setup" | "autosetup"), rest)) => {
                Some(self.setup_commands(phase, word, rest, line)?)
            }
            Some((word, rest)) if word == "autopatch" || word.starts_with("patch") => {
                Some(self.patch_commands(phase, word, rest, line)?)
            }
            _ => None,
        };

        let lines = match generated {
            Some(commands) => commands,
            None if trimmed.starts_with('#') => vec![raw.to_string()],
            None => self
                .expand(raw, line)?
                .lines()
                .map(str::to_string)
                .collect(),
        };

        let SectionKind::Phase(_, splitter) = &mut self.section.kind else {
            return Ok(());
        };
        if lines.is_empty() {
            splitter.push_line("", condition.as_ref(), line)?;
        }
        for text in lines {
            splitter.push_line(&text, condition.as_ref(), line)?;
        }
        Ok(())
    }

    /// Rewrite `%setup` / `%autosetup` into plain shell commands
    fn setup_commands(&self, phase: Phase, word: &str, rest: &str, line: usize) -> Result<Vec<String>> {
        const EXPECTED: &str = "%setup [-q] [-c] [-T] [-D] [-n DIR] [-a N] [-b N]";
        if phase != Phase::Prep {
            return Err(Error::parse(line, format!("%{} outside %prep", word), EXPECTED));
        }

        let args = self.expand(rest, line)?;
        let mut tokens = args.split_whitespace();
        let mut dir = format!(
            "{}-{}",
            self.macros.get("name").unwrap_or_default(),
            self.macros.get("version").unwrap_or_default()
        );
        let (mut create, mut skip_default, mut keep) = (false, false, false);
        let (mut before, mut after) = (Vec::new(), Vec::new());
        let mut strip: Option<u32> = None;
        let mut apply_patches = word == "autosetup";

        let number = |v: Option<&str>, opt: &str| -> Result<u32> {
            v.and_then(|s| s.parse().ok()).ok_or_else(|| {
                Error::parse(line, format!("{} needs a number", opt), EXPECTED)
            })
        };

        while let Some(token) = tokens.next() {
            match token {
                "-q" | "-v" => {}
                "-c" => create = true,
                "-T" => skip_default = true,
                "-D" => keep = true,
                "-N" if word == "autosetup" => apply_patches = false,
                "-n" => {
                    dir = tokens
                        .next()
                        .ok_or_else(|| Error::parse(line, "-n needs a directory", EXPECTED))?
                        .to_string();
                }
                "-a" => after.push(number(tokens.next(), "-a")?),
                "-b" => before.push(number(tokens.next(), "-b")?),
                "-p" if word == "autosetup" => strip = Some(number(tokens.next(), "-p")?),
                t if word == "autosetup" && t.starts_with("-p") => {
                    strip = Some(number(Some(&t[2..]), "-p")?);
                }
                "-S" if word == "autosetup" => {
                    let tool = tokens.next().unwrap_or_default();
                    if tool != "patch" {
                        return Err(Error::parse(
                            line,
                            format!("patch tool '{}' is not supported", tool),
                            "%autosetup -S patch",
                        ));
                    }
                }
                other => {
                    return Err(Error::parse(
                        line,
                        format!("unknown %{} option '{}'", word, other),
                        EXPECTED,
                    ));
                }
            }
        }

        let unpack = |index: u32| -> Result<String> {
            let source = self.package.source(index).ok_or_else(|| {
                Error::parse(line, format!("Source{} is not defined", index), "a SourceN tag")
            })?;
            Ok(unpack_command(source.filename()))
        };

        let mut commands = vec!["cd \"$RPM_BUILD_DIR\"".to_string()];
        if !keep {
            commands.push(format!("rm -rf {}", shell_quote(&dir)));
        }
        if create {
            commands.push(format!("mkdir -p {}", shell_quote(&dir)));
            commands.push(format!("cd {}", shell_quote(&dir)));
        }
        for index in &before {
            commands.push(unpack(*index)?);
        }
        if !skip_default {
            commands.push(unpack(0)?);
        }
        if !create {
            commands.push(format!("cd {}", shell_quote(&dir)));
        }
        for index in &after {
            commands.push(unpack(*index)?);
        }
        commands.push("chmod -Rf a+rX,u+w,g-w,o-w .".to_string());

        if apply_patches {
            let mut patches: Vec<&SourceEntry> = self.package.patches.iter().collect();
            patches.sort_by_key(|p| p.index);
            for patch in patches {
                commands.push(patch_command(patch.filename(), strip.unwrap_or(0), &[]));
            }
        }
        Ok(commands)
    }

    /// Rewrite `%patchN`, `%patch -P N` and `%autopatch`
    fn patch_commands(&self, phase: Phase, word: &str, rest: &str, line: usize) -> Result<Vec<String>> {
        const EXPECTED: &str = "%patch [-P N] [-pM] [-R] [-E] [-F N] [N]";
        if phase != Phase::Prep {
            return Err(Error::parse(line, format!("%{} outside %prep", word), EXPECTED));
        }

        let args = self.expand(rest, line)?;
        let mut tokens = args.split_whitespace();
        let mut numbers: Vec<u32> = Vec::new();
        let mut strip = 0u32;
        let mut extra: Vec<String> = Vec::new();
        let (mut min, mut max) = (0u32, u32::MAX);

        if let Some(n) = word.strip_prefix("patch").filter(|n| !n.is_empty()) {
            numbers.push(n.parse().map_err(|_| {
                Error::parse(line, format!("unknown directive %{}", word), EXPECTED)
            })?);
        }

        let number = |v: Option<&str>, opt: &str| -> Result<u32> {
            v.and_then(|s| s.parse().ok()).ok_or_else(|| {
                Error::parse(line, format!("{} needs a number", opt), EXPECTED)
            })
        };

        while let Some(token) = tokens.next() {
            match token {
                "-P" => numbers.push(number(tokens.next(), "-P")?),
                "-p" => strip = number(tokens.next(), "-p")?,
                t if t.starts_with("-p") => strip = number(Some(&t[2..]), "-p")?,
                "-R" | "-E" => extra.push(token.to_string()),
                "-F" => extra.push(format!("--fuzz={}", number(tokens.next(), "-F")?)),
                "-b" | "-z" => {
                    let suffix = tokens.next().unwrap_or_default();
                    extra.push(format!("-b --suffix {}", shell_quote(suffix)));
                }
                "-m" if word == "autopatch" => min = number(tokens.next(), "-m")?,
                "-M" if word == "autopatch" => max = number(tokens.next(), "-M")?,
                "-q" | "-v" | "-s" => {}
                n if word != "autopatch" && n.parse::<u32>().is_ok() => numbers.push(number(Some(n), "patch")?),
                other => {
                    return Err(Error::parse(
                        line,
                        format!("unknown %{} option '{}'", word, other),
                        EXPECTED,
                    ));
                }
            }
        }

        let mut patches: Vec<&SourceEntry> = if word == "autopatch" {
            self.package
                .patches
                .iter()
                .filter(|p| p.index >= min && p.index <= max)
                .collect()
        } else {
            if numbers.is_empty() {
                return Err(Error::parse(line, "%patch needs a patch number", EXPECTED));
            }
            numbers
                .iter()
                .map(|n| {
                    self.package.patches.iter().find(|p| p.index == *n).ok_or_else(|| {
                        Error::parse(line, format!("Patch{} is not defined", n), "a PatchN tag")
                    })
                })
                .collect::<Result<_>>()?
        };
        if word == "autopatch" {
            patches.sort_by_key(|p| p.index);
        }

        Ok(patches
            .into_iter()
            .map(|p| patch_command(p.filename(), strip, &extra))
            .collect())
    }

    fn finish(mut self, last_line: usize) -> Result<Descriptor> {
        if let Some(frame) = self.frames.last() {
            return Err(Error::parse(frame.line, "%if without matching %endif", "%endif"));
        }
        self.flush_section()?;

        for (tag, value) in [
            ("Name", &self.package.name),
            ("Version", &self.package.version),
            ("Release", &self.package.release),
        ] {
            if value.is_empty() {
                return Err(Error::parse(
                    last_line,
                    format!("missing {} tag", tag),
                    format!("{}: VALUE in the preamble", tag),
                ));
            }
        }

        Ok(Descriptor {
            package: self.package,
            macros: self.macro_defs,
            features: self.features,
            dependencies: self.dependencies,
            recipe: self.recipe,
            files: self.files,
            changelog: self.changelog,
        })
    }
}

/// `(word, rest)` for a line starting with `%word`
fn directive_word(trimmed: &str) -> Option<(&str, &str)> {
    let after = trimmed.strip_prefix('%')?;
    if !after.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        return None;
    }
    let len = after
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(after.len());
    Some((&after[..len], after[len..].trim()))
}

fn unpack_command(filename: &str) -> String {
    let path = format!("\"$RPM_SOURCE_DIR\"/{}", shell_quote(filename));
    if filename.ends_with(".zip") {
        format!("unzip -qq {}", path)
    } else if filename.contains(".tar") || filename.ends_with(".tgz") || filename.ends_with(".tbz2") {
        format!("tar -xof {}", path)
    } else {
        format!("cp -p {} .", path)
    }
}

fn patch_command(filename: &str, strip: u32, extra: &[String]) -> String {
    let mut cmd = format!("patch -p{} --fuzz=0", strip);
    for e in extra {
        cmd.push(' ');
        cmd.push_str(e);
    }
    format!("{} -i \"$RPM_SOURCE_DIR\"/{}", cmd, shell_quote(filename))
}

/// Quote for `sh` unless the word is plainly safe
pub(crate) fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._+-/=:@,%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{EnabledFeatures, FeatureOverrides};

    const MINIMAL: &str = "Name: demo\nVersion: 1.0\nRelease: 1\n";

    fn load(text: &str) -> Descriptor {
        parse_descriptor(text, &LoadOptions::default()).unwrap()
    }

    fn load_err(text: &str) -> Error {
        parse_descriptor(text, &LoadOptions::default()).unwrap_err()
    }

    #[test]
    fn test_minimal_descriptor() {
        let d = load(MINIMAL);
        assert_eq!(d.package.name, "demo");
        assert_eq!(d.nevr(), "demo-1.0-1");
        assert!(d.recipe.is_empty());
    }

    #[test]
    fn test_missing_release_is_error() {
        let err = load_err("Name: demo\nVersion: 1.0\n");
        assert!(matches!(err, Error::Parse { line: 2, .. }));
        assert!(err.to_string().contains("Release"));
    }

    #[test]
    fn test_macro_substitution_once_at_load() {
        let d = load(&format!(
            "%global ros_distro noetic\n%define prefix /opt/ros/%{{ros_distro}}\n{}\
             Source0: %{{name}}-%{{version}}.tar.gz\nURL: http://ros.org/%{{name}}\n",
            MINIMAL
        ));
        assert_eq!(d.package.sources[0].location, "demo-1.0.tar.gz");
        assert_eq!(d.package.url.as_deref(), Some("http://ros.org/demo"));
        assert_eq!(d.macros.len(), 2);
        assert_eq!(d.macros[0].body, "noetic");
        assert_eq!(d.macros[1].body, "/opt/ros/%{ros_distro}");
    }

    #[test]
    fn test_caller_defines_and_dist() {
        let opts = LoadOptions::default().define("dist", ".fc36");
        let d = parse_descriptor("Name: a\nVersion: 1\nRelease: 1%{?dist}\n", &opts).unwrap();
        assert_eq!(d.package.release, "1.fc36");
        let d = load("Name: a\nVersion: 1\nRelease: 1%{?dist}\n");
        assert_eq!(d.package.release, "1");
    }

    #[test]
    fn test_constant_if_blocks_are_resolved() {
        let opts = LoadOptions::default().define("fedora", "36");
        let text = format!(
            "{}%if 0%{{?fedora}} >= 30\nRequires: python3\n%else\nRequires: python2\n%endif\n\
             %if 0%{{?rhel}}\nRequires: rhel-only\n%endif\n",
            MINIMAL
        );
        let d = parse_descriptor(&text, &opts).unwrap();
        let names: Vec<&str> = d.dependencies.requires().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["python3"]);
        assert!(d.dependencies.references.iter().all(|r| r.condition.is_none()));
    }

    #[test]
    fn test_else_and_nested_if_give_composite_conditions() {
        let text = format!(
            "%bcond_with tests\n%bcond_without docs\n{}\
             %if %{{with tests}}\nBuildRequires: gtest\n%if %{{with docs}}\nBuildRequires: doxygen\n%endif\n\
             %else\nBuildRequires: stub\n%endif\n",
            MINIMAL
        );
        let d = load(&text);
        let refs = &d.dependencies.references;
        assert_eq!(refs[0].condition, Some(Condition::flag("tests")));
        assert_eq!(
            refs[1].condition,
            Some(Condition::flag("tests").and(Condition::flag("docs")))
        );
        assert_eq!(refs[2].condition, Some(Condition::flag("tests").negate()));

        let enabled = d.enabled_features(&FeatureOverrides::default());
        let names: Vec<&str> = d
            .dependencies
            .enabled(DependencyKind::BuildRequires, &enabled)
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["stub"]);
    }

    #[test]
    fn test_elif_chain() {
        let text = format!(
            "%bcond_with a\n%bcond_with b\n{}%if %{{with a}}\nRequires: x\n%elif %{{with b}}\nRequires: y\n%else\nRequires: z\n%endif\n",
            MINIMAL
        );
        let d = load(&text);
        let on = |names: &[&str]| {
            let enabled = EnabledFeatures::from_names(names.iter().copied());
            d.dependencies
                .enabled(DependencyKind::Requires, &enabled)
                .map(|r| r.name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(on(&["a", "b"]), vec!["x"]);
        assert_eq!(on(&["b"]), vec!["y"]);
        assert_eq!(on(&[]), vec!["z"]);
    }

    #[test]
    fn test_ifarch() {
        let opts = LoadOptions {
            arch: "aarch64".to_string(),
            ..Default::default()
        };
        let text = format!(
            "{}%ifarch x86_64\nRequires: x86-only\n%endif\n%ifnarch x86_64\nRequires: not-x86\n%endif\n",
            MINIMAL
        );
        let d = parse_descriptor(&text, &opts).unwrap();
        let names: Vec<&str> = d.dependencies.requires().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["not-x86"]);
    }

    #[test]
    fn test_gated_check_section() {
        let text = format!(
            "%bcond_with tests\n{}%build\nmake\n\n%if 0%{{?with_tests}}\n%check\nmake test || echo \"RPM TESTS FAILED\"\n%endif\n\n%files\n/opt/demo\n",
            MINIMAL
        );
        let d = load(&text);
        let check = d.recipe.get(Phase::Check).unwrap();
        assert_eq!(check.condition, Some(Condition::flag("tests")));
        assert!(check.commands[0].condition.is_none());
        assert_eq!(d.files.entries.len(), 1);
        assert!(d.files.entries[0].condition.is_none());
    }

    #[test]
    fn test_section_continuing_after_endif_is_error() {
        let text = format!(
            "%bcond_with tests\n{}%if %{{with tests}}\n%check\nmake test\n%endif\nmake more\n",
            MINIMAL
        );
        assert!(matches!(load_err(&text), Error::Parse { line: 9, .. }));
    }

    #[test]
    fn test_setup_rewrite() {
        let text = format!(
            "{}Source0: https://example.org/demo-1.0.tar.gz\nPatch1: fix-build.patch\n\
             %prep\n%autosetup -p1 -n demo-src\n",
            MINIMAL
        );
        let d = load(&text);
        let cmds: Vec<&str> = d
            .recipe
            .get(Phase::Prep)
            .unwrap()
            .commands
            .iter()
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(
            cmds,
            vec![
                "cd \"$RPM_BUILD_DIR\"",
                "rm -rf demo-src",
                "tar -xof \"$RPM_SOURCE_DIR\"/demo-1.0.tar.gz",
                "cd demo-src",
                "chmod -Rf a+rX,u+w,g-w,o-w .",
                "patch -p1 --fuzz=0 -i \"$RPM_SOURCE_DIR\"/fix-build.patch",
            ]
        );
    }

    #[test]
    fn test_setup_errors() {
        let no_source = format!("{}%prep\n%setup -q\n", MINIMAL);
        assert!(load_err(&no_source).to_string().contains("Source0"));
        let outside = format!("{}Source0: a.tar.gz\n%build\n%setup -q\n", MINIMAL);
        assert!(load_err(&outside).to_string().contains("outside %prep"));
        let missing_patch = format!("{}%prep\n%patch -P 3 -p1\n", MINIMAL);
        assert!(load_err(&missing_patch).to_string().contains("Patch3"));
    }

    #[test]
    fn test_buildroot_and_sources_become_environment() {
        let text = format!(
            "{}Source1: extra.conf\n%install\ninstall -m 644 %{{SOURCE1}} %{{buildroot}}%{{_sysconfdir}}/demo.conf\n",
            MINIMAL
        );
        let d = load(&text);
        assert_eq!(
            d.recipe.get(Phase::Install).unwrap().commands[0].text,
            "install -m 644 $RPM_SOURCE_DIR/extra.conf $RPM_BUILD_ROOT/etc/demo.conf"
        );
    }

    #[test]
    fn test_parse_errors_name_line_and_grammar() {
        let err = load_err("Name: demo\nthis is not a tag\n");
        match err {
            Error::Parse { line, expected, .. } => {
                assert_eq!(line, 2);
                assert_eq!(expected, "Tag: value");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(load_err("%if 1\nName: x\n"), Error::Parse { line: 1, .. }));
        assert!(matches!(load_err("%endif\n"), Error::Parse { line: 1, .. }));
        assert!(matches!(load_err("Name: a\nName: b\n"), Error::Parse { line: 2, .. }));
        assert!(matches!(load_err("Version: 1.0-2\n"), Error::Parse { line: 1, .. }));
        assert!(matches!(
            load_err(&format!("{}%package devel\n", MINIMAL)),
            Error::Parse { line: 4, .. }
        ));
        assert!(matches!(
            load_err(&format!("{}%files\n%files\n", MINIMAL)),
            Error::Parse { line: 5, .. }
        ));
    }

    #[test]
    fn test_feature_gating_restrictions() {
        let gated_tag = format!("%bcond_with x\n{}%if %{{with x}}\nSummary: nope\n%endif\n", MINIMAL);
        assert!(load_err(&gated_tag).to_string().contains("feature flag"));
        let in_text = format!("%bcond_with x\n{}%build\nmake %{{?with_x:--x}}\n", MINIMAL);
        assert!(load_err(&in_text).to_string().contains("outside an %if"));
        let twice = "%bcond_with x\n%bcond_without x\n";
        assert!(load_err(twice).to_string().contains("declared twice"));
    }

    #[test]
    fn test_bcond_with_default_expression() {
        let d = load(&format!("%bcond docs 1\n%bcond lto 0%{{?rhel}}\n{}", MINIMAL));
        assert!(d.features.get("docs").unwrap().default_enabled);
        assert!(!d.features.get("lto").unwrap().default_enabled);
    }

    #[test]
    fn test_undefine_removes_definition() {
        let d = load(&format!("%global a 1\n%undefine a\n{}Summary: x%{{?a}}\n", MINIMAL));
        assert!(d.macros.is_empty());
        assert_eq!(d.package.summary, "x");
    }

    #[test]
    fn test_validate_descriptor_warnings() {
        let d = load(&format!(
            "%bcond_with unused\n{}\n%changelog\n* Mon Jan 03 2022 A <a@b> - 0.9-1\n- old\n",
            MINIMAL
        ));
        let warnings = validate_descriptor(&d).unwrap();
        for needle in ["summary", "license", "URL", "%description", "%files", "unused", "0.9-1"] {
            assert!(
                warnings.iter().any(|w| w.contains(needle)),
                "no warning mentioning {needle}: {warnings:?}"
            );
        }
    }

    #[test]
    fn test_validate_empty_name() {
        let mut d = load(MINIMAL);
        d.package.name.clear();
        assert!(validate_descriptor(&d).is_err());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("demo-1.0"), "demo-1.0");
        assert_eq!(shell_quote("with space"), "'with space'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}

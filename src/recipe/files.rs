// src/recipe/files.rs

//! The `%files` install manifest

use crate::error::{Error, Result};
use crate::features::{Condition, EnabledFeatures};
use serde::Serialize;
use std::fmt;

const EXPECTED: &str = "[%attr(MODE,USER,GROUP)] [%config[(noreplace|missingok)]] \
                        [%dir|%doc|%license|%ghost|%exclude] PATH...";

/// How a manifest entry is treated by the packaging tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A path (or directory tree) installed by `%install`
    #[default]
    Regular,
    /// `%dir`: the directory itself, not its contents
    Dir,
    Doc,
    License,
    /// `%ghost`: owned but not required to exist
    Ghost,
    /// `%exclude`: present in the build root but deliberately not packaged
    Exclude,
}

impl EntryKind {
    fn directive(&self) -> Option<&'static str> {
        match self {
            Self::Regular => None,
            Self::Dir => Some("%dir"),
            Self::Doc => Some("%doc"),
            Self::License => Some("%license"),
            Self::Ghost => Some("%ghost"),
            Self::Exclude => Some("%exclude"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigMode {
    Plain,
    NoReplace,
    MissingOk,
}

impl fmt::Display for ConfigMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "%config"),
            Self::NoReplace => write!(f, "%config(noreplace)"),
            Self::MissingOk => write!(f, "%config(missingok)"),
        }
    }
}

/// Ownership attributes; `None` fields were given as `-`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileAttr {
    pub mode: Option<String>,
    pub user: Option<String>,
    pub group: Option<String>,
    /// Only used by `%defattr`
    pub dir_mode: Option<String>,
}

impl FileAttr {
    fn parse(args: &str, allow_dir_mode: bool) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = args.split(',').map(str::trim).collect();
        let max = if allow_dir_mode { 4 } else { 3 };
        if fields.len() < 3 || fields.len() > max {
            return Err(format!("expected 3{} attribute fields, got {}",
                if allow_dir_mode { " or 4" } else { "" },
                fields.len()
            ));
        }
        let field = |i: usize| {
            fields
                .get(i)
                .filter(|f| **f != "-" && !f.is_empty())
                .map(|f| f.to_string())
        };
        if let Some(mode) = field(0)
            && u32::from_str_radix(&mode, 8).is_err()
        {
            return Err(format!("invalid octal mode '{}'", mode));
        }
        Ok(Self {
            mode: field(0),
            user: field(1),
            group: field(2),
            dir_mode: field(3),
        })
    }

    fn render(&self, directive: &str) -> String {
        let f = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        match &self.dir_mode {
            Some(d) => format!("{}({},{},{},{})", directive, f(&self.mode), f(&self.user), f(&self.group), d),
            None if directive == "%defattr" => {
                format!("{}({},{},{},-)", directive, f(&self.mode), f(&self.user), f(&self.group))
            }
            None => format!("{}({},{},{})", directive, f(&self.mode), f(&self.user), f(&self.group)),
        }
    }
}

/// One path (or glob) claimed by the package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub path: String,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr: Option<FileAttr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl ManifestEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Regular,
            config: None,
            attr: None,
            condition: None,
        }
    }

    pub fn is_glob(&self) -> bool {
        self.path.contains(['*', '?', '['])
    }

    /// The line written under `%files` for this entry (without condition)
    pub fn to_line(&self) -> String {
        let mut parts = Vec::new();
        if let Some(attr) = &self.attr {
            parts.push(attr.render("%attr"));
        }
        if let Some(config) = self.config {
            parts.push(config.to_string());
        }
        if let Some(d) = self.kind.directive() {
            parts.push(d.to_string());
        }
        if self.path.chars().any(char::is_whitespace) {
            parts.push(format!("\"{}\"", self.path));
        } else {
            parts.push(self.path.clone());
        }
        parts.join(" ")
    }
}

/// Declared file ownership of the package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallManifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defattr: Option<FileAttr>,
    pub entries: Vec<ManifestEntry>,
}

impl InstallManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enabled<'a>(
        &'a self,
        features: &'a EnabledFeatures,
    ) -> impl Iterator<Item = &'a ManifestEntry> {
        self.entries
            .iter()
            .filter(move |e| features.allows(e.condition.as_ref()))
    }

    pub fn defattr_line(&self) -> Option<String> {
        self.defattr.as_ref().map(|a| a.render("%defattr"))
    }

    /// Parse one `%files` line into the manifest
    pub fn parse_line(&mut self, text: &str, condition: Option<&Condition>, line: usize) -> Result<()> {
        let err = |m: String| Error::parse(line, m, EXPECTED);
        let text = text.trim();

        if let Some(args) = directive_args(text, "%defattr").map_err(err)? {
            if condition.is_some() {
                return Err(Error::parse(
                    line,
                    "%defattr cannot depend on a feature flag",
                    "%defattr outside feature-gated %if blocks",
                ));
            }
            self.defattr = Some(FileAttr::parse(args, true).map_err(err)?);
            return Ok(());
        }

        let mut kind = EntryKind::Regular;
        let mut config = None;
        let mut attr = None;
        let mut paths = Vec::new();

        for token in tokenize(text).map_err(err)? {
            // unresolved macro references are left in place as part of the path
            if !token.starts_with('%') || token.starts_with("%{") {
                paths.push(token);
                continue;
            }
            if let Some(args) = directive_args(&token, "%attr").map_err(err)? {
                attr = Some(FileAttr::parse(args, false).map_err(err)?);
                continue;
            }
            if let Some(args) = directive_args(&token, "%config").map_err(err)? {
                config = Some(match args.trim() {
                    "noreplace" => ConfigMode::NoReplace,
                    "missingok" => ConfigMode::MissingOk,
                    other => return Err(err(format!("unknown %config option '{}'", other))),
                });
                continue;
            }
            let new_kind = match token.as_str() {
                "%config" => {
                    config.get_or_insert(ConfigMode::Plain);
                    continue;
                }
                "%dir" => EntryKind::Dir,
                "%doc" => EntryKind::Doc,
                "%license" => EntryKind::License,
                "%ghost" => EntryKind::Ghost,
                "%exclude" => EntryKind::Exclude,
                other => return Err(err(format!("unsupported file directive '{}'", other))),
            };
            if kind != EntryKind::Regular && kind != new_kind {
                return Err(err(format!("conflicting file directive '{}'", token)));
            }
            kind = new_kind;
        }

        if paths.is_empty() {
            return Err(err("file directive without a path".to_string()));
        }

        for path in paths {
            self.entries.push(ManifestEntry {
                path,
                kind,
                config,
                attr: attr.clone(),
                condition: condition.cloned(),
            });
        }
        Ok(())
    }
}

/// `Some(args)` when `token` is `name(args)`
fn directive_args<'a>(token: &'a str, name: &str) -> std::result::Result<Option<&'a str>, String> {
    let Some(rest) = token.strip_prefix(name) else {
        return Ok(None);
    };
    let Some(inner) = rest.strip_prefix('(') else {
        return Ok(None);
    };
    match inner.find(')') {
        Some(end) if inner[end + 1..].trim().is_empty() => Ok(Some(&inner[..end])),
        Some(_) => Err(format!("unexpected text after {}(...)", name)),
        None => Err(format!("missing ')' after {}", name)),
    }
}

/// Split on whitespace outside double quotes; `%attr(...)` stays whole
fn tokenize(text: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut paren_depth = 0usize;

    for c in text.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => {
                paren_depth += 1;
                current.push(c);
            }
            ')' if !in_quotes => {
                paren_depth = paren_depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes && paren_depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted path".to_string());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(lines: &[&str]) -> InstallManifest {
        let mut m = InstallManifest::new();
        for (i, l) in lines.iter().enumerate() {
            m.parse_line(l, None, i + 1).unwrap();
        }
        m
    }

    #[test]
    fn test_plain_and_directives() {
        let m = parse(&[
            "%defattr(-,root,root,-)",
            "/opt/ros/noetic",
            "%doc README.md CHANGELOG.rst",
            "%config(noreplace) %attr(0640, root, ros) /etc/ros/flexbe.yaml",
            "%dir /var/lib/flexbe",
        ]);
        assert_eq!(m.entries.len(), 5);
        assert_eq!(m.entries[0].kind, EntryKind::Regular);
        assert_eq!(m.entries[1].kind, EntryKind::Doc);
        assert_eq!(m.entries[2].path, "CHANGELOG.rst");
        assert_eq!(m.entries[3].config, Some(ConfigMode::NoReplace));
        assert_eq!(m.entries[3].attr.as_ref().unwrap().group.as_deref(), Some("ros"));
        assert_eq!(m.defattr_line().unwrap(), "%defattr(-,root,root,-)");
    }

    #[test]
    fn test_to_line_round_trips() {
        let lines = [
            "%attr(0755,root,root) %config(missingok) %ghost /run/flexbe.pid",
            "\"/usr/share/with space/file\"",
            "%exclude /opt/ros/noetic/lib/*.pyc",
        ];
        let m = parse(&lines);
        for entry in &m.entries {
            let reparsed = parse(&[&entry.to_line()]);
            assert_eq!(&reparsed.entries[0], entry);
        }
        assert!(m.entries[2].is_glob());
    }

    #[test]
    fn test_errors() {
        let mut m = InstallManifest::new();
        assert!(m.parse_line("%dir", None, 1).is_err());
        assert!(m.parse_line("%lang(de) /x", None, 1).is_err());
        assert!(m.parse_line("%dir %doc /x", None, 1).is_err());
        assert!(m.parse_line("%attr(999,root,root) /x", None, 1).is_err());
        assert!(m.parse_line("\"/unterminated", None, 1).is_err());
        let cond = Condition::flag("x");
        assert!(m.parse_line("%defattr(-,root,root)", Some(&cond), 1).is_err());
    }
}

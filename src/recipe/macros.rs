// src/recipe/macros.rs

//! Macro table and load-time substitution
//!
//! Descriptors interpolate values with `%name` / `%{name}` references. The
//! loader keeps one table per descriptor, seeded with built-in path and tool
//! macros, then caller defines, then the descriptor's own `%global`/`%define`
//! lines and preamble tags as they are read. Every reference is expanded
//! once, while the text is loaded.
//!
//! Supported forms: `%name`, `%{name}`, `%{?name}`, `%{!?name}`,
//! `%{?name:text}`, `%{!?name:text}`, `%{basename:x}`, `%{dirname:x}`,
//! `%{expand:x}` and `%%`. Shell expansions `%(...)` are never run and stay
//! in the text verbatim, as do references to undefined macros.

use std::collections::HashMap;
use thiserror::Error;

/// Maximum nesting of macro bodies expanding into other macros
pub const MAX_EXPANSION_DEPTH: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MacroError {
    #[error("macro recursion too deep while expanding %{0}")]
    Recursion(String),

    #[error("unterminated macro reference starting at '{0}'")]
    Unterminated(String),
}

/// Named macro bodies
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
    macros: HashMap<String, String>,
}

impl MacroTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with the standard path and tool macros for `arch`
    pub fn with_builtins(arch: &str) -> Self {
        let jobs = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);

        let mut table = Self::new();
        for (name, body) in [
            ("nil", ""),
            ("_prefix", "/usr"),
            ("_exec_prefix", "%{_prefix}"),
            ("_bindir", "%{_exec_prefix}/bin"),
            ("_sbindir", "%{_exec_prefix}/sbin"),
            ("_libdir", "%{_prefix}/lib64"),
            ("_libexecdir", "%{_exec_prefix}/libexec"),
            ("_includedir", "%{_prefix}/include"),
            ("_datadir", "%{_prefix}/share"),
            ("_docdir", "%{_datadir}/doc"),
            ("_mandir", "%{_datadir}/man"),
            ("_sysconfdir", "/etc"),
            ("_localstatedir", "/var"),
            ("_unitdir", "/usr/lib/systemd/system"),
            ("_vendor", "redhat"),
            ("_os", "linux"),
            ("_target_platform", "%{_target_cpu}-%{_vendor}-%{_os}-gnu"),
            ("__make", "make"),
            ("__python3", "/usr/bin/python3"),
            ("python3_pkgversion", "3"),
            ("__cmake", "cmake"),
            ("make_build", "%{__make} %{?_smp_mflags}"),
            ("make_install", "%{__make} install DESTDIR=%{buildroot}"),
            (
                "cmake3",
                "%{__cmake} -DCMAKE_INSTALL_PREFIX:PATH=%{_prefix} -DCMAKE_BUILD_TYPE=RelWithDebInfo",
            ),
            ("py3_build", "%{__python3} setup.py build"),
            (
                "py3_install",
                "%{__python3} setup.py install --skip-build --root %{buildroot}",
            ),
        ] {
            table.define(name, body);
        }
        table.define("_target_cpu", arch);
        table.define("_arch", arch);
        table.define("_smp_mflags", &format!("-j{}", jobs));
        table
    }

    /// Define (or redefine) a macro; the body is expanded on every use
    pub fn define(&mut self, name: &str, body: &str) {
        self.macros.insert(name.to_string(), body.to_string());
    }

    pub fn undefine(&mut self, name: &str) {
        self.macros.remove(name);
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }

    /// Expand every macro reference in `text`
    pub fn expand(&self, text: &str) -> Result<String, MacroError> {
        self.expand_depth(text, 0)
    }

    fn expand_depth(&self, text: &str, depth: usize) -> Result<String, MacroError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(pos) = rest.find('%') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            let next = tail[1..].chars().next();

            match next {
                Some('%') => {
                    out.push('%');
                    rest = &tail[2..];
                }
                Some('(') => {
                    let end = matching_close(tail, 1, '(', ')')
                        .ok_or_else(|| MacroError::Unterminated(snippet(tail)))?;
                    out.push_str(&tail[..=end]);
                    rest = &tail[end + 1..];
                }
                Some('{') => {
                    let end = matching_close(tail, 1, '{', '}')
                        .ok_or_else(|| MacroError::Unterminated(snippet(tail)))?;
                    let inner = &tail[2..end];
                    match self.expand_braced(inner, depth)? {
                        Some(expanded) => out.push_str(&expanded),
                        None => out.push_str(&tail[..=end]),
                    }
                    rest = &tail[end + 1..];
                }
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    let len = tail[1..]
                        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                        .unwrap_or(tail.len() - 1);
                    let name = &tail[1..1 + len];
                    match self.macros.get(name) {
                        Some(body) => out.push_str(&self.expand_body(name, body, depth)?),
                        None => out.push_str(&tail[..1 + len]),
                    }
                    rest = &tail[1 + len..];
                }
                _ => {
                    out.push('%');
                    rest = &tail[1..];
                }
            }
        }

        out.push_str(rest);
        Ok(out)
    }

    fn expand_body(&self, name: &str, body: &str, depth: usize) -> Result<String, MacroError> {
        if depth >= MAX_EXPANSION_DEPTH {
            return Err(MacroError::Recursion(name.to_string()));
        }
        self.expand_depth(body, depth + 1)
    }

    /// Expand the inside of `%{...}`; `None` keeps the reference verbatim
    fn expand_braced(&self, inner: &str, depth: usize) -> Result<Option<String>, MacroError> {
        // Conditional forms: ?name, !?name, ?!name, with optional :text
        let (negated, conditional, body) = if let Some(r) = inner.strip_prefix("!?") {
            (true, true, r)
        } else if let Some(r) = inner.strip_prefix("?!") {
            (true, true, r)
        } else if let Some(r) = inner.strip_prefix('?') {
            (false, true, r)
        } else {
            (false, false, inner)
        };

        if conditional {
            let (name, alt) = match body.split_once(':') {
                Some((n, t)) => (n, Some(t)),
                None => (body, None),
            };
            let defined = self.macros.get(name);
            let expanded = match (defined, negated, alt) {
                (Some(_), false, Some(text)) | (None, true, Some(text)) => {
                    self.expand_body(name, text, depth)?
                }
                (Some(value), false, None) => self.expand_body(name, value, depth)?,
                _ => String::new(),
            };
            return Ok(Some(expanded));
        }

        if let Some((func, arg)) = body.split_once(':') {
            let arg = self.expand_body(func, arg, depth)?;
            let result = match func {
                "basename" => arg.rsplit('/').next().unwrap_or("").to_string(),
                "dirname" => match arg.rsplit_once('/') {
                    Some(("", _)) => "/".to_string(),
                    Some((dir, _)) => dir.to_string(),
                    None => ".".to_string(),
                },
                "expand" => self.expand_body(func, &arg, depth)?,
                _ => return Ok(None),
            };
            return Ok(Some(result));
        }

        match self.macros.get(body) {
            Some(value) => Ok(Some(self.expand_body(body, value, depth)?)),
            None => Ok(None),
        }
    }
}

/// Byte index of the bracket closing the one at `open_at`
fn matching_close(text: &str, open_at: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices().skip_while(|(i, _)| *i < open_at) {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

fn snippet(text: &str) -> String {
    text.chars().take(24).collect()
}

// src/recipe/writer.rs

//! Render a [`Descriptor`] back to `.spec` text
//!
//! Output is canonical rather than a copy of the input: sections come in a
//! fixed order and gated items are grouped under `%if` blocks. Stored values
//! are final strings, so every `%` is written as `%%`; `%define` bodies are
//! the exception and go out verbatim. Loading the output yields an equal
//! descriptor.

use crate::error::Result;
use crate::features::Condition;
use crate::recipe::files::ManifestEntry;
use crate::recipe::format::{Descriptor, MacroKind};
use std::fmt::Write as _;
use std::path::Path;

/// Render a descriptor as `.spec` text
pub fn write_descriptor(descriptor: &Descriptor) -> String {
    let mut out = String::new();
    let pkg = &descriptor.package;

    for flag in descriptor.features.iter() {
        let directive = if flag.default_enabled {
            "bcond_without"
        } else {
            "bcond_with"
        };
        let _ = writeln!(out, "%{} {}", directive, flag.name);
    }
    for def in &descriptor.macros {
        match def.kind {
            MacroKind::Global => {
                let _ = writeln!(out, "%global {} {}", def.name, escape(&def.body));
            }
            MacroKind::Define => {
                let _ = writeln!(out, "%define {} {}", def.name, def.body);
            }
        }
    }
    if !descriptor.features.is_empty() || !descriptor.macros.is_empty() {
        out.push('\n');
    }

    tag(&mut out, "Name", &pkg.name);
    tag(&mut out, "Version", &pkg.version);
    tag(&mut out, "Release", &pkg.release);
    if let Some(epoch) = pkg.epoch {
        tag(&mut out, "Epoch", &epoch.to_string());
    }
    if !pkg.summary.is_empty() {
        tag(&mut out, "Summary", &pkg.summary);
    }
    out.push('\n');
    if !pkg.license.is_empty() {
        tag(&mut out, "License", &pkg.license);
    }
    if let Some(url) = &pkg.url {
        tag(&mut out, "URL", url);
    }
    for source in &pkg.sources {
        tag(&mut out, &format!("Source{}", source.index), &source.location);
    }
    for patch in &pkg.patches {
        tag(&mut out, &format!("Patch{}", patch.index), &patch.location);
    }
    if let Some(arch) = &pkg.build_arch {
        tag(&mut out, "BuildArch", arch);
    }
    for (name, value) in &pkg.extra_tags {
        tag(&mut out, name, value);
    }
    out.push('\n');

    write_grouped(
        &mut out,
        &descriptor.dependencies.references,
        |d| d.condition.as_ref(),
        |d| {
            let name = match &d.qualifier {
                Some(q) => format!("{}({})", d.kind, q),
                None => d.kind.to_string(),
            };
            format!("{}: {}", name, escape(&d.to_entry_string()))
        },
    );
    write_grouped(
        &mut out,
        &descriptor.dependencies.provides,
        |p| p.condition.as_ref(),
        |p| format!("Provides: {}", escape(&p.to_entry_string())),
    );

    out.push_str("\n%description\n");
    if !pkg.description.is_empty() {
        out.push_str(&escape(&pkg.description));
        out.push('\n');
    }

    for phase in descriptor.recipe.iter() {
        out.push('\n');
        if let Some(c) = &phase.condition {
            let _ = writeln!(out, "%if {}", c);
        }
        let _ = writeln!(out, "{}", phase.phase.section());
        write_grouped(
            &mut out,
            &phase.commands,
            |c| c.condition.as_ref(),
            |c| escape(&c.text),
        );
        if phase.condition.is_some() {
            out.push_str("%endif\n");
        }
    }

    out.push_str("\n%files\n");
    if let Some(line) = descriptor.files.defattr_line() {
        let _ = writeln!(out, "{}", line);
    }
    write_grouped(
        &mut out,
        &descriptor.files.entries,
        |e| e.condition.as_ref(),
        |e| {
            ManifestEntry {
                path: escape(&e.path),
                ..e.clone()
            }
            .to_line()
        },
    );

    out.push_str("\n%changelog\n");
    for entry in descriptor.changelog.entries() {
        let _ = writeln!(out, "{}", escape(&entry.header()));
        if !entry.note.is_empty() {
            let _ = writeln!(out, "{}", escape(&entry.note));
        }
        out.push('\n');
    }

    out
}

/// Render a descriptor and write it to `path`
pub fn write_descriptor_file(descriptor: &Descriptor, path: &Path) -> Result<()> {
    std::fs::write(path, write_descriptor(descriptor))?;
    Ok(())
}

fn tag(out: &mut String, name: &str, value: &str) {
    let _ = writeln!(out, "{}: {}", name, escape(value));
}

fn escape(text: &str) -> String {
    text.replace('%', "%%")
}

/// Write items in order, wrapping runs with the same condition in `%if`
fn write_grouped<T>(
    out: &mut String,
    items: &[T],
    condition: impl Fn(&T) -> Option<&Condition>,
    render: impl Fn(&T) -> String,
) {
    let mut open: Option<&Condition> = None;
    for item in items {
        let c = condition(item);
        if c != open {
            if open.is_some() {
                out.push_str("%endif\n");
            }
            if let Some(c) = c {
                let _ = writeln!(out, "%if {}", c);
            }
            open = c;
        }
        out.push_str(&render(item));
        out.push('\n');
    }
    if open.is_some() {
        out.push_str("%endif\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::parser::{LoadOptions, parse_descriptor};

    const DESCRIPTOR: &str = r#"%bcond_with tests
%bcond_without weak_deps
%global __os_install_post %(echo '%{__os_install_post}' | sed -e 's!/usr/lib[^[:space:]]*/brp-python-bytecompile[[:space:]].*$!!g')
%global __provides_exclude_from ^/opt/ros/noetic/.*$
%define share_dir %{_datadir}/demo

Name:           ros-noetic-demo
Version:        1.3.1
Release:        1%{?dist}%{?release_suffix}
Summary:        ROS demo package

License:        BSD
URL:            http://wiki.ros.org/demo
Source0:        %{name}-%{version}.tar.gz
BuildArch:      noarch

Requires:       python3-rospkg >= 1.2
%if 0%{?with_weak_deps}
Recommends:     ros-noetic-extras
%endif
BuildRequires:  ros-noetic-catkin
%if 0%{?with_tests}
BuildRequires:  ros-noetic-rosunit
%endif
Provides:       %{name}-runtime = %{version}-%{release}

%description
Demo of 100% coverage.

%prep
%autosetup -p1

%build
mkdir -p obj-%{_target_platform} && cd obj-%{_target_platform}
%cmake3 ..
%make_build

%if %{with tests}
%check
make test || echo "RPM TESTS FAILED"
%endif

%files
%defattr(-,root,root,-)
/opt/ros/noetic
%if %{with tests}
%exclude /opt/ros/noetic/test
%endif

%changelog
* Tue Mar 08 2022 Jane Doe <jane@example.org> - 1.3.1-1
- Autogenerated by Bloom
"#;

    #[test]
    fn test_reload_is_equal() {
        let opts = LoadOptions::default().define("dist", ".el8");
        let loaded = parse_descriptor(DESCRIPTOR, &opts).unwrap();
        let written = write_descriptor(&loaded);
        let reloaded = parse_descriptor(&written, &LoadOptions::default()).unwrap();
        assert_eq!(reloaded, loaded);
    }

    #[test]
    fn test_percent_escaped_in_text() {
        let loaded = parse_descriptor(DESCRIPTOR, &LoadOptions::default()).unwrap();
        let written = write_descriptor(&loaded);
        assert!(written.contains("Demo of 100%% coverage."));
        assert!(written.contains("%define share_dir %{_datadir}/demo"));
        assert!(written.contains("%global __os_install_post %%(echo"));
    }

    #[test]
    fn test_gated_items_grouped() {
        let loaded = parse_descriptor(DESCRIPTOR, &LoadOptions::default()).unwrap();
        let written = write_descriptor(&loaded);
        assert!(written.contains("%if %{with weak_deps}\nRecommends: ros-noetic-extras\n%endif\n"));
        assert!(written.contains("%if %{with tests}\n%check\n"));
        assert!(written.contains("%if %{with tests}\n%exclude /opt/ros/noetic/test\n%endif\n"));
    }
}

// src/recipe/phases.rs

//! Build phases and shell command splitting
//!
//! A phase body is stored as a list of commands, one per complete shell
//! statement. Multi-line compound statements (`if`/`fi`, loops, `case`,
//! brace groups), backslash continuations and trailing `&&`/`||`/`|` keep
//! accumulating lines until the statement is complete. A here-document
//! body belongs to the statement that opened it and ends at its
//! terminator line.

use crate::error::{Error, Result};
use crate::features::{Condition, EnabledFeatures};
use serde::Serialize;
use std::collections::VecDeque;
use strum_macros::{Display, EnumIter, EnumString};

/// The four lifecycle stages, declared in execution order
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    /// Unpack and patch sources (`%prep`)
    Prep,
    Build,
    Install,
    /// Optional verification; failures follow the check policy
    Check,
}

impl Phase {
    /// Section header as written in a descriptor
    pub fn section(&self) -> String {
        format!("%{}", self)
    }
}

/// One shell statement of a phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseCommand {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl PhaseCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            condition: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPhase {
    pub phase: Phase,
    /// Gate on the whole section (`%if %{with tests}` around `%check`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    pub commands: Vec<PhaseCommand>,
}

impl BuildPhase {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            condition: None,
            commands: Vec::new(),
        }
    }
}

/// All phases of a descriptor, kept in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BuildRecipe {
    phases: Vec<BuildPhase>,
}

impl BuildRecipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a phase; each phase may only be present once
    pub fn insert(&mut self, phase: BuildPhase) -> Result<()> {
        if self.get(phase.phase).is_some() {
            return Err(Error::Config(format!(
                "phase {} defined twice",
                phase.phase.section()
            )));
        }
        let pos = self.phases.partition_point(|p| p.phase < phase.phase);
        self.phases.insert(pos, phase);
        Ok(())
    }

    pub fn get(&self, phase: Phase) -> Option<&BuildPhase> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildPhase> {
        self.phases.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Enabled phases and commands in execution order
    pub fn plan(&self, enabled: &EnabledFeatures) -> RecipePlan {
        let phases = self
            .phases
            .iter()
            .filter(|p| enabled.allows(p.condition.as_ref()))
            .map(|p| PlannedPhase {
                phase: p.phase,
                commands: p
                    .commands
                    .iter()
                    .filter(|c| enabled.allows(c.condition.as_ref()))
                    .map(|c| c.text.clone())
                    .collect(),
            })
            .collect();
        RecipePlan { phases }
    }
}

/// Commands that will actually run, after feature evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecipePlan {
    pub phases: Vec<PlannedPhase>,
}

impl RecipePlan {
    pub fn get(&self, phase: Phase) -> Option<&PlannedPhase> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn runs(&self, phase: Phase) -> bool {
        self.get(phase).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedPhase {
    pub phase: Phase,
    pub commands: Vec<String>,
}

/// Incremental splitter fed one body line at a time by the loader
#[derive(Debug, Default)]
pub struct CommandSplitter {
    commands: Vec<PhaseCommand>,
    pending: Vec<String>,
    pending_condition: Option<Condition>,
    pending_line: usize,
    scan: ShellScan,
}

impl CommandSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line of a phase body
    pub fn push_line(&mut self, text: &str, condition: Option<&Condition>, line: usize) -> Result<()> {
        if self.pending.is_empty() {
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return Ok(());
            }
            self.pending_condition = condition.cloned();
            self.pending_line = line;
            self.pending.push(text.trim().to_string());
        } else {
            if self.pending_condition.as_ref() != condition {
                return Err(Error::parse(
                    line,
                    format!(
                        "shell statement started on line {} continues across a conditional block",
                        self.pending_line
                    ),
                    "%if/%endif around complete shell statements",
                ));
            }
            let trimmed = text.trim();
            if self.scan.quote.is_none()
                && !self.scan.in_heredoc()
                && (trimmed.is_empty() || trimmed.starts_with('#'))
            {
                return Ok(());
            }
            self.pending.push(text.trim_end().to_string());
        }

        if self.scan.feed(text) {
            self.commands.push(PhaseCommand {
                text: self.pending.join("\n"),
                condition: self.pending_condition.take(),
            });
            self.pending.clear();
            self.scan = ShellScan::default();
        }
        Ok(())
    }

    /// Whether a statement is still waiting for more lines
    pub fn in_statement(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn finish(self) -> Result<Vec<PhaseCommand>> {
        if !self.pending.is_empty() {
            return Err(Error::parse(
                self.pending_line,
                "unterminated shell statement",
                "balanced if/fi, do/done, case/esac, braces, quotes and here-documents",
            ));
        }
        Ok(self.commands)
    }
}

/// Split an unconditional shell body into statements
pub fn split_commands(body: &str) -> Result<Vec<String>> {
    let mut splitter = CommandSplitter::new();
    for (i, line) in body.lines().enumerate() {
        splitter.push_line(line, None, i + 1)?;
    }
    Ok(splitter.finish()?.into_iter().map(|c| c.text).collect())
}

/// A `<<WORD` or `<<-WORD` redirection waiting for its terminator line
#[derive(Debug)]
struct HereDoc {
    delimiter: String,
    strip_tabs: bool,
}

/// Just enough shell lexing to find where a statement ends
#[derive(Debug, Default)]
struct ShellScan {
    depth: i32,
    quote: Option<char>,
    continues: bool,
    heredocs: VecDeque<HereDoc>,
}

impl ShellScan {
    fn in_heredoc(&self) -> bool {
        !self.heredocs.is_empty()
    }

    fn complete(&self) -> bool {
        self.heredocs.is_empty() && self.quote.is_none() && self.depth <= 0 && !self.continues
    }

    /// Scan one line; true when the statement is complete after it
    fn feed(&mut self, line: &str) -> bool {
        if let Some(doc) = self.heredocs.front() {
            let body = if doc.strip_tabs {
                line.trim_start_matches('\t')
            } else {
                line
            };
            if body.trim_end() == doc.delimiter {
                self.heredocs.pop_front();
            }
            return self.complete();
        }

        let mut word = String::new();
        let mut command_position = true;
        let mut chars = line.chars().peekable();
        let mut escaped_newline = false;

        while let Some(c) = chars.next() {
            if let Some(q) = self.quote {
                if c == q {
                    self.quote = None;
                } else if q == '"' && c == '\\' {
                    chars.next();
                }
                word.push('x');
                continue;
            }
            match c {
                '\'' | '"' => {
                    self.quote = Some(c);
                    word.push('x');
                }
                '\\' => {
                    if chars.next().is_none() {
                        escaped_newline = true;
                    }
                    word.push('x');
                }
                '#' if word.is_empty() => break,
                '<' if chars.peek() == Some(&'<') => {
                    chars.next();
                    if chars.next_if_eq(&'<').is_none() {
                        let strip_tabs = chars.next_if_eq(&'-').is_some();
                        while chars.next_if(|c| *c == ' ' || *c == '\t').is_some() {}
                        let mut delimiter = String::new();
                        while let Some(d) =
                            chars.next_if(|d| !d.is_whitespace() && !";&|()<>".contains(*d))
                        {
                            if !matches!(d, '\'' | '"' | '\\') {
                                delimiter.push(d);
                            }
                        }
                        if !delimiter.is_empty() {
                            self.heredocs.push_back(HereDoc {
                                delimiter,
                                strip_tabs,
                            });
                        }
                    }
                    word.push('x');
                }
                ';' | '&' | '|' | '(' | ')' | ' ' | '\t' => {
                    command_position = self.word(&word, command_position);
                    word.clear();
                    if c != ' ' && c != '\t' {
                        command_position = true;
                    }
                }
                _ => word.push(c),
            }
        }
        self.word(&word, command_position);

        let trimmed = line.trim_end();
        self.continues = escaped_newline || trimmed.ends_with("&&") || trimmed.ends_with('|');
        self.complete()
    }

    /// Account for one word; returns whether the next word is in command position
    fn word(&mut self, word: &str, command_position: bool) -> bool {
        if word.is_empty() {
            return command_position;
        }
        if !command_position {
            return false;
        }
        match word {
            "if" | "case" | "do" | "{" => {
                self.depth += 1;
                true
            }
            "fi" | "esac" | "done" | "}" => {
                self.depth -= 1;
                false
            }
            "then" | "else" | "elif" | "while" | "until" | "!" => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_phase_names_and_order() {
        assert_eq!(Phase::Prep.to_string(), "prep");
        assert_eq!(Phase::from_str("check").unwrap(), Phase::Check);
        assert_eq!(Phase::Install.section(), "%install");
        assert!(Phase::Prep < Phase::Build && Phase::Install < Phase::Check);
    }

    #[test]
    fn test_simple_lines_and_comments() {
        let cmds = split_commands("\n# comment\nmkdir -p obj\n\ncd obj\n").unwrap();
        assert_eq!(cmds, vec!["mkdir -p obj", "cd obj"]);
    }

    #[test]
    fn test_if_block_is_one_command() {
        let body = r#"if [ -f "/opt/ros/noetic/setup.sh" ]; then . "/opt/ros/noetic/setup.sh"; fi
mkdir -p obj-x86_64
if [ -n "$X" ]; then
    echo yes
else
    echo no
fi
echo done"#;
        let cmds = split_commands(body).unwrap();
        assert_eq!(cmds.len(), 4);
        assert!(cmds[2].starts_with("if [ -n"));
        assert!(cmds[2].ends_with("fi"));
        assert_eq!(cmds[3], "echo done");
    }

    #[test]
    fn test_continuations() {
        let body = "cmake .. \\\n    -DCMAKE_BUILD_TYPE=Release\nmake &&\n  make install\nls | \n  wc -l";
        let cmds = split_commands(body).unwrap();
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0], "cmake .. \\\n    -DCMAKE_BUILD_TYPE=Release");
    }

    #[test]
    fn test_loops_case_and_braces() {
        let body = "for f in a b; do\n  echo $f\ndone\ncase x in\n  x) echo x;;\nesac\n{\n  echo grouped\n}";
        let cmds = split_commands(body).unwrap();
        assert_eq!(cmds.len(), 3);
    }

    #[test]
    fn test_keywords_inside_quotes_and_arguments_ignored() {
        let cmds = split_commands("echo 'if'\necho if done fi\necho \"{\"").unwrap();
        assert_eq!(cmds.len(), 3);
    }

    #[test]
    fn test_unterminated_statement() {
        assert!(split_commands("if true; then\necho x").is_err());
        assert!(split_commands("echo 'open").is_err());
        assert!(split_commands("cat > f <<EOF\nkey=value").is_err());
    }

    #[test]
    fn test_here_document_is_one_command() {
        let body = "cat > demo.conf <<EOF\nkey=value\n\n# kept\nif\nEOF\necho after";
        let cmds = split_commands(body).unwrap();
        assert_eq!(cmds, vec!["cat > demo.conf <<EOF\nkey=value\n\n# kept\nif\nEOF", "echo after"]);
    }

    #[test]
    fn test_here_document_variants() {
        // Quoted delimiter, tab-stripped terminator, here-string
        let body = "cat <<'END' > a\n$HOME\nEND\ncat <<-EOF > b\n\tx\n\tEOF\ncat <<< word";
        let cmds = split_commands(body).unwrap();
        assert_eq!(cmds.len(), 3);
        assert!(cmds[1].ends_with("\tEOF"));
        assert_eq!(cmds[2], "cat <<< word");

        // Two here-documents on one line
        let cmds = split_commands("paste /dev/fd/3 3<<A <<B\n1\nA\n2\nB\ntrue").unwrap();
        assert_eq!(cmds.len(), 2);
    }

    #[test]
    fn test_condition_change_inside_statement() {
        let mut splitter = CommandSplitter::new();
        splitter.push_line("if true; then", None, 1).unwrap();
        let cond = Condition::flag("tests");
        assert!(splitter.push_line("echo x", Some(&cond), 3).is_err());
    }

    #[test]
    fn test_plan_filters_and_orders() {
        let mut recipe = BuildRecipe::new();
        let mut check = BuildPhase::new(Phase::Check);
        check.condition = Some(Condition::flag("tests"));
        check.commands.push(PhaseCommand::new("make test"));
        recipe.insert(check).unwrap();

        let mut build = BuildPhase::new(Phase::Build);
        build.commands.push(PhaseCommand::new("make"));
        let mut gated = PhaseCommand::new("make docs");
        gated.condition = Some(Condition::flag("docs"));
        build.commands.push(gated);
        recipe.insert(build).unwrap();

        assert!(recipe.insert(BuildPhase::new(Phase::Build)).is_err());

        let plan = recipe.plan(&EnabledFeatures::default());
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phases[0].commands, vec!["make"]);
        assert!(!plan.runs(Phase::Check));

        let plan = recipe.plan(&EnabledFeatures::from_names(["tests", "docs"]));
        let order: Vec<Phase> = plan.phases.iter().map(|p| p.phase).collect();
        assert_eq!(order, vec![Phase::Build, Phase::Check]);
        assert_eq!(plan.get(Phase::Build).unwrap().commands.len(), 2);
    }
}

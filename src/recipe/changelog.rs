// src/recipe/changelog.rs

//! `%changelog` entries
//!
//! Entries are kept newest first, the way they are written in a descriptor.
//! The log only grows at the front: [`ChangeLog::append`] refuses entries
//! dated before the current newest one, and nothing hands out mutable
//! access to existing entries.

use crate::error::{Error, Result};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::warn;

const HEADER_GRAMMAR: &str = "* Www Mmm DD YYYY Author <email> - VERSION";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeLogEntry {
    pub date: NaiveDate,
    pub author: String,
    pub version: String,
    /// Free text below the header line
    pub note: String,
}

impl ChangeLogEntry {
    pub fn new(
        date: NaiveDate,
        author: impl Into<String>,
        version: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            date,
            author: author.into(),
            version: version.into(),
            note: note.into(),
        }
    }

    /// Header line as written in a descriptor
    pub fn header(&self) -> String {
        format!(
            "* {} {} - {}",
            self.date.format("%a %b %d %Y"),
            self.author,
            self.version
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChangeLog {
    entries: Vec<ChangeLogEntry>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new newest entry
    pub fn append(&mut self, entry: ChangeLogEntry) -> Result<()> {
        if let Some(newest) = self.entries.first()
            && entry.date < newest.date
        {
            return Err(Error::Changelog(format!(
                "entry for {} dated {} is older than the newest entry ({})",
                entry.version, entry.date, newest.date
            )));
        }
        self.entries.insert(0, entry);
        Ok(())
    }

    /// Entries newest first
    pub fn entries(&self) -> &[ChangeLogEntry] {
        &self.entries
    }

    pub fn latest(&self) -> Option<&ChangeLogEntry> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the dates never increase from top to bottom
    pub fn is_newest_first(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].date >= w[1].date)
    }

    /// Parse the body of a `%changelog` section given as (line number, text)
    pub fn parse<'a, I>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, &'a str)>,
    {
        let mut entries: Vec<ChangeLogEntry> = Vec::new();
        let mut note: Vec<&str> = Vec::new();

        let finish = |entries: &mut Vec<ChangeLogEntry>, note: &mut Vec<&str>| {
            if let Some(entry) = entries.last_mut() {
                while note.last().is_some_and(|l| l.trim().is_empty()) {
                    note.pop();
                }
                entry.note = note.join("\n");
            }
            note.clear();
        };

        for (line, text) in lines {
            if let Some(header) = text.strip_prefix('*') {
                finish(&mut entries, &mut note);
                entries.push(parse_header(header, line)?);
            } else if entries.is_empty() {
                if !text.trim().is_empty() {
                    return Err(Error::parse(
                        line,
                        "changelog text before the first entry",
                        HEADER_GRAMMAR,
                    ));
                }
            } else if !(note.is_empty() && text.trim().is_empty()) {
                note.push(text.trim_end());
            }
        }
        finish(&mut entries, &mut note);

        Ok(Self { entries })
    }
}

fn parse_header(header: &str, line: usize) -> Result<ChangeLogEntry> {
    let err = |m: String| Error::parse(line, m, HEADER_GRAMMAR);
    let mut fields = header.split_whitespace();

    let (Some(weekday), Some(month), Some(day), Some(year)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(err("incomplete changelog date".to_string()));
    };

    let date = NaiveDate::parse_from_str(&format!("{} {} {}", month, day, year), "%b %d %Y")
        .map_err(|e| err(format!("invalid changelog date '{} {} {}': {}", month, day, year, e)))?;
    let actual = date.weekday().to_string();
    if !actual.eq_ignore_ascii_case(weekday) {
        warn!(
            "Line {}: {} {} {} is a {}, not {}",
            line, month, day, year, actual, weekday
        );
    }

    let rest = fields.collect::<Vec<_>>().join(" ");
    let Some((author, version)) = rest.rsplit_once(" - ") else {
        return Err(err("changelog entry without a version".to_string()));
    };
    let (author, version) = (author.trim(), version.trim());
    if author.is_empty() || version.is_empty() || version.contains(char::is_whitespace) {
        return Err(err(format!("malformed changelog header '{}'", rest)));
    }

    Ok(ChangeLogEntry::new(date, author, version, ""))
}

use std::{
    io::{Cursor, Read},
    sync::LazyLock,
};

use anyhow::{Context, Result, bail};
use regex::Regex;
use runlens_core::util::{normalize_alnum, slugify};

/// Leading bytes of a zip local file header.
pub const ZIP_SIGNATURE: &[u8; 2] = b"PK";

pub fn is_zip(bytes: &[u8]) -> bool { bytes.starts_with(ZIP_SIGNATURE) }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// A real zip bundle with one file per step.
    Zip,
    /// A single plaintext job log, split into synthetic per-step entries.
    Plaintext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub content: String,
}

/// Per-step log files of one job, in archive order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobArchive {
    pub kind: ArchiveKind,
    pub entries: Vec<ArchiveEntry>,
}

impl JobArchive {
    /// Decode a job log download: zip bundles are unpacked, anything else is treated as a
    /// plaintext job log.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if is_zip(bytes) {
            Self::from_zip(bytes)
        } else {
            Ok(Self::from_plaintext(&String::from_utf8_lossy(bytes)))
        }
    }

    pub fn from_zip(bytes: &[u8]) -> Result<Self> {
        if !is_zip(bytes) {
            bail!("Payload is not a zip archive");
        }
        let mut archive =
            zip::ZipArchive::new(Cursor::new(bytes)).context("Failed to open log archive")?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() || file.enclosed_name().is_none() {
                continue;
            }
            let name = file.name().to_string();
            let mut contents = Vec::with_capacity(file.size() as usize);
            if let Err(e) = file.read_to_end(&mut contents) {
                tracing::warn!("Failed to decode archive entry {}: {}", name, e);
                continue;
            }
            entries.push(ArchiveEntry { name, content: String::from_utf8_lossy(&contents).into() });
        }
        Ok(Self { kind: ArchiveKind::Zip, entries })
    }

    /// Split a plaintext job log into one entry per runner group, numbered from 1 in
    /// encounter order. Output printed after a group is closed belongs to that group until
    /// the next one opens.
    pub fn from_plaintext(text: &str) -> Self {
        struct Group<'a> {
            name: &'a str,
            lines: Vec<&'a str>,
            has_output: bool,
        }
        let mut groups: Vec<Group> = Vec::new();
        for line in text.lines() {
            match classify_marker(line) {
                Some(Marker::Start(name)) => {
                    groups.push(Group { name, lines: vec![line], has_output: false })
                }
                marker => {
                    if let Some(group) = groups.last_mut() {
                        group.has_output |= marker.is_none() && !line.trim().is_empty();
                        group.lines.push(line);
                    }
                }
            }
        }
        let entries = groups
            .into_iter()
            .filter(|g| g.has_output)
            .enumerate()
            .map(|(i, g)| {
                let slug = slugify(g.name);
                let slug = if slug.is_empty() { "step".to_string() } else { slug };
                ArchiveEntry { name: format!("{}_{}.txt", i + 1, slug), content: g.lines.join("\n") }
            })
            .collect();
        Self { kind: ArchiveKind::Plaintext, entries }
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Approximate memory footprint, used to weigh cache entries.
    pub fn size(&self) -> usize {
        self.entries.iter().map(|e| e.name.len() + e.content.len()).sum()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> { self.entries.iter().map(|e| e.name.as_str()) }

    /// Find the log of step `number` by filename. The shortest matching name wins; equal
    /// lengths keep archive order.
    pub fn find_step(&self, number: u32, step_name: Option<&str>) -> Option<&ArchiveEntry> {
        let normalized_name = step_name.map(normalize_alnum).unwrap_or_default();
        let mut candidates: Vec<&ArchiveEntry> = self
            .entries
            .iter()
            .filter(|e| entry_matches_step(&e.name, number, &normalized_name))
            .collect();
        if candidates.is_empty() {
            let token = format!("_{number}_");
            candidates = self
                .entries
                .iter()
                .filter(|e| {
                    let lower = e.name.to_lowercase();
                    lower.ends_with(".txt") && lower.contains(&token)
                })
                .collect();
        }
        candidates.into_iter().min_by_key(|e| e.name.len())
    }

    /// Score every entry against the requested step and return the best positive match,
    /// preferring the earliest entry on ties.
    pub fn best_scored(&self, number: u32, step_name: Option<&str>) -> Option<&ArchiveEntry> {
        let normalized_name = step_name.map(normalize_alnum).unwrap_or_default();
        let step_token = format!("step{number}");
        let mut best: Option<(u32, &ArchiveEntry)> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            let sanitized = normalize_alnum(&entry.name);
            let mut score = 0;
            if index + 1 == number as usize {
                score += 4;
            }
            if sanitized.contains(&step_token) {
                score += 2;
            }
            if !normalized_name.is_empty() && sanitized.contains(&normalized_name) {
                score += 3;
            }
            if score > 0 && best.is_none_or(|(s, _)| score > s) {
                best = Some((score, entry));
            }
        }
        best.map(|(_, entry)| entry)
    }
}

fn entry_matches_step(name: &str, number: u32, normalized_name: &str) -> bool {
    let lower = name.to_lowercase();
    if !lower.ends_with(".txt") {
        return false;
    }
    let sanitized = normalize_alnum(&lower);
    if sanitized.contains(&format!("step{number}")) {
        return true;
    }
    let file_name = lower.rsplit('/').next().unwrap_or(&lower);
    for prefix in [number.to_string(), format!("{number:02}")] {
        if let Some(rest) = file_name.strip_prefix(prefix.as_str())
            && (rest.starts_with('_') || rest.starts_with('-'))
        {
            return true;
        }
    }
    !normalized_name.is_empty() && sanitized.contains(normalized_name)
}

enum Marker<'a> {
    Start(&'a str),
    End,
}

static TIMESTAMP_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\u{feff}?\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z\s?").unwrap()
});

fn classify_marker(line: &str) -> Option<Marker<'_>> {
    let line = match TIMESTAMP_PREFIX.find(line) {
        Some(m) => &line[m.end()..],
        None => line.trim_start_matches('\u{feff}'),
    };
    let line = line.trim_start();
    if line.starts_with("##[endgroup]")
        || line.starts_with("::endgroup::")
        || line.starts_with("##[section]Finishing:")
    {
        return Some(Marker::End);
    }
    let name = line
        .strip_prefix("##[group]")
        .or_else(|| line.strip_prefix("::group::"))
        .or_else(|| line.strip_prefix("##[section]Starting:"))?
        .trim();
    Some(Marker::Start(name.strip_prefix("Run ").unwrap_or(name).trim()))
}

use crate::config::ChunkingConfig;
use crate::error::IngestError;
use crate::models::{ChunkDraft, ChunkMetadata, PageText};
use regex::Regex;
use std::collections::VecDeque;

/// Split points tried in order, from most structural to a bare character boundary.
pub const DEFAULT_SEPARATORS: [&str; 17] = [
    "\n\n",
    "\n",
    "Article ",
    "Section ",
    "Rule ",
    "Chapter ",
    "Sub-article ",
    "Clause ",
    "Para ",
    "Schedule ",
    ".",
    "!",
    "?",
    ";",
    ",",
    " ",
    "",
];

const SECTION_PATTERNS: [&str; 13] = [
    r"(?m)^#{1,6}\s+(.+)$",
    r"(?im)^Article\s+\d+[:\s](.+)",
    r"(?im)^Sub-article\s+\d+[:\s](.+)",
    r"(?im)^Section\s+\d+[:\s](.+)",
    r"(?im)^Rule\s+\d+[:\s](.+)",
    r"(?im)^Chapter\s+[A-Z]+[:\s](.+)",
    r"(?im)^Part\s+[A-Z]+[:\s](.+)",
    r"(?im)^Clause\s+\d+[:\s](.+)",
    r"(?im)^Para\s+\d+[:\s](.+)",
    r"(?im)^Schedule\s+[A-Z]+[:\s](.+)",
    r"(?m)^([A-Z][A-Za-z\s]{2,}:)",
    r"(?m)^(\d+\.\d*\s+[A-Z][A-Za-z\s]{2,})",
    r"(?m)^([A-Z][A-Za-z\s]{2,})$",
];

const TIMESTAMP_PATTERNS: [&str; 4] = [
    r"\b(\d{4}-\d{2}-\d{2})\b",
    r"\b(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})\b",
    r"\b((?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\.?\s+\d{1,2},?\s+\d{4})\b",
    r"\b(\d{1,2}:\d{2}(?::\d{2})?(?:\s*[AaPp][Mm])?)\b",
];

fn unify_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{a0}', " ")
}

/// Unifies line endings and non-breaking spaces, then trims the ends.
pub fn normalize_text(text: &str) -> String {
    unify_line_endings(text).trim().to_string()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// First-match-wins detector over an ordered list of patterns, each
/// exposing the wanted text as capture group 1.
#[derive(Debug, Clone)]
struct PatternDetector {
    patterns: Vec<Regex>,
}

impl PatternDetector {
    fn new(sources: &[&str]) -> Result<Self, IngestError> {
        let patterns = sources
            .iter()
            .map(|source| Regex::new(source))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    fn detect(&self, text: &str) -> Option<String> {
        self.patterns.iter().find_map(|pattern| {
            pattern
                .captures(text)
                .and_then(|captures| captures.get(1))
                .map(|found| found.as_str().trim())
                .filter(|found| !found.is_empty())
                .map(str::to_string)
        })
    }
}

/// Detects the heading a chunk belongs to.
#[derive(Debug, Clone)]
pub struct SectionDetector(PatternDetector);

impl SectionDetector {
    pub fn new() -> Result<Self, IngestError> {
        PatternDetector::new(&SECTION_PATTERNS).map(Self)
    }

    pub fn detect(&self, text: &str) -> Option<String> {
        self.0.detect(text)
    }
}

/// Detects the first date or clock time mentioned in a chunk.
#[derive(Debug, Clone)]
pub struct TimestampDetector(PatternDetector);

impl TimestampDetector {
    pub fn new() -> Result<Self, IngestError> {
        PatternDetector::new(&TIMESTAMP_PATTERNS).map(Self)
    }

    pub fn detect(&self, text: &str) -> Option<String> {
        self.0.detect(text)
    }
}

/// Recursive separator-hierarchy splitter with overlap and metadata tagging.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    separators: Vec<String>,
    sections: SectionDetector,
    timestamps: TimestampDetector,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            config,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            sections: SectionDetector::new()?,
            timestamps: TimestampDetector::new()?,
        })
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Splits text into bounded, overlapping segments.
    ///
    /// Always returns at least one element; empty or short input comes back
    /// as a single (possibly empty) segment.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let normalized = normalize_text(text);
        if char_len(&normalized) <= self.config.chunk_size {
            return vec![normalized];
        }

        let pieces = self.split_recursive(&normalized, &self.separators);
        if pieces.is_empty() {
            vec![normalized]
        } else {
            pieces
        }
    }

    /// Chunks a whole document and tags every chunk with page, section and timestamp.
    pub fn chunk_pages(&self, pages: &[PageText]) -> Result<Vec<ChunkDraft>, IngestError> {
        let mut full = String::new();
        let mut page_starts: Vec<(usize, u32)> = Vec::with_capacity(pages.len());
        for (position, page) in pages.iter().enumerate() {
            if position > 0 {
                full.push('\n');
            }
            page_starts.push((full.len(), page.number));
            full.push_str(&unify_line_endings(&page.text));
        }

        let first_page = page_starts.first().map_or(1, |(_, number)| *number);
        let mut cursor = 0usize;
        let mut last_start = 0usize;
        let mut drafts = Vec::new();

        for (index, content) in self.split_text(&full).into_iter().enumerate() {
            let found = full
                .get(cursor..)
                .and_then(|tail| tail.find(content.as_str()))
                .map(|offset| cursor + offset);

            if let Some(start) = found {
                last_start = start;
                cursor = start + content.chars().next().map_or(0, char::len_utf8);
            }

            let position = page_starts.partition_point(|(start, _)| *start <= last_start);
            let page_number = if position == 0 {
                first_page
            } else {
                page_starts[position - 1].1
            };

            drafts.push(ChunkDraft {
                index,
                metadata: ChunkMetadata {
                    page_number,
                    section: self.sections.detect(&content),
                    timestamp: self.timestamps.detect(&content),
                },
                content,
            });
        }

        if drafts.is_empty() {
            return Err(IngestError::Chunking(
                "no chunks produced from document text".to_string(),
            ));
        }

        Ok(drafts)
    }

    pub fn detect_section(&self, text: &str) -> Option<String> {
        self.sections.detect(text)
    }

    pub fn detect_timestamp(&self, text: &str) -> Option<String> {
        self.timestamps.detect(text)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let (separator, remaining) = pick_separator(text, separators);
        let mut output = Vec::new();
        let mut fitting: Vec<String> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.config.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                output.extend(self.merge_pieces(&fitting));
                fitting.clear();
            }

            if remaining.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    output.push(trimmed.to_string());
                }
            } else {
                output.extend(self.split_recursive(&piece, remaining));
            }
        }

        if !fitting.is_empty() {
            output.extend(self.merge_pieces(&fitting));
        }

        output
    }

    /// Greedily packs pieces up to `chunk_size`, carrying trailing pieces
    /// worth at most `chunk_overlap` characters into the next chunk.
    fn merge_pieces(&self, pieces: &[String]) -> Vec<String> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let mut merged = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let length = char_len(piece);
            if total + length > size && !window.is_empty() {
                push_joined(&mut merged, &window);
                while total > overlap || (total + length > size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += length;
        }

        push_joined(&mut merged, &window);
        merged
    }
}

fn pick_separator<'a>(text: &str, separators: &'a [String]) -> (&'a str, &'a [String]) {
    for (position, separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return ("", &[]);
        }
        if text.contains(separator.as_str()) {
            return (separator.as_str(), &separators[position + 1..]);
        }
    }
    ("", &[])
}

/// Splits before every separator occurrence so the separator opens the next piece.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0usize;
    for (offset, _) in text.match_indices(separator) {
        if offset > start {
            pieces.push(text[start..offset].to_string());
            start = offset;
        }
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }
    pieces
}

fn push_joined(target: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        target.push(trimmed.to_string());
    }
}


use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use crate::config::ConfigError;
use crate::database::{Chunk, HEADING_KEY, Metadata, MetadataValue};

/// Lines kept from the end of a flushed section when structure-aware chunking overflows
pub const STRUCTURE_OVERLAP_LINES: usize = 3;

static HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6} (.+)$").expect("valid regex"));

/// Configuration for document chunking. Sizes are measured in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Upper bound on chunk length; a single separator-delimited part may exceed it
    pub max_chunk_size: usize,
    /// Characters carried from the end of one chunk to the start of the next
    pub chunk_overlap: usize,
    /// Boundary used to split text into atomic parts in size mode
    pub separator: String,
    /// Split on markdown headings and tag chunks with the enclosing heading
    pub preserve_structure: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            chunk_overlap: 200,
            separator: "\n\n".to_string(),
            preserve_structure: false,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chunk_size == 0 {
            return Err(ConfigError::InvalidMaxChunkSize(self.max_chunk_size));
        }

        if self.chunk_overlap >= self.max_chunk_size {
            return Err(ConfigError::InvalidOverlapSize(
                self.chunk_overlap,
                self.max_chunk_size,
            ));
        }

        if self.separator.is_empty() {
            return Err(ConfigError::EmptySeparator);
        }

        Ok(())
    }
}

/// Splits one document's text into ordered, overlapping chunks
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Default for Chunker {
    #[inline]
    fn default() -> Self {
        Self {
            config: ChunkingConfig::default(),
        }
    }
}

impl Chunker {
    /// Create a chunker after validating its configuration
    ///
    /// # Errors
    /// Returns a `ConfigError` when `max_chunk_size` is zero, the overlap is not
    /// smaller than the maximum, or the separator is empty.
    #[inline]
    pub fn new(config: ChunkingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk a document.
    ///
    /// `metadata` is copied onto every emitted chunk. In structure mode each chunk
    /// also carries the most recent heading under `heading`.
    #[inline]
    pub fn chunk(&self, document_id: &str, text: &str, metadata: &Metadata) -> Vec<Chunk> {
        let text = text.replace("\r\n", "\n");

        let pieces = if char_len(&text) <= self.config.max_chunk_size {
            self.single_piece(&text)
        } else if self.config.preserve_structure {
            self.split_by_structure(&text)
        } else {
            self.split_by_size(&text)
        };

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(index, piece)| {
                let mut chunk_metadata = metadata.clone();
                if let Some(heading) = piece.heading {
                    chunk_metadata.insert(HEADING_KEY.to_string(), MetadataValue::String(heading));
                }
                Chunk::new(document_id, index, piece.content).with_metadata(chunk_metadata)
            })
            .collect();

        debug!(
            "Chunked document '{}' ({} chars) into {} chunks",
            document_id,
            char_len(&text),
            chunks.len()
        );

        chunks
    }

    fn single_piece(&self, text: &str) -> Vec<Piece> {
        let content = text.trim();
        if content.is_empty() {
            return Vec::new();
        }

        let heading = if self.config.preserve_structure {
            text.lines().find_map(heading_text)
        } else {
            None
        };

        vec![Piece {
            content: content.to_string(),
            heading,
        }]
    }

    /// Greedy packing of separator-delimited parts with a character overlap
    fn split_by_size(&self, text: &str) -> Vec<Piece> {
        let max = self.config.max_chunk_size;
        let separator = self.config.separator.as_str();
        let separator_len = char_len(separator);

        let mut pieces = Vec::new();
        let mut buffer = String::new();
        let mut buffer_len = 0;

        for part in text.split(separator) {
            if part.trim().is_empty() {
                continue;
            }

            let part_len = char_len(part);
            let joined_len = if buffer.is_empty() {
                part_len
            } else {
                buffer_len + separator_len + part_len
            };

            if joined_len > max && !buffer.trim().is_empty() {
                let flushed = buffer.trim();
                // The size bound wins over the requested overlap
                let room = max.saturating_sub(separator_len + part_len);
                let overlap = self.config.chunk_overlap.min(char_len(flushed)).min(room);
                let seed = tail_chars(flushed, overlap).trim_start().to_string();

                pieces.push(Piece::untagged(flushed));
                buffer_len = char_len(&seed);
                buffer = seed;
            }

            if !buffer.is_empty() {
                buffer.push_str(separator);
                buffer_len += separator_len;
            }
            buffer.push_str(part);
            buffer_len += part_len;
        }

        let rest = buffer.trim();
        if !rest.is_empty() {
            pieces.push(Piece::untagged(rest));
        }

        pieces
    }

    /// Line-based packing that starts a new section at every markdown heading
    fn split_by_structure(&self, text: &str) -> Vec<Piece> {
        let max = self.config.max_chunk_size;

        let mut pieces = Vec::new();
        let mut heading: Option<String> = None;
        let mut lines: Vec<&str> = Vec::new();

        for line in text.split('\n') {
            if let Some(next_heading) = heading_text(line) {
                push_section(&mut pieces, &lines, heading.as_deref());
                lines.clear();
                heading = Some(next_heading);
                continue;
            }

            let line_len = char_len(line);
            let joined_len = if lines.is_empty() {
                line_len
            } else {
                joined_len(&lines) + 1 + line_len
            };

            if joined_len > max && push_section(&mut pieces, &lines, heading.as_deref()) {
                let keep_from = lines.len().saturating_sub(STRUCTURE_OVERLAP_LINES);
                let mut seed: Vec<&str> = lines.split_off(keep_from);
                while !seed.is_empty() && joined_len_with(&seed, line_len) > max {
                    seed.remove(0);
                }
                lines = seed;
            }

            lines.push(line);
        }

        push_section(&mut pieces, &lines, heading.as_deref());
        pieces
    }
}

#[derive(Debug)]
struct Piece {
    content: String,
    heading: Option<String>,
}

impl Piece {
    fn untagged(content: &str) -> Self {
        Self {
            content: content.to_string(),
            heading: None,
        }
    }
}

/// Emit the joined lines as a piece if they contain any text; returns whether one was emitted
fn push_section(pieces: &mut Vec<Piece>, lines: &[&str], heading: Option<&str>) -> bool {
    let joined = lines.join("\n");
    let content = joined.trim();
    if content.is_empty() {
        return false;
    }

    pieces.push(Piece {
        content: content.to_string(),
        heading: heading.map(str::to_string),
    });
    true
}

/// Heading text of a markdown heading line (`#` to `######` followed by a space)
#[inline]
pub fn heading_text(line: &str) -> Option<String> {
    HEADING_REGEX
        .captures(line)
        .ok()
        .flatten()
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|heading| !heading.is_empty())
}

fn joined_len(lines: &[&str]) -> usize {
    lines.iter().map(|line| char_len(line)).sum::<usize>() + lines.len().saturating_sub(1)
}

fn joined_len_with(lines: &[&str], next_len: usize) -> usize {
    if lines.is_empty() {
        next_len
    } else {
        joined_len(lines) + 1 + next_len
    }
}

#[inline]
fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// The last `count` characters of `text`
fn tail_chars(text: &str, count: usize) -> &str {
    if count == 0 {
        return "";
    }

    text.char_indices()
        .rev()
        .nth(count - 1)
        .and_then(|(start, _)| text.get(start..))
        .unwrap_or(text)
}

//! Corpus loading and text splitting.
//!
//! Runs once at startup, before the index is built. `CorpusLoader` walks a
//! file or directory, reads plain text, markdown and JSON-lines records, and
//! hands text documents to `TextSplitter` so every fragment fits the
//! embedding model comfortably.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use parley_core::config::CorpusConfig;
use parley_core::error::ParleyError;
use parley_core::types::Fragment;

/// Separators tried in order: paragraph, line, word, then single characters.
const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

// =============================================================================
// TextSplitter
// =============================================================================

/// Recursive character splitter.
///
/// Splits on the coarsest separator present in the text and merges the
/// pieces back into chunks of at most `chunk_size` characters, carrying up
/// to `chunk_overlap` characters of trailing context into the next chunk.
/// Pieces still too large are split again with the next finer separator.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    /// Create a splitter. Fails if `chunk_size` is zero or the overlap is not
    /// smaller than the chunk size.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ParleyError> {
        if chunk_size == 0 {
            return Err(ParleyError::Corpus("chunk_size must be > 0".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(ParleyError::Corpus(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into trimmed, non-empty chunks in document order.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        // The empty separator always matches, so a separator is always found.
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep.as_str()))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).map(String::as_str).unwrap_or("");
        let finer = separators.get(position + 1..).unwrap_or(&[]);

        let pieces: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|piece| !piece.is_empty())
                .map(String::from)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<String> = Vec::new();

        for piece in pieces {
            if char_len(&piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending, separator));
                pending.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            } else {
                chunks.extend(self.split_with(&piece, finer));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending, separator));
        }
        chunks
    }

    /// Greedily join small pieces into chunks, keeping an overlap window.
    fn merge(&self, pieces: &[String], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            let joined_len = |window: &VecDeque<&str>, total: usize| {
                total + len + if window.is_empty() { 0 } else { sep_len }
            };

            if joined_len(&window, total) > self.chunk_size && !window.is_empty() {
                push_chunk(&mut chunks, &window, separator);

                while total > self.chunk_overlap
                    || (total > 0 && joined_len(&window, total) > self.chunk_size)
                {
                    let Some(front) = window.pop_front() else {
                        break;
                    };
                    let dropped = char_len(front) + if window.is_empty() { 0 } else { sep_len };
                    total = total.saturating_sub(dropped);
                }
            }

            total += len + if window.is_empty() { 0 } else { sep_len };
            window.push_back(piece);
        }

        push_chunk(&mut chunks, &window, separator);
        chunks
    }
}

impl Default for TextSplitter {
    fn default() -> Self {
        let defaults = CorpusConfig::default();
        Self {
            chunk_size: defaults.chunk_size,
            chunk_overlap: defaults.chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn push_chunk(chunks: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// =============================================================================
// CorpusLoader
// =============================================================================

/// Loads the document corpus from disk into ordered fragments.
///
/// Supported inputs:
/// - `.txt` / `.md`: split with the configured [`TextSplitter`]; each chunk
///   carries `source` and `chunk` metadata.
/// - `.jsonl`: one `{"text": ..., "metadata": {...}}` record per line, taken
///   as already chunked; `source` and `line` are added when missing.
///
/// Directories are walked recursively in sorted path order so the fragment
/// order (and therefore tie-breaking in search) is reproducible.
#[derive(Debug, Clone, Default)]
pub struct CorpusLoader {
    splitter: TextSplitter,
}

impl CorpusLoader {
    pub fn new(splitter: TextSplitter) -> Self {
        Self { splitter }
    }

    pub fn from_config(config: &CorpusConfig) -> Result<Self, ParleyError> {
        Ok(Self::new(TextSplitter::new(
            config.chunk_size,
            config.chunk_overlap,
        )?))
    }

    /// Load every supported file under `path` (a file or a directory).
    pub fn load(&self, path: &Path) -> Result<Vec<Fragment>, ParleyError> {
        if !path.exists() {
            return Err(ParleyError::Corpus(format!(
                "Corpus path does not exist: {}",
                path.display()
            )));
        }

        let files = if path.is_dir() {
            let mut files = Vec::new();
            collect_files(path, &mut files)?;
            files
        } else {
            vec![path.to_path_buf()]
        };

        let mut fragments = Vec::new();
        for file in &files {
            let loaded = self.load_file(file)?;
            debug!(file = %file.display(), fragments = loaded.len(), "Loaded corpus file");
            fragments.extend(loaded);
        }

        info!(
            path = %path.display(),
            files = files.len(),
            fragments = fragments.len(),
            "Corpus loaded"
        );
        Ok(fragments)
    }

    /// Load a single file, dispatching on its extension.
    pub fn load_file(&self, path: &Path) -> Result<Vec<Fragment>, ParleyError> {
        match extension(path).as_deref() {
            Some("txt") | Some("md") => {
                let text = std::fs::read_to_string(path)?;
                Ok(self.split_document(&text, &path.display().to_string()))
            }
            Some("jsonl") => {
                let content = std::fs::read_to_string(path)?;
                parse_jsonl(&content, &path.display().to_string())
            }
            _ => Err(ParleyError::Corpus(format!(
                "Unsupported corpus file type: {}",
                path.display()
            ))),
        }
    }

    /// Split an in-memory document into fragments tagged with `source`.
    pub fn split_document(&self, text: &str, source: &str) -> Vec<Fragment> {
        self.splitter
            .split(text)
            .into_iter()
            .enumerate()
            .map(|(chunk, text)| {
                Fragment::new(text)
                    .with_metadata("source", source)
                    .with_metadata("chunk", chunk)
            })
            .collect()
    }
}

fn is_supported(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("txt" | "md" | "jsonl"))
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ParleyError> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for entry in entries {
        if entry.is_dir() {
            collect_files(&entry, out)?;
        } else if is_supported(&entry) {
            out.push(entry);
        } else {
            warn!(file = %entry.display(), "Skipping unsupported corpus file");
        }
    }
    Ok(())
}

fn parse_jsonl(content: &str, source: &str) -> Result<Vec<Fragment>, ParleyError> {
    let mut fragments = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fragment: Fragment = serde_json::from_str(line).map_err(|e| {
            ParleyError::Corpus(format!("{}:{}: invalid record: {}", source, index + 1, e))
        })?;
        fragment
            .metadata
            .entry("source")
            .or_insert_with(|| source.into());
        fragment
            .metadata
            .entry("line")
            .or_insert_with(|| (index + 1).into());
        fragments.push(fragment);
    }
    Ok(fragments)
}

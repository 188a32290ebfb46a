//! Fixed-window text chunker with line bookkeeping.
//!
//! Splits file content into overlapping windows of `chunk_size` characters.
//! Consecutive windows start `chunk_size - chunk_overlap` characters apart,
//! so each window repeats the tail of the previous one. Windows are measured
//! in Unicode scalar values and never split a character.
//!
//! Every [`ChunkRecord`] carries the 1-based line of its first and last
//! character. `\n`, `\r\n` and a lone `\r` each end a line.

use anyhow::{bail, Result};
use std::path::Path;
use uuid::Uuid;

use crate::models::ChunkRecord;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Window geometry for [`chunk_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkOptions {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk size must be > 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            bail!("chunk overlap must be smaller than chunk size");
        }
        Ok(())
    }

    fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// Split `code` from `file_path` into ordered, overlapping chunks.
///
/// Empty content yields no chunks. The same input always produces the same
/// windows and line numbers; only the chunk ids differ between calls.
pub fn chunk_code(file_path: &str, code: &str, options: ChunkOptions) -> Result<Vec<ChunkRecord>> {
    options.validate()?;

    let chars: Vec<char> = code.chars().collect();
    if chars.is_empty() {
        return Ok(Vec::new());
    }

    let lines = line_table(&chars);
    let language = language_for(file_path);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + options.chunk_size).min(chars.len());
        chunks.push(ChunkRecord {
            id: Uuid::new_v4().to_string(),
            file_path: file_path.to_string(),
            language: language.clone(),
            code: chars[start..end].iter().collect(),
            start_line: lines[start],
            end_line: lines[end - 1],
        });

        if end == chars.len() {
            break;
        }
        start += options.stride();
    }

    Ok(chunks)
}

/// Language tag derived from the file extension.
pub fn language_for(file_path: &str) -> String {
    Path::new(file_path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_string())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// `table[i]` is the 1-based line number of character `i`.
fn line_table(chars: &[char]) -> Vec<u32> {
    let mut table = Vec::with_capacity(chars.len());
    let mut line = 1u32;
    for (i, c) in chars.iter().enumerate() {
        table.push(line);
        let ends_line = match c {
            '\n' => true,
            '\r' => chars.get(i + 1) != Some(&'\n'),
            _ => false,
        };
        if ends_line {
            line += 1;
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(chunk_size: usize, chunk_overlap: usize) -> ChunkOptions {
        ChunkOptions {
            chunk_size,
            chunk_overlap,
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_code("src/main.rs", "fn main() {}\n", ChunkOptions::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].code, "fn main() {}\n");
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
        assert_eq!(chunks[0].language, "rs");
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_code("a.ts", "", ChunkOptions::default()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_windows_overlap() {
        // size 4, overlap 1 => stride 3: [0..4] [3..7] [6..10]
        let chunks = chunk_code("a.txt", "abcdefghij", opts(4, 1)).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn test_last_window_is_short() {
        let chunks = chunk_code("a.txt", "abcdefgh", opts(5, 0)).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(texts, vec!["abcde", "fgh"]);
    }

    #[test]
    fn test_line_numbers() {
        let code = "one\ntwo\nthree\nfour\n";
        let chunks = chunk_code("a.md", code, opts(8, 0)).unwrap();
        assert_eq!(chunks[0].code, "one\ntwo\n");
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 2));
        assert_eq!(chunks[1].code, "three\nfo");
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (3, 4));
        for chunk in &chunks {
            assert!(chunk.has_valid_lines());
        }
    }

    #[test]
    fn test_crlf_and_lone_cr() {
        let table = line_table(&"a\r\nb\rc\nd".chars().collect::<Vec<_>>());
        // a \r \n b \r c \n d
        assert_eq!(table, vec![1, 1, 1, 2, 2, 3, 3, 4]);
    }

    #[test]
    fn test_multibyte_never_split() {
        let code = "héllo wörld ✓✓✓";
        let chunks = chunk_code("a.txt", code, opts(3, 1)).unwrap();
        for chunk in &chunks {
            assert!(chunk.code.chars().count() <= 3);
        }
        assert!(chunks.last().unwrap().code.ends_with('✓'));
    }

    #[test]
    fn test_language_tag() {
        assert_eq!(language_for("/x/y/App.tsx"), "tsx");
        assert_eq!(language_for("Makefile"), "unknown");
        assert_eq!(language_for("/x/.env"), "unknown");
    }

    #[test]
    fn test_invalid_overlap() {
        assert!(chunk_code("a.txt", "abc", opts(4, 4)).is_err());
        assert!(chunk_code("a.txt", "abc", opts(0, 0)).is_err());
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\nBeta\nGamma\nDelta\nEpsilon\n";
        let c1 = chunk_code("a.md", text, opts(10, 3)).unwrap();
        let c2 = chunk_code("a.md", text, opts(10, 3)).unwrap();
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.code, b.code);
            assert_eq!(a.start_line, b.start_line);
            assert_eq!(a.end_line, b.end_line);
            assert_ne!(a.id, b.id);
        }
    }
}

//! Sentence-aware text chunker with character overlap.
//!
//! Lesson text is whitespace-normalized, split into sentences, and packed
//! into windows of at most `chunk_size` characters. When the next sentence
//! would overflow the window, the window is closed and the next one is
//! seeded with the trailing `chunk_overlap` characters of the closed chunk
//! (snapped forward to a word start), so neighbouring chunks always share
//! context.
//!
//! Every stored chunk is prefixed with `Course <title> Lesson <n> content:`
//! so retrieved text is self-describing even out of context.
//!
//! # Example
//!
//! ```rust
//! use course_rag::chunk::chunk_text;
//!
//! let chunks = chunk_text("One sentence. Another sentence.", 800, 100);
//! assert_eq!(chunks, vec!["One sentence. Another sentence.".to_string()]);
//! ```

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::document::ParsedDocument;
use crate::models::Chunk;

static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[.!?]+["')\]]* "#).expect("valid sentence boundary pattern")
});

/// Collapse all whitespace runs into single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split normalized text into sentences, keeping terminal punctuation.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        // The match ends with the separating space; exclude it.
        let end = m.end() - 1;
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = m.end();
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The last `n` characters of `s`, moved forward to the start of a word
/// when a word boundary exists inside that window.
fn overlap_tail(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let total = char_len(s);
    let skip = total.saturating_sub(n);
    let start = s.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(s.len());
    let tail = &s[start..];
    if start > 0 && !s[..start].ends_with(' ') {
        if let Some(space) = tail.find(' ') {
            return &tail[space + 1..];
        }
    }
    tail
}

/// Break an over-long sentence into pieces of at most `max` characters,
/// preferring word boundaries.
fn split_long(sentence: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split(' ') {
        let mut word = word;
        // A single word longer than the limit gets a hard split.
        while char_len(word) > max {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let cut = word.char_indices().nth(max).map(|(i, _)| i).unwrap_or(word.len());
            pieces.push(word[..cut].to_string());
            word = &word[cut..];
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current.is_empty() {
            char_len(word)
        } else {
            char_len(&current) + 1 + char_len(word)
        };
        if needed > max && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Split text into overlapping chunk bodies of at most `chunk_size` chars.
///
/// Returns an empty vector for empty or whitespace-only input.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = chunk_overlap.min(chunk_size.saturating_sub(1));
    // Leave room for the overlap seed plus a separating space.
    let piece_limit = chunk_size.saturating_sub(chunk_overlap + 1).max(1);

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut has_fresh_text = false;

    for sentence in split_sentences(&normalized) {
        let pieces = if char_len(sentence) > piece_limit {
            split_long(sentence, piece_limit)
        } else {
            vec![sentence.to_string()]
        };

        for piece in pieces {
            let needed = if current.is_empty() {
                char_len(&piece)
            } else {
                char_len(&current) + 1 + char_len(&piece)
            };

            if needed > chunk_size && has_fresh_text {
                let seed = overlap_tail(&current, chunk_overlap).to_string();
                chunks.push(std::mem::replace(&mut current, seed));
            }

            if char_len(&current) + 1 + char_len(&piece) > chunk_size {
                // Only possible when the seed alone leaves no room.
                current.clear();
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&piece);
            has_fresh_text = true;
        }
    }

    if has_fresh_text {
        chunks.push(current);
    }

    chunks
}

/// Deterministic chunk id: the same course title and index always map to
/// the same id, so re-ingestion overwrites instead of duplicating.
pub fn chunk_id(course_title: &str, chunk_index: i64) -> String {
    let name = format!("{}\u{1f}{}", course_title, chunk_index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Provenance marker stored in front of every chunk.
pub fn provenance_prefix(course_title: &str, lesson_number: Option<u32>) -> String {
    match lesson_number {
        Some(n) => format!("Course {} Lesson {} content:", course_title, n),
        None => format!("Course {} content:", course_title),
    }
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Chunk every section of a parsed document.
///
/// Chunk indices start at 0 and increase across lessons in source order.
pub fn chunk_document(doc: &ParsedDocument, config: &ChunkingConfig) -> Vec<Chunk> {
    let title = &doc.course.title;
    let mut chunks = Vec::new();
    let mut index: i64 = 0;

    for section in &doc.sections {
        let prefix = provenance_prefix(title, section.lesson_number);
        for body in chunk_text(&section.body, config.chunk_size, config.chunk_overlap) {
            let text = format!("{} {}", prefix, body);
            chunks.push(Chunk {
                id: chunk_id(title, index),
                course_title: title.clone(),
                lesson_number: section.lesson_number,
                chunk_index: index,
                hash: content_hash(&text),
                text,
            });
            index += 1;
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_document;

    fn prose(target_chars: usize) -> String {
        let mut out = String::new();
        let mut i = 0;
        while out.len() < target_chars {
            out.push_str(&format!(
                "Sentence number {} explains one more idea about the topic. ",
                i
            ));
            i += 1;
        }
        out.trim_end().to_string()
    }

    #[test]
    fn test_split_sentences() {
        let s = split_sentences("First one. Second one! Third? Trailing");
        assert_eq!(s, vec!["First one.", "Second one!", "Third?", "Trailing"]);
    }

    #[test]
    fn test_decimal_point_is_not_a_boundary() {
        let s = split_sentences("Version 2.5 is out. Try it.");
        assert_eq!(s, vec!["Version 2.5 is out.", "Try it."]);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_text("", 800, 100).is_empty());
        assert!(chunk_text("   \n\t ", 800, 100).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Just one short sentence.", 800, 100);
        assert_eq!(chunks, vec!["Just one short sentence.".to_string()]);
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = prose(5000);
        for c in chunk_text(&text, 800, 100) {
            assert!(c.chars().count() <= 800, "chunk too long: {}", c.len());
        }
    }

    #[test]
    fn test_overlap_between_neighbours() {
        let text = prose(3000);
        let chunks = chunk_text(&text, 800, 100);
        assert!(chunks.len() >= 3);
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            // The next chunk opens with a suffix of the previous chunk no
            // longer than the overlap and not much shorter than it.
            let shared = (1..=100)
                .rev()
                .find(|&k| {
                    next.len() >= k
                        && next.is_char_boundary(k)
                        && prev.ends_with(&next[..k])
                })
                .unwrap_or(0);
            assert!(shared >= 70, "overlap too small: {}", shared);
        }
    }

    #[test]
    fn test_zero_overlap() {
        let text = prose(2000);
        let chunks = chunk_text(&text, 400, 0);
        assert!(chunks.len() >= 5);
        let rejoined = chunks.join(" ");
        assert_eq!(rejoined, normalize_whitespace(&text));
    }

    #[test]
    fn test_long_sentence_is_split() {
        let sentence = "word ".repeat(400);
        let chunks = chunk_text(&sentence, 200, 20);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 200);
        }
    }

    #[test]
    fn test_multibyte_text() {
        let text = "Ünïcödé sentence with ümlauts. ".repeat(80);
        let chunks = chunk_text(&text, 120, 30);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 120);
        }
    }

    #[test]
    fn test_chunk_id_deterministic() {
        assert_eq!(chunk_id("A", 3), chunk_id("A", 3));
        assert_ne!(chunk_id("A", 3), chunk_id("A", 4));
        assert_ne!(chunk_id("A", 3), chunk_id("B", 3));
    }

    #[test]
    fn test_two_lesson_scenario() {
        let text = format!(
            "Course Title: Intro to X\nLesson 1: Long\n{}\nLesson 2: Short\nThis is short.",
            prose(1500)
        );
        let doc = parse_document("x.txt", &text).unwrap();
        let chunks = chunk_document(&doc, &ChunkingConfig::default());

        let lesson1 = chunks.iter().filter(|c| c.lesson_number == Some(1)).count();
        let lesson2: Vec<_> = chunks
            .iter()
            .filter(|c| c.lesson_number == Some(2))
            .collect();
        assert!(lesson1 >= 2);
        assert_eq!(lesson2.len(), 1);
        assert_eq!(
            lesson2[0].text,
            "Course Intro to X Lesson 2 content: This is short."
        );

        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.id, chunk_id("Intro to X", i as i64));
        }
        assert!(chunks[0].text.starts_with("Course Intro to X Lesson 1 content: "));
    }

    #[test]
    fn test_preamble_chunk_prefix() {
        let doc = parse_document("p.txt", "Course Title: P\nIntro words here.").unwrap();
        let chunks = chunk_document(&doc, &ChunkingConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].lesson_number, None);
        assert_eq!(chunks[0].text, "Course P content: Intro words here.");
    }
}

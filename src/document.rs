//! Course document parsing.
//!
//! A course document is plain text with a small header followed by lesson
//! sections:
//!
//! ```text
//! Course Title: Intro to X
//! Course Link: https://example.com/x
//! Course Instructor: Ada
//!
//! Lesson 0: Welcome
//! Lesson Link: https://example.com/x/0
//! Transcript text...
//!
//! Lesson 1: Getting started
//! More transcript text...
//! ```
//!
//! Only `Course Title:` is mandatory. Text between the header and the first
//! lesson marker is kept as a preamble section with no lesson number.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::IngestError;
use crate::models::{Course, Lesson};

static LESSON_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^lesson\s+(\d+)\s*:\s*(.*)$").expect("valid lesson marker pattern")
});

/// A run of body text belonging to one lesson (or the preamble).
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub lesson_number: Option<u32>,
    pub body: String,
}

/// Result of parsing one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub course: Course,
    /// Sections in source order. Lessons without body text still get an
    /// (empty) section so their metadata is never lost.
    pub sections: Vec<Section>,
}

fn header_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let (k, v) = line.split_once(':')?;
    if k.trim().eq_ignore_ascii_case(key) {
        Some(v.trim())
    } else {
        None
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse raw document text. `origin` is only used in error messages.
pub fn parse_document(origin: &str, text: &str) -> Result<ParsedDocument, IngestError> {
    let mut title: Option<String> = None;
    let mut link = None;
    let mut instructor = None;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut lessons: Vec<Lesson> = Vec::new();
    let mut sections: Vec<Section> = Vec::new();
    let mut current = Section {
        lesson_number: None,
        body: String::new(),
    };
    let mut in_header = true;
    let mut expect_lesson_link = false;

    for raw in text.lines() {
        let line = raw.trim();

        if in_header {
            if let Some(v) = header_value(line, "Course Title") {
                title = non_empty(v);
                continue;
            }
            if let Some(v) = header_value(line, "Course Link") {
                link = non_empty(v);
                continue;
            }
            if let Some(v) = header_value(line, "Course Instructor") {
                instructor = non_empty(v);
                continue;
            }
            if line.is_empty() {
                continue;
            }
            in_header = false;
        }

        if let Some(caps) = LESSON_MARKER.captures(line) {
            let number = caps[1].parse::<u32>().ok();
            let increasing = match (number, lessons.last()) {
                (Some(n), Some(prev)) => n > prev.number,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if let (Some(number), true) = (number, increasing) {
                sections.push(std::mem::replace(
                    &mut current,
                    Section {
                        lesson_number: Some(number),
                        body: String::new(),
                    },
                ));
                lessons.push(Lesson {
                    number,
                    title: caps[2].trim().to_string(),
                    link: None,
                });
                expect_lesson_link = true;
                continue;
            }
            tracing::warn!(
                "{}: lesson marker '{}' is out of order; treating it as body text",
                origin,
                line
            );
        }

        if expect_lesson_link {
            if let Some(v) = header_value(line, "Lesson Link") {
                if let Some(lesson) = lessons.last_mut() {
                    lesson.link = non_empty(v);
                }
                expect_lesson_link = false;
                continue;
            }
            if !line.is_empty() {
                expect_lesson_link = false;
            }
        }

        if !current.body.is_empty() {
            current.body.push('\n');
        }
        current.body.push_str(raw);
    }
    sections.push(current);

    let title = title.ok_or_else(|| IngestError::MissingTitle {
        path: origin.to_string(),
    })?;

    // The preamble section only matters if it carries text.
    sections.retain(|s| s.lesson_number.is_some() || !s.body.trim().is_empty());

    Ok(ParsedDocument {
        course: Course {
            title,
            link,
            instructor,
            lessons,
        },
        sections,
    })
}

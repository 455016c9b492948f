//! Core data models used throughout the pipeline.
//!
//! These types represent the courses, lessons, and chunks produced by
//! ingestion, plus the citation and answer shapes that flow back out of a
//! query.

use serde::{Deserialize, Serialize};

/// A parsed course document. The title is the primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub title: String,
    pub link: Option<String>,
    pub instructor: Option<String>,
    pub lessons: Vec<Lesson>,
}

impl Course {
    /// Find a lesson by number.
    pub fn lesson(&self, number: u32) -> Option<&Lesson> {
        self.lessons.iter().find(|l| l.number == number)
    }

    /// Text embedded into the catalog collection for this course.
    ///
    /// Carries the title plus every lesson title so that both fuzzy name
    /// lookups and outline-style questions land on the right course.
    pub fn summary_text(&self) -> String {
        let mut out = format!("Course: {}", self.title);
        if let Some(instructor) = &self.instructor {
            out.push_str(&format!("\nInstructor: {}", instructor));
        }
        for lesson in &self.lessons {
            out.push_str(&format!("\nLesson {}: {}", lesson.number, lesson.title));
        }
        out
    }
}

/// A lesson within a course. Lesson numbers are unique per course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub number: u32,
    pub title: String,
    pub link: Option<String>,
}

/// A span of lesson text, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Deterministic id derived from `(course_title, chunk_index)`.
    pub id: String,
    pub course_title: String,
    /// `None` for preamble text before the first lesson marker.
    pub lesson_number: Option<u32>,
    /// Zero-based, monotonically increasing across the whole course.
    pub chunk_index: i64,
    /// Chunk text including the provenance prefix.
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// Citation metadata attached to a retrieved chunk or outline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub course: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Source {
    /// Display label, e.g. `"Intro to X - Lesson 2"`.
    pub fn label(&self) -> String {
        match self.lesson {
            Some(n) => format!("{} - Lesson {}", self.course, n),
            None => self.course.clone(),
        }
    }
}

/// One tool invocation within a single query cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: String,
    pub sources: Vec<Source>,
}

/// Final output of one query.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
    /// Tool calls made while producing the answer, in execution order.
    #[serde(skip)]
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Catalog overview returned by `get_catalog_stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogStats {
    pub course_count: usize,
    pub titles: Vec<String>,
}

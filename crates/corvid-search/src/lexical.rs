//! Lexical fallback scoring with synonym expansion.
//!
//! Used when vector retrieval is empty or below the confidence threshold.
//! The query is expanded through a small table of workplace abbreviations,
//! then chunks are scored by weighted occurrence counts of expansion phrases
//! and individual query terms, capped at 1.0.

/// Domain abbreviation expansions. Keys are matched as whole query terms.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("okr", &["objectives and key results", "key result", "objective"]),
    ("okrs", &["objectives and key results", "key results"]),
    ("kpi", &["key performance indicator", "performance metric"]),
    ("q1", &["first quarter", "quarter one"]),
    ("q2", &["second quarter", "quarter two"]),
    ("q3", &["third quarter", "quarter three"]),
    ("q4", &["fourth quarter", "quarter four"]),
    ("eng", &["engineering"]),
    ("hr", &["human resources"]),
    ("pto", &["paid time off", "vacation"]),
    ("arr", &["annual recurring revenue"]),
    ("roadmap", &["product roadmap", "plan"]),
];

/// Weight of one expansion-phrase occurrence.
const PHRASE_WEIGHT: f32 = 0.3;
/// Weight of one individual query-term occurrence.
const TERM_WEIGHT: f32 = 0.1;
/// Terms shorter than this are noise and are not scored.
const MIN_TERM_LEN: usize = 3;

/// Individual query terms, lowercased.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expansion phrases for the query's abbreviation terms.
pub fn expand_query(query: &str) -> Vec<String> {
    let terms = query_terms(query);
    let mut phrases = Vec::new();
    for term in &terms {
        if let Some((_, expansions)) = SYNONYMS.iter().find(|(abbr, _)| abbr == term) {
            for expansion in expansions.iter() {
                phrases.push((*expansion).to_string());
            }
        }
    }
    phrases
}

/// Score a chunk's text against the query: phrase hits count more than
/// individual term hits, and the total is capped at 1.0.
pub fn lexical_score(text: &str, phrases: &[String], terms: &[String]) -> f32 {
    let haystack = text.to_lowercase();
    let mut score = 0.0f32;

    for phrase in phrases {
        score += haystack.matches(phrase.as_str()).count() as f32 * PHRASE_WEIGHT;
    }
    for term in terms {
        if term.len() < MIN_TERM_LEN && !SYNONYMS.iter().any(|(abbr, _)| abbr == term) {
            continue;
        }
        score += haystack.matches(term.as_str()).count() as f32 * TERM_WEIGHT;
    }

    score.min(1.0)
}

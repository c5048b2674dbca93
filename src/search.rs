//! Relevance search
//!
//! Fuzzy, date-aware ranking over record collections. Used by the todos
//! provider for both direct API search and the agent's search-before-mutate
//! discipline. The weights are empirically chosen; keep them as-is for
//! behavioral compatibility.

use chrono::NaiveDate;
use std::cmp::Ordering;

/// Score for an exact case-insensitive substring match on the primary text.
const TEXT_SUBSTRING_SCORE: f64 = 0.9;
/// Weight applied to the similarity ratio against the primary text.
const TEXT_FUZZY_WEIGHT: f64 = 0.8;
/// Score when the query is a substring of a tag.
const TAG_SUBSTRING_SCORE: f64 = 0.85;
/// Weight applied to the similarity ratio against a tag.
const TAG_FUZZY_WEIGHT: f64 = 0.7;
/// Score for a date query exactly matching the record's due date.
const DUE_DATE_SCORE: f64 = 1.0;
/// Score when the parsed date string appears verbatim in the primary text.
const DATE_IN_TEXT_SCORE: f64 = 0.85;
/// Records scoring at or below this are dropped.
const RELEVANCE_THRESHOLD: f64 = 0.3;

/// What a record must expose to be rankable.
pub trait SearchRecord {
    fn primary_text(&self) -> &str;
    fn tags(&self) -> &[String];
    /// Due date as an ISO `YYYY-MM-DD` string, if any.
    fn due_date(&self) -> Option<&str>;
}

/// A record paired with its relevance score.
#[derive(Debug, Clone)]
pub struct Scored<T> {
    pub record: T,
    pub score: f64,
}

/// Rank records against a query.
///
/// An empty or all-whitespace query bypasses scoring entirely and returns
/// every record in original order; it is not "zero matches". Otherwise
/// records scoring at or below the relevance threshold are dropped and
/// survivors come back in descending score order, ties kept stable.
pub fn rank<T: SearchRecord + Clone>(query: &str, records: &[T], today: NaiveDate) -> Vec<Scored<T>> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return records
            .iter()
            .map(|r| Scored {
                record: r.clone(),
                score: 0.0,
            })
            .collect();
    }

    let query_lower = trimmed.to_lowercase();
    let query_date = parse_query_date(trimmed, today);

    let mut scored: Vec<Scored<T>> = records
        .iter()
        .filter_map(|r| {
            let score = score_record(&query_lower, query_date, r);
            (score > RELEVANCE_THRESHOLD).then(|| Scored {
                record: r.clone(),
                score,
            })
        })
        .collect();

    // Stable sort keeps original collection order on ties.
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored
}

fn score_record<T: SearchRecord>(query: &str, query_date: Option<NaiveDate>, record: &T) -> f64 {
    let text = record.primary_text().to_lowercase();
    let mut score: f64 = 0.0;

    if text.contains(query) {
        score = score.max(TEXT_SUBSTRING_SCORE);
    }
    score = score.max(TEXT_FUZZY_WEIGHT * similarity_ratio(query, &text));

    for tag in record.tags() {
        let tag_lower = tag.to_lowercase();
        if tag_lower.contains(query) {
            score = score.max(TAG_SUBSTRING_SCORE);
        } else {
            score = score.max(TAG_FUZZY_WEIGHT * similarity_ratio(query, &tag_lower));
        }
    }

    if let Some(date) = query_date {
        let iso = date.format("%Y-%m-%d").to_string();
        if record.due_date() == Some(iso.as_str()) {
            score = score.max(DUE_DATE_SCORE);
        } else if text.contains(&iso) {
            score = score.max(DATE_IN_TEXT_SCORE);
        }
    }

    score
}

/// Try to read the query as a calendar date. Yearless formats ("10/17",
/// "Oct 17") resolve against the supplied reference date's year.
pub fn parse_query_date(query: &str, today: NaiveDate) -> Option<NaiveDate> {
    const ABSOLUTE: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"];
    const YEARLESS: &[&str] = &["%m/%d", "%b %d", "%B %d", "%d %b", "%d %B"];

    for format in ABSOLUTE {
        if let Ok(date) = NaiveDate::parse_from_str(query, format) {
            return Some(date);
        }
    }
    for format in YEARLESS {
        let with_year = format!("{} {}", query, today.format("%Y"));
        if let Ok(date) = NaiveDate::parse_from_str(&with_year, &format!("{} %Y", format)) {
            return Some(date);
        }
    }
    None
}

/// Character-level similarity in [0, 1]: twice the number of characters in
/// common (longest matching blocks, applied recursively to the pieces on
/// either side) over the total length of both strings.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matches = matching_chars(&a, &b);
    2.0 * matches as f64 / (a.len() + b.len()) as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (a_start, b_start, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..a_start], &b[..b_start])
        + matching_chars(&a[a_start + len..], &b[b_start + len..])
}

fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev_row = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        let mut row = vec![0usize; b.len() + 1];
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                row[j] = prev_row[j - 1] + 1;
                if row[j] > best.2 {
                    best = (i - row[j], j - row[j], row[j]);
                }
            }
        }
        prev_row = row;
    }
    best
}

//! Find cells by source text or rendered result.

use regex::{Regex, RegexBuilder};
use tabula_engine::engine::Key;

use crate::code::CodeArray;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchFlags {
    pub match_case: bool,
    pub whole_word: bool,
    /// Treat the pattern as a regular expression instead of plain text
    pub regex: bool,
    pub direction: Direction,
}

fn build_matcher(pattern: &str, flags: &SearchFlags) -> Option<Regex> {
    let body = if flags.regex {
        pattern.to_string()
    } else {
        regex::escape(pattern)
    };
    let body = if flags.whole_word {
        format!(r"\b(?:{})\b", body)
    } else {
        body
    };
    RegexBuilder::new(&body)
        .case_insensitive(!flags.match_case)
        .build()
        .ok()
}

/// Byte position of the first match of `pattern` in `text`.
///
/// A malformed regular expression never matches.
pub fn string_match(text: &str, pattern: &str, flags: &SearchFlags) -> Option<usize> {
    build_matcher(pattern, flags)?.find(text).map(|m| m.start())
}

impl CodeArray {
    /// Next cell after `start` whose source, or rendered result when
    /// `search_results` is set, contains `pattern`.
    ///
    /// Cells are visited sheet by sheet, column by column, row by row. The
    /// scan wraps around the grid once and tests `start` itself last.
    pub fn find_next_match(
        &self,
        start: Key,
        pattern: &str,
        flags: &SearchFlags,
        search_results: bool,
    ) -> Option<Key> {
        let matcher = build_matcher(pattern, flags)?;

        let mut keys = self.keys();
        keys.sort_by_key(Key::scan_order);
        let split = keys.partition_point(|k| k.scan_order() < start.scan_order());
        let (before, rest) = keys.split_at(split);
        let (has_start, after) = match rest.first() {
            Some(&first) if first == start => (true, &rest[1..]),
            _ => (false, rest),
        };

        let ordered: Vec<Key> = match flags.direction {
            Direction::Forward => after.iter().chain(before).copied().collect(),
            Direction::Backward => before.iter().rev().chain(after.iter().rev()).copied().collect(),
        };

        ordered
            .into_iter()
            .chain(has_start.then_some(start))
            .find(|&key| {
                if let Ok(Some(code)) = self.get(key)
                    && matcher.is_match(&code)
                {
                    return true;
                }
                search_results
                    && matches!(self.read(key), Ok(Some(value))
                        if matcher.is_match(&value.render()))
            })
    }
}

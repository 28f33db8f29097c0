//! Subscription matching for discovered release names
//!
//! Filters are comma-separated regular expressions stored on the
//! subscription. They are compiled on every call so an edited filter takes
//! effect on the next feed cycle without a restart.

use crate::types::Subscription;
use regex::Regex;
use tracing::warn;

/// Compile a comma-separated pattern list, skipping blanks and invalid patterns
pub fn compile_patterns(patterns: &str, kind: &str) -> Vec<Regex> {
    patterns
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|pattern| {
            // size limit keeps a hostile pattern from compiling into a huge DFA
            regex::RegexBuilder::new(pattern)
                .size_limit(1024 * 1024)
                .build()
                .map_err(|e| {
                    warn!(kind, pattern, error = %e, "invalid filter pattern, skipping");
                })
                .ok()
        })
        .collect()
}

impl Subscription {
    /// Whether `name` passes this subscription's include/exclude filters
    ///
    /// Include patterns are OR-ed and ignored when empty. Any exclude match
    /// rejects the name, even if an include pattern matched.
    pub fn accepts(&self, name: &str) -> bool {
        let includes = compile_patterns(&self.include_filter, "include");
        if !includes.is_empty() && !includes.iter().any(|re| re.is_match(name)) {
            return false;
        }

        let excludes = compile_patterns(&self.exclude_filter, "exclude");
        !excludes.iter().any(|re| re.is_match(name))
    }
}

/// Pick the subscription a release name belongs to
///
/// Candidates are active subscriptions whose raw title occurs in `name`.
/// The longest raw title wins (the most specific match); ties go to the
/// earlier subscription. The winner must also accept `name` through its
/// filters, otherwise nothing matches.
pub fn find_subscription<'a>(name: &str, subscriptions: &'a [Subscription]) -> Option<&'a Subscription> {
    let mut best: Option<&Subscription> = None;
    for sub in subscriptions {
        if !sub.is_active() || sub.title_raw.is_empty() || !name.contains(&sub.title_raw) {
            continue;
        }
        if best.is_none_or(|b| sub.title_raw.len() > b.title_raw.len()) {
            best = Some(sub);
        }
    }
    best.filter(|sub| sub.accepts(name))
}

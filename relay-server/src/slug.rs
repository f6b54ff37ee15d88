//! # Slug Allocation
//!
//! A slug is the short, URL-safe label that forms `/t/<slug>/`. The
//! generation scheme (adjective-noun-number word lists) is grounded in the
//! same style of friendly, human-readable identifier the teacher's
//! `generate_agent_id` produces (`relay-server/src/state.rs`'s
//! `"{XXXX}-{XXXX}"` short-UUID pattern), adapted to spec §4.B's
//! `<adj>-<noun>-<0..999>` shape instead of hex pairs.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

const ADJECTIVES: &[&str] = &[
    "brave", "calm", "clever", "cosmic", "crimson", "curious", "daring", "eager", "fancy",
    "feisty", "gentle", "golden", "happy", "humble", "jolly", "lively", "lucky", "mellow",
    "misty", "quiet", "swift", "witty",
];

const NOUNS: &[&str] = &[
    "otter", "falcon", "badger", "comet", "dolphin", "ember", "ferret", "glacier", "harbor",
    "heron", "island", "jackal", "kitten", "lagoon", "meadow", "nebula", "orchid", "panther",
    "quail", "raven", "sparrow", "tundra",
];

pub const MAX_GENERATE_ATTEMPTS: u32 = 100;

static SLUG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").unwrap());

/// Maximum length of a client-supplied slug, per spec §4.B.
pub const MAX_SLUG_LEN: usize = 63;

/// Validates a client-requested slug against spec §4.B's acceptance rule:
/// `[a-z0-9-]+`, length <= 63.
pub fn is_valid_requested_slug(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate.len() <= MAX_SLUG_LEN
        && SLUG_PATTERN.is_match(candidate)
}

/// Generates a random `<adjective>-<noun>-<0..999>` candidate slug.
pub fn generate_candidate() -> String {
    let mut rng = rand::thread_rng();
    let adj = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let num: u32 = rng.gen_range(0..1000);
    format!("{adj}-{noun}-{num}")
}

/// Total number of distinct generated combinations, for documentation and
/// tests (~484,000 per spec §4.B).
pub fn combination_space() -> usize {
    ADJECTIVES.len() * NOUNS.len() * 1000
}

/// Attempts to find a free slug by generating candidates and calling
/// `is_free` on each, up to `MAX_GENERATE_ATTEMPTS` times. The caller is
/// responsible for making `is_free` + insertion atomic (spec invariant 6);
/// this function only proposes candidates.
pub fn generate_free_slug(mut is_free: impl FnMut(&str) -> bool) -> Option<String> {
    for _ in 0..MAX_GENERATE_ATTEMPTS {
        let candidate = generate_candidate();
        if is_free(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_slug_matches_shape() {
        let shape = Regex::new(r"^[a-z]+-[a-z]+-[0-9]{1,3}$").unwrap();
        for _ in 0..200 {
            let slug = generate_candidate();
            assert!(shape.is_match(&slug), "bad slug: {slug}");
        }
    }

    #[test]
    fn requested_slug_validation() {
        assert!(is_valid_requested_slug("my-app"));
        assert!(is_valid_requested_slug("app123"));
        assert!(!is_valid_requested_slug(""));
        assert!(!is_valid_requested_slug("My-App"));
        assert!(!is_valid_requested_slug("my_app"));
        assert!(!is_valid_requested_slug("has space"));
        assert!(!is_valid_requested_slug(&"a".repeat(64)));
        assert!(is_valid_requested_slug(&"a".repeat(63)));
    }

    #[test]
    fn generate_free_slug_stops_after_cap_when_always_taken() {
        let mut calls = 0;
        let result = generate_free_slug(|_| {
            calls += 1;
            false
        });
        assert!(result.is_none());
        assert_eq!(calls, MAX_GENERATE_ATTEMPTS);
    }

    #[test]
    fn generate_free_slug_returns_first_free_candidate() {
        let mut calls = 0;
        let result = generate_free_slug(|_| {
            calls += 1;
            calls == 3
        });
        assert!(result.is_some());
        assert_eq!(calls, 3);
    }

    #[test]
    fn combination_space_is_in_spec_ballpark() {
        let n = combination_space();
        assert!(n > 400_000 && n < 600_000, "got {n}");
    }
}

use rand::Rng;
use rand::seq::SliceRandom;
use skyquiz_shared::is_known_label;

use crate::config::FALLBACK_CITIES;

pub const OPTION_COUNT: usize = 4;

/// Multiple-choice options: the answer plus up to three distinct known airports, shuffled.
///
/// Airports seen so far are preferred; the fixed city list pads the set when they run out.
pub fn build_options<R: Rng + ?Sized>(airports: &[String], answer: &str, rng: &mut R) -> Vec<String> {
    let mut candidates: Vec<&str> = airports.iter().map(String::as_str).collect();
    candidates.shuffle(rng);

    let mut options = vec![answer.to_string()];
    for candidate in candidates.into_iter().chain(FALLBACK_CITIES.iter().copied()) {
        if options.len() >= OPTION_COUNT {
            break;
        }
        let candidate = candidate.trim();
        if !is_known_label(candidate)
            || options.iter().any(|existing| existing == candidate)
        {
            continue;
        }
        options.push(candidate.to_string());
    }

    options.shuffle(rng);
    options
}

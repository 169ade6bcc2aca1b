//! Heuristic detection of keyboard mashing and other non-language input.
//!
//! Several independent checks run per token; a token is gibberish when any of
//! them fires. An utterance is gibberish when at least half of its tokens are.

const VOWELS: &str = "aeiouy";

/// Letter sequences whose consecutive trigrams count as a keyboard or
/// alphabet walk, in either direction.
const WALKS: &[&str] = &[
    "qwertyuiop",
    "asdfghjkl",
    "zxcvbnm",
    "abcdefghijklmnopqrstuvwxyz",
    "qaz",
    "wsx",
    "edc",
    "rfv",
    "tgb",
    "yhn",
    "ujm",
];

/// Utterances with fewer letters than this are never flagged.
const MIN_LETTERS: usize = 3;

/// Whether the whole utterance looks like noise.
pub fn is_gibberish(text: &str) -> bool {
    let trimmed = text.trim();
    let letters = trimmed.chars().filter(|c| c.is_alphabetic()).count();

    if letters == 0 {
        return trimmed.chars().filter(|c| !c.is_whitespace()).count() >= 3;
    }
    if letters < MIN_LETTERS {
        return false;
    }

    let tokens: Vec<String> = trimmed
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.is_empty() {
        return false;
    }

    // spaced-out mashing such as "a s d f"
    if tokens.len() >= 3 && tokens.iter().all(|t| t.chars().count() == 1) {
        return true;
    }

    let flagged = tokens.iter().filter(|t| token_is_gibberish(t)).count();
    flagged * 2 >= tokens.len()
}

/// Whether a single lowercase token is gibberish.
pub(crate) fn token_is_gibberish(token: &str) -> bool {
    let chars: Vec<char> = token.chars().collect();

    if has_alnum_noise(&chars) {
        return true;
    }

    letter_runs(&chars)
        .iter()
        .filter(|run| run.len() >= 3)
        .any(|run| {
            has_repetition(run) || is_keyboard_walk(run) || is_vowel_starved(run)
        })
}

/// Letters and digits alternating at least twice, as in `a1b2c3`.
fn has_alnum_noise(chars: &[char]) -> bool {
    if chars.len() < 4 {
        return false;
    }
    let has_letter = chars.iter().any(|c| c.is_alphabetic());
    let has_digit = chars.iter().any(|c| c.is_ascii_digit());
    if !(has_letter && has_digit) {
        return false;
    }
    let transitions = chars
        .windows(2)
        .filter(|w| w[0].is_ascii_digit() != w[1].is_ascii_digit())
        .count();
    transitions >= 2
}

fn letter_runs(chars: &[char]) -> Vec<Vec<char>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for &c in chars {
        if c.is_alphabetic() {
            current.push(c);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// Same-character runs, or a short unit repeated over the whole run.
fn has_repetition(run: &[char]) -> bool {
    let mut long_runs = 0;
    let mut streak = 1;
    for i in 1..=run.len() {
        if i < run.len() && run[i] == run[i - 1] {
            streak += 1;
            continue;
        }
        if streak >= 4 {
            return true;
        }
        if streak >= 3 {
            long_runs += 1;
        }
        streak = 1;
    }
    if long_runs >= 2 {
        return true;
    }

    (1..=4).any(|unit| {
        run.len() >= unit * 3
            && run.len() % unit == 0
            && run.chunks(unit).all(|chunk| chunk == &run[..unit])
    })
}

fn is_walk_trigram(trigram: &[char]) -> bool {
    let forward: String = trigram.iter().collect();
    let backward: String = trigram.iter().rev().collect();
    WALKS
        .iter()
        .any(|walk| walk.contains(&forward) || walk.contains(&backward))
}

/// Most trigrams are adjacent keys or consecutive letters.
fn is_keyboard_walk(run: &[char]) -> bool {
    let trigrams = run.len().saturating_sub(2);
    if trigrams == 0 {
        return false;
    }
    let walks = run.windows(3).filter(|w| is_walk_trigram(w)).count();
    if run.len() >= 6 {
        walks * 2 >= trigrams
    } else {
        walks * 2 > trigrams
    }
}

/// No vowels at all in a 4+ letter run, or six consonants in a row.
fn is_vowel_starved(run: &[char]) -> bool {
    let is_vowel = |c: &char| VOWELS.contains(*c);
    if run.len() >= 4 && !run.iter().any(is_vowel) {
        return true;
    }
    let mut consonants = 0;
    for c in run {
        if is_vowel(c) {
            consonants = 0;
        } else {
            consonants += 1;
            if consonants >= 6 {
                return true;
            }
        }
    }
    false
}

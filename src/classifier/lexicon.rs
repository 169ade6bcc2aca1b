//! Fixed phrase lists backing the response classifier.
//!
//! Phrases are matched on normalized text (lowercase, punctuation other than
//! apostrophes replaced by spaces) at word boundaries. A trailing `*` turns a
//! phrase into a stem that matches any word continuation.

use once_cell::sync::Lazy;
use regex::Regex;

pub(crate) const INAPPROPRIATE: &[&str] = &[
    "stupid", "idiot*", "dumb", "shut up", "useless", "hate you", "fuck*", "shit*", "damn",
    "crap*", "sucks", "moron*", "bullshit", "wtf", "screw you", "piss off",
];

/// First words that make an utterance interrogative even without `?`.
pub(crate) const QUESTION_OPENERS: &[&str] = &[
    "what", "what's", "whats", "how", "why", "where", "where's", "when", "which", "who",
    "whom", "whose", "can", "could", "should", "would", "is", "are", "do", "does", "did",
    "will", "may", "explain",
];

pub(crate) const INTERFACE: &[&str] = &[
    "node*", "button*", "click*", "drag*", "drop", "delete", "erase", "canvas", "interface",
    "toolbar", "menu", "screen", "save", "submit", "undo", "zoom", "arrow*", "draw*",
    "the tool", "this tool", "the app", "the timer", "the chat", "text box",
];

pub(crate) const DISAGREEMENT: &[&str] = &[
    "disagree*", "don't agree", "dont agree", "do not agree", "not right", "that's wrong",
    "thats wrong", "that is wrong", "it's wrong", "not true", "not correct", "incorrect",
    "i think differently", "no but", "not convinced", "i doubt", "i don't think so",
    "that's not how",
];

/// Disagreement about what the map says.
pub(crate) const CONTENT_TERMS: &[&str] = &[
    "concept*", "relationship*", "connection*", "link*", "definition", "meaning", "correct",
    "relation*", "fact*",
];

/// Disagreement about how the task is being done.
pub(crate) const APPROACH_TERMS: &[&str] = &[
    "approach*", "strateg*", "method*", "organi*", "structur*", "order", "way", "process",
    "step*", "layout",
];

pub(crate) const PREMATURE_ENDING: &[&str] = &[
    "i'm done", "im done", "i am done", "that's all", "thats all", "that is all",
    "i'm finished", "im finished", "i am finished", "can't think of anything",
    "cant think of anything", "cannot think of anything", "nothing more", "nothing else",
    "want to stop", "let's stop", "stop now", "end the session", "end session", "next round",
    "move on", "skip", "give up", "i quit", "enough for now",
];

pub(crate) const FRUSTRATION: &[&str] = &[
    "too difficult", "too hard", "struggl*", "frustrat*", "overwhelm*", "annoy*",
    "this is hard", "so hard", "tired of", "sick of", "hate this", "pointless",
];

pub(crate) const CONFUSION: &[&str] = &[
    "confus*", "don't get it", "dont get it", "don't understand", "dont understand",
    "do not understand", "not sure", "no idea", "i don't know", "i dont know", "lost",
    "unclear", "stuck", "makes no sense", "doesn't make sense",
];

pub(crate) const OFF_TOPIC: &[&str] = &[
    "weather", "game last night", "watch the game", "football", "soccer", "basketball",
    "movie*", "netflix", "tv show", "music", "song*", "lunch", "dinner", "breakfast",
    "weekend", "vacation", "holiday*", "birthday", "girlfriend", "boyfriend", "video game*",
    "instagram", "tiktok", "joke", "what time is it", "your name", "are you human",
    "are you a robot",
];

/// Markers of a concrete, reasoned contribution.
pub(crate) const IDEA_MARKERS: &[&str] = &[
    "because", "i think", "i believe", "this shows", "this means", "which means",
    "i connected", "i've connected", "i have connected", "i added", "i've added",
    "i have added", "i linked", "in my map", "in my understanding", "i realized",
    "leads to", "lead to", "results in", "causes", "cause", "influences", "affects",
    "depends on", "therefore", "so that", "the reason", "is related to", "relates to",
    "is part of", "is a type of", "for example", "such as",
];

/// A compiled phrase list.
pub(crate) struct Lexicon {
    pattern: Regex,
}

impl Lexicon {
    fn new(phrases: &[&str]) -> Self {
        let alternatives: Vec<String> = phrases
            .iter()
            .map(|phrase| match phrase.strip_suffix('*') {
                Some(stem) => format!(r"{}\w*", regex::escape(stem)),
                None => regex::escape(phrase),
            })
            .collect();
        let source = format!(r"(?:^|\s)(?:{})(?:$|\s)", alternatives.join("|"));
        Self {
            pattern: Regex::new(&source).expect("phrase lists escape every literal"),
        }
    }

    /// Whether any phrase occurs in already-normalized text.
    pub(crate) fn matches(&self, normalized: &str) -> bool {
        self.pattern.is_match(normalized)
    }
}

pub(crate) static INAPPROPRIATE_LEX: Lazy<Lexicon> = Lazy::new(|| Lexicon::new(INAPPROPRIATE));
pub(crate) static INTERFACE_LEX: Lazy<Lexicon> = Lazy::new(|| Lexicon::new(INTERFACE));
pub(crate) static DISAGREEMENT_LEX: Lazy<Lexicon> = Lazy::new(|| Lexicon::new(DISAGREEMENT));
pub(crate) static CONTENT_LEX: Lazy<Lexicon> = Lazy::new(|| Lexicon::new(CONTENT_TERMS));
pub(crate) static APPROACH_LEX: Lazy<Lexicon> = Lazy::new(|| Lexicon::new(APPROACH_TERMS));
pub(crate) static PREMATURE_LEX: Lazy<Lexicon> = Lazy::new(|| Lexicon::new(PREMATURE_ENDING));
pub(crate) static FRUSTRATION_LEX: Lazy<Lexicon> = Lazy::new(|| Lexicon::new(FRUSTRATION));
pub(crate) static CONFUSION_LEX: Lazy<Lexicon> = Lazy::new(|| Lexicon::new(CONFUSION));
pub(crate) static OFF_TOPIC_LEX: Lazy<Lexicon> = Lazy::new(|| Lexicon::new(OFF_TOPIC));
pub(crate) static IDEA_LEX: Lazy<Lexicon> = Lazy::new(|| Lexicon::new(IDEA_MARKERS));

/// Lowercase, unify apostrophes and replace other punctuation with spaces.
pub(crate) fn normalize_text(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| match c {
            '\u{2019}' | '\u{2018}' | '`' => '\'',
            c if c.is_alphanumeric() || c == '\'' => c,
            _ => ' ',
        })
        .flat_map(char::to_lowercase)
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  No, BUT I don’t know!! "), "no but i don't know");
    }

    #[test]
    fn test_stem_and_word_boundaries() {
        let lex = Lexicon::new(&["frustrat*", "lost"]);
        assert!(lex.matches("this is frustrating"));
        assert!(lex.matches("i feel lost"));
        assert!(!lex.matches("the lostness"));
        assert!(!lex.matches("almost there"));
    }

    #[test]
    fn test_multi_word_phrase() {
        assert!(PREMATURE_LEX.matches("i'm done that's all"));
        assert!(!PREMATURE_LEX.matches("i'm doing fine"));
    }
}

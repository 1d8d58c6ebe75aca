//! Rule-based Polish tokenizer and part-of-speech approximation.
//!
//! Counts follow the usual tagger conventions: words are all non-punctuation
//! tokens, nouns and verbs exclude stop words, symbols are tokens made only of
//! symbol characters.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::backend::{LinguisticStats, ScoreError, Scorer};

/// Default input limit in characters.
pub const DEFAULT_MAX_LENGTH: usize = 1_000_000;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+(?:[-'’]\w+)*|[^\w\s]").unwrap());
static PUNCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\p{P}+$").unwrap());
static SYMBOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\p{S}+$").unwrap());
static SENTENCE_END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?…]+").unwrap());
static HAS_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w").unwrap());

const STOP_WORDS: &[&str] = &[
    "a", "aby", "ale", "albo", "ani", "bez", "bo", "był", "była", "było", "były", "być", "by",
    "co", "czy", "dla", "do", "gdy", "gdzie", "i", "ich", "ile", "im", "iż", "jak", "jako",
    "jednak", "jego", "jej", "jest", "jeszcze", "jeśli", "już", "każdy", "kiedy", "kto", "która",
    "które", "którego", "której", "który", "których", "lub", "ma", "mają", "może", "można",
    "mu", "na", "nad", "nie", "niż", "o", "od", "oraz", "po", "pod", "przez", "przy", "się",
    "są", "ta", "tak", "także", "tam", "te", "tego", "tej", "ten", "to", "tu", "tylko", "w",
    "we", "więc", "właśnie", "z", "za", "ze", "że", "żeby",
];

const NOUN_SUFFIXES: &[&str] = &[
    "ość", "ości", "ością", "anie", "enie", "ania", "enia", "aniu", "eniu", "aniem", "eniem",
    "cja", "cji", "cję", "sja", "sji", "zja", "zji", "stwo", "stwa", "stwie", "ctwo", "ctwa",
    "izm", "izmu", "ista", "isty", "arz", "arza", "nik", "nika", "nicy", "ów",
];

const VERB_SUFFIXES: &[&str] = &[
    "ować", "ywać", "iwać", "awać", "ać", "eć", "ić", "yć", "ąć", "uje", "ują", "ujemy",
    "ował", "owała", "owało", "owali", "ało", "ały", "ali", "ił", "iła", "iło", "ili", "ył", "yła",
    "yli", "amy", "emy", "imy", "acie", "ecie", "icie",
];

/// Built-in [`Scorer`] that needs no model files.
#[derive(Debug, Clone)]
pub struct RuleScorer {
    max_length: usize,
}

impl Default for RuleScorer {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

impl RuleScorer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scorer for RuleScorer {
    fn max_length(&self) -> usize {
        self.max_length
    }

    fn set_max_length(&mut self, max_length: usize) {
        self.max_length = max_length;
    }

    fn analyze(&mut self, text: &str) -> Result<LinguisticStats, ScoreError> {
        let length = text.chars().count();
        if length > self.max_length {
            return Err(ScoreError::TooLong {
                length,
                max_length: self.max_length,
            });
        }

        let mut stats = LinguisticStats {
            sentences: count_sentences(text),
            ..Default::default()
        };

        for token in TOKEN_RE.find_iter(text).map(|m| m.as_str()) {
            if PUNCT_RE.is_match(token) {
                stats.punctuations += 1;
                continue;
            }
            stats.words += 1;
            if SYMBOL_RE.is_match(token) {
                stats.symbols += 1;
                continue;
            }
            match tag_word(token) {
                Some(Pos::Noun) => stats.nouns += 1,
                Some(Pos::Verb) => stats.verbs += 1,
                None => {}
            }
        }

        Ok(stats)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pos {
    Noun,
    Verb,
}

fn tag_word(token: &str) -> Option<Pos> {
    if token.chars().any(|c| c.is_numeric()) {
        return None;
    }
    let lower = token.to_lowercase();
    if lower.chars().count() < 4 || STOP_WORDS.contains(&lower.as_str()) {
        return None;
    }
    if NOUN_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        Some(Pos::Noun)
    } else if VERB_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        Some(Pos::Verb)
    } else {
        None
    }
}

/// Segments between terminators that contain at least one word character.
fn count_sentences(text: &str) -> u64 {
    SENTENCE_END_RE
        .split(text)
        .filter(|segment| HAS_WORD_RE.is_match(segment))
        .count() as u64
}

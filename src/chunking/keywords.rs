// Lexicon-driven part-of-speech tagging used for keyword extraction.
// Closed word classes are listed explicitly; open classes fall back to
// suffix heuristics with noun as the default.

use itertools::Itertools;

use super::{TokenUnit, tokenize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOfSpeech {
    Noun,
    Verb,
    Adjective,
    Adverb,
    Determiner,
    Pronoun,
    Preposition,
    Conjunction,
    Particle,
    Number,
}

impl PartOfSpeech {
    /// Content words carry the meaning of a chunk and are kept as keywords
    #[inline]
    pub const fn is_content_word(self) -> bool {
        matches!(
            self,
            Self::Noun | Self::Verb | Self::Adjective | Self::Adverb
        )
    }
}

const DETERMINERS: &[&str] = &[
    "a", "all", "an", "another", "any", "both", "each", "either", "every", "few", "many", "much",
    "neither", "no", "some", "that", "the", "these", "this", "those",
];

const PRONOUNS: &[&str] = &[
    "anybody", "anyone", "anything", "everybody", "everyone", "everything", "he", "her", "hers",
    "herself", "him", "himself", "his", "i", "it", "it's", "its", "itself", "me", "mine", "my",
    "myself", "nobody", "nothing", "our", "ours", "ourselves", "she", "somebody", "someone",
    "something", "their", "theirs", "them", "themselves", "they", "us", "we", "what", "whatever",
    "which", "who", "whom", "whose", "you", "your", "yours", "yourself", "yourselves",
];

const PREPOSITIONS: &[&str] = &[
    "about", "above", "across", "after", "against", "along", "amid", "among", "around", "at",
    "before", "behind", "below", "beneath", "beside", "besides", "between", "beyond", "by",
    "despite", "down", "during", "except", "for", "from", "in", "inside", "into", "like", "near",
    "of", "off", "on", "onto", "out", "outside", "over", "past", "per", "since", "through",
    "throughout", "till", "toward", "towards", "under", "underneath", "until", "up", "upon",
    "via", "with", "within", "without",
];

const CONJUNCTIONS: &[&str] = &[
    "although", "and", "because", "but", "if", "lest", "nor", "or", "so", "than", "though",
    "unless", "whereas", "whether", "while", "yet",
];

const PARTICLES: &[&str] = &["not", "n't", "to"];

const AUXILIARIES: &[&str] = &[
    "am", "are", "be", "been", "being", "can", "could", "did", "do", "does", "had", "has", "have",
    "having", "is", "may", "might", "must", "shall", "should", "was", "were", "will", "would",
];

const NUMBER_WORDS: &[&str] = &[
    "eight", "eighteen", "eighty", "eleven", "fifteen", "fifty", "five", "forty", "four",
    "fourteen", "hundred", "million", "nine", "nineteen", "ninety", "one", "seven", "seventeen",
    "seventy", "six", "sixteen", "sixty", "ten", "thirteen", "thirty", "thousand", "three",
    "twelve", "twenty", "two", "zero",
];

const ADVERB_WORDS: &[&str] = &[
    "again", "almost", "already", "also", "always", "away", "else", "ever", "here", "how",
    "just", "never", "now", "often", "once", "only", "perhaps", "quite", "rather", "soon",
    "still", "then", "there", "too", "very", "well", "when", "where", "why",
];

fn contains(list: &[&str], word: &str) -> bool {
    list.contains(&word)
}

/// Tag a single lowercased word
#[inline]
pub fn tag_word(word: &str) -> PartOfSpeech {
    if word.chars().all(|c| c.is_numeric() || c == '.' || c == ',') || contains(NUMBER_WORDS, word)
    {
        return PartOfSpeech::Number;
    }
    if contains(DETERMINERS, word) {
        return PartOfSpeech::Determiner;
    }
    if contains(PRONOUNS, word) {
        return PartOfSpeech::Pronoun;
    }
    if contains(PREPOSITIONS, word) {
        return PartOfSpeech::Preposition;
    }
    if contains(CONJUNCTIONS, word) {
        return PartOfSpeech::Conjunction;
    }
    if contains(PARTICLES, word) {
        return PartOfSpeech::Particle;
    }
    if contains(AUXILIARIES, word) {
        return PartOfSpeech::Verb;
    }
    if contains(ADVERB_WORDS, word) {
        return PartOfSpeech::Adverb;
    }

    let len = word.chars().count();
    if len > 4 && word.ends_with("ly") {
        PartOfSpeech::Adverb
    } else if len > 4 && (word.ends_with("ing") || word.ends_with("ed") || word.ends_with("ize"))
    {
        PartOfSpeech::Verb
    } else if len > 4
        && ["ous", "ful", "able", "ible", "ive", "less", "ish", "ical"]
            .iter()
            .any(|suffix| word.ends_with(suffix))
    {
        PartOfSpeech::Adjective
    } else {
        PartOfSpeech::Noun
    }
}

/// Return the nouns, verbs, adjectives and adverbs of `text`, space-joined in
/// token order.
#[inline]
pub fn extract_keywords(text: &str) -> String {
    tokenize(text, TokenUnit::Word)
        .into_iter()
        .filter(|token| tag_word(token).is_content_word())
        .join(" ")
}

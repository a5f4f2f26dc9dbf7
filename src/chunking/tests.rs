use super::*;

fn words(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("t{}", i)).collect()
}

#[test]
fn tokenize_words_lowercases_and_strips_punctuation() {
    let tokens = tokenize("  The Quick, brown FOX!  (jumps) ", TokenUnit::Word);
    assert_eq!(tokens, vec!["the", "quick", "brown", "fox", "jumps"]);
}

#[test]
fn tokenize_keeps_inner_apostrophes() {
    let tokens = tokenize("Don't 'panic'", TokenUnit::Word);
    assert_eq!(tokens, vec!["don't", "panic"]);
}

#[test]
fn tokenize_empty_input_yields_nothing() {
    assert!(tokenize("", TokenUnit::Word).is_empty());
    assert!(tokenize("   \n\t ", TokenUnit::Sentence).is_empty());
    assert!(tokenize("...", TokenUnit::Document).is_empty());
}

#[test]
fn tokenize_sentences() {
    let tokens = tokenize(
        "First sentence here. Second one! Is this third? Version 1.2 stays whole",
        TokenUnit::Sentence,
    );
    assert_eq!(
        tokens,
        vec![
            "first sentence here",
            "second one",
            "is this third",
            "version 1.2 stays whole"
        ]
    );
}

#[test]
fn tokenize_sentences_breaks_on_blank_lines() {
    let tokens = tokenize("Heading\n\nBody text", TokenUnit::Sentence);
    assert_eq!(tokens, vec!["heading", "body text"]);
}

#[test]
fn tokenize_document_is_single_token() {
    let tokens = tokenize("  Whole Document, as-is.  ", TokenUnit::Document);
    assert_eq!(tokens, vec!["whole document, as-is"]);
}

#[test]
fn config_clamps_overlap() {
    let config = ChunkingConfig::new(4, 10).expect("valid config");
    assert_eq!(config.overlap, 3);
    assert_eq!(config.step(), 1);

    assert!(matches!(
        ChunkingConfig::new(0, 0),
        Err(RagError::InvalidInput(_))
    ));
}

#[test]
fn effective_overlap_clamps_deserialized_values() {
    let config = ChunkingConfig {
        max_tokens: 3,
        overlap: 7,
    };
    assert_eq!(config.effective_overlap(), 2);
    assert_eq!(config.step(), 1);
}

#[test]
fn short_sequence_is_one_chunk() {
    let config = ChunkingConfig::new(5, 2).expect("valid config");
    let chunks = chunk_tokens(&words(5), &config);
    assert_eq!(chunks, vec!["t0 t1 t2 t3 t4"]);
}

#[test]
fn empty_sequence_has_no_chunks() {
    let config = ChunkingConfig::default();
    let tokens: Vec<String> = Vec::new();
    assert!(chunk_tokens(&tokens, &config).is_empty());
}

#[test]
fn quick_brown_fox_without_overlap() {
    let config = ChunkingConfig::new(2, 0).expect("valid config");
    let chunks = chunk_text("the quick brown fox", TokenUnit::Word, &config);
    assert_eq!(chunks, vec!["the quick", "brown fox"]);
}

#[test]
fn overlapping_windows_keep_tail() {
    let config = ChunkingConfig::new(4, 1).expect("valid config");
    let chunks = chunk_tokens(&words(10), &config);
    assert_eq!(
        chunks,
        vec!["t0 t1 t2 t3", "t3 t4 t5 t6", "t6 t7 t8 t9"]
    );

    let chunks = chunk_tokens(&words(11), &config);
    assert_eq!(chunks.last().map(String::as_str), Some("t9 t10"));
}

#[test]
fn chunk_count_and_reconstruction() {
    for n in 2..40 {
        for m in 1..n {
            for o in 0..m {
                let tokens = words(n);
                let config = ChunkingConfig::new(m, o).expect("valid config");
                let chunks = chunk_tokens(&tokens, &config);

                let expected = (n - o).div_ceil(m - o);
                assert_eq!(chunks.len(), expected, "n={n} m={m} o={o}");

                // Dropping the overlapping prefix of every chunk after the
                // first must give back the original sequence.
                let mut rebuilt: Vec<String> = Vec::with_capacity(n);
                for (i, chunk) in chunks.iter().enumerate() {
                    let skip = if i == 0 { 0 } else { o };
                    rebuilt.extend(chunk.split(' ').skip(skip).map(str::to_string));
                }
                assert_eq!(rebuilt, tokens, "n={n} m={m} o={o}");
            }
        }
    }
}

#[test]
fn tagging_closed_classes() {
    assert_eq!(tag_word("the"), PartOfSpeech::Determiner);
    assert_eq!(tag_word("they"), PartOfSpeech::Pronoun);
    assert_eq!(tag_word("under"), PartOfSpeech::Preposition);
    assert_eq!(tag_word("and"), PartOfSpeech::Conjunction);
    assert_eq!(tag_word("42"), PartOfSpeech::Number);
    assert_eq!(tag_word("is"), PartOfSpeech::Verb);
}

#[test]
fn tagging_open_classes() {
    assert_eq!(tag_word("quickly"), PartOfSpeech::Adverb);
    assert_eq!(tag_word("running"), PartOfSpeech::Verb);
    assert_eq!(tag_word("dangerous"), PartOfSpeech::Adjective);
    assert_eq!(tag_word("database"), PartOfSpeech::Noun);
}

#[test]
fn keywords_keep_content_words_in_order() {
    let keywords = extract_keywords("The quick fox is running quickly over the 3 lazy dogs.");
    assert_eq!(keywords, "quick fox is running quickly lazy dogs");
}

#[test]
fn keywords_of_empty_text() {
    assert_eq!(extract_keywords(""), "");
    assert_eq!(extract_keywords("the of and"), "");
}

use linkrec_core::tokenizer::{analyze, tokenize};

#[test]
fn it_normalizes_and_stems() {
    let toks = tokenize("Running Runners RUN! Ｍｏｄｕｌａｒ menu.");
    let words: Vec<String> = toks.into_iter().map(|(w, _)| w).collect();
    // Stemming to "run" should appear
    assert!(words.contains(&"run".to_string()));
    // NFKC folds fullwidth letters to ASCII
    assert!(words.contains(&"modular".to_string()));
}

#[test]
fn it_filters_stopwords() {
    let toks = tokenize("The quick brown fox and the lazy dog");
    let words: Vec<String> = toks.into_iter().map(|(w, _)| w).collect();
    assert!(!words.contains(&"the".to_string()));
    assert!(!words.contains(&"and".to_string()));
}

#[test]
fn it_strips_markup_before_counting() {
    let a = analyze("<h1>Modular Buildings</h1><style>.hero { color: red }</style><p>Fast &amp; cheap</p>");
    assert_eq!(a.word_count, 4);
    let words: Vec<&str> = a.terms.iter().map(|(w, _)| w.as_str()).collect();
    assert!(words.contains(&"modular"));
    assert!(!words.contains(&"hero"));
    assert!(!words.contains(&"color"));
}

#[test]
fn it_is_stable_across_calls() {
    let text = "Portable classroom buildings for schools and education campuses";
    assert_eq!(tokenize(text), tokenize(text));
}

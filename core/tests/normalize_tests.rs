use bookgrid_core::normalize::{ngrams, normalize, tokenize};

#[test]
fn it_folds_accents_and_strips_digits() {
    let out = normalize("Café Müller, 1984 edition");
    assert_eq!(out, "cafe muller  edition");
}

#[test]
fn it_filters_stopwords_and_short_tokens() {
    let toks = tokenize(&normalize("The quick brown fox and a lazy dog"), false);
    assert_eq!(toks, vec!["quick", "brown", "fox", "lazy", "dog"]);
}

#[test]
fn it_stems_on_request() {
    let toks = tokenize(&normalize("Running runners"), true);
    assert!(toks.contains(&"run".to_string()));
}

#[test]
fn it_builds_bigrams() {
    let toks = tokenize("old man sea", false);
    assert_eq!(ngrams(&toks, 2), vec!["old man", "man sea"]);
}

use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref NON_ASCII: Regex = Regex::new(r"[^\x00-\x7F]+").expect("valid regex");
    static ref PUNCT: Regex = Regex::new(r#"[,:.{\[}'"\]_]"#).expect("valid regex");
    static ref DIGITS: Regex = Regex::new(r"\d+").expect("valid regex");
    static ref EMAIL: Regex = Regex::new(r"\S+@\S+").expect("valid regex");
    static ref URL: Regex = Regex::new(r"http\S+|www\S+").expect("valid regex");
    static ref TOKEN: Regex = Regex::new(r"\b\w\w+\b").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

pub fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// Clean raw text: ASCII only, no punctuation or digits, lowercase, no emails or URLs, trimmed.
///
/// Accented letters are decomposed first so "café" keeps its "cafe" base.
pub fn normalize(raw: &str) -> String {
    let decomposed: String = raw.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    let text = NON_ASCII.replace_all(&decomposed, " ");
    let text = PUNCT.replace_all(&text, "");
    let text = DIGITS.replace_all(&text, "");
    let text = text.to_lowercase();
    let text = EMAIL.replace_all(&text, "");
    let text = URL.replace_all(&text, "");
    text.trim().to_string()
}

/// Split normalized text into terms of two or more word characters, dropping stopwords.
pub fn tokenize(normalized: &str, stem: bool) -> Vec<String> {
    TOKEN
        .find_iter(normalized)
        .map(|m| m.as_str())
        .filter(|t| !is_stopword(t))
        .map(|t| if stem { STEMMER.stem(t).into_owned() } else { t.to_string() })
        .collect()
}

/// Contiguous n-grams joined by a single space.
pub fn ngrams(tokens: &[String], n: usize) -> Vec<String> {
    if n <= 1 {
        return tokens.to_vec();
    }
    tokens.windows(n).map(|w| w.join(" ")).collect()
}

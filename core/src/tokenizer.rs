use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use scraper::{Html, Node};
use unicode_normalization::UnicodeNormalization;
use std::collections::HashSet;

/// Words shorter than this (in chars) never become terms.
pub const MIN_TERM_CHARS: usize = 2;

lazy_static! {
    static ref RE: Regex = Regex::new(r"(?u)\p{L}[\p{L}\p{N}_']*").expect("valid regex");
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

fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// Result of running a document body through the tokenizer.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Stemmed terms with the word position they came from.
    pub terms: Vec<(String, usize)>,
    /// Number of words in the visible text, stopwords included.
    pub word_count: usize,
}

/// Drop markup and keep the visible text. Plain text is returned untouched.
pub fn strip_markup(text: &str) -> String {
    if !text.contains('<') && !text.contains('&') {
        return text.to_string();
    }
    let fragment = Html::parse_fragment(text);
    let mut out = String::with_capacity(text.len());
    for node in fragment.root_element().descendants() {
        let Node::Text(t) = node.value() else { continue };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| matches!(e.name(), "script" | "style")))
            .unwrap_or(false);
        if hidden { continue; }
        out.push_str(t);
        out.push(' ');
    }
    out
}

/// Full pipeline: markup stripping, NFKC, lowercase, stopword removal, stemming.
pub fn analyze(text: &str) -> Analysis {
    let visible = strip_markup(text);
    let normalized = visible.nfkc().collect::<String>().to_lowercase();
    let mut analysis = Analysis::default();
    for (pos, mat) in RE.find_iter(&normalized).enumerate() {
        analysis.word_count += 1;
        let token = mat.as_str();
        if token.chars().count() < MIN_TERM_CHARS || is_stopword(token) { continue; }
        let stem = STEMMER.stem(token).to_string();
        analysis.terms.push((stem, pos));
    }
    analysis
}

/// Tokenize text into (term, position).
pub fn tokenize(text: &str) -> Vec<(String, usize)> {
    analyze(text).terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t = tokenize("Running, runner's run!");
        assert!(t.iter().any(|(w, _)| w == "run"));
    }

    #[test]
    fn strips_tags_and_scripts() {
        let a = analyze("<p>Modular <b>offices</b></p><script>var tracking = 1;</script>");
        let words: Vec<&str> = a.terms.iter().map(|(w, _)| w.as_str()).collect();
        assert!(words.contains(&"modular"));
        assert!(!words.contains(&"track"));
        assert!(!words.contains(&"var"));
    }

    #[test]
    fn word_count_includes_stopwords() {
        let a = analyze("the quick fox");
        assert_eq!(a.word_count, 3);
        assert_eq!(a.terms.len(), 2);
    }

    #[test]
    fn decodes_entities() {
        let a = analyze("Sales &amp; leasing");
        assert_eq!(a.word_count, 2);
        assert!(!a.terms.iter().any(|(w, _)| w == "amp"));
    }
}

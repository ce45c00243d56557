//! FTS5 query sanitization.
//!
//! Raw user (or LLM-extracted) text cannot be handed to the FTS5 grammar as
//! is: punctuation is reserved syntax, and a bare second word is parsed as a
//! column reference. The sanitizer strips reserved characters, preserves
//! quoted phrases and trailing prefix wildcards, and rewrites operator-free
//! multi-word queries into an OR-disjunction so "any of these words"
//! semantics survive.

/// Characters that are reserved/operator syntax in the FTS5 grammar but not
/// intended as operators in free text.
const RESERVED: &str = "?!@#$%^&*()[]{}<>/\\|~`;:,.";

/// Boolean operators, matched exact-case only. Lowercase "or" inside
/// ordinary text must stay an ordinary word.
const OPERATORS: [&str; 3] = ["AND", "OR", "NOT"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Word(String),
    /// Quoted substring, preserved verbatim as a phrase query and exempt
    /// from word splitting.
    Phrase(String),
}

/// Sanitize a raw query into a string the FTS5 grammar accepts.
///
/// Returns an empty string when nothing searchable remains.
pub fn sanitize(raw: &str) -> String {
    let terms = parse_terms(raw);
    if terms.is_empty() {
        return String::new();
    }

    let has_operator = terms
        .iter()
        .any(|t| matches!(t, Term::Word(w) if OPERATORS.contains(&w.as_str())));

    let rendered: Vec<String> = terms.iter().map(render).collect();

    if !has_operator && rendered.len() > 1 {
        rendered.join(" OR ")
    } else {
        rendered.join(" ")
    }
}

/// Last-resort rewrite: every remaining word OR-joined, operators and
/// phrases flattened. Used when the sanitized query still fails to parse.
pub fn fallback_or_query(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.chars() {
        if RESERVED.contains(c) || c == '"' || c == '*' {
            cleaned.push(' ');
        } else {
            cleaned.push(c);
        }
    }

    cleaned
        .split_whitespace()
        .filter(|w| !OPERATORS.contains(w))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn render(term: &Term) -> String {
    match term {
        Term::Word(w) => w.clone(),
        Term::Phrase(p) => format!("\"{}\"", p),
    }
}

fn parse_terms(raw: &str) -> Vec<Term> {
    let mut terms = Vec::new();
    let mut rest = raw;

    while let Some(open) = rest.find('"') {
        let (before, quoted) = rest.split_at(open);
        push_words(before, &mut terms);

        match quoted[1..].find('"') {
            Some(close) => {
                let phrase = &quoted[1..1 + close];
                if !phrase.trim().is_empty() {
                    terms.push(Term::Phrase(phrase.to_string()));
                }
                rest = &quoted[close + 2..];
            }
            None => {
                // Unterminated quote: drop the quote character and treat
                // the remainder as plain words.
                push_words(&quoted[1..], &mut terms);
                rest = "";
            }
        }
    }
    push_words(rest, &mut terms);

    terms
}

/// Strip reserved characters from a non-quoted run and split it into word
/// terms. A `*` that terminates a token survives as a prefix wildcard.
fn push_words(text: &str, terms: &mut Vec<Term>) {
    let chars: Vec<char> = text.chars().collect();
    let mut cleaned = String::with_capacity(text.len());

    for (i, &c) in chars.iter().enumerate() {
        if c == '*' && is_trailing_star(&chars, i) {
            cleaned.push(c);
        } else if RESERVED.contains(c) {
            cleaned.push(' ');
        } else {
            cleaned.push(c);
        }
    }

    for word in cleaned.split_whitespace() {
        terms.push(Term::Word(word.to_string()));
    }
}

fn is_trailing_star(chars: &[char], i: usize) -> bool {
    let follows_word = i > 0 && chars[i - 1].is_alphanumeric();
    let ends_token = chars
        .get(i + 1)
        .map(|&n| n.is_whitespace() || RESERVED.contains(n))
        .unwrap_or(true);
    follows_word && ends_token
}

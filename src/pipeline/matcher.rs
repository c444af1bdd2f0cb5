//! Keyword matcher: case-insensitive literal search for configured terms.

use regex::Regex;

/// A configured term and its compiled pattern.
#[derive(Debug, Clone)]
struct Term {
    text: String,
    regex: Regex,
}

/// Tests text against a fixed keyword list.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    terms: Vec<Term>,
}

impl KeywordMatcher {
    /// Compile one case-insensitive pattern per term. Blank terms are skipped.
    pub fn new<I, S>(terms: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled = Vec::new();
        for term in terms {
            let term = term.as_ref().trim();
            if term.is_empty() {
                continue;
            }
            compiled.push(Term {
                text: term.to_string(),
                regex: Regex::new(&format!("(?i){}", regex::escape(term)))?,
            });
        }
        Ok(Self { terms: compiled })
    }

    /// Terms found in `text`, in configuration order.
    pub fn find_terms(&self, text: &str) -> Vec<String> {
        self.terms
            .iter()
            .filter(|t| t.regex.is_match(text))
            .map(|t| t.text.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|t| t.text.as_str())
    }
}

/// Append `found` terms not already in `acc`.
pub(crate) fn merge_terms(acc: &mut Vec<String>, found: Vec<String>) {
    for term in found {
        if !acc.contains(&term) {
            acc.push(term);
        }
    }
}

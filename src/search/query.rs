//! Turns untrusted query text into FTS5 match expressions.
//!
//! Nothing here returns an error: bad input degrades to a smaller, possibly
//! empty, expression. An empty expression means "no search", never "match
//! everything".

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use unicode_normalization::UnicodeNormalization;

pub const DEFAULT_MAX_QUERY_LEN: usize = 200;
pub const DEFAULT_MAX_OR_CLAUSES: usize = 10;
const SIMILARITY_TERMS: usize = 5;
const SIMILARITY_MIN_LEN: usize = 3;

const OPERATORS: [&str; 3] = ["AND", "OR", "NOT"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueryValidation {
    pub valid: bool,
    pub error: Option<String>,
}

impl QueryValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn fail(msg: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(msg.into()),
        }
    }
}

/// A column-scoped expression plus the bm25 weight of each column.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedQuery {
    pub expr: String,
    pub weights: Vec<(String, f64)>,
}

impl WeightedQuery {
    pub fn weight_of(&self, column: &str) -> Option<f64> {
        self.weights
            .iter()
            .find(|(field, _)| field == column)
            .map(|(_, weight)| *weight)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryBuilder {
    max_len: usize,
    max_or_clauses: usize,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_QUERY_LEN,
            max_or_clauses: DEFAULT_MAX_OR_CLAUSES,
        }
    }
}

impl QueryBuilder {
    pub fn new(max_len: usize, max_or_clauses: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            max_or_clauses: max_or_clauses.max(1),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Safe match expression for free text.
    ///
    /// One term becomes a prefix match (`term*`), several become
    /// `"t1" OR "t2"`. Text with balanced double quotes is kept as a phrase
    /// query.
    pub fn build(&self, raw: &str) -> String {
        let text = sanitize(&self.truncate(raw));
        if has_balanced_quotes(&text) {
            return self.assemble(&text, false);
        }

        join_terms(&self.operand_tokens(&text))
    }

    /// Like [`build`](Self::build) but `and`/`or`/`not` in any case are kept
    /// as operators between the sanitized operands.
    pub fn build_boolean(&self, raw: &str) -> String {
        let text = sanitize(&strip_quotes_if_unbalanced(&self.truncate(raw)));
        self.assemble(&text, true)
    }

    /// Restricts the expression to one indexed column.
    pub fn build_field_query(&self, text: &str, field: &str) -> String {
        let field = sanitize_field(field);
        scope(&self.build(text), &[field.as_str()])
    }

    /// Searches only the weighted columns. FTS5 has no per-term boost, so
    /// the weights travel beside the expression and end up in `bm25()`.
    pub fn build_weighted_query(&self, text: &str, weights: &[(&str, f64)]) -> WeightedQuery {
        self.weight_expression(&self.build(text), weights)
    }

    /// Scopes an already built expression to the weighted columns.
    /// Duplicate columns keep their first weight; non-positive weights
    /// become 1.
    pub fn weight_expression(&self, expr: &str, weights: &[(&str, f64)]) -> WeightedQuery {
        let mut kept: Vec<(String, f64)> = Vec::new();
        for (field, weight) in weights {
            let field = sanitize_field(field);
            if field.is_empty() || kept.iter().any(|(seen, _)| *seen == field) {
                continue;
            }
            let weight = if weight.is_finite() && *weight > 0.0 {
                *weight
            } else {
                1.0
            };
            kept.push((field, weight));
        }
        let columns: Vec<&str> = kept.iter().map(|(field, _)| field.as_str()).collect();
        WeightedQuery {
            expr: scope(expr, &columns),
            weights: kept,
        }
    }

    /// Every term as a prefix, ANDed; optionally scoped to one column.
    pub fn build_suggestion_query(&self, prefix: &str, field: Option<&str>) -> String {
        let text = sanitize(&self.truncate(prefix).replace('"', " "));
        let tokens = self.operand_tokens(&text);
        if tokens.is_empty() {
            return String::new();
        }
        let terms = tokens
            .iter()
            .map(|t| prefix_term(t))
            .collect::<Vec<_>>()
            .join(" ");
        match field.map(sanitize_field).filter(|f| !f.is_empty()) {
            Some(field) => format!("{field} : ({terms})"),
            None => terms,
        }
    }

    /// Narrows a query to rows whose `field` holds `value`.
    pub fn build_facet_query(&self, text: &str, field: &str, value: &str) -> String {
        let field = sanitize_field(field);
        let value = self.operand_tokens(&sanitize(&value.replace('"', " ")));
        let base = self.build(text);
        if field.is_empty() || value.is_empty() {
            return base;
        }
        let facet = format!(
            "{field} : \"{}\"",
            value
                .iter()
                .map(|t| t.to_lowercase())
                .collect::<Vec<_>>()
                .join(" ")
        );
        if base.is_empty() {
            facet
        } else {
            format!("({base}) AND {facet}")
        }
    }

    /// "More like this": the distinctive words of `text`, ORed.
    pub fn build_similarity_query(&self, text: &str) -> String {
        let text = sanitize(&self.truncate(text).replace('"', " "));
        self.operand_tokens(&text)
            .into_iter()
            .filter(|t| t.chars().count() >= SIMILARITY_MIN_LEN)
            .take(SIMILARITY_TERMS)
            .map(|t| quoted_term(&t))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    /// Plain ORed terms, dropping trailing terms until the estimate fits
    /// `budget`. Operators and quotes are read as spaces. At least one term
    /// survives.
    pub fn build_within(&self, raw: &str, budget: u32) -> String {
        let text = sanitize(&self.truncate(raw)).replace('"', " ");
        let text = text
            .split_whitespace()
            .filter(|word| !OPERATORS.contains(&word.to_ascii_uppercase().as_str()))
            .collect::<Vec<_>>()
            .join(" ");
        let mut tokens = self.operand_tokens(&text);
        loop {
            let expr = join_terms(&tokens);
            if tokens.len() <= 1 || self.complexity(&expr) <= budget {
                return expr;
            }
            tokens.pop();
        }
    }

    pub fn validate(&self, query: &str) -> QueryValidation {
        if query.trim().is_empty() {
            return QueryValidation::fail("Query is empty");
        }
        if let Some(bad) = query.chars().find(|c| !is_approved_char(*c)) {
            return QueryValidation::fail(format!("Character '{bad}' is not allowed"));
        }
        if query.chars().filter(|c| *c == '"').count() % 2 != 0 {
            return QueryValidation::fail("Unmatched double quote");
        }

        let mut depth: i32 = 0;
        for c in query.chars() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return QueryValidation::fail("Unbalanced parentheses");
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return QueryValidation::fail("Unbalanced parentheses");
        }

        let words = top_level_words(query);
        let mut previous_was_operator = true;
        for word in &words {
            let is_operator = OPERATORS.contains(&word.as_str());
            if is_operator && previous_was_operator {
                return QueryValidation::fail(format!("Missing operand before {word}"));
            }
            previous_was_operator = is_operator;
        }
        if previous_was_operator {
            if let Some(last) = words.last() {
                return QueryValidation::fail(format!("Missing operand after {last}"));
            }
        }

        QueryValidation::ok()
    }

    /// Cost estimate; grows with terms, phrases, operators and wildcards.
    pub fn complexity(&self, query: &str) -> u32 {
        let words = top_level_words(query);
        let operators = words
            .iter()
            .filter(|w| OPERATORS.contains(&w.as_str()))
            .count() as u32;
        let terms = words.len() as u32 - operators;
        let phrases = (query.chars().filter(|c| *c == '"').count() / 2) as u32;
        let wildcards = query.chars().filter(|c| *c == '*').count() as u32;
        terms + phrases * 2 + operators * 3 + wildcards * 2
    }

    /// Shrinks a query: single trailing wildcards, at most the configured
    /// number of OR clauses, and no more than `max_len` characters cut at a
    /// token boundary. Never adds tokens.
    pub fn optimize(&self, query: &str, max_len: usize) -> String {
        let tokens: Vec<String> = query.split_whitespace().map(collapse_wildcards).collect();

        // Group into top-level OR clauses so whole clauses can be dropped.
        let mut clauses: Vec<Vec<String>> = vec![Vec::new()];
        let mut in_quote = false;
        for token in tokens {
            if !in_quote && token == "OR" {
                clauses.push(Vec::new());
                continue;
            }
            if token.chars().filter(|c| *c == '"').count() % 2 == 1 {
                in_quote = !in_quote;
            }
            if let Some(current) = clauses.last_mut() {
                current.push(token);
            }
        }

        let mut kept: Vec<Vec<String>> = Vec::new();
        for clause in clauses.into_iter().filter(|c| !c.is_empty()) {
            if kept.len() >= self.max_or_clauses {
                break;
            }
            if !kept.contains(&clause) {
                kept.push(clause);
            }
        }

        let mut flat: Vec<String> = Vec::new();
        for (idx, clause) in kept.into_iter().enumerate() {
            if idx > 0 {
                flat.push("OR".to_string());
            }
            flat.extend(clause);
        }

        truncate_tokens(flat, max_len).join(" ")
    }

    fn truncate(&self, raw: &str) -> String {
        raw.chars().take(self.max_len).collect()
    }

    /// Quoted segments become phrases and the words between them quoted
    /// terms. Uppercase operators always survive; `any_case` also accepts
    /// lowercase ones.
    fn assemble(&self, text: &str, any_case: bool) -> String {
        let mut parts: Vec<String> = Vec::new();
        for (idx, segment) in text.split('"').enumerate() {
            if idx % 2 == 1 {
                let phrase = segment.split_whitespace().collect::<Vec<_>>().join(" ");
                if !phrase.is_empty() {
                    parts.push(format!("\"{phrase}\""));
                }
                continue;
            }
            for word in segment.split_whitespace() {
                let operator = if any_case {
                    word.to_ascii_uppercase()
                } else {
                    word.to_string()
                };
                if OPERATORS.contains(&operator.as_str()) {
                    parts.push(operator);
                } else if let Some(token) = clean_token(word) {
                    parts.push(quoted_term(&token));
                }
            }
        }
        normalize_operators(parts).join(" ")
    }

    fn operand_tokens(&self, text: &str) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for word in text.split(|c: char| c.is_whitespace() || c == '"') {
            if let Some(token) = clean_token(word) {
                let lower = token.to_lowercase();
                if !seen.iter().any(|s| s.to_lowercase() == lower) {
                    seen.push(token);
                }
            }
            if seen.len() >= self.max_or_clauses {
                break;
            }
        }
        seen
    }
}

/// Folds to ASCII and keeps only letters, digits, space, `'`, `-` and `"`.
pub fn sanitize(raw: &str) -> String {
    let normalized: String = raw
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{02BC}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2010}' | '\u{2011}' | '\u{2013}' => '-',
            other => other,
        })
        .collect();
    normalized
        .nfkd()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '\'' | '-' | '"') {
                Some(c)
            } else if c.is_ascii() {
                Some(' ')
            } else if c.is_whitespace() {
                Some(' ')
            } else {
                None
            }
        })
        .collect()
}

/// Lowercased plain terms of `raw`, without quotes or boolean operators.
pub fn terms(raw: &str) -> Vec<String> {
    sanitize(raw)
        .replace('"', " ")
        .split_whitespace()
        .filter(|word| !OPERATORS.contains(&word.to_ascii_uppercase().as_str()))
        .filter_map(clean_token)
        .map(|token| token.to_lowercase())
        .collect()
}

/// `col : (expr)` for one column, `{a b} : (expr)` for several.
pub fn scope(expr: &str, columns: &[&str]) -> String {
    let columns: Vec<&str> = columns.iter().copied().filter(|c| !c.is_empty()).collect();
    match columns.as_slice() {
        _ if expr.is_empty() => String::new(),
        [] => expr.to_string(),
        [single] => format!("{single} : ({expr})"),
        many => format!("{{{}}} : ({expr})", many.join(" ")),
    }
}

fn join_terms(tokens: &[String]) -> String {
    match tokens {
        [] => String::new(),
        [single] => prefix_term(single),
        many => many
            .iter()
            .map(|t| quoted_term(t))
            .collect::<Vec<_>>()
            .join(" OR "),
    }
}

fn sanitize_field(field: &str) -> String {
    field
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_ascii_lowercase()
}

fn has_balanced_quotes(text: &str) -> bool {
    let count = text.chars().filter(|c| *c == '"').count();
    count >= 2 && count % 2 == 0
}

fn strip_quotes_if_unbalanced(text: &str) -> String {
    if has_balanced_quotes(text) {
        text.to_string()
    } else {
        text.replace('"', " ")
    }
}

/// Drops leading and trailing apostrophes/hyphens; `None` if nothing is left.
fn clean_token(word: &str) -> Option<String> {
    let trimmed = word.trim_matches(|c: char| c == '\'' || c == '-' || c == '"');
    if trimmed.chars().any(|c| c.is_ascii_alphanumeric()) {
        Some(trimmed.replace('"', ""))
    } else {
        None
    }
}

fn is_bareword(token: &str) -> bool {
    token.chars().all(|c| c.is_ascii_alphanumeric())
}

fn prefix_term(token: &str) -> String {
    let lower = token.to_lowercase();
    if is_bareword(&lower) {
        format!("{lower}*")
    } else {
        format!("\"{lower}\"*")
    }
}

fn quoted_term(token: &str) -> String {
    format!("\"{}\"", token.to_lowercase())
}

/// Removes leading/dangling operators and collapses operator runs to the
/// last one (`a AND NOT b` -> `a NOT b`).
fn normalize_operators(parts: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in parts {
        let is_op = OPERATORS.contains(&part.as_str());
        if is_op {
            match out.last() {
                None => continue,
                Some(prev) if OPERATORS.contains(&prev.as_str()) => {
                    out.pop();
                }
                _ => {}
            }
        }
        out.push(part);
    }
    while out
        .last()
        .map(|p| OPERATORS.contains(&p.as_str()))
        .unwrap_or(false)
    {
        out.pop();
    }
    out
}

fn is_approved_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c == ' '
        || matches!(
            c,
            '\'' | '-' | '"' | '*' | '(' | ')' | ':' | '^' | '.' | '_' | '{' | '}'
        )
}

/// Whitespace-separated words outside double quotes; a quoted phrase counts
/// as one word.
fn top_level_words(query: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in query.chars() {
        match c {
            '"' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '(' | ')' if !in_quote => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c if c.is_whitespace() && !in_quote => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// `jo**` -> `jo*`, `j*o*n` -> `jon*`.
fn collapse_wildcards(token: &str) -> String {
    if !token.contains('*') {
        return token.to_string();
    }
    let mut out: String = token.chars().filter(|c| *c != '*').collect();
    out.push('*');
    out
}

fn truncate_tokens(tokens: Vec<String>, max_len: usize) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    let mut len = 0usize;
    for token in tokens {
        let extra = token.chars().count() + usize::from(!kept.is_empty());
        if len + extra > max_len {
            break;
        }
        len += extra;
        kept.push(token);
    }

    // Do not leave a phrase open or an operator dangling at the cut.
    let mut open = kept
        .iter()
        .map(|t| t.chars().filter(|c| *c == '"').count())
        .sum::<usize>()
        % 2
        == 1;
    while open {
        match kept.pop() {
            Some(t) => {
                if t.chars().filter(|c| *c == '"').count() % 2 == 1 {
                    open = false;
                }
            }
            None => break,
        }
    }
    while kept
        .last()
        .map(|t| OPERATORS.contains(&t.as_str()))
        .unwrap_or(false)
    {
        kept.pop();
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qb() -> QueryBuilder {
        QueryBuilder::default()
    }

    #[test]
    fn single_token_is_prefix() {
        assert_eq!(qb().build("Johnson"), "johnson*");
        assert_eq!(qb().build("  smith  "), "smith*");
    }

    #[test]
    fn multiple_tokens_are_ored() {
        assert_eq!(qb().build("class of 1994"), "\"class\" OR \"of\" OR \"1994\"");
    }

    #[test]
    fn empty_and_symbol_only_input_is_empty() {
        assert_eq!(qb().build(""), "");
        assert_eq!(qb().build("   \t\n"), "");
        assert_eq!(qb().build("*** ;; -- ''"), "");
    }

    #[test]
    fn injection_characters_are_stripped() {
        let built = qb().build("smith; DROP TABLE alumni --");
        assert!(!built.contains(';'));
        assert_eq!(built, "\"smith\" OR \"drop\" OR \"table\" OR \"alumni\"");
        assert_eq!(qb().build("name:(x)"), "\"name\" OR \"x\"");
    }

    #[test]
    fn apostrophes_and_hyphens_survive_inside_words() {
        assert_eq!(qb().build("O'Brien"), "\"o'brien\"*");
        assert_eq!(qb().build("mary-kate"), "\"mary-kate\"*");
        assert_eq!(qb().build("'quoted'"), "quoted*");
    }

    #[test]
    fn accents_fold_to_ascii() {
        assert_eq!(qb().build("José"), "jose*");
    }

    #[test]
    fn balanced_quotes_keep_phrase() {
        assert_eq!(qb().build("\"John Smith\""), "\"John Smith\"");
        assert_eq!(
            qb().build("\"senior prom\" 1994"),
            "\"senior prom\" \"1994\""
        );
    }

    #[test]
    fn unbalanced_quote_is_dropped() {
        assert_eq!(qb().build("\"john smith"), "\"john\" OR \"smith\"");
    }

    #[test]
    fn boolean_operators_are_uppercased() {
        assert_eq!(
            qb().build_boolean("band and choir not orchestra"),
            "\"band\" AND \"choir\" NOT \"orchestra\""
        );
        assert_eq!(qb().build_boolean("AND band OR"), "\"band\"");
        assert_eq!(qb().build_boolean("band and not choir"), "\"band\" NOT \"choir\"");
        assert_eq!(
            qb().build_boolean("\"senior prom\" and 1994"),
            "\"senior prom\" AND \"1994\""
        );
    }

    #[test]
    fn long_input_is_truncated_not_rejected() {
        let long = "a".repeat(1000);
        let built = qb().build(&long);
        assert_eq!(built, format!("{}*", "a".repeat(DEFAULT_MAX_QUERY_LEN)));
    }

    #[test]
    fn field_and_weighted_variants() {
        assert_eq!(qb().build_field_query("smith", "full_name"), "full_name : (smith*)");
        assert_eq!(qb().build_field_query("smith", "; --"), "smith*");
        assert_eq!(qb().build_field_query("", "full_name"), "");

        let weighted = qb().build_weighted_query(
            "smith",
            &[("full_name", 10.0), ("Caption", 2.0), ("full_name", 4.0), ("tags", -1.0)],
        );
        assert_eq!(weighted.expr, "{full_name caption tags} : (smith*)");
        assert_eq!(weighted.weight_of("full_name"), Some(10.0));
        assert_eq!(weighted.weight_of("caption"), Some(2.0));
        assert_eq!(weighted.weight_of("tags"), Some(1.0));
        assert_eq!(weighted.weight_of("bio"), None);
        assert!(qb().validate(&weighted.expr).valid);
    }

    #[test]
    fn build_within_trims_to_budget() {
        let q = qb();
        let wide = (0..50).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" AND ");
        let capped = q.build_within(&wide, 20);
        assert!(q.complexity(&capped) <= 20, "{capped}");
        assert!(capped.starts_with("\"w0\" OR \"w1\""));
        assert!(!capped.contains("AND"));
        assert_eq!(q.build_within("smith", 0), "smith*");
        assert_eq!(q.build_within("  ", 10), "");
    }

    #[test]
    fn suggestion_facet_similarity() {
        assert_eq!(
            qb().build_suggestion_query("jo sm", Some("full_name")),
            "full_name : (jo* sm*)"
        );
        assert_eq!(
            qb().build_facet_query("band", "department", "Music"),
            "(band*) AND department : \"music\""
        );
        assert_eq!(
            qb().build_similarity_query("The Spring Concert of 1994"),
            "\"the\" OR \"spring\" OR \"concert\" OR \"1994\""
        );
    }

    #[test]
    fn validate_flags_malformed_queries() {
        assert!(qb().validate("smith*").valid);
        assert!(qb().validate("\"a b\" AND c").valid);
        assert!(!qb().validate("").valid);
        assert!(!qb().validate("\"open").valid);
        assert!(!qb().validate("a AND AND b").valid);
        assert!(!qb().validate("a OR").valid);
        assert!(!qb().validate("NOT a").valid);
        assert!(!qb().validate("a; b").valid);
        assert!(!qb().validate("(a OR b").valid);
    }

    #[test]
    fn complexity_is_monotonic() {
        let q = qb();
        let one = q.complexity("a");
        let two = q.complexity("a b");
        let ored = q.complexity("a OR b");
        let wild = q.complexity("a* OR b*");
        assert!(one < two);
        assert!(two < ored);
        assert!(ored < wild);
        assert!(q.complexity("\"a b\"") > q.complexity("a b"));
    }

    #[test]
    fn optimize_collapses_and_caps() {
        let q = qb();
        assert_eq!(q.optimize("jo**", 200), "jo*");
        assert_eq!(q.optimize("a OR a OR b", 200), "a OR b");

        let many = (0..20).map(|i| format!("t{i}")).collect::<Vec<_>>().join(" OR ");
        let optimized = q.optimize(&many, 1000);
        assert_eq!(optimized.matches(" OR ").count(), DEFAULT_MAX_OR_CLAUSES - 1);
        assert!(optimized.starts_with("t0 OR t1"));
    }

    #[test]
    fn optimize_cuts_at_token_boundary() {
        let q = qb();
        assert_eq!(q.optimize("alpha beta gamma", 12), "alpha beta");
        assert_eq!(q.optimize("alpha OR beta", 9), "alpha");
        assert_eq!(q.optimize("x \"alpha beta\"", 8), "x");
    }
}

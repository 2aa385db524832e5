use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Tolerance for decimal-vs-fraction comparisons. Decimal conversions of
/// rationals are lossy in binary floating point, so equality is never exact.
const EPSILON: f64 = 1e-9;

/// Indonesian filler words dropped before token comparison.
const STOPWORDS: [&str; 7] = ["dan", "atau", "yang", "di", "ke", "dari", "pada"];

static FRACTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(-?\d+)\s*/\s*(-?\d+)").unwrap());
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+(?:[.,]\d+)?").unwrap());
static COMPARISON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[<>]=?").unwrap());
static ALT_GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-zA-Z]+)\s*/\s*([a-zA-Z]+)").unwrap());
static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
static DOT_GROUPS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}(?:\.\d{3})+$").unwrap());
static COMMA_GROUPS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}(?:,\d{3})+$").unwrap());

/// A fraction reduced to lowest terms. The sign lives on the numerator and
/// `label` is the canonical `"num/den"` form, so label equality is value
/// equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fraction {
    pub numerator: i64,
    pub denominator: i64,
    pub label: String,
}

impl Fraction {
    pub fn value(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Replaces single-character vulgar fractions with their ASCII `a/b` form.
fn expand_unicode_fractions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '½' => out.push_str("1/2"),
            '⅓' => out.push_str("1/3"),
            '⅔' => out.push_str("2/3"),
            '¼' => out.push_str("1/4"),
            '¾' => out.push_str("3/4"),
            '⅕' => out.push_str("1/5"),
            '⅖' => out.push_str("2/5"),
            '⅗' => out.push_str("3/5"),
            '⅘' => out.push_str("4/5"),
            '⅙' => out.push_str("1/6"),
            '⅚' => out.push_str("5/6"),
            '⅛' => out.push_str("1/8"),
            '⅜' => out.push_str("3/8"),
            '⅝' => out.push_str("5/8"),
            '⅞' => out.push_str("7/8"),
            _ => out.push(ch),
        }
    }
    out
}

/// Canonical form for comparison-operator answers: whitespace removed,
/// `≤`/`≥` mapped to their two-character spellings.
fn normalize_symbols(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_whitespace() {
            continue;
        }
        match ch {
            '≤' => out.push_str("<="),
            '≥' => out.push_str(">="),
            _ => out.push(ch),
        }
    }
    out
}

/// Canonical form for free-text answers: lowercase, degree notation folded
/// to "deg", every run of non-alphanumerics collapsed to a single space.
fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase().replace("derajat", "deg").replace('°', "deg");
    NON_ALNUM_RE.replace_all(&lowered, " ").trim().to_string()
}

/// Disambiguates `.` and `,` in a numeric token as decimal point vs
/// thousands separator, returning a string `f64::parse` understands.
///
/// When both separators are present the later one is the decimal point.
/// A lone separator followed by exactly three digits is read as a
/// thousands mark unless the value starts with "0.", so "10.000" is ten
/// thousand while "0.125" stays an eighth. Ambiguous inputs like "12.500"
/// deliberately resolve to 12500; existing question banks were authored
/// against that rule, so changing it would silently regrade them.
fn normalize_number_token(raw: &str) -> String {
    let has_dot = raw.contains('.');
    let has_comma = raw.contains(',');

    if has_dot && has_comma {
        // rfind is safe: both separators are known to be present.
        let (decimal, thousands) = if raw.rfind('.') > raw.rfind(',') {
            ('.', ',')
        } else {
            (',', '.')
        };
        let stripped: String = raw.chars().filter(|c| *c != thousands).collect();
        return stripped.replace(decimal, ".");
    }

    let unsigned = raw.strip_prefix('-').unwrap_or(raw);

    if has_dot {
        let parts: Vec<&str> = unsigned.split('.').collect();
        if parts.len() == 2 && parts[1].len() == 3 && !unsigned.starts_with("0.") {
            return raw.replace('.', "");
        }
        if DOT_GROUPS_RE.is_match(unsigned) {
            return raw.replace('.', "");
        }
        return raw.to_string();
    }

    if has_comma {
        let parts: Vec<&str> = unsigned.split(',').collect();
        if parts.len() == 2 && parts[1].len() == 3 && !unsigned.starts_with("0,") {
            return raw.replace(',', "");
        }
        if COMMA_GROUPS_RE.is_match(unsigned) {
            return raw.replace(',', "");
        }
        return raw.replace(',', ".");
    }

    raw.to_string()
}

/// First `a/b` pattern in `text`, reduced to lowest terms. `None` when no
/// fraction is present, the denominator is zero, or moving the sign to the
/// numerator would overflow.
pub fn normalize_fraction(text: &str) -> Option<Fraction> {
    let caps = FRACTION_RE.captures(text)?;
    let num: i64 = caps[1].parse().ok()?;
    let den: i64 = caps[2].parse().ok()?;
    if den == 0 {
        return None;
    }
    let g = gcd(num.unsigned_abs(), den.unsigned_abs()) as i64;
    let mut numerator = num / g;
    let mut denominator = den / g;
    if denominator < 0 {
        numerator = numerator.checked_neg()?;
        denominator = denominator.checked_neg()?;
    }
    Some(Fraction {
        numerator,
        denominator,
        label: format!("{}/{}", numerator, denominator),
    })
}

/// All fraction-like substrings in `text`, normalized; unparseable ones
/// are dropped.
pub fn extract_fractions(text: &str) -> Vec<Fraction> {
    FRACTION_RE
        .find_iter(text)
        .filter_map(|m| normalize_fraction(m.as_str()))
        .collect()
}

/// All numeric tokens in `text`, left to right, each separator-normalized.
/// Order matters to callers: the last token of an equation-style answer is
/// its stated result.
pub fn extract_numbers(text: &str) -> Vec<String> {
    NUMBER_RE
        .find_iter(text)
        .map(|m| normalize_number_token(m.as_str()))
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    normalize_text(text)
        .split(' ')
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

/// `word1/word2` pairs in the canonical answer, meaning either word is
/// acceptable in that position. Extracted before text normalization since
/// that step erases the slash.
fn extract_alternative_groups(correct: &str) -> Vec<(String, String)> {
    ALT_GROUP_RE
        .captures_iter(correct)
        .map(|c| (c[1].to_lowercase(), c[2].to_lowercase()))
        .collect()
}

fn tokens_match(selected: &str, correct: &str) -> bool {
    let selected_tokens: HashSet<String> = tokenize(selected).into_iter().collect();
    let correct_tokens = tokenize(correct);
    if selected_tokens.is_empty() || correct_tokens.is_empty() {
        return false;
    }

    let groups = extract_alternative_groups(correct);
    let alternative_words: HashSet<&String> =
        groups.iter().flat_map(|(a, b)| [a, b]).collect();

    let required_present = correct_tokens
        .iter()
        .filter(|t| !alternative_words.contains(t))
        .all(|t| selected_tokens.contains(t));
    let alternatives_present = groups
        .iter()
        .all(|(a, b)| selected_tokens.contains(a) || selected_tokens.contains(b));

    required_present && alternatives_present
}

fn parses_within(token: &str, target: f64) -> bool {
    token
        .parse::<f64>()
        .map(|v| (v - target).abs() < EPSILON)
        .unwrap_or(false)
}

/// Decides whether a student's typed answer is equivalent to the canonical
/// answer stored for the question.
///
/// Comparison paths are tried in a fixed order and the first conclusive
/// one wins: comparison-symbol answers require exact symbolic equality, a
/// canonical fraction is matched by label or by decimal value, numeric
/// answers are matched against the canonical answer's numbers (the last
/// number of an equation is its result), and anything left falls back to
/// stopword-free token comparison with `word1/word2` synonym groups.
///
/// Total over all string inputs: malformed input degrades to the token
/// path or to `false`, never an error.
pub fn is_input_answer_correct(selected: &str, correct: Option<&str>) -> bool {
    let Some(correct) = correct else {
        return false;
    };

    let selected = expand_unicode_fractions(selected);
    let correct = expand_unicode_fractions(correct);

    let selected_sym = normalize_symbols(&selected);
    let correct_sym = normalize_symbols(&correct);
    if COMPARISON_RE.is_match(&correct_sym) {
        return selected_sym == correct_sym;
    }

    if let Some(expected) = normalize_fraction(&correct) {
        if extract_fractions(&selected)
            .iter()
            .any(|f| f.label == expected.label)
        {
            return true;
        }
        let target = expected.value();
        return extract_numbers(&selected)
            .iter()
            .any(|t| parses_within(t, target));
    }

    let correct_numbers = extract_numbers(&correct);
    if let Some(expected) = correct_numbers.last() {
        let selected_numbers = extract_numbers(&selected);
        if selected_numbers.iter().any(|t| t == expected) {
            return true;
        }
        // Looser pass: accept any intermediate value from an equation-style
        // canonical answer.
        if correct_numbers
            .iter()
            .any(|c| selected_numbers.iter().any(|s| s == c))
        {
            return true;
        }
        for fraction in extract_fractions(&selected) {
            let value = fraction.value();
            if correct_numbers
                .iter()
                .any(|c| c.parse::<f64>().map(|v| (v - value).abs() < EPSILON).unwrap_or(false))
            {
                return true;
            }
        }
        // No numeric match is not a failure yet; a textual answer may still
        // tie-break below.
    }

    tokens_match(&selected, &correct)
}

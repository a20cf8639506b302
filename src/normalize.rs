//! Agency-name normalization.
//!
//! [`normalize`] maps a raw agency name to the comparison key used by every
//! other component. No other module lowercases, strips or expands names on its
//! own; the helpers in this module (acronym extraction, organizational-type
//! tokens, lookup variations, library-system keys) are the only derived views
//! of a name.
//!
//! The key is idempotent: `normalize(&normalize(s)) == normalize(s)`.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// Token-wise abbreviation table. Expansions never contain a key or a
/// stopword, which keeps normalization idempotent.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("dept", "department"),
    ("govt", "government"),
    ("admin", "administration"),
    ("comm", "commission"),
    ("mgmt", "management"),
    ("dev", "development"),
    ("svc", "services"),
    ("svcs", "services"),
    ("auth", "authority"),
    ("corp", "corporation"),
    ("tech", "technology"),
    ("info", "information"),
    ("ofc", "office"),
    ("bd", "board"),
    ("div", "division"),
    ("ctr", "center"),
    ("cncl", "council"),
    ("cmte", "committee"),
    ("assoc", "association"),
    ("nyc", "new york city"),
    ("cuny", "city university of new york"),
];

/// Minimal stopword set. "of" is deliberately absent: agency names rely on
/// the "Department of X" structure.
const STOPWORDS: &[&str] = &["the", "a", "an", "for", "to", "in", "on"];

/// Tokens that name the kind of organization rather than its subject.
pub const ORG_TYPES: &[&str] = &[
    "department",
    "office",
    "commission",
    "authority",
    "board",
    "administration",
    "agency",
    "bureau",
    "council",
    "corporation",
    "committee",
    "division",
];

/// Phrase standing for the city in normalized names.
pub const NYC_PHRASE: &str = "new york city";

/// Phrase opening the many "Mayor's Office of …" names.
pub const MAYORS_OFFICE_PHRASE: &str = "mayors office";

fn parenthetical() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^)]*\)").expect("parenthetical pattern is valid"))
}

fn acronym_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(\s*([^()]+?)\s*\)").expect("acronym pattern is valid"))
}

fn expand(token: &str) -> Option<&'static str> {
    ABBREVIATIONS
        .iter()
        .find(|(abbr, _)| *abbr == token)
        .map(|(_, full)| *full)
}

/// Normalizes a raw agency name into its comparison key.
///
/// Blank input yields an empty string.
///
/// # Examples
///
/// ```
/// use agency_resolve::normalize::normalize;
///
/// assert_eq!(normalize("NYC Dept. of Parks & Recreation (DPR)"),
///            "new york city department of parks and recreation");
/// assert_eq!(normalize("   "), "");
/// ```
#[must_use]
pub fn normalize(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let without_parens = parenthetical().replace_all(&lowered, " ");

    let mut cleaned = String::with_capacity(without_parens.len() + 8);
    for ch in without_parens.chars() {
        match ch {
            '&' | '+' => cleaned.push_str(" and "),
            '\'' | '\u{2019}' | '`' => {}
            c if c.is_alphanumeric() || c.is_whitespace() => cleaned.push(c),
            _ => cleaned.push(' '),
        }
    }

    let mut tokens: Vec<&str> = Vec::new();
    for token in cleaned.split_whitespace() {
        match expand(token) {
            Some(full) => tokens.extend(full.split(' ')),
            None => tokens.push(token),
        }
    }
    tokens.retain(|t| !STOPWORDS.contains(t));
    tokens.join(" ")
}

/// Normalizes an optional name; absent or blank input yields `None`, as does
/// a name that normalizes to nothing (e.g. `"(—)"`).
#[must_use]
pub fn normalize_opt(raw: Option<&str>) -> Option<String> {
    let key = normalize(raw?);
    (!key.is_empty()).then_some(key)
}

/// Extracts the parenthetical acronym of a raw name, uppercased with
/// punctuation removed: `"Health + Hospitals (H+H)"` → `"HH"`.
///
/// Must be called on the raw name; normalization strips parentheses.
#[must_use]
pub fn extract_acronym(raw: &str) -> Option<String> {
    let inner = acronym_pattern().captures(raw)?.get(1)?.as_str();
    if inner.split_whitespace().count() > 2 {
        return None;
    }
    let acronym: String = inner
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect();
    (acronym.chars().count() >= 2).then_some(acronym)
}

/// Organizational-type tokens present in a normalized name.
#[must_use]
pub fn org_type_tokens(normalized: &str) -> BTreeSet<&'static str> {
    normalized
        .split(' ')
        .filter_map(|t| ORG_TYPES.iter().find(|o| **o == t).copied())
        .collect()
}

/// Returns true if the normalized name contains `phrase` on token boundaries.
#[must_use]
pub fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    format!(" {normalized} ").contains(&format!(" {phrase} "))
}

/// Removes every token-aligned occurrence of `phrase`, plus a dangling
/// leading "of" left behind.
#[must_use]
pub fn strip_phrase(normalized: &str, phrase: &str) -> String {
    let padded = format!(" {normalized} ").replace(&format!(" {phrase} "), " ");
    let mut tokens: Vec<&str> = padded.split_whitespace().collect();
    if tokens.first() == Some(&"of") {
        tokens.remove(0);
    }
    tokens.join(" ")
}

/// Generates lookup variations of a normalized name: org-type prefixes,
/// word-order reversal around organizational-type tokens, and the name with
/// the city phrase removed.
///
/// Used to resolve ledger names back to record ids; never used as a
/// comparison key.
#[must_use]
pub fn name_variations(normalized: &str) -> BTreeSet<String> {
    let name = normalized.trim();
    let mut out = BTreeSet::new();
    if name.is_empty() {
        return out;
    }
    out.insert(name.to_string());

    for prefix in ["office of", "department of", "mayors office of"] {
        out.insert(format!("{prefix} {name}"));
        if let Some(rest) = name.strip_prefix(prefix) {
            let rest = rest.trim();
            if !rest.is_empty() {
                out.insert(rest.to_string());
            }
        }
    }

    let words: Vec<&str> = name.split(' ').collect();
    for (idx, word) in words.iter().enumerate() {
        if !ORG_TYPES.contains(word) {
            continue;
        }
        let before = words[..idx].join(" ");
        let mut after_words = &words[idx + 1..];
        if after_words.first() == Some(&"of") {
            after_words = &after_words[1..];
        }
        let after = after_words.join(" ");
        let subject = format!("{before} {after}");
        let subject = subject.trim();
        if subject.is_empty() {
            continue;
        }
        out.insert(format!("{word} of {subject}"));
        out.insert(format!("{subject} {word}"));
    }

    if contains_phrase(name, NYC_PHRASE) {
        let stripped = strip_phrase(name, NYC_PHRASE);
        if !stripped.is_empty() {
            out.insert(stripped);
        }
    }

    out
}

/// Returns true if the raw name refers to a library.
#[must_use]
pub fn is_library_name(raw: &str) -> bool {
    raw.to_lowercase().contains("library")
}

/// Canonical key of the library system a raw name refers to.
///
/// The three borough systems (Brooklyn, New York, Queens) collapse to fixed
/// keys regardless of branch or trustee wording; other libraries keep their
/// normalized name minus organizational filler. Non-library names yield
/// `None`.
#[must_use]
pub fn library_system(raw: &str) -> Option<String> {
    if !is_library_name(raw) {
        return None;
    }
    let lowered = raw.to_lowercase();
    if lowered.contains("brooklyn") {
        return Some("brooklyn public library".to_string());
    }
    if lowered.contains("new york public") || lowered.contains("nypl") {
        return Some("new york public library".to_string());
    }
    if ["queens borough public", "queens public", "queens library"]
        .iter()
        .any(|p| lowered.contains(p))
    {
        return Some("queens public library".to_string());
    }

    const FILLER: &[&str] = &["board", "trustees", "public", "borough", "system", "branch", "division", "of"];
    let key = normalize(raw)
        .split(' ')
        .filter(|t| !FILLER.contains(t))
        .collect::<Vec<_>>()
        .join(" ");
    (!key.is_empty()).then_some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_expands_and_strips() {
        assert_eq!(
            normalize("Dept. of Information Technology & Telecommunications (DoITT)"),
            "department of information technology and telecommunications"
        );
        assert_eq!(normalize("NYC Health + Hospitals"), "new york city health and hospitals");
        assert_eq!(normalize("Mayor's Office of Media and Entertainment"), "mayors office of media and entertainment");
    }

    #[test]
    fn keeps_of_but_drops_minimal_stopwords() {
        assert_eq!(normalize("Office of the Mayor"), "office of mayor");
        assert_eq!(normalize("Commission on Human Rights"), "commission human rights");
        assert_eq!(normalize("Board of Correction"), "board of correction");
    }

    #[test]
    fn blank_and_unnormalizable_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("  \t "), "");
        assert_eq!(normalize_opt(None), None);
        assert_eq!(normalize_opt(Some("(—)")), None);
        assert_eq!(normalize_opt(Some("DOE")), Some("doe".to_string()));
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "NYC Dept. of Parks & Recreation (DPR)",
            "Office of the Mayor",
            "  The   Tax Commission, NYC ",
            "CUNY - Hunter College",
            "Health+Hospitals Corp",
            "Admin for Children's Services (ACS)",
            "dept dept nyc nyc",
            "((nested)) (unclosed",
            "İstanbul Bureau",
            "",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn acronym_extraction_reads_raw_parentheses() {
        assert_eq!(extract_acronym("Department of Education (DOE)"), Some("DOE".to_string()));
        assert_eq!(extract_acronym("NYC Health + Hospitals (H+H)"), Some("HH".to_string()));
        assert_eq!(extract_acronym("Department of Education"), None);
        assert_eq!(extract_acronym("Board (formerly known as the old board)"), None);
        assert_eq!(extract_acronym("Agency (X)"), None);
    }

    #[test]
    fn org_types_are_detected_on_token_boundaries() {
        let tokens = org_type_tokens("department of youth and community development");
        assert!(tokens.contains("department"));
        assert_eq!(tokens.len(), 1);
        assert!(org_type_tokens("officer review").is_empty());
    }

    #[test]
    fn phrases_strip_on_token_boundaries() {
        assert!(contains_phrase("new york city police department", NYC_PHRASE));
        assert!(!contains_phrase("new york citywide", NYC_PHRASE));
        assert_eq!(strip_phrase("police department new york city", NYC_PHRASE), "police department");
        assert_eq!(strip_phrase("mayors office of housing recovery", MAYORS_OFFICE_PHRASE), "housing recovery");
    }

    #[test]
    fn variations_cover_prefixes_and_reversals() {
        let v = name_variations("education department");
        assert!(v.contains("department of education"));
        assert!(v.contains("office of education department"));

        let v = name_variations("department of transportation");
        assert!(v.contains("transportation department"));
        assert!(v.contains("transportation"));

        let v = name_variations("fire department new york city");
        assert!(v.contains("fire department"));

        assert!(name_variations("").is_empty());
    }

    #[test]
    fn library_systems_collapse_to_fixed_keys() {
        assert_eq!(
            library_system("Brooklyn Public Library - Board of Trustees").as_deref(),
            Some("brooklyn public library")
        );
        assert_eq!(library_system("NYPL").as_deref(), None);
        assert_eq!(
            library_system("The New York Public Library (NYPL)").as_deref(),
            Some("new york public library")
        );
        assert_eq!(
            library_system("Queens Borough Public Library").as_deref(),
            Some("queens public library")
        );
        assert_eq!(library_system("Department of Education"), None);
    }
}

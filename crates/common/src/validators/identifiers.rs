//! Persistent identifier scheme detection and DOI normalisation

use regex_lite::Regex;
use std::sync::LazyLock;

static DOI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(doi:)?10\.\d+(\.\d+)*/.+").expect("valid doi pattern"));

static DOI_URL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(doi:\s*|https?://(dx\.)?doi\.org/)").expect("valid doi prefix pattern")
});

static ARXIV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(arxiv:)?(\d{4}\.\d{4,5}|[a-z\-]+(\.[a-z]{2})?/\d{7})(v\d+)?$")
        .expect("valid arxiv pattern")
});

static ADS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(ads:)?\d{4}[A-Za-z]\S{13}[A-Za-z.:]$").expect("valid ads pattern"));

static PMCID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^PMC\d+$").expect("valid pmcid pattern"));

static LSID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^urn:lsid:[^:]+(:[^:]+){2,3}$").expect("valid lsid pattern"));

static URN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^urn:[a-z0-9][a-z0-9-]{0,31}:\S+$").expect("valid urn pattern")
});

static ISTC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-F]{3}-?[0-9A-F]{4}-?[0-9A-F]{8}-?[0-9A-F]$").expect("valid istc pattern")
});

static PMID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^(pmid:)?\d+$").expect("valid pmid pattern"));

static HANDLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(hdl:\s*|https?://hdl\.handle\.net/)?\d+(\.\d+)*/\S+$").expect("valid handle pattern")
});

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(https?|ftp)://[^\s/$.?#][^\s]*$").expect("valid url pattern"));

/// Whether a string looks like a DOI (with optional `doi:` prefix)
pub fn is_doi(value: &str) -> bool {
    DOI.is_match(value)
}

/// Strip whitespace plus `doi:` and resolver URL prefixes
pub fn normalize_doi(value: &str) -> String {
    DOI_URL_PREFIX.replace(value.trim(), "").trim().to_string()
}

fn digits(value: &str) -> Option<Vec<u32>> {
    let compact: String = value.chars().filter(|c| *c != '-' && *c != ' ').collect();
    compact.chars().map(|c| c.to_digit(10)).collect()
}

fn is_isbn(value: &str) -> bool {
    let compact: String = value
        .trim_start_matches("ISBN")
        .trim_start_matches(':')
        .trim()
        .chars()
        .filter(|c| *c != '-' && *c != ' ')
        .collect();

    match compact.len() {
        10 => {
            let mut sum = 0;
            for (i, c) in compact.chars().enumerate() {
                let v = match (i, c) {
                    (9, 'X') | (9, 'x') => 10,
                    (_, c) => match c.to_digit(10) {
                        Some(d) => d,
                        None => return false,
                    },
                };
                sum += v * (10 - i as u32);
            }
            sum % 11 == 0
        }
        13 => (compact.starts_with("978") || compact.starts_with("979")) && is_ean13(&compact),
        _ => false,
    }
}

fn is_ean13(value: &str) -> bool {
    match digits(value) {
        Some(d) if d.len() == 13 => {
            let sum: u32 = d
                .iter()
                .enumerate()
                .map(|(i, v)| if i % 2 == 0 { *v } else { v * 3 })
                .sum();
            sum % 10 == 0
        }
        _ => false,
    }
}

/// Detect the scheme of an identifier; the first matching scheme wins
pub fn detect_scheme(value: &str) -> Option<&'static str> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let doi_candidate = normalize_doi(value);
    if is_doi(&doi_candidate) {
        return Some("doi");
    }
    if ARXIV.is_match(value) {
        return Some("arxiv");
    }
    if ADS.is_match(value) {
        return Some("ads");
    }
    if PMCID.is_match(value) {
        return Some("pmcid");
    }
    if LSID.is_match(value) {
        return Some("lsid");
    }
    if URN.is_match(value) {
        return Some("urn");
    }
    if is_isbn(value) {
        return Some("isbn");
    }
    if is_ean13(value) {
        return Some("ean13");
    }
    if ISTC.is_match(value) {
        return Some("istc");
    }
    if PMID.is_match(value) {
        return Some("pmid");
    }
    if HANDLE.is_match(value) {
        return Some("handle");
    }
    if URL.is_match(value) {
        return Some("url");
    }
    None
}

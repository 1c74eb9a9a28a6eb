//! Page text extraction.
//!
//! Given the text (or raw HTML) of a page, produce the ordered, de-duplicated
//! list of public IPv4 addresses it mentions. Script, style and noscript
//! blocks are not visible text and are dropped before matching.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::netutil::{AddressPolicy, ipv4_from_octets};

/// Dotted quad with per-octet bounds; leading zeros are tolerated and
/// canonicalized by `ipv4_from_octets`.
static IPV4_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
    )
    .unwrap()
});

static HIDDEN_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<!--.*?-->|<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<noscript\b[^>]*>.*?</noscript\s*>",
    )
    .unwrap()
});

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// Reduce an HTML document to its visible text, one space between text runs.
pub fn visible_text(html: &str) -> String {
    let without_hidden = HIDDEN_BLOCK_RE.replace_all(html, " ");
    TAG_RE.replace_all(&without_hidden, " ").into_owned()
}

/// Heuristic: does the input look like markup rather than plain text?
pub fn looks_like_html(input: &str) -> bool {
    let head = input.trim_start();
    head.starts_with('<') && TAG_RE.is_match(head)
}

/// All IPv4 addresses in `text`, canonicalized and de-duplicated in order of
/// first occurrence. No filtering.
pub fn find_ipv4(text: &str) -> Vec<Ipv4Addr> {
    let mut seen = HashSet::new();
    IPV4_RE
        .find_iter(text)
        .filter_map(|m| ipv4_from_octets(m.as_str().split('.')))
        .filter(|ip| seen.insert(*ip))
        .collect()
}

/// Addresses in `text` that the policy treats as public.
pub fn extract_public_ipv4(text: &str, policy: &AddressPolicy) -> Vec<Ipv4Addr> {
    find_ipv4(text)
        .into_iter()
        .filter(|ip| policy.is_public(*ip))
        .collect()
}

/// Extractor bound to an address policy.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    policy: AddressPolicy,
}

impl Extractor {
    pub fn new(policy: AddressPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AddressPolicy {
        &self.policy
    }

    /// Extract from page content, stripping markup first when it looks like HTML.
    pub fn extract(&self, content: &str) -> Vec<Ipv4Addr> {
        if looks_like_html(content) {
            extract_public_ipv4(&visible_text(content), &self.policy)
        } else {
            extract_public_ipv4(content, &self.policy)
        }
    }
}

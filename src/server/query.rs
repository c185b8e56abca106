//! `addressbook-query` filters (RFC 6352 §10.5), evaluated against rendered cards.
//!
//! Comparisons use case-insensitive matching, the default `i;unicode-casemap`
//! collation.

use once_cell::sync::Lazy;
use regex::Regex;

use super::xml::unescape;
use crate::vcard::Card;

static FILTER_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:[\w-]+:)?filter\b([^>]*?)/?>").expect("static regex"));
static PROP_FILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:[\w-]+:)?prop-filter\b([^>]*?)(?:/>|>(.*?)</(?:[\w-]+:)?prop-filter\s*>)").expect("static regex")
});
static TEXT_MATCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:[\w-]+:)?text-match\b([^>]*?)>(.*?)</(?:[\w-]+:)?text-match\s*>").expect("static regex")
});
static IS_NOT_DEFINED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:[\w-]+:)?is-not-defined\b").expect("static regex"));
static NRESULTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:[\w-]+:)?nresults\s*>\s*([0-9]+)\s*<").expect("static regex"));
static ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"([\w-]+)\s*=\s*"([^"]*)""#).expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    pub value: String,
    pub match_type: MatchType,
    pub negate: bool,
}

impl TextMatch {
    fn matches(&self, candidate: &str) -> bool {
        let hay = candidate.to_lowercase();
        let needle = self.value.to_lowercase();
        let hit = match self.match_type {
            MatchType::Equals => hay == needle,
            MatchType::Contains => hay.contains(&needle),
            MatchType::StartsWith => hay.starts_with(&needle),
            MatchType::EndsWith => hay.ends_with(&needle),
        };
        hit != self.negate
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropFilter {
    pub name: String,
    pub all_of: bool,
    pub is_not_defined: bool,
    pub text_matches: Vec<TextMatch>,
}

impl PropFilter {
    fn matches(&self, card: &Card) -> bool {
        let values = card.values(&self.name);
        if self.is_not_defined {
            return values.is_empty();
        }
        if self.text_matches.is_empty() {
            return !values.is_empty();
        }
        let hit = |tm: &TextMatch| values.iter().any(|v| tm.matches(v));
        if self.all_of {
            self.text_matches.iter().all(hit)
        } else {
            self.text_matches.iter().any(hit)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressBookQuery {
    pub all_of: bool,
    pub filters: Vec<PropFilter>,
    pub limit: Option<usize>,
}

fn attrs(raw: &str) -> Vec<(String, String)> {
    ATTR.captures_iter(raw).map(|c| (c[1].to_string(), unescape(&c[2]))).collect()
}

fn attr<'a>(list: &'a [(String, String)], name: &str) -> Option<&'a str> {
    list.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

impl AddressBookQuery {
    pub fn parse(body: &str) -> Self {
        let all_of = FILTER_OPEN
            .captures(body)
            .map(|c| attr(&attrs(&c[1]), "test") == Some("allof"))
            .unwrap_or(false);
        let filters = PROP_FILTER
            .captures_iter(body)
            .filter_map(|c| {
                let a = attrs(&c[1]);
                let name = attr(&a, "name")?.to_string();
                let inner = c.get(2).map(|m| m.as_str()).unwrap_or("");
                let text_matches = TEXT_MATCH
                    .captures_iter(inner)
                    .map(|t| {
                        let ta = attrs(&t[1]);
                        let match_type = match attr(&ta, "match-type") {
                            Some("equals") => MatchType::Equals,
                            Some("starts-with") => MatchType::StartsWith,
                            Some("ends-with") => MatchType::EndsWith,
                            _ => MatchType::Contains,
                        };
                        TextMatch {
                            value: unescape(t[2].trim()),
                            match_type,
                            negate: attr(&ta, "negate-condition") == Some("yes"),
                        }
                    })
                    .collect();
                Some(PropFilter {
                    name,
                    all_of: attr(&a, "test") == Some("allof"),
                    is_not_defined: IS_NOT_DEFINED.is_match(inner),
                    text_matches,
                })
            })
            .collect();
        let limit = NRESULTS.captures(body).and_then(|c| c[1].parse().ok());
        Self { all_of, filters, limit }
    }

    pub fn matches(&self, card: &Card) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        if self.all_of {
            self.filters.iter().all(|f| f.matches(card))
        } else {
            self.filters.iter().any(|f| f.matches(card))
        }
    }
}

//! vCard 4.0 rendering of upstream records.
//!
//! Pure field mapping; no state. Empty or missing upstream fields are
//! omitted rather than emitted as empty properties.

use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub params: Vec<(String, String)>,
    /// Already-escaped value.
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Card {
    props: Vec<Property>,
}

impl Card {
    pub fn new() -> Self { Self::default() }

    /// Add a single-text property; the value is escaped here.
    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.props.push(Property { name: name.to_string(), params: Vec::new(), value: escape(value) });
        self
    }

    /// Add a structured property (N, ADR, ORG); components are escaped and joined with `;`.
    pub fn structured(&mut self, name: &str, components: &[&str]) -> &mut Self {
        let value = components.iter().map(|c| escape(c)).collect::<Vec<_>>().join(";");
        self.props.push(Property { name: name.to_string(), params: Vec::new(), value });
        self
    }

    pub fn param(&mut self, key: &str, value: &str) -> &mut Self {
        if let Some(last) = self.props.last_mut() {
            last.params.push((key.to_string(), value.to_string()));
        }
        self
    }

    pub fn properties(&self) -> &[Property] { &self.props }

    /// Unescaped values of every property called `name` (case-insensitive).
    pub fn values(&self, name: &str) -> Vec<String> {
        self.props
            .iter()
            .filter(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| unescape(&p.value))
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        fold_into(&mut out, "BEGIN:VCARD");
        fold_into(&mut out, "VERSION:4.0");
        for p in &self.props {
            let mut line = p.name.clone();
            for (k, v) in &p.params {
                let _ = write!(line, ";{}={}", k, v);
            }
            line.push(':');
            line.push_str(&p.value);
            fold_into(&mut out, &line);
        }
        fold_into(&mut out, "END:VCARD");
        out
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ',' => out.push_str("\\,"),
            ';' => out.push_str("\\;"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(c) => out.push(c),
            None => out.push('\\'),
        }
    }
    out
}

/// Append `line` folded at 75 octets (never inside a UTF-8 sequence), CRLF terminated.
fn fold_into(out: &mut String, line: &str) {
    let mut width = 0;
    let mut limit = 75;
    for ch in line.chars() {
        let len = ch.len_utf8();
        if width + len > limit {
            out.push_str("\r\n ");
            width = 0;
            limit = 74;
        }
        out.push(ch);
        width += len;
    }
    out.push_str("\r\n");
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub fn client_to_card(org_id: u64, client: &crate::upstream::Client) -> Card {
    let mut card = Card::new();
    card.text("UID", &format!("urn:tiime:{}:client:{}", org_id, client.id));
    card.text("KIND", "org");
    card.text("FN", &client.name);
    card.structured("ORG", &[&client.name]);
    let street = non_empty(&client.address);
    let postal = non_empty(&client.postal_code);
    let city = non_empty(&client.city);
    let country = non_empty(&client.country);
    if street.is_some() || postal.is_some() || city.is_some() || country.is_some() {
        card.structured(
            "ADR",
            &["", "", street.unwrap_or(""), city.unwrap_or(""), "", postal.unwrap_or(""), country.unwrap_or("")],
        );
        card.param("TYPE", "work");
    }
    if let Some(phone) = non_empty(&client.phone) {
        card.text("TEL", phone).param("VALUE", "text");
    }
    if let Some(email) = non_empty(&client.email) {
        card.text("EMAIL", email);
    }
    card
}

pub fn contact_to_card(org_id: u64, client: Option<&str>, contact: &crate::upstream::Contact) -> Card {
    let first = non_empty(&contact.firstname).unwrap_or("");
    let last = non_empty(&contact.lastname).unwrap_or("");
    let mut full = [first, last].iter().filter(|s| !s.is_empty()).cloned().collect::<Vec<_>>().join(" ");
    if full.is_empty() {
        // FN is mandatory
        full = non_empty(&contact.email).map(str::to_string).unwrap_or_else(|| format!("Contact {}", contact.id));
    }

    let mut card = Card::new();
    card.text("UID", &format!("urn:tiime:{}:contact:{}", org_id, contact.id));
    card.text("KIND", "individual");
    card.text("FN", &full);
    card.structured("N", &[last, first, "", "", ""]);
    if let Some(job) = non_empty(&contact.job) {
        card.text("TITLE", job);
    }
    if let Some(client) = client.map(str::trim).filter(|s| !s.is_empty()) {
        card.structured("ORG", &[client]);
    }
    if let Some(phone) = non_empty(&contact.phone) {
        card.text("TEL", phone).param("VALUE", "text");
    }
    if let Some(email) = non_empty(&contact.email) {
        card.text("EMAIL", email);
    }
    card
}

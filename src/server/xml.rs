//! Multistatus emission and lightweight scanning of DAV request bodies.
//!
//! Request bodies are small and come from a fixed vocabulary, so they are
//! scanned with anchored regexes on local element names; namespace prefixes
//! are ignored.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;

pub const DAV_NS: &str = "DAV:";
pub const CARDDAV_NS: &str = "urn:ietf:params:xml:ns:carddav";

static HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<(?:[\w-]+:)?href\s*>(.*?)</(?:[\w-]+:)?href\s*>").expect("static regex"));
static PROP_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<(?:[\w-]+:)?prop\s*>(.*?)</(?:[\w-]+:)?prop\s*>").expect("static regex"));
static ELEMENT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:[\w-]+:)?([\w-]+)[^>]*?/?>").expect("static regex"));

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

pub fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Every `<href>` value in `body`, unescaped and trimmed.
pub fn hrefs(body: &str) -> Vec<String> {
    HREF.captures_iter(body).map(|c| unescape(c[1].trim())).collect()
}

/// Local names of the properties requested in the first `<prop>` block.
/// `None` means allprop (no body, `<allprop/>` or no `<prop>` block).
pub fn requested_props(body: &str) -> Option<Vec<String>> {
    let block = PROP_BLOCK.captures(body)?;
    let names: Vec<String> = ELEMENT_NAME.captures_iter(&block[1]).map(|c| c[1].to_string()).collect();
    if names.is_empty() { None } else { Some(names) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prop {
    ResourceType { collection: bool, principal: bool, addressbook: bool },
    DisplayName(String),
    AddressBookDescription(String),
    CurrentUserPrincipal(String),
    AddressBookHomeSet(String),
    MaxResourceSize(u64),
    SupportedAddressData,
    GetEtag(String),
    GetContentType(&'static str),
    AddressData(String),
}

impl Prop {
    pub fn local_name(&self) -> &'static str {
        match self {
            Prop::ResourceType { .. } => "resourcetype",
            Prop::DisplayName(_) => "displayname",
            Prop::AddressBookDescription(_) => "addressbook-description",
            Prop::CurrentUserPrincipal(_) => "current-user-principal",
            Prop::AddressBookHomeSet(_) => "addressbook-home-set",
            Prop::MaxResourceSize(_) => "max-resource-size",
            Prop::SupportedAddressData => "supported-address-data",
            Prop::GetEtag(_) => "getetag",
            Prop::GetContentType(_) => "getcontenttype",
            Prop::AddressData(_) => "address-data",
        }
    }

    fn write(&self, out: &mut String) {
        let _ = match self {
            Prop::ResourceType { collection, principal, addressbook } => {
                out.push_str("<d:resourcetype>");
                if *collection { out.push_str("<d:collection/>"); }
                if *principal { out.push_str("<d:principal/>"); }
                if *addressbook { out.push_str("<card:addressbook/>"); }
                write!(out, "</d:resourcetype>")
            }
            Prop::DisplayName(v) => write!(out, "<d:displayname>{}</d:displayname>", escape(v)),
            Prop::AddressBookDescription(v) => {
                write!(out, "<card:addressbook-description>{}</card:addressbook-description>", escape(v))
            }
            Prop::CurrentUserPrincipal(href) => {
                write!(out, "<d:current-user-principal><d:href>{}</d:href></d:current-user-principal>", escape(href))
            }
            Prop::AddressBookHomeSet(href) => {
                write!(out, "<card:addressbook-home-set><d:href>{}</d:href></card:addressbook-home-set>", escape(href))
            }
            Prop::MaxResourceSize(n) => write!(out, "<card:max-resource-size>{}</card:max-resource-size>", n),
            Prop::SupportedAddressData => write!(
                out,
                "<card:supported-address-data><card:address-data-type content-type=\"text/vcard\" version=\"4.0\"/></card:supported-address-data>"
            ),
            Prop::GetEtag(v) => write!(out, "<d:getetag>{}</d:getetag>", escape(v)),
            Prop::GetContentType(v) => write!(out, "<d:getcontenttype>{}</d:getcontenttype>", v),
            Prop::AddressData(v) => write!(out, "<card:address-data>{}</card:address-data>", escape(v)),
        };
    }
}

/// Builder for a `207 Multi-Status` body.
pub struct Multistatus {
    out: String,
}

impl Default for Multistatus {
    fn default() -> Self { Self::new() }
}

impl Multistatus {
    pub fn new() -> Self {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        let _ = write!(out, "<d:multistatus xmlns:d=\"{}\" xmlns:card=\"{}\">", DAV_NS, CARDDAV_NS);
        Self { out }
    }

    /// One `<response>`; props not named in `requested` are left out.
    pub fn response(&mut self, href: &str, props: &[Prop], requested: Option<&[String]>) {
        let _ = write!(self.out, "<d:response><d:href>{}</d:href><d:propstat><d:prop>", escape(href));
        for prop in props {
            let wanted = requested.map(|names| names.iter().any(|n| n == prop.local_name())).unwrap_or(true);
            if wanted {
                prop.write(&mut self.out);
            }
        }
        self.out.push_str("</d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>");
    }

    pub fn missing(&mut self, href: &str) {
        let _ = write!(
            self.out,
            "<d:response><d:href>{}</d:href><d:status>HTTP/1.1 404 Not Found</d:status></d:response>",
            escape(href)
        );
    }

    pub fn finish(mut self) -> String {
        self.out.push_str("</d:multistatus>");
        self.out
    }
}

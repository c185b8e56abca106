//! Read-only CardDAV dispatcher.
//!
//! Resolves the request path with the configured [`PathLayout`], fetches what
//! it needs through the request's upstream session, and answers with
//! multistatus XML or vCard bodies. Every write method is rejected.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use super::query::AddressBookQuery;
use super::xml::{self, Multistatus, Prop};
use super::{unauthorized, AppState, Upstream};
use crate::error::{GatewayError, GatewayResult, ALLOWED_METHODS};
use crate::ident::{normalize_dir, EntityKey, PathLayout, HOME_PATH, PRINCIPAL_PATH};
use crate::identity::{fetch_all, UpstreamSession};
use crate::upstream::{Company, EntityScope, Record};
use crate::vcard::{self, Card};

pub const MAX_RESOURCE_SIZE: u64 = 100 * 1024;
const VCARD_TYPE: &str = "text/vcard";
const XML_TYPE: &str = "application/xml; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBook {
    pub path: String,
    pub name: String,
    pub description: String,
}

impl AddressBook {
    fn for_company(layout: &PathLayout, org_id: u64, company_name: &str) -> Self {
        Self {
            path: layout.encode_collection_path(org_id),
            name: format!("Tiime {}", company_name),
            description: format!("Contacts Tiime de {}", company_name),
        }
    }

    fn props(&self) -> Vec<Prop> {
        vec![
            Prop::ResourceType { collection: true, principal: false, addressbook: true },
            Prop::DisplayName(self.name.clone()),
            Prop::AddressBookDescription(self.description.clone()),
            Prop::MaxResourceSize(MAX_RESOURCE_SIZE),
            Prop::SupportedAddressData,
            Prop::CurrentUserPrincipal(PRINCIPAL_PATH.to_string()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct AddressObject {
    pub path: String,
    pub etag: String,
    pub card: Card,
    pub text: String,
}

impl AddressObject {
    fn new(layout: &PathLayout, key: &EntityKey, card: Card) -> Self {
        let text = card.render();
        Self {
            path: layout.encode_item_path(key),
            etag: format!("\"{:016x}\"", xxh3_64(text.as_bytes())),
            card,
            text,
        }
    }

    fn props(&self, with_data: bool) -> Vec<Prop> {
        let mut props = vec![
            Prop::ResourceType { collection: false, principal: false, addressbook: false },
            Prop::GetEtag(self.etag.clone()),
            Prop::GetContentType(VCARD_TYPE),
        ];
        if with_data {
            props.push(Prop::AddressData(self.text.clone()));
        }
        props
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    Root,
    Principal,
    Home,
    AddressBook(u64),
    Item(EntityKey),
}

fn classify(layout: &PathLayout, path: &str) -> GatewayResult<Resource> {
    if path.is_empty() || path == "/" {
        return Ok(Resource::Root);
    }
    if normalize_dir(path) == PRINCIPAL_PATH {
        return Ok(Resource::Principal);
    }
    if layout.is_collection(path) {
        return Ok(Resource::AddressBook(layout.decode_collection_path(path)?));
    }
    if layout.is_home(path) {
        return Ok(Resource::Home);
    }
    Ok(Resource::Item(layout.decode_item_path(path)?))
}

/// Upstream-facing half of the dispatcher.
struct Backend<'a> {
    layout: PathLayout,
    session: &'a Arc<dyn UpstreamSession>,
}

impl Backend<'_> {
    async fn companies(&self) -> GatewayResult<Vec<Company>> {
        let records = fetch_all(self.session.clone(), EntityScope::Companies).await?;
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                Record::Company(c) => Some(c),
                _ => None,
            })
            .collect())
    }

    async fn address_books(&self) -> GatewayResult<Vec<AddressBook>> {
        let companies = self.companies().await?;
        if self.layout.is_multi_tenant() {
            return Ok(companies.iter().map(|c| AddressBook::for_company(&self.layout, c.id, &c.name)).collect());
        }
        let org_id = self.layout.decode_collection_path(HOME_PATH)?;
        let name = companies.iter().find(|c| c.id == org_id).map(|c| c.name.as_str()).unwrap_or("");
        Ok(vec![AddressBook::for_company(&self.layout, org_id, name)])
    }

    async fn address_book(&self, org_id: u64) -> GatewayResult<AddressBook> {
        let path = self.layout.encode_collection_path(org_id);
        self.address_books()
            .await?
            .into_iter()
            .find(|ab| ab.path == path)
            .ok_or_else(|| GatewayError::NotFound(path))
    }

    async fn list_objects(&self, org_id: u64) -> GatewayResult<Vec<AddressObject>> {
        let mut objects = Vec::new();
        let records = fetch_all(self.session.clone(), EntityScope::Clients { org_id }).await?;
        for record in records {
            let Record::Client(client) = record else { continue; };
            let key = EntityKey::client(org_id, client.id);
            objects.push(AddressObject::new(&self.layout, &key, vcard::client_to_card(org_id, &client)));
            if self.layout != PathLayout::Nested {
                continue;
            }
            let contacts = fetch_all(self.session.clone(), EntityScope::Contacts { org_id, client_id: client.id }).await?;
            for record in contacts {
                let Record::Contact(contact) = record else { continue; };
                let key = EntityKey::contact(org_id, client.id, contact.id);
                let card = vcard::contact_to_card(org_id, Some(&client.name), &contact);
                objects.push(AddressObject::new(&self.layout, &key, card));
            }
        }
        Ok(objects)
    }

    async fn get_object(&self, key: &EntityKey) -> GatewayResult<AddressObject> {
        let card = match self.session.fetch_one(key).await? {
            Record::Client(client) => vcard::client_to_card(key.org_id, &client),
            Record::Contact(contact) => {
                let owner = match self.session.fetch_one(&EntityKey::client(key.org_id, key.client_id)).await? {
                    Record::Client(client) => Some(client.name),
                    _ => None,
                };
                vcard::contact_to_card(key.org_id, owner.as_deref(), &contact)
            }
            Record::Company(_) => return Err(GatewayError::NotFound(self.layout.encode_item_path(key))),
        };
        Ok(AddressObject::new(&self.layout, key, card))
    }
}

/// Fallback handler for every authenticated request.
pub async fn dispatch(
    State(state): State<AppState>,
    Extension(Upstream(session)): Extension<Upstream>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let backend = Backend { layout: state.layout, session: &session };
    let path = uri.path();
    let result = match method.as_str() {
        "OPTIONS" => Ok(options()),
        "PROPFIND" => propfind(&backend, path, depth(&headers), &body).await,
        "REPORT" => report(&backend, path, &body).await,
        "GET" => get_object(&backend, path, false).await,
        "HEAD" => get_object(&backend, path, true).await,
        _ => Err(GatewayError::Unsupported),
    };
    match result {
        Ok(resp) => resp,
        Err(e) if e.is_auth() => {
            debug!(target: "dav", code = e.code_str(), "upstream refused session mid-request");
            unauthorized(&state.realm)
        }
        Err(e @ GatewayError::UpstreamTransient(_)) => {
            warn!(target: "dav", %method, path, error = %e, "upstream failure");
            e.into_response()
        }
        Err(e) => {
            debug!(target: "dav", %method, path, error = %e, "request rejected");
            e.into_response()
        }
    }
}

fn options() -> Response {
    let mut resp = StatusCode::OK.into_response();
    let h = resp.headers_mut();
    h.insert("DAV", HeaderValue::from_static("1, 3, addressbook"));
    h.insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    resp
}

/// `Depth: 0` stays on the resource; `1` and `infinity` (the default) list children.
fn depth(headers: &HeaderMap) -> u8 {
    match headers.get("depth").and_then(|v| v.to_str().ok()).map(str::trim) {
        Some("0") => 0,
        _ => 1,
    }
}

fn multistatus(ms: Multistatus) -> Response {
    (StatusCode::MULTI_STATUS, [(header::CONTENT_TYPE, XML_TYPE)], ms.finish()).into_response()
}

fn body_text(body: &Bytes) -> GatewayResult<&str> {
    std::str::from_utf8(body).map_err(|_| GatewayError::BadRequest("request body is not utf-8".into()))
}

async fn propfind(backend: &Backend<'_>, path: &str, depth: u8, body: &Bytes) -> GatewayResult<Response> {
    let requested = xml::requested_props(body_text(body)?);
    let req = requested.as_deref();
    let mut ms = Multistatus::new();
    match classify(&backend.layout, path)? {
        Resource::Root => {
            let props = [
                Prop::ResourceType { collection: true, principal: false, addressbook: false },
                Prop::CurrentUserPrincipal(PRINCIPAL_PATH.to_string()),
            ];
            ms.response("/", &props, req);
        }
        Resource::Principal => {
            let props = [
                Prop::ResourceType { collection: true, principal: true, addressbook: false },
                Prop::DisplayName("Tiime".to_string()),
                Prop::CurrentUserPrincipal(PRINCIPAL_PATH.to_string()),
                Prop::AddressBookHomeSet(HOME_PATH.to_string()),
            ];
            ms.response(PRINCIPAL_PATH, &props, req);
        }
        Resource::Home => {
            let props = [
                Prop::ResourceType { collection: true, principal: false, addressbook: false },
                Prop::CurrentUserPrincipal(PRINCIPAL_PATH.to_string()),
            ];
            ms.response(HOME_PATH, &props, req);
            if depth > 0 {
                for ab in backend.address_books().await? {
                    ms.response(&ab.path, &ab.props(), req);
                }
            }
        }
        Resource::AddressBook(org_id) => {
            let ab = backend.address_book(org_id).await?;
            ms.response(&ab.path, &ab.props(), req);
            if depth > 0 {
                for obj in backend.list_objects(org_id).await? {
                    ms.response(&obj.path, &obj.props(false), req);
                }
            }
        }
        Resource::Item(key) => {
            let obj = backend.get_object(&key).await?;
            ms.response(&obj.path, &obj.props(false), req);
        }
    }
    Ok(multistatus(ms))
}

/// Hrefs may be absolute URLs; only their path matters.
fn href_path(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        if let Ok(uri) = href.parse::<Uri>() {
            return uri.path().to_string();
        }
    }
    href.to_string()
}

async fn report(backend: &Backend<'_>, path: &str, body: &Bytes) -> GatewayResult<Response> {
    if !backend.layout.is_collection(path) {
        return Err(GatewayError::NotFound(path.to_string()));
    }
    let org_id = backend.layout.decode_collection_path(path)?;
    let text = body_text(body)?;
    let mut ms = Multistatus::new();

    if text.contains("addressbook-multiget") {
        for href in xml::hrefs(text) {
            let key = match backend.layout.decode_item_path(&href_path(&href)) {
                Ok(key) if key.org_id == org_id => key,
                _ => {
                    ms.missing(&href);
                    continue;
                }
            };
            match backend.get_object(&key).await {
                Ok(obj) => ms.response(&obj.path, &obj.props(true), None),
                Err(GatewayError::NotFound(_)) => ms.missing(&href),
                Err(e) => return Err(e),
            }
        }
    } else if text.contains("addressbook-query") {
        let query = AddressBookQuery::parse(text);
        let matching = backend.list_objects(org_id).await?.into_iter().filter(|obj| query.matches(&obj.card));
        for obj in matching.take(query.limit.unwrap_or(usize::MAX)) {
            ms.response(&obj.path, &obj.props(true), None);
        }
    } else {
        return Err(GatewayError::BadRequest("unsupported REPORT".into()));
    }
    Ok(multistatus(ms))
}

async fn get_object(backend: &Backend<'_>, path: &str, head: bool) -> GatewayResult<Response> {
    let key = backend.layout.decode_item_path(path)?;
    let obj = backend.get_object(&key).await?;
    let body = if head { Body::empty() } else { Body::from(obj.text) };
    let headers = [(header::CONTENT_TYPE, format!("{}; charset=utf-8", VCARD_TYPE)), (header::ETAG, obj.etag)];
    Ok((StatusCode::OK, headers, body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_paths_per_layout() {
        let nested = PathLayout::Nested;
        assert_eq!(classify(&nested, "/").unwrap(), Resource::Root);
        assert_eq!(classify(&nested, "/me").unwrap(), Resource::Principal);
        assert_eq!(classify(&nested, "/me/contacts/").unwrap(), Resource::Home);
        assert_eq!(classify(&nested, "/me/contacts/4/").unwrap(), Resource::AddressBook(4));
        assert_eq!(classify(&nested, "/me/contacts/4/5/6").unwrap(), Resource::Item(EntityKey::contact(4, 5, 6)));
        assert!(classify(&nested, "/elsewhere").is_err());

        let single = PathLayout::SingleTenant { org_id: 9 };
        assert_eq!(classify(&single, "/me/contacts/").unwrap(), Resource::AddressBook(9));
        assert_eq!(classify(&single, "/me/contacts/5").unwrap(), Resource::Item(EntityKey::client(9, 5)));
    }

    #[test]
    fn depth_defaults_to_children() {
        let mut h = HeaderMap::new();
        assert_eq!(depth(&h), 1);
        h.insert("depth", HeaderValue::from_static("0"));
        assert_eq!(depth(&h), 0);
        h.insert("depth", HeaderValue::from_static("infinity"));
        assert_eq!(depth(&h), 1);
    }

    #[test]
    fn href_paths_drop_scheme_and_host() {
        assert_eq!(href_path("https://dav.example.test/me/contacts/1/2"), "/me/contacts/1/2");
        assert_eq!(href_path("/me/contacts/1/2"), "/me/contacts/1/2");
    }
}

//! End-to-end tests of the gateway: gatekeeping, session reuse and the
//! CardDAV surface, against an in-memory upstream.

mod common;

use axum::http::StatusCode;
use tower::ServiceExt;

use common::*;
use tiime_carddav::config::CredentialSource;
use tiime_carddav::ident::PathLayout;
use tiime_carddav::identity::{CredentialKey, Identity};

const MULTIGET: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<C:addressbook-multiget xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:carddav">
  <D:prop><D:getetag/><C:address-data/></D:prop>
  <D:href>/me/contacts/1/10/100</D:href>
  <D:href>/me/contacts/1/99</D:href>
</C:addressbook-multiget>"#;

#[tokio::test]
async fn missing_credentials_get_a_challenge() {
    let h = nested();
    let resp = h.app.oneshot(request("PROPFIND", "/me", None, "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("www-authenticate").unwrap(), "Basic realm=\"Tiime\"");
    assert_eq!(h.factory.logins(), 0);
}

#[tokio::test]
async fn malformed_credentials_look_like_missing_ones() {
    let h = nested();
    for auth in ["Digest QWxhZGRpbjpvcGVuIHNlc2FtZQ==", "Basic fdfdf", "Basic"] {
        let resp = h.app.clone().oneshot(request("PROPFIND", "/me", Some(auth), "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "auth {auth}");
        assert_eq!(resp.headers().get("www-authenticate").unwrap(), "Basic realm=\"Tiime\"");
    }
    assert_eq!(h.factory.logins(), 0);
}

#[tokio::test]
async fn rejected_credentials_are_not_cached() {
    let h = nested();
    let wrong = basic(USER, "wrong");
    let resp = h.app.clone().oneshot(request("PROPFIND", "/me", Some(&wrong), "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("www-authenticate").unwrap(), "Basic realm=\"Tiime\"");
    assert!(!h.cache.contains(&CredentialKey::new(wrong)).await);
}

#[tokio::test]
async fn valid_credentials_reach_the_dispatcher() {
    let h = nested();
    let resp = h.app.oneshot(request("PROPFIND", "/me", Some(ALADDIN), "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_string(resp).await;
    assert!(body.contains("<card:addressbook-home-set><d:href>/me/contacts/</d:href>"));
    assert_eq!(h.factory.logins(), 1);
}

#[tokio::test]
async fn session_is_reused_across_requests() {
    let h = nested();
    for _ in 0..3 {
        let resp = h.app.clone().oneshot(request("PROPFIND", "/me/", Some(ALADDIN), "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    }
    assert_eq!(h.factory.logins(), 1);
    assert_eq!(h.cache.len().await, 1);
}

#[tokio::test]
async fn home_lists_one_address_book_per_company() {
    let h = nested();
    let resp = h.app.oneshot(request("PROPFIND", "/me/contacts/", Some(ALADDIN), "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_string(resp).await;
    assert!(body.contains("<d:href>/me/contacts/1/</d:href>"));
    assert!(body.contains("<d:displayname>Tiime ACME</d:displayname>"));
    assert!(body.contains("<card:addressbook-description>Contacts Tiime de Globex</card:addressbook-description>"));
    assert!(body.contains("<card:max-resource-size>102400</card:max-resource-size>"));
}

#[tokio::test]
async fn address_book_lists_clients_and_contacts() {
    let h = nested();
    let req = request("PROPFIND", "/me/contacts/1/", Some(ALADDIN), "");
    let resp = h.app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_string(resp).await;
    assert!(body.contains("<d:href>/me/contacts/1/10</d:href>"));
    assert!(body.contains("<d:href>/me/contacts/1/11</d:href>"));
    assert!(body.contains("<d:href>/me/contacts/1/10/100</d:href>"));
    assert!(body.contains("<d:getcontenttype>text/vcard</d:getcontenttype>"));
}

#[tokio::test]
async fn depth_zero_skips_children() {
    let h = nested();
    let mut req = request("PROPFIND", "/me/contacts/1/", Some(ALADDIN), "");
    req.headers_mut().insert("depth", "0".parse().unwrap());
    let body = body_string(h.app.oneshot(req).await.unwrap()).await;
    assert!(body.contains("<d:href>/me/contacts/1/</d:href>"));
    assert!(!body.contains("/me/contacts/1/10"));
}

#[tokio::test]
async fn flat_layout_pages_through_every_client() {
    let h = harness(PathLayout::MultiTenant, CredentialSource::Presented);
    let resp = h.app.oneshot(request("PROPFIND", "/me/contacts/2/", Some(ALADDIN), "")).await.unwrap();
    let body = body_string(resp).await;
    assert_eq!(body.matches("<d:response>").count(), 151);
    assert!(body.contains("<d:href>/me/contacts/2/1149</d:href>"));
    assert!(!body.contains("/me/contacts/2/1000/"));
}

#[tokio::test]
async fn get_returns_vcard_with_etag() {
    let h = nested();
    let resp = h.app.clone().oneshot(request("GET", "/me/contacts/1/10/100", Some(ALADDIN), "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("content-type").unwrap().to_str().unwrap().starts_with("text/vcard"));
    let etag = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));
    let card = body_string(resp).await;
    assert!(card.contains("FN:Ada Lovelace\r\n"));
    assert!(card.contains("ORG:Wile E. Coyote\r\n"));

    let again = h.app.oneshot(request("GET", "/me/contacts/1/10/100", Some(ALADDIN), "")).await.unwrap();
    assert_eq!(again.headers().get("etag").unwrap().to_str().unwrap(), etag);
}

#[tokio::test]
async fn unknown_or_malformed_paths_are_not_found() {
    let h = nested();
    for path in ["/me/contacts/1/99", "/me/contacts/test/10", "/me/contacts/1/10/100/5", "/elsewhere"] {
        let resp = h.app.clone().oneshot(request("GET", path, Some(ALADDIN), "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "path {path}");
    }
}

#[tokio::test]
async fn multiget_returns_found_and_missing() {
    let h = nested();
    let resp = h.app.oneshot(request("REPORT", "/me/contacts/1/", Some(ALADDIN), MULTIGET)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_string(resp).await;
    assert!(body.contains("<d:href>/me/contacts/1/10/100</d:href>"));
    assert!(body.contains("<card:address-data>BEGIN:VCARD"));
    assert!(body.contains("<d:href>/me/contacts/1/99</d:href><d:status>HTTP/1.1 404 Not Found</d:status>"));
}

#[tokio::test]
async fn query_filters_cards() {
    let h = nested();
    let query = r#"<C:addressbook-query xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:carddav">
        <D:prop><D:getetag/></D:prop>
        <C:filter><C:prop-filter name="EMAIL"><C:text-match match-type="ends-with">@acme.test</C:text-match></C:prop-filter></C:filter>
    </C:addressbook-query>"#;
    let resp = h.app.oneshot(request("REPORT", "/me/contacts/1/", Some(ALADDIN), query)).await.unwrap();
    let body = body_string(resp).await;
    assert!(body.contains("<d:href>/me/contacts/1/10</d:href>"));
    assert!(body.contains("<d:href>/me/contacts/1/10/100</d:href>"));
    assert!(!body.contains("<d:href>/me/contacts/1/11</d:href>"));
}

#[tokio::test]
async fn writes_are_always_rejected() {
    let h = nested();
    for (method, path) in [
        ("PUT", "/me/contacts/1/10"),
        ("DELETE", "/me/contacts/1/10"),
        ("MKCOL", "/me/contacts/3/"),
        ("PROPPATCH", "/me/contacts/1/"),
        ("PUT", "/not/even/a/path"),
    ] {
        let resp = h.app.clone().oneshot(request(method, path, Some(ALADDIN), "BEGIN:VCARD")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED, "{method} {path}");
    }
}

#[tokio::test]
async fn upstream_failures_surface_as_bad_gateway() {
    let h = nested();
    let resp = h.app.oneshot(request("PROPFIND", "/me/contacts/500/", Some(ALADDIN), "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn options_advertises_carddav() {
    let h = nested();
    let resp = h.app.oneshot(request("OPTIONS", "/me/contacts/", Some(ALADDIN), "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("dav").unwrap().to_str().unwrap().contains("addressbook"));
}

#[tokio::test]
async fn single_tenant_uses_the_service_account() {
    let key = CredentialKey::for_identity(&Identity::new(USER, PASSWORD));
    let h = harness(PathLayout::SingleTenant { org_id: 1 }, CredentialSource::ServiceAccount(key));
    let resp = h.app.clone().oneshot(request("PROPFIND", "/me/contacts/", None, "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_string(resp).await;
    assert!(body.contains("<d:displayname>Tiime ACME</d:displayname>"));
    assert!(body.contains("<d:href>/me/contacts/10</d:href>"));

    let card = h.app.oneshot(request("GET", "/me/contacts/11", None, "")).await.unwrap();
    assert_eq!(card.status(), StatusCode::OK);
    assert_eq!(h.factory.logins(), 1);
}

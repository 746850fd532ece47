use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, Extensions, HeaderMap, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use super::resolver::{RedirectResolver, Resolution};
use crate::analytics::{extract_client_ip, GeoIpService, RequestMeta};
use crate::config::AnalyticsConfig;
use crate::error::AppError;
use crate::models::RedirectType;

pub const PROOF_HEADER: &str = "x-link-proof";
const PROOF_PARAM: &str = "proof";
const GEO_HINT_HEADERS: &[&str] = &["cf-ipcountry", "x-country-code"];

pub struct RedirectState {
    pub resolver: Arc<RedirectResolver>,
    pub geoip: GeoIpService,
    pub analytics_config: AnalyticsConfig,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Proof from the query string, falling back to the header
fn proof_token(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    uri.query()
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == PROOF_PARAM)
                .map(|(_, value)| value.into_owned())
        })
        .or_else(|| header_str(headers, PROOF_HEADER).map(str::to_string))
}

/// Country from an upstream geo hint, else a GeoIP lookup of the client address
fn country_hint(state: &RedirectState, headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    let hinted = GEO_HINT_HEADERS
        .iter()
        .filter_map(|name| header_str(headers, name))
        .find(|code| code.len() == 2 && !code.eq_ignore_ascii_case("xx"));
    if let Some(code) = hinted {
        return Some(code.to_uppercase());
    }

    if !state.geoip.is_enabled() {
        return None;
    }
    let ConnectInfo(addr) = extensions.get::<ConnectInfo<SocketAddr>>()?;
    let client_ip = extract_client_ip(headers, addr.ip(), &state.analytics_config);
    state.geoip.country(client_ip)
}

fn redirect_status(redirect_type: RedirectType) -> StatusCode {
    match redirect_type {
        RedirectType::MovedPermanently => StatusCode::MOVED_PERMANENTLY,
        RedirectType::Found => StatusCode::FOUND,
        RedirectType::TemporaryRedirect => StatusCode::TEMPORARY_REDIRECT,
        RedirectType::PermanentRedirect => StatusCode::PERMANENT_REDIRECT,
    }
}

fn password_page(shortcode: &str) -> String {
    format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Password required</title></head>
<body>
<h1>Password required</h1>
<p>The link <code>/{shortcode}</code> is password protected.</p>
<p>Verify the password with <code>POST /api/password/verify</code> and open the link again with the returned <code>proof</code>.</p>
</body>
</html>
"#
    )
}

/// Resolve a shortcode to its destination
pub async fn redirect_url(
    State(state): State<Arc<RedirectState>>,
    Path(shortcode): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    extensions: Extensions,
) -> Response {
    let meta = RequestMeta {
        url: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string()),
        user_agent: header_str(&headers, header::USER_AGENT.as_str()).map(str::to_string),
        referrer: header_str(&headers, header::REFERER.as_str()).map(str::to_string),
        country: country_hint(&state, &headers, &extensions),
    };
    let proof = proof_token(&uri, &headers);

    let resolution = match state
        .resolver
        .resolve(&shortcode, &meta, proof.as_deref(), Utc::now())
        .await
    {
        Ok(resolution) => resolution,
        Err(err) => return err.into_response(),
    };

    match resolution {
        Resolution::Redirect { url, status } => {
            (redirect_status(status), [(header::LOCATION, url)]).into_response()
        }
        Resolution::PasswordRequired => {
            (StatusCode::UNAUTHORIZED, Html(password_page(&shortcode))).into_response()
        }
        Resolution::Expired => (StatusCode::GONE, "This link has expired").into_response(),
        Resolution::NotYetActive | Resolution::NotFound => {
            AppError::not_found("URL not found").into_response()
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: &'static str,
    }

    Json(HealthResponse { status: "OK" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn proof_prefers_query_parameter() {
        let uri: Uri = "/abc?utm_source=x&proof=from-query".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(PROOF_HEADER, HeaderValue::from_static("from-header"));
        assert_eq!(proof_token(&uri, &headers).as_deref(), Some("from-query"));

        let bare: Uri = "/abc".parse().unwrap();
        assert_eq!(proof_token(&bare, &headers).as_deref(), Some("from-header"));
        assert_eq!(proof_token(&bare, &HeaderMap::new()), None);
    }

    #[test]
    fn every_redirect_type_maps_to_its_status() {
        for code in [301u16, 302, 307, 308] {
            let redirect_type = RedirectType::try_from(code).unwrap();
            assert_eq!(redirect_status(redirect_type).as_u16(), code);
        }
    }
}

//! UI language negotiation for the `/:lang/...` routes.

use crate::config::Config;
use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::{
    extract::cookie::{Cookie, SameSite},
    headers,
    TypedHeader,
};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// Cookie remembering the last language the user browsed in.
pub const LANG_COOKIE: &str = "lang";

/// Name of the route parameter carrying the language.
const LANG_PARAM: &str = "lang";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Languages {
    supported: Vec<String>,
    default: String,
}

/// The language a request was served in, available to handlers as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language(pub String);

impl Languages {
    pub fn new(supported: Vec<String>, default: impl Into<String>) -> Self {
        let default = default.into().to_ascii_lowercase();
        let mut supported = supported
            .into_iter()
            .map(|l| l.to_ascii_lowercase())
            .collect::<Vec<_>>();

        if !supported.contains(&default) {
            supported.push(default.clone());
        }

        Self { supported, default }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.languages.clone(), config.default_language.clone())
    }

    pub fn is_supported(&self, lang: &str) -> bool {
        self.supported.iter().any(|l| l.eq_ignore_ascii_case(lang))
    }

    /// Exact match first, then the primary subtag (`de-AT` matches `de`).
    fn resolve(&self, tag: &str) -> Option<&str> {
        let tag = tag.trim();
        if tag.is_empty() || tag == "*" {
            return None;
        }

        if let Some(lang) = self.supported.iter().find(|l| l.eq_ignore_ascii_case(tag)) {
            return Some(lang);
        }

        let primary = tag.split('-').next()?;
        self.supported
            .iter()
            .find(|l| l.eq_ignore_ascii_case(primary))
            .map(String::as_str)
    }

    /// Pick the language of a request: the URL segment, then the stored preference,
    /// then the browser's `Accept-Language` entries by descending weight, then the
    /// default.
    pub fn negotiate(
        &self,
        url_segment: Option<&str>,
        stored: Option<&str>,
        accept_language: Option<&str>,
    ) -> String {
        let from_url = url_segment.filter(|s| self.is_supported(s));
        let from_cookie = stored.and_then(|s| self.resolve(s));
        let from_browser = accept_language.and_then(|header| {
            parse_accept_language(header)
                .into_iter()
                .find_map(|tag| self.resolve(tag))
        });

        from_url
            .or(from_cookie)
            .or(from_browser)
            .unwrap_or(self.default.as_str())
            .to_ascii_lowercase()
    }
}

/// Language tags of an `Accept-Language` header ordered by q-value. Entries with an
/// unparsable or zero weight are dropped. Equal weights keep header order.
pub fn parse_accept_language(header: &str) -> Vec<&str> {
    let mut entries = header
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let tag = parts.next()?.trim();
            if tag.is_empty() {
                return None;
            }

            let mut q = 1.0_f32;
            for param in parts {
                if let Some(value) = param.trim().strip_prefix("q=") {
                    q = value.trim().parse().ok()?;
                }
            }

            (q > 0.0).then_some((tag, q))
        })
        .collect::<Vec<_>>();

    entries.sort_by(|a, b| b.1.total_cmp(&a.1));
    entries.into_iter().map(|(tag, _)| tag).collect()
}

/// Path to redirect to when the first segment of `path` is not a supported language.
/// The segment is replaced when it looks like a language tag and prefixed otherwise.
pub fn redirect_target(path: &str, query: Option<&str>, lang: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    let (first, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));

    let mut target = if looks_like_language(first) {
        format!("/{lang}/{rest}")
    } else {
        format!("/{lang}/{trimmed}")
    };

    if target.ends_with('/') && target.len() > lang.len() + 2 {
        target.pop();
    }

    if let Some(query) = query.filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(query);
    }

    target
}

fn looks_like_language(segment: &str) -> bool {
    let mut parts = segment.split('-');
    let primary = parts.next().unwrap_or_default();

    (2..=3).contains(&primary.len())
        && primary.chars().all(|c| c.is_ascii_alphabetic())
        && parts.all(|p| (2..=8).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// Route layer for the language prefixed routes. Redirects unsupported languages to
/// the negotiated prefix, otherwise remembers the choice in a cookie.
pub async fn language(
    State(languages): State<Arc<Languages>>,
    Path(params): Path<HashMap<String, String>>,
    cookies: Option<TypedHeader<headers::Cookie>>,
    header_map: HeaderMap,
    mut req: Request,
    next: Next,
) -> Response {
    let segment = params.get(LANG_PARAM).map(String::as_str);
    let stored = cookies.as_ref().and_then(|c| c.get(LANG_COOKIE));
    let accept = header_map
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok());

    let lang = languages.negotiate(segment, stored, accept);

    if segment != Some(lang.as_str()) {
        let target = redirect_target(req.uri().path(), req.uri().query(), &lang);
        debug!("Redirecting {} to {target}", req.uri());
        return Redirect::temporary(&target).into_response();
    }

    req.extensions_mut().insert(Language(lang.clone()));
    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&lang) {
        response.headers_mut().insert(header::CONTENT_LANGUAGE, value);
    }

    if stored != Some(lang.as_str()) {
        let cookie = Cookie::build((LANG_COOKIE, lang))
            .path("/")
            .same_site(SameSite::Lax)
            .permanent()
            .build();

        if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn languages() -> Languages {
        Languages::new(vec!["en".into(), "de".into(), "fr".into()], "en")
    }

    #[test]
    fn url_segment_wins() {
        assert_eq!(
            languages().negotiate(Some("fr"), Some("de"), Some("de-DE")),
            "fr"
        );
    }

    #[test]
    fn falls_back_to_stored_preference() {
        assert_eq!(languages().negotiate(Some("xx"), Some("de"), Some("fr")), "de");
        assert_eq!(languages().negotiate(None, Some("DE"), None), "de");
    }

    #[test]
    fn falls_back_to_browser_locale_by_weight() {
        let langs = languages();
        assert_eq!(
            langs.negotiate(None, Some("it"), Some("it;q=1.0, fr;q=0.5, de-AT;q=0.8")),
            "de"
        );
        assert_eq!(langs.negotiate(None, None, Some("fr-CA")), "fr");
    }

    #[test]
    fn falls_back_to_default() {
        let langs = languages();
        assert_eq!(langs.negotiate(None, None, None), "en");
        assert_eq!(langs.negotiate(Some("xx"), Some("yy"), Some("it, *;q=0.1")), "en");
    }

    #[test]
    fn accept_language_is_ordered_by_weight() {
        assert_eq!(
            parse_accept_language("da, en-GB;q=0.8, en;q=0.7, fr;q=0, de;q=0.8"),
            vec!["da", "en-GB", "de", "en"]
        );
        assert_eq!(parse_accept_language("de;q=abc, fr"), vec!["fr"]);
        assert!(parse_accept_language("").is_empty());
    }

    #[test]
    fn redirect_replaces_or_prefixes_the_language() {
        let org = "0b7d4a8e-1f0a-4c5e-9d7b-3b7c2d1e0f9a";

        assert_eq!(
            redirect_target(&format!("/xx/orgs/{org}/parts"), Some("sort=name"), "de"),
            format!("/de/orgs/{org}/parts?sort=name")
        );
        assert_eq!(
            redirect_target(&format!("/orgs/{org}/live"), None, "en"),
            format!("/en/orgs/{org}/live")
        );
        assert_eq!(redirect_target("/pt-BR/", None, "en"), "/en/");
    }

    #[test]
    fn default_is_always_supported() {
        let langs = Languages::new(vec!["de".into()], "en");
        assert!(langs.is_supported("en"));
        assert!(langs.is_supported("DE"));
    }
}

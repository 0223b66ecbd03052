//! Cacheability Policy Module
//!
//! Request-side bypass rules and response-side storability rules.
//!
//! Both sides fail closed: anything that cannot be parsed is treated as
//! "do not use the cache".

use std::collections::HashSet;
use std::time::Duration;

use axum::http::{header, Extensions, HeaderMap, Request, StatusCode};

/// Request extension inserted by an upstream authentication layer once the
/// request is attributed to a specific principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

// == Request Side ==
/// Why a request must not touch the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BypassReason {
    Authorization,
    Principal,
    DenyListedCookie(String),
    MalformedCookie,
    RequestDirective(String),
    MalformedCacheControl,
}

/// Decides whether a request is attributable to a principal or opts out of
/// caching.
#[derive(Debug, Clone)]
pub struct BypassPolicy {
    /// Lower-cased cookie names
    deny_cookies: HashSet<String>,
}

impl BypassPolicy {
    /// Creates a policy from cookie names, matched case-insensitively.
    pub fn new<I, S>(deny_cookies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            deny_cookies: deny_cookies
                .into_iter()
                .map(|name| name.as_ref().trim().to_ascii_lowercase())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    /// True if the request must neither be served from nor written to the cache.
    pub fn is_request_bypassed<B>(&self, request: &Request<B>) -> bool {
        self.bypass_reason(request.headers(), request.extensions())
            .is_some()
    }

    /// Returns the first rule that forces a bypass, if any.
    pub fn bypass_reason(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<BypassReason> {
        if headers.contains_key(header::AUTHORIZATION) {
            return Some(BypassReason::Authorization);
        }
        if extensions.get::<Principal>().is_some() {
            return Some(BypassReason::Principal);
        }
        if let Some(reason) = self.cookie_bypass(headers) {
            return Some(reason);
        }
        request_directive_bypass(headers)
    }

    fn cookie_bypass(&self, headers: &HeaderMap) -> Option<BypassReason> {
        for value in headers.get_all(header::COOKIE) {
            let Ok(raw) = value.to_str() else {
                return Some(BypassReason::MalformedCookie);
            };

            for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                let Some((name, _)) = pair.split_once('=') else {
                    return Some(BypassReason::MalformedCookie);
                };
                let name = name.trim();
                if name.is_empty() {
                    return Some(BypassReason::MalformedCookie);
                }
                let lowered = name.to_ascii_lowercase();
                if self.deny_cookies.contains(&lowered) {
                    return Some(BypassReason::DenyListedCookie(lowered));
                }
            }
        }
        None
    }
}

fn request_directive_bypass(headers: &HeaderMap) -> Option<BypassReason> {
    for value in headers.get_all(header::CACHE_CONTROL) {
        let Ok(raw) = value.to_str() else {
            return Some(BypassReason::MalformedCacheControl);
        };
        for directive in raw.split(',') {
            let name = directive
                .split('=')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            if matches!(name.as_str(), "no-cache" | "no-store" | "private") {
                return Some(BypassReason::RequestDirective(name));
            }
        }
    }

    for value in headers.get_all(header::PRAGMA) {
        let Ok(raw) = value.to_str() else {
            return Some(BypassReason::MalformedCacheControl);
        };
        if raw
            .split(',')
            .any(|d| d.trim().eq_ignore_ascii_case("no-cache"))
        {
            return Some(BypassReason::RequestDirective("no-cache".to_string()));
        }
    }

    None
}

// == Response Side ==
/// Why a response is not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Status(u16),
    MissingCacheControl,
    MalformedCacheControl,
    Directive(&'static str),
    NotPublic,
    ZeroMaxAge,
    VaryWildcard,
    MalformedVary,
    SetsCookie,
}

/// Outcome of response cacheability evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Store {
        /// Deduplicated, lower-cased request header names
        vary_headers: Option<Vec<String>>,
        /// Freshness lifetime announced by the response
        max_age: Option<Duration>,
    },
    Skip(SkipReason),
}

impl Verdict {
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Verdict::Store { .. })
    }

    pub fn vary_headers(&self) -> Option<&[String]> {
        match self {
            Verdict::Store { vary_headers, .. } => vary_headers.as_deref(),
            Verdict::Skip(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Directives {
    public: bool,
    max_age: Option<u64>,
    s_maxage: Option<u64>,
    forbidden: Option<&'static str>,
}

/// Decides whether a response may be stored.
///
/// Caching is opt-in: the status must be 200 and `Cache-Control` must carry
/// `public` or a positive `max-age`/`s-maxage`, with none of `no-store`,
/// `no-cache` or `private`. `Vary: *` is never cacheable.
pub fn is_response_cacheable(
    status: StatusCode,
    cache_control: Option<&str>,
    vary: Option<&str>,
) -> Verdict {
    if status != StatusCode::OK {
        return Verdict::Skip(SkipReason::Status(status.as_u16()));
    }

    let Some(cache_control) = cache_control else {
        return Verdict::Skip(SkipReason::MissingCacheControl);
    };
    let Some(directives) = parse_cache_control(cache_control) else {
        return Verdict::Skip(SkipReason::MalformedCacheControl);
    };

    if let Some(directive) = directives.forbidden {
        return Verdict::Skip(SkipReason::Directive(directive));
    }

    let lifetime = directives.s_maxage.or(directives.max_age);
    if lifetime == Some(0) {
        return Verdict::Skip(SkipReason::ZeroMaxAge);
    }
    if !directives.public && lifetime.is_none() {
        return Verdict::Skip(SkipReason::NotPublic);
    }

    let vary_headers = match vary.map(parse_vary) {
        None => None,
        Some(Ok(names)) => Some(names).filter(|n| !n.is_empty()),
        Some(Err(reason)) => return Verdict::Skip(reason),
    };

    Verdict::Store {
        vary_headers,
        max_age: lifetime.map(Duration::from_secs),
    }
}

/// Evaluates a complete response head.
///
/// Repeated `Cache-Control`/`Vary` headers are combined; a value that is not
/// valid header text or a `Set-Cookie` header makes the response unstorable.
pub fn evaluate_response(status: StatusCode, headers: &HeaderMap) -> Verdict {
    if headers.contains_key(header::SET_COOKIE) {
        return Verdict::Skip(SkipReason::SetsCookie);
    }

    let cache_control = match combined(headers, header::CACHE_CONTROL) {
        Ok(value) => value,
        Err(()) => return Verdict::Skip(SkipReason::MalformedCacheControl),
    };
    let vary = match combined(headers, header::VARY) {
        Ok(value) => value,
        Err(()) => return Verdict::Skip(SkipReason::MalformedVary),
    };

    is_response_cacheable(status, cache_control.as_deref(), vary.as_deref())
}

fn combined(headers: &HeaderMap, name: header::HeaderName) -> Result<Option<String>, ()> {
    let mut parts = Vec::new();
    for value in headers.get_all(name) {
        parts.push(value.to_str().map_err(|_| ())?);
    }
    Ok(if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    })
}

fn parse_cache_control(raw: &str) -> Option<Directives> {
    let mut directives = Directives::default();

    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, value) = match part.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
            None => (part, None),
        };
        if !is_token(name) {
            return None;
        }

        match name.to_ascii_lowercase().as_str() {
            "public" => directives.public = true,
            "no-store" => directives.forbidden = Some("no-store"),
            "no-cache" => directives.forbidden = Some("no-cache"),
            "private" => directives.forbidden = Some("private"),
            "max-age" => directives.max_age = Some(value?.parse().ok()?),
            "s-maxage" => directives.s_maxage = Some(value?.parse().ok()?),
            _ => {}
        }
    }

    Some(directives)
}

fn parse_vary(raw: &str) -> Result<Vec<String>, SkipReason> {
    let mut names: Vec<String> = Vec::new();

    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if part == "*" {
            return Err(SkipReason::VaryWildcard);
        }
        if !is_token(part) {
            return Err(SkipReason::MalformedVary);
        }
        let lowered = part.to_ascii_lowercase();
        if !names.contains(&lowered) {
            names.push(lowered);
        }
    }

    Ok(names)
}

/// RFC 9110 token characters.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

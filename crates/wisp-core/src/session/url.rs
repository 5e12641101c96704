//! Bookmarkable URLs for internal paths.
//!
//! A deployment mounted on a file-like path (`/app`) carries the internal path
//! as path info (`/app/docs/intro`). A deployment mounted on a folder (`/`,
//! `/app/`) shares its namespace with static files, so the internal path goes
//! into the `_` query parameter instead (`/app/?_=/docs/intro`).

use url::form_urlencoded;

/// Query parameter carrying the internal path for folder deployments.
pub const PATH_PARAM: &str = "_";

/// Query parameter carrying the session id when cookies are unavailable.
pub const SESSION_PARAM: &str = "sid";

/// Builds the URL that opens `internal_path` under `base`.
///
/// `session_id` is only passed for clients that cannot keep the session in a
/// cookie.
pub fn bookmark_url(base: &str, internal_path: &str, session_id: Option<&str>) -> String {
    let mut url = base.to_string();
    let mut query = form_urlencoded::Serializer::new(String::new());

    let is_root = internal_path.is_empty() || internal_path == "/";
    if base.ends_with('/') {
        if !is_root {
            query.append_pair(PATH_PARAM, internal_path);
        }
    } else if !is_root {
        url.push_str(&encode_path(internal_path));
    }

    if let Some(id) = session_id {
        query.append_pair(SESSION_PARAM, id);
    }

    let query = query.finish();
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query);
    }
    url
}

/// Recovers the internal path from an incoming request.
///
/// `query_path` is the value of the `_` parameter, if present, and wins over
/// path info. Anything that cannot be mapped yields `/`.
pub fn internal_path_from_request(base: &str, request_path: &str, query_path: Option<&str>) -> String {
    if let Some(path) = query_path.filter(|p| !p.is_empty()) {
        return with_leading_slash(path);
    }

    if base.ends_with('/') {
        return "/".to_string();
    }

    let Some(rest) = request_path.strip_prefix(base) else {
        return "/".to_string();
    };
    if !rest.is_empty() && !rest.starts_with('/') {
        // `/application` is not below `/app`.
        return "/".to_string();
    }

    match urlencoding::decode(rest) {
        Ok(decoded) => with_leading_slash(&decoded),
        Err(_) => "/".to_string(),
    }
}

fn encode_path(path: &str) -> String {
    path.trim_start_matches('/')
        .split('/')
        .fold(String::new(), |mut out, segment| {
            out.push('/');
            out.push_str(&urlencoding::encode(segment));
            out
        })
}

fn with_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

use actix_web::http::header::HeaderMap;
use actix_web::HttpRequest;

/// Best-effort client address used as the blocklist key. Never empty.
pub fn client_ip(req: &HttpRequest) -> String {
    resolve(req.headers(), req.peer_addr().map(|addr| addr.ip().to_string()))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn resolve(headers: &HeaderMap, peer: Option<String>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    forwarded
        .or_else(|| header(headers, "x-real-ip"))
        .or_else(|| header(headers, "x-appengine-remote-addr"))
        .map(str::to_string)
        .or(peer)
        .unwrap_or_else(|| "unknown".to_string())
}

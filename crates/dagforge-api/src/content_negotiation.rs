// Accepts plain `application/json` as well as versioned vendor media types
// of the form `application/vnd.dagforge.<kind>.<version>+json`, normalizing
// the latter to `application/json` for the rest of the stack and rejecting
// anything else with 406.

use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

const JSON_MIME: &str = "application/json";
const VENDOR_PREFIX: &str = "application/vnd.dagforge.";
const VENDOR_SUFFIX: &str = "+json";

fn accepts(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed == "*/*"
        || trimmed == JSON_MIME
        || (trimmed.starts_with(VENDOR_PREFIX) && trimmed.ends_with(VENDOR_SUFFIX))
}

pub async fn negotiate(mut request: Request, next: Next) -> Result<Response, StatusCode> {
    let accept_header = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(JSON_MIME)
        .to_string();

    let matched = accept_header.split(',').any(accepts);
    if !matched {
        return Err(StatusCode::NOT_ACCEPTABLE);
    }

    // Downstream handlers only ever produce `application/json`; the vendor
    // wrapper is purely a negotiation-layer concern.
    request
        .headers_mut()
        .insert(header::ACCEPT, HeaderValue::from_static(JSON_MIME));

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_json_and_versioned_vendor_types() {
        assert!(accepts("application/json"));
        assert!(accepts("application/vnd.dagforge.workflow.v1+json"));
        assert!(accepts("*/*"));
    }

    #[test]
    fn rejects_unrelated_media_types() {
        assert!(!accepts("application/xml"));
        assert!(!accepts("application/vnd.other.thing.v1+json"));
    }
}

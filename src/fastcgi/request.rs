//! Request and response model for a single FastCGI exchange.
//!
//! The server fills a [`Request`] from the PARAMS and STDIN streams; handlers
//! return a [`Response`] which is rendered as a CGI response (headers, blank
//! line, body) onto the STDOUT stream.

use std::collections::HashMap;

/// A complete Responder request
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// FastCGI request id
    pub request_id: u16,
    /// Whether the web server asked to keep the connection
    pub keep_conn: bool,
    /// CGI environment (`REQUEST_METHOD`, `CONTENT_TYPE`, ...)
    pub params: HashMap<String, String>,
    /// Raw STDIN bytes
    pub stdin: Vec<u8>,
}

impl Request {
    /// Look up a CGI parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// `REQUEST_METHOD`, absent when nginx lacks `include fastcgi_params;`
    pub fn method(&self) -> Option<&str> {
        self.param("REQUEST_METHOD")
    }

    /// `CONTENT_TYPE`
    pub fn content_type(&self) -> Option<&str> {
        self.param("CONTENT_TYPE")
    }

    /// `CONTENT_LENGTH` when present and numeric
    pub fn content_length(&self) -> Option<usize> {
        self.param("CONTENT_LENGTH")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Request body, truncated to `CONTENT_LENGTH` when that is given
    pub fn body(&self) -> &[u8] {
        match self.content_length() {
            Some(len) if len < self.stdin.len() => &self.stdin[..len],
            _ => &self.stdin,
        }
    }
}

/// CGI response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status; a `Status:` header is only emitted when this is not 200
    pub status: u16,
    /// Header lines in output order
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl Response {
    /// Empty response with `status` and a content type
    pub fn new(status: u16, content_type: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-type".to_string(), content_type.to_string())],
            body: Vec::new(),
        }
    }

    /// `200` carrying a JSON document, terminated by CRLF
    pub fn json(content_type: &str, json: &str) -> Self {
        let mut response = Self::new(200, &format!("{}; charset=utf-8", content_type));
        response.body = format!("{}\r\n", json).into_bytes();
        response
    }

    /// `200` acknowledgement sent after a POST
    pub fn post_ack() -> Self {
        let mut response = Self::new(200, "text/html; charset=utf-8");
        response.body = b"\r\n<html></html>\r\n".to_vec();
        response
    }

    /// Plain-text error with the given status
    pub fn error(status: u16, message: &str) -> Self {
        let mut response = Self::new(status, "text/plain; charset=utf-8");
        response.body = format!("{}\r\n", message).into_bytes();
        response
    }

    /// Add a header line
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Render as CGI output: headers, blank line, body
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 128);
        if self.status != 200 {
            out.extend_from_slice(
                format!("Status: {} {}\r\n", self.status, reason_phrase(self.status)).as_bytes(),
            );
        }
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse CGI output back into a response. Used by the client side.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let split = raw.windows(4).position(|w| w == b"\r\n\r\n")?;
        let head = std::str::from_utf8(&raw[..split]).ok()?;
        let body = raw[split + 4..].to_vec();

        let mut status = 200;
        let mut headers = Vec::new();
        for line in head.split("\r\n") {
            let (name, value) = line.split_once(':')?;
            let value = value.trim();
            if name.eq_ignore_ascii_case("Status") {
                status = value.split_whitespace().next()?.parse().ok()?;
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }
        Some(Self {
            status,
            headers,
            body,
        })
    }
}

/// Reason phrase for the status codes this daemon produces
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Decode an `application/x-www-form-urlencoded` body.
///
/// Tokens are split on `&` and then on the first `=`. Tokens without `=` are
/// skipped and later keys overwrite earlier ones. No percent decoding is done.
pub fn parse_form(body: &str) -> HashMap<String, String> {
    body.split('&')
        .filter_map(|token| token.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(params: &[(&str, &str)], stdin: &[u8]) -> Request {
        Request {
            request_id: 1,
            keep_conn: false,
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            stdin: stdin.to_vec(),
        }
    }

    #[test]
    fn test_body_bounded_by_content_length() {
        let req = request_with(&[("CONTENT_LENGTH", "4")], b"volt=1.5");
        assert_eq!(req.body(), b"volt");

        let req = request_with(&[("CONTENT_LENGTH", "100")], b"volt=1.5");
        assert_eq!(req.body(), b"volt=1.5");

        let req = request_with(&[("CONTENT_LENGTH", "junk")], b"abc");
        assert_eq!(req.body(), b"abc");
    }

    #[test]
    fn test_json_response_bytes() {
        let resp = Response::json("application/json", "{\"a\":1}");
        assert_eq!(
            resp.to_bytes(),
            b"Content-type: application/json; charset=utf-8\r\n\r\n{\"a\":1}\r\n".to_vec()
        );
    }

    #[test]
    fn test_post_ack_bytes() {
        assert_eq!(
            Response::post_ack().to_bytes(),
            b"Content-type: text/html; charset=utf-8\r\n\r\n\r\n<html></html>\r\n".to_vec()
        );
    }

    #[test]
    fn test_error_has_status_line() {
        let resp = Response::error(405, "Method PUT not supported").with_header("Allow", "GET, POST");
        let text = String::from_utf8(resp.to_bytes()).unwrap();
        assert!(text.starts_with("Status: 405 Method Not Allowed\r\n"));
        assert!(text.contains("Allow: GET, POST\r\n"));

        let parsed = Response::parse(text.as_bytes()).unwrap();
        assert_eq!(parsed.status, 405);
        assert_eq!(parsed.header("allow"), Some("GET, POST"));
    }

    #[test]
    fn test_parse_form_semantics() {
        let form = parse_form("degrees=21.5&hello=world&flag&degrees=22&eq=a=b");
        assert_eq!(form.get("degrees").map(String::as_str), Some("22"));
        assert_eq!(form.get("hello").map(String::as_str), Some("world"));
        assert_eq!(form.get("eq").map(String::as_str), Some("a=b"));
        assert!(!form.contains_key("flag"));

        // no percent decoding
        let form = parse_form("hello=a%20b");
        assert_eq!(form.get("hello").map(String::as_str), Some("a%20b"));

        assert!(parse_form("").is_empty());
    }
}

//! Endpoint path templates (`/users/:id`) and the minimal HTTP request
//! representation the daemon forwards for endpoint invocations.

use std::collections::HashMap;

use crate::error::HostError;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Parsed `/a/:b/c` template. Param segments match exactly one non-empty path
/// segment; a trailing slash never matches a template without one.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Self {
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self { raw: raw.to_string(), segments }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Number of `:param` segments; the endpoint sort key's first component.
    pub fn param_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Param(_)))
            .count()
    }

    /// Matches a concrete request path (query string already stripped) and
    /// extracts param values.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let rest = path.strip_prefix('/')?;
        // "/a/b/" has an empty trailing segment and must not match "/a/b"
        let parts: Vec<&str> = rest.split('/').collect();
        let parts: Vec<&str> = if parts == [""] { vec![] } else { parts };
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut values = HashMap::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    values.insert(name.clone(), (*part).to_string());
                }
            }
        }
        Some(values)
    }
}

/// HTTP request as forwarded inside an endpoint invocation.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    /// Path with the query string stripped.
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Parses the raw HTTP request text (`METHOD /path HTTP/1.1`, headers, blank
/// line, body) the daemon relays verbatim.
pub fn parse_raw_http_request(raw: &str) -> Result<HttpRequest, HostError> {
    let mut lines = raw.split("\r\n");
    let request_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| HostError::implementation("empty http request"))?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| HostError::implementation("http request line missing method"))?
        .to_uppercase();
    let target = parts
        .next()
        .ok_or_else(|| HostError::implementation("http request line missing path"))?;

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target.to_string(), None),
    };

    let mut headers = HashMap::new();
    let mut body = String::new();
    let mut in_body = false;
    for line in lines {
        if in_body {
            if !body.is_empty() {
                body.push_str("\r\n");
            }
            body.push_str(line);
        } else if line.is_empty() {
            in_body = true;
        } else if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }

    Ok(HttpRequest { method, path, query, headers, body })
}

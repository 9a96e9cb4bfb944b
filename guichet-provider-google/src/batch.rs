//! Google batch requests: several calendar calls in one multipart/mixed HTTP
//! request, answered by one multipart/mixed response with a part per call.

use anyhow::{Context, Result};
use guichet_core::calendar::{MutationOutcome, RemoteMutationError};
use serde::Deserialize;
use uuid::Uuid;

/// One sub-request of a batch.
#[derive(Debug, Clone)]
struct BatchPart {
    method: &'static str,
    path: String,
    body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    boundary: String,
    parts: Vec<BatchPart>,
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRequest {
    pub fn new() -> Self {
        BatchRequest {
            boundary: format!("batch_{}", Uuid::new_v4().simple()),
            parts: Vec::new(),
        }
    }

    pub fn delete(&mut self, path: String) {
        self.parts.push(BatchPart {
            method: "DELETE",
            path,
            body: None,
        });
    }

    pub fn post_json(&mut self, path: String, body: String) {
        self.parts.push(BatchPart {
            method: "POST",
            path,
            body: Some(body),
        });
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }

    /// Parts carry `Content-ID: <itemN>`, numbered from 1.
    pub fn encode(&self) -> String {
        let mut out = String::new();

        for (i, part) in self.parts.iter().enumerate() {
            out.push_str(&format!("--{}\r\n", self.boundary));
            out.push_str("Content-Type: application/http\r\n");
            out.push_str(&format!("Content-ID: <item{}>\r\n\r\n", i + 1));
            out.push_str(&format!("{} {} HTTP/1.1\r\n", part.method, part.path));

            match &part.body {
                Some(body) => {
                    out.push_str("Content-Type: application/json; charset=UTF-8\r\n");
                    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
                    out.push_str(body);
                    out.push_str("\r\n");
                }
                None => out.push_str("\r\n"),
            }
        }

        out.push_str(&format!("--{}--\r\n", self.boundary));
        out
    }
}

/// One part of a batch response.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponsePart {
    /// 1-based index of the sub-request, when the part could be matched.
    pub item: Option<usize>,
    pub status: u16,
    pub body: String,
}

/// Boundary parameter of a multipart Content-Type header.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.eq_ignore_ascii_case("boundary")
            .then(|| value.trim_matches('"').to_string())
    })
}

/// Split at the first blank line, accepting CRLF or LF line endings.
fn split_head(s: &str) -> (&str, &str) {
    let crlf = s.find("\r\n\r\n").map(|i| (i, 4));
    let lf = s.find("\n\n").map(|i| (i, 2));

    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match split {
        Some((i, len)) => (&s[..i], &s[i + len..]),
        None => (s, ""),
    }
}

fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

/// `<response-item3>` -> 3
fn item_index(content_id: &str) -> Option<usize> {
    content_id
        .trim_matches(['<', '>'])
        .strip_prefix("response-item")?
        .parse()
        .ok()
}

pub fn decode(body: &str, boundary: &str) -> Result<Vec<BatchResponsePart>> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();

    for segment in body.split(delimiter.as_str()).skip(1) {
        if segment.starts_with("--") {
            break;
        }
        let segment = segment.trim_start_matches(['\r', '\n']);
        if segment.trim().is_empty() {
            continue;
        }

        let (part_head, message) = split_head(segment);
        let item = header(part_head, "Content-ID").and_then(item_index);

        let (message_head, message_body) = split_head(message);
        let status_line = message_head
            .lines()
            .next()
            .context("Batch response part without status line")?;
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
            .with_context(|| format!("Unreadable status line in batch response: {status_line}"))?;

        parts.push(BatchResponsePart {
            item,
            status,
            body: message_body.trim().to_string(),
        });
    }

    Ok(parts)
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

/// The `error.message` of a Google JSON error body, if there is one.
pub fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .ok()
        .filter(|m| !m.is_empty())
}

fn outcome(part: &BatchResponsePart) -> MutationOutcome {
    if (200..300).contains(&part.status) {
        return Ok(());
    }

    let message = error_message(&part.body).unwrap_or_else(|| format!("HTTP {}", part.status));

    Err(RemoteMutationError::new(Some(part.status), message))
}

/// One outcome per sub-request, in request order. Parts are matched by
/// Content-ID; unmatched parts fill the remaining slots in order.
pub fn outcomes(parts: &[BatchResponsePart], expected: usize) -> Vec<MutationOutcome> {
    let mut slots: Vec<Option<MutationOutcome>> = vec![None; expected];
    let mut unmatched = Vec::new();

    for part in parts {
        match part.item {
            Some(n) if (1..=expected).contains(&n) && slots[n - 1].is_none() => {
                slots[n - 1] = Some(outcome(part));
            }
            _ => unmatched.push(part),
        }
    }

    let mut unmatched = unmatched.into_iter();
    slots
        .into_iter()
        .map(|slot| {
            slot.or_else(|| unmatched.next().map(outcome))
                .unwrap_or_else(|| {
                    Err(RemoteMutationError::new(None, "No response for batch item"))
                })
        })
        .collect()
}

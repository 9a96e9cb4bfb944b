//! Extraction of the portal's anti-forgery token from an HTML page.

use scraper::{Html, Selector};

use crate::error::{SyncError, SyncResult};

/// Form field carrying the anti-forgery token.
pub const TOKEN_FIELD: &str = "__RequestVerificationToken";

/// Element whose text holds an escaped copy of the page layout on older
/// portal versions.
const LAYOUT_DATA_SELECTOR: &str = "#layout-data";

/// Return the value of the `__RequestVerificationToken` hidden input.
///
/// The live DOM is queried first. When the input is absent there, the
/// escaped markup stored in `#layout-data` is parsed and queried the same way.
pub fn extract_verification_token(html: &str) -> SyncResult<String> {
    let input = selector(&format!("input[name=\"{TOKEN_FIELD}\"]"))?;
    let document = Html::parse_document(html);

    if let Some(token) = find_token(&document, &input) {
        return Ok(token);
    }

    let layout = selector(LAYOUT_DATA_SELECTOR)?;
    document
        .select(&layout)
        .map(|el| unescape_layout(&el.text().collect::<String>()))
        .find_map(|markup| find_token(&Html::parse_fragment(&markup), &input))
        .ok_or(SyncError::TokenNotFound)
}

fn find_token(document: &Html, input: &Selector) -> Option<String> {
    document
        .select(input)
        .filter_map(|el| el.value().attr("value"))
        .find(|value| is_token(value))
        .map(str::to_string)
}

fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// The layout blob is a JS-style string: line breaks and quotes are escaped.
fn unescape_layout(text: &str) -> String {
    text.replace("\\r\\n", "\n")
        .replace("\\n", "\n")
        .replace("\\\"", "\"")
}

fn selector(css: &str) -> SyncResult<Selector> {
    Selector::parse(css)
        .map_err(|e| SyncError::MalformedResponse(format!("Invalid selector '{css}': {e}")))
}

//! Multi-strategy extraction of a standalone HTML document from raw model
//! output. Models are told to emit exactly one fenced `html` block, but real
//! output is noisy: wrong or missing fence tags, bare documents outside any
//! fence, or body-only fragments. Strategies are tried in order and the
//! first hit wins; a total miss returns `None` for both fields so callers
//! can keep the raw text and move on.

/// Result of an extraction attempt. `title` is derived independently from
/// whatever document string was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub html: Option<String>,
    pub title: Option<String>,
}

impl Extracted {
    fn miss() -> Self {
        Extracted { html: None, title: None }
    }
}

/// Fence language tags accepted as markup with high confidence.
const MARKUP_TAGS: &[&str] = &["html", "htm", "xml", "xhtml", "markup"];

/// Extract a single renderable HTML document from `source`.
///
/// Strategy order: tagged/untagged fenced blocks, then a bare
/// `<!DOCTYPE html>…</html>` or `<html>…</html>` span, then a lone
/// `<body>…</body>` wrapped into a minimal document. Matching is
/// case-insensitive and CRLF-normalized throughout.
pub fn extract_html(source: &str) -> Extracted {
    let text = normalize(source);
    let doc = fenced_document(&text)
        .or_else(|| bare_document(&text))
        .or_else(|| wrapped_body(&text));

    match doc {
        Some(html) => {
            let title = find_title(&html);
            Extracted { html: Some(html), title }
        }
        None => Extracted::miss(),
    }
}

/// Pull a fenced code block out of a model reply, preferring blocks whose
/// language tag is in `langs`, then falling back to the first fenced block
/// of any tag. Used by the repair loop to read "fixed code" responses.
pub fn extract_code_block(source: &str, langs: &[&str]) -> Option<String> {
    let text = normalize(source);
    let blocks = scan_fences(&text);
    for block in &blocks {
        if langs.contains(&block.tag.as_str()) {
            return Some(block.body.trim().to_string());
        }
    }
    blocks.first().map(|b| b.body.trim().to_string())
}

fn normalize(source: &str) -> String {
    source.replace("\r\n", "\n").replace('\r', "\n")
}

// ---------------------------------------------------------------------------
// Strategy 1: fenced blocks
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FencedBlock {
    tag: String,
    body: String,
}

/// Collect every closed triple-backtick or triple-tilde fenced block, with
/// its lowercased language tag (first word of the info string).
fn scan_fences(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(char, String, Vec<String>)> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        let marker = if trimmed.starts_with("```") {
            Some('`')
        } else if trimmed.starts_with("~~~") {
            Some('~')
        } else {
            None
        };

        if let Some((fence, tag, body)) = open.as_mut() {
            if marker == Some(*fence) {
                blocks.push(FencedBlock {
                    tag: std::mem::take(tag),
                    body: std::mem::take(body).join("\n"),
                });
                open = None;
            } else {
                body.push(line.to_string());
            }
        } else if let Some(fence) = marker {
            let info = trimmed.trim_start_matches(fence).trim();
            let tag = info
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_lowercase();
            open = Some((fence, tag, Vec::new()));
        }
    }

    blocks
}

fn fenced_document(text: &str) -> Option<String> {
    let mut fallback: Option<String> = None;

    for block in scan_fences(text) {
        let body = block.body.trim().to_string();
        if body.is_empty() {
            continue;
        }
        if MARKUP_TAGS.contains(&block.tag.as_str()) {
            return Some(body);
        }
        if block.tag.is_empty() && fallback.is_none() && looks_like_markup(&body) {
            fallback = Some(body);
        }
    }

    fallback
}

/// Structural sniff: at least one opening tag and one closing tag anywhere.
fn looks_like_markup(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut has_open = false;
    let mut has_close = false;

    for i in 0..bytes.len().saturating_sub(1) {
        if bytes[i] != b'<' {
            continue;
        }
        if bytes[i + 1] == b'/' {
            if bytes.get(i + 2).is_some_and(|b| b.is_ascii_alphabetic()) {
                has_close = true;
            }
        } else if bytes[i + 1].is_ascii_alphabetic() || bytes[i + 1] == b'!' {
            has_open = true;
        }
    }

    has_open && has_close
}

// ---------------------------------------------------------------------------
// Strategy 2: bare document span
// ---------------------------------------------------------------------------

fn bare_document(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();

    if let Some(start) = lower.find("<!doctype html") {
        if let Some(end) = find_from(&lower, start, "</html>") {
            return Some(text[start..end + "</html>".len()].trim().to_string());
        }
    }

    let start = find_tag_open(&lower, "<html")?;
    let end = find_from(&lower, start, "</html>")?;
    Some(text[start..end + "</html>".len()].trim().to_string())
}

// ---------------------------------------------------------------------------
// Strategy 3: body-only fragment
// ---------------------------------------------------------------------------

fn wrapped_body(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let start = find_tag_open(&lower, "<body")?;
    let end = find_from(&lower, start, "</body>")?;
    let body = text[start..end + "</body>".len()].trim();

    Some(format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Generated Demo</title>\n</head>\n{}\n</html>\n",
        body
    ))
}

// ---------------------------------------------------------------------------
// Title derivation
// ---------------------------------------------------------------------------

/// Find the trimmed inner text of the first `<title>…</title>` span, if any.
pub fn find_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = find_tag_open(&lower, "<title")?;
    let gt = find_from(&lower, open, ">")?;
    let close = find_from(&lower, gt, "</title>")?;
    let inner = html[gt + 1..close].trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner.to_string())
    }
}

// ---------------------------------------------------------------------------
// Scanning helpers (lowercasing ASCII keeps byte offsets stable, so spans
// found in `lower` can slice the original text)
// ---------------------------------------------------------------------------

fn find_from(haystack: &str, from: usize, needle: &str) -> Option<usize> {
    haystack[from..].find(needle).map(|i| i + from)
}

/// Find `tag` (e.g. `"<body"`) as a real tag opening, i.e. followed by `>`
/// or whitespace rather than more name characters.
fn find_tag_open(lower: &str, tag: &str) -> Option<usize> {
    for (idx, _) in lower.match_indices(tag) {
        match lower.as_bytes().get(idx + tag.len()) {
            Some(b'>') | Some(b' ') | Some(b'\n') | Some(b'\t') => return Some(idx),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FULL_DOC: &str = "<!DOCTYPE html>\n<html>\n<head><title>Pendulum Lab</title></head>\n<body><canvas id=\"c\"></canvas></body>\n</html>";

    // -- Strategy 1: fenced blocks --

    #[test]
    fn test_tagged_html_fence_extracted_verbatim() {
        let source = format!("Here is your demo:\n```html\n{}\n```\nEnjoy!", FULL_DOC);
        let result = extract_html(&source);
        assert_eq!(result.html.as_deref(), Some(FULL_DOC));
        assert_eq!(result.title.as_deref(), Some("Pendulum Lab"));
    }

    #[rstest]
    #[case("html")]
    #[case("htm")]
    #[case("xml")]
    #[case("xhtml")]
    #[case("markup")]
    fn test_all_markup_tags_accepted(#[case] tag: &str) {
        let source = format!("```{}\n{}\n```", tag, FULL_DOC);
        assert_eq!(extract_html(&source).html.as_deref(), Some(FULL_DOC));
    }

    #[test]
    fn test_tilde_fence_extracted() {
        let source = format!("~~~html\n{}\n~~~", FULL_DOC);
        assert_eq!(extract_html(&source).html.as_deref(), Some(FULL_DOC));
    }

    #[test]
    fn test_untagged_fence_with_markup_used_as_fallback() {
        let source = format!("```\n{}\n```", FULL_DOC);
        assert_eq!(extract_html(&source).html.as_deref(), Some(FULL_DOC));
    }

    #[test]
    fn test_untagged_fence_without_markup_skipped() {
        let source = "```\njust some plain prose, no tags here\n```";
        assert_eq!(extract_html(source), Extracted::miss());
    }

    #[test]
    fn test_tagged_fence_preferred_over_earlier_untagged() {
        let source = format!(
            "```\n<p>teaser</p>\n```\nand the real thing:\n```html\n{}\n```",
            FULL_DOC
        );
        assert_eq!(extract_html(&source).html.as_deref(), Some(FULL_DOC));
    }

    #[test]
    fn test_js_fence_does_not_satisfy_document_extraction() {
        let source = "```js\nconsole.log('<b>hi</b>');\n```";
        // The js block is not markup-tagged and not untagged, so it is skipped.
        assert_eq!(extract_html(source).html, None);
    }

    #[test]
    fn test_crlf_input_normalized() {
        let source = format!("```html\r\n{}\r\n```", FULL_DOC.replace('\n', "\r\n"));
        let result = extract_html(&source);
        assert_eq!(result.html.as_deref(), Some(FULL_DOC));
    }

    #[test]
    fn test_embedded_blank_lines_preserved() {
        let doc = "<html>\n<body>\n\n<p>gap above</p>\n\n</body>\n</html>";
        let source = format!("```html\n{}\n```", doc);
        assert_eq!(extract_html(&source).html.as_deref(), Some(doc));
    }

    // -- Strategy 2: bare document --

    #[test]
    fn test_bare_doctype_document() {
        let source = format!("Sure thing.\n{}\ntrailing chatter", FULL_DOC);
        assert_eq!(extract_html(&source).html.as_deref(), Some(FULL_DOC));
    }

    #[test]
    fn test_bare_html_without_doctype() {
        let doc = "<html>\n<body><p>x</p></body>\n</html>";
        let source = format!("intro\n{}\noutro", doc);
        assert_eq!(extract_html(&source).html.as_deref(), Some(doc));
    }

    #[test]
    fn test_doctype_span_preferred_over_plain_html_span() {
        let plain = "<html><body>old</body></html>";
        let source = format!("{}\n\n{}", plain, FULL_DOC);
        // DOCTYPE-qualified match wins even though the plain span comes first.
        assert_eq!(extract_html(&source).html.as_deref(), Some(FULL_DOC));
    }

    #[test]
    fn test_case_insensitive_doctype() {
        let doc = "<!doctype HTML>\n<HTML><BODY>x</BODY></HTML>";
        assert_eq!(extract_html(doc).html.as_deref(), Some(doc));
    }

    #[test]
    fn test_html_attribute_form_matched() {
        let doc = "<html lang=\"en\">\n<body>y</body>\n</html>";
        assert_eq!(extract_html(doc).html.as_deref(), Some(doc));
    }

    // -- Strategy 3: body-only --

    #[test]
    fn test_body_only_fragment_wrapped() {
        let source = "here you go:\n<body><div id=\"sim\"></div></body>\nthat's it";
        let result = extract_html(source);
        let html = result.html.expect("body fragment should be wrapped");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert_eq!(html.matches("<body").count(), 1);
        assert_eq!(html.matches("</body>").count(), 1);
        let html_open = html.find("<html").expect("wrapper has <html>");
        let body_open = html.find("<body").expect("wrapper has <body>");
        let body_close = html.find("</body>").expect("wrapper has </body>");
        let html_close = html.find("</html>").expect("wrapper has </html>");
        assert!(html_open < body_open && body_close < html_close);
    }

    #[test]
    fn test_wrapped_body_keeps_fragment_content() {
        let source = "<body class=\"dark\"><p>inner</p></body>";
        let html = extract_html(source).html.expect("wrapped");
        assert!(html.contains("<body class=\"dark\"><p>inner</p></body>"));
    }

    // -- Misses and title --

    #[test]
    fn test_no_markup_returns_double_none() {
        let result = extract_html("The pendulum period is T = 2*pi*sqrt(L/g). No code today.");
        assert_eq!(result, Extracted::miss());
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(extract_html(""), Extracted::miss());
    }

    #[test]
    fn test_title_missing_is_none() {
        let doc = "<html><body>untitled</body></html>";
        let result = extract_html(doc);
        assert!(result.html.is_some());
        assert_eq!(result.title, None);
    }

    #[test]
    fn test_title_whitespace_trimmed() {
        let doc = "<html><head><title>  Wave Tank  </title></head><body>x</body></html>";
        assert_eq!(extract_html(doc).title.as_deref(), Some("Wave Tank"));
    }

    #[test]
    fn test_empty_title_is_none() {
        let doc = "<html><head><title>   </title></head><body>x</body></html>";
        assert_eq!(extract_html(doc).title, None);
    }

    #[test]
    fn test_title_with_attributes() {
        let doc = "<html><head><title data-i18n=\"t\">Orbits</title></head><body>x</body></html>";
        assert_eq!(extract_html(doc).title.as_deref(), Some("Orbits"));
    }

    // -- extract_code_block --

    #[test]
    fn test_code_block_prefers_requested_lang() {
        let source = "```html\n<p>no</p>\n```\n```js\nlet x = 1;\n```";
        assert_eq!(
            extract_code_block(source, &["js", "javascript"]).as_deref(),
            Some("let x = 1;")
        );
    }

    #[test]
    fn test_code_block_falls_back_to_first_block() {
        let source = "```\nconst y = 2;\n```";
        assert_eq!(
            extract_code_block(source, &["js", "javascript"]).as_deref(),
            Some("const y = 2;")
        );
    }

    #[test]
    fn test_code_block_none_without_fence() {
        assert_eq!(extract_code_block("no fences here", &["js"]), None);
    }

    // -- Properties --

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn extract_never_panics(s in "\\PC{0,400}") {
                let _ = extract_html(&s);
            }

            #[test]
            fn miss_has_no_title(s in "[a-z ]{0,200}") {
                let result = extract_html(&s);
                if result.html.is_none() {
                    prop_assert!(result.title.is_none());
                }
            }

            #[test]
            fn fenced_html_round_trips(body in "[a-z<>/ \\n]{1,100}") {
                let doc = format!("<html><body>{}</body></html>", body);
                let source = format!("```html\n{}\n```", doc);
                let result = extract_html(&source);
                prop_assert_eq!(result.html, Some(doc.trim().to_string()));
            }
        }
    }
}

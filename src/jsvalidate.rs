//! Static scan of generated JavaScript for the syntax defects LLMs actually
//! produce: unbalanced brackets, truncated or operator-less `if` conditions,
//! stray comparison operators after declaration keywords, `() = {` arrow
//! typos, and bare assignments to names that were never declared.
//!
//! This is a lint pass, not a parser and not a security boundary. Fixes are
//! composed into a candidate `fixed_code` that callers must adopt
//! explicitly; nothing is rewritten silently.

use std::collections::HashSet;

/// Outcome of one validation pass.
///
/// `fixed_code` is present only when the code is invalid and at least one
/// mechanical repair applied; invalid code without `fixed_code` means the
/// defects were detected but are not repairable here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub suggestions: Vec<String>,
    pub fixed_code: Option<String>,
}

#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    replacement: String,
}

/// Run all five checks over `code`. Checks are independent and
/// order-insensitive; each appends to the shared error/suggestion lists.
pub fn validate_js(code: &str) -> ValidationResult {
    let mask = code_mask(code);
    let words = scan_words(code, &mask);

    let mut errors = Vec::new();
    let mut suggestions = Vec::new();
    let mut edits: Vec<Edit> = Vec::new();

    check_balance(code, &mask, &mut errors);
    check_if_conditions(code, &mask, &words, &mut errors, &mut suggestions, &mut edits);
    check_declarations(code, &mask, &words, &mut errors, &mut edits);
    check_arrow_functions(code, &mask, &mut errors, &mut edits);
    check_undeclared_assignments(code, &mask, &words, &mut suggestions);

    let is_valid = errors.is_empty();
    let fixed_code = if !is_valid && !edits.is_empty() {
        Some(apply_edits(code, edits))
    } else {
        None
    };

    ValidationResult { is_valid, errors, suggestions, fixed_code }
}

// ---------------------------------------------------------------------------
// Source masking: string literals and comments are excluded from every check
// ---------------------------------------------------------------------------

fn code_mask(code: &str) -> Vec<bool> {
    #[derive(PartialEq, Clone, Copy)]
    enum State {
        Code,
        Single,
        Double,
        Template,
        Line,
        Block,
    }

    let bytes = code.as_bytes();
    let mut mask = vec![true; bytes.len()];
    let mut state = State::Code;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match state {
            State::Code => match b {
                b'\'' => {
                    state = State::Single;
                    mask[i] = false;
                }
                b'"' => {
                    state = State::Double;
                    mask[i] = false;
                }
                b'`' => {
                    state = State::Template;
                    mask[i] = false;
                }
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    state = State::Line;
                    mask[i] = false;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    state = State::Block;
                    mask[i] = false;
                }
                _ => {}
            },
            State::Single | State::Double | State::Template => {
                mask[i] = false;
                let quote = match state {
                    State::Single => b'\'',
                    State::Double => b'"',
                    _ => b'`',
                };
                if b == b'\\' {
                    if i + 1 < bytes.len() {
                        mask[i + 1] = false;
                        i += 1;
                    }
                } else if b == quote {
                    state = State::Code;
                } else if b == b'\n' && state != State::Template {
                    // unterminated single-line string; stop masking at EOL
                    state = State::Code;
                }
            }
            State::Line => {
                if b == b'\n' {
                    state = State::Code;
                } else {
                    mask[i] = false;
                }
            }
            State::Block => {
                mask[i] = false;
                if b == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    mask[i + 1] = false;
                    i += 1;
                    state = State::Code;
                }
            }
        }
        i += 1;
    }

    mask
}

#[derive(Debug, Clone)]
struct Word {
    start: usize,
    end: usize,
    text: String,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Maximal identifier-character runs in unmasked code, in source order.
fn scan_words(code: &str, mask: &[bool]) -> Vec<Word> {
    let mut words = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for (idx, c) in code.char_indices() {
        let in_code = mask.get(idx).copied().unwrap_or(false);
        let extends = current.is_some() && in_code && is_ident_continue(c);
        let starts = current.is_none() && in_code && is_ident_start(c);

        if extends || starts {
            let (_, text) = current.get_or_insert((idx, String::new()));
            text.push(c);
        } else if let Some((start, text)) = current.take() {
            let end = start + text.len();
            words.push(Word { start, end, text });
            // a new word may begin on this same char
            if in_code && is_ident_start(c) {
                current = Some((idx, c.to_string()));
            }
        }
    }
    if let Some((start, text)) = current.take() {
        let end = start + text.len();
        words.push(Word { start, end, text });
    }

    words
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b'\n') {
        i += 1;
    }
    i
}

// ---------------------------------------------------------------------------
// Check 1: bracket / paren / brace balance
// ---------------------------------------------------------------------------

fn check_balance(code: &str, mask: &[bool], errors: &mut Vec<String>) {
    let mut stack: Vec<(u8, usize)> = Vec::new();

    for (i, &b) in code.as_bytes().iter().enumerate() {
        if !mask[i] {
            continue;
        }
        match b {
            b'(' | b'[' | b'{' => stack.push((b, i)),
            b')' | b']' | b'}' => {
                let expected = match b {
                    b')' => b'(',
                    b']' => b'[',
                    _ => b'{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, pos)) => errors.push(format!(
                        "mismatched '{}' at position {}: still inside '{}' opened at position {}",
                        b as char, i, open as char, pos
                    )),
                    None => errors.push(format!(
                        "unmatched '{}' at position {}",
                        b as char, i
                    )),
                }
            }
            _ => {}
        }
    }

    for (open, pos) in stack {
        errors.push(format!(
            "unclosed '{}' opened at position {}",
            open as char, pos
        ));
    }
}

// ---------------------------------------------------------------------------
// Check 2: malformed `if` conditions
// ---------------------------------------------------------------------------

/// Words that legitimately precede a bare identifier inside a condition.
const CONDITION_KEYWORDS: &[&str] = &[
    "typeof", "new", "await", "void", "delete", "in", "of", "instanceof",
    "true", "false", "null", "undefined", "this",
];

fn check_if_conditions(
    code: &str,
    mask: &[bool],
    words: &[Word],
    errors: &mut Vec<String>,
    suggestions: &mut Vec<String>,
    edits: &mut Vec<Edit>,
) {
    let bytes = code.as_bytes();

    for word in words.iter().filter(|w| w.text == "if") {
        let open = skip_ws(bytes, word.end);
        if bytes.get(open) != Some(&b'(') {
            continue;
        }

        // Walk to the matching ')'. Hitting '{' first means the condition
        // was visibly truncated by the model.
        let mut depth = 1usize;
        let mut close: Option<usize> = None;
        let mut brace: Option<usize> = None;
        let mut i = open + 1;
        while i < bytes.len() {
            if mask[i] {
                match bytes[i] {
                    b'(' => depth += 1,
                    b')' => {
                        depth -= 1;
                        if depth == 0 {
                            close = Some(i);
                            break;
                        }
                    }
                    b'{' => {
                        brace = Some(i);
                        break;
                    }
                    _ => {}
                }
            }
            i += 1;
        }

        if let Some(brace_pos) = brace {
            errors.push(format!(
                "if condition at position {} has no closing parenthesis before '{{'",
                word.start
            ));
            edits.push(Edit {
                start: brace_pos,
                end: brace_pos,
                replacement: ") ".to_string(),
            });
            continue;
        }

        let Some(close_pos) = close else { continue };

        // Two bare identifiers with nothing but whitespace between them and
        // no comparison operator anywhere around: almost certainly a
        // dropped `<`, `>`, or `==`.
        let cond_words: Vec<&Word> = words
            .iter()
            .filter(|w| w.start > open && w.end < close_pos + 1)
            .collect();
        for pair in cond_words.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if CONDITION_KEYWORDS.contains(&a.text.as_str())
                || CONDITION_KEYWORDS.contains(&b.text.as_str())
            {
                continue;
            }
            let between = &code[a.end..b.start];
            if !between.is_empty() && between.bytes().all(|c| matches!(c, b' ' | b'\t' | b'\n')) {
                errors.push(format!(
                    "if condition missing comparison operator between '{}' and '{}'",
                    a.text, b.text
                ));
                suggestions.push(format!(
                    "insert a comparison, e.g. '{} < {}' or '{} === {}'",
                    a.text, b.text, a.text, b.text
                ));
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Check 3: stray comparison operator after a declaration keyword
// ---------------------------------------------------------------------------

fn check_declarations(
    code: &str,
    mask: &[bool],
    words: &[Word],
    errors: &mut Vec<String>,
    edits: &mut Vec<Edit>,
) {
    let bytes = code.as_bytes();

    for word in words {
        if !matches!(word.text.as_str(), "const" | "let" | "var") {
            continue;
        }
        let op_start = skip_ws(bytes, word.end);
        if !matches!(bytes.get(op_start), Some(b'<') | Some(b'>')) {
            continue;
        }
        if !mask.get(op_start).copied().unwrap_or(false) {
            continue;
        }
        let mut op_end = op_start;
        while op_end < bytes.len() && matches!(bytes[op_end], b'<' | b'>' | b'=') {
            op_end += 1;
        }
        let cut_end = skip_ws(bytes, op_end);

        errors.push(format!(
            "stray '{}' after '{}' at position {}",
            &code[op_start..op_end],
            word.text,
            op_start
        ));
        edits.push(Edit {
            start: op_start,
            end: cut_end,
            replacement: String::new(),
        });
    }
}

// ---------------------------------------------------------------------------
// Check 4: `() = {` where `() => {` was intended
// ---------------------------------------------------------------------------

fn check_arrow_functions(
    code: &str,
    mask: &[bool],
    errors: &mut Vec<String>,
    edits: &mut Vec<Edit>,
) {
    let bytes = code.as_bytes();

    for i in 0..bytes.len() {
        if bytes[i] != b')' || !mask[i] {
            continue;
        }
        let eq = skip_ws(bytes, i + 1);
        if bytes.get(eq) != Some(&b'=') || !mask.get(eq).copied().unwrap_or(false) {
            continue;
        }
        if matches!(bytes.get(eq + 1), Some(b'=') | Some(b'>')) {
            continue;
        }
        let brace = skip_ws(bytes, eq + 1);
        if bytes.get(brace) != Some(&b'{') {
            continue;
        }

        errors.push(format!(
            "'=' at position {} looks like a mistyped arrow function ('=>')",
            eq
        ));
        edits.push(Edit {
            start: eq,
            end: eq + 1,
            replacement: "=>".to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Check 5: bare assignment to an undeclared name (suggestions only)
// ---------------------------------------------------------------------------

const STATEMENT_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "case", "break", "continue",
    "return", "const", "let", "var", "function", "class", "new", "typeof",
    "await", "async", "import", "export", "throw", "try", "catch", "finally",
    "delete", "void", "this", "super", "yield", "default",
];

fn check_undeclared_assignments(
    code: &str,
    mask: &[bool],
    words: &[Word],
    suggestions: &mut Vec<String>,
) {
    // Names introduced anywhere in the source by a declaration keyword.
    let mut declared: HashSet<&str> = HashSet::new();
    for pair in words.windows(2) {
        if matches!(
            pair[0].text.as_str(),
            "const" | "let" | "var" | "function" | "class"
        ) {
            declared.insert(&pair[1].text);
        }
    }

    let bytes = code.as_bytes();
    let mut reported: HashSet<String> = HashSet::new();
    let mut line_start = 0usize;

    for line in code.split_inclusive('\n') {
        let offset = line_start;
        line_start += line.len();

        let trimmed_at = offset + (line.len() - line.trim_start().len());
        if trimmed_at >= bytes.len() || !mask[trimmed_at] {
            continue;
        }

        let Some(word) = words.iter().find(|w| w.start == trimmed_at) else {
            continue;
        };
        if STATEMENT_KEYWORDS.contains(&word.text.as_str()) {
            continue;
        }

        let eq = skip_ws(bytes, word.end);
        if bytes.get(eq) != Some(&b'=') || matches!(bytes.get(eq + 1), Some(b'=') | Some(b'>')) {
            continue;
        }

        if !declared.contains(word.text.as_str()) && reported.insert(word.text.clone()) {
            suggestions.push(format!(
                "'{}' is assigned but never declared; consider 'let {} = ...'",
                word.text, word.text
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Fix composition
// ---------------------------------------------------------------------------

fn apply_edits(code: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by(|a, b| b.start.cmp(&a.start));

    let mut out = code.to_string();
    let mut last_start = usize::MAX;
    for edit in edits {
        if edit.end > last_start {
            continue;
        }
        last_start = edit.start;
        out.replace_range(edit.start..edit.end, &edit.replacement);
    }
    out
}

//! Glob matching with the semantics of the store's `SCAN ... MATCH` option
//!
//! Supported syntax:
//!
//! - `*` matches any run of bytes, including none
//! - `?` matches exactly one byte
//! - `[abc]`, `[a-z]`, `[^a]` match one byte from (or outside) a class
//! - `\x` matches `x` literally
//!
//! Matching is byte-wise and case-sensitive. An unterminated class consumes
//! the rest of the pattern, and a trailing `\` matches a literal backslash.

/// Check whether `key` matches the glob `pattern`
pub fn glob_match(pattern: &str, key: &str) -> bool {
    match_bytes(pattern.as_bytes(), key.as_bytes())
}

/// Escape every glob metacharacter in `literal` so the result only matches `literal`
pub fn escape(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^' | '-') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn match_bytes(pattern: &[u8], key: &[u8]) -> bool {
    let (mut p, mut k) = (0, 0);
    // pattern position after the most recent `*`, and the key position it resumes from
    let mut star: Option<(usize, usize)> = None;

    while k < key.len() {
        if pattern.get(p) == Some(&b'*') {
            p += 1;
            star = Some((p, k));
            continue;
        }
        if let Some(consumed) = match_token(&pattern[p..], key[k]) {
            p += consumed;
            k += 1;
            continue;
        }
        match star {
            Some((after_star, from)) => {
                p = after_star;
                k = from + 1;
                star = Some((after_star, k));
            }
            None => return false,
        }
    }
    pattern[p..].iter().all(|&b| b == b'*')
}

/// Match one key byte against the token at the start of `pattern`.
///
/// Returns the number of pattern bytes the token spans when it matched.
fn match_token(pattern: &[u8], c: u8) -> Option<usize> {
    let (matched, consumed) = match pattern {
        [] => return None,
        [b'?', ..] => (true, 1),
        [b'[', class @ ..] => {
            let (matched, rest) = match_class(class, c);
            (matched, pattern.len() - rest.len())
        }
        [b'\\', escaped, ..] => (*escaped == c, 2),
        [literal, ..] => (*literal == c, 1),
    };
    matched.then_some(consumed)
}

/// Match one byte against a class body (the part after `[`).
///
/// Returns whether it matched and the pattern remaining after the closing `]`.
fn match_class(mut class: &[u8], c: u8) -> (bool, &[u8]) {
    let negate = class.first() == Some(&b'^');
    if negate {
        class = &class[1..];
    }

    let mut matched = false;
    loop {
        match class {
            [] => break,
            [b']', rest @ ..] => {
                class = rest;
                break;
            }
            [b'\\', escaped, rest @ ..] => {
                if *escaped == c {
                    matched = true;
                }
                class = rest;
            }
            [start, b'-', end, rest @ ..] if *end != b']' => {
                let (low, high) = if start <= end {
                    (*start, *end)
                } else {
                    (*end, *start)
                };
                if (low..=high).contains(&c) {
                    matched = true;
                }
                class = rest;
            }
            [member, rest @ ..] => {
                if *member == c {
                    matched = true;
                }
                class = rest;
            }
        }
    }

    (matched != negate, class)
}

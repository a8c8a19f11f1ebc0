//! Full-width punctuation normalization for CJK text.
//!
//! ASCII punctuation adjacent to a CJK character is rewritten to its
//! full-width equivalent. The table is ordered and each entry is applied
//! CJK-before then CJK-after; later rules never re-match text rewritten by
//! earlier ones, which makes the whole transform idempotent on its output.

use lazy_static::lazy_static;
use regex::Regex;

const TABLE: [(char, char); 5] = [
    (',', '，'),
    ('!', '！'),
    (':', '：'),
    (';', '；'),
    ('?', '？'),
];

struct PunctRule {
    cjk_before: Regex,
    cjk_after: Regex,
    full_width: char,
}

lazy_static! {
    static ref RULES: Vec<PunctRule> = TABLE
        .iter()
        .map(|&(ascii, full_width)| {
            let escaped = regex::escape(&ascii.to_string());
            PunctRule {
                cjk_before: Regex::new(&format!(r"([\u{{4e00}}-\u{{9fff}}]){escaped}"))
                    .expect("punctuation rule regex"),
                cjk_after: Regex::new(&format!(r"{escaped}([\u{{4e00}}-\u{{9fff}}])"))
                    .expect("punctuation rule regex"),
                full_width,
            }
        })
        .collect();
}

/// Rewrite ASCII punctuation adjacent to CJK characters into full-width
/// equivalents, in fixed table order.
pub fn normalize_cjk_punctuation(text: &str) -> String {
    let mut out = text.to_string();
    for rule in RULES.iter() {
        out = rule
            .cjk_before
            .replace_all(&out, format!("${{1}}{}", rule.full_width))
            .into_owned();
        out = rule
            .cjk_after
            .replace_all(&out, format!("{}${{1}}", rule.full_width))
            .into_owned();
    }
    out
}

/// Stable prefix of `text` safe to emit during streaming: a trailing ASCII
/// punctuation mark from the table is withheld because the next character may
/// turn out to be CJK and rewrite it.
pub fn stream_stable(text: &str) -> &str {
    match text.chars().next_back() {
        Some(last) if TABLE.iter().any(|&(ascii, _)| ascii == last) => {
            &text[..text.len() - last.len_utf8()]
        }
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_punctuation_after_cjk() {
        assert_eq!(normalize_cjk_punctuation("你好,世界!"), "你好，世界！");
    }

    #[test]
    fn test_rewrites_punctuation_before_cjk() {
        assert_eq!(normalize_cjk_punctuation("note:说明"), "note：说明");
    }

    #[test]
    fn test_ascii_only_text_unchanged() {
        let text = "hello, world! how: are; you?";
        assert_eq!(normalize_cjk_punctuation(text), text);
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let once = normalize_cjk_punctuation("你好,世界!真的吗?对:是;的");
        let twice = normalize_cjk_punctuation(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_stream_stable_withholds_trailing_table_punct() {
        assert_eq!(stream_stable("你好,"), "你好");
        assert_eq!(stream_stable("hello."), "hello.");
        assert_eq!(stream_stable("你好"), "你好");
    }
}

//! Normalisation of code pasted from chat messages

/// Decode the HTML entities chat platforms escape and strip a surrounding
/// Markdown code span (one backtick) or fence (three backticks).
#[must_use]
pub fn normalize_source(text: &str) -> String {
    let decoded = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    strip_backticks(decoded.trim()).to_owned()
}

fn strip_backticks(code: &str) -> &str {
    let bytes = code.as_bytes();
    let mut depth = 0;
    while depth < bytes.len() / 2
        && bytes[depth] == b'`'
        && bytes[bytes.len() - 1 - depth] == b'`'
    {
        depth += 1;
    }

    match depth {
        1 | 3 => {
            let inner = &code[depth..code.len() - depth];
            if depth == 3 {
                strip_fence_language(inner)
            } else {
                inner
            }
        }
        _ => code,
    }
}

/// Drop an info string such as ```` ```python ```` from the fence's first line
fn strip_fence_language(inner: &str) -> &str {
    match inner.split_once('\n') {
        Some((first, rest))
            if !first.is_empty()
                && first.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '#') =>
        {
            rest
        }
        _ => inner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_code_is_untouched() {
        assert_eq!(normalize_source("print('hi')"), "print('hi')");
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(
            normalize_source("if a &lt; b &amp;&amp; c &gt; d"),
            "if a < b && c > d"
        );
        assert_eq!(normalize_source("&amp;lt;"), "&lt;");
    }

    #[test]
    fn inline_span_and_fence_are_stripped() {
        assert_eq!(normalize_source("`puts 1`"), "puts 1");
        assert_eq!(normalize_source("```\nputs 1\n```"), "\nputs 1\n");
        assert_eq!(normalize_source("```python\nprint(1)\n```"), "print(1)\n");
    }

    #[test]
    fn unbalanced_or_double_backticks_are_kept() {
        assert_eq!(normalize_source("``x``"), "``x``");
        assert_eq!(normalize_source("`x"), "`x");
    }
}

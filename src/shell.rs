//! Quoting helpers for text rendered into generated POSIX shell scripts.
//!
//! Every environment value and run-command argument passes through one of
//! these before being written into a bootstrap file.

/// Renders `s` as a double-quoted shell word.
///
/// Embedded `"` characters are escaped so the shell reads the original
/// bytes back. `$` and backticks are deliberately left alone: the generated
/// environment files depend on expansion inside emitted values (the PS1
/// prompt references `$SINGULARITY_CONTAINER`), so values containing them
/// are expanded by the shell rather than preserved verbatim. Known gap for
/// untrusted input.
pub fn double_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\\\""))
}

/// Renders `s` as a single-quoted shell word, closing and reopening the
/// quote around each embedded `'`.
pub fn single_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Evaluates a double-quoted shell word the way a POSIX shell would,
    /// for inputs free of `$`/backtick substitutions.
    fn eval_double_quoted(rendered: &str) -> String {
        let inner = rendered
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .expect("not a double-quoted word");
        let mut out = String::new();
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some(n @ ('"' | '\\' | '$' | '`')) => out.push(n),
                    Some(n) => {
                        out.push('\\');
                        out.push(n);
                    }
                    None => out.push('\\'),
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Evaluates a single-quoted rendering, which is a concatenation of
    /// `'...'` spans and `"'"` escapes.
    fn eval_single_quoted(rendered: &str) -> String {
        let mut out = String::new();
        let mut rest = rendered;
        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix("\"'\"") {
                out.push('\'');
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix('\'') {
                let end = tail.find('\'').expect("unterminated single quote");
                out.push_str(&tail[..end]);
                rest = &tail[end + 1..];
            } else {
                panic!("unexpected character outside quotes: {}", rest);
            }
        }
        out
    }

    #[test]
    fn test_double_quote_plain() {
        assert_eq!(double_quote("abc"), "\"abc\"");
        assert_eq!(double_quote(""), "\"\"");
        assert_eq!(double_quote("with space"), "\"with space\"");
    }

    #[test]
    fn test_double_quote_escapes_quotes() {
        assert_eq!(double_quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_double_quote_round_trip() {
        for s in [
            "",
            "plain",
            "two words",
            "embedded \"quotes\" here",
            "trailing spaces   ",
            "tabs\tand\nnewlines",
            "'single' quotes pass through",
        ] {
            assert_eq!(eval_double_quoted(&double_quote(s)), s, "input: {s:?}");
        }
    }

    #[test]
    fn test_double_quote_leaves_expansion_alone() {
        // Documented limitation: $ and backticks are not escaped.
        assert_eq!(double_quote("$HOME"), "\"$HOME\"");
        assert_eq!(double_quote("`id`"), "\"`id`\"");
    }

    #[test]
    fn test_single_quote_round_trip() {
        for s in [
            "",
            "plain",
            "it's quoted",
            "''",
            "$HOME stays literal",
            "a\"b",
        ] {
            assert_eq!(eval_single_quoted(&single_quote(s)), s, "input: {s:?}");
        }
    }

    #[test]
    fn test_single_quote_form() {
        assert_eq!(single_quote("it's"), "'it'\"'\"'s'");
    }
}

//! Mutable compiler argument vector with regex-based surgery.
//!
//! An [`ArgList`] is built from a raw argv (the program name is dropped) and
//! re-serialized with [`ArgList::command`] for execution through `sh -c`.
//! Construction normalizes quoting: the outermost quotes of a quoted span
//! are transposed with an inserted quote of the other kind, so that a token
//! like `-DGREETING='hello world'` survives one round of shell word
//! splitting with its payload intact (the shell hands the compiler
//! `-DGREETING="hello world"`).
//!
//! All queries use unanchored regex search, matching anywhere inside a
//! token. That is deliberately conservative: `-I` matches both the fused
//! `-Iinclude` form and the bare `-I dir` pair, and callers that need the
//! pair shape anchor the pattern themselves (`-I$`).

use regex::Regex;

use crate::errors::{Result, SwarmError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgList {
    tokens: Vec<String>,
}

impl ArgList {
    /// Build from a full argv. Requires the program name plus at least one
    /// argument; the program name is not stored.
    pub fn from_argv<I>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut iter = argv.into_iter();
        let program = iter.next();
        let tokens: Vec<String> = iter.map(|tok| transpose_quotes(&tok)).collect();
        if program.is_none() || tokens.is_empty() {
            return Err(SwarmError::Usage(
                "expected a program name and at least one argument".into(),
            ));
        }
        Ok(Self { tokens })
    }

    /// The tokens joined by single spaces, with a trailing space. The result
    /// is passed verbatim to `sh -c`.
    pub fn command(&self) -> String {
        let mut out = String::new();
        for tok in &self.tokens {
            out.push_str(tok);
            out.push(' ');
        }
        out
    }

    /// Remove every token matching `pattern` together with the `count - 1`
    /// tokens that follow it. Scanning is left-to-right and resumes at the
    /// deletion point, so tokens swallowed by a window are never re-tested.
    pub fn delete_matching(&mut self, pattern: &Regex, count: usize) {
        debug_assert!(count > 0);
        let mut i = 0;
        while i < self.tokens.len() {
            if pattern.is_match(&self.tokens[i]) {
                let end = (i + count).min(self.tokens.len());
                self.tokens.drain(i..end);
            } else {
                i += 1;
            }
        }
    }

    /// The token at `offset` positions after the first match of `pattern`,
    /// or `None` when nothing matches. A match whose offset lands past the
    /// end of the vector is an error.
    pub fn first_matching(&self, pattern: &Regex, offset: usize) -> Result<Option<&str>> {
        for (i, tok) in self.tokens.iter().enumerate() {
            if pattern.is_match(tok) {
                return match self.tokens.get(i + offset) {
                    Some(target) => Ok(Some(target)),
                    None => Err(SwarmError::OffsetOutOfRange {
                        pattern: pattern.as_str().to_string(),
                    }),
                };
            }
        }
        Ok(None)
    }

    /// For every index matching `pattern`, overwrite the token `offset`
    /// positions later with `replacement`. Returns the number of
    /// substitutions; an out-of-range target is an error.
    pub fn substitute_matching(
        &mut self,
        pattern: &Regex,
        replacement: &str,
        offset: usize,
    ) -> Result<usize> {
        let mut replaced = 0;
        let mut i = 0;
        while i < self.tokens.len() {
            if pattern.is_match(&self.tokens[i]) {
                let target = i + offset;
                if target >= self.tokens.len() {
                    return Err(SwarmError::OffsetOutOfRange {
                        pattern: pattern.as_str().to_string(),
                    });
                }
                self.tokens[target] = replacement.to_string();
                replaced += 1;
            }
            i += 1;
        }
        Ok(replaced)
    }

    /// The final token, if any.
    pub fn last(&self) -> Option<&str> {
        self.tokens.last().map(String::as_str)
    }

    /// Append a token.
    pub fn push(&mut self, tok: impl Into<String>) {
        self.tokens.push(tok.into());
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

/// Transpose the outermost quotes of a quoted span with an inserted quote
/// of the other kind. Applied in two passes, single quotes first; the
/// second pass runs on the output of the first, which is what turns a
/// single-quoted payload into a double-quoted one after the shell strips
/// the outer layer.
fn transpose_quotes(tok: &str) -> String {
    let mut out = tok.to_string();
    for (quote, open_insert, close_insert) in [('\'', "\"'", "'\""), ('"', "'\"", "\"'")] {
        let open = match out.find(quote) {
            Some(pos) => pos,
            None => continue,
        };
        // A span needs a distinct closing quote.
        let close = match out.rfind(quote) {
            Some(pos) if pos > open => pos,
            _ => continue,
        };
        out.replace_range(open..open + 1, open_insert);
        // The opening replacement grew the string by one byte.
        let close = close + open_insert.len() - 1;
        out.replace_range(close..close + 1, close_insert);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(tokens: &[&str]) -> ArgList {
        let mut full = vec!["prog".to_string()];
        full.extend(tokens.iter().map(|t| t.to_string()));
        ArgList::from_argv(full).expect("valid argv")
    }

    #[test]
    fn rejects_bare_program_name() {
        let err = ArgList::from_argv(vec!["prog".to_string()]);
        assert!(matches!(err, Err(SwarmError::Usage(_))));
    }

    #[test]
    fn drops_program_name() {
        let args = argv(&["-c", "foo.c"]);
        assert_eq!(args.tokens(), ["-c", "foo.c"]);
    }

    #[test]
    fn command_has_trailing_space() {
        let args = argv(&["-c", "foo.c"]);
        assert_eq!(args.command(), "-c foo.c ");
    }

    #[test]
    fn single_quoted_span_is_transposed() {
        let args = argv(&["-DGREETING='hello'"]);
        // Pass one turns '...' into "'...'"; pass two then wraps the
        // introduced double quotes: the shell yields -DGREETING="hello".
        assert_eq!(args.tokens()[0], "-DGREETING='\"'hello'\"'");
    }

    #[test]
    fn double_quoted_span_is_transposed() {
        let args = argv(&["-DGREETING=\"hello\""]);
        assert_eq!(args.tokens()[0], "-DGREETING='\"hello\"'");
    }

    #[test]
    fn lone_quote_is_left_alone() {
        let args = argv(&["it's"]);
        assert_eq!(args.tokens()[0], "it's");
    }

    #[test]
    fn delete_matching_removes_pairs() {
        let mut args = argv(&["-MT", "foo.d", "-O2", "-MF", "foo.dep", "-c"]);
        let pair = Regex::new(r"(-MT)|(-MF)").unwrap();
        args.delete_matching(&pair, 2);
        assert_eq!(args.tokens(), ["-O2", "-c"]);
    }

    #[test]
    fn delete_matching_window_is_not_rescanned() {
        // The follower "-X2" matches the pattern but sits inside the first
        // deletion window, so only one window is removed per match site.
        let mut args = argv(&["-X1", "-X2", "keep"]);
        let pat = Regex::new(r"-X").unwrap();
        args.delete_matching(&pat, 2);
        assert_eq!(args.tokens(), ["keep"]);
    }

    #[test]
    fn delete_matching_truncates_short_tail() {
        let mut args = argv(&["-O2", "-include"]);
        let pat = Regex::new(r"-include").unwrap();
        args.delete_matching(&pat, 2);
        assert_eq!(args.tokens(), ["-O2"]);
    }

    #[test]
    fn delete_matching_without_match_is_identity() {
        let mut args = argv(&["-O2", "-c", "foo.c"]);
        let before = args.clone();
        args.delete_matching(&Regex::new("ftrivial").unwrap(), 1);
        assert_eq!(args, before);
    }

    #[test]
    fn first_matching_returns_none_without_match() {
        let args = argv(&["-O2"]);
        let found = args.first_matching(&Regex::new(r"\.o$").unwrap(), 0).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn first_matching_with_offset() {
        let args = argv(&["-o", "foo.o", "-c"]);
        let pat = Regex::new("^-o$").unwrap();
        assert_eq!(args.first_matching(&pat, 1).unwrap(), Some("foo.o"));
    }

    #[test]
    fn first_matching_offset_past_end_is_fatal() {
        let args = argv(&["-c", "-o"]);
        let pat = Regex::new("^-o$").unwrap();
        assert!(matches!(
            args.first_matching(&pat, 1),
            Err(SwarmError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn substitute_rewrites_every_match() {
        let mut args = argv(&["a.o", "-c", "b.o"]);
        let pat = Regex::new(r"\.o$").unwrap();
        let n = args.substitute_matching(&pat, "/tmp/swarm/x.o", 0).unwrap();
        assert_eq!(n, 2);
        assert_eq!(args.tokens(), ["/tmp/swarm/x.o", "-c", "/tmp/swarm/x.o"]);
    }

    #[test]
    fn substitute_offset_past_end_is_fatal() {
        let mut args = argv(&["-o"]);
        let pat = Regex::new("^-o$").unwrap();
        assert!(matches!(
            args.substitute_matching(&pat, "x", 1),
            Err(SwarmError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn append_and_last() {
        let mut args = argv(&["-c"]);
        args.push("-E");
        assert_eq!(args.last(), Some("-E"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Quote-free tokens must round-trip through join + whitespace
            // splitting byte for byte.
            #[test]
            fn plain_tokens_roundtrip(tokens in proptest::collection::vec("[A-Za-z0-9_./=-]{1,16}", 1..8)) {
                let mut full = vec!["prog".to_string()];
                full.extend(tokens.iter().cloned());
                let args = ArgList::from_argv(full).unwrap();
                let rejoined: Vec<String> = args
                    .command()
                    .split_whitespace()
                    .map(|s| s.to_string())
                    .collect();
                prop_assert_eq!(rejoined, tokens);
            }

            // Deleting with a pattern that cannot match leaves the vector
            // untouched for any count.
            #[test]
            fn no_match_delete_is_identity(
                tokens in proptest::collection::vec("[a-z]{1,8}", 1..8),
                count in 1usize..4,
            ) {
                let mut full = vec!["prog".to_string()];
                full.extend(tokens.iter().cloned());
                let mut args = ArgList::from_argv(full).unwrap();
                let before = args.clone();
                args.delete_matching(&Regex::new("[0-9]").unwrap(), count);
                prop_assert_eq!(args, before);
            }
        }
    }
}

//! Shell argument escaping
//!
//! Every path spliced into a remote command goes through [`shell_escape`].
//! [`shell_split`] is the inverse (POSIX word splitting and quote removal)
//! and is what the in-memory transport uses to read commands back.

use thiserror::Error;

/// Quote a string for use as a single POSIX shell word
///
/// Characters outside `[A-Za-z0-9_./-]` are backslash-escaped, except
/// non-ASCII characters, which pass through. Newlines are wrapped as `'\n'`
/// and the empty string becomes `''`.
pub fn shell_escape(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }

    let mut out = String::with_capacity(value.len() * 2);
    for c in value.chars() {
        match c {
            '\n' => out.push_str("'\n'"),
            c if is_safe(c) => out.push(c),
            c => {
                out.push('\\');
                out.push(c);
            }
        }
    }
    out
}

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-') || (c as u32) >= 0x7F
}

/// Shell word splitting errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShellSplitError {
    #[error("Unterminated {0} quote")]
    UnterminatedQuote(char),
    #[error("Trailing backslash")]
    TrailingBackslash,
}

/// Split a command line into words the way a POSIX shell would
///
/// Handles blanks, backslash escapes, single and double quotes. Expansions
/// (`$`, globbing, backticks) are not performed.
pub fn shell_split(line: &str) -> Result<Vec<String>, ShellSplitError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\n' => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\\' => match chars.next() {
                Some('\n') => {}
                Some(escaped) => {
                    word.push(escaped);
                    in_word = true;
                }
                None => return Err(ShellSplitError::TrailingBackslash),
            },
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(quoted) => word.push(quoted),
                        None => return Err(ShellSplitError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('\n') => {}
                            Some(escaped @ ('$' | '`' | '"' | '\\')) => word.push(escaped),
                            Some(other) => {
                                word.push('\\');
                                word.push(other);
                            }
                            None => return Err(ShellSplitError::UnterminatedQuote('"')),
                        },
                        Some(quoted) => word.push(quoted),
                        None => return Err(ShellSplitError::UnterminatedQuote('"')),
                    }
                }
            }
            other => {
                word.push(other);
                in_word = true;
            }
        }
    }

    if in_word {
        words.push(word);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_safe_paths_unchanged() {
        assert_eq!(
            shell_escape("/srv/media/photos/0000/0005/a-b_c.jpg"),
            "/srv/media/photos/0000/0005/a-b_c.jpg"
        );
    }

    #[test]
    fn test_metacharacters_escaped() {
        assert_eq!(shell_escape("a b"), "a\\ b");
        assert_eq!(shell_escape("x;rm -rf /"), "x\\;rm\\ -rf\\ /");
        assert_eq!(shell_escape("$(id)"), "\\$\\(id\\)");
        assert_eq!(shell_escape("it's"), "it\\'s");
    }

    #[test]
    fn test_newline_and_empty() {
        assert_eq!(shell_escape("a\nb"), "a'\n'b");
        assert_eq!(shell_escape(""), "''");
    }

    #[test]
    fn test_non_ascii_passes_through() {
        assert_eq!(shell_escape("café"), "café");
    }

    #[test]
    fn test_split_basic() {
        assert_eq!(
            shell_split("mv /a/b\\ c '/d e' \"f\\\"g\"").unwrap(),
            vec!["mv", "/a/b c", "/d e", "f\"g"]
        );
        assert_eq!(
            shell_split("find /x -exec rm -r {} \\;").unwrap(),
            vec!["find", "/x", "-exec", "rm", "-r", "{}", ";"]
        );
        assert_eq!(shell_split("echo ''").unwrap(), vec!["echo", ""]);
    }

    #[test]
    fn test_split_errors() {
        assert_eq!(
            shell_split("rm 'open"),
            Err(ShellSplitError::UnterminatedQuote('\''))
        );
        assert_eq!(shell_split("rm x\\"), Err(ShellSplitError::TrailingBackslash));
    }

    #[cfg(unix)]
    #[test]
    fn test_escaped_words_survive_a_real_shell() {
        let samples = [
            "/srv/media/photos/0000/0005/a.jpg",
            "my photo (1).jpg",
            "it's \"quoted\"",
            "$(id) `id` $HOME ${PATH}",
            "a;b|c&d>e<f",
            "*.jpg ?x [ab]",
            "back\\slash",
            "tab\there",
            "line\nbreak",
            "~user/#not-a-comment",
            "café ünïcode",
            "",
        ];

        for sample in samples {
            let output = std::process::Command::new("sh")
                .arg("-c")
                .arg(format!("printf %s {}", shell_escape(sample)))
                .output()
                .unwrap();
            assert!(output.status.success(), "sh failed for {:?}", sample);
            assert_eq!(String::from_utf8(output.stdout).unwrap(), sample);
        }
    }

    proptest! {
        #[test]
        fn escape_round_trips_through_shell_split(s in any::<String>()) {
            let escaped = shell_escape(&s);
            prop_assert_eq!(shell_split(&escaped).unwrap(), vec![s]);
        }

        #[test]
        fn escaped_words_stay_separate(a in any::<String>(), b in any::<String>()) {
            let line = format!("mv {} {}", shell_escape(&a), shell_escape(&b));
            prop_assert_eq!(shell_split(&line).unwrap(), vec!["mv".to_string(), a, b]);
        }
    }
}

//! Shell-word splitting and command construction.
//!
//! Command lines are tokenized the way a POSIX shell would split words, but no
//! shell is ever spawned: pipes, redirections and globs reach the program as
//! literal arguments.

use std::path::Path;
use std::process::Command;

use crate::error::{Error, Result};

enum QuoteMode {
    Plain,
    Single,
    Double,
}

/// Split `line` into words, honoring single quotes, double quotes and backslash escapes.
pub fn split(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut cur = String::new();
    let mut in_word = false;
    let mut mode = QuoteMode::Plain;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match mode {
            QuoteMode::Plain => match c {
                '\'' => {
                    mode = QuoteMode::Single;
                    in_word = true;
                }
                '"' => {
                    mode = QuoteMode::Double;
                    in_word = true;
                }
                '\\' => match chars.next() {
                    // Line continuation.
                    Some('\n') => {}
                    Some(next) => {
                        cur.push(next);
                        in_word = true;
                    }
                    None => {
                        return Err(Error::msg(format!(
                            "trailing backslash in command: {line}"
                        )));
                    }
                },
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut cur));
                        in_word = false;
                    }
                }
                c => {
                    cur.push(c);
                    in_word = true;
                }
            },
            QuoteMode::Single => {
                if c == '\'' {
                    mode = QuoteMode::Plain;
                } else {
                    cur.push(c);
                }
            }
            QuoteMode::Double => match c {
                '"' => mode = QuoteMode::Plain,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => cur.push(next),
                    Some('\n') => {}
                    Some(next) => {
                        cur.push('\\');
                        cur.push(next);
                    }
                    None => {
                        return Err(Error::msg(format!(
                            "unterminated double quote in command: {line}"
                        )));
                    }
                },
                c => cur.push(c),
            },
        }
    }

    match mode {
        QuoteMode::Plain => {}
        QuoteMode::Single => {
            return Err(Error::msg(format!(
                "unterminated single quote in command: {line}"
            )));
        }
        QuoteMode::Double => {
            return Err(Error::msg(format!(
                "unterminated double quote in command: {line}"
            )));
        }
    }
    if in_word {
        words.push(cur);
    }
    Ok(words)
}

/// Build a `Command` for `line` that runs in `cwd`.
pub fn command(line: &str, cwd: &Path) -> Result<Command> {
    let words = split(line)?;
    let Some((program, args)) = words.split_first() else {
        return Err(Error::msg("empty command"));
    };
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(cwd);
    // Never block on a credential prompt; a failing fetch is reported instead.
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    Ok(cmd)
}

//! Interactive prompt helpers.
//!
//! All helpers take the input and output streams as arguments so admin
//! operations can be tested with in-memory buffers. EOF and the cancel
//! words are normal outcomes, not errors.

use std::io::{self, BufRead, Write};

/// Inputs treated as "abort this operation".
const CANCEL_WORDS: [&str; 3] = ["cancel", "q", "quit"];

/// Print a prompt and read one trimmed line. `None` on EOF.
pub fn prompt(
    input: &mut impl BufRead,
    output: &mut impl Write,
    message: &str,
) -> io::Result<Option<String>> {
    write!(output, "{message}")?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Prompt for a value; empty input, a cancel word, or EOF all mean the
/// user backed out.
pub fn prompt_cancellable(
    input: &mut impl BufRead,
    output: &mut impl Write,
    message: &str,
) -> io::Result<Option<String>> {
    match prompt(input, output, message)? {
        Some(line) if !line.is_empty() && !CANCEL_WORDS.contains(&line.to_lowercase().as_str()) => {
            Ok(Some(line))
        }
        _ => Ok(None),
    }
}

/// Yes/no confirmation defaulting to no.
pub fn confirm(
    input: &mut impl BufRead,
    output: &mut impl Write,
    message: &str,
) -> io::Result<bool> {
    match prompt(input, output, message)? {
        Some(line) => Ok(matches!(line.to_lowercase().as_str(), "y" | "yes")),
        None => Ok(false),
    }
}

/// Prompt for a 1-based selection out of `count` items. `0` cancels.
/// Re-prompts on invalid input; `None` on cancel or EOF.
pub fn select_index(
    input: &mut impl BufRead,
    output: &mut impl Write,
    message: &str,
    count: usize,
) -> io::Result<Option<usize>> {
    loop {
        let line = match prompt(input, output, message)? {
            Some(line) => line,
            None => return Ok(None),
        };
        if line.is_empty() {
            continue;
        }
        match line.parse::<usize>() {
            Ok(0) => return Ok(None),
            Ok(n) if n <= count => return Ok(Some(n - 1)),
            Ok(_) => writeln!(output, "Invalid selection. Please choose 1-{count} or 0 to cancel")?,
            Err(_) => writeln!(output, "Please enter a number")?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run<T>(
        script: &str,
        f: impl FnOnce(&mut Cursor<&[u8]>, &mut Vec<u8>) -> io::Result<T>,
    ) -> (T, String) {
        let mut input = Cursor::new(script.as_bytes());
        let mut output = Vec::new();
        let result = f(&mut input, &mut output).unwrap();
        (result, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_prompt_reads_trimmed_line() {
        let (result, out) = run("  hello  \n", |i, o| prompt(i, o, "Name: "));
        assert_eq!(result.as_deref(), Some("hello"));
        assert!(out.contains("Name: "));
    }

    #[test]
    fn test_prompt_eof() {
        let (result, _) = run("", |i, o| prompt(i, o, "Name: "));
        assert_eq!(result, None);
    }

    #[test]
    fn test_prompt_cancellable() {
        let (result, _) = run("cancel\n", |i, o| prompt_cancellable(i, o, "> "));
        assert_eq!(result, None);
        let (result, _) = run("Q\n", |i, o| prompt_cancellable(i, o, "> "));
        assert_eq!(result, None);
        let (result, _) = run("\n", |i, o| prompt_cancellable(i, o, "> "));
        assert_eq!(result, None);
        let (result, _) = run("new_name\n", |i, o| prompt_cancellable(i, o, "> "));
        assert_eq!(result.as_deref(), Some("new_name"));
    }

    #[test]
    fn test_confirm() {
        assert!(run("y\n", |i, o| confirm(i, o, "? ")).0);
        assert!(run("YES\n", |i, o| confirm(i, o, "? ")).0);
        assert!(!run("n\n", |i, o| confirm(i, o, "? ")).0);
        assert!(!run("\n", |i, o| confirm(i, o, "? ")).0);
        assert!(!run("", |i, o| confirm(i, o, "? ")).0);
    }

    #[test]
    fn test_select_index() {
        let (result, out) = run("2\n", |i, o| select_index(i, o, "Select device number: ", 3));
        assert_eq!(result, Some(1));
        assert!(out.contains("Select device number: "));

        let (result, _) = run("0\n", |i, o| select_index(i, o, "Select device number: ", 3));
        assert_eq!(result, None);

        // invalid entries re-prompt until a valid one arrives
        let (result, out) = run("abc\n9\n3\n", |i, o| {
            select_index(i, o, "Select device number: ", 3)
        });
        assert_eq!(result, Some(2));
        assert!(out.contains("Please enter a number"));
        assert!(out.contains("Invalid selection"));
    }

    #[test]
    fn test_select_index_custom_message() {
        let (result, out) = run("1\n", |i, o| select_index(i, o, "Select backup number: ", 2));
        assert_eq!(result, Some(0));
        assert!(out.contains("Select backup number: "));
        assert!(!out.contains("device"));
    }
}

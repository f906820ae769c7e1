//! Symbol files: whitespace-separated observation codes.
//!
//! Each token is a non-negative integer, or `?` / `-` for an outcome that is
//! not resolved. `#` starts a comment that runs to the end of the line.

use std::path::Path;

use anyhow::{bail, Context};

/// Parse symbol-file text. `alphabet` bounds the accepted codes.
pub fn parse(text: &str, alphabet: usize) -> anyhow::Result<Vec<Option<usize>>> {
    let mut codes = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("");
        for token in line.split_whitespace() {
            let code = match token {
                "?" | "-" => None,
                _ => {
                    let symbol: usize = token.parse().with_context(|| {
                        format!("line {}: '{}' is not a symbol", line_no + 1, token)
                    })?;
                    if symbol >= alphabet {
                        bail!(
                            "line {}: symbol {} outside alphabet of size {}",
                            line_no + 1,
                            symbol,
                            alphabet
                        );
                    }
                    Some(symbol)
                }
            };
            codes.push(code);
        }
    }
    Ok(codes)
}

/// Read and parse a symbol file.
pub fn read(path: &Path, alphabet: usize) -> anyhow::Result<Vec<Option<usize>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse(&text, alphabet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_codes_and_sentinels() {
        let codes = parse("0 1 ?\n2 - 3\n", 4).unwrap();
        assert_eq!(
            codes,
            vec![Some(0), Some(1), None, Some(2), None, Some(3)]
        );
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let codes = parse("# header\n\n1 2 # trailing\n  \n0\n", 3).unwrap();
        assert_eq!(codes, vec![Some(1), Some(2), Some(0)]);
    }

    #[test]
    fn test_parse_rejects_out_of_alphabet() {
        let err = parse("0 1\n5\n", 3).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("0 x 1", 3).is_err());
        assert!(parse("-1", 3).is_err());
    }

    #[test]
    fn test_read_missing_file() {
        let err = read(Path::new("/nonexistent/augur/symbols.txt"), 3).unwrap_err();
        assert!(err.to_string().contains("failed to read"), "{err}");
    }
}

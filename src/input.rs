//! Input provider: loads and normalizes the strings to be sorted.

use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

/// Normalizes one input line: surrounding whitespace is trimmed and the text is lower-cased.
pub fn normalize(line: &str) -> String {
    line.trim().to_lowercase()
}

/// Reads every line of the input and normalizes it.
pub fn read_lines<R: BufRead>(reader: R) -> io::Result<Vec<String>> {
    reader.lines().map(|line| line.map(|line| normalize(&line))).collect()
}

/// Reads the input file, one string per line.
pub fn read_file(path: &Path) -> io::Result<Vec<String>> {
    let file = fs::File::open(path)?;
    let list = read_lines(io::BufReader::new(file))?;

    log::info!("loaded {} strings from {}", list.len(), path.display());
    return Ok(list);
}

#[cfg(test)]
mod test {
    use std::io::{self, Write};

    use rstest::*;

    use super::{normalize, read_file, read_lines};

    #[rstest]
    #[case("Alpha", "alpha")]
    #[case("  BRAVO\t", "bravo")]
    #[case("", "")]
    fn test_normalize(#[case] line: &str, #[case] expected: &str) {
        assert_eq!(normalize(line), expected);
    }

    #[test]
    fn test_read_lines() {
        let input = io::Cursor::new("Delta\nalpha\r\nCharlie\n");

        assert_eq!(read_lines(input).unwrap(), vec!["delta", "alpha", "charlie"]);
    }

    #[test]
    fn test_read_file() {
        let mut file = tempfile::NamedTempFile::new_in("./").unwrap();
        writeln!(file, "Bravo").unwrap();
        writeln!(file, "ALPHA").unwrap();
        file.flush().unwrap();

        assert_eq!(read_file(file.path()).unwrap(), vec!["bravo", "alpha"]);
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();

        assert!(read_file(&dir.path().join("missing.txt")).is_err());
    }
}

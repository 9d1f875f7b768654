//src/tabseq.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{MirmapError, Result};
use crate::types::SequenceSet;

/// Parses a tabulated sequence file in the format:
/// ```text
/// <id>\t<sequence>
/// ```
/// Blank lines are skipped; any other line without exactly two fields is an error.
pub fn load_tab<P: AsRef<Path>>(filepath: P) -> Result<SequenceSet> {
    let path = filepath.as_ref();
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut sequences = SequenceSet::new();

    for (lineno, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 2 {
            return Err(MirmapError::Parse {
                path: path.to_path_buf(),
                line: lineno + 1,
                message: format!("expected 2 tab-separated fields, found {}", parts.len()),
            });
        }

        sequences.insert(parts[0].to_string(), parts[1].to_string());
    }
    Ok(sequences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_tab() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirnas.tsv");
        fs::write(&path, "let-7a\tUGAGGUAGUAGGUUGUAUAGUU\n\nmir-1\tUGGAAUGUAAAGAAGUAUGUAU\n").unwrap();

        let seqs = load_tab(&path).unwrap();
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs.get("let-7a"), Some("UGAGGUAGUAGGUUGUAUAGUU"));
        assert_eq!(seqs.iter().nth(1).map(|r| r.id.as_str()), Some("mir-1"));
    }

    #[test]
    fn test_load_tab_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tsv");
        fs::write(&path, "ok\tACGU\nbroken line\n").unwrap();

        match load_tab(&path) {
            Err(MirmapError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("Expected parse error, got {:?}", other),
        }
    }
}

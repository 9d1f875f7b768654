use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::types::SequenceSet;

/// Loads a FASTA file into an ordered id -> sequence set. Supports `.gz`.
pub fn load_fasta<P: AsRef<Path>>(path: P, upper: bool) -> io::Result<SequenceSet> {
    let path = path.as_ref();
    let f = File::open(path)?;

    // If the file ends with ".gz", wrap it in a MultiGzDecoder
    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let reader: Box<dyn BufRead> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };

    read_fasta(reader, upper)
}

/// Parses FASTA text held in memory.
pub fn parse_fasta_str(text: &str, upper: bool) -> SequenceSet {
    // Reading from a byte slice cannot fail
    read_fasta(Cursor::new(text.as_bytes()), upper).unwrap_or_default()
}

/// Minimal FASTA reader.
///
/// Headers are the trimmed text after `>`. Sequence lines before the first
/// header are dropped and a repeated header starts its record over.
pub fn read_fasta<R: BufRead>(mut reader: R, upper: bool) -> io::Result<SequenceSet> {
    let mut sequences = SequenceSet::new();
    let mut current: Option<String> = None;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break; // EOF
        }
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix('>') {
            let name = header.trim().to_string();
            sequences.insert(name.clone(), String::new());
            current = Some(name);
        } else if let Some(name) = &current {
            if upper {
                sequences.append(name, &trimmed.to_uppercase());
            } else {
                sequences.append(name, trimmed);
            }
        }
    }

    Ok(sequences)
}

/// Writes one header line and one sequence line per record.
pub fn write_fasta<W: Write>(mut writer: W, sequences: &SequenceSet) -> io::Result<()> {
    for record in sequences {
        writeln!(writer, ">{}\n{}", record.id, record.seq)?;
    }
    Ok(())
}

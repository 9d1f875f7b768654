//src/seq_utils.rs

use ahash::AHashSet;

/// Replaces every symbol of `seq` missing from `alphabet` with `replacement`.
pub fn clean_seq(seq: &str, alphabet: &str, replacement: &str) -> String {
    let allowed: AHashSet<char> = alphabet.chars().collect();
    let mut out = String::with_capacity(seq.len());
    for c in seq.chars() {
        if allowed.contains(&c) {
            out.push(c);
        } else {
            out.push_str(replacement);
        }
    }
    out
}

#[inline]
fn complement_rna(c: char) -> char {
    match c {
        'A' => 'U',
        'C' => 'G',
        'G' => 'C',
        'U' => 'A',
        'a' => 'u',
        'c' => 'g',
        'g' => 'c',
        'u' => 'a',
        other => other,
    }
}

#[inline]
fn complement_dna(c: char) -> char {
    match c {
        'A' => 'T',
        'C' => 'G',
        'G' => 'C',
        'T' => 'A',
        'a' => 't',
        'c' => 'g',
        'g' => 'c',
        't' => 'a',
        other => other,
    }
}

/// Reverse complement. The RNA table is used as soon as a `U`/`u` is present;
/// ambiguity codes pass through untouched.
pub fn reverse_complement(seq: &str) -> String {
    let complement = if seq.contains(['U', 'u']) {
        complement_rna
    } else {
        complement_dna
    };
    seq.chars().rev().map(complement).collect()
}

/// Uppercases, turns DNA into RNA and masks anything outside `ACGU` with `N`.
pub fn normalize_rna(seq: &str) -> Vec<u8> {
    seq.trim()
        .bytes()
        .map(|b| match b.to_ascii_uppercase() {
            b'T' => b'U',
            c @ (b'A' | b'C' | b'G' | b'U') => c,
            _ => b'N',
        })
        .collect()
}

/// Number of possibly overlapping occurrences of `needle` in `haystack`.
pub fn count_overlapping(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() || needle.len() > haystack.len() {
        return 0;
    }
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

//! Version string comparison for manifests.
//!
//! Manifest versions are free-form (`1.2.3`, `2024-01-15`, `1.0-beta2`,
//! `9.0.0.1_rc`). They are split into numeric and alphabetic parts at
//! separators and at digit/letter boundaries, then compared part by part.

use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq)]
enum Part<'a> {
    Number(u64),
    Text(&'a str),
}

fn parts(version: &str) -> Vec<Part<'_>> {
    let mut result = Vec::new();
    for segment in version.split(['.', '-', '_', '+', ' ']) {
        let mut start = 0;
        let bytes = segment.as_bytes();
        for i in 1..=bytes.len() {
            let boundary = i == bytes.len() || bytes[i].is_ascii_digit() != bytes[i - 1].is_ascii_digit();
            if !boundary {
                continue;
            }
            let token = &segment[start..i];
            if !token.is_empty() {
                result.push(match token.parse::<u64>() {
                    Ok(n) => Part::Number(n),
                    Err(_) => Part::Text(token),
                });
            }
            start = i;
        }
    }
    result
}

/// Compare two versions.
///
/// Numbers compare numerically, text case-insensitively. A trailing text
/// part marks a pre-release, so `1.0-beta` sorts before `1.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_parts = parts(a);
    let b_parts = parts(b);

    for i in 0..a_parts.len().max(b_parts.len()) {
        let ordering = match (a_parts.get(i), b_parts.get(i)) {
            (Some(Part::Number(x)), Some(Part::Number(y))) => x.cmp(y),
            (Some(Part::Text(x)), Some(Part::Text(y))) => {
                x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase())
            }
            (Some(Part::Number(_)), Some(Part::Text(_))) => Ordering::Greater,
            (Some(Part::Text(_)), Some(Part::Number(_))) => Ordering::Less,
            (Some(Part::Number(_)), None) => Ordering::Greater,
            (None, Some(Part::Number(_))) => Ordering::Less,
            (Some(Part::Text(_)), None) => Ordering::Less,
            (None, Some(Part::Text(_))) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

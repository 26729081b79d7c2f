use std::cmp::Ordering;

/// Compare two dotted API versions numerically, so that `1.9 < 1.10`
///
/// Missing components count as zero and non-numeric components sort first.
#[must_use]
pub fn compare_version(a: &str, b: &str) -> Ordering {
    let left: Vec<u64> = components(a);
    let right: Vec<u64> = components(b);

    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => {}
            other => return other,
        }
    }

    Ordering::Equal
}

fn components(version: &str) -> Vec<u64> {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}

#[must_use]
pub fn version_lt(a: &str, b: &str) -> bool {
    compare_version(a, b) == Ordering::Less
}

#[must_use]
pub fn version_gte(a: &str, b: &str) -> bool {
    !version_lt(a, b)
}

/// Whether `version` looks like `major.minor`
#[must_use]
pub fn is_valid(version: &str) -> bool {
    let mut parts = version.split('.');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(major), Some(minor), None)
            if !major.is_empty()
                && !minor.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.bytes().all(|b| b.is_ascii_digit())
    )
}

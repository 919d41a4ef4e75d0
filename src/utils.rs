// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Returns true if `key` cannot be written as a bare property name in an
/// access path.
pub fn must_escape_key(key: &str) -> bool {
    key.char_indices().any(|(i, c)| match c {
        'a'..='z' | 'A'..='Z' | '_' => false,
        '0'..='9' => i == 0,
        _ => true,
    })
}

/// Appends `key` to the access path `root`, quoting the key when it is not a
/// plain identifier.
pub fn join_key(root: &str, key: &str) -> String {
    if !must_escape_key(key) {
        if root.is_empty() {
            return key.to_string();
        }
        return format!("{root}.{key}");
    }
    format!("{root}[\"{}\"]", key.replace('"', "\\\""))
}

/// Levenshtein distance between two strings, counted in chars.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

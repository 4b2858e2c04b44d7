//! Shared utility functions.

use std::cmp::Ordering;

/// Compare two strings treating runs of ASCII digits as numbers.
///
/// `"T2"` sorts before `"T10"`. Strings that compare equal numerically but
/// differ textually (`"T01"` vs `"T1"`) fall back to byte order so the result
/// is a total order consistent with `Eq`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut ai, mut bi) = (a.as_bytes(), b.as_bytes());

    loop {
        match (ai.first(), bi.first()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let a_len = ai.iter().take_while(|c| c.is_ascii_digit()).count();
                let b_len = bi.iter().take_while(|c| c.is_ascii_digit()).count();
                let a_num = trim_zeros(&ai[..a_len]);
                let b_num = trim_zeros(&bi[..b_len]);

                let ord = a_num.len().cmp(&b_num.len()).then_with(|| a_num.cmp(b_num));
                if ord != Ordering::Equal {
                    return ord;
                }
                ai = &ai[a_len..];
                bi = &bi[b_len..];
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(y);
                }
                ai = &ai[1..];
                bi = &bi[1..];
            }
        }
    }
}

fn trim_zeros(digits: &[u8]) -> &[u8] {
    let start = digits.iter().take_while(|&&c| c == b'0').count();
    &digits[start..]
}

/// Keep at most the last `max_chars` characters of `text`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

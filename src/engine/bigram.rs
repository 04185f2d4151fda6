use std::collections::BTreeSet;

/// Every pair of adjacent characters in the lowercased text.
///
/// Works on `char`s, not bytes, so multi-byte text never splits a code point.
/// Texts shorter than two characters have no bigrams.
pub fn bigrams(text: &str) -> BTreeSet<String> {
    let chars: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();
    chars
        .windows(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect()
}

/// Lowercase bigram key for an error at `pos`, framed by the target characters
/// `target[pos - 1]` and `target[pos]`.
///
/// Position 0 cannot form a bigram. Pairs with a non-alphabetic character are
/// rejected so that stored keys are always two lowercase letters.
pub fn error_bigram(target: &[char], pos: usize) -> Option<String> {
    if pos == 0 || pos >= target.len() {
        return None;
    }
    let a = lower(target[pos - 1])?;
    let b = lower(target[pos])?;
    Some([a, b].iter().collect())
}

fn lower(ch: char) -> Option<char> {
    if !ch.is_alphabetic() {
        return None;
    }
    let mut it = ch.to_lowercase();
    match (it.next(), it.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

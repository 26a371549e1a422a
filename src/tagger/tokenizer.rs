//! Deliberately-simplified character-level tokenizer for the CLIP text
//! encoder, ported id-for-id from the reference `_tokenize` in
//! `clip_tagger.py`. Not a real BPE tokenizer — see SPEC_FULL.md's Design
//! Notes on tokenizer fidelity; the mapping below is the contract, not an
//! approximation of one.

const START_TOKEN: i64 = 49406;
const END_TOKEN: i64 = 49407;
pub const CONTEXT_LENGTH: usize = 77;

/// Encodes `text` to a fixed-length (77) sequence of token ids: start
/// token, one id per recognized character (truncated to leave room for
/// the end token), end token, zero-padded to `CONTEXT_LENGTH`.
///
/// Recognized characters: `a`-`z` -> `320 + offset`, space -> `267`,
/// `0`-`9` -> `273 + offset`. Anything else (punctuation, uppercase —
/// callers lowercase first) is dropped, matching the reference's
/// `if char.isalpha() / elif char == ' ' / elif char.isdigit()` chain with
/// no `else` branch.
pub fn tokenize(text: &str) -> [i64; CONTEXT_LENGTH] {
    let mut ids = [0i64; CONTEXT_LENGTH];
    ids[0] = START_TOKEN;
    let mut pos = 1;

    for ch in text.to_lowercase().chars() {
        if pos >= CONTEXT_LENGTH - 1 {
            break;
        }
        let id = if ch.is_ascii_lowercase() {
            Some(320 + (ch as i64 - 'a' as i64))
        } else if ch == ' ' {
            Some(267)
        } else if ch.is_ascii_digit() {
            Some(273 + (ch as i64 - '0' as i64))
        } else {
            None
        };
        if let Some(id) = id {
            ids[pos] = id;
            pos += 1;
        }
    }

    ids[pos] = END_TOKEN;
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_with_start_and_end_tokens() {
        let ids = tokenize("a");
        assert_eq!(ids[0], START_TOKEN);
        assert_eq!(ids[1], 320);
        assert_eq!(ids[2], END_TOKEN);
        assert!(ids[3..].iter().all(|&x| x == 0));
    }

    #[test]
    fn maps_space_and_digits() {
        let ids = tokenize("a 9");
        assert_eq!(ids[1], 320);
        assert_eq!(ids[2], 267);
        assert_eq!(ids[3], 273 + 9);
        assert_eq!(ids[4], END_TOKEN);
    }

    #[test]
    fn drops_unrecognized_characters() {
        let ids = tokenize("a!b");
        assert_eq!(ids[1], 320);
        assert_eq!(ids[2], 320 + 1);
        assert_eq!(ids[3], END_TOKEN);
    }

    #[test]
    fn truncates_long_prompts_leaving_room_for_end_token() {
        let long = "a".repeat(200);
        let ids = tokenize(&long);
        assert_eq!(ids[CONTEXT_LENGTH - 1], END_TOKEN);
    }
}

//! Reversible encoding of observable names into dataset keys
//!
//! Observable names read from Yambo headers (`E-Eo`, `Sc|Eo`, `EPS-Im[2]`,
//! `E/ev[1]`) contain characters that are not valid in dataset array keys.
//! Each such character is replaced by an escape token delimited by underscores,
//! and a literal underscore is doubled:
//!
//! | char | token      |
//! |------|------------|
//! | `_`  | `__`       |
//! | `-`  | `_minus_`  |
//! | `` ` `` | `_prime_` |
//! | `/`  | `_slash_`  |
//! | `(`  | `_lp_`     |
//! | `)`  | `_rp_`     |
//! | `[`  | `_lb_`     |
//! | `]`  | `_rb_`     |
//! | `\|` | `_bar_`    |
//! | `.`  | `_dot_`    |
//! | ` `  | `_sp_`     |
//! | `+`  | `_plus_`   |
//!
//! Every underscore in an encoded key starts either `__` or a token, so
//! [`decode_name`] inverts [`encode_name`] exactly and distinct names never
//! collide.

use crate::error::{ParserError, Result};

const TOKENS: &[(char, &str)] = &[
    ('-', "minus"),
    ('`', "prime"),
    ('/', "slash"),
    ('(', "lp"),
    (')', "rp"),
    ('[', "lb"),
    (']', "rb"),
    ('|', "bar"),
    ('.', "dot"),
    (' ', "sp"),
    ('+', "plus"),
];

fn token_for(c: char) -> Option<&'static str> {
    TOKENS.iter().find(|(ch, _)| *ch == c).map(|(_, token)| *token)
}

fn char_for(token: &str) -> Option<char> {
    TOKENS.iter().find(|(_, t)| *t == token).map(|(ch, _)| *ch)
}

/// Encode an observable name into a dataset key
pub fn encode_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len() + 8);
    for c in name.chars() {
        if c == '_' {
            encoded.push_str("__");
        } else if let Some(token) = token_for(c) {
            encoded.push('_');
            encoded.push_str(token);
            encoded.push('_');
        } else {
            encoded.push(c);
        }
    }
    encoded
}

/// Decode a dataset key produced by [`encode_name`]
pub fn decode_name(key: &str) -> Result<String> {
    let invalid = |reason: &str| ParserError::InvalidName {
        name: key.to_string(),
        reason: reason.to_string(),
    };

    let mut decoded = String::with_capacity(key.len());
    let mut rest = key;
    while let Some(pos) = rest.find('_') {
        decoded.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(stripped) = after.strip_prefix('_') {
            decoded.push('_');
            rest = stripped;
            continue;
        }
        let end = after
            .find('_')
            .ok_or_else(|| invalid("unterminated escape token"))?;
        let c = char_for(&after[..end]).ok_or_else(|| invalid("unknown escape token"))?;
        decoded.push(c);
        rest = &after[end + 1..];
    }
    decoded.push_str(rest);
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_observables() {
        assert_eq!(encode_name("E-Eo"), "E_minus_Eo");
        assert_eq!(encode_name("Sc|Eo"), "Sc_bar_Eo");
        assert_eq!(encode_name("EPS-Im[2]"), "EPS_minus_Im_lb_2_rb_");
        assert_eq!(encode_name("Spin_Pol"), "Spin__Pol");
        assert_eq!(encode_name("Eo"), "Eo");
    }

    #[test]
    fn test_former_collisions_are_distinct() {
        // a plain replace of '-' and '/' by '_' mapped all three to "E_Eo"
        let names = ["E-Eo", "E/Eo", "E_Eo"];
        let encoded: Vec<String> = names.iter().map(|n| encode_name(n)).collect();
        assert_ne!(encoded[0], encoded[1]);
        assert_ne!(encoded[1], encoded[2]);
        assert_ne!(encoded[0], encoded[2]);
    }

    #[test]
    fn test_rejects_malformed_keys() {
        assert!(decode_name("E_minus").is_err());
        assert!(decode_name("E_tilde_x").is_err());
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(name in "[A-Za-z0-9_\\-`/()\\[\\]|. +]{0,24}") {
            let encoded = encode_name(&name);
            prop_assert_eq!(decode_name(&encoded).unwrap(), name);
        }
    }
}

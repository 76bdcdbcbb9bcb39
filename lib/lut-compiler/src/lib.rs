//! Compiler for the small boolean expression language used to program hardware
//! lookup tables: an operator-precedence parser that reduces directly to a 32-bit
//! truth table rather than building an AST, evaluating the expression once for all
//! 32 rows simultaneously by operating on five fixed bit-interleaved masks.

mod parser;
mod status;
mod token;

pub use status::LutStatus;

use parser::Parser;
use token::tokenize;

/// Compile a LUT expression, or accept a raw `0x` + 8 hex digit mask directly.
///
/// On success returns `(LutStatus::Ok, value)`. On failure returns the status that
/// best explains what went wrong and `0` as a placeholder value, which callers should
/// not read.
pub fn parse_lut(input: &str) -> (LutStatus, u32) {
    if let Some(value) = parse_hex_literal(input) {
        return (LutStatus::Ok, value);
    }

    let result = tokenize(input).and_then(|tokens| Parser::new(&tokens).parse_all());
    match result {
        Ok(value) => (LutStatus::Ok, value),
        Err(status) => {
            tracing::debug!(input, status = ?status, "LUT expression failed to compile");
            (status, 0)
        }
    }
}

/// The message a caller should report back to its client for a given status.
pub fn parse_lut_error_string(status: LutStatus) -> &'static str {
    status.message()
}

fn parse_hex_literal(input: &str) -> Option<u32> {
    let digits = input.strip_prefix("0x")?;
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}


#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    const SEED_EXPRESSIONS: &[&str] =
        &["A", "A&B|C^D=E", "~A&~B&~C&~D&~E", "A?B:C", "(A|B)&(C|D)=>E", "A&B|C^D=E=>A?0:1"];

    proptest! {
        /// Inserting extra ASCII spaces anywhere in a well-formed expression must not
        /// change the result: the tokeniser discards them before the parser ever sees
        /// a token boundary.
        #[test]
        fn whitespace_between_tokens_is_insensitive(
            seed in (0..SEED_EXPRESSIONS.len()),
            gaps in prop::collection::vec(0usize..4, 1..32),
        ) {
            let base = SEED_EXPRESSIONS[seed];
            let mut spaced = String::new();
            for (i, c) in base.chars().enumerate() {
                spaced.push(c);
                let n = gaps[i % gaps.len()];
                spaced.extend(std::iter::repeat(' ').take(n));
            }

            prop_assert_eq!(parse_lut(base), parse_lut(&spaced));
        }

        /// Every 32-bit mask round-trips through its own hex literal.
        #[test]
        fn hex_round_trips_through_parse_lut(m in any::<u32>()) {
            let text = format!("0x{m:08X}");
            let (status, value) = parse_lut(&text);
            prop_assert_eq!(status, LutStatus::Ok);
            prop_assert_eq!(value, m);
        }
    }
}

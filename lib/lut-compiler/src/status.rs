/// Outcome of a [`crate::parse_lut`] call.
///
/// These are data, not `std::error::Error`s: a failed compile is a normal, expected
/// outcome for hand-typed hardware LUT expressions and is reported back to the
/// originating client as text, never propagated as a `Result` up through the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LutStatus {
    Ok,
    TokenError,
    TooComplex,
    NoOperator,
    NoOpen,
    NoClose,
    NoValue,
    NoIf,
    NoElse,
}

impl LutStatus {
    /// A user-facing message for this status, suitable for an `ERR <message>\n` reply.
    pub fn message(self) -> &'static str {
        match self {
            LutStatus::Ok => "ok",
            LutStatus::TokenError => "invalid character in LUT expression",
            LutStatus::TooComplex => "LUT expression nested too deeply",
            LutStatus::NoOperator => "missing operator between values",
            LutStatus::NoOpen => "unmatched closing parenthesis",
            LutStatus::NoClose => "unmatched opening parenthesis",
            LutStatus::NoValue => "expected a value",
            LutStatus::NoIf => "':' with no matching '?'",
            LutStatus::NoElse => "'?' with no matching ':'",
        }
    }
}

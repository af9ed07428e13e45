//! Fallback - 未知の値をフォールバック variant に寄せるパース
//!
//! Device firmware adds new status strings over time. Closed enums parsed from
//! device fields implement [`Fallback`] so an unknown value lands on a declared
//! variant instead of failing.

use serde::de::DeserializeOwned;

/// Parses a device string into a closed enum, falling back on unknown values.
///
/// The enum's serde representation defines the accepted strings.
///
/// ```ignore
/// #[derive(Deserialize)]
/// #[serde(rename_all = "snake_case")]
/// enum Color { Red, Blue, Unknown }
///
/// impl Fallback for Color {
///     const FALLBACK: Self = Color::Unknown;
/// }
///
/// assert_eq!(Color::parse("green"), Color::Unknown);
/// ```
pub trait Fallback: DeserializeOwned + Sized {
    const FALLBACK: Self;

    fn parse(value: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(value.to_string()))
            .unwrap_or(Self::FALLBACK)
    }

    fn parse_opt(value: Option<&str>) -> Self {
        value.map_or(Self::FALLBACK, Self::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    #[serde(rename_all = "snake_case")]
    enum Mode {
        Color,
        Mono,
        Unknown,
    }

    impl Fallback for Mode {
        const FALLBACK: Self = Mode::Unknown;
    }

    #[rstest]
    #[case("color", Mode::Color)]
    #[case("mono", Mode::Mono)]
    #[case("sepia", Mode::Unknown)]
    #[case("", Mode::Unknown)]
    fn parse_uses_fallback_for_unknown_values(#[case] raw: &str, #[case] expected: Mode) {
        assert_eq!(Mode::parse(raw), expected);
    }

    #[test]
    fn parse_opt_falls_back_on_none() {
        assert_eq!(Mode::parse_opt(None), Mode::Unknown);
        assert_eq!(Mode::parse_opt(Some("mono")), Mode::Mono);
    }
}

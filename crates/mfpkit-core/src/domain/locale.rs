//! Locale normalization for display languages reported by the device.

/// Normalizes a device display language into `ll` or `ll_CC` form.
///
/// `en-US`, `en_us` and `EN-us` all become `en_US`; `JA` becomes `ja`.
/// Longer tags only get their separators replaced.
pub fn normalize_locale(display_language: &str) -> String {
    let locale = display_language.trim().replace('-', "_");
    let parts: Vec<&str> = locale.split('_').collect();

    match parts.as_slice() {
        [language] => language.to_lowercase(),
        [language, country] => format!("{}_{}", language.to_lowercase(), country.to_uppercase()),
        _ => locale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("en-US", "en_US")]
    #[case("en_us", "en_US")]
    #[case("EN-us", "en_US")]
    #[case("JA", "ja")]
    #[case("zh_Hant_TW", "zh_Hant_TW")]
    #[case("zh-Hant-TW", "zh_Hant_TW")]
    fn normalizes_casing_and_separators(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_locale(raw), expected);
    }
}

//! util — общие мелкие хелперы.
//!
//! Содержит:
//! - env_flag(): чтение булевых ENV ("1|true|yes|on").
//! - env_parse(): чтение числовых ENV с игнорированием мусора.
//! - trim_trailing_nul(): срез без NUL-паддинга в конце.

use std::str::FromStr;

/// ENV-флаг: true для "1", "true", "yes", "on" (без учёта регистра).
/// Отсутствующая переменная — None.
#[inline]
pub fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        let s = v.trim().to_ascii_lowercase();
        s == "1" || s == "true" || s == "yes" || s == "on"
    })
}

/// Числовой ENV. Непарсящееся значение трактуется как отсутствующее.
#[inline]
pub fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
}

/// Срез без хвостовых NUL-байтов.
#[inline]
pub fn trim_trailing_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_nul_padding() {
        assert_eq!(trim_trailing_nul(b"<domain/>\0\0\0"), b"<domain/>");
        assert_eq!(trim_trailing_nul(b"\0\0"), b"");
        assert_eq!(trim_trailing_nul(b"abc"), b"abc");
        assert_eq!(trim_trailing_nul(b""), b"");
    }

    #[test]
    fn env_flag_variants() {
        std::env::set_var("MEMSNAP_UTIL_TEST_FLAG", " YES ");
        assert_eq!(env_flag("MEMSNAP_UTIL_TEST_FLAG"), Some(true));
        std::env::set_var("MEMSNAP_UTIL_TEST_FLAG", "0");
        assert_eq!(env_flag("MEMSNAP_UTIL_TEST_FLAG"), Some(false));
        std::env::remove_var("MEMSNAP_UTIL_TEST_FLAG");
        assert_eq!(env_flag("MEMSNAP_UTIL_TEST_FLAG"), None);
    }

    #[test]
    fn env_parse_ignores_garbage() {
        std::env::set_var("MEMSNAP_UTIL_TEST_NUM", "x12");
        assert_eq!(env_parse::<u32>("MEMSNAP_UTIL_TEST_NUM"), None);
        std::env::set_var("MEMSNAP_UTIL_TEST_NUM", " 12 ");
        assert_eq!(env_parse::<u32>("MEMSNAP_UTIL_TEST_NUM"), Some(12));
        std::env::remove_var("MEMSNAP_UTIL_TEST_NUM");
    }
}

// src/utils/html.rs

/// Sanitizes editor supplied HTML (custom word definitions).
///
/// Whitelist based: formatting tags survive, `<script>` and event handler
/// attributes are stripped along with their content.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_script_keeps_formatting() {
        let cleaned = clean_html("<p><b>bright</b><script>alert(1)</script></p><img src=x onerror=alert(1)>");
        assert!(cleaned.contains("<b>bright</b>"));
        assert!(!cleaned.contains("script"));
        assert!(!cleaned.contains("onerror"));
    }
}

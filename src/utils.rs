use crate::ScrapeError;
use std::time::Duration;
use url::Url;

/// Parse `raw` as an absolute http(s) URL.
pub fn validate_url(raw: &str) -> Result<Url, ScrapeError> {
    let parsed =
        Url::parse(raw).map_err(|_| ScrapeError::validation(format!("Invalid URL: {raw}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(ScrapeError::validation(format!(
            "Unsupported protocol in {raw}"
        ))),
    }
}

pub fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '&' | '=' | '#' => '_',
            c if c.is_control() || c.is_whitespace() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// File name for a page screenshot, derived from its URL.
pub fn screenshot_filename(url: &str) -> String {
    let stripped = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let mut name = sanitize_filename(stripped);
    if name.is_empty() {
        name = "page".to_string();
    }
    // keep object keys within common storage limits
    name.truncate(200);
    format!("{name}.png")
}

/// Seconds with three decimal places, as reported in results.
pub fn seconds_3dp(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test.txt"), "test.txt");
        assert_eq!(sanitize_filename("test/file.txt"), "test_file.txt");
        assert_eq!(sanitize_filename("test:file?.txt"), "test_file_.txt");
    }

    #[test]
    fn test_screenshot_filename() {
        assert_eq!(
            screenshot_filename("https://example.com/a?b=c"),
            "example.com_a_b_c.png"
        );
        assert_eq!(screenshot_filename("https://example.com/"), "example.com.png");
    }

    #[test]
    fn test_seconds_3dp() {
        assert_eq!(seconds_3dp(Duration::from_micros(1_234_567)), 1.235);
        assert_eq!(seconds_3dp(Duration::ZERO), 0.0);
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        assert_eq!(
            validate_url("ftp://example.com").unwrap_err().to_string(),
            "Unsupported protocol in ftp://example.com"
        );
        assert_eq!(
            validate_url("invalid-url").unwrap_err().to_string(),
            "Invalid URL: invalid-url"
        );
        assert_eq!(
            validate_url("https://example.com").unwrap().as_str(),
            "https://example.com/"
        );
    }
}

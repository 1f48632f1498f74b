//! Minimal HTML helpers for RichText message bodies

/// Strip HTML tags from content for CLI display.
pub fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// HTML-escape text for embedding in Teams RichText/Html messages.
pub fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Hi <b>there</b></p>"), "Hi there");
        assert_eq!(strip_html("a &amp;lt; b"), "a &lt; b");
    }

    #[test]
    fn test_escape_then_strip() {
        let text = "if a < b && c > \"d\"";
        assert_eq!(strip_html(&format!("<p>{}</p>", html_escape(text))), text);
    }
}

use crate::lookup::LookupDetails;

/// Escape text for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `sim_lock_status` -> `Sim Lock Status`. Existing capitals are kept.
pub fn humanize_key(key: &str) -> String {
    key.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render lookup detail fields as Telegram HTML, one `<b>Key</b>: value` per line.
pub fn format_details(details: &LookupDetails) -> String {
    let mut lines: Vec<String> = details
        .fields
        .iter()
        .map(|(k, v)| format!("<b>{}</b>: {}", escape_html(&humanize_key(k)), escape_html(v)))
        .collect();

    if let Some(status) = details.status.as_deref() {
        lines.push(format!("<b>Status</b>: {}", escape_html(&humanize_key(status))));
    }

    if lines.is_empty() {
        return "No specific details available.".to_string();
    }
    lines.join("\n")
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn humanizes_keys() {
        assert_eq!(humanize_key("sim_lock_status"), "Sim Lock Status");
        assert_eq!(humanize_key("IMEI"), "IMEI");
        assert_eq!(humanize_key("result"), "Result");
        assert_eq!(humanize_key("__model__"), "Model");
    }

    #[test]
    fn formats_fields_in_order_with_status() {
        let d = LookupDetails {
            fields: vec![
                ("model".to_string(), "iPhone <13>".to_string()),
                ("carrier".to_string(), "AT&T".to_string()),
            ],
            status: Some("success".to_string()),
        };
        assert_eq!(
            format_details(&d),
            "<b>Model</b>: iPhone &lt;13&gt;\n<b>Carrier</b>: AT&amp;T\n<b>Status</b>: Success"
        );
    }

    #[test]
    fn empty_details_have_placeholder() {
        assert_eq!(
            format_details(&LookupDetails::default()),
            "No specific details available."
        );
    }

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(510);
        let t = truncate_text(&s, 500);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), 503);
        assert_eq!(truncate_text("short", 500), "short");
    }
}

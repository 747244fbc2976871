use std::borrow::Cow;

pub fn make_single_line(s: &str) -> Cow<str> {
    if s.contains('\n') {
        Cow::Owned(s.replace('\n', "↵"))
    } else {
        Cow::Borrowed(s)
    }
}

/// Escapes text for use inside an HTML element or attribute
pub fn escape_html(s: &str) -> Cow<str> {
    if !s.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

//! Codec for the single-element key file schema:
//! `<element Name="value" .../>`.
//!
//! Only what the key formats need is supported: one self-closing (or
//! immediately closed) element, quoted attribute values, no entities.

/// A parsed key element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeyElement {
    pub name: String,
    attributes: Vec<(String, String)>,
}

impl KeyElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Writes `<name a="1" b="2"/>`.
pub(crate) fn write_element(name: &str, attributes: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(
        name.len() + 4 + attributes.iter().map(|(k, v)| k.len() + v.len() + 4).sum::<usize>(),
    );
    out.push('<');
    out.push_str(name);
    for (key, value) in attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(value);
        out.push('"');
    }
    out.push_str("/>");
    out
}

/// Parses one element. Returns `None` on any structural problem, including
/// duplicate attributes and trailing content.
pub(crate) fn parse_element(input: &str) -> Option<KeyElement> {
    let mut rest = input.trim().strip_prefix('<')?;

    let name_len = rest
        .find(|c: char| !is_name_char(c))
        .unwrap_or(rest.len());
    if name_len == 0 {
        return None;
    }
    let name = rest[..name_len].to_string();
    rest = &rest[name_len..];

    let mut attributes: Vec<(String, String)> = Vec::new();
    loop {
        let trimmed = rest.trim_start();
        let had_space = trimmed.len() != rest.len();
        rest = trimmed;

        if let Some(after) = rest.strip_prefix("/>") {
            if !after.trim().is_empty() {
                return None;
            }
            break;
        }
        if let Some(after) = rest.strip_prefix('>') {
            let closing = format!("</{}>", name);
            if after.trim() != closing {
                return None;
            }
            break;
        }
        if !had_space {
            return None;
        }

        let key_len = rest.find(|c: char| !is_name_char(c)).unwrap_or(rest.len());
        if key_len == 0 {
            return None;
        }
        let key = &rest[..key_len];
        rest = rest[key_len..].trim_start().strip_prefix('=')?.trim_start();

        let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        rest = &rest[1..];
        let end = rest.find(quote)?;
        let value = &rest[..end];
        if value.contains('<') || value.contains('&') {
            return None;
        }
        rest = &rest[end + 1..];

        if attributes.iter().any(|(existing, _)| existing == key) {
            return None;
        }
        attributes.push((key.to_string(), value.to_string()));
    }

    Some(KeyElement { name, attributes })
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

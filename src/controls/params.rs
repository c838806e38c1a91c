//! Parsing of `name=value` control directives.

use log::warn;

/// One user-supplied control directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Control name or generated identifier, matched case-insensitively.
    pub name: String,
    /// Raw value; multi-value controls are pipe-delimited.
    pub value: String,
}

impl Param {
    /// Build a directive from its parts.
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The value as an integer, accepting a fractional part by truncation.
    pub fn int_value(&self) -> Option<i64> {
        let value = self.value.trim();
        value.parse::<i64>().ok().or_else(|| {
            #[allow(clippy::cast_possible_truncation)]
            value.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64)
        })
    }
}

/// Split a directive string into items.
///
/// Items are separated by commas outside double quotes. Surrounding
/// whitespace and quotes are stripped from names and values; items without
/// `=` are skipped with a warning.
pub fn parse_params(input: &str) -> Vec<Param> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in input.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                current.push(ch);
            }
            ',' if !quoted => items.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    items.push(current);

    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .filter_map(|item| {
            let Some((name, value)) = item.split_once('=') else {
                warn!("Ignoring control directive without a value: {item}");
                return None;
            };
            let name = unquote(name.trim());
            if name.is_empty() {
                warn!("Ignoring control directive without a name: {item}");
                return None;
            }
            Some(Param::new(name, unquote(value.trim())))
        })
        .collect()
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(text)
}

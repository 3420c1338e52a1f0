//! Identifier quoting and literal escaping

use crate::Value;

/// Dialect-aware quoting for identifiers and string literals.
///
/// Every SQL-building component goes through an `Escaper` so that quoting rules
/// live in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escaper {
    identifier_quote: char,
}

impl Default for Escaper {
    fn default() -> Self {
        Self::new('`')
    }
}

impl Escaper {
    pub const fn new(identifier_quote: char) -> Self {
        Self { identifier_quote }
    }

    pub fn identifier_quote(&self) -> char {
        self.identifier_quote
    }

    /// Wrap `name` in the dialect's identifier quote, doubling any embedded
    /// quote characters. `*` is passed through unquoted.
    pub fn quote_identifier(&self, name: &str) -> String {
        if name == "*" {
            return name.to_string();
        }
        let q = self.identifier_quote;
        let mut quoted = String::with_capacity(name.len() + 2);
        quoted.push(q);
        for ch in name.chars() {
            if ch == q {
                quoted.push(q);
            }
            quoted.push(ch);
        }
        quoted.push(q);
        quoted
    }

    /// Quote and dot-join the non-empty parts of a qualified name, e.g.
    /// `schema.table` or `dataset.table`.
    pub fn quote_qualified<'a>(&self, parts: impl IntoIterator<Item = Option<&'a str>>) -> String {
        parts
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .map(|part| self.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Strip statement terminators from a value that will be spliced into SQL
    /// without parameter binding.
    pub fn escape_literal(&self, value: Option<&str>) -> Option<String> {
        value.map(|v| v.replace(';', ""))
    }

    /// Double single quotes so the value can sit inside a `'...'` literal.
    pub fn escape_string(&self, value: Option<&str>) -> Option<String> {
        value.map(|v| v.replace('\'', "''"))
    }

    /// Render a value as an SQL literal for statements written to files.
    pub fn render_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
            Value::Int32(i) => i.to_string(),
            Value::Int64(i) => i.to_string(),
            Value::Float64(f) if f.is_finite() => f.to_string(),
            Value::Float64(_) => "NULL".to_string(),
            Value::Decimal(d) => d.clone(),
            Value::Bytes(b) => format!("X'{}'", hex::encode(b)),
            other => {
                let text = other.to_text().unwrap_or_default();
                format!("'{}'", text.replace('\'', "''"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers_with_backticks() {
        let escaper = Escaper::default();
        assert_eq!(escaper.quote_identifier("users"), "`users`");
        assert_eq!(escaper.quote_identifier("we`ird"), "`we``ird`");
        assert_eq!(escaper.quote_identifier("*"), "*");
    }

    #[test]
    fn double_quote_dialect() {
        let escaper = Escaper::new('"');
        assert_eq!(escaper.quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn qualified_names_skip_missing_parts() {
        let escaper = Escaper::default();
        assert_eq!(
            escaper.quote_qualified([Some("main"), None, Some("users")]),
            "`main`.`users`"
        );
        assert_eq!(escaper.quote_qualified([Some(""), Some("t")]), "`t`");
    }

    #[test]
    fn literal_escapers_pass_through_absent_values() {
        let escaper = Escaper::default();
        assert_eq!(escaper.escape_literal(None), None);
        assert_eq!(escaper.escape_string(None), None);
        assert_eq!(
            escaper.escape_literal(Some("1; DROP TABLE x")).as_deref(),
            Some("1 DROP TABLE x")
        );
        assert_eq!(
            escaper.escape_string(Some("O'Brien")).as_deref(),
            Some("O''Brien")
        );
    }

    #[test]
    fn renders_literals() {
        let escaper = Escaper::default();
        assert_eq!(escaper.render_literal(&Value::Null), "NULL");
        assert_eq!(escaper.render_literal(&Value::Bool(true)), "1");
        assert_eq!(escaper.render_literal(&Value::Float64(f64::NAN)), "NULL");
        assert_eq!(escaper.render_literal(&Value::String("it's".into())), "'it''s'");
        assert_eq!(escaper.render_literal(&Value::Bytes(vec![0xab])), "X'ab'");
    }
}

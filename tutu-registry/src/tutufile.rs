//! Tutufile parsing: the small directive file behind `create`.
//!
//! ```text
//! FROM llama3
//! PARAMETER temperature 0.2
//! SYSTEM You answer in haiku.
//! ```
//!
//! `FROM` is required; directives are case-insensitive; `#` starts a
//! comment line.

/// A parsed Tutufile.
#[derive(Debug, Clone, PartialEq)]
pub struct Tutufile {
    /// The base model reference (or an opaque marker like `scratch`).
    pub from: String,
    /// `PARAMETER <key> <value>` pairs in file order.
    pub parameters: Vec<(String, String)>,
    /// Concatenated `SYSTEM` text, if any.
    pub system: Option<String>,
}

impl Tutufile {
    /// Parse Tutufile contents.
    pub fn parse(contents: &str) -> Result<Self, String> {
        let mut from = None;
        let mut parameters = Vec::new();
        let mut system: Option<String> = None;

        for (lineno, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (directive, rest) = match line.split_once(char::is_whitespace) {
                Some((d, r)) => (d, r.trim()),
                None => (line, ""),
            };
            match directive.to_ascii_uppercase().as_str() {
                "FROM" => {
                    if rest.is_empty() {
                        return Err(format!("line {}: FROM needs a value", lineno + 1));
                    }
                    from = Some(rest.to_string());
                }
                "PARAMETER" => {
                    let Some((key, value)) = rest.split_once(char::is_whitespace) else {
                        return Err(format!(
                            "line {}: PARAMETER needs a key and a value",
                            lineno + 1
                        ));
                    };
                    parameters.push((key.to_string(), value.trim().to_string()));
                }
                "SYSTEM" => match &mut system {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(rest);
                    }
                    None => system = Some(rest.to_string()),
                },
                other => {
                    return Err(format!("line {}: unknown directive {other}", lineno + 1));
                }
            }
        }

        Ok(Self {
            from: from.ok_or("Tutufile has no FROM directive")?,
            parameters,
            system,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_directives() {
        let parsed = Tutufile::parse(
            "# a comment\nFROM llama3\nPARAMETER temperature 0.2\nPARAMETER top_p 0.5\nSYSTEM be brief\n",
        )
        .unwrap();
        assert_eq!(parsed.from, "llama3");
        assert_eq!(
            parsed.parameters,
            vec![
                ("temperature".to_string(), "0.2".to_string()),
                ("top_p".to_string(), "0.5".to_string())
            ]
        );
        assert_eq!(parsed.system.as_deref(), Some("be brief"));
    }

    #[test]
    fn directives_are_case_insensitive() {
        let parsed = Tutufile::parse("from llama3\nsystem hi\n").unwrap();
        assert_eq!(parsed.from, "llama3");
        assert_eq!(parsed.system.as_deref(), Some("hi"));
    }

    #[test]
    fn missing_from_is_an_error() {
        let err = Tutufile::parse("SYSTEM hi\n").unwrap_err();
        assert!(err.contains("FROM"));
    }

    #[test]
    fn unknown_directive_is_an_error() {
        let err = Tutufile::parse("FROM x\nADAPTER y\n").unwrap_err();
        assert!(err.contains("ADAPTER"));
    }

    #[test]
    fn multiple_system_lines_concatenate() {
        let parsed = Tutufile::parse("FROM x\nSYSTEM a\nSYSTEM b\n").unwrap();
        assert_eq!(parsed.system.as_deref(), Some("a\nb"));
    }

    #[test]
    fn from_without_value_is_an_error() {
        let err = Tutufile::parse("FROM\n").unwrap_err();
        assert!(err.contains("FROM"));
    }
}

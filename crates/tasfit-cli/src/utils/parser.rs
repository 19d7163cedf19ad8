use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid --set format: '{0}'. Expected KEY=VALUE.")]
    MissingEquals(String),

    #[error("Empty key segment in '{0}'.")]
    EmptyKey(String),

    #[error("Cannot set '{key}': '{segment}' is not a table.")]
    NotATable { key: String, segment: String },
}

/// A parsed `-S key.path=value` override.
#[derive(Debug, Clone, PartialEq)]
pub struct SetValue {
    pub path: Vec<String>,
    pub value: toml::Value,
}

/// Splits `a.b.c=value` into its key path and a TOML value.
///
/// The value is read as a TOML literal (`500`, `1e-5`, `true`, `[1, 2]`,
/// `"text"`); anything that does not parse as one is taken as a bare string.
pub fn parse_set_value(raw: &str) -> Result<SetValue, ParseError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| ParseError::MissingEquals(raw.to_string()))?;
    let path: Vec<String> = key.trim().split('.').map(|s| s.trim().to_string()).collect();
    if path.iter().any(String::is_empty) {
        return Err(ParseError::EmptyKey(raw.to_string()));
    }
    Ok(SetValue {
        path,
        value: parse_literal(value.trim()),
    })
}

fn parse_literal(text: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {text}"))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .unwrap_or_else(|| toml::Value::String(text.to_string()))
}

/// Writes `set` into `table`, creating intermediate tables as needed.
pub fn apply_set_value(table: &mut toml::Table, set: SetValue) -> Result<(), ParseError> {
    let key = set.path.join(".");
    let Some((last, parents)) = set.path.split_last() else {
        return Err(ParseError::EmptyKey(key));
    };
    let mut current = table;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        current = entry.as_table_mut().ok_or_else(|| ParseError::NotATable {
            key: key.clone(),
            segment: segment.clone(),
        })?;
    }
    current.insert(last.clone(), set.value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_typed_as_toml_literals() {
        let set = parse_set_value("fitter.max_calls=500").unwrap();
        assert_eq!(set.path, ["fitter", "max_calls"]);
        assert_eq!(set.value, toml::Value::Integer(500));

        assert_eq!(
            parse_set_value("fitter.tolerance = 1e-5").unwrap().value,
            toml::Value::Float(1e-5)
        );
        assert_eq!(
            parse_set_value("input.normalize_to_monitor=true").unwrap().value,
            toml::Value::Boolean(true)
        );
        assert_eq!(
            parse_set_value("input.model=dho").unwrap().value,
            toml::Value::String("dho".to_string())
        );
    }

    #[test]
    fn malformed_pairs_are_rejected() {
        assert_eq!(
            parse_set_value("fitter.max_calls"),
            Err(ParseError::MissingEquals("fitter.max_calls".to_string()))
        );
        assert!(matches!(
            parse_set_value("fitter..max_calls=3"),
            Err(ParseError::EmptyKey(_))
        ));
    }

    #[test]
    fn nested_tables_are_created() {
        let mut table = toml::Table::new();
        apply_set_value(&mut table, parse_set_value("resolution.fixed.e=0.2").unwrap()).unwrap();
        assert_eq!(
            table["resolution"]["fixed"]["e"],
            toml::Value::Float(0.2)
        );
    }

    #[test]
    fn scalar_parents_are_an_error() {
        let mut table: toml::Table = toml::from_str("fitter = 3").unwrap();
        let err = apply_set_value(&mut table, parse_set_value("fitter.patience=2").unwrap());
        assert!(matches!(err, Err(ParseError::NotATable { .. })));
    }
}

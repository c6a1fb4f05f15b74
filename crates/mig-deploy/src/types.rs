//! Column type and expression normalization for catalog comparison.

const INTEGER_LADDER: [&str; 5] = ["TINYINT", "SMALLINT", "INTEGER", "BIGINT", "HUGEINT"];

/// Canonical spelling of a DuckDB type name.
///
/// Aliases collapse to the name DuckDB reports in its catalog, string
/// lengths are dropped (DuckDB ignores them) and any collation suffix is
/// removed.
pub fn normalize_type(raw: &str) -> String {
    let mut upper = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase();
    if let Some(pos) = upper.find(" COLLATE ") {
        upper.truncate(pos);
    }

    let (base, args) = match upper.find('(') {
        Some(pos) => (upper[..pos].trim(), Some(upper[pos..].replace(' ', ""))),
        None => (upper.as_str(), None),
    };

    let canonical = match base {
        "INT" | "INT4" | "INTEGER" | "SIGNED" => "INTEGER",
        "BIGINT" | "INT8" | "LONG" => "BIGINT",
        "SMALLINT" | "INT2" | "SHORT" => "SMALLINT",
        "TINYINT" | "INT1" => "TINYINT",
        "HUGEINT" | "INT128" => "HUGEINT",
        "BOOL" | "BOOLEAN" | "LOGICAL" => "BOOLEAN",
        "REAL" | "FLOAT4" | "FLOAT" => "FLOAT",
        "DOUBLE" | "FLOAT8" | "DOUBLE PRECISION" => "DOUBLE",
        "BLOB" | "BYTEA" | "BINARY" | "VARBINARY" => "BLOB",
        "DATETIME" | "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" => "TIMESTAMP",
        "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => "TIMESTAMP WITH TIME ZONE",
        "VARCHAR" | "TEXT" | "STRING" | "CHAR" | "BPCHAR" | "NVARCHAR" | "CHARACTER"
        | "CHARACTER VARYING" => return "VARCHAR".to_string(),
        "DECIMAL" | "NUMERIC" => {
            return match args.as_deref() {
                None => "DECIMAL(18,3)".to_string(),
                Some(a) if !a.contains(',') => {
                    format!("DECIMAL{},0)", a.trim_end_matches(')'))
                }
                Some(a) => format!("DECIMAL{}", a),
            };
        }
        other => other,
    };

    match args {
        Some(a) => format!("{}{}", canonical, a),
        None => canonical.to_string(),
    }
}

/// Whether converting existing values from `from` to `to` cannot lose data
pub fn is_widening(from: &str, to: &str) -> bool {
    let (from, to) = (normalize_type(from), normalize_type(to));
    if from == to || to == "VARCHAR" {
        return true;
    }
    if from == "FLOAT" && to == "DOUBLE" {
        return true;
    }
    match (
        INTEGER_LADDER.iter().position(|t| *t == from),
        INTEGER_LADDER.iter().position(|t| *t == to),
    ) {
        (Some(f), Some(t)) => f <= t,
        _ => false,
    }
}

/// Placeholder value for filling a new NOT NULL column on existing rows
pub fn smart_default(data_type: &str) -> Option<&'static str> {
    let normalized = normalize_type(data_type);
    if INTEGER_LADDER.contains(&normalized.as_str())
        || normalized.starts_with("DECIMAL")
        || normalized.starts_with("UTINYINT")
        || normalized.starts_with("USMALLINT")
        || normalized.starts_with("UINTEGER")
        || normalized.starts_with("UBIGINT")
        || normalized == "FLOAT"
        || normalized == "DOUBLE"
    {
        return Some("0");
    }
    let value = match normalized.as_str() {
        "VARCHAR" => "''",
        "BOOLEAN" => "false",
        "DATE" => "DATE '1900-01-01'",
        "TIME" => "TIME '00:00:00'",
        "TIMESTAMP" => "TIMESTAMP '1900-01-01 00:00:00'",
        "TIMESTAMP WITH TIME ZONE" => "TIMESTAMPTZ '1900-01-01 00:00:00+00'",
        "UUID" => "'00000000-0000-0000-0000-000000000000'",
        "BLOB" => "''::BLOB",
        _ => return None,
    };
    Some(value)
}

/// Canonical form of a default expression, for equality only
pub fn normalize_expr(expr: &str) -> String {
    let mut out = expr.split_whitespace().collect::<Vec<_>>().join(" ");
    while out.starts_with('(') && out.ends_with(')') && balanced(&out[1..out.len() - 1]) {
        out = out[1..out.len() - 1].trim().to_string();
    }

    // keywords fold, string literals keep their case
    let mut in_literal = false;
    out.chars()
        .map(|c| {
            if c == '\'' {
                in_literal = !in_literal;
            }
            if in_literal {
                c
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect()
}

fn balanced(s: &str) -> bool {
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

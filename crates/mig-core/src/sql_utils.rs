//! SQL identifier and literal quoting for generated DDL.

/// Quote a SQL identifier, doubling embedded double quotes.
///
/// # Examples
/// ```
/// use mig_core::sql_utils::quote_ident;
/// assert_eq!(quote_ident("orders"), r#""orders""#);
/// assert_eq!(quote_ident(r#"my"col"#), r#""my""col""#);
/// ```
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote `schema.name` with each part quoted separately.
///
/// # Examples
/// ```
/// use mig_core::sql_utils::qualify;
/// assert_eq!(qualify("main", "orders"), r#""main"."orders""#);
/// ```
pub fn qualify(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

//! Script analysis

use sqlparser::ast::Statement;
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

const TRANSACTION_KEYWORDS: [&str; 7] = [
    "BEGIN", "START", "COMMIT", "ROLLBACK", "END", "ABORT", "SAVEPOINT",
];

/// Whether a script issues its own transaction control statements.
///
/// Such scripts run as written; every other script is wrapped in a single
/// transaction by the executor.
pub fn controls_transactions(sql: &str) -> bool {
    let dialect = DuckDbDialect {};
    match Parser::parse_sql(&dialect, sql) {
        Ok(statements) => statements.iter().any(is_transaction_control),
        Err(e) => {
            log::debug!("Script not parsed ({}), scanning tokens instead", e);
            leading_keywords(sql)
                .iter()
                .any(|kw| TRANSACTION_KEYWORDS.contains(&kw.as_str()))
        }
    }
}

fn is_transaction_control(statement: &Statement) -> bool {
    matches!(
        statement,
        Statement::StartTransaction { .. }
            | Statement::Commit { .. }
            | Statement::Rollback { .. }
            | Statement::Savepoint { .. }
            | Statement::ReleaseSavepoint { .. }
    )
}

/// First keyword of every statement, uppercased
fn leading_keywords(sql: &str) -> Vec<String> {
    let dialect = DuckDbDialect {};
    let Ok(tokens) = Tokenizer::new(&dialect, sql).tokenize() else {
        return Vec::new();
    };

    let mut keywords = Vec::new();
    let mut at_start = true;
    for token in tokens {
        match token {
            Token::Whitespace(_) => {}
            Token::SemiColon => at_start = true,
            Token::Word(word) if at_start => {
                keywords.push(word.value.to_ascii_uppercase());
                at_start = false;
            }
            _ => at_start = false,
        }
    }
    keywords
}

//! SQL text helpers: statement splitting and transaction-safety detection.

/// Split SQL into individual statements.
///
/// Semicolons inside single-quoted strings, double-quoted identifiers,
/// dollar-quoted bodies (`$$` or `$tag$`), line comments and block comments do
/// not terminate a statement. Fragments that contain only comments or
/// whitespace are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = skip_quoted(&chars, i, c);
                current.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map_or(chars.len(), |p| i + p + 1);
                current.extend(&chars[i..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = skip_block_comment(&chars, i);
                current.extend(&chars[i..end]);
                i = end;
            }
            '$' => match dollar_tag(&chars, i) {
                Some(tag) => {
                    let end = skip_dollar_quoted(&chars, i, &tag);
                    current.extend(&chars[i..end]);
                    i = end;
                }
                None => {
                    current.push(c);
                    i += 1;
                }
            },
            ';' => {
                push_statement(&mut statements, &current);
                current.clear();
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }
    push_statement(&mut statements, &current);

    statements
}

/// Whether the SQL contains a statement PostgreSQL refuses to run inside a
/// transaction block.
pub fn requires_no_transaction(sql: &str) -> bool {
    split_statements(sql)
        .iter()
        .map(|stmt| normalize(&strip_comments(stmt)))
        .any(|stmt| is_non_transactional(&stmt))
}

fn is_non_transactional(stmt: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "VACUUM",
        "CREATE DATABASE",
        "DROP DATABASE",
        "ALTER SYSTEM",
        "CREATE TABLESPACE",
        "DROP TABLESPACE",
    ];

    if PREFIXES.iter().any(|p| starts_with_keyword(stmt, p)) {
        return true;
    }

    let concurrent_index = (starts_with_keyword(stmt, "CREATE INDEX")
        || starts_with_keyword(stmt, "CREATE UNIQUE INDEX")
        || starts_with_keyword(stmt, "DROP INDEX")
        || starts_with_keyword(stmt, "REINDEX"))
        && stmt.split(' ').any(|word| word == "CONCURRENTLY");

    let enum_value = starts_with_keyword(stmt, "ALTER TYPE") && stmt.contains(" ADD VALUE");

    concurrent_index || enum_value
}

fn starts_with_keyword(stmt: &str, keyword: &str) -> bool {
    stmt.strip_prefix(keyword)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}

/// Uppercase and collapse whitespace.
fn normalize(stmt: &str) -> String {
    stmt.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn strip_comments(stmt: &str) -> String {
    let chars: Vec<char> = stmt.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '-' if chars.get(i + 1) == Some(&'-') => {
                i = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map_or(chars.len(), |p| i + p + 1);
                out.push(' ');
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i = skip_block_comment(&chars, i);
                out.push(' ');
            }
            '\'' | '"' => {
                let end = skip_quoted(&chars, i, chars[i]);
                out.extend(&chars[i..end]);
                i = end;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn push_statement(statements: &mut Vec<String>, current: &str) {
    let stmt = current.trim();
    if !stmt.is_empty() && !strip_comments(stmt).trim().is_empty() {
        statements.push(stmt.to_string());
    }
}

/// Index just past the closing quote; doubled quotes are escapes, and so is
/// a backslash inside an `E'...'` string.
fn skip_quoted(chars: &[char], start: usize, quote: char) -> usize {
    let backslash_escapes = quote == '\'' && is_escape_string(chars, start);
    let mut i = start + 1;
    while i < chars.len() {
        if backslash_escapes && chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// Whether the quote at `start` opens an `E'...'` escape string literal.
fn is_escape_string(chars: &[char], start: usize) -> bool {
    let Some(prefix) = start.checked_sub(1).map(|i| chars[i]) else {
        return false;
    };
    if !matches!(prefix, 'E' | 'e') {
        return false;
    }
    // `nameE'...'` is an identifier followed by a plain string.
    start
        .checked_sub(2)
        .map(|i| chars[i])
        .is_none_or(|c| !(c.is_alphanumeric() || c == '_' || c == '$'))
}

/// Index just past `*/`; block comments nest in PostgreSQL.
fn skip_block_comment(chars: &[char], start: usize) -> usize {
    let mut depth = 0;
    let mut i = start;
    while i + 1 < chars.len() {
        if chars[i] == '/' && chars[i + 1] == '*' {
            depth += 1;
            i += 2;
        } else if chars[i] == '*' && chars[i + 1] == '/' {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    chars.len()
}

/// The `$tag$` opening at `start`, if any.
fn dollar_tag(chars: &[char], start: usize) -> Option<String> {
    // `$1` is a positional parameter, not a quote.
    if chars
        .get(start + 1)
        .is_some_and(|c| c.is_ascii_digit())
    {
        return None;
    }
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '$' {
            return Some(chars[start..=i].iter().collect());
        }
        if !(c.is_alphanumeric() || c == '_') {
            return None;
        }
        i += 1;
    }
    None
}

fn skip_dollar_quoted(chars: &[char], start: usize, tag: &str) -> usize {
    let tag: Vec<char> = tag.chars().collect();
    let mut i = start + tag.len();
    while i + tag.len() <= chars.len() {
        if chars[i..i + tag.len()] == tag[..] {
            return i + tag.len();
        }
        i += 1;
    }
    chars.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple_statements() {
        let stmts = split_statements("SELECT 1; SELECT 2; SELECT 3;");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2", "SELECT 3"]);
    }

    #[test]
    fn test_split_without_trailing_semicolon() {
        let stmts = split_statements("SELECT 1;\nSELECT 2");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_split_with_dollar_quoted_function() {
        let sql = r#"
CREATE FUNCTION test() RETURNS void AS $$
BEGIN
    SELECT 1;
    SELECT 2;
END;
$$ LANGUAGE plpgsql;

SELECT 3;
"#;
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("$$ LANGUAGE plpgsql"));
        assert_eq!(stmts[1], "SELECT 3");
    }

    #[test]
    fn test_split_with_tagged_dollar_quote() {
        let sql = "CREATE FUNCTION f() RETURNS text AS $body$ SELECT 'a;b' $body$ LANGUAGE sql; SELECT 1;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].ends_with("LANGUAGE sql"));
    }

    #[test]
    fn test_split_respects_quotes_and_comments() {
        let sql = "INSERT INTO t VALUES ('a;b', 'it''s');\n-- comment; still comment\nSELECT \"x;y\" FROM t; /* block; */ SELECT 2;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[0], "INSERT INTO t VALUES ('a;b', 'it''s')");
        assert!(stmts[1].ends_with("SELECT \"x;y\" FROM t"));
        assert!(stmts[2].ends_with("SELECT 2"));
    }

    #[test]
    fn test_split_escape_string_literal() {
        let sql = "INSERT INTO t VALUES (E'it\\'s; fine');\nCREATE INDEX CONCURRENTLY i ON t (a);";
        let stmts = split_statements(sql);
        assert_eq!(
            stmts,
            vec![
                "INSERT INTO t VALUES (E'it\\'s; fine')",
                "CREATE INDEX CONCURRENTLY i ON t (a)",
            ]
        );
        assert!(requires_no_transaction(sql));
    }

    #[test]
    fn test_backslash_is_literal_in_standard_strings() {
        let stmts = split_statements(r"SELECT 'C:\'; SELECT type'x\'; SELECT 2;");
        assert_eq!(stmts, vec![r"SELECT 'C:\'", r"SELECT type'x\'", "SELECT 2"]);
    }

    #[test]
    fn test_split_drops_comment_only_fragments() {
        let stmts = split_statements("-- just a comment\n;\n/* another */;");
        assert!(stmts.is_empty());
    }

    #[test]
    fn test_positional_parameter_is_not_a_quote() {
        let stmts = split_statements("SELECT $1; SELECT $2;");
        assert_eq!(stmts, vec!["SELECT $1", "SELECT $2"]);
    }

    #[test]
    fn test_requires_no_transaction() {
        assert!(requires_no_transaction(
            "CREATE INDEX CONCURRENTLY idx_users_email ON users (email);"
        ));
        assert!(requires_no_transaction(
            "create unique index\n  concurrently idx ON t (a);"
        ));
        assert!(requires_no_transaction("DROP INDEX CONCURRENTLY idx;"));
        assert!(requires_no_transaction("VACUUM ANALYZE users;"));
        assert!(requires_no_transaction("ALTER TYPE mood ADD VALUE 'meh';"));
        assert!(requires_no_transaction(
            "CREATE TABLE t (id int);\nCREATE DATABASE other;"
        ));
    }

    #[test]
    fn test_transactional_sql() {
        assert!(!requires_no_transaction("CREATE INDEX idx ON users (email);"));
        assert!(!requires_no_transaction(
            "-- CREATE INDEX CONCURRENTLY idx ON t (a);\nCREATE TABLE t (id int);"
        ));
        assert!(!requires_no_transaction(
            "INSERT INTO notes VALUES ('VACUUM later');"
        ));
        assert!(!requires_no_transaction("CREATE TABLE vacuum_log (id int);"));
    }
}

use crate::config::DEFAULT_TABLE;
use banquet_parser::Banquet;
use serde_json::Value;

/// Compiler settings derived from [`ServerConfig`](crate::config::ServerConfig).
#[derive(Debug, Clone)]
pub struct SqlOptions {
    pub default_table: String,
    pub hardened: bool,
}

impl Default for SqlOptions {
    fn default() -> Self {
        Self {
            default_table: DEFAULT_TABLE.to_string(),
            hardened: false,
        }
    }
}

/// SQL text plus bind arguments ready for execution.
///
/// The argument list is empty today: clause fragments arrive as opaque text
/// and are spliced in as-is. It stays on the type so value binding can be
/// added without touching callers.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub text: String,
    pub args: Vec<Value>,
}

/// Compile a descriptor into a single read-only SELECT.
///
/// Pure and deterministic. Clauses are emitted in fixed order, each only
/// when its source field is non-empty: `SELECT .. FROM ..`, `WHERE`,
/// `ORDER BY [direction]`, `GROUP BY`, `HAVING`, `LIMIT`, `OFFSET`.
pub fn compile(b: &Banquet, opts: &SqlOptions) -> Result<CompiledStatement, String> {
    let table = if b.table.is_empty() {
        opts.default_table.as_str()
    } else {
        b.table.as_str()
    };
    if opts.hardened {
        check_identifier(table)?;
    }

    let select_clause = select_clause(b, table, opts)?;

    let mut text = format!(
        "SELECT {} FROM {}",
        select_clause,
        render_identifier(table, opts)
    );

    if !b.where_clause.is_empty() {
        text.push_str(" WHERE ");
        text.push_str(&b.where_clause);
    }

    if !b.order_by.is_empty() {
        text.push_str(" ORDER BY ");
        text.push_str(&b.order_by);
        if let Some(dir) = b.sort.as_sql() {
            text.push(' ');
            text.push_str(dir);
        }
    }

    if !b.group_by.is_empty() {
        text.push_str(" GROUP BY ");
        text.push_str(&b.group_by);
    }

    if !b.having.is_empty() {
        text.push_str(" HAVING ");
        text.push_str(&b.having);
    }

    if !b.limit.is_empty() {
        check_bound("limit", &b.limit, opts)?;
        text.push_str(" LIMIT ");
        text.push_str(&b.limit);
    }

    if !b.offset.is_empty() {
        check_bound("offset", &b.offset, opts)?;
        text.push_str(" OFFSET ");
        text.push_str(&b.offset);
    }

    Ok(CompiledStatement {
        text,
        args: Vec::new(),
    })
}

/// Resolve the select list. Entries equal to the resolved table name are
/// dropped: the upstream URL parser is known to leak the table name into
/// the select list, and a leaked name must not reach the store. When
/// nothing survives the filter the clause collapses to `*`.
fn select_clause(b: &Banquet, table: &str, opts: &SqlOptions) -> Result<String, String> {
    if b.select.is_empty() || b.select[0] == "*" {
        return Ok("*".to_string());
    }

    let kept: Vec<&str> = b
        .select
        .iter()
        .map(String::as_str)
        .filter(|col| *col != table)
        .collect();
    if kept.is_empty() {
        return Ok("*".to_string());
    }

    if opts.hardened {
        for col in &kept {
            check_identifier(col)?;
        }
    }
    let rendered: Vec<String> = kept
        .iter()
        .map(|col| render_identifier(col, opts))
        .collect();
    Ok(rendered.join(", "))
}

fn render_identifier(ident: &str, opts: &SqlOptions) -> String {
    if opts.hardened {
        // safe to wrap: check_identifier already excluded quote characters
        format!("\"{}\"", ident)
    } else {
        ident.to_string()
    }
}

/// Allow-list for identifiers in hardened mode: ASCII letters, digits and
/// underscore, not starting with a digit.
pub(crate) fn check_identifier(ident: &str) -> Result<(), String> {
    let mut chars = ident.chars();
    let ok = match chars.next() {
        Some(c) => {
            (c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("unsafe identifier '{}'", ident))
    }
}

fn check_bound(name: &str, value: &str, opts: &SqlOptions) -> Result<(), String> {
    if opts.hardened && value.parse::<u64>().is_err() {
        return Err(format!("{} must be a non-negative integer", name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use banquet_parser::SortDirection;

    fn descriptor() -> Banquet {
        Banquet::default()
    }

    #[test]
    fn empty_descriptor_selects_all_from_default_table() {
        let stmt = compile(&descriptor(), &SqlOptions::default()).unwrap();
        assert_eq!(stmt.text, "SELECT * FROM tb0");
        assert!(stmt.args.is_empty());
    }

    #[test]
    fn named_table_overrides_default() {
        let b = Banquet {
            table: "users".to_string(),
            ..descriptor()
        };
        let stmt = compile(&b, &SqlOptions::default()).unwrap();
        assert_eq!(stmt.text, "SELECT * FROM users");
    }

    #[test]
    fn select_list_joins_columns() {
        let b = Banquet {
            table: "users".to_string(),
            select: vec!["id".to_string(), "name".to_string()],
            ..descriptor()
        };
        let stmt = compile(&b, &SqlOptions::default()).unwrap();
        assert_eq!(stmt.text, "SELECT id, name FROM users");
    }

    #[test]
    fn leading_wildcard_short_circuits() {
        let b = Banquet {
            table: "users".to_string(),
            select: vec!["*".to_string(), "id".to_string()],
            ..descriptor()
        };
        let stmt = compile(&b, &SqlOptions::default()).unwrap();
        assert_eq!(stmt.text, "SELECT * FROM users");
    }

    #[test]
    fn table_name_is_filtered_from_select_list() {
        let b = Banquet {
            table: "users".to_string(),
            select: vec!["users".to_string(), "id".to_string()],
            ..descriptor()
        };
        let stmt = compile(&b, &SqlOptions::default()).unwrap();
        assert_eq!(stmt.text, "SELECT id FROM users");
    }

    #[test]
    fn select_list_of_only_the_table_name_collapses_to_wildcard() {
        let b = Banquet {
            table: "users".to_string(),
            select: vec!["users".to_string()],
            ..descriptor()
        };
        let stmt = compile(&b, &SqlOptions::default()).unwrap();
        assert_eq!(stmt.text, "SELECT * FROM users");
    }

    #[test]
    fn default_table_is_filtered_when_table_is_empty() {
        let b = Banquet {
            select: vec!["tb0".to_string()],
            ..descriptor()
        };
        let stmt = compile(&b, &SqlOptions::default()).unwrap();
        assert_eq!(stmt.text, "SELECT * FROM tb0");
    }

    #[test]
    fn clause_ordering_is_fixed() {
        let b = Banquet {
            table: "t".to_string(),
            where_clause: "a > 1".to_string(),
            group_by: "b".to_string(),
            having: "count(*) > 2".to_string(),
            order_by: "c".to_string(),
            sort: SortDirection::Descending,
            limit: "10".to_string(),
            offset: "5".to_string(),
            ..descriptor()
        };
        let stmt = compile(&b, &SqlOptions::default()).unwrap();
        assert_eq!(
            stmt.text,
            "SELECT * FROM t WHERE a > 1 ORDER BY c DESC GROUP BY b HAVING count(*) > 2 LIMIT 10 OFFSET 5"
        );
    }

    #[test]
    fn sort_direction_only_applies_with_order_by() {
        let b = Banquet {
            table: "t".to_string(),
            sort: SortDirection::Ascending,
            ..descriptor()
        };
        let stmt = compile(&b, &SqlOptions::default()).unwrap();
        assert_eq!(stmt.text, "SELECT * FROM t");
    }

    #[test]
    fn hardened_mode_quotes_identifiers() {
        let opts = SqlOptions {
            hardened: true,
            ..SqlOptions::default()
        };
        let b = Banquet {
            table: "users".to_string(),
            select: vec!["id".to_string(), "name".to_string()],
            ..descriptor()
        };
        let stmt = compile(&b, &opts).unwrap();
        assert_eq!(stmt.text, "SELECT \"id\", \"name\" FROM \"users\"");
    }

    #[test]
    fn hardened_mode_rejects_unsafe_table() {
        let opts = SqlOptions {
            hardened: true,
            ..SqlOptions::default()
        };
        let b = Banquet {
            table: "users; DROP TABLE users".to_string(),
            ..descriptor()
        };
        let err = compile(&b, &opts).unwrap_err();
        assert!(err.contains("unsafe identifier"));
    }

    #[test]
    fn hardened_mode_rejects_unsafe_select_entry() {
        let opts = SqlOptions {
            hardened: true,
            ..SqlOptions::default()
        };
        let b = Banquet {
            table: "users".to_string(),
            select: vec!["id, (SELECT 1)".to_string()],
            ..descriptor()
        };
        assert!(compile(&b, &opts).is_err());
    }

    #[test]
    fn hardened_mode_rejects_non_numeric_limit() {
        let opts = SqlOptions {
            hardened: true,
            ..SqlOptions::default()
        };
        let b = Banquet {
            table: "users".to_string(),
            limit: "10; --".to_string(),
            ..descriptor()
        };
        assert!(compile(&b, &opts).is_err());
    }

    #[test]
    fn relaxed_mode_passes_fragments_through() {
        let b = Banquet {
            table: "users".to_string(),
            limit: "10".to_string(),
            ..descriptor()
        };
        let stmt = compile(&b, &SqlOptions::default()).unwrap();
        assert_eq!(stmt.text, "SELECT * FROM users LIMIT 10");
    }
}

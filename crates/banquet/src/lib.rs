use std::fmt;

/// Error produced when a dataset URL cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Requested sort direction for the `orderby` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Ascending,
    Descending,
    #[default]
    Unset,
}

impl SortDirection {
    /// SQL keyword for this direction, or `None` when unset.
    pub fn as_sql(&self) -> Option<&'static str> {
        match self {
            SortDirection::Ascending => Some("ASC"),
            SortDirection::Descending => Some("DESC"),
            SortDirection::Unset => None,
        }
    }
}

/// Parsed representation of a banquet dataset URL.
///
/// A descriptor is immutable once produced; downstream consumers (the query
/// compiler in particular) read it but never modify it.
#[derive(Debug, Clone, Default)]
pub struct Banquet {
    /// Filesystem-like path to the backing store.
    pub dataset_path: String,
    /// Target table; empty means "use the server's default table".
    pub table: String,
    /// Column list; empty or leading `*` means all columns.
    pub select: Vec<String>,
    /// Raw clause fragments, kept opaque at this layer.
    pub where_clause: String,
    pub group_by: String,
    pub having: String,
    pub order_by: String,
    pub sort: SortDirection,
    /// String-encoded non-negative integers; empty means absent.
    pub limit: String,
    pub offset: String,
}

/// Parse a banquet dataset URL into a [`Banquet`] descriptor.
///
/// Grammar: `banquet://<dataset-path>[:<table>][?<params>]`, scheme optional.
/// Recognized params: `select`, `where`, `groupby`, `having`, `orderby`,
/// `sort` (`asc`/`desc`), `limit`, `offset`. Values are percent-decoded with
/// `+` treated as space. Unrecognized params are ignored.
pub fn parse_banquet(input: &str) -> Result<Banquet, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::new("empty banquet url"));
    }

    let rest = input.strip_prefix("banquet://").unwrap_or(input);

    let (location, params) = match rest.split_once('?') {
        Some((loc, p)) => (loc, Some(p)),
        None => (rest, None),
    };

    let (dataset_path, table) = split_location(location);
    if dataset_path.is_empty() {
        return Err(ParseError::new("missing dataset path"));
    }

    let mut banquet = Banquet {
        dataset_path: dataset_path.to_string(),
        table: table.to_string(),
        ..Banquet::default()
    };

    if let Some(params) = params {
        apply_params(&mut banquet, params)?;
    }

    Ok(banquet)
}

/// Split `<dataset-path>[:<table>]` at the last `:` whose right side looks
/// like a table name. Sentinels like `:memory:` stay intact because nothing
/// follows their trailing colon.
fn split_location(location: &str) -> (&str, &str) {
    if let Some(idx) = location.rfind(':') {
        let (path, after) = (&location[..idx], &location[idx + 1..]);
        if !path.is_empty() && !after.is_empty() && !after.contains('/') {
            return (path, after);
        }
    }
    (location, "")
}

fn apply_params(banquet: &mut Banquet, params: &str) -> Result<(), ParseError> {
    for pair in params.split('&').filter(|p| !p.is_empty()) {
        let (key, raw_value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let value = percent_decode(raw_value)
            .map_err(|e| ParseError::new(format!("param '{}': {}", key, e)))?;

        match key {
            "select" => {
                banquet.select = value
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "where" => banquet.where_clause = value,
            "groupby" => banquet.group_by = value,
            "having" => banquet.having = value,
            "orderby" => banquet.order_by = value,
            "sort" => banquet.sort = parse_sort(&value)?,
            "limit" => banquet.limit = parse_bound(key, value)?,
            "offset" => banquet.offset = parse_bound(key, value)?,
            // unknown params are ignored for forward compatibility
            _ => {}
        }
    }
    Ok(())
}

fn parse_sort(value: &str) -> Result<SortDirection, ParseError> {
    if value.is_empty() {
        return Ok(SortDirection::Unset);
    }
    match value.to_ascii_lowercase().as_str() {
        "asc" => Ok(SortDirection::Ascending),
        "desc" => Ok(SortDirection::Descending),
        other => Err(ParseError::new(format!(
            "invalid sort direction '{}', expected asc or desc",
            other
        ))),
    }
}

/// `limit`/`offset` must be non-negative integers when present; they stay
/// string-encoded in the descriptor.
fn parse_bound(key: &str, value: String) -> Result<String, ParseError> {
    if !value.is_empty() && !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::new(format!(
            "param '{}' must be a non-negative integer, got '{}'",
            key, value
        )));
    }
    Ok(value)
}

fn percent_decode(value: &str) -> Result<String, String> {
    let bytes = value.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                if i + 2 >= bytes.len() {
                    return Err("truncated percent escape".to_string());
                }
                let hi = hex_val(bytes[i + 1])?;
                let lo = hex_val(bytes[i + 2])?;
                out.push(hi << 4 | lo);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| "percent escape decodes to invalid utf-8".to_string())
}

fn hex_val(b: u8) -> Result<u8, String> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(format!("invalid hex digit '{}'", b as char)),
    }
}

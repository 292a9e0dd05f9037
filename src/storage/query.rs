//! Search query compiler
//!
//! Turns a declarative `SearchQuery` into parameterized SQL. Every caller
//! value travels as a bound argument; only fixed fragments are concatenated.

use regex::Regex;
use rusqlite::types::Value as SqlValue;

use crate::core::normalize_tag;
use crate::error::{CatalogError, Result};

/// Page size used when a query leaves `count` at 0.
pub const DEFAULT_COUNT: i64 = 50;

/// Literal accepted by `HashFilter::from_literal` to select files without a hash.
pub const NULL_HASH_LITERAL: &str = "NULL";

pub(crate) const FILE_COLUMNS: &str = "f.id, f.path, f.lastViewed, f.stars, f.size, f.hash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMethod {
    /// Stored (insertion) order.
    #[default]
    None,
    Stars,
    Size,
    LastViewed,
    Id,
    Random,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashFilter {
    /// Files whose hash was never computed.
    Unset,
    Equals(String),
}

impl HashFilter {
    /// `"NULL"` selects unhashed files, anything else is an exact match.
    pub fn from_literal(literal: &str) -> Self {
        if literal == NULL_HASH_LITERAL {
            HashFilter::Unset
        } else {
            HashFilter::Equals(literal.to_string())
        }
    }
}

/// A search over the catalog. Every field is optional; the default value
/// returns the first page of all files.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Substring the path must contain, ignoring ASCII case.
    pub path: Option<String>,
    /// Regular expression the path must match.
    pub path_regex: Option<String>,
    /// Files must carry every one of these tags.
    pub whitelist_tags: Vec<String>,
    /// Files must carry none of these tags.
    pub blacklist_tags: Vec<String>,
    pub hash: Option<HashFilter>,
    /// Max rows. 0 means `DEFAULT_COUNT`, negative means no limit.
    pub count: i64,
    /// Matching rows to skip before the first returned row.
    pub index: i64,
    pub sort_by: SortMethod,
    pub sort_reverse: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

#[derive(Default)]
struct QueryBuilder {
    predicates: Vec<&'static str>,
    args: Vec<SqlValue>,
}

impl QueryBuilder {
    fn filter(&mut self, fragment: &'static str, args: impl IntoIterator<Item = SqlValue>) {
        self.predicates.push(fragment);
        self.args.extend(args);
    }

    fn finish(self, order_by: String, page: Option<(i64, i64)>) -> CompiledQuery {
        let mut sql = format!("SELECT {} FROM file f", FILE_COLUMNS);
        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by);

        let mut args = self.args;
        if let Some((count, offset)) = page {
            sql.push_str(" LIMIT ? OFFSET ?");
            args.push(SqlValue::Integer(count));
            args.push(SqlValue::Integer(offset));
        }
        CompiledQuery { sql, args }
    }
}

const HAS_TAG: &str =
    "f.id IN (SELECT t.fileId FROM tag t JOIN tag_name n ON t.tagNameId = n.id WHERE n.value = ?)";
const LACKS_TAG: &str =
    "f.id NOT IN (SELECT t.fileId FROM tag t JOIN tag_name n ON t.tagNameId = n.id WHERE n.value = ?)";

fn normalized(tag: &str) -> Result<SqlValue> {
    normalize_tag(tag)
        .map(SqlValue::Text)
        .ok_or_else(|| CatalogError::Validation("search tags cannot be empty".into()))
}

fn order_clause(sort_by: SortMethod, reverse: bool) -> String {
    let dir = if reverse { "DESC" } else { "ASC" };
    match sort_by {
        SortMethod::None => "f.id ASC".to_string(),
        SortMethod::Id => format!("f.id {}", dir),
        SortMethod::Stars => format!("f.stars {}, f.id ASC", dir),
        SortMethod::Size => format!("f.size {}, f.id ASC", dir),
        SortMethod::LastViewed => format!("f.lastViewed {}, f.id ASC", dir),
        SortMethod::Random => "RANDOM()".to_string(),
    }
}

/// Compile a search into SQL plus its ordered argument list.
pub fn compile(query: &SearchQuery) -> Result<CompiledQuery> {
    let mut builder = QueryBuilder::default();

    for tag in &query.whitelist_tags {
        builder.filter(HAS_TAG, [normalized(tag)?]);
    }
    for tag in &query.blacklist_tags {
        builder.filter(LACKS_TAG, [normalized(tag)?]);
    }

    if let Some(fragment) = query.path.as_deref().filter(|p| !p.is_empty()) {
        builder.filter("instr(lower(f.path), lower(?)) > 0", [SqlValue::Text(fragment.to_string())]);
    }

    if let Some(pattern) = query.path_regex.as_deref().filter(|p| !p.is_empty()) {
        Regex::new(pattern)
            .map_err(|e| CatalogError::Validation(format!("invalid path regex: {}", e)))?;
        builder.filter("f.path REGEXP ?", [SqlValue::Text(pattern.to_string())]);
    }

    match &query.hash {
        Some(HashFilter::Unset) => builder.filter("f.hash IS NULL", []),
        Some(HashFilter::Equals(hash)) => builder.filter("f.hash = ?", [SqlValue::Text(hash.clone())]),
        None => {}
    }

    let page = match query.count {
        0 => Some((DEFAULT_COUNT, query.index.max(0))),
        n if n < 0 => None,
        n => Some((n, query.index.max(0))),
    };

    let compiled = builder.finish(order_clause(query.sort_by, query.sort_reverse), page);
    tracing::debug!("[Query] Compiled search: {} (args: {:?})", compiled.sql, compiled.args);
    Ok(compiled)
}

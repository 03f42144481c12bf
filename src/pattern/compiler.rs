//! Compiles a parsed chain pattern plus caller-supplied parameters into a SQL statement and its
//! bound parameters.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{GraphyDbError, Result};
use crate::pattern::lexer::{collected_index, tokenize, LinkKind, LinkToken};
use crate::value::AttrValue;

static JSON_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\w+)\.data\.(\w+)").unwrap());

/// Rewrite `alias.data.field` references into `json_extract(alias.data, "$.field")`.
pub fn json_extract(expr: &str) -> String {
    JSON_PATH.replace_all(expr, r#"json_extract($1.data, "$$.$2")"#).into_owned()
}

#[derive(Debug, Clone, Default)]
pub struct FetchParams {
    pub where_clauses: Vec<String>,
    pub group: Option<String>,
    pub order: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub count: bool,
    pub distinct: bool,
    pub debug: bool,
    /// Everything else: FTS match values (keyed `<alias>_fts`), projection expressions (keyed by
    /// projection name), and ordinary `:name` bind values.
    pub params: BTreeMap<String, AttrValue>,
}

impl FetchParams {
    pub fn new() -> Self {
        FetchParams { distinct: true, ..Default::default() }
    }

    pub fn with_where(mut self, clause: impl Into<String>) -> Self {
        self.where_clauses.push(clause.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: i64) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }
}

pub struct CompiledQuery {
    pub sql: String,
    pub bound: Vec<(String, AttrValue)>,
    pub collect_kind: LinkKind,
    pub collect_item_kind: Option<String>,
    pub projection_names: Vec<String>,
    pub data_col_index: usize,
}

pub fn compile(chain: &str, mut params: FetchParams) -> Result<CompiledQuery> {
    let tokens = tokenize(chain)?;
    let collect_idx = collected_index(&tokens);

    let mut bound: Vec<(String, AttrValue)> = Vec::new();
    let mut fts_joins = Vec::new();

    for token in &tokens {
        let fts_key = format!("{}_fts", token.alias);
        if let Some(value) = params.params.remove(&fts_key) {
            let value_param = format!("{fts_key}_value");
            fts_joins.push(format!(
                "\nJOIN {ftstable} \"{ftskey}\" ON {alias}.uid = {ftskey}.uid",
                ftstable = token.fts_table(),
                ftskey = fts_key,
                alias = token.alias
            ));
            // The join aliases the virtual table as `<alias>_fts` itself, so a bare `MATCH`
            // against that alias matches the whole indexed row -- no column name needed.
            params.where_clauses.push(format!("{fts_key} MATCH :{value_param}"));
            bound.push((value_param, value));
        }
    }

    let collect = &tokens[collect_idx];
    let distinct = if params.distinct { "DISTINCT" } else { "" };

    let mut projection_names = Vec::new();
    let structural: Vec<&str> = match collect.kind {
        LinkKind::Node => vec!["uid", "kind", "ctime", "mtime", "data"],
        LinkKind::EdgeRight | LinkKind::EdgeLeft => vec!["uid", "kind", "ctime", "mtime", "startuid", "enduid", "data"],
    };
    let mut select_cols: Vec<String> = structural.iter().map(|c| format!("{}.{}", collect.alias, c)).collect();
    let data_col_index = structural.iter().position(|c| *c == "data").unwrap();
    for name in &collect.projections {
        let expr = params
            .params
            .remove(name)
            .ok_or_else(|| GraphyDbError::Pattern(format!("projection `{name}` has no matching parameter")))?;
        let expr_str = match &expr {
            AttrValue::Text(s) => s.clone(),
            other => other.to_string(),
        };
        let expr_str = json_extract(&expr_str);
        select_cols.push(format!("{expr_str} AS \"{name}\""));
        projection_names.push(name.clone());
    }

    let mut sql = String::new();
    if params.count {
        sql.push_str(&format!("SELECT COUNT({distinct} {}.uid) FROM {} {}", collect.alias, collect.table(), collect.alias));
    } else {
        sql.push_str(&format!("SELECT {distinct} {} FROM {} {}", select_cols.join(", "), collect.table(), collect.alias));
    }

    // JOINs: walk right from the collected link, then left.
    for pair in tokens[collect_idx..].windows(2) {
        let (left, right) = (&pair[0], &pair[1]);
        let mut join = format!("{}.{} = {}.{}", right.alias, right.leftuid_col(), left.alias, left.rightuid_col());
        if let Some(k) = &right.item_kind {
            join.push_str(&format!(" AND {}.kind = \"{}\"", right.alias, k));
        }
        sql.push_str(&format!("\nJOIN {} {} ON {}", right.table(), right.alias, join));
    }
    for pair in tokens[..=collect_idx].windows(2).rev() {
        let (left, right) = (&pair[0], &pair[1]);
        let mut join = format!("{}.{} = {}.{}", left.alias, left.rightuid_col(), right.alias, right.leftuid_col());
        if let Some(k) = &left.item_kind {
            join.push_str(&format!(" AND {}.kind = \"{}\"", left.alias, k));
        }
        sql.push_str(&format!("\nJOIN {} {} ON {}", left.table(), left.alias, join));
    }

    for j in &fts_joins {
        sql.push_str(j);
    }

    let mut where_clauses: Vec<String> = params.where_clauses.iter().map(|w| json_extract(w)).collect();
    if let Some(k) = &collect.item_kind {
        where_clauses.push(format!("{}.kind = \"{}\"", collect.alias, k));
    }
    if !where_clauses.is_empty() {
        sql.push_str(&format!("\nWHERE {}", where_clauses.join(" AND ")));
    }

    if let Some(group) = &params.group {
        sql.push_str(&format!("\nGROUP BY {}", json_extract(group)));
    }
    if let Some(order) = &params.order {
        sql.push_str(&format!("\nORDER BY {}", json_extract(order)));
    }
    if let Some(limit) = params.limit {
        sql.push_str(&format!("\nLIMIT {limit}"));
    }
    if let Some(offset) = params.offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }

    bound.extend(params.params.into_iter());

    Ok(CompiledQuery {
        sql,
        bound,
        collect_kind: collect.kind,
        collect_item_kind: collect.item_kind.clone(),
        projection_names,
        data_col_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_extract_rewrites_data_path() {
        assert_eq!(json_extract("n.data.name = :x"), "json_extract(n.data, \"$.name\") = :x");
    }

    #[test]
    fn compiles_simple_node_query() {
        let q = compile("(n:Person)", FetchParams::new()).unwrap();
        assert!(q.sql.contains("FROM nodes n"));
        assert!(q.sql.contains("n.kind = \"Person\""));
    }

    #[test]
    fn compiles_two_hop_chain() {
        let q = compile("(n1:Document) <(e:Author)- [p:Person]", FetchParams::new()).unwrap();
        assert!(q.sql.contains("FROM nodes p"));
        assert!(q.sql.contains("JOIN edges e"));
        assert!(q.sql.contains("JOIN nodes n1"));
    }
}

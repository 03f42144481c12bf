//! Tokenizes a chain pattern string into an ordered list of [`LinkToken`]s.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{GraphyDbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Node,
    EdgeRight,
    EdgeLeft,
}

#[derive(Debug, Clone)]
pub struct LinkToken {
    pub kind: LinkKind,
    pub alias: String,
    pub item_kind: Option<String>,
    pub collected: bool,
    pub projections: Vec<String>,
}

impl LinkToken {
    pub fn table(&self) -> &'static str {
        match self.kind {
            LinkKind::Node => "nodes",
            LinkKind::EdgeRight | LinkKind::EdgeLeft => "edges",
        }
    }

    pub fn fts_table(&self) -> &'static str {
        match self.kind {
            LinkKind::Node => "nodefts",
            LinkKind::EdgeRight | LinkKind::EdgeLeft => "edgefts",
        }
    }

    /// Join column used when this link is the left side of a link, i.e. the column that should
    /// equal the neighbor to its right's `rightuid_col`.
    pub fn leftuid_col(&self) -> &'static str {
        match self.kind {
            LinkKind::Node => "uid",
            LinkKind::EdgeRight => "startuid",
            LinkKind::EdgeLeft => "enduid",
        }
    }

    pub fn rightuid_col(&self) -> &'static str {
        match self.kind {
            LinkKind::Node => "uid",
            LinkKind::EdgeRight => "enduid",
            LinkKind::EdgeLeft => "startuid",
        }
    }
}

static PAREN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([\w:]+)\)").unwrap());
static BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([\w:,]+)\]").unwrap());

/// Split `chain` into whitespace-separated tokens and parse each into a [`LinkToken`].
///
/// `resolve_projection` is called once per projection name inside a collected token's brackets
/// and must return the bound SQL expression string for it (a caller-supplied parameter), or an
/// error if no such parameter was given.
pub fn tokenize(chain: &str) -> Result<Vec<LinkToken>> {
    let mut tokens = Vec::new();
    let mut seen_aliases = std::collections::HashSet::new();
    let mut collected_count = 0;

    for piece in chain.split_whitespace() {
        let kind = if piece.ends_with('>') {
            LinkKind::EdgeRight
        } else if piece.starts_with('<') {
            LinkKind::EdgeLeft
        } else {
            LinkKind::Node
        };

        let (alias, item_kind, collected, projections) = if let Some(caps) = BRACKET.captures(piece) {
            let inner = &caps[1];
            let parts: Vec<&str> = inner.split(',').collect();
            let head: Vec<&str> = parts[0].split(':').collect();
            let alias = head[0].to_string();
            let item_kind = head.get(1).map(|s| s.to_string());
            let projections = parts[1..].iter().map(|s| s.to_string()).collect();
            (alias, item_kind, true, projections)
        } else if let Some(caps) = PAREN.captures(piece) {
            let inner = &caps[1];
            let head: Vec<&str> = inner.split(':').collect();
            let alias = head[0].to_string();
            let item_kind = head.get(1).map(|s| s.to_string());
            (alias, item_kind, false, Vec::new())
        } else {
            return Err(GraphyDbError::Pattern(format!("could not parse chain token `{piece}`")));
        };

        if !seen_aliases.insert(alias.clone()) {
            return Err(GraphyDbError::Pattern(format!("alias `{alias}` is defined more than once")));
        }
        if collected {
            collected_count += 1;
        }

        tokens.push(LinkToken { kind, alias, item_kind, collected, projections });
    }

    if tokens.is_empty() {
        return Err(GraphyDbError::Pattern("chain pattern must contain at least one token".to_string()));
    }
    if collected_count > 1 {
        return Err(GraphyDbError::Pattern("at most one token may be collected (wrapped in `[...]`)".to_string()));
    }

    Ok(tokens)
}

/// Index of the collected token, defaulting to the last (rightmost) one.
pub fn collected_index(tokens: &[LinkToken]) -> usize {
    tokens.iter().position(|t| t.collected).unwrap_or(tokens.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_node() {
        let tokens = tokenize("(n:Person)").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].alias, "n");
        assert_eq!(tokens[0].item_kind.as_deref(), Some("Person"));
        assert_eq!(tokens[0].kind, LinkKind::Node);
    }

    #[test]
    fn parses_chain_with_collected_projection() {
        let tokens = tokenize("(n:Document) <(e:Author)- [p:Person,aorder]").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1].kind, LinkKind::EdgeLeft);
        assert!(tokens[2].collected);
        assert_eq!(tokens[2].projections, vec!["aorder".to_string()]);
        assert_eq!(collected_index(&tokens), 2);
    }

    #[test]
    fn defaults_to_last_token_when_none_collected() {
        let tokens = tokenize("(a) -(e)> (b)").unwrap();
        assert_eq!(collected_index(&tokens), 2);
    }

    #[test]
    fn rejects_duplicate_alias() {
        assert!(tokenize("(a) -(a)> (b)").is_err());
    }

    #[test]
    fn rejects_multiple_collected_tokens() {
        assert!(tokenize("[a] -(e)> [b]").is_err());
    }
}

//! Entity matcher.
//!
//! Pairs tables, and then the columns of paired tables, between the
//! "before" and "after" snapshots. Matching runs in two passes:
//!
//! 1. **Exact pass** - identical normalized names pair directly.
//! 2. **Rename pass** - leftovers on both sides are scored by name and
//!    structural similarity; a pair is accepted only when its score
//!    exceeds the threshold and each side is the other's best candidate.
//!    Rounds repeat until no new pair forms, so an entity whose favourite
//!    was taken can still pair with its next best partner.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::MatchOptions;
use crate::schema::{normalize_name, ColumnSpec, SchemaSnapshot, TableSpec};

// ================================================================
// String similarity helpers
// ================================================================

/// Computes the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let n = b.len();
    let mut prev = (0..=n).collect::<Vec<_>>();
    let mut curr = vec![0; n + 1];
    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}

/// Returns a normalized similarity score in `[0.0, 1.0]` over normalized
/// names. 1.0 means identical, 0.0 means completely different.
#[must_use]
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize_name(a), normalize_name(b));
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(&a, &b) as f64 / max_len as f64)
}

// ================================================================
// Public types
// ================================================================

/// Why two entities were paired (or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchBasis {
    /// Names are byte-identical.
    ExactName,
    /// Names differ only in case or surrounding whitespace.
    NormalizedName,
    /// Names differ; paired by similarity scoring.
    RenameHeuristic,
    /// No counterpart on the other side.
    Unmatched,
}

/// A pairing between a before-entity and an after-entity.
///
/// Exactly one side is `None` when `basis` is [`MatchBasis::Unmatched`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    /// Name in the before snapshot.
    pub before: Option<String>,
    /// Name in the after snapshot.
    pub after: Option<String>,
    /// Matching basis.
    pub basis: MatchBasis,
    /// Similarity score that justified a heuristic pairing (1.0 for name matches).
    pub score: f64,
}

impl EntityMatch {
    fn paired(before: &str, after: &str, basis: MatchBasis, score: f64) -> Self {
        Self {
            before: Some(before.to_string()),
            after: Some(after.to_string()),
            basis,
            score,
        }
    }

    fn only_before(name: &str) -> Self {
        Self {
            before: Some(name.to_string()),
            after: None,
            basis: MatchBasis::Unmatched,
            score: 0.0,
        }
    }

    fn only_after(name: &str) -> Self {
        Self {
            before: None,
            after: Some(name.to_string()),
            basis: MatchBasis::Unmatched,
            score: 0.0,
        }
    }

    /// Returns both names when the entity exists on both sides.
    #[must_use]
    pub fn pair(&self) -> Option<(&str, &str)> {
        match (&self.before, &self.after) {
            (Some(b), Some(a)) => Some((b.as_str(), a.as_str())),
            _ => None,
        }
    }

    /// Returns true when the pairing changes the entity's name.
    #[must_use]
    pub fn is_rename(&self) -> bool {
        self.pair().is_some_and(|(b, a)| b != a)
    }

    fn sort_key(&self) -> String {
        self.after
            .as_deref()
            .or(self.before.as_deref())
            .map(normalize_name)
            .unwrap_or_default()
    }
}

/// A table pairing plus, for paired tables, the pairing of their columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMatch {
    /// The table-level match.
    pub table: EntityMatch,
    /// Column matches; empty when the table is unmatched.
    pub columns: Vec<EntityMatch>,
}

/// Every pairing decision for one comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaMatches {
    /// Table matches ordered by name.
    pub tables: Vec<TableMatch>,
}

impl SchemaMatches {
    /// Returns the after-name of a before-table, when it survives.
    #[must_use]
    pub fn renamed_table(&self, before: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|m| m.table.before.as_deref() == Some(before))
            .and_then(|m| m.table.after.as_deref())
    }

    /// Returns the match of a table by its before-name.
    #[must_use]
    pub fn by_before(&self, before: &str) -> Option<&TableMatch> {
        self.tables
            .iter()
            .find(|m| m.table.before.as_deref() == Some(before))
    }

    /// Iterates every table and column match.
    pub fn entities(&self) -> impl Iterator<Item = &EntityMatch> {
        self.tables
            .iter()
            .flat_map(|m| std::iter::once(&m.table).chain(m.columns.iter()))
    }

    /// Counts matches per basis.
    #[must_use]
    pub fn basis_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for entity in self.entities() {
            let key = match entity.basis {
                MatchBasis::ExactName => "exact-name",
                MatchBasis::NormalizedName => "normalized-name",
                MatchBasis::RenameHeuristic => "rename-heuristic",
                MatchBasis::Unmatched => "unmatched",
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }
}

// ================================================================
// Stable pairing
// ================================================================

/// A scored (before, after) candidate pair.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    before: usize,
    after: usize,
    score: f64,
    name_similarity: f64,
}

/// Orders candidates best-first: higher score, then higher raw name
/// similarity, then the lexicographically smaller name on the side being
/// chosen.
fn better(a: &Candidate, b: &Candidate, a_name: &str, b_name: &str) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then(a.name_similarity.total_cmp(&b.name_similarity))
        .then_with(|| b_name.cmp(a_name))
}

/// Mutual-best-match pairing over scored candidates.
///
/// Returns accepted `(before, after, score)` index pairs in acceptance order.
fn stable_pairs(
    candidates: &[Candidate],
    before_names: &[String],
    after_names: &[String],
    threshold: f64,
) -> Vec<(usize, usize, f64)> {
    let mut taken_before = HashSet::new();
    let mut taken_after = HashSet::new();
    let mut accepted = Vec::new();

    loop {
        let live: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.score > threshold)
            .filter(|c| !taken_before.contains(&c.before) && !taken_after.contains(&c.after))
            .collect();

        let mut best_for_before: BTreeMap<usize, &Candidate> = BTreeMap::new();
        let mut best_for_after: BTreeMap<usize, &Candidate> = BTreeMap::new();
        for &c in &live {
            let slot = best_for_before.entry(c.before).or_insert(c);
            let current: &Candidate = *slot;
            if better(c, current, &after_names[c.after], &after_names[current.after]).is_gt() {
                *slot = c;
            }
            let slot = best_for_after.entry(c.after).or_insert(c);
            let current: &Candidate = *slot;
            if better(c, current, &before_names[c.before], &before_names[current.before]).is_gt() {
                *slot = c;
            }
        }

        let mut round: Vec<(usize, usize, f64)> = best_for_before
            .values()
            .filter(|c| {
                best_for_after
                    .get(&c.after)
                    .is_some_and(|m| m.before == c.before)
            })
            .map(|c| (c.before, c.after, c.score))
            .collect();

        if round.is_empty() {
            break;
        }
        round.sort_by(|x, y| before_names[x.0].cmp(&before_names[y.0]));
        for &(b, a, score) in &round {
            taken_before.insert(b);
            taken_after.insert(a);
            accepted.push((b, a, score));
        }
    }

    accepted
}

/// Result of a two-pass match over one entity kind.
struct Pairing {
    pairs: Vec<EntityMatch>,
    before_only: Vec<String>,
    after_only: Vec<String>,
}

/// Runs both passes. `score` receives (before index, after index) into the
/// leftover lists and returns the combined score and the name similarity.
fn two_pass<F>(before: &[String], after: &[String], threshold: Option<f64>, score: F) -> Pairing
where
    F: Fn(&str, &str) -> f64,
{
    let mut pairs = Vec::new();
    let after_by_norm: BTreeMap<String, &String> =
        after.iter().map(|n| (normalize_name(n), n)).collect();

    let mut matched_after = HashSet::new();
    let mut left_before = Vec::new();
    for b in before {
        match after_by_norm.get(&normalize_name(b)) {
            Some(&a) => {
                let basis = if a == b {
                    MatchBasis::ExactName
                } else {
                    MatchBasis::NormalizedName
                };
                pairs.push(EntityMatch::paired(b, a, basis, 1.0));
                matched_after.insert(a.clone());
            }
            None => left_before.push(b.clone()),
        }
    }
    let mut left_after: Vec<String> = after
        .iter()
        .filter(|a| !matched_after.contains(*a))
        .cloned()
        .collect();

    if let Some(threshold) = threshold {
        let mut candidates = Vec::new();
        for (bi, b) in left_before.iter().enumerate() {
            for (ai, a) in left_after.iter().enumerate() {
                candidates.push(Candidate {
                    before: bi,
                    after: ai,
                    score: score(b, a),
                    name_similarity: name_similarity(b, a),
                });
            }
        }

        let accepted = stable_pairs(&candidates, &left_before, &left_after, threshold);
        let mut used_before = HashSet::new();
        let mut used_after = HashSet::new();
        for (bi, ai, s) in accepted {
            pairs.push(EntityMatch::paired(
                &left_before[bi],
                &left_after[ai],
                MatchBasis::RenameHeuristic,
                s,
            ));
            used_before.insert(bi);
            used_after.insert(ai);
        }
        left_before = left_before
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !used_before.contains(i))
            .map(|(_, n)| n)
            .collect();
        left_after = left_after
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !used_after.contains(i))
            .map(|(_, n)| n)
            .collect();
    }

    Pairing {
        pairs,
        before_only: left_before,
        after_only: left_after,
    }
}

// ================================================================
// Scoring
// ================================================================

/// Structural similarity of two columns in `[0, 1]`: the share of
/// {same category, same nullability, position within tolerance}.
fn column_structure(a: &ColumnSpec, b: &ColumnSpec, tolerance: u32) -> f64 {
    let checks = [
        a.column_type.category == b.column_type.category,
        a.nullable == b.nullable,
        a.ordinal.abs_diff(b.ordinal) <= tolerance,
    ];
    checks.iter().filter(|c| **c).count() as f64 / checks.len() as f64
}

/// Column rename score: equal weight on name and structure.
fn column_score(a: &ColumnSpec, b: &ColumnSpec, options: &MatchOptions) -> f64 {
    0.5 * name_similarity(&a.name, &b.name)
        + 0.5 * column_structure(a, b, options.position_tolerance)
}

/// Overlap of column names with equal category, relative to the union.
fn table_structure(a: &TableSpec, b: &TableSpec, min_shared: usize) -> f64 {
    let a_cols: BTreeMap<String, &ColumnSpec> =
        a.columns.iter().map(|c| (normalize_name(&c.name), c)).collect();
    let b_cols: BTreeMap<String, &ColumnSpec> =
        b.columns.iter().map(|c| (normalize_name(&c.name), c)).collect();

    let shared = a_cols
        .iter()
        .filter(|(name, col)| {
            b_cols
                .get(*name)
                .is_some_and(|other| other.column_type.category == col.column_type.category)
        })
        .count();
    let union: HashSet<&String> = a_cols.keys().chain(b_cols.keys()).collect();

    if union.is_empty() || shared < min_shared {
        return 0.0;
    }
    shared as f64 / union.len() as f64
}

/// Table rename score: structure weighs more than the name.
fn table_score(a: &TableSpec, b: &TableSpec, options: &MatchOptions) -> f64 {
    0.4 * name_similarity(&a.name, &b.name)
        + 0.6 * table_structure(a, b, options.min_shared_columns)
}

// ================================================================
// Entry points
// ================================================================

/// Pairs the columns of two matched tables.
#[must_use]
pub fn match_columns(
    before: &TableSpec,
    after: &TableSpec,
    options: &MatchOptions,
) -> Vec<EntityMatch> {
    let before_names: Vec<String> = before.columns.iter().map(|c| c.name.clone()).collect();
    let after_names: Vec<String> = after.columns.iter().map(|c| c.name.clone()).collect();
    let threshold = options
        .detect_renames
        .then_some(options.column_rename_threshold);

    let pairing = two_pass(&before_names, &after_names, threshold, |b, a| {
        match (before.get_column(b), after.get_column(a)) {
            (Some(b), Some(a)) => column_score(b, a, options),
            _ => 0.0,
        }
    });

    let mut matches = pairing.pairs;
    for m in &matches {
        if m.basis == MatchBasis::RenameHeuristic {
            warn!(
                table = %after.name,
                from = m.before.as_deref().unwrap_or_default(),
                to = m.after.as_deref().unwrap_or_default(),
                score = m.score,
                "column looks renamed"
            );
        }
    }
    matches.extend(pairing.before_only.iter().map(|n| EntityMatch::only_before(n)));
    matches.extend(pairing.after_only.iter().map(|n| EntityMatch::only_after(n)));
    matches.sort_by_key(EntityMatch::sort_key);
    matches
}

/// Pairs tables between two snapshots, then the columns of every paired table.
#[must_use]
pub fn match_schemas(
    before: &SchemaSnapshot,
    after: &SchemaSnapshot,
    options: &MatchOptions,
) -> SchemaMatches {
    let before_names: Vec<String> = before.table_names().map(String::from).collect();
    let after_names: Vec<String> = after.table_names().map(String::from).collect();
    let threshold = options
        .detect_renames
        .then_some(options.table_rename_threshold);

    let pairing = two_pass(&before_names, &after_names, threshold, |b, a| {
        match (before.table(b), after.table(a)) {
            (Some(b), Some(a)) => table_score(b, a, options),
            _ => 0.0,
        }
    });

    let mut tables = Vec::new();
    for m in pairing.pairs {
        let columns = match m.pair().and_then(|(b, a)| before.table(b).zip(after.table(a))) {
            Some((b, a)) => match_columns(b, a, options),
            None => Vec::new(),
        };
        if m.basis == MatchBasis::RenameHeuristic {
            warn!(
                from = m.before.as_deref().unwrap_or_default(),
                to = m.after.as_deref().unwrap_or_default(),
                score = m.score,
                "table looks renamed"
            );
        }
        tables.push(TableMatch { table: m, columns });
    }
    for name in &pairing.before_only {
        tables.push(TableMatch {
            table: EntityMatch::only_before(name),
            columns: Vec::new(),
        });
    }
    for name in &pairing.after_only {
        tables.push(TableMatch {
            table: EntityMatch::only_after(name),
            columns: Vec::new(),
        });
    }
    tables.sort_by_key(|m| m.table.sort_key());

    let matches = SchemaMatches { tables };
    debug!(counts = ?matches.basis_counts(), "matched entities");
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> MatchOptions {
        MatchOptions::default()
    }

    fn customers(second: &str) -> TableSpec {
        TableSpec::new("customers")
            .column(ColumnSpec::new("id", "BIGINT").not_null())
            .column(ColumnSpec::new(second, "VARCHAR(255)"))
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_name_similarity_ignores_case() {
        assert!((name_similarity("Email", "email ") - 1.0).abs() < f64::EPSILON);
        assert!((name_similarity("full_name", "legal_name") - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_exact_and_normalized_basis() {
        let before = customers("full_name");
        let after = TableSpec::new("customers")
            .column(ColumnSpec::new("ID", "BIGINT").not_null())
            .column(ColumnSpec::new("full_name", "VARCHAR(255)"));
        let matches = match_columns(&before, &after, &options());
        assert_eq!(matches.len(), 2);
        let id = matches.iter().find(|m| m.before.as_deref() == Some("id")).unwrap();
        assert_eq!(id.basis, MatchBasis::NormalizedName);
        assert!(id.is_rename());
        let name = matches.iter().find(|m| m.before.as_deref() == Some("full_name")).unwrap();
        assert_eq!(name.basis, MatchBasis::ExactName);
        assert!(!name.is_rename());
    }

    #[test]
    fn test_column_rename_detected() {
        let matches = match_columns(&customers("full_name"), &customers("legal_name"), &options());
        let renamed = matches
            .iter()
            .find(|m| m.basis == MatchBasis::RenameHeuristic)
            .expect("rename expected");
        assert_eq!(renamed.pair(), Some(("full_name", "legal_name")));
        assert!(renamed.score > 0.6);
        assert!(matches.iter().all(|m| m.basis != MatchBasis::Unmatched));
    }

    #[test]
    fn test_dissimilar_names_not_renamed() {
        let matches = match_columns(&customers("email"), &customers("phone"), &options());
        let unmatched = matches
            .iter()
            .filter(|m| m.basis == MatchBasis::Unmatched)
            .count();
        assert_eq!(unmatched, 2);
    }

    #[test]
    fn test_rename_detection_can_be_disabled() {
        let opts = MatchOptions::default().with_rename_detection(false);
        let matches = match_columns(&customers("full_name"), &customers("legal_name"), &opts);
        assert!(matches.iter().all(|m| m.basis != MatchBasis::RenameHeuristic));
    }

    #[test]
    fn test_popular_name_cannot_steal_two_matches() {
        // Both "user_name" and "username1" resemble "username"; only the
        // mutual best pair is accepted and the other column is dropped.
        let before = TableSpec::new("t")
            .column(ColumnSpec::new("user_name", "TEXT"))
            .column(ColumnSpec::new("username1", "TEXT"));
        let after = TableSpec::new("t").column(ColumnSpec::new("username", "TEXT"));
        let matches = match_columns(&before, &after, &options());
        let renames: Vec<_> = matches
            .iter()
            .filter(|m| m.basis == MatchBasis::RenameHeuristic)
            .collect();
        assert_eq!(renames.len(), 1);
        assert_eq!(renames[0].after.as_deref(), Some("username"));
        assert_eq!(
            matches.iter().filter(|m| m.basis == MatchBasis::Unmatched).count(),
            1
        );
    }

    #[test]
    fn test_tie_broken_by_before_name() {
        // "ab" and "cb" are equally similar to "xb" in every respect.
        let candidates = vec![
            Candidate { before: 0, after: 0, score: 0.7, name_similarity: 0.5 },
            Candidate { before: 1, after: 0, score: 0.7, name_similarity: 0.5 },
        ];
        let before = vec!["cb".to_string(), "ab".to_string()];
        let after = vec!["xb".to_string()];
        let pairs = stable_pairs(&candidates, &before, &after, 0.6);
        assert_eq!(pairs, vec![(1, 0, 0.7)]);
    }

    #[test]
    fn test_second_round_pairs_leftovers() {
        // before 0 and 1 both prefer after 0; before 1 wins it, then
        // before 0 pairs with after 1 in the next round.
        let candidates = vec![
            Candidate { before: 0, after: 0, score: 0.8, name_similarity: 0.5 },
            Candidate { before: 1, after: 0, score: 0.9, name_similarity: 0.5 },
            Candidate { before: 0, after: 1, score: 0.7, name_similarity: 0.5 },
        ];
        let before = vec!["a".to_string(), "b".to_string()];
        let after = vec!["x".to_string(), "y".to_string()];
        let pairs = stable_pairs(&candidates, &before, &after, 0.6);
        assert_eq!(pairs, vec![(1, 0, 0.9), (0, 1, 0.7)]);
    }

    #[test]
    fn test_table_rename_detected() {
        let users = TableSpec::new("users")
            .column(ColumnSpec::new("id", "BIGINT").not_null())
            .column(ColumnSpec::new("name", "TEXT"));
        let accounts = TableSpec::new("accounts")
            .column(ColumnSpec::new("id", "BIGINT").not_null())
            .column(ColumnSpec::new("name", "TEXT"));
        let before = SchemaSnapshot::from_tables(vec![users]).unwrap();
        let after = SchemaSnapshot::from_tables(vec![accounts]).unwrap();

        let matches = match_schemas(&before, &after, &options());
        assert_eq!(matches.tables.len(), 1);
        let m = &matches.tables[0];
        assert_eq!(m.table.basis, MatchBasis::RenameHeuristic);
        assert_eq!(m.table.pair(), Some(("users", "accounts")));
        assert_eq!(m.columns.len(), 2);
        assert_eq!(matches.renamed_table("users"), Some("accounts"));
    }

    #[test]
    fn test_single_shared_column_is_not_a_rename() {
        let tags = TableSpec::new("tags").column(ColumnSpec::new("id", "INT"));
        let orders = TableSpec::new("orders").column(ColumnSpec::new("id", "INT"));
        let before = SchemaSnapshot::from_tables(vec![tags]).unwrap();
        let after = SchemaSnapshot::from_tables(vec![orders]).unwrap();
        let matches = match_schemas(&before, &after, &options());
        assert_eq!(matches.tables.len(), 2);
        assert!(matches
            .tables
            .iter()
            .all(|m| m.table.basis == MatchBasis::Unmatched && m.columns.is_empty()));
    }

    #[test]
    fn test_every_entity_appears_once() {
        let before = SchemaSnapshot::from_tables(vec![customers("full_name")]).unwrap();
        let after = SchemaSnapshot::from_tables(vec![customers("legal_name")]).unwrap();
        let matches = match_schemas(&before, &after, &options());
        let befores: Vec<_> = matches.tables[0]
            .columns
            .iter()
            .filter_map(|m| m.before.clone())
            .collect();
        let unique: HashSet<_> = befores.iter().collect();
        assert_eq!(befores.len(), unique.len());
    }
}

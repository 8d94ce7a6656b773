// feedforward-core/src/canonicalize.rs
// ============================================================================
// Module: Canonicalization & Signatures
// Description: Two-level facet canonicalization and signature construction.
// Purpose: Give story assembly a stable, cross-run identity for a cluster.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonicalization happens in two levels: first a pure format
//! normalization (`canonicalize_format`), then an alias-table lookup
//! (`AliasTable::canonicalize`) that folds known synonyms (e.g.
//! `"sched"` -> `"scheduling"`) onto one preferred spelling. Both raw and
//! canonical values are kept on persisted facets and clusters for drift
//! audit. `canonicalize` is idempotent:
//! `canonicalize(canonicalize(x)) == canonicalize(x)`.

use std::collections::BTreeMap;

use crate::core::identifiers::SignatureId;
use crate::core::identifiers::RunId;

/// Normalizes raw text to a consistent format: lowercase, trimmed, with
/// internal whitespace collapsed to single spaces and punctuation other
/// than `-`/`_` removed.
#[must_use]
pub fn canonicalize_format(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let filtered: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c.is_whitespace() { c } else { ' ' })
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derives a short, URL-safe slug from free text, used as the final
/// component of a story signature.
#[must_use]
pub fn slugify(raw: &str) -> String {
    let formatted = canonicalize_format(raw);
    let slug: String = formatted
        .split_whitespace()
        .take(6)
        .collect::<Vec<_>>()
        .join("_");
    slug.replace('-', "_")
}

/// Alias table mapping known raw or format-normalized spellings to a single
/// preferred canonical spelling, keyed by facet kind (`"product_area"`,
/// `"component"`).
///
/// # Invariants
/// - `canonicalize` is idempotent: feeding back an already-canonical value
///   returns it unchanged, because canonical values are never themselves
///   aliased to something else.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: BTreeMap<(String, String), String>,
}

impl AliasTable {
    /// Creates an empty alias table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an alias: `raw` under `kind` canonicalizes to `canonical`.
    pub fn register(&mut self, kind: impl Into<String>, raw: impl Into<String>, canonical: impl Into<String>) {
        self.aliases.insert((kind.into(), canonicalize_format(&raw.into())), canonical.into());
    }

    /// Canonicalizes `raw` under `kind`: format-normalize, then look up in
    /// the alias table, falling back to the format-normalized value itself
    /// when no alias is registered.
    #[must_use]
    pub fn canonicalize(&self, kind: &str, raw: &str) -> String {
        let formatted = canonicalize_format(raw);
        self.aliases.get(&(kind.to_string(), formatted.clone())).cloned().unwrap_or(formatted)
    }
}

/// Builds a stable signature string from canonicalized facets.
///
/// Format: `hybrid_{action_type}_{direction}_{product_area}_{component}_{issue_slug}`.
#[must_use]
pub fn build_signature(
    action_type: &str,
    direction: &str,
    product_area_canonical: &str,
    component_canonical: &str,
    issue_slug: &str,
) -> SignatureId {
    SignatureId::new(format!(
        "hybrid_{}_{}_{}_{}_{}",
        canonicalize_format(action_type).replace(' ', "_"),
        canonicalize_format(direction).replace(' ', "_"),
        product_area_canonical.replace(' ', "_"),
        component_canonical.replace(' ', "_"),
        issue_slug,
    ))
}

/// The outcome of committing a session's newly-seen aliases to the
/// persistent alias store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasCommitReport {
    /// Aliases newly written with no prior conflicting canonical value.
    pub written: u32,
    /// Aliases that already existed with a different canonical value; the
    /// session's (last-writer) value won, and the conflict is logged here.
    pub conflicts: Vec<AliasConflict>,
}

/// One last-writer-wins alias conflict, for audit logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasConflict {
    /// The facet kind the alias was registered under.
    pub kind: String,
    /// The format-normalized raw value in conflict.
    pub raw: String,
    /// The canonical value that was overwritten.
    pub previous_canonical: String,
    /// The canonical value that won.
    pub new_canonical: String,
}

/// A session-scoped registry of signatures seen during one run, committed
/// to the persistent alias store at the end of the run.
///
/// # Invariants
/// - Lookups within a session are consistent: the same `(kind, raw)` pair
///   always canonicalizes to the same value for the lifetime of the
///   registry, even before the commit to the persistent store.
#[derive(Debug, Clone)]
pub struct SignatureRegistry {
    run_id: RunId,
    session_aliases: BTreeMap<(String, String), String>,
    base: AliasTable,
}

impl SignatureRegistry {
    /// Loads a registry for `run_id`, seeded with the persistent alias
    /// table's current state.
    #[must_use]
    pub fn load(run_id: RunId, base: AliasTable) -> Self {
        Self {
            run_id,
            session_aliases: BTreeMap::new(),
            base,
        }
    }

    /// Canonicalizes `raw` under `kind`, consulting the persistent base
    /// table and then any alias already registered this session.
    #[must_use]
    pub fn canonicalize(&self, kind: &str, raw: &str) -> String {
        let formatted = canonicalize_format(raw);
        self.session_aliases
            .get(&(kind.to_string(), formatted.clone()))
            .cloned()
            .unwrap_or_else(|| self.base.canonicalize(kind, &formatted))
    }

    /// Registers a new alias discovered this session (e.g. a PM-confirmed
    /// synonym), without yet writing it to the persistent store.
    pub fn register_session_alias(&mut self, kind: impl Into<String>, raw: impl Into<String>, canonical: impl Into<String>) {
        self.session_aliases.insert((kind.into(), canonicalize_format(&raw.into())), canonical.into());
    }

    /// This session's newly registered aliases as `(kind, raw, canonical)`
    /// triples, ready for [`commit_into`](Self::commit_into) or for writing
    /// straight to a persistent alias store.
    #[must_use]
    pub fn session_aliases(&self) -> Vec<(String, String, String)> {
        self.session_aliases.iter().map(|((kind, raw), canonical)| (kind.clone(), raw.clone(), canonical.clone())).collect()
    }

    /// The run this registry is scoped to.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Commits this session's new aliases into `base`, using optimistic
    /// last-writer-wins: a session alias always overwrites a conflicting
    /// persisted one, and the conflict is reported for audit logging.
    pub fn commit_into(self, base: &mut AliasTable) -> AliasCommitReport {
        let mut report = AliasCommitReport::default();
        for ((kind, raw), canonical) in self.session_aliases {
            if let Some(previous) = base.aliases.get(&(kind.clone(), raw.clone())).cloned() {
                if previous != canonical {
                    report.conflicts.push(AliasConflict {
                        kind: kind.clone(),
                        raw: raw.clone(),
                        previous_canonical: previous,
                        new_canonical: canonical.clone(),
                    });
                }
            } else {
                report.written += 1;
            }
            base.aliases.insert((kind, raw), canonical);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::AliasTable;
    use super::build_signature;
    use super::canonicalize_format;

    #[test]
    fn canonicalize_is_idempotent() {
        let mut table = AliasTable::new();
        table.register("product_area", "sched", "scheduling");
        let once = table.canonicalize("product_area", "Sched");
        let twice = table.canonicalize("product_area", &once);
        assert_eq!(once, twice);
        assert_eq!(once, "scheduling");
    }

    #[test]
    fn format_canonicalization_strips_punctuation_and_case() {
        assert_eq!(canonicalize_format("  Pins -- Missing!! "), "pins missing");
    }

    #[test]
    fn signature_is_stable_for_equal_inputs() {
        let a = build_signature("bug_report", "inbound", "scheduling", "pins", "pins_missing");
        let b = build_signature("bug_report", "inbound", "scheduling", "pins", "pins_missing");
        assert_eq!(a, b);
    }

    #[test]
    fn signature_differs_by_direction() {
        let missing = build_signature("bug_report", "inbound", "scheduling", "pins", "pins");
        let duplicate = build_signature("bug_report", "outbound", "scheduling", "pins", "pins");
        assert_ne!(missing, duplicate);
    }
}

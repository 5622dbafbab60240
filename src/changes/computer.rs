//! Collection diffing
//!
//! Rows are paired across the two observations by (identity, occurrence),
//! so a list holding the same object twice pairs its first occurrence with
//! the first and its second with the second. Paired rows that keep their
//! relative order (the longest increasing run of new positions) are stable;
//! the rest are moves and reported as a deletion plus an insertion.
//!
//! A stable row is modified when any of its values differ, or when any
//! object reachable through its links (up to `MAX_LINK_DEPTH` hops) does.
//! Observers that pass key paths narrow this to the listed paths.

use std::collections::HashMap;

use super::{CollectionChangeSet, KeyPaths, Move, PropertyChange};
use crate::collection::{materialize, CollectionSpec};
use crate::error::Result;
use crate::mvcc::Snapshot;
use crate::schema::{ObjKey, TableId};

/// Maximum number of link hops followed when looking for modifications
pub const MAX_LINK_DEPTH: usize = 16;

/// Computes change sets between two observations of a collection.
pub struct ChangeComputer;

impl ChangeComputer {
    /// Evaluates `spec` at both snapshots and diffs the results.
    pub fn diff(spec: &CollectionSpec, old: &Snapshot, new: &Snapshot) -> Result<CollectionChangeSet> {
        Self::evaluate(spec, old, new).map(|(_, changes)| changes)
    }

    /// Like `diff`, also returning the rows at `new`.
    pub fn evaluate(
        spec: &CollectionSpec,
        old: &Snapshot,
        new: &Snapshot,
    ) -> Result<(Vec<ObjKey>, CollectionChangeSet)> {
        Self::evaluate_key_paths(spec, old, new, None)
    }

    /// Like `evaluate`, reporting a stable row as modified only when one
    /// of `key_paths` changed. `None` checks every property.
    pub fn evaluate_key_paths(
        spec: &CollectionSpec,
        old: &Snapshot,
        new: &Snapshot,
        key_paths: Option<&KeyPaths>,
    ) -> Result<(Vec<ObjKey>, CollectionChangeSet)> {
        let old_rows = materialize(spec, old)?;
        let new_rows = materialize(spec, new)?;
        let mut checker = ModificationChecker::new(old, new, key_paths);
        let table = spec.table_id();
        let changes = Self::calculate(&old_rows, &new_rows, |key| checker.row_changed(table, key));
        Ok((new_rows, changes))
    }

    /// Properties of one object that changed between two snapshots, in
    /// slot order.
    ///
    /// A link property whose stored value is unchanged is reported when
    /// an object reachable through it changed, with no old or new value.
    /// With `key_paths`, only properties starting an observed path are
    /// considered. Empty if the object is missing from either snapshot.
    pub fn object_changes(
        old: &Snapshot,
        new: &Snapshot,
        table: TableId,
        key: ObjKey,
        key_paths: Option<&KeyPaths>,
    ) -> Vec<PropertyChange> {
        let (Some(old_row), Some(new_row)) = (old.object(table, key), new.object(table, key)) else {
            return Vec::new();
        };
        let schema = new.schema();
        let mut checker = ModificationChecker::new(old, new, None);
        checker.in_progress.push((table, key));

        schema
            .object_schema(table)
            .stored_properties()
            .filter_map(|(slot, property)| {
                let (before, after) = (old_row.get(slot), new_row.get(slot));
                let changed = match key_paths {
                    Some(paths) => paths.slot_changed(old, new, key, slot),
                    None if before != after => true,
                    None => property
                        .kind
                        .link_target()
                        .and_then(|target| schema.table_id(target))
                        .is_some_and(|target| {
                            after
                                .links()
                                .into_iter()
                                .any(|linked| checker.visit(target, linked, 1).0)
                        }),
                };
                if !changed {
                    return None;
                }
                let (old_value, new_value) = if before != after {
                    (Some(before.clone()), Some(after.clone()))
                } else {
                    (None, None)
                };
                Some(PropertyChange {
                    name: property.name.clone(),
                    old_value,
                    new_value,
                })
            })
            .collect()
    }

    /// Diffs two row sequences. `modified` is asked about each stable row.
    pub fn calculate<F>(old_rows: &[ObjKey], new_rows: &[ObjKey], mut modified: F) -> CollectionChangeSet
    where
        F: FnMut(ObjKey) -> bool,
    {
        let new_positions: HashMap<(ObjKey, usize), usize> = occurrences(new_rows)
            .into_iter()
            .enumerate()
            .map(|(position, identity)| (identity, position))
            .collect();

        // Positions are gathered unordered and sorted once into index sets.
        let mut deletions: Vec<usize> = Vec::new();
        let mut paired: Vec<(usize, usize)> = Vec::new();
        for (old_position, identity) in occurrences(old_rows).into_iter().enumerate() {
            match new_positions.get(&identity) {
                Some(&new_position) => paired.push((old_position, new_position)),
                None => deletions.push(old_position),
            }
        }

        let mut matched = vec![false; new_rows.len()];
        for &(_, new_position) in &paired {
            matched[new_position] = true;
        }
        let mut insertions: Vec<usize> = matched
            .iter()
            .enumerate()
            .filter(|(_, m)| !**m)
            .map(|(i, _)| i)
            .collect();

        let targets: Vec<usize> = paired.iter().map(|&(_, to)| to).collect();
        let stable = longest_increasing(&targets);

        let mut modifications = Vec::new();
        let mut moves = Vec::new();
        for (i, &(from, to)) in paired.iter().enumerate() {
            if stable[i] {
                if modified(new_rows[to]) {
                    modifications.push(to);
                }
            } else {
                deletions.push(from);
                insertions.push(to);
                moves.push(Move { from, to });
            }
        }

        CollectionChangeSet {
            deletions: deletions.into_iter().collect(),
            insertions: insertions.into_iter().collect(),
            modifications: modifications.into_iter().collect(),
            moves,
        }
    }
}

/// Tags each row with how many times its key appeared before it.
fn occurrences(rows: &[ObjKey]) -> Vec<(ObjKey, usize)> {
    let mut seen: HashMap<ObjKey, usize> = HashMap::new();
    rows.iter()
        .map(|key| {
            let count = seen.entry(*key).or_insert(0);
            let identity = (*key, *count);
            *count += 1;
            identity
        })
        .collect()
}

/// Marks the members of one longest strictly increasing subsequence.
fn longest_increasing(values: &[usize]) -> Vec<bool> {
    // tails[k]: index into `values` of the smallest tail of a run of length k + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; values.len()];

    for (i, &value) in values.iter().enumerate() {
        let at = tails.partition_point(|&t| values[t] < value);
        if at > 0 {
            previous[i] = Some(tails[at - 1]);
        }
        if at == tails.len() {
            tails.push(i);
        } else {
            tails[at] = i;
        }
    }

    let mut members = vec![false; values.len()];
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        members[i] = true;
        cursor = previous[i];
    }
    members
}

/// Deep per-row change detection between two snapshots.
struct ModificationChecker<'a> {
    old: &'a Snapshot,
    new: &'a Snapshot,
    key_paths: Option<&'a KeyPaths>,
    settled: HashMap<(TableId, ObjKey), bool>,
    in_progress: Vec<(TableId, ObjKey)>,
    link_slots: HashMap<TableId, Vec<(usize, TableId)>>,
}

impl<'a> ModificationChecker<'a> {
    fn new(old: &'a Snapshot, new: &'a Snapshot, key_paths: Option<&'a KeyPaths>) -> Self {
        Self {
            old,
            new,
            key_paths,
            settled: HashMap::new(),
            in_progress: Vec::new(),
            link_slots: HashMap::new(),
        }
    }

    fn row_changed(&mut self, table: TableId, key: ObjKey) -> bool {
        match self.key_paths {
            Some(paths) if paths.table() == table => paths.object_changed(self.old, self.new, key),
            _ => self.visit(table, key, 0).0,
        }
    }

    /// Returns (changed, settled). An unsettled `false` came from cutting
    /// a cycle or the depth limit and is not cached.
    fn visit(&mut self, table: TableId, key: ObjKey, depth: usize) -> (bool, bool) {
        if let Some(&changed) = self.settled.get(&(table, key)) {
            return (changed, true);
        }
        if depth > MAX_LINK_DEPTH || self.in_progress.contains(&(table, key)) {
            return (false, false);
        }

        let (old, new) = (self.old, self.new);
        let old_table = old.table(table);
        let new_table = new.table(table);
        let (old_row, new_row) = match (old_table.get(key), new_table.get(key)) {
            (Some(o), Some(n)) => (o, n),
            (None, None) => return (false, true),
            _ => {
                self.settled.insert((table, key), true);
                return (true, true);
            }
        };
        if !old_table.shares_row(new_table, key) && old_row != new_row {
            self.settled.insert((table, key), true);
            return (true, true);
        }

        let slots = self.link_slots(table);
        if slots.is_empty() {
            self.settled.insert((table, key), false);
            return (false, true);
        }

        let targets: Vec<(TableId, ObjKey)> = slots
            .iter()
            .flat_map(|&(slot, target)| new_row.get(slot).links().into_iter().map(move |k| (target, k)))
            .collect();

        self.in_progress.push((table, key));
        let mut settled = true;
        let mut changed = false;
        for (target, linked) in targets {
            let (c, s) = self.visit(target, linked, depth + 1);
            settled &= s;
            if c {
                changed = true;
                settled = true;
                break;
            }
        }
        self.in_progress.pop();

        if settled {
            self.settled.insert((table, key), changed);
        }
        (changed, settled)
    }

    fn link_slots(&mut self, table: TableId) -> Vec<(usize, TableId)> {
        let new = self.new;
        let schema = new.schema();
        self.link_slots
            .entry(table)
            .or_insert_with(|| {
                schema
                    .object_schema(table)
                    .stored_properties()
                    .filter_map(|(slot, property)| {
                        let target = property.kind.link_target()?;
                        schema.table_id(target).map(|id| (slot, id))
                    })
                    .collect()
            })
            .clone()
    }
}

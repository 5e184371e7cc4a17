//! Label <-> id map.
//!
//! SINGLE mode is a bijection: one label, one id, a later `add` under the
//! same label replaces the mapping (the old id is left for the caller to
//! delete). MULTI mode keeps an insertion-ordered sequence of ids per label,
//! so the same label can own many vectors simultaneously.

use std::collections::HashMap;

use crate::{Id, Label};

#[derive(Debug)]
pub enum LabelMap {
    Single(SingleLabelMap),
    Multi(MultiLabelMap),
}

impl LabelMap {
    pub fn new_single() -> Self {
        LabelMap::Single(SingleLabelMap::default())
    }

    pub fn new_multi() -> Self {
        LabelMap::Multi(MultiLabelMap::default())
    }

    pub fn insert(&mut self, label: Label, id: Id) -> Option<Id> {
        match self {
            LabelMap::Single(m) => m.insert(label, id),
            LabelMap::Multi(m) => {
                m.insert(label, id);
                None
            }
        }
    }

    /// Ids owned by a label, in insertion order (a singleton for SINGLE
    /// mode, possibly empty for an unknown label).
    pub fn ids_for(&self, label: Label) -> Vec<Id> {
        match self {
            LabelMap::Single(m) => m.get(label).into_iter().collect(),
            LabelMap::Multi(m) => m.get(label).to_vec(),
        }
    }

    pub fn label_for(&self, id: Id) -> Option<Label> {
        match self {
            LabelMap::Single(m) => m.label_of(id),
            LabelMap::Multi(m) => m.label_of(id),
        }
    }

    /// Remove every id owned by `label`; returns the removed ids.
    pub fn remove_label(&mut self, label: Label) -> Vec<Id> {
        match self {
            LabelMap::Single(m) => m.remove(label).into_iter().collect(),
            LabelMap::Multi(m) => m.remove(label),
        }
    }

    /// Remove a single id's mapping without touching any sibling id under
    /// the same label (MULTI mode; SINGLE mode has no siblings, so this is
    /// equivalent to `remove_label` there). Returns the id's former label.
    pub fn remove_id(&mut self, id: Id) -> Option<Label> {
        match self {
            LabelMap::Single(m) => {
                let label = m.label_of(id)?;
                m.remove(label);
                Some(label)
            }
            LabelMap::Multi(m) => m.remove_one(id),
        }
    }

    /// Rewrite every occurrence of `from` to `to` (used by swap-with-last
    /// reclamation).
    pub fn rename_id(&mut self, from: Id, to: Id) {
        match self {
            LabelMap::Single(m) => m.rename_id(from, to),
            LabelMap::Multi(m) => m.rename_id(from, to),
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, LabelMap::Multi(_))
    }
}

#[derive(Debug, Default)]
pub struct SingleLabelMap {
    label_to_id: HashMap<Label, Id>,
    id_to_label: HashMap<Id, Label>,
}

impl SingleLabelMap {
    fn insert(&mut self, label: Label, id: Id) -> Option<Id> {
        let previous = self.label_to_id.insert(label, id);
        if let Some(prev_id) = previous {
            self.id_to_label.remove(&prev_id);
        }
        self.id_to_label.insert(id, label);
        previous
    }

    fn get(&self, label: Label) -> Option<Id> {
        self.label_to_id.get(&label).copied()
    }

    fn label_of(&self, id: Id) -> Option<Label> {
        self.id_to_label.get(&id).copied()
    }

    fn remove(&mut self, label: Label) -> Option<Id> {
        let id = self.label_to_id.remove(&label)?;
        self.id_to_label.remove(&id);
        Some(id)
    }

    fn rename_id(&mut self, from: Id, to: Id) {
        if let Some(label) = self.id_to_label.remove(&from) {
            self.id_to_label.insert(to, label);
            self.label_to_id.insert(label, to);
        }
    }
}

#[derive(Debug, Default)]
pub struct MultiLabelMap {
    label_to_ids: HashMap<Label, Vec<Id>>,
    id_to_label: HashMap<Id, Label>,
}

impl MultiLabelMap {
    fn insert(&mut self, label: Label, id: Id) {
        self.label_to_ids.entry(label).or_default().push(id);
        self.id_to_label.insert(id, label);
    }

    fn get(&self, label: Label) -> &[Id] {
        self.label_to_ids.get(&label).map(Vec::as_slice).unwrap_or(&[])
    }

    fn label_of(&self, id: Id) -> Option<Label> {
        self.id_to_label.get(&id).copied()
    }

    fn remove(&mut self, label: Label) -> Vec<Id> {
        let ids = self.label_to_ids.remove(&label).unwrap_or_default();
        for id in &ids {
            self.id_to_label.remove(id);
        }
        ids
    }

    fn rename_id(&mut self, from: Id, to: Id) {
        if let Some(label) = self.id_to_label.remove(&from) {
            self.id_to_label.insert(to, label);
            if let Some(ids) = self.label_to_ids.get_mut(&label)
                && let Some(slot) = ids.iter_mut().find(|i| **i == from)
            {
                *slot = to;
            }
        }
    }

    /// Drop just one id, leaving any sibling ids under the same label
    /// untouched.
    fn remove_one(&mut self, id: Id) -> Option<Label> {
        let label = self.id_to_label.remove(&id)?;
        if let Some(ids) = self.label_to_ids.get_mut(&label) {
            ids.retain(|&i| i != id);
            if ids.is_empty() {
                self.label_to_ids.remove(&label);
            }
        }
        Some(label)
    }
}

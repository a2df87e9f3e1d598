use bytes::Bytes;

use crate::types::{Result, StrataError};

use super::page::LeafValue;
use super::stack::{bottom_entry, Stack};
use super::tree::cow::{dup_size, dup_view, single_value};
use super::tree::{MutableTree, ReadTree, TreeRef};

/// A resolved position: outer stack, inner stack when the key has
/// duplicates, and the pair found there.
#[derive(Clone, Debug)]
struct Pos {
    outer: Stack,
    inner: Option<Stack>,
    key: Bytes,
    value: Bytes,
}

#[derive(Clone, Debug, Default)]
enum State {
    #[default]
    Unpositioned,
    On(Pos),
    /// The pair the cursor stood on is gone; `next` is its successor.
    Vanished {
        key: Bytes,
        value: Bytes,
        next: Option<Pos>,
    },
}

/// Builds a position on the entry `outer` points at, entering its duplicate
/// sub-tree at the first or last value.
fn settle(t: &TreeRef<'_>, outer: Stack, last_dup: bool) -> Result<Pos> {
    let (page, idx) = outer.current(t.view)?;
    let entry = bottom_entry(&page, idx)?;
    let (inner, value) = match &entry.value {
        LeafValue::Single(slot) => (None, single_value(t.src, slot)?),
        LeafValue::Duplicates(slot) => {
            let view = dup_view(slot);
            let mut inner = Stack::default();
            if !inner.descend(view, t.src, view.root, last_dup)? {
                return Err(StrataError::Corruption("empty duplicate sub-tree"));
            }
            let value = inner.current_key(view)?;
            (Some(inner), value)
        }
    };
    Ok(Pos {
        key: entry.key.clone(),
        outer,
        inner,
        value,
    })
}

fn edge(t: &TreeRef<'_>, last: bool) -> Result<Option<Pos>> {
    let mut outer = Stack::default();
    if !outer.descend(t.view, t.src, t.view.root, last)? {
        return Ok(None);
    }
    settle(t, outer, last).map(Some)
}

fn step_dup(t: &TreeRef<'_>, pos: &Pos, forward: bool) -> Result<Option<Pos>> {
    let Some(inner) = &pos.inner else {
        return Ok(None);
    };
    let (page, idx) = pos.outer.current(t.view)?;
    let LeafValue::Duplicates(slot) = &bottom_entry(&page, idx)?.value else {
        return Err(StrataError::Corruption("cursor lost its duplicate sub-tree"));
    };
    let view = dup_view(slot);
    let mut inner = inner.clone();
    let moved = if forward {
        inner.advance(view, t.src)?
    } else {
        inner.retreat(view, t.src)?
    };
    if !moved {
        return Ok(None);
    }
    Ok(Some(Pos {
        outer: pos.outer.clone(),
        value: inner.current_key(view)?,
        inner: Some(inner),
        key: pos.key.clone(),
    }))
}

/// Next key's first value, or previous key's last value.
fn step_key(t: &TreeRef<'_>, pos: &Pos, forward: bool) -> Result<Option<Pos>> {
    let mut outer = pos.outer.clone();
    let moved = if forward {
        outer.advance(t.view, t.src)?
    } else {
        outer.retreat(t.view, t.src)?
    };
    if !moved {
        return Ok(None);
    }
    settle(t, outer, !forward).map(Some)
}

fn step(t: &TreeRef<'_>, pos: &Pos, forward: bool) -> Result<Option<Pos>> {
    match step_dup(t, pos, forward)? {
        Some(pos) => Ok(Some(pos)),
        None => step_key(t, pos, forward),
    }
}

/// First pair whose key is not less than `key`.
fn seek_key(t: &TreeRef<'_>, key: &[u8]) -> Result<Option<Pos>> {
    let mut outer = Stack::default();
    if !outer.seek(t.view, t.src, key)? {
        return Ok(None);
    }
    settle(t, outer, false).map(Some)
}

/// First pair not less than `(key, value)` in (key, value) order.
fn seek_pair(t: &TreeRef<'_>, key: &[u8], value: &[u8]) -> Result<Option<Pos>> {
    let mut outer = Stack::default();
    if !outer.seek(t.view, t.src, key)? {
        return Ok(None);
    }
    let (page, idx) = outer.current(t.view)?;
    let entry = bottom_entry(&page, idx)?;
    if entry.key.as_ref() != key {
        return settle(t, outer, false).map(Some);
    }
    match &entry.value {
        LeafValue::Single(slot) => {
            if single_value(t.src, slot)?.as_ref() >= value {
                return settle(t, outer, false).map(Some);
            }
        }
        LeafValue::Duplicates(slot) => {
            let view = dup_view(slot);
            let mut inner = Stack::default();
            if inner.seek(view, t.src, value)? {
                return Ok(Some(Pos {
                    value: inner.current_key(view)?,
                    key: entry.key.clone(),
                    outer,
                    inner: Some(inner),
                }));
            }
        }
    }
    if !outer.advance(t.view, t.src)? {
        return Ok(None);
    }
    settle(t, outer, false).map(Some)
}

/// Position-keeping cursor over a [`Tree`](super::Tree) or
/// [`MutableTree`].
///
/// The cursor does not borrow its tree; every call takes the tree it was
/// opened on. Edits made to a mutable tree between calls are picked up on
/// the next call: the cursor re-finds its `(key, value)` pair, or the pair
/// after it when that one was deleted. Without duplicates the cursor follows
/// its key, so replacing the key's value leaves it in place.
///
/// Moves that run off either end leave the cursor unpositioned. Searches and
/// duplicate-only moves that fail leave it where it was.
#[derive(Clone, Debug)]
pub struct Cursor {
    tree_id: u64,
    generation: u64,
    state: State,
}

impl Cursor {
    pub(crate) fn new(t: &TreeRef<'_>) -> Self {
        Self {
            tree_id: t.id,
            generation: t.generation,
            state: State::Unpositioned,
        }
    }

    fn sync(&mut self, t: &TreeRef<'_>) -> Result<()> {
        if t.id != self.tree_id {
            return Err(StrataError::Invalid("cursor used with a different tree"));
        }
        if t.generation == self.generation {
            return Ok(());
        }
        self.generation = t.generation;
        self.state = match std::mem::take(&mut self.state) {
            State::Unpositioned => State::Unpositioned,
            State::On(Pos { key, value, .. }) | State::Vanished { key, value, .. } => {
                tracing::trace!(target: "strata_btree::cursor", tree = t.id, "cursor re-synchronised");
                Self::refind(t, key, value)?
            }
        };
        Ok(())
    }

    fn refind(t: &TreeRef<'_>, key: Bytes, value: Bytes) -> Result<State> {
        // Without duplicates an overwritten value keeps the cursor on its key.
        if !t.dups {
            return Ok(match seek_key(t, &key)? {
                Some(pos) if pos.key == key => State::On(pos),
                next => State::Vanished { key, value, next },
            });
        }
        let next = seek_pair(t, &key, &value)?;
        Ok(match next {
            Some(pos) if pos.key == key && pos.value == value => State::On(pos),
            next => State::Vanished { key, value, next },
        })
    }

    /// Applies a move; `None` either clears the position or leaves it alone.
    fn land(&mut self, found: Option<Pos>, clear_on_miss: bool) -> bool {
        match found {
            Some(pos) => {
                self.state = State::On(pos);
                true
            }
            None => {
                if clear_on_miss {
                    self.state = State::Unpositioned;
                }
                false
            }
        }
    }

    /// Pair before the vanished one, for a cursor whose pair was deleted.
    fn before_vanished(t: &TreeRef<'_>, next: &Option<Pos>) -> Result<Option<Pos>> {
        match next {
            Some(pos) => step(t, pos, false),
            None => edge(t, true),
        }
    }

    /// Moves to the next pair; an unpositioned cursor moves to the first.
    pub fn next(&mut self, tree: &impl ReadTree) -> Result<bool> {
        let t = tree.tree_ref();
        self.sync(&t)?;
        let found = match &self.state {
            State::Unpositioned => edge(&t, false)?,
            State::On(pos) => step(&t, pos, true)?,
            State::Vanished { next, .. } => next.clone(),
        };
        Ok(self.land(found, true))
    }

    /// Moves to the previous pair; an unpositioned cursor moves to the last.
    pub fn prev(&mut self, tree: &impl ReadTree) -> Result<bool> {
        let t = tree.tree_ref();
        self.sync(&t)?;
        let found = match &self.state {
            State::Unpositioned => edge(&t, true)?,
            State::On(pos) => step(&t, pos, false)?,
            State::Vanished { next, .. } => Self::before_vanished(&t, next)?,
        };
        Ok(self.land(found, true))
    }

    /// Moves to the next value of the current key only.
    pub fn next_dup(&mut self, tree: &impl ReadTree) -> Result<bool> {
        let t = tree.tree_ref();
        self.sync(&t)?;
        let found = match &self.state {
            State::Unpositioned => None,
            State::On(pos) => step_dup(&t, pos, true)?,
            State::Vanished { key, next, .. } => next.clone().filter(|pos| pos.key == *key),
        };
        Ok(self.land(found, false))
    }

    /// Moves to the previous value of the current key only.
    pub fn prev_dup(&mut self, tree: &impl ReadTree) -> Result<bool> {
        let t = tree.tree_ref();
        self.sync(&t)?;
        let found = match &self.state {
            State::Unpositioned => None,
            State::On(pos) => step_dup(&t, pos, false)?,
            State::Vanished { key, next, .. } => {
                Self::before_vanished(&t, next)?.filter(|pos| pos.key == *key)
            }
        };
        Ok(self.land(found, false))
    }

    /// Moves to the first value of the next distinct key.
    pub fn next_no_dup(&mut self, tree: &impl ReadTree) -> Result<bool> {
        let t = tree.tree_ref();
        self.sync(&t)?;
        let found = match &self.state {
            State::Unpositioned => edge(&t, false)?,
            State::On(pos) => step_key(&t, pos, true)?,
            State::Vanished { key, next, .. } => match next {
                Some(pos) if pos.key == *key => step_key(&t, pos, true)?,
                next => next.clone(),
            },
        };
        Ok(self.land(found, true))
    }

    /// Moves to the last value of the previous distinct key.
    pub fn prev_no_dup(&mut self, tree: &impl ReadTree) -> Result<bool> {
        let t = tree.tree_ref();
        self.sync(&t)?;
        let found = match &self.state {
            State::Unpositioned => edge(&t, true)?,
            State::On(pos) => step_key(&t, pos, false)?,
            State::Vanished { key, next, .. } => match Self::before_vanished(&t, next)? {
                Some(pos) if pos.key == *key => step_key(&t, &pos, false)?,
                before => before,
            },
        };
        Ok(self.land(found, true))
    }

    /// Moves to the last pair.
    pub fn last(&mut self, tree: &impl ReadTree) -> Result<bool> {
        let t = tree.tree_ref();
        self.sync(&t)?;
        let found = edge(&t, true)?;
        Ok(self.land(found, false))
    }

    /// Positions on the first value of `key` and returns it.
    pub fn search_key(&mut self, tree: &impl ReadTree, key: &[u8]) -> Result<Option<Bytes>> {
        let t = tree.tree_ref();
        self.sync(&t)?;
        let found = seek_key(&t, key)?.filter(|pos| pos.key.as_ref() == key);
        Ok(self.land_value(found))
    }

    /// Positions on the first pair whose key is not less than `key` and
    /// returns its value.
    pub fn search_key_range(&mut self, tree: &impl ReadTree, key: &[u8]) -> Result<Option<Bytes>> {
        let t = tree.tree_ref();
        self.sync(&t)?;
        let found = seek_key(&t, key)?;
        Ok(self.land_value(found))
    }

    /// Positions on exactly `(key, value)`.
    pub fn search_both(&mut self, tree: &impl ReadTree, key: &[u8], value: &[u8]) -> Result<bool> {
        let t = tree.tree_ref();
        self.sync(&t)?;
        let found = seek_pair(&t, key, value)?
            .filter(|pos| pos.key.as_ref() == key && pos.value.as_ref() == value);
        Ok(self.land(found, false))
    }

    /// Positions on the smallest value of `key` not less than `value` and
    /// returns it.
    pub fn search_both_range(
        &mut self,
        tree: &impl ReadTree,
        key: &[u8],
        value: &[u8],
    ) -> Result<Option<Bytes>> {
        let t = tree.tree_ref();
        self.sync(&t)?;
        let found = seek_pair(&t, key, value)?.filter(|pos| pos.key.as_ref() == key);
        Ok(self.land_value(found))
    }

    fn land_value(&mut self, found: Option<Pos>) -> Option<Bytes> {
        let value = found.as_ref().map(|pos| pos.value.clone());
        self.land(found, false);
        value
    }

    /// Whether the cursor stands on a pair.
    pub fn is_positioned(&self) -> bool {
        matches!(self.state, State::On(_))
    }

    /// Key of the current pair. After the pair is deleted this still reports
    /// it until the cursor moves.
    pub fn key(&self) -> Option<&Bytes> {
        match &self.state {
            State::Unpositioned => None,
            State::On(pos) => Some(&pos.key),
            State::Vanished { key, .. } => Some(key),
        }
    }

    /// Value of the current pair, with the same lifetime rules as [`key`](Self::key).
    pub fn value(&self) -> Option<&Bytes> {
        match &self.state {
            State::Unpositioned => None,
            State::On(pos) => Some(&pos.value),
            State::Vanished { value, .. } => Some(value),
        }
    }

    /// Number of values stored under the current key.
    pub fn count(&mut self, tree: &impl ReadTree) -> Result<u64> {
        let t = tree.tree_ref();
        self.sync(&t)?;
        let Some(key) = self.key() else {
            return Ok(0);
        };
        let Some((page, idx)) = t.view.find(t.src, key)? else {
            return Ok(0);
        };
        match &bottom_entry(&page, idx)?.value {
            LeafValue::Single(_) => Ok(1),
            LeafValue::Duplicates(slot) => dup_size(t.src, slot),
        }
    }

    /// Deletes the current pair. Returns false when there is none, which
    /// includes a second call without an intervening move.
    pub fn delete_current(&mut self, tree: &mut MutableTree) -> Result<bool> {
        self.sync(&tree.tree_ref())?;
        let State::On(pos) = &self.state else {
            return Ok(false);
        };
        let (key, value) = (pos.key.clone(), pos.value.clone());
        let deleted = if tree.allows_duplicates() {
            tree.delete_pair(&key, &value)?
        } else {
            tree.delete(&key)?
        };
        let t = tree.tree_ref();
        self.generation = t.generation;
        self.state = State::Vanished {
            next: seek_pair(&t, &key, &value)?,
            key,
            value,
        };
        Ok(deleted)
    }
}

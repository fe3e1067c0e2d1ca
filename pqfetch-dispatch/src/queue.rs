//! Bounded dispatch queue.
//!
//! Entries are grouped by owner and kept in admission order. The queue itself
//! performs no I/O: [`DispatchQueue::drain`] hands each eligible entry to a
//! continuation and counts the ones it accepts against the ceiling.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Admission handle, monotonically increasing per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub struct DispatchQueue<O, T> {
    groups: HashMap<O, BTreeMap<Ticket, T>>,
    next_ticket: u64,
    in_flight: usize,
    ceiling: usize,
}

impl<O, T> DispatchQueue<O, T>
where
    O: Eq + Hash + Clone,
{
    /// Creates an empty queue. A ceiling of zero is raised to one.
    pub fn new(ceiling: usize) -> Self {
        Self {
            groups: HashMap::new(),
            next_ticket: 0,
            in_flight: 0,
            ceiling: ceiling.max(1),
        }
    }

    /// Appends `item` to the owner's sequence.
    pub fn admit(&mut self, owner: O, item: T) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.groups.entry(owner).or_default().insert(ticket, item);
        ticket
    }

    /// Removes an entry. Absent tickets are a no-op.
    pub fn remove(&mut self, owner: &O, ticket: Ticket) -> Option<T> {
        let group = self.groups.get_mut(owner)?;
        let item = group.remove(&ticket);
        if group.is_empty() {
            self.groups.remove(owner);
        }
        item
    }

    /// Walks the owner's entries from the front while capacity remains.
    ///
    /// `accept` returning `true` removes the entry and takes a slot; `false`
    /// leaves it queued without touching the counter. Returns the number of
    /// entries accepted.
    pub fn drain<F>(&mut self, owner: &O, mut accept: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let Some(group) = self.groups.get_mut(owner) else {
            return 0;
        };

        let mut accepted = Vec::new();
        for (ticket, item) in group.iter() {
            if self.in_flight >= self.ceiling {
                break;
            }
            if accept(item) {
                accepted.push(*ticket);
                self.in_flight += 1;
            }
        }

        for ticket in &accepted {
            group.remove(ticket);
        }
        if group.is_empty() {
            self.groups.remove(owner);
        }
        accepted.len()
    }

    /// Frees one in-flight slot.
    pub fn release(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub fn len(&self, owner: &O) -> usize {
        self.groups.get(owner).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, owner: &O) -> bool {
        self.len(owner) == 0
    }

    /// Entries queued across every owner.
    pub fn total_len(&self) -> usize {
        self.groups.values().map(BTreeMap::len).sum()
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    #[inline]
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    #[inline]
    pub fn has_capacity(&self) -> bool {
        self.in_flight < self.ceiling
    }

    /// Removes and returns every entry of the owner, in admission order.
    pub fn take_all(&mut self, owner: &O) -> Vec<T> {
        self.groups
            .remove(owner)
            .map(|group| group.into_values().collect())
            .unwrap_or_default()
    }
}

//! Generational arena for scheduler records.
//!
//! Tasks and deferred callbacks live in arenas owned by the scheduler. An
//! [`ArenaIndex`] pairs a slot number with a generation counter, so a stale
//! wake for a finished task can never reach the task that reuses its slot.

use core::fmt;

/// An index into an [`Arena`] with a generation counter for ABA safety.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaIndex {
    index: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Creates an index from raw parts (primarily for testing).
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the slot number.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation counter.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

#[derive(Debug)]
enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

/// Slot storage with stable generational indices and a free list.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no slot is occupied.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a value built from its own index.
    ///
    /// Records that embed their id (tasks carry their [`TaskId`](crate::TaskId))
    /// are constructed in one step without placeholder ids.
    pub fn insert_with<F>(&mut self, f: F) -> ArenaIndex
    where
        F: FnOnce(ArenaIndex) -> T,
    {
        let (index, generation) = match self.free_head {
            Some(free) => match self.slots[free as usize] {
                Slot::Vacant {
                    next_free,
                    generation,
                } => {
                    self.free_head = next_free;
                    (free, generation)
                }
                Slot::Occupied { .. } => unreachable!("free list pointed to occupied slot"),
            },
            None => {
                assert!(self.slots.len() < u32::MAX as usize, "arena overflow");
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Vacant {
                    next_free: None,
                    generation: 0,
                });
                (index, 0)
            }
        };
        let idx = ArenaIndex { index, generation };
        self.slots[index as usize] = Slot::Occupied {
            value: f(idx),
            generation,
        };
        self.len += 1;
        idx
    }

    /// Inserts a value and returns its index.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.insert_with(|_| value)
    }

    /// Removes and returns the value at `idx`, if it is still live.
    pub fn remove(&mut self, idx: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(idx.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == idx.generation => {
                let vacant = Slot::Vacant {
                    next_free: self.free_head,
                    generation: generation.wrapping_add(1),
                };
                let old = core::mem::replace(slot, vacant);
                self.free_head = Some(idx.index);
                self.len -= 1;
                match old {
                    Slot::Occupied { value, .. } => Some(value),
                    Slot::Vacant { .. } => unreachable!(),
                }
            }
            _ => None,
        }
    }

    /// Returns a reference to the live value at `idx`.
    #[must_use]
    pub fn get(&self, idx: ArenaIndex) -> Option<&T> {
        match self.slots.get(idx.index as usize)? {
            Slot::Occupied { value, generation } if *generation == idx.generation => Some(value),
            _ => None,
        }
    }

    /// Returns a mutable reference to the live value at `idx`.
    pub fn get_mut(&mut self, idx: ArenaIndex) -> Option<&mut T> {
        match self.slots.get_mut(idx.index as usize)? {
            Slot::Occupied { value, generation } if *generation == idx.generation => Some(value),
            _ => None,
        }
    }

    /// Removes every live value, returning them in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        for i in 0..self.slots.len() {
            if let Slot::Occupied { generation, .. } = self.slots[i] {
                let idx = ArenaIndex {
                    index: i as u32,
                    generation,
                };
                if let Some(value) = self.remove(idx) {
                    out.push(value);
                }
            }
        }
        out
    }
}

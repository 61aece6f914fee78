//! Open-addressing contact map.
//!
//! Keys are 64-bit composite identities (device tag in the high half, contact
//! id in the low half, see [`contact_key`]). Linear probing over a
//! power-of-two table; removals leave tombstones so existing probe chains stay
//! intact. When tombstones outnumber live entries the table is rehashed in
//! place instead of grown, so capacity tracks peak concurrent contacts and
//! not the number of contacts a session has seen.

/// Smallest table the tracker ever allocates.
pub const MIN_CAPACITY: usize = 16;

/// Pack a device tag and a per-frame contact id into one key.
pub fn contact_key(device_tag: u32, contact_id: i32) -> u64 {
    (u64::from(device_tag) << 32) | u64::from(contact_id as u32)
}

#[derive(Debug, Clone)]
enum Slot<V> {
    Empty,
    Occupied(u64, V),
    Tombstone,
}

/// Map from contact identity to per-contact state.
#[derive(Debug, Clone)]
pub struct ContactTracker<V> {
    slots: Vec<Slot<V>>,
    count: usize,
    tombstones: usize,
    growths: u64,
    rehashes: u64,
}

impl<V: Default> ContactTracker<V> {
    pub fn new() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }

    /// Capacity is rounded up to a power of two, at least [`MIN_CAPACITY`].
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        Self {
            slots: empty_slots(capacity),
            count: 0,
            tombstones: 0,
            growths: 0,
            rehashes: 0,
        }
    }

    /// Return the value for `key`, inserting a default one if absent.
    ///
    /// The flag is `true` when the key already existed.
    pub fn upsert(&mut self, key: u64) -> (&mut V, bool) {
        if let Some(index) = self.find(key) {
            return (self.value_at(index), true);
        }
        if (self.count + self.tombstones) * 2 >= self.slots.len() {
            if self.tombstones > self.count {
                self.rehash_in_place();
            } else {
                self.grow();
            }
        }
        let index = self.insertion_slot(key);
        if matches!(self.slots[index], Slot::Tombstone) {
            self.tombstones -= 1;
        }
        self.slots[index] = Slot::Occupied(key, V::default());
        self.count += 1;
        (self.value_at(index), false)
    }

    pub fn get(&self, key: u64) -> Option<&V> {
        let index = self.find(key)?;
        match &self.slots[index] {
            Slot::Occupied(_, value) => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: u64) -> Option<&mut V> {
        let index = self.find(key)?;
        match &mut self.slots[index] {
            Slot::Occupied(_, value) => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, key: u64) -> bool {
        self.find(key).is_some()
    }

    /// Remove `key`, leaving a tombstone. Returns the value if it was present.
    pub fn remove(&mut self, key: u64) -> Option<V> {
        let index = self.find(key)?;
        match std::mem::replace(&mut self.slots[index], Slot::Tombstone) {
            Slot::Occupied(_, value) => {
                self.count -= 1;
                self.tombstones += 1;
                Some(value)
            }
            other => {
                self.slots[index] = other;
                None
            }
        }
    }

    /// Keep only entries for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(u64, &mut V) -> bool) {
        for slot in self.slots.iter_mut() {
            let remove = match slot {
                Slot::Occupied(key, value) => !keep(*key, value),
                _ => false,
            };
            if remove {
                *slot = Slot::Tombstone;
                self.count -= 1;
                self.tombstones += 1;
            }
        }
    }

    /// Empty the table, keeping its capacity.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = Slot::Empty;
        }
        self.count = 0;
        self.tombstones = 0;
    }

    /// Empty the table and drop back to a minimum-capacity allocation.
    pub fn clear_and_shrink(&mut self) {
        self.slots = empty_slots(MIN_CAPACITY);
        self.count = 0;
        self.tombstones = 0;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Number of times the table has reallocated.
    pub fn growths(&self) -> u64 {
        self.growths
    }

    /// Number of same-capacity rehashes that cleared tombstones.
    pub fn rehashes(&self) -> u64 {
        self.rehashes
    }

    /// Occupied entries in table order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &V)> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied(key, value) => Some((*key, value)),
            _ => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u64, &mut V)> {
        self.slots.iter_mut().filter_map(|slot| match slot {
            Slot::Occupied(key, value) => Some((*key, value)),
            _ => None,
        })
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn find(&self, key: u64) -> Option<usize> {
        let mask = self.mask();
        let mut index = hash(key) as usize & mask;
        for _ in 0..self.slots.len() {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Occupied(k, _) if *k == key => return Some(index),
                _ => {}
            }
            index = (index + 1) & mask;
        }
        None
    }

    /// First tombstone or empty slot on `key`'s probe chain.
    fn insertion_slot(&self, key: u64) -> usize {
        let mask = self.mask();
        let mut index = hash(key) as usize & mask;
        loop {
            if !matches!(self.slots[index], Slot::Occupied(..)) {
                return index;
            }
            index = (index + 1) & mask;
        }
    }

    fn value_at(&mut self, index: usize) -> &mut V {
        match &mut self.slots[index] {
            Slot::Occupied(_, value) => value,
            // Callers only pass indices they just found or filled.
            _ => unreachable!("tracker slot {index} is not occupied"),
        }
    }

    /// Drop every tombstone without reallocating.
    ///
    /// Walks the table once, starting after a slot that was empty before the
    /// tombstones were cleared, and re-inserts each entry from its home
    /// slot. An entry only ever moves backwards along its own probe chain,
    /// into slots already settled by the walk.
    fn rehash_in_place(&mut self) {
        let Some(start) = self.slots.iter().position(|s| matches!(s, Slot::Empty)) else {
            self.grow();
            return;
        };
        for slot in self.slots.iter_mut() {
            if matches!(slot, Slot::Tombstone) {
                *slot = Slot::Empty;
            }
        }
        self.tombstones = 0;
        self.rehashes += 1;

        let mask = self.mask();
        for step in 1..self.slots.len() {
            let index = (start + step) & mask;
            if !matches!(self.slots[index], Slot::Occupied(..)) {
                continue;
            }
            if let Slot::Occupied(key, value) = std::mem::replace(&mut self.slots[index], Slot::Empty) {
                let target = self.insertion_slot(key);
                self.slots[target] = Slot::Occupied(key, value);
            }
        }
    }

    fn grow(&mut self) {
        let capacity = self.slots.len() * 2;
        let old = std::mem::replace(&mut self.slots, empty_slots(capacity));
        self.tombstones = 0;
        self.growths += 1;
        for slot in old {
            if let Slot::Occupied(key, value) = slot {
                let index = self.insertion_slot(key);
                self.slots[index] = Slot::Occupied(key, value);
            }
        }
    }
}

impl<V: Default> Default for ContactTracker<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn empty_slots<V>(capacity: usize) -> Vec<Slot<V>> {
    let mut slots = Vec::with_capacity(capacity);
    slots.resize_with(capacity, || Slot::Empty);
    slots
}

/// 64-bit finalizer; spreads packed keys whose low bits differ little.
fn hash(key: u64) -> u64 {
    let mut h = key;
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

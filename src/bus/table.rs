// the descriptor table: a sparse, reuse-on-reopen vector of channel slots.

use std::fmt;

use crate::bus::core::Channel;

/// Descriptor naming a channel within one bus
///
/// Descriptors are dense small integers. A closed channel's descriptor is
/// recycled by the next `open` on the same bus, so a stale descriptor may
/// come to name a different, later channel.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChannelId(pub(crate) usize);

impl ChannelId {
    /// The slot index behind this descriptor
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Slot table owned by a bus. The table never shrinks; `insert` reuses the
/// lowest empty slot before growing.
#[derive(Default)]
pub(crate) struct ChannelTable {
    slots: Vec<Option<Channel>>,
}

impl ChannelTable {
    pub(crate) fn new() -> Self {
        ChannelTable::default()
    }

    /// Place `channel` in the lowest empty slot, appending one if none is
    /// free, and return its descriptor.
    pub(crate) fn insert(&mut self, channel: Channel) -> ChannelId {
        if let Some(index) = self.slots.iter().position(Option::is_none) {
            self.slots[index] = Some(channel);
            ChannelId(index)
        } else {
            self.slots.push(Some(channel));
            ChannelId(self.slots.len() - 1)
        }
    }

    /// Empty the slot and hand the channel back. `None` for stale
    /// descriptors, making close idempotent.
    pub(crate) fn remove(&mut self, id: ChannelId) -> Option<Channel> {
        self.slots.get_mut(id.0).and_then(Option::take)
    }

    pub(crate) fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Open channels in ascending descriptor order.
    pub(crate) fn iter_open(&self) -> impl Iterator<Item = &Channel> {
        self.slots.iter().flatten()
    }

    pub(crate) fn iter_open_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.slots.iter_mut().flatten()
    }

    /// Empty every slot, handing the channels back in descriptor order.
    pub(crate) fn take_all(&mut self) -> Vec<Channel> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

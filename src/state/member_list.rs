use std::io::Cursor;
use std::sync::Mutex;

use crate::gateway::events::{ListGroup, ListItem, ListOp, MemberListUpdate};
use crate::models::{GuildId, Overwrite};
use crate::permissions::VIEW_CHANNEL;

/// Slots per subscription chunk.
pub const CHUNK_SIZE: usize = 100;

/// The chunk a slot index falls into.
pub fn chunk_from_index(index: usize) -> usize {
    index / CHUNK_SIZE
}

/// Compute the list ID for a channel from its permission overwrites.
///
/// Overwrites that grant the view permission are collected as `allow`,
/// overwrites that revoke it as `deny`; both sets are sorted and deduped,
/// rendered as `allow:<id>`/`deny:<id>` joined with commas (allows first),
/// and hashed with 32-bit murmur3. A channel visible to everyone has the
/// literal ID `"everyone"`. The ID is stable across sessions, so distinct
/// channels with identical view permissions share one list.
pub fn compute_list_id(overwrites: &[Overwrite]) -> String {
    let mut allows = Vec::new();
    let mut denies = Vec::new();

    for ow in overwrites {
        if ow.allow & VIEW_CHANNEL != 0 {
            allows.push(ow.id);
        } else if ow.deny & VIEW_CHANNEL != 0 {
            denies.push(ow.id);
        }
    }

    if allows.is_empty() && denies.is_empty() {
        return "everyone".into();
    }

    allows.sort_unstable();
    allows.dedup();
    denies.sort_unstable();
    denies.dedup();

    let mut input = Vec::with_capacity(allows.len() + denies.len());
    for id in &allows {
        input.push(format!("allow:{id}"));
    }
    for id in &denies {
        input.push(format!("deny:{id}"));
    }
    let input = input.join(",");

    let hash = murmur3::murmur3_32(&mut Cursor::new(input.as_bytes()), 0)
        .expect("in-memory read cannot fail");
    hash.to_string()
}

/// Local state of one lazy member list: a sparse, index-addressable mirror
/// of the server-side list, maintained by replaying its operation stream.
pub struct List {
    id: String,
    guild_id: GuildId,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    member_count: u32,
    online_count: u32,
    groups: Vec<ListGroup>,
    /// One entry per server-side list position; `None` for slots that are
    /// not yet known or were invalidated.
    slots: Vec<Option<ListItem>>,
}

impl List {
    pub fn new(id: String, guild_id: GuildId) -> List {
        List {
            id,
            guild_id,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn member_count(&self) -> u32 {
        self.inner.lock().unwrap().member_count
    }

    pub fn online_count(&self) -> u32 {
        self.inner.lock().unwrap().online_count
    }

    /// View the slot vector under the list's lock. The callback must not
    /// retain the slice and must not call back into this list.
    pub fn view_items<R>(&self, f: impl FnOnce(&[Option<ListItem>]) -> R) -> R {
        let inner = self.inner.lock().unwrap();
        f(&inner.slots)
    }

    /// View the group descriptors under the list's lock. Same rules as
    /// `view_items`.
    pub fn view_groups<R>(&self, f: impl FnOnce(&[ListGroup]) -> R) -> R {
        let inner = self.inner.lock().unwrap();
        f(&inner.groups)
    }

    /// Number of empty slots currently held.
    pub fn count_empty(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.slots.iter().filter(|s| s.is_none()).count()
    }

    /// Members the list can show: everything when the offline group is
    /// streamed, otherwise only online members. Caps chunk requests.
    pub fn total_visible(&self) -> u32 {
        let inner = self.inner.lock().unwrap();
        if inner.groups.iter().any(|g| g.id == "offline") {
            inner.member_count
        } else {
            inner.online_count
        }
    }

    /// The highest chunk any held slot falls into.
    pub fn max_chunk(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        if inner.slots.is_empty() {
            0
        } else {
            chunk_from_index(inner.slots.len() - 1)
        }
    }

    /// Replay an operation stream onto the slot vector. DELETE and
    /// INVALIDATE record what they removed back into the op, so observers
    /// behind the dispatcher can still see the dropped rows. Out-of-bounds
    /// ops are reported and skipped; later ops still apply.
    pub(crate) fn apply(&self, update: &mut MemberListUpdate, on_error: impl Fn(anyhow::Error)) {
        let mut inner = self.inner.lock().unwrap();
        inner.member_count = update.member_count;
        inner.online_count = update.online_count;
        inner.groups = update.groups.clone();

        for op in update.ops.iter_mut() {
            match op {
                ListOp::Sync { range, items } => {
                    let [start, end] = *range;
                    grow(&mut inner.slots, end + 1);
                    for (i, item) in items.iter().enumerate() {
                        match inner.slots.get_mut(start + i) {
                            Some(slot) => *slot = Some(item.clone()),
                            None => break,
                        }
                    }
                }

                ListOp::Invalidate { range, items } => {
                    let [start, end] = *range;
                    let upper = end.min(inner.slots.len());
                    if start < upper {
                        *items = inner.slots[start..upper]
                            .iter()
                            .map(|slot| slot.clone().unwrap_or_default())
                            .collect();
                        for slot in &mut inner.slots[start..upper] {
                            *slot = None;
                        }
                    }
                }

                ListOp::Insert { index, item } => {
                    if *index > inner.slots.len() {
                        on_error(anyhow::anyhow!(
                            "insert out of range: len={} index={}",
                            inner.slots.len(),
                            index,
                        ));
                        continue;
                    }
                    let item = item.clone();
                    inner.slots.insert(*index, Some(item));
                }

                ListOp::Update { index, item } => {
                    if *index >= inner.slots.len() {
                        on_error(anyhow::anyhow!(
                            "update out of range: len={} index={}",
                            inner.slots.len(),
                            index,
                        ));
                        continue;
                    }
                    inner.slots[*index] = Some(item.clone());
                }

                ListOp::Delete { index, item } => {
                    if *index >= inner.slots.len() {
                        on_error(anyhow::anyhow!(
                            "delete out of range: len={} index={}",
                            inner.slots.len(),
                            index,
                        ));
                        continue;
                    }
                    *item = inner.slots.remove(*index);
                }
            }
        }

        // Items past the last filled slot are meaningless; drop them.
        while matches!(inner.slots.last(), Some(None)) {
            inner.slots.pop();
        }
    }
}

fn grow(slots: &mut Vec<Option<ListItem>>, len: usize) {
    if slots.len() < len {
        slots.resize(len, None);
    }
}

//! Free-page bookkeeping.
//!
//! Freed page ids are recorded in free-list pages ("containers"). Containers
//! form a singly linked list that starts at page 1. Each container stores up
//! to `capacity` page ids from the start of the page, with unused slots set
//! to 0, and the id of the next container in its last four bytes.
//!
//! `FreeList` keeps the in-memory view of that chain. It performs no I/O:
//! every mutation is split into a "stage" step that returns the container
//! bytes the pager must write, and a "commit" step applied once the write
//! succeeded. A failed write therefore leaves the in-memory state untouched.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::storage::page::{FIRST_FREE_LIST_PAGE, Page, PageId};
use crate::storage::pager::PagerError;

/// Bytes used by one page id in a container.
const PAGE_ID_SIZE: usize = 4;

/// One free-list container page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeListPage {
    /// Page holding this container.
    pub page_id: PageId,
    /// Free page ids recorded here, in the order they were freed.
    pub ids: Vec<PageId>,
    /// Next container in the chain, 0 for the tail.
    pub next: PageId,
}

impl FreeListPage {
    /// An empty container stored at `page_id`.
    #[must_use]
    pub const fn empty(page_id: PageId) -> Self {
        Self {
            page_id,
            ids: Vec::new(),
            next: 0,
        }
    }

    /// Number of page ids a container of `page_size` bytes can hold.
    #[must_use]
    pub const fn capacity(page_size: usize) -> usize {
        (page_size - PAGE_ID_SIZE) / PAGE_ID_SIZE
    }

    /// Serialize into a page of `page_size` bytes.
    #[must_use]
    pub fn encode(&self, page_size: usize) -> Page {
        let mut page = Page::zeroed(page_size);
        for (slot, &id) in self.ids.iter().enumerate() {
            page.write_u32(slot * PAGE_ID_SIZE, id);
        }
        page.write_u32(page_size - PAGE_ID_SIZE, self.next);
        page
    }

    /// Deserialize a container. Slots are read up to the first zero.
    #[must_use]
    pub fn decode(page_id: PageId, page: &Page) -> Self {
        let slots = Self::capacity(page.len());
        let ids = (0..slots)
            .map(|slot| page.read_u32(slot * PAGE_ID_SIZE))
            .take_while(|&id| id != 0)
            .collect();
        let next = page.read_u32(page.len() - PAGE_ID_SIZE);

        Self { page_id, ids, next }
    }
}

/// Result of planning a compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compaction {
    /// Highest page id still in use after truncation.
    pub new_last_page_id: PageId,
    /// Trailing free pages removed from their containers.
    pub released: Vec<PageId>,
    /// Trailing containers that no longer record any page.
    pub dropped: Vec<PageId>,
    /// Surviving containers whose contents changed.
    pub rewrites: Vec<FreeListPage>,
}

impl Compaction {
    /// Number of pages the file shrinks by.
    #[must_use]
    pub const fn reclaimed_pages(&self) -> usize {
        self.released.len() + self.dropped.len()
    }
}

/// In-memory view of the free-list chain.
#[derive(Debug)]
pub struct FreeList {
    page_size: usize,
    /// Container page id -> container.
    containers: HashMap<PageId, FreeListPage>,
    /// Container page id -> previous container in the chain.
    prev: HashMap<PageId, PageId>,
    /// Free page id -> container recording it.
    owner: HashMap<PageId, PageId>,
    /// Free page ids in the order they become reusable (last = next to reuse).
    reuse_order: Vec<PageId>,
    /// Last container in the chain.
    tail: PageId,
}

impl FreeList {
    /// Free list of a new file: a single empty container at page 1.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        let mut containers = HashMap::new();
        containers.insert(
            FIRST_FREE_LIST_PAGE,
            FreeListPage::empty(FIRST_FREE_LIST_PAGE),
        );

        Self {
            page_size,
            containers,
            prev: HashMap::new(),
            owner: HashMap::new(),
            reuse_order: Vec::new(),
            tail: FIRST_FREE_LIST_PAGE,
        }
    }

    /// Rebuild the free list from containers read in chain order.
    ///
    /// `last_page_id` bounds the ids a container may legitimately record.
    pub fn from_chain(
        page_size: usize,
        chain: Vec<FreeListPage>,
        last_page_id: PageId,
    ) -> Result<Self, PagerError> {
        let mut list = Self {
            page_size,
            containers: HashMap::new(),
            prev: HashMap::new(),
            owner: HashMap::new(),
            reuse_order: Vec::new(),
            tail: FIRST_FREE_LIST_PAGE,
        };

        let mut previous: Option<PageId> = None;
        for container in chain {
            if let Some(prev_id) = previous {
                list.prev.insert(container.page_id, prev_id);
            }
            previous = Some(container.page_id);
            list.tail = container.page_id;
            list.containers.insert(container.page_id, container);
        }

        for container in list.containers.values() {
            for &id in &container.ids {
                if id > last_page_id || list.containers.contains_key(&id) {
                    return Err(PagerError::CorruptedFreeList(format!(
                        "container {} records invalid page {id}",
                        container.page_id
                    )));
                }
                if list.owner.insert(id, container.page_id).is_some() {
                    return Err(PagerError::CorruptedFreeList(format!(
                        "page {id} is recorded as free twice"
                    )));
                }
            }
        }

        // Reuse follows chain order, so the most recently freed page goes first.
        let mut cursor = Some(FIRST_FREE_LIST_PAGE);
        while let Some(container_id) = cursor {
            let Some(container) = list.containers.get(&container_id) else {
                break;
            };
            list.reuse_order.extend(container.ids.iter().copied());
            cursor = (container.next != 0).then_some(container.next);
        }

        Ok(list)
    }

    /// Whether `page_id` is recorded as free.
    #[must_use]
    pub fn is_free(&self, page_id: PageId) -> bool {
        self.owner.contains_key(&page_id)
    }

    /// Whether `page_id` holds a free-list container.
    #[must_use]
    pub fn is_container(&self, page_id: PageId) -> bool {
        self.containers.contains_key(&page_id)
    }

    /// Number of free pages available for reuse.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.owner.len()
    }

    /// Number of container pages in the chain.
    #[cfg(test)]
    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// The page `allocate` should hand out next, if any.
    #[must_use]
    pub fn next_reusable(&self) -> Option<PageId> {
        self.reuse_order.last().copied()
    }

    /// Stage removing `page_id` from its container.
    #[must_use]
    pub fn stage_take(&self, page_id: PageId) -> Option<FreeListPage> {
        let owner = self.owner.get(&page_id)?;
        let mut container = self.containers.get(owner)?.clone();
        container.ids.retain(|&id| id != page_id);
        Some(container)
    }

    /// Commit a staged take.
    pub fn commit_take(&mut self, page_id: PageId, container: FreeListPage) {
        self.owner.remove(&page_id);
        if self.reuse_order.last() == Some(&page_id) {
            self.reuse_order.pop();
        } else {
            self.reuse_order.retain(|&id| id != page_id);
        }
        self.containers.insert(container.page_id, container);
    }

    /// Stage appending `page_id` to the tail container.
    ///
    /// Returns `None` when the tail is full.
    #[must_use]
    pub fn stage_append(&self, page_id: PageId) -> Option<FreeListPage> {
        let tail = self.containers.get(&self.tail)?;
        if tail.ids.len() >= FreeListPage::capacity(self.page_size) {
            return None;
        }

        let mut tail = tail.clone();
        tail.ids.push(page_id);
        Some(tail)
    }

    /// Commit a staged append.
    pub fn commit_append(&mut self, page_id: PageId, tail: FreeListPage) {
        self.owner.insert(page_id, tail.page_id);
        self.reuse_order.push(page_id);
        self.containers.insert(tail.page_id, tail);
    }

    /// Stage a new tail container at `container_id` recording `page_id`.
    ///
    /// Returns `(old_tail, new_tail)`, with the old tail linked to the new one.
    #[must_use]
    pub fn stage_new_tail(
        &self,
        container_id: PageId,
        page_id: PageId,
    ) -> Option<(FreeListPage, FreeListPage)> {
        let mut old_tail = self.containers.get(&self.tail)?.clone();
        old_tail.next = container_id;

        let new_tail = FreeListPage {
            page_id: container_id,
            ids: vec![page_id],
            next: 0,
        };

        Some((old_tail, new_tail))
    }

    /// Commit a staged tail extension.
    pub fn commit_new_tail(&mut self, old_tail: FreeListPage, new_tail: FreeListPage) {
        for &id in &new_tail.ids {
            self.owner.insert(id, new_tail.page_id);
            self.reuse_order.push(id);
        }
        self.prev.insert(new_tail.page_id, old_tail.page_id);
        self.tail = new_tail.page_id;
        self.containers.insert(old_tail.page_id, old_tail);
        self.containers.insert(new_tail.page_id, new_tail);
    }

    /// Plan a compaction of the pages above the first free-list page.
    ///
    /// The reclaimable range is the longest run of trailing pages that are
    /// either free or free-list containers. A container inside that run which
    /// still records a page below it pins the run's lower bound above itself.
    /// Returns `None` when nothing trailing can be reclaimed.
    #[must_use]
    pub fn plan_compaction(&self, last_page_id: PageId) -> Option<Compaction> {
        let mut cut = last_page_id;
        while cut > FIRST_FREE_LIST_PAGE && (self.is_free(cut) || self.is_container(cut)) {
            cut -= 1;
        }
        while let Some(blocking) = (cut + 1..=last_page_id).rev().find(|id| {
            self.containers
                .get(id)
                .is_some_and(|container| container.ids.iter().any(|&p| p <= cut))
        }) {
            cut = blocking;
        }
        if cut == last_page_id {
            return None;
        }

        let (released, dropped): (Vec<PageId>, Vec<PageId>) =
            (cut + 1..=last_page_id).rev().partition(|&id| self.is_free(id));

        let mut staged: HashMap<PageId, FreeListPage> = self
            .containers
            .iter()
            .filter(|&(&container_id, container)| {
                container_id <= cut && container.ids.iter().any(|&id| id > cut)
            })
            .map(|(&container_id, container)| {
                let mut container = container.clone();
                container.ids.retain(|&id| id <= cut);
                (container_id, container)
            })
            .collect();

        // Unlink dropped containers. Predecessors are staged even when they
        // are dropped themselves so later unlinks see the updated `next`.
        let mut prev = self.prev.clone();
        for &container_id in &dropped {
            let next = self.staged_mut(&mut staged, container_id)?.next;
            let prev_id = *prev.get(&container_id)?;
            self.staged_mut(&mut staged, prev_id)?.next = next;
            if next != 0 {
                prev.insert(next, prev_id);
            }
        }

        for id in &dropped {
            staged.remove(id);
        }
        let mut rewrites: Vec<FreeListPage> = staged.into_values().collect();
        rewrites.sort_by_key(|container| container.page_id);

        Some(Compaction {
            new_last_page_id: cut,
            released,
            dropped,
            rewrites,
        })
    }

    /// Apply a compaction once the containers have been rewritten.
    pub fn apply_compaction(&mut self, plan: &Compaction) {
        let released: HashSet<PageId> = plan.released.iter().copied().collect();
        for id in &plan.released {
            self.owner.remove(id);
        }
        self.reuse_order.retain(|id| !released.contains(id));

        for id in &plan.dropped {
            self.containers.remove(id);
        }
        for container in &plan.rewrites {
            self.containers.insert(container.page_id, container.clone());
        }

        self.relink();
    }

    /// Rebuild `prev` and `tail` by walking the chain from the first container.
    fn relink(&mut self) {
        self.prev.clear();
        self.tail = FIRST_FREE_LIST_PAGE;

        let mut current = FIRST_FREE_LIST_PAGE;
        while let Some(container) = self.containers.get(&current) {
            self.tail = current;
            if container.next == 0 {
                break;
            }
            self.prev.insert(container.next, current);
            current = container.next;
        }
    }

    /// Copy-on-write access to a container during planning.
    fn staged_mut<'a>(
        &self,
        staged: &'a mut HashMap<PageId, FreeListPage>,
        page_id: PageId,
    ) -> Option<&'a mut FreeListPage> {
        match staged.entry(page_id) {
            Entry::Occupied(entry) => Some(entry.into_mut()),
            Entry::Vacant(entry) => {
                let container = self.containers.get(&page_id)?;
                Some(entry.insert(container.clone()))
            }
        }
    }
}

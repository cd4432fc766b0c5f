//! Time-sliced path request queue
//!
//! Path planning is too expensive to run synchronously for every agent
//! every tick. Requests are parked in a small fixed pool of slots and the
//! queue spends a bounded node budget per tick, spread round-robin across
//! the pending slots. Completed results linger for a couple of updates so
//! the requester has time to collect them; uncollected results are
//! reclaimed.

use nav_common::{Error, Result};

use crate::nav_query::{NavQuery, PathPlan, PlanStatus, PolyRef, QueryFilter};

/// Handle identifying one queued path request
pub type PathQueueRef = u32;

/// The reserved invalid request handle
pub const PATHQ_INVALID: PathQueueRef = 0;

/// Number of request slots
const MAX_QUEUE: usize = 8;

/// Updates a completed result survives before being reclaimed
const KEEP_ALIVE: i32 = 2;

/// Progress state of a queued path request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// The search has not finished yet
    InProgress,
    /// A complete path is ready for collection
    Success,
    /// Only a partial path toward the target is ready
    PartialResult,
    /// The search failed; no usable path exists
    Failure,
}

#[derive(Debug)]
struct PathQuery {
    reference: PathQueueRef,
    start_ref: PolyRef,
    end_ref: PolyRef,
    start_pos: [f32; 3],
    end_pos: [f32; 3],
    filter: QueryFilter,
    status: QueryStatus,
    /// Counts down after completion; the slot frees at zero
    keep_alive: i32,
    /// Accumulated search budget in nodes; grows each update slice
    node_budget: usize,
    path: Vec<PolyRef>,
}

impl PathQuery {
    fn empty() -> Self {
        Self {
            reference: PATHQ_INVALID,
            start_ref: PolyRef::NONE,
            end_ref: PolyRef::NONE,
            start_pos: [0.0; 3],
            end_pos: [0.0; 3],
            filter: QueryFilter::default(),
            status: QueryStatus::InProgress,
            keep_alive: 0,
            node_budget: 0,
            path: Vec::new(),
        }
    }

    fn is_free(&self) -> bool {
        self.reference == PATHQ_INVALID
    }
}

/// Fixed pool of time-sliced path requests
#[derive(Debug)]
pub struct PathQueue {
    queue: [PathQuery; MAX_QUEUE],
    next_handle: PathQueueRef,
    max_path_size: usize,
    queue_head: usize,
}

impl PathQueue {
    /// Creates a queue whose results hold at most `max_path_size` polygons
    pub fn new(max_path_size: usize) -> Self {
        Self {
            queue: std::array::from_fn(|_| PathQuery::empty()),
            next_handle: 1,
            max_path_size,
            queue_head: 0,
        }
    }

    /// Drops every request, completed or not
    pub fn clear(&mut self) {
        for q in &mut self.queue {
            *q = PathQuery::empty();
        }
        self.queue_head = 0;
    }

    /// Parks a path request. Fails when every slot is occupied.
    pub fn request(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<PathQueueRef> {
        let Some(slot) = self.queue.iter_mut().find(|q| q.is_free()) else {
            return Err(Error::OutOfCapacity("path queue"));
        };

        let reference = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        if self.next_handle == PATHQ_INVALID {
            self.next_handle = 1;
        }

        *slot = PathQuery {
            reference,
            start_ref,
            end_ref,
            start_pos: *start_pos,
            end_pos: *end_pos,
            filter: filter.clone(),
            status: QueryStatus::InProgress,
            keep_alive: 0,
            node_budget: 0,
            path: Vec::new(),
        };
        Ok(reference)
    }

    /// Spends up to `max_iters` search nodes advancing pending requests,
    /// split evenly across them, and ages out uncollected results.
    pub fn update(&mut self, max_iters: usize, nav: &dyn NavQuery) {
        for q in &mut self.queue {
            if q.is_free() || q.status == QueryStatus::InProgress {
                continue;
            }
            q.keep_alive -= 1;
            if q.keep_alive <= 0 {
                log::debug!("path request {} expired uncollected", q.reference);
                *q = PathQuery::empty();
            }
        }

        let pending = self
            .queue
            .iter()
            .filter(|q| !q.is_free() && q.status == QueryStatus::InProgress)
            .count();
        if pending == 0 {
            return;
        }
        let slice = (max_iters / pending).max(1);

        for offset in 0..MAX_QUEUE {
            let i = (self.queue_head + offset) % MAX_QUEUE;
            let q = &mut self.queue[i];
            if q.is_free() || q.status != QueryStatus::InProgress {
                continue;
            }

            q.node_budget += slice;
            match nav.find_path(
                q.start_ref,
                q.end_ref,
                &q.start_pos,
                &q.end_pos,
                &q.filter,
                q.node_budget,
            ) {
                Ok(PathPlan { status, mut polys }) => match status {
                    PlanStatus::InProgress => {}
                    PlanStatus::Complete | PlanStatus::Partial => {
                        polys.truncate(self.max_path_size);
                        q.path = polys;
                        q.status = if status == PlanStatus::Complete {
                            QueryStatus::Success
                        } else {
                            QueryStatus::PartialResult
                        };
                        q.keep_alive = KEEP_ALIVE;
                    }
                },
                Err(e) => {
                    log::debug!("path request {} failed: {e}", q.reference);
                    q.status = QueryStatus::Failure;
                    q.keep_alive = KEEP_ALIVE;
                }
            }
        }
        self.queue_head = (self.queue_head + 1) % MAX_QUEUE;
    }

    /// Progress of a request. Fails for unknown or reclaimed handles.
    pub fn get_request_status(&self, reference: PathQueueRef) -> Result<QueryStatus> {
        self.queue
            .iter()
            .find(|q| q.reference == reference && reference != PATHQ_INVALID)
            .map(|q| q.status)
            .ok_or(Error::InvalidParam("unknown path request"))
    }

    /// Collects the result of a finished request and frees its slot.
    /// Fails for unknown handles; a collected handle no longer resolves.
    pub fn get_path_result(
        &mut self,
        reference: PathQueueRef,
        max_path: usize,
    ) -> Result<(QueryStatus, Vec<PolyRef>)> {
        let q = self
            .queue
            .iter_mut()
            .find(|q| q.reference == reference && reference != PATHQ_INVALID)
            .ok_or(Error::InvalidParam("unknown path request"))?;

        let status = q.status;
        let mut path = std::mem::take(&mut q.path);
        path.truncate(max_path);
        *q = PathQuery::empty();
        Ok((status, path))
    }

    /// Cancels a request and frees its slot; unknown handles are ignored
    pub fn cancel(&mut self, reference: PathQueueRef) {
        if reference == PATHQ_INVALID {
            return;
        }
        if let Some(q) = self.queue.iter_mut().find(|q| q.reference == reference) {
            *q = PathQuery::empty();
        }
    }

    /// Number of occupied slots
    pub fn size(&self) -> usize {
        self.queue.iter().filter(|q| !q.is_free()).count()
    }

    /// Number of requests still being searched
    pub fn pending_count(&self) -> usize {
        self.queue
            .iter()
            .filter(|q| !q.is_free() && q.status == QueryStatus::InProgress)
            .count()
    }

    /// Number of finished requests awaiting collection
    pub fn completed_count(&self) -> usize {
        self.queue
            .iter()
            .filter(|q| !q.is_free() && q.status != QueryStatus::InProgress)
            .count()
    }
}

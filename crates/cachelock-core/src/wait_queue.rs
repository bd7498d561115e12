//! FIFO queue of blocked bulk-lock requesters.
//!
//! The head of the queue is the *prevailing* requester: the only one allowed
//! to block without a deadline on a contended entry. Everyone else releases
//! what it holds and waits briefly. The queue is an index-linked list inside a
//! slab so that enqueue and removal by ticket are O(1).

use parking_lot::Mutex;

/// Identifier of one bulk-lock request, unique per registry.
pub type RequesterId = u64;

/// Handle returned by [`WaitQueue::enqueue`], used for O(1) removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueTicket {
    slot: usize,
    generation: u64,
}

#[derive(Debug)]
struct Node {
    requester: RequesterId,
    generation: u64,
    prev: Option<usize>,
    next: Option<usize>,
    live: bool,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    generation: u64,
}

impl Inner {
    fn resolve(&self, ticket: QueueTicket) -> Option<&Node> {
        self.nodes
            .get(ticket.slot)
            .filter(|n| n.live && n.generation == ticket.generation)
    }
}

/// Process-wide (per registry) FIFO of waiting requesters.
#[derive(Debug, Default)]
pub struct WaitQueue {
    inner: Mutex<Inner>,
}

impl WaitQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `requester` at the tail.
    pub fn enqueue(&self, requester: RequesterId) -> QueueTicket {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        let generation = inner.generation;
        let prev = inner.tail;
        let node = Node {
            requester,
            generation,
            prev,
            next: None,
            live: true,
        };
        let slot = if let Some(slot) = inner.free.pop() {
            inner.nodes[slot] = node;
            slot
        } else {
            inner.nodes.push(node);
            inner.nodes.len() - 1
        };
        match prev {
            Some(tail) => inner.nodes[tail].next = Some(slot),
            None => inner.head = Some(slot),
        }
        inner.tail = Some(slot);
        inner.len += 1;
        tracing::trace!(requester, position = inner.len, "requester enqueued");
        QueueTicket { slot, generation }
    }

    /// Unlinks the node behind `ticket`.
    ///
    /// Returns `false` if the ticket was already removed.
    pub fn remove(&self, ticket: QueueTicket) -> bool {
        let mut inner = self.inner.lock();
        let (prev, next, requester) = match inner.resolve(ticket) {
            Some(node) => (node.prev, node.next, node.requester),
            None => return false,
        };
        match prev {
            Some(p) => inner.nodes[p].next = next,
            None => inner.head = next,
        }
        match next {
            Some(n) => inner.nodes[n].prev = prev,
            None => inner.tail = prev,
        }
        let node = &mut inner.nodes[ticket.slot];
        node.live = false;
        node.prev = None;
        node.next = None;
        inner.free.push(ticket.slot);
        inner.len -= 1;
        tracing::trace!(requester, "requester dequeued");
        true
    }

    /// Returns true if `ticket` is at the head of the queue.
    #[must_use]
    pub fn is_head(&self, ticket: QueueTicket) -> bool {
        let inner = self.inner.lock();
        inner.resolve(ticket).is_some() && inner.head == Some(ticket.slot)
    }

    /// The prevailing requester, if any.
    #[must_use]
    pub fn head(&self) -> Option<RequesterId> {
        let inner = self.inner.lock();
        inner.head.map(|slot| inner.nodes[slot].requester)
    }

    /// Number of queued requesters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Returns true if no requester is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requesters in queue order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RequesterId> {
        let inner = self.inner.lock();
        let mut out = Vec::with_capacity(inner.len);
        let mut cursor = inner.head;
        while let Some(slot) = cursor {
            let node = &inner.nodes[slot];
            out.push(node.requester);
            cursor = node.next;
        }
        out
    }
}

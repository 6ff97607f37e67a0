use core::ptr::NonNull;

use crate::class::CLASS_COUNT;

/// Describes a free list node, overlaid onto the payload of a free block.
///
/// The linked lists are:
///  * **Intrusive**: a node is the first two words of its block's payload
///  * **Null-terminated** at both ends, with the head stored in [`FreeLists`]
///  * **Doubly linked** to allow removal given only the node and its class
///
/// # Safety
/// `FreeNode`s are inherently unsafe due to the referencial dependency between nodes.
/// A node must never be moved or overwritten while it is linked.
///
/// This data structure is not thread-safe, use mutexes/locks to mutually exclude data access.
#[derive(Debug)]
#[repr(C)]
pub struct FreeNode {
    pub prev: Option<NonNull<FreeNode>>,
    pub next: Option<NonNull<FreeNode>>,
}

/// An iterator over a free list, from head to tail.
///
/// This `struct` is created by [`FreeLists::iter`]. See its documentation for more.
#[derive(Debug, Clone, Copy)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Iter(Option<NonNull<FreeNode>>);

impl Iterator for Iter {
    type Item = NonNull<FreeNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.0?;
        self.0 = unsafe { (*current.as_ptr()).next };
        Some(current)
    }
}

/// The table of free list heads, one per size class.
#[derive(Debug)]
pub struct FreeLists {
    heads: [Option<NonNull<FreeNode>>; CLASS_COUNT],
}

impl FreeLists {
    pub const fn new() -> Self {
        Self { heads: [None; CLASS_COUNT] }
    }

    /// Empties every class without touching the nodes.
    pub fn clear(&mut self) {
        self.heads = [None; CLASS_COUNT];
    }

    #[inline]
    pub fn first(&self, class: usize) -> Option<NonNull<FreeNode>> {
        self.heads[class]
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.heads.iter().all(Option::is_none)
    }

    /// Push `node` onto the head of class `class`.
    ///
    /// # Safety
    /// * `node` must be valid for writes and not currently linked.
    /// * Every node in class `class` must be dereferencable and valid.
    #[inline]
    pub unsafe fn insert(&mut self, node: NonNull<FreeNode>, class: usize) {
        let next = self.heads[class];

        node.as_ptr().write(FreeNode { prev: None, next });

        if let Some(next) = next {
            (*next.as_ptr()).prev = Some(node);
        }

        self.heads[class] = Some(node);
    }

    /// Unlink `node` from class `class`, clearing its links.
    ///
    /// # Safety
    /// * `node` must be linked into class `class`, not any other class.
    /// * Every node in class `class` must be dereferencable and valid.
    #[inline]
    pub unsafe fn remove(&mut self, node: NonNull<FreeNode>, class: usize) {
        let FreeNode { prev, next } = node.as_ptr().read();

        match (prev, next) {
            // the only node in the list
            (None, None) => {
                debug_assert!(self.heads[class] == Some(node));
                self.heads[class] = None;
            }
            // the head
            (None, Some(next)) => {
                debug_assert!(self.heads[class] == Some(node));
                (*next.as_ptr()).prev = None;
                self.heads[class] = Some(next);
            }
            // the tail
            (Some(prev), None) => {
                (*prev.as_ptr()).next = None;
            }
            // somewhere inbetween
            (Some(prev), Some(next)) => {
                (*prev.as_ptr()).next = Some(next);
                (*next.as_ptr()).prev = Some(prev);
            }
        }

        node.as_ptr().write(FreeNode { prev: None, next: None });
    }

    /// Creates an iterator over class `class`, head first.
    ///
    /// # Safety
    /// The list must remain in a valid state during iteration.
    /// Removing nodes already returned by the iterator is okay,
    /// provided the returned node isn't the one the iterator is about to advance from.
    pub unsafe fn iter(&self, class: usize) -> Iter {
        Iter(self.first(class))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_node() -> NonNull<FreeNode> {
        NonNull::from(Box::leak(Box::new(FreeNode { prev: None, next: None })))
    }

    fn collect(lists: &FreeLists, class: usize) -> Vec<NonNull<FreeNode>> {
        unsafe { lists.iter(class).collect() }
    }

    #[test]
    fn test_free_lists() {
        let mut lists = FreeLists::new();
        assert!(lists.is_empty());

        let x = new_node();
        let y = new_node();
        let z = new_node();
        let w = new_node();

        unsafe {
            lists.insert(x, 3);
            lists.insert(y, 3);
            lists.insert(z, 3);
            lists.insert(w, 4);
        }

        // most recently inserted first
        assert_eq!(collect(&lists, 3), [z, y, x]);
        assert_eq!(collect(&lists, 4), [w]);
        assert!(collect(&lists, 0).is_empty());

        unsafe {
            // interior
            lists.remove(y, 3);
            assert_eq!(collect(&lists, 3), [z, x]);
            assert!((*y.as_ptr()).prev.is_none() && (*y.as_ptr()).next.is_none());

            // tail
            lists.remove(x, 3);
            assert_eq!(collect(&lists, 3), [z]);

            lists.insert(y, 3);
            assert_eq!(collect(&lists, 3), [y, z]);

            // head
            lists.remove(y, 3);
            assert_eq!(collect(&lists, 3), [z]);
            assert!((*z.as_ptr()).prev.is_none());

            // sole
            lists.remove(z, 3);
            assert!(lists.first(3).is_none());

            lists.remove(w, 4);
        }

        assert!(lists.is_empty());

        for node in [x, y, z, w] {
            unsafe { drop(Box::from_raw(node.as_ptr())) };
        }
    }

    #[test]
    fn test_clear() {
        let mut lists = FreeLists::new();
        let x = new_node();

        unsafe { lists.insert(x, 0) };
        assert!(!lists.is_empty());

        lists.clear();
        assert!(lists.is_empty());

        unsafe { drop(Box::from_raw(x.as_ptr())) };
    }
}

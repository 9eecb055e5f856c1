#![forbid(unsafe_code)]

//! The descriptor set shared by one poll.
//!
//! During the query phase every descriptor source adds the descriptors it
//! cares about and may suggest a maximum wait. The reactor then fills in
//! readiness, and the check phase reads it back.
//!
//! # Invariants
//!
//! - Interest for a descriptor is the union of every `add_*` call for it.
//! - Readiness is only ever a subset of the interest registered for that
//!   descriptor, except that `ERROR` is always reportable.
//! - The suggested timeout is the minimum of all suggestions.

use ahash::AHashMap;
use bitflags::bitflags;
use web_time::Duration;

/// A raw operating-system descriptor.
pub type Descriptor = i32;

bitflags! {
    /// What a source wants to hear about for one descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Interest: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        /// Exceptional conditions (out-of-band data, errors).
        const ERROR = 0b100;
    }
}

/// Readiness reported by the reactor uses the same bits as [`Interest`].
pub type Readiness = Interest;

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    interest: Interest,
    ready: Readiness,
}

/// Descriptors of interest for one poll, plus their readiness afterwards.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    entries: AHashMap<Descriptor, Entry>,
    /// Registration order, so reactors poll deterministically.
    order: Vec<Descriptor>,
    max_timeout: Option<Duration>,
}

impl DescriptorSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `interest` for `fd`, merging with earlier registrations.
    pub fn add(&mut self, fd: Descriptor, interest: Interest) {
        match self.entries.get_mut(&fd) {
            Some(entry) => entry.interest |= interest,
            None => {
                self.entries.insert(
                    fd,
                    Entry {
                        interest,
                        ready: Readiness::empty(),
                    },
                );
                self.order.push(fd);
            }
        }
    }

    pub fn add_read(&mut self, fd: Descriptor) {
        self.add(fd, Interest::READ);
    }

    pub fn add_write(&mut self, fd: Descriptor) {
        self.add(fd, Interest::WRITE);
    }

    pub fn add_error(&mut self, fd: Descriptor) {
        self.add(fd, Interest::ERROR);
    }

    /// Ask the poll to wait no longer than `timeout`.
    pub fn suggest_timeout(&mut self, timeout: Duration) {
        self.max_timeout = Some(match self.max_timeout {
            Some(current) => current.min(timeout),
            None => timeout,
        });
    }

    /// Smallest wait suggested during the query phase.
    #[must_use]
    pub fn max_timeout(&self) -> Option<Duration> {
        self.max_timeout
    }

    /// Whether no descriptor has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn interest(&self, fd: Descriptor) -> Interest {
        self.entries
            .get(&fd)
            .map_or(Interest::empty(), |entry| entry.interest)
    }

    /// Descriptors and their interest, in registration order.
    pub fn interests(&self) -> impl Iterator<Item = (Descriptor, Interest)> + '_ {
        self.order
            .iter()
            .filter_map(|fd| self.entries.get(fd).map(|entry| (*fd, entry.interest)))
    }

    /// Record readiness for `fd`. Bits outside the registered interest are
    /// dropped, except `ERROR`, which is always kept for a known descriptor.
    pub fn mark_ready(&mut self, fd: Descriptor, ready: Readiness) {
        if let Some(entry) = self.entries.get_mut(&fd) {
            entry.ready |= ready & (entry.interest | Interest::ERROR);
        }
    }

    #[must_use]
    pub fn readiness(&self, fd: Descriptor) -> Readiness {
        self.entries
            .get(&fd)
            .map_or(Readiness::empty(), |entry| entry.ready)
    }

    #[must_use]
    pub fn is_readable(&self, fd: Descriptor) -> bool {
        self.readiness(fd).contains(Interest::READ)
    }

    #[must_use]
    pub fn is_writable(&self, fd: Descriptor) -> bool {
        self.readiness(fd).contains(Interest::WRITE)
    }

    #[must_use]
    pub fn has_error(&self, fd: Descriptor) -> bool {
        self.readiness(fd).contains(Interest::ERROR)
    }

    /// Number of descriptors with any readiness.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| !entry.ready.is_empty())
            .count()
    }

    /// Forget readiness but keep interest (used after an interrupted poll).
    pub fn clear_readiness(&mut self) {
        for entry in self.entries.values_mut() {
            entry.ready = Readiness::empty();
        }
    }

    /// Reset to an empty set.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.max_timeout = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_merges_per_descriptor() {
        let mut set = DescriptorSet::new();
        set.add_read(3);
        set.add_write(3);
        set.add_read(4);
        assert_eq!(set.len(), 2);
        assert_eq!(set.interest(3), Interest::READ | Interest::WRITE);
        let order: Vec<_> = set.interests().map(|(fd, _)| fd).collect();
        assert_eq!(order, vec![3, 4]);
    }

    #[test]
    fn suggested_timeout_keeps_minimum() {
        let mut set = DescriptorSet::new();
        assert_eq!(set.max_timeout(), None);
        set.suggest_timeout(Duration::from_millis(50));
        set.suggest_timeout(Duration::from_millis(20));
        set.suggest_timeout(Duration::from_millis(80));
        assert_eq!(set.max_timeout(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn readiness_is_masked_by_interest() {
        let mut set = DescriptorSet::new();
        set.add_read(5);
        set.mark_ready(5, Interest::READ | Interest::WRITE);
        assert!(set.is_readable(5));
        assert!(!set.is_writable(5));
    }

    #[test]
    fn error_readiness_is_always_kept() {
        let mut set = DescriptorSet::new();
        set.add_write(6);
        set.mark_ready(6, Interest::ERROR);
        assert!(set.has_error(6));
    }

    #[test]
    fn unknown_descriptor_is_never_ready() {
        let mut set = DescriptorSet::new();
        set.mark_ready(9, Interest::READ);
        assert!(!set.is_readable(9));
        assert_eq!(set.ready_count(), 0);
    }

    #[test]
    fn clear_readiness_keeps_interest() {
        let mut set = DescriptorSet::new();
        set.add_read(1);
        set.mark_ready(1, Interest::READ);
        set.clear_readiness();
        assert!(!set.is_readable(1));
        assert_eq!(set.interest(1), Interest::READ);
        set.clear();
        assert!(set.is_empty());
    }
}

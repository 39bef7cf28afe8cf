//! Memory segments registered with the network for remote access.

use std::collections::BTreeMap;

use bytes::Bytes;

/// A region of memory that backends bind for remote direct access.
///
/// A segment is either *requested* (a size and alignment; a backend chooses
/// the address during attach) or *assigned* (a fixed, pre-allocated address).
/// Once the base address is known it never changes.
///
/// Every backend that binds the segment records an opaque blob describing the
/// binding. While exactly one backend has ever done so, it is also kept in a
/// shortcut slot so the common single-network case skips the map lookup.
/// Once a second backend binds the segment the shortcut is gone for good.
#[derive(Debug, Clone, Default)]
pub struct NetworkSegment {
    base: Option<u64>,
    bytes: usize,
    alignment: usize,
    single_network: Option<(String, Bytes)>,
    multi_bound: bool,
    networks: BTreeMap<String, Bytes>,
}

impl NetworkSegment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request(bytes: usize, alignment: usize) -> Self {
        let mut seg = Self::new();
        seg.request(bytes, alignment);
        seg
    }

    pub fn with_assignment(base: u64, bytes: usize) -> Self {
        let mut seg = Self::new();
        seg.assign(base, bytes);
        seg
    }

    /// Ask for `bytes` of memory aligned to `alignment`, to be placed by a
    /// backend.
    ///
    /// # Panics
    ///
    /// If the segment is already bound to an address.
    pub fn request(&mut self, bytes: usize, alignment: usize) {
        assert!(
            self.base.is_none(),
            "cannot re-request segment already bound at {:#x}",
            self.base.unwrap_or_default()
        );
        self.bytes = bytes;
        self.alignment = alignment;
    }

    /// Use the pre-allocated memory at `base`.
    ///
    /// # Panics
    ///
    /// If the segment is already bound to a different address.
    pub fn assign(&mut self, base: u64, bytes: usize) {
        self.set_base(base);
        self.bytes = bytes;
        self.alignment = 0;
    }

    /// Bind the segment to `base`. Binding again to the same address is a
    /// no-op.
    ///
    /// # Panics
    ///
    /// If the segment is already bound to a different address.
    pub fn set_base(&mut self, base: u64) {
        if let Some(old) = self.base {
            assert!(
                old == base,
                "segment base is immutable: bound at {:#x}, rebinding to {:#x}",
                old,
                base
            );
        }
        self.base = Some(base);
    }

    pub fn base(&self) -> Option<u64> {
        self.base
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn is_bound(&self) -> bool {
        self.base.is_some()
    }

    /// Record `data` as `backend`'s binding info, replacing any earlier blob
    /// from the same backend.
    pub fn add_rdma_info(&mut self, backend: &str, data: &[u8]) {
        self.networks
            .insert(backend.to_string(), Bytes::copy_from_slice(data));
        self.update_single_network();
    }

    /// The binding info `backend` recorded, if it bound this segment.
    pub fn get_rdma_info(&self, backend: &str) -> Option<&Bytes> {
        if let Some((name, data)) = &self.single_network {
            if name == backend {
                return Some(data);
            }
        }
        self.networks.get(backend)
    }

    /// Forget `backend`'s binding, returning the blob it had recorded.
    pub fn remove_rdma_info(&mut self, backend: &str) -> Option<Bytes> {
        let removed = self.networks.remove(backend);
        self.update_single_network();
        removed
    }

    /// Names of the backends that bound this segment.
    pub fn rdma_backends(&self) -> impl Iterator<Item = &str> + '_ {
        self.networks.keys().map(String::as_str)
    }

    fn update_single_network(&mut self) {
        if self.networks.len() > 1 {
            self.multi_bound = true;
        }
        self.single_network = if self.networks.len() == 1 && !self.multi_bound {
            self.networks
                .iter()
                .next()
                .map(|(name, data)| (name.clone(), data.clone()))
        } else {
            None
        };
    }

    #[cfg(test)]
    fn shortcut(&self) -> Option<&str> {
        self.single_network.as_ref().map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_unbound() {
        let seg = NetworkSegment::with_request(1 << 20, 64);
        assert_eq!(seg.base(), None);
        assert!(!seg.is_bound());
        assert_eq!(seg.bytes(), 1 << 20);
        assert_eq!(seg.alignment(), 64);
    }

    #[test]
    fn test_assign_binds() {
        let seg = NetworkSegment::with_assignment(0x7000_0000, 4096);
        assert_eq!(seg.base(), Some(0x7000_0000));
        assert_eq!(seg.bytes(), 4096);
    }

    #[test]
    fn test_set_base_same_value_allowed() {
        let mut seg = NetworkSegment::with_request(128, 8);
        seg.set_base(0x1000);
        seg.set_base(0x1000);
        assert_eq!(seg.base(), Some(0x1000));
    }

    #[test]
    #[should_panic(expected = "segment base is immutable")]
    fn test_set_base_rebind_panics() {
        let mut seg = NetworkSegment::with_assignment(0x1000, 128);
        seg.set_base(0x2000);
    }

    #[test]
    #[should_panic(expected = "segment base is immutable")]
    fn test_assign_rebind_panics() {
        let mut seg = NetworkSegment::with_assignment(0x1000, 128);
        seg.assign(0x3000, 128);
    }

    #[test]
    #[should_panic(expected = "cannot re-request")]
    fn test_request_after_bind_panics() {
        let mut seg = NetworkSegment::with_assignment(0x1000, 128);
        seg.request(256, 8);
    }

    #[test]
    fn test_single_backend_shortcut() {
        let mut seg = NetworkSegment::with_request(64, 8);
        seg.add_rdma_info("ucx", b"key-1");
        assert_eq!(seg.shortcut(), Some("ucx"));
        assert_eq!(seg.get_rdma_info("ucx").map(|b| &b[..]), Some(&b"key-1"[..]));
        assert_eq!(seg.get_rdma_info("gasnet"), None);
    }

    #[test]
    fn test_two_backends_clear_shortcut() {
        let mut seg = NetworkSegment::with_request(64, 8);
        seg.add_rdma_info("ucx", b"a");
        seg.add_rdma_info("gasnet", b"bb");
        assert_eq!(seg.shortcut(), None);
        assert_eq!(seg.get_rdma_info("ucx").map(|b| &b[..]), Some(&b"a"[..]));
        assert_eq!(seg.get_rdma_info("gasnet").map(|b| &b[..]), Some(&b"bb"[..]));
        let names: Vec<&str> = seg.rdma_backends().collect();
        assert_eq!(names, vec!["gasnet", "ucx"]);
    }

    #[test]
    fn test_readd_replaces_blob() {
        let mut seg = NetworkSegment::new();
        seg.add_rdma_info("ucx", b"old");
        seg.add_rdma_info("ucx", b"new");
        assert_eq!(seg.shortcut(), Some("ucx"));
        assert_eq!(seg.get_rdma_info("ucx").map(|b| &b[..]), Some(&b"new"[..]));
    }

    #[test]
    fn test_blob_is_copied() {
        let mut seg = NetworkSegment::new();
        let mut src = vec![1u8, 2, 3];
        seg.add_rdma_info("ucx", &src);
        src[0] = 9;
        assert_eq!(seg.get_rdma_info("ucx").map(|b| b.to_vec()), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_shortcut_not_restored_after_second_backend() {
        let mut seg = NetworkSegment::new();
        seg.add_rdma_info("ucx", b"a");
        seg.add_rdma_info("gasnet", b"b");
        assert_eq!(seg.remove_rdma_info("gasnet").map(|b| b.to_vec()), Some(b"b".to_vec()));
        assert_eq!(seg.shortcut(), None);
        assert_eq!(seg.get_rdma_info("ucx").map(|b| b.to_vec()), Some(b"a".to_vec()));

        seg.add_rdma_info("ucx", b"c");
        assert_eq!(seg.shortcut(), None);
        assert_eq!(seg.get_rdma_info("ucx").map(|b| b.to_vec()), Some(b"c".to_vec()));
    }

    #[test]
    fn test_remove_only_backend() {
        let mut seg = NetworkSegment::new();
        seg.add_rdma_info("ucx", b"a");
        assert!(seg.remove_rdma_info("ucx").is_some());
        assert_eq!(seg.shortcut(), None);
        assert_eq!(seg.rdma_backends().count(), 0);
        assert!(seg.remove_rdma_info("ucx").is_none());
    }
}

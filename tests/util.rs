use zerocopy::IntoBytes;

/// 8-byte-aligned backing storage for a meta region.
pub struct MetaBuf {
    words: Vec<u64>,
}

impl MetaBuf {
    pub fn for_nodes(nodes: u64) -> MetaBuf {
        MetaBuf {
            words: vec![0u64; (hexbox::meta_bytes_for(nodes) / 8) as usize],
        }
    }

    pub fn bytes(&mut self) -> &mut [u8] {
        self.words.as_mut_slice().as_mut_bytes()
    }
}

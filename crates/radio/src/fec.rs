//! Reed-Solomon erasure coding over whole chunks.
//!
//! Every chunk of a block, length prefix included, is one GF(2^8)
//! shard. Parity shards let the receiver rebuild any subset of lost
//! chunks as long as at least `data_packets` chunks of the block
//! arrived intact.

use reed_solomon_erasure::galois_8::ReedSolomon;
use rovercast_core::BlockGeometry;

use crate::RadioError;

pub struct BlockCoder {
    rs: ReedSolomon,
    geometry: BlockGeometry,
}

impl BlockCoder {
    pub fn new(geometry: BlockGeometry) -> Result<Self, RadioError> {
        let rs = ReedSolomon::new(geometry.data_packets, geometry.fec_packets)?;
        Ok(Self { rs, geometry })
    }

    pub fn geometry(&self) -> &BlockGeometry {
        &self.geometry
    }

    /// Computes the parity chunks for one block. Every data chunk must
    /// already be padded to the full packet length.
    pub fn encode_parity(&self, data: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, RadioError> {
        debug_assert_eq!(data.len(), self.geometry.data_packets);
        let mut shards: Vec<Vec<u8>> = data.to_vec();
        shards.resize(
            self.geometry.packets_per_block(),
            vec![0u8; self.geometry.packet_length],
        );
        self.rs.encode(&mut shards)?;
        Ok(shards.split_off(self.geometry.data_packets))
    }

    /// Fills in the `None` shards in place. The caller checks
    /// feasibility first; an infeasible call returns an error without
    /// touching the shards.
    pub fn reconstruct(&self, shards: &mut Vec<Option<Vec<u8>>>) -> Result<(), RadioError> {
        debug_assert_eq!(shards.len(), self.geometry.packets_per_block());
        self.rs.reconstruct(shards)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(geometry: &BlockGeometry, tag: u8) -> Vec<Vec<u8>> {
        (0..geometry.data_packets)
            .map(|i| vec![tag.wrapping_add(i as u8); geometry.packet_length])
            .collect()
    }

    #[test]
    fn parity_shape_matches_geometry() {
        let geometry = BlockGeometry::default();
        let coder = BlockCoder::new(geometry).unwrap();
        let parity = coder.encode_parity(&filled(&geometry, 7)).unwrap();
        assert_eq!(parity.len(), geometry.fec_packets);
        assert!(parity.iter().all(|p| p.len() == geometry.packet_length));
    }

    #[test]
    fn rebuilds_dropped_data_chunks() {
        let geometry = BlockGeometry::default();
        let coder = BlockCoder::new(geometry).unwrap();
        let data = filled(&geometry, 42);
        let parity = coder.encode_parity(&data).unwrap();

        let mut shards: Vec<Option<Vec<u8>>> = data
            .iter()
            .cloned()
            .map(Some)
            .chain(parity.into_iter().map(Some))
            .collect();
        // drop as many data chunks as there are parity chunks
        for slot in [0usize, 3, 5, 7] {
            shards[slot] = None;
        }
        coder.reconstruct(&mut shards).unwrap();
        for (i, original) in data.iter().enumerate() {
            assert_eq!(shards[i].as_deref(), Some(original.as_slice()));
        }
    }

    #[test]
    fn too_many_losses_is_an_error() {
        let geometry = BlockGeometry::default();
        let coder = BlockCoder::new(geometry).unwrap();
        let data = filled(&geometry, 9);
        let parity = coder.encode_parity(&data).unwrap();

        let mut shards: Vec<Option<Vec<u8>>> = data
            .into_iter()
            .map(Some)
            .chain(parity.into_iter().map(Some))
            .collect();
        for slot in 0..=geometry.fec_packets {
            shards[slot] = None;
        }
        assert!(coder.reconstruct(&mut shards).is_err());
    }
}

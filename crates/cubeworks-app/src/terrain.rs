//! Heightmap terrain from multi-octave simplex noise.

use cubeworks_voxel::{BlockData, CHUNK_SIZE, ChunkBlocks, padded_index};
use cubeworks_world::TerrainGenerator;
use glam::IVec3;
use noise::{NoiseFn, Simplex};

/// fBm parameters. Heights are in cells.
#[derive(Clone, Debug)]
pub struct TerrainParams {
    /// Height of the zero noise level.
    pub base_height: f64,
    /// Amplitude of the first octave.
    pub amplitude: f64,
    /// Frequency of the first octave, in cycles per cell.
    pub base_frequency: f64,
    pub octaves: u32,
    pub lacunarity: f64,
    pub persistence: f64,
    /// Depth of the dirt layer under the surface cell.
    pub soil_depth: i32,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            base_height: 8.0,
            amplitude: 12.0,
            base_frequency: 0.01,
            octaves: 4,
            lacunarity: 2.0,
            persistence: 0.5,
            soil_depth: 3,
        }
    }
}

/// Cells stamped by [`NoiseTerrain`].
#[derive(Clone, Copy, Debug)]
pub struct TerrainBlocks {
    pub stone: BlockData,
    pub dirt: BlockData,
    pub grass: BlockData,
}

pub struct NoiseTerrain {
    noise: Simplex,
    params: TerrainParams,
    blocks: TerrainBlocks,
}

impl NoiseTerrain {
    pub fn new(seed: u64, params: TerrainParams, blocks: TerrainBlocks) -> Self {
        Self {
            noise: Simplex::new(seed as u32),
            params,
            blocks,
        }
    }

    /// Global Y of the first air cell above the column at (`x`, `z`).
    pub fn height_at(&self, x: i32, z: i32) -> i32 {
        let mut total = 0.0;
        let mut frequency = self.params.base_frequency;
        let mut amplitude = self.params.amplitude;
        for _ in 0..self.params.octaves {
            total += self.noise.get([x as f64 * frequency, z as f64 * frequency]) * amplitude;
            frequency *= self.params.lacunarity;
            amplitude *= self.params.persistence;
        }
        (self.params.base_height + total).floor() as i32
    }

    fn block_at(&self, y: i32, height: i32) -> Option<BlockData> {
        if y >= height {
            None
        } else if y == height - 1 {
            Some(self.blocks.grass)
        } else if y >= height - 1 - self.params.soil_depth {
            Some(self.blocks.dirt)
        } else {
            Some(self.blocks.stone)
        }
    }
}

impl TerrainGenerator for NoiseTerrain {
    fn generate_terrain(&self, chunk_pos: IVec3, blocks: &mut ChunkBlocks) {
        for z in 0..CHUNK_SIZE {
            for x in 0..CHUNK_SIZE {
                let height = self.height_at(chunk_pos.x + x, chunk_pos.z + z);
                if height <= chunk_pos.y {
                    continue;
                }
                for y in 0..CHUNK_SIZE {
                    if let Some(block) = self.block_at(chunk_pos.y + y, height) {
                        blocks.set_raw(padded_index(IVec3::new(x, y, z)), block);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn terrain(seed: u64) -> NoiseTerrain {
        NoiseTerrain::new(
            seed,
            TerrainParams::default(),
            TerrainBlocks {
                stone: BlockData::of_type(1),
                dirt: BlockData::of_type(2),
                grass: BlockData::of_type(3),
            },
        )
    }

    #[test]
    fn test_heights_are_deterministic() {
        let a = terrain(7);
        let b = terrain(7);
        for (x, z) in [(0, 0), (-40, 13), (1000, -999)] {
            assert_eq!(a.height_at(x, z), b.height_at(x, z));
        }
    }

    #[test]
    fn test_column_layers() {
        let t = terrain(1);
        assert_eq!(t.block_at(10, 10), None);
        assert_eq!(t.block_at(9, 10), Some(t.blocks.grass));
        assert_eq!(t.block_at(6, 10), Some(t.blocks.dirt));
        assert_eq!(t.block_at(5, 10), Some(t.blocks.stone));
    }

    #[test]
    fn test_generated_chunk_matches_heights() {
        let t = terrain(3);
        let pos = IVec3::new(16, 0, -32);
        let mut blocks = ChunkBlocks::new();
        t.generate_terrain(pos, &mut blocks);

        for (x, z) in [(0, 0), (5, 11), (15, 15)] {
            let height = t.height_at(pos.x + x, pos.z + z);
            for y in 0..CHUNK_SIZE {
                let cell = blocks.get_at(IVec3::new(x, y, z));
                assert_eq!(cell.is_air(), y >= height, "column ({x}, {z}) y={y} h={height}");
            }
        }
    }
}

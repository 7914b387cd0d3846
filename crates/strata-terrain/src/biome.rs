//! Biome classification from a single low-frequency noise value.
//!
//! The biome noise value in `[-1, 1]` is split by five thresholds. Values
//! that sit between two thresholds blend the neighbouring biomes linearly, so
//! terrain amplitude changes smoothly across biome borders.

/// Terrain biomes ordered by rising amplitude.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Biome {
    Flat,
    Forest,
    Plains,
    Hills,
    Mountains,
}

/// Biome noise value at which each biome is at full weight, in biome order.
pub const BIOME_THRESHOLDS: [f64; 5] = [-2.0 / 3.0, -1.0 / 3.0, 0.0, 1.0 / 3.0, 2.0 / 3.0];

impl Biome {
    /// Every biome in threshold order.
    pub const ALL: [Biome; 5] = [
        Biome::Flat,
        Biome::Forest,
        Biome::Plains,
        Biome::Hills,
        Biome::Mountains,
    ];

    /// Position in [`Biome::ALL`] and [`BIOME_THRESHOLDS`].
    pub fn index(self) -> usize {
        match self {
            Biome::Flat => 0,
            Biome::Forest => 1,
            Biome::Plains => 2,
            Biome::Hills => 3,
            Biome::Mountains => 4,
        }
    }

    /// Height multiplier applied to this biome's terrain noise.
    pub fn amplitude(self) -> f64 {
        match self {
            Biome::Flat => 0.0,
            Biome::Forest => 0.4,
            Biome::Plains => 0.7,
            Biome::Hills => 1.4,
            Biome::Mountains => 6.3,
        }
    }
}

/// A biome and its share of the final height.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiomeWeight {
    pub biome: Biome,
    pub weight: f64,
}

/// One or two weighted biomes contributing to a height sample.
///
/// Weights always sum to 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiomeBlend {
    pub primary: BiomeWeight,
    pub secondary: Option<BiomeWeight>,
}

impl BiomeBlend {
    fn single(biome: Biome) -> Self {
        Self {
            primary: BiomeWeight { biome, weight: 1.0 },
            secondary: None,
        }
    }

    /// Classifies a biome noise value.
    ///
    /// Values at or beyond the outer thresholds clamp to the outermost biome.
    /// Between thresholds `t_i < v < t_(i+1)` the lower biome gets
    /// `(t_(i+1) - v) / (t_(i+1) - t_i)` and the upper biome the rest.
    pub fn from_noise(value: f64) -> Self {
        let first = BIOME_THRESHOLDS[0];
        let last = BIOME_THRESHOLDS[BIOME_THRESHOLDS.len() - 1];
        if value.is_nan() || value <= first {
            return Self::single(Biome::Flat);
        }
        if value >= last {
            return Self::single(Biome::Mountains);
        }

        for i in 0..BIOME_THRESHOLDS.len() - 1 {
            let low = BIOME_THRESHOLDS[i];
            let high = BIOME_THRESHOLDS[i + 1];
            if value == low {
                return Self::single(Biome::ALL[i]);
            }
            if value > low && value < high {
                let lower = (high - value) / (high - low);
                return Self {
                    primary: BiomeWeight {
                        biome: Biome::ALL[i],
                        weight: lower,
                    },
                    secondary: Some(BiomeWeight {
                        biome: Biome::ALL[i + 1],
                        weight: 1.0 - lower,
                    }),
                };
            }
        }
        Self::single(Biome::Mountains)
    }

    /// The contributing biomes in order.
    pub fn weights(&self) -> impl Iterator<Item = BiomeWeight> + '_ {
        std::iter::once(self.primary).chain(self.secondary)
    }

    /// The biome with the larger weight.
    pub fn dominant(&self) -> Biome {
        match self.secondary {
            Some(s) if s.weight > self.primary.weight => s.biome,
            _ => self.primary.biome,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

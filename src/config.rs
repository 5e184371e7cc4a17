//! Construction parameters and validation.
//!
//! Mirrors `quartz_vector::HnswConfig` in shape (a plain, serde-friendly
//! struct with a handful of named presets) but validates eagerly: a bad
//! parameter fails construction outright rather than producing a
//! partially-built index.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VecSimError};

/// Width and semantics of a stored vector component.
///
/// `Bf16`/`F16` are accepted at the construction boundary for API parity with
/// the full element-type matrix, but are stored and computed on as `f32`
/// internally; true half-precision packing is a SIMD-kernel concern this
/// crate treats as an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    F32,
    F64,
    Bf16,
    F16,
    I8,
    U8,
}

/// Distance metric. IP and Cosine both return `1 - <a,b>`;
/// Cosine additionally normalizes vectors at insert/query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    L2,
    Ip,
    Cosine,
}

/// SINGLE (bijective id<->label) or MULTI (label -> ordered id sequence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiMode {
    Single,
    Multi,
}

/// Construction parameters for an [`crate::hnsw::HnswIndex`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswParams {
    pub element_type: ElementType,
    pub dim: usize,
    pub metric: Metric,
    pub multi: MultiMode,
    pub initial_capacity: usize,
    pub block_size: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_runtime: usize,
    pub epsilon: f64,
    pub random_seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            element_type: ElementType::F32,
            dim: 0,
            metric: Metric::L2,
            multi: MultiMode::Single,
            initial_capacity: 0,
            block_size: 1024,
            m: 16,
            ef_construction: 200,
            ef_runtime: 10,
            epsilon: 0.01,
            random_seed: 100,
        }
    }
}

impl HnswParams {
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self {
            dim,
            metric,
            ..Default::default()
        }
    }

    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_multi(mut self, multi: MultiMode) -> Self {
        self.multi = multi;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Level-multiplier `1 / ln(M)` used when sampling a node's top level.
    pub fn level_multiplier(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }

    /// `M_max(level)`: `2M` at layer 0, `M` above it.
    pub fn m_max(&self, level: usize) -> usize {
        if level == 0 { self.m * 2 } else { self.m }
    }

    /// Reject bad parameters before any allocation happens.
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(VecSimError::InvalidParams(
                "dim must be positive".to_string(),
            ));
        }
        if self.m <= 1 {
            return Err(VecSimError::InvalidParams(
                "M must be >= 2".to_string(),
            ));
        }
        if self.m > u16::MAX as usize / 2 {
            return Err(VecSimError::InvalidParams(
                "M overflows neighbor-count storage".to_string(),
            ));
        }
        if self.ef_construction < self.m {
            return Err(VecSimError::InvalidParams(
                "ef_construction must be >= M".to_string(),
            ));
        }
        if self.epsilon <= 0.0 {
            return Err(VecSimError::InvalidParams(
                "epsilon must be > 0".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(VecSimError::InvalidParams(
                "block_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Construction parameters for the tiered controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredParams {
    pub hnsw: HnswParams,
    /// Flat-buffer entries accumulated before a caller should expect the
    /// background worker pool to be making real progress draining jobs; not
    /// enforced by this crate, just forwarded to `info()` for observability.
    pub flat_buffer_limit: usize,
}

impl TieredParams {
    pub fn new(hnsw: HnswParams) -> Self {
        Self {
            hnsw,
            flat_buffer_limit: 1024,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.hnsw.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_m() {
        let p = HnswParams::new(4, Metric::L2).with_m(1);
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_zero_dim() {
        let p = HnswParams::new(0, Metric::L2);
        assert!(p.validate().is_err());
    }

    #[test]
    fn m_max_doubles_at_layer_zero() {
        let p = HnswParams::new(4, Metric::L2).with_m(16);
        assert_eq!(p.m_max(0), 32);
        assert_eq!(p.m_max(1), 16);
    }
}

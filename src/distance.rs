//! Distance abstraction.
//!
//! `dist(a, b, dim) -> DistScalar` is total: every implementation below
//! returns a plain `f32` for any finite input, there is no failure mode.
//! Element storage is generic over [`Element`] so the graph and query code
//! monomorphize per concrete element type instead of paying for a vtable call
//! in the inner beam loop.

/// A storable vector component. Distance math always happens in `f32`; wider
/// element types trade precision for density, narrower ones trade the
/// reverse, but the contract here is just a lossless-enough round trip for
/// the search loop to do useful work.
pub trait Element: Copy + Send + Sync + PartialEq + Default + 'static {
    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;

    /// Byte alignment the storage allocator should respect for blobs of this
    /// element type. SIMD kernels are an external
    /// collaborator; this crate just honors the hint when allocating blocks.
    fn alignment() -> usize {
        align_of::<Self>()
    }
}

impl Element for f32 {
    fn to_f32(self) -> f32 {
        self
    }
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Element for f64 {
    fn to_f32(self) -> f32 {
        self as f32
    }
    fn from_f32(v: f32) -> Self {
        v as f64
    }
}

impl Element for i8 {
    fn to_f32(self) -> f32 {
        self as f32
    }
    fn from_f32(v: f32) -> Self {
        v.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8
    }
}

impl Element for u8 {
    fn to_f32(self) -> f32 {
        self as f32
    }
    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, u8::MAX as f32) as u8
    }
}

/// Distance metric selector. L2 is a plain squared Euclidean
/// distance (no square root — cheaper, and monotonic so ranking is
/// unaffected). IP and Cosine both return `1 - <a, b>`; for Cosine the
/// vectors are expected to already be unit-normalized (the graph normalizes
/// blobs at insert time and the query path normalizes the probe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    L2,
    Ip,
    Cosine,
}

impl Metric {
    pub fn distance<T: Element>(&self, a: &[T], b: &[T]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Metric::L2 => l2_squared(a, b),
            Metric::Ip => 1.0 - dot(a, b),
            Metric::Cosine => 1.0 - dot(a, b),
        }
    }

    /// Whether this metric needs per-vector normalization at insert/query
    /// time. Only Cosine does; IP is used as-is since the caller is
    /// assumed to have already scaled vectors the way they want.
    pub fn needs_normalization(&self) -> bool {
        matches!(self, Metric::Cosine)
    }
}

#[inline]
pub fn l2_squared<T: Element>(a: &[T], b: &[T]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x.to_f32() - y.to_f32();
            d * d
        })
        .sum()
}

#[inline]
pub fn dot<T: Element>(a: &[T], b: &[T]) -> f32 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x.to_f32() * y.to_f32()).sum()
}

#[inline]
pub fn magnitude<T: Element>(v: &[T]) -> f32 {
    dot(v, v).sqrt()
}

/// Normalize a blob to unit length in place, operating in `f32` and writing
/// back through `Element::from_f32`. No-op on a zero vector.
pub fn normalize<T: Element>(v: &mut [T]) {
    let mag = magnitude(v);
    if mag > 0.0 {
        for x in v.iter_mut() {
            *x = T::from_f32(x.to_f32() / mag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_identical_is_zero() {
        let v = [1.0f32, 2.0, 3.0];
        assert_eq!(Metric::L2.distance(&v, &v), 0.0);
    }

    #[test]
    fn l2_known_triangle() {
        let a = [0.0f32, 0.0, 0.0];
        let b = [3.0f32, 4.0, 0.0];
        assert_eq!(Metric::L2.distance(&a, &b), 25.0);
    }

    #[test]
    fn cosine_identical_normalized_is_zero() {
        let mut a = [1.0f32, 1.0, 1.0, 1.0];
        normalize(&mut a);
        let dist = Metric::Cosine.distance(&a, &a);
        assert!(dist.abs() < 1e-5);
    }

    #[test]
    fn normalize_unit_length() {
        let mut v = [3.0f32, 4.0, 0.0];
        normalize(&mut v);
        assert!((magnitude(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn i8_round_trips_through_f32() {
        let x = i8::from_f32(42.0);
        assert_eq!(x, 42);
        assert_eq!(x.to_f32(), 42.0);
    }
}

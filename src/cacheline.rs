//! Cache-line padded atomics for the scan pipeline's hot path.
//!
//! Mirrors `original_source/include/vertex/scanner/memoryscanner/memoryscanner.hh`'s
//! `alignas(std::hardware_destructive_interference_size)` fields: every atomic a
//! reader thread touches on every region/chunk iteration is padded to the
//! platform's cache line size so independent readers don't ping-pong a shared
//! line. Without this, measured throughput collapses on >=4 readers (spec.md
//! §4.3, "False-sharing discipline").

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};

#[cfg(target_arch = "aarch64")]
pub const CACHE_LINE_SIZE: usize = 128;
#[cfg(not(target_arch = "aarch64"))]
pub const CACHE_LINE_SIZE: usize = 64;

macro_rules! padded_atomic {
    ($name:ident, $inner:ty, $atomic:ty) => {
        #[repr(align(128))]
        #[derive(Debug, Default)]
        pub struct $name($atomic);

        impl $name {
            pub const fn new(v: $inner) -> Self {
                Self(<$atomic>::new(v))
            }

            #[inline]
            pub fn load(&self, order: Ordering) -> $inner {
                self.0.load(order)
            }

            #[inline]
            pub fn store(&self, v: $inner, order: Ordering) {
                self.0.store(v, order)
            }

            #[inline]
            pub fn fetch_add(&self, v: $inner, order: Ordering) -> $inner {
                self.0.fetch_add(v, order)
            }

            #[inline]
            pub fn fetch_sub(&self, v: $inner, order: Ordering) -> $inner {
                self.0.fetch_sub(v, order)
            }
        }
    };
}

// `repr(align(128))` is a superset of both x86-64 (64B) and Apple/ARM64 (128B)
// destructive-interference sizes; compiling per-architecture (as the C++
// original does via `std::hardware_destructive_interference_size`) isn't
// expressible as a single stable-Rust constant, so we take the larger bound
// unconditionally rather than under-pad on ARM.
padded_atomic!(PaddedAtomicBool, bool, AtomicBool);
padded_atomic!(PaddedAtomicUsize, usize, AtomicUsize);
padded_atomic!(PaddedAtomicU64, u64, AtomicU64);
padded_atomic!(PaddedAtomicI32, i32, AtomicI32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_atomics_are_cache_line_sized() {
        assert!(std::mem::align_of::<PaddedAtomicBool>() >= CACHE_LINE_SIZE);
        assert!(std::mem::align_of::<PaddedAtomicU64>() >= CACHE_LINE_SIZE);
    }

    #[test]
    fn basic_load_store() {
        let a = PaddedAtomicU64::new(0);
        a.store(5, Ordering::Relaxed);
        assert_eq!(a.load(Ordering::Relaxed), 5);
        assert_eq!(a.fetch_add(1, Ordering::Relaxed), 5);
        assert_eq!(a.load(Ordering::Relaxed), 6);
    }
}

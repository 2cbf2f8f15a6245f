//! Remote memory engine
//!
//! The target's memory arena: allocation tracking, typed and raw
//! read/write, pointer-chain resolution, string reads and wildcard
//! pattern scanning. Every operation has a non-blocking variant that
//! submits the same call to the blocking worker pool; semantics are
//! identical and nothing is retried.

use crate::traits::ProcessVm;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};
use wisp_common::{Error, Module, PatternSpec, RemoteAddr, Result};

/// Chunk size for unterminated string reads.
const STRING_CHUNK: usize = 14;

/// Values with an explicit little-endian wire layout in the target.
pub trait Scalar: Sized + Send {
    const SIZE: usize;

    /// Decode from exactly [`Self::SIZE`] bytes.
    fn from_le_bytes(bytes: &[u8]) -> Self;

    /// Append the little-endian encoding to `out`.
    fn write_le_bytes(&self, out: &mut Vec<u8>);
}

macro_rules! impl_scalar {
    ($($ty:ty),*) => {
        $(
            impl Scalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le_bytes(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(raw)
                }

                fn write_le_bytes(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_scalar!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl Scalar for RemoteAddr {
    const SIZE: usize = RemoteAddr::SIZE;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut raw = [0u8; RemoteAddr::SIZE];
        raw.copy_from_slice(&bytes[..Self::SIZE]);
        RemoteAddr::from_le_bytes(raw)
    }

    fn write_le_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

/// A tracked remote allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedRegion {
    pub address: RemoteAddr,
    pub size: usize,
}

/// Remote memory engine over a [`ProcessVm`] backend.
#[derive(Clone)]
pub struct MemoryEngine {
    vm: Arc<dyn ProcessVm>,
    regions: Arc<Mutex<BTreeMap<RemoteAddr, usize>>>,
}

impl MemoryEngine {
    pub fn new(vm: Arc<dyn ProcessVm>) -> Self {
        Self {
            vm,
            regions: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    fn require_non_null(addr: RemoteAddr, what: &str) -> Result<()> {
        if addr.is_null() {
            return Err(Error::InvalidArgument(format!("{} is null", what)));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Allocation tracking
    // ------------------------------------------------------------------

    /// Reserve and commit `size` bytes of read/write/execute memory in the
    /// target and track the region.
    pub fn allocate(&self, size: usize) -> Result<RemoteAddr> {
        let address = self.vm.alloc_rwx(size)?;
        self.regions.lock().insert(address, size);
        debug!(address = %address, size, "allocated remote region");
        Ok(address)
    }

    /// Free a remote region. The region stays tracked when the platform
    /// free fails, so a later `release_all` retries it.
    pub fn release(&self, address: RemoteAddr) -> Result<()> {
        Self::require_non_null(address, "address")?;
        self.vm.free(address)?;
        self.regions.lock().remove(&address);
        debug!(address = %address, "released remote region");
        Ok(())
    }

    /// Free every still-tracked region, best-effort: each region gets one
    /// attempt, successes are untracked immediately (never re-freed), and
    /// the first error is reported after the sweep.
    pub fn release_all(&self) -> Result<()> {
        let addresses: Vec<RemoteAddr> = self.regions.lock().keys().copied().collect();
        let mut first_error = None;
        for address in addresses {
            if let Err(err) = self.release(address) {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Snapshot of the tracked regions, in address order.
    pub fn allocated_regions(&self) -> Vec<AllocatedRegion> {
        self.regions
            .lock()
            .iter()
            .map(|(&address, &size)| AllocatedRegion { address, size })
            .collect()
    }

    // ------------------------------------------------------------------
    // Raw and typed access
    // ------------------------------------------------------------------

    /// Copy `len` raw bytes out of the target.
    pub fn read_bytes(&self, address: RemoteAddr, len: usize) -> Result<Vec<u8>> {
        Self::require_non_null(address, "address")?;
        let mut buf = vec![0u8; len];
        self.vm.read_memory(address, &mut buf)?;
        Ok(buf)
    }

    /// Copy raw bytes into the target.
    pub fn write_bytes(&self, address: RemoteAddr, data: &[u8]) -> Result<()> {
        Self::require_non_null(address, "address")?;
        self.vm.write_memory(address, data)
    }

    /// Read one `T` from the target.
    pub fn read<T: Scalar>(&self, address: RemoteAddr) -> Result<T> {
        let buf = self.read_bytes(address, T::SIZE)?;
        Ok(T::from_le_bytes(&buf))
    }

    /// Resolve a pointer chain, then read one `T` at its end.
    pub fn read_at<T: Scalar>(&self, base: RemoteAddr, offsets: &[i32]) -> Result<T> {
        let address = self.get_pointer(base, offsets)?;
        self.read(address)
    }

    /// Read `count` consecutive `T`s. Element decoding runs in parallel
    /// over the already-copied local buffer; elements are independent.
    pub fn read_array<T: Scalar>(&self, address: RemoteAddr, count: usize) -> Result<Vec<T>> {
        let total = count
            .checked_mul(T::SIZE)
            .ok_or_else(|| Error::InvalidArgument(format!("array length {} overflows", count)))?;
        let buf = self.read_bytes(address, total)?;
        Ok(buf
            .par_chunks_exact(T::SIZE)
            .with_min_len(64)
            .map(T::from_le_bytes)
            .collect())
    }

    /// Resolve a pointer chain, then read an array at its end.
    pub fn read_array_at<T: Scalar>(
        &self,
        base: RemoteAddr,
        offsets: &[i32],
        count: usize,
    ) -> Result<Vec<T>> {
        let address = self.get_pointer(base, offsets)?;
        self.read_array(address, count)
    }

    /// Write one `T` into the target.
    pub fn write<T: Scalar>(&self, address: RemoteAddr, value: &T) -> Result<()> {
        let mut buf = Vec::with_capacity(T::SIZE);
        value.write_le_bytes(&mut buf);
        self.write_bytes(address, &buf)
    }

    /// Resolve a pointer chain, then write one `T` at its end.
    pub fn write_at<T: Scalar>(&self, base: RemoteAddr, offsets: &[i32], value: &T) -> Result<()> {
        let address = self.get_pointer(base, offsets)?;
        self.write(address, value)
    }

    /// Write consecutive `T`s into the target.
    pub fn write_array<T: Scalar>(&self, address: RemoteAddr, values: &[T]) -> Result<()> {
        let mut buf = Vec::with_capacity(values.len() * T::SIZE);
        for value in values {
            value.write_le_bytes(&mut buf);
        }
        self.write_bytes(address, &buf)
    }

    /// Resolve a pointer chain, then write an array at its end.
    pub fn write_array_at<T: Scalar>(
        &self,
        base: RemoteAddr,
        offsets: &[i32],
        values: &[T],
    ) -> Result<()> {
        let address = self.get_pointer(base, offsets)?;
        self.write_array(address, values)
    }

    // ------------------------------------------------------------------
    // Pointer chains
    // ------------------------------------------------------------------

    /// Resolve a multi-level pointer chain: dereference `base`, then for
    /// every offset but the last add it and dereference again, and finally
    /// add the last offset without dereferencing.
    pub fn get_pointer(&self, base: RemoteAddr, offsets: &[i32]) -> Result<RemoteAddr> {
        Self::require_non_null(base, "base address")?;
        let (&last, intermediate) = offsets
            .split_last()
            .ok_or_else(|| Error::InvalidArgument("offset chain is empty".into()))?;

        let mut pointer: RemoteAddr = self.read(base)?;
        for &offset in intermediate {
            pointer = self.read(pointer.offset(offset))?;
        }
        Ok(pointer.offset(last))
    }

    // ------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------

    /// Read a NUL-terminated string, one fixed-size chunk at a time,
    /// decoding bytes one-to-one as characters.
    pub fn read_string(&self, address: RemoteAddr) -> Result<String> {
        Self::require_non_null(address, "address")?;
        let mut out = String::new();
        let mut cursor = address;
        loop {
            let chunk = self.read_bytes(cursor, STRING_CHUNK)?;
            for &byte in &chunk {
                if byte == 0 {
                    return Ok(out);
                }
                out.push(byte as char);
            }
            cursor = cursor.add(STRING_CHUNK as u32);
        }
    }

    /// Read exactly `len` bytes and decode them one-to-one as characters.
    pub fn read_string_len(&self, address: RemoteAddr, len: usize) -> Result<String> {
        let buf = self.read_bytes(address, len)?;
        Ok(buf.iter().map(|&b| b as char).collect())
    }

    // ------------------------------------------------------------------
    // Pattern scanning
    // ------------------------------------------------------------------

    /// Scan `size` bytes starting at `base` for the pattern. Returns the
    /// first match address plus the spec's offset adjustment, or `None`
    /// on a clean miss.
    pub fn scan_pattern(
        &self,
        base: RemoteAddr,
        size: usize,
        spec: &PatternSpec,
    ) -> Result<Option<RemoteAddr>> {
        Self::require_non_null(base, "base address")?;
        spec.validate()?;

        let buf = self.read_bytes(base, size)?;
        if buf.len() < spec.len() {
            return Ok(None);
        }

        for start in 0..=(buf.len() - spec.len()) {
            let hit = spec
                .bytes
                .iter()
                .enumerate()
                .all(|(i, &expected)| spec.is_wildcard(i) || buf[start + i] == expected);
            if hit {
                let found = base.add(start as u32).offset(spec.offset);
                trace!(base = %base, index = start, found = %found, "pattern matched");
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Module-scoped scan: base and size come from the loaded module.
    pub fn scan_module(&self, module: &Module, spec: &PatternSpec) -> Result<Option<RemoteAddr>> {
        self.scan_pattern(module.base, module.size, spec)
    }

    // ------------------------------------------------------------------
    // Non-blocking variants
    // ------------------------------------------------------------------

    async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(MemoryEngine) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || op(engine))
            .await
            .map_err(|e| Error::Worker(e.to_string()))?
    }

    pub async fn allocate_async(&self, size: usize) -> Result<RemoteAddr> {
        self.run_blocking(move |engine| engine.allocate(size)).await
    }

    pub async fn release_async(&self, address: RemoteAddr) -> Result<()> {
        self.run_blocking(move |engine| engine.release(address))
            .await
    }

    pub async fn release_all_async(&self) -> Result<()> {
        self.run_blocking(|engine| engine.release_all()).await
    }

    pub async fn get_pointer_async(&self, base: RemoteAddr, offsets: Vec<i32>) -> Result<RemoteAddr> {
        self.run_blocking(move |engine| engine.get_pointer(base, &offsets))
            .await
    }

    pub async fn read_async<T: Scalar + 'static>(&self, address: RemoteAddr) -> Result<T> {
        self.run_blocking(move |engine| engine.read(address)).await
    }

    pub async fn read_at_async<T: Scalar + 'static>(
        &self,
        base: RemoteAddr,
        offsets: Vec<i32>,
    ) -> Result<T> {
        self.run_blocking(move |engine| engine.read_at(base, &offsets))
            .await
    }

    pub async fn read_bytes_async(&self, address: RemoteAddr, len: usize) -> Result<Vec<u8>> {
        self.run_blocking(move |engine| engine.read_bytes(address, len))
            .await
    }

    pub async fn read_array_async<T: Scalar + 'static>(
        &self,
        address: RemoteAddr,
        count: usize,
    ) -> Result<Vec<T>> {
        self.run_blocking(move |engine| engine.read_array(address, count))
            .await
    }

    pub async fn write_async<T: Scalar + 'static>(
        &self,
        address: RemoteAddr,
        value: T,
    ) -> Result<()> {
        self.run_blocking(move |engine| engine.write(address, &value))
            .await
    }

    pub async fn write_at_async<T: Scalar + 'static>(
        &self,
        base: RemoteAddr,
        offsets: Vec<i32>,
        value: T,
    ) -> Result<()> {
        self.run_blocking(move |engine| engine.write_at(base, &offsets, &value))
            .await
    }

    pub async fn write_bytes_async(&self, address: RemoteAddr, data: Vec<u8>) -> Result<()> {
        self.run_blocking(move |engine| engine.write_bytes(address, &data))
            .await
    }

    pub async fn write_array_async<T: Scalar + 'static>(
        &self,
        address: RemoteAddr,
        values: Vec<T>,
    ) -> Result<()> {
        self.run_blocking(move |engine| engine.write_array(address, &values))
            .await
    }

    pub async fn read_string_async(&self, address: RemoteAddr) -> Result<String> {
        self.run_blocking(move |engine| engine.read_string(address))
            .await
    }

    pub async fn read_string_len_async(&self, address: RemoteAddr, len: usize) -> Result<String> {
        self.run_blocking(move |engine| engine.read_string_len(address, len))
            .await
    }

    pub async fn scan_pattern_async(
        &self,
        base: RemoteAddr,
        size: usize,
        spec: PatternSpec,
    ) -> Result<Option<RemoteAddr>> {
        self.run_blocking(move |engine| engine.scan_pattern(base, size, &spec))
            .await
    }

    pub async fn scan_module_async(
        &self,
        module: Module,
        spec: PatternSpec,
    ) -> Result<Option<RemoteAddr>> {
        self.run_blocking(move |engine| engine.scan_module(&module, &spec))
            .await
    }
}

use std::future::Future;

/// Outcome of [AddressRange::init_with_address].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeStatus {
    /// The range was fetched (and its data read, when required).
    Populated,

    /// The address was already inside the cached range: only the start
    /// offset was updated.
    Cached,

    /// The range lookup failed, or no data could be read.
    Failed,
}

impl RangeStatus {
    /// Numeric status code (`0`, `-1` or `1`).
    pub const fn code(&self) -> i32 {
        match self {
            Self::Populated => 0,
            Self::Cached => -1,
            Self::Failed => 1,
        }
    }
}

/// Memory region reported by the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeInfo {
    /// Base address of the region.
    pub base: u64,

    /// Size of the region.
    pub size: u64,
}

/// Original bytes of a live native hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HookPatch {
    /// Hooked address (possibly thumb-flagged).
    pub ptr: u64,

    /// Bytes overwritten by the hook.
    pub bytes: Vec<u8>,
}

/// Trait implementing the target-side queries of an [AddressRange].
pub trait RangeSource {
    /// Looks up the region containing the given address.
    fn get_range(&mut self, address: u64) -> impl Future<Output = Option<RangeInfo>>;

    /// Reads `size` bytes at `base`.
    fn read_memory(&mut self, base: u64, size: u64) -> impl Future<Output = Option<Vec<u8>>>;

    /// Lists the native hooks currently installed within the target.
    fn hook_patches(&mut self) -> impl Future<Output = Vec<HookPatch>>;
}

/// Cached view over a contiguous memory region of the target.
///
/// Each consumer owns its own instance. The returned bytes are the
/// original code: live hook trampolines are patched out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressRange {
    /// Base address.
    pub base: u64,

    /// Size of the region.
    pub size: u64,

    /// End of the region (exclusive).
    pub tail: u64,

    /// Bytes of the region.
    pub data: Vec<u8>,

    /// Address requested by the consumer.
    pub start_address: u64,

    /// Offset of the requested address within the region.
    pub start_offset: u64,
}

impl AddressRange {
    /// Creates an empty range.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the given address lies within the cached region.
    pub const fn contains(&self, address: u64) -> bool {
        self.base > 0 && self.base <= address && address < self.tail
    }

    /// Points this range at the given address, fetching the containing
    /// region unless it is already cached.
    ///
    /// - `length` clamps the region size when non-zero and smaller.
    /// - `base_override` replaces the reported base when non-zero.
    /// - `require_data` reads the region bytes (and patches live hooks out).
    ///   Without it the buffer stays empty and the range is not kept.
    #[tracing::instrument(name = "InitRange", skip(self, source))]
    pub async fn init_with_address<S: RangeSource>(
        &mut self,
        source: &mut S,
        address: u64,
        length: u64,
        base_override: u64,
        require_data: bool,
    ) -> RangeStatus {
        self.start_address = address;

        if self.contains(address) {
            self.start_offset = address - self.base;
            return RangeStatus::Cached;
        }

        let Some(info) = source.get_range(address).await else {
            tracing::debug!("no range");
            self.invalidate();
            return RangeStatus::Failed;
        };

        self.base = if base_override > 0 {
            base_override
        } else {
            info.base
        };
        self.size = if length > 0 && length < info.size {
            length
        } else {
            info.size
        };
        self.tail = self.base.saturating_add(self.size);
        self.start_address = address;
        self.start_offset = address.saturating_sub(self.base);

        self.data = if require_data {
            source
                .read_memory(self.base, self.size)
                .await
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        if self.data.is_empty() {
            tracing::debug!(base = self.base, size = self.size, "no data");
            self.invalidate();
            return RangeStatus::Failed;
        }

        for patch in source.hook_patches().await {
            if patch.bytes.is_empty() {
                continue;
            }

            let ptr = crate::ptr::strip_thumb_bit(patch.ptr);
            if self.contains(ptr) {
                self.patch_bytes(&patch.bytes, ptr - self.base);
            }
        }

        RangeStatus::Populated
    }

    /// Drops the cached region, forcing the next initialization to fetch.
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    /// Overwrites the cached bytes at the given offset.
    ///
    /// Bytes past the end of the region are ignored.
    pub fn patch_bytes(&mut self, bytes: &[u8], offset: u64) {
        let Ok(offset) = usize::try_from(offset) else {
            return;
        };
        let Some(dst) = self.data.get_mut(offset..) else {
            return;
        };

        let len = bytes.len().min(dst.len());
        dst[..len].copy_from_slice(&bytes[..len]);
    }

    /// Moves the requested address to the given offset within the region.
    pub const fn set_start_offset(&mut self, offset: u64) {
        self.start_offset = offset;
        self.start_address = self.base + offset;
    }

    /// Bytes from the requested address to the end of the region.
    pub fn data_from_start(&self) -> &[u8] {
        usize::try_from(self.start_offset)
            .ok()
            .and_then(|offset| self.data.get(offset..))
            .unwrap_or_default()
    }
}

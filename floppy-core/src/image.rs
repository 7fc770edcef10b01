//! Image layer interface
//!
//! Format codecs and the mass-storage stack live outside this crate; the
//! engine sees them through [`Image`]. The engine owns the staging memory
//! ([`TrackBuffers`]) and lends it into every bulk call, so codecs stay
//! allocation-free and the read/write overlay is enforced in one place.

use heapless::String;

/// Identifies the mounted image file to the storage layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    /// Position in the image list.
    pub index: u16,
    /// File name, for logging and the display layer.
    pub name: String<64>,
    /// Host-side write protection (file attribute or jumper).
    pub read_only: bool,
}

impl Slot {
    pub fn new(index: u16, name: &str, read_only: bool) -> Self {
        let mut n = String::new();
        for c in name.chars() {
            if n.push(c).is_err() {
                break; // oversized names truncate
            }
        }
        Self {
            index,
            name: n,
            read_only,
        }
    }
}

/// Codec capabilities reported by a successful open.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageInfo {
    /// The codec implements write-out; gates the write-protect output.
    pub writable: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImageError {
    /// File missing or unreadable.
    Open,
    /// No codec claims this image.
    UnknownFormat,
    /// Mass-storage I/O failed mid-operation.
    Io,
}

/// Result of a track seek. A busy seek is retried by re-entering the
/// foreground loop; no engine state advances meanwhile.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Seek {
    Complete,
    Busy,
}

/// Write-MFM staging capacity. Sized to absorb long mass-storage write
/// latencies at HD data rate.
pub const MFM_BUF_WORDS: usize = 20 * 1024 / 4;

/// Data staging capacity, shared between the read and write paths.
pub const DATA_BUF_LEN: usize = 8 * 1024;

/// Producer/consumer cursor over a staging buffer. Units are whatever the
/// buffer's owner counts in (bits for MFM staging, bytes for data).
#[derive(Copy, Clone, Debug, Default)]
pub struct BufCursor {
    pub prod: u32,
    pub cons: u32,
}

impl BufCursor {
    pub const fn new() -> Self {
        Self { prod: 0, cons: 0 }
    }

    pub fn reset(&mut self) {
        self.prod = 0;
        self.cons = 0;
    }
}

/// Track staging memory, provisioned once per mount.
///
/// The read views overlay the write views: `read_mfm` is the upper half of
/// the write-MFM area (reads never need the full write latency margin, and
/// keeping the lower half write-only lets write flux processing begin while
/// read data is still in flight), and `read_data` is the whole of
/// `write_data`. The engine state machines serialise use (a write cannot
/// leave Inactive while a read is non-Inactive, and vice versa), so the
/// overlap never aliases live data.
pub struct TrackBuffers {
    mfm: [u32; MFM_BUF_WORDS],
    data: [u8; DATA_BUF_LEN],
    /// Write-MFM cursor, in bits.
    pub write_mfm: BufCursor,
    /// Write-data cursor, in bytes.
    pub write_data: BufCursor,
    /// Read-MFM cursor, in bits.
    pub read_mfm: BufCursor,
    /// Read-data cursor, in bytes.
    pub read_data: BufCursor,
}

impl TrackBuffers {
    pub const fn new() -> Self {
        Self {
            mfm: [0; MFM_BUF_WORDS],
            data: [0; DATA_BUF_LEN],
            write_mfm: BufCursor::new(),
            write_data: BufCursor::new(),
            read_mfm: BufCursor::new(),
            read_data: BufCursor::new(),
        }
    }

    /// Full MFM staging area plus its bit cursor, for the write path.
    pub fn write_mfm_parts(&mut self) -> (&mut [u32], &mut BufCursor) {
        (&mut self.mfm, &mut self.write_mfm)
    }

    /// Upper half of the MFM area, for read staging.
    pub fn read_mfm_words(&mut self) -> &mut [u32] {
        &mut self.mfm[MFM_BUF_WORDS / 2..]
    }

    pub fn write_data_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn read_data_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Clear the write-path cursors after a completed drain.
    pub fn reset_write(&mut self) {
        self.write_mfm.reset();
        self.write_data.reset();
    }

    pub fn reset(&mut self) {
        self.reset_write();
        self.read_mfm.reset();
        self.read_data.reset();
    }
}

impl Default for TrackBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// A mounted disk image as the flux engine consumes it.
///
/// Track numbers are `cyl * 2 + head`. Flux samples are timer reload
/// values in sysclk ticks: a sample of N emits one transition after N+1
/// ticks. Bulk calls are only made from the foreground loop; `rdata_flux`
/// and `ticks_since_index` are additionally called from the read DMA ISR,
/// serialised by the engine state machine.
pub trait Image {
    /// Prepare the image in `slot` for I/O.
    fn open(&mut self, slot: &Slot) -> Result<ImageInfo, ImageError>;

    /// Codec-specific MFM sync pattern used for word alignment.
    fn syncword(&self) -> u32;

    /// Track the codec is currently positioned on.
    fn current_track(&self) -> u16;

    /// Position the codec on a track. If `start_pos` is given it holds the
    /// desired start position in sysclk ticks past the index and is
    /// updated to the actual position after codec alignment.
    fn seek_track(&mut self, track: u16, start_pos: Option<&mut u32>) -> Seek;

    /// Replenish internal read staging from storage. Returns true if any
    /// data was buffered.
    fn read_track(&mut self, bufs: &mut TrackBuffers) -> bool;

    /// Produce up to `out.len()` flux samples. May return short when the
    /// staging buffers run dry.
    fn rdata_flux(&mut self, bufs: &mut TrackBuffers, out: &mut [u16]) -> usize;

    /// Drain buffered MFM bits toward storage. `flush` requests the final
    /// commit of a completed write.
    fn write_track(&mut self, bufs: &mut TrackBuffers, flush: bool);

    /// Current bit-level position within the revolution, in sysclk ticks.
    fn ticks_since_index(&self) -> u32;

    /// Rotational offset at which host writing began, in sysclk ticks past
    /// the index.
    fn set_write_start(&mut self, ticks: u32);

    /// Flush dirty file state to mass storage.
    fn sync_file(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_name_truncates() {
        let long = core::str::from_utf8(&[b'a'; 100]).unwrap();
        let slot = Slot::new(0, long, false);
        assert_eq!(slot.name.len(), 64);
    }

    #[test]
    fn test_read_mfm_overlays_upper_half() {
        let mut bufs = TrackBuffers::new();
        bufs.read_mfm_words()[0] = 0x1122_3344;
        let (full, _) = bufs.write_mfm_parts();
        assert_eq!(full[MFM_BUF_WORDS / 2], 0x1122_3344);
        assert_eq!(bufs.read_mfm_words().len(), MFM_BUF_WORDS / 2);
    }

    #[test]
    fn test_write_reset_clears_cursors() {
        let mut bufs = TrackBuffers::new();
        bufs.write_mfm.prod = 977;
        bufs.write_data.cons = 12;
        bufs.reset_write();
        assert_eq!(bufs.write_mfm.prod, 0);
        assert_eq!(bufs.write_data.cons, 0);
    }
}

//! Executable thunk storage for installed hooks.
//!
//! A patched call site keeps its 5 byte `call rel32` encoding, so the
//! redirection target must live within ±2GiB of the site. Each installed
//! hook burns one absolute-jump thunk out of a [`Trampoline`] allocated
//! near the patch site.

use core::ptr::NonNull;

use tracing::warn;

use crate::HookError;

/// `jmp [rip+0]` followed by the 8 byte destination.
pub const THUNK_SIZE: usize = 14;

const JMP_ABS: [u8; 6] = [0xff, 0x25, 0x00, 0x00, 0x00, 0x00];

/// Maximum displacement reachable by a `rel32` operand.
pub(crate) const MAX_REACH: usize = 0x7fff_0000;

const PAGE_SIZE: usize = 4096;

/// Bump allocator over one executable page placed near a patch site.
///
/// The backing page is never released. Installed thunks are jumped through
/// for the rest of the process lifetime, so reclaiming it would leave the
/// patched call sites dangling.
pub struct Trampoline {
    base: NonNull<u8>,
    capacity: usize,
    used: usize,
}

// The page is only written through `&mut self` during hook installation,
// which happens before the patched sites can be reached concurrently.
unsafe impl Send for Trampoline {}
unsafe impl Sync for Trampoline {}

impl Trampoline {
    /// Allocate thunk storage for `thunks` hooks, placed within `rel32`
    /// reach of `site` when the address space allows it.
    pub fn allocate_near(site: usize, thunks: usize) -> Result<Self, HookError> {
        let capacity = (thunks * THUNK_SIZE).max(1).next_multiple_of(PAGE_SIZE);
        let base = alloc_page_near(site, capacity).ok_or(HookError::TrampolineAlloc)?;

        let distance = site.abs_diff(base.as_ptr() as usize);
        if distance > MAX_REACH {
            // Keep the page anyway. Installation re-checks the actual
            // displacement and reports `OutOfReach` per hook.
            warn!(site, base = base.as_ptr() as usize, "trampoline page is out of rel32 reach");
        }

        Ok(Self {
            base,
            capacity,
            used: 0,
        })
    }

    /// Emit an absolute jump to `dest`, returning the thunk entry address.
    pub(crate) fn emit_jump(&mut self, dest: usize) -> Result<usize, HookError> {
        if self.used + THUNK_SIZE > self.capacity {
            return Err(HookError::TrampolineExhausted);
        }

        let entry = unsafe { self.base.as_ptr().add(self.used) };
        unsafe {
            entry.copy_from_nonoverlapping(JMP_ABS.as_ptr(), JMP_ABS.len());
            entry
                .add(JMP_ABS.len())
                .copy_from_nonoverlapping(dest.to_le_bytes().as_ptr(), 8);
        }
        self.used += THUNK_SIZE;

        Ok(entry as usize)
    }

    /// Remaining thunk slots.
    pub fn remaining(&self) -> usize {
        (self.capacity - self.used) / THUNK_SIZE
    }
}

#[cfg(unix)]
fn alloc_page_near(site: usize, capacity: usize) -> Option<NonNull<u8>> {
    use core::num::NonZeroUsize;
    use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, munmap};

    let prot = ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC;
    let flags = MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS;
    let len = NonZeroUsize::new(capacity)?;

    let search_start = site.saturating_sub(MAX_REACH);
    let search_end = site.saturating_add(MAX_REACH);
    for hint in (search_start..search_end).step_by(PAGE_SIZE * 64) {
        let Some(hint) = NonZeroUsize::new(hint) else {
            continue;
        };

        let Ok(ptr) = (unsafe { mmap_anonymous(Some(hint), len, prot, flags) }) else {
            continue;
        };
        // The hint is advisory. Verify the kernel honored it closely enough.
        if (ptr.as_ptr() as usize).abs_diff(site) <= MAX_REACH {
            return Some(ptr.cast());
        }
        unsafe {
            let _ = munmap(ptr, capacity);
        }
    }

    warn!(site, "no near page available, falling back to an arbitrary page");
    let ptr = unsafe { mmap_anonymous(None, len, prot, flags) }.ok()?;
    Some(ptr.cast())
}

#[cfg(windows)]
fn alloc_page_near(site: usize, capacity: usize) -> Option<NonNull<u8>> {
    use core::ffi::c_void;
    use windows::Win32::System::Memory::{
        MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE, VirtualAlloc, VirtualFree,
    };

    let search_start = site.saturating_sub(MAX_REACH);
    let search_end = site.saturating_add(MAX_REACH);
    for hint in (search_start..search_end).step_by(PAGE_SIZE * 64) {
        if hint == 0 {
            continue;
        }

        let ptr = unsafe {
            VirtualAlloc(
                Some(hint as *const c_void),
                capacity,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_EXECUTE_READWRITE,
            )
        };
        if ptr.is_null() {
            continue;
        }
        if (ptr as usize).abs_diff(site) <= MAX_REACH {
            return NonNull::new(ptr.cast());
        }
        unsafe {
            let _ = VirtualFree(ptr, 0, MEM_RELEASE);
        }
    }

    warn!(site, "no near page available, falling back to an arbitrary page");
    let ptr = unsafe {
        VirtualAlloc(None, capacity, MEM_COMMIT | MEM_RESERVE, PAGE_EXECUTE_READWRITE)
    };
    NonNull::new(ptr.cast())
}

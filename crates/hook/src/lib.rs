//! Call-site interception for runehud.
//!
//! The host binary reaches its device initialization and frame presentation
//! entry points through fixed `call rel32` sites. A [`CallsiteHook`] re-points
//! one of those sites at a replacement function while capturing the previous
//! callee, so the replacement can forward to it on every path.
//!
//! Sites are identified by a version-stable [`TargetId`] plus a
//! version-specific byte offset; turning an id into a runtime address is the
//! job of an [`AddressResolver`] supplied by the embedder, which keeps the
//! patching logic independent of any particular host build and stubbable in
//! tests.

mod trampoline;

pub use trampoline::{THUNK_SIZE, Trampoline};

use core::mem;

use once_cell::sync::OnceCell;
use tracing::debug;

/// Version-stable logical id of a hookable location in the host binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

/// A patchable call site: stable id plus byte offset from the resolved base.
#[derive(Debug, Clone, Copy)]
pub struct HookSite {
    pub id: TargetId,
    pub offset: usize,
}

impl HookSite {
    pub const fn new(id: u64, offset: usize) -> Self {
        Self {
            id: TargetId(id),
            offset,
        }
    }
}

/// Maps a [`TargetId`] to the base address it occupies in the running host
/// build. Returning `None` marks the target as unavailable for this build,
/// which callers treat as fatal to the overlay feature only.
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, id: TargetId) -> Option<usize>;
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("no address for target {id:#x} in this host build", id = (.0).0)]
    UnresolvedTarget(TargetId),

    #[error("byte {found:#04x} at {site:#x} is not a call instruction")]
    NotACallSite { site: usize, found: u8 },

    #[error("hook already installed")]
    AlreadyInstalled,

    #[error("trampoline allocation failed")]
    TrampolineAlloc,

    #[error("trampoline capacity exhausted")]
    TrampolineExhausted,

    #[error("thunk at {thunk:#x} is out of rel32 reach of site {site:#x}")]
    OutOfReach { site: usize, thunk: usize },

    #[error("memory protection change failed: {0}")]
    Memory(#[from] region::Error),
}

/// A hook over one `call rel32` site.
///
/// The original-function slot is written exactly once, before the call site
/// is re-pointed, and is never rebound. The descriptor itself is expected to
/// live in a `static` for the process lifetime.
pub struct CallsiteHook<F> {
    original: OnceCell<F>,
}

impl<F: Copy> CallsiteHook<F> {
    pub const fn new() -> Self {
        Self {
            original: OnceCell::new(),
        }
    }

    /// Patch the call site to invoke `replacement`, capturing the previous
    /// callee.
    ///
    /// # Safety
    /// - `F` must be a function pointer type matching the site's callee
    ///   signature, and `replacement` must be valid for that signature.
    /// - No thread may be executing through the call site while it is being
    ///   patched. Installation must happen before the host can reach it.
    #[tracing::instrument(skip(self, resolver, replacement, trampoline))]
    pub unsafe fn install(
        &self,
        resolver: &dyn AddressResolver,
        site: HookSite,
        replacement: F,
        trampoline: &mut Trampoline,
    ) -> Result<(), HookError> {
        const {
            assert!(mem::size_of::<F>() == mem::size_of::<usize>());
        }

        if self.original.get().is_some() {
            return Err(HookError::AlreadyInstalled);
        }

        let base = resolver
            .resolve(site.id)
            .ok_or(HookError::UnresolvedTarget(site.id))?;
        let site = base + site.offset;

        let opcode = unsafe { (site as *const u8).read() };
        if opcode != 0xe8 {
            return Err(HookError::NotACallSite { site, found: opcode });
        }

        let rel = unsafe { (site as *const u8).add(1).cast::<i32>().read_unaligned() };
        let original_addr = (site + 5).wrapping_add_signed(rel as isize);

        let replacement_addr = unsafe { mem::transmute_copy::<F, usize>(&replacement) };
        let thunk = trampoline.emit_jump(replacement_addr)?;

        let displacement = thunk.wrapping_sub(site + 5) as isize;
        let new_rel =
            i32::try_from(displacement).map_err(|_| HookError::OutOfReach { site, thunk })?;

        // Publish the original before the patch lands so the replacement can
        // never observe an empty slot.
        let original = unsafe { mem::transmute_copy::<usize, F>(&original_addr) };
        if self.original.set(original).is_err() {
            return Err(HookError::AlreadyInstalled);
        }

        unsafe {
            let _guard = region::protect_with_handle(
                site as *const u8,
                5,
                region::Protection::READ_WRITE_EXECUTE,
            )?;
            (site as *mut u8)
                .add(1)
                .cast::<i32>()
                .write_unaligned(new_rel);
        }

        debug!(site, original = original_addr, thunk, "call site hooked");
        Ok(())
    }

    /// The callee the site pointed at before installation.
    ///
    /// # Panics
    /// If the hook was never installed. Calling this from a replacement that
    /// could run before its own installation completed is a programming
    /// error, not a runtime condition.
    #[inline(always)]
    pub fn original(&self) -> F {
        *self
            .original
            .get()
            .expect("hook original requested before installation")
    }

    pub fn is_installed(&self) -> bool {
        self.original.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver(Option<usize>);

    impl AddressResolver for FixedResolver {
        fn resolve(&self, _: TargetId) -> Option<usize> {
            self.0
        }
    }

    type Thunk = unsafe extern "C" fn();

    fn dangling_thunk() -> Thunk {
        // Never called. Tests only compare addresses.
        unsafe { mem::transmute::<usize, Thunk>(0xdead_f00d_usize) }
    }

    /// An executable page holding a synthetic `call rel32` site.
    struct FakeSite {
        _alloc: region::Allocation,
        site: usize,
        callee: usize,
    }

    fn make_call_site() -> FakeSite {
        let mut alloc =
            region::alloc(region::page::size(), region::Protection::READ_WRITE_EXECUTE).unwrap();
        let base = alloc.as_mut_ptr::<u8>() as usize;

        // Pretend the original callee lives one page-ish below the site.
        let callee = base.wrapping_sub(0x4000);
        let rel = callee.wrapping_sub(base + 5) as i32;
        unsafe {
            let p = base as *mut u8;
            p.write(0xe8);
            p.add(1).cast::<i32>().write_unaligned(rel);
        }

        FakeSite {
            _alloc: alloc,
            site: base,
            callee,
        }
    }

    fn read_patched_dest(site: usize) -> usize {
        let rel = unsafe { (site as *const u8).add(1).cast::<i32>().read_unaligned() };
        (site + 5).wrapping_add_signed(rel as isize)
    }

    #[test]
    fn install_redirects_site_and_captures_original() {
        let fake = make_call_site();
        let mut trampoline = Trampoline::allocate_near(fake.site, 2).unwrap();
        let hook = CallsiteHook::<Thunk>::new();

        unsafe {
            hook.install(
                &FixedResolver(Some(fake.site)),
                HookSite::new(1, 0),
                dangling_thunk(),
                &mut trampoline,
            )
        }
        .unwrap();

        // The site now calls into the trampoline page.
        let thunk = read_patched_dest(fake.site);
        let thunk_bytes = unsafe { core::slice::from_raw_parts(thunk as *const u8, THUNK_SIZE) };
        assert_eq!(&thunk_bytes[..6], &[0xff, 0x25, 0x00, 0x00, 0x00, 0x00]);

        let dest = usize::from_le_bytes(thunk_bytes[6..].try_into().unwrap());
        assert_eq!(dest, dangling_thunk() as usize);

        // The previous callee was captured.
        assert_eq!(hook.original() as usize, fake.callee);
    }

    #[test]
    fn reinstall_is_rejected_without_touching_the_slot() {
        let fake = make_call_site();
        let mut trampoline = Trampoline::allocate_near(fake.site, 2).unwrap();
        let hook = CallsiteHook::<Thunk>::new();

        let resolver = FixedResolver(Some(fake.site));
        unsafe { hook.install(&resolver, HookSite::new(1, 0), dangling_thunk(), &mut trampoline) }
            .unwrap();
        let first = hook.original() as usize;

        let err =
            unsafe { hook.install(&resolver, HookSite::new(1, 0), dangling_thunk(), &mut trampoline) };
        assert!(matches!(err, Err(HookError::AlreadyInstalled)));
        assert_eq!(hook.original() as usize, first);
    }

    #[test]
    fn unresolved_target_fails_before_any_write() {
        let fake = make_call_site();
        let before =
            unsafe { core::slice::from_raw_parts(fake.site as *const u8, 5) }.to_vec();
        let mut trampoline = Trampoline::allocate_near(fake.site, 1).unwrap();
        let hook = CallsiteHook::<Thunk>::new();

        let err = unsafe {
            hook.install(
                &FixedResolver(None),
                HookSite::new(7, 0),
                dangling_thunk(),
                &mut trampoline,
            )
        };
        assert!(matches!(err, Err(HookError::UnresolvedTarget(TargetId(7)))));
        assert!(!hook.is_installed());

        let after = unsafe { core::slice::from_raw_parts(fake.site as *const u8, 5) };
        assert_eq!(before, after);
    }

    #[test]
    fn non_call_byte_is_rejected() {
        let fake = make_call_site();
        unsafe { (fake.site as *mut u8).write(0x90) };

        let mut trampoline = Trampoline::allocate_near(fake.site, 1).unwrap();
        let hook = CallsiteHook::<Thunk>::new();

        let err = unsafe {
            hook.install(
                &FixedResolver(Some(fake.site)),
                HookSite::new(1, 0),
                dangling_thunk(),
                &mut trampoline,
            )
        };
        assert!(matches!(
            err,
            Err(HookError::NotACallSite { found: 0x90, .. })
        ));
        assert!(!hook.is_installed());
    }

    #[test]
    fn trampoline_capacity_is_per_thunk() {
        let fake = make_call_site();
        let mut trampoline = Trampoline::allocate_near(fake.site, 2).unwrap();
        assert!(trampoline.remaining() >= 2);

        let before = trampoline.remaining();
        let a = CallsiteHook::<Thunk>::new();
        unsafe {
            a.install(
                &FixedResolver(Some(fake.site)),
                HookSite::new(1, 0),
                dangling_thunk(),
                &mut trampoline,
            )
        }
        .unwrap();

        assert_eq!(trampoline.remaining(), before - 1);
    }

    #[test]
    #[should_panic(expected = "before installation")]
    fn original_before_install_panics() {
        let hook = CallsiteHook::<Thunk>::new();
        let _ = hook.original();
    }

    #[test]
    fn offset_is_applied_to_resolved_base() {
        let fake = make_call_site();
        // Resolver hands back an address below the actual site; the
        // descriptor's offset makes up the difference.
        let base = fake.site - 0x9;
        let mut trampoline = Trampoline::allocate_near(fake.site, 1).unwrap();
        let hook = CallsiteHook::<Thunk>::new();

        unsafe {
            hook.install(
                &FixedResolver(Some(base)),
                HookSite::new(2, 0x9),
                dangling_thunk(),
                &mut trampoline,
            )
        }
        .unwrap();
        assert_eq!(hook.original() as usize, fake.callee);
    }

    type Callee = unsafe extern "C" fn() -> u64;

    static FORWARDING_HOOK: CallsiteHook<Callee> = CallsiteHook::new();

    unsafe extern "C" fn add_two() -> u64 {
        unsafe { FORWARDING_HOOK.original()() + 2 }
    }

    #[test]
    fn patched_site_runs_replacement_and_forwards_to_original() {
        // One page holds both the call site and its callee so the rel32
        // stays in reach either way:
        //   +0x00  sub rsp, 8        ; realign, entry left rsp at 8 mod 16
        //   +0x04  call +0x20        ; the patch target
        //   +0x09  add rsp, 8
        //   +0x0d  ret
        //   +0x20  mov eax, 100      ; the original callee
        //   +0x25  ret
        let mut alloc =
            region::alloc(region::page::size(), region::Protection::READ_WRITE_EXECUTE).unwrap();
        let base = alloc.as_mut_ptr::<u8>() as usize;
        let site_code: [u8; 14] = [
            0x48, 0x83, 0xec, 0x08, 0xe8, 0x17, 0x00, 0x00, 0x00, 0x48, 0x83, 0xc4, 0x08, 0xc3,
        ];
        let callee_code: [u8; 6] = [0xb8, 0x64, 0x00, 0x00, 0x00, 0xc3];
        unsafe {
            let p = base as *mut u8;
            p.copy_from_nonoverlapping(site_code.as_ptr(), site_code.len());
            p.add(0x20)
                .copy_from_nonoverlapping(callee_code.as_ptr(), callee_code.len());
        }

        let mut trampoline = Trampoline::allocate_near(base, 1).unwrap();
        unsafe {
            FORWARDING_HOOK.install(
                &FixedResolver(Some(base)),
                HookSite::new(1, 0x4),
                add_two,
                &mut trampoline,
            )
        }
        .unwrap();
        assert_eq!(FORWARDING_HOOK.original() as usize, base + 0x20);

        // Calling the site runs the replacement, which forwards to the
        // captured original: 100 from the callee, plus 2 on the way out.
        let entry = unsafe { mem::transmute::<usize, Callee>(base) };
        assert_eq!(unsafe { entry() }, 102);
    }
}

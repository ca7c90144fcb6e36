use std::io;
use std::ptr;

/// Default code buffer size for a single block.
pub const DEFAULT_CODE_BUF_SIZE: usize = 4096;

/// Executable code buffer backed by mmap'd memory.
///
/// The buffer is allocated read/write, filled by the emitter, then
/// flipped to read/execute exactly once with [`CodeBuffer::protect`].
/// After the flip every append or patch is a programmer bug and aborts.
pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    pos: usize,
    protected: bool,
}

// SAFETY: CodeBuffer owns its mmap'd memory exclusively.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    /// Allocate a new buffer of the given size (rounded up to page size).
    pub fn new(size: usize) -> io::Result<Self> {
        let page_size = page_size();
        let size = (size + page_size - 1) & !(page_size - 1);

        // SAFETY: anonymous private mapping, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            pos: 0,
            protected: false,
        })
    }

    /// Current write offset.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Remaining writable bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.pos
    }

    /// Base address of the buffer. Stable for the buffer's lifetime:
    /// emitted code bakes call displacements against it.
    #[inline]
    pub fn address(&self) -> usize {
        self.ptr as usize
    }

    /// Whether [`CodeBuffer::protect`] has been called.
    #[inline]
    pub fn is_protected(&self) -> bool {
        self.protected
    }

    // -- Emit methods --

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        assert!(!self.protected, "emit into protected code buffer");
        assert!(self.pos < self.size, "code buffer overflow");
        unsafe { self.ptr.add(self.pos).write(val) };
        self.pos += 1;
    }

    #[inline]
    pub fn emit_bytes(&mut self, data: &[u8]) {
        for &b in data {
            self.emit_u8(b);
        }
    }

    #[inline]
    pub fn emit_u16(&mut self, val: u16) {
        self.emit_bytes(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        self.emit_bytes(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        self.emit_bytes(&val.to_le_bytes());
    }

    /// Patch a single byte at an already-written offset. The write
    /// cursor is unchanged.
    #[inline]
    pub fn patch_u8(&mut self, offset: usize, val: u8) {
        assert!(!self.protected, "patch into protected code buffer");
        assert!(offset < self.pos, "patch beyond write cursor");
        unsafe { self.ptr.add(offset).write(val) };
    }

    /// Read back a byte (introspection, tests).
    #[inline]
    pub fn read_u8(&self, offset: usize) -> u8 {
        assert!(offset < self.pos);
        unsafe { self.ptr.add(offset).read() }
    }

    /// The emitted code as a byte slice (up to the write cursor).
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr..ptr+pos has been written.
        unsafe { std::slice::from_raw_parts(self.ptr, self.pos) }
    }

    // -- Permission management --

    /// Flip the buffer to read+execute. One-way: no appends or patches
    /// are permitted afterwards.
    pub fn protect(&mut self) -> io::Result<()> {
        let ret = unsafe {
            libc::mprotect(
                self.ptr as *mut libc::c_void,
                self.size,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        self.protected = true;
        Ok(())
    }

    /// Transfer control to the start of the buffer, returning when the
    /// generated code executes `RET`.
    ///
    /// # Safety
    /// The buffer must contain a complete, valid function body for the
    /// host ABI, and every absolute address baked into it must still be
    /// live.
    pub unsafe fn call(&self) {
        assert!(self.protected, "call into unprotected code buffer");
        let entry: extern "C" fn() = std::mem::transmute(self.ptr);
        entry();
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

//! R3051 (MIPS R3000-class) architectural state.

/// Number of general-purpose registers.
pub const NUM_GPRS: usize = 32;

/// Exception code for a trapping signed add overflow.
pub const ARITHMETIC_OVERFLOW: u32 = 12;

/// PC at reset.
pub const RESET_EXCEPTION_VECTOR: u32 = 0xBFC0_0000;
/// General exception vector while the boot ROM is mapped (SR.BEV set).
pub const BOOT_EXCEPTION_VECTOR: u32 = 0xBFC0_0180;

/// COP0 register numbers of interest.
pub const SR: u32 = 12;
pub const CAUSE: u32 = 13;
pub const EPC: u32 = 14;

/// Bus handler for a 32-bit store. Returns `false` on fault, in which
/// case the handler is responsible for COP0 exception bookkeeping.
pub type StoreWordFn = fn(&mut R3051, u32, u32) -> bool;

/// Bus handler for a 32-bit load. `None` signals a fault.
pub type LoadWordFn = fn(&mut R3051, u32) -> Option<u32>;

/// System control coprocessor.
#[derive(Debug, Clone)]
#[repr(C)]
pub struct Cop0 {
    registers: [u32; 32],
}

impl Cop0 {
    pub fn new() -> Self {
        Self { registers: [0; 32] }
    }

    #[inline]
    pub fn read_register(&self, r: u32) -> u32 {
        self.registers[r as usize]
    }

    #[inline]
    pub fn write_register(&mut self, r: u32, v: u32) {
        self.registers[r as usize] = v;
    }

    #[inline]
    pub fn write_register_masked(&mut self, r: u32, mask: u32, v: u32) {
        let old = self.registers[r as usize];
        self.registers[r as usize] = (old & !mask) | (v & mask);
    }

    /// Exception entry: shift the SR interrupt/mode stack, record the
    /// cause code and branch flag, snapshot EPC. Returns the vector to
    /// resume at.
    pub fn enter_exception(&mut self, code: u32, epc: u32, branch: u32) -> u32 {
        self.write_register_masked(SR, 0x0000_003F, self.read_register(SR) << 2);
        self.write_register_masked(CAUSE, 0x8000_007C, (branch << 31) | ((code & 0x1F) << 2));
        self.write_register(EPC, epc);
        BOOT_EXCEPTION_VECTOR
    }
}

impl Default for Cop0 {
    fn default() -> Self {
        Self::new()
    }
}

/// R3051 CPU state.
///
/// Layout is `#[repr(C)]` and the struct must not move while emitted
/// code referencing it can run: blocks bake the address of the struct
/// and of individual registers into host instructions.
///
/// Register 0 is hardwired to zero by MIPS convention; this struct
/// does not enforce it, callers respect the convention.
#[repr(C)]
pub struct R3051 {
    /// General-purpose registers r0-r31.
    pub registers: [u32; NUM_GPRS],
    /// Program counter.
    pub pc: u32,
    pub cop0: Cop0,
    /// Load-delay shadow state: the instruction in the slot of a load
    /// still sees the destination register's old value.
    pub load_delay_slot: bool,
    pub load_delay_slot_next: bool,
    pub load_delay_register: u32,
    pub load_delay_value: u32,
    /// Branch-delay state, used by the interpreter; the recompiler
    /// tracks branches in its own state instead.
    pub branch_delay_slot: bool,
    pub branch_delay_slot_next: bool,
    pub branch_target: u32,
    /// Guest memory subsystem hooks.
    pub store_word: StoreWordFn,
    pub load_word: LoadWordFn,
}

impl R3051 {
    pub fn new() -> Self {
        Self {
            registers: [0; NUM_GPRS],
            pc: RESET_EXCEPTION_VECTOR,
            cop0: Cop0::new(),
            load_delay_slot: false,
            load_delay_slot_next: false,
            load_delay_register: 0,
            load_delay_value: 0,
            branch_delay_slot: false,
            branch_delay_slot_next: false,
            branch_target: 0,
            store_word: default_store_word,
            load_word: default_load_word,
        }
    }

    #[inline]
    pub fn read_register(&self, r: u32) -> u32 {
        self.registers[r as usize]
    }

    #[inline]
    pub fn write_register(&mut self, r: u32, v: u32) {
        self.registers[r as usize] = v;
    }

    /// Stable host address of `registers[r]`, for emitted absolute and
    /// base+displacement access.
    #[inline]
    pub fn register_address(&self, r: u32) -> usize {
        &self.registers[r as usize] as *const u32 as usize
    }

    /// Raise an exception: EPC is snapshotted from the current PC and
    /// control resumes at the boot exception vector.
    pub fn enter_exception(&mut self, code: u32) {
        let epc = self.pc;
        self.pc = self.cop0.enter_exception(code, epc, 0);
    }
}

impl Default for R3051 {
    fn default() -> Self {
        Self::new()
    }
}

fn default_store_word(_cpu: &mut R3051, _vaddr: u32, _value: u32) -> bool {
    true
}

fn default_load_word(_cpu: &mut R3051, _vaddr: u32) -> Option<u32> {
    Some(0)
}

// ============================================================================
//  CONFIG
// ============================================================================

/// Behavior knobs for [`crate::Z80`]. `Default` gives the simplified
/// behavior the rest of the emulator expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuConfig {
    /// Refuse a maskable interrupt requested directly after EI until one
    /// more instruction has run, as real silicon does.
    pub defer_interrupt_after_ei: bool,
    /// Byte the interrupting device would put on the data bus during an
    /// IM 2 acknowledge; low byte of the vector table pointer.
    pub im2_vector_low_byte: u8,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            defer_interrupt_after_ei: false,
            im2_vector_low_byte: 0xFF,
        }
    }
}

//! libmt32emu engine.
//!
//! Binds the C interface of the munt MT-32 emulator. Linking requires
//! `libmt32emu` (2.x) to be installed where the system linker can find it.
//!
//! Library reports (LCD text, debug traces, ROM errors during open) arrive
//! through the vtable in [`super::munt_report`]. ROMs the library refuses to
//! identify are reported from the return codes.

use super::munt_report;
use super::{DacInputMode, Engine, EngineError, ReportHandler, RomImage, RomRole, SAMPLE_RATE};
use std::ptr;

#[allow(non_camel_case_types)]
mod ffi {
    use super::munt_report::ReportHandlerInterface;
    use libc::{c_int, c_uint, c_void};

    pub type mt32emu_context = *mut c_void;
    pub type mt32emu_return_code = c_int;
    pub type mt32emu_boolean = c_uint;

    pub const MT32EMU_RC_OK: mt32emu_return_code = 0;
    pub const MT32EMU_RC_QUEUE_FULL: mt32emu_return_code = -6;

    pub const MT32EMU_BOOL_FALSE: mt32emu_boolean = 0;
    pub const MT32EMU_BOOL_TRUE: mt32emu_boolean = 1;

    #[link(name = "mt32emu")]
    extern "C" {
        pub fn mt32emu_create_context(
            report_handler: ReportHandlerInterface,
            instance_data: *mut c_void,
        ) -> mt32emu_context;
        pub fn mt32emu_free_context(context: mt32emu_context);
        pub fn mt32emu_add_rom_data(
            context: mt32emu_context,
            data: *const u8,
            data_size: usize,
            sha1_digest: *const c_void,
        ) -> mt32emu_return_code;
        pub fn mt32emu_open_synth(context: mt32emu_context) -> mt32emu_return_code;
        pub fn mt32emu_close_synth(context: mt32emu_context);
        pub fn mt32emu_get_stereo_output_samplerate(context: mt32emu_context) -> u32;
        pub fn mt32emu_play_msg(context: mt32emu_context, msg: u32) -> mt32emu_return_code;
        pub fn mt32emu_play_sysex(
            context: mt32emu_context,
            sysex: *const u8,
            len: u32,
        ) -> mt32emu_return_code;
        pub fn mt32emu_write_sysex(
            context: mt32emu_context,
            channel: u8,
            sysex: *const u8,
            len: u32,
        );
        pub fn mt32emu_set_reverb_overridden(
            context: mt32emu_context,
            reverb_overridden: mt32emu_boolean,
        );
        pub fn mt32emu_set_dac_input_mode(context: mt32emu_context, mode: c_int);
        pub fn mt32emu_set_reversed_stereo_enabled(
            context: mt32emu_context,
            enabled: mt32emu_boolean,
        );
        pub fn mt32emu_render_bit16s(context: mt32emu_context, stream: *mut i16, len: u32);
    }
}

fn to_bool(value: bool) -> ffi::mt32emu_boolean {
    if value {
        ffi::MT32EMU_BOOL_TRUE
    } else {
        ffi::MT32EMU_BOOL_FALSE
    }
}

/// An engine backed by a libmt32emu context.
pub struct MuntEngine {
    context: ffi::mt32emu_context,
    /// Instance data of the context's report vtable; freed after the context.
    reports: Box<ReportHandler>,
    open: bool,
}

// SAFETY: the context is owned exclusively by this value and libmt32emu keeps
// no thread affinity; every call goes through `&mut self` or `&self` of the
// single owner.
unsafe impl Send for MuntEngine {}

impl MuntEngine {
    /// Creates a fresh emulation context.
    pub fn new(reports: ReportHandler) -> Self {
        let reports = Box::new(reports);
        // SAFETY: the vtable is static and the boxed handler lives until the
        // context is freed in Drop.
        let context = unsafe {
            ffi::mt32emu_create_context(
                munt_report::interface(),
                munt_report::instance_data(&reports),
            )
        };
        Self {
            context,
            reports,
            open: false,
        }
    }

    fn add_rom(&mut self, rom: &RomImage) -> Result<(), EngineError> {
        // SAFETY: the slice is valid for the duration of the call; the library copies it.
        let rc = unsafe {
            ffi::mt32emu_add_rom_data(self.context, rom.data.as_ptr(), rom.data.len(), ptr::null())
        };
        if rc >= ffi::MT32EMU_RC_OK {
            return Ok(());
        }

        let reason = format!("{} (code {})", rom.path.display(), rc);
        match rom.role {
            RomRole::Control => {
                self.reports.error_control_rom();
                Err(EngineError::ControlRom(reason))
            }
            RomRole::Pcm => {
                self.reports.error_pcm_rom();
                Err(EngineError::PcmRom(reason))
            }
        }
    }
}

fn check(rc: ffi::mt32emu_return_code) -> Result<(), EngineError> {
    match rc {
        rc if rc >= ffi::MT32EMU_RC_OK => Ok(()),
        ffi::MT32EMU_RC_QUEUE_FULL => Err(EngineError::QueueFull),
        rc => Err(EngineError::Code(rc)),
    }
}

impl Engine for MuntEngine {
    fn open(&mut self, control_rom: &RomImage, pcm_rom: &RomImage) -> Result<(), EngineError> {
        if self.context.is_null() {
            return Err(EngineError::Open("no emulation context".to_string()));
        }
        self.add_rom(control_rom)?;
        self.add_rom(pcm_rom)?;

        // SAFETY: context is non-null and both ROMs were accepted.
        let rc = unsafe { ffi::mt32emu_open_synth(self.context) };
        if rc != ffi::MT32EMU_RC_OK {
            return Err(EngineError::Open(format!("code {}", rc)));
        }
        self.open = true;
        self.reports
            .debug(format_args!("Synth opened at {} Hz", self.sample_rate()));
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            // SAFETY: the synth was opened on this context.
            unsafe { ffi::mt32emu_close_synth(self.context) };
            self.open = false;
        }
    }

    fn sample_rate(&self) -> u32 {
        if self.context.is_null() {
            return SAMPLE_RATE;
        }
        // SAFETY: context is non-null.
        match unsafe { ffi::mt32emu_get_stereo_output_samplerate(self.context) } {
            0 => SAMPLE_RATE,
            rate => rate,
        }
    }

    fn play_msg(&mut self, msg: u32) -> Result<(), EngineError> {
        // SAFETY: context is valid for the lifetime of self.
        check(unsafe { ffi::mt32emu_play_msg(self.context, msg) })
    }

    fn play_sysex(&mut self, sysex: &[u8]) -> Result<(), EngineError> {
        // SAFETY: pointer and length describe a live slice.
        check(unsafe { ffi::mt32emu_play_sysex(self.context, sysex.as_ptr(), sysex.len() as u32) })
    }

    fn write_sysex(&mut self, channel: u8, sysex: &[u8]) {
        // SAFETY: pointer and length describe a live slice.
        unsafe {
            ffi::mt32emu_write_sysex(self.context, channel, sysex.as_ptr(), sysex.len() as u32)
        };
    }

    fn set_reverb_overridden(&mut self, overridden: bool) {
        // SAFETY: context is valid for the lifetime of self.
        unsafe { ffi::mt32emu_set_reverb_overridden(self.context, to_bool(overridden)) };
    }

    fn set_dac_input_mode(&mut self, mode: DacInputMode) {
        // SAFETY: context is valid; mode values match the C enum.
        unsafe { ffi::mt32emu_set_dac_input_mode(self.context, mode as u8 as i32) };
    }

    fn set_reversed_stereo_enabled(&mut self, enabled: bool) {
        // SAFETY: context is valid for the lifetime of self.
        unsafe { ffi::mt32emu_set_reversed_stereo_enabled(self.context, to_bool(enabled)) };
    }

    fn render(&mut self, out: &mut [i16]) {
        let frames = (out.len() / 2) as u32;
        // SAFETY: `out` holds at least `frames` interleaved stereo frames.
        unsafe { ffi::mt32emu_render_bit16s(self.context, out.as_mut_ptr(), frames) };
    }
}

impl Drop for MuntEngine {
    fn drop(&mut self) {
        self.close();
        if !self.context.is_null() {
            // SAFETY: the context was created by mt32emu_create_context and is freed once.
            unsafe { ffi::mt32emu_free_context(self.context) };
            self.context = ptr::null_mut();
        }
    }
}

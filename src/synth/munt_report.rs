//! Report callbacks handed to libmt32emu.
//!
//! The library calls back through a C vtable whose instance data is the
//! address of a boxed [`ReportHandler`]. Slots left `None` keep the
//! library's built-in behaviour.

use super::ReportHandler;
use libc::{c_char, c_int, c_uint, c_void};
use std::ffi::CStr;

/// `va_list` as received by a callee. Passed as a pointer on x86_64 SysV,
/// AArch64 and Windows.
pub type VaList = *mut c_void;

type Instance = *mut c_void;

/// `MT32EMU_REPORT_HANDLER_VERSION_0`
pub const REPORT_HANDLER_VERSION_0: c_int = 0;

/// Longest debug line kept, including the terminator.
const DEBUG_LINE_LEN: usize = 1024;

extern "C" {
    fn vsnprintf(buf: *mut c_char, size: usize, format: *const c_char, list: VaList) -> c_int;
}

/// `mt32emu_report_handler_i`: a versioned pointer to the vtable.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ReportHandlerInterface {
    pub v0: *const ReportHandlerV0,
}

/// `mt32emu_report_handler_i_v0`, field for field.
#[repr(C)]
pub struct ReportHandlerV0 {
    pub get_version_id: Option<unsafe extern "C" fn(ReportHandlerInterface) -> c_int>,
    pub print_debug: Option<unsafe extern "C" fn(Instance, *const c_char, VaList)>,
    pub on_error_control_rom: Option<unsafe extern "C" fn(Instance)>,
    pub on_error_pcm_rom: Option<unsafe extern "C" fn(Instance)>,
    pub show_lcd_message: Option<unsafe extern "C" fn(Instance, *const c_char)>,
    pub on_midi_message_played: Option<unsafe extern "C" fn(Instance)>,
    pub on_midi_queue_overflow: Option<unsafe extern "C" fn(Instance) -> c_uint>,
    pub on_midi_system_realtime: Option<unsafe extern "C" fn(Instance, u8)>,
    pub on_device_reset: Option<unsafe extern "C" fn(Instance)>,
    pub on_device_reconfig: Option<unsafe extern "C" fn(Instance)>,
    pub on_new_reverb_mode: Option<unsafe extern "C" fn(Instance, u8)>,
    pub on_new_reverb_time: Option<unsafe extern "C" fn(Instance, u8)>,
    pub on_new_reverb_level: Option<unsafe extern "C" fn(Instance, u8)>,
    pub on_poly_state_changed: Option<unsafe extern "C" fn(Instance, u8)>,
    pub on_program_changed:
        Option<unsafe extern "C" fn(Instance, u8, *const c_char, *const c_char)>,
}

pub static REPORT_HANDLER_V0: ReportHandlerV0 = ReportHandlerV0 {
    get_version_id: Some(get_version_id),
    print_debug: Some(print_debug),
    on_error_control_rom: Some(on_error_control_rom),
    on_error_pcm_rom: Some(on_error_pcm_rom),
    show_lcd_message: Some(show_lcd_message),
    on_midi_message_played: None,
    on_midi_queue_overflow: None,
    on_midi_system_realtime: None,
    on_device_reset: None,
    on_device_reconfig: None,
    on_new_reverb_mode: None,
    on_new_reverb_time: None,
    on_new_reverb_level: None,
    on_poly_state_changed: None,
    on_program_changed: None,
};

/// Interface value passed to `mt32emu_create_context`.
pub fn interface() -> ReportHandlerInterface {
    ReportHandlerInterface {
        v0: &REPORT_HANDLER_V0,
    }
}

/// Instance data pointer for `reports`. The handler must outlive the context.
pub fn instance_data(reports: &ReportHandler) -> *mut c_void {
    reports as *const ReportHandler as *mut c_void
}

/// # Safety
///
/// `instance` is null or was produced by [`instance_data`] for a live handler.
unsafe fn reports<'a>(instance: Instance) -> Option<&'a ReportHandler> {
    (instance as *const ReportHandler).as_ref()
}

unsafe extern "C" fn get_version_id(_: ReportHandlerInterface) -> c_int {
    REPORT_HANDLER_VERSION_0
}

unsafe extern "C" fn print_debug(instance: Instance, format: *const c_char, list: VaList) {
    let Some(reports) = reports(instance) else {
        return;
    };
    // Skip formatting entirely when nobody listens
    if !reports.is_verbose() || format.is_null() {
        return;
    }

    let mut line = [0 as c_char; DEBUG_LINE_LEN];
    if vsnprintf(line.as_mut_ptr(), line.len(), format, list) < 0 {
        return;
    }
    report_debug(reports, CStr::from_ptr(line.as_ptr()));
}

fn report_debug(reports: &ReportHandler, line: &CStr) {
    reports.debug(format_args!("{}", line.to_string_lossy()));
}

unsafe extern "C" fn on_error_control_rom(instance: Instance) {
    if let Some(reports) = reports(instance) {
        reports.error_control_rom();
    }
}

unsafe extern "C" fn on_error_pcm_rom(instance: Instance) {
    if let Some(reports) = reports(instance) {
        reports.error_pcm_rom();
    }
}

unsafe extern "C" fn show_lcd_message(instance: Instance, message: *const c_char) {
    if message.is_null() {
        return;
    }
    if let Some(reports) = reports(instance) {
        reports.lcd_message(&CStr::from_ptr(message).to_string_lossy());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn recording(verbose: bool) -> (ReportHandler, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let lcd = Arc::clone(&lines);
        let debug = Arc::clone(&lines);
        let reports = ReportHandler::logging(verbose)
            .with_lcd_message(move |msg| lcd.lock().unwrap().push(format!("lcd:{}", msg)))
            .with_debug(move |args| debug.lock().unwrap().push(format!("debug:{}", args)));
        (reports, lines)
    }

    #[test]
    fn test_lcd_message_reaches_handler() {
        let (reports, lines) = recording(false);
        let message = CString::new("Starting up...").unwrap();

        let show = REPORT_HANDLER_V0.show_lcd_message.unwrap();
        unsafe { show(instance_data(&reports), message.as_ptr()) };

        assert_eq!(*lines.lock().unwrap(), vec!["lcd:Starting up...".to_string()]);
    }

    #[test]
    fn test_rom_errors_reach_handler() {
        let control = Arc::new(AtomicUsize::new(0));
        let pcm = Arc::new(AtomicUsize::new(0));
        let (c, p) = (Arc::clone(&control), Arc::clone(&pcm));
        let reports = ReportHandler::logging(false)
            .with_error_control_rom(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .with_error_pcm_rom(move || {
                p.fetch_add(1, Ordering::SeqCst);
            });

        let instance = instance_data(&reports);
        unsafe {
            (REPORT_HANDLER_V0.on_error_control_rom.unwrap())(instance);
            (REPORT_HANDLER_V0.on_error_pcm_rom.unwrap())(instance);
            (REPORT_HANDLER_V0.on_error_pcm_rom.unwrap())(instance);
        }

        assert_eq!(control.load(Ordering::SeqCst), 1);
        assert_eq!(pcm.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_debug_lines_follow_verbose() {
        let line = CString::new("Partial 3 started").unwrap();

        let (quiet, lines) = recording(false);
        report_debug(&quiet, &line);
        assert!(lines.lock().unwrap().is_empty());

        let (verbose, lines) = recording(true);
        report_debug(&verbose, &line);
        assert_eq!(*lines.lock().unwrap(), vec!["debug:Partial 3 started".to_string()]);
    }

    #[test]
    fn test_null_instance_is_ignored() {
        let message = CString::new("ignored").unwrap();
        unsafe {
            (REPORT_HANDLER_V0.show_lcd_message.unwrap())(std::ptr::null_mut(), message.as_ptr());
            (REPORT_HANDLER_V0.on_error_control_rom.unwrap())(std::ptr::null_mut());
        }
    }

    #[test]
    fn test_interface_reports_version_zero() {
        let iface = interface();
        let vtable = unsafe { &*iface.v0 };
        let version = unsafe { (vtable.get_version_id.unwrap())(iface) };
        assert_eq!(version, REPORT_HANDLER_VERSION_0);
        assert!(vtable.print_debug.is_some());
        assert!(vtable.on_program_changed.is_none());
    }
}

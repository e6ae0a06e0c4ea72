//! Test doubles for the engine and mixer seams.

use super::{DacInputMode, Engine, EngineError, ReportHandler, RomImage};
use crate::mixer::{Mixer, MixerChannel, MixerError};
use std::sync::{Arc, Mutex};

/// Everything a fake engine was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Open { control: Vec<u8>, pcm: Vec<u8> },
    Close,
    PlayMsg(u32),
    PlaySysex(Vec<u8>),
    WriteSysex(u8, Vec<u8>),
    ReverbOverridden(bool),
    DacInputMode(DacInputMode),
    ReversedStereo(bool),
    Render(usize),
}

/// Shared record of engine activity, inspectable after the engine is dropped.
#[derive(Debug, Clone, Default)]
pub struct EngineLog {
    calls: Arc<Mutex<Vec<EngineCall>>>,
    created: Arc<Mutex<usize>>,
    dropped: Arc<Mutex<usize>>,
}

impl EngineLog {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        *self.created.lock().unwrap()
    }

    /// Engines created and not yet dropped.
    pub fn alive(&self) -> usize {
        self.created() - *self.dropped.lock().unwrap()
    }

    fn push(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Engine double that records calls and renders a counting ramp.
pub struct FakeEngine {
    log: EngineLog,
    reports: ReportHandler,
    reject_open: bool,
    next_sample: i16,
}

impl FakeEngine {
    pub fn new(log: &EngineLog, reports: ReportHandler) -> Self {
        *log.created.lock().unwrap() += 1;
        Self {
            log: log.clone(),
            reports,
            reject_open: false,
            next_sample: 0,
        }
    }

    pub fn rejecting(mut self) -> Self {
        self.reject_open = true;
        self
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        *self.log.dropped.lock().unwrap() += 1;
    }
}

impl Engine for FakeEngine {
    fn open(&mut self, control_rom: &RomImage, pcm_rom: &RomImage) -> Result<(), EngineError> {
        self.log.push(EngineCall::Open {
            control: control_rom.data.clone(),
            pcm: pcm_rom.data.clone(),
        });
        if self.reject_open {
            self.reports.error_control_rom();
            return Err(EngineError::ControlRom("unknown image".to_string()));
        }
        self.reports.lcd_message("1 2 3 4 5 R |vol:100");
        Ok(())
    }

    fn close(&mut self) {
        self.log.push(EngineCall::Close);
    }

    fn play_msg(&mut self, msg: u32) -> Result<(), EngineError> {
        self.log.push(EngineCall::PlayMsg(msg));
        Ok(())
    }

    fn play_sysex(&mut self, sysex: &[u8]) -> Result<(), EngineError> {
        self.log.push(EngineCall::PlaySysex(sysex.to_vec()));
        Ok(())
    }

    fn write_sysex(&mut self, channel: u8, sysex: &[u8]) {
        self.log.push(EngineCall::WriteSysex(channel, sysex.to_vec()));
    }

    fn set_reverb_overridden(&mut self, overridden: bool) {
        self.log.push(EngineCall::ReverbOverridden(overridden));
    }

    fn set_dac_input_mode(&mut self, mode: DacInputMode) {
        self.log.push(EngineCall::DacInputMode(mode));
    }

    fn set_reversed_stereo_enabled(&mut self, enabled: bool) {
        self.log.push(EngineCall::ReversedStereo(enabled));
    }

    fn render(&mut self, out: &mut [i16]) {
        self.log.push(EngineCall::Render(out.len() / 2));
        for sample in out {
            *sample = self.next_sample;
            self.next_sample = self.next_sample.wrapping_add(1);
        }
    }
}

/// What a recording mixer saw.
#[derive(Debug, Clone, Default)]
pub struct MixerLog {
    pub channels: Arc<Mutex<Vec<(String, u32)>>>,
    pub deleted: Arc<Mutex<usize>>,
    pub enabled: Arc<Mutex<bool>>,
    pub samples: Arc<Mutex<Vec<i16>>>,
}

/// Mixer double that keeps every pushed sample.
#[derive(Debug, Default)]
pub struct RecordingMixer {
    pub log: MixerLog,
    pub refuse: bool,
}

pub struct RecordingChannel {
    log: MixerLog,
}

impl Mixer for RecordingMixer {
    type Channel = RecordingChannel;

    fn add_channel(&mut self, name: &str, sample_rate: u32) -> Result<RecordingChannel, MixerError> {
        if self.refuse {
            return Err(MixerError::Output("no device".to_string()));
        }
        self.log
            .channels
            .lock()
            .unwrap()
            .push((name.to_string(), sample_rate));
        Ok(RecordingChannel {
            log: self.log.clone(),
        })
    }

    fn del_channel(&mut self, _channel: RecordingChannel) -> Result<(), MixerError> {
        *self.log.deleted.lock().unwrap() += 1;
        Ok(())
    }
}

impl MixerChannel for RecordingChannel {
    fn enable(&mut self, enabled: bool) {
        *self.log.enabled.lock().unwrap() = enabled;
    }

    fn add_samples_s16(&mut self, frames: usize, samples: &[i16]) -> Result<(), MixerError> {
        let samples = crate::mixer::stereo_slice(frames, samples)?;
        self.log.samples.lock().unwrap().extend_from_slice(samples);
        Ok(())
    }
}

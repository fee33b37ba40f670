//! Win32 implementation of `EncoderChannel`: named-less
//! inheritable shared memory, two auto-reset events, and a suspended-then-
//! resumed encoder child process. Grounded step-for-step on
//! `proc_encoder.cpp`'s `encoder_create_shared_mem` /
//! `encoder_start_process` / `encoder_send_event`.

use std::path::{Path, PathBuf};

use framecap_common::win32::OwnedHandle;
use framecap_common::WaveSample;
use windows::core::{PCSTR, PSTR};
use windows::Win32::Foundation::{CloseHandle, GetLastError, BOOL, INVALID_HANDLE_VALUE};
use windows::Win32::Security::SECURITY_ATTRIBUTES;
use windows::Win32::Storage::FileSystem::PAGE_READWRITE;
use windows::Win32::System::Memory::{CreateFileMappingA, MapViewOfFile, UnmapViewOfFile, FILE_MAP_ALL_ACCESS};
use windows::Win32::System::Threading::{
    CreateEventA, CreateProcessA, GetCurrentProcessId, ResumeThread, SetEvent, WaitForMultipleObjects,
    CREATE_NO_WINDOW, CREATE_SUSPENDED, PROCESS_INFORMATION, STARTUPINFOA, WAIT_OBJECT_0,
};

use crate::shared_mem::{write_fixed_str, SharedBlock, ENCODER_MAX_SAMPLES};
use crate::{BridgeError, EncoderChannel, EncoderEvent, MovieStartParams};

pub struct Bridge {
    resource_path: PathBuf,
    mem_handle: OwnedHandle,
    mapped: *mut u8,
    game_wake_event: OwnedHandle,
    encoder_wake_event: OwnedHandle,
    encoder_process: OwnedHandle,
}

// SAFETY: the mapped view is a fixed-address allocation for the lifetime
// of the bridge; access is externally serialized by the ping-pong (—
// single render thread, no concurrent callers).
unsafe impl Send for Bridge {}

impl Bridge {
    /// Creates the shared memory region and starts the encoder child
    /// process in a suspended state, then resumes it (Lifecycle).
    pub fn spawn(resource_path: &Path) -> Result<Self, BridgeError> {
        let (mem_handle, mapped, game_wake_event, encoder_wake_event) = create_shared_mem()?;
        let encoder_process = start_encoder_process(resource_path, &mem_handle)?;

        log::info!("started encoder process");

        Ok(Self {
            resource_path: resource_path.to_path_buf(),
            mem_handle,
            mapped,
            game_wake_event,
            encoder_wake_event,
            encoder_process,
        })
    }

    fn block(&self) -> &mut SharedBlock {
        unsafe { SharedBlock::from_mapped(self.mapped) }
    }

    fn audio_buffer(&self) -> &mut [WaveSample] {
        unsafe { SharedBlock::audio_buffer(self.mapped) }
    }

    /// The ping-pong at the heart of : write `event_type`, signal the
    /// encoder, then block on either its process handle (exit) or its
    /// wake-back event (completion).
    fn send_event(&mut self, event: EncoderEvent) -> Result<(), BridgeError> {
        self.block().event_type = event as u32;

        unsafe { SetEvent(self.encoder_wake_event.raw()) }
            .map_err(|e| BridgeError::EncoderReported(e.to_string()))?;

        let handles = [self.encoder_process.raw(), self.game_wake_event.raw()];
        let waited = unsafe { WaitForMultipleObjects(&handles, false, u32::MAX) };

        if waited == WAIT_OBJECT_0 {
            log::error!("encoder process exited or crashed");
            return Err(BridgeError::EncoderExited);
        }

        let block = self.block();
        if block.error != 0 {
            let message = block.error_message();
            log::error!("{message}");
            return Err(BridgeError::EncoderReported(message));
        }

        Ok(())
    }
}

impl EncoderChannel for Bridge {
    fn start(&mut self, game_texture_handle: u32, params: &MovieStartParams) -> Result<(), BridgeError> {
        {
            let block = self.block();
            let p = &mut block.movie_params;
            p.video_width = params.width;
            p.video_height = params.height;
            p.video_fps = params.fps;
            p.audio_channels = params.audio.channels as u32;
            p.audio_hz = params.audio.sample_rate;
            p.audio_bits = params.audio.bits as u32;
            p.x264_crf = params.x264_crf;
            p.x264_intra = params.x264_intra as u32;
            p.use_audio = params.use_audio as u32;
            write_fixed_str(&mut p.dest_file, &params.dest_file);
            write_fixed_str(&mut p.video_encoder, &params.video_encoder);
            write_fixed_str(&mut p.x264_preset, &params.x264_preset);
            write_fixed_str(&mut p.dnxhr_profile, &params.dnxhr_profile);
            write_fixed_str(&mut p.audio_encoder, &params.audio_encoder);
            write_fixed_str(&mut p.video_pixel_format, &params.video_pixel_format);
            write_fixed_str(&mut p.video_color_space, &params.video_color_space);

            block.waiting_audio_samples = 0;
            block.game_texture_handle = game_texture_handle;
            block.error = 0;
            block.error_message = [0; crate::shared_mem::MESSAGE_CAP];
        }

        self.send_event(EncoderEvent::Start)
    }

    fn send_video(&mut self) -> Result<(), BridgeError> {
        self.send_event(EncoderEvent::NewVideo)
    }

    fn send_audio(&mut self, samples: &[WaveSample]) -> Result<(), BridgeError> {
        for chunk in crate::fragment_audio(samples) {
            self.audio_buffer()[..chunk.len()].copy_from_slice(chunk);
            self.block().waiting_audio_samples = chunk.len() as u32;
            self.send_event(EncoderEvent::NewAudio)?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        // STOP never fails per the event table; any error here is a
        // shutdown-time log line, not a propagated failure.
        let _ = self.send_event(EncoderEvent::Stop);
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        unsafe {
            let _ = UnmapViewOfFile(windows::Win32::System::Memory::MEMORY_MAPPED_VIEW_ADDRESS {
                Value: self.mapped as *mut core::ffi::c_void,
            });
        }
        let _ = &self.resource_path;
    }
}

fn create_shared_mem() -> Result<(OwnedHandle, *mut u8, OwnedHandle, OwnedHandle), BridgeError> {
    let sa = SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: std::ptr::null_mut(),
        bInheritHandle: BOOL(1),
    };

    let size = SharedBlock::total_size() as u32;

    let mem_handle = unsafe {
        CreateFileMappingA(
            INVALID_HANDLE_VALUE,
            Some(&sa as *const _),
            PAGE_READWRITE,
            0,
            size,
            PCSTR::null(),
        )
    }
    .map_err(|_| unsafe { BridgeError::SharedMemoryCreate(format!("{:?}", GetLastError())) })?;
    let mem_handle = unsafe { OwnedHandle::new(mem_handle) };

    let view = unsafe { MapViewOfFile(mem_handle.raw(), FILE_MAP_ALL_ACCESS, 0, 0, size as usize) };
    if view.Value.is_null() {
        return Err(BridgeError::SharedMemoryCreate(format!("{:?}", unsafe { GetLastError() })));
    }
    let mapped = view.Value as *mut u8;

    // Auto-reset, initially unsignaled — the invariant 's "exactly one
    // runnable side" relies on.
    let game_wake_event = unsafe { CreateEventA(Some(&sa as *const _), BOOL(0), BOOL(0), PCSTR::null()) }
        .map_err(|_| unsafe { BridgeError::SharedMemoryCreate(format!("{:?}", GetLastError())) })?;
    let encoder_wake_event = unsafe { CreateEventA(Some(&sa as *const _), BOOL(0), BOOL(0), PCSTR::null()) }
        .map_err(|_| unsafe { BridgeError::SharedMemoryCreate(format!("{:?}", GetLastError())) })?;
    let game_wake_event = unsafe { OwnedHandle::new(game_wake_event) };
    let encoder_wake_event = unsafe { OwnedHandle::new(encoder_wake_event) };

    // Known state first, matching `memset(encoder_shared_ptr, 0, mem_size)`.
    unsafe { std::ptr::write_bytes(mapped, 0, size as usize) };

    let block = unsafe { SharedBlock::from_mapped(mapped) };
    block.game_pid = unsafe { GetCurrentProcessId() };
    block.game_wake_event_handle = game_wake_event.raw().0 as u32;
    block.encoder_wake_event_handle = encoder_wake_event.raw().0 as u32;
    block.audio_buffer_offset = SharedBlock::audio_buffer_offset();

    Ok((mem_handle, mapped, game_wake_event, encoder_wake_event))
}

fn start_encoder_process(resource_path: &Path, mem_handle: &OwnedHandle) -> Result<OwnedHandle, BridgeError> {
    let exe = resource_path.join("svr_encoder.exe");
    let mut command_line = format!("\"{}\" {}", exe.display(), mem_handle.raw().0 as u32);
    command_line.push('\0');

    let mut startup_info = STARTUPINFOA::default();
    startup_info.cb = std::mem::size_of::<STARTUPINFOA>() as u32;
    let mut process_info = PROCESS_INFORMATION::default();

    let mut working_dir = resource_path.to_string_lossy().into_owned();
    working_dir.push('\0');

    let result = unsafe {
        CreateProcessA(
            PCSTR::null(),
            PSTR(command_line.as_mut_ptr()),
            None,
            None,
            true,
            CREATE_NO_WINDOW | CREATE_SUSPENDED,
            None,
            PCSTR(working_dir.as_ptr()),
            &startup_info,
            &mut process_info,
        )
    };

    if result.is_err() {
        return Err(BridgeError::ProcessStart(format!("{:?}", unsafe { GetLastError() })));
    }

    unsafe {
        ResumeThread(process_info.hThread);
        let _ = CloseHandle(process_info.hThread);
    }

    Ok(unsafe { OwnedHandle::new(process_info.hProcess) })
}

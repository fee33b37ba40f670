use windows::Win32::Foundation::{CloseHandle, HANDLE};

/// A `windows::Win32::Foundation::HANDLE` is just an opaque pointer-sized
/// value from the kernel's perspective; it is `Send`-safe as long as the
/// owner does not use it concurrently from two threads at once, which
/// matches the bridge's single-render-thread contract.
pub struct OwnedHandle(HANDLE);

unsafe impl Send for OwnedHandle {}

impl OwnedHandle {
    /// # Safety
    /// `handle` must be a valid, closable kernel object handle owned
    /// exclusively by the returned value.
    pub unsafe fn new(handle: HANDLE) -> Self {
        Self(handle)
    }

    pub fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            let _ = unsafe { CloseHandle(self.0) };
        }
    }
}

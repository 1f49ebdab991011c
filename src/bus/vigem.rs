/// ViGEmBus driver (Windows-only).
///
/// ViGEmBus is a virtual gamepad bus driver by Nefarius (Benjamin Höglinger-Stelzer)
/// that can emulate Xbox 360 controllers. We talk to it through the official
/// ViGEmClient library, loaded at runtime so a missing DLL is a startup error
/// rather than a loader failure.
///
/// Every primitive maps 1:1 onto a ViGEmClient export and returns its
/// VIGEM_ERROR unchanged.
///
/// Reference: https://github.com/nefarius/ViGEmClient

#[cfg(target_os = "windows")]
pub mod imp {
    use crate::bus::{BusDriver, RawTarget};
    use crate::error::{BridgeError, ErrorCode, Result};
    use crate::report::XusbReport;
    use std::ffi::c_void;
    use windows::core::{PCSTR, PCWSTR};
    use windows::Win32::Foundation::{FreeLibrary, HMODULE};
    use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

    type PVigemClient = *mut c_void;
    type PVigemTarget = *mut c_void;

    type AllocFn = unsafe extern "C" fn() -> PVigemClient;
    type FreeFn = unsafe extern "C" fn(PVigemClient);
    type ConnectFn = unsafe extern "C" fn(PVigemClient) -> ErrorCode;
    type DisconnectFn = unsafe extern "C" fn(PVigemClient);
    type TargetAllocFn = unsafe extern "C" fn() -> PVigemTarget;
    type TargetFreeFn = unsafe extern "C" fn(PVigemTarget);
    type TargetAddFn = unsafe extern "C" fn(PVigemClient, PVigemTarget) -> ErrorCode;
    type TargetRemoveFn = unsafe extern "C" fn(PVigemClient, PVigemTarget) -> ErrorCode;
    // XUSB_REPORT is passed by value in the C header.
    type TargetUpdateFn =
        unsafe extern "C" fn(PVigemClient, PVigemTarget, XusbReport) -> ErrorCode;

    struct Api {
        alloc: AllocFn,
        free: FreeFn,
        connect: ConnectFn,
        disconnect: DisconnectFn,
        target_x360_alloc: TargetAllocFn,
        target_free: TargetFreeFn,
        target_add: TargetAddFn,
        target_remove: TargetRemoveFn,
        target_x360_update: TargetUpdateFn,
    }

    /// Loaded ViGEmClient module, unloaded on drop.
    struct Library(HMODULE);

    impl Drop for Library {
        fn drop(&mut self) {
            unsafe {
                let _ = FreeLibrary(self.0);
            }
        }
    }

    macro_rules! resolve {
        ($module:expr, $name:literal) => {{
            let proc = GetProcAddress($module, PCSTR(concat!($name, "\0").as_ptr()))
                .ok_or_else(|| {
                    BridgeError::Driver(format!("{} is missing from ViGEmClient", $name))
                })?;
            std::mem::transmute(proc)
        }};
    }

    pub struct ViGEmDriver {
        api: Api,
        client: PVigemClient,
        // Dropped after `client` has been freed.
        _library: Library,
    }

    // The client pointer is only ever touched through `&mut self`, and
    // `BusClient` serializes all access behind its mutex.
    unsafe impl Send for ViGEmDriver {}

    impl ViGEmDriver {
        /// Load ViGEmClient from `path` and allocate a (not yet connected) client.
        pub fn load(path: &str) -> Result<Self> {
            let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
            let module = unsafe { LoadLibraryW(PCWSTR(wide.as_ptr())) }
                .map_err(|e| BridgeError::Driver(format!("Cannot load {}: {}", path, e)))?;
            let library = Library(module);

            let api = unsafe {
                Api {
                    alloc: resolve!(library.0, "vigem_alloc"),
                    free: resolve!(library.0, "vigem_free"),
                    connect: resolve!(library.0, "vigem_connect"),
                    disconnect: resolve!(library.0, "vigem_disconnect"),
                    target_x360_alloc: resolve!(library.0, "vigem_target_x360_alloc"),
                    target_free: resolve!(library.0, "vigem_target_free"),
                    target_add: resolve!(library.0, "vigem_target_add"),
                    target_remove: resolve!(library.0, "vigem_target_remove"),
                    target_x360_update: resolve!(library.0, "vigem_target_x360_update"),
                }
            };

            let client = unsafe { (api.alloc)() };
            if client.is_null() {
                return Err(BridgeError::Driver("vigem_alloc returned null".into()));
            }
            log::debug!("Loaded ViGEmClient from {}", path);

            Ok(Self {
                api,
                client,
                _library: library,
            })
        }

        fn target_ptr(target: RawTarget) -> PVigemTarget {
            target.as_raw() as PVigemTarget
        }
    }

    impl BusDriver for ViGEmDriver {
        fn name(&self) -> &'static str {
            "ViGEm"
        }

        fn connect(&mut self) -> ErrorCode {
            unsafe { (self.api.connect)(self.client) }
        }

        fn disconnect(&mut self) {
            unsafe { (self.api.disconnect)(self.client) }
        }

        fn target_alloc(&mut self) -> Option<RawTarget> {
            let target = unsafe { (self.api.target_x360_alloc)() };
            (!target.is_null()).then(|| RawTarget::from_raw(target as usize))
        }

        fn target_free(&mut self, target: RawTarget) {
            unsafe { (self.api.target_free)(Self::target_ptr(target)) }
        }

        fn target_add(&mut self, target: RawTarget) -> ErrorCode {
            unsafe { (self.api.target_add)(self.client, Self::target_ptr(target)) }
        }

        fn target_remove(&mut self, target: RawTarget) -> ErrorCode {
            unsafe { (self.api.target_remove)(self.client, Self::target_ptr(target)) }
        }

        fn target_update(&mut self, target: RawTarget, report: &XusbReport) -> ErrorCode {
            unsafe { (self.api.target_x360_update)(self.client, Self::target_ptr(target), *report) }
        }
    }

    impl Drop for ViGEmDriver {
        fn drop(&mut self) {
            unsafe { (self.api.free)(self.client) }
        }
    }
}

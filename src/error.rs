/// Native result code returned by every bus primitive.
pub type ErrorCode = u32;

/// The one success code. Everything else is a failure.
pub const VIGEM_ERROR_NONE: ErrorCode = 0x2000_0000;

const VIGEM_ERROR_BUS_NOT_FOUND: ErrorCode = 0xE000_0001;
const VIGEM_ERROR_NO_FREE_SLOT: ErrorCode = 0xE000_0002;
const VIGEM_ERROR_INVALID_TARGET: ErrorCode = 0xE000_0003;
const VIGEM_ERROR_REMOVAL_FAILED: ErrorCode = 0xE000_0004;
const VIGEM_ERROR_ALREADY_CONNECTED: ErrorCode = 0xE000_0005;
const VIGEM_ERROR_TARGET_UNINITIALIZED: ErrorCode = 0xE000_0006;
const VIGEM_ERROR_TARGET_NOT_PLUGGED_IN: ErrorCode = 0xE000_0007;
const VIGEM_ERROR_BUS_VERSION_MISMATCH: ErrorCode = 0xE000_0008;
const VIGEM_ERROR_BUS_ACCESS_FAILED: ErrorCode = 0xE000_0009;
const VIGEM_ERROR_CALLBACK_ALREADY_REGISTERED: ErrorCode = 0xE000_0010;
const VIGEM_ERROR_CALLBACK_NOT_FOUND: ErrorCode = 0xE000_0011;
const VIGEM_ERROR_BUS_ALREADY_CONNECTED: ErrorCode = 0xE000_0012;
const VIGEM_ERROR_BUS_INVALID_HANDLE: ErrorCode = 0xE000_0013;
const VIGEM_ERROR_XUSB_USERINDEX_OUT_OF_RANGE: ErrorCode = 0xE000_0014;

/// Typed outcome of a failed bus primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("virtual controller bus not found")]
    BusNotFound,

    #[error("no free slot on the bus")]
    NoFreeSlot,

    #[error("invalid target")]
    InvalidTarget,

    #[error("target removal failed")]
    RemovalFailed,

    #[error("target already connected")]
    AlreadyConnected,

    #[error("target uninitialized")]
    TargetUninitialized,

    #[error("target not plugged in")]
    TargetNotPluggedIn,

    #[error("bus driver version mismatch")]
    BusVersionMismatch,

    #[error("bus access failed")]
    BusAccessFailed,

    #[error("notification callback already registered")]
    CallbackAlreadyRegistered,

    #[error("notification callback not found")]
    CallbackNotFound,

    #[error("bus already connected")]
    BusAlreadyConnected,

    #[error("invalid bus handle")]
    BusInvalidHandle,

    #[error("user index out of range")]
    UserIndexOutOfRange,

    #[error("unrecognized bus error code {0:#010X}")]
    Unrecognized(ErrorCode),
}

impl BusError {
    /// Translate a native result code. `Ok(())` only for [`VIGEM_ERROR_NONE`].
    pub fn check(code: ErrorCode) -> std::result::Result<(), BusError> {
        match code {
            VIGEM_ERROR_NONE => Ok(()),
            other => Err(Self::from_code(other)),
        }
    }

    fn from_code(code: ErrorCode) -> Self {
        match code {
            VIGEM_ERROR_BUS_NOT_FOUND => Self::BusNotFound,
            VIGEM_ERROR_NO_FREE_SLOT => Self::NoFreeSlot,
            VIGEM_ERROR_INVALID_TARGET => Self::InvalidTarget,
            VIGEM_ERROR_REMOVAL_FAILED => Self::RemovalFailed,
            VIGEM_ERROR_ALREADY_CONNECTED => Self::AlreadyConnected,
            VIGEM_ERROR_TARGET_UNINITIALIZED => Self::TargetUninitialized,
            VIGEM_ERROR_TARGET_NOT_PLUGGED_IN => Self::TargetNotPluggedIn,
            VIGEM_ERROR_BUS_VERSION_MISMATCH => Self::BusVersionMismatch,
            VIGEM_ERROR_BUS_ACCESS_FAILED => Self::BusAccessFailed,
            VIGEM_ERROR_CALLBACK_ALREADY_REGISTERED => Self::CallbackAlreadyRegistered,
            VIGEM_ERROR_CALLBACK_NOT_FOUND => Self::CallbackNotFound,
            VIGEM_ERROR_BUS_ALREADY_CONNECTED => Self::BusAlreadyConnected,
            VIGEM_ERROR_BUS_INVALID_HANDLE => Self::BusInvalidHandle,
            VIGEM_ERROR_XUSB_USERINDEX_OUT_OF_RANGE => Self::UserIndexOutOfRange,
            other => Self::Unrecognized(other),
        }
    }

    /// The native code this error was translated from.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BusNotFound => VIGEM_ERROR_BUS_NOT_FOUND,
            Self::NoFreeSlot => VIGEM_ERROR_NO_FREE_SLOT,
            Self::InvalidTarget => VIGEM_ERROR_INVALID_TARGET,
            Self::RemovalFailed => VIGEM_ERROR_REMOVAL_FAILED,
            Self::AlreadyConnected => VIGEM_ERROR_ALREADY_CONNECTED,
            Self::TargetUninitialized => VIGEM_ERROR_TARGET_UNINITIALIZED,
            Self::TargetNotPluggedIn => VIGEM_ERROR_TARGET_NOT_PLUGGED_IN,
            Self::BusVersionMismatch => VIGEM_ERROR_BUS_VERSION_MISMATCH,
            Self::BusAccessFailed => VIGEM_ERROR_BUS_ACCESS_FAILED,
            Self::CallbackAlreadyRegistered => VIGEM_ERROR_CALLBACK_ALREADY_REGISTERED,
            Self::CallbackNotFound => VIGEM_ERROR_CALLBACK_NOT_FOUND,
            Self::BusAlreadyConnected => VIGEM_ERROR_BUS_ALREADY_CONNECTED,
            Self::BusInvalidHandle => VIGEM_ERROR_BUS_INVALID_HANDLE,
            Self::UserIndexOutOfRange => VIGEM_ERROR_XUSB_USERINDEX_OUT_OF_RANGE,
            Self::Unrecognized(code) => *code,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("ViGEm bus error {code:#010X}: {0}", code = .0.code())]
    Bus(#[from] BusError),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Platform not supported: {0}")]
    PlatformNotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_code_is_the_only_ok() {
        assert_eq!(BusError::check(VIGEM_ERROR_NONE), Ok(()));
        assert_eq!(BusError::check(0), Err(BusError::Unrecognized(0)));
    }

    #[test]
    fn codes_survive_translation() {
        for code in (0xE000_0001..=0xE000_0009).chain(0xE000_0010..=0xE000_0014) {
            let err = BusError::check(code).unwrap_err();
            assert!(!matches!(err, BusError::Unrecognized(_)), "{code:#X}");
            assert_eq!(err.code(), code);
        }
        assert_eq!(BusError::check(0xE000_000A).unwrap_err().code(), 0xE000_000A);
    }

    #[test]
    fn bridge_error_names_the_native_code() {
        let err = BridgeError::from(BusError::NoFreeSlot);
        assert_eq!(
            err.to_string(),
            "ViGEm bus error 0xE0000002: no free slot on the bus"
        );
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("io: {0}")]
    Io(String),
    #[error("serial port error: {0}")]
    Serial(String),
    #[error("unparseable sensor line '{0}'")]
    Parse(String),
    #[error("load cell disconnected")]
    Disconnected,
    #[error("drive faulted (status=0x{0:08X})")]
    DriveFaulted(u32),
    #[error("drive disabled")]
    DriveDisabled,
    #[error("invalid calibration: {0}")]
    InvalidCalibration(&'static str),
    #[error("no sensor sample within {0} ms")]
    Timeout(u64),
}

impl From<std::io::Error> for HwError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HwError>;

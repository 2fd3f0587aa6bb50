use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device};

use crate::capture::frame::PixelFormat;

// Detected capture device info
#[derive(Debug, Clone)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// Auto-detect the first capture device offering a planar 4:2:0 format.
///
/// `preferred` wins when a device lists it; otherwise the first supported
/// format the driver enumerates is used.
pub fn auto_detect_device(preferred: PixelFormat) -> Result<FoundDevice> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        let Ok(formats) = dev.enum_formats() else {
            continue;
        };
        let supported: Vec<PixelFormat> = formats
            .iter()
            .filter_map(|fmt| PixelFormat::from_fourcc(&fmt.fourcc.repr))
            .collect();
        debug!("{}: planar formats {:?}", path, supported);

        let format = supported
            .iter()
            .find(|&&f| f == preferred)
            .or_else(|| supported.first())
            .copied();

        if let Some(format) = format {
            info!("Found {:?} device: {} - {}", format, path, caps.card);
            return Ok(FoundDevice::new(path, format));
        }
    }

    Err(eyre!("No capture device with a planar 4:2:0 format found"))
}

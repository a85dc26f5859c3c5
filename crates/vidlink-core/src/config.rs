use serde::{Deserialize, Serialize};

use crate::{VidlinkError, VidlinkResult};

/// How the send pipeline obtains its source image each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Snapshot of the host's presented output.
    #[default]
    Screen,
    /// Render hook on a designated camera.
    Camera,
    /// A caller-supplied texture.
    Texture,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Name the sender advertises on the network.
    pub name: String,
    pub keep_alpha: bool,
    pub capture: CaptureMode,
    /// Camera and texture sources hold linear-light values that need the
    /// sRGB transfer applied before packing.
    pub linear_color: bool,
    /// Side-channel metadata attached to every frame.
    pub metadata: Option<String>,
    /// Advertised frame rate as a fraction; 0/0 leaves it to the transport.
    pub frame_rate_n: i32,
    pub frame_rate_d: i32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            name: "Vidlink Sender".to_string(),
            keep_alpha: false,
            capture: CaptureMode::Screen,
            linear_color: false,
            metadata: None,
            frame_rate_n: 0,
            frame_rate_d: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Name of the remote source to connect to.
    pub source_name: String,
    /// Material property overridden with the decoded image, if any.
    pub material_property: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuBackend {
    /// wgpu when an adapter is available, software otherwise.
    #[default]
    Auto,
    Wgpu,
    Software,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GpuConfig {
    pub backend: GpuBackend,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Name of the process-wide sender shared by screen-capture pipelines.
    pub screen_sender_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            screen_sender_name: "Screen".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct VidlinkConfig {
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
    pub gpu: GpuConfig,
    pub transport: TransportConfig,
}

impl VidlinkConfig {
    pub fn from_toml_str(contents: &str) -> VidlinkResult<Self> {
        toml::from_str(contents).map_err(|e| VidlinkError::Config(e.to_string()))
    }

    pub fn load_from_file(path: &std::path::Path) -> VidlinkResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> VidlinkResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| VidlinkError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

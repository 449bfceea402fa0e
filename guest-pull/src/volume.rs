use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mount option key carrying a Kata virtual volume.
///
/// See `KataVirtualVolume` in the kata-containers `kata-types` crate.
pub const KATA_VIRTUAL_VOLUME_OPTION_NAME: &str = "io.katacontainers.volume";

/// Volume type asking the guest to pull the image itself.
pub const KATA_VIRTUAL_VOLUME_IMAGE_GUEST_PULL_TYPE: &str = "image_guest_pull";

/// `ImagePullVolume` holds the metadata forwarded to the guest image pull.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ImagePullVolume {
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// `KataVirtualVolume` describes a volume the Kata runtime materializes inside the guest.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct KataVirtualVolume {
    pub volume_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fs_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull: Option<ImagePullVolume>,
}

impl KataVirtualVolume {
    /// Build a guest pull volume.
    pub fn guest_pull(
        source: &str,
        options: Vec<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            volume_type: KATA_VIRTUAL_VOLUME_IMAGE_GUEST_PULL_TYPE.to_string(),
            source: source.to_string(),
            options,
            image_pull: Some(ImagePullVolume { metadata }),
            ..Default::default()
        }
    }

    /// Check that the volume is structurally usable by the runtime.
    pub fn validate(&self) -> Result<()> {
        if self.volume_type.is_empty() {
            return Err(Error::InvalidVolume(
                "volume type cannot be empty".to_string(),
            ));
        }

        if self.volume_type == KATA_VIRTUAL_VOLUME_IMAGE_GUEST_PULL_TYPE && self.image_pull.is_none()
        {
            return Err(Error::InvalidVolume(
                "image pull configuration required for guest pull volume type".to_string(),
            ));
        }

        Ok(())
    }

    /// Encode the volume as a single `io.katacontainers.volume=<base64>` mount option.
    pub fn to_option(&self) -> Result<String> {
        self.validate()?;

        let json = serde_json::to_vec(self)?;
        Ok(format!(
            "{}={}",
            KATA_VIRTUAL_VOLUME_OPTION_NAME,
            STANDARD.encode(json)
        ))
    }

    /// Decode a volume from a mount option built by [`KataVirtualVolume::to_option`].
    ///
    /// Every optional field may be absent from the encoded document.
    pub fn from_option(option: &str) -> Result<Self> {
        let encoded = option
            .strip_prefix(KATA_VIRTUAL_VOLUME_OPTION_NAME)
            .and_then(|rest| rest.strip_prefix('='))
            .ok_or_else(|| Error::InvalidOption(option.to_string()))?;

        let json = STANDARD.decode(encoded)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Returns true if `option` carries a Kata virtual volume.
pub fn is_volume_option(option: &str) -> bool {
    option
        .strip_prefix(KATA_VIRTUAL_VOLUME_OPTION_NAME)
        .map_or(false, |rest| rest.starts_with('='))
}

/// Create the mount options handing a guest pull volume to the runtime.
///
/// Always returns exactly one option.
pub fn prepare_guest_pull_mounts(
    source: &str,
    options: &[String],
    metadata: BTreeMap<String, String>,
) -> Result<Vec<String>> {
    let volume = KataVirtualVolume::guest_pull(source, options.to_vec(), metadata);
    let option = volume.to_option()?;

    log::debug!("prepared guest pull mount option {}", &option);

    Ok(vec![option])
}

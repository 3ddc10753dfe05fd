//! Foveated encoding parameters from the server settings document.
//!
//! The server sends its full settings as JSON. Only
//! `video.foveated_encoding` matters here, which is either the string
//! `"Disabled"` or `{"Enabled": { ...params }}`.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Region-of-interest hints for the stream renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoveationParams {
    pub center_size_x: f32,
    pub center_size_y: f32,
    pub center_shift_x: f32,
    pub center_shift_y: f32,
    pub edge_ratio_x: f32,
    pub edge_ratio_y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FoveatedEncoding {
    Disabled,
    Enabled(FoveationParams),
}

impl FoveatedEncoding {
    pub fn params(self) -> Option<FoveationParams> {
        match self {
            Self::Disabled => None,
            Self::Enabled(params) => Some(params),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerSettings {
    video: Option<VideoSettings>,
}

#[derive(Debug, Deserialize)]
struct VideoSettings {
    foveated_encoding: Option<FoveatedEncoding>,
}

/// Strict decode. Missing keys come back as `Ok(None)`.
pub fn parse_foveation(settings_json: &str) -> Result<Option<FoveatedEncoding>, serde_json::Error> {
    let settings: ServerSettings = serde_json::from_str(settings_json)?;
    Ok(settings.video.and_then(|video| video.foveated_encoding))
}

/// Foveation to apply to a new stream. Anything other than a well-formed
/// `Enabled` block disables it; problems are logged, never returned.
pub fn foveation_from_settings(settings_json: &str) -> Option<FoveationParams> {
    match parse_foveation(settings_json) {
        Ok(Some(encoding)) => {
            info!("foveated encoding: {encoding:?}");
            encoding.params()
        }
        Ok(None) => {
            error!("server settings have no video.foveated_encoding key");
            None
        }
        Err(err) => {
            error!("failed to parse server settings: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENABLED: &str = r#"{
        "video": {
            "bitrate": 30,
            "foveated_encoding": {
                "Enabled": {
                    "center_size_x": 0.45,
                    "center_size_y": 0.4,
                    "center_shift_x": 0.4,
                    "center_shift_y": 0.1,
                    "edge_ratio_x": 4.0,
                    "edge_ratio_y": 5.0
                }
            }
        },
        "audio": {}
    }"#;

    #[test]
    fn test_enabled_block_yields_params() {
        let params = foveation_from_settings(ENABLED).unwrap();
        assert_eq!(params.center_size_x, 0.45);
        assert_eq!(params.center_shift_y, 0.1);
        assert_eq!(params.edge_ratio_y, 5.0);
    }

    #[test]
    fn test_disabled_string() {
        let json = r#"{"video": {"foveated_encoding": "Disabled"}}"#;
        assert_eq!(parse_foveation(json).unwrap(), Some(FoveatedEncoding::Disabled));
        assert_eq!(foveation_from_settings(json), None);
    }

    #[test]
    fn test_missing_keys_disable_foveation() {
        assert_eq!(parse_foveation("{}").unwrap(), None);
        assert_eq!(parse_foveation(r#"{"video": {}}"#).unwrap(), None);
        assert_eq!(foveation_from_settings(r#"{"video": {}}"#), None);
    }

    #[test]
    fn test_malformed_settings_are_not_fatal() {
        assert!(parse_foveation("{\"video\": ").is_err());
        assert_eq!(foveation_from_settings("{\"video\": "), None);

        let incomplete = r#"{"video": {"foveated_encoding": {"Enabled": {"center_size_x": 0.5}}}}"#;
        assert!(parse_foveation(incomplete).is_err());
        assert_eq!(foveation_from_settings(incomplete), None);
    }
}

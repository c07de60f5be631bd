//! 网文档与轨迹的 JSON/RON 读写，仅供命令行驱动使用。
use std::fs;
use std::path::Path;

use ron::ser::PrettyConfig;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::net::core::{Net, NetError};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ron error: {0}")]
    Ron(#[from] ron::Error),
    #[error("ron parse error: {0}")]
    RonParse(#[from] ron::error::SpannedError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported document extension {0:?} (expected .json or .ron)")]
    UnsupportedFormat(String),
    #[error("invalid net: {0}")]
    Net(#[from] NetError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Ron,
}

impl Format {
    pub fn from_path(path: &Path) -> Result<Self, IoError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => Ok(Format::Json),
            "ron" => Ok(Format::Ron),
            _ => Err(IoError::UnsupportedFormat(ext)),
        }
    }
}

pub fn to_string<T: Serialize>(value: &T, format: Format) -> Result<String, IoError> {
    match format {
        Format::Json => Ok(serde_json::to_string_pretty(value)?),
        Format::Ron => {
            let mut pretty = PrettyConfig::default();
            pretty.new_line = "\n".into();
            Ok(ron::ser::to_string_pretty(value, pretty)?)
        }
    }
}

pub fn from_str<T: DeserializeOwned>(s: &str, format: Format) -> Result<T, IoError> {
    match format {
        Format::Json => Ok(serde_json::from_str(s)?),
        Format::Ron => Ok(ron::from_str(s)?),
    }
}

pub fn write<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<(), IoError> {
    let path = path.as_ref();
    let content = to_string(value, Format::from_path(path)?)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

/// Loads and validates a net document. Places without an explicit initial
/// marking take their current tokens as the initial marking.
pub fn read_net<P: AsRef<Path>>(path: P) -> Result<Net, IoError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let mut net: Net = from_str(&content, Format::from_path(path)?)?;
    net.validate()?;
    net.capture_initial_marking();
    Ok(net)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::structure::{ArcKind, Place, Rate, Transition, TransitionKind};

    fn sample() -> Net {
        let mut net = Net::empty();
        let s = net.add_place(Place::new("S", 10.0));
        let p = net.add_place(Place::new("P", 0.0));
        let t = net.add_transition(
            Transition::new("flow", TransitionKind::Continuous)
                .with_rate(Rate::parse("0.1 * S").unwrap()),
        );
        net.add_input_arc(s, t, 1.0, ArcKind::Normal).unwrap();
        net.add_output_arc(t, p, 1.0).unwrap();
        net
    }

    #[test]
    fn json_and_ron_documents_load_back() {
        let net = sample();
        for format in [Format::Json, Format::Ron] {
            let text = to_string(&net, format).unwrap();
            let loaded: Net = from_str(&text, format).unwrap();
            assert_eq!(loaded.places_len(), 2);
            assert_eq!(loaded.arcs().count(), 2);
            let t = loaded.transition_ids().next().unwrap();
            assert_eq!(loaded.input_arcs(t).count(), 1);
            assert!(loaded.validate().is_ok());
        }
    }

    #[test]
    fn saved_rate_keeps_its_value() {
        let mut net = sample();
        let t = net.transition_ids().next().unwrap();
        net.transition_mut(t).unwrap().rate = Rate::parse("(-S)^2 - -S").unwrap();
        let before = net.transition(t).unwrap().rate.eval(&net.scope(0.0)).unwrap();
        assert_eq!(before, 110.0);
        for format in [Format::Json, Format::Ron] {
            let loaded: Net = from_str(&to_string(&net, format).unwrap(), format).unwrap();
            let after = loaded.transition(t).unwrap().rate.eval(&loaded.scope(0.0)).unwrap();
            assert_eq!(after, before);
        }
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            Format::from_path(Path::new("net.xml")),
            Err(IoError::UnsupportedFormat(_))
        ));
    }
}

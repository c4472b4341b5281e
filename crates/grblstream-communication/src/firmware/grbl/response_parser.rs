//! GRBL Response Parser
//!
//! Classifies a single response line. Every line coming from the firmware
//! goes through [`classify`] exactly once; callers pattern-match on the
//! returned [`GrblResponse`].

use super::error_decoder;
use grblstream_core::{CNCPoint, Units};
use serde::{Deserialize, Serialize};
use std::fmt;

/// GRBL response types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GrblResponse {
    /// OK acknowledgment
    Ok,
    /// Error acknowledgment; legacy firmware sends text instead of a code
    Error(Option<u16>),
    /// Alarm with its code; 0 when a legacy text alarm could not be mapped
    Alarm(u16),
    /// Status report, still in its raw `<...>` form
    Status(String),
    /// Probe cycle result (`[PRB:x,y,z:1]`)
    Probe { position: CNCPoint, success: bool },
    /// Other bracketed feedback (`[MSG:...]`, `[GC:...]`, `[VER:...]`)
    Feedback(String),
    /// Setting response (`$n=value`)
    Setting { number: u16, value: String },
    /// Startup banner, sent after power-up or a soft reset
    Welcome(String),
    /// Anything else
    Message(String),
}

impl GrblResponse {
    /// True for `ok` and `error`, the responses that retire a command
    pub fn is_acknowledgement(&self) -> bool {
        matches!(self, Self::Ok | Self::Error(_))
    }
}

impl fmt::Display for GrblResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error(Some(code)) => write!(f, "{}", error_decoder::format_error(*code)),
            Self::Error(None) => write!(f, "error"),
            Self::Alarm(code) => write!(f, "{}", error_decoder::format_alarm(*code)),
            Self::Status(raw) => write!(f, "status:{}", raw),
            Self::Probe { position, success } => {
                write!(f, "probe:{} {}", position, if *success { "hit" } else { "miss" })
            }
            Self::Feedback(text) => write!(f, "feedback:{}", text),
            Self::Setting { number, value } => write!(f, "setting:${}={}", number, value),
            Self::Welcome(banner) => write!(f, "welcome:{}", banner),
            Self::Message(msg) => write!(f, "message:{}", msg),
        }
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        line.get(prefix.len()..)
    } else {
        None
    }
}

/// Classify one response line
pub fn classify(line: &str) -> GrblResponse {
    let line = line.trim();

    if line == "ok" {
        return GrblResponse::Ok;
    }

    if let Some(rest) = line.strip_prefix("error:") {
        return GrblResponse::Error(rest.trim().parse::<u16>().ok());
    }

    if let Some(rest) = strip_prefix_ignore_case(line, "alarm:") {
        let rest = rest.trim();
        let code = rest
            .parse::<u16>()
            .unwrap_or_else(|_| error_decoder::legacy_alarm_code(rest));
        return GrblResponse::Alarm(code);
    }

    if line.len() >= 2 && line.starts_with('<') && line.ends_with('>') {
        return GrblResponse::Status(line.to_string());
    }

    if let Some(body) = line
        .strip_prefix("[PRB:")
        .and_then(|rest| rest.strip_suffix(']'))
    {
        if let Some(probe) = parse_probe(body) {
            return probe;
        }
    }

    if line.starts_with('[') && line.ends_with(']') {
        return GrblResponse::Feedback(line.to_string());
    }

    if line.starts_with("Grbl ") || line.starts_with("GrblHAL ") {
        return GrblResponse::Welcome(line.to_string());
    }

    if let Some(setting) = line.strip_prefix('$').and_then(parse_setting) {
        return setting;
    }

    GrblResponse::Message(line.to_string())
}

fn parse_probe(body: &str) -> Option<GrblResponse> {
    let (coords, flag) = body.rsplit_once(':')?;
    let axes = coords
        .split(',')
        .map(|v| v.trim().parse::<f64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if axes.len() < 3 {
        return None;
    }
    Some(GrblResponse::Probe {
        position: CNCPoint::with_axes(&axes, Units::Unknown),
        success: flag.trim() == "1",
    })
}

fn parse_setting(rest: &str) -> Option<GrblResponse> {
    let (number, value) = rest.split_once('=')?;
    Some(GrblResponse::Setting {
        number: number.trim().parse().ok()?,
        value: value.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledgements() {
        assert_eq!(classify("ok"), GrblResponse::Ok);
        assert_eq!(classify("error:9"), GrblResponse::Error(Some(9)));
        assert_eq!(classify("error: 9"), GrblResponse::Error(Some(9)));
        assert_eq!(classify("error: Bad number format"), GrblResponse::Error(None));
        assert!(classify("error:20").is_acknowledgement());
    }

    #[test]
    fn test_alarms() {
        assert_eq!(classify("ALARM:1"), GrblResponse::Alarm(1));
        assert_eq!(classify("alarm:9"), GrblResponse::Alarm(9));
        assert_eq!(classify("ALARM: Hard/soft limit"), GrblResponse::Alarm(1));
        assert!(!classify("ALARM:2").is_acknowledgement());
    }

    #[test]
    fn test_status_is_kept_raw() {
        let line = "<Idle|MPos:0.000,0.000,0.000|FS:0,0>";
        assert_eq!(classify(line), GrblResponse::Status(line.to_string()));
    }

    #[test]
    fn test_probe_result() {
        match classify("[PRB:1.000,-2.500,0.250:1]") {
            GrblResponse::Probe { position, success } => {
                assert!(success);
                assert_eq!((position.x, position.y, position.z), (1.0, -2.5, 0.25));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            classify("[PRB:0.000,0.000,0.000:0]"),
            GrblResponse::Probe { success: false, .. }
        ));
    }

    #[test]
    fn test_feedback_and_settings() {
        assert_eq!(
            classify("[MSG:'$H'|'$X' to unlock]"),
            GrblResponse::Feedback("[MSG:'$H'|'$X' to unlock]".to_string())
        );
        assert_eq!(
            classify("$110=500.000"),
            GrblResponse::Setting {
                number: 110,
                value: "500.000".into()
            }
        );
        assert_eq!(classify("$N0="), GrblResponse::Message("$N0=".into()));
    }

    #[test]
    fn test_welcome_banner() {
        assert!(matches!(
            classify("Grbl 1.1h ['$' for help]"),
            GrblResponse::Welcome(_)
        ));
        assert!(matches!(classify("GrblHAL 1.1f ['$' or '$HELP' for help]"), GrblResponse::Welcome(_)));
    }

    #[test]
    fn test_everything_else_is_a_message() {
        assert_eq!(classify(""), GrblResponse::Message(String::new()));
        assert_eq!(classify("okay"), GrblResponse::Message("okay".into()));
    }
}

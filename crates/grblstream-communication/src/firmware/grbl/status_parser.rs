//! GRBL Status Report Parsing
//!
//! Handles both report formats:
//! - legacy (0.9): `<Idle,MPos:1.000,2.000,3.000,WPos:0.000,0.000,0.000>`
//! - 1.1: `<Hold:0|MPos:1.000,2.000,3.000|FS:500,8000|WCO:0.000,0.000,0.000>`
//!
//! GRBL 1.1 sends only one of MPos/WPos and reports the work coordinate
//! offset intermittently, so the parser remembers the previous report and
//! derives the missing position from the last known offset. Override and pin
//! fields are likewise only present in some reports and are carried over.

use grblstream_core::{
    BufferAvailability, CNCPoint, ControllerState, ControllerStatus, EnabledPins,
    OverridePercents, Units,
};
use std::collections::HashMap;

/// Fold a firmware state name into the controller's state vocabulary
///
/// The sub-state suffix (`Hold:1`, `Door:0`) is ignored.
pub fn firmware_state(state: &str) -> Option<ControllerState> {
    let base = state.split(':').next().unwrap_or(state).trim();
    match base.to_ascii_lowercase().as_str() {
        "idle" | "sleep" => Some(ControllerState::Idle),
        "run" | "jog" | "home" => Some(ControllerState::Run),
        "hold" | "door" => Some(ControllerState::Hold),
        "alarm" => Some(ControllerState::Alarm),
        "check" => Some(ControllerState::Check),
        _ => None,
    }
}

/// True when a position field has exactly three decimals, which GRBL uses
/// for millimeters (inches get four)
fn reports_millimeters(report: &str) -> bool {
    let bytes = report.as_bytes();
    bytes.iter().enumerate().any(|(start, &b)| {
        if b != b':' {
            return false;
        }
        let rest = &bytes[start + 1..];
        let int_len = rest.iter().take_while(|c| c.is_ascii_digit()).count();
        if int_len == 0 {
            return false;
        }
        let rest = &rest[int_len..];
        rest.len() >= 5
            && rest[0] == b'.'
            && rest[1..4].iter().all(u8::is_ascii_digit)
            && rest[4] == b','
    })
}

fn parse_axes(values: &[&str]) -> Option<Vec<f64>> {
    let axes = values
        .iter()
        .map(|v| v.trim().parse::<f64>().ok())
        .collect::<Option<Vec<_>>>()?;
    (axes.len() >= 3).then_some(axes)
}

/// Stateful status report parser
#[derive(Debug, Default, Clone)]
pub struct StatusParser {
    reporting_units: Option<Units>,
    last: Option<ControllerStatus>,
}

impl StatusParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use fixed units instead of inferring them from each report
    pub fn with_units(units: Units) -> Self {
        Self {
            reporting_units: Some(units),
            last: None,
        }
    }

    /// The previous successfully parsed report
    pub fn last(&self) -> Option<&ControllerStatus> {
        self.last.as_ref()
    }

    /// Units used for the most recent report
    pub fn units(&self) -> Units {
        self.last
            .as_ref()
            .map(|s| s.machine_coord.unit)
            .or(self.reporting_units)
            .unwrap_or(Units::Unknown)
    }

    /// Forget the previous report, e.g. after a reconnect
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Parse one `<...>` status line
    ///
    /// Returns `None` for a malformed report or an unknown state name.
    pub fn parse(&mut self, line: &str) -> Option<ControllerStatus> {
        let body = line.trim().strip_prefix('<')?.strip_suffix('>')?;
        let units = self
            .reporting_units
            .unwrap_or_else(|| if reports_millimeters(body) { Units::MM } else { Units::INCH });

        let status = if body.contains('|') {
            self.parse_v1(body, units)?
        } else {
            self.parse_legacy(body, units)?
        };

        self.last = Some(status.clone());
        Some(status)
    }

    fn parse_v1(&self, body: &str, units: Units) -> Option<ControllerStatus> {
        let mut parts = body.split('|');
        let state_string = parts.next()?.trim().to_string();
        let state = firmware_state(&state_string)?;

        let mut fields = StatusFields::default();
        let mut has_override = false;

        for part in parts {
            let Some((key, value)) = part.split_once(':') else {
                continue;
            };
            let values: Vec<&str> = value.split(',').collect();
            match key {
                "MPos" => fields.mpos = parse_axes(&values),
                "WPos" => fields.wpos = parse_axes(&values),
                "WCO" => fields.wco = parse_axes(&values),
                "F" => fields.feed = value.trim().parse().ok(),
                "FS" => {
                    fields.feed = values.first().and_then(|v| v.trim().parse().ok());
                    fields.spindle = values.get(1).and_then(|v| v.trim().parse().ok());
                }
                "Ov" => {
                    has_override = true;
                    if let [feed, rapid, spindle] = values.as_slice() {
                        fields.overrides = Some(OverridePercents {
                            feed: feed.trim().parse().ok()?,
                            rapid: rapid.trim().parse().ok()?,
                            spindle: spindle.trim().parse().ok()?,
                        });
                    }
                }
                "Pn" => fields.pins = Some(EnabledPins::parse(value)),
                "Bf" => {
                    if let [blocks, bytes] = values.as_slice() {
                        fields.buffer = Some(BufferAvailability {
                            planner_blocks: blocks.trim().parse().ok()?,
                            rx_bytes: bytes.trim().parse().ok()?,
                        });
                    }
                }
                _ => {}
            }
        }

        if has_override {
            if fields.pins.is_none() {
                fields.pins = Some(EnabledPins::default());
            }
        } else if let Some(last) = &self.last {
            fields.overrides = last.overrides;
            fields.pins = fields.pins.or(last.pins);
        }

        Some(self.assemble(state, state_string, fields, units))
    }

    fn parse_legacy(&self, body: &str, units: Units) -> Option<ControllerStatus> {
        let mut tokens = body.split(',');
        let state_string = tokens.next()?.trim().to_string();
        let state = firmware_state(&state_string)?;

        // "Key:v1,v2,v3" spreads over several comma separated tokens
        let mut grouped: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut current: Option<&str> = None;
        for token in tokens {
            if let Some((key, value)) = token.split_once(':') {
                grouped.entry(key.trim()).or_default().push(value);
                current = Some(key.trim());
            } else if let Some(key) = current {
                grouped.entry(key).or_default().push(token);
            }
        }

        let fields = StatusFields {
            mpos: grouped.get("MPos").and_then(|v| parse_axes(v)),
            wpos: grouped.get("WPos").and_then(|v| parse_axes(v)),
            wco: grouped.get("WCO").and_then(|v| parse_axes(v)),
            feed: grouped
                .get("F")
                .and_then(|v| v.first())
                .and_then(|v| v.trim().parse().ok()),
            ..StatusFields::default()
        };

        Some(self.assemble(state, state_string, fields, units))
    }

    fn assemble(
        &self,
        state: ControllerState,
        state_string: String,
        fields: StatusFields,
        units: Units,
    ) -> ControllerStatus {
        let point = |axes: &Vec<f64>| CNCPoint::with_axes(axes, units);

        let work_coord_offset = fields
            .wco
            .as_ref()
            .map(point)
            .or_else(|| self.last.as_ref().and_then(|s| s.work_coord_offset));
        let offset = work_coord_offset.unwrap_or_else(|| CNCPoint::new(units));

        let (machine_coord, work_coord) = match (fields.mpos.as_ref(), fields.wpos.as_ref()) {
            (Some(m), Some(w)) => (point(m), point(w)),
            (Some(m), None) => {
                let m = point(m);
                (m, m.subtract(&offset))
            }
            (None, Some(w)) => {
                let w = point(w);
                (w.add(&offset), w)
            }
            (None, None) => match &self.last {
                Some(last) => (last.machine_coord, last.work_coord),
                None => (CNCPoint::new(units), CNCPoint::new(units)),
            },
        };

        let mut status = ControllerStatus::new(state);
        status.state_string = state_string;
        status.machine_coord = machine_coord;
        status.work_coord = work_coord;
        status.work_coord_offset = work_coord_offset;
        status.feed_rate = fields.feed;
        status.spindle_speed = fields.spindle;
        status.overrides = fields.overrides;
        status.pins = fields.pins;
        status.buffer = fields.buffer;
        status
    }
}

#[derive(Debug, Default)]
struct StatusFields {
    mpos: Option<Vec<f64>>,
    wpos: Option<Vec<f64>>,
    wco: Option<Vec<f64>>,
    feed: Option<f64>,
    spindle: Option<f64>,
    overrides: Option<OverridePercents>,
    pins: Option<EnabledPins>,
    buffer: Option<BufferAvailability>,
}

//! GRBL Error and Alarm Code Decoder
//! Turns the numeric codes of GRBL 1.1 into short human-readable descriptions

/// Describe a GRBL `error:N` code
pub fn decode_error(code: u16) -> &'static str {
    match code {
        1 => "Expected a command letter; a G-code word is a letter followed by a value.",
        2 => "Numeric value is missing or malformed.",
        3 => "'$' system command not recognized.",
        4 => "Negative value where a positive one is required.",
        5 => "Homing is not enabled in settings.",
        6 => "Step pulse time must be at least 3 microseconds.",
        7 => "Settings read from EEPROM failed; defaults restored.",
        8 => "'$' command requires the machine to be idle.",
        9 => "G-code is locked out while in alarm or jog state.",
        10 => "Soft limits need homing to be enabled.",
        11 => "Line too long; it was not executed.",
        12 => "Setting would exceed the maximum step rate.",
        13 => "Safety door opened.",
        14 => "Startup line or build info too long for EEPROM.",
        15 => "Jog target is outside machine travel.",
        16 => "Jog command is missing '=' or contains forbidden G-code.",
        17 => "Laser mode needs a PWM spindle output.",
        20 => "Unsupported or invalid G-code command.",
        21 => "Two commands of the same modal group in one block.",
        22 => "Feed rate not set.",
        23 => "Command needs an integer value.",
        24 => "Two commands in one block both need axis words.",
        25 => "Word repeated in block.",
        26 => "Command needs axis words but none were given.",
        27 => "Line number out of range (1 to 9,999,999).",
        28 => "Command is missing a required P or L word.",
        29 => "Only G54 to G59 work coordinate systems are supported.",
        30 => "G53 requires G0 or G1 motion mode.",
        31 => "Axis words present while G80 motion cancel is active.",
        32 => "Arc has no axis words in the selected plane.",
        33 => "Motion target is invalid (impossible arc or probe at current position).",
        34 => "Arc radius definition produced a geometry error.",
        35 => "Arc offset definition is missing its IJK word.",
        36 => "Leftover words not used by any command.",
        37 => "G43.1 offset given for an axis other than the tool length axis.",
        38 => "Tool number above the supported maximum.",
        _ => "Unknown error.",
    }
}

/// Describe a GRBL `ALARM:N` code
pub fn decode_alarm(code: u16) -> &'static str {
    match code {
        1 => "Hard limit triggered; position is likely lost, re-home.",
        2 => "Soft limit: target exceeds machine travel; position kept.",
        3 => "Reset while moving; position may be lost, re-home.",
        4 => "Probe not in the expected initial state.",
        5 => "Probe made no contact within the programmed travel.",
        6 => "Homing aborted by reset.",
        7 => "Homing aborted: safety door opened.",
        8 => "Homing failed to clear the limit switch on pull-off.",
        9 => "Homing could not find the limit switch.",
        10 => "Homing failed: second switch not found on dual-axis homing.",
        _ => "Unknown alarm.",
    }
}

/// Code for the text alarms of GRBL 0.9 and earlier, which carry no number
pub fn legacy_alarm_code(text: &str) -> u16 {
    let text = text.trim().to_ascii_lowercase();
    if text.contains("limit") {
        1
    } else if text.contains("abort") {
        3
    } else if text.contains("probe") {
        4
    } else {
        0
    }
}

pub fn format_error(code: u16) -> String {
    format!("error:{} - {}", code, decode_error(code))
}

pub fn format_alarm(code: u16) -> String {
    format!("ALARM:{} - {}", code, decode_alarm(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_codes() {
        assert_eq!(decode_error(9), "G-code is locked out while in alarm or jog state.");
        assert_eq!(decode_alarm(1), "Hard limit triggered; position is likely lost, re-home.");
    }

    #[test]
    fn test_unassigned_codes() {
        assert_eq!(decode_error(18), "Unknown error.");
        assert_eq!(decode_error(99), "Unknown error.");
        assert_eq!(decode_alarm(0), "Unknown alarm.");
    }

    #[test]
    fn test_legacy_alarm_text() {
        assert_eq!(legacy_alarm_code("Hard/soft limit"), 1);
        assert_eq!(legacy_alarm_code("Abort during cycle"), 3);
        assert_eq!(legacy_alarm_code("Probe fail"), 4);
        assert_eq!(legacy_alarm_code("something new"), 0);
    }

    #[test]
    fn test_format() {
        assert!(format_error(22).starts_with("error:22 - Feed rate"));
        assert!(format_alarm(5).starts_with("ALARM:5 - Probe"));
    }
}

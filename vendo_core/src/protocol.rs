//! Line-oriented serial protocol to the host controller.
//!
//! Commands arrive one per line, keywords case-insensitive. Events go out
//! one per line with a stable keyword prefix; `Display` is the wire format.

use crate::coin::RejectReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Force session to Idle, clear credit, actuators off.
    Reset,
    /// Emit a one-line state snapshot.
    Status,
    /// Begin coin-signature learning.
    Cal,
    /// Begin flow calibration (terminated by `Done`).
    FlowCal,
    /// End flow calibration and adopt the counted pulses.
    Done,
    /// Diagnostic: force-begin a pour from current credit.
    Start,
    /// Abort a pour or cancel a countdown.
    Stop,
    Unknown(String),
}

/// Parse one host line. Blank lines yield None and are ignored.
pub fn parse_command(line: &str) -> Option<Command> {
    let t = line.trim();
    if t.is_empty() {
        return None;
    }
    Some(match t.to_ascii_uppercase().as_str() {
        "RESET" => Command::Reset,
        "STATUS" => Command::Status,
        "CAL" => Command::Cal,
        "FLOWCAL" => Command::FlowCal,
        "DONE" => Command::Done,
        "START" => Command::Start,
        "STOP" => Command::Stop,
        _ => Command::Unknown(t.to_string()),
    })
}

/// Operating mode reported to the host. Charging-port behavior lives in a
/// separate host process; only the water path is implemented here, but the
/// mode is an explicit variant rather than an ad-hoc flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingMode {
    #[default]
    Water,
}

impl core::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Water => f.write_str("WATER"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSnapshot {
    pub mode: OperatingMode,
    pub credit_ml: u32,
    pub dispensing: bool,
    pub present: bool,
    pub coin_pulses: u32,
    pub flow_pulses: u64,
    /// How long the container has been gone while a grace timer runs.
    pub removed_for_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Startup banner the host waits for.
    Ready,
    CoinInserted(u16),
    CreditMl(u32),
    CoinRejected { pulses: u32, reason: RejectReason },
    CupDetected,
    CupRemoved,
    Countdown(u32),
    CountdownEnd,
    CountdownCancelled,
    DispenseStart,
    DispenseProgress { ml: f32, remaining_ml: f32 },
    DispenseDone(f32),
    /// Early stop: unspent credit carried back for a later session.
    CreditLeft(u32),
    SystemReset,
    Status(StatusSnapshot),
    CalStart,
    CalInsert(u16),
    CalCoin { denomination: u16, pulses: u32 },
    CalSkip(u16),
    CalDone,
    FlowCalStart,
    FlowCalDone(f32),
    Error(String),
}

impl core::fmt::Display for Event {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Ready => write!(f, "READY"),
            Self::CoinInserted(d) => write!(f, "COIN_INSERTED {d}"),
            Self::CreditMl(ml) => write!(f, "CREDIT_ML {ml}"),
            Self::CoinRejected { pulses, reason } => {
                write!(f, "COIN_REJECTED {pulses} {reason}")
            }
            Self::CupDetected => write!(f, "CUP_DETECTED"),
            Self::CupRemoved => write!(f, "CUP_REMOVED"),
            Self::Countdown(s) => write!(f, "COUNTDOWN {s}"),
            Self::CountdownEnd => write!(f, "COUNTDOWN_END"),
            Self::CountdownCancelled => write!(f, "COUNTDOWN_CANCELLED"),
            Self::DispenseStart => write!(f, "DISPENSE_START"),
            Self::DispenseProgress { ml, remaining_ml } => {
                write!(f, "DISPENSE_PROGRESS ml={ml:.1} remaining={remaining_ml:.1}")
            }
            Self::DispenseDone(ml) => write!(f, "DISPENSE_DONE {ml:.1}"),
            Self::CreditLeft(ml) => write!(f, "CREDIT_LEFT {ml}"),
            Self::SystemReset => write!(f, "SYSTEM_RESET"),
            Self::Status(s) => {
                write!(
                    f,
                    "STATUS mode={} credit_ml={} dispensing={} cup={} coin_pulses={} flow_pulses={}",
                    s.mode,
                    s.credit_ml,
                    yes_no(s.dispensing),
                    yes_no(s.present),
                    s.coin_pulses,
                    s.flow_pulses,
                )?;
                if let Some(ms) = s.removed_for_ms {
                    write!(f, " removed_ms={ms}")?;
                }
                Ok(())
            }
            Self::CalStart => write!(f, "CAL_START"),
            Self::CalInsert(d) => write!(f, "CAL_INSERT {d}"),
            Self::CalCoin {
                denomination,
                pulses,
            } => write!(f, "CAL_COIN {denomination} {pulses}"),
            Self::CalSkip(d) => write!(f, "CAL_SKIP {d}"),
            Self::CalDone => write!(f, "CAL_DONE"),
            Self::FlowCalStart => write!(f, "FLOWCAL_START"),
            Self::FlowCalDone(ppl) => write!(f, "FLOWCAL_DONE {ppl:.0}"),
            Self::Error(msg) => write!(f, "ERR {msg}"),
        }
    }
}

fn yes_no(v: bool) -> &'static str {
    if v { "YES" } else { "NO" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_case_insensitive() {
        assert_eq!(parse_command("reset"), Some(Command::Reset));
        assert_eq!(parse_command("  FlowCal \n"), Some(Command::FlowCal));
        assert_eq!(parse_command("STATUS"), Some(Command::Status));
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("   "), None);
        assert_eq!(
            parse_command("ADD100"),
            Some(Command::Unknown("ADD100".to_string()))
        );
    }

    #[test]
    fn event_lines_use_stable_prefixes() {
        assert_eq!(Event::CoinInserted(5).to_string(), "COIN_INSERTED 5");
        assert_eq!(Event::CreditMl(250).to_string(), "CREDIT_ML 250");
        assert_eq!(Event::Countdown(3).to_string(), "COUNTDOWN 3");
        assert_eq!(Event::DispenseDone(250.0).to_string(), "DISPENSE_DONE 250.0");
        assert_eq!(
            Event::DispenseProgress {
                ml: 100.04,
                remaining_ml: 149.96
            }
            .to_string(),
            "DISPENSE_PROGRESS ml=100.0 remaining=150.0"
        );
        assert_eq!(Event::CreditLeft(150).to_string(), "CREDIT_LEFT 150");
    }

    #[test]
    fn status_line_is_single_line() {
        let line = Event::Status(StatusSnapshot {
            mode: OperatingMode::Water,
            credit_ml: 250,
            dispensing: true,
            present: true,
            coin_pulses: 5,
            flow_pulses: 40,
            removed_for_ms: Some(1200),
        })
        .to_string();
        assert!(!line.contains('\n'));
        assert!(line.starts_with("STATUS mode=WATER credit_ml=250"));
        assert!(line.ends_with("removed_ms=1200"));
    }
}

//! Typed commands built from `(name, argument string)` pairs.
//!
//! Every argument is checked individually so a bad value produces an error
//! naming the command and the field, never a silent default.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::calibration::ForceMode;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ArgError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{command}: missing {field}")]
    Missing {
        command: &'static str,
        field: &'static str,
    },
    #[error("{command}: invalid {field} '{value}'")]
    Invalid {
        command: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("{command}: {field} {value} out of range ({expected})")]
    OutOfRange {
        command: &'static str,
        field: &'static str,
        value: f32,
        expected: String,
    },
    #[error("{command}: unexpected argument '{value}'")]
    Unexpected {
        command: &'static str,
        value: String,
    },
}

/// What to do when a move's force limit trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitAction {
    /// Pause and wait for resume or cancel
    #[default]
    Hold,
    /// Finish the move, then travel to the retract reference
    Retract,
    /// Finish the move where it stopped
    Skip,
}

impl LimitAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::Retract => "retract",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for LimitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hold" => Ok(Self::Hold),
            "retract" => Ok(Self::Retract),
            "skip" => Ok(Self::Skip),
            _ => Err(()),
        }
    }
}

/// Arguments shared by `move_abs` and `move_inc`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveArgs {
    /// Target position (absolute) or signed distance (incremental), mm
    pub value_mm: f32,
    pub speed_mms: Option<f32>,
    /// Force target in kg; zero or absent disables force limiting
    pub force_kg: Option<f32>,
    pub action: LimitAction,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Home,
    HomeRetract,
    MoveAbs(MoveArgs),
    MoveInc(MoveArgs),
    SetRetract {
        position_mm: f32,
        speed_mms: Option<f32>,
    },
    Retract {
        speed_mms: Option<f32>,
    },
    Pause,
    Resume,
    Cancel,
    SetForceMode(ForceMode),
    SetForceOffset(f32),
    SetForceScale(f32),
    SetForceZero,
    SetStrainCal([f32; 5]),
    Enable,
    Disable,
    Reset,
    DumpCalibration,
}

struct Args<'a> {
    command: &'static str,
    tokens: std::str::SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn new(command: &'static str, args: &'a str) -> Self {
        Self {
            command,
            tokens: args.split_whitespace(),
        }
    }

    fn number(&self, field: &'static str, token: &str) -> Result<f32, ArgError> {
        match token.parse::<f32>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(ArgError::Invalid {
                command: self.command,
                field,
                value: token.to_string(),
            }),
        }
    }

    fn required(&mut self, field: &'static str) -> Result<f32, ArgError> {
        let token = self.tokens.next().ok_or(ArgError::Missing {
            command: self.command,
            field,
        })?;
        self.number(field, token)
    }

    fn optional(&mut self, field: &'static str) -> Result<Option<f32>, ArgError> {
        self.tokens
            .next()
            .map(|token| self.number(field, token))
            .transpose()
    }

    fn word(&mut self, field: &'static str) -> Result<&'a str, ArgError> {
        self.tokens.next().ok_or(ArgError::Missing {
            command: self.command,
            field,
        })
    }

    fn speed(&mut self) -> Result<Option<f32>, ArgError> {
        match self.optional("speed")? {
            Some(v) if v <= 0.0 => Err(ArgError::OutOfRange {
                command: self.command,
                field: "speed",
                value: v,
                expected: "must be > 0 mm/s".into(),
            }),
            other => Ok(other),
        }
    }

    fn finish(mut self) -> Result<(), ArgError> {
        match self.tokens.next() {
            Some(extra) => Err(ArgError::Unexpected {
                command: self.command,
                value: extra.to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn parse_move(
    command: &'static str,
    field: &'static str,
    args: &str,
) -> Result<MoveArgs, ArgError> {
    let mut a = Args::new(command, args);
    let value_mm = a.required(field)?;
    let speed_mms = a.speed()?;
    let force_kg = match a.optional("force")? {
        Some(v) if v < 0.0 => {
            return Err(ArgError::OutOfRange {
                command,
                field: "force",
                value: v,
                expected: "must be >= 0 kg".into(),
            });
        }
        other => other,
    };
    let action = match a.tokens.next() {
        None => LimitAction::default(),
        Some(t) => t.parse().map_err(|()| ArgError::Invalid {
            command,
            field: "action",
            value: t.to_string(),
        })?,
    };
    a.finish()?;
    Ok(MoveArgs {
        value_mm,
        speed_mms,
        force_kg,
        action,
    })
}

fn no_args(cmd: Command, args: &str) -> Result<Command, ArgError> {
    Args::new(cmd.name(), args).finish()?;
    Ok(cmd)
}

impl Command {
    pub fn parse(name: &str, args: &str) -> Result<Self, ArgError> {
        match name {
            "home" => no_args(Self::Home, args),
            "home_retract" => no_args(Self::HomeRetract, args),
            "move_abs" => parse_move("move_abs", "position", args).map(Self::MoveAbs),
            "move_inc" => parse_move("move_inc", "distance", args).map(Self::MoveInc),
            "set_retract" => {
                let mut a = Args::new("set_retract", args);
                let position_mm = a.required("position")?;
                let speed_mms = a.speed()?;
                a.finish()?;
                Ok(Self::SetRetract {
                    position_mm,
                    speed_mms,
                })
            }
            "retract" => {
                let mut a = Args::new("retract", args);
                let speed_mms = a.speed()?;
                a.finish()?;
                Ok(Self::Retract { speed_mms })
            }
            "pause" => no_args(Self::Pause, args),
            "resume" => no_args(Self::Resume, args),
            "cancel" => no_args(Self::Cancel, args),
            "set_force_mode" => {
                let mut a = Args::new("set_force_mode", args);
                let word = a.word("mode")?;
                let mode = word.parse::<ForceMode>().map_err(|_| ArgError::Invalid {
                    command: "set_force_mode",
                    field: "mode",
                    value: word.to_string(),
                })?;
                a.finish()?;
                Ok(Self::SetForceMode(mode))
            }
            "set_force_offset" => {
                let mut a = Args::new("set_force_offset", args);
                let v = a.required("offset")?;
                a.finish()?;
                Ok(Self::SetForceOffset(v))
            }
            "set_force_scale" => {
                let mut a = Args::new("set_force_scale", args);
                let v = a.required("scale")?;
                a.finish()?;
                Ok(Self::SetForceScale(v))
            }
            "set_force_zero" => no_args(Self::SetForceZero, args),
            "set_strain_cal" => {
                let mut a = Args::new("set_strain_cal", args);
                let mut coeffs = [0.0f32; 5];
                for (slot, field) in coeffs.iter_mut().zip(["c4", "c3", "c2", "c1", "c0"]) {
                    *slot = a.required(field)?;
                }
                a.finish()?;
                Ok(Self::SetStrainCal(coeffs))
            }
            "enable" => no_args(Self::Enable, args),
            "disable" => no_args(Self::Disable, args),
            "reset" => no_args(Self::Reset, args),
            "dump_cal" => no_args(Self::DumpCalibration, args),
            other => Err(ArgError::UnknownCommand(other.to_string())),
        }
    }

    /// Wire name, also used to tag `Done` events.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::HomeRetract => "home_retract",
            Self::MoveAbs(_) => "move_abs",
            Self::MoveInc(_) => "move_inc",
            Self::SetRetract { .. } => "set_retract",
            Self::Retract { .. } => "retract",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::SetForceMode(_) => "set_force_mode",
            Self::SetForceOffset(_) => "set_force_offset",
            Self::SetForceScale(_) => "set_force_scale",
            Self::SetForceZero => "set_force_zero",
            Self::SetStrainCal(_) => "set_strain_cal",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Reset => "reset",
            Self::DumpCalibration => "dump_cal",
        }
    }
}

/// Split a command line into name and argument string.
///
/// Blank lines and `#` comments yield `None`.
pub fn split_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn move_abs_with_all_fields() {
        let cmd = Command::parse("move_abs", "50.0 10.0 200 retract").unwrap();
        assert_eq!(
            cmd,
            Command::MoveAbs(MoveArgs {
                value_mm: 50.0,
                speed_mms: Some(10.0),
                force_kg: Some(200.0),
                action: LimitAction::Retract,
            })
        );
    }

    #[test]
    fn move_inc_defaults_to_hold_without_force() {
        let Command::MoveInc(args) = Command::parse("move_inc", "-2.5").unwrap() else {
            panic!("expected move_inc");
        };
        assert_eq!(args.value_mm, -2.5);
        assert_eq!(args.speed_mms, None);
        assert_eq!(args.force_kg, None);
        assert_eq!(args.action, LimitAction::Hold);
    }

    #[rstest]
    #[case("move_abs", "", "move_abs: missing position")]
    #[case("move_abs", "abc", "move_abs: invalid position 'abc'")]
    #[case("move_inc", "1 fast", "move_inc: invalid speed 'fast'")]
    #[case("move_inc", "1 -5", "move_inc: speed -5 out of range")]
    #[case("move_inc", "1 5 heavy", "move_inc: invalid force 'heavy'")]
    #[case("move_inc", "1 5 -3", "move_inc: force -3 out of range")]
    #[case("move_abs", "1 5 30 bounce", "move_abs: invalid action 'bounce'")]
    #[case("move_abs", "1 5 30 hold extra", "move_abs: unexpected argument 'extra'")]
    #[case("set_force_mode", "torque", "set_force_mode: invalid mode 'torque'")]
    #[case("set_strain_cal", "1 2 3 4", "set_strain_cal: missing c0")]
    #[case("set_strain_cal", "1 2 x 4 5", "set_strain_cal: invalid c2 'x'")]
    #[case("home", "now", "home: unexpected argument 'now'")]
    #[case("move_abs", "nan", "move_abs: invalid position 'nan'")]
    #[case("jump", "", "unknown command 'jump'")]
    fn each_field_has_its_own_error(
        #[case] name: &str,
        #[case] args: &str,
        #[case] expected: &str,
    ) {
        let err = Command::parse(name, args).unwrap_err();
        assert!(
            err.to_string().starts_with(expected),
            "expected '{expected}', got '{err}'"
        );
    }

    #[rstest]
    #[case("home", Command::Home)]
    #[case("pause", Command::Pause)]
    #[case("dump_cal", Command::DumpCalibration)]
    fn name_round_trips(#[case] name: &str, #[case] cmd: Command) {
        assert_eq!(Command::parse(name, "").unwrap(), cmd);
        assert_eq!(cmd.name(), name);
    }

    #[test]
    fn strain_cal_keeps_order() {
        assert_eq!(
            Command::parse("set_strain_cal", "-143 592 -365 127 -2.15").unwrap(),
            Command::SetStrainCal([-143.0, 592.0, -365.0, 127.0, -2.15])
        );
    }

    #[rstest]
    #[case("  move_abs 10 5  ", Some(("move_abs", "10 5")))]
    #[case("home", Some(("home", "")))]
    #[case("# comment", None)]
    #[case("   ", None)]
    fn split_line_cases(#[case] line: &str, #[case] expected: Option<(&str, &str)>) {
        assert_eq!(split_line(line), expected);
    }
}

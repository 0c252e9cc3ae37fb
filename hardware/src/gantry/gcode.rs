//! G-code command construction and validation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Position report query (Marlin `M114`).
pub const STATUS_QUERY: &str = "M114";

/// Home all axes.
pub const HOME_COMMAND: &str = "G28";

/// Errors in command text supplied by a caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The command was empty or could break newline framing.
    #[error("Malformed command: {0}")]
    MalformedCommand(String),
}

/// A single validated command line, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GcodeCommand(String);

impl GcodeCommand {
    /// Validate raw operator input.
    ///
    /// Surrounding whitespace is trimmed. Empty input, or input with an
    /// embedded line break, is rejected because the controller would see it
    /// as zero or several commands.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(ProtocolError::MalformedCommand(
                "no command provided".to_string(),
            ));
        }
        if text.contains(|c: char| c == '\n' || c == '\r') {
            return Err(ProtocolError::MalformedCommand(format!(
                "embedded line break in {text:?}"
            )));
        }
        Ok(Self(text.to_string()))
    }

    /// Linear move carrying X/Y offsets rounded to two decimals.
    ///
    /// ```
    /// use hardware::gantry::GcodeCommand;
    ///
    /// let cmd = GcodeCommand::linear_move(0.05, 0.0, 1000);
    /// assert_eq!(cmd.as_str(), "G1 X0.05 Y0.00 F1000");
    /// ```
    pub fn linear_move(dx_mm: f64, dy_mm: f64, feed_rate: u32) -> Self {
        Self(format!("G1 X{dx_mm:.2} Y{dy_mm:.2} F{feed_rate}"))
    }

    /// Single-axis X move, formatted with the shortest exact representation.
    ///
    /// ```
    /// use hardware::gantry::GcodeCommand;
    ///
    /// assert_eq!(GcodeCommand::x_move(70.0, 1000).as_str(), "G1 X70 F1000");
    /// ```
    pub fn x_move(x_mm: f64, feed_rate: u32) -> Self {
        Self(format!("G1 X{x_mm} F{feed_rate}"))
    }

    /// Jog one axis by `step_mm`, or home all axes.
    pub fn jog(direction: JogDirection, step_mm: f64, feed_rate: u32) -> Self {
        let step = step_mm.abs();
        let text = match direction {
            JogDirection::XPlus => format!("G1 X{step} F{feed_rate}"),
            JogDirection::XMinus => format!("G1 X-{step} F{feed_rate}"),
            JogDirection::YPlus => format!("G1 Y{step} F{feed_rate}"),
            JogDirection::YMinus => format!("G1 Y-{step} F{feed_rate}"),
            JogDirection::ZPlus => format!("G1 Z{step} F{feed_rate}"),
            JogDirection::ZMinus => format!("G1 Z-{step} F{feed_rate}"),
            JogDirection::Home => HOME_COMMAND.to_string(),
        };
        Self(text)
    }

    /// The command text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GcodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GcodeCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Operator jog buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JogDirection {
    #[serde(rename = "x+")]
    XPlus,
    #[serde(rename = "x-")]
    XMinus,
    #[serde(rename = "y+")]
    YPlus,
    #[serde(rename = "y-")]
    YMinus,
    #[serde(rename = "z+")]
    ZPlus,
    #[serde(rename = "z-")]
    ZMinus,
    #[serde(rename = "home")]
    Home,
}

impl FromStr for JogDirection {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x+" => Ok(Self::XPlus),
            "x-" => Ok(Self::XMinus),
            "y+" => Ok(Self::YPlus),
            "y-" => Ok(Self::YMinus),
            "z+" => Ok(Self::ZPlus),
            "z-" => Ok(Self::ZMinus),
            "home" => Ok(Self::Home),
            other => Err(ProtocolError::MalformedCommand(format!(
                "unknown jog direction {other:?}"
            ))),
        }
    }
}

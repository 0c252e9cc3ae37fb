//! Machine status snapshots and position report parsing.

use serde::Serialize;

use super::link::LinkState;

/// Cartesian machine position in millimetres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    /// Parse a position report such as
    /// `X:10.00 Y:20.00 Z:5.00 E:0.00 Count X:800 Y:1600 Z:2000`.
    ///
    /// Tokens are whitespace separated. Only the first `X:`, `Y:` and `Z:`
    /// token of each axis is used, so the trailing step-count echo that
    /// Marlin appends is ignored. Unparseable tokens are skipped and missing
    /// axes default to `0.0`.
    ///
    /// ```
    /// use hardware::gantry::Position;
    ///
    /// let pos = Position::parse("X:1.5 Y:-2.25 ok");
    /// assert_eq!(pos.x, 1.5);
    /// assert_eq!(pos.y, -2.25);
    /// assert_eq!(pos.z, 0.0);
    /// ```
    pub fn parse(text: &str) -> Self {
        let mut x = None;
        let mut y = None;
        let mut z = None;

        for token in text.split_whitespace() {
            let Some((axis, value)) = token.split_once(':') else {
                continue;
            };
            let slot = match axis {
                "X" => &mut x,
                "Y" => &mut y,
                "Z" => &mut z,
                _ => continue,
            };
            if slot.is_none() {
                if let Ok(v) = value.parse::<f64>() {
                    *slot = Some(v);
                }
            }
        }

        Self {
            x: x.unwrap_or(0.0),
            y: y.unwrap_or(0.0),
            z: z.unwrap_or(0.0),
        }
    }
}

/// Point-in-time view of the controller, derived from a status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    pub connection_state: LinkState,
    pub position: Position,
    pub raw_last_response: String,
}

impl MachineStatus {
    /// Status for a link that is not open.
    pub fn disconnected() -> Self {
        Self {
            connection_state: LinkState::Disconnected,
            position: Position::default(),
            raw_last_response: String::new(),
        }
    }

    /// Build a status from the raw response to a position query.
    pub fn from_response(connection_state: LinkState, raw: &str) -> Self {
        Self {
            connection_state,
            position: Position::parse(raw),
            raw_last_response: raw.to_string(),
        }
    }
}

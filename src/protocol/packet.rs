//! Line-oriented packet codec for the co-simulation socket.
//!
//! One packet is one line of whitespace-separated tokens:
//!
//! ```text
//! version flag numReal numInt numBool simTime real_1 .. real_n int_1 .. bool_1 ..
//! ```
//!
//! Only `version flag` is present when the flag is anything other than
//! [`Flag::Communicate`].
//!
//! # Examples
//!
//! ```
//! use cosim_ctl::protocol::{Flag, Packet};
//!
//! let packet = Packet::decode(b"2 0 1 0 0 3.000000000000000e+02 2.150000000000000e+01 \n")
//!     .expect("valid packet");
//! assert_eq!(packet.flag, Flag::Communicate);
//! assert_eq!(packet.sim_time, Some(300.0));
//! assert_eq!(packet.reals, vec![21.5]);
//! ```

use std::fmt;

use thiserror::Error;

/// Highest protocol version this codec understands, and the one it writes.
pub const PROTOCOL_VERSION: i32 = 2;

/// Number of header tokens preceding the real values of a Communicate packet.
const HEADER_TOKENS: usize = 6;

/// Packet flag. Anything but `Communicate` ends the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// Regular timestep exchange carrying a payload.
    Communicate,
    /// Simulation reached its end.
    Finish,
    /// Engine failed during initialization.
    InitError,
    /// Engine failed while integrating a timestep.
    TimeIntegrationError,
    /// Engine failed for an unspecified reason.
    UnknownError,
}

impl Flag {
    /// Wire code of the flag.
    pub fn code(self) -> i32 {
        match self {
            Self::Communicate => 0,
            Self::Finish => 1,
            Self::InitError => -10,
            Self::TimeIntegrationError => -20,
            Self::UnknownError => -1,
        }
    }

    /// Maps a wire code back to a flag, `None` for codes outside the protocol.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Communicate),
            1 => Some(Self::Finish),
            -10 => Some(Self::InitError),
            -20 => Some(Self::TimeIntegrationError),
            -1 => Some(Self::UnknownError),
            _ => None,
        }
    }

    /// Returns `true` for the flags an engine uses to report a failure.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::InitError | Self::TimeIntegrationError | Self::UnknownError
        )
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Communicate => "communicate",
            Self::Finish => "finish",
            Self::InitError => "init-error",
            Self::TimeIntegrationError => "time-integration-error",
            Self::UnknownError => "unknown-error",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// Codec failures. Fatal to the packet they occur in.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("malformed packet: {reason}")]
    Malformed { reason: String },
    #[error("truncated packet: expected {expected} tokens, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("unsupported protocol version {version} (max {max})", max = PROTOCOL_VERSION)]
    ProtocolVersion { version: i32 },
}

impl CodecError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Protocol version the packet was written with.
    pub version: i32,
    /// Exchange flag.
    pub flag: Flag,
    /// Simulation time in seconds; `None` unless `flag` is `Communicate`.
    pub sim_time: Option<f64>,
    /// Real-valued payload; empty unless `flag` is `Communicate`.
    pub reals: Vec<f64>,
}

impl Packet {
    /// Builds a Communicate packet carrying `reals` at `sim_time`.
    pub fn communicate(sim_time: f64, reals: Vec<f64>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flag: Flag::Communicate,
            sim_time: Some(sim_time),
            reals,
        }
    }

    /// Builds a payload-free packet for a non-Communicate flag.
    ///
    /// Passing `Flag::Communicate` yields an empty Communicate packet at time zero.
    pub fn signal(flag: Flag) -> Self {
        if flag == Flag::Communicate {
            return Self::communicate(0.0, Vec::new());
        }
        Self {
            version: PROTOCOL_VERSION,
            flag,
            sim_time: None,
            reals: Vec::new(),
        }
    }

    /// Serializes the packet into its wire line, including the trailing newline.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parses one wire line.
    ///
    /// # Errors
    ///
    /// - [`CodecError::ProtocolVersion`] if the version exceeds [`PROTOCOL_VERSION`]
    /// - [`CodecError::Malformed`] if a token does not parse as the expected number
    /// - [`CodecError::Truncated`] if fewer tokens are present than the header declares
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| CodecError::malformed(format!("not valid UTF-8: {e}")))?;
        let tokens: Vec<&str> = text.split_ascii_whitespace().collect();

        let version = integer_at(&tokens, 0, "version")?;
        if version > PROTOCOL_VERSION {
            return Err(CodecError::ProtocolVersion { version });
        }
        let code = integer_at(&tokens, 1, "flag")?;
        let flag = Flag::from_code(code)
            .ok_or_else(|| CodecError::malformed(format!("unknown flag {code}")))?;

        // Producers sometimes append stale payload after a terminal flag.
        if flag != Flag::Communicate {
            return Ok(Self {
                version,
                flag,
                sim_time: None,
                reals: Vec::new(),
            });
        }

        let num_real = count_at(&tokens, 2, "numReal")?;
        let num_int = count_at(&tokens, 3, "numInt")?;
        let num_bool = count_at(&tokens, 4, "numBool")?;
        let sim_time = real_at(&tokens, 5, "simulation time")?;

        let expected = num_real
            .checked_add(num_int)
            .and_then(|n| n.checked_add(num_bool))
            .and_then(|n| n.checked_add(HEADER_TOKENS))
            .ok_or_else(|| {
                CodecError::malformed(format!(
                    "declared counts overflow: {num_real} reals, {num_int} ints, {num_bool} bools"
                ))
            })?;
        if tokens.len() < expected {
            return Err(CodecError::Truncated {
                expected,
                found: tokens.len(),
            });
        }

        let reals = (0..num_real)
            .map(|i| real_at(&tokens, HEADER_TOKENS + i, "real value"))
            .collect::<Result<Vec<_>, _>>()?;
        for i in 0..num_int + num_bool {
            integer_at(&tokens, HEADER_TOKENS + num_real + i, "integer/boolean value")?;
        }

        Ok(Self {
            version,
            flag,
            sim_time: Some(sim_time),
            reals,
        })
    }
}

/// Wire form. Every Communicate token is followed by one space.
impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flag != Flag::Communicate {
            return writeln!(f, "{} {}", self.version, self.flag.code());
        }

        write!(
            f,
            "{} {} {} 0 0 {} ",
            self.version,
            self.flag.code(),
            self.reals.len(),
            format_real(self.sim_time.unwrap_or(0.0))
        )?;
        for value in &self.reals {
            write!(f, "{} ", format_real(*value))?;
        }
        writeln!(f)
    }
}

/// Encodes a packet from its parts.
///
/// Reals are dropped for every flag other than `Communicate`.
pub fn encode(flag: Flag, sim_time: f64, reals: &[f64]) -> Vec<u8> {
    let packet = if flag == Flag::Communicate {
        Packet::communicate(sim_time, reals.to_vec())
    } else {
        Packet::signal(flag)
    };
    packet.encode()
}

/// Decodes a packet into `(flag, sim_time, reals)`.
///
/// # Errors
///
/// See [`Packet::decode`].
pub fn decode(bytes: &[u8]) -> Result<(Flag, Option<f64>, Vec<f64>), CodecError> {
    let packet = Packet::decode(bytes)?;
    Ok((packet.flag, packet.sim_time, packet.reals))
}

/// Formats a real in C-style scientific notation with 15 fractional digits
/// and a signed two-digit exponent, e.g. `2.150000000000000e+01`.
fn format_real(value: f64) -> String {
    let raw = format!("{value:.15e}");
    let Some((mantissa, exponent)) = raw.split_once('e') else {
        // NaN and infinities carry no exponent.
        return raw;
    };
    match exponent.parse::<i32>() {
        Ok(exp) => {
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.unsigned_abs())
        }
        Err(_) => raw,
    }
}

fn token_at<'a>(tokens: &[&'a str], index: usize) -> Result<&'a str, CodecError> {
    tokens.get(index).copied().ok_or(CodecError::Truncated {
        expected: index + 1,
        found: tokens.len(),
    })
}

fn integer_at(tokens: &[&str], index: usize, what: &str) -> Result<i32, CodecError> {
    let token = token_at(tokens, index)?;
    token
        .parse::<i32>()
        .map_err(|_| CodecError::malformed(format!("{what} `{token}` is not an integer")))
}

fn count_at(tokens: &[&str], index: usize, what: &str) -> Result<usize, CodecError> {
    let token = token_at(tokens, index)?;
    token.parse::<usize>().map_err(|_| {
        CodecError::malformed(format!("{what} `{token}` is not a non-negative integer"))
    })
}

fn real_at(tokens: &[&str], index: usize, what: &str) -> Result<f64, CodecError> {
    let token = token_at(tokens, index)?;
    token
        .parse::<f64>()
        .map_err(|_| CodecError::malformed(format!("{what} `{token}` is not a number")))
}

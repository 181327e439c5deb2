//! Clock profile parser
//!
//! Reads the small TOML subset a board profile needs:
//!
//! ```toml
//! [clock]
//! source = "pll"
//! frequency = "48MHz"
//! ahb_prescaler = 1
//! apb_prescaler = 1
//! prefetch = true
//!
//! [pll]
//! source = "hse"
//! multiplier = 6
//! prediv = 1
//! ```
//!
//! Supported: `[section]` headers, `key = value` pairs (string, integer,
//! boolean) and `#` comments. Everything else in TOML is not.

use metronome_hal::Hertz;

use super::types::{
    AhbPrescaler, ApbPrescaler, ClockSource, ClockTreeConfig, McoSource, PllConfig, PllMul,
    PllSource, PreDiv,
};

/// Parse error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// Unknown or malformed section header
    InvalidSection,
    /// Key not recognised in its section
    UnknownKey,
    /// Value has the wrong type or is out of range
    InvalidValue,
    /// A required key is absent
    MissingKey(&'static str),
    /// Line is neither a header nor a `key = value` pair
    Syntax,
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParseError::InvalidSection => f.write_str("invalid section header"),
            ParseError::UnknownKey => f.write_str("unknown key"),
            ParseError::InvalidValue => f.write_str("invalid value"),
            ParseError::MissingKey(key) => write!(f, "missing key `{}`", key),
            ParseError::Syntax => f.write_str("syntax error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Root,
    Clock,
    Pll,
}

#[derive(Default)]
struct PllDraft {
    source: Option<PllSource>,
    multiplier: Option<PllMul>,
    prediv: Option<PreDiv>,
}

/// Parse a clock profile into a configuration
///
/// The result is not validated; call
/// [`ClockTreeConfig::validate`] before applying it.
pub fn parse_profile(input: &str) -> Result<ClockTreeConfig, ParseError> {
    let mut config = ClockTreeConfig::default();
    let mut frequency = None;
    let mut pll: Option<PllDraft> = None;
    let mut section = Section::Root;

    for line in input.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') {
            let header = line
                .strip_suffix(']')
                .map(|l| l[1..].trim())
                .ok_or(ParseError::InvalidSection)?;
            section = match header {
                "clock" => Section::Clock,
                "pll" => {
                    pll.get_or_insert_with(PllDraft::default);
                    Section::Pll
                }
                _ => return Err(ParseError::InvalidSection),
            };
            continue;
        }

        let (key, value) = parse_key_value(line).ok_or(ParseError::Syntax)?;
        match section {
            Section::Root => return Err(ParseError::UnknownKey),
            Section::Clock => match key {
                "source" => config.source = parse_clock_source(parse_string(value))?,
                "frequency" => frequency = Some(parse_frequency(value)?),
                "ahb_prescaler" => {
                    config.ahb_prescaler = AhbPrescaler::from_divisor(parse_int(value)?)
                        .ok_or(ParseError::InvalidValue)?
                }
                "apb_prescaler" => {
                    config.apb_prescaler = ApbPrescaler::from_divisor(parse_int(value)?)
                        .ok_or(ParseError::InvalidValue)?
                }
                "prefetch" => config.prefetch = parse_bool(value)?,
                "css" => config.css = parse_bool(value)?,
                "hse_bypass" => config.hse_bypass = parse_bool(value)?,
                "mco" => config.mco = parse_mco(parse_string(value))?,
                _ => return Err(ParseError::UnknownKey),
            },
            Section::Pll => {
                let draft = pll.get_or_insert_with(PllDraft::default);
                match key {
                    "source" => draft.source = Some(parse_pll_source(parse_string(value))?),
                    "multiplier" => {
                        draft.multiplier =
                            Some(PllMul::new(parse_int(value)?).ok_or(ParseError::InvalidValue)?)
                    }
                    "prediv" => {
                        draft.prediv =
                            Some(PreDiv::new(parse_int(value)?).ok_or(ParseError::InvalidValue)?)
                    }
                    _ => return Err(ParseError::UnknownKey),
                }
            }
        }
    }

    config.target_frequency = frequency.ok_or(ParseError::MissingKey("frequency"))?;
    config.pll = match pll {
        Some(draft) => {
            let multiplier = draft.multiplier.ok_or(ParseError::MissingKey("multiplier"))?;
            Some(PllConfig {
                source: draft.source.unwrap_or_default(),
                multiplier,
                prediv: draft.prediv.unwrap_or_default(),
            })
        }
        None => None,
    };

    Ok(config)
}

fn parse_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();

    let value = match value.find('#') {
        Some(hash) if value[..hash].matches('"').count() % 2 == 0 => value[..hash].trim(),
        _ => value,
    };

    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

/// Strip surrounding quotes, unquoted words are accepted as-is
fn parse_string(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_int<T: core::str::FromStr>(value: &str) -> Result<T, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidValue)
}

fn parse_bool(value: &str) -> Result<bool, ParseError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ParseError::InvalidValue),
    }
}

/// Frequency as a bare integer in hertz or a string with a unit suffix
/// ("48MHz", "32 kHz", "8000000Hz")
fn parse_frequency(value: &str) -> Result<Hertz, ParseError> {
    let text = parse_string(value).trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit() && c != '_')
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    if digits.is_empty() {
        return Err(ParseError::InvalidValue);
    }
    let number = digits
        .bytes()
        .filter(|b| *b != b'_')
        .try_fold(0u32, |acc, b| acc.checked_mul(10)?.checked_add(u32::from(b - b'0')))
        .ok_or(ParseError::InvalidValue)?;
    let scale = match unit.trim() {
        "" => 1,
        u if u.eq_ignore_ascii_case("hz") => 1,
        u if u.eq_ignore_ascii_case("khz") => 1_000,
        u if u.eq_ignore_ascii_case("mhz") => 1_000_000,
        _ => return Err(ParseError::InvalidValue),
    };
    number
        .checked_mul(scale)
        .map(Hertz)
        .ok_or(ParseError::InvalidValue)
}

fn parse_clock_source(value: &str) -> Result<ClockSource, ParseError> {
    match value {
        "hsi" => Ok(ClockSource::Hsi),
        "hse" => Ok(ClockSource::Hse),
        "pll" => Ok(ClockSource::Pll),
        "hsi48" => Ok(ClockSource::Hsi48),
        _ => Err(ParseError::InvalidValue),
    }
}

fn parse_pll_source(value: &str) -> Result<PllSource, ParseError> {
    match value {
        "hsi_div2" => Ok(PllSource::HsiDiv2),
        "hsi" => Ok(PllSource::HsiPrediv),
        "hse" => Ok(PllSource::HsePrediv),
        "hsi48" => Ok(PllSource::Hsi48Prediv),
        _ => Err(ParseError::InvalidValue),
    }
}

fn parse_mco(value: &str) -> Result<McoSource, ParseError> {
    match value {
        "off" | "none" => Ok(McoSource::Disabled),
        "hsi14" => Ok(McoSource::Hsi14),
        "lsi" => Ok(McoSource::Lsi),
        "lse" => Ok(McoSource::Lse),
        "sysclk" => Ok(McoSource::Sysclk),
        "hsi" => Ok(McoSource::Hsi),
        "hse" => Ok(McoSource::Hse),
        "pll" => Ok(McoSource::Pll),
        "hsi48" => Ok(McoSource::Hsi48),
        _ => Err(ParseError::InvalidValue),
    }
}

// src/gcode/parser.rs
//
// Tokenizes one line of G-code (§4.1). Grounded on `gcode.c`'s
// `trimSpaces`/`parseValue`/`parseCommand`/`parseCommandParams`: the
// numeric grammar is a hand-rolled integer accumulation, not a call into a
// general float parser, because (per the source's own comment) "a simple
// atof introduces 5kb of new code that i cannot afford". Axis scaling
// (mm -> steps) happens inline during parsing, same as `parseCommandParams`
// taking the axis config and multiplying as it goes.

use crate::config::AxisConfig;
pub use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisParams {
    pub f: Option<i64>,
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub z: Option<i64>,
    pub e: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubParams {
    pub s: Option<i64>,
    pub i: Option<i64>,
    pub r: Option<i64>,
    pub p: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedLine {
    Motion { index: u32, params: AxisParams },
    Sub { index: u32, params: SubParams },
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            bytes: line.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    /// Unsigned digit run, used for the command index (`G1`, `M104`, ...).
    /// Returns `None` if no digit is present.
    fn parse_uint(&mut self) -> Option<u32> {
        let mut any = false;
        let mut result: u32 = 0;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                result = result.saturating_mul(10).saturating_add((b - b'0') as u32);
                any = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        any.then_some(result)
    }

    /// Hand-rolled signed decimal literal, scaled by `multiplier` as it
    /// accumulates: optional sign, integer run, optional `.` then
    /// fractional run. No exponent. Rounds toward zero.
    fn parse_value(&mut self, multiplier: i64) -> Option<i64> {
        let negative = match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                true
            }
            Some(b'+') => {
                self.pos += 1;
                false
            }
            _ => false,
        };

        let mut integer_part: i64 = 0;
        let mut any_digit = false;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                integer_part = integer_part * 10 + (b - b'0') as i64;
                any_digit = true;
                self.pos += 1;
            } else {
                break;
            }
        }

        let mut frac_value: i64 = 0;
        let mut frac_digits: u32 = 0;
        if self.peek() == Some(b'.') {
            self.pos += 1;
            while let Some(b) = self.peek() {
                if b.is_ascii_digit() {
                    frac_value = frac_value * 10 + (b - b'0') as i64;
                    frac_digits += 1;
                    any_digit = true;
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }

        if !any_digit {
            return None;
        }

        // Fractional contribution, scaled then rounded toward zero.
        let frac_contribution = if frac_digits > 0 {
            (frac_value * multiplier) / 10i64.pow(frac_digits)
        } else {
            0
        };
        let magnitude = integer_part * multiplier + frac_contribution;
        Some(if negative { -magnitude } else { magnitude })
    }
}

fn parse_axis_params(cursor: &mut Cursor<'_>, axis: &AxisConfig) -> Result<AxisParams, ParseError> {
    let mut params = AxisParams::default();
    loop {
        cursor.skip_spaces();
        match cursor.peek() {
            None => break,
            Some(b';') => break,
            Some(letter) => {
                cursor.advance();
                let multiplier = match letter {
                    b'F' | b'f' => 1,
                    b'X' | b'x' => axis.x_steps_per_mm as i64,
                    b'Y' | b'y' => axis.y_steps_per_mm as i64,
                    b'Z' | b'z' => axis.z_steps_per_mm as i64,
                    b'E' | b'e' => axis.e_steps_per_mm as i64,
                    _ => return Err(ParseError::UnknownParameter),
                };
                let value = cursor.parse_value(multiplier).ok_or(ParseError::UnknownParameter)?;
                match letter {
                    b'F' | b'f' => params.f = Some(value),
                    b'X' | b'x' => params.x = Some(value),
                    b'Y' | b'y' => params.y = Some(value),
                    b'Z' | b'z' => params.z = Some(value),
                    b'E' | b'e' => params.e = Some(value),
                    _ => unreachable!(),
                }
            }
        }
    }
    Ok(params)
}

fn parse_sub_params(cursor: &mut Cursor<'_>) -> Result<SubParams, ParseError> {
    let mut params = SubParams::default();
    loop {
        cursor.skip_spaces();
        match cursor.peek() {
            None => break,
            Some(b';') => break,
            Some(letter) => {
                cursor.advance();
                let value = cursor.parse_value(1).ok_or(ParseError::UnknownParameter)?;
                match letter {
                    b'S' | b's' => params.s = Some(value),
                    b'I' | b'i' => params.i = Some(value),
                    b'R' | b'r' => params.r = Some(value),
                    b'P' | b'p' => params.p = Some(value),
                    _ => return Err(ParseError::UnknownParameter),
                }
            }
        }
    }
    Ok(params)
}

/// Parse one line, already stripped of its trailing LF. Leading CR and
/// space are tolerated.
pub fn parse_line(line: &str, axis: &AxisConfig) -> Result<ParsedLine, ParseError> {
    let mut cursor = Cursor::new(line.trim_end_matches('\r'));
    cursor.skip_spaces();
    match cursor.peek() {
        None | Some(b';') => Err(ParseError::NoCommand),
        Some(b'G') | Some(b'g') => {
            cursor.advance();
            let index = cursor.parse_uint().ok_or(ParseError::UnknownCommand)?;
            let params = parse_axis_params(&mut cursor, axis)?;
            Ok(ParsedLine::Motion { index, params })
        }
        Some(b'M') | Some(b'm') => {
            cursor.advance();
            let index = cursor.parse_uint().ok_or(ParseError::UnknownCommand)?;
            let params = parse_sub_params(&mut cursor)?;
            Ok(ParsedLine::Sub { index, params })
        }
        _ => Err(ParseError::UnknownCommand),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis() -> AxisConfig {
        AxisConfig {
            x_steps_per_mm: 100,
            y_steps_per_mm: 100,
            z_steps_per_mm: 400,
            e_steps_per_mm: 104,
        }
    }

    #[test]
    fn parses_move_with_all_axes_scaled() {
        let parsed = parse_line("G1 X30 Y-10 Z0.5 E1 F1800", &axis()).unwrap();
        assert_eq!(
            parsed,
            ParsedLine::Motion {
                index: 1,
                params: AxisParams {
                    f: Some(1800),
                    x: Some(3000),
                    y: Some(-1000),
                    z: Some(200),
                    e: Some(104),
                },
            }
        );
    }

    #[test]
    fn comment_only_line_is_no_command() {
        assert_eq!(parse_line("  ; a comment", &axis()).unwrap_err(), ParseError::NoCommand);
        assert_eq!(parse_line("", &axis()).unwrap_err(), ParseError::NoCommand);
    }

    #[test]
    fn trailing_comment_terminates_parameter_scan() {
        let parsed = parse_line("G1 X10 ; move over", &axis()).unwrap();
        assert_eq!(
            parsed,
            ParsedLine::Motion {
                index: 1,
                params: AxisParams {
                    x: Some(1000),
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn unknown_parameter_letter_is_rejected() {
        assert_eq!(parse_line("G1 Q5", &axis()).unwrap_err(), ParseError::UnknownParameter);
    }

    #[test]
    fn unknown_command_letter_is_rejected() {
        assert_eq!(parse_line("T0", &axis()).unwrap_err(), ParseError::UnknownCommand);
    }

    #[test]
    fn subcommand_parses_s_parameter_unscaled() {
        let parsed = parse_line("M104 S210", &axis()).unwrap();
        assert_eq!(
            parsed,
            ParsedLine::Sub {
                index: 104,
                params: SubParams {
                    s: Some(210),
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn negative_fractional_rounds_toward_zero() {
        let parsed = parse_line("G1 X-1.9", &axis()).unwrap();
        assert_eq!(
            parsed,
            ParsedLine::Motion {
                index: 1,
                params: AxisParams {
                    x: Some(-190),
                    ..Default::default()
                },
            }
        );
    }
}

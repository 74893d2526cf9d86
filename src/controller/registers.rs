use crate::{
    frame::MAX_ADDRESS,
    settings::DeviceRole,
    };
use super::Error;


/// capacity of the text register
pub const ALPHA_SIZE: usize = 44;
/// longest text a loop read delivers to the text register
pub const ALPHA_RESULT: usize = 43;

/// calculator text register
pub type Alpha = heapless::Vec<u8, ALPHA_SIZE>;

/// content of the top of stack register
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Real(f64),
    Text(Alpha),
}
impl Default for Value {
    fn default() -> Self  {Self::Real(0.)}
}

/// calculator flags read or written by loop operations
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CalcFlags {
    /// print every result
    pub trace_print: bool,
    /// print entered values
    pub normal_print: bool,
    /// printing enabled
    pub printer_exists: bool,
    pub lowercase_print: bool,
    pub double_wide_print: bool,
    /// the last alpha read stopped without finding its terminator
    pub input_error: bool,
    /// the last char-or-CRLF read stopped on CRLF
    pub input_eol: bool,
}

/**
    calculator registers shared with the interpreter

    commands take their operand from `x` or `alpha` and deliver their result the same way
*/
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Registers {
    pub x: Value,
    pub alpha: Alpha,
    pub flags: CalcFlags,
}

impl Registers {
    /// replace the text register, truncating to its capacity
    pub fn set_alpha(&mut self, text: &[u8]) {
        self.alpha.clear();
        let size = text.len().min(ALPHA_SIZE);
        // cannot fail, size is bounded by capacity
        let _ = self.alpha.extend_from_slice(&text[.. size]);
    }
    /// put a numeric result on top of stack
    pub fn recall(&mut self, value: f64) {
        self.x = Value::Real(value);
    }

    fn real(&self) -> Result<f64, Error> {
        match self.x {
            Value::Real(x) if x.is_nan() => Err(Error::InvalidData),
            Value::Real(x) => Ok(x),
            Value::Text(_) => Err(Error::InvalidType),
        }
    }
    /// integer in `0 ..= max` from x
    pub fn integer(&self, max: u16) -> Result<u16, Error> {
        let x = self.real()?;
        if x < 0. || x > f64::from(max)
            {return Err(Error::InvalidData)}
        Ok(x as u16)
    }
    /// loop address from x
    pub fn address(&self) -> Result<u8, Error> {
        Ok(self.integer(u16::from(MAX_ADDRESS))? as u8)
    }
    /// device role from x, -1 disables the role and 0 restores the default
    pub fn device_role(&self) -> Result<DeviceRole, Error> {
        let x = self.real()?;
        if x < -1. || x > f64::from(MAX_ADDRESS)
            {return Err(Error::InvalidData)}
        DeviceRole::from_code(x as i32).ok_or(Error::InvalidData)
    }
    /// single character from x, either a character code or the first character of a string
    pub fn character(&self) -> Result<u8, Error> {
        match &self.x {
            Value::Real(x) => {
                let x = if *x < 0. {-*x} else {*x};
                if x.is_nan() || x > 255.
                    {return Err(Error::InvalidData)}
                Ok(x as u8)
            },
            Value::Text(text) => text.first().copied().ok_or(Error::InvalidData),
        }
    }
}

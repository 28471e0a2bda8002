//! Format mini-language shared by the packer and the unpacker
//!
//! A format is an optional byte-order character followed by items of the
//! form `[count]code`:
//!
//! | code | meaning        | code | meaning  |
//! |------|----------------|------|----------|
//! | `x`  | pad byte       | `h`  | i16      |
//! | `c`  | char (u8)      | `H`  | u16      |
//! | `b`  | i8             | `i`  | i32      |
//! | `B`  | u8             | `I`  | u32      |
//! | `?`  | bool           | `q`  | i64      |
//! | `f`  | f32            | `Q`  | u64      |
//! | `d`  | f64            | `a`  | align    |
//!
//! `4a` pads to the next multiple of 4 measured from the start of the
//! region being read or written. Byte order characters: `=` keeps the
//! cursor's order, `<` little-endian, `>` and `!` big-endian.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::codec::{WireError, WireResult};

/// Byte order of multi-byte fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    /// The byte used in the connection setup to announce this order
    pub fn setup_byte(self) -> u8 {
        match self {
            ByteOrder::Little => b'l',
            ByteOrder::Big => b'B',
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOrder::Little => write!(f, "little-endian"),
            ByteOrder::Big => write!(f, "big-endian"),
        }
    }
}

/// Element type of a format item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Pad,
    Char,
    I8,
    U8,
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl Code {
    fn from_symbol(c: char) -> Option<Self> {
        let code = match c {
            'x' => Code::Pad,
            'c' => Code::Char,
            'b' => Code::I8,
            'B' => Code::U8,
            '?' => Code::Bool,
            'h' => Code::I16,
            'H' => Code::U16,
            'i' => Code::I32,
            'I' => Code::U32,
            'q' => Code::I64,
            'Q' => Code::U64,
            'f' => Code::F32,
            'd' => Code::F64,
            _ => return None,
        };
        Some(code)
    }

    /// The format character for this code
    pub fn symbol(self) -> char {
        match self {
            Code::Pad => 'x',
            Code::Char => 'c',
            Code::I8 => 'b',
            Code::U8 => 'B',
            Code::Bool => '?',
            Code::I16 => 'h',
            Code::U16 => 'H',
            Code::I32 => 'i',
            Code::U32 => 'I',
            Code::I64 => 'q',
            Code::U64 => 'Q',
            Code::F32 => 'f',
            Code::F64 => 'd',
        }
    }

    /// Encoded size of one element in bytes
    pub fn size(self) -> usize {
        match self {
            Code::Pad | Code::Char | Code::I8 | Code::U8 | Code::Bool => 1,
            Code::I16 | Code::U16 => 2,
            Code::I32 | Code::U32 | Code::F32 => 4,
            Code::I64 | Code::U64 | Code::F64 => 8,
        }
    }
}

/// One parsed format item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Item {
    /// `count` consecutive elements of `code` (pad bytes yield no values)
    Field { code: Code, count: usize },
    /// Pad up to the next multiple of the given alignment
    Align(usize),
}

/// A parsed format description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    order: Option<ByteOrder>,
    items: Vec<Item>,
}

impl Format {
    /// Parse a format string
    pub fn parse(text: &str) -> WireResult<Self> {
        let mut chars = text.chars().filter(|c| !c.is_whitespace()).peekable();

        let order = match chars.peek() {
            Some('=') => {
                chars.next();
                None
            }
            Some('<') => {
                chars.next();
                Some(ByteOrder::Little)
            }
            Some('>') | Some('!') => {
                chars.next();
                Some(ByteOrder::Big)
            }
            _ => None,
        };

        let mut items = Vec::new();
        let mut count: Option<usize> = None;

        for c in chars {
            if let Some(digit) = c.to_digit(10) {
                let current = count.unwrap_or(0);
                count = Some(
                    current
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(digit as usize))
                        .ok_or_else(|| WireError::Format(format!("repeat count overflow in {:?}", text)))?,
                );
                continue;
            }

            let repeat = count.take().unwrap_or(1);

            if c == 'a' {
                if repeat == 0 {
                    return Err(WireError::Format(format!("zero alignment in {:?}", text)));
                }
                items.push(Item::Align(repeat));
                continue;
            }

            let code = Code::from_symbol(c)
                .ok_or_else(|| WireError::Format(format!("unknown format code {:?} in {:?}", c, text)))?;

            // Zero-count items are legal and consume nothing.
            if repeat > 0 {
                items.push(Item::Field { code, count: repeat });
            }
        }

        if count.is_some() {
            return Err(WireError::Format(format!("dangling repeat count in {:?}", text)));
        }

        Ok(Self { order, items })
    }

    /// A format of `count` consecutive elements of `code`, used for bulk lists
    pub fn repeat(code: Code, count: usize) -> Self {
        let items = if count == 0 {
            Vec::new()
        } else {
            vec![Item::Field { code, count }]
        };
        Self { order: None, items }
    }

    /// Force a byte order on this format
    pub fn with_order(mut self, order: ByteOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Explicit byte order, if the format carries one
    pub fn order(&self) -> Option<ByteOrder> {
        self.order
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Number of values this format produces when unpacking
    pub fn value_count(&self) -> usize {
        self.items
            .iter()
            .map(|item| match item {
                Item::Field { code: Code::Pad, .. } | Item::Align(_) => 0,
                Item::Field { count, .. } => *count,
            })
            .sum()
    }

    /// Bytes consumed when the format starts `start` bytes into its region
    pub fn size_at(&self, start: usize) -> usize {
        let mut pos = start;
        for item in &self.items {
            match item {
                Item::Field { code, count } => pos += code.size() * count,
                Item::Align(align) => pos += super::align_pad(pos, *align),
            }
        }
        pos - start
    }

    /// Bytes consumed when the format starts at an aligned position
    pub fn size(&self) -> usize {
        self.size_at(0)
    }
}

impl FromStr for Format {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.order {
            None => write!(f, "=")?,
            Some(ByteOrder::Little) => write!(f, "<")?,
            Some(ByteOrder::Big) => write!(f, ">")?,
        }
        for item in &self.items {
            match item {
                Item::Field { code, count: 1 } => write!(f, "{}", code.symbol())?,
                Item::Field { code, count } => write!(f, "{}{}", count, code.symbol())?,
                Item::Align(align) => write!(f, "{}a", align)?,
            }
        }
        Ok(())
    }
}

/// A scalar produced by unpacking or consumed by packing
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Char(u8),
    I8(i8),
    U8(u8),
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Value {
    /// The format code this value was produced by
    pub fn code(&self) -> Code {
        match self {
            Value::Char(_) => Code::Char,
            Value::I8(_) => Code::I8,
            Value::U8(_) => Code::U8,
            Value::Bool(_) => Code::Bool,
            Value::I16(_) => Code::I16,
            Value::U16(_) => Code::U16,
            Value::I32(_) => Code::I32,
            Value::U32(_) => Code::U32,
            Value::I64(_) => Code::I64,
            Value::U64(_) => Code::U64,
            Value::F32(_) => Code::F32,
            Value::F64(_) => Code::F64,
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match *self {
            Value::Char(v) | Value::U8(v) => Some(v as i128),
            Value::I8(v) => Some(v as i128),
            Value::Bool(v) => Some(v as i128),
            Value::I16(v) => Some(v as i128),
            Value::U16(v) => Some(v as i128),
            Value::I32(v) => Some(v as i128),
            Value::U32(v) => Some(v as i128),
            Value::I64(v) => Some(v as i128),
            Value::U64(v) => Some(v as i128),
            Value::F32(_) | Value::F64(_) => None,
        }
    }

    /// Integer value widened to u64, if it is a non-negative integer
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|v| u64::try_from(v).ok())
    }

    /// Integer value widened to i64, if it fits
    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    /// Floating point view of any numeric value
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    /// Convert this value so it can be written with `code`
    ///
    /// Integers convert between widths when the value fits; floats only
    /// convert to floats.
    pub fn coerce(self, code: Code) -> WireResult<Value> {
        let mismatch = || WireError::Format(format!("value {:?} does not fit format code '{}'", self, code.symbol()));

        let int = |v: Value| v.as_i128().ok_or_else(mismatch);

        let value = match code {
            Code::Pad => return Err(mismatch()),
            Code::Char => Value::Char(u8::try_from(int(self)?).map_err(|_| mismatch())?),
            Code::U8 => Value::U8(u8::try_from(int(self)?).map_err(|_| mismatch())?),
            Code::I8 => Value::I8(i8::try_from(int(self)?).map_err(|_| mismatch())?),
            Code::Bool => match self {
                Value::Bool(v) => Value::Bool(v),
                other => match int(other)? {
                    0 => Value::Bool(false),
                    1 => Value::Bool(true),
                    _ => return Err(mismatch()),
                },
            },
            Code::I16 => Value::I16(i16::try_from(int(self)?).map_err(|_| mismatch())?),
            Code::U16 => Value::U16(u16::try_from(int(self)?).map_err(|_| mismatch())?),
            Code::I32 => Value::I32(i32::try_from(int(self)?).map_err(|_| mismatch())?),
            Code::U32 => Value::U32(u32::try_from(int(self)?).map_err(|_| mismatch())?),
            Code::I64 => Value::I64(i64::try_from(int(self)?).map_err(|_| mismatch())?),
            Code::U64 => Value::U64(u64::try_from(int(self)?).map_err(|_| mismatch())?),
            Code::F32 => match self {
                Value::F32(v) => Value::F32(v),
                Value::F64(v) => Value::F32(v as f32),
                _ => return Err(mismatch()),
            },
            Code::F64 => match self {
                Value::F32(v) => Value::F64(v as f64),
                Value::F64(v) => Value::F64(v),
                _ => return Err(mismatch()),
            },
        };
        Ok(value)
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    i8 => I8,
    u8 => U8,
    bool => Bool,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

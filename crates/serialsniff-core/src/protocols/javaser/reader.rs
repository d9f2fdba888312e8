use super::error::JavaSerError;

/// Big-endian cursor over a serialization stream.
///
/// All reads are bounds-checked and advance the cursor; `position` is the
/// number of bytes consumed so far.
pub struct JavaSerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> JavaSerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn require(&self, count: usize) -> Result<(), JavaSerError> {
        let needed = self.pos.saturating_add(count);
        if needed > self.data.len() {
            return Err(JavaSerError::TooShort {
                needed,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn peek_u8(&self) -> Result<u8, JavaSerError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(JavaSerError::TooShort {
                needed: self.pos + 1,
                actual: self.data.len(),
            })
    }

    pub fn read_u8(&mut self) -> Result<u8, JavaSerError> {
        let value = self.peek_u8()?;
        self.pos += 1;
        Ok(value)
    }

    pub fn read_slice(&mut self, count: usize) -> Result<&'a [u8], JavaSerError> {
        self.require(count)?;
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), JavaSerError> {
        self.read_slice(count).map(|_| ())
    }

    pub fn read_u16(&mut self) -> Result<u16, JavaSerError> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, JavaSerError> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, JavaSerError> {
        self.read_u32().map(|value| value as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64, JavaSerError> {
        let bytes = self.read_slice(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    /// Read a modified-UTF-8 string with a 16-bit length prefix.
    pub fn read_utf(&mut self) -> Result<String, JavaSerError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_slice(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read a modified-UTF-8 string with a 64-bit length prefix.
    pub fn read_long_utf(&mut self) -> Result<String, JavaSerError> {
        let len = self.read_u64()?;
        let len = usize::try_from(len).map_err(|_| JavaSerError::InvalidLength {
            length: i64::try_from(len).unwrap_or(i64::MAX),
            context: "long string",
        })?;
        let bytes = self.read_slice(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

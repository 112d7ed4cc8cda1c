use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("buffer overflow: {requested} bytes at offset {index} exceeds limit {limit}")]
    Overflow {
        index: usize,
        requested: usize,
        limit: usize,
    },
}

/// Fixed-capacity byte cursor used to encode and decode the wire format.
///
/// Writes past the capacity and reads past the written length fail with
/// [`BufferError::Overflow`] and leave the cursor untouched. All multi-byte
/// values are little-endian; floats are copied by bit pattern.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    len: usize,
    index: usize,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            len: 0,
            index: 0,
        }
    }

    /// Creates a buffer ready to be read from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            len: bytes.len(),
            index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn access_index(&self) -> usize {
        self.index
    }

    pub fn remaining(&self) -> usize {
        self.len.saturating_sub(self.index)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.index = 0;
    }

    pub fn reset_access_index(&mut self) {
        self.index = 0;
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), BufferError> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), BufferError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), BufferError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), BufferError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), BufferError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<(), BufferError> {
        self.write_u32(value.to_bits())
    }

    pub fn write_vec3(&mut self, value: Vec3) -> Result<(), BufferError> {
        self.check_write(12)?;
        self.write_f32(value.x)?;
        self.write_f32(value.y)?;
        self.write_f32(value.z)
    }

    pub fn write_data(&mut self, data: &[u8]) -> Result<(), BufferError> {
        self.write_bytes(data)
    }

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        let [value] = self.read_array::<1>()?;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64, BufferError> {
        self.read_array().map(u64::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32, BufferError> {
        self.read_array().map(i32::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32, BufferError> {
        self.read_u32().map(f32::from_bits)
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, BufferError> {
        self.check_read(12)?;
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_data(&mut self, size: usize) -> Result<&[u8], BufferError> {
        self.check_read(size)?;
        let start = self.index;
        self.index += size;
        Ok(&self.data[start..self.index])
    }

    fn check_write(&self, size: usize) -> Result<(), BufferError> {
        if self.index + size > self.data.len() {
            return Err(BufferError::Overflow {
                index: self.index,
                requested: size,
                limit: self.data.len(),
            });
        }
        Ok(())
    }

    fn check_read(&self, size: usize) -> Result<(), BufferError> {
        if self.index + size > self.len {
            return Err(BufferError::Overflow {
                index: self.index,
                requested: size,
                limit: self.len,
            });
        }
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.check_write(bytes.len())?;
        let end = self.index + bytes.len();
        self.data[self.index..end].copy_from_slice(bytes);
        self.index = end;
        self.len = self.len.max(end);
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        self.check_read(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.index..self.index + N]);
        self.index += N;
        Ok(out)
    }
}

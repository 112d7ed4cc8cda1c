use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputFlags: u8 {
        const SPRINT = 1 << 0;
    }
}

/// One tick of player input as carried in an Inputs message:
/// `[u32 sequence][i8 x][i8 y][i8 z][u8 flags]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AvatarInput {
    pub sequence: u32,
    pub move_direction: [f32; 3],
    pub flags: InputFlags,
}

impl AvatarInput {
    pub const ENCODED_SIZE: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(Self::ENCODED_SIZE);
        data.extend_from_slice(&self.sequence.to_le_bytes());
        for axis in self.move_direction {
            data.push((axis.clamp(-1.0, 1.0) * 127.0).round() as i8 as u8);
        }
        data.push(self.flags.bits());
        data
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let data: &[u8; Self::ENCODED_SIZE] = data.try_into().ok()?;
        let sequence = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let axis = |byte: u8| f32::from(byte as i8) / 127.0;
        Some(Self {
            sequence,
            move_direction: [axis(data[4]), axis(data[5]), axis(data[6])],
            flags: InputFlags::from_bits_truncate(data[7]),
        })
    }
}

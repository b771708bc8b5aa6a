//! R/C uplink command record.

use crate::CodecError;

pub const RC_COMMAND_LEN: usize = 8;

/// Ground-station drive command, sent every control cycle. Both axes
/// are normalized to [-1.0, 1.0].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RcCommand {
    pub speed: f32,
    pub steering: f32,
}

impl RcCommand {
    pub fn encode(&self) -> [u8; RC_COMMAND_LEN] {
        let mut buf = [0u8; RC_COMMAND_LEN];
        buf[..4].copy_from_slice(&self.speed.to_le_bytes());
        buf[4..].copy_from_slice(&self.steering.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < RC_COMMAND_LEN {
            return Err(CodecError::ShortRecord {
                got: data.len(),
                need: RC_COMMAND_LEN,
            });
        }
        Ok(Self {
            speed: f32::from_le_bytes(data[..4].try_into().expect("length checked")),
            steering: f32::from_le_bytes(data[4..8].try_into().expect("length checked")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let cmd = RcCommand {
            speed: 0.75,
            steering: -0.5,
        };
        assert_eq!(RcCommand::decode(&cmd.encode()).unwrap(), cmd);
    }

    #[test]
    fn short_input_rejected() {
        assert!(RcCommand::decode(&[0u8; 7]).is_err());
    }
}

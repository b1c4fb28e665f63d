//! Operation codes

use std::fmt;

/// Remote operation identifiers carried as the first field of every line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Handshake; answers with the largest storable value size
    Init = 0,
    Set = 1,
    Get = 2,
    /// Keys carrying a tag. Answered with code 4.
    GetTagKeys = 3,
    Remove = 5,
    /// Set-if-absent
    Add = 6,
    GetVersioned = 15,
    SetVersioned = 16,
    /// Streamed multi-key get, terminated by `END`
    GetMulti = 22,
    /// Streamed key/value scan by tag, terminated by `END`
    GetPairsByTag = 23,
    MasterNodeVersion = 999,
}

impl Opcode {
    /// Code written at the start of a request
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Code the server echoes at the start of the response
    pub const fn reply_code(self) -> u16 {
        match self {
            Self::GetTagKeys => 4,
            other => other.code(),
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        let opcode = match code {
            0 => Self::Init,
            1 => Self::Set,
            2 => Self::Get,
            3 => Self::GetTagKeys,
            5 => Self::Remove,
            6 => Self::Add,
            15 => Self::GetVersioned,
            16 => Self::SetVersioned,
            22 => Self::GetMulti,
            23 => Self::GetPairsByTag,
            999 => Self::MasterNodeVersion,
            _ => return None,
        };
        Some(opcode)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Set => "set",
            Self::Get => "get",
            Self::GetTagKeys => "get_tag_keys",
            Self::Remove => "remove",
            Self::Add => "add",
            Self::GetVersioned => "get_versioned",
            Self::SetVersioned => "set_versioned",
            Self::GetMulti => "get_multi",
            Self::GetPairsByTag => "get_pairs_by_tag",
            Self::MasterNodeVersion => "master_node_version",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for code in 0..=1000u16 {
            if let Some(opcode) = Opcode::from_code(code) {
                assert_eq!(opcode.code(), code);
            }
        }
        assert_eq!(Opcode::from_code(4), None);
    }

    #[test]
    fn test_tag_keys_reply_code() {
        assert_eq!(Opcode::GetTagKeys.code(), 3);
        assert_eq!(Opcode::GetTagKeys.reply_code(), 4);
        assert_eq!(Opcode::Get.reply_code(), 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(Opcode::MasterNodeVersion.to_string(), "master_node_version(999)");
    }
}

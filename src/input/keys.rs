//! Key names and virtual-key codes

use std::fmt;
use std::str::FromStr;

/// A keyboard key, left and right modifiers folded together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Ctrl,
    Shift,
    Alt,
    Space,
    Enter,
    Escape,
    Tab,
    /// `0`-`9` on the main row
    Digit(u8),
    /// `A`-`Z`, stored uppercase
    Letter(char),
    /// `F1`-`F12`
    Function(u8),
    /// Any other virtual-key code
    Other(u32),
}

impl Key {
    /// Map a Win32 virtual-key code
    pub fn from_vk(vk: u32) -> Key {
        match vk {
            0x11 | 0xA2 | 0xA3 => Key::Ctrl,
            0x10 | 0xA0 | 0xA1 => Key::Shift,
            0x12 | 0xA4 | 0xA5 => Key::Alt,
            0x20 => Key::Space,
            0x0D => Key::Enter,
            0x1B => Key::Escape,
            0x09 => Key::Tab,
            0x30..=0x39 => Key::Digit((vk - 0x30) as u8),
            0x41..=0x5A => Key::Letter(char::from(vk as u8)),
            0x70..=0x7B => Key::Function((vk - 0x70 + 1) as u8),
            other => Key::Other(other),
        }
    }

    /// Win32 virtual-key code used when synthesizing this key
    pub fn vk(&self) -> u16 {
        match *self {
            Key::Ctrl => 0x11,
            Key::Shift => 0x10,
            Key::Alt => 0x12,
            Key::Space => 0x20,
            Key::Enter => 0x0D,
            Key::Escape => 0x1B,
            Key::Tab => 0x09,
            Key::Digit(d) => 0x30 + d as u16,
            Key::Letter(c) => c as u16,
            Key::Function(n) => 0x70 + n as u16 - 1,
            Key::Other(vk) => vk as u16,
        }
    }

    pub fn is_ctrl(&self) -> bool {
        matches!(self, Key::Ctrl)
    }

    /// Flask and skill keys usable in a wheel sequence
    pub fn is_sequence_key(&self) -> bool {
        matches!(self, Key::Digit(1..=4) | Key::Letter('Q' | 'W' | 'E' | 'R'))
    }
}

impl FromStr for Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let key = match upper.as_str() {
            "CTRL" | "CONTROL" | "LCTRL" | "RCTRL" => Key::Ctrl,
            "SHIFT" | "LSHIFT" | "RSHIFT" => Key::Shift,
            "ALT" | "LALT" | "RALT" | "MENU" => Key::Alt,
            "SPACE" => Key::Space,
            "ENTER" | "RETURN" => Key::Enter,
            "ESC" | "ESCAPE" => Key::Escape,
            "TAB" => Key::Tab,
            _ => {
                let mut chars = upper.chars();
                match (chars.next(), chars.next()) {
                    (Some(c @ '0'..='9'), None) => Key::Digit(c as u8 - b'0'),
                    (Some(c @ 'A'..='Z'), None) => Key::Letter(c),
                    (Some('F'), Some(_)) => match upper[1..].parse::<u8>() {
                        Ok(n @ 1..=12) => Key::Function(n),
                        _ => return Err(format!("Unknown key: {}", s)),
                    },
                    _ => return Err(format!("Unknown key: {}", s)),
                }
            }
        };
        Ok(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Ctrl => write!(f, "CTRL"),
            Key::Shift => write!(f, "SHIFT"),
            Key::Alt => write!(f, "ALT"),
            Key::Space => write!(f, "SPACE"),
            Key::Enter => write!(f, "ENTER"),
            Key::Escape => write!(f, "ESC"),
            Key::Tab => write!(f, "TAB"),
            Key::Digit(d) => write!(f, "{}", d),
            Key::Letter(c) => write!(f, "{}", c),
            Key::Function(n) => write!(f, "F{}", n),
            Key::Other(vk) => write!(f, "VK_{:02X}", vk),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("ctrl".parse::<Key>().unwrap(), Key::Ctrl);
        assert_eq!("3".parse::<Key>().unwrap(), Key::Digit(3));
        assert_eq!("q".parse::<Key>().unwrap(), Key::Letter('Q'));
        assert_eq!("F11".parse::<Key>().unwrap(), Key::Function(11));
        assert!("F13".parse::<Key>().is_err());
        assert!("FOO".parse::<Key>().is_err());
        assert!("".parse::<Key>().is_err());
    }

    #[test]
    fn test_vk_mapping() {
        assert_eq!(Key::from_vk(0xA2), Key::Ctrl);
        assert_eq!(Key::from_vk(0xA3), Key::Ctrl);
        assert_eq!(Key::from_vk(0x31), Key::Digit(1));
        assert_eq!(Key::from_vk(0x51), Key::Letter('Q'));
        assert_eq!(Key::from_vk(0x70), Key::Function(1));
        for key in [Key::Digit(4), Key::Letter('W'), Key::Function(12), Key::Space] {
            assert_eq!(Key::from_vk(key.vk() as u32), key);
        }
    }

    #[test]
    fn test_display_parses_back() {
        for key in [Key::Ctrl, Key::Digit(0), Key::Letter('E'), Key::Function(5), Key::Escape] {
            assert_eq!(key.to_string().parse::<Key>().unwrap(), key);
        }
    }

    #[test]
    fn test_sequence_keys() {
        assert!(Key::Digit(1).is_sequence_key());
        assert!(Key::Letter('R').is_sequence_key());
        assert!(!Key::Digit(5).is_sequence_key());
        assert!(!Key::Letter('T').is_sequence_key());
    }
}

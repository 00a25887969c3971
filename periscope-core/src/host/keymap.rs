//! Virtual key code to logical key name mapping.
//!
//! The wire carries platform-ish virtual key codes; the injection
//! backend wants logical names ("a", "enter", "f5"). Codes outside
//! the table that are printable ASCII fall back to their lowercase
//! character; anything else is unmappable and gets dropped upstream.

/// Resolve a virtual key code to the logical key name used by
/// injection backends. Returns `None` for unmappable codes.
pub fn key_name(code: i32) -> Option<String> {
    if let Some(name) = fixed_name(code) {
        return Some(name.to_string());
    }
    match code {
        // F1..F12
        112..=123 => Some(format!("f{}", code - 111)),
        // Digit row
        48..=57 => Some(((code as u8) as char).to_string()),
        // Letters arrive uppercase on the wire
        65..=90 => Some(((code as u8 + 32) as char).to_string()),
        // Numpad digits
        96..=105 => Some(format!("num{}", code - 96)),
        // Printable ASCII fallback
        32..=126 => Some(((code as u8) as char).to_ascii_lowercase().to_string()),
        _ => None,
    }
}

fn fixed_name(code: i32) -> Option<&'static str> {
    Some(match code {
        8 => "backspace",
        9 => "tab",
        13 => "enter",
        16 => "shift",
        17 => "ctrl",
        18 => "alt",
        19 => "pause",
        20 => "capslock",
        27 => "esc",
        32 => "space",
        33 => "pageup",
        34 => "pagedown",
        35 => "end",
        36 => "home",
        37 => "left",
        38 => "up",
        39 => "right",
        40 => "down",
        44 => "printscreen",
        45 => "insert",
        46 => "delete",
        91 => "win",
        92 => "win",
        93 => "menu",
        144 => "numlock",
        145 => "scrolllock",
        186 => ";",
        187 => "=",
        188 => ",",
        189 => "-",
        190 => ".",
        191 => "/",
        192 => "`",
        219 => "[",
        220 => "\\",
        221 => "]",
        222 => "'",
        _ => return None,
    })
}

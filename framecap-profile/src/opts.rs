//! Typed option parsing, one function per ini value shape. Mirrors
//! `proc_profile_opts.cpp`'s `opt_atoi_in_range`/`opt_atof_in_range`/
//! `opt_str_in_list_or`/`opt_map_str_in_list_or`/`opt_make_vec2_or`/
//! `opt_make_color_or`: a missing or malformed value is logged and replaced
//! by the caller-supplied default rather than failing the whole profile.

use std::str::FromStr;

pub fn int_in_range(key: &str, raw: Option<&str>, min: i64, max: i64, default: i64) -> i64 {
    let Some(raw) = raw else { return default };

    match raw.trim().parse::<i64>() {
        Ok(v) if v >= min && v <= max => v,
        Ok(v) => {
            let clamped = v.clamp(min, max);
            log::warn!(
                "profile option {key} out of range (min {min}, max {max}, value {v}), setting to {clamped}"
            );
            clamped
        }
        Err(_) => {
            log::warn!("profile option {key} has invalid value {raw:?}, setting to {default}");
            default
        }
    }
}

pub fn float_in_range(key: &str, raw: Option<&str>, min: f32, max: f32, default: f32) -> f32 {
    let Some(raw) = raw else { return default };

    match raw.trim().parse::<f32>() {
        Ok(v) if v >= min && v <= max => v,
        Ok(v) => {
            let clamped = v.clamp(min, max);
            log::warn!(
                "profile option {key} out of range (min {min:.2}, max {max:.2}, value {v:.2}), setting to {clamped:.2}"
            );
            clamped
        }
        Err(_) => {
            log::warn!("profile option {key} has invalid value {raw:?}, setting to {default:.2}");
            default
        }
    }
}

pub fn bool_or(key: &str, raw: Option<&str>, default: bool) -> bool {
    match raw.map(str::trim) {
        Some("1") | Some("true") => true,
        Some("0") | Some("false") => false,
        Some(other) => {
            log::warn!("profile option {key} has invalid value {other:?}, setting to {default}");
            default
        }
        None => default,
    }
}

pub fn string_or(raw: Option<&str>, default: &str) -> String {
    raw.map(str::trim).unwrap_or(default).to_string()
}

/// Parses a value through the type's `FromStr`, logging and substituting
/// `default` on an unrecognized spelling (enumerations).
pub fn enum_or<T>(key: &str, raw: Option<&str>, default: T) -> T
where
    T: FromStr + Clone + ToString,
{
    let Some(raw) = raw else { return default };

    match T::from_str(raw.trim()) {
        Ok(v) => v,
        Err(_) => {
            log::warn!(
                "profile option {key} has incorrect value {raw:?}, setting to {}",
                default.to_string()
            );
            default
        }
    }
}

/// Two whitespace-separated integers, e.g. velo_align ("integer pair").
pub fn vec2_or(key: &str, raw: Option<&str>, default: (i32, i32)) -> (i32, i32) {
    let Some(raw) = raw else { return default };

    let mut parts = raw.split_whitespace();
    match (parts.next().and_then(|v| v.parse::<i32>().ok()), parts.next().and_then(|v| v.parse::<i32>().ok())) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            log::warn!("profile option {key} has incorrect formatting (expected '<int> <int>'), setting to {default:?}");
            default
        }
    }
}

/// Four whitespace-separated 0..255 integers (RGBA), e.g. velo_color (
/// "integer color tuple").
pub fn color_or(key: &str, raw: Option<&str>, default: [u8; 4]) -> [u8; 4] {
    let Some(raw) = raw else { return default };

    let mut parts = raw.split_whitespace();
    let mut parsed = [0i64; 4];
    let mut ok = true;
    for slot in parsed.iter_mut() {
        match parts.next().and_then(|v| v.parse::<i64>().ok()) {
            Some(v) => *slot = v,
            None => {
                ok = false;
                break;
            }
        }
    }

    if !ok || parts.next().is_some() {
        log::warn!(
            "profile option {key} has incorrect formatting (expected '<r> <g> <b> <a>' 0..255), setting to {default:?}"
        );
        return default;
    }

    [
        parsed[0].clamp(0, 255) as u8,
        parsed[1].clamp(0, 255) as u8,
        parsed[2].clamp(0, 255) as u8,
        parsed[3].clamp(0, 255) as u8,
    ]
}
